//! PluginHost - discovers plugins, orders them and drives their lifecycle
//!
//! Every batch operation (discovery, resolution, each phase sweep) runs to
//! completion on the calling thread before the next one starts. Hooks run
//! synchronously and are not timed out. Status reads go through a
//! [`HostHandle`] and may happen from any thread while a batch is running.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;

use kiln_plugin_api::context::CONFIG_FILE;
use kiln_plugin_api::{
    EventPublisher, HostEvent, HostView, PermissionRegistry, Phase, PluginConfig, PluginContext,
    PluginDescriptor, PluginStatus, ServiceMap, Verdict,
};

use super::config::PluginHostConfig;
use super::descriptor;
use super::error::{DescriptorError, PluginHostError};
use super::graph::{self, DescriptorSet, Resolution};
use super::loader::{PluginLoader, SharedTypes};
use super::package::{NativeOpener, PackageOpener};
use super::registry::PluginRegistry;
use super::runtime::PluginRuntime;
use crate::events::MemoryEventBus;
use crate::permissions::MemoryPermissions;

/// Information about a discovered plugin
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PluginInfo {
    /// Plugin name
    pub name: String,
    /// Parsed manifest
    pub descriptor: PluginDescriptor,
    /// Current status (`Unloaded` if never loaded)
    pub status: PluginStatus,
    /// Package directory
    pub origin: Option<PathBuf>,
    /// Why the plugin failed, if it did
    pub failure: Option<String>,
    /// Hard dependencies absent at the last resolution
    pub missing_dependencies: Vec<String>,
    /// Whether the plugin is part of a dependency cycle
    pub circular: bool,
}

/// What a phase did to one plugin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    Advanced,
    /// A subscriber vetoed the change; the plugin kept its stable status.
    Vetoed(String),
    /// Disable postponed because enabled plugins still depend on it.
    Deferred,
}

/// Outcome of one or more phase sweeps.
#[derive(Debug, Default)]
pub struct SweepReport {
    pub advanced: Vec<String>,
    pub vetoed: Vec<String>,
    pub deferred: Vec<String>,
    pub failed: Vec<(String, PluginHostError)>,
}

impl SweepReport {
    /// No failures, vetoes or deferrals.
    pub fn is_clean(&self) -> bool {
        self.vetoed.is_empty() && self.deferred.is_empty() && self.failed.is_empty()
    }

    fn merge(&mut self, other: SweepReport) {
        self.advanced.extend(other.advanced);
        self.vetoed.extend(other.vetoed);
        self.deferred.extend(other.deferred);
        self.failed.extend(other.failed);
    }
}

/// Tables shared with [`HostHandle`]s. Only the owning host writes.
#[derive(Default)]
struct HostState {
    statuses: RwLock<HashMap<String, PluginStatus>>,
    failed: RwLock<HashMap<String, String>>,
    descriptors: RwLock<DescriptorSet>,
    origins: RwLock<HashMap<String, PathBuf>>,
    resolution: RwLock<Resolution>,
}

/// Cloneable, thread-safe read access to a host's state.
#[derive(Clone)]
pub struct HostHandle {
    state: Arc<HostState>,
}

impl HostHandle {
    pub fn status(&self, name: &str) -> Option<PluginStatus> {
        self.state.statuses.read().get(name).copied()
    }

    /// Whether the plugin has a live runtime (anything from `LOADED` up to,
    /// but excluding, `DISABLED`).
    pub fn is_plugin_loaded(&self, name: &str) -> bool {
        self.status(name)
            .is_some_and(|s| !matches!(s, PluginStatus::Unloaded | PluginStatus::Disabled))
    }

    pub fn is_plugin_enabled(&self, name: &str) -> bool {
        self.status(name) == Some(PluginStatus::Enabled)
    }

    /// Names of live plugins, sorted.
    pub fn loaded_plugins(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .state
            .statuses
            .read()
            .iter()
            .filter(|(_, s)| !matches!(s, PluginStatus::Unloaded | PluginStatus::Disabled))
            .map(|(n, _)| n.clone())
            .collect();
        names.sort();
        names
    }

    /// Plugins that failed to load or failed a phase, sorted.
    pub fn failed_plugins(&self) -> Vec<String> {
        let mut names: Vec<String> = self.state.failed.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn is_failed(&self, name: &str) -> bool {
        self.state.failed.read().contains_key(name)
    }

    pub fn failure_reason(&self, name: &str) -> Option<String> {
        self.state.failed.read().get(name).cloned()
    }

    /// Plugins declaring a hard or soft dependency on `name`.
    pub fn dependents_of(&self, name: &str) -> Vec<String> {
        self.state.resolution.read().dependents_of(name).to_vec()
    }

    /// Plugins excluded by the last resolution for lack of a hard dependency.
    pub fn missing_dependencies(&self) -> Vec<String> {
        self.state.resolution.read().missing.clone()
    }

    /// Plugins found in a dependency cycle by the last resolution.
    pub fn circular_dependencies(&self) -> Vec<String> {
        self.state.resolution.read().circular.clone()
    }

    /// Hard dependencies of `name` that are not currently loaded.
    pub fn get_missing_dependencies(&self, name: &str) -> Vec<String> {
        let deps = self
            .state
            .descriptors
            .read()
            .get(name)
            .map(|d| d.hard_dependencies.clone())
            .unwrap_or_default();
        deps.into_iter()
            .filter(|dep| !self.is_plugin_loaded(dep))
            .collect()
    }

    /// Whether `name` is known and every hard dependency is loaded.
    pub fn has_all_dependencies_loaded(&self, name: &str) -> bool {
        let known = self.state.descriptors.read().contains(name);
        known && self.get_missing_dependencies(name).is_empty()
    }

    pub fn plugin_info(&self, name: &str) -> Option<PluginInfo> {
        let descriptor = self.state.descriptors.read().get(name).cloned()?;
        let origin = self.state.origins.read().get(name).cloned();
        let (missing_dependencies, circular) = {
            let resolution = self.state.resolution.read();
            (resolution.missing_for(name).to_vec(), resolution.is_circular(name))
        };
        Some(PluginInfo {
            name: name.to_string(),
            status: self.status(name).unwrap_or(PluginStatus::Unloaded),
            failure: self.failure_reason(name),
            descriptor,
            origin,
            missing_dependencies,
            circular,
        })
    }

    /// Every discovered plugin, in discovery order.
    pub fn list_plugins(&self) -> Vec<PluginInfo> {
        let names: Vec<String> = self
            .state
            .descriptors
            .read()
            .names()
            .map(str::to_string)
            .collect();
        names.iter().filter_map(|n| self.plugin_info(n)).collect()
    }
}

impl HostView for HostHandle {
    fn status(&self, plugin: &str) -> Option<PluginStatus> {
        HostHandle::status(self, plugin)
    }

    fn plugin_names(&self) -> Vec<String> {
        self.loaded_plugins()
    }

    fn dependents_of(&self, plugin: &str) -> Vec<String> {
        HostHandle::dependents_of(self, plugin)
    }

    fn is_plugin_loaded(&self, plugin: &str) -> bool {
        HostHandle::is_plugin_loaded(self, plugin)
    }
}

/// Builder for [`PluginHost`] with injectable collaborators.
pub struct PluginHostBuilder {
    config: PluginHostConfig,
    opener: Option<Box<dyn PackageOpener>>,
    events: Option<Arc<dyn EventPublisher>>,
    permissions: Option<Arc<dyn PermissionRegistry>>,
    shared: Option<Arc<SharedTypes>>,
    services: ServiceMap,
}

impl PluginHostBuilder {
    /// How plugin packages are opened (native libraries by default).
    pub fn opener(mut self, opener: impl PackageOpener + 'static) -> Self {
        self.opener = Some(Box::new(opener));
        self
    }

    /// Where lifecycle events go (a fresh [`MemoryEventBus`] by default).
    pub fn events(mut self, events: Arc<dyn EventPublisher>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn permissions(mut self, permissions: Arc<dyn PermissionRegistry>) -> Self {
        self.permissions = Some(permissions);
        self
    }

    /// Host arena; overrides `shared_namespaces` from the config.
    pub fn shared_types(mut self, shared: Arc<SharedTypes>) -> Self {
        self.shared = Some(shared);
        self
    }

    /// Add a named service handed to every plugin context.
    pub fn service<T: std::any::Any + Send + Sync>(
        mut self,
        name: impl Into<String>,
        service: Arc<T>,
    ) -> Self {
        self.services.insert(name, service);
        self
    }

    pub fn build(self) -> PluginHost {
        let shared = self
            .shared
            .unwrap_or_else(|| Arc::new(SharedTypes::with_prefixes(&self.config.shared_namespaces)));
        PluginHost {
            opener: self.opener.unwrap_or_else(|| Box::new(NativeOpener)),
            events: self
                .events
                .unwrap_or_else(|| Arc::new(MemoryEventBus::default())),
            permissions: self
                .permissions
                .unwrap_or_else(|| Arc::new(MemoryPermissions::new())),
            shared,
            services: self.services,
            config: self.config,
            runtimes: HashMap::new(),
            state: Arc::new(HostState::default()),
        }
    }
}

/// The plugin host: owns every plugin runtime and drives the lifecycle
pub struct PluginHost {
    config: PluginHostConfig,
    opener: Box<dyn PackageOpener>,
    events: Arc<dyn EventPublisher>,
    permissions: Arc<dyn PermissionRegistry>,
    shared: Arc<SharedTypes>,
    services: ServiceMap,
    /// Live plugins by name
    runtimes: HashMap<String, PluginRuntime>,
    state: Arc<HostState>,
}

impl PluginHost {
    /// Create a plugin host that opens native packages
    pub fn new(config: PluginHostConfig) -> Self {
        Self::builder(config).build()
    }

    pub fn builder(config: PluginHostConfig) -> PluginHostBuilder {
        PluginHostBuilder {
            config,
            opener: None,
            events: None,
            permissions: None,
            shared: None,
            services: ServiceMap::new(),
        }
    }

    pub fn config(&self) -> &PluginHostConfig {
        &self.config
    }

    pub fn events(&self) -> &Arc<dyn EventPublisher> {
        &self.events
    }

    pub fn shared_types(&self) -> &Arc<SharedTypes> {
        &self.shared
    }

    /// A read-only handle usable from other threads.
    pub fn handle(&self) -> HostHandle {
        HostHandle {
            state: self.state.clone(),
        }
    }

    // ─── Discovery ───────────────────────────────────────────────────

    /// Parse every package directory under `dir`.
    ///
    /// Packages without a manifest, or with a malformed one, are skipped and
    /// logged. Entries are visited in file-name order, so repeated calls on an
    /// unchanged directory return identical sets.
    pub fn discover(&self, dir: &Path) -> Result<DescriptorSet, PluginHostError> {
        let mut set = DescriptorSet::new();
        for (path, descriptor) in scan(dir)? {
            if let Err(duplicate) = set.insert(descriptor) {
                tracing::warn!(
                    plugin = %duplicate.name,
                    package = %path.display(),
                    "Duplicate plugin name, keeping first"
                );
            }
        }
        Ok(set)
    }

    /// Discover plugins in every configured directory (project first).
    ///
    /// The first package providing a name wins. Plugins disabled in the
    /// registry are skipped. The result replaces the host's descriptor set
    /// and is resolved immediately.
    pub fn discover_all(&mut self) -> Result<DescriptorSet, PluginHostError> {
        let registry = PluginRegistry::load(&self.config.registry_path)?;
        let mut set = DescriptorSet::new();
        let mut origins = HashMap::new();

        for dir in self.config.plugin_dirs() {
            for (path, descriptor) in scan(&dir)? {
                if !registry.is_enabled(&descriptor.name) {
                    tracing::debug!(plugin = %descriptor.name, "Plugin disabled, skipping");
                    continue;
                }
                let name = descriptor.name.clone();
                match set.insert(descriptor) {
                    Ok(()) => {
                        origins.insert(name, path);
                    }
                    Err(duplicate) => tracing::warn!(
                        plugin = %duplicate.name,
                        package = %path.display(),
                        "Plugin shadowed by an earlier directory"
                    ),
                }
            }
        }

        // Live plugins stay known even if their package vanished.
        for (name, runtime) in &self.runtimes {
            if !set.contains(name) {
                set.upsert(runtime.descriptor().as_ref().clone());
                if let Some(origin) = runtime.loader().origin() {
                    origins.insert(name.clone(), origin.to_path_buf());
                }
            }
        }

        tracing::debug!(count = set.len(), "Plugins discovered");
        *self.state.origins.write() = origins;
        *self.state.descriptors.write() = set.clone();
        self.refresh_resolution();
        Ok(set)
    }

    fn refresh_resolution(&self) -> Resolution {
        let resolution = graph::resolve(&self.state.descriptors.read());
        *self.state.resolution.write() = resolution.clone();
        resolution
    }

    // ─── Loading ─────────────────────────────────────────────────────

    /// Discover, resolve and load every plugin that is not loaded yet.
    ///
    /// Plugins with a missing hard dependency are skipped. A plugin that
    /// fails to load is recorded as failed; loading continues with the rest.
    pub fn load_all(&mut self) -> Result<(), PluginHostError> {
        self.discover_all()?;
        let resolution = self.state.resolution.read().clone();

        for name in &resolution.missing {
            tracing::error!(
                plugin = %name,
                missing = ?resolution.missing_for(name),
                "Plugin excluded: hard dependencies not found"
            );
        }
        for name in &resolution.circular {
            tracing::warn!(plugin = %name, "Plugin is part of a dependency cycle");
        }

        for name in &resolution.order {
            if self.runtimes.contains_key(name) {
                continue;
            }
            self.state.failed.write().remove(name);
            if let Err(e) = self.load_plugin(name) {
                tracing::error!(plugin = %name, error = %e, "Failed to load plugin");
                self.state.failed.write().insert(name.clone(), e.to_string());
            }
        }

        Ok(())
    }

    /// Load a single discovered plugin into `LOADED`.
    fn load_plugin(&mut self, name: &str) -> Result<(), PluginHostError> {
        let not_found = || PluginHostError::NotFound {
            name: name.to_string(),
        };
        let descriptor = self
            .state
            .descriptors
            .read()
            .get(name)
            .cloned()
            .ok_or_else(not_found)?;
        let origin = self
            .state
            .origins
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| PluginHostError::NoSourcePackage {
                name: name.to_string(),
            })?;

        self.events.publish(&HostEvent::LoadingStarted {
            plugin: name.to_string(),
        });

        // 1. Open the package and instantiate the entry point
        let package = self.opener.open(&origin, &descriptor)?;
        let mut loader = PluginLoader::new(name, package, self.shared.clone());
        let instance = loader.instantiate(&descriptor.entry_point)?;

        // 2. Private data directory and persisted config
        let data_dir = self.config.data_dir_for(name);
        std::fs::create_dir_all(&data_dir)?;
        let config = PluginConfig::load(&data_dir.join(CONFIG_FILE)).unwrap_or_else(|e| {
            tracing::warn!(plugin = %name, error = %e, "Ignoring unreadable plugin config");
            PluginConfig::new()
        });

        // 3. Context
        let context = PluginContext::new(descriptor.clone(), data_dir)
            .with_config(config)
            .with_events(self.events.clone())
            .with_permissions(self.permissions.clone())
            .with_host(Arc::new(self.handle()))
            .with_services(self.services.clone());

        // 4. on_load
        let mut runtime = PluginRuntime::new(Arc::new(descriptor), instance, context, loader);
        if let Err(reason) = runtime.run_load() {
            runtime.teardown(self.events.as_ref(), self.permissions.as_ref());
            return Err(PluginHostError::HookFailed {
                name: name.to_string(),
                hook: "on_load",
                reason,
            });
        }

        let version = runtime.descriptor().version.clone();
        self.runtimes.insert(name.to_string(), runtime);
        self.events.publish(&HostEvent::StatusChanging {
            plugin: name.to_string(),
            from: PluginStatus::Unloaded,
            to: PluginStatus::Loaded,
            cancellable: false,
        });
        self.change_status(name, PluginStatus::Loaded)?;
        self.events.publish(&HostEvent::Loaded {
            plugin: name.to_string(),
            version: version.clone(),
        });
        tracing::info!(plugin = %name, version = %version, "Plugin loaded");
        Ok(())
    }

    // ─── Phase sweeps ────────────────────────────────────────────────

    /// Order used by every phase sweep: loaded plugins, restricted to their
    /// mutual hard dependencies. Disable sweeps walk it backwards.
    pub fn phase_order(&self) -> Vec<String> {
        let loaded: HashSet<String> = self.runtimes.keys().cloned().collect();
        graph::enable_order(&self.state.descriptors.read(), &loaded)
    }

    pub fn pre_enable_all(&mut self) -> SweepReport {
        self.sweep(Phase::PreEnable)
    }

    pub fn enable_all(&mut self) -> SweepReport {
        self.sweep(Phase::Enable)
    }

    /// Last enable sweep; successful plugins are marked `ENABLED`.
    pub fn post_enable_all(&mut self) -> SweepReport {
        self.sweep(Phase::PostEnable)
    }

    pub fn pre_disable_all(&mut self) -> SweepReport {
        self.sweep(Phase::PreDisable)
    }

    pub fn disable_all(&mut self) -> SweepReport {
        self.sweep(Phase::Disable)
    }

    /// Last disable sweep; successful plugins are marked `DISABLED` and torn
    /// down.
    pub fn post_disable_all(&mut self) -> SweepReport {
        self.sweep(Phase::PostDisable)
    }

    /// Run the three enable sweeps.
    pub fn enable_plugins(&mut self) -> SweepReport {
        let mut report = SweepReport::default();
        for phase in Phase::ENABLE_PHASES {
            report.merge(self.sweep(phase));
        }
        report
    }

    /// Run the three disable sweeps.
    pub fn disable_plugins(&mut self) -> SweepReport {
        let mut report = SweepReport::default();
        for phase in Phase::DISABLE_PHASES {
            report.merge(self.sweep(phase));
        }
        report
    }

    fn sweep(&mut self, phase: Phase) -> SweepReport {
        let mut order = self.phase_order();
        if phase.is_disable() {
            order.reverse();
        }
        tracing::debug!(phase = %phase, order = ?order, "Phase sweep");

        let mut report = SweepReport::default();
        for name in order {
            let Some(status) = self.runtimes.get(&name).map(PluginRuntime::status) else {
                continue;
            };
            if status != phase.expected() || self.handle().is_failed(&name) {
                continue;
            }
            match self.advance(&name, phase) {
                Ok(Step::Advanced) => report.advanced.push(name),
                Ok(Step::Vetoed(_)) => report.vetoed.push(name),
                Ok(Step::Deferred) => report.deferred.push(name),
                Err(e) => report.failed.push((name, e)),
            }
        }
        report
    }

    /// Move one plugin through one phase.
    fn advance(&mut self, name: &str, phase: Phase) -> Result<Step, PluginHostError> {
        let runtime = self.runtimes.get(name).ok_or_else(|| PluginHostError::NotFound {
            name: name.to_string(),
        })?;
        let from = runtime.status();
        let to = phase.target();
        if from != phase.expected() {
            return Err(PluginHostError::InvalidTransition {
                name: name.to_string(),
                from,
                to,
            });
        }
        let descriptor = runtime.descriptor().clone();

        if !phase.is_disable() {
            if let Err(e) = self.check_dependencies(&descriptor, phase) {
                self.fail(name, &e);
                return Err(e);
            }
        } else {
            let holders = self.enabled_dependents(name);
            if !holders.is_empty() {
                tracing::info!(
                    plugin = %name,
                    phase = %phase,
                    dependents = ?holders,
                    "Disable deferred: dependents still enabled"
                );
                self.revert(name, from);
                return Ok(Step::Deferred);
            }
        }

        let verdict = self.events.publish(&HostEvent::StatusChanging {
            plugin: name.to_string(),
            from,
            to,
            cancellable: phase.is_vetoable(),
        });
        if let Verdict::Veto { reason } = verdict {
            if phase.is_vetoable() {
                tracing::info!(plugin = %name, to = %to, reason = %reason, "Status change vetoed");
                self.revert(name, from);
                return Ok(Step::Vetoed(reason));
            }
            tracing::debug!(plugin = %name, to = %to, "Veto ignored for non-cancellable transition");
        }

        self.change_status(name, to)?;
        let result = match self.runtimes.get_mut(name) {
            Some(runtime) => runtime.run_phase(phase),
            None => Ok(()),
        };

        match result {
            Ok(()) => match phase.finalizes_to() {
                Some(done) => self.finalize(name, to, done),
                None => Ok(Step::Advanced),
            },
            Err(reason) => {
                let err = PluginHostError::HookFailed {
                    name: name.to_string(),
                    hook: phase.hook_name(),
                    reason,
                };
                self.fail(name, &err);
                Err(err)
            }
        }
    }

    /// Enable-side gate: every hard dependency must be live, not failed, and
    /// at least as far along the enable chain as this plugin is about to be.
    fn check_dependencies(
        &self,
        descriptor: &PluginDescriptor,
        phase: Phase,
    ) -> Result<(), PluginHostError> {
        let handle = self.handle();
        for dep in &descriptor.hard_dependencies {
            let status = self.runtimes.get(dep).map(PluginRuntime::status);
            match status {
                Some(status) if !handle.is_failed(dep) => {
                    if enable_rank(status) < enable_rank(phase.target()) {
                        return Err(PluginHostError::DependencyNotReady {
                            name: descriptor.name.clone(),
                            dependency: dep.clone(),
                            status,
                        });
                    }
                }
                _ => {
                    return Err(PluginHostError::MissingDependency {
                        name: descriptor.name.clone(),
                        dependency: dep.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Live plugins hard-depending on `name` that are still enable-side.
    fn enabled_dependents(&self, name: &str) -> Vec<String> {
        let mut holders: Vec<String> = self
            .runtimes
            .values()
            .filter(|r| r.name() != name && r.descriptor().depends_on(name))
            .filter(|r| r.status().is_enable_side())
            .map(|r| r.name().to_string())
            .collect();
        holders.sort();
        holders
    }

    fn finalize(
        &mut self,
        name: &str,
        from: PluginStatus,
        done: PluginStatus,
    ) -> Result<Step, PluginHostError> {
        if done == PluginStatus::Disabled && !self.enabled_dependents(name).is_empty() {
            tracing::info!(plugin = %name, "Teardown deferred: dependents still enabled");
            self.revert(name, from);
            return Ok(Step::Deferred);
        }

        self.events.publish(&HostEvent::StatusChanging {
            plugin: name.to_string(),
            from,
            to: done,
            cancellable: false,
        });
        self.change_status(name, done)?;

        if done == PluginStatus::Enabled {
            self.events.publish(&HostEvent::Enabled {
                plugin: name.to_string(),
            });
            tracing::info!(plugin = %name, "Plugin enabled");
        } else {
            self.events.publish(&HostEvent::Disabled {
                plugin: name.to_string(),
            });
            tracing::info!(plugin = %name, "Plugin disabled");
            if let Some(runtime) = self.runtimes.remove(name) {
                runtime.teardown(self.events.as_ref(), self.permissions.as_ref());
            }
        }
        Ok(Step::Advanced)
    }

    /// Record a failure and fall back to the last stable status.
    fn fail(&mut self, name: &str, err: &PluginHostError) {
        if let Some(current) = self.runtimes.get(name).map(PluginRuntime::status) {
            self.revert(name, current);
        }
        tracing::error!(plugin = %name, error = %err, "Plugin failed");
        self.state
            .failed
            .write()
            .insert(name.to_string(), err.to_string());
    }

    fn revert(&mut self, name: &str, current: PluginStatus) {
        let stable = current.fallback();
        if stable == current {
            return;
        }
        self.events.publish(&HostEvent::StatusChanging {
            plugin: name.to_string(),
            from: current,
            to: stable,
            cancellable: false,
        });
        if let Err(e) = self.change_status(name, stable) {
            tracing::warn!(plugin = %name, error = %e, "Could not restore stable status");
        }
    }

    fn change_status(&mut self, name: &str, to: PluginStatus) -> Result<(), PluginHostError> {
        let runtime = self
            .runtimes
            .get_mut(name)
            .ok_or_else(|| PluginHostError::NotFound {
                name: name.to_string(),
            })?;
        let from = runtime.status();
        if !from.can_transition_to(to) {
            return Err(PluginHostError::InvalidTransition {
                name: name.to_string(),
                from,
                to,
            });
        }
        runtime.set_status(to);
        self.state.statuses.write().insert(name.to_string(), to);
        tracing::debug!(plugin = %name, from = %from, to = %to, "Status changed");
        Ok(())
    }

    /// Run a full phase chain for one plugin, stopping at the first problem.
    fn run_chain(&mut self, name: &str, phases: [Phase; 3]) -> Result<(), PluginHostError> {
        for phase in phases {
            match self.advance(name, phase)? {
                Step::Advanced => {}
                Step::Vetoed(reason) => {
                    return Err(PluginHostError::Vetoed {
                        name: name.to_string(),
                        to: phase.target(),
                        reason,
                    });
                }
                Step::Deferred => {
                    return Err(PluginHostError::InUse {
                        name: name.to_string(),
                        dependents: self.enabled_dependents(name),
                    });
                }
            }
        }
        Ok(())
    }

    // ─── Reload & shutdown ───────────────────────────────────────────

    /// Disable, discard and re-load one plugin from its package, then enable
    /// it again if it was enabled.
    ///
    /// Enabled plugins that depend on it, directly or through each other, are
    /// disabled first and loaded and enabled again once the replacement is
    /// enabled. If disabling fails or is vetoed the plugin stays `ENABLED` and
    /// the dependents already taken down are brought back. If the replacement
    /// fails to load or enable it is left `DISABLED`, and so are its dependents.
    pub fn reload_plugin(&mut self, name: &str) -> Result<(), PluginHostError> {
        let runtime = self.runtimes.get(name).ok_or_else(|| PluginHostError::NotFound {
            name: name.to_string(),
        })?;
        let origin = runtime
            .loader()
            .origin()
            .map(Path::to_path_buf)
            .ok_or_else(|| PluginHostError::NoSourcePackage {
                name: name.to_string(),
            })?;
        let was_enabled = runtime.status() == PluginStatus::Enabled;
        tracing::info!(plugin = %name, origin = %origin.display(), "Reloading plugin");

        let mut dependents = Vec::new();
        if was_enabled {
            // Enable order; taken down back to front.
            dependents = self.enabled_dependents_closure(name);
            let mut stopped = Vec::new();
            for dependent in dependents.iter().rev() {
                if let Err(e) = self.run_chain(dependent, Phase::DISABLE_PHASES) {
                    tracing::warn!(plugin = %name, dependent = %dependent, error = %e, "Reload aborted");
                    stopped.reverse();
                    self.restart(&stopped);
                    return Err(e);
                }
                stopped.push(dependent.clone());
            }
            if let Err(e) = self.run_chain(name, Phase::DISABLE_PHASES) {
                self.restart(&dependents);
                return Err(e);
            }
        } else {
            self.force_unload(name);
            self.state
                .statuses
                .write()
                .insert(name.to_string(), PluginStatus::Disabled);
        }

        self.state.failed.write().remove(name);
        let result = self.load_replacement(name, &origin, was_enabled);
        match &result {
            Ok(()) => self.restart(&dependents),
            Err(e) => {
                tracing::error!(
                    plugin = %name,
                    error = %e,
                    left_disabled = ?dependents,
                    "Reload failed"
                );
                self.state
                    .failed
                    .write()
                    .insert(name.to_string(), e.to_string());
                if self.runtimes.contains_key(name) {
                    self.force_unload(name);
                }
                self.state
                    .statuses
                    .write()
                    .insert(name.to_string(), PluginStatus::Disabled);
            }
        }
        result
    }

    /// Enabled plugins hard-depending on `name`, transitively, in enable order.
    fn enabled_dependents_closure(&self, name: &str) -> Vec<String> {
        let mut found: HashSet<String> = HashSet::new();
        let mut queue = vec![name.to_string()];
        while let Some(current) = queue.pop() {
            for holder in self.enabled_dependents(&current) {
                if found.insert(holder.clone()) {
                    queue.push(holder);
                }
            }
        }
        found.remove(name);
        self.phase_order()
            .into_iter()
            .filter(|n| found.contains(n))
            .collect()
    }

    /// Load and enable plugins a reload took down, in the given order.
    fn restart(&mut self, names: &[String]) {
        for name in names {
            self.state.failed.write().remove(name);
            let result = match self.load_plugin(name) {
                Ok(()) => self.run_chain(name, Phase::ENABLE_PHASES),
                Err(e) => Err(e),
            };
            if let Err(e) = result {
                tracing::error!(plugin = %name, error = %e, "Could not restart plugin after reload");
                self.state
                    .failed
                    .write()
                    .insert(name.clone(), e.to_string());
            }
        }
    }

    fn load_replacement(
        &mut self,
        name: &str,
        origin: &Path,
        enable: bool,
    ) -> Result<(), PluginHostError> {
        let descriptor = descriptor::from_dir(origin)?;
        if descriptor.name != name {
            return Err(DescriptorError::InvalidName {
                name: descriptor.name,
            }
            .into());
        }
        self.state.descriptors.write().upsert(descriptor);
        self.state
            .origins
            .write()
            .insert(name.to_string(), origin.to_path_buf());
        let resolution = self.refresh_resolution();
        if let Some(dependency) = resolution.missing_for(name).first() {
            return Err(PluginHostError::MissingDependency {
                name: name.to_string(),
                dependency: dependency.clone(),
            });
        }

        self.load_plugin(name)?;
        if enable {
            self.run_chain(name, Phase::ENABLE_PHASES)?;
        }
        Ok(())
    }

    /// Disable everything, then unload whatever is left (failed or never
    /// enabled plugins included) and clear all host tables.
    pub fn shutdown(&mut self) -> SweepReport {
        let report = self.disable_plugins();
        self.unload_remaining();

        self.state.statuses.write().clear();
        self.state.failed.write().clear();
        self.state.origins.write().clear();
        *self.state.descriptors.write() = DescriptorSet::new();
        *self.state.resolution.write() = Resolution::default();
        tracing::info!(disabled = report.advanced.len(), "Plugin host shut down");
        report
    }

    /// Force-unload every live plugin, dependents before their dependencies.
    fn unload_remaining(&mut self) {
        let mut order = self.phase_order();
        order.reverse();
        for name in order {
            self.force_unload(&name);
        }
        let leftovers: Vec<String> = self.runtimes.keys().cloned().collect();
        for name in leftovers {
            self.force_unload(&name);
        }
    }

    /// Tear a plugin down without running its disable phases.
    fn force_unload(&mut self, name: &str) {
        if let Some(runtime) = self.runtimes.remove(name) {
            tracing::debug!(plugin = %name, status = %runtime.status(), "Unloading plugin");
            runtime.teardown(self.events.as_ref(), self.permissions.as_ref());
            self.state.statuses.write().remove(name);
        }
    }

    // ─── Registry ────────────────────────────────────────────────────

    /// Allow a plugin to be discovered again. Returns whether it was disabled.
    pub fn enable_in_registry(&self, name: &str) -> Result<bool, PluginHostError> {
        let mut registry = PluginRegistry::load(&self.config.registry_path)?;
        let changed = registry.enable(name);
        registry.save(&self.config.registry_path)?;
        tracing::info!(plugin = %name, "Plugin enabled in registry");
        Ok(changed)
    }

    /// Skip a plugin during discovery. Returns whether it was enabled.
    pub fn disable_in_registry(&self, name: &str) -> Result<bool, PluginHostError> {
        let mut registry = PluginRegistry::load(&self.config.registry_path)?;
        let changed = registry.disable(name);
        registry.save(&self.config.registry_path)?;
        tracing::info!(plugin = %name, "Plugin disabled in registry");
        Ok(changed)
    }

    // ─── Introspection ───────────────────────────────────────────────

    pub fn status(&self, name: &str) -> Option<PluginStatus> {
        self.handle().status(name)
    }

    pub fn is_plugin_loaded(&self, name: &str) -> bool {
        self.handle().is_plugin_loaded(name)
    }

    pub fn is_plugin_enabled(&self, name: &str) -> bool {
        self.handle().is_plugin_enabled(name)
    }

    pub fn get_plugin_info(&self, name: &str) -> Option<PluginInfo> {
        self.handle().plugin_info(name)
    }

    pub fn list_plugins(&self) -> Vec<PluginInfo> {
        self.handle().list_plugins()
    }

    pub fn failed_plugins(&self) -> Vec<String> {
        self.handle().failed_plugins()
    }

    pub fn failure_reason(&self, name: &str) -> Option<String> {
        self.handle().failure_reason(name)
    }

    pub fn dependents_of(&self, name: &str) -> Vec<String> {
        self.handle().dependents_of(name)
    }

    pub fn missing_dependencies(&self) -> Vec<String> {
        self.handle().missing_dependencies()
    }

    pub fn circular_dependencies(&self) -> Vec<String> {
        self.handle().circular_dependencies()
    }

    pub fn get_missing_dependencies(&self, name: &str) -> Vec<String> {
        self.handle().get_missing_dependencies(name)
    }

    pub fn has_all_dependencies_loaded(&self, name: &str) -> bool {
        self.handle().has_all_dependencies_loaded(name)
    }

    /// Discovered descriptors, in discovery order.
    pub fn descriptors(&self) -> DescriptorSet {
        self.state.descriptors.read().clone()
    }

    /// The last computed resolution.
    pub fn resolution(&self) -> Resolution {
        self.state.resolution.read().clone()
    }

    /// Number of live plugins
    pub fn plugin_count(&self) -> usize {
        self.runtimes.len()
    }
}

impl Drop for PluginHost {
    fn drop(&mut self) {
        self.unload_remaining();
    }
}

/// Position along the enable chain; 0 for anything else.
fn enable_rank(status: PluginStatus) -> u8 {
    match status {
        PluginStatus::PreEnable => 1,
        PluginStatus::Enable => 2,
        PluginStatus::PostEnable => 3,
        PluginStatus::Enabled => 4,
        _ => 0,
    }
}

/// Parse every package directory directly under `dir`, sorted by name.
fn scan(dir: &Path) -> Result<Vec<(PathBuf, PluginDescriptor)>, PluginHostError> {
    if !dir.exists() {
        tracing::debug!(dir = %dir.display(), "Plugin directory does not exist");
        return Ok(Vec::new());
    }

    let mut packages = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            packages.push(path);
        }
    }
    packages.sort();

    let mut found = Vec::new();
    for path in packages {
        match descriptor::from_dir(&path) {
            Ok(descriptor) => found.push((path, descriptor)),
            Err(e) if !e.is_malformed() => {
                tracing::debug!(package = %path.display(), error = %e, "Not a plugin package");
            }
            Err(e) => {
                tracing::warn!(package = %path.display(), error = %e, "Skipping plugin package");
            }
        }
    }
    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugins::package::StaticOpener;
    use kiln_plugin_api::{ExportTable, Plugin, PluginError};
    use tempfile::TempDir;

    #[derive(Default)]
    struct Quiet;

    impl Plugin for Quiet {
        fn on_load(&mut self, _ctx: &mut PluginContext) -> Result<(), PluginError> {
            Ok(())
        }
    }

    fn write_manifest(dir: &Path, name: &str, deps: &[&str]) {
        let package = dir.join(name);
        std::fs::create_dir_all(&package).unwrap();
        let deps: Vec<String> = deps.iter().map(|d| format!("\"{d}\"")).collect();
        std::fs::write(
            package.join("plugin.toml"),
            format!(
                "name = \"{name}\"\nversion = \"1.0.0\"\nmain = \"{name}::Quiet\"\ndependencies = [{}]\n",
                deps.join(", ")
            ),
        )
        .unwrap();
    }

    fn host(root: &TempDir, names: &[&str]) -> PluginHost {
        let mut opener = StaticOpener::new();
        for name in names {
            opener = opener.with(*name, ExportTable::new().with_plugin::<Quiet>(format!("{name}::Quiet")));
        }
        PluginHost::builder(PluginHostConfig::rooted(root.path()))
            .opener(opener)
            .build()
    }

    #[test]
    fn test_plugin_host_new() {
        let host = PluginHost::new(PluginHostConfig::default());
        assert_eq!(host.plugin_count(), 0);
        assert!(host.list_plugins().is_empty());
    }

    #[test]
    fn test_load_all_no_plugins() {
        let root = TempDir::new().unwrap();
        let mut host = host(&root, &[]);
        host.load_all().unwrap();
        assert_eq!(host.plugin_count(), 0);
    }

    #[test]
    fn test_discover_skips_broken_packages() {
        let root = TempDir::new().unwrap();
        let plugins = root.path().join("plugins");
        write_manifest(&plugins, "good", &[]);
        std::fs::create_dir_all(plugins.join("broken")).unwrap();
        std::fs::write(plugins.join("broken/plugin.toml"), "name = \"broken\"").unwrap();
        std::fs::create_dir_all(plugins.join("empty")).unwrap();
        std::fs::write(plugins.join("stray-file"), "").unwrap();

        let host = host(&root, &[]);
        let set = host.discover(&plugins).unwrap();
        assert_eq!(set.names().collect::<Vec<_>>(), vec!["good"]);
    }

    #[test]
    fn test_project_dir_shadows_user_dir() {
        let root = TempDir::new().unwrap();
        let project = root.path().join("project");
        write_manifest(&root.path().join("plugins"), "shared", &[]);
        write_manifest(&project, "shared", &["other"]);

        let mut host = PluginHost::builder(PluginHostConfig::rooted(root.path()).with_project_dir(&project))
            .opener(StaticOpener::new())
            .build();
        let set = host.discover_all().unwrap();
        assert!(set.get("shared").unwrap().depends_on("other"));
        assert_eq!(
            host.get_plugin_info("shared").unwrap().origin,
            Some(project.join("shared"))
        );
    }

    #[test]
    fn test_registry_disabled_plugin_is_not_discovered() {
        let root = TempDir::new().unwrap();
        write_manifest(&root.path().join("plugins"), "a", &[]);
        write_manifest(&root.path().join("plugins"), "b", &[]);

        let mut host = host(&root, &["a", "b"]);
        assert!(host.disable_in_registry("a").unwrap());
        host.load_all().unwrap();
        assert!(!host.is_plugin_loaded("a"));
        assert!(host.is_plugin_loaded("b"));

        assert!(host.enable_in_registry("a").unwrap());
        host.load_all().unwrap();
        assert!(host.is_plugin_loaded("a"));
    }

    #[test]
    fn test_enable_rank_orders_enable_chain() {
        assert!(enable_rank(PluginStatus::Enabled) > enable_rank(PluginStatus::PostEnable));
        assert!(enable_rank(PluginStatus::PreEnable) > enable_rank(PluginStatus::Loaded));
        assert_eq!(enable_rank(PluginStatus::PreDisable), 0);
    }

    #[test]
    fn test_sweep_report_merge() {
        let mut report = SweepReport::default();
        assert!(report.is_clean());
        report.merge(SweepReport {
            vetoed: vec!["a".to_string()],
            ..SweepReport::default()
        });
        assert!(!report.is_clean());
    }
}
