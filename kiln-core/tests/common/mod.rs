//! Shared fixtures for host integration tests
//!
//! Plugins are served in-process by a [`StaticOpener`]; each package
//! directory only holds its `plugin.toml`.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tempfile::TempDir;

use kiln_core::plugins::StaticOpener;
use kiln_core::{MemoryEventBus, MemoryPermissions, PluginHost, PluginHostConfig};
use kiln_plugin_api::{ExportTable, Plugin, PluginContext, PluginError, PluginFactory};

/// Ordered record of every hook call, as `"<plugin>:<hook>"`.
#[derive(Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<String>>>);

impl Journal {
    pub fn record(&self, entry: String) {
        self.0.lock().push(entry);
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().clone()
    }

    /// Plugins that ran `hook`, in call order.
    pub fn calls(&self, hook: &str) -> Vec<String> {
        let suffix = format!(":{hook}");
        self.0
            .lock()
            .iter()
            .filter_map(|e| e.strip_suffix(&suffix).map(str::to_string))
            .collect()
    }

    pub fn clear(&self) {
        self.0.lock().clear();
    }
}

/// How a test plugin misbehaves.
#[derive(Clone, Debug, Default)]
pub struct Behavior {
    /// Hook that returns an error
    pub fail_on: Option<&'static str>,
    /// `fail_on` only applies to instances created after this many others
    pub fail_from: usize,
    /// Hook that panics
    pub panic_on: Option<&'static str>,
    /// Permission node registered in `on_load`
    pub permission: Option<&'static str>,
    /// Record the status the host reports for this plugin inside each hook
    pub observe: bool,
    /// Config value written during `on_enable`
    pub remember: Option<(&'static str, i64)>,
    /// Sleep inside every hook
    pub pause: Option<Duration>,
}

impl Behavior {
    pub fn failing(hook: &'static str) -> Self {
        Self {
            fail_on: Some(hook),
            ..Self::default()
        }
    }

    /// Well-behaved until reloaded; the replacement fails `hook`.
    pub fn failing_after_reload(hook: &'static str) -> Self {
        Self {
            fail_on: Some(hook),
            fail_from: 1,
            ..Self::default()
        }
    }

    pub fn panicking(hook: &'static str) -> Self {
        Self {
            panic_on: Some(hook),
            ..Self::default()
        }
    }
}

/// Plugin that records its hooks in a [`Journal`].
pub struct Recorder {
    name: String,
    journal: Journal,
    behavior: Behavior,
    /// Instances of this plugin created before this one
    generation: usize,
}

impl Recorder {
    fn hook(&self, hook: &str, ctx: Option<&PluginContext>) -> Result<(), PluginError> {
        match ctx {
            Some(ctx) if self.behavior.observe => {
                let status = ctx
                    .host()
                    .status(&self.name)
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| "none".to_string());
                self.journal.record(format!("{}:{hook}@{status}", self.name));
            }
            _ => self.journal.record(format!("{}:{hook}", self.name)),
        }

        if let Some(pause) = self.behavior.pause {
            std::thread::sleep(pause);
        }
        if self.behavior.panic_on == Some(hook) {
            panic!("{} exploded in {hook}", self.name);
        }
        if self.behavior.fail_on == Some(hook) && self.generation >= self.behavior.fail_from {
            return Err(PluginError::custom(format!("{hook} refused")));
        }
        Ok(())
    }
}

impl Plugin for Recorder {
    fn on_load(&mut self, ctx: &mut PluginContext) -> Result<(), PluginError> {
        if let Some(node) = self.behavior.permission {
            ctx.register_permission(node)?;
        }
        self.hook("on_load", Some(ctx))
    }

    fn on_pre_enable(&mut self, ctx: &mut PluginContext) -> Result<(), PluginError> {
        self.hook("on_pre_enable", Some(ctx))
    }

    fn on_enable(&mut self, ctx: &mut PluginContext) -> Result<(), PluginError> {
        if let Some((key, value)) = self.behavior.remember {
            ctx.config_set(key, value)?;
        }
        self.hook("on_enable", Some(ctx))
    }

    fn on_post_enable(&mut self, ctx: &mut PluginContext) -> Result<(), PluginError> {
        self.hook("on_post_enable", Some(ctx))
    }

    fn on_pre_disable(&mut self, ctx: &mut PluginContext) -> Result<(), PluginError> {
        self.hook("on_pre_disable", Some(ctx))
    }

    fn on_disable(&mut self, ctx: &mut PluginContext) -> Result<(), PluginError> {
        self.hook("on_disable", Some(ctx))
    }

    fn on_post_disable(&mut self, ctx: &mut PluginContext) -> Result<(), PluginError> {
        self.hook("on_post_disable", Some(ctx))
    }

    fn on_unload(&mut self) -> Result<(), PluginError> {
        self.hook("on_unload", None)
    }
}

/// A plugin root on disk plus the in-process packages backing it.
pub struct Fixture {
    pub root: TempDir,
    pub journal: Journal,
    pub events: Arc<MemoryEventBus>,
    pub permissions: Arc<MemoryPermissions>,
    opener: StaticOpener,
}

impl Fixture {
    pub fn new() -> Self {
        Self {
            root: TempDir::new().unwrap(),
            journal: Journal::default(),
            events: Arc::new(MemoryEventBus::default()),
            permissions: Arc::new(MemoryPermissions::new()),
            opener: StaticOpener::new(),
        }
    }

    pub fn plugins_dir(&self) -> PathBuf {
        self.root.path().join("plugins")
    }

    pub fn config(&self) -> PluginHostConfig {
        PluginHostConfig::rooted(self.root.path())
    }

    /// Add a well-behaved plugin with the given hard dependencies.
    pub fn plugin(self, name: &str, deps: &[&str]) -> Self {
        self.plugin_with(name, deps, Behavior::default())
    }

    pub fn plugin_with(mut self, name: &str, deps: &[&str], behavior: Behavior) -> Self {
        write_manifest(&self.plugins_dir(), name, "1.0.0", deps);

        let journal = self.journal.clone();
        let owned = name.to_string();
        let created = Arc::new(AtomicUsize::new(0));
        let factory = PluginFactory::new(move || {
            Box::new(Recorder {
                name: owned.clone(),
                journal: journal.clone(),
                behavior: behavior.clone(),
                generation: created.fetch_add(1, Ordering::SeqCst),
            })
        });
        self.opener = self
            .opener
            .with(name, ExportTable::new().with(entry_point(name), factory));
        self
    }

    /// A manifest with no package behind it.
    pub fn manifest_only(self, name: &str, deps: &[&str]) -> Self {
        write_manifest(&self.plugins_dir(), name, "1.0.0", deps);
        self
    }

    pub fn host(&self) -> PluginHost {
        self.host_with(self.opener.clone())
    }

    /// Host whose packages have no origin, so nothing can be reloaded.
    pub fn detached_host(&self) -> PluginHost {
        self.host_with(self.opener.clone().detached())
    }

    fn host_with(&self, opener: StaticOpener) -> PluginHost {
        PluginHost::builder(self.config())
            .opener(opener)
            .events(self.events.clone())
            .permissions(self.permissions.clone())
            .build()
    }
}

pub fn entry_point(name: &str) -> String {
    format!("{}::Recorder", name.replace('-', "_"))
}

pub fn write_manifest(dir: &Path, name: &str, version: &str, deps: &[&str]) {
    let package = dir.join(name);
    std::fs::create_dir_all(&package).unwrap();
    let deps: Vec<String> = deps.iter().map(|d| format!("\"{d}\"")).collect();
    let manifest = format!(
        "name = \"{name}\"\nversion = \"{version}\"\nmain = \"{}\"\ndependencies = [{}]\n",
        entry_point(name),
        deps.join(", ")
    );
    std::fs::write(package.join("plugin.toml"), manifest).unwrap();
}
