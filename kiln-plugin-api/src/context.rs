//! PluginContext - a plugin's interface to the host

use crate::error::PluginError;
use crate::event::{EventPublisher, HostEvent, NullPublisher, Verdict};
use crate::host::{DetachedHost, HostView};
use crate::permissions::{NoPermissions, PermissionRegistry};
use crate::types::PluginDescriptor;
use serde::{Serialize, de::DeserializeOwned};
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// File name of a plugin's persisted configuration inside its data directory.
pub const CONFIG_FILE: &str = "config.toml";

/// Plugin's interface to host capabilities.
///
/// This is passed to plugins during every lifecycle hook and provides access to:
/// - The plugin's own descriptor
/// - Plugin configuration (persistent key-value store)
/// - A private data directory
/// - Logging utilities
/// - The application event bus, permission registry and named services
/// - A read-only view of the other plugins in the host
pub struct PluginContext {
    descriptor: Arc<PluginDescriptor>,
    data_dir: PathBuf,
    config: PluginConfig,
    events: Arc<dyn EventPublisher>,
    permissions: Arc<dyn PermissionRegistry>,
    host: Arc<dyn HostView>,
    services: ServiceMap,
}

/// Plugin configuration - persistent key-value store backed by TOML
#[derive(Debug, Clone)]
pub struct PluginConfig {
    values: HashMap<String, toml::Value>,
    dirty: bool,
}

/// Named application services handed to plugins.
///
/// Cloning is cheap; entries are shared.
#[derive(Clone, Default)]
pub struct ServiceMap {
    entries: HashMap<String, Arc<dyn Any + Send + Sync>>,
}

impl PluginContext {
    /// Create a detached context: no events, no permissions, no other plugins.
    pub fn new(descriptor: PluginDescriptor, data_dir: PathBuf) -> Self {
        Self {
            descriptor: Arc::new(descriptor),
            data_dir,
            config: PluginConfig::new(),
            events: Arc::new(NullPublisher),
            permissions: Arc::new(NoPermissions),
            host: Arc::new(DetachedHost),
            services: ServiceMap::new(),
        }
    }

    pub fn with_config(mut self, config: PluginConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_events(mut self, events: Arc<dyn EventPublisher>) -> Self {
        self.events = events;
        self
    }

    pub fn with_permissions(mut self, permissions: Arc<dyn PermissionRegistry>) -> Self {
        self.permissions = permissions;
        self
    }

    pub fn with_host(mut self, host: Arc<dyn HostView>) -> Self {
        self.host = host;
        self
    }

    pub fn with_services(mut self, services: ServiceMap) -> Self {
        self.services = services;
        self
    }

    // ─── Identity ────────────────────────────────────────────────────

    /// Get the plugin's name
    pub fn plugin_name(&self) -> &str {
        &self.descriptor.name
    }

    pub fn descriptor(&self) -> &PluginDescriptor {
        &self.descriptor
    }

    /// Get the plugin's data directory
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    // ─── Configuration ───────────────────────────────────────────────

    /// Read a configuration value
    ///
    /// # Example
    /// ```ignore
    /// let threshold: Option<u32> = ctx.config_get("threshold");
    /// ```
    pub fn config_get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.config.get(key)
    }

    /// Write a configuration value
    ///
    /// Dirty configuration is persisted by the host when the plugin is torn
    /// down, or immediately through [`PluginContext::save_config`].
    pub fn config_set<T: Serialize>(&mut self, key: &str, value: T) -> Result<(), PluginError> {
        self.config.set(key, value)
    }

    /// Check if the configuration has unsaved changes
    pub fn config_is_dirty(&self) -> bool {
        self.config.is_dirty()
    }

    pub fn config_mut(&mut self) -> &mut PluginConfig {
        &mut self.config
    }

    /// Path of the persisted configuration file.
    pub fn config_path(&self) -> PathBuf {
        self.data_dir.join(CONFIG_FILE)
    }

    /// Persist the configuration to `<data_dir>/config.toml`.
    pub fn save_config(&mut self) -> Result<(), PluginError> {
        let path = self.config_path();
        self.config.save(&path)
    }

    // ─── Logging ─────────────────────────────────────────────────────

    /// Log an info message (automatically prefixed with plugin name)
    pub fn log_info(&self, message: &str) {
        tracing::info!(plugin = %self.plugin_name(), "{}", message);
    }

    /// Log a warning message
    pub fn log_warn(&self, message: &str) {
        tracing::warn!(plugin = %self.plugin_name(), "{}", message);
    }

    /// Log an error message
    pub fn log_error(&self, message: &str) {
        tracing::error!(plugin = %self.plugin_name(), "{}", message);
    }

    /// Log a debug message
    pub fn log_debug(&self, message: &str) {
        tracing::debug!(plugin = %self.plugin_name(), "{}", message);
    }

    // ─── Events & permissions ────────────────────────────────────────

    /// Publish an application event on behalf of this plugin.
    pub fn publish(&self, kind: &str, payload: serde_json::Value) -> Verdict {
        self.events.publish(&HostEvent::Custom {
            plugin: self.plugin_name().to_string(),
            kind: kind.to_string(),
            payload,
        })
    }

    /// Register a permission node owned by this plugin.
    ///
    /// Nodes are released automatically when the plugin is unloaded.
    pub fn register_permission(&self, node: &str) -> Result<(), PluginError> {
        self.permissions.register(self.plugin_name(), node)
    }

    /// Permission nodes currently registered by this plugin.
    pub fn permissions(&self) -> Vec<String> {
        self.permissions.registered(self.plugin_name())
    }

    // ─── Host & services ─────────────────────────────────────────────

    /// Read-only view of the host and its other plugins.
    pub fn host(&self) -> &dyn HostView {
        self.host.as_ref()
    }

    /// Look up a named service of type `T`.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let clock = ctx.service::<Clock>("clock")?;
    /// ```
    pub fn service<T: Any + Send + Sync>(&self, name: &str) -> Result<Arc<T>, PluginError> {
        self.services
            .get::<T>(name)
            .ok_or_else(|| PluginError::ServiceUnavailable(name.to_string()))
    }
}

impl fmt::Debug for PluginContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginContext")
            .field("plugin", &self.descriptor.name)
            .field("data_dir", &self.data_dir)
            .field("services", &self.services.names())
            .finish_non_exhaustive()
    }
}

impl PluginConfig {
    /// Create a new empty config
    pub fn new() -> Self {
        Self {
            values: HashMap::new(),
            dirty: false,
        }
    }

    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self, PluginError> {
        if !path.exists() {
            return Ok(Self::new());
        }
        let content = std::fs::read_to_string(path)?;
        let values: HashMap<String, toml::Value> =
            toml::from_str(&content).map_err(|e| PluginError::Config(e.to_string()))?;
        Ok(Self {
            values,
            dirty: false,
        })
    }

    /// Save configuration to a TOML file
    pub fn save(&mut self, path: &Path) -> Result<(), PluginError> {
        let content = toml::to_string_pretty(&self.values)
            .map_err(|e| PluginError::Serialization(e.to_string()))?;

        if let Some(parent) = path.parent().filter(|p| !p.exists()) {
            std::fs::create_dir_all(parent)?;
        }

        std::fs::write(path, content)?;
        self.dirty = false;
        Ok(())
    }

    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.values.get(key).and_then(|v| v.clone().try_into().ok())
    }

    pub fn set<T: Serialize>(&mut self, key: &str, value: T) -> Result<(), PluginError> {
        let toml_value =
            toml::Value::try_from(value).map_err(|e| PluginError::Serialization(e.to_string()))?;
        self.values.insert(key.to_string(), toml_value);
        self.dirty = true;
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Check if the config has been modified since loading/saving
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn mark_clean(&mut self) {
        self.dirty = false;
    }
}

impl Default for PluginConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl ServiceMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert<T: Any + Send + Sync>(&mut self, name: impl Into<String>, service: Arc<T>) {
        self.entries.insert(name.into(), service);
    }

    /// Builder form of [`ServiceMap::insert`].
    pub fn with<T: Any + Send + Sync>(mut self, name: impl Into<String>, service: Arc<T>) -> Self {
        self.insert(name, service);
        self
    }

    /// The service registered under `name`, if it has type `T`.
    pub fn get<T: Any + Send + Sync>(&self, name: &str) -> Option<Arc<T>> {
        self.entries
            .get(name)
            .cloned()
            .and_then(|s| s.downcast::<T>().ok())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Registered service names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entries.keys().cloned().collect();
        names.sort();
        names
    }
}

impl fmt::Debug for ServiceMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}
