//! Read-only view of the host handed to plugins

use crate::status::PluginStatus;

/// Introspection over the plugin host.
///
/// Implementations must be safe to query from any thread while a lifecycle
/// sweep is in flight.
pub trait HostView: Send + Sync {
    /// Current status of `plugin`, or `None` if it was never loaded.
    fn status(&self, plugin: &str) -> Option<PluginStatus>;

    /// Names of all plugins with a runtime.
    fn plugin_names(&self) -> Vec<String>;

    /// Plugins that declare `plugin` as a hard or soft dependency.
    fn dependents_of(&self, plugin: &str) -> Vec<String>;

    fn is_plugin_loaded(&self, plugin: &str) -> bool {
        self.status(plugin)
            .is_some_and(|s| !matches!(s, PluginStatus::Unloaded | PluginStatus::Disabled))
    }

    fn is_plugin_enabled(&self, plugin: &str) -> bool {
        self.status(plugin) == Some(PluginStatus::Enabled)
    }
}

/// View used when a context is built outside a host (tests, tooling).
#[derive(Debug, Default, Clone, Copy)]
pub struct DetachedHost;

impl HostView for DetachedHost {
    fn status(&self, _plugin: &str) -> Option<PluginStatus> {
        None
    }

    fn plugin_names(&self) -> Vec<String> {
        Vec::new()
    }

    fn dependents_of(&self, _plugin: &str) -> Vec<String> {
        Vec::new()
    }
}
