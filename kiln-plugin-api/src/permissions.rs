//! Permission registration handle given to plugins

use crate::error::PluginError;

/// The host application's permission subsystem, as seen by plugins.
///
/// Plugins register the permission nodes they define; the host releases
/// everything a plugin registered when it is torn down.
pub trait PermissionRegistry: Send + Sync {
    /// Register `node` as owned by `plugin`.
    fn register(&self, plugin: &str, node: &str) -> Result<(), PluginError>;

    /// Nodes currently registered by `plugin`.
    fn registered(&self, plugin: &str) -> Vec<String>;

    /// Remove every node registered by `plugin`.
    fn release(&self, plugin: &str);
}

/// Registry that refuses all registrations.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoPermissions;

impl PermissionRegistry for NoPermissions {
    fn register(&self, plugin: &str, node: &str) -> Result<(), PluginError> {
        Err(PluginError::Permission(format!(
            "no permission registry available ({plugin} tried to register {node})"
        )))
    }

    fn registered(&self, _plugin: &str) -> Vec<String> {
        Vec::new()
    }

    fn release(&self, _plugin: &str) {}
}
