//! In-memory permission registry

use std::collections::HashMap;

use parking_lot::RwLock;

use kiln_plugin_api::{PermissionRegistry, PluginError};

/// Permission nodes owned by plugins.
///
/// A node belongs to the first plugin that registers it; registering it again
/// from the same plugin is a no-op.
#[derive(Debug, Default)]
pub struct MemoryPermissions {
    /// node -> owning plugin
    owners: RwLock<HashMap<String, String>>,
}

impl MemoryPermissions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn owner_of(&self, node: &str) -> Option<String> {
        self.owners.read().get(node).cloned()
    }

    pub fn len(&self) -> usize {
        self.owners.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.owners.read().is_empty()
    }
}

impl PermissionRegistry for MemoryPermissions {
    fn register(&self, plugin: &str, node: &str) -> Result<(), PluginError> {
        if node.trim().is_empty() {
            return Err(PluginError::InvalidInput(
                "permission node must not be empty".to_string(),
            ));
        }
        let mut owners = self.owners.write();
        match owners.get(node) {
            Some(owner) if owner != plugin => Err(PluginError::Permission(format!(
                "'{node}' is already registered by '{owner}'"
            ))),
            Some(_) => Ok(()),
            None => {
                tracing::debug!(plugin = %plugin, node = %node, "Permission registered");
                owners.insert(node.to_string(), plugin.to_string());
                Ok(())
            }
        }
    }

    fn registered(&self, plugin: &str) -> Vec<String> {
        let mut nodes: Vec<String> = self
            .owners
            .read()
            .iter()
            .filter(|(_, owner)| owner.as_str() == plugin)
            .map(|(node, _)| node.clone())
            .collect();
        nodes.sort();
        nodes
    }

    fn release(&self, plugin: &str) {
        self.owners.write().retain(|_, owner| owner != plugin);
    }
}
