//! Plugin registry - tracks plugins the operator has disabled

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;

use super::error::PluginHostError;

/// Registry of disabled plugins
///
/// Stored as TOML in `~/.config/kiln/plugins/registry.toml`. Installed plugins
/// are enabled unless listed here.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct PluginRegistry {
    /// Set of disabled plugin names
    #[serde(default)]
    pub disabled: BTreeSet<String>,
}

impl PluginRegistry {
    /// Load registry from a TOML file
    ///
    /// Returns an empty registry if the file doesn't exist.
    pub fn load(path: &Path) -> Result<Self, PluginHostError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let registry: Self =
            toml::from_str(&content).map_err(|e| PluginHostError::Registry(e.to_string()))?;
        Ok(registry)
    }

    /// Save registry to a TOML file
    pub fn save(&self, path: &Path) -> Result<(), PluginHostError> {
        let content =
            toml::to_string_pretty(self).map_err(|e| PluginHostError::Registry(e.to_string()))?;

        if let Some(parent) = path.parent().filter(|p| !p.exists()) {
            std::fs::create_dir_all(parent)?;
        }

        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn is_enabled(&self, name: &str) -> bool {
        !self.disabled.contains(name)
    }

    /// Returns `true` if the plugin was previously disabled.
    pub fn enable(&mut self, name: &str) -> bool {
        self.disabled.remove(name)
    }

    /// Returns `true` if the plugin was previously enabled.
    pub fn disable(&mut self, name: &str) -> bool {
        self.disabled.insert(name.to_string())
    }

    /// Disabled plugins, sorted.
    pub fn disabled_plugins(&self) -> impl Iterator<Item = &str> {
        self.disabled.iter().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_registry_default_enables_everything() {
        let registry = PluginRegistry::default();
        assert!(registry.disabled.is_empty());
        assert!(registry.is_enabled("anything"));
    }

    #[test]
    fn test_registry_enable_disable() {
        let mut registry = PluginRegistry::default();

        assert!(registry.disable("test-plugin"));
        assert!(!registry.disable("test-plugin"));
        assert!(!registry.is_enabled("test-plugin"));
        assert!(registry.is_enabled("other-plugin"));

        assert!(registry.enable("test-plugin"));
        assert!(registry.is_enabled("test-plugin"));
    }

    #[test]
    fn test_registry_load_missing_file() {
        let registry = PluginRegistry::load(Path::new("/nonexistent/path/registry.toml")).unwrap();
        assert!(registry.disabled.is_empty());
    }

    #[test]
    fn test_registry_save_load_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested/registry.toml");

        let mut registry = PluginRegistry::default();
        registry.disable("analytics");
        registry.disable("history");
        registry.save(&path).unwrap();

        let loaded = PluginRegistry::load(&path).unwrap();
        assert_eq!(
            loaded.disabled_plugins().collect::<Vec<_>>(),
            vec!["analytics", "history"]
        );
    }

    #[test]
    fn test_registry_rejects_garbage() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("registry.toml");
        std::fs::write(&path, "disabled = 3").unwrap();
        assert!(matches!(
            PluginRegistry::load(&path),
            Err(PluginHostError::Registry(_))
        ));
    }
}
