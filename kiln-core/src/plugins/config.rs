//! Plugin host configuration

use std::path::{Path, PathBuf};

use super::loader::DEFAULT_SHARED_NAMESPACES;

/// Registry file name inside the user plugin directory.
pub const REGISTRY_FILE: &str = "registry.toml";

/// Configuration for PluginHost
#[derive(Debug, Clone, PartialEq)]
pub struct PluginHostConfig {
    /// User plugin directory (~/.config/kiln/plugins)
    pub user_plugin_dir: PathBuf,
    /// Project-level plugin directory (.kiln/plugins)
    pub project_plugin_dir: Option<PathBuf>,
    /// Parent of every per-plugin data directory
    pub data_root: PathBuf,
    /// Operator registry (disabled plugins)
    pub registry_path: PathBuf,
    /// Namespaces plugins always resolve through the host
    pub shared_namespaces: Vec<String>,
}

impl Default for PluginHostConfig {
    fn default() -> Self {
        let user_plugin_dir = kiln_paths::plugins_dir();

        Self {
            registry_path: user_plugin_dir.join(REGISTRY_FILE),
            user_plugin_dir,
            project_plugin_dir: None,
            data_root: kiln_paths::data_dir().join("plugins"),
            shared_namespaces: DEFAULT_SHARED_NAMESPACES
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl PluginHostConfig {
    /// Everything under one root: `<root>/plugins` for packages and the
    /// registry, `<root>/data` for plugin data.
    pub fn rooted(root: &Path) -> Self {
        let user_plugin_dir = root.join("plugins");
        Self {
            registry_path: user_plugin_dir.join(REGISTRY_FILE),
            user_plugin_dir,
            data_root: root.join("data"),
            ..Self::default()
        }
    }

    pub fn with_project_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.project_plugin_dir = Some(dir.into());
        self
    }

    /// Plugin directories to search, project first.
    pub fn plugin_dirs(&self) -> Vec<PathBuf> {
        self.project_plugin_dir
            .iter()
            .cloned()
            .chain(std::iter::once(self.user_plugin_dir.clone()))
            .collect()
    }

    /// Private data directory of `plugin`.
    pub fn data_dir_for(&self, plugin: &str) -> PathBuf {
        self.data_root.join(plugin)
    }
}
