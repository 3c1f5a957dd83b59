use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use kiln_core::PluginHostConfig;

/// Configuration as stored in TOML files (with optional fields for merging)
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawKilnConfig {
    #[serde(default)]
    pub plugins: RawPluginsConfig,
}

/// Plugin section as stored in TOML (optional fields for proper merging)
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub struct RawPluginsConfig {
    /// User plugin directory
    pub user_dir: Option<PathBuf>,

    /// Project plugin directory, searched before the user directory
    pub project_dir: Option<PathBuf>,

    /// Parent of every per-plugin data directory
    pub data_root: Option<PathBuf>,

    /// Operator registry file
    pub registry: Option<PathBuf>,

    /// Namespaces plugins always resolve through the host
    pub shared_namespaces: Option<Vec<String>>,
}

/// Final configuration with defaults applied
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct KilnConfig {
    #[serde(default)]
    pub plugins: PluginsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct PluginsConfig {
    pub user_dir: PathBuf,
    pub project_dir: PathBuf,
    pub data_root: PathBuf,
    pub registry: PathBuf,
    pub shared_namespaces: Vec<String>,
}

impl Default for PluginsConfig {
    fn default() -> Self {
        let host = PluginHostConfig::default();
        Self {
            user_dir: host.user_plugin_dir,
            project_dir: PathBuf::from(DEFAULT_PROJECT_PLUGIN_DIR),
            data_root: host.data_root,
            registry: host.registry_path,
            shared_namespaces: host.shared_namespaces,
        }
    }
}

impl KilnConfig {
    /// Host configuration for these settings.
    pub fn host_config(&self) -> PluginHostConfig {
        PluginHostConfig {
            user_plugin_dir: self.plugins.user_dir.clone(),
            project_plugin_dir: Some(self.plugins.project_dir.clone()),
            data_root: self.plugins.data_root.clone(),
            registry_path: self.plugins.registry.clone(),
            shared_namespaces: self.plugins.shared_namespaces.clone(),
        }
    }
}

/// Project plugin directory, relative to the working directory
pub const DEFAULT_PROJECT_PLUGIN_DIR: &str = ".kiln/plugins";
