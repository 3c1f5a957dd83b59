use super::types::{KilnConfig, PluginsConfig, RawKilnConfig, RawPluginsConfig};
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

pub struct ConfigLoader;

impl ConfigLoader {
    /// Load merged configuration (user + project)
    pub fn load() -> Result<KilnConfig> {
        let mut raw = RawKilnConfig::default();

        // Layer 1: User config
        let user_path = Self::user_config_path();
        if user_path.exists() {
            raw = Self::merge_raw(raw, Self::read_raw(&user_path)?);
        }

        // Layer 2: Project config
        let project_path = Self::project_config_path();
        if project_path.exists() {
            raw = Self::merge_raw(raw, Self::read_raw(&project_path)?);
        }

        Ok(Self::finalize(raw))
    }

    /// Load a single config file, applying defaults for anything unset
    pub fn load_from_path(path: &Path) -> Result<KilnConfig> {
        if !path.exists() {
            return Ok(KilnConfig::default());
        }
        Ok(Self::finalize(Self::read_raw(path)?))
    }

    /// Get user config path
    pub fn user_config_path() -> PathBuf {
        kiln_paths::config_dir().join("config.toml")
    }

    /// Get project config path
    /// Can be overridden with KILN_PROJECT_CONFIG_DIR env var (useful for isolated tests)
    pub fn project_config_path() -> PathBuf {
        if let Ok(dir) = std::env::var("KILN_PROJECT_CONFIG_DIR") {
            PathBuf::from(dir).join("config.toml")
        } else {
            PathBuf::from(".kiln/config.toml")
        }
    }

    fn read_raw(path: &Path) -> Result<RawKilnConfig> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        toml::from_str(&contents).with_context(|| format!("parsing {}", path.display()))
    }

    /// Merge two raw configs (overlay values override base only if explicitly set)
    fn merge_raw(base: RawKilnConfig, overlay: RawKilnConfig) -> RawKilnConfig {
        RawKilnConfig {
            plugins: RawPluginsConfig {
                user_dir: overlay.plugins.user_dir.or(base.plugins.user_dir),
                project_dir: overlay.plugins.project_dir.or(base.plugins.project_dir),
                data_root: overlay.plugins.data_root.or(base.plugins.data_root),
                registry: overlay.plugins.registry.or(base.plugins.registry),
                shared_namespaces: overlay
                    .plugins
                    .shared_namespaces
                    .or(base.plugins.shared_namespaces),
            },
        }
    }

    /// Convert raw config to final config with defaults applied
    fn finalize(raw: RawKilnConfig) -> KilnConfig {
        let defaults = PluginsConfig::default();
        let user_dir = raw.plugins.user_dir.unwrap_or(defaults.user_dir);
        // A relocated user directory carries its registry along unless one is named.
        let registry = raw.plugins.registry.unwrap_or_else(|| {
            user_dir.join(kiln_core::plugins::REGISTRY_FILE)
        });
        KilnConfig {
            plugins: PluginsConfig {
                project_dir: raw.plugins.project_dir.unwrap_or(defaults.project_dir),
                data_root: raw.plugins.data_root.unwrap_or(defaults.data_root),
                shared_namespaces: raw
                    .plugins
                    .shared_namespaces
                    .unwrap_or(defaults.shared_namespaces),
                user_dir,
                registry,
            },
        }
    }
}
