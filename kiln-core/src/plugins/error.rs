//! Plugin host error types

use std::path::PathBuf;
use thiserror::Error;

use kiln_plugin_api::{PluginError, PluginStatus};

/// Manifest problems found while parsing a `plugin.toml`.
///
/// Every variant except [`DescriptorError::Io`] and
/// [`DescriptorError::ManifestNotFound`] means the manifest itself is
/// malformed.
#[derive(Error, Debug)]
pub enum DescriptorError {
    /// TOML syntax or type error
    #[error("Malformed manifest: {0}")]
    Syntax(String),

    /// Required key absent or empty
    #[error("Malformed manifest: `{field}` is missing or empty")]
    MissingField { field: &'static str },

    /// Name contains characters outside `[A-Za-z0-9._-]`
    #[error("Malformed manifest: invalid plugin name '{name}'")]
    InvalidName { name: String },

    /// A plugin listed itself as a dependency
    #[error("Malformed manifest: plugin '{name}' depends on itself")]
    SelfDependency { name: String },

    /// Manifest targets another plugin API
    #[error("Malformed manifest: api-version {found} is not supported (expected {expected})")]
    ApiVersion { expected: u32, found: i64 },

    /// Package directory has no manifest
    #[error("No manifest found in {dir}")]
    ManifestNotFound { dir: PathBuf },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl DescriptorError {
    /// Whether the manifest was present but invalid.
    pub fn is_malformed(&self) -> bool {
        !matches!(self, Self::ManifestNotFound { .. } | Self::Io(_))
    }
}

/// Errors raised while resolving types for a plugin.
#[derive(Error, Debug)]
pub enum LoaderError {
    /// Neither the package nor the host provides the reference
    #[error("Cannot resolve type '{reference}' for plugin '{plugin}'")]
    TypeResolution { plugin: String, reference: String },

    /// The entry point resolved to something that is not a plugin factory
    #[error("Entry point '{reference}' of plugin '{plugin}' is not a plugin")]
    NotAPlugin { plugin: String, reference: String },

    /// Resolution attempted after the loader was closed
    #[error("Loader for plugin '{plugin}' is closed")]
    Closed { plugin: String },

    /// Plugin library not found in its package directory
    #[error("Plugin library not found in {dir}")]
    LibraryNotFound { dir: PathBuf },

    /// No code package is registered for the plugin
    #[error("No code package available for plugin '{plugin}'")]
    PackageNotFound { plugin: String },

    /// API version mismatch between kiln and plugin
    #[error("API version mismatch: kiln expects {expected}, plugin has {found}")]
    ApiVersionMismatch { expected: u32, found: u32 },

    /// Failed to load dynamic library
    #[error("Failed to load plugin library: {0}")]
    Library(#[from] libloading::Error),
}

/// Errors that can occur in the plugin host
#[derive(Error, Debug)]
pub enum PluginHostError {
    /// Plugin not found
    #[error("Plugin '{name}' not found")]
    NotFound { name: String },

    /// The plugin's loader exposes no package origin to reload from
    #[error("Plugin '{name}' has no source package to reload from")]
    NoSourcePackage { name: String },

    /// A lifecycle hook returned an error or panicked
    #[error("Plugin '{name}' failed in {hook}: {reason}")]
    HookFailed {
        name: String,
        hook: &'static str,
        reason: String,
    },

    /// A hard dependency is not loaded or has failed
    #[error("Plugin '{name}' is missing dependency '{dependency}'")]
    MissingDependency { name: String, dependency: String },

    /// A hard dependency has not progressed far enough through the phase
    #[error("Plugin '{name}' needs '{dependency}' to be further along (it is {status})")]
    DependencyNotReady {
        name: String,
        dependency: String,
        status: PluginStatus,
    },

    /// Enabled plugins still hard-depend on this one
    #[error("Plugin '{name}' is still required by {}", dependents.join(", "))]
    InUse {
        name: String,
        dependents: Vec<String>,
    },

    /// Status change not permitted by the state machine
    #[error("Plugin '{name}' cannot move from {from} to {to}")]
    InvalidTransition {
        name: String,
        from: PluginStatus,
        to: PluginStatus,
    },

    /// A subscriber vetoed a status change
    #[error("Status change of plugin '{name}' to {to} was vetoed: {reason}")]
    Vetoed {
        name: String,
        to: PluginStatus,
        reason: String,
    },

    /// Manifest error
    #[error("Descriptor error: {0}")]
    Descriptor(#[from] DescriptorError),

    /// Loader error
    #[error("Loader error: {0}")]
    Loader(#[from] LoaderError),

    /// Plugin load hook failed
    #[error("Plugin initialization failed: {0}")]
    InitFailed(#[from] PluginError),

    /// Registry error (parsing, saving, etc.)
    #[error("Registry error: {0}")]
    Registry(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
