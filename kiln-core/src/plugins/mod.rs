//! Plugin system for kiln
//!
//! This module provides the infrastructure for loading and managing plugins:
//!
//! - [`descriptor`]: parses `plugin.toml` manifests into [`PluginDescriptor`]s
//! - [`graph`]: orders descriptors by their dependencies
//! - [`PluginLoader`]: per-plugin type resolution over a [`CodePackage`] and
//!   the host's [`SharedTypes`]
//! - [`PluginHost`]: the plugin manager that loads plugins and runs the
//!   enable/disable phases
//! - [`PluginRegistry`]: tracks which plugins are disabled
//!
//! # Plugin Discovery
//!
//! Plugins are discovered from two directories:
//! 1. Project plugins: `.kiln/plugins/` (takes precedence)
//! 2. User plugins: `~/.config/kiln/plugins/`
//!
//! # Plugin Structure
//!
//! Each plugin directory should contain:
//! - `plugin.toml` - the manifest (name, version, entry point, dependencies)
//! - `<name>.so` (or `lib<name>.so`, `.dylib`/`.dll`) - the plugin binary
//!
//! Plugin data, including the optional `config.toml`, lives under the host's
//! data root, one directory per plugin.
//!
//! # Example
//!
//! ```ignore
//! use kiln_core::plugins::{PluginHost, PluginHostConfig};
//!
//! let mut host = PluginHost::new(PluginHostConfig::default());
//! host.load_all()?;
//!
//! let report = host.enable_plugins();
//! for (name, err) in &report.failed {
//!     eprintln!("{name}: {err}");
//! }
//!
//! host.reload_plugin("analytics")?;
//! host.shutdown();
//! ```
//!
//! [`PluginDescriptor`]: kiln_plugin_api::PluginDescriptor

pub mod descriptor;
pub mod graph;

mod config;
mod error;
mod host;
mod loader;
mod package;
mod registry;
mod runtime;

pub use config::{PluginHostConfig, REGISTRY_FILE};
pub use error::{DescriptorError, LoaderError, PluginHostError};
pub use graph::{DescriptorSet, Resolution, enable_order, resolve};
pub use host::{HostHandle, PluginHost, PluginHostBuilder, PluginInfo, Step, SweepReport};
pub use loader::{DEFAULT_SHARED_NAMESPACES, Origin, PluginLoader, Resolved, SharedTypes};
pub use package::{
    CodePackage, NativeOpener, NativePackage, PackageOpener, StaticOpener, StaticPackage,
};
pub use registry::PluginRegistry;
pub use runtime::PluginRuntime;
