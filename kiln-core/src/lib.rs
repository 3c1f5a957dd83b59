//! kiln-core: the kiln plugin host
//!
//! This crate provides everything needed to run plugins written against
//! [`kiln_plugin_api`]:
//!
//! - **Descriptors** - [`plugins::descriptor`] parses `plugin.toml` manifests
//! - **Dependency resolution** - [`plugins::graph`] orders plugins and reports
//!   missing and circular dependencies
//! - **Isolated loading** - [`plugins::PluginLoader`] resolves a plugin's types
//!   from its own package while sharing a fixed set of host namespaces
//! - **Lifecycle** - [`PluginHost`] drives plugins through the phased
//!   enable/disable state machine and contains per-plugin failures
//! - **Collaborators** - [`MemoryEventBus`] and [`MemoryPermissions`] are the
//!   in-process event bus and permission registry handed to plugins
//!
//! # Quick Start
//!
//! ```no_run
//! use kiln_core::{PluginHost, PluginHostConfig};
//!
//! fn example() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut host = PluginHost::new(PluginHostConfig::default());
//!
//!     host.discover_all()?;
//!     host.load_all()?;
//!     host.enable_plugins();
//!
//!     for info in host.list_plugins() {
//!         println!("{} {}", info.name, info.status);
//!     }
//!
//!     host.shutdown();
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                      PluginHost                      │
//! │  discover ──> DescriptorSet ──> resolve ──> order    │
//! │                                               │      │
//! │  ┌────────────────────────────────────────────▼───┐  │
//! │  │ PluginRuntime (per plugin)                     │  │
//! │  │  ┌──────────────┐   ┌───────────────────────┐  │  │
//! │  │  │ PluginLoader │──>│ CodePackage (own code)│  │  │
//! │  │  │  seen, cache │──>│ SharedTypes (host)    │  │  │
//! │  │  └──────────────┘   └───────────────────────┘  │  │
//! │  └────────────────────────────────────────────────┘  │
//! └──────────────────────────────────────────────────────┘
//! ```

pub mod events;
pub mod permissions;
pub mod plugins;

// Re-export key types for convenience
pub use events::MemoryEventBus;
pub use permissions::MemoryPermissions;
pub use plugins::{
    DescriptorError, DescriptorSet, HostHandle, LoaderError, PluginHost, PluginHostBuilder,
    PluginHostConfig, PluginHostError, PluginInfo, PluginLoader, PluginRegistry, Resolution,
    SharedTypes,
};
