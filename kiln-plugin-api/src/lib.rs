//! kiln-plugin-api - Plugin API for the kiln plugin host
//!
//! This crate provides the traits and types needed to write plugins for kiln.
//! A plugin is a package holding a `plugin.toml` manifest and code that
//! exports one type implementing [`Plugin`]. The host drives every plugin
//! through a phased lifecycle:
//!
//! ```text
//! LOADED -> PRE_ENABLE -> ENABLE -> POST_ENABLE -> ENABLED
//! ENABLED -> PRE_DISABLE -> DISABLE -> POST_DISABLE -> DISABLED
//! ```
//!
//! # Example
//!
//! ```ignore
//! use kiln_plugin_api::{Plugin, PluginContext, PluginError, export_plugin};
//!
//! #[derive(Default)]
//! pub struct MyPlugin;
//!
//! impl Plugin for MyPlugin {
//!     fn on_load(&mut self, ctx: &mut PluginContext) -> Result<(), PluginError> {
//!         ctx.log_info("Plugin loaded!");
//!         Ok(())
//!     }
//!
//!     fn on_enable(&mut self, ctx: &mut PluginContext) -> Result<(), PluginError> {
//!         ctx.register_permission("my-plugin.use")?;
//!         Ok(())
//!     }
//! }
//!
//! // Exports `my_plugin::MyPlugin`; reference it from plugin.toml as `main`.
//! export_plugin!(MyPlugin);
//! ```

pub mod context;
pub mod error;
pub mod event;
pub mod export;
pub mod host;
pub mod permissions;
pub mod status;
pub mod types;

pub use context::{PluginConfig, PluginContext, ServiceMap};
pub use error::PluginError;
pub use event::{EventPublisher, HostEvent, NullPublisher, Verdict};
pub use export::{Export, ExportTable, PluginFactory, namespace_of};
pub use host::{DetachedHost, HostView};
pub use permissions::{NoPermissions, PermissionRegistry};
pub use status::{Phase, PluginStatus};
pub use types::PluginDescriptor;

/// Current plugin API version. Native plugins must match this exactly.
pub const API_VERSION: u32 = 1;

/// Symbol exported by native plugins returning their [`API_VERSION`].
pub const API_VERSION_SYMBOL: &[u8] = b"_kiln_plugin_api_version";

/// Symbol exported by native plugins that fills an [`ExportTable`].
pub const REGISTER_SYMBOL: &[u8] = b"_kiln_plugin_register";

/// The core plugin trait - implement this to create a kiln plugin.
///
/// Every hook except [`Plugin::on_load`] has a no-op default. Hooks run
/// synchronously on the host's orchestrating thread and must return promptly:
/// the host imposes no timeout, so a hook that blocks stalls the whole phase.
/// Returning an error (or panicking) fails the current phase for this plugin
/// only.
pub trait Plugin: Send + Sync {
    /// Called once after the plugin has been instantiated.
    fn on_load(&mut self, ctx: &mut PluginContext) -> Result<(), PluginError>;

    // ─── Enable phases ───────────────────────────────────────────────

    /// First enable phase; dependencies have already passed theirs.
    fn on_pre_enable(&mut self, _ctx: &mut PluginContext) -> Result<(), PluginError> {
        Ok(())
    }

    /// Main enable phase.
    fn on_enable(&mut self, _ctx: &mut PluginContext) -> Result<(), PluginError> {
        Ok(())
    }

    /// Last enable phase. The plugin is marked enabled once this returns `Ok`.
    fn on_post_enable(&mut self, _ctx: &mut PluginContext) -> Result<(), PluginError> {
        Ok(())
    }

    // ─── Disable phases (run dependents first) ──────────────────────

    /// First disable phase.
    fn on_pre_disable(&mut self, _ctx: &mut PluginContext) -> Result<(), PluginError> {
        Ok(())
    }

    /// Main disable phase.
    fn on_disable(&mut self, _ctx: &mut PluginContext) -> Result<(), PluginError> {
        Ok(())
    }

    /// Last disable phase, after which the host tears the plugin down.
    fn on_post_disable(&mut self, _ctx: &mut PluginContext) -> Result<(), PluginError> {
        Ok(())
    }

    /// Called right before the instance is dropped and its package closed.
    fn on_unload(&mut self) -> Result<(), PluginError> {
        Ok(())
    }
}

/// Export a plugin type for dynamic loading.
///
/// Generates the C ABI entry points that kiln uses to load native plugins.
/// The plugin type is exported under `<module path>::<type name>`, which is
/// the value the package manifest names as its entry point.
///
/// # Usage
///
/// ```ignore
/// kiln_plugin_api::export_plugin!(MyPlugin);
/// ```
///
/// # Generated Functions
///
/// - `_kiln_plugin_api_version()`: Returns the API version
/// - `_kiln_plugin_register()`: Adds the plugin factory to the host's table
#[macro_export]
macro_rules! export_plugin {
    ($plugin_type:ty) => {
        #[unsafe(no_mangle)]
        pub extern "C" fn _kiln_plugin_api_version() -> u32 {
            $crate::API_VERSION
        }

        #[unsafe(no_mangle)]
        #[allow(improper_ctypes_definitions)]
        pub extern "C" fn _kiln_plugin_register(table: &mut $crate::ExportTable) {
            table.export_plugin::<$plugin_type>(concat!(
                module_path!(),
                "::",
                stringify!($plugin_type)
            ));
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Minimal;

    impl Plugin for Minimal {
        fn on_load(&mut self, _ctx: &mut PluginContext) -> Result<(), PluginError> {
            Ok(())
        }
    }

    #[test]
    fn test_api_version_is_set() {
        assert_eq!(API_VERSION, 1);
    }

    #[test]
    fn test_plugin_trait_is_object_safe() {
        fn _takes_boxed_plugin(_: Box<dyn Plugin>) {}
    }

    #[test]
    fn test_default_hooks_are_noops() {
        let mut plugin = Minimal;
        let mut ctx = PluginContext::new(
            PluginDescriptor::new("minimal", "tests::Minimal", "1.0.0"),
            std::env::temp_dir(),
        );
        assert!(plugin.on_pre_enable(&mut ctx).is_ok());
        assert!(plugin.on_enable(&mut ctx).is_ok());
        assert!(plugin.on_post_enable(&mut ctx).is_ok());
        assert!(plugin.on_pre_disable(&mut ctx).is_ok());
        assert!(plugin.on_disable(&mut ctx).is_ok());
        assert!(plugin.on_post_disable(&mut ctx).is_ok());
        assert!(plugin.on_unload().is_ok());
    }
}
