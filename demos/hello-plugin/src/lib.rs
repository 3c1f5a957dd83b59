//! Hello Plugin - A simple example plugin for kiln
//!
//! This plugin demonstrates:
//! - Basic plugin structure with the `export_plugin!` macro
//! - Implementing the `Plugin` trait and its phased lifecycle hooks
//! - Persisting state in the plugin's own config (`launches`)
//! - Registering a permission node and publishing a custom event
//!
//! ## Building
//!
//! ```bash
//! cargo build --release
//! ```
//!
//! ## Installing
//!
//! ```bash
//! mkdir -p ~/.config/kiln/plugins/hello-plugin
//! cp plugin.toml ~/.config/kiln/plugins/hello-plugin/
//! cp target/release/libhello_plugin.so ~/.config/kiln/plugins/hello-plugin/
//! kiln plugin run
//! ```

use kiln_plugin_api::{Plugin, PluginContext, PluginError, export_plugin};

/// Greets when enabled and counts how often it has been loaded.
#[derive(Default)]
pub struct HelloPlugin {
    launches: u64,
}

impl Plugin for HelloPlugin {
    fn on_load(&mut self, ctx: &mut PluginContext) -> Result<(), PluginError> {
        self.launches = ctx.config_get::<u64>("launches").unwrap_or(0) + 1;
        ctx.config_set("launches", self.launches)?;
        ctx.log_info(&format!("Hello plugin loaded (launch #{})", self.launches));
        Ok(())
    }

    fn on_pre_enable(&mut self, ctx: &mut PluginContext) -> Result<(), PluginError> {
        ctx.register_permission("hello.greet")
    }

    fn on_enable(&mut self, ctx: &mut PluginContext) -> Result<(), PluginError> {
        let verdict = ctx.publish(
            "greeting",
            serde_json::json!({ "message": "hello", "launch": self.launches }),
        );
        if verdict.is_veto() {
            ctx.log_warn("Greeting was vetoed");
        }
        Ok(())
    }

    fn on_disable(&mut self, ctx: &mut PluginContext) -> Result<(), PluginError> {
        ctx.log_info("Goodbye");
        Ok(())
    }
}

// This macro generates the C ABI entry points for dynamic loading
export_plugin!(HelloPlugin);
