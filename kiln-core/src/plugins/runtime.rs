//! A loaded plugin and everything it owns.

use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use kiln_plugin_api::{
    EventPublisher, PermissionRegistry, Phase, Plugin, PluginContext, PluginDescriptor,
    PluginError, PluginStatus,
};

use super::loader::PluginLoader;

/// Runtime state of one loaded plugin.
///
/// Fields drop in declaration order: the instance goes before its context,
/// and both before the loader that owns the plugin's code.
pub struct PluginRuntime {
    instance: Box<dyn Plugin>,
    context: PluginContext,
    loader: PluginLoader,
    descriptor: Arc<PluginDescriptor>,
    status: PluginStatus,
}

impl PluginRuntime {
    pub(crate) fn new(
        descriptor: Arc<PluginDescriptor>,
        instance: Box<dyn Plugin>,
        context: PluginContext,
        loader: PluginLoader,
    ) -> Self {
        Self {
            instance,
            context,
            loader,
            descriptor,
            status: PluginStatus::Unloaded,
        }
    }

    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    pub fn descriptor(&self) -> &Arc<PluginDescriptor> {
        &self.descriptor
    }

    pub fn status(&self) -> PluginStatus {
        self.status
    }

    pub(crate) fn set_status(&mut self, status: PluginStatus) {
        self.status = status;
    }

    pub fn loader(&self) -> &PluginLoader {
        &self.loader
    }

    /// Run `on_load`, containing panics.
    pub(crate) fn run_load(&mut self) -> Result<(), String> {
        let Self {
            instance, context, ..
        } = self;
        contain(|| instance.on_load(context))
    }

    /// Run the hook belonging to `phase`, containing panics.
    pub(crate) fn run_phase(&mut self, phase: Phase) -> Result<(), String> {
        let Self {
            instance, context, ..
        } = self;
        contain(|| match phase {
            Phase::PreEnable => instance.on_pre_enable(context),
            Phase::Enable => instance.on_enable(context),
            Phase::PostEnable => instance.on_post_enable(context),
            Phase::PreDisable => instance.on_pre_disable(context),
            Phase::Disable => instance.on_disable(context),
            Phase::PostDisable => instance.on_post_disable(context),
        })
    }

    /// Release everything the plugin holds and close its loader.
    pub(crate) fn teardown(self, events: &dyn EventPublisher, permissions: &dyn PermissionRegistry) {
        let PluginRuntime {
            mut instance,
            mut context,
            mut loader,
            descriptor,
            ..
        } = self;
        let name = descriptor.name.as_str();

        if context.config_is_dirty() {
            if let Err(e) = context.save_config() {
                tracing::warn!(plugin = %name, error = %e, "Failed to save plugin config");
            }
        }

        events.release(name);
        permissions.release(name);

        if let Err(reason) = contain(|| instance.on_unload()) {
            tracing::warn!(plugin = %name, error = %reason, "Plugin on_unload returned error");
        }

        drop(instance);
        drop(context);
        loader.close();
        tracing::debug!(plugin = %name, "Plugin torn down");
    }
}

fn contain<F>(hook: F) -> Result<(), String>
where
    F: FnOnce() -> Result<(), PluginError>,
{
    match catch_unwind(AssertUnwindSafe(hook)) {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(e.to_string()),
        Err(payload) => Err(format!("panicked: {}", panic_message(payload.as_ref()))),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s
    } else {
        "unknown panic"
    }
}
