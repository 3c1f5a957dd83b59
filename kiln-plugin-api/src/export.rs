//! Named exports a code package offers to the host's loader.
//!
//! Every package (native library or in-process table) publishes its types
//! under Rust-style paths such as `hello_plugin::HelloPlugin`. The loader
//! resolves a plugin's entry point, and any other reference, against these
//! tables.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::Plugin;

/// A resolved export. Entry points hold a [`PluginFactory`].
pub type Export = Arc<dyn Any + Send + Sync>;

/// Creates fresh plugin instances.
#[derive(Clone)]
pub struct PluginFactory {
    create: Arc<dyn Fn() -> Box<dyn Plugin> + Send + Sync>,
}

impl PluginFactory {
    pub fn new<F>(create: F) -> Self
    where
        F: Fn() -> Box<dyn Plugin> + Send + Sync + 'static,
    {
        Self {
            create: Arc::new(create),
        }
    }

    /// Factory for a `Default`-constructible plugin type.
    pub fn of<P: Plugin + Default + 'static>() -> Self {
        Self::new(|| Box::new(P::default()))
    }

    pub fn create(&self) -> Box<dyn Plugin> {
        (self.create)()
    }
}

impl fmt::Debug for PluginFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginFactory").finish_non_exhaustive()
    }
}

/// The namespace of a type reference: everything before the last `::`.
///
/// ```
/// use kiln_plugin_api::namespace_of;
///
/// assert_eq!(namespace_of("kiln::util::Clock"), "kiln::util");
/// assert_eq!(namespace_of("Clock"), "");
/// ```
pub fn namespace_of(reference: &str) -> &str {
    reference.rsplit_once("::").map_or("", |(ns, _)| ns)
}

/// Reference → export table filled by a package.
#[derive(Clone, Default)]
pub struct ExportTable {
    entries: HashMap<String, Export>,
}

impl ExportTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Export an arbitrary value under `reference`.
    pub fn export<T: Any + Send + Sync>(&mut self, reference: impl Into<String>, value: T) {
        self.entries.insert(reference.into(), Arc::new(value));
    }

    /// Export an already shared value, keeping its identity.
    pub fn export_shared(&mut self, reference: impl Into<String>, value: Export) {
        self.entries.insert(reference.into(), value);
    }

    /// Export a plugin type's factory under `reference`.
    pub fn export_plugin<P: Plugin + Default + 'static>(&mut self, reference: impl Into<String>) {
        self.export(reference, PluginFactory::of::<P>());
    }

    /// Builder form of [`ExportTable::export_plugin`].
    pub fn with_plugin<P: Plugin + Default + 'static>(mut self, reference: impl Into<String>) -> Self {
        self.export_plugin::<P>(reference);
        self
    }

    /// Builder form of [`ExportTable::export`].
    pub fn with<T: Any + Send + Sync>(mut self, reference: impl Into<String>, value: T) -> Self {
        self.export(reference, value);
        self
    }

    pub fn get(&self, reference: &str) -> Option<&Export> {
        self.entries.get(reference)
    }

    pub fn contains(&self, reference: &str) -> bool {
        self.entries.contains_key(reference)
    }

    /// Exported references, sorted.
    pub fn references(&self) -> Vec<&str> {
        let mut refs: Vec<&str> = self.entries.keys().map(String::as_str).collect();
        refs.sort_unstable();
        refs
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every export. Used before unmapping a native library.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl fmt::Debug for ExportTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExportTable")
            .field("references", &self.references())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{PluginContext, PluginError};

    #[derive(Default)]
    struct Probe;

    impl Plugin for Probe {
        fn on_load(&mut self, _ctx: &mut PluginContext) -> Result<(), PluginError> {
            Ok(())
        }
    }

    #[test]
    fn test_namespace_of() {
        assert_eq!(namespace_of("a::b::C"), "a::b");
        assert_eq!(namespace_of("a::C"), "a");
        assert_eq!(namespace_of("C"), "");
    }

    #[test]
    fn test_export_plugin_yields_factory() {
        let table = ExportTable::new().with_plugin::<Probe>("probe::Probe");
        let export = table.get("probe::Probe").unwrap();
        let factory = export.downcast_ref::<PluginFactory>().unwrap();
        let _instance = factory.create();
    }

    #[test]
    fn test_export_shared_keeps_identity() {
        let value: Export = Arc::new(42u32);
        let mut table = ExportTable::new();
        table.export_shared("util::Answer", value.clone());
        assert!(Arc::ptr_eq(table.get("util::Answer").unwrap(), &value));
    }

    #[test]
    fn test_references_sorted_and_clear() {
        let mut table = ExportTable::new().with("b::B", 1u8).with("a::A", 2u8);
        assert_eq!(table.references(), vec!["a::A", "b::B"]);
        assert_eq!(table.len(), 2);
        table.clear();
        assert!(table.is_empty());
    }
}
