//! Per-plugin isolated type resolution.
//!
//! Each plugin gets its own [`PluginLoader`], a small arena of resolved
//! exports backed by the plugin's [`CodePackage`]. References under a shared
//! namespace always come from the host's [`SharedTypes`]; everything else is
//! looked up in the plugin's own package first and in the host as a last
//! resort.
//!
//! Once a namespace has been served by the host for a loader, it is pinned
//! there: later references in that namespace try the host before the package,
//! so a type never ends up with one identity from the plugin and another from
//! the host.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;

use kiln_plugin_api::{Export, ExportTable, Plugin, PluginFactory, namespace_of};

use super::error::LoaderError;
use super::package::CodePackage;

/// Namespaces every plugin resolves through the host by default.
pub const DEFAULT_SHARED_NAMESPACES: [&str; 2] = ["kiln", "kiln_plugin_api"];

/// The host's long-lived arena of exports and the shared namespace allow-list.
pub struct SharedTypes {
    prefixes: Vec<String>,
    exports: RwLock<ExportTable>,
}

impl SharedTypes {
    /// Arena sharing [`DEFAULT_SHARED_NAMESPACES`].
    pub fn new() -> Self {
        Self::with_prefixes(DEFAULT_SHARED_NAMESPACES)
    }

    /// Arena sharing exactly `prefixes`. A trailing `::` is optional.
    pub fn with_prefixes<I, S>(prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let prefixes = prefixes
            .into_iter()
            .map(|p| p.as_ref().trim_end_matches("::").to_string())
            .filter(|p| !p.is_empty())
            .collect();
        Self {
            prefixes,
            exports: RwLock::new(ExportTable::new()),
        }
    }

    pub fn prefixes(&self) -> &[String] {
        &self.prefixes
    }

    /// Whether `reference` lives under a shared namespace.
    ///
    /// Prefixes match whole path segments: `kiln` covers `kiln::Clock` and
    /// `kiln::util::Clock` but not `kilnx::Clock`.
    pub fn is_shared(&self, reference: &str) -> bool {
        let namespace = namespace_of(reference);
        self.prefixes.iter().any(|prefix| {
            namespace == prefix
                || namespace
                    .strip_prefix(prefix.as_str())
                    .is_some_and(|rest| rest.starts_with("::"))
        })
    }

    /// Make a host value resolvable by plugins.
    pub fn provide<T: std::any::Any + Send + Sync>(&self, reference: impl Into<String>, value: T) {
        self.exports.write().export(reference, value);
    }

    /// Make an already shared host value resolvable by plugins.
    pub fn provide_shared(&self, reference: impl Into<String>, value: Export) {
        self.exports.write().export_shared(reference, value);
    }

    pub fn lookup(&self, reference: &str) -> Option<Export> {
        self.exports.read().get(reference).cloned()
    }
}

impl Default for SharedTypes {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SharedTypes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedTypes")
            .field("prefixes", &self.prefixes)
            .field("exports", &self.exports.read().len())
            .finish()
    }
}

/// Where a resolved export came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Package,
    Host,
}

/// A cached resolution.
#[derive(Clone)]
pub struct Resolved {
    pub export: Export,
    pub origin: Origin,
}

impl fmt::Debug for Resolved {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolved")
            .field("origin", &self.origin)
            .finish_non_exhaustive()
    }
}

/// Resolves type references for one plugin.
pub struct PluginLoader {
    plugin: String,
    origin: Option<PathBuf>,
    package: Option<Box<dyn CodePackage>>,
    host: Arc<SharedTypes>,
    cache: HashMap<String, Resolved>,
    seen: HashSet<String>,
}

impl PluginLoader {
    pub fn new(plugin: impl Into<String>, package: Box<dyn CodePackage>, host: Arc<SharedTypes>) -> Self {
        Self {
            plugin: plugin.into(),
            origin: package.origin().map(Path::to_path_buf),
            package: Some(package),
            host,
            cache: HashMap::new(),
            seen: HashSet::new(),
        }
    }

    pub fn plugin(&self) -> &str {
        &self.plugin
    }

    /// Package directory this loader was created from. Kept after close.
    pub fn origin(&self) -> Option<&Path> {
        self.origin.as_deref()
    }

    /// Resolve a type reference for this plugin.
    pub fn resolve(&mut self, reference: &str) -> Result<Resolved, LoaderError> {
        let Some(package) = self.package.as_deref() else {
            return Err(LoaderError::Closed {
                plugin: self.plugin.clone(),
            });
        };

        if let Some(hit) = self.cache.get(reference) {
            return Ok(hit.clone());
        }

        let namespace = namespace_of(reference);
        let resolved = if self.host.is_shared(reference) {
            self.host.lookup(reference).map(|export| Resolved {
                export,
                origin: Origin::Host,
            })
        } else if self.seen.contains(namespace) {
            self.host
                .lookup(reference)
                .map(|export| Resolved {
                    export,
                    origin: Origin::Host,
                })
                .or_else(|| {
                    package.lookup(reference).map(|export| Resolved {
                        export,
                        origin: Origin::Package,
                    })
                })
        } else if let Some(export) = package.lookup(reference) {
            Some(Resolved {
                export,
                origin: Origin::Package,
            })
        } else {
            let hit = self.host.lookup(reference);
            if hit.is_some() {
                tracing::debug!(
                    plugin = %self.plugin,
                    namespace = %namespace,
                    "Namespace pinned to host"
                );
                self.seen.insert(namespace.to_string());
            }
            hit.map(|export| Resolved {
                export,
                origin: Origin::Host,
            })
        };

        let resolved = resolved.ok_or_else(|| LoaderError::TypeResolution {
            plugin: self.plugin.clone(),
            reference: reference.to_string(),
        })?;
        self.cache.insert(reference.to_string(), resolved.clone());
        Ok(resolved)
    }

    /// Resolve `entry_point` and create a plugin instance from it.
    pub fn instantiate(&mut self, entry_point: &str) -> Result<Box<dyn Plugin>, LoaderError> {
        let resolved = self.resolve(entry_point)?;
        let factory = resolved
            .export
            .downcast_ref::<PluginFactory>()
            .ok_or_else(|| LoaderError::NotAPlugin {
                plugin: self.plugin.clone(),
                reference: entry_point.to_string(),
            })?;
        Ok(factory.create())
    }

    /// Namespaces pinned to the host so far.
    pub fn pinned_namespaces(&self) -> Vec<&str> {
        let mut pinned: Vec<&str> = self.seen.iter().map(String::as_str).collect();
        pinned.sort_unstable();
        pinned
    }

    pub fn cached(&self) -> usize {
        self.cache.len()
    }

    pub fn is_closed(&self) -> bool {
        self.package.is_none()
    }

    /// Drop every cached resolution and close the package.
    ///
    /// Calling this again is a no-op.
    pub fn close(&mut self) {
        self.cache.clear();
        self.seen.clear();
        if let Some(mut package) = self.package.take() {
            package.close();
            tracing::debug!(plugin = %self.plugin, "Loader closed");
        }
    }
}

impl Drop for PluginLoader {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for PluginLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginLoader")
            .field("plugin", &self.plugin)
            .field("origin", &self.origin)
            .field("closed", &self.is_closed())
            .field("cached", &self.cache.len())
            .field("pinned", &self.pinned_namespaces())
            .finish()
    }
}
