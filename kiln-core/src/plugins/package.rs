//! Code packages: where a plugin's own exports come from.
//!
//! A package is opened once per load and closed when its plugin is torn down.
//! Native packages wrap a dynamic library; static packages wrap an in-process
//! [`ExportTable`] and are used for built-in plugins.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use libloading::{Library, Symbol};

use kiln_plugin_api::{
    API_VERSION, API_VERSION_SYMBOL, Export, ExportTable, PluginDescriptor, REGISTER_SYMBOL,
};

use super::error::LoaderError;

/// A plugin's own code.
pub trait CodePackage: Send + Sync {
    /// Directory the package was opened from, when it has one.
    fn origin(&self) -> Option<&Path>;

    /// Look up one of the package's own exports.
    fn lookup(&self, reference: &str) -> Option<Export>;

    /// Release the package. Safe to call more than once.
    fn close(&mut self);

    fn is_closed(&self) -> bool;
}

/// Opens the code package for a discovered plugin.
pub trait PackageOpener: Send + Sync {
    fn open(
        &self,
        dir: &Path,
        descriptor: &PluginDescriptor,
    ) -> Result<Box<dyn CodePackage>, LoaderError>;
}

// ─── Native ──────────────────────────────────────────────────────────

/// A plugin compiled as a `cdylib` with `export_plugin!`.
pub struct NativePackage {
    origin: PathBuf,
    library_path: PathBuf,
    // Dropped before `library`: the exports point into its code.
    exports: ExportTable,
    library: Option<Library>,
}

impl NativePackage {
    /// Map the library, check its API version and collect its exports.
    pub fn open(origin: &Path, library_path: &Path) -> Result<Self, LoaderError> {
        // SAFETY: We're loading a plugin that the operator installed and did
        // not disable. The library is expected to follow the export contract.
        let library = unsafe { Library::new(library_path)? };

        let found = {
            // SAFETY: `_kiln_plugin_api_version` is generated by `export_plugin!`
            // with this exact signature.
            let api_version_fn: Symbol<extern "C" fn() -> u32> =
                unsafe { library.get(API_VERSION_SYMBOL)? };
            api_version_fn()
        };
        if found != API_VERSION {
            return Err(LoaderError::ApiVersionMismatch {
                expected: API_VERSION,
                found,
            });
        }

        let mut exports = ExportTable::new();
        {
            // SAFETY: Same contract as above; the version check guarantees the
            // table layout matches the one this host was built with.
            let register: Symbol<extern "C" fn(&mut ExportTable)> =
                unsafe { library.get(REGISTER_SYMBOL)? };
            register(&mut exports);
        }

        tracing::debug!(
            library = %library_path.display(),
            exports = exports.len(),
            "Native package opened"
        );

        Ok(Self {
            origin: origin.to_path_buf(),
            library_path: library_path.to_path_buf(),
            exports,
            library: Some(library),
        })
    }

    pub fn library_path(&self) -> &Path {
        &self.library_path
    }
}

impl CodePackage for NativePackage {
    fn origin(&self) -> Option<&Path> {
        Some(&self.origin)
    }

    fn lookup(&self, reference: &str) -> Option<Export> {
        self.library.as_ref()?;
        self.exports.get(reference).cloned()
    }

    fn close(&mut self) {
        self.exports.clear();
        if self.library.take().is_some() {
            tracing::debug!(library = %self.library_path.display(), "Native package closed");
        }
    }

    fn is_closed(&self) -> bool {
        self.library.is_none()
    }
}

impl Drop for NativePackage {
    fn drop(&mut self) {
        self.close();
    }
}

/// Opens packages as native libraries found in the package directory.
#[derive(Debug, Default, Clone, Copy)]
pub struct NativeOpener;

impl NativeOpener {
    /// Find the library file in a plugin directory
    pub fn find_library(dir: &Path, name: &str) -> Result<PathBuf, LoaderError> {
        let extensions: &[&str] = if cfg!(target_os = "macos") {
            &["dylib", "so"]
        } else if cfg!(target_os = "windows") {
            &["dll"]
        } else {
            &["so"]
        };

        // Cargo names `hello-plugin` as `libhello_plugin.so`.
        let stems = [name.to_string(), name.replace('-', "_")];

        for ext in extensions {
            for stem in &stems {
                for file in [format!("{stem}.{ext}"), format!("lib{stem}.{ext}")] {
                    let lib_path = dir.join(file);
                    if lib_path.exists() {
                        return Ok(lib_path);
                    }
                }
            }
        }

        Err(LoaderError::LibraryNotFound {
            dir: dir.to_path_buf(),
        })
    }
}

impl PackageOpener for NativeOpener {
    fn open(
        &self,
        dir: &Path,
        descriptor: &PluginDescriptor,
    ) -> Result<Box<dyn CodePackage>, LoaderError> {
        let library_path = Self::find_library(dir, &descriptor.name)?;
        Ok(Box::new(NativePackage::open(dir, &library_path)?))
    }
}

// ─── Static ──────────────────────────────────────────────────────────

/// A package whose exports live in the host binary.
pub struct StaticPackage {
    origin: Option<PathBuf>,
    exports: ExportTable,
    closed: bool,
}

impl StaticPackage {
    pub fn new(exports: ExportTable, origin: Option<PathBuf>) -> Self {
        Self {
            origin,
            exports,
            closed: false,
        }
    }
}

impl CodePackage for StaticPackage {
    fn origin(&self) -> Option<&Path> {
        self.origin.as_deref()
    }

    fn lookup(&self, reference: &str) -> Option<Export> {
        if self.closed {
            return None;
        }
        self.exports.get(reference).cloned()
    }

    fn close(&mut self) {
        self.exports.clear();
        self.closed = true;
    }

    fn is_closed(&self) -> bool {
        self.closed
    }
}

/// Opens in-process packages registered by plugin name.
///
/// Each open hands out a fresh copy of the registered table, so closing one
/// package never affects another.
#[derive(Clone, Default)]
pub struct StaticOpener {
    tables: HashMap<String, ExportTable>,
    detached: bool,
}

impl StaticOpener {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the exports of the plugin called `name`.
    pub fn with(mut self, name: impl Into<String>, exports: ExportTable) -> Self {
        self.tables.insert(name.into(), exports);
        self
    }

    /// Opened packages report no origin, which makes them impossible to reload.
    pub fn detached(mut self) -> Self {
        self.detached = true;
        self
    }
}

impl PackageOpener for StaticOpener {
    fn open(
        &self,
        dir: &Path,
        descriptor: &PluginDescriptor,
    ) -> Result<Box<dyn CodePackage>, LoaderError> {
        let exports =
            self.tables
                .get(&descriptor.name)
                .cloned()
                .ok_or_else(|| LoaderError::PackageNotFound {
                    plugin: descriptor.name.clone(),
                })?;
        let origin = (!self.detached).then(|| dir.to_path_buf());
        Ok(Box::new(StaticPackage::new(exports, origin)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn descriptor(name: &str) -> PluginDescriptor {
        PluginDescriptor::new(name, format!("{name}::Plugin"), "1.0.0")
    }

    #[test]
    fn test_find_library_not_found() {
        let dir = TempDir::new().unwrap();
        let result = NativeOpener::find_library(dir.path(), "nonexistent");
        assert!(matches!(result, Err(LoaderError::LibraryNotFound { .. })));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_find_library_accepts_cargo_names() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("libhello_plugin.so"), b"").unwrap();
        let found = NativeOpener::find_library(dir.path(), "hello-plugin").unwrap();
        assert!(found.ends_with("libhello_plugin.so"));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_native_open_rejects_non_library() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("broken.so");
        std::fs::write(&path, b"not an elf file").unwrap();
        let result = NativePackage::open(dir.path(), &path);
        assert!(matches!(result, Err(LoaderError::Library(_))));
    }

    #[test]
    fn test_static_package_close_is_idempotent() {
        let mut package = StaticPackage::new(ExportTable::new().with("a::X", 1u8), None);
        assert!(package.lookup("a::X").is_some());
        package.close();
        package.close();
        assert!(package.is_closed());
        assert!(package.lookup("a::X").is_none());
    }

    #[test]
    fn test_static_opener_hands_out_independent_copies() {
        let dir = TempDir::new().unwrap();
        let opener = StaticOpener::new().with("a", ExportTable::new().with("a::X", 1u8));

        let mut first = opener.open(dir.path(), &descriptor("a")).unwrap();
        let second = opener.open(dir.path(), &descriptor("a")).unwrap();
        first.close();

        assert!(second.lookup("a::X").is_some());
        assert_eq!(second.origin(), Some(dir.path()));
    }

    #[test]
    fn test_static_opener_unknown_plugin() {
        let dir = TempDir::new().unwrap();
        let result = StaticOpener::new().open(dir.path(), &descriptor("ghost"));
        assert!(matches!(result, Err(LoaderError::PackageNotFound { .. })));
    }

    #[test]
    fn test_detached_opener_has_no_origin() {
        let dir = TempDir::new().unwrap();
        let opener = StaticOpener::new()
            .with("a", ExportTable::new())
            .detached();
        let package = opener.open(dir.path(), &descriptor("a")).unwrap();
        assert!(package.origin().is_none());
    }
}
