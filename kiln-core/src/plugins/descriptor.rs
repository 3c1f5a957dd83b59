//! Manifest parsing
//!
//! A plugin package carries a `plugin.toml` at its root:
//!
//! ```toml
//! name = "greeter"
//! version = "1.2.0"
//! main = "greeter::Greeter"
//! description = "Says hello"
//! authors = ["Ada"]
//! dependencies = ["storage"]
//! soft-dependencies = ["metrics"]
//! load-before = ["dashboard"]
//! ```
//!
//! Unknown keys are ignored so that newer manifests still load on older hosts.

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use kiln_plugin_api::{API_VERSION, PluginDescriptor};

use super::error::DescriptorError;

/// File name of the manifest inside a plugin package.
pub const MANIFEST_FILE: &str = "plugin.toml";

#[derive(Debug, Default, Deserialize)]
struct RawManifest {
    name: Option<String>,
    main: Option<String>,
    #[serde(rename = "entry-point")]
    entry_point: Option<String>,
    #[serde(rename = "entryPoint")]
    entry_point_camel: Option<String>,
    version: Option<toml::Value>,
    description: Option<String>,
    author: Option<String>,
    #[serde(default)]
    authors: Vec<String>,
    website: Option<String>,
    #[serde(default, alias = "depend")]
    dependencies: Vec<String>,
    #[serde(default, rename = "soft-dependencies", alias = "softdepend")]
    soft_dependencies: Vec<String>,
    #[serde(default, rename = "load-before", alias = "loadbefore")]
    load_before: Vec<String>,
    #[serde(rename = "api-version")]
    api_version: Option<i64>,
}

#[derive(Serialize)]
struct ManifestOut<'a> {
    name: &'a str,
    version: &'a str,
    main: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<&'a str>,
    #[serde(skip_serializing_if = "<[String]>::is_empty")]
    authors: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    website: Option<&'a str>,
    #[serde(skip_serializing_if = "<[String]>::is_empty")]
    dependencies: &'a [String],
    #[serde(
        rename = "soft-dependencies",
        skip_serializing_if = "<[String]>::is_empty"
    )]
    soft_dependencies: &'a [String],
    #[serde(rename = "load-before", skip_serializing_if = "<[String]>::is_empty")]
    load_before: &'a [String],
}

/// Parse manifest bytes into a descriptor.
///
/// Fails when `name`, the entry point or `version` is missing or empty, when
/// the name has characters outside `[A-Za-z0-9._-]`, or when a plugin lists
/// itself as a dependency.
pub fn parse(bytes: &[u8]) -> Result<PluginDescriptor, DescriptorError> {
    let text = std::str::from_utf8(bytes).map_err(|e| DescriptorError::Syntax(e.to_string()))?;
    let raw: RawManifest = toml::from_str(text).map_err(|e| DescriptorError::Syntax(e.to_string()))?;

    if let Some(found) = raw.api_version.filter(|v| *v != i64::from(API_VERSION)) {
        return Err(DescriptorError::ApiVersion {
            expected: API_VERSION,
            found,
        });
    }

    let name = required(raw.name, "name")?;
    if !is_valid_name(&name) {
        return Err(DescriptorError::InvalidName { name });
    }

    let entry_point = [raw.main, raw.entry_point, raw.entry_point_camel]
        .into_iter()
        .flatten()
        .map(|s| s.trim().to_string())
        .find(|s| !s.is_empty())
        .ok_or(DescriptorError::MissingField { field: "main" })?;

    let version = required(raw.version.as_ref().and_then(scalar_string), "version")?;

    let hard_dependencies = dedup(raw.dependencies);
    let soft_dependencies = dedup(raw.soft_dependencies);
    if hard_dependencies.contains(&name) || soft_dependencies.contains(&name) {
        return Err(DescriptorError::SelfDependency { name });
    }

    let mut authors = Vec::new();
    authors.extend(raw.author);
    authors.extend(raw.authors);

    Ok(PluginDescriptor {
        name,
        entry_point,
        version,
        description: raw.description.filter(|d| !d.trim().is_empty()),
        authors: dedup(authors),
        website: raw.website.filter(|w| !w.trim().is_empty()),
        hard_dependencies,
        soft_dependencies,
        load_before: dedup(raw.load_before),
    })
}

/// Read and parse `<dir>/plugin.toml`.
pub fn from_dir(dir: &Path) -> Result<PluginDescriptor, DescriptorError> {
    let path = dir.join(MANIFEST_FILE);
    if !path.is_file() {
        return Err(DescriptorError::ManifestNotFound {
            dir: dir.to_path_buf(),
        });
    }
    from_file(&path)
}

/// Read and parse a manifest file.
pub fn from_file(path: &Path) -> Result<PluginDescriptor, DescriptorError> {
    let bytes = std::fs::read(path)?;
    parse(&bytes)
}

/// Render a descriptor in manifest form.
pub fn to_toml(descriptor: &PluginDescriptor) -> Result<String, DescriptorError> {
    let out = ManifestOut {
        name: &descriptor.name,
        version: &descriptor.version,
        main: &descriptor.entry_point,
        description: descriptor.description.as_deref(),
        authors: &descriptor.authors,
        website: descriptor.website.as_deref(),
        dependencies: &descriptor.hard_dependencies,
        soft_dependencies: &descriptor.soft_dependencies,
        load_before: &descriptor.load_before,
    };
    toml::to_string_pretty(&out).map_err(|e| DescriptorError::Syntax(e.to_string()))
}

fn required(value: Option<String>, field: &'static str) -> Result<String, DescriptorError> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or(DescriptorError::MissingField { field })
}

// `version = 1.5` is common in hand-written manifests.
fn scalar_string(value: &toml::Value) -> Option<String> {
    match value {
        toml::Value::String(s) => Some(s.clone()),
        toml::Value::Integer(i) => Some(i.to_string()),
        toml::Value::Float(f) => Some(f.to_string()),
        _ => None,
    }
}

// The name doubles as the plugin's data directory, so `.`, `..` and friends
// are out.
fn is_valid_name(name: &str) -> bool {
    name.chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        && !name.chars().all(|c| c == '.')
        && !name.contains("..")
}

fn dedup(items: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    items
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty() && seen.insert(s.clone()))
        .collect()
}
