//! Plugin metadata structures

use serde::{Deserialize, Serialize};

/// Immutable metadata parsed from a plugin's `plugin.toml`.
///
/// Dependency lists behave as sets: duplicates are removed at parse time but
/// declaration order is kept so that resolution stays deterministic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginDescriptor {
    /// Unique plugin name
    pub name: String,
    /// Reference to the exported plugin type, e.g. `hello_plugin::HelloPlugin`
    pub entry_point: String,
    /// Plugin version
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub authors: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub website: Option<String>,
    /// Plugins that must be enabled before this one enables
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hard_dependencies: Vec<String>,
    /// Plugins loaded first when present; never blocking
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub soft_dependencies: Vec<String>,
    /// Plugins that should load after this one when present
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub load_before: Vec<String>,
}

impl PluginDescriptor {
    pub fn new(
        name: impl Into<String>,
        entry_point: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            entry_point: entry_point.into(),
            version: version.into(),
            description: None,
            authors: Vec::new(),
            website: None,
            hard_dependencies: Vec::new(),
            soft_dependencies: Vec::new(),
            load_before: Vec::new(),
        }
    }

    pub fn with_dependencies<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.hard_dependencies = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_soft_dependencies<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.soft_dependencies = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_load_before<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.load_before = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Whether `other` is a hard dependency of this plugin.
    pub fn depends_on(&self, other: &str) -> bool {
        self.hard_dependencies.iter().any(|d| d == other)
    }

    /// Whether `other` is a hard or soft dependency of this plugin.
    pub fn references(&self, other: &str) -> bool {
        self.depends_on(other) || self.soft_dependencies.iter().any(|d| d == other)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder() {
        let d = PluginDescriptor::new("alpha", "alpha::Alpha", "1.0.0")
            .with_dependencies(["core"])
            .with_soft_dependencies(["extras"])
            .with_description("first");

        assert!(d.depends_on("core"));
        assert!(!d.depends_on("extras"));
        assert!(d.references("extras"));
        assert_eq!(d.description.as_deref(), Some("first"));
    }

    #[test]
    fn test_descriptor_toml_roundtrip() {
        let d = PluginDescriptor::new("alpha", "alpha::Alpha", "1.0.0").with_dependencies(["b"]);
        let text = toml::to_string(&d).unwrap();
        let parsed: PluginDescriptor = toml::from_str(&text).unwrap();
        assert_eq!(parsed, d);
    }
}
