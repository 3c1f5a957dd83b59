//! Dependency graph resolution
//!
//! The graph is never stored: every call to [`resolve`] walks the current
//! [`DescriptorSet`] and returns a fresh [`Resolution`].
//!
//! Edges point from a plugin to what must load before it:
//! - hard dependencies (an unknown target makes the plugin *missing*)
//! - soft dependencies (unknown targets are ignored)
//! - `load-before` declarations of other plugins (inverse soft edges)

use std::collections::{HashMap, HashSet};

use kiln_plugin_api::PluginDescriptor;

/// Insertion-ordered collection of descriptors keyed by plugin name.
///
/// Iteration order is the order plugins were inserted (discovery order), which
/// is what breaks ties between unrelated plugins during resolution.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DescriptorSet {
    order: Vec<String>,
    by_name: HashMap<String, PluginDescriptor>,
}

impl DescriptorSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a descriptor. Returns it back if the name is already taken.
    pub fn insert(&mut self, descriptor: PluginDescriptor) -> Result<(), PluginDescriptor> {
        if self.by_name.contains_key(&descriptor.name) {
            return Err(descriptor);
        }
        self.order.push(descriptor.name.clone());
        self.by_name.insert(descriptor.name.clone(), descriptor);
        Ok(())
    }

    /// Replace the descriptor of an existing plugin, keeping its position.
    /// Inserts at the end when the name is new.
    pub fn upsert(&mut self, descriptor: PluginDescriptor) {
        if !self.by_name.contains_key(&descriptor.name) {
            self.order.push(descriptor.name.clone());
        }
        self.by_name.insert(descriptor.name.clone(), descriptor);
    }

    pub fn remove(&mut self, name: &str) -> Option<PluginDescriptor> {
        let removed = self.by_name.remove(name)?;
        self.order.retain(|n| n != name);
        Some(removed)
    }

    pub fn get(&self, name: &str) -> Option<&PluginDescriptor> {
        self.by_name.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    /// Plugin names in insertion order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    /// Descriptors in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &PluginDescriptor> {
        self.order.iter().filter_map(|n| self.by_name.get(n))
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Subset holding only `names`, in this set's order.
    pub fn restricted_to(&self, names: &HashSet<String>) -> DescriptorSet {
        let mut subset = DescriptorSet::new();
        for descriptor in self.iter().filter(|d| names.contains(&d.name)) {
            subset.upsert(descriptor.clone());
        }
        subset
    }
}

impl FromIterator<PluginDescriptor> for DescriptorSet {
    /// Later duplicates are dropped.
    fn from_iter<I: IntoIterator<Item = PluginDescriptor>>(iter: I) -> Self {
        let mut set = DescriptorSet::new();
        for descriptor in iter {
            let _ = set.insert(descriptor);
        }
        set
    }
}

/// Result of one resolution pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Resolution {
    /// Load order, dependencies first. Excludes plugins in `missing`.
    pub order: Vec<String>,
    /// Plugins with at least one absent hard dependency.
    pub missing: Vec<String>,
    /// Plugins participating in at least one cycle. Still present in `order`.
    pub circular: Vec<String>,
    absent: HashMap<String, Vec<String>>,
    dependents: HashMap<String, Vec<String>>,
}

impl Resolution {
    pub fn is_missing(&self, name: &str) -> bool {
        self.missing.iter().any(|n| n == name)
    }

    pub fn is_circular(&self, name: &str) -> bool {
        self.circular.iter().any(|n| n == name)
    }

    /// Hard dependencies of `name` that were absent from the set.
    pub fn missing_for(&self, name: &str) -> &[String] {
        self.absent.get(name).map_or(&[], Vec::as_slice)
    }

    /// Plugins with a hard or soft edge to `name`, in resolution order.
    pub fn dependents_of(&self, name: &str) -> &[String] {
        self.dependents.get(name).map_or(&[], Vec::as_slice)
    }

    /// Position of `name` in the load order.
    pub fn position(&self, name: &str) -> Option<usize> {
        self.order.iter().position(|n| n == name)
    }
}

/// Compute load order and diagnostics for every plugin in `set`.
///
/// Depth-first: for each plugin in insertion order, hard dependencies are
/// visited first, then soft dependencies, then plugins declaring
/// `load-before` on it. A plugin is appended once all of its edges have been
/// explored, so dependencies always precede their dependents.
pub fn resolve(set: &DescriptorSet) -> Resolution {
    let mut walker = Walker::new(set, true);
    for name in set.names() {
        walker.visit(name);
    }
    walker.finish()
}

/// Order in which the loaded plugins go through their phases.
///
/// Only hard edges between members of `loaded` are followed; soft edges and
/// edges leaving the loaded set are ignored. Plugins outside `set` are dropped.
pub fn enable_order(set: &DescriptorSet, loaded: &HashSet<String>) -> Vec<String> {
    let subset = set.restricted_to(loaded);
    let mut walker = Walker::new(&subset, false);
    for name in subset.names() {
        walker.visit(name);
    }
    walker.finish().order
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    InProgress,
    Done,
}

struct Walker<'a> {
    set: &'a DescriptorSet,
    follow_soft: bool,
    /// target -> plugins that declared `load-before = [target]`
    loads_before: HashMap<&'a str, Vec<&'a str>>,
    marks: HashMap<&'a str, Mark>,
    stack: Vec<&'a str>,
    posted: Vec<&'a str>,
    missing: Vec<String>,
    circular: Vec<String>,
    circular_seen: HashSet<&'a str>,
    absent: HashMap<String, Vec<String>>,
    dependents: HashMap<String, Vec<String>>,
}

impl<'a> Walker<'a> {
    fn new(set: &'a DescriptorSet, follow_soft: bool) -> Self {
        let mut loads_before: HashMap<&str, Vec<&str>> = HashMap::new();
        if follow_soft {
            for descriptor in set.iter() {
                for target in descriptor.load_before.iter().filter(|t| set.contains(t)) {
                    loads_before
                        .entry(target.as_str())
                        .or_default()
                        .push(descriptor.name.as_str());
                }
            }
        }
        Self {
            set,
            follow_soft,
            loads_before,
            marks: HashMap::new(),
            stack: Vec::new(),
            posted: Vec::new(),
            missing: Vec::new(),
            circular: Vec::new(),
            circular_seen: HashSet::new(),
            absent: HashMap::new(),
            dependents: HashMap::new(),
        }
    }

    fn visit(&mut self, name: &'a str) {
        if self.marks.contains_key(name) {
            return;
        }
        let set = self.set;
        let Some(descriptor) = set.get(name) else {
            return;
        };
        self.marks.insert(name, Mark::InProgress);
        self.stack.push(name);

        for dep in &descriptor.hard_dependencies {
            if set.contains(dep) {
                self.edge(name, dep);
            } else if self.follow_soft {
                tracing::warn!(plugin = %name, dependency = %dep, "Hard dependency not found");
                self.absent.entry(name.to_string()).or_default().push(dep.clone());
            }
        }

        if self.follow_soft {
            for dep in descriptor.soft_dependencies.iter().filter(|d| set.contains(d)) {
                self.edge(name, dep);
            }
            let before: Vec<&'a str> = self.loads_before.get(name).cloned().unwrap_or_default();
            for other in before {
                self.edge(name, other);
            }
        }

        self.stack.pop();
        self.marks.insert(name, Mark::Done);

        if self.absent.contains_key(name) {
            self.missing.push(name.to_string());
        } else {
            self.posted.push(name);
        }
    }

    /// `from` needs `to` first.
    fn edge(&mut self, from: &'a str, to: &'a str) {
        let dependents = self.dependents.entry(to.to_string()).or_default();
        if !dependents.iter().any(|d| d == from) {
            dependents.push(from.to_string());
        }

        match self.marks.get(to) {
            Some(Mark::Done) => {}
            Some(Mark::InProgress) => self.record_cycle(to),
            None => self.visit(to),
        }
    }

    fn record_cycle(&mut self, revisited: &'a str) {
        let Some(start) = self.stack.iter().position(|n| *n == revisited) else {
            return;
        };
        let members: Vec<&'a str> = self.stack[start..].to_vec();
        tracing::warn!(cycle = ?members, "Circular dependency detected");
        for member in members {
            if self.circular_seen.insert(member) {
                self.circular.push(member.to_string());
            }
        }
    }

    fn finish(self) -> Resolution {
        // Post-order already lists leaves first.
        Resolution {
            order: self.posted.into_iter().map(str::to_string).collect(),
            missing: self.missing,
            circular: self.circular,
            absent: self.absent,
            dependents: self.dependents,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plugin(name: &str, deps: &[&str]) -> PluginDescriptor {
        PluginDescriptor::new(name, format!("{name}::Plugin"), "1.0.0")
            .with_dependencies(deps.iter().copied())
    }

    fn set(descriptors: Vec<PluginDescriptor>) -> DescriptorSet {
        descriptors.into_iter().collect()
    }

    fn assert_before(order: &[String], first: &str, then: &str) {
        let a = order.iter().position(|n| n == first).unwrap();
        let b = order.iter().position(|n| n == then).unwrap();
        assert!(a < b, "{first} should precede {then} in {order:?}");
    }

    #[test]
    fn test_chain_resolves_leaves_first() {
        let set = set(vec![plugin("A", &["B"]), plugin("B", &["C"]), plugin("C", &[])]);
        let resolution = resolve(&set);
        assert_eq!(resolution.order, vec!["C", "B", "A"]);
        assert!(resolution.missing.is_empty());
        assert!(resolution.circular.is_empty());
    }

    #[test]
    fn test_unrelated_plugins_keep_insertion_order() {
        let set = set(vec![plugin("zeta", &[]), plugin("alpha", &[]), plugin("mid", &[])]);
        assert_eq!(resolve(&set).order, vec!["zeta", "alpha", "mid"]);
    }

    #[test]
    fn test_cycle_is_reported_without_duplicates() {
        let set = set(vec![
            plugin("A", &["B"]),
            plugin("B", &["C"]),
            plugin("C", &["A"]),
            plugin("D", &[]),
        ]);
        let resolution = resolve(&set);

        let mut circular = resolution.circular.clone();
        circular.sort();
        assert_eq!(circular, vec!["A", "B", "C"]);

        let unique: HashSet<&String> = resolution.order.iter().collect();
        assert_eq!(unique.len(), resolution.order.len());
        assert!(resolution.order.contains(&"D".to_string()));
    }

    #[test]
    fn test_cycle_excludes_unrelated_ancestors() {
        // X -> A -> B -> A: X is on the stack but not part of the cycle.
        let set = set(vec![plugin("X", &["A"]), plugin("A", &["B"]), plugin("B", &["A"])]);
        let resolution = resolve(&set);
        assert!(resolution.is_circular("A"));
        assert!(resolution.is_circular("B"));
        assert!(!resolution.is_circular("X"));
    }

    #[test]
    fn test_missing_hard_dependency_excludes_plugin() {
        let set = set(vec![plugin("A", &["Z"]), plugin("B", &[])]);
        let resolution = resolve(&set);
        assert_eq!(resolution.missing, vec!["A"]);
        assert_eq!(resolution.order, vec!["B"]);
        assert_eq!(resolution.missing_for("A"), ["Z".to_string()]);
        assert!(resolution.missing_for("B").is_empty());
    }

    #[test]
    fn test_dependent_of_missing_plugin_is_still_ordered() {
        let set = set(vec![plugin("A", &["Z"]), plugin("B", &["A"])]);
        let resolution = resolve(&set);
        assert_eq!(resolution.missing, vec!["A"]);
        assert_eq!(resolution.order, vec!["B"]);
    }

    #[test]
    fn test_soft_dependency_orders_but_never_blocks() {
        let set = set(vec![
            plugin("A", &[]).with_soft_dependencies(["B", "ghost"]),
            plugin("B", &[]),
        ]);
        let resolution = resolve(&set);
        assert_eq!(resolution.order, vec!["B", "A"]);
        assert!(resolution.missing.is_empty());
    }

    #[test]
    fn test_load_before_adds_inverse_edge() {
        let set = set(vec![
            plugin("dashboard", &[]),
            plugin("theme", &[]).with_load_before(["dashboard", "ghost"]),
        ]);
        let resolution = resolve(&set);
        assert_eq!(resolution.order, vec!["theme", "dashboard"]);
    }

    #[test]
    fn test_every_plugin_follows_its_dependencies() {
        let set = set(vec![
            plugin("app", &["db", "log"]).with_soft_dependencies(["cache"]),
            plugin("cache", &["log"]),
            plugin("db", &["log"]),
            plugin("log", &[]),
            plugin("cli", &["app"]),
        ]);
        let resolution = resolve(&set);
        assert_eq!(resolution.order.len(), 5);
        for descriptor in set.iter() {
            for dep in descriptor
                .hard_dependencies
                .iter()
                .chain(&descriptor.soft_dependencies)
            {
                assert_before(&resolution.order, dep, &descriptor.name);
            }
        }
    }

    #[test]
    fn test_dependents_of() {
        let set = set(vec![
            plugin("A", &["C"]),
            plugin("B", &[]).with_soft_dependencies(["C"]),
            plugin("C", &[]),
        ]);
        let resolution = resolve(&set);
        assert_eq!(resolution.dependents_of("C"), ["A".to_string(), "B".to_string()]);
        assert!(resolution.dependents_of("A").is_empty());
    }

    #[test]
    fn test_enable_order_uses_mutual_hard_edges_only() {
        let set = set(vec![
            plugin("A", &["B", "gone"]).with_soft_dependencies(["C"]),
            plugin("B", &[]),
            plugin("C", &[]),
        ]);
        let loaded: HashSet<String> = ["A", "B", "C"].iter().map(|s| s.to_string()).collect();
        assert_eq!(enable_order(&set, &loaded), vec!["B", "A", "C"]);

        let loaded: HashSet<String> = ["A", "C"].iter().map(|s| s.to_string()).collect();
        assert_eq!(enable_order(&set, &loaded), vec!["A", "C"]);
    }

    #[test]
    fn test_duplicate_insert_keeps_first() {
        let mut set = DescriptorSet::new();
        set.insert(plugin("A", &[])).unwrap();
        let rejected = set.insert(plugin("A", &["B"])).unwrap_err();
        assert_eq!(rejected.hard_dependencies, vec!["B"]);
        assert!(set.get("A").unwrap().hard_dependencies.is_empty());
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_upsert_keeps_position() {
        let mut set = set(vec![plugin("A", &[]), plugin("B", &[])]);
        set.upsert(plugin("A", &["B"]));
        assert_eq!(set.names().collect::<Vec<_>>(), vec!["A", "B"]);
        assert!(set.get("A").unwrap().depends_on("B"));
        assert!(set.remove("A").is_some());
        assert_eq!(set.names().collect::<Vec<_>>(), vec!["B"]);
    }

    #[test]
    fn test_resolve_is_deterministic() {
        let set = set(vec![
            plugin("A", &["B"]),
            plugin("B", &["C"]),
            plugin("C", &["A"]),
            plugin("D", &["Z"]),
        ]);
        assert_eq!(resolve(&set), resolve(&set));
    }
}
