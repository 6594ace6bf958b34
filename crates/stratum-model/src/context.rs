use std::collections::BTreeSet;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Reserved context key naming the server a node applies on.
pub const SERVER_KEY: &str = "server";
/// Reserved context key naming the world a node applies on.
pub const WORLD_KEY: &str = "world";

/// An immutable multimap of context tag -> values.
///
/// Keys are lowercased on entry; a key may carry several values. Ordering is
/// deterministic (sorted), which keeps serialized forms stable.
#[derive(
    Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema,
)]
#[serde(transparent)]
pub struct ContextSet {
    entries: BTreeSet<(String, String)>,
}

impl ContextSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn singleton(key: &str, value: &str) -> Self {
        Self::new().with(key, value)
    }

    /// Return a copy with one more tag. Empty keys or values are dropped.
    pub fn with(mut self, key: &str, value: &str) -> Self {
        let key = key.trim().to_ascii_lowercase();
        let value = value.trim().to_string();
        if !key.is_empty() && !value.is_empty() {
            self.entries.insert((key, value));
        }
        self
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn contains(&self, key: &str, value: &str) -> bool {
        let key = key.to_ascii_lowercase();
        self.entries.iter().any(|(k, v)| *k == key && v == value)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        let key = key.to_ascii_lowercase();
        self.entries.iter().any(|(k, _)| *k == key)
    }

    /// First value recorded for `key`, in sorted order.
    pub fn first_value(&self, key: &str) -> Option<&str> {
        let key = key.to_ascii_lowercase();
        self.entries
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.as_str())
    }

    /// True when every tag in `self` is present in `other`.
    pub fn is_satisfied_by(&self, other: &ContextSet) -> bool {
        self.entries.iter().all(|(k, v)| other.contains(k, v))
    }

    /// Copy of this set with every entry under the given keys removed.
    pub fn without_keys(&self, keys: &[&str]) -> ContextSet {
        let keys: Vec<String> = keys.iter().map(|k| k.to_ascii_lowercase()).collect();
        ContextSet {
            entries: self
                .entries
                .iter()
                .filter(|(k, _)| !keys.contains(k))
                .cloned()
                .collect(),
        }
    }
}

impl FromIterator<(String, String)> for ContextSet {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        iter.into_iter()
            .fold(Self::new(), |set, (k, v)| set.with(&k, &v))
    }
}

impl<'a> FromIterator<(&'a str, &'a str)> for ContextSet {
    fn from_iter<I: IntoIterator<Item = (&'a str, &'a str)>>(iter: I) -> Self {
        iter.into_iter()
            .fold(Self::new(), |set, (k, v)| set.with(k, v))
    }
}

/// The caller-supplied settings for one resolution query: the context tags
/// plus the flags steering group traversal and global-node inclusion.
///
/// The reserved `server` and `world` keys are pulled out of the tag set on
/// construction and exposed through dedicated accessors; the remaining tags
/// are matched against each node's own context set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Contexts {
    contexts: ContextSet,
    server: Option<String>,
    world: Option<String>,
    tags: ContextSet,
    apply_groups: bool,
    apply_global_groups: bool,
    apply_global_world_groups: bool,
    include_global: bool,
    include_global_world: bool,
}

impl Contexts {
    /// Flag order: groups, global groups, global-world groups, global nodes,
    /// global-world nodes.
    pub fn new(
        contexts: ContextSet,
        apply_groups: bool,
        apply_global_groups: bool,
        apply_global_world_groups: bool,
        include_global: bool,
        include_global_world: bool,
    ) -> Self {
        let server = contexts.first_value(SERVER_KEY).map(str::to_string);
        let world = contexts.first_value(WORLD_KEY).map(str::to_string);
        let tags = contexts.without_keys(&[SERVER_KEY, WORLD_KEY]);
        Self {
            contexts,
            server,
            world,
            tags,
            apply_groups,
            apply_global_groups,
            apply_global_world_groups,
            include_global,
            include_global_world,
        }
    }

    /// All flags on, no tags; the least restrictive query.
    pub fn allow_all() -> Self {
        Self::of(ContextSet::new())
    }

    /// All flags on with the given tag set.
    pub fn of(contexts: ContextSet) -> Self {
        Self::new(contexts, true, true, true, true, true)
    }

    pub fn contexts(&self) -> &ContextSet {
        &self.contexts
    }

    pub fn server(&self) -> Option<&str> {
        self.server.as_deref()
    }

    pub fn world(&self) -> Option<&str> {
        self.world.as_deref()
    }

    /// The context tags minus the reserved server/world keys.
    pub fn tags(&self) -> &ContextSet {
        &self.tags
    }

    pub fn apply_groups(&self) -> bool {
        self.apply_groups
    }

    pub fn apply_global_groups(&self) -> bool {
        self.apply_global_groups
    }

    pub fn apply_global_world_groups(&self) -> bool {
        self.apply_global_world_groups
    }

    pub fn include_global(&self) -> bool {
        self.include_global
    }

    pub fn include_global_world(&self) -> bool {
        self.include_global_world
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_lowercased_and_trimmed() {
        let set = ContextSet::new().with(" Realm ", " eu ");
        assert!(set.contains("realm", "eu"));
        assert!(set.contains("REALM", "eu"));
        assert!(!set.contains("realm", "EU"));
        assert_eq!(set.first_value("realm"), Some("eu"));
    }

    #[test]
    fn empty_entries_are_dropped() {
        let set = ContextSet::new().with("", "x").with("k", "  ");
        assert!(set.is_empty());
    }

    #[test]
    fn multimap_holds_several_values_per_key() {
        let set = ContextSet::new().with("realm", "eu").with("realm", "us");
        assert_eq!(set.len(), 2);
        assert!(set.contains("realm", "eu"));
        assert!(set.contains("realm", "us"));
    }

    #[test]
    fn satisfaction_is_subset_containment() {
        let need = ContextSet::singleton("realm", "eu");
        let have = ContextSet::new().with("realm", "eu").with("tier", "gold");
        assert!(need.is_satisfied_by(&have));
        assert!(!have.is_satisfied_by(&need));
        assert!(ContextSet::new().is_satisfied_by(&need));
    }

    #[test]
    fn without_keys_strips_reserved_entries() {
        let set = ContextSet::new()
            .with(SERVER_KEY, "s1")
            .with(WORLD_KEY, "w1")
            .with("realm", "eu");
        let stripped = set.without_keys(&[SERVER_KEY, WORLD_KEY]);
        assert_eq!(stripped.len(), 1);
        assert!(stripped.contains("realm", "eu"));
    }

    #[test]
    fn contexts_extracts_server_and_world() {
        let ctx = Contexts::of(
            ContextSet::new()
                .with(SERVER_KEY, "s1")
                .with(WORLD_KEY, "w1")
                .with("realm", "eu"),
        );
        assert_eq!(ctx.server(), Some("s1"));
        assert_eq!(ctx.world(), Some("w1"));
        assert_eq!(ctx.tags().len(), 1);
        assert!(ctx.tags().contains("realm", "eu"));
        assert_eq!(ctx.contexts().len(), 3);
    }

    #[test]
    fn allow_all_has_no_scope() {
        let ctx = Contexts::allow_all();
        assert_eq!(ctx.server(), None);
        assert_eq!(ctx.world(), None);
        assert!(ctx.apply_groups() && ctx.include_global());
    }

    #[test]
    fn context_set_serializes_as_pairs() {
        let set = ContextSet::new().with("realm", "eu");
        let json = serde_json::to_string(&set).unwrap();
        assert_eq!(json, r#"[["realm","eu"]]"#);
        let back: ContextSet = serde_json::from_str(&json).unwrap();
        assert_eq!(back, set);
    }
}
