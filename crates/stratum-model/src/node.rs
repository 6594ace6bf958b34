use regex::Regex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::context::{ContextSet, SERVER_KEY, WORLD_KEY};
use crate::Tristate;

const GROUP_PREFIX: &str = "group.";
const META_PREFIX: &str = "meta.";
const PREFIX_PREFIX: &str = "prefix.";
const SUFFIX_PREFIX: &str = "suffix.";

/// Sentinel written for an absent server when a world has to be encoded in
/// the serialized key form.
const SERIALIZED_GLOBAL: &str = "global";

/// A single permission assertion: a dot-separated permission string, a grant
/// or deny value, and the scope it applies in (server, world, extra context
/// tags, optional expiry).
///
/// Nodes are immutable values; mutation happens by building a new node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub struct Node {
    permission: String,
    value: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    server: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    world: Option<String>,
    #[serde(default, skip_serializing_if = "ContextSet::is_empty")]
    context: ContextSet,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    expiry: Option<u64>,
}

impl Node {
    /// A plain node with no scope and no expiry.
    pub fn new(permission: impl Into<String>, value: bool) -> Node {
        Node::builder(permission, value).build()
    }

    pub fn builder(permission: impl Into<String>, value: bool) -> NodeBuilder {
        NodeBuilder {
            permission: permission.into(),
            value,
            server: None,
            world: None,
            context: ContextSet::new(),
            expiry: None,
        }
    }

    pub fn permission(&self) -> &str {
        &self.permission
    }

    pub fn value(&self) -> bool {
        self.value
    }

    pub fn tristate(&self) -> Tristate {
        Tristate::from_bool(self.value)
    }

    pub fn server(&self) -> Option<&str> {
        self.server.as_deref()
    }

    pub fn world(&self) -> Option<&str> {
        self.world.as_deref()
    }

    pub fn context(&self) -> &ContextSet {
        &self.context
    }

    /// Absolute expiry in seconds since the epoch; `None` means permanent.
    pub fn expiry(&self) -> Option<u64> {
        self.expiry
    }

    pub fn is_temporary(&self) -> bool {
        self.expiry.is_some()
    }

    /// A grant valid until `t` is dead at `t`.
    pub fn has_expired(&self, now_unix: u64) -> bool {
        self.expiry.map_or(false, |e| e <= now_unix)
    }

    // ---- classifications -------------------------------------------------

    /// Group membership node: `group.<name>`. Returns the referenced group
    /// name, lowercased.
    pub fn group_name(&self) -> Option<String> {
        let lower = self.permission.to_ascii_lowercase();
        lower
            .strip_prefix(GROUP_PREFIX)
            .filter(|name| !name.is_empty())
            .map(str::to_string)
    }

    pub fn is_group_node(&self) -> bool {
        self.group_name().is_some()
    }

    /// Meta node: `meta.<key>.<value>`. Returns the key/value pair.
    pub fn meta_entry(&self) -> Option<(String, String)> {
        let lower = self.permission.to_ascii_lowercase();
        let rest = lower.strip_prefix(META_PREFIX)?;
        let (key, value) = rest.split_once('.')?;
        if key.is_empty() || value.is_empty() {
            return None;
        }
        Some((key.to_string(), value.to_string()))
    }

    pub fn is_meta(&self) -> bool {
        self.meta_entry().is_some()
    }

    pub fn is_prefix(&self) -> bool {
        has_weighted_payload(&self.permission, PREFIX_PREFIX)
    }

    pub fn is_suffix(&self) -> bool {
        has_weighted_payload(&self.permission, SUFFIX_PREFIX)
    }

    /// Number of `*` segments in the permission string.
    pub fn wildcard_depth(&self) -> usize {
        self.permission.split('.').filter(|s| *s == "*").count()
    }

    // ---- comparison relations --------------------------------------------

    /// Same assertion modulo the exact expiry instant: permission, value,
    /// server, world, context and the is-temporary flag all agree.
    pub fn almost_equals(&self, other: &Node) -> bool {
        self.value == other.value
            && self.is_temporary() == other.is_temporary()
            && self.equals_ignoring_value_or_temp(other)
    }

    /// Same permission and scope, regardless of value or temporariness. Used
    /// to collapse contradicting-value duplicates during merging.
    pub fn equals_ignoring_value_or_temp(&self, other: &Node) -> bool {
        self.permission.eq_ignore_ascii_case(&other.permission)
            && opt_eq_ignore_case(self.server.as_deref(), other.server.as_deref())
            && opt_eq_ignore_case(self.world.as_deref(), other.world.as_deref())
            && self.context == other.context
    }

    // ---- applicability ---------------------------------------------------

    /// Whether this node applies on the given server. A node without a server
    /// is global and applies iff `include_global`; a server-specific node
    /// never applies when no server is given.
    pub fn should_apply_on_server(
        &self,
        server: Option<&str>,
        include_global: bool,
        regex: bool,
    ) -> bool {
        match (self.server.as_deref(), server) {
            (None, _) => include_global,
            (Some(_), None) => false,
            (Some(own), Some(given)) => scope_value_matches(own, given, regex),
        }
    }

    pub fn should_apply_on_world(
        &self,
        world: Option<&str>,
        include_global: bool,
        regex: bool,
    ) -> bool {
        match (self.world.as_deref(), world) {
            (None, _) => include_global,
            (Some(_), None) => false,
            (Some(own), Some(given)) => scope_value_matches(own, given, regex),
        }
    }

    /// Whether every tag this node requires is present in the supplied set.
    /// A node with no tags passes unless `strict`.
    pub fn should_apply_with_context(&self, given: &ContextSet, strict: bool) -> bool {
        if self.context.is_empty() {
            return !strict;
        }
        self.context.is_satisfied_by(given)
    }

    // ---- shorthand -------------------------------------------------------

    /// Expand `(a|b)` alternation segments into the implied permission
    /// strings, e.g. `build.(create|destroy)` -> `build.create`,
    /// `build.destroy`. Returns an empty list when the permission carries no
    /// alternation.
    pub fn resolve_shorthand(&self) -> Vec<String> {
        if !(self.permission.contains('(')
            && self.permission.contains('|')
            && self.permission.contains(')'))
        {
            return Vec::new();
        }
        let mut variants: Vec<String> = vec![String::new()];
        for segment in self.permission.split('.') {
            let options: Vec<&str> = alternation(segment).unwrap_or_else(|| vec![segment]);
            let mut next = Vec::with_capacity(variants.len() * options.len());
            for stem in &variants {
                for option in &options {
                    let mut grown = stem.clone();
                    if !grown.is_empty() {
                        grown.push('.');
                    }
                    grown.push_str(option);
                    next.push(grown);
                }
            }
            variants = next;
        }
        if variants.len() <= 1 {
            return Vec::new();
        }
        variants
    }

    // ---- serialized ("legacy") key form ----------------------------------

    /// Encode the node as a legacy map key:
    /// `[server[-world]/][(k=v,k2=v2)]permission[$expiry]`. An absent server
    /// is written as `global` when a world has to be carried.
    pub fn to_serialized(&self) -> String {
        let mut out = String::new();
        match (self.server.as_deref(), self.world.as_deref()) {
            (Some(s), Some(w)) => {
                out.push_str(s);
                out.push('-');
                out.push_str(w);
                out.push('/');
            }
            (Some(s), None) => {
                out.push_str(s);
                out.push('/');
            }
            (None, Some(w)) => {
                out.push_str(SERIALIZED_GLOBAL);
                out.push('-');
                out.push_str(w);
                out.push('/');
            }
            (None, None) => {}
        }
        if !self.context.is_empty() {
            out.push('(');
            let tags: Vec<String> = self
                .context
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect();
            out.push_str(&tags.join(","));
            out.push(')');
        }
        out.push_str(&self.permission);
        if let Some(expiry) = self.expiry {
            out.push('$');
            out.push_str(&expiry.to_string());
        }
        out
    }

    /// Parse a legacy map key produced by [`Node::to_serialized`].
    ///
    /// Panics if the key carries no permission component.
    pub fn from_serialized(key: &str, value: bool) -> Node {
        let mut rest = key;
        let mut expiry = None;
        if let Some((head, tail)) = rest.rsplit_once('$') {
            if let Ok(parsed) = tail.parse::<u64>() {
                expiry = Some(parsed);
                rest = head;
            }
        }

        let mut server = None;
        let mut world = None;
        if let Some((scope, tail)) = rest.split_once('/') {
            let (s, w) = match scope.split_once('-') {
                Some((s, w)) => (s, Some(w)),
                None => (scope, None),
            };
            if !s.eq_ignore_ascii_case(SERIALIZED_GLOBAL) {
                server = Some(s.to_string());
            }
            world = w.filter(|w| !w.is_empty()).map(str::to_string);
            rest = tail;
        }

        let mut context = ContextSet::new();
        if let Some(body) = rest.strip_prefix('(') {
            if let Some(end) = body.find(')') {
                for tag in body[..end].split(',') {
                    if let Some((k, v)) = tag.split_once('=') {
                        context = context.with(k, v);
                    }
                }
                rest = &body[end + 1..];
            }
        }

        let mut builder = Node::builder(rest, value).context(context);
        if let Some(s) = server {
            builder = builder.server(s);
        }
        if let Some(w) = world {
            builder = builder.world(w);
        }
        if let Some(e) = expiry {
            builder = builder.expiry(e);
        }
        builder.build()
    }
}

/// `prefix.<weight>.<text>` / `suffix.<weight>.<text>` shape check.
fn has_weighted_payload(permission: &str, prefix: &str) -> bool {
    let lower = permission.to_ascii_lowercase();
    match lower.strip_prefix(prefix) {
        Some(rest) => matches!(rest.split_once('.'), Some((w, t)) if !w.is_empty() && !t.is_empty()),
        None => false,
    }
}

fn opt_eq_ignore_case(a: Option<&str>, b: Option<&str>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => a.eq_ignore_ascii_case(b),
        _ => false,
    }
}

/// Server/world value match. With regex enabled, an `r=` prefix marks the
/// rest of the value as an anchored pattern; an invalid pattern matches
/// nothing. Otherwise matching is a case-insensitive string compare.
fn scope_value_matches(own: &str, given: &str, regex: bool) -> bool {
    if regex {
        if let Some(pattern) = own.strip_prefix("r=") {
            return Regex::new(&format!("^(?:{pattern})$"))
                .map(|re| re.is_match(given))
                .unwrap_or(false);
        }
    }
    own.eq_ignore_ascii_case(given)
}

fn alternation(segment: &str) -> Option<Vec<&str>> {
    let body = segment.strip_prefix('(')?.strip_suffix(')')?;
    if !body.contains('|') {
        return None;
    }
    let options: Vec<&str> = body.split('|').filter(|o| !o.is_empty()).collect();
    if options.is_empty() {
        return None;
    }
    Some(options)
}

/// Builder for [`Node`]. The reserved `server`/`world` context keys are
/// stripped from the tag set; scope goes through the dedicated setters.
#[derive(Debug, Clone)]
pub struct NodeBuilder {
    permission: String,
    value: bool,
    server: Option<String>,
    world: Option<String>,
    context: ContextSet,
    expiry: Option<u64>,
}

impl NodeBuilder {
    pub fn server(mut self, server: impl Into<String>) -> Self {
        self.server = Some(server.into());
        self
    }

    pub fn server_opt(mut self, server: Option<&str>) -> Self {
        self.server = server.map(str::to_string);
        self
    }

    pub fn world(mut self, world: impl Into<String>) -> Self {
        self.world = Some(world.into());
        self
    }

    pub fn world_opt(mut self, world: Option<&str>) -> Self {
        self.world = world.map(str::to_string);
        self
    }

    /// Replace the tag set wholesale.
    pub fn context(mut self, context: ContextSet) -> Self {
        self.context = context;
        self
    }

    pub fn with_context(mut self, key: &str, value: &str) -> Self {
        self.context = self.context.with(key, value);
        self
    }

    pub fn expiry(mut self, unix_secs: u64) -> Self {
        self.expiry = Some(unix_secs);
        self
    }

    pub fn expiry_opt(mut self, unix_secs: Option<u64>) -> Self {
        self.expiry = unix_secs;
        self
    }

    /// Panics if the permission string is empty.
    pub fn build(self) -> Node {
        let permission = self.permission.trim().to_string();
        assert!(!permission.is_empty(), "permission string must not be empty");
        Node {
            permission,
            value: self.value,
            server: self.server.filter(|s| !s.is_empty()),
            world: self.world.filter(|w| !w.is_empty()),
            context: self.context.without_keys(&[SERVER_KEY, WORLD_KEY]),
            expiry: self.expiry,
        }
    }
}

/// A node tagged with the `objectName` of the holder that supplied it during
/// resolution.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub struct LocalizedNode {
    node: Node,
    location: String,
}

impl LocalizedNode {
    pub fn new(node: Node, location: impl Into<String>) -> Self {
        Self {
            node,
            location: location.into(),
        }
    }

    pub fn node(&self) -> &Node {
        &self.node
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    pub fn into_node(self) -> Node {
        self.node
    }
}
