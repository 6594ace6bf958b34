use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::{Arc, Mutex, RwLock};

use uuid::Uuid;

use stratum_events::{EventSink, HolderEvent};
use stratum_model::{priority_order, LocalizedNode, Node, Tristate};

use crate::clock::{Clock, SystemClock};
use crate::config::Options;
use crate::registry::GroupRegistry;
use crate::snapshot::SnapshotCache;

/// Matching sentinels for the clear-by-scope operations; stored nodes keep
/// the absent-optional representation.
const GLOBAL_SERVER: &str = "global";
const NULL_WORLD: &str = "null";

/// Failure modes of the mutation API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DataError {
    /// An equivalent node (modulo the exact expiry instant) is already held.
    #[error("an equivalent node is already held")]
    AlreadyHeld,
    /// No equivalent node is held.
    #[error("no equivalent node is held")]
    NotHeld,
}

/// What kind of principal a holder is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HolderKind {
    User { id: Uuid },
    Group,
}

/// Collaborators injected into every holder; cheap to clone and share.
#[derive(Clone)]
pub struct Services {
    pub sink: Arc<dyn EventSink>,
    pub registry: Arc<dyn GroupRegistry>,
    pub clock: Arc<dyn Clock>,
    pub options: Options,
}

impl Services {
    pub fn new(sink: Arc<dyn EventSink>, registry: Arc<dyn GroupRegistry>) -> Self {
        Self {
            sink,
            registry,
            clock: Arc::new(SystemClock),
            options: Options::default(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_options(mut self, options: Options) -> Self {
        self.options = options;
        self
    }
}

impl fmt::Debug for Services {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Services")
            .field("options", &self.options)
            .finish()
    }
}

/// A user or group owning permission nodes.
///
/// Two raw node sets (enduring and transient) sit behind independent locks;
/// every read surface goes through immutable memoized snapshots, so checks
/// from many threads never block each other or the writers for long. The
/// identity used during inheritance walks is `object_name`: a user's UUID or
/// a group's lowercased name.
pub struct PermissionHolder {
    object_name: String,
    kind: HolderKind,
    enduring: RwLock<HashSet<Node>>,
    transient: RwLock<HashSet<Node>>,
    enduring_cache: SnapshotCache<HashSet<Node>>,
    transient_cache: SnapshotCache<HashSet<Node>>,
    merged_cache: SnapshotCache<Vec<LocalizedNode>>,
    resolution_cache: SnapshotCache<Vec<LocalizedNode>>,
    io_lock: Mutex<()>,
    services: Services,
}

impl fmt::Debug for PermissionHolder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PermissionHolder")
            .field("object_name", &self.object_name)
            .field("kind", &self.kind)
            .finish()
    }
}

impl PermissionHolder {
    pub fn user(id: Uuid, services: Services) -> Self {
        Self::with_name(id.to_string(), HolderKind::User { id }, services)
    }

    pub fn group(name: &str, services: Services) -> Self {
        Self::with_name(name.to_ascii_lowercase(), HolderKind::Group, services)
    }

    fn with_name(object_name: String, kind: HolderKind, services: Services) -> Self {
        Self {
            object_name,
            kind,
            enduring: RwLock::new(HashSet::new()),
            transient: RwLock::new(HashSet::new()),
            enduring_cache: SnapshotCache::new(),
            transient_cache: SnapshotCache::new(),
            merged_cache: SnapshotCache::new(),
            resolution_cache: SnapshotCache::new(),
            io_lock: Mutex::new(()),
            services,
        }
    }

    pub fn object_name(&self) -> &str {
        &self.object_name
    }

    pub fn kind(&self) -> HolderKind {
        self.kind
    }

    pub fn is_group(&self) -> bool {
        matches!(self.kind, HolderKind::Group)
    }

    /// Mutual-exclusion handle for external persistence code to serialize
    /// save/load against administrative operations. The engine never takes
    /// this lock itself.
    pub fn io_lock(&self) -> &Mutex<()> {
        &self.io_lock
    }

    pub(crate) fn services(&self) -> &Services {
        &self.services
    }

    // ---- snapshots -------------------------------------------------------

    /// Immutable snapshot of the enduring set.
    pub fn nodes(&self) -> Arc<HashSet<Node>> {
        self.enduring_cache
            .get_or_compute(|| self.enduring.read().unwrap().clone())
    }

    /// Immutable snapshot of the transient set.
    pub fn transient_nodes(&self) -> Arc<HashSet<Node>> {
        self.transient_cache
            .get_or_compute(|| self.transient.read().unwrap().clone())
    }

    /// Enduring and transient nodes combined, localized to this holder,
    /// ordered by priority with lower-priority duplicates removed. With
    /// `merge_temp` the duplicate key ignores value and temporariness, which
    /// collapses a temporary override onto its base assertion; without it
    /// only same-assertion duplicates collapse.
    pub fn permissions(&self, merge_temp: bool) -> Arc<Vec<LocalizedNode>> {
        let cache = if merge_temp {
            &self.merged_cache
        } else {
            &self.resolution_cache
        };
        let snapshot = cache.get_or_compute(|| self.compute_permissions(merge_temp));
        // Expiry is checked on access: a snapshot that aged past one of its
        // nodes' expiry is rebuilt before being served.
        let now = self.services.clock.now_unix();
        if snapshot.iter().any(|ln| ln.node().has_expired(now)) {
            cache.invalidate();
            return cache.get_or_compute(|| self.compute_permissions(merge_temp));
        }
        snapshot
    }

    fn compute_permissions(&self, merge_temp: bool) -> Vec<LocalizedNode> {
        let now = self.services.clock.now_unix();
        let mut all: Vec<LocalizedNode> = Vec::new();
        for node in self.nodes().iter() {
            if !node.has_expired(now) {
                all.push(LocalizedNode::new(node.clone(), self.object_name.clone()));
            }
        }
        for node in self.transient_nodes().iter() {
            if !node.has_expired(now) {
                all.push(LocalizedNode::new(node.clone(), self.object_name.clone()));
            }
        }
        // Priority order, with a deterministic tiebreak among equal-priority
        // nodes so the dedup winner does not depend on hash order.
        all.sort_by(|a, b| {
            priority_order(a.node(), b.node())
                .then_with(|| a.node().to_serialized().cmp(&b.node().to_serialized()))
                .then_with(|| b.node().value().cmp(&a.node().value()))
        });
        let mut out: Vec<LocalizedNode> = Vec::with_capacity(all.len());
        for candidate in all {
            let duplicate = out.iter().any(|kept| {
                if merge_temp {
                    kept.node().equals_ignoring_value_or_temp(candidate.node())
                } else {
                    kept.node().almost_equals(candidate.node())
                }
            });
            if !duplicate {
                out.push(candidate);
            }
        }
        out
    }

    // ---- lookups ---------------------------------------------------------

    /// Verdict recorded for an exact assertion in the chosen raw set:
    /// the value of the first node almost-equal to the probe, else
    /// `Undefined`.
    pub fn has_permission(&self, probe: &Node, transient: bool) -> Tristate {
        let set = self.set_handle(transient).read().unwrap();
        set.iter()
            .find(|n| n.almost_equals(probe))
            .map(|n| n.tristate())
            .unwrap_or(Tristate::Undefined)
    }

    /// Boolean convenience over [`Self::has_permission`]: whether the
    /// enduring verdict for `(permission, value, server?, world?)` collapses
    /// to `value`. An absent assertion collapses to `false`, so asking for
    /// `value = false` on an unknown permission answers `true`.
    pub fn held(
        &self,
        permission: &str,
        value: bool,
        server: Option<&str>,
        world: Option<&str>,
    ) -> bool {
        let probe = Node::builder(permission, value)
            .server_opt(server)
            .world_opt(world)
            .build();
        self.has_permission(&probe, false).as_bool() == value
    }

    // ---- mutations -------------------------------------------------------

    pub fn set_permission(&self, node: Node) -> Result<(), DataError> {
        self.set_in(node, false)
    }

    pub fn set_transient_permission(&self, node: Node) -> Result<(), DataError> {
        self.set_in(node, true)
    }

    fn set_in(&self, node: Node, transient: bool) -> Result<(), DataError> {
        {
            let mut set = self.set_handle(transient).write().unwrap();
            if set.iter().any(|n| n.almost_equals(&node)) {
                return Err(DataError::AlreadyHeld);
            }
            set.insert(node.clone());
        }
        self.invalidate_set(transient);
        tracing::debug!(holder = %self.object_name, permission = %node.permission(), transient, "node set");
        self.emit(HolderEvent::NodeSet {
            holder: self.object_name.clone(),
            node,
        });
        Ok(())
    }

    pub fn unset_permission(&self, node: &Node) -> Result<(), DataError> {
        self.unset_in(node, false)
    }

    pub fn unset_transient_permission(&self, node: &Node) -> Result<(), DataError> {
        self.unset_in(node, true)
    }

    fn unset_in(&self, node: &Node, transient: bool) -> Result<(), DataError> {
        let removed_any = {
            let mut set = self.set_handle(transient).write().unwrap();
            let before = set.len();
            set.retain(|n| !n.almost_equals(node));
            set.len() != before
        };
        if !removed_any {
            return Err(DataError::NotHeld);
        }
        self.invalidate_set(transient);
        tracing::debug!(holder = %self.object_name, permission = %node.permission(), transient, "node unset");
        let event = match node.group_name() {
            Some(group) => HolderEvent::GroupRemove {
                holder: self.object_name.clone(),
                group,
                server: node.server().map(str::to_string),
                world: node.world().map(str::to_string),
                temporary: node.is_temporary(),
            },
            None => HolderEvent::NodeUnset {
                holder: self.object_name.clone(),
                node: node.clone(),
            },
        };
        self.emit(event);
        Ok(())
    }

    /// Replace the enduring set wholesale. Equal replacement is a no-op: no
    /// invalidation, no events.
    pub fn set_nodes(&self, nodes: HashSet<Node>) {
        self.replace_in(nodes, false);
    }

    /// Replace the transient set wholesale; same no-op rule.
    pub fn set_transient_nodes(&self, nodes: HashSet<Node>) {
        self.replace_in(nodes, true);
    }

    fn replace_in(&self, nodes: HashSet<Node>, transient: bool) {
        {
            let mut set = self.set_handle(transient).write().unwrap();
            if *set == nodes {
                return;
            }
            *set = nodes;
        }
        self.invalidate_set(transient);
    }

    /// Add to the enduring set without the almost-equal precondition; loader
    /// path, so no event is published.
    pub fn add_node_unchecked(&self, node: Node) {
        {
            self.enduring.write().unwrap().insert(node);
        }
        self.invalidate_enduring();
    }

    // ---- bulk clears -----------------------------------------------------

    /// Remove every enduring node. Returns whether anything was removed, as
    /// do all the clears below.
    pub fn clear_nodes(&self) -> bool {
        self.clear_matching(|_| true)
    }

    /// Remove enduring nodes on the given server; `None` means the nodes
    /// without a server.
    pub fn clear_nodes_on(&self, server: Option<&str>) -> bool {
        self.clear_matching(|n| scope_matches(n, server, None, false))
    }

    /// Remove enduring nodes on the given server and world; `None` world
    /// means the nodes without a world.
    pub fn clear_nodes_on_world(&self, server: Option<&str>, world: Option<&str>) -> bool {
        self.clear_matching(|n| scope_matches(n, server, world, true))
    }

    /// Remove every parent-group node.
    pub fn clear_parents(&self) -> bool {
        self.clear_matching(Node::is_group_node)
    }

    pub fn clear_parents_on(&self, server: Option<&str>) -> bool {
        self.clear_matching(|n| n.is_group_node() && scope_matches(n, server, None, false))
    }

    pub fn clear_parents_on_world(&self, server: Option<&str>, world: Option<&str>) -> bool {
        self.clear_matching(|n| n.is_group_node() && scope_matches(n, server, world, true))
    }

    /// Remove every meta, prefix and suffix node.
    pub fn clear_meta(&self) -> bool {
        self.clear_matching(is_meta_like)
    }

    pub fn clear_meta_on(&self, server: Option<&str>) -> bool {
        self.clear_matching(|n| is_meta_like(n) && scope_matches(n, server, None, false))
    }

    pub fn clear_meta_on_world(&self, server: Option<&str>, world: Option<&str>) -> bool {
        self.clear_matching(|n| is_meta_like(n) && scope_matches(n, server, world, true))
    }

    /// Remove meta nodes with the given key and temporariness in the given
    /// scope.
    pub fn clear_meta_keys(
        &self,
        key: &str,
        server: Option<&str>,
        world: Option<&str>,
        temporary: bool,
    ) -> bool {
        self.clear_matching(|n| {
            n.meta_entry()
                .is_some_and(|(k, _)| k.eq_ignore_ascii_case(key))
                && n.is_temporary() == temporary
                && scope_matches(n, server, world, true)
        })
    }

    /// Drop all transient nodes.
    pub fn clear_transient_nodes(&self) -> bool {
        let changed = {
            let mut set = self.transient.write().unwrap();
            let had_any = !set.is_empty();
            set.clear();
            had_any
        };
        if changed {
            self.invalidate_transient();
        }
        changed
    }

    fn clear_matching(&self, predicate: impl Fn(&Node) -> bool) -> bool {
        let changed = {
            let mut set = self.enduring.write().unwrap();
            let before = set.len();
            set.retain(|n| !predicate(n));
            set.len() != before
        };
        if changed {
            self.invalidate_enduring();
        }
        changed
    }

    // ---- expiry audit ----------------------------------------------------

    /// Sweep both sets for expired nodes, publishing one `NodeExpire` per
    /// removal. Returns whether anything was removed.
    pub fn audit_temporary_permissions(&self) -> bool {
        let now = self.services.clock.now_unix();
        let mut removed: Vec<Node> = Vec::new();

        let enduring_changed = {
            let mut set = self.enduring.write().unwrap();
            let before = set.len();
            set.retain(|n| {
                if n.has_expired(now) {
                    removed.push(n.clone());
                    false
                } else {
                    true
                }
            });
            set.len() != before
        };
        let transient_changed = {
            let mut set = self.transient.write().unwrap();
            let before = set.len();
            set.retain(|n| {
                if n.has_expired(now) {
                    removed.push(n.clone());
                    false
                } else {
                    true
                }
            });
            set.len() != before
        };

        if enduring_changed {
            self.invalidate_enduring();
        }
        if transient_changed {
            self.invalidate_transient();
        }
        if !removed.is_empty() {
            tracing::debug!(holder = %self.object_name, count = removed.len(), "expired nodes removed");
        }
        for node in removed {
            self.emit(HolderEvent::NodeExpire {
                holder: self.object_name.clone(),
                node,
            });
        }
        enduring_changed || transient_changed
    }

    // ---- group inheritance edges ----------------------------------------

    /// Whether this holder inherits the named group in the given scope. A
    /// group trivially inherits itself.
    pub fn inherits_group(&self, group: &str, server: Option<&str>, world: Option<&str>) -> bool {
        let name = group.to_ascii_lowercase();
        (self.is_group() && self.object_name == name)
            || self.held(&format!("group.{name}"), true, server, world)
    }

    /// Record inheritance of the named group, optionally scoped and
    /// temporary. Publishes `GroupAdd` (not `NodeSet`).
    pub fn set_inherit_group(
        &self,
        group: &str,
        server: Option<&str>,
        world: Option<&str>,
        expiry: Option<u64>,
    ) -> Result<(), DataError> {
        let name = group.to_ascii_lowercase();
        if self.is_group() && self.object_name == name {
            return Err(DataError::AlreadyHeld);
        }
        let node = Node::builder(format!("group.{name}"), true)
            .server_opt(server)
            .world_opt(world)
            .expiry_opt(expiry)
            .build();
        {
            let mut set = self.enduring.write().unwrap();
            if set.iter().any(|n| n.almost_equals(&node)) {
                return Err(DataError::AlreadyHeld);
            }
            set.insert(node);
        }
        self.invalidate_enduring();
        tracing::debug!(holder = %self.object_name, group = %name, "group added");
        self.emit(HolderEvent::GroupAdd {
            holder: self.object_name.clone(),
            group: name,
            server: server.map(str::to_string),
            world: world.map(str::to_string),
            expiry,
        });
        Ok(())
    }

    /// Remove inheritance of the named group. Publishes `GroupRemove`.
    pub fn unset_inherit_group(
        &self,
        group: &str,
        server: Option<&str>,
        world: Option<&str>,
        temporary: bool,
    ) -> Result<(), DataError> {
        let name = group.to_ascii_lowercase();
        let mut probe = Node::builder(format!("group.{name}"), true)
            .server_opt(server)
            .world_opt(world);
        if temporary {
            // Any expiry instant matches; almost-equals only compares the
            // is-temporary flag.
            probe = probe.expiry(u64::MAX);
        }
        let probe = probe.build();
        let removed_any = {
            let mut set = self.enduring.write().unwrap();
            let before = set.len();
            set.retain(|n| !n.almost_equals(&probe));
            set.len() != before
        };
        if !removed_any {
            return Err(DataError::NotHeld);
        }
        self.invalidate_enduring();
        tracing::debug!(holder = %self.object_name, group = %name, "group removed");
        self.emit(HolderEvent::GroupRemove {
            holder: self.object_name.clone(),
            group: name,
            server: server.map(str::to_string),
            world: world.map(str::to_string),
            temporary,
        });
        Ok(())
    }

    // ---- legacy map form -------------------------------------------------

    /// Enduring set in the legacy `serialized key -> value` map form.
    pub fn export_legacy(&self) -> BTreeMap<String, bool> {
        self.nodes()
            .iter()
            .map(|n| (n.to_serialized(), n.value()))
            .collect()
    }

    /// Replace the enduring set from a legacy export.
    pub fn import_legacy(&self, entries: &BTreeMap<String, bool>) {
        let nodes = entries
            .iter()
            .map(|(key, value)| Node::from_serialized(key, *value))
            .collect();
        self.set_nodes(nodes);
    }

    // ---- internals -------------------------------------------------------

    fn set_handle(&self, transient: bool) -> &RwLock<HashSet<Node>> {
        if transient {
            &self.transient
        } else {
            &self.enduring
        }
    }

    fn invalidate_set(&self, transient: bool) {
        if transient {
            self.invalidate_transient();
        } else {
            self.invalidate_enduring();
        }
    }

    fn invalidate_enduring(&self) {
        self.enduring_cache.invalidate();
        self.invalidate_merged();
    }

    fn invalidate_transient(&self) {
        self.transient_cache.invalidate();
        self.invalidate_merged();
    }

    fn invalidate_merged(&self) {
        self.merged_cache.invalidate();
        self.resolution_cache.invalidate();
    }

    fn emit(&self, event: HolderEvent) {
        self.services.sink.accept(event);
    }
}

fn is_meta_like(node: &Node) -> bool {
    node.is_meta() || node.is_prefix() || node.is_suffix()
}

/// Scope match for the clears: an absent server stands in as `"global"`, an
/// absent world as `"null"`, and comparison is case-insensitive.
fn scope_matches(node: &Node, server: Option<&str>, world: Option<&str>, match_world: bool) -> bool {
    let wanted_server = server.unwrap_or(GLOBAL_SERVER);
    if !node
        .server()
        .unwrap_or(GLOBAL_SERVER)
        .eq_ignore_ascii_case(wanted_server)
    {
        return false;
    }
    if match_world {
        let wanted_world = world.unwrap_or(NULL_WORLD);
        if !node
            .world()
            .unwrap_or(NULL_WORLD)
            .eq_ignore_ascii_case(wanted_world)
        {
            return false;
        }
    }
    true
}
