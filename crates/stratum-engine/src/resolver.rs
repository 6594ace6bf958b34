//! Transitive inheritance resolution: walking the group graph cycle-safely,
//! filtering by context, and flattening to an effective permission map.

use std::collections::BTreeMap;

use stratum_model::{priority_order, Contexts, LocalizedNode};

use crate::holder::PermissionHolder;

impl PermissionHolder {
    /// This holder's merged snapshot plus everything inherited transitively
    /// from its parent groups, ordered by priority. A node already present
    /// (almost-equal) is never shadowed by an inherited one, so the closest
    /// holder wins; inherited nodes keep their origin's name as the
    /// localization tag.
    ///
    /// `excluded_groups` names groups that must not be visited; the walk
    /// works on a private copy and never mutates the caller's list. Cycles
    /// are cut by excluding every holder already on the descent chain.
    pub fn all_nodes(
        &self,
        excluded_groups: Option<&[String]>,
        context: &Contexts,
    ) -> Vec<LocalizedNode> {
        let mut excluded: Vec<String> = excluded_groups
            .map(|e| e.iter().map(|g| g.to_ascii_lowercase()).collect())
            .unwrap_or_default();
        self.walk_nodes(&mut excluded, context)
    }

    fn walk_nodes(&self, excluded: &mut Vec<String>, context: &Contexts) -> Vec<LocalizedNode> {
        let mut all: Vec<LocalizedNode> = self.permissions(true).as_ref().clone();
        excluded.push(self.object_name().to_ascii_lowercase());

        let options = self.services().options;
        let parents: Vec<String> = all
            .iter()
            .filter(|ln| {
                let node = ln.node();
                node.value()
                    && node.is_group_node()
                    && node.should_apply_on_server(
                        context.server(),
                        context.apply_global_groups(),
                        options.apply_regex,
                    )
                    && node.should_apply_on_world(
                        context.world(),
                        context.apply_global_world_groups(),
                        options.apply_regex,
                    )
                    && node.should_apply_with_context(context.tags(), false)
            })
            .filter_map(|ln| ln.node().group_name())
            .collect();

        for parent in parents {
            if excluded.contains(&parent) {
                continue;
            }
            let Some(group) = self.services().registry.group(&parent) else {
                continue;
            };
            for inherited in group.walk_nodes(excluded, context) {
                if !all
                    .iter()
                    .any(|have| have.node().almost_equals(inherited.node()))
                {
                    all.push(inherited);
                }
            }
        }

        all.sort_by(|a, b| priority_order(a.node(), b.node()));
        all
    }

    /// Resolved view under `context`: inherited nodes (unless the context
    /// disables group traversal), context-filtered, reduced to the first
    /// node per permission string in priority order.
    pub fn all_nodes_filtered(&self, context: &Contexts) -> Vec<LocalizedNode> {
        let all = if context.apply_groups() {
            self.all_nodes(None, context)
        } else {
            self.permissions(true).as_ref().clone()
        };
        let options = self.services().options;
        let mut out: Vec<LocalizedNode> = Vec::new();
        for ln in all {
            let node = ln.node();
            if !node.should_apply_on_server(
                context.server(),
                context.include_global(),
                options.apply_regex,
            ) {
                continue;
            }
            if !node.should_apply_on_world(
                context.world(),
                context.include_global_world(),
                options.apply_regex,
            ) {
                continue;
            }
            if !node.should_apply_with_context(context.tags(), false) {
                continue;
            }
            if out
                .iter()
                .any(|kept| kept.node().permission() == node.permission())
            {
                continue;
            }
            out.push(ln);
        }
        out
    }

    /// Effective permission map under `context`: one boolean verdict per
    /// permission string, with shorthand alternations expanded when the
    /// resolver options enable it.
    pub fn export_nodes(&self, context: &Contexts, lower_case: bool) -> BTreeMap<String, bool> {
        let apply_shorthand = self.services().options.apply_shorthand;
        let mut map: BTreeMap<String, bool> = BTreeMap::new();
        for ln in self.all_nodes_filtered(context) {
            let node = ln.node();
            let key = if lower_case {
                node.permission().to_ascii_lowercase()
            } else {
                node.permission().to_string()
            };
            map.entry(key).or_insert_with(|| node.value());
            if apply_shorthand {
                for implied in node.resolve_shorthand() {
                    let key = if lower_case {
                        implied.to_ascii_lowercase()
                    } else {
                        implied
                    };
                    map.entry(key).or_insert_with(|| node.value());
                }
            }
        }
        map
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use stratum_events::MemorySink;
    use stratum_model::{ContextSet, Node};

    use super::*;
    use crate::clock::ManualClock;
    use crate::config::Options;
    use crate::holder::Services;
    use crate::registry::{GroupRegistry, MemoryGroupRegistry};

    struct Fixture {
        registry: Arc<MemoryGroupRegistry>,
        services: Services,
    }

    impl Fixture {
        fn new() -> Self {
            let registry = Arc::new(MemoryGroupRegistry::new());
            let services = Services::new(Arc::new(MemorySink::new()), registry.clone())
                .with_clock(Arc::new(ManualClock::at(1_000)));
            Self { registry, services }
        }

        fn with_options(options: Options) -> Self {
            let base = Self::new();
            Self {
                services: base.services.clone().with_options(options),
                registry: base.registry,
            }
        }

        fn group(&self, name: &str) -> Arc<PermissionHolder> {
            let group = Arc::new(PermissionHolder::group(name, self.services.clone()));
            self.registry.register(group.clone());
            group
        }

        fn user(&self) -> PermissionHolder {
            PermissionHolder::user(uuid::Uuid::new_v4(), self.services.clone())
        }
    }

    fn permissions_of(nodes: &[LocalizedNode]) -> Vec<String> {
        nodes
            .iter()
            .map(|ln| ln.node().permission().to_string())
            .collect()
    }

    #[test]
    fn inherits_nodes_from_parent_groups() {
        let fx = Fixture::new();
        let admins = fx.group("admins");
        admins.set_permission(Node::new("kick", true)).unwrap();

        let user = fx.user();
        user.set_inherit_group("admins", None, None, None).unwrap();

        let all = user.all_nodes(None, &Contexts::allow_all());
        let perms = permissions_of(&all);
        assert!(perms.contains(&"kick".to_string()));
        let kick = all.iter().find(|ln| ln.node().permission() == "kick").unwrap();
        assert_eq!(kick.location(), "admins");
        let edge = all
            .iter()
            .find(|ln| ln.node().permission() == "group.admins")
            .unwrap();
        assert_eq!(edge.location(), user.object_name());
    }

    #[test]
    fn cyclic_graphs_terminate_with_each_group_once() {
        let fx = Fixture::new();
        let a = fx.group("a");
        let b = fx.group("b");
        a.set_permission(Node::new("group.b", true)).unwrap();
        b.set_permission(Node::new("group.a", true)).unwrap();

        let user = fx.user();
        user.set_permission(Node::new("group.a", true)).unwrap();

        let all = user.all_nodes(None, &Contexts::allow_all());
        let perms = permissions_of(&all);
        assert_eq!(
            perms.iter().filter(|p| *p == "group.a").count(),
            1,
            "group.a once in {perms:?}"
        );
        assert_eq!(perms.iter().filter(|p| *p == "group.b").count(), 1);
    }

    #[test]
    fn self_cycles_are_cut() {
        let fx = Fixture::new();
        let a = fx.group("a");
        a.set_permission(Node::new("group.a", true)).unwrap();
        a.set_permission(Node::new("fly", true)).unwrap();

        let all = a.all_nodes(None, &Contexts::allow_all());
        assert_eq!(permissions_of(&all).len(), 2);
    }

    #[test]
    fn unknown_groups_are_skipped_silently() {
        let fx = Fixture::new();
        let user = fx.user();
        user.set_permission(Node::new("group.ghost", true)).unwrap();
        user.set_permission(Node::new("real", true)).unwrap();

        let all = user.all_nodes(None, &Contexts::allow_all());
        assert_eq!(all.len(), 2);
    }

    #[test]
    fn caller_supplied_exclusions_are_honored_and_never_mutated() {
        let fx = Fixture::new();
        let admins = fx.group("admins");
        admins.set_permission(Node::new("kick", true)).unwrap();
        let user = fx.user();
        user.set_inherit_group("admins", None, None, None).unwrap();

        let excluded = vec!["Admins".to_string()];
        let all = user.all_nodes(Some(&excluded), &Contexts::allow_all());
        assert!(!permissions_of(&all).contains(&"kick".to_string()));
        assert_eq!(excluded, vec!["Admins".to_string()]);
    }

    #[test]
    fn closer_assertions_shadow_inherited_ones() {
        let fx = Fixture::new();
        let admins = fx.group("admins");
        admins.set_permission(Node::new("fly", true)).unwrap();
        let user = fx.user();
        user.set_inherit_group("admins", None, None, None).unwrap();
        user.set_permission(Node::new("fly", false)).unwrap();

        // Both survive the walk (they differ in value), the user's own deny
        // sorts first, and the filtered reduction keeps only the deny.
        let filtered = user.all_nodes_filtered(&Contexts::allow_all());
        let fly: Vec<&LocalizedNode> = filtered
            .iter()
            .filter(|ln| ln.node().permission() == "fly")
            .collect();
        assert_eq!(fly.len(), 1);
        assert!(!fly[0].node().value());
        assert_eq!(fly[0].location(), user.object_name());

        let map = user.export_nodes(&Contexts::allow_all(), false);
        assert_eq!(map.get("fly"), Some(&false));
    }

    #[test]
    fn group_traversal_respects_server_scope() {
        let fx = Fixture::new();
        let staff = fx.group("staff");
        staff.set_permission(Node::new("mod.tools", true)).unwrap();
        let user = fx.user();
        user.set_inherit_group("staff", Some("s1"), None, None).unwrap();

        let everywhere = Contexts::allow_all();
        assert!(!permissions_of(&user.all_nodes(None, &everywhere))
            .contains(&"mod.tools".to_string()));

        let on_s1 = Contexts::of(ContextSet::singleton("server", "s1"));
        assert!(permissions_of(&user.all_nodes(None, &on_s1)).contains(&"mod.tools".to_string()));
    }

    #[test]
    fn global_group_edges_can_be_disabled() {
        let fx = Fixture::new();
        let staff = fx.group("staff");
        staff.set_permission(Node::new("mod.tools", true)).unwrap();
        let user = fx.user();
        user.set_inherit_group("staff", None, None, None).unwrap();

        let no_global_groups = Contexts::new(
            ContextSet::singleton("server", "s1"),
            true,
            false,
            true,
            true,
            true,
        );
        assert!(!permissions_of(&user.all_nodes(None, &no_global_groups))
            .contains(&"mod.tools".to_string()));
    }

    #[test]
    fn context_tags_filter_the_resolved_view() {
        let fx = Fixture::new();
        let holder = fx.user();
        holder
            .set_permission(
                Node::builder("feature", true)
                    .with_context("realm", "eu")
                    .build(),
            )
            .unwrap();

        let eu = Contexts::of(ContextSet::singleton("realm", "eu"));
        assert_eq!(holder.all_nodes_filtered(&eu).len(), 1);

        let us = Contexts::of(ContextSet::singleton("realm", "us"));
        assert!(holder.all_nodes_filtered(&us).is_empty());
        assert!(holder.all_nodes_filtered(&Contexts::allow_all()).is_empty());
    }

    #[test]
    fn filtered_view_can_exclude_global_nodes() {
        let fx = Fixture::new();
        let holder = fx.user();
        holder.set_permission(Node::new("everywhere", true)).unwrap();
        holder
            .set_permission(Node::builder("somewhere", true).server("s1").build())
            .unwrap();

        let strict = Contexts::new(
            ContextSet::singleton("server", "s1"),
            true,
            true,
            true,
            false,
            true,
        );
        let perms = permissions_of(&holder.all_nodes_filtered(&strict));
        assert_eq!(perms, vec!["somewhere"]);
    }

    #[test]
    fn traversal_can_be_disabled_entirely() {
        let fx = Fixture::new();
        let admins = fx.group("admins");
        admins.set_permission(Node::new("kick", true)).unwrap();
        let user = fx.user();
        user.set_inherit_group("admins", None, None, None).unwrap();

        let no_groups = Contexts::new(ContextSet::new(), false, true, true, true, true);
        let perms = permissions_of(&user.all_nodes_filtered(&no_groups));
        assert_eq!(perms, vec!["group.admins"]);
    }

    #[test]
    fn export_expands_shorthand() {
        let fx = Fixture::new();
        let holder = fx.user();
        holder
            .set_permission(Node::new("build.(create|destroy)", true))
            .unwrap();

        let map = holder.export_nodes(&Contexts::allow_all(), false);
        assert_eq!(map.get("build.(create|destroy)"), Some(&true));
        assert_eq!(map.get("build.create"), Some(&true));
        assert_eq!(map.get("build.destroy"), Some(&true));
    }

    #[test]
    fn export_without_shorthand_keeps_only_the_literal() {
        let fx = Fixture::with_options(Options {
            apply_shorthand: false,
            ..Options::default()
        });
        let holder = fx.user();
        holder
            .set_permission(Node::new("build.(create|destroy)", true))
            .unwrap();

        let map = holder.export_nodes(&Contexts::allow_all(), false);
        assert_eq!(map.len(), 1);
        assert!(map.contains_key("build.(create|destroy)"));
    }

    #[test]
    fn export_lower_cases_on_request_and_keeps_one_verdict_per_permission() {
        let fx = Fixture::new();
        let holder = fx.user();
        holder.set_permission(Node::new("Chat.Color", true)).unwrap();
        holder
            .set_permission(Node::builder("other", false).expiry(9_999).build())
            .unwrap();
        holder.set_permission(Node::new("other", true)).unwrap();

        let map = holder.export_nodes(&Contexts::allow_all(), true);
        assert_eq!(map.get("chat.color"), Some(&true));
        // The temporary deny outranks the permanent grant; one entry only.
        assert_eq!(map.get("other"), Some(&false));
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn shorthand_never_overrides_an_explicit_entry() {
        let fx = Fixture::new();
        let holder = fx.user();
        holder
            .set_permission(Node::builder("build.create", false).server("s1").build())
            .unwrap();
        holder
            .set_permission(Node::new("build.(create|destroy)", true))
            .unwrap();

        let map = holder.export_nodes(&Contexts::of(ContextSet::singleton("server", "s1")), false);
        // The server-specific explicit deny sorts first and wins the key.
        assert_eq!(map.get("build.create"), Some(&false));
        assert_eq!(map.get("build.destroy"), Some(&true));
    }

    #[test]
    fn regex_server_edges_match_when_enabled() {
        let fx = Fixture::new();
        let staff = fx.group("staff");
        staff.set_permission(Node::new("mod.tools", true)).unwrap();
        let user = fx.user();
        user.set_inherit_group("staff", Some("r=lobby-\\d+"), None, None)
            .unwrap();

        let lobby = Contexts::of(ContextSet::singleton("server", "lobby-7"));
        assert!(permissions_of(&user.all_nodes(None, &lobby)).contains(&"mod.tools".to_string()));

        let hub = Contexts::of(ContextSet::singleton("server", "hub-1"));
        assert!(!permissions_of(&user.all_nodes(None, &hub)).contains(&"mod.tools".to_string()));
    }

    #[test]
    fn registry_lookup_is_case_insensitive() {
        let fx = Fixture::new();
        let group = fx.group("Admins");
        assert_eq!(group.object_name(), "admins");
        assert!(fx.registry.group("ADMINS").is_some());
        assert_eq!(fx.registry.names(), vec!["admins"]);
        assert!(fx.registry.remove("admins").is_some());
        assert!(fx.registry.group("admins").is_none());
    }
}
