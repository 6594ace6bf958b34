//! Reverse priority order over nodes: the most specific assertion sorts
//! first, so "first seen wins" scans resolve overrides deterministically.

use std::cmp::Ordering;

use crate::node::Node;

/// Compare two nodes by effective priority. `Less` means `a` outranks `b`.
///
/// Ranking, in order: server-specific over global, world-specific over
/// world-less, fewer wildcard segments, temporary over permanent, then
/// case-insensitive permission string as the stable tiebreaker.
pub fn priority_order(a: &Node, b: &Node) -> Ordering {
    match (a.server().is_some(), b.server().is_some()) {
        (true, false) => return Ordering::Less,
        (false, true) => return Ordering::Greater,
        _ => {}
    }
    match (a.world().is_some(), b.world().is_some()) {
        (true, false) => return Ordering::Less,
        (false, true) => return Ordering::Greater,
        _ => {}
    }
    match a.wildcard_depth().cmp(&b.wildcard_depth()) {
        Ordering::Equal => {}
        unequal => return unequal,
    }
    match (a.is_temporary(), b.is_temporary()) {
        (true, false) => return Ordering::Less,
        (false, true) => return Ordering::Greater,
        _ => {}
    }
    a.permission()
        .to_ascii_lowercase()
        .cmp(&b.permission().to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sorted(mut nodes: Vec<Node>) -> Vec<Node> {
        nodes.sort_by(priority_order);
        nodes
    }

    #[test]
    fn server_specific_outranks_global() {
        let scoped = Node::builder("a.b", true).server("s1").build();
        let global = Node::new("a.b", false);
        assert_eq!(priority_order(&scoped, &global), Ordering::Less);
        let order = sorted(vec![global.clone(), scoped.clone()]);
        assert_eq!(order, vec![scoped, global]);
    }

    #[test]
    fn world_specific_breaks_server_ties() {
        let with_world = Node::builder("a.b", true).server("s1").world("w1").build();
        let without = Node::builder("a.b", true).server("s1").build();
        assert_eq!(priority_order(&with_world, &without), Ordering::Less);
    }

    #[test]
    fn fewer_wildcards_rank_higher() {
        let exact = Node::new("a.b.c", true);
        let one_star = Node::new("a.b.*", true);
        let two_stars = Node::new("a.*.*", true);
        let order = sorted(vec![two_stars.clone(), exact.clone(), one_star.clone()]);
        assert_eq!(order, vec![exact, one_star, two_stars]);
    }

    #[test]
    fn temporary_outranks_permanent() {
        let temp = Node::builder("a.b", true).expiry(9_999_999_999).build();
        let perm = Node::new("a.b", false);
        assert_eq!(priority_order(&temp, &perm), Ordering::Less);
    }

    #[test]
    fn permission_string_is_the_final_tiebreaker() {
        let a = Node::new("Alpha.one", true);
        let b = Node::new("beta.one", true);
        assert_eq!(priority_order(&a, &b), Ordering::Less);
        assert_eq!(priority_order(&a, &a), Ordering::Equal);
    }
}
