//! Value types shared across the permission engine: nodes, context sets,
//! query contexts and the priority ordering.
//!
//! Everything in this crate is an immutable value with pure predicates; the
//! stateful machinery (holders, caches, the inheritance walk) lives in
//! `stratum-engine`.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

pub mod context;
pub mod node;
pub mod sort;

pub use context::{ContextSet, Contexts, SERVER_KEY, WORLD_KEY};
pub use node::{LocalizedNode, Node, NodeBuilder};
pub use sort::priority_order;

/// Outcome of a permission lookup: an explicit grant, an explicit deny, or
/// no matching assertion at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Tristate {
    True,
    False,
    Undefined,
}

impl Tristate {
    pub fn from_bool(value: bool) -> Self {
        if value {
            Tristate::True
        } else {
            Tristate::False
        }
    }

    /// Collapse to a plain boolean. `Undefined` collapses to `false`, the
    /// historical encoding callers of the boolean convenience rely on.
    pub fn as_bool(self) -> bool {
        matches!(self, Tristate::True)
    }

    pub fn as_option(self) -> Option<bool> {
        match self {
            Tristate::True => Some(true),
            Tristate::False => Some(false),
            Tristate::Undefined => None,
        }
    }

    pub fn is_undefined(self) -> bool {
        matches!(self, Tristate::Undefined)
    }
}

impl From<bool> for Tristate {
    fn from(value: bool) -> Self {
        Tristate::from_bool(value)
    }
}

impl From<Option<bool>> for Tristate {
    fn from(value: Option<bool>) -> Self {
        value.map(Tristate::from_bool).unwrap_or(Tristate::Undefined)
    }
}
