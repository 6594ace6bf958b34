//! Permission resolution engine for a hierarchical access-control system.
//!
//! A [`PermissionHolder`] (a user or a group) owns two sets of permission
//! nodes (enduring and transient) and answers queries about them: exact
//! lookups, priority-merged snapshots, and fully-resolved views that follow
//! `group.<name>` edges transitively through a [`GroupRegistry`], filtered by
//! the caller's [`stratum_model::Contexts`]. Mutations publish advisory
//! events to an injected [`stratum_events::EventSink`]; expiry is driven by
//! an injected [`Clock`] so audits are deterministic under test.

pub mod clock;
pub mod config;
pub mod holder;
pub mod registry;
mod resolver;
pub mod snapshot;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{load_options, options_schema_json, Options};
pub use holder::{DataError, HolderKind, PermissionHolder, Services};
pub use registry::{GroupRegistry, MemoryGroupRegistry};
pub use snapshot::SnapshotCache;
