//! Mutation events emitted by permission holders, the sink trait they are
//! handed to, and a small in-process broadcast bus.
//!
//! Delivery is fire-and-forget: the engine never waits on a sink, and a lost
//! or reordered event must not affect resolution correctness. Topic strings
//! are centralized here so hosts subscribe without stringly-typed drift;
//! keep the list alphabetized and favor dot.case names.

use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use stratum_model::Node;

pub const TOPIC_GROUP_ADD: &str = "group.add";
pub const TOPIC_GROUP_REMOVE: &str = "group.remove";
pub const TOPIC_NODE_EXPIRE: &str = "node.expire";
pub const TOPIC_NODE_SET: &str = "node.set";
pub const TOPIC_NODE_UNSET: &str = "node.unset";

/// One mutation on a holder. `holder` is always the holder's object name
/// (a user's UUID or a group's lowercased name).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HolderEvent {
    NodeSet {
        holder: String,
        node: Node,
    },
    NodeUnset {
        holder: String,
        node: Node,
    },
    NodeExpire {
        holder: String,
        node: Node,
    },
    GroupAdd {
        holder: String,
        group: String,
        server: Option<String>,
        world: Option<String>,
        expiry: Option<u64>,
    },
    GroupRemove {
        holder: String,
        group: String,
        server: Option<String>,
        world: Option<String>,
        temporary: bool,
    },
}

impl HolderEvent {
    pub fn topic(&self) -> &'static str {
        match self {
            HolderEvent::NodeSet { .. } => TOPIC_NODE_SET,
            HolderEvent::NodeUnset { .. } => TOPIC_NODE_UNSET,
            HolderEvent::NodeExpire { .. } => TOPIC_NODE_EXPIRE,
            HolderEvent::GroupAdd { .. } => TOPIC_GROUP_ADD,
            HolderEvent::GroupRemove { .. } => TOPIC_GROUP_REMOVE,
        }
    }

    pub fn holder(&self) -> &str {
        match self {
            HolderEvent::NodeSet { holder, .. }
            | HolderEvent::NodeUnset { holder, .. }
            | HolderEvent::NodeExpire { holder, .. }
            | HolderEvent::GroupAdd { holder, .. }
            | HolderEvent::GroupRemove { holder, .. } => holder,
        }
    }
}

/// Event envelope as published on the bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    /// RFC3339 publication time.
    pub time: String,
    /// Topic constant, e.g. `node.set`.
    pub kind: String,
    pub payload: HolderEvent,
}

/// Where holder mutations are reported. Implementations must not block.
pub trait EventSink: Send + Sync {
    fn accept(&self, event: HolderEvent);
}

/// Sink that drops everything.
#[derive(Debug, Default)]
pub struct NullSink;

impl EventSink for NullSink {
    fn accept(&self, _event: HolderEvent) {}
}

/// Sink that records events in memory; drain with [`MemorySink::take`].
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<HolderEvent>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn take(&self) -> Vec<HolderEvent> {
        std::mem::take(&mut *self.events.lock().unwrap())
    }

    pub fn len(&self) -> usize {
        self.events.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl EventSink for MemorySink {
    fn accept(&self, event: HolderEvent) {
        self.events.lock().unwrap().push(event);
    }
}

/// In-process broadcast bus. Subscribers receive timestamped envelopes;
/// slow subscribers lag and lose the oldest entries rather than applying
/// backpressure to the engine.
#[derive(Debug, Clone)]
pub struct Bus {
    tx: broadcast::Sender<Envelope>,
}

impl Bus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Envelope> {
        self.tx.subscribe()
    }
}

impl Default for Bus {
    fn default() -> Self {
        Self::new(256)
    }
}

impl EventSink for Bus {
    fn accept(&self, event: HolderEvent) {
        let envelope = Envelope {
            time: chrono::Utc::now().to_rfc3339(),
            kind: event.topic().to_string(),
            payload: event,
        };
        if self.tx.send(envelope).is_err() {
            tracing::trace!("event dropped: no subscribers");
        }
    }
}
