//! Per-Node Side Table
//!
//! Runtime bookkeeping that a browser build would bolt onto DOM nodes as ad
//! hoc properties lives here instead, keyed by [`NodeId`]. Entries are
//! created lazily the first time a pass needs them and are dropped when the
//! node is removed from the document.

use std::collections::HashMap;

use indexmap::IndexMap;
use smallvec::SmallVec;

use super::NodeId;
use crate::expr::Value;

/// Which directive registered a listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ListenerKind {
    /// Two-way value binding.
    Bind,
    /// One-way event-to-expression binding.
    Expression,
}

/// What to do when an event fires.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Listener {
    /// Write the element's value into the store under `key`.
    Bind { key: String, persist: bool },
    /// Evaluate the expression currently held by `attribute`.
    Expression { attribute: String },
}

/// Attribute snapshot of a rendered component instance.
#[derive(Debug, Clone, PartialEq)]
pub struct ComponentState {
    /// Instance id handed to the last render.
    pub instance: u64,
    /// Attributes as they were right after the last render.
    pub attributes: IndexMap<String, String>,
}

/// Everything the runtime remembers about one node.
#[derive(Debug, Default)]
pub struct NodeState {
    /// Tracked events: `(kind, event)` pairs already bound.
    tracked: SmallVec<[(ListenerKind, String); 8]>,
    /// Registered listeners, by event name.
    listeners: SmallVec<[(String, Listener); 8]>,
    /// Local bindings installed by list expansion (the "puddle").
    puddle: IndexMap<String, Value>,
    /// Set once the node has been rendered as a component.
    pub component: Option<ComponentState>,
}

impl NodeState {
    pub fn is_tracked(&self, kind: ListenerKind, event: &str) -> bool {
        self.tracked.iter().any(|(k, e)| *k == kind && e == event)
    }

    pub fn puddle(&self) -> &IndexMap<String, Value> {
        &self.puddle
    }

    pub fn tracked_count(&self) -> usize {
        self.tracked.len()
    }
}

/// Side table of [`NodeState`] keyed by node id.
#[derive(Debug, Default)]
pub struct SideTable {
    states: HashMap<NodeId, NodeState>,
}

impl SideTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: NodeId) -> Option<&NodeState> {
        self.states.get(&id)
    }

    pub fn entry(&mut self, id: NodeId) -> &mut NodeState {
        self.states.entry(id).or_default()
    }

    /// Register `listener` for `event` unless this kind of listener is
    /// already tracked for it. Returns whether it was registered.
    pub fn track(&mut self, id: NodeId, kind: ListenerKind, event: &str, listener: Listener) -> bool {
        let state = self.entry(id);
        if state.is_tracked(kind, event) {
            return false;
        }
        state.tracked.push((kind, event.to_string()));
        state.listeners.push((event.to_string(), listener));
        true
    }

    /// Listeners registered for `event`, in registration order.
    pub fn listeners(&self, id: NodeId, event: &str) -> Vec<Listener> {
        self.get(id)
            .map(|state| {
                state
                    .listeners
                    .iter()
                    .filter(|(e, _)| e == event)
                    .map(|(_, listener)| listener.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn bind_local(&mut self, id: NodeId, name: &str, value: Value) {
        self.entry(id).puddle.insert(name.to_string(), value);
    }

    /// Drop the entries of nodes that left the document.
    pub fn forget(&mut self, removed: &[NodeId]) {
        for id in removed {
            self.states.remove(id);
        }
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}
