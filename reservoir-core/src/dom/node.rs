//! Tree Nodes
//!
//! This module defines the node types that live in the document arena.

use std::fmt;

use indexmap::IndexMap;
use slotmap::new_key_type;

new_key_type! {
    /// Stable identifier for a node in a [`Document`](super::Document).
    ///
    /// Ids are generational: a freed slot is reused with a new version, so
    /// an id held past its node's removal never resolves to the newcomer.
    pub struct NodeId;
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.0)
    }
}

/// Element payload: tag, ordered attributes and the form value property.
#[derive(Debug, Clone, PartialEq)]
pub struct ElementData {
    /// Lower-case tag name.
    pub tag: String,

    /// Attributes in source order.
    pub attributes: IndexMap<String, String>,

    /// Live value of a form control. `None` until written; reads fall back
    /// to the `value` attribute.
    pub value: Option<String>,
}

impl ElementData {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into().to_ascii_lowercase(),
            attributes: IndexMap::new(),
            value: None,
        }
    }
}

/// The kind of node.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    /// The document root. Exactly one per arena.
    Document,
    Element(ElementData),
    Text(String),
    Comment(String),
}

/// A node in the arena.
#[derive(Debug, Clone)]
pub struct Node {
    pub(crate) kind: NodeKind,
    pub(crate) parent: Option<NodeId>,
    pub(crate) children: Vec<NodeId>,
}

impl Node {
    pub(crate) fn new(kind: NodeKind) -> Self {
        Self {
            kind,
            parent: None,
            children: Vec::new(),
        }
    }

    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    /// All child nodes, including text and comments.
    pub fn child_nodes(&self) -> &[NodeId] {
        &self.children
    }

    pub fn as_element(&self) -> Option<&ElementData> {
        match &self.kind {
            NodeKind::Element(data) => Some(data),
            _ => None,
        }
    }

    pub(crate) fn as_element_mut(&mut self) -> Option<&mut ElementData> {
        match &mut self.kind {
            NodeKind::Element(data) => Some(data),
            _ => None,
        }
    }

    pub fn is_element(&self) -> bool {
        matches!(self.kind, NodeKind::Element(_))
    }
}
