//! Markup Tree
//!
//! This module implements the in-memory document the runtime hydrates.
//!
//! # Overview
//!
//! The document is an arena: every node lives in a [`SlotMap`] and is
//! addressed by a generational [`NodeId`]. Removing a node frees its slot
//! for reuse, so the arena stays as large as the live tree however often
//! content is re-rendered. Per-node runtime bookkeeping (tracked events,
//! loop-variable bindings, component snapshots) lives in a separate
//! [`SideTable`] keyed by `NodeId` instead of on the nodes themselves.
//!
//! Only the parts of a browser DOM the directives need are modelled:
//! elements with ordered attributes, text, comments, a `value` property on
//! form controls, and `innerHTML`-style reads and writes.

use slotmap::SlotMap;

mod bookkeeping;
pub mod markup;
mod node;

pub use bookkeeping::{ComponentState, Listener, ListenerKind, NodeState, SideTable};
pub use markup::escape_html;
pub use node::{ElementData, Node, NodeId, NodeKind};

/// Tags whose elements carry a `value` property.
const VALUE_ELEMENTS: &[&str] = &["input", "textarea", "select"];

/// An arena-backed markup tree.
#[derive(Debug, Clone)]
pub struct Document {
    nodes: SlotMap<NodeId, Node>,
    root: NodeId,
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl Document {
    /// Create an empty document.
    pub fn new() -> Self {
        let mut nodes = SlotMap::with_key();
        let root = nodes.insert(Node::new(NodeKind::Document));
        Self { nodes, root }
    }

    /// Parse a markup string into a new document.
    pub fn parse(html: &str) -> Self {
        let mut doc = Self::new();
        let root = doc.root;
        markup::parse_into(&mut doc, root, html);
        doc
    }

    /// The document root node.
    pub fn root(&self) -> NodeId {
        self.root
    }

    pub(crate) fn alloc(&mut self, kind: NodeKind) -> NodeId {
        self.nodes.insert(Node::new(kind))
    }

    /// Number of live nodes, the root included.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Slots the arena has allocated, live or free.
    pub fn capacity(&self) -> usize {
        self.nodes.capacity()
    }

    /// Create a detached element.
    pub fn create_element(&mut self, tag: &str) -> NodeId {
        self.alloc(NodeKind::Element(ElementData::new(tag)))
    }

    /// Create a detached text node.
    pub fn create_text(&mut self, text: &str) -> NodeId {
        self.alloc(NodeKind::Text(text.to_string()))
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id)
    }

    fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(id)
    }

    /// Whether `id` still refers to a live node.
    pub fn contains(&self, id: NodeId) -> bool {
        self.node(id).is_some()
    }

    pub fn is_element(&self, id: NodeId) -> bool {
        self.node(id).is_some_and(Node::is_element)
    }

    pub fn element(&self, id: NodeId) -> Option<&ElementData> {
        self.node(id).and_then(Node::as_element)
    }

    fn element_mut(&mut self, id: NodeId) -> Option<&mut ElementData> {
        self.node_mut(id).and_then(Node::as_element_mut)
    }

    pub fn tag(&self, id: NodeId) -> Option<&str> {
        self.element(id).map(|data| data.tag.as_str())
    }

    /// Parent node (element or document root).
    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).and_then(Node::parent)
    }

    /// Parent node if it is an element.
    pub fn parent_element(&self, id: NodeId) -> Option<NodeId> {
        self.parent(id).filter(|&parent| self.is_element(parent))
    }

    /// Element children in document order.
    pub fn children(&self, id: NodeId) -> Vec<NodeId> {
        self.node(id)
            .map(|node| {
                node.child_nodes()
                    .iter()
                    .copied()
                    .filter(|&child| self.is_element(child))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Append `child` as the last child of `parent`, detaching it first.
    pub fn append_child(&mut self, parent: NodeId, child: NodeId) {
        if !self.contains(parent) || !self.contains(child) || parent == child {
            return;
        }
        if let Some(old_parent) = self.parent(child) {
            if let Some(node) = self.node_mut(old_parent) {
                node.children.retain(|&c| c != child);
            }
        }
        if let Some(node) = self.node_mut(child) {
            node.parent = Some(parent);
        }
        if let Some(node) = self.node_mut(parent) {
            node.children.push(child);
        }
    }

    /// Remove every descendant of `id`. Returns the ids that were freed.
    pub fn remove_children(&mut self, id: NodeId) -> Vec<NodeId> {
        let children = match self.node_mut(id) {
            Some(node) => std::mem::take(&mut node.children),
            None => return Vec::new(),
        };

        let mut removed = Vec::new();
        let mut stack = children;
        while let Some(next) = stack.pop() {
            if let Some(node) = self.nodes.remove(next) {
                stack.extend(node.children);
                removed.push(next);
            }
        }
        removed
    }

    /// `id` followed by all of its descendants, depth-first in document order.
    pub fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(next) = stack.pop() {
            if let Some(node) = self.node(next) {
                out.push(next);
                stack.extend(node.child_nodes().iter().rev());
            }
        }
        out
    }

    // ------------------------------------------------------------------------
    // Attributes
    // ------------------------------------------------------------------------

    pub fn attribute(&self, id: NodeId, name: &str) -> Option<&str> {
        self.element(id)
            .and_then(|data| data.attributes.get(name))
            .map(String::as_str)
    }

    pub fn has_attribute(&self, id: NodeId, name: &str) -> bool {
        self.attribute(id, name).is_some()
    }

    /// Set an attribute. Returns whether the element changed.
    pub fn set_attribute(&mut self, id: NodeId, name: &str, value: &str) -> bool {
        let Some(data) = self.element_mut(id) else {
            return false;
        };
        let name = name.to_ascii_lowercase();
        if data.attributes.get(&name).map(String::as_str) == Some(value) {
            return false;
        }
        data.attributes.insert(name, value.to_string());
        true
    }

    /// Remove an attribute. Returns whether it was present.
    pub fn remove_attribute(&mut self, id: NodeId, name: &str) -> bool {
        self.element_mut(id)
            .is_some_and(|data| data.attributes.shift_remove(name).is_some())
    }

    /// Attribute names in source order.
    pub fn attribute_names(&self, id: NodeId) -> Vec<String> {
        self.element(id)
            .map(|data| data.attributes.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Attribute names starting with `prefix`, paired with their values.
    pub fn attributes_with_prefix(&self, id: NodeId, prefix: &str) -> Vec<(String, String)> {
        self.element(id)
            .map(|data| {
                data.attributes
                    .iter()
                    .filter(|(name, _)| name.starts_with(prefix))
                    .map(|(name, value)| (name.clone(), value.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn add_class(&mut self, id: NodeId, class: &str) {
        let current = self.attribute(id, "class").unwrap_or_default();
        if current.split_whitespace().any(|c| c == class) {
            return;
        }
        let next = if current.trim().is_empty() {
            class.to_string()
        } else {
            format!("{} {class}", current.trim_end())
        };
        self.set_attribute(id, "class", &next);
    }

    pub fn has_class(&self, id: NodeId, class: &str) -> bool {
        self.attribute(id, "class")
            .is_some_and(|classes| classes.split_whitespace().any(|c| c == class))
    }

    // ------------------------------------------------------------------------
    // Form values
    // ------------------------------------------------------------------------

    /// Whether the element is a form control with a `value` property.
    pub fn has_value_property(&self, id: NodeId) -> bool {
        self.tag(id).is_some_and(|tag| VALUE_ELEMENTS.contains(&tag))
    }

    /// Current value of a form control.
    ///
    /// Falls back to the `value` attribute (or the text of a `textarea`)
    /// until the property has been written.
    pub fn value(&self, id: NodeId) -> Option<String> {
        if !self.has_value_property(id) {
            return None;
        }
        let data = self.element(id)?;
        if let Some(value) = &data.value {
            return Some(value.clone());
        }
        if data.tag == "textarea" {
            return Some(self.text_content(id));
        }
        Some(data.attributes.get("value").cloned().unwrap_or_default())
    }

    /// Write the value property. The `value` attribute is left untouched.
    pub fn set_value(&mut self, id: NodeId, value: &str) -> bool {
        if !self.has_value_property(id) {
            return false;
        }
        match self.element_mut(id) {
            Some(data) => {
                data.value = Some(value.to_string());
                true
            }
            None => false,
        }
    }

    // ------------------------------------------------------------------------
    // Markup
    // ------------------------------------------------------------------------

    pub fn inner_html(&self, id: NodeId) -> String {
        let mut out = String::new();
        markup::write_children(self, id, &mut out);
        out
    }

    pub fn outer_html(&self, id: NodeId) -> String {
        let mut out = String::new();
        markup::write_node(self, id, &mut out);
        out
    }

    /// Replace the children of `id` with the parse of `html`.
    ///
    /// Returns the ids of the nodes that were removed.
    pub fn set_inner_html(&mut self, id: NodeId, html: &str) -> Vec<NodeId> {
        if !self.contains(id) {
            return Vec::new();
        }
        let removed = self.remove_children(id);
        markup::parse_into(self, id, html);
        removed
    }

    /// Concatenated text of all descendant text nodes.
    pub fn text_content(&self, id: NodeId) -> String {
        self.descendants(id)
            .into_iter()
            .filter_map(|n| match self.node(n).map(Node::kind) {
                Some(NodeKind::Text(text)) => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    // ------------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------------

    pub fn get_element_by_id(&self, element_id: &str) -> Option<NodeId> {
        self.descendants(self.root)
            .into_iter()
            .find(|&n| self.attribute(n, "id") == Some(element_id))
    }

    /// Every element with the given tag, in document order.
    pub fn find_by_tag(&self, tag: &str) -> Vec<NodeId> {
        let tag = tag.to_ascii_lowercase();
        self.descendants(self.root)
            .into_iter()
            .filter(|&n| self.tag(n) == Some(tag.as_str()))
            .collect()
    }
}
