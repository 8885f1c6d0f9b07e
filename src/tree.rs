//! The in-memory document the engine binds to.
//!
//! Nodes live in an arena and are addressed by [`NodeId`]. Removing a node
//! frees its whole subtree. Ids come from a counter and are never reused,
//! so a listener or registry entry holding a stale id stops matching
//! anything.
//!
//! Form state (`value`, `checked`) and the display style are element
//! properties separate from attributes, the way a browser keeps them. Every
//! property or text write that changes something bumps [`Document::writes`].

use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub usize);

#[derive(Debug, Clone, PartialEq)]
pub struct Element {
    pub tag: String,
    attributes: Vec<(String, String)>,
    value: Option<String>,
    checked: bool,
    display: Option<String>,
    bound: BTreeSet<&'static str>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    Document,
    Element(Element),
    Text(String),
}

#[derive(Debug, Clone)]
struct Node {
    kind: NodeKind,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    attached: bool,
}

#[derive(Debug, Clone)]
pub struct Document {
    nodes: BTreeMap<NodeId, Node>,
    next: usize,
    writes: usize,
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl Document {
    /// An empty document holding only its root node.
    pub fn new() -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert(
            NodeId(0),
            Node {
                kind: NodeKind::Document,
                parent: None,
                children: Vec::new(),
                attached: true,
            },
        );
        Document {
            nodes,
            next: 1,
            writes: 0,
        }
    }

    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    fn element(&self, id: NodeId) -> Option<&Element> {
        match &self.node(id)?.kind {
            NodeKind::Element(el) => Some(el),
            _ => None,
        }
    }

    fn element_mut(&mut self, id: NodeId) -> Option<&mut Element> {
        match &mut self.nodes.get_mut(&id)?.kind {
            NodeKind::Element(el) => Some(el),
            _ => None,
        }
    }

    // ── Structure ────────────────────────────────────────────────────

    pub fn create_element(&mut self, tag: &str) -> NodeId {
        self.push_node(NodeKind::Element(Element {
            tag: tag.to_ascii_lowercase(),
            attributes: Vec::new(),
            value: None,
            checked: false,
            display: None,
            bound: BTreeSet::new(),
        }))
    }

    pub fn create_text(&mut self, text: &str) -> NodeId {
        self.push_node(NodeKind::Text(text.to_string()))
    }

    fn push_node(&mut self, kind: NodeKind) -> NodeId {
        let id = NodeId(self.next);
        self.next += 1;
        self.nodes.insert(
            id,
            Node {
                kind,
                parent: None,
                children: Vec::new(),
                attached: false,
            },
        );
        id
    }

    /// Append `child` as the last child of `parent`, detaching it first.
    pub fn append_child(&mut self, parent: NodeId, child: NodeId) {
        self.detach(child);
        let attached = self.node(parent).is_some_and(|n| n.attached);
        if let Some(p) = self.nodes.get_mut(&parent) {
            p.children.push(child);
        }
        if let Some(c) = self.nodes.get_mut(&child) {
            c.parent = Some(parent);
        }
        self.set_attached(child, attached);
    }

    /// Remove `node` and its subtree from the document and free them.
    pub fn remove(&mut self, node: NodeId) {
        if node == self.root() {
            return;
        }
        self.detach(node);
        let mut stack = vec![node];
        while let Some(id) = stack.pop() {
            if let Some(n) = self.nodes.remove(&id) {
                stack.extend(n.children);
            }
        }
    }

    /// Id the next created node will get.
    pub(crate) fn next_id(&self) -> NodeId {
        NodeId(self.next)
    }

    /// Free every node created at or after `mark`.
    pub(crate) fn discard_from(&mut self, mark: NodeId) {
        let dropped = self.nodes.split_off(&mark);
        for parent in dropped.values().filter_map(|n| n.parent) {
            if let Some(p) = self.nodes.get_mut(&parent) {
                p.children.retain(|c| *c < mark);
            }
        }
    }

    /// Number of live nodes, the root included.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.len() <= 1
    }

    fn detach(&mut self, node: NodeId) {
        let Some(parent) = self.node(node).and_then(|n| n.parent) else {
            return;
        };
        if let Some(p) = self.nodes.get_mut(&parent) {
            p.children.retain(|c| *c != node);
        }
        if let Some(n) = self.nodes.get_mut(&node) {
            n.parent = None;
        }
    }

    fn set_attached(&mut self, node: NodeId, attached: bool) {
        let mut stack = vec![node];
        while let Some(id) = stack.pop() {
            if let Some(n) = self.nodes.get_mut(&id) {
                n.attached = attached;
                stack.extend(n.children.iter().copied());
            }
        }
    }

    /// Whether `node` is reachable from the document root.
    pub fn is_attached(&self, node: NodeId) -> bool {
        self.node(node).is_some_and(|n| n.attached)
    }

    pub fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.node(node)?.parent
    }

    pub fn children(&self, node: NodeId) -> &[NodeId] {
        match self.node(node) {
            Some(n) => &n.children,
            None => &[],
        }
    }

    /// Child elements only, skipping text.
    pub fn child_elements(&self, node: NodeId) -> Vec<NodeId> {
        self.children(node)
            .iter()
            .copied()
            .filter(|c| self.is_element(*c))
            .collect()
    }

    /// Every node below `node` in document order, excluding `node`.
    pub fn descendants(&self, node: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack: Vec<NodeId> = self.children(node).iter().rev().copied().collect();
        while let Some(id) = stack.pop() {
            out.push(id);
            stack.extend(self.children(id).iter().rev().copied());
        }
        out
    }

    pub fn kind(&self, node: NodeId) -> Option<&NodeKind> {
        self.node(node).map(|n| &n.kind)
    }

    pub fn is_element(&self, node: NodeId) -> bool {
        self.element(node).is_some()
    }

    pub fn tag(&self, node: NodeId) -> Option<&str> {
        self.element(node).map(|el| el.tag.as_str())
    }

    pub fn get_element_by_id(&self, id: &str) -> Option<NodeId> {
        self.descendants(self.root())
            .into_iter()
            .find(|n| self.attribute(*n, "id") == Some(id))
    }

    // ── Attributes ───────────────────────────────────────────────────

    pub fn attributes(&self, node: NodeId) -> &[(String, String)] {
        match self.element(node) {
            Some(el) => &el.attributes,
            None => &[],
        }
    }

    pub fn attribute(&self, node: NodeId, name: &str) -> Option<&str> {
        self.element(node)?
            .attributes
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn has_attribute(&self, node: NodeId, name: &str) -> bool {
        self.attribute(node, name).is_some()
    }

    pub fn set_attribute(&mut self, node: NodeId, name: &str, value: &str) {
        let Some(el) = self.element_mut(node) else {
            return;
        };
        let name = name.to_ascii_lowercase();
        if name == "checked" {
            el.checked = true;
        }
        match el.attributes.iter_mut().find(|(k, _)| *k == name) {
            Some(slot) => slot.1 = value.to_string(),
            None => el.attributes.push((name, value.to_string())),
        }
    }

    /// The lowercased `type` attribute, or `""`.
    pub fn input_type(&self, node: NodeId) -> String {
        self.attribute(node, "type")
            .unwrap_or_default()
            .to_ascii_lowercase()
    }

    // ── Properties ───────────────────────────────────────────────────

    /// The live `value` property, falling back to the `value` attribute.
    pub fn value(&self, node: NodeId) -> String {
        match self.element(node) {
            Some(el) => el
                .value
                .clone()
                .or_else(|| self.attribute(node, "value").map(str::to_string))
                .unwrap_or_default(),
            None => String::new(),
        }
    }

    /// Returns whether the property changed.
    pub fn set_value(&mut self, node: NodeId, value: &str) -> bool {
        if self.value(node) == value {
            return false;
        }
        let Some(el) = self.element_mut(node) else {
            return false;
        };
        el.value = Some(value.to_string());
        self.writes += 1;
        true
    }

    pub fn checked(&self, node: NodeId) -> bool {
        self.element(node).is_some_and(|el| el.checked)
    }

    pub fn set_checked(&mut self, node: NodeId, checked: bool) -> bool {
        match self.element_mut(node) {
            Some(el) if el.checked != checked => {
                el.checked = checked;
                self.writes += 1;
                true
            }
            _ => false,
        }
    }

    pub fn is_hidden(&self, node: NodeId) -> bool {
        self.element(node)
            .is_some_and(|el| el.display.as_deref() == Some("none"))
    }

    /// Toggle `display: none`.
    pub fn set_hidden(&mut self, node: NodeId, hidden: bool) -> bool {
        let display = if hidden { Some("none".to_string()) } else { None };
        match self.element_mut(node) {
            Some(el) if el.display != display => {
                el.display = display;
                self.writes += 1;
                true
            }
            _ => false,
        }
    }

    pub(crate) fn display(&self, node: NodeId) -> Option<&str> {
        self.element(node)?.display.as_deref()
    }

    pub(crate) fn live_value(&self, node: NodeId) -> Option<&str> {
        self.element(node)?.value.as_deref()
    }

    pub fn text(&self, node: NodeId) -> Option<&str> {
        match &self.node(node)?.kind {
            NodeKind::Text(t) => Some(t),
            _ => None,
        }
    }

    pub fn set_text(&mut self, node: NodeId, text: &str) -> bool {
        match self.nodes.get_mut(&node).map(|n| &mut n.kind) {
            Some(NodeKind::Text(t)) if t != text => {
                *t = text.to_string();
                self.writes += 1;
                true
            }
            _ => false,
        }
    }

    /// Concatenated text of `node` and its descendants.
    pub fn text_content(&self, node: NodeId) -> String {
        if let Some(t) = self.text(node) {
            return t.to_string();
        }
        self.descendants(node)
            .into_iter()
            .filter_map(|n| self.text(n))
            .collect()
    }

    /// Number of property/text writes that changed something.
    pub fn writes(&self) -> usize {
        self.writes
    }

    // ── Listener flags ───────────────────────────────────────────────

    /// Mark `node` as bound for `kind`. Returns false if it already was.
    pub fn mark_bound(&mut self, node: NodeId, kind: &'static str) -> bool {
        self.element_mut(node).is_some_and(|el| el.bound.insert(kind))
    }

    pub fn is_bound(&self, node: NodeId, kind: &str) -> bool {
        self.element(node).is_some_and(|el| el.bound.contains(kind))
    }
}
