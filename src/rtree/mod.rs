//! Render tree - the host surface the pipeline mutates.
//!
//! An arena of nodes addressed by [`NodeId`] indices: element and text nodes
//! with parent/children links, attributes, and event listeners. Freed
//! indices return to a pool for reuse; releasing a node releases its whole
//! subtree.
//!
//! Node ids are stable across reparenting, which is what makes relocation
//! cheap: moving an already-mounted child subtree under a freshly rendered
//! parent is a detach plus a reinsert, with every descendant id (and
//! therefore every mount record keyed on one) intact.
//!
//! Selectors are deliberately small: `#name` matches an `id` attribute,
//! anything else matches a tag name - exactly what descriptor selectors
//! need, nothing more.

mod markup;

use std::rc::Rc;

use crate::expr::Value;

/// Index of a node in the arena. Stable for the node's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(usize);

/// Event listener. Receives the event payload.
pub type Listener = Rc<dyn Fn(&Value)>;

enum NodeKind {
    Element {
        tag: String,
        attributes: Vec<(String, String)>,
    },
    Text(String),
}

struct NodeData {
    kind: NodeKind,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    listeners: Vec<(String, Listener)>,
}

impl NodeData {
    fn element(tag: &str) -> Self {
        Self {
            kind: NodeKind::Element {
                tag: tag.to_string(),
                attributes: Vec::new(),
            },
            parent: None,
            children: Vec::new(),
            listeners: Vec::new(),
        }
    }

    fn text(content: &str) -> Self {
        Self {
            kind: NodeKind::Text(content.to_string()),
            parent: None,
            children: Vec::new(),
            listeners: Vec::new(),
        }
    }
}

/// The render tree. One per [`Runtime`](crate::runtime::Runtime).
pub struct Tree {
    nodes: Vec<Option<NodeData>>,
    free: Vec<usize>,
    root: NodeId,
}

impl Tree {
    /// Create a tree holding only the implicit root element.
    pub fn new() -> Self {
        let mut tree = Self {
            nodes: Vec::new(),
            free: Vec::new(),
            root: NodeId(0),
        };
        tree.root = tree.alloc(NodeData::element("root"));
        tree
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    fn alloc(&mut self, data: NodeData) -> NodeId {
        match self.free.pop() {
            Some(index) => {
                self.nodes[index] = Some(data);
                NodeId(index)
            }
            None => {
                self.nodes.push(Some(data));
                NodeId(self.nodes.len() - 1)
            }
        }
    }

    fn node(&self, id: NodeId) -> Option<&NodeData> {
        self.nodes.get(id.0).and_then(Option::as_ref)
    }

    fn node_mut(&mut self, id: NodeId) -> Option<&mut NodeData> {
        self.nodes.get_mut(id.0).and_then(Option::as_mut)
    }

    // =========================================================================
    // Construction
    // =========================================================================

    pub fn create_element(&mut self, tag: &str) -> NodeId {
        self.alloc(NodeData::element(tag))
    }

    pub fn create_text(&mut self, content: &str) -> NodeId {
        self.alloc(NodeData::text(content))
    }

    /// Append a detached node as the last child of `parent`.
    pub fn append_child(&mut self, parent: NodeId, child: NodeId) {
        if let Some(data) = self.node_mut(child) {
            data.parent = Some(parent);
        }
        if let Some(data) = self.node_mut(parent) {
            data.children.push(child);
        }
    }

    pub fn set_attribute(&mut self, node: NodeId, name: &str, value: &str) {
        if let Some(NodeData {
            kind: NodeKind::Element { attributes, .. },
            ..
        }) = self.node_mut(node)
        {
            match attributes.iter_mut().find(|(existing, _)| existing == name) {
                Some((_, existing)) => *existing = value.to_string(),
                None => attributes.push((name.to_string(), value.to_string())),
            }
        }
    }

    // =========================================================================
    // Inspection
    // =========================================================================

    pub fn is_alive(&self, node: NodeId) -> bool {
        self.node(node).is_some()
    }

    pub fn tag(&self, node: NodeId) -> Option<&str> {
        match &self.node(node)?.kind {
            NodeKind::Element { tag, .. } => Some(tag),
            NodeKind::Text(_) => None,
        }
    }

    pub fn attribute(&self, node: NodeId, name: &str) -> Option<String> {
        match &self.node(node)?.kind {
            NodeKind::Element { attributes, .. } => attributes
                .iter()
                .find(|(existing, _)| existing == name)
                .map(|(_, value)| value.clone()),
            NodeKind::Text(_) => None,
        }
    }

    pub fn attributes(&self, node: NodeId) -> Vec<(String, String)> {
        match self.node(node).map(|data| &data.kind) {
            Some(NodeKind::Element { attributes, .. }) => attributes.clone(),
            _ => Vec::new(),
        }
    }

    pub fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.node(node)?.parent
    }

    pub fn children(&self, node: NodeId) -> Vec<NodeId> {
        self.node(node).map(|data| data.children.clone()).unwrap_or_default()
    }

    pub fn is_ancestor(&self, ancestor: NodeId, node: NodeId) -> bool {
        let mut current = self.parent(node);
        while let Some(step) = current {
            if step == ancestor {
                return true;
            }
            current = self.parent(step);
        }
        false
    }

    /// Concatenated text of every text node in the subtree, in order.
    pub fn text_content(&self, node: NodeId) -> String {
        let mut content = String::new();
        self.collect_text(node, &mut content);
        content
    }

    fn collect_text(&self, node: NodeId, out: &mut String) {
        let Some(data) = self.node(node) else { return };
        if let NodeKind::Text(text) = &data.kind {
            out.push_str(text);
        }
        for child in data.children.clone() {
            self.collect_text(child, out);
        }
    }

    // =========================================================================
    // Selectors
    // =========================================================================

    /// `#name` matches an `id` attribute; anything else matches a tag.
    pub fn matches(&self, node: NodeId, selector: &str) -> bool {
        match selector.strip_prefix('#') {
            Some(id) => self.attribute(node, "id").as_deref() == Some(id),
            None => self.tag(node) == Some(selector),
        }
    }

    /// Descendants of `root` (excluding it) matching `selector`, in
    /// document order.
    pub fn query(&self, root: NodeId, selector: &str) -> Vec<NodeId> {
        let mut found = Vec::new();
        for child in self.children(root) {
            self.query_into(child, selector, &mut found);
        }
        found
    }

    fn query_into(&self, node: NodeId, selector: &str, found: &mut Vec<NodeId>) {
        if self.matches(node, selector) {
            found.push(node);
        }
        for child in self.children(node) {
            self.query_into(child, selector, found);
        }
    }

    pub fn query_first(&self, root: NodeId, selector: &str) -> Option<NodeId> {
        self.query(root, selector).into_iter().next()
    }

    // =========================================================================
    // Mutation
    // =========================================================================

    /// Unlink a node from its parent, keeping the subtree alive.
    pub fn detach(&mut self, node: NodeId) {
        let Some(parent) = self.parent(node) else { return };
        if let Some(data) = self.node_mut(parent) {
            data.children.retain(|&child| child != node);
        }
        if let Some(data) = self.node_mut(node) {
            data.parent = None;
        }
    }

    /// Detach and free the whole subtree. Freed indices return to the pool.
    pub fn remove_subtree(&mut self, node: NodeId) {
        self.detach(node);
        self.release(node);
    }

    fn release(&mut self, node: NodeId) {
        let Some(data) = self.nodes.get_mut(node.0).and_then(Option::take) else {
            return;
        };
        for child in data.children {
            self.release(child);
        }
        self.free.push(node.0);
    }

    /// Free every child of `node`, leaving the node itself in place.
    pub fn clear_children(&mut self, node: NodeId) {
        for child in self.children(node) {
            self.release(child);
        }
        if let Some(data) = self.node_mut(node) {
            data.children.clear();
        }
    }

    /// Put the detached node `replacement` where `old` sits, then free
    /// `old`'s subtree. Used to swap a placeholder for a preserved child.
    pub fn replace_node(&mut self, old: NodeId, replacement: NodeId) {
        let Some(parent) = self.parent(old) else { return };
        let position = self
            .node(parent)
            .and_then(|data| data.children.iter().position(|&child| child == old));
        let Some(position) = position else { return };

        if let Some(data) = self.node_mut(replacement) {
            data.parent = Some(parent);
        }
        if let Some(data) = self.node_mut(parent) {
            data.children[position] = replacement;
        }
        if let Some(data) = self.node_mut(old) {
            data.parent = None;
        }
        self.release(old);
    }

    /// Replace the node's content with parsed markup - the "set a node's
    /// content from a markup string" half of the host contract. Lenient:
    /// mismatched closing tags are recovered from, never fatal.
    pub fn set_markup(&mut self, node: NodeId, markup: &str) {
        self.clear_children(node);
        markup::parse_into(self, node, markup);
    }

    /// Serialize the node's content back to markup (inner markup).
    pub fn markup_of(&self, node: NodeId) -> String {
        let mut out = String::new();
        for child in self.children(node) {
            self.serialize(child, &mut out);
        }
        out
    }

    fn serialize(&self, node: NodeId, out: &mut String) {
        let Some(data) = self.node(node) else { return };
        match &data.kind {
            NodeKind::Text(text) => out.push_str(text),
            NodeKind::Element { tag, attributes } => {
                out.push('<');
                out.push_str(tag);
                for (name, value) in attributes {
                    out.push(' ');
                    out.push_str(name);
                    out.push_str("=\"");
                    out.push_str(value);
                    out.push('"');
                }
                out.push('>');
                for child in &data.children {
                    self.serialize(*child, out);
                }
                out.push_str("</");
                out.push_str(tag);
                out.push('>');
            }
        }
    }

    // =========================================================================
    // Events
    // =========================================================================

    /// Attach a listener. Listeners stack: duplicates fire in attachment
    /// order.
    pub fn add_listener(&mut self, node: NodeId, event: &str, listener: Listener) {
        if let Some(data) = self.node_mut(node) {
            data.listeners.push((event.to_string(), listener));
        }
    }

    /// Clone out the listeners for an event so the caller can invoke them
    /// without holding any borrow of the tree.
    pub fn listeners(&self, node: NodeId, event: &str) -> Vec<Listener> {
        self.node(node)
            .map(|data| {
                data.listeners
                    .iter()
                    .filter(|(name, _)| name == event)
                    .map(|(_, listener)| listener.clone())
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl Default for Tree {
    fn default() -> Self {
        Self::new()
    }
}
