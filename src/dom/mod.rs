//! Arena-backed DOM tree.
//!
//! Nodes live in a flat arena addressed by [`NodeId`]; parent and sibling
//! relationships are ids into the arena, never owning pointers, so the tree
//! is acyclic by construction. Every structural or attribute mutation bumps
//! the document-wide mutation version consulted by live collections.

use crate::{Error, Result};

mod mutate;
mod serialize;

/// Stable handle to a node in the document arena. A handle carries the
/// generation of the arena that minted it; after `document.open()` rebuilds
/// the tree, handles from the discarded generation stop resolving instead of
/// aliasing unrelated nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(pub(crate) usize, pub(crate) u64);

#[derive(Debug, Clone)]
pub(crate) enum NodeKind {
    Document,
    DocumentType {
        name: String,
        public_id: Option<String>,
        system_id: Option<String>,
    },
    Element(Element),
    Text(String),
    Comment(String),
}

/// A name/value attribute pair, the unit `setAttributeNode` works in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attr {
    pub name: String,
    pub value: String,
}

impl Attr {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct Element {
    pub(crate) tag_name: String,
    // Insertion order matters for serialization; lookup is by name.
    pub(crate) attrs: Vec<Attr>,
    pub(crate) parser_inserted: bool,
    pub(crate) already_started: bool,
}

impl Element {
    pub(crate) fn new(tag_name: String, attrs: Vec<Attr>) -> Self {
        Self {
            tag_name,
            attrs,
            parser_inserted: false,
            already_started: false,
        }
    }

    pub(crate) fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|attr| attr.name.eq_ignore_ascii_case(name))
            .map(|attr| attr.value.as_str())
    }
}

#[derive(Debug, Clone)]
pub(crate) struct Node {
    pub(crate) parent: Option<NodeId>,
    pub(crate) children: Vec<NodeId>,
    pub(crate) kind: NodeKind,
}

#[derive(Debug, Clone)]
pub(crate) struct Dom {
    pub(crate) nodes: Vec<Node>,
    pub(crate) root: NodeId,
    generation: u64,
    version: u64,
}

impl Dom {
    pub(crate) fn new() -> Self {
        Self::in_generation(0)
    }

    /// A fresh arena stamped with a document generation; ids from other
    /// generations do not resolve against it.
    pub(crate) fn in_generation(generation: u64) -> Self {
        let root = Node {
            parent: None,
            children: Vec::new(),
            kind: NodeKind::Document,
        };
        Self {
            nodes: vec![root],
            root: NodeId(0, generation),
            generation,
            version: 0,
        }
    }

    pub(crate) fn version(&self) -> u64 {
        self.version
    }

    pub(crate) fn bump_version(&mut self) {
        self.version += 1;
    }

    fn slot(&self, id: NodeId) -> Option<usize> {
        (id.1 == self.generation && id.0 < self.nodes.len()).then_some(id.0)
    }

    pub(crate) fn node(&self, id: NodeId) -> Result<&Node> {
        self.slot(id).map(|slot| &self.nodes[slot]).ok_or_else(|| {
            Error::DetachedNode(format!("node #{} is not in this document", id.0))
        })
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> Result<&mut Node> {
        match self.slot(id) {
            Some(slot) => Ok(&mut self.nodes[slot]),
            None => Err(Error::DetachedNode(format!(
                "node #{} is not in this document",
                id.0
            ))),
        }
    }

    fn push_node(&mut self, kind: NodeKind) -> NodeId {
        let id = NodeId(self.nodes.len(), self.generation);
        self.nodes.push(Node {
            parent: None,
            children: Vec::new(),
            kind,
        });
        id
    }

    /// Creates a detached element. Tag names are stored case-normalized.
    pub(crate) fn create_element(&mut self, tag_name: &str, attrs: Vec<Attr>) -> NodeId {
        self.push_node(NodeKind::Element(Element::new(
            tag_name.to_ascii_lowercase(),
            attrs,
        )))
    }

    pub(crate) fn create_text(&mut self, text: String) -> NodeId {
        self.push_node(NodeKind::Text(text))
    }

    pub(crate) fn create_comment(&mut self, text: String) -> NodeId {
        self.push_node(NodeKind::Comment(text))
    }

    pub(crate) fn create_doctype(
        &mut self,
        name: String,
        public_id: Option<String>,
        system_id: Option<String>,
    ) -> NodeId {
        self.push_node(NodeKind::DocumentType {
            name,
            public_id,
            system_id,
        })
    }

    pub(crate) fn element(&self, id: NodeId) -> Option<&Element> {
        match &self.nodes[self.slot(id)?].kind {
            NodeKind::Element(element) => Some(element),
            _ => None,
        }
    }

    pub(crate) fn element_mut(&mut self, id: NodeId) -> Option<&mut Element> {
        let slot = self.slot(id)?;
        match &mut self.nodes[slot].kind {
            NodeKind::Element(element) => Some(element),
            _ => None,
        }
    }

    pub(crate) fn is_element(&self, id: NodeId) -> bool {
        self.element(id).is_some()
    }

    pub(crate) fn tag_name(&self, id: NodeId) -> Option<&str> {
        self.element(id).map(|element| element.tag_name.as_str())
    }

    pub(crate) fn attr(&self, id: NodeId, name: &str) -> Option<&str> {
        self.element(id)?.attr(name)
    }

    pub(crate) fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[self.slot(id)?].parent
    }

    pub(crate) fn children(&self, id: NodeId) -> &[NodeId] {
        self.slot(id)
            .map(|slot| self.nodes[slot].children.as_slice())
            .unwrap_or(&[])
    }

    pub(crate) fn previous_sibling(&self, id: NodeId) -> Option<NodeId> {
        let parent = self.parent(id)?;
        let siblings = self.children(parent);
        let index = siblings.iter().position(|&sibling| sibling == id)?;
        index.checked_sub(1).map(|before| siblings[before])
    }

    pub(crate) fn next_sibling(&self, id: NodeId) -> Option<NodeId> {
        let parent = self.parent(id)?;
        let siblings = self.children(parent);
        let index = siblings.iter().position(|&sibling| sibling == id)?;
        siblings.get(index + 1).copied()
    }

    /// True when `candidate` is `node` itself or one of its ancestors.
    pub(crate) fn is_inclusive_ancestor(&self, candidate: NodeId, node: NodeId) -> bool {
        let mut cursor = Some(node);
        while let Some(id) = cursor {
            if id == candidate {
                return true;
            }
            cursor = self.parent(id);
        }
        false
    }

    /// True when the node is reachable from the document root.
    pub(crate) fn is_connected(&self, id: NodeId) -> bool {
        self.is_inclusive_ancestor(self.root, id)
    }

    pub(crate) fn has_ancestor_with_tag(&self, id: NodeId, tag: &str) -> bool {
        let mut cursor = self.parent(id);
        while let Some(ancestor) = cursor {
            if self.tag_name(ancestor).is_some_and(|t| t == tag) {
                return true;
            }
            cursor = self.parent(ancestor);
        }
        false
    }

    /// Preorder (document order) walk of the subtree rooted at `scope`,
    /// excluding `scope` itself.
    pub(crate) fn descendants(&self, scope: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut pending: Vec<NodeId> = self
            .children(scope)
            .iter()
            .rev()
            .copied()
            .collect();
        while let Some(id) = pending.pop() {
            out.push(id);
            for &child in self.children(id).iter().rev() {
                pending.push(child);
            }
        }
        out
    }

    pub(crate) fn descendant_elements(&self, scope: NodeId) -> Vec<NodeId> {
        self.descendants(scope)
            .into_iter()
            .filter(|&id| self.is_element(id))
            .collect()
    }

    /// First element in document order whose `id` attribute equals `value`.
    /// Duplicate ids may exist in the tree; only position decides.
    pub(crate) fn element_by_id(&self, value: &str) -> Option<NodeId> {
        if value.is_empty() {
            return None;
        }
        self.descendant_elements(self.root)
            .into_iter()
            .find(|&id| self.attr(id, "id") == Some(value))
    }

    pub(crate) fn first_element_with_tag(&self, scope: NodeId, tag: &str) -> Option<NodeId> {
        self.descendant_elements(scope)
            .into_iter()
            .find(|&id| self.tag_name(id) == Some(tag))
    }

    /// The `body` or `frameset` child of the `html` element, if any.
    pub(crate) fn body(&self) -> Option<NodeId> {
        let html = self.html_element()?;
        self.children(html)
            .iter()
            .copied()
            .find(|&child| matches!(self.tag_name(child), Some("body") | Some("frameset")))
    }

    pub(crate) fn html_element(&self) -> Option<NodeId> {
        self.children(self.root)
            .iter()
            .copied()
            .find(|&child| self.tag_name(child) == Some("html"))
    }

    /// The doctype node's name and identifiers, when the markup had one.
    pub(crate) fn doctype(&self) -> Option<(&str, Option<&str>, Option<&str>)> {
        self.children(self.root).iter().find_map(|&child| {
            match &self.nodes[self.slot(child)?].kind {
                NodeKind::DocumentType {
                    name,
                    public_id,
                    system_id,
                } => Some((name.as_str(), public_id.as_deref(), system_id.as_deref())),
                _ => None,
            }
        })
    }
}
