//! Structural and attribute mutation primitives.
//!
//! Each public mutation bumps the document mutation version exactly once.
//! Structural errors are surfaced as typed errors and leave the tree
//! unchanged.

use super::{Attr, Dom, NodeId, NodeKind};
use crate::{Error, Result};

impl Dom {
    /// Appends `child` as the last child of `parent`, detaching it from any
    /// previous parent first.
    pub(crate) fn append_child(&mut self, parent: NodeId, child: NodeId) -> Result<()> {
        self.insert_at(parent, None, child)
    }

    /// Inserts `child` immediately before `before` under `parent`. `None`
    /// appends at the end.
    pub(crate) fn insert_before(
        &mut self,
        parent: NodeId,
        child: NodeId,
        before: Option<NodeId>,
    ) -> Result<()> {
        let index = match before {
            None => None,
            Some(reference) => Some(self.child_index(parent, reference).ok_or_else(|| {
                Error::NotFound("insertBefore reference node is not a child".into())
            })?),
        };
        self.insert_at(parent, index, child)
    }

    fn insert_at(&mut self, parent: NodeId, index: Option<usize>, child: NodeId) -> Result<()> {
        self.node(parent)?;
        self.node(child)?;
        if child == self.root {
            return Err(Error::HierarchyRequest(
                "the document node cannot be inserted".into(),
            ));
        }
        if self.is_inclusive_ancestor(child, parent) {
            return Err(Error::HierarchyRequest(
                "cannot insert a node into its own subtree".into(),
            ));
        }
        // Detaching can shift the insertion index when old and new parent
        // are the same node.
        let index = match index {
            Some(index) => {
                let shift = self.parent(child) == Some(parent)
                    && self.child_index(parent, child).is_some_and(|old| old < index);
                Some(if shift { index - 1 } else { index })
            }
            None => None,
        };
        self.detach(child);
        let children = &mut self.node_mut(parent)?.children;
        match index {
            Some(index) if index <= children.len() => children.insert(index, child),
            _ => children.push(child),
        }
        self.node_mut(child)?.parent = Some(parent);
        self.bump_version();
        Ok(())
    }

    /// Removes `child` from `parent`. Fails with a NotFound error when
    /// `child` is not an actual child.
    pub(crate) fn remove_child(&mut self, parent: NodeId, child: NodeId) -> Result<()> {
        if self.parent(child) != Some(parent) {
            return Err(Error::NotFound(
                "removeChild target is not a child of this node".into(),
            ));
        }
        self.detach(child);
        self.bump_version();
        Ok(())
    }

    /// Replaces `old` with `new` under `parent`.
    pub(crate) fn replace_child(
        &mut self,
        parent: NodeId,
        new: NodeId,
        old: NodeId,
    ) -> Result<()> {
        let Some(index) = self.child_index(parent, old) else {
            return Err(Error::NotFound(
                "replaceChild target is not a child of this node".into(),
            ));
        };
        if self.is_inclusive_ancestor(new, parent) {
            return Err(Error::HierarchyRequest(
                "cannot insert a node into its own subtree".into(),
            ));
        }
        self.detach(new);
        // `old` keeps its slot until `new` takes it, so the index stays
        // valid even when both share this parent.
        let index = self
            .child_index(parent, old)
            .unwrap_or(index);
        self.detach(old);
        let children = &mut self.node_mut(parent)?.children;
        if index <= children.len() {
            children.insert(index, new);
        } else {
            children.push(new);
        }
        self.node_mut(new)?.parent = Some(parent);
        self.bump_version();
        Ok(())
    }

    /// Unlinks a node from its parent without a version bump; callers that
    /// expose detachment bump themselves.
    pub(crate) fn detach(&mut self, id: NodeId) {
        let Some(parent) = self.parent(id) else {
            return;
        };
        if let Ok(node) = self.node_mut(parent) {
            node.children.retain(|&child| child != id);
        }
        if let Ok(node) = self.node_mut(id) {
            node.parent = None;
        }
    }

    /// Removes every child of `parent` in one version bump.
    pub(crate) fn remove_all_children(&mut self, parent: NodeId) -> Result<()> {
        let children: Vec<NodeId> = self.children(parent).to_vec();
        for child in children {
            self.detach(child);
        }
        self.bump_version();
        Ok(())
    }

    pub(crate) fn child_index(&self, parent: NodeId, child: NodeId) -> Option<usize> {
        self.children(parent)
            .iter()
            .position(|&candidate| candidate == child)
    }

    pub(crate) fn set_attribute(&mut self, id: NodeId, name: &str, value: &str) -> Result<()> {
        self.node(id)?;
        let name = name.to_ascii_lowercase();
        let element = self
            .element_mut(id)
            .ok_or_else(|| Error::NoModificationAllowed("attribute target is not an element".into()))?;
        match element
            .attrs
            .iter_mut()
            .find(|attr| attr.name == name)
        {
            Some(attr) => attr.value = value.to_string(),
            None => element.attrs.push(Attr {
                name,
                value: value.to_string(),
            }),
        }
        self.bump_version();
        Ok(())
    }

    /// Installs a whole attribute node, returning the one it displaced.
    /// Names are case-normalized like `set_attribute`.
    pub(crate) fn set_attribute_node(&mut self, id: NodeId, attr: Attr) -> Result<Option<Attr>> {
        self.node(id)?;
        let name = attr.name.to_ascii_lowercase();
        let element = self
            .element_mut(id)
            .ok_or_else(|| Error::NoModificationAllowed("attribute target is not an element".into()))?;
        let incoming = Attr {
            name: name.clone(),
            value: attr.value,
        };
        let replaced = match element.attrs.iter_mut().find(|existing| existing.name == name) {
            Some(existing) => Some(std::mem::replace(existing, incoming)),
            None => {
                element.attrs.push(incoming);
                None
            }
        };
        self.bump_version();
        Ok(replaced)
    }

    pub(crate) fn remove_attribute(&mut self, id: NodeId, name: &str) -> Result<()> {
        self.node(id)?;
        let name = name.to_ascii_lowercase();
        let element = self
            .element_mut(id)
            .ok_or_else(|| Error::NoModificationAllowed("attribute target is not an element".into()))?;
        element.attrs.retain(|attr| attr.name != name);
        self.bump_version();
        Ok(())
    }

    /// Copies attributes from `attrs` that the element does not already
    /// have. Used when a stray `<html>`/`<body>` start tag merges into the
    /// existing element.
    pub(crate) fn merge_missing_attributes(&mut self, id: NodeId, attrs: &[Attr]) {
        let Some(element) = self.element_mut(id) else {
            return;
        };
        let mut added = false;
        for attr in attrs {
            if element.attr(&attr.name).is_none() {
                element.attrs.push(attr.clone());
                added = true;
            }
        }
        if added {
            self.bump_version();
        }
    }

    /// Sets the text content of a node: all children replaced by a single
    /// text node (or nothing for empty text). One version bump.
    pub(crate) fn set_text_content(&mut self, id: NodeId, text: &str) -> Result<()> {
        match &mut self.node_mut(id)?.kind {
            NodeKind::Text(existing) => {
                *existing = text.to_string();
                self.bump_version();
                return Ok(());
            }
            NodeKind::Comment(existing) => {
                *existing = text.to_string();
                self.bump_version();
                return Ok(());
            }
            _ => {}
        }
        let children: Vec<NodeId> = self.children(id).to_vec();
        for child in children {
            self.detach(child);
        }
        if !text.is_empty() {
            let node = self.create_text(text.to_string());
            let children = &mut self.node_mut(id)?.children;
            children.push(node);
            self.node_mut(node)?.parent = Some(id);
        }
        self.bump_version();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remove_child_of_other_parent_is_not_found() -> Result<()> {
        let mut dom = Dom::new();
        let a = dom.create_element("div", Vec::new());
        let b = dom.create_element("span", Vec::new());
        dom.append_child(dom.root, a)?;
        assert_eq!(
            dom.remove_child(a, b),
            Err(Error::NotFound(
                "removeChild target is not a child of this node".into()
            ))
        );
        Ok(())
    }

    #[test]
    fn inserting_into_own_subtree_is_rejected_and_tree_unchanged() -> Result<()> {
        let mut dom = Dom::new();
        let outer = dom.create_element("div", Vec::new());
        let inner = dom.create_element("span", Vec::new());
        dom.append_child(dom.root, outer)?;
        dom.append_child(outer, inner)?;
        let version = dom.version();
        assert!(matches!(
            dom.append_child(inner, outer),
            Err(Error::HierarchyRequest(_))
        ));
        assert_eq!(dom.version(), version);
        assert_eq!(dom.parent(inner), Some(outer));
        Ok(())
    }

    #[test]
    fn insert_before_positions_relative_to_reference() -> Result<()> {
        let mut dom = Dom::new();
        let a = dom.create_element("a", Vec::new());
        let b = dom.create_element("b", Vec::new());
        let c = dom.create_element("c", Vec::new());
        dom.append_child(dom.root, a)?;
        dom.append_child(dom.root, b)?;
        dom.insert_before(dom.root, c, Some(b))?;
        assert_eq!(dom.children(dom.root), &[a, c, b]);
        Ok(())
    }

    #[test]
    fn reinserting_earlier_sibling_adjusts_index() -> Result<()> {
        let mut dom = Dom::new();
        let a = dom.create_element("a", Vec::new());
        let b = dom.create_element("b", Vec::new());
        let c = dom.create_element("c", Vec::new());
        dom.append_child(dom.root, a)?;
        dom.append_child(dom.root, b)?;
        dom.append_child(dom.root, c)?;
        // Move `a` to sit immediately before `c`.
        dom.insert_before(dom.root, a, Some(c))?;
        assert_eq!(dom.children(dom.root), &[b, a, c]);
        Ok(())
    }

    #[test]
    fn replace_child_swaps_in_place() -> Result<()> {
        let mut dom = Dom::new();
        let a = dom.create_element("a", Vec::new());
        let b = dom.create_element("b", Vec::new());
        let c = dom.create_element("c", Vec::new());
        dom.append_child(dom.root, a)?;
        dom.append_child(dom.root, b)?;
        dom.replace_child(dom.root, c, a)?;
        assert_eq!(dom.children(dom.root), &[c, b]);
        assert_eq!(dom.parent(a), None);
        Ok(())
    }

    #[test]
    fn every_mutation_bumps_the_version_once() -> Result<()> {
        let mut dom = Dom::new();
        let a = dom.create_element("div", Vec::new());
        let creations = dom.version();
        dom.append_child(dom.root, a)?;
        assert_eq!(dom.version(), creations + 1);
        dom.set_attribute(a, "class", "x")?;
        assert_eq!(dom.version(), creations + 2);
        dom.remove_attribute(a, "class")?;
        assert_eq!(dom.version(), creations + 3);
        dom.remove_child(dom.root, a)?;
        assert_eq!(dom.version(), creations + 4);
        Ok(())
    }

    #[test]
    fn attribute_node_swap_returns_the_displaced_attribute() -> Result<()> {
        let mut dom = Dom::new();
        let a = dom.create_element("input", Vec::new());
        dom.append_child(dom.root, a)?;

        let version = dom.version();
        assert_eq!(dom.set_attribute_node(a, Attr::new("NAME", "q"))?, None);
        assert_eq!(dom.version(), version + 1);
        assert_eq!(dom.attr(a, "name"), Some("q"));

        let replaced = dom.set_attribute_node(a, Attr::new("name", "renamed"))?;
        assert_eq!(replaced, Some(Attr::new("name", "q")));
        assert_eq!(dom.attr(a, "name"), Some("renamed"));
        assert_eq!(dom.element(a).map(|el| el.attrs.len()), Some(1));
        Ok(())
    }

    #[test]
    fn attribute_names_are_case_normalized() -> Result<()> {
        let mut dom = Dom::new();
        let a = dom.create_element("div", Vec::new());
        dom.set_attribute(a, "CLASS", "x")?;
        assert_eq!(dom.attr(a, "class"), Some("x"));
        dom.set_attribute(a, "class", "y")?;
        assert_eq!(dom.element(a).map(|el| el.attrs.len()), Some(1));
        assert_eq!(dom.attr(a, "Class"), Some("y"));
        Ok(())
    }
}
