//! Live collections: predicate views over the tree that are always current.
//!
//! A collection never snapshots. Each access compares the version it last
//! computed against the document mutation version and rewalks its scope on
//! mismatch. Handles are interned per `(scope, predicate)` pair, so asking
//! twice for the same view yields the same object, while a document-scoped
//! and an element-scoped view of the same predicate stay distinct.

use std::collections::HashMap;

use crate::dom::{Dom, NodeId};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) enum Predicate {
    /// `*` matches every element.
    TagName(String),
    /// Space-separated token set; all query tokens must be present.
    ClassName(String),
    /// Exact match on the `name` attribute.
    NameAttr(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum Scope {
    Document,
    Element(NodeId),
}

/// Handle to an interned live collection. Equality is object identity:
/// two handles are equal exactly when they denote the same cached view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LiveCollection(pub(crate) usize);

#[derive(Debug)]
struct CollectionState {
    scope: Scope,
    predicate: Predicate,
    cached: Vec<NodeId>,
    seen_version: Option<u64>,
    // Element-scoped views whose document was reset by `open()` stay empty.
    orphaned: bool,
}

#[derive(Debug, Default)]
pub(crate) struct CollectionRegistry {
    states: Vec<CollectionState>,
    interned: HashMap<(Scope, Predicate), usize>,
}

impl CollectionRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn get(&mut self, scope: Scope, predicate: Predicate) -> LiveCollection {
        let key = (scope, predicate.clone());
        if let Some(&index) = self.interned.get(&key) {
            return LiveCollection(index);
        }
        let index = self.states.len();
        self.states.push(CollectionState {
            scope,
            predicate,
            cached: Vec::new(),
            seen_version: None,
            orphaned: false,
        });
        self.interned.insert(key, index);
        LiveCollection(index)
    }

    /// Current members, recomputed first when the tree moved on.
    pub(crate) fn refresh(&mut self, handle: LiveCollection, dom: &Dom) -> &[NodeId] {
        let Some(state) = self.states.get_mut(handle.0) else {
            return &[];
        };
        if state.orphaned {
            return &[];
        }
        let version = dom.version();
        if state.seen_version != Some(version) {
            let scope = match state.scope {
                Scope::Document => dom.root,
                Scope::Element(id) => id,
            };
            state.cached = dom
                .descendant_elements(scope)
                .into_iter()
                .filter(|&id| predicate_matches(dom, id, &state.predicate))
                .collect();
            state.seen_version = Some(version);
        }
        &state.cached
    }

    /// `document.open()` reset: document-scoped views rebind to the fresh
    /// tree, element-scoped views are orphaned and stay empty.
    pub(crate) fn rebind_after_open(&mut self) {
        for state in &mut self.states {
            state.cached.clear();
            state.seen_version = None;
            if matches!(state.scope, Scope::Element(_)) {
                state.orphaned = true;
            }
        }
    }
}

fn predicate_matches(dom: &Dom, id: NodeId, predicate: &Predicate) -> bool {
    match predicate {
        Predicate::TagName(tag) => {
            tag == "*" || dom.tag_name(id) == Some(tag.as_str())
        }
        Predicate::ClassName(query) => {
            let mut wanted = query.split_ascii_whitespace().peekable();
            if wanted.peek().is_none() {
                return false;
            }
            let Some(class) = dom.attr(id, "class") else {
                return false;
            };
            wanted.all(|token| class.split_ascii_whitespace().any(|have| have == token))
        }
        Predicate::NameAttr(name) => {
            !name.is_empty() && dom.attr(id, "name") == Some(name.as_str())
        }
    }
}
