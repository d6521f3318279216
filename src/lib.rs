//! Reentrant HTML parsing and live DOM engine for deterministic headless
//! browser runtimes.
//!
//! The crate converts a byte or character stream into a mutating node tree
//! while coordinating synchronous script execution that can itself inject
//! more markup mid-parse (`document.write`), and exposes query primitives
//! whose results stay consistent with an arbitrarily mutating tree:
//!
//! - a resumable tokenizer and tree constructor that pause for script
//!   execution and splice script-produced markup into the still-open input
//!   stream;
//! - a script scheduler that orders inline, external, and write-injected
//!   scripts against tree construction;
//! - live collections (`getElementsBy*`) that reflect every subsequent DOM
//!   mutation without being re-queried;
//! - the quirks/limited-quirks/standards classifier driven by the DOCTYPE
//!   token.
//!
//! The scripting engine and the network are external collaborators behind
//! the [`ScriptEngine`] and [`ResourceFetcher`] traits. [`ScriptedEngine`]
//! and [`StaticFetcher`] are deterministic stand-ins for both, which keeps
//! reentrancy testable without a JavaScript runtime.
//!
//! ```
//! use browser_dom::{NullEngine, Page, StaticFetcher};
//!
//! let html = "<!DOCTYPE html><p id='greet'>hello</p>";
//! let mut page = Page::load(
//!     "https://example.test/",
//!     html,
//!     NullEngine,
//!     StaticFetcher::default(),
//! )?;
//! let p = page.document_mut().get_element_by_id("greet").unwrap();
//! assert_eq!(page.document().text_content(p), "hello");
//! assert_eq!(page.document().compat_mode_string(), "CSS1Compat");
//! # browser_dom::Result::Ok(())
//! ```

pub type Result<T> = std::result::Result<T, Error>;

/// API-contract errors surfaced synchronously to callers. Recoverable markup
/// errors never reach this type; the parser resolves them silently.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// Structural mutation that would violate the tree shape, e.g. assigning
    /// a non-`body` element to `document.body` or inserting a node into its
    /// own subtree.
    #[error("hierarchy request error: {0}")]
    HierarchyRequest(String),
    /// `removeChild`/`replaceChild` target that is not actually a child.
    #[error("not found error: {0}")]
    NotFound(String),
    /// Invalid selector or `insertAdjacent*` position string.
    #[error("syntax error: {0}")]
    Syntax(String),
    /// Operation that requires a parent on a detached node.
    #[error("no modification allowed error: {0}")]
    NoModificationAllowed(String),
    /// A `NodeId` that does not address a node in the current document
    /// generation.
    #[error("detached node: {0}")]
    DetachedNode(String),
}

mod collections;
mod compat;
mod document;
mod dom;
mod encoding;
mod page;
mod parser;
mod script;
mod selector;
mod tokenizer;
mod treebuilder;

pub use collections::LiveCollection;
pub use compat::CompatMode;
pub use document::{
    AdjacentPosition, Doctype, Document, LoadOptions, ReadyState, ReportedScriptError,
};
pub use dom::{Attr, NodeId};
pub use page::Page;
pub use script::{
    FetchError, FetchResponse, NullEngine, ResourceFetcher, ScriptEngine, ScriptError,
    ScriptOrigin, ScriptTask, ScriptedEngine, StaticFetcher, TaskState,
};
