//! Owning facade over a document plus its collaborators.
//!
//! [`Document`] keeps the engine and the network behind `&mut dyn` seams so
//! scripts can reenter it; [`Page`] owns concrete instances of both and
//! threads them through every script-aware call, which is the shape most
//! callers want.

use crate::document::{Document, LoadOptions};
use crate::dom::NodeId;
use crate::script::{ResourceFetcher, ScriptEngine};
use crate::{ReportedScriptError, Result};

pub struct Page<E, F> {
    document: Document,
    engine: E,
    fetcher: F,
}

impl<E: ScriptEngine, F: ResourceFetcher> Page<E, F> {
    /// Parses `html` as the document at `url` and runs its scripts to
    /// completion.
    pub fn load(url: &str, html: &str, engine: E, fetcher: F) -> Result<Self> {
        Self::load_with_options(html, engine, fetcher, LoadOptions::with_url(url))
    }

    pub fn load_with_options(
        html: &str,
        mut engine: E,
        mut fetcher: F,
        options: LoadOptions,
    ) -> Result<Self> {
        let mut document = Document::new();
        document.load(&mut engine, &mut fetcher, html, options)?;
        Ok(Self {
            document,
            engine,
            fetcher,
        })
    }

    /// Byte-stream variant; the charset is resolved from the transport
    /// header, a meta sniff, and the option defaults, in that order.
    pub fn load_bytes(
        bytes: &[u8],
        mut engine: E,
        mut fetcher: F,
        options: LoadOptions,
    ) -> Result<Self> {
        let mut document = Document::new();
        document.load_bytes(&mut engine, &mut fetcher, bytes, options)?;
        Ok(Self {
            document,
            engine,
            fetcher,
        })
    }

    pub fn document(&self) -> &Document {
        &self.document
    }

    /// Direct document access for APIs that never run scripts.
    pub fn document_mut(&mut self) -> &mut Document {
        &mut self.document
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut E {
        &mut self.engine
    }

    pub fn fetcher_mut(&mut self) -> &mut F {
        &mut self.fetcher
    }

    pub fn script_errors(&self) -> &[ReportedScriptError] {
        self.document.script_errors()
    }

    // ---- script-aware document calls ------------------------------------

    pub fn write(&mut self, text: &str) -> Result<()> {
        self.document.write(&mut self.engine, &mut self.fetcher, text)
    }

    pub fn writeln(&mut self, text: &str) -> Result<()> {
        self.document
            .writeln(&mut self.engine, &mut self.fetcher, text)
    }

    pub fn open(&mut self) {
        self.document.open();
    }

    pub fn close(&mut self) -> Result<()> {
        self.document.close(&mut self.engine, &mut self.fetcher)
    }

    pub fn append_child(&mut self, parent: NodeId, child: NodeId) -> Result<()> {
        self.document
            .append_child(&mut self.engine, &mut self.fetcher, parent, child)
    }

    pub fn insert_before(
        &mut self,
        parent: NodeId,
        child: NodeId,
        before: Option<NodeId>,
    ) -> Result<()> {
        self.document
            .insert_before(&mut self.engine, &mut self.fetcher, parent, child, before)
    }

    pub fn replace_child(&mut self, parent: NodeId, new: NodeId, old: NodeId) -> Result<()> {
        self.document
            .replace_child(&mut self.engine, &mut self.fetcher, parent, new, old)
    }

    pub fn insert_adjacent_html(
        &mut self,
        target: NodeId,
        position: &str,
        html: &str,
    ) -> Result<()> {
        self.document.insert_adjacent_html(
            &mut self.engine,
            &mut self.fetcher,
            target,
            position,
            html,
        )
    }

    pub fn insert_adjacent_element(
        &mut self,
        target: NodeId,
        position: &str,
        element: NodeId,
    ) -> Result<()> {
        self.document.insert_adjacent_element(
            &mut self.engine,
            &mut self.fetcher,
            target,
            position,
            element,
        )
    }
}
