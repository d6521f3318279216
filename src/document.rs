//! The document: root owner of the tree, the active parse, the script
//! queue, and the live collection registry.
//!
//! All reentrancy funnels through here. A script engine executing a task
//! receives `&mut Document` and may call back into `write`/`writeln`/
//! `open`/`close` and any mutation API on the same stack; the document keeps
//! the ordering guarantees straight (write-spliced input before the
//! original stream, document-order script execution with the
//! postponed-behind-pending-external exception).

use chrono::{DateTime, FixedOffset, Offset, Utc};
use encoding_rs::{Encoding, UTF_8};
use url::Url;

use crate::collections::{CollectionRegistry, LiveCollection, Predicate, Scope};
use crate::compat::CompatMode;
use crate::dom::{Attr, Dom, NodeId};
use crate::encoding::{decode, resolve_encoding};
use crate::parser::{parse_fragment, ParserState, PumpEvent};
use crate::script::{
    is_executable_script_type, ResourceFetcher, Scheduler, ScriptEngine, ScriptOrigin,
    ScriptTask, TaskState,
};
use crate::{selector, Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyState {
    Loading,
    Complete,
}

impl ReadyState {
    pub fn as_dom_string(self) -> &'static str {
        match self {
            Self::Loading => "loading",
            Self::Complete => "complete",
        }
    }
}

/// Script failure surfaced to the error-reporting collaborator. Recorded on
/// the document; never aborts parsing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportedScriptError {
    pub node: NodeId,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdjacentPosition {
    BeforeBegin,
    AfterBegin,
    BeforeEnd,
    AfterEnd,
}

impl AdjacentPosition {
    pub fn parse(position: &str) -> Result<Self> {
        let lower = position.trim().to_ascii_lowercase();
        match lower.as_str() {
            "beforebegin" => Ok(Self::BeforeBegin),
            "afterbegin" => Ok(Self::AfterBegin),
            "beforeend" => Ok(Self::BeforeEnd),
            "afterend" => Ok(Self::AfterEnd),
            _ => Err(Error::Syntax(format!(
                "invalid insertAdjacent position: {position}"
            ))),
        }
    }
}

/// The parsed `<!DOCTYPE>` declaration. Identifiers the markup never wrote
/// stay `None`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Doctype {
    pub name: String,
    pub public_id: Option<String>,
    pub system_id: Option<String>,
}

/// Per-load parameters: document url, charset hints, and the header-derived
/// inputs feeding `lastModified`. The clock is injectable so runs are
/// deterministic.
#[derive(Debug, Clone)]
pub struct LoadOptions {
    pub url: Option<String>,
    pub transport_charset: Option<String>,
    pub default_charset: Option<String>,
    pub last_modified_header: Option<String>,
    pub date_header: Option<String>,
    pub time_zone: FixedOffset,
    pub now: Option<DateTime<FixedOffset>>,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            url: None,
            transport_charset: None,
            default_charset: None,
            last_modified_header: None,
            date_header: None,
            time_zone: Utc.fix(),
            now: None,
        }
    }
}

impl LoadOptions {
    pub fn with_url(url: &str) -> Self {
        Self {
            url: Some(url.to_string()),
            ..Self::default()
        }
    }
}

#[derive(Debug)]
pub struct Document {
    dom: Dom,
    compat: Option<CompatMode>,
    url: Option<Url>,
    encoding: &'static Encoding,
    // Bumped by every `open()` reset; stale script tasks are no-ops.
    generation: u64,
    parser: Option<ParserState>,
    scheduler: Scheduler,
    collections: CollectionRegistry,
    ready_state: ReadyState,
    script_errors: Vec<ReportedScriptError>,
    last_modified: String,
    write_depth: usize,
    draining: bool,
    main_pump_active: bool,
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl Document {
    pub fn new() -> Self {
        Self {
            dom: Dom::new(),
            compat: None,
            url: None,
            encoding: UTF_8,
            generation: 0,
            parser: None,
            scheduler: Scheduler::new(),
            collections: CollectionRegistry::new(),
            ready_state: ReadyState::Loading,
            script_errors: Vec::new(),
            last_modified: String::new(),
            write_depth: 0,
            draining: false,
            main_pump_active: false,
        }
    }

    // ---- loading ---------------------------------------------------------

    pub fn load(
        &mut self,
        engine: &mut dyn ScriptEngine,
        fetcher: &mut dyn ResourceFetcher,
        html: &str,
        options: LoadOptions,
    ) -> Result<()> {
        self.begin_load(&options, UTF_8);
        self.run_main_parse(engine, fetcher, html)
    }

    /// Byte-stream entry. Charset priority: transport header, then a meta
    /// sniff of the first kilobyte, then the caller default, then
    /// windows-1252.
    pub fn load_bytes(
        &mut self,
        engine: &mut dyn ScriptEngine,
        fetcher: &mut dyn ResourceFetcher,
        bytes: &[u8],
        options: LoadOptions,
    ) -> Result<()> {
        let default = options
            .default_charset
            .as_deref()
            .and_then(|label| Encoding::for_label(label.trim().as_bytes()));
        let encoding = resolve_encoding(options.transport_charset.as_deref(), bytes, default);
        let text = decode(bytes, encoding);
        self.begin_load(&options, encoding);
        self.run_main_parse(engine, fetcher, &text)
    }

    fn begin_load(&mut self, options: &LoadOptions, encoding: &'static Encoding) {
        self.generation += 1;
        self.dom = Dom::in_generation(self.generation);
        self.collections.rebind_after_open();
        self.compat = None;
        self.scheduler.clear();
        self.script_errors.clear();
        self.ready_state = ReadyState::Loading;
        self.encoding = encoding;
        self.url = options.url.as_deref().and_then(|raw| match Url::parse(raw) {
            Ok(url) => Some(url),
            Err(err) => {
                log::debug!("unparseable document url {raw}: {err}");
                None
            }
        });
        self.last_modified = compute_last_modified(options);
        self.parser = Some(ParserState::new());
    }

    fn run_main_parse(
        &mut self,
        engine: &mut dyn ScriptEngine,
        fetcher: &mut dyn ResourceFetcher,
        html: &str,
    ) -> Result<()> {
        if let Some(parser) = self.parser.as_mut() {
            parser.push_input(html);
        }
        self.main_pump_active = true;
        let pumped = self.pump(engine, fetcher, 0);
        self.main_pump_active = false;
        pumped?;
        self.finish_parse(engine, fetcher)
    }

    // ---- write / open / close -------------------------------------------

    /// Splices `text` at the current parse position. Outside an active
    /// parse this implies `open()`: the old tree is gone and a fresh parse
    /// starts from the written string.
    pub fn write(
        &mut self,
        engine: &mut dyn ScriptEngine,
        fetcher: &mut dyn ResourceFetcher,
        text: &str,
    ) -> Result<()> {
        if !self.is_parsing() {
            self.open();
        }
        let Some(parser) = self.parser.as_mut() else {
            return Ok(());
        };
        let floor = parser.push_input(text);
        self.write_depth += 1;
        let pumped = self.pump(engine, fetcher, floor);
        self.write_depth -= 1;
        pumped?;
        if self.write_depth == 0 {
            self.drain(engine, fetcher)?;
        }
        Ok(())
    }

    pub fn writeln(
        &mut self,
        engine: &mut dyn ScriptEngine,
        fetcher: &mut dyn ResourceFetcher,
        text: &str,
    ) -> Result<()> {
        let mut line = text.to_string();
        line.push('\n');
        self.write(engine, fetcher, &line)
    }

    /// Discards the document and starts over: new generation, fresh tree,
    /// collections rebound, compat mode reset. A no-op during an active
    /// parse.
    pub fn open(&mut self) {
        if self.is_parsing() {
            return;
        }
        self.generation += 1;
        self.dom = Dom::in_generation(self.generation);
        self.collections.rebind_after_open();
        self.compat = None;
        self.scheduler.clear();
        self.script_errors.clear();
        self.ready_state = ReadyState::Loading;
        self.parser = Some(ParserState::new());
    }

    /// Ends a script-opened parse: flushes buffered input, finalizes compat
    /// mode, drains remaining scripts, and completes readiness. Ignored
    /// while the original load is still parsing.
    pub fn close(
        &mut self,
        engine: &mut dyn ScriptEngine,
        fetcher: &mut dyn ResourceFetcher,
    ) -> Result<()> {
        if self.main_pump_active || self.write_depth > 0 {
            return Ok(());
        }
        if !self.is_parsing() {
            return Ok(());
        }
        self.finish_parse(engine, fetcher)
    }

    pub fn is_parsing(&self) -> bool {
        self.parser.as_ref().is_some_and(|parser| parser.active)
    }

    fn finish_parse(
        &mut self,
        engine: &mut dyn ScriptEngine,
        fetcher: &mut dyn ResourceFetcher,
    ) -> Result<()> {
        let scripts = match self.parser.as_mut() {
            Some(parser) => parser.finish(&mut self.dom, &mut self.compat)?,
            None => Vec::new(),
        };
        for id in scripts {
            self.parser_script(engine, fetcher, id)?;
        }
        self.compat.get_or_insert(CompatMode::Quirks);
        self.drain(engine, fetcher)?;
        self.ready_state = ReadyState::Complete;
        Ok(())
    }

    fn pump(
        &mut self,
        engine: &mut dyn ScriptEngine,
        fetcher: &mut dyn ResourceFetcher,
        floor: usize,
    ) -> Result<()> {
        loop {
            let event = {
                let Some(parser) = self.parser.as_mut() else {
                    return Ok(());
                };
                if !parser.active {
                    return Ok(());
                }
                parser.pump_step(&mut self.dom, &mut self.compat, floor)?
            };
            match event {
                PumpEvent::NeedInput => return Ok(()),
                PumpEvent::Script(id) => self.parser_script(engine, fetcher, id)?,
            }
        }
    }

    // ---- script scheduling ----------------------------------------------

    fn parser_script(
        &mut self,
        engine: &mut dyn ScriptEngine,
        fetcher: &mut dyn ResourceFetcher,
        id: NodeId,
    ) -> Result<()> {
        let Some(element) = self.dom.element(id) else {
            return Ok(());
        };
        if element.already_started {
            return Ok(());
        }
        let type_attr = element.attr("type").map(str::to_string);
        let src = element.attr("src").map(str::to_string);
        if !is_executable_script_type(type_attr.as_deref()) {
            return Ok(());
        }
        if let Some(element) = self.dom.element_mut(id) {
            element.already_started = true;
        }
        let task = match src {
            Some(src) => {
                let url = self.resolve_href(&src).unwrap_or(src);
                ScriptTask::new(
                    id,
                    ScriptOrigin::External { url },
                    String::new(),
                    self.generation,
                )
            }
            None => {
                let origin = if self.write_depth > 0 {
                    ScriptOrigin::WriteInjected
                } else {
                    ScriptOrigin::Inline
                };
                ScriptTask::new(id, origin, self.dom.text_content(id), self.generation)
            }
        };
        if self.write_depth > 0 {
            // Scripts discovered through `document.write` run nested and
            // immediately, unless an earlier script is still queued (the
            // pending-external window): those are postponed behind it.
            let external = matches!(task.origin, ScriptOrigin::External { .. });
            if external || !self.scheduler.is_empty() {
                self.scheduler.push(task);
                return Ok(());
            }
            return self.run_task(engine, fetcher, task);
        }
        self.scheduler.push(task);
        self.drain(engine, fetcher)
    }

    fn drain(
        &mut self,
        engine: &mut dyn ScriptEngine,
        fetcher: &mut dyn ResourceFetcher,
    ) -> Result<()> {
        if self.draining {
            return Ok(());
        }
        self.draining = true;
        let outcome = loop {
            let Some(task) = self.scheduler.pop() else {
                break Ok(());
            };
            if let Err(err) = self.run_task(engine, fetcher, task) {
                break Err(err);
            }
        };
        self.draining = false;
        outcome
    }

    fn run_task(
        &mut self,
        engine: &mut dyn ScriptEngine,
        fetcher: &mut dyn ResourceFetcher,
        mut task: ScriptTask,
    ) -> Result<()> {
        if task.generation != self.generation {
            log::debug!("dropping script task for an abandoned document generation");
            return Ok(());
        }
        if let ScriptOrigin::External { url } = &task.origin {
            match fetcher.fetch(url) {
                Ok(response) => {
                    let encoding = response
                        .charset
                        .as_deref()
                        .and_then(|label| Encoding::for_label(label.trim().as_bytes()))
                        .unwrap_or(UTF_8);
                    task.source = decode(&response.body, encoding);
                    task.state = TaskState::Ready;
                }
                Err(err) => {
                    log::warn!("external script skipped: {err}");
                    task.state = TaskState::Failed;
                    return Ok(());
                }
            }
        } else {
            task.state = TaskState::Ready;
        }
        task.state = TaskState::Executing;
        if let Err(err) = engine.execute(self, fetcher, &task) {
            log::warn!("script error: {}", err.message);
            self.script_errors.push(ReportedScriptError {
                node: task.node,
                message: err.message,
            });
        }
        task.state = TaskState::Done;
        Ok(())
    }

    /// Auto-execution for scripts entering the live tree through DOM
    /// mutation APIs. Template-held and already-started scripts stay inert.
    fn run_inserted_scripts(
        &mut self,
        engine: &mut dyn ScriptEngine,
        fetcher: &mut dyn ResourceFetcher,
        root: NodeId,
    ) -> Result<()> {
        let mut candidates = Vec::new();
        if self.dom.tag_name(root) == Some("script") {
            candidates.push(root);
        }
        candidates.extend(
            self.dom
                .descendants(root)
                .into_iter()
                .filter(|&id| self.dom.tag_name(id) == Some("script")),
        );
        for id in candidates {
            self.maybe_run_fresh_script(engine, fetcher, id)?;
        }
        Ok(())
    }

    fn maybe_run_fresh_script(
        &mut self,
        engine: &mut dyn ScriptEngine,
        fetcher: &mut dyn ResourceFetcher,
        id: NodeId,
    ) -> Result<()> {
        let Some(element) = self.dom.element(id) else {
            return Ok(());
        };
        if element.already_started {
            return Ok(());
        }
        if !self.dom.is_connected(id) || self.dom.has_ancestor_with_tag(id, "template") {
            return Ok(());
        }
        let type_attr = element.attr("type").map(str::to_string);
        let src = element.attr("src").map(str::to_string);
        if !is_executable_script_type(type_attr.as_deref()) {
            return Ok(());
        }
        if let Some(element) = self.dom.element_mut(id) {
            element.already_started = true;
        }
        let task = match src {
            Some(src) => {
                let url = self.resolve_href(&src).unwrap_or(src);
                ScriptTask::new(
                    id,
                    ScriptOrigin::External { url },
                    String::new(),
                    self.generation,
                )
            }
            None => ScriptTask::new(
                id,
                ScriptOrigin::Inline,
                self.dom.text_content(id),
                self.generation,
            ),
        };
        self.run_task(engine, fetcher, task)
    }

    // ---- document metadata ----------------------------------------------

    pub fn compat_mode(&self) -> CompatMode {
        self.compat.unwrap_or(CompatMode::Quirks)
    }

    pub fn compat_mode_string(&self) -> &'static str {
        self.compat_mode().as_dom_string()
    }

    pub fn character_set(&self) -> &'static str {
        self.encoding.name()
    }

    /// Legacy alias for [`Self::character_set`].
    pub fn charset(&self) -> &'static str {
        self.character_set()
    }

    /// Legacy alias for [`Self::character_set`].
    pub fn input_encoding(&self) -> &'static str {
        self.character_set()
    }

    pub fn ready_state(&self) -> ReadyState {
        self.ready_state
    }

    /// The document's doctype declaration, if the markup carried one.
    pub fn doctype(&self) -> Option<Doctype> {
        self.dom
            .doctype()
            .map(|(name, public_id, system_id)| Doctype {
                name: name.to_string(),
                public_id: public_id.map(str::to_string),
                system_id: system_id.map(str::to_string),
            })
    }

    pub fn last_modified(&self) -> &str {
        &self.last_modified
    }

    pub fn url(&self) -> Option<String> {
        self.url.as_ref().map(Url::to_string)
    }

    /// Document url resolved against the first `<base href>`, if any.
    pub fn base_uri(&self) -> Option<String> {
        let base_href = self
            .dom
            .first_element_with_tag(self.dom.root, "base")
            .and_then(|base| self.dom.attr(base, "href"))
            .map(str::to_string);
        match (base_href, self.url.as_ref()) {
            (Some(href), Some(url)) => match url.join(&href) {
                Ok(joined) => Some(joined.to_string()),
                Err(err) => {
                    log::debug!("unresolvable base href {href}: {err}");
                    Some(url.to_string())
                }
            },
            (Some(href), None) => Url::parse(&href).ok().map(|url| url.to_string()),
            (None, Some(url)) => Some(url.to_string()),
            (None, None) => None,
        }
    }

    /// Standard relative-url resolution for attribute values.
    pub fn resolve_href(&self, href: &str) -> Option<String> {
        match self.base_uri() {
            Some(base) => Url::parse(&base)
                .ok()?
                .join(href)
                .ok()
                .map(|url| url.to_string()),
            None => Url::parse(href).ok().map(|url| url.to_string()),
        }
    }

    pub fn script_errors(&self) -> &[ReportedScriptError] {
        &self.script_errors
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Monotone counter bumped by every structural or attribute mutation.
    pub fn mutation_version(&self) -> u64 {
        self.dom.version()
    }

    // ---- node access -----------------------------------------------------

    pub fn document_node(&self) -> NodeId {
        self.dom.root
    }

    pub fn html_element(&self) -> Option<NodeId> {
        self.dom.html_element()
    }

    pub fn body(&self) -> Option<NodeId> {
        self.dom.body()
    }

    /// Replaces the document body. Only `body`/`frameset` elements are
    /// accepted; anything else fails and leaves the tree unchanged.
    pub fn set_body(&mut self, new_body: NodeId) -> Result<()> {
        if !matches!(self.dom.tag_name(new_body), Some("body" | "frameset")) {
            return Err(Error::HierarchyRequest(
                "document.body must be a body or frameset element".into(),
            ));
        }
        let html = self.ensure_html()?;
        match self.dom.body() {
            Some(old) => self.dom.replace_child(html, new_body, old),
            None => self.dom.append_child(html, new_body),
        }
    }

    pub fn title(&self) -> String {
        self.dom
            .first_element_with_tag(self.dom.root, "title")
            .map(|title| self.dom.text_content(title))
            .unwrap_or_default()
    }

    pub fn set_title(&mut self, text: &str) -> Result<()> {
        if let Some(title) = self.dom.first_element_with_tag(self.dom.root, "title") {
            return self.dom.set_text_content(title, text);
        }
        let head = self.ensure_head()?;
        let title = self.dom.create_element("title", Vec::new());
        self.dom.append_child(head, title)?;
        self.dom.set_text_content(title, text)
    }

    fn ensure_html(&mut self) -> Result<NodeId> {
        if let Some(html) = self.dom.html_element() {
            return Ok(html);
        }
        let html = self.dom.create_element("html", Vec::new());
        self.dom.append_child(self.dom.root, html)?;
        Ok(html)
    }

    fn ensure_head(&mut self) -> Result<NodeId> {
        let html = self.ensure_html()?;
        let head = self
            .dom
            .children(html)
            .iter()
            .copied()
            .find(|&child| self.dom.tag_name(child) == Some("head"));
        if let Some(head) = head {
            return Ok(head);
        }
        let head = self.dom.create_element("head", Vec::new());
        let first = self.dom.children(html).first().copied();
        self.dom.insert_before(html, head, first)?;
        Ok(head)
    }

    pub fn tag_name(&self, id: NodeId) -> Option<&str> {
        self.dom.tag_name(id)
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.dom.parent(id)
    }

    pub fn child_nodes(&self, id: NodeId) -> &[NodeId] {
        self.dom.children(id)
    }

    pub fn text_content(&self, id: NodeId) -> String {
        self.dom.text_content(id)
    }

    pub fn set_text_content(&mut self, id: NodeId, text: &str) -> Result<()> {
        self.dom.set_text_content(id, text)
    }

    pub fn create_element(&mut self, tag: &str) -> NodeId {
        self.dom.create_element(tag, Vec::new())
    }

    pub fn create_text_node(&mut self, text: &str) -> NodeId {
        self.dom.create_text(text.to_string())
    }

    pub fn create_comment(&mut self, text: &str) -> NodeId {
        self.dom.create_comment(text.to_string())
    }

    // ---- attributes ------------------------------------------------------

    pub fn get_attribute(&self, id: NodeId, name: &str) -> Option<&str> {
        self.dom.attr(id, name)
    }

    pub fn has_attribute(&self, id: NodeId, name: &str) -> bool {
        self.dom.attr(id, name).is_some()
    }

    pub fn set_attribute(&mut self, id: NodeId, name: &str, value: &str) -> Result<()> {
        self.dom.set_attribute(id, name, value)
    }

    /// Whole-attribute form of [`Self::set_attribute`]; returns the
    /// attribute it displaced, if any.
    pub fn set_attribute_node(&mut self, id: NodeId, attr: Attr) -> Result<Option<Attr>> {
        self.dom.set_attribute_node(id, attr)
    }

    pub fn remove_attribute(&mut self, id: NodeId, name: &str) -> Result<()> {
        self.dom.remove_attribute(id, name)
    }

    // ---- structural mutation (script-aware) ------------------------------

    pub fn append_child(
        &mut self,
        engine: &mut dyn ScriptEngine,
        fetcher: &mut dyn ResourceFetcher,
        parent: NodeId,
        child: NodeId,
    ) -> Result<()> {
        self.dom.append_child(parent, child)?;
        self.run_inserted_scripts(engine, fetcher, child)
    }

    pub fn insert_before(
        &mut self,
        engine: &mut dyn ScriptEngine,
        fetcher: &mut dyn ResourceFetcher,
        parent: NodeId,
        child: NodeId,
        before: Option<NodeId>,
    ) -> Result<()> {
        self.dom.insert_before(parent, child, before)?;
        self.run_inserted_scripts(engine, fetcher, child)
    }

    pub fn replace_child(
        &mut self,
        engine: &mut dyn ScriptEngine,
        fetcher: &mut dyn ResourceFetcher,
        parent: NodeId,
        new: NodeId,
        old: NodeId,
    ) -> Result<()> {
        self.dom.replace_child(parent, new, old)?;
        self.run_inserted_scripts(engine, fetcher, new)
    }

    pub fn remove_child(&mut self, parent: NodeId, child: NodeId) -> Result<()> {
        self.dom.remove_child(parent, child)
    }

    // ---- serialization ---------------------------------------------------

    pub fn inner_html(&self, id: NodeId) -> String {
        self.dom.inner_html(id)
    }

    pub fn outer_html(&self, id: NodeId) -> String {
        self.dom.outer_html(id)
    }

    /// Replaces the node's children with the parsed fragment. Scripts
    /// parsed this way are born inert and never execute.
    pub fn set_inner_html(&mut self, id: NodeId, html: &str) -> Result<()> {
        self.dom.remove_all_children(id)?;
        if html.is_empty() {
            return Ok(());
        }
        parse_fragment(&mut self.dom, id, html, true)
    }

    pub fn set_outer_html(&mut self, id: NodeId, html: &str) -> Result<()> {
        let parent = self.dom.parent(id).ok_or_else(|| {
            Error::NoModificationAllowed("outerHTML assignment on a detached node".into())
        })?;
        let holder = self.dom.create_element("div", Vec::new());
        parse_fragment(&mut self.dom, holder, html, true)?;
        let nodes: Vec<NodeId> = self.dom.children(holder).to_vec();
        for &node in &nodes {
            self.dom.insert_before(parent, node, Some(id))?;
        }
        self.dom.remove_child(parent, id)
    }

    // ---- insertAdjacent --------------------------------------------------

    pub fn insert_adjacent_html(
        &mut self,
        engine: &mut dyn ScriptEngine,
        fetcher: &mut dyn ResourceFetcher,
        target: NodeId,
        position: &str,
        html: &str,
    ) -> Result<()> {
        let position = AdjacentPosition::parse(position)?;
        self.check_adjacent_target(target, position)?;
        let holder = self.dom.create_element("div", Vec::new());
        parse_fragment(&mut self.dom, holder, html, false)?;
        let nodes: Vec<NodeId> = self.dom.children(holder).to_vec();
        self.place_adjacent(target, position, &nodes)?;
        for &node in &nodes {
            self.run_inserted_scripts(engine, fetcher, node)?;
        }
        Ok(())
    }

    pub fn insert_adjacent_element(
        &mut self,
        engine: &mut dyn ScriptEngine,
        fetcher: &mut dyn ResourceFetcher,
        target: NodeId,
        position: &str,
        element: NodeId,
    ) -> Result<()> {
        let position = AdjacentPosition::parse(position)?;
        self.check_adjacent_target(target, position)?;
        self.place_adjacent(target, position, &[element])?;
        self.run_inserted_scripts(engine, fetcher, element)
    }

    pub fn insert_adjacent_text(
        &mut self,
        target: NodeId,
        position: &str,
        text: &str,
    ) -> Result<()> {
        let position = AdjacentPosition::parse(position)?;
        self.check_adjacent_target(target, position)?;
        let node = self.dom.create_text(text.to_string());
        self.place_adjacent(target, position, &[node])
    }

    fn check_adjacent_target(&self, target: NodeId, position: AdjacentPosition) -> Result<()> {
        let outside = matches!(
            position,
            AdjacentPosition::BeforeBegin | AdjacentPosition::AfterEnd
        );
        if outside && self.dom.parent(target).is_none() {
            return Err(Error::NoModificationAllowed(
                "insertAdjacent outside a node that has no parent".into(),
            ));
        }
        Ok(())
    }

    fn place_adjacent(
        &mut self,
        target: NodeId,
        position: AdjacentPosition,
        nodes: &[NodeId],
    ) -> Result<()> {
        match position {
            AdjacentPosition::BeforeBegin | AdjacentPosition::AfterEnd => {
                let parent = self.dom.parent(target).ok_or_else(|| {
                    Error::NoModificationAllowed(
                        "insertAdjacent outside a node that has no parent".into(),
                    )
                })?;
                let before = match position {
                    AdjacentPosition::BeforeBegin => Some(target),
                    _ => self.dom.next_sibling(target),
                };
                for &node in nodes {
                    self.dom.insert_before(parent, node, before)?;
                }
            }
            AdjacentPosition::AfterBegin => {
                let first = self.dom.children(target).first().copied();
                for &node in nodes {
                    self.dom.insert_before(target, node, first)?;
                }
            }
            AdjacentPosition::BeforeEnd => {
                for &node in nodes {
                    self.dom.append_child(target, node)?;
                }
            }
        }
        Ok(())
    }

    // ---- queries ---------------------------------------------------------

    /// First element in document order with this id. Duplicates both stay
    /// in the tree; only position decides.
    pub fn get_element_by_id(&self, id: &str) -> Option<NodeId> {
        self.dom.element_by_id(id)
    }

    pub fn get_elements_by_tag_name(&mut self, tag: &str) -> LiveCollection {
        let tag = normalize_tag_query(tag);
        self.collections.get(Scope::Document, Predicate::TagName(tag))
    }

    pub fn get_elements_by_tag_name_within(
        &mut self,
        scope: NodeId,
        tag: &str,
    ) -> LiveCollection {
        let tag = normalize_tag_query(tag);
        self.collections
            .get(Scope::Element(scope), Predicate::TagName(tag))
    }

    pub fn get_elements_by_class_name(&mut self, query: &str) -> LiveCollection {
        self.collections
            .get(Scope::Document, Predicate::ClassName(query.to_string()))
    }

    pub fn get_elements_by_class_name_within(
        &mut self,
        scope: NodeId,
        query: &str,
    ) -> LiveCollection {
        self.collections
            .get(Scope::Element(scope), Predicate::ClassName(query.to_string()))
    }

    pub fn get_elements_by_name(&mut self, name: &str) -> LiveCollection {
        self.collections
            .get(Scope::Document, Predicate::NameAttr(name.to_string()))
    }

    pub fn collection_length(&mut self, collection: LiveCollection) -> usize {
        self.collections.refresh(collection, &self.dom).len()
    }

    pub fn collection_item(
        &mut self,
        collection: LiveCollection,
        index: usize,
    ) -> Option<NodeId> {
        self.collections
            .refresh(collection, &self.dom)
            .get(index)
            .copied()
    }

    pub fn collection_nodes(&mut self, collection: LiveCollection) -> Vec<NodeId> {
        self.collections.refresh(collection, &self.dom).to_vec()
    }

    /// Static snapshot queries over the selector subset.
    pub fn query_selector(&self, selector: &str) -> Result<Option<NodeId>> {
        selector::query_first(&self.dom, self.dom.root, selector)
    }

    pub fn query_selector_all(&self, selector: &str) -> Result<Vec<NodeId>> {
        selector::query_all(&self.dom, self.dom.root, selector)
    }

    pub fn query_selector_within(
        &self,
        scope: NodeId,
        selector: &str,
    ) -> Result<Option<NodeId>> {
        selector::query_first(&self.dom, scope, selector)
    }

    pub fn query_selector_all_within(
        &self,
        scope: NodeId,
        selector: &str,
    ) -> Result<Vec<NodeId>> {
        selector::query_all(&self.dom, scope, selector)
    }

    #[cfg(test)]
    pub(crate) fn scheduler_mut(&mut self) -> &mut Scheduler {
        &mut self.scheduler
    }
}

fn normalize_tag_query(tag: &str) -> String {
    if tag == "*" {
        tag.to_string()
    } else {
        tag.to_ascii_lowercase()
    }
}

fn compute_last_modified(options: &LoadOptions) -> String {
    let tz = options.time_zone;
    let parsed = options
        .last_modified_header
        .as_deref()
        .and_then(parse_http_date)
        .or_else(|| options.date_header.as_deref().and_then(parse_http_date));
    let stamp = parsed
        .map(|when| when.with_timezone(&tz))
        .unwrap_or_else(|| match options.now {
            Some(now) => now.with_timezone(&tz),
            None => Utc::now().with_timezone(&tz),
        });
    stamp.format("%m/%d/%Y %H:%M:%S").to_string()
}

fn parse_http_date(value: &str) -> Option<DateTime<FixedOffset>> {
    match DateTime::parse_from_rfc2822(value.trim()) {
        Ok(when) => Some(when),
        Err(err) => {
            log::debug!("unparseable http date {value:?}: {err}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::{NullEngine, ScriptedEngine, StaticFetcher};
    use chrono::TimeZone;

    fn load(html: &str) -> Result<Document> {
        let mut document = Document::new();
        let mut engine = NullEngine;
        let mut fetcher = StaticFetcher::new();
        document.load(&mut engine, &mut fetcher, html, LoadOptions::default())?;
        Ok(document)
    }

    #[test]
    fn ready_state_completes_after_load() -> Result<()> {
        let document = load("<p>x</p>")?;
        assert_eq!(document.ready_state(), ReadyState::Complete);
        assert_eq!(document.ready_state().as_dom_string(), "complete");
        assert!(!document.is_parsing());
        Ok(())
    }

    #[test]
    fn doctype_identifiers_are_exposed() -> Result<()> {
        let document = load(
            "<!DOCTYPE HTML PUBLIC \"-//W3C//DTD HTML 4.01 Transitional//EN\" \
             \"http://www.w3.org/TR/html4/loose.dtd\"><p>x</p>",
        )?;
        let doctype = document.doctype().expect("doctype");
        assert_eq!(doctype.name, "html");
        assert_eq!(
            doctype.public_id.as_deref(),
            Some("-//W3C//DTD HTML 4.01 Transitional//EN")
        );
        assert_eq!(
            doctype.system_id.as_deref(),
            Some("http://www.w3.org/TR/html4/loose.dtd")
        );
        assert!(load("<p>no doctype</p>")?.doctype().is_none());
        Ok(())
    }

    #[test]
    fn set_body_rejects_non_body_elements() -> Result<()> {
        let mut document = load("<p>x</p>")?;
        let div = document.create_element("div");
        let before = document.mutation_version();
        assert!(matches!(
            document.set_body(div),
            Err(Error::HierarchyRequest(_))
        ));
        assert_eq!(document.mutation_version(), before);
        let frameset = document.create_element("frameset");
        document.set_body(frameset)?;
        assert_eq!(document.body(), Some(frameset));
        Ok(())
    }

    #[test]
    fn base_uri_prefers_base_href() -> Result<()> {
        let mut document = Document::new();
        let mut engine = NullEngine;
        let mut fetcher = StaticFetcher::new();
        document.load(
            &mut engine,
            &mut fetcher,
            "<head><base href='/deep/dir/'></head><body><a href='page.html'>x</a></body>",
            LoadOptions::with_url("https://example.test/start/index.html"),
        )?;
        assert_eq!(
            document.base_uri().as_deref(),
            Some("https://example.test/deep/dir/")
        );
        assert_eq!(
            document.resolve_href("page.html").as_deref(),
            Some("https://example.test/deep/dir/page.html")
        );
        Ok(())
    }

    #[test]
    fn last_modified_header_chain_and_format() -> Result<()> {
        let mut engine = NullEngine;
        let mut fetcher = StaticFetcher::new();

        let mut options = LoadOptions::default();
        options.last_modified_header = Some("Sat, 02 Mar 2024 09:05:07 GMT".into());
        options.date_header = Some("Sun, 03 Mar 2024 00:00:00 GMT".into());
        let mut document = Document::new();
        document.load(&mut engine, &mut fetcher, "<p>x</p>", options)?;
        assert_eq!(document.last_modified(), "03/02/2024 09:05:07");

        let mut options = LoadOptions::default();
        options.date_header = Some("Sun, 03 Mar 2024 23:59:59 GMT".into());
        document.load(&mut engine, &mut fetcher, "<p>x</p>", options)?;
        assert_eq!(document.last_modified(), "03/03/2024 23:59:59");

        let mut options = LoadOptions::default();
        options.now = Utc
            .with_ymd_and_hms(2024, 12, 31, 18, 30, 0)
            .single()
            .map(|now| now.fixed_offset());
        document.load(&mut engine, &mut fetcher, "<p>x</p>", options)?;
        assert_eq!(document.last_modified(), "12/31/2024 18:30:00");
        Ok(())
    }

    #[test]
    fn last_modified_honors_the_configured_time_zone() -> Result<()> {
        let mut engine = NullEngine;
        let mut fetcher = StaticFetcher::new();
        let mut options = LoadOptions::default();
        options.last_modified_header = Some("Sat, 02 Mar 2024 23:30:00 GMT".into());
        options.time_zone = FixedOffset::east_opt(3600).expect("utc+1");
        let mut document = Document::new();
        document.load(&mut engine, &mut fetcher, "<p>x</p>", options)?;
        assert_eq!(document.last_modified(), "03/03/2024 00:30:00");
        Ok(())
    }

    #[test]
    fn invalid_adjacent_position_is_a_syntax_error() -> Result<()> {
        let mut document = load("<div id='t'>x</div>")?;
        let target = document.get_element_by_id("t").expect("target");
        let mut engine = NullEngine;
        let mut fetcher = StaticFetcher::new();
        assert!(matches!(
            document.insert_adjacent_html(&mut engine, &mut fetcher, target, "sideways", "<b>y</b>"),
            Err(Error::Syntax(_))
        ));
        document.insert_adjacent_html(&mut engine, &mut fetcher, target, "BeforeEnd", "<b>y</b>")?;
        assert_eq!(document.inner_html(target), "x<b>y</b>");
        Ok(())
    }

    #[test]
    fn adjacent_outside_positions_need_a_parent() -> Result<()> {
        let mut document = load("<p>x</p>")?;
        let detached = document.create_element("div");
        assert!(matches!(
            document.insert_adjacent_text(detached, "beforebegin", "y"),
            Err(Error::NoModificationAllowed(_))
        ));
        document.insert_adjacent_text(detached, "afterbegin", "y")?;
        assert_eq!(document.text_content(detached), "y");
        Ok(())
    }

    #[test]
    fn stale_generation_task_is_dropped_in_drain() -> Result<()> {
        let mut document = load("<p>x</p>")?;
        let mut engine = ScriptedEngine::new();
        let mut fetcher = StaticFetcher::new();
        let node = document.create_element("script");
        let stale = ScriptTask::new(
            node,
            ScriptOrigin::Inline,
            "log('stale')".into(),
            document.generation() - 1,
        );
        document.scheduler_mut().push(stale);
        document.drain(&mut engine, &mut fetcher)?;
        assert!(engine.log().is_empty());
        Ok(())
    }

    #[test]
    fn outer_html_assignment_replaces_the_node() -> Result<()> {
        let mut document = load("<div id='a'>old</div>")?;
        let div = document.get_element_by_id("a").expect("div");
        document.set_outer_html(div, "<p id='b'>new</p><p>tail</p>")?;
        let body = document.body().expect("body");
        assert_eq!(
            document.inner_html(body),
            "<p id=\"b\">new</p><p>tail</p>"
        );
        assert!(document.get_element_by_id("a").is_none());
        Ok(())
    }
}
