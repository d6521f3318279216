//! Tree construction state machine.
//!
//! Consumes tokens and mutates the arena tree through the usual insertion
//! modes: implied `html`/`head`/`body`, paragraph auto-close, optional end
//! tags for list and table parts, foster parenting in table context, and raw
//! text handoff for script/style content. Malformed markup never errors;
//! every recovery rule is fixed and silent. On a completed parser-inserted
//! `<script>` the builder hands the element back to the caller instead of
//! advancing, so script execution can splice new input before the next token.

use crate::compat::{classify_doctype, CompatMode};
use crate::dom::{Attr, Dom, NodeId, NodeKind};
use crate::tokenizer::{is_escapable_raw_text_tag, is_raw_text_tag, is_void_tag, Token};
use crate::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InsertionMode {
    Initial,
    BeforeHtml,
    BeforeHead,
    InHead,
    AfterHead,
    InBody,
    Text,
    InTable,
    InFrameset,
    AfterBody,
    AfterFrameset,
}

/// What the caller must do after a token is processed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum BuilderSignal {
    Continue,
    /// Switch the tokenizer to raw text until the matching end tag.
    EnterRawText { tag: String, escapable: bool },
    /// A parser-inserted script element is complete and ready to run.
    ScriptReady(NodeId),
}

enum Flow {
    Done(BuilderSignal),
    Reprocess(Token),
}

#[derive(Debug)]
pub(crate) struct TreeBuilder {
    mode: InsertionMode,
    orig_mode: InsertionMode,
    open: Vec<NodeId>,
    head: Option<NodeId>,
    template_depth: usize,
    // Fragment parses mark their scripts already-started so they stay inert.
    mark_scripts_started: bool,
    // Stack floor: the fragment context element is never popped.
    protect: usize,
}

impl TreeBuilder {
    pub(crate) fn new() -> Self {
        Self {
            mode: InsertionMode::Initial,
            orig_mode: InsertionMode::InBody,
            open: Vec::new(),
            head: None,
            template_depth: 0,
            mark_scripts_started: false,
            protect: 0,
        }
    }

    /// Builder for fragment parsing: tokens are inserted under `context`.
    /// `inert_scripts` marks every parsed script already-started, the
    /// `innerHTML` behavior; `insertAdjacentHTML` parses with live scripts.
    pub(crate) fn fragment(context: NodeId, inert_scripts: bool) -> Self {
        Self {
            mode: InsertionMode::InBody,
            orig_mode: InsertionMode::InBody,
            open: vec![context],
            head: None,
            template_depth: 0,
            mark_scripts_started: inert_scripts,
            protect: 1,
        }
    }

    pub(crate) fn process(
        &mut self,
        dom: &mut Dom,
        compat: &mut Option<CompatMode>,
        token: Token,
    ) -> Result<BuilderSignal> {
        let mut token = token;
        loop {
            let flow = match self.mode {
                InsertionMode::Initial => self.initial(dom, compat, token)?,
                InsertionMode::BeforeHtml => self.before_html(dom, token)?,
                InsertionMode::BeforeHead => self.before_head(dom, token)?,
                InsertionMode::InHead => self.in_head(dom, token)?,
                InsertionMode::AfterHead => self.after_head(dom, token)?,
                InsertionMode::InBody => self.in_body(dom, token)?,
                InsertionMode::Text => self.raw_text(dom, token)?,
                InsertionMode::InTable => self.in_table(dom, token)?,
                InsertionMode::InFrameset => self.in_frameset(dom, token)?,
                InsertionMode::AfterBody => self.after_body(dom, token)?,
                InsertionMode::AfterFrameset => self.after_frameset(dom, token)?,
            };
            match flow {
                Flow::Done(signal) => return Ok(signal),
                Flow::Reprocess(next) => token = next,
            }
        }
    }

    /// End of input. Pops whatever is still open and guarantees the
    /// `html`/`head`/`body` skeleton exists. An unterminated script element
    /// is sealed without executing.
    pub(crate) fn finish(&mut self, dom: &mut Dom) -> Result<()> {
        if self.mode == InsertionMode::Text {
            if let Some(raw) = self.open.pop() {
                if let Some(element) = dom.element_mut(raw) {
                    if element.tag_name == "script" {
                        element.already_started = true;
                    }
                }
            }
            self.mode = self.orig_mode;
        }
        if self.protect > 0 {
            return Ok(());
        }
        let html = match dom.html_element() {
            Some(html) => html,
            None => {
                let html = dom.create_element("html", Vec::new());
                dom.append_child(dom.root, html)?;
                html
            }
        };
        let head = dom
            .children(html)
            .iter()
            .copied()
            .find(|&child| dom.tag_name(child) == Some("head"));
        if head.is_none() {
            let head = dom.create_element("head", Vec::new());
            let first = dom.children(html).first().copied();
            dom.insert_before(html, head, first)?;
            self.head = Some(head);
        }
        if dom.body().is_none() {
            let body = dom.create_element("body", Vec::new());
            dom.append_child(html, body)?;
        }
        Ok(())
    }

    fn current(&self, dom: &Dom) -> NodeId {
        self.open.last().copied().unwrap_or(dom.root)
    }

    /// Where the next node goes. In table context, content that does not
    /// belong in a table is relocated to just before the innermost table.
    fn insertion_point(&self, dom: &Dom, allow_foster: bool) -> (NodeId, Option<NodeId>) {
        let target = self.current(dom);
        if allow_foster
            && matches!(
                dom.tag_name(target),
                Some("table" | "tbody" | "thead" | "tfoot" | "tr")
            )
        {
            let table = self
                .open
                .iter()
                .rev()
                .copied()
                .find(|&id| dom.tag_name(id) == Some("table"));
            if let Some(table) = table {
                if let Some(parent) = dom.parent(table) {
                    return (parent, Some(table));
                }
            }
        }
        (target, None)
    }

    fn insert_element(
        &mut self,
        dom: &mut Dom,
        name: &str,
        attrs: Vec<Attr>,
        allow_foster: bool,
    ) -> Result<NodeId> {
        let (parent, before) = self.insertion_point(dom, allow_foster);
        let id = dom.create_element(name, attrs);
        dom.insert_before(parent, id, before)?;
        Ok(id)
    }

    fn insert_text(&mut self, dom: &mut Dom, text: &str, allow_foster: bool) -> Result<()> {
        if text.is_empty() {
            return Ok(());
        }
        let (parent, before) = self.insertion_point(dom, allow_foster);
        // Adjacent runs merge so split input yields the same tree as whole
        // input.
        let previous = match before {
            Some(before) => dom.previous_sibling(before),
            None => dom.children(parent).last().copied(),
        };
        if let Some(previous) = previous {
            if let Ok(node) = dom.node_mut(previous) {
                if let NodeKind::Text(existing) = &mut node.kind {
                    existing.push_str(text);
                    dom.bump_version();
                    return Ok(());
                }
            }
        }
        let node = dom.create_text(text.to_string());
        dom.insert_before(parent, node, before)
    }

    fn insert_comment(&mut self, dom: &mut Dom, parent: NodeId, text: String) -> Result<()> {
        let node = dom.create_comment(text);
        dom.append_child(parent, node)
    }

    fn pop_to(&mut self, dom: &Dom, len: usize) {
        while self.open.len() > len {
            if let Some(id) = self.open.pop() {
                if dom.tag_name(id) == Some("template") {
                    self.template_depth = self.template_depth.saturating_sub(1);
                }
            }
        }
    }

    /// Index of the nearest open element named `name`, scanning down from
    /// the top but never across a scope boundary.
    fn find_in_scope(&self, dom: &Dom, name: &str) -> Option<usize> {
        for (idx, &id) in self.open.iter().enumerate().rev() {
            if idx < self.protect {
                break;
            }
            let tag = dom.tag_name(id).unwrap_or("");
            if tag == name {
                return Some(idx);
            }
            if matches!(
                tag,
                "html" | "body" | "template" | "table" | "caption" | "td" | "th"
            ) {
                break;
            }
        }
        None
    }

    fn pop_through_in_scope(&mut self, dom: &Dom, name: &str) -> bool {
        match self.find_in_scope(dom, name) {
            Some(idx) => {
                self.pop_to(dom, idx);
                true
            }
            None => false,
        }
    }

    fn close_paragraph(&mut self, dom: &Dom) {
        self.pop_through_in_scope(dom, "p");
    }

    fn synthesize_html(&mut self, dom: &mut Dom) -> Result<()> {
        let html = dom.create_element("html", Vec::new());
        dom.append_child(dom.root, html)?;
        self.open.push(html);
        Ok(())
    }

    fn begin_raw_text(
        &mut self,
        dom: &mut Dom,
        name: &str,
        attrs: Vec<Attr>,
        allow_foster: bool,
    ) -> Result<Flow> {
        let id = self.insert_element(dom, name, attrs, allow_foster)?;
        if name == "script" {
            if let Some(element) = dom.element_mut(id) {
                element.parser_inserted = true;
                element.already_started = self.template_depth > 0 || self.mark_scripts_started;
            }
        }
        self.open.push(id);
        self.orig_mode = self.mode;
        self.mode = InsertionMode::Text;
        Ok(Flow::Done(BuilderSignal::EnterRawText {
            tag: name.to_string(),
            escapable: is_escapable_raw_text_tag(name),
        }))
    }

    fn initial(
        &mut self,
        dom: &mut Dom,
        compat: &mut Option<CompatMode>,
        token: Token,
    ) -> Result<Flow> {
        match token {
            Token::Comment(text) => {
                self.insert_comment(dom, dom.root, text)?;
                Ok(Flow::Done(BuilderSignal::Continue))
            }
            Token::Doctype {
                name,
                public_id,
                system_id,
            } => {
                if compat.is_none() {
                    *compat = Some(classify_doctype(
                        name.as_deref(),
                        public_id.as_deref(),
                        system_id.as_deref(),
                    ));
                }
                let node =
                    dom.create_doctype(name.unwrap_or_default(), public_id, system_id);
                dom.append_child(dom.root, node)?;
                self.mode = InsertionMode::BeforeHtml;
                Ok(Flow::Done(BuilderSignal::Continue))
            }
            Token::Text(text) => {
                let rest = text.trim_start();
                if rest.is_empty() {
                    return Ok(Flow::Done(BuilderSignal::Continue));
                }
                // Content before any DOCTYPE locks the document into quirks.
                compat.get_or_insert(CompatMode::Quirks);
                self.mode = InsertionMode::BeforeHtml;
                Ok(Flow::Reprocess(Token::Text(rest.to_string())))
            }
            other => {
                compat.get_or_insert(CompatMode::Quirks);
                self.mode = InsertionMode::BeforeHtml;
                Ok(Flow::Reprocess(other))
            }
        }
    }

    fn before_html(&mut self, dom: &mut Dom, token: Token) -> Result<Flow> {
        match token {
            Token::Comment(text) => {
                self.insert_comment(dom, dom.root, text)?;
                Ok(Flow::Done(BuilderSignal::Continue))
            }
            Token::Doctype { .. } => Ok(Flow::Done(BuilderSignal::Continue)),
            Token::Text(text) => {
                let rest = text.trim_start();
                if rest.is_empty() {
                    return Ok(Flow::Done(BuilderSignal::Continue));
                }
                self.synthesize_html(dom)?;
                self.mode = InsertionMode::BeforeHead;
                Ok(Flow::Reprocess(Token::Text(rest.to_string())))
            }
            Token::StartTag { name, attrs, .. } if name == "html" => {
                let html = dom.create_element("html", attrs);
                dom.append_child(dom.root, html)?;
                self.open.push(html);
                self.mode = InsertionMode::BeforeHead;
                Ok(Flow::Done(BuilderSignal::Continue))
            }
            Token::EndTag { name }
                if !matches!(name.as_str(), "head" | "body" | "html" | "br") =>
            {
                Ok(Flow::Done(BuilderSignal::Continue))
            }
            other => {
                self.synthesize_html(dom)?;
                self.mode = InsertionMode::BeforeHead;
                Ok(Flow::Reprocess(other))
            }
        }
    }

    fn before_head(&mut self, dom: &mut Dom, token: Token) -> Result<Flow> {
        match token {
            Token::Comment(text) => {
                let current = self.current(dom);
                self.insert_comment(dom, current, text)?;
                Ok(Flow::Done(BuilderSignal::Continue))
            }
            Token::Doctype { .. } => Ok(Flow::Done(BuilderSignal::Continue)),
            Token::Text(text) => {
                let rest = text.trim_start();
                if rest.is_empty() {
                    return Ok(Flow::Done(BuilderSignal::Continue));
                }
                self.implied_head(dom, Flow::Reprocess(Token::Text(rest.to_string())))
            }
            Token::StartTag { name, attrs, .. } if name == "html" => {
                let current = self.current(dom);
                dom.merge_missing_attributes(current, &attrs);
                Ok(Flow::Done(BuilderSignal::Continue))
            }
            Token::StartTag { name, attrs, .. } if name == "head" => {
                let head = self.insert_element(dom, "head", attrs, false)?;
                self.open.push(head);
                self.head = Some(head);
                self.mode = InsertionMode::InHead;
                Ok(Flow::Done(BuilderSignal::Continue))
            }
            Token::EndTag { name }
                if !matches!(name.as_str(), "head" | "body" | "html" | "br") =>
            {
                Ok(Flow::Done(BuilderSignal::Continue))
            }
            other => Ok(self.implied_head(dom, Flow::Reprocess(other))?),
        }
    }

    fn implied_head(&mut self, dom: &mut Dom, flow: Flow) -> Result<Flow> {
        let head = self.insert_element(dom, "head", Vec::new(), false)?;
        self.open.push(head);
        self.head = Some(head);
        self.mode = InsertionMode::InHead;
        Ok(flow)
    }

    fn in_head(&mut self, dom: &mut Dom, token: Token) -> Result<Flow> {
        match token {
            Token::Comment(text) => {
                let current = self.current(dom);
                self.insert_comment(dom, current, text)?;
                Ok(Flow::Done(BuilderSignal::Continue))
            }
            Token::Doctype { .. } => Ok(Flow::Done(BuilderSignal::Continue)),
            Token::Text(text) => {
                let rest = text.trim_start();
                let kept = &text[..text.len() - rest.len()];
                self.insert_text(dom, kept, false)?;
                if rest.is_empty() {
                    return Ok(Flow::Done(BuilderSignal::Continue));
                }
                self.leave_head(dom);
                Ok(Flow::Reprocess(Token::Text(rest.to_string())))
            }
            Token::StartTag { name, attrs, .. } => match name.as_str() {
                "html" => {
                    if let Some(&html) = self.open.first() {
                        dom.merge_missing_attributes(html, &attrs);
                    }
                    Ok(Flow::Done(BuilderSignal::Continue))
                }
                "base" | "basefont" | "bgsound" | "link" | "meta" => {
                    self.insert_element(dom, &name, attrs, false)?;
                    Ok(Flow::Done(BuilderSignal::Continue))
                }
                "title" | "style" | "script" | "noscript" | "noframes" => {
                    self.begin_raw_text(dom, &name, attrs, false)
                }
                "template" => {
                    let id = self.insert_element(dom, "template", attrs, false)?;
                    self.open.push(id);
                    self.template_depth += 1;
                    Ok(Flow::Done(BuilderSignal::Continue))
                }
                "head" => Ok(Flow::Done(BuilderSignal::Continue)),
                _ => {
                    self.leave_head(dom);
                    Ok(Flow::Reprocess(Token::StartTag {
                        name,
                        attrs,
                        self_closing: false,
                    }))
                }
            },
            Token::EndTag { name } => match name.as_str() {
                "head" => {
                    self.leave_head(dom);
                    Ok(Flow::Done(BuilderSignal::Continue))
                }
                "template" => {
                    if self.pop_through_in_scope(dom, "template") {
                        self.pop_to(dom, self.open.len().saturating_sub(1));
                    }
                    Ok(Flow::Done(BuilderSignal::Continue))
                }
                "body" | "html" | "br" => {
                    self.leave_head(dom);
                    Ok(Flow::Reprocess(Token::EndTag { name }))
                }
                _ => Ok(Flow::Done(BuilderSignal::Continue)),
            },
        }
    }

    fn leave_head(&mut self, dom: &Dom) {
        if let Some(idx) = self
            .open
            .iter()
            .rposition(|&id| dom.tag_name(id) == Some("head"))
        {
            self.pop_to(dom, idx);
        }
        self.mode = InsertionMode::AfterHead;
    }

    fn after_head(&mut self, dom: &mut Dom, token: Token) -> Result<Flow> {
        match token {
            Token::Comment(text) => {
                let current = self.current(dom);
                self.insert_comment(dom, current, text)?;
                Ok(Flow::Done(BuilderSignal::Continue))
            }
            Token::Doctype { .. } => Ok(Flow::Done(BuilderSignal::Continue)),
            Token::Text(text) => {
                let rest = text.trim_start();
                let kept = &text[..text.len() - rest.len()];
                self.insert_text(dom, kept, false)?;
                if rest.is_empty() {
                    return Ok(Flow::Done(BuilderSignal::Continue));
                }
                self.implied_body(dom)?;
                Ok(Flow::Reprocess(Token::Text(rest.to_string())))
            }
            Token::StartTag { name, attrs, .. } => match name.as_str() {
                "html" => {
                    if let Some(&html) = self.open.first() {
                        dom.merge_missing_attributes(html, &attrs);
                    }
                    Ok(Flow::Done(BuilderSignal::Continue))
                }
                "body" => {
                    let body = self.insert_element(dom, "body", attrs, false)?;
                    self.open.push(body);
                    self.mode = InsertionMode::InBody;
                    Ok(Flow::Done(BuilderSignal::Continue))
                }
                "frameset" => {
                    let frameset = self.insert_element(dom, "frameset", attrs, false)?;
                    self.open.push(frameset);
                    self.mode = InsertionMode::InFrameset;
                    Ok(Flow::Done(BuilderSignal::Continue))
                }
                // Late head content re-enters the head element.
                "base" | "basefont" | "bgsound" | "link" | "meta" | "title" | "style"
                | "script" | "noscript" | "noframes" | "template" => {
                    if let Some(head) = self.head {
                        self.open.push(head);
                        self.mode = InsertionMode::InHead;
                        return Ok(Flow::Reprocess(Token::StartTag {
                            name,
                            attrs,
                            self_closing: false,
                        }));
                    }
                    self.implied_body(dom)?;
                    Ok(Flow::Reprocess(Token::StartTag {
                        name,
                        attrs,
                        self_closing: false,
                    }))
                }
                "head" => Ok(Flow::Done(BuilderSignal::Continue)),
                _ => {
                    self.implied_body(dom)?;
                    Ok(Flow::Reprocess(Token::StartTag {
                        name,
                        attrs,
                        self_closing: false,
                    }))
                }
            },
            Token::EndTag { name } => match name.as_str() {
                "body" | "html" | "br" => {
                    self.implied_body(dom)?;
                    Ok(Flow::Reprocess(Token::EndTag { name }))
                }
                _ => Ok(Flow::Done(BuilderSignal::Continue)),
            },
        }
    }

    fn implied_body(&mut self, dom: &mut Dom) -> Result<()> {
        let body = self.insert_element(dom, "body", Vec::new(), false)?;
        self.open.push(body);
        self.mode = InsertionMode::InBody;
        Ok(())
    }

    fn in_body(&mut self, dom: &mut Dom, token: Token) -> Result<Flow> {
        match token {
            Token::Text(text) => {
                self.insert_text(dom, &text, false)?;
                Ok(Flow::Done(BuilderSignal::Continue))
            }
            Token::Comment(text) => {
                let current = self.current(dom);
                self.insert_comment(dom, current, text)?;
                Ok(Flow::Done(BuilderSignal::Continue))
            }
            Token::Doctype { .. } => Ok(Flow::Done(BuilderSignal::Continue)),
            Token::StartTag { name, attrs, .. } => self.in_body_start(dom, name, attrs),
            Token::EndTag { name } => self.in_body_end(dom, name),
        }
    }

    fn in_body_start(&mut self, dom: &mut Dom, name: String, attrs: Vec<Attr>) -> Result<Flow> {
        // Legacy alias kept by every browser.
        let name = if name == "image" { "img".to_string() } else { name };
        match name.as_str() {
            "html" => {
                if let Some(&html) = self.open.first() {
                    dom.merge_missing_attributes(html, &attrs);
                }
                Ok(Flow::Done(BuilderSignal::Continue))
            }
            "body" => {
                let body = self
                    .open
                    .iter()
                    .copied()
                    .find(|&id| dom.tag_name(id) == Some("body"));
                if let Some(body) = body {
                    dom.merge_missing_attributes(body, &attrs);
                }
                Ok(Flow::Done(BuilderSignal::Continue))
            }
            "script" | "style" | "title" | "textarea" | "xmp" | "noscript" | "noframes" => {
                if name == "xmp" {
                    self.close_paragraph(dom);
                }
                self.begin_raw_text(dom, &name, attrs, true)
            }
            "template" => {
                let id = self.insert_element(dom, "template", attrs, true)?;
                self.open.push(id);
                self.template_depth += 1;
                Ok(Flow::Done(BuilderSignal::Continue))
            }
            "table" => {
                self.close_paragraph(dom);
                let table = self.insert_element(dom, "table", attrs, true)?;
                self.open.push(table);
                self.mode = InsertionMode::InTable;
                Ok(Flow::Done(BuilderSignal::Continue))
            }
            "p" => {
                self.close_paragraph(dom);
                let id = self.insert_element(dom, "p", attrs, true)?;
                self.open.push(id);
                Ok(Flow::Done(BuilderSignal::Continue))
            }
            "li" => {
                self.pop_through_in_scope(dom, "li");
                self.close_paragraph(dom);
                let id = self.insert_element(dom, "li", attrs, true)?;
                self.open.push(id);
                Ok(Flow::Done(BuilderSignal::Continue))
            }
            "dt" | "dd" => {
                self.pop_through_in_scope(dom, "dt");
                self.pop_through_in_scope(dom, "dd");
                self.close_paragraph(dom);
                let id = self.insert_element(dom, &name, attrs, true)?;
                self.open.push(id);
                Ok(Flow::Done(BuilderSignal::Continue))
            }
            "option" | "optgroup" => {
                if self.current_tag_is(dom, "option") {
                    self.pop_to(dom, self.open.len().saturating_sub(1));
                }
                if name == "optgroup" && self.current_tag_is(dom, "optgroup") {
                    self.pop_to(dom, self.open.len().saturating_sub(1));
                }
                let id = self.insert_element(dom, &name, attrs, true)?;
                self.open.push(id);
                Ok(Flow::Done(BuilderSignal::Continue))
            }
            "rt" | "rp" => {
                if self.current_tag_is(dom, "rt") || self.current_tag_is(dom, "rp") {
                    self.pop_to(dom, self.open.len().saturating_sub(1));
                }
                let id = self.insert_element(dom, &name, attrs, true)?;
                self.open.push(id);
                Ok(Flow::Done(BuilderSignal::Continue))
            }
            "h1" | "h2" | "h3" | "h4" | "h5" | "h6" => {
                self.close_paragraph(dom);
                if matches!(
                    dom.tag_name(self.current(dom)),
                    Some("h1" | "h2" | "h3" | "h4" | "h5" | "h6")
                ) {
                    self.pop_to(dom, self.open.len().saturating_sub(1));
                }
                let id = self.insert_element(dom, &name, attrs, true)?;
                self.open.push(id);
                Ok(Flow::Done(BuilderSignal::Continue))
            }
            "tr" | "td" | "th" | "tbody" | "thead" | "tfoot" | "caption" | "colgroup"
            | "col" => {
                // Table parts outside any table are dropped.
                Ok(Flow::Done(BuilderSignal::Continue))
            }
            _ if is_void_tag(&name) => {
                if name == "hr" {
                    self.close_paragraph(dom);
                }
                self.insert_element(dom, &name, attrs, true)?;
                Ok(Flow::Done(BuilderSignal::Continue))
            }
            _ => {
                if is_block_tag(&name) {
                    self.close_paragraph(dom);
                }
                let id = self.insert_element(dom, &name, attrs, true)?;
                self.open.push(id);
                Ok(Flow::Done(BuilderSignal::Continue))
            }
        }
    }

    fn in_body_end(&mut self, dom: &mut Dom, name: String) -> Result<Flow> {
        match name.as_str() {
            "body" => {
                self.mode = InsertionMode::AfterBody;
                Ok(Flow::Done(BuilderSignal::Continue))
            }
            "html" => {
                self.mode = InsertionMode::AfterBody;
                Ok(Flow::Reprocess(Token::EndTag { name }))
            }
            "p" => {
                if !self.pop_through_in_scope(dom, "p") {
                    // A stray `</p>` materializes an empty paragraph.
                    self.insert_element(dom, "p", Vec::new(), true)?;
                }
                Ok(Flow::Done(BuilderSignal::Continue))
            }
            "br" => {
                self.insert_element(dom, "br", Vec::new(), true)?;
                Ok(Flow::Done(BuilderSignal::Continue))
            }
            "template" => {
                if let Some(idx) = self
                    .open
                    .iter()
                    .rposition(|&id| dom.tag_name(id) == Some("template"))
                {
                    self.pop_to(dom, idx);
                }
                Ok(Flow::Done(BuilderSignal::Continue))
            }
            _ => {
                self.pop_through_in_scope(dom, &name);
                Ok(Flow::Done(BuilderSignal::Continue))
            }
        }
    }

    fn raw_text(&mut self, dom: &mut Dom, token: Token) -> Result<Flow> {
        match token {
            Token::Text(text) => {
                let current = self.current(dom);
                let previous = dom.children(current).last().copied();
                if let Some(previous) = previous {
                    if let Ok(node) = dom.node_mut(previous) {
                        if let NodeKind::Text(existing) = &mut node.kind {
                            existing.push_str(&text);
                            dom.bump_version();
                            return Ok(Flow::Done(BuilderSignal::Continue));
                        }
                    }
                }
                let node = dom.create_text(text);
                dom.append_child(current, node)?;
                Ok(Flow::Done(BuilderSignal::Continue))
            }
            Token::EndTag { .. } => {
                let raw = self.open.pop();
                self.mode = self.orig_mode;
                if let Some(raw) = raw {
                    if dom.tag_name(raw) == Some("script") {
                        let parser_inserted = dom
                            .element(raw)
                            .is_some_and(|element| element.parser_inserted);
                        if parser_inserted {
                            return Ok(Flow::Done(BuilderSignal::ScriptReady(raw)));
                        }
                    }
                }
                Ok(Flow::Done(BuilderSignal::Continue))
            }
            // The tokenizer only emits text and the matching end tag here.
            other => {
                log::debug!("unexpected token in raw text mode: {other:?}");
                Ok(Flow::Done(BuilderSignal::Continue))
            }
        }
    }

    fn in_table(&mut self, dom: &mut Dom, token: Token) -> Result<Flow> {
        if self.inside_cell(dom) {
            return self.in_table_cell(dom, token);
        }
        match token {
            Token::Text(text) => {
                // Non-whitespace character data does not belong in a table
                // and is fostered out.
                let foster = !text.trim().is_empty();
                self.insert_text(dom, &text, foster)?;
                Ok(Flow::Done(BuilderSignal::Continue))
            }
            Token::Comment(text) => {
                let current = self.current(dom);
                self.insert_comment(dom, current, text)?;
                Ok(Flow::Done(BuilderSignal::Continue))
            }
            Token::Doctype { .. } => Ok(Flow::Done(BuilderSignal::Continue)),
            Token::StartTag { name, attrs, .. } => match name.as_str() {
                "caption" | "colgroup" | "tbody" | "thead" | "tfoot" => {
                    self.pop_to_table(dom);
                    let id = self.insert_element(dom, &name, attrs, false)?;
                    self.open.push(id);
                    Ok(Flow::Done(BuilderSignal::Continue))
                }
                "col" => {
                    if !self.current_tag_is(dom, "colgroup") {
                        self.pop_to_table(dom);
                        let colgroup = self.insert_element(dom, "colgroup", Vec::new(), false)?;
                        self.open.push(colgroup);
                    }
                    self.insert_element(dom, "col", attrs, false)?;
                    Ok(Flow::Done(BuilderSignal::Continue))
                }
                "tr" => {
                    if !matches!(
                        dom.tag_name(self.current(dom)),
                        Some("tbody" | "thead" | "tfoot")
                    ) {
                        self.pop_to_table(dom);
                        let tbody = self.insert_element(dom, "tbody", Vec::new(), false)?;
                        self.open.push(tbody);
                    }
                    let tr = self.insert_element(dom, "tr", attrs, false)?;
                    self.open.push(tr);
                    Ok(Flow::Done(BuilderSignal::Continue))
                }
                "td" | "th" => {
                    if !self.current_tag_is(dom, "tr") {
                        if !matches!(
                            dom.tag_name(self.current(dom)),
                            Some("tbody" | "thead" | "tfoot")
                        ) {
                            self.pop_to_table(dom);
                            let tbody = self.insert_element(dom, "tbody", Vec::new(), false)?;
                            self.open.push(tbody);
                        }
                        let tr = self.insert_element(dom, "tr", Vec::new(), false)?;
                        self.open.push(tr);
                    }
                    let cell = self.insert_element(dom, &name, attrs, false)?;
                    self.open.push(cell);
                    Ok(Flow::Done(BuilderSignal::Continue))
                }
                "table" => {
                    // A nested `<table>` implicitly closes the current one.
                    self.close_table(dom);
                    Ok(Flow::Reprocess(Token::StartTag {
                        name,
                        attrs,
                        self_closing: false,
                    }))
                }
                "script" | "style" | "template" => {
                    if name == "template" {
                        let id = self.insert_element(dom, "template", attrs, false)?;
                        self.open.push(id);
                        self.template_depth += 1;
                        return Ok(Flow::Done(BuilderSignal::Continue));
                    }
                    self.begin_raw_text(dom, &name, attrs, false)
                }
                "form" | "input" => {
                    self.insert_element(dom, &name, attrs, false)?;
                    Ok(Flow::Done(BuilderSignal::Continue))
                }
                _ => {
                    // Anything else is fostered out in front of the table.
                    // Once fostered and open, later content nests inside it
                    // normally because the insertion target is no longer a
                    // table part.
                    let id = self.insert_element(dom, &name, attrs, true)?;
                    if !is_void_tag(&name) && !is_raw_text_tag(&name) {
                        self.open.push(id);
                    }
                    Ok(Flow::Done(BuilderSignal::Continue))
                }
            },
            Token::EndTag { name } => match name.as_str() {
                "table" => {
                    self.close_table(dom);
                    Ok(Flow::Done(BuilderSignal::Continue))
                }
                _ => {
                    // Covers table parts and fostered elements still open
                    // above the table.
                    self.pop_through_in_scope(dom, &name);
                    Ok(Flow::Done(BuilderSignal::Continue))
                }
            },
        }
    }

    /// Content inside an open `td`/`th`/`caption` follows body rules; a
    /// table-structure token first closes the cell.
    fn in_table_cell(&mut self, dom: &mut Dom, token: Token) -> Result<Flow> {
        let closes_cell = match &token {
            Token::StartTag { name, .. } => matches!(
                name.as_str(),
                "td" | "th" | "tr" | "tbody" | "thead" | "tfoot" | "caption" | "colgroup"
            ),
            Token::EndTag { name } => matches!(
                name.as_str(),
                "td" | "th" | "tr" | "tbody" | "thead" | "tfoot" | "caption" | "table"
            ),
            _ => false,
        };
        if closes_cell {
            self.close_cell(dom);
            if let Token::EndTag { name } = &token {
                if matches!(name.as_str(), "td" | "th" | "caption") {
                    return Ok(Flow::Done(BuilderSignal::Continue));
                }
            }
            return Ok(Flow::Reprocess(token));
        }
        self.in_body(dom, token)
    }

    fn close_cell(&mut self, dom: &Dom) {
        if let Some(idx) = self.open.iter().rposition(|&id| {
            matches!(dom.tag_name(id), Some("td" | "th" | "caption"))
        }) {
            self.pop_to(dom, idx);
        }
    }

    fn inside_cell(&self, dom: &Dom) -> bool {
        for &id in self.open.iter().rev() {
            match dom.tag_name(id) {
                Some("td" | "th" | "caption") => return true,
                Some("table") => return false,
                _ => {}
            }
        }
        false
    }

    fn pop_to_table(&mut self, dom: &Dom) {
        if let Some(idx) = self
            .open
            .iter()
            .rposition(|&id| dom.tag_name(id) == Some("table"))
        {
            self.pop_to(dom, idx + 1);
        }
    }

    fn close_table(&mut self, dom: &Dom) {
        if let Some(idx) = self
            .open
            .iter()
            .rposition(|&id| dom.tag_name(id) == Some("table"))
        {
            self.pop_to(dom, idx);
        }
        let still_in_table = self
            .open
            .iter()
            .any(|&id| dom.tag_name(id) == Some("table"));
        self.mode = if still_in_table {
            InsertionMode::InTable
        } else {
            InsertionMode::InBody
        };
    }

    fn in_frameset(&mut self, dom: &mut Dom, token: Token) -> Result<Flow> {
        match token {
            Token::Text(text) => {
                let ws: String = text.chars().filter(|ch| ch.is_ascii_whitespace()).collect();
                self.insert_text(dom, &ws, false)?;
                Ok(Flow::Done(BuilderSignal::Continue))
            }
            Token::Comment(text) => {
                let current = self.current(dom);
                self.insert_comment(dom, current, text)?;
                Ok(Flow::Done(BuilderSignal::Continue))
            }
            Token::StartTag { name, attrs, .. } => match name.as_str() {
                "frameset" => {
                    let id = self.insert_element(dom, "frameset", attrs, false)?;
                    self.open.push(id);
                    Ok(Flow::Done(BuilderSignal::Continue))
                }
                "frame" => {
                    self.insert_element(dom, "frame", attrs, false)?;
                    Ok(Flow::Done(BuilderSignal::Continue))
                }
                "noframes" => self.begin_raw_text(dom, "noframes", attrs, false),
                _ => Ok(Flow::Done(BuilderSignal::Continue)),
            },
            Token::EndTag { name } if name == "frameset" => {
                if self.current_tag_is(dom, "frameset") {
                    self.pop_to(dom, self.open.len().saturating_sub(1));
                }
                if !self.current_tag_is(dom, "frameset") {
                    self.mode = InsertionMode::AfterFrameset;
                }
                Ok(Flow::Done(BuilderSignal::Continue))
            }
            _ => Ok(Flow::Done(BuilderSignal::Continue)),
        }
    }

    fn after_body(&mut self, dom: &mut Dom, token: Token) -> Result<Flow> {
        match token {
            Token::Comment(text) => {
                let html = self.open.first().copied().unwrap_or(dom.root);
                self.insert_comment(dom, html, text)?;
                Ok(Flow::Done(BuilderSignal::Continue))
            }
            Token::Doctype { .. } => Ok(Flow::Done(BuilderSignal::Continue)),
            Token::EndTag { name } if name == "html" => Ok(Flow::Done(BuilderSignal::Continue)),
            Token::Text(text) if text.trim().is_empty() => {
                self.insert_text(dom, &text, false)?;
                Ok(Flow::Done(BuilderSignal::Continue))
            }
            other => {
                self.mode = InsertionMode::InBody;
                Ok(Flow::Reprocess(other))
            }
        }
    }

    fn after_frameset(&mut self, dom: &mut Dom, token: Token) -> Result<Flow> {
        match token {
            Token::Comment(text) => {
                let html = self.open.first().copied().unwrap_or(dom.root);
                self.insert_comment(dom, html, text)?;
                Ok(Flow::Done(BuilderSignal::Continue))
            }
            Token::StartTag { name, attrs, .. } if name == "noframes" => {
                self.begin_raw_text(dom, "noframes", attrs, false)
            }
            Token::Text(text) => {
                let ws: String = text.chars().filter(|ch| ch.is_ascii_whitespace()).collect();
                self.insert_text(dom, &ws, false)?;
                Ok(Flow::Done(BuilderSignal::Continue))
            }
            _ => Ok(Flow::Done(BuilderSignal::Continue)),
        }
    }

    fn current_tag_is(&self, dom: &Dom, tag: &str) -> bool {
        dom.tag_name(self.current(dom)) == Some(tag)
    }
}

fn is_block_tag(tag: &str) -> bool {
    matches!(
        tag,
        "address"
            | "article"
            | "aside"
            | "blockquote"
            | "center"
            | "details"
            | "dialog"
            | "dir"
            | "div"
            | "dl"
            | "fieldset"
            | "figcaption"
            | "figure"
            | "footer"
            | "form"
            | "header"
            | "hgroup"
            | "listing"
            | "main"
            | "menu"
            | "nav"
            | "ol"
            | "pre"
            | "section"
            | "summary"
            | "ul"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokenizer::{InputStack, Step, Tokenizer};

    fn build(src: &str) -> Result<(Dom, Option<CompatMode>, Vec<NodeId>)> {
        let mut dom = Dom::new();
        let mut compat = None;
        let mut builder = TreeBuilder::new();
        let mut tokenizer = Tokenizer::new();
        let mut input = InputStack::new();
        let mut scripts = Vec::new();
        input.push_segment(src);
        loop {
            let token = match tokenizer.next(&mut input, 0) {
                (Step::Token, Some(token)) => token,
                _ => break,
            };
            dispatch(&mut builder, &mut dom, &mut compat, &mut tokenizer, &mut scripts, token)?;
        }
        for token in tokenizer.finish() {
            dispatch(&mut builder, &mut dom, &mut compat, &mut tokenizer, &mut scripts, token)?;
        }
        builder.finish(&mut dom)?;
        Ok((dom, compat, scripts))
    }

    fn dispatch(
        builder: &mut TreeBuilder,
        dom: &mut Dom,
        compat: &mut Option<CompatMode>,
        tokenizer: &mut Tokenizer,
        scripts: &mut Vec<NodeId>,
        token: Token,
    ) -> Result<()> {
        match builder.process(dom, compat, token)? {
            BuilderSignal::Continue => {}
            BuilderSignal::EnterRawText { tag, escapable } => {
                tokenizer.enter_raw_text(&tag, escapable);
            }
            BuilderSignal::ScriptReady(id) => scripts.push(id),
        }
        Ok(())
    }

    fn body_html(dom: &Dom) -> String {
        dom.body().map(|body| dom.inner_html(body)).unwrap_or_default()
    }

    #[test]
    fn bare_text_grows_the_full_skeleton() -> Result<()> {
        let (dom, compat, _) = build("hello")?;
        let html = dom.html_element().expect("html");
        let tags: Vec<_> = dom
            .children(html)
            .iter()
            .filter_map(|&child| dom.tag_name(child))
            .collect();
        assert_eq!(tags, vec!["head", "body"]);
        assert_eq!(body_html(&dom), "hello");
        assert_eq!(compat, Some(CompatMode::Quirks));
        Ok(())
    }

    #[test]
    fn doctype_html_parses_no_quirks() -> Result<()> {
        let (_, compat, _) = build("<!DOCTYPE html><p>x</p>")?;
        assert_eq!(compat, Some(CompatMode::NoQuirks));
        Ok(())
    }

    #[test]
    fn paragraph_closes_on_block_start_tag() -> Result<()> {
        let (dom, _, _) = build("<p>one<div>two</div>")?;
        assert_eq!(body_html(&dom), "<p>one</p><div>two</div>");
        Ok(())
    }

    #[test]
    fn list_items_have_optional_end_tags() -> Result<()> {
        let (dom, _, _) = build("<ul><li>a<li>b</ul>")?;
        assert_eq!(body_html(&dom), "<ul><li>a</li><li>b</li></ul>");
        Ok(())
    }

    #[test]
    fn stray_end_p_materializes_an_empty_paragraph() -> Result<()> {
        let (dom, _, _) = build("<div></p></div>")?;
        assert_eq!(body_html(&dom), "<div><p></p></div>");
        Ok(())
    }

    #[test]
    fn table_fosters_non_table_content_before_the_table() -> Result<()> {
        let (dom, _, _) = build("<table><div>oops</div><tr><td>x</td></tr></table>")?;
        assert_eq!(
            body_html(&dom),
            "<div>oops</div><table><tbody><tr><td>x</td></tr></tbody></table>"
        );
        Ok(())
    }

    #[test]
    fn table_rows_imply_tbody() -> Result<()> {
        let (dom, _, _) = build("<table><tr><td>a</td><td>b</td></table>")?;
        assert_eq!(
            body_html(&dom),
            "<table><tbody><tr><td>a</td><td>b</td></tr></tbody></table>"
        );
        Ok(())
    }

    #[test]
    fn content_after_table_lands_back_in_body() -> Result<()> {
        let (dom, _, _) = build("<table></table><p>after")?;
        assert_eq!(body_html(&dom), "<table></table><p>after</p>");
        Ok(())
    }

    #[test]
    fn parser_inserted_script_is_signalled() -> Result<()> {
        let (dom, _, scripts) = build("<script>if (a < b) { f(); }</script>")?;
        assert_eq!(scripts.len(), 1);
        assert_eq!(dom.text_content(scripts[0]), "if (a < b) { f(); }");
        let element = dom.element(scripts[0]).expect("script element");
        assert!(element.parser_inserted);
        assert!(!element.already_started);
        Ok(())
    }

    #[test]
    fn template_scripts_are_born_inert() -> Result<()> {
        let (dom, _, scripts) = build("<template><script>x()</script></template>")?;
        assert_eq!(scripts.len(), 1);
        assert!(dom.element(scripts[0]).expect("script").already_started);
        Ok(())
    }

    #[test]
    fn unterminated_script_is_sealed_without_running() -> Result<()> {
        let (dom, _, scripts) = build("<script>never closed")?;
        assert!(scripts.is_empty());
        let script = dom
            .first_element_with_tag(dom.root, "script")
            .expect("script");
        assert!(dom.element(script).expect("script").already_started);
        Ok(())
    }

    #[test]
    fn stray_html_start_tag_merges_missing_attributes() -> Result<()> {
        let (dom, _, _) = build("<html lang=\"en\"><body><html lang=\"fr\" id=\"r\">")?;
        let html = dom.html_element().expect("html");
        assert_eq!(dom.attr(html, "lang"), Some("en"));
        assert_eq!(dom.attr(html, "id"), Some("r"));
        Ok(())
    }

    #[test]
    fn head_content_after_head_reenters_the_head() -> Result<()> {
        let (dom, _, _) = build("<head></head><meta charset=\"utf-8\"><body>x")?;
        let html = dom.html_element().expect("html");
        let head = dom
            .children(html)
            .iter()
            .copied()
            .find(|&child| dom.tag_name(child) == Some("head"))
            .expect("head");
        assert!(dom
            .children(head)
            .iter()
            .any(|&child| dom.tag_name(child) == Some("meta")));
        Ok(())
    }

    #[test]
    fn frameset_document_has_no_body() -> Result<()> {
        let (dom, _, _) = build("<frameset><frame src=\"a\"><frame src=\"b\"></frameset>")?;
        let body = dom.body().expect("frameset as body slot");
        assert_eq!(dom.tag_name(body), Some("frameset"));
        assert_eq!(dom.children(body).len(), 2);
        Ok(())
    }

    #[test]
    fn fragment_scripts_are_marked_already_started() -> Result<()> {
        let mut dom = Dom::new();
        let host = dom.create_element("div", Vec::new());
        dom.append_child(dom.root, host)?;
        let mut builder = TreeBuilder::fragment(host, true);
        let mut tokenizer = Tokenizer::new();
        let mut input = InputStack::new();
        let mut compat = None;
        let mut scripts = Vec::new();
        input.push_segment("<b>x</b><script>f()</script>");
        loop {
            let token = match tokenizer.next(&mut input, 0) {
                (Step::Token, Some(token)) => token,
                _ => break,
            };
            dispatch(&mut builder, &mut dom, &mut compat, &mut tokenizer, &mut scripts, token)?;
        }
        for token in tokenizer.finish() {
            dispatch(&mut builder, &mut dom, &mut compat, &mut tokenizer, &mut scripts, token)?;
        }
        builder.finish(&mut dom)?;
        assert_eq!(dom.inner_html(host), "<b>x</b><script>f()</script>");
        let script = dom.first_element_with_tag(host, "script").expect("script");
        assert!(dom.element(script).expect("script").already_started);
        Ok(())
    }
}
