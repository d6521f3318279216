//! Reentrant parser context.
//!
//! Owns the resumable tokenizer, the input-segment stack, and the tree
//! builder for one parse. The document drives it: a pump advances until a
//! script must run or input above the pump's floor runs out. `document.write`
//! pushes a segment and pumps at that segment's floor, so written markup is
//! consumed before everything queued below it while the outer pump's place
//! in the original stream is preserved.

use crate::compat::CompatMode;
use crate::dom::{Dom, NodeId};
use crate::tokenizer::{InputStack, Step, Tokenizer};
use crate::treebuilder::{BuilderSignal, TreeBuilder};
use crate::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PumpEvent {
    /// Input above the floor is exhausted; tokenizer state stays suspended.
    NeedInput,
    /// A parser-inserted script is complete and must run before the next
    /// token.
    Script(NodeId),
}

#[derive(Debug)]
pub(crate) struct ParserState {
    tokenizer: Tokenizer,
    input: InputStack,
    builder: TreeBuilder,
    pub(crate) active: bool,
}

impl ParserState {
    pub(crate) fn new() -> Self {
        Self {
            tokenizer: Tokenizer::new(),
            input: InputStack::new(),
            builder: TreeBuilder::new(),
            active: true,
        }
    }

    /// Queues input ahead of everything not yet consumed and returns the
    /// floor for pumping just this segment.
    pub(crate) fn push_input(&mut self, text: &str) -> usize {
        self.input.push_segment(text)
    }

    pub(crate) fn pump_step(
        &mut self,
        dom: &mut Dom,
        compat: &mut Option<CompatMode>,
        floor: usize,
    ) -> Result<PumpEvent> {
        loop {
            let token = match self.tokenizer.next(&mut self.input, floor) {
                (Step::Token, Some(token)) => token,
                _ => return Ok(PumpEvent::NeedInput),
            };
            match self.builder.process(dom, compat, token)? {
                BuilderSignal::Continue => {}
                BuilderSignal::EnterRawText { tag, escapable } => {
                    self.tokenizer.enter_raw_text(&tag, escapable);
                }
                BuilderSignal::ScriptReady(id) => return Ok(PumpEvent::Script(id)),
            }
        }
    }

    /// End of input: flushes suspended tokenizer state through the builder
    /// and completes the tree. Returns scripts that became ready during the
    /// flush.
    pub(crate) fn finish(
        &mut self,
        dom: &mut Dom,
        compat: &mut Option<CompatMode>,
    ) -> Result<Vec<NodeId>> {
        let mut scripts = Vec::new();
        for token in self.tokenizer.finish() {
            match self.builder.process(dom, compat, token)? {
                BuilderSignal::Continue => {}
                BuilderSignal::EnterRawText { tag, escapable } => {
                    self.tokenizer.enter_raw_text(&tag, escapable);
                }
                BuilderSignal::ScriptReady(id) => scripts.push(id),
            }
        }
        self.builder.finish(dom)?;
        self.active = false;
        Ok(scripts)
    }
}

/// One-shot fragment parse into `context`, used by `innerHTML`,
/// `outerHTML`, and `insertAdjacentHTML`. Script execution, if any, is the
/// caller's decision; with `inert_scripts` the parsed scripts can never run.
pub(crate) fn parse_fragment(
    dom: &mut Dom,
    context: NodeId,
    html: &str,
    inert_scripts: bool,
) -> Result<()> {
    let mut builder = TreeBuilder::fragment(context, inert_scripts);
    let mut tokenizer = Tokenizer::new();
    let mut input = InputStack::new();
    let mut compat = None;
    input.push_segment(html);
    loop {
        let token = match tokenizer.next(&mut input, 0) {
            (Step::Token, Some(token)) => token,
            _ => break,
        };
        match builder.process(dom, &mut compat, token)? {
            BuilderSignal::Continue | BuilderSignal::ScriptReady(_) => {}
            BuilderSignal::EnterRawText { tag, escapable } => {
                tokenizer.enter_raw_text(&tag, escapable);
            }
        }
    }
    for token in tokenizer.finish() {
        builder.process(dom, &mut compat, token)?;
    }
    builder.finish(dom)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pump_suspends_and_resumes_across_writes() -> Result<()> {
        let mut dom = Dom::new();
        let mut compat = None;
        let mut parser = ParserState::new();
        parser.push_input("<p>a");
        assert_eq!(
            parser.pump_step(&mut dom, &mut compat, 0)?,
            PumpEvent::NeedInput
        );
        parser.push_input("b</p><p>c</p>");
        assert_eq!(
            parser.pump_step(&mut dom, &mut compat, 0)?,
            PumpEvent::NeedInput
        );
        parser.finish(&mut dom, &mut compat)?;
        let body = dom.body().expect("body");
        assert_eq!(dom.inner_html(body), "<p>ab</p><p>c</p>");
        Ok(())
    }

    #[test]
    fn pump_stops_at_a_ready_script() -> Result<()> {
        let mut dom = Dom::new();
        let mut compat = None;
        let mut parser = ParserState::new();
        parser.push_input("<script>f()</script><p>x</p>");
        let event = parser.pump_step(&mut dom, &mut compat, 0)?;
        let PumpEvent::Script(script) = event else {
            panic!("expected a script event, got {event:?}");
        };
        assert_eq!(dom.text_content(script), "f()");
        // The paragraph is not built until the pump resumes.
        assert!(dom.first_element_with_tag(dom.root, "p").is_none());
        assert_eq!(
            parser.pump_step(&mut dom, &mut compat, 0)?,
            PumpEvent::NeedInput
        );
        assert!(dom.first_element_with_tag(dom.root, "p").is_some());
        Ok(())
    }

    #[test]
    fn floored_pump_leaves_the_outer_stream_alone() -> Result<()> {
        let mut dom = Dom::new();
        let mut compat = None;
        let mut parser = ParserState::new();
        parser.push_input("<div>tail</div>");
        let floor = parser.push_input("<p>written</p>");
        assert_eq!(
            parser.pump_step(&mut dom, &mut compat, floor)?,
            PumpEvent::NeedInput
        );
        let body = dom.body().expect("body");
        assert_eq!(dom.inner_html(body), "<p>written</p>");
        assert_eq!(
            parser.pump_step(&mut dom, &mut compat, 0)?,
            PumpEvent::NeedInput
        );
        assert_eq!(dom.inner_html(body), "<p>written</p><div>tail</div>");
        Ok(())
    }

    #[test]
    fn fragment_parse_clears_nothing_and_respects_inertness() -> Result<()> {
        let mut dom = Dom::new();
        let host = dom.create_element("div", Vec::new());
        dom.append_child(dom.root, host)?;
        parse_fragment(&mut dom, host, "<span>a</span><script>f()</script>", true)?;
        let script = dom.first_element_with_tag(host, "script").expect("script");
        assert!(dom.element(script).expect("script").already_started);
        parse_fragment(&mut dom, host, "<script>g()</script>", false)?;
        let fresh = dom
            .descendant_elements(host)
            .into_iter()
            .filter(|&id| dom.tag_name(id) == Some("script"))
            .last()
            .expect("second script");
        assert!(!dom.element(fresh).expect("script").already_started);
        Ok(())
    }
}
