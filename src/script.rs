//! Script scheduling and the collaborator seams.
//!
//! The crate does not interpret JavaScript. It owns the ordering: scripts
//! run in document order, except that a script discovered through
//! `document.write` while an external script is still pending fetch queues
//! behind it. Execution is synchronous from the tree constructor's point of
//! view; all reentrancy is same-stack calls back into the document.
//!
//! [`ScriptedEngine`] is a deterministic stand-in interpreting a tiny command
//! language (`log`/`write`/`writeln`/`open`/`close`/`throw`), enough to
//! exercise every reentrancy path without a JS runtime.

use std::collections::{HashMap, VecDeque};

use crate::document::Document;
use crate::dom::NodeId;

/// Error thrown by a script. Aborts only the script itself.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("script error: {message}")]
pub struct ScriptError {
    pub message: String,
}

impl ScriptError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("fetch of {url} failed: {reason}")]
pub struct FetchError {
    pub url: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchResponse {
    pub body: Vec<u8>,
    pub mime_type: Option<String>,
    pub charset: Option<String>,
}

impl FetchResponse {
    pub fn from_text(body: &str) -> Self {
        Self {
            body: body.as_bytes().to_vec(),
            mime_type: Some("text/javascript".to_string()),
            charset: Some("utf-8".to_string()),
        }
    }
}

/// Where a script came from; decides its place in the execution order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptOrigin {
    Inline,
    External { url: String },
    WriteInjected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Pending,
    Ready,
    Executing,
    Done,
    Failed,
}

/// A script lifted out of the tree, waiting its turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptTask {
    pub node: NodeId,
    pub origin: ScriptOrigin,
    pub source: String,
    pub state: TaskState,
    /// Document generation the task belongs to; a task left over from before
    /// a `document.open()` reset is a no-op.
    pub generation: u64,
}

impl ScriptTask {
    pub(crate) fn new(node: NodeId, origin: ScriptOrigin, source: String, generation: u64) -> Self {
        Self {
            node,
            origin,
            source,
            state: TaskState::Pending,
            generation,
        }
    }
}

/// FIFO task queue per document.
#[derive(Debug, Default)]
pub(crate) struct Scheduler {
    queue: VecDeque<ScriptTask>,
}

impl Scheduler {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&mut self, task: ScriptTask) {
        self.queue.push_back(task);
    }

    pub(crate) fn pop(&mut self) -> Option<ScriptTask> {
        self.queue.pop_front()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub(crate) fn clear(&mut self) {
        self.queue.clear();
    }
}

/// The external script engine contract. `execute` may reenter the document
/// through `write`/`writeln`/`open`/`close` and any DOM mutation API; all of
/// that happens on the same call stack.
pub trait ScriptEngine {
    fn execute(
        &mut self,
        document: &mut Document,
        fetcher: &mut dyn ResourceFetcher,
        task: &ScriptTask,
    ) -> Result<(), ScriptError>;
}

/// The network collaborator. Completions are funneled back synchronously;
/// a failure means the script is skipped, never retried.
pub trait ResourceFetcher {
    fn fetch(&mut self, url: &str) -> Result<FetchResponse, FetchError>;
}

/// `type` attribute gate: only JavaScript media types and modules execute,
/// anything else is inert data.
pub(crate) fn is_executable_script_type(declared: Option<&str>) -> bool {
    let Some(declared) = declared else {
        return true;
    };
    let declared = declared.trim();
    if declared.is_empty() {
        return true;
    }
    let lower = declared.to_ascii_lowercase();
    matches!(
        lower.as_str(),
        "text/javascript"
            | "text/ecmascript"
            | "application/javascript"
            | "application/ecmascript"
            | "application/x-javascript"
            | "module"
    )
}

/// Engine that ignores every script. Parsing proceeds as if scripts were
/// empty.
#[derive(Debug, Default)]
pub struct NullEngine;

impl ScriptEngine for NullEngine {
    fn execute(
        &mut self,
        _document: &mut Document,
        _fetcher: &mut dyn ResourceFetcher,
        _task: &ScriptTask,
    ) -> Result<(), ScriptError> {
        Ok(())
    }
}

/// Deterministic command-language engine for tests. Source is a `;`-separated
/// command list; quotes protect separators inside arguments.
#[derive(Debug, Default)]
pub struct ScriptedEngine {
    entries: Vec<String>,
}

impl ScriptedEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything `log(...)` recorded, in execution order.
    pub fn log(&self) -> &[String] {
        &self.entries
    }
}

impl ScriptEngine for ScriptedEngine {
    fn execute(
        &mut self,
        document: &mut Document,
        fetcher: &mut dyn ResourceFetcher,
        task: &ScriptTask,
    ) -> Result<(), ScriptError> {
        for command in split_commands(&task.source) {
            let Some((name, arg)) = parse_command(&command) else {
                continue;
            };
            match name.as_str() {
                "log" => self.entries.push(arg),
                "write" => document
                    .write(self, fetcher, &arg)
                    .map_err(|err| ScriptError::new(err.to_string()))?,
                "writeln" => document
                    .writeln(self, fetcher, &arg)
                    .map_err(|err| ScriptError::new(err.to_string()))?,
                "open" => document.open(),
                "close" => document
                    .close(self, fetcher)
                    .map_err(|err| ScriptError::new(err.to_string()))?,
                "throw" => return Err(ScriptError::new(arg)),
                other => {
                    return Err(ScriptError::new(format!("unknown command: {other}")));
                }
            }
        }
        Ok(())
    }
}

fn split_commands(source: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    for ch in source.chars() {
        match quote {
            Some(open) => {
                current.push(ch);
                if ch == open {
                    quote = None;
                }
            }
            None => match ch {
                '\'' | '"' => {
                    quote = Some(ch);
                    current.push(ch);
                }
                ';' => {
                    if !current.trim().is_empty() {
                        out.push(current.trim().to_string());
                    }
                    current.clear();
                }
                _ => current.push(ch),
            },
        }
    }
    if !current.trim().is_empty() {
        out.push(current.trim().to_string());
    }
    out
}

fn parse_command(command: &str) -> Option<(String, String)> {
    let open = command.find('(')?;
    let close = command.rfind(')')?;
    if close < open {
        return None;
    }
    let name = command[..open].trim().to_string();
    let mut arg = command[open + 1..close].trim();
    for quote in ['\'', '"'] {
        if arg.len() >= 2 && arg.starts_with(quote) && arg.ends_with(quote) {
            arg = &arg[1..arg.len() - 1];
            break;
        }
    }
    Some((name, arg.to_string()))
}

/// Url-to-response map standing in for the network.
#[derive(Debug, Default)]
pub struct StaticFetcher {
    responses: HashMap<String, FetchResponse>,
}

impl StaticFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, url: impl Into<String>, response: FetchResponse) {
        self.responses.insert(url.into(), response);
    }

    pub fn with_script(mut self, url: impl Into<String>, body: &str) -> Self {
        self.insert(url, FetchResponse::from_text(body));
        self
    }
}

impl ResourceFetcher for StaticFetcher {
    fn fetch(&mut self, url: &str) -> Result<FetchResponse, FetchError> {
        self.responses.get(url).cloned().ok_or_else(|| FetchError {
            url: url.to_string(),
            reason: "no response configured".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_splitting_respects_quotes() {
        assert_eq!(
            split_commands("log('a;b'); write(\"<p>;</p>\") ; log(c)"),
            vec!["log('a;b')", "write(\"<p>;</p>\")", "log(c)"]
        );
    }

    #[test]
    fn command_parsing_strips_one_quote_layer() {
        assert_eq!(
            parse_command("write('<script>log(2)</script>')"),
            Some(("write".into(), "<script>log(2)</script>".into()))
        );
        assert_eq!(parse_command("log(plain)"), Some(("log".into(), "plain".into())));
        assert_eq!(parse_command("no parens"), None);
    }

    #[test]
    fn script_type_gate() {
        assert!(is_executable_script_type(None));
        assert!(is_executable_script_type(Some("")));
        assert!(is_executable_script_type(Some("text/javascript")));
        assert!(is_executable_script_type(Some("  Application/JavaScript ")));
        assert!(is_executable_script_type(Some("module")));
        assert!(!is_executable_script_type(Some("text/vbscript")));
        assert!(!is_executable_script_type(Some("application/json")));
    }

    #[test]
    fn static_fetcher_misses_are_errors() {
        let mut fetcher = StaticFetcher::new().with_script("http://x/a.js", "log(1)");
        assert!(fetcher.fetch("http://x/a.js").is_ok());
        let err = fetcher.fetch("http://x/missing.js").unwrap_err();
        assert_eq!(err.url, "http://x/missing.js");
    }

    #[test]
    fn scheduler_is_fifo() {
        let mut scheduler = Scheduler::new();
        assert!(scheduler.is_empty());
        scheduler.push(ScriptTask::new(
            NodeId(1, 0),
            ScriptOrigin::External {
                url: "http://x/a.js".into(),
            },
            String::new(),
            0,
        ));
        scheduler.push(ScriptTask::new(NodeId(2, 0), ScriptOrigin::Inline, String::new(), 0));
        assert_eq!(scheduler.pop().map(|task| task.node), Some(NodeId(1, 0)));
        assert_eq!(scheduler.pop().map(|task| task.node), Some(NodeId(2, 0)));
        assert!(scheduler.is_empty());
    }
}
