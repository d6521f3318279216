//! Resumable HTML tokenizer.
//!
//! The tokenizer pulls characters from an [`InputStack`] of input segments.
//! `document.write` pushes a new segment on top of the stack, which is
//! consumed before everything below it; a `floor` passed to [`Tokenizer::next`]
//! limits consumption to segments at or above that index so a nested pump
//! never eats into the stream that outlives it. All tokenizer state,
//! including partially built tokens, lives in the struct, so suspension at a
//! segment boundary and later resumption is a plain method call.

use std::collections::VecDeque;

use crate::dom::Attr;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Token {
    StartTag {
        name: String,
        attrs: Vec<Attr>,
        self_closing: bool,
    },
    EndTag {
        name: String,
    },
    Text(String),
    Comment(String),
    Doctype {
        name: Option<String>,
        public_id: Option<String>,
        system_id: Option<String>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Step {
    Token,
    NeedInput,
}

#[derive(Debug)]
struct Segment {
    chars: Vec<char>,
    pos: usize,
}

/// Stack of pending input segments. The top segment is consumed first;
/// `document.write` pushes on top of whatever is still unconsumed.
#[derive(Debug, Default)]
pub(crate) struct InputStack {
    segments: Vec<Segment>,
}

impl InputStack {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Pushes a segment on top of the stack and returns the floor a nested
    /// pump should use to stay inside it.
    pub(crate) fn push_segment(&mut self, text: &str) -> usize {
        let floor = self.segments.len();
        self.segments.push(Segment {
            chars: text.chars().collect(),
            pos: 0,
        });
        floor
    }

    fn next_char(&mut self, floor: usize) -> Option<char> {
        loop {
            if self.segments.len() <= floor {
                return None;
            }
            let segment = self.segments.last_mut()?;
            if segment.pos < segment.chars.len() {
                let ch = segment.chars[segment.pos];
                segment.pos += 1;
                return Some(ch);
            }
            self.segments.pop();
        }
    }

}

#[derive(Debug, Clone, PartialEq, Eq)]
enum State {
    Data,
    TagOpen,
    EndTagOpen,
    TagName,
    BeforeAttrName,
    AttrName,
    AfterAttrName,
    BeforeAttrValue,
    AttrValueDouble,
    AttrValueSingle,
    AttrValueUnquoted,
    AfterAttrValueQuoted,
    SelfClosingStartTag,
    MarkupDeclOpen,
    CommentStart,
    CommentStartDash,
    Comment,
    CommentEndDash,
    CommentEnd,
    BogusComment,
    BeforeDoctypeName,
    DoctypeName,
    AfterDoctypeName,
    BeforeDoctypePublicId,
    DoctypePublicId(char),
    AfterDoctypePublicId,
    BeforeDoctypeSystemId,
    DoctypeSystemId(char),
    AfterDoctypeSystemId,
    BogusDoctype,
    RawText,
    RawTextEndTagOpen,
    RawTextEndTagName,
    RawTextEndTagRest,
}

#[derive(Debug)]
pub(crate) struct Tokenizer {
    state: State,
    reconsume: Option<char>,
    queued: VecDeque<Token>,
    text: String,
    tag_name: String,
    is_end_tag: bool,
    self_closing: bool,
    attrs: Vec<Attr>,
    attr_name: String,
    attr_value: String,
    attr_has_value: bool,
    scratch: String,
    comment: String,
    doctype_name: Option<String>,
    doctype_public: Option<String>,
    doctype_system: Option<String>,
    raw_tag: String,
    raw_escapable: bool,
    raw_end_name: String,
}

impl Tokenizer {
    pub(crate) fn new() -> Self {
        Self {
            state: State::Data,
            reconsume: None,
            queued: VecDeque::new(),
            text: String::new(),
            tag_name: String::new(),
            is_end_tag: false,
            self_closing: false,
            attrs: Vec::new(),
            attr_name: String::new(),
            attr_value: String::new(),
            attr_has_value: false,
            scratch: String::new(),
            comment: String::new(),
            doctype_name: None,
            doctype_public: None,
            doctype_system: None,
            raw_tag: String::new(),
            raw_escapable: false,
            raw_end_name: String::new(),
        }
    }

    /// Switches to raw-text consumption until the matching end tag. The tree
    /// constructor calls this right after it inserts a raw-text element.
    pub(crate) fn enter_raw_text(&mut self, tag: &str, escapable: bool) {
        self.state = State::RawText;
        self.raw_tag = tag.to_ascii_lowercase();
        self.raw_escapable = escapable;
        self.text.clear();
    }

    /// Advances the state machine until a token completes or input above
    /// `floor` runs out. Suspension keeps partial token state intact.
    pub(crate) fn next(&mut self, input: &mut InputStack, floor: usize) -> (Step, Option<Token>) {
        if let Some(token) = self.queued.pop_front() {
            return (Step::Token, Some(token));
        }
        loop {
            let Some(ch) = self.pull(input, floor) else {
                // Text already seen can be released at a suspension point;
                // the tree constructor merges adjacent runs. A trailing run
                // that may still grow into a complete character reference
                // stays buffered until more input decides it.
                if self.state == State::Data && !self.text.is_empty() {
                    let held = pending_reference_len(&self.text);
                    if held < self.text.len() {
                        let tail = self.text.split_off(self.text.len() - held);
                        let flushed = std::mem::replace(&mut self.text, tail);
                        let token = Token::Text(decode_character_references(&flushed));
                        return (Step::Token, Some(token));
                    }
                }
                return (Step::NeedInput, None);
            };
            if let Some(token) = self.step(ch) {
                return (Step::Token, Some(token));
            }
            if let Some(token) = self.queued.pop_front() {
                return (Step::Token, Some(token));
            }
        }
    }

    /// Flushes whatever remains at end of input, per the fixed recovery
    /// rules: pending text and unterminated comments/doctypes are emitted,
    /// half-open tags are dropped.
    pub(crate) fn finish(&mut self) -> Vec<Token> {
        let mut out: Vec<Token> = self.queued.drain(..).collect();
        match self.state {
            State::Data => {
                if !self.text.is_empty() {
                    out.push(Token::Text(decode_character_references(&take(&mut self.text))));
                }
            }
            State::TagOpen => {
                // An unclassified `<` at end of input is plain text.
                self.text.push('<');
                out.push(Token::Text(decode_character_references(&take(&mut self.text))));
            }
            State::RawText
            | State::RawTextEndTagOpen
            | State::RawTextEndTagName
            | State::RawTextEndTagRest => {
                self.text.push_str(&take(&mut self.scratch));
                if !self.text.is_empty() {
                    out.push(Token::Text(self.take_raw_text()));
                }
            }
            State::Comment
            | State::CommentStart
            | State::CommentStartDash
            | State::CommentEndDash
            | State::CommentEnd
            | State::BogusComment => {
                out.push(Token::Comment(take(&mut self.comment)));
            }
            State::BeforeDoctypeName
            | State::DoctypeName
            | State::AfterDoctypeName
            | State::BeforeDoctypePublicId
            | State::DoctypePublicId(_)
            | State::AfterDoctypePublicId
            | State::BeforeDoctypeSystemId
            | State::DoctypeSystemId(_)
            | State::AfterDoctypeSystemId
            | State::BogusDoctype => {
                out.push(self.take_doctype());
            }
            _ => {
                log::debug!("dropping half-open tag at end of input");
            }
        }
        self.state = State::Data;
        out
    }

    fn pull(&mut self, input: &mut InputStack, floor: usize) -> Option<char> {
        if let Some(ch) = self.reconsume.take() {
            return Some(ch);
        }
        input.next_char(floor)
    }

    fn step(&mut self, ch: char) -> Option<Token> {
        match self.state {
            State::Data => match ch {
                '<' => {
                    // Pending text is not flushed yet; a stray `<` degrades
                    // back into it.
                    self.state = State::TagOpen;
                    None
                }
                _ => {
                    self.text.push(ch);
                    None
                }
            },
            State::TagOpen => match ch {
                '!' => {
                    self.scratch.clear();
                    self.state = State::MarkupDeclOpen;
                    self.flush_pending_text()
                }
                '/' => {
                    self.state = State::EndTagOpen;
                    self.flush_pending_text()
                }
                '?' => {
                    // `<?...>` is a bogus comment, never a doctype; a
                    // document relying on it classifies as quirks later.
                    self.comment.clear();
                    self.comment.push('?');
                    self.state = State::BogusComment;
                    self.flush_pending_text()
                }
                c if c.is_ascii_alphabetic() => {
                    self.begin_tag(false);
                    self.tag_name.push(c.to_ascii_lowercase());
                    self.state = State::TagName;
                    self.flush_pending_text()
                }
                _ => {
                    // Stray `<` degrades to text.
                    self.text.push('<');
                    self.reconsume = Some(ch);
                    self.state = State::Data;
                    None
                }
            },
            State::EndTagOpen => match ch {
                '>' => {
                    self.state = State::Data;
                    None
                }
                c if c.is_ascii_alphabetic() => {
                    self.begin_tag(true);
                    self.tag_name.push(c.to_ascii_lowercase());
                    self.state = State::TagName;
                    None
                }
                _ => {
                    self.comment.clear();
                    self.comment.push(ch);
                    self.state = State::BogusComment;
                    None
                }
            },
            State::TagName => match ch {
                c if c.is_ascii_whitespace() => {
                    self.state = State::BeforeAttrName;
                    None
                }
                '/' => {
                    self.state = State::SelfClosingStartTag;
                    None
                }
                '>' => self.emit_tag(),
                c => {
                    self.tag_name.push(c.to_ascii_lowercase());
                    None
                }
            },
            State::BeforeAttrName => match ch {
                c if c.is_ascii_whitespace() => None,
                '/' => {
                    self.state = State::SelfClosingStartTag;
                    None
                }
                '>' => self.emit_tag(),
                c => {
                    self.attr_name.clear();
                    self.attr_value.clear();
                    self.attr_has_value = false;
                    self.attr_name.push(c.to_ascii_lowercase());
                    self.state = State::AttrName;
                    None
                }
            },
            State::AttrName => match ch {
                c if c.is_ascii_whitespace() => {
                    self.state = State::AfterAttrName;
                    None
                }
                '=' => {
                    self.state = State::BeforeAttrValue;
                    None
                }
                '/' => {
                    self.finish_attr();
                    self.state = State::SelfClosingStartTag;
                    None
                }
                '>' => {
                    self.finish_attr();
                    self.emit_tag()
                }
                c => {
                    self.attr_name.push(c.to_ascii_lowercase());
                    None
                }
            },
            State::AfterAttrName => match ch {
                c if c.is_ascii_whitespace() => None,
                '=' => {
                    self.state = State::BeforeAttrValue;
                    None
                }
                '/' => {
                    self.finish_attr();
                    self.state = State::SelfClosingStartTag;
                    None
                }
                '>' => {
                    self.finish_attr();
                    self.emit_tag()
                }
                c => {
                    self.finish_attr();
                    self.attr_name.push(c.to_ascii_lowercase());
                    self.state = State::AttrName;
                    None
                }
            },
            State::BeforeAttrValue => match ch {
                c if c.is_ascii_whitespace() => None,
                '"' => {
                    self.attr_has_value = true;
                    self.state = State::AttrValueDouble;
                    None
                }
                '\'' => {
                    self.attr_has_value = true;
                    self.state = State::AttrValueSingle;
                    None
                }
                '>' => {
                    self.finish_attr();
                    self.emit_tag()
                }
                c => {
                    self.attr_has_value = true;
                    self.attr_value.push(c);
                    self.state = State::AttrValueUnquoted;
                    None
                }
            },
            State::AttrValueDouble => match ch {
                '"' => {
                    self.finish_attr();
                    self.state = State::AfterAttrValueQuoted;
                    None
                }
                c => {
                    self.attr_value.push(c);
                    None
                }
            },
            State::AttrValueSingle => match ch {
                '\'' => {
                    self.finish_attr();
                    self.state = State::AfterAttrValueQuoted;
                    None
                }
                c => {
                    self.attr_value.push(c);
                    None
                }
            },
            State::AttrValueUnquoted => match ch {
                c if c.is_ascii_whitespace() => {
                    self.finish_attr();
                    self.state = State::BeforeAttrName;
                    None
                }
                '>' => {
                    self.finish_attr();
                    self.emit_tag()
                }
                c => {
                    self.attr_value.push(c);
                    None
                }
            },
            State::AfterAttrValueQuoted => match ch {
                c if c.is_ascii_whitespace() => {
                    self.state = State::BeforeAttrName;
                    None
                }
                '/' => {
                    self.state = State::SelfClosingStartTag;
                    None
                }
                '>' => self.emit_tag(),
                c => {
                    self.reconsume = Some(c);
                    self.state = State::BeforeAttrName;
                    None
                }
            },
            State::SelfClosingStartTag => match ch {
                '>' => {
                    self.self_closing = true;
                    self.emit_tag()
                }
                c => {
                    self.reconsume = Some(c);
                    self.state = State::BeforeAttrName;
                    None
                }
            },
            State::MarkupDeclOpen => {
                if ch == '-' && self.scratch == "-" {
                    self.scratch.clear();
                    self.comment.clear();
                    self.state = State::CommentStart;
                    return None;
                }
                if ch == '-' && self.scratch.is_empty() {
                    self.scratch.push('-');
                    return None;
                }
                self.scratch.push(ch);
                let lower = self.scratch.to_ascii_lowercase();
                if lower == "doctype" {
                    self.scratch.clear();
                    self.doctype_name = None;
                    self.doctype_public = None;
                    self.doctype_system = None;
                    self.state = State::BeforeDoctypeName;
                    return None;
                }
                if "doctype".starts_with(&lower) {
                    return None;
                }
                // Anything else is a bogus comment, `]]>`-style declaration
                // blocks included.
                if ch == '>' {
                    self.scratch.pop();
                    self.state = State::Data;
                    return Some(Token::Comment(take(&mut self.scratch)));
                }
                self.comment = take(&mut self.scratch);
                self.state = State::BogusComment;
                None
            }
            State::CommentStart => match ch {
                '-' => {
                    self.state = State::CommentStartDash;
                    None
                }
                '>' => {
                    self.state = State::Data;
                    Some(Token::Comment(take(&mut self.comment)))
                }
                c => {
                    self.comment.push(c);
                    self.state = State::Comment;
                    None
                }
            },
            State::CommentStartDash => match ch {
                '-' => {
                    self.state = State::CommentEnd;
                    None
                }
                '>' => {
                    self.state = State::Data;
                    Some(Token::Comment(take(&mut self.comment)))
                }
                c => {
                    self.comment.push('-');
                    self.comment.push(c);
                    self.state = State::Comment;
                    None
                }
            },
            State::Comment => match ch {
                '-' => {
                    self.state = State::CommentEndDash;
                    None
                }
                c => {
                    self.comment.push(c);
                    None
                }
            },
            State::CommentEndDash => match ch {
                '-' => {
                    self.state = State::CommentEnd;
                    None
                }
                c => {
                    self.comment.push('-');
                    self.comment.push(c);
                    self.state = State::Comment;
                    None
                }
            },
            State::CommentEnd => match ch {
                '>' => {
                    self.state = State::Data;
                    Some(Token::Comment(take(&mut self.comment)))
                }
                '-' => {
                    self.comment.push('-');
                    None
                }
                c => {
                    self.comment.push_str("--");
                    self.comment.push(c);
                    self.state = State::Comment;
                    None
                }
            },
            State::BogusComment => match ch {
                '>' => {
                    self.state = State::Data;
                    Some(Token::Comment(take(&mut self.comment)))
                }
                c => {
                    self.comment.push(c);
                    None
                }
            },
            State::BeforeDoctypeName => match ch {
                c if c.is_ascii_whitespace() => None,
                '>' => self.emit_doctype(),
                c => {
                    self.doctype_name = Some(c.to_ascii_lowercase().to_string());
                    self.state = State::DoctypeName;
                    None
                }
            },
            State::DoctypeName => match ch {
                c if c.is_ascii_whitespace() => {
                    self.scratch.clear();
                    self.state = State::AfterDoctypeName;
                    None
                }
                '>' => self.emit_doctype(),
                c => {
                    if let Some(name) = self.doctype_name.as_mut() {
                        name.push(c.to_ascii_lowercase());
                    }
                    None
                }
            },
            State::AfterDoctypeName => match ch {
                c if c.is_ascii_whitespace() && self.scratch.is_empty() => None,
                '>' => self.emit_doctype(),
                c => {
                    self.scratch.push(c);
                    let lower = self.scratch.to_ascii_lowercase();
                    if lower == "public" {
                        self.scratch.clear();
                        self.state = State::BeforeDoctypePublicId;
                    } else if lower == "system" {
                        self.scratch.clear();
                        self.state = State::BeforeDoctypeSystemId;
                    } else if !"public".starts_with(&lower) && !"system".starts_with(&lower) {
                        self.scratch.clear();
                        self.state = State::BogusDoctype;
                    }
                    None
                }
            },
            State::BeforeDoctypePublicId => match ch {
                c if c.is_ascii_whitespace() => None,
                q @ ('"' | '\'') => {
                    self.doctype_public = Some(String::new());
                    self.state = State::DoctypePublicId(q);
                    None
                }
                '>' => self.emit_doctype(),
                _ => {
                    self.state = State::BogusDoctype;
                    None
                }
            },
            State::DoctypePublicId(q) => match ch {
                c if c == q => {
                    self.state = State::AfterDoctypePublicId;
                    None
                }
                '>' => self.emit_doctype(),
                c => {
                    if let Some(public) = self.doctype_public.as_mut() {
                        public.push(c);
                    }
                    None
                }
            },
            State::AfterDoctypePublicId => match ch {
                c if c.is_ascii_whitespace() => None,
                q @ ('"' | '\'') => {
                    self.doctype_system = Some(String::new());
                    self.state = State::DoctypeSystemId(q);
                    None
                }
                '>' => self.emit_doctype(),
                _ => {
                    self.state = State::BogusDoctype;
                    None
                }
            },
            State::BeforeDoctypeSystemId => match ch {
                c if c.is_ascii_whitespace() => None,
                q @ ('"' | '\'') => {
                    self.doctype_system = Some(String::new());
                    self.state = State::DoctypeSystemId(q);
                    None
                }
                '>' => self.emit_doctype(),
                _ => {
                    self.state = State::BogusDoctype;
                    None
                }
            },
            State::DoctypeSystemId(q) => match ch {
                c if c == q => {
                    self.state = State::AfterDoctypeSystemId;
                    None
                }
                '>' => self.emit_doctype(),
                c => {
                    if let Some(system) = self.doctype_system.as_mut() {
                        system.push(c);
                    }
                    None
                }
            },
            State::AfterDoctypeSystemId | State::BogusDoctype => match ch {
                '>' => self.emit_doctype(),
                _ => None,
            },
            State::RawText => match ch {
                '<' => {
                    self.scratch.clear();
                    self.scratch.push('<');
                    self.state = State::RawTextEndTagOpen;
                    None
                }
                c => {
                    self.text.push(c);
                    None
                }
            },
            State::RawTextEndTagOpen => match ch {
                '/' => {
                    self.scratch.push('/');
                    self.raw_end_name.clear();
                    self.state = State::RawTextEndTagName;
                    None
                }
                c => {
                    self.text.push_str(&take(&mut self.scratch));
                    self.reconsume = Some(c);
                    self.state = State::RawText;
                    None
                }
            },
            State::RawTextEndTagName => {
                if ch.is_ascii_alphanumeric() {
                    self.scratch.push(ch);
                    self.raw_end_name.push(ch.to_ascii_lowercase());
                    if self.raw_end_name.len() > self.raw_tag.len() {
                        self.text.push_str(&take(&mut self.scratch));
                        self.state = State::RawText;
                    }
                    return None;
                }
                if self.raw_end_name == self.raw_tag
                    && (ch.is_ascii_whitespace() || ch == '>' || ch == '/')
                {
                    if ch == '>' {
                        return self.emit_raw_end();
                    }
                    self.state = State::RawTextEndTagRest;
                    return None;
                }
                self.text.push_str(&take(&mut self.scratch));
                self.reconsume = Some(ch);
                self.state = State::RawText;
                None
            }
            State::RawTextEndTagRest => match ch {
                '>' => self.emit_raw_end(),
                _ => None,
            },
        }
    }

    /// Emits buffered Data-state text once a `<` has been classified as a
    /// real tag, comment, or declaration opener.
    fn flush_pending_text(&mut self) -> Option<Token> {
        if self.text.is_empty() {
            return None;
        }
        Some(Token::Text(decode_character_references(&take(&mut self.text))))
    }

    fn begin_tag(&mut self, is_end: bool) {
        self.tag_name.clear();
        self.attrs.clear();
        self.attr_name.clear();
        self.attr_value.clear();
        self.attr_has_value = false;
        self.is_end_tag = is_end;
        self.self_closing = false;
    }

    fn finish_attr(&mut self) {
        if self.attr_name.is_empty() {
            return;
        }
        let name = take(&mut self.attr_name);
        let raw_value = take(&mut self.attr_value);
        let value = if self.attr_has_value {
            decode_character_references(&raw_value)
        } else {
            String::new()
        };
        self.attr_has_value = false;
        // First occurrence wins on duplicate attribute names.
        if self.attrs.iter().any(|attr| attr.name == name) {
            return;
        }
        self.attrs.push(Attr { name, value });
    }

    fn emit_tag(&mut self) -> Option<Token> {
        self.state = State::Data;
        let name = take(&mut self.tag_name);
        if self.is_end_tag {
            // End tags carry no attributes.
            self.attrs.clear();
            return Some(Token::EndTag { name });
        }
        Some(Token::StartTag {
            name,
            attrs: std::mem::take(&mut self.attrs),
            self_closing: self.self_closing,
        })
    }

    fn emit_doctype(&mut self) -> Option<Token> {
        self.state = State::Data;
        Some(self.take_doctype())
    }

    fn take_doctype(&mut self) -> Token {
        Token::Doctype {
            name: self.doctype_name.take(),
            public_id: self.doctype_public.take(),
            system_id: self.doctype_system.take(),
        }
    }

    fn emit_raw_end(&mut self) -> Option<Token> {
        self.state = State::Data;
        self.scratch.clear();
        let name = take(&mut self.raw_end_name);
        if !self.text.is_empty() {
            let text = self.take_raw_text();
            self.queued.push_back(Token::EndTag { name });
            return Some(Token::Text(text));
        }
        Some(Token::EndTag { name })
    }

    fn take_raw_text(&mut self) -> String {
        let raw = take(&mut self.text);
        if self.raw_escapable {
            decode_character_references(&raw)
        } else {
            raw
        }
    }
}

fn take(buf: &mut String) -> String {
    std::mem::take(buf)
}

pub(crate) fn is_void_tag(tag: &str) -> bool {
    matches!(
        tag,
        "area"
            | "base"
            | "br"
            | "col"
            | "embed"
            | "hr"
            | "img"
            | "input"
            | "link"
            | "meta"
            | "param"
            | "source"
            | "track"
            | "wbr"
    )
}

/// Content is consumed verbatim until the matching end tag.
pub(crate) fn is_raw_text_tag(tag: &str) -> bool {
    matches!(
        tag,
        "script" | "style" | "xmp" | "noscript" | "noframes" | "textarea" | "title"
    )
}

/// Raw text whose character references are still decoded.
pub(crate) fn is_escapable_raw_text_tag(tag: &str) -> bool {
    matches!(tag, "textarea" | "title")
}

/// Longest suffix that could still grow into a complete character reference
/// with more input. Zero when the trailing `&` run is already decided.
fn pending_reference_len(text: &str) -> usize {
    let Some(amp) = text.rfind('&') else {
        return 0;
    };
    let tail = &text[amp + 1..];
    if tail.len() <= 32 && tail.chars().all(|ch| ch.is_ascii_alphanumeric() || ch == '#') {
        text.len() - amp
    } else {
        0
    }
}

/// Decodes the named subset plus numeric character references. Unknown or
/// malformed references pass through unchanged.
pub(crate) fn decode_character_references(src: &str) -> String {
    if !src.contains('&') {
        return src.to_string();
    }

    fn decode_numeric(value: &str) -> Option<char> {
        let codepoint =
            if let Some(hex) = value.strip_prefix('x').or_else(|| value.strip_prefix('X')) {
                u32::from_str_radix(hex, 16).ok()?
            } else {
                value.parse::<u32>().ok()?
            };
        char::from_u32(codepoint)
    }

    fn decode_named(value: &str) -> Option<char> {
        match value {
            "amp" => Some('&'),
            "lt" => Some('<'),
            "gt" => Some('>'),
            "quot" => Some('"'),
            "apos" => Some('\''),
            "nbsp" => Some('\u{00A0}'),
            "copy" => Some('©'),
            "reg" => Some('®'),
            "trade" => Some('™'),
            "euro" => Some('€'),
            "pound" => Some('£'),
            "yen" => Some('¥'),
            "laquo" => Some('«'),
            "raquo" => Some('»'),
            "ldquo" => Some('\u{201C}'),
            "rdquo" => Some('\u{201D}'),
            "lsquo" => Some('\u{2018}'),
            "rsquo" => Some('\u{2019}'),
            "hellip" => Some('…'),
            "middot" => Some('·'),
            "times" => Some('×'),
            "divide" => Some('÷'),
            "deg" => Some('°'),
            "plusmn" => Some('±'),
            "larr" => Some('←'),
            "rarr" => Some('→'),
            _ => None,
        }
    }

    let mut out = String::with_capacity(src.len());
    let mut rest = src;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let tail = &rest[amp + 1..];
        let body_end = tail
            .char_indices()
            .find(|(_, ch)| !(ch.is_ascii_alphanumeric() || *ch == '#'))
            .map(|(idx, _)| idx)
            .unwrap_or(tail.len());
        let has_semicolon = tail[body_end..].starts_with(';');
        let body = &tail[..body_end];
        let decoded = if let Some(numeric) = body.strip_prefix('#') {
            decode_numeric(numeric)
        } else {
            decode_named(body)
        };
        match decoded {
            Some(ch) if !body.is_empty() => {
                out.push(ch);
                rest = &tail[body_end + usize::from(has_semicolon)..];
            }
            _ => {
                out.push('&');
                rest = tail;
            }
        }
    }
    out.push_str(rest);
    out
}
