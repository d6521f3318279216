//! Compact CSS selector subset for `querySelector`/`querySelectorAll`.
//!
//! Supports tag names, `*`, `#id`, `.class`, `[attr]`/`[attr=value]`, the
//! four combinators, and comma-separated groups. Anything else is a syntax
//! error. Query results are static snapshots, unlike the live collections.

use crate::dom::{Dom, NodeId};
use crate::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum AttrCondition {
    Exists { key: String },
    Eq { key: String, value: String },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct SelectorStep {
    pub(crate) tag: Option<String>,
    pub(crate) universal: bool,
    pub(crate) id: Option<String>,
    pub(crate) classes: Vec<String>,
    pub(crate) attrs: Vec<AttrCondition>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Combinator {
    Descendant,
    Child,
    AdjacentSibling,
    GeneralSibling,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SelectorPart {
    pub(crate) step: SelectorStep,
    // Relation to the previous (left) part.
    pub(crate) combinator: Option<Combinator>,
}

pub(crate) fn parse_selector_groups(selector: &str) -> Result<Vec<Vec<SelectorPart>>> {
    let groups = split_groups(selector)?;
    let mut parsed = Vec::with_capacity(groups.len());
    for group in groups {
        parsed.push(parse_chain(&group)?);
    }
    Ok(parsed)
}

fn syntax(selector: &str) -> Error {
    Error::Syntax(format!("unsupported selector: {selector}"))
}

fn split_groups(selector: &str) -> Result<Vec<String>> {
    let mut groups = Vec::new();
    let mut current = String::new();
    let mut bracket_depth = 0usize;

    for ch in selector.chars() {
        match ch {
            '[' => {
                bracket_depth += 1;
                current.push(ch);
            }
            ']' => {
                if bracket_depth == 0 {
                    return Err(syntax(selector));
                }
                bracket_depth -= 1;
                current.push(ch);
            }
            ',' if bracket_depth == 0 => {
                let trimmed = current.trim();
                if trimmed.is_empty() {
                    return Err(syntax(selector));
                }
                groups.push(trimmed.to_string());
                current.clear();
            }
            _ => current.push(ch),
        }
    }
    if bracket_depth != 0 {
        return Err(syntax(selector));
    }
    let trimmed = current.trim();
    if trimmed.is_empty() {
        return Err(syntax(selector));
    }
    groups.push(trimmed.to_string());
    Ok(groups)
}

fn parse_chain(selector: &str) -> Result<Vec<SelectorPart>> {
    let selector = selector.trim();
    if selector.is_empty() {
        return Err(syntax(selector));
    }
    let tokens = tokenize(selector)?;
    let mut parts = Vec::new();
    let mut pending: Option<Combinator> = None;

    for token in tokens {
        if let Some(combinator) = match token.as_str() {
            ">" => Some(Combinator::Child),
            "+" => Some(Combinator::AdjacentSibling),
            "~" => Some(Combinator::GeneralSibling),
            _ => None,
        } {
            if pending.is_some() || parts.is_empty() {
                return Err(syntax(selector));
            }
            pending = Some(combinator);
            continue;
        }
        let step = parse_step(&token)?;
        let combinator = if parts.is_empty() {
            None
        } else {
            Some(pending.take().unwrap_or(Combinator::Descendant))
        };
        parts.push(SelectorPart { step, combinator });
    }

    if parts.is_empty() || pending.is_some() {
        return Err(syntax(selector));
    }
    Ok(parts)
}

fn tokenize(selector: &str) -> Result<Vec<String>> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut bracket_depth = 0usize;

    for ch in selector.chars() {
        match ch {
            '[' => {
                bracket_depth += 1;
                current.push(ch);
            }
            ']' => {
                if bracket_depth == 0 {
                    return Err(syntax(selector));
                }
                bracket_depth -= 1;
                current.push(ch);
            }
            '>' | '+' | '~' if bracket_depth == 0 => {
                if !current.trim().is_empty() {
                    tokens.push(current.trim().to_string());
                }
                current.clear();
                tokens.push(ch.to_string());
            }
            ch if ch.is_ascii_whitespace() && bracket_depth == 0 => {
                if !current.trim().is_empty() {
                    tokens.push(current.trim().to_string());
                }
                current.clear();
            }
            _ => current.push(ch),
        }
    }
    if bracket_depth != 0 {
        return Err(syntax(selector));
    }
    if !current.trim().is_empty() {
        tokens.push(current.trim().to_string());
    }
    Ok(tokens)
}

fn parse_step(part: &str) -> Result<SelectorStep> {
    let bytes = part.as_bytes();
    let mut i = 0usize;
    let mut step = SelectorStep::default();

    while i < bytes.len() {
        match bytes[i] {
            b'*' => {
                if step.universal || step.tag.is_some() {
                    return Err(syntax(part));
                }
                step.universal = true;
                i += 1;
            }
            b'#' => {
                let Some((id, next)) = parse_ident(part, i + 1) else {
                    return Err(syntax(part));
                };
                if step.id.replace(id).is_some() {
                    return Err(syntax(part));
                }
                i = next;
            }
            b'.' => {
                let Some((class, next)) = parse_ident(part, i + 1) else {
                    return Err(syntax(part));
                };
                step.classes.push(class);
                i = next;
            }
            b'[' => {
                let (attr, next) = parse_attr_condition(part, i)?;
                step.attrs.push(attr);
                i = next;
            }
            _ => {
                if step.tag.is_some()
                    || step.id.is_some()
                    || !step.classes.is_empty()
                    || step.universal
                {
                    return Err(syntax(part));
                }
                let Some((tag, next)) = parse_ident(part, i) else {
                    return Err(syntax(part));
                };
                step.tag = Some(tag.to_ascii_lowercase());
                i = next;
            }
        }
    }

    if step.tag.is_none()
        && step.id.is_none()
        && step.classes.is_empty()
        && step.attrs.is_empty()
        && !step.universal
    {
        return Err(syntax(part));
    }
    Ok(step)
}

fn parse_ident(part: &str, start: usize) -> Option<(String, usize)> {
    let bytes = part.as_bytes();
    let mut end = start;
    while end < bytes.len() {
        let b = bytes[end];
        if b.is_ascii_alphanumeric() || b == b'-' || b == b'_' {
            end += 1;
        } else {
            break;
        }
    }
    if end == start {
        return None;
    }
    Some((part[start..end].to_string(), end))
}

fn parse_attr_condition(part: &str, start: usize) -> Result<(AttrCondition, usize)> {
    let rest = &part[start..];
    let Some(close) = rest.find(']') else {
        return Err(syntax(part));
    };
    let inner = rest[1..close].trim();
    let consumed = start + close + 1;
    match inner.split_once('=') {
        None => {
            if inner.is_empty() {
                return Err(syntax(part));
            }
            Ok((
                AttrCondition::Exists {
                    key: inner.to_ascii_lowercase(),
                },
                consumed,
            ))
        }
        Some((key, value)) => {
            let key = key.trim();
            if key.is_empty() || key.ends_with(['^', '$', '*', '|', '!']) {
                return Err(syntax(part));
            }
            let mut value = value.trim();
            for quote in ['"', '\''] {
                if value.len() >= 2 && value.starts_with(quote) && value.ends_with(quote) {
                    value = &value[1..value.len() - 1];
                    break;
                }
            }
            Ok((
                AttrCondition::Eq {
                    key: key.to_ascii_lowercase(),
                    value: value.to_string(),
                },
                consumed,
            ))
        }
    }
}

fn step_matches(dom: &Dom, id: NodeId, step: &SelectorStep) -> bool {
    let Some(element) = dom.element(id) else {
        return false;
    };
    if let Some(tag) = &step.tag {
        if element.tag_name != *tag {
            return false;
        }
    }
    if let Some(want) = &step.id {
        if element.attr("id") != Some(want.as_str()) {
            return false;
        }
    }
    for class in &step.classes {
        let has = element
            .attr("class")
            .is_some_and(|value| value.split_ascii_whitespace().any(|have| have == class));
        if !has {
            return false;
        }
    }
    for attr in &step.attrs {
        let ok = match attr {
            AttrCondition::Exists { key } => element.attr(key).is_some(),
            AttrCondition::Eq { key, value } => element.attr(key) == Some(value.as_str()),
        };
        if !ok {
            return false;
        }
    }
    true
}

/// Right-to-left chain match anchored at `id`.
fn chain_matches(dom: &Dom, id: NodeId, parts: &[SelectorPart]) -> bool {
    let Some((last, prefix)) = parts.split_last() else {
        return false;
    };
    if !step_matches(dom, id, &last.step) {
        return false;
    }
    let Some(combinator) = last.combinator else {
        return prefix.is_empty();
    };
    match combinator {
        Combinator::Descendant => {
            let mut cursor = dom.parent(id);
            while let Some(ancestor) = cursor {
                if chain_matches(dom, ancestor, prefix) {
                    return true;
                }
                cursor = dom.parent(ancestor);
            }
            false
        }
        Combinator::Child => dom
            .parent(id)
            .is_some_and(|parent| chain_matches(dom, parent, prefix)),
        Combinator::AdjacentSibling => {
            // Text and comment siblings do not count.
            let mut cursor = dom.previous_sibling(id);
            while let Some(sibling) = cursor {
                if dom.is_element(sibling) {
                    return chain_matches(dom, sibling, prefix);
                }
                cursor = dom.previous_sibling(sibling);
            }
            false
        }
        Combinator::GeneralSibling => {
            let mut cursor = dom.previous_sibling(id);
            while let Some(sibling) = cursor {
                if dom.is_element(sibling) && chain_matches(dom, sibling, prefix) {
                    return true;
                }
                cursor = dom.previous_sibling(sibling);
            }
            false
        }
    }
}

/// All matches in document order within `scope`'s subtree. A snapshot, not a
/// live view.
pub(crate) fn query_all(dom: &Dom, scope: NodeId, selector: &str) -> Result<Vec<NodeId>> {
    let groups = parse_selector_groups(selector)?;
    let mut out = Vec::new();
    for id in dom.descendant_elements(scope) {
        if groups.iter().any(|parts| chain_matches(dom, id, parts)) {
            out.push(id);
        }
    }
    Ok(out)
}

pub(crate) fn query_first(dom: &Dom, scope: NodeId, selector: &str) -> Result<Option<NodeId>> {
    let groups = parse_selector_groups(selector)?;
    for id in dom.descendant_elements(scope) {
        if groups.iter().any(|parts| chain_matches(dom, id, parts)) {
            return Ok(Some(id));
        }
    }
    Ok(None)
}
