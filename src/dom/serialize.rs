//! HTML serialization: `innerHTML`/`outerHTML` getters and text content.

use super::{Dom, NodeId, NodeKind};
use crate::tokenizer::{is_raw_text_tag, is_void_tag};

// Deep user-built trees can exceed the default stack during recursive
// serialization.
const RED_ZONE: usize = 128 * 1024;
const GROWN_STACK: usize = 8 * 1024 * 1024;

impl Dom {
    /// Serialization of the node's children.
    pub(crate) fn inner_html(&self, id: NodeId) -> String {
        let mut out = String::new();
        for &child in self.children(id) {
            self.serialize_node(child, &mut out);
        }
        out
    }

    /// Serialization of the node itself, children included.
    pub(crate) fn outer_html(&self, id: NodeId) -> String {
        let mut out = String::new();
        self.serialize_node(id, &mut out);
        out
    }

    fn serialize_node(&self, id: NodeId, out: &mut String) {
        stacker::maybe_grow(RED_ZONE, GROWN_STACK, || {
            let Ok(node) = self.node(id) else {
                return;
            };
            match &node.kind {
                NodeKind::Document => {
                    for &child in &node.children {
                        self.serialize_node(child, out);
                    }
                }
                NodeKind::DocumentType { name, .. } => {
                    out.push_str("<!DOCTYPE ");
                    out.push_str(name);
                    out.push('>');
                }
                NodeKind::Comment(text) => {
                    out.push_str("<!--");
                    out.push_str(text);
                    out.push_str("-->");
                }
                NodeKind::Text(text) => {
                    let raw_parent = node
                        .parent
                        .and_then(|parent| self.tag_name(parent))
                        .is_some_and(is_raw_text_tag);
                    if raw_parent {
                        out.push_str(text);
                    } else {
                        escape_text(text, out);
                    }
                }
                NodeKind::Element(element) => {
                    out.push('<');
                    out.push_str(&element.tag_name);
                    for attr in &element.attrs {
                        out.push(' ');
                        out.push_str(&attr.name);
                        out.push_str("=\"");
                        escape_attribute(&attr.value, out);
                        out.push('"');
                    }
                    out.push('>');
                    if is_void_tag(&element.tag_name) {
                        return;
                    }
                    for &child in &node.children {
                        self.serialize_node(child, out);
                    }
                    out.push_str("</");
                    out.push_str(&element.tag_name);
                    out.push('>');
                }
            }
        });
    }

    /// Concatenated text of all descendant text nodes, document order.
    pub(crate) fn text_content(&self, id: NodeId) -> String {
        let mut out = String::new();
        if let Ok(node) = self.node(id) {
            if let NodeKind::Text(text) = &node.kind {
                return text.clone();
            }
            if let NodeKind::Comment(text) = &node.kind {
                return text.clone();
            }
        }
        for descendant in self.descendants(id) {
            if let Ok(node) = self.node(descendant) {
                if let NodeKind::Text(text) = &node.kind {
                    out.push_str(text);
                }
            }
        }
        out
    }
}

fn escape_text(text: &str, out: &mut String) {
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '\u{00A0}' => out.push_str("&nbsp;"),
            other => out.push(other),
        }
    }
}

fn escape_attribute(value: &str, out: &mut String) {
    for ch in value.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            '\u{00A0}' => out.push_str("&nbsp;"),
            other => out.push(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::Attr;
    use crate::Result;

    #[test]
    fn serializes_elements_attributes_and_text() -> Result<()> {
        let mut dom = Dom::new();
        let div = dom.create_element(
            "div",
            vec![Attr {
                name: "class".into(),
                value: "a \"b\"".into(),
            }],
        );
        let text = dom.create_text("1 < 2 & 3".into());
        dom.append_child(dom.root, div)?;
        dom.append_child(div, text)?;
        assert_eq!(
            dom.outer_html(div),
            "<div class=\"a &quot;b&quot;\">1 &lt; 2 &amp; 3</div>"
        );
        assert_eq!(dom.inner_html(div), "1 &lt; 2 &amp; 3");
        Ok(())
    }

    #[test]
    fn void_elements_have_no_end_tag() -> Result<()> {
        let mut dom = Dom::new();
        let br = dom.create_element("br", Vec::new());
        dom.append_child(dom.root, br)?;
        assert_eq!(dom.outer_html(br), "<br>");
        Ok(())
    }

    #[test]
    fn raw_text_children_are_not_escaped() -> Result<()> {
        let mut dom = Dom::new();
        let script = dom.create_element("script", Vec::new());
        let body = dom.create_text("if (a < b) log('&');".into());
        dom.append_child(dom.root, script)?;
        dom.append_child(script, body)?;
        assert_eq!(
            dom.outer_html(script),
            "<script>if (a < b) log('&');</script>"
        );
        Ok(())
    }

    #[test]
    fn text_content_concatenates_descendants() -> Result<()> {
        let mut dom = Dom::new();
        let div = dom.create_element("div", Vec::new());
        let span = dom.create_element("span", Vec::new());
        let a = dom.create_text("he".into());
        let b = dom.create_text("llo".into());
        dom.append_child(dom.root, div)?;
        dom.append_child(div, a)?;
        dom.append_child(div, span)?;
        dom.append_child(span, b)?;
        assert_eq!(dom.text_content(div), "hello");
        Ok(())
    }
}
