//! XML serialization.

use quick_xml::escape::partial_escape;

use super::{Element, Node};

/// Serializes an element tree compactly.
pub fn to_string(el: &Element) -> String {
    let mut out = String::new();
    write_element(el, &mut out, None, 0);
    out
}

/// Serializes an element tree with two-space indentation for element-only content.
pub fn to_pretty_string(el: &Element) -> String {
    let mut out = String::new();
    write_element(el, &mut out, Some(2), 0);
    out
}

fn write_element(el: &Element, out: &mut String, indent: Option<usize>, depth: usize) {
    out.push('<');
    out.push_str(&el.tag);
    for (name, value) in &el.attrs {
        out.push(' ');
        out.push_str(name);
        out.push_str("=\"");
        out.push_str(&partial_escape(value.as_str()).replace('"', "&quot;"));
        out.push('"');
    }
    if el.children.is_empty() {
        out.push_str("/>");
        return;
    }
    out.push('>');

    let element_only = el.children.iter().all(|c| !matches!(c, Node::Text(_)));
    let step = indent.filter(|_| element_only);
    for child in &el.children {
        if let Some(width) = step {
            out.push('\n');
            out.push_str(&" ".repeat(width * (depth + 1)));
        }
        match child {
            Node::Element(c) => write_element(c, out, indent, depth + 1),
            Node::Text(t) => out.push_str(&partial_escape(t.as_str())),
            Node::Comment(c) => {
                out.push_str("<!--");
                out.push_str(c);
                out.push_str("-->");
            }
        }
    }
    if let Some(width) = step {
        out.push('\n');
        out.push_str(&" ".repeat(width * depth));
    }
    out.push_str("</");
    out.push_str(&el.tag);
    out.push('>');
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xml::parse_xml;

    #[test]
    fn test_compact_output_escapes() {
        let el = Element::new("field")
            .with_attr("name", "a")
            .with_attr("domain", "[('x', '<', 3)]");
        assert_eq!(
            to_string(&el),
            "<field name=\"a\" domain=\"[('x', '&lt;', 3)]\"/>"
        );
    }

    #[test]
    fn test_pretty_output_indents_element_content() {
        let root = parse_xml("<form><group><field name=\"a\"/></group><p>hi</p></form>", "t").unwrap();
        assert_eq!(
            to_pretty_string(&root),
            "<form>\n  <group>\n    <field name=\"a\"/>\n  </group>\n  <p>hi</p>\n</form>"
        );
    }
}
