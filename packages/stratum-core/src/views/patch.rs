//! Patch specs parsed into typed operations.
//!
//! An inheriting view's arch is either a single spec element or a `<data>`
//! root holding several. Malformed specs are rejected here, before any
//! tree is touched.

use crate::error::CoreError;
use crate::xml::{location_steps, Element, Node, XPath};

/// Attributes carrying translated text; they may not select nodes.
pub const TRANSLATABLE_ATTRS: &[&str] = &["string", "help", "placeholder", "confirm", "title", "alt", "sum", "avg"];

/// How the target node is found.
#[derive(Debug, Clone)]
pub enum Locator {
    /// `<xpath expr="..."/>`
    XPath(XPath),
    /// First element with this tag and these attribute values
    Element { tag: String, attrs: Vec<(String, String)> },
}

impl Locator {
    /// Whether `el` matches an element locator.
    pub fn matches(&self, el: &Element) -> bool {
        match self {
            Locator::XPath(_) => false,
            Locator::Element { tag, attrs } => {
                el.tag == *tag && attrs.iter().all(|(k, v)| el.attr(k) == Some(v.as_str()))
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Position {
    Inside,
    After,
    Before,
    Replace,
    Attributes,
}

impl Position {
    fn parse(text: &str) -> Option<Self> {
        Some(match text {
            "inside" => Position::Inside,
            "after" => Position::After,
            "before" => Position::Before,
            "replace" => Position::Replace,
            "attributes" => Position::Attributes,
            _ => return None,
        })
    }
}

/// One `<attribute>` edit of an `attributes` patch.
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeEdit {
    /// Literal replacement; an empty value removes the attribute
    Set { name: String, value: String },
    /// Adds and removes entries of a list-valued attribute
    Edit {
        name: String,
        add: Vec<String>,
        remove: Vec<String>,
        separator: String,
    },
}

/// Typed patch operation.
#[derive(Debug, Clone)]
pub struct Patch {
    pub locator: Locator,
    pub position: Position,
    /// Nodes inserted by `inside`, `after`, `before` and `replace`
    pub content: Vec<Node>,
    pub attributes: Vec<AttributeEdit>,
    /// Source line of the spec element
    pub line: usize,
    /// Start tag of the spec, for error messages
    pub spec: String,
    /// Location of the spec element within its view's arch
    pub source: String,
}

/// Parses the patch specs of an inheriting view arch.
pub fn parse_patches(arch: &Element, view: &str) -> Result<Vec<Patch>, CoreError> {
    let root = format!("/{}[1]", arch.tag);
    if arch.tag != "data" {
        return Ok(vec![parse_spec(arch, view, root)?]);
    }
    arch.child_elements()
        .zip(arch.child_steps())
        .map(|(spec, step)| parse_spec(spec, view, format!("{}/{}", root, step)))
        .collect()
}

/// Whether `expr` tests attribute `attr` itself, not one merely sharing
/// its prefix (`@sum` but not `@summary`).
fn selects_attribute(expr: &str, attr: &str) -> bool {
    let needle = format!("@{}", attr);
    expr.match_indices(&needle).any(|(at, _)| {
        !expr[at + needle.len()..]
            .chars()
            .next()
            .is_some_and(|c| c.is_alphanumeric() || c == '_' || c == '-')
    })
}

fn parse_spec(spec: &Element, view: &str, source: String) -> Result<Patch, CoreError> {
    let invalid = |reason: String| CoreError::InvalidPatch {
        view: view.to_string(),
        line: spec.line,
        reason,
    };
    let locator = if spec.tag == "xpath" {
        let expr = spec
            .attr("expr")
            .ok_or_else(|| invalid("<xpath> without expr".to_string()))?;
        for attr in TRANSLATABLE_ATTRS {
            if selects_attribute(expr, attr) {
                return Err(selector_error(view, attr, spec));
            }
        }
        Locator::XPath(XPath::parse(expr).map_err(|e| invalid(e.to_string()))?)
    } else {
        let mut attrs = Vec::new();
        for (name, value) in &spec.attrs {
            if name == "position" || name == "version" {
                continue;
            }
            if TRANSLATABLE_ATTRS.contains(&name.as_str()) {
                return Err(selector_error(view, name, spec));
            }
            attrs.push((name.clone(), value.clone()));
        }
        Locator::Element {
            tag: spec.tag.clone(),
            attrs,
        }
    };

    let position_text = spec.attr("position").unwrap_or("inside");
    let position = Position::parse(position_text)
        .ok_or_else(|| invalid(format!("unknown position '{}'", position_text)))?;

    let mut attributes = Vec::new();
    let mut content = Vec::new();
    if position == Position::Attributes {
        for child in spec.child_elements() {
            if child.tag != "attribute" {
                return Err(invalid(format!("unexpected <{}> in an attributes spec", child.tag)));
            }
            attributes.push(parse_attribute(child, view)?);
        }
    } else {
        content = spec
            .children
            .iter()
            .filter(|n| !matches!(n, Node::Comment(_)))
            .cloned()
            .collect();
    }

    Ok(Patch {
        locator,
        position,
        content,
        attributes,
        line: spec.line,
        spec: spec.describe(),
        source,
    })
}

fn parse_attribute(el: &Element, view: &str) -> Result<AttributeEdit, CoreError> {
    let name = el
        .attr("name")
        .ok_or_else(|| CoreError::InvalidPatch {
            view: view.to_string(),
            line: el.line,
            reason: "<attribute> without name".to_string(),
        })?
        .to_string();
    if el.has_attr("add") || el.has_attr("remove") {
        let separator = el.attr("separator").unwrap_or(",").to_string();
        let sep = separator.trim();
        let split = |attr: &str| -> Vec<String> {
            match el.attr(attr) {
                Some(v) if sep.is_empty() => v.split_whitespace().map(str::to_string).collect(),
                Some(v) => v
                    .split(sep)
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect(),
                None => Vec::new(),
            }
        };
        return Ok(AttributeEdit::Edit {
            add: split("add"),
            remove: split("remove"),
            name,
            separator,
        });
    }
    Ok(AttributeEdit::Set {
        name,
        value: el.text().trim().to_string(),
    })
}

fn selector_error(view: &str, attr: &str, spec: &Element) -> CoreError {
    CoreError::ValidationError {
        view: view.to_string(),
        message: format!(
            "view inheritance may not use attribute '{}' as a selector (line {}: {})",
            attr,
            spec.line,
            spec.describe()
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xml::parse_xml;
    use ntest::timeout;

    fn parse(text: &str) -> Result<Vec<Patch>, CoreError> {
        parse_patches(&parse_xml(text, "t").unwrap(), "test.view")
    }

    #[timeout(1000)]
    #[test]
    fn test_specs_become_typed_operations() {
        let patches = parse(
            r#"<data>
                <xpath expr="//field[@name='name']" position="after"><field name="tax"/></xpath>
                <field name="price" position="attributes">
                    <attribute name="readonly">1</attribute>
                    <attribute name="class" add="oe_inline" remove="oe_edit" separator=" "/>
                </field>
            </data>"#,
        )
        .unwrap();
        assert_eq!(patches.len(), 2);
        assert!(matches!(patches[0].locator, Locator::XPath(_)));
        assert_eq!(patches[0].position, Position::After);
        assert_eq!(patches[0].content.len(), 1);
        assert_eq!(patches[1].line, 3);
        assert_eq!(
            patches[1].attributes,
            vec![
                AttributeEdit::Set {
                    name: "readonly".to_string(),
                    value: "1".to_string()
                },
                AttributeEdit::Edit {
                    name: "class".to_string(),
                    add: vec!["oe_inline".to_string()],
                    remove: vec!["oe_edit".to_string()],
                    separator: " ".to_string()
                }
            ]
        );
    }

    #[timeout(1000)]
    #[test]
    fn test_malformed_specs_are_rejected() {
        assert_eq!(parse(r#"<xpath position="after"/>"#).unwrap_err().kind(), "InvalidPatch");
        assert_eq!(
            parse(r#"<xpath expr="//field" position="around"/>"#).unwrap_err().kind(),
            "InvalidPatch"
        );
        assert_eq!(
            parse(r#"<field name="a" position="attributes"><field name="b"/></field>"#)
                .unwrap_err()
                .kind(),
            "InvalidPatch"
        );
    }

    #[timeout(1000)]
    #[test]
    fn test_translatable_selectors_are_rejected() {
        let err = parse(r#"<button string="Confirm" position="replace"/>"#).unwrap_err();
        assert_eq!(err.kind(), "ValidationError");
        let err = parse(r#"<xpath expr="//page[@string='Notes']" position="inside"/>"#).unwrap_err();
        assert_eq!(err.kind(), "ValidationError");
        let err = parse(r#"<xpath expr="//field[@sum]" position="inside"/>"#).unwrap_err();
        assert_eq!(err.kind(), "ValidationError");
    }

    #[timeout(1000)]
    #[test]
    fn test_attributes_sharing_a_translatable_prefix_may_select() {
        for expr in ["//div[@summary='x']", "//field[@help_text='y']", "//img[@alternative='z']", "//a[@title-id='t']"] {
            let spec = format!(r#"<xpath expr="{}" position="inside"/>"#, expr);
            assert!(parse(&spec).is_ok(), "{} rejected", expr);
        }
    }

    #[timeout(1000)]
    #[test]
    fn test_space_separated_entries() {
        let patches = parse(
            r#"<xpath expr="//div" position="attributes">
                <attribute name="class" add="foo  bar" remove="old" separator=" "/>
            </xpath>"#,
        )
        .unwrap();
        assert_eq!(
            patches[0].attributes,
            vec![AttributeEdit::Edit {
                name: "class".to_string(),
                add: vec!["foo".to_string(), "bar".to_string()],
                remove: vec!["old".to_string()],
                separator: " ".to_string()
            }]
        );
    }

    #[timeout(1000)]
    #[test]
    fn test_specs_know_their_place_in_the_arch() {
        let patches = parse(
            r#"<data>
                <field name="a" position="after"/>
                <xpath expr="//b" position="after"/>
                <field name="c" position="after"/>
            </data>"#,
        )
        .unwrap();
        let sources: Vec<&str> = patches.iter().map(|p| p.source.as_str()).collect();
        assert_eq!(sources, vec!["/data[1]/field[1]", "/data[1]/xpath[1]", "/data[1]/field[2]"]);
        assert_eq!(parse(r#"<xpath expr="//b" position="after"/>"#).unwrap()[0].source, "/xpath[1]");
    }
}
