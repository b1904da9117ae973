//! XML parsing on top of quick-xml events.

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use super::{Element, Node};
use crate::error::CoreError;

/// Parses an XML document into an element tree.
///
/// Whitespace-only text between elements is dropped; every element records
/// the source line of its start tag.
pub fn parse_xml(text: &str, source_name: &str) -> Result<Element, CoreError> {
    let mut reader = Reader::from_str(text);
    reader.config_mut().trim_text(false);

    let mut stack: Vec<Element> = Vec::new();
    let mut root: Option<Element> = None;
    let mut lines = LineTracker::new(text);

    loop {
        let position = reader.buffer_position() as usize;
        let line = lines.line_at(position);
        let event = reader.read_event().map_err(|e| CoreError::XmlParse {
            source_name: source_name.to_string(),
            line,
            message: e.to_string(),
        })?;

        match event {
            Event::Start(start) => {
                let el = start_element(&start, line, source_name)?;
                stack.push(el);
            }
            Event::Empty(start) => {
                let el = start_element(&start, line, source_name)?;
                attach(&mut stack, &mut root, el, source_name)?;
            }
            Event::End(_) => {
                let el = stack.pop().ok_or_else(|| CoreError::XmlParse {
                    source_name: source_name.to_string(),
                    line,
                    message: "unexpected closing tag".to_string(),
                })?;
                attach(&mut stack, &mut root, el, source_name)?;
            }
            Event::Text(t) => {
                let value = t.unescape().map_err(|e| CoreError::XmlParse {
                    source_name: source_name.to_string(),
                    line,
                    message: e.to_string(),
                })?;
                push_text(&mut stack, value.into_owned(), source_name, line)?;
            }
            Event::CData(c) => {
                let value = String::from_utf8_lossy(&c.into_inner()).into_owned();
                push_text(&mut stack, value, source_name, line)?;
            }
            Event::Comment(c) => {
                if let Some(parent) = stack.last_mut() {
                    parent
                        .children
                        .push(Node::Comment(String::from_utf8_lossy(&c).into_owned()));
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if let Some(open) = stack.last() {
        return Err(CoreError::XmlParse {
            source_name: source_name.to_string(),
            line: open.line,
            message: format!("unclosed element <{}>", open.tag),
        });
    }

    root.ok_or_else(|| CoreError::XmlParse {
        source_name: source_name.to_string(),
        line: 1,
        message: "document has no root element".to_string(),
    })
}

fn start_element(start: &BytesStart<'_>, line: usize, source_name: &str) -> Result<Element, CoreError> {
    let tag = String::from_utf8_lossy(start.name().as_ref()).into_owned();
    let mut el = Element::new(tag);
    el.line = line;
    for attr in start.attributes() {
        let attr = attr.map_err(|e| CoreError::XmlParse {
            source_name: source_name.to_string(),
            line,
            message: e.to_string(),
        })?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr.unescape_value().map_err(|e| CoreError::XmlParse {
            source_name: source_name.to_string(),
            line,
            message: e.to_string(),
        })?;
        el.attrs.push((key, value.into_owned()));
    }
    Ok(el)
}

fn attach(
    stack: &mut [Element],
    root: &mut Option<Element>,
    el: Element,
    source_name: &str,
) -> Result<(), CoreError> {
    match stack.last_mut() {
        Some(parent) => {
            parent.children.push(Node::Element(el));
            Ok(())
        }
        None if root.is_none() => {
            *root = Some(el);
            Ok(())
        }
        None => Err(CoreError::XmlParse {
            source_name: source_name.to_string(),
            line: el.line,
            message: "document has more than one root element".to_string(),
        }),
    }
}

fn push_text(stack: &mut [Element], value: String, source_name: &str, line: usize) -> Result<(), CoreError> {
    if value.trim().is_empty() {
        return Ok(());
    }
    match stack.last_mut() {
        Some(parent) => {
            parent.children.push(Node::Text(value));
            Ok(())
        }
        None => Err(CoreError::XmlParse {
            source_name: source_name.to_string(),
            line,
            message: "text outside of the root element".to_string(),
        }),
    }
}

/// Incremental byte offset to line number conversion.
struct LineTracker<'a> {
    text: &'a str,
    offset: usize,
    line: usize,
}

impl<'a> LineTracker<'a> {
    fn new(text: &'a str) -> Self {
        Self {
            text,
            offset: 0,
            line: 1,
        }
    }

    fn line_at(&mut self, position: usize) -> usize {
        let position = position.min(self.text.len());
        if position > self.offset {
            self.line += self.text.as_bytes()[self.offset..position]
                .iter()
                .filter(|&&b| b == b'\n')
                .count();
            self.offset = position;
        }
        self.line
    }
}
