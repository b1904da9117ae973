//! Owned XML tree used for view architectures and declarative data files.
//!
//! Nodes are addressed by paths of child indexes from the root element, which
//! keeps patch application free of shared mutable references: a locator
//! returns a path, the caller then mutates through `get_mut`.

mod parse;
mod write;
pub mod xpath;

pub use parse::parse_xml;
pub use write::{to_pretty_string, to_string};
pub use xpath::XPath;

/// Child-index path from the root element to a node.
pub type NodePath = Vec<usize>;

/// `tag[n]` location steps of sibling elements, in order.
pub fn location_steps<'a>(siblings: impl Iterator<Item = &'a Element>) -> Vec<String> {
    let mut seen: Vec<(&str, usize)> = Vec::new();
    siblings
        .map(|el| {
            let position = match seen.iter_mut().find(|(tag, _)| *tag == el.tag) {
                Some((_, count)) => {
                    *count += 1;
                    *count
                }
                None => {
                    seen.push((el.tag.as_str(), 1));
                    1
                }
            };
            format!("{}[{}]", el.tag, position)
        })
        .collect()
}

/// XML node.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    /// Element node
    Element(Element),
    /// Text content (already unescaped)
    Text(String),
    /// Comment
    Comment(String),
}

impl Node {
    /// Returns the element if this node is one.
    pub fn as_element(&self) -> Option<&Element> {
        match self {
            Node::Element(el) => Some(el),
            _ => None,
        }
    }

    /// Returns the mutable element if this node is one.
    pub fn as_element_mut(&mut self) -> Option<&mut Element> {
        match self {
            Node::Element(el) => Some(el),
            _ => None,
        }
    }
}

/// XML element with ordered attributes.
#[derive(Debug, Clone, PartialEq)]
pub struct Element {
    /// Tag name
    pub tag: String,
    /// Attributes in document order
    pub attrs: Vec<(String, String)>,
    /// Child nodes
    pub children: Vec<Node>,
    /// 1-based source line, 0 for synthesized elements
    pub line: usize,
}

impl Element {
    /// Creates an empty element.
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            attrs: Vec::new(),
            children: Vec::new(),
            line: 0,
        }
    }

    /// Builder-style attribute setter.
    pub fn with_attr(mut self, name: &str, value: &str) -> Self {
        self.set_attr(name, value);
        self
    }

    /// Builder-style child appender.
    pub fn with_child(mut self, child: Element) -> Self {
        self.children.push(Node::Element(child));
        self
    }

    /// Returns an attribute value.
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Returns whether the attribute is present.
    pub fn has_attr(&self, name: &str) -> bool {
        self.attrs.iter().any(|(k, _)| k == name)
    }

    /// Sets an attribute, keeping its position if it already exists.
    pub fn set_attr(&mut self, name: &str, value: &str) {
        match self.attrs.iter_mut().find(|(k, _)| k == name) {
            Some((_, v)) => *v = value.to_string(),
            None => self.attrs.push((name.to_string(), value.to_string())),
        }
    }

    /// Removes an attribute, returning its old value.
    pub fn remove_attr(&mut self, name: &str) -> Option<String> {
        let index = self.attrs.iter().position(|(k, _)| k == name)?;
        Some(self.attrs.remove(index).1)
    }

    /// Iterates over child elements.
    pub fn child_elements(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(Node::as_element)
    }

    /// Iterates over child elements with their index in `children`.
    pub fn indexed_child_elements(&self) -> impl Iterator<Item = (usize, &Element)> {
        self.children
            .iter()
            .enumerate()
            .filter_map(|(i, n)| n.as_element().map(|el| (i, el)))
    }

    /// `tag[n]` location step of each child element, `n` counting
    /// same-tag siblings from 1.
    pub fn child_steps(&self) -> Vec<String> {
        location_steps(self.child_elements())
    }

    /// Concatenated direct text content.
    pub fn text(&self) -> String {
        let mut out = String::new();
        for child in &self.children {
            if let Node::Text(t) = child {
                out.push_str(t);
            }
        }
        out
    }

    /// Concatenated text content of the whole subtree.
    pub fn deep_text(&self) -> String {
        let mut out = String::new();
        collect_text(self, &mut out);
        out
    }

    /// Returns the element at `path`.
    pub fn get(&self, path: &[usize]) -> Option<&Element> {
        let mut current = self;
        for &index in path {
            current = current.children.get(index)?.as_element()?;
        }
        Some(current)
    }

    /// Returns the mutable element at `path`.
    pub fn get_mut(&mut self, path: &[usize]) -> Option<&mut Element> {
        let mut current = self;
        for &index in path {
            current = current.children.get_mut(index)?.as_element_mut()?;
        }
        Some(current)
    }

    /// Visits every element of the subtree in document order with its path.
    pub fn walk<F>(&self, f: &mut F)
    where
        F: FnMut(&NodePath, &Element),
    {
        let mut path = Vec::new();
        walk_inner(self, &mut path, f);
    }

    /// Paths of every element of the subtree in document order, root included.
    pub fn element_paths(&self) -> Vec<NodePath> {
        let mut paths = Vec::new();
        self.walk(&mut |path, _| paths.push(path.clone()));
        paths
    }

    /// Removes every descendant element for which `remove` returns true.
    pub fn retain_elements<F>(&mut self, remove: &mut F)
    where
        F: FnMut(&Element) -> bool,
    {
        self.children.retain(|node| match node {
            Node::Element(el) => !remove(el),
            _ => true,
        });
        for child in self.children.iter_mut() {
            if let Node::Element(el) = child {
                el.retain_elements(remove);
            }
        }
    }

    /// Applies `f` to every element of the subtree, root included.
    pub fn for_each_mut<F>(&mut self, f: &mut F)
    where
        F: FnMut(&mut Element),
    {
        f(self);
        for child in self.children.iter_mut() {
            if let Node::Element(el) = child {
                el.for_each_mut(f);
            }
        }
    }

    /// Short human-readable rendering of the start tag, used in error messages.
    pub fn describe(&self) -> String {
        let mut out = format!("<{}", self.tag);
        for (k, v) in &self.attrs {
            out.push_str(&format!(" {}=\"{}\"", k, v));
        }
        out.push('>');
        out
    }
}

fn collect_text(el: &Element, out: &mut String) {
    for child in &el.children {
        match child {
            Node::Text(t) => out.push_str(t),
            Node::Element(e) => collect_text(e, out),
            Node::Comment(_) => {}
        }
    }
}

fn walk_inner<F>(el: &Element, path: &mut NodePath, f: &mut F)
where
    F: FnMut(&NodePath, &Element),
{
    f(path, el);
    for (i, child) in el.children.iter().enumerate() {
        if let Node::Element(c) = child {
            path.push(i);
            walk_inner(c, path, f);
            path.pop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths_address_elements_only() {
        let root = parse_xml("<form>text<group><field name=\"a\"/></group></form>", "t").unwrap();
        // index 0 is the text node
        assert!(root.get(&[0]).is_none());
        assert_eq!(root.get(&[1]).unwrap().tag, "group");
        assert_eq!(root.get(&[1, 0]).unwrap().attr("name"), Some("a"));
        assert_eq!(root.element_paths(), vec![vec![], vec![1], vec![1, 0]]);
    }

    #[test]
    fn test_attribute_editing_keeps_order() {
        let mut el = Element::new("field").with_attr("name", "a").with_attr("string", "A");
        el.set_attr("name", "b");
        el.set_attr("invisible", "1");
        assert_eq!(
            el.attrs,
            vec![
                ("name".to_string(), "b".to_string()),
                ("string".to_string(), "A".to_string()),
                ("invisible".to_string(), "1".to_string()),
            ]
        );
        assert_eq!(el.remove_attr("string"), Some("A".to_string()));
        assert!(!el.has_attr("string"));
    }

    #[test]
    fn test_retain_elements_prunes_subtrees() {
        let mut root =
            parse_xml("<form><button name=\"x\"/><group><button name=\"y\"/><field name=\"f\"/></group></form>", "t")
                .unwrap();
        root.retain_elements(&mut |el| el.tag == "button");
        assert_eq!(to_string(&root), "<form><group><field name=\"f\"/></group></form>");
    }
}
