use crate::error::CoreError;
use crate::xml::{location_steps, Element, Node, NodePath};

use super::patch::{AttributeEdit, Locator, Patch, Position};
use super::view::View;

/// Internal attribute recording which view contributed an element.
pub const ORIGIN_ATTR: &str = "__origin__";

/// Internal attribute recording an element's location within the arch it
/// was written in.
pub const SOURCE_ATTR: &str = "__source__";

/// Placeholder standing for the replaced node inside `replace` content.
const PLACEHOLDER: &str = "$0";

/// Marks every element of `tree` without an origin as coming from `view_id`.
pub fn annotate_origin(tree: &mut Element, view_id: u64) {
    let origin = view_id.to_string();
    tree.for_each_mut(&mut |el| {
        if !el.has_attr(ORIGIN_ATTR) {
            el.set_attr(ORIGIN_ATTR, &origin);
        }
    });
}

/// Marks every element below `el` without a source location, `path` being
/// the location of `el` itself.
pub fn annotate_source(el: &mut Element, path: &str) {
    if !el.has_attr(SOURCE_ATTR) {
        el.set_attr(SOURCE_ATTR, path);
    }
    let steps = el.child_steps();
    for (child, step) in el.children.iter_mut().filter_map(Node::as_element_mut).zip(steps) {
        annotate_source(child, &format!("{}/{}", path, step));
    }
}

/// Marks a root view's tree with its origin and source locations.
pub fn annotate_root(tree: &mut Element, view_id: u64) {
    annotate_origin(tree, view_id);
    let path = format!("/{}[1]", tree.tag);
    annotate_source(tree, &path);
}

/// Removes the origin and source markers once composition is done.
pub fn strip_origins(tree: &mut Element) {
    tree.for_each_mut(&mut |el| {
        el.remove_attr(ORIGIN_ATTR);
        el.remove_attr(SOURCE_ATTR);
    });
}

/// Applies the patches of `view` to `tree` in order.
///
/// A patch whose target is missing fails the whole view with
/// `PatchTargetNotFound` naming `view` and the spec's line.
pub fn apply_patches(tree: &mut Element, patches: &[Patch], view: &View) -> Result<(), CoreError> {
    for patch in patches {
        let path = locate(tree, &patch.locator).ok_or_else(|| CoreError::PatchTargetNotFound {
            view: view.label(),
            module: view.module.clone().unwrap_or_default(),
            line: patch.line,
            spec: patch.spec.clone(),
        })?;
        apply_one(tree, path, patch, view)?;
    }
    Ok(())
}

fn locate(tree: &Element, locator: &Locator) -> Option<NodePath> {
    match locator {
        Locator::XPath(xpath) => xpath.select_first(tree),
        Locator::Element { .. } => {
            let mut found = None;
            tree.walk(&mut |path, el| {
                if found.is_none() && locator.matches(el) {
                    found = Some(path.clone());
                }
            });
            found
        }
    }
}

fn apply_one(tree: &mut Element, path: NodePath, patch: &Patch, view: &View) -> Result<(), CoreError> {
    let invalid = |reason: &str| CoreError::InvalidPatch {
        view: view.label(),
        line: patch.line,
        reason: reason.to_string(),
    };
    let mut content = patch.content.clone();
    let mut steps = location_steps(patch.content.iter().filter_map(Node::as_element)).into_iter();
    for el in content.iter_mut().filter_map(Node::as_element_mut) {
        annotate_origin(el, view.id);
        if let Some(step) = steps.next() {
            annotate_source(el, &format!("{}/{}", patch.source, step));
        }
    }

    match patch.position {
        Position::Inside => {
            let target = tree.get_mut(&path).ok_or_else(|| invalid("target vanished"))?;
            target.children.extend(content);
        }
        Position::After | Position::Before => {
            let Some((&index, parent_path)) = path.split_last() else {
                return Err(invalid("cannot insert a sibling of the root element"));
            };
            let parent = tree.get_mut(parent_path).ok_or_else(|| invalid("target vanished"))?;
            let at = if patch.position == Position::After { index + 1 } else { index };
            parent.children.splice(at..at, content);
        }
        Position::Replace => {
            let original = tree.get(&path).cloned().ok_or_else(|| invalid("target vanished"))?;
            for node in content.iter_mut() {
                substitute_placeholder(node, &original);
            }
            match path.split_last() {
                None => {
                    let mut elements = content.into_iter().filter_map(|n| match n {
                        Node::Element(el) => Some(el),
                        _ => None,
                    });
                    match (elements.next(), elements.next()) {
                        (Some(root), None) => *tree = root,
                        _ => return Err(invalid("replacing the root requires exactly one element")),
                    }
                }
                Some((&index, parent_path)) => {
                    let parent = tree.get_mut(parent_path).ok_or_else(|| invalid("target vanished"))?;
                    parent.children.splice(index..=index, content);
                }
            }
        }
        Position::Attributes => {
            let target = tree.get_mut(&path).ok_or_else(|| invalid("target vanished"))?;
            for edit in &patch.attributes {
                apply_attribute(target, edit);
            }
        }
    }
    Ok(())
}

fn substitute_placeholder(node: &mut Node, original: &Element) {
    match node {
        Node::Text(text) if text.trim() == PLACEHOLDER => *node = Node::Element(original.clone()),
        Node::Element(el) => {
            for child in el.children.iter_mut() {
                substitute_placeholder(child, original);
            }
        }
        _ => {}
    }
}

fn apply_attribute(target: &mut Element, edit: &AttributeEdit) {
    match edit {
        AttributeEdit::Set { name, value } => {
            if value.is_empty() {
                target.remove_attr(name);
            } else {
                target.set_attr(name, value);
            }
        }
        AttributeEdit::Edit {
            name,
            add,
            remove,
            separator,
        } => {
            let sep = separator.trim();
            let mut entries: Vec<String> = match target.attr(name) {
                Some(current) if sep.is_empty() => current.split_whitespace().map(str::to_string).collect(),
                Some(current) => current
                    .split(sep)
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect(),
                None => Vec::new(),
            };
            entries.retain(|e| !remove.contains(e));
            for entry in add {
                if !entries.contains(entry) {
                    entries.push(entry.clone());
                }
            }
            if entries.is_empty() {
                target.remove_attr(name);
            } else {
                target.set_attr(name, &entries.join(separator));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::views::patch::parse_patches;
    use crate::views::view::ViewMode;
    use crate::xml::{parse_xml, to_string};
    use ntest::timeout;

    fn view(id: u64) -> View {
        View {
            id,
            name: format!("view {}", id),
            model: "widget".to_string(),
            view_type: "form".to_string(),
            arch: String::new(),
            priority: 16,
            inherit_id: Some(1),
            mode: ViewMode::Extension,
            active: true,
            groups: Vec::new(),
            key: None,
            xmlid: Some(format!("b.view_{}", id)),
            module: Some("b".to_string()),
        }
    }

    fn apply(base: &str, spec: &str) -> Result<String, CoreError> {
        let mut tree = parse_xml(base, "base").unwrap();
        let v = view(2);
        let patches = parse_patches(&parse_xml(spec, "spec").unwrap(), &v.label())?;
        apply_patches(&mut tree, &patches, &v)?;
        strip_origins(&mut tree);
        Ok(to_string(&tree))
    }

    #[timeout(1000)]
    #[test]
    fn test_after_inserts_siblings() {
        let out = apply(
            r#"<form><group><field name="name"/></group></form>"#,
            r#"<xpath expr="//field[@name='name']" position="after"><field name="tax"/></xpath>"#,
        )
        .unwrap();
        assert_eq!(out, r#"<form><group><field name="name"/><field name="tax"/></group></form>"#);
    }

    #[timeout(1000)]
    #[test]
    fn test_element_locator_before_and_inside() {
        let out = apply(
            r#"<form><group name="main"><field name="name"/></group></form>"#,
            r#"<data>
                <field name="name" position="before"><field name="code"/></field>
                <group name="main" position="inside"><field name="note"/></group>
            </data>"#,
        )
        .unwrap();
        assert_eq!(
            out,
            r#"<form><group name="main"><field name="code"/><field name="name"/><field name="note"/></group></form>"#
        );
    }

    #[timeout(1000)]
    #[test]
    fn test_replace_keeps_original_at_placeholder() {
        let out = apply(
            r#"<form><field name="name"/></form>"#,
            r#"<field name="name" position="replace"><div class="wrap">$0</div></field>"#,
        )
        .unwrap();
        assert_eq!(out, r#"<form><div class="wrap"><field name="name"/></div></form>"#);

        let out = apply(r#"<form><field name="name"/><field name="x"/></form>"#, r#"<field name="x" position="replace"/>"#).unwrap();
        assert_eq!(out, r#"<form><field name="name"/></form>"#);
    }

    #[timeout(1000)]
    #[test]
    fn test_root_replacement_needs_one_element() {
        let out = apply(r#"<form><field name="a"/></form>"#, r#"<xpath expr="/form" position="replace"><form><field name="b"/></form></xpath>"#).unwrap();
        assert_eq!(out, r#"<form><field name="b"/></form>"#);
        let err = apply(r#"<form/>"#, r#"<xpath expr="/form" position="after"><field name="b"/></xpath>"#).unwrap_err();
        assert_eq!(err.kind(), "InvalidPatch");
    }

    #[timeout(1000)]
    #[test]
    fn test_attribute_edits() {
        let out = apply(
            r#"<form><field name="a" class="x y" readonly="1" domain="[('a', '=', 1)]"/></form>"#,
            r#"<field name="a" position="attributes">
                <attribute name="readonly"></attribute>
                <attribute name="class" add="z" remove="x" separator=" "/>
                <attribute name="domain">[('b', '=', 2)]</attribute>
            </field>"#,
        )
        .unwrap();
        assert_eq!(out, r#"<form><field name="a" class="y z" domain="[('b', '=', 2)]"/></form>"#);
    }

    #[timeout(1000)]
    #[test]
    fn test_space_separated_class_entries() {
        let out = apply(
            r#"<form><div class="a"/></form>"#,
            r#"<xpath expr="//div" position="attributes"><attribute name="class" add="foo bar" separator=" "/></xpath>"#,
        )
        .unwrap();
        assert_eq!(out, r#"<form><div class="a foo bar"/></form>"#);

        let out = apply(
            r#"<form><div class="a foo bar"/></form>"#,
            r#"<xpath expr="//div" position="attributes"><attribute name="class" remove="a bar" separator=" "/></xpath>"#,
        )
        .unwrap();
        assert_eq!(out, r#"<form><div class="foo"/></form>"#);
    }

    #[timeout(1000)]
    #[test]
    fn test_inserted_elements_record_their_source_location() {
        let mut tree = parse_xml(r#"<form><group><field name="name"/></group></form>"#, "base").unwrap();
        annotate_root(&mut tree, 1);
        let v = view(2);
        let spec = parse_xml(
            r#"<data><field name="x" position="after"/><xpath expr="//field[@name='name']" position="before"><field name="tax"/><div><span/></div></xpath></data>"#,
            "s",
        );
        // the first spec has no target, apply only the second
        let patches = parse_patches(&spec.unwrap(), "v").unwrap();
        apply_patches(&mut tree, &patches[1..], &v).unwrap();
        let mut sources = Vec::new();
        tree.walk(&mut |_, el| sources.push(el.attr(SOURCE_ATTR).unwrap_or_default().to_string()));
        assert_eq!(
            sources,
            vec![
                "/form[1]",
                "/form[1]/group[1]",
                "/data[1]/xpath[1]/field[1]",
                "/data[1]/xpath[1]/div[1]",
                "/data[1]/xpath[1]/div[1]/span[1]",
                "/form[1]/group[1]/field[1]",
            ]
        );
        strip_origins(&mut tree);
        assert!(!to_string(&tree).contains("__"));
    }

    #[timeout(1000)]
    #[test]
    fn test_missing_target_names_the_view() {
        let err = apply(
            r#"<form><field name="name"/></form>"#,
            r#"<data>
                <field name="name" position="after"/>
                <xpath expr="//field[@name='gone']" position="after"/>
            </data>"#,
        )
        .unwrap_err();
        assert_eq!(
            err,
            CoreError::PatchTargetNotFound {
                view: "b.view_2".to_string(),
                module: "b".to_string(),
                line: 3,
                spec: r#"<xpath expr="//field[@name='gone']" position="after">"#.to_string(),
            }
        );
    }

    #[timeout(1000)]
    #[test]
    fn test_inserted_elements_carry_origin() {
        let mut tree = parse_xml(r#"<form><field name="name"/></form>"#, "base").unwrap();
        annotate_origin(&mut tree, 1);
        let v = view(7);
        let spec = parse_xml(r#"<field name="name" position="after"><group><field name="x"/></group></field>"#, "s").unwrap();
        apply_patches(&mut tree, &parse_patches(&spec, "v").unwrap(), &v).unwrap();
        let mut origins = Vec::new();
        tree.walk(&mut |_, el| origins.push(el.attr(ORIGIN_ATTR).unwrap_or_default().to_string()));
        assert_eq!(origins, vec!["1", "1", "7", "7"]);
    }
}
