//! Group gating of composed architectures.

use std::collections::BTreeSet;

use crate::error::CoreError;
use crate::security::groups_match;
use crate::store::RecordId;
use crate::transaction::Reader;
use crate::xml::{Element, Node};

/// Field names hidden or removed while gating, by the labels that follow them.
#[derive(Default)]
struct Gated {
    hidden: BTreeSet<String>,
    removed: BTreeSet<String>,
}

/// Evaluates every `groups` attribute against the user's groups.
///
/// Elements the user may not see are removed, except fields and labels
/// which stay in the tree marked `invisible="1"` (a label follows the field
/// it is `for`). The `groups` attribute is always stripped. Fields of
/// `model` whose declaration is restricted to groups the user is not in are
/// removed along with their labels.
pub fn gate_groups(
    tree: &mut Element,
    reader: &Reader<'_>,
    groups: &BTreeSet<RecordId>,
    model: &str,
) -> Result<(), CoreError> {
    let mut gated = Gated::default();
    if let Some(expr) = tree.remove_attr("groups") {
        // the root cannot be removed; it only loses the attribute
        groups_match(reader, groups, &expr)?;
    }
    gate_children(tree, reader, groups, model, &mut gated)?;
    if !gated.removed.is_empty() {
        remove_labels(tree, &gated.removed);
    }
    if !gated.hidden.is_empty() {
        tree.for_each_mut(&mut |el| {
            if el.tag == "label" && el.attr("for").is_some_and(|f| gated.hidden.contains(f)) {
                el.set_attr("invisible", "1");
            }
        });
    }
    Ok(())
}

/// Whether the declaration of `model.name` lets the user see it.
fn field_visible(reader: &Reader<'_>, groups: &BTreeSet<RecordId>, model: &str, name: &str) -> Result<bool, CoreError> {
    match reader.registry.field(model, name) {
        Ok(field) if !field.groups.is_empty() => groups_match(reader, groups, &field.groups.join(",")),
        _ => Ok(true),
    }
}

fn gate_children(
    el: &mut Element,
    reader: &Reader<'_>,
    groups: &BTreeSet<RecordId>,
    model: &str,
    gated: &mut Gated,
) -> Result<(), CoreError> {
    let children = std::mem::take(&mut el.children);
    let mut kept = Vec::with_capacity(children.len());
    for mut node in children {
        if let Node::Element(child) = &mut node {
            if let Some(expr) = child.remove_attr("groups") {
                if !groups_match(reader, groups, &expr)? {
                    match child.tag.as_str() {
                        "field" => {
                            child.set_attr("invisible", "1");
                            if let Some(name) = child.attr("name") {
                                gated.hidden.insert(name.to_string());
                            }
                        }
                        "label" => child.set_attr("invisible", "1"),
                        _ => continue,
                    }
                }
            }
            // subviews of a relational field describe its comodel
            let mut child_model = model.to_string();
            if child.tag == "field" {
                if let Some(name) = child.attr("name").map(str::to_string) {
                    if !field_visible(reader, groups, model, &name)? {
                        gated.removed.insert(name);
                        continue;
                    }
                    if let Some(comodel) = reader.registry.field(model, &name).ok().and_then(|f| f.comodel.clone()) {
                        child_model = comodel;
                    }
                }
            }
            gate_children(child, reader, groups, &child_model, gated)?;
        }
        kept.push(node);
    }
    el.children = kept;
    Ok(())
}

fn remove_labels(el: &mut Element, fields: &BTreeSet<String>) {
    el.children.retain(|node| match node {
        Node::Element(child) => !(child.tag == "label" && child.attr("for").is_some_and(|f| fields.contains(f))),
        _ => true,
    });
    for child in el.children.iter_mut().filter_map(Node::as_element_mut) {
        remove_labels(child, fields);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{ExternalId, Store};
    use crate::registry::Registry;
    use crate::xml::{parse_xml, to_string};
    use ntest::timeout;

    fn store() -> Store {
        let mut store = Store::new();
        store.ensure_table("res.groups");
        let system = store
            .insert("res.groups", [("name".to_string(), serde_json::json!("Settings"))].into())
            .unwrap();
        store.set_xmlid(ExternalId::new("base", "group_system", "res.groups", system));
        store
    }

    fn gate(arch: &str, member: bool) -> Result<String, CoreError> {
        let store = store();
        let registry = Registry::empty();
        let reader = Reader::new(&store, &registry, 2);
        let groups: BTreeSet<RecordId> = if member { [1].into() } else { BTreeSet::new() };
        let mut tree = parse_xml(arch, "t").unwrap();
        gate_groups(&mut tree, &reader, &groups, "widget")?;
        Ok(to_string(&tree))
    }

    #[timeout(1000)]
    #[test]
    fn test_buttons_are_removed_for_outsiders() {
        let arch = r#"<form><button name="archive" groups="base.group_system"/><field name="name"/></form>"#;
        assert_eq!(gate(arch, false).unwrap(), r#"<form><field name="name"/></form>"#);
        assert_eq!(
            gate(arch, true).unwrap(),
            r#"<form><button name="archive"/><field name="name"/></form>"#
        );
    }

    #[timeout(1000)]
    #[test]
    fn test_fields_and_labels_become_invisible() {
        let arch = r#"<form><label for="cost"/><field name="cost" groups="base.group_system"/></form>"#;
        assert_eq!(
            gate(arch, false).unwrap(),
            r#"<form><label for="cost" invisible="1"/><field name="cost" invisible="1"/></form>"#
        );
    }

    #[timeout(1000)]
    #[test]
    fn test_negated_groups_and_unknown_groups() {
        let arch = r#"<form><div groups="!base.group_system">hint</div></form>"#;
        assert_eq!(gate(arch, false).unwrap(), r#"<form><div>hint</div></form>"#);
        assert_eq!(gate(arch, true).unwrap(), r#"<form/>"#);
        let err = gate(r#"<form><div groups="base.group_missing"/></form>"#, true).unwrap_err();
        assert_eq!(err.kind(), "UnknownGroup");
    }

    #[timeout(1000)]
    #[test]
    fn test_fields_restricted_by_declaration_are_removed() {
        use crate::module::Module;
        use crate::registry::{FieldDecl, ModelDecl};
        use std::sync::Arc;

        let store = store();
        let module = Module::new("widgets").with_model(
            ModelDecl::new("widget")
                .field(FieldDecl::char("name"))
                .field(FieldDecl::float("cost").groups("base.group_system")),
        );
        let registry = Registry::build(&[Arc::new(module)], 1).unwrap();
        let reader = Reader::new(&store, &registry, 2);
        let arch = r#"<form><group><label for="cost"/><field name="cost"/><field name="name"/></group></form>"#;

        let mut tree = parse_xml(arch, "t").unwrap();
        gate_groups(&mut tree, &reader, &BTreeSet::new(), "widget").unwrap();
        assert_eq!(to_string(&tree), r#"<form><group><field name="name"/></group></form>"#);

        let mut tree = parse_xml(arch, "t").unwrap();
        gate_groups(&mut tree, &reader, &[1].into(), "widget").unwrap();
        assert_eq!(to_string(&tree), arch);
    }
}
