//! Merging of per-module model declarations into composed models.

use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet};

use crate::error::CoreError;

use super::field::{Field, FieldType};
use super::model::{Constraint, InheritsLink, Model, ModelDecl};

pub(crate) type Models = BTreeMap<String, Model>;

/// Applies one module's declaration of a model.
pub(crate) fn apply_decl(models: &mut Models, decl: &ModelDecl, module: &str) -> Result<(), CoreError> {
    let fresh = if models.contains_key(&decl.name) {
        None
    } else if decl.is_extension() {
        return Err(CoreError::UnknownModel {
            model: decl.name.clone(),
            context: format!("extended by module '{}'", module),
        });
    } else {
        Some(prototype(models, decl, module)?)
    };
    let model = match fresh {
        Some(model) => models.entry(decl.name.clone()).or_insert(model),
        None => models
            .entry(decl.name.clone())
            .or_insert_with(|| Model::new(&decl.name)),
    };

    if !model.modules.iter().any(|m| m == module) {
        model.modules.push(module.to_string());
    }
    if let Some(description) = &decl.description {
        model.description = description.clone();
    }
    if let Some(order) = &decl.order {
        model.order = order.clone();
    }
    if decl.rec_name.is_some() {
        model.rec_name = decl.rec_name.clone();
    }

    for field_decl in &decl.fields {
        match model.fields.get_mut(&field_decl.name) {
            Some(field) => field.merge(field_decl, module)?,
            None => model.insert_field(Field::from_decl(&decl.name, field_decl, module)),
        }
    }

    for constraint in &decl.constraints {
        match model.constraints.entry(constraint.name.clone()) {
            Entry::Occupied(mut entry) => {
                let existing = entry.get_mut();
                existing.kind = constraint.kind.clone();
                existing.message = constraint.message.clone();
                if !existing.modules.iter().any(|m| m == module) {
                    existing.modules.push(module.to_string());
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(Constraint {
                    name: constraint.name.clone(),
                    kind: constraint.kind.clone(),
                    message: constraint.message.clone(),
                    modules: vec![module.to_string()],
                });
            }
        }
    }

    for (name, func) in &decl.methods {
        model.methods.entry(name.clone()).or_default().push(module, *func);
    }

    for (parent, field) in &decl.inherits {
        if !model.inherits.iter().any(|l| &l.parent == parent) {
            model.inherits.push(InheritsLink {
                parent: parent.clone(),
                field: field.clone(),
                module: module.to_string(),
            });
        }
    }
    Ok(())
}

/// New model starting from a copy of each prototype parent.
fn prototype(models: &Models, decl: &ModelDecl, module: &str) -> Result<Model, CoreError> {
    let mut model = Model::new(&decl.name);
    for parent_name in decl.inherit.iter().filter(|p| **p != decl.name) {
        let parent = models.get(parent_name).ok_or_else(|| CoreError::UnknownModel {
            model: parent_name.clone(),
            context: format!("prototype of '{}' in module '{}'", decl.name, module),
        })?;
        for field in parent.ordered_fields().filter(|f| !f.inherited) {
            let mut copy = field.clone();
            copy.model = decl.name.clone();
            copy.modules = vec![module.to_string()];
            for option in copy.selection.iter_mut() {
                option.module = module.to_string();
            }
            model.insert_field(copy);
        }
        for constraint in parent.constraints.values() {
            let mut copy = constraint.clone();
            copy.modules = vec![module.to_string()];
            model.constraints.insert(copy.name.clone(), copy);
        }
        for (name, chain) in &parent.methods {
            model.methods.insert(name.clone(), chain.clone());
        }
        for link in &parent.inherits {
            model.inherits.push(InheritsLink {
                module: module.to_string(),
                ..link.clone()
            });
        }
        model.description = parent.description.clone();
        model.order = parent.order.clone();
        model.rec_name = parent.rec_name.clone();
        model.parents.push(parent_name.clone());
    }
    Ok(model)
}

fn model_of<'m>(models: &'m Models, name: &str, context: &str) -> Result<&'m Model, CoreError> {
    models.get(name).ok_or_else(|| CoreError::UnknownModel {
        model: name.to_string(),
        context: context.to_string(),
    })
}

/// Exposes delegation parents' fields on their children.
pub(crate) fn resolve_inherits(models: &mut Models) -> Result<(), CoreError> {
    let names: Vec<String> = models.keys().cloned().collect();
    let mut done = BTreeSet::new();
    for name in names {
        resolve_inherits_of(models, &name, &mut done, &mut Vec::new())?;
    }
    Ok(())
}

fn resolve_inherits_of(
    models: &mut Models,
    name: &str,
    done: &mut BTreeSet<String>,
    visiting: &mut Vec<String>,
) -> Result<(), CoreError> {
    if done.contains(name) {
        return Ok(());
    }
    if visiting.iter().any(|v| v == name) {
        let mut members = visiting.clone();
        members.push(name.to_string());
        return Err(CoreError::CyclicDependency {
            kind: "delegation inheritance",
            members,
        });
    }
    visiting.push(name.to_string());

    let links = model_of(models, name, "delegation")?.inherits.clone();
    for link in &links {
        model_of(models, &link.parent, &format!("delegation parent of '{}'", name))?;
        resolve_inherits_of(models, &link.parent, done, visiting)?;

        let model = model_of(models, name, "delegation")?;
        let link_field = model.fields.get(&link.field).ok_or_else(|| CoreError::UnknownField {
            model: name.to_string(),
            field: link.field.clone(),
        })?;
        if link_field.field_type != FieldType::Many2one || link_field.comodel.as_deref() != Some(link.parent.as_str()) {
            return Err(CoreError::IncompatibleFieldDeclaration {
                model: name.to_string(),
                field: link.field.clone(),
                module: link.module.clone(),
                reason: format!("delegation link must be a many2one to '{}'", link.parent),
            });
        }

        let parent_fields: Vec<Field> = model_of(models, &link.parent, "delegation")?
            .ordered_fields()
            .cloned()
            .collect();
        let Some(model) = models.get_mut(name) else { continue };
        for parent_field in parent_fields {
            if model.fields.contains_key(&parent_field.name) {
                continue;
            }
            let mut field = parent_field.clone();
            field.model = name.to_string();
            field.related = Some(vec![link.field.clone(), parent_field.name.clone()]);
            field.compute = None;
            field.store = false;
            field.inherited = true;
            field.inherited_from = Some(link.parent.clone());
            field.modules = vec![link.module.clone()];
            model.insert_field(field);
        }
    }

    visiting.pop();
    done.insert(name.to_string());
    Ok(())
}

enum Walk {
    Terminal(Field),
    Blocked,
}

/// Gives every related field the type of the end of its path.
pub(crate) fn resolve_related(models: &mut Models) -> Result<(), CoreError> {
    let mut pending: BTreeSet<(String, String)> = models
        .values()
        .flat_map(|m| {
            m.fields
                .values()
                .filter(|f| f.related.is_some())
                .map(|f| (m.name.clone(), f.name.clone()))
        })
        .collect();

    while !pending.is_empty() {
        let mut resolved = Vec::new();
        for (model, name) in &pending {
            let path = models
                .get(model)
                .and_then(|m| m.fields.get(name))
                .and_then(|f| f.related.clone())
                .unwrap_or_default();
            if let Walk::Terminal(target) = walk_related(models, model, name, &path, &pending)? {
                resolved.push((model.clone(), name.clone(), target));
            }
        }
        if resolved.is_empty() {
            let (model, name) = pending.iter().next().cloned().unwrap_or_default();
            let path = models
                .get(&model)
                .and_then(|m| m.fields.get(&name))
                .and_then(|f| f.related.as_ref())
                .map(|p| p.join("."))
                .unwrap_or_default();
            return Err(CoreError::BadRelated {
                model,
                field: name,
                path,
                reason: "related fields form a cycle".to_string(),
            });
        }
        for (model, name, target) in resolved {
            pending.remove(&(model.clone(), name.clone()));
            let Some(field) = models.get_mut(&model).and_then(|m| m.fields.get_mut(&name)) else {
                continue;
            };
            field.field_type = target.field_type;
            field.comodel = target.comodel.clone();
            field.inverse_name = target.inverse_name.clone();
            field.relation_table = target.relation_table.clone();
            if field.selection.is_empty() {
                field.selection = target.selection.clone();
            }
        }
    }
    Ok(())
}

fn walk_related(
    models: &Models,
    model: &str,
    name: &str,
    path: &[String],
    pending: &BTreeSet<(String, String)>,
) -> Result<Walk, CoreError> {
    let bad = |reason: String| CoreError::BadRelated {
        model: model.to_string(),
        field: name.to_string(),
        path: path.join("."),
        reason,
    };
    if path.is_empty() {
        return Err(bad("empty path".to_string()));
    }
    let mut current = model.to_string();
    for (i, segment) in path.iter().enumerate() {
        let step = models
            .get(&current)
            .ok_or_else(|| bad(format!("model '{}' does not exist", current)))?;
        let field = step
            .fields
            .get(segment)
            .ok_or_else(|| bad(format!("field '{}' does not exist on '{}'", segment, current)))?;
        if pending.contains(&(current.clone(), segment.clone())) && !(current == model && segment == name) {
            return Ok(Walk::Blocked);
        }
        if i + 1 == path.len() {
            return Ok(Walk::Terminal(field.clone()));
        }
        match (&field.comodel, field.field_type.is_relational()) {
            (Some(comodel), true) => current = comodel.clone(),
            _ => return Err(bad(format!("'{}' on '{}' is not relational", segment, current))),
        }
    }
    Err(bad("empty path".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::field::FieldDecl;

    fn compose(decls: &[(&str, ModelDecl)]) -> Result<Models, CoreError> {
        let mut models = Models::new();
        for (module, decl) in decls {
            apply_decl(&mut models, decl, module)?;
        }
        resolve_inherits(&mut models)?;
        resolve_related(&mut models)?;
        Ok(models)
    }

    #[test]
    fn test_classical_extension_merges_fields() {
        let models = compose(&[
            ("a", ModelDecl::new("widget").field(FieldDecl::char("name")).field(FieldDecl::float("price"))),
            ("b", ModelDecl::extend("widget").field(FieldDecl::float("tax"))),
        ])
        .unwrap();
        let widget = &models["widget"];
        assert_eq!(widget.field_order, vec!["name", "price", "tax"]);
        assert_eq!(widget.modules, vec!["a", "b"]);
        assert_eq!(widget.fields["tax"].modules, vec!["b"]);
    }

    #[test]
    fn test_extending_unknown_model_fails() {
        let err = compose(&[("b", ModelDecl::extend("ghost"))]).unwrap_err();
        assert_eq!(err.kind(), "UnknownModel");
    }

    #[test]
    fn test_prototype_copies_fields() {
        let models = compose(&[
            ("a", ModelDecl::new("mail.thread").field(FieldDecl::char("message"))),
            ("b", ModelDecl::new("note").inherit("mail.thread").field(FieldDecl::text("body"))),
        ])
        .unwrap();
        let note = &models["note"];
        assert_eq!(note.field_order, vec!["message", "body"]);
        assert_eq!(note.fields["message"].modules, vec!["b"]);
        assert_eq!(note.fields["message"].model, "note");
        assert!(!models["mail.thread"].fields.contains_key("body"));
    }

    #[test]
    fn test_delegation_exposes_parent_fields() {
        let models = compose(&[(
            "a",
            ModelDecl::new("res.partner").field(FieldDecl::char("name")).field(FieldDecl::char("email")),
        ), (
            "b",
            ModelDecl::new("res.users")
                .inherits("res.partner", "partner_id")
                .field(FieldDecl::many2one("partner_id", "res.partner").required(true).ondelete(crate::registry::OnDelete::Cascade))
                .field(FieldDecl::char("login")),
        )])
        .unwrap();
        let email = &models["res.users"].fields["email"];
        assert!(email.inherited);
        assert!(!email.store);
        assert_eq!(email.related, Some(vec!["partner_id".to_string(), "email".to_string()]));
        assert_eq!(email.inherited_from.as_deref(), Some("res.partner"));
    }

    #[test]
    fn test_delegation_link_must_be_many2one() {
        let err = compose(&[
            ("a", ModelDecl::new("res.partner")),
            ("b", ModelDecl::new("res.users").inherits("res.partner", "partner_id").field(FieldDecl::integer("partner_id"))),
        ])
        .unwrap_err();
        assert_eq!(err.kind(), "IncompatibleFieldDeclaration");
    }

    #[test]
    fn test_related_takes_terminal_type() {
        let models = compose(&[(
            "a",
            ModelDecl::new("res.partner").field(FieldDecl::many2one("country_id", "res.country")),
        ), (
            "a",
            ModelDecl::new("res.country").field(FieldDecl::selection("zone", &[("eu", "EU")])),
        ), (
            "b",
            ModelDecl::new("sale.order")
                .field(FieldDecl::many2one("partner_id", "res.partner"))
                .field(FieldDecl::related("country_id", "partner_id.country_id"))
                .field(FieldDecl::related("zone", "country_id.zone")),
        )])
        .unwrap();
        let order = &models["sale.order"];
        assert_eq!(order.fields["country_id"].field_type, FieldType::Many2one);
        assert_eq!(order.fields["country_id"].comodel.as_deref(), Some("res.country"));
        assert_eq!(order.fields["zone"].field_type, FieldType::Selection);
        assert_eq!(order.fields["zone"].selection.len(), 1);
    }

    #[test]
    fn test_bad_related_paths() {
        let err = compose(&[(
            "a",
            ModelDecl::new("sale.order")
                .field(FieldDecl::char("name"))
                .field(FieldDecl::related("x", "name.size")),
        )])
        .unwrap_err();
        assert_eq!(err.kind(), "BadRelated");

        let err = compose(&[(
            "a",
            ModelDecl::new("sale.order")
                .field(FieldDecl::related("x", "y"))
                .field(FieldDecl::related("y", "x")),
        )])
        .unwrap_err();
        assert!(matches!(err, CoreError::BadRelated { ref reason, .. } if reason.contains("cycle")));
    }
}
