//! Structural checks run once every declaration is merged.

use std::collections::BTreeMap;

use crate::domain::Domain;
use crate::error::CoreError;

use super::compose::Models;
use super::field::FieldType;
use super::model::ConstraintKind;
use super::Trigger;

pub(crate) fn validate(models: &Models) -> Result<(), CoreError> {
    for model in models.values() {
        for field in model.fields.values() {
            if field.field_type.is_relational() {
                let comodel = field.comodel.as_deref().unwrap_or_default();
                let Some(target) = models.get(comodel) else {
                    return Err(CoreError::UnknownModel {
                        model: comodel.to_string(),
                        context: format!("comodel of field '{}.{}'", model.name, field.name),
                    });
                };
                if field.field_type == FieldType::One2many && !field.inherited && field.related.is_none() {
                    let inverse = field.inverse_name.as_deref().unwrap_or_default();
                    match target.fields.get(inverse) {
                        Some(f) if f.field_type == FieldType::Many2one => {}
                        _ => {
                            return Err(CoreError::UnknownField {
                                model: comodel.to_string(),
                                field: inverse.to_string(),
                            })
                        }
                    }
                }
            }
            if let Some(domain) = &field.domain {
                Domain::parse(domain)?;
            }
            if let Some(compute) = &field.compute {
                for method in std::iter::once(&compute.method).chain(compute.inverse.iter()) {
                    if !model.methods.contains_key(method) {
                        return Err(CoreError::UnknownMethod {
                            model: model.name.clone(),
                            method: method.clone(),
                        });
                    }
                }
            }
        }

        for constraint in model.constraints.values() {
            let fields = match &constraint.kind {
                ConstraintKind::Check { method, fields } => {
                    if !model.methods.contains_key(method) {
                        return Err(CoreError::UnknownMethod {
                            model: model.name.clone(),
                            method: method.clone(),
                        });
                    }
                    fields.clone()
                }
                sql => sql.unique_fields().unwrap_or_default(),
            };
            for name in fields {
                if !model.fields.contains_key(&name) {
                    return Err(CoreError::UnknownField {
                        model: model.name.clone(),
                        field: name,
                    });
                }
            }
        }

        for term in model.order.split(',') {
            let name = term.split_whitespace().next().unwrap_or_default();
            if !name.is_empty() && name != "id" && !model.fields.contains_key(name) {
                return Err(CoreError::UnknownField {
                    model: model.name.clone(),
                    field: name.to_string(),
                });
            }
        }
        if let Some(rec_name) = &model.rec_name {
            if !model.fields.contains_key(rec_name) {
                return Err(CoreError::UnknownField {
                    model: model.name.clone(),
                    field: rec_name.clone(),
                });
            }
        }
    }
    Ok(())
}

/// Dependency triggers of stored computed and stored related fields, keyed
/// by the `(model, field)` whose writes invalidate them. Dependencies of
/// non-stored computed fields are checked but produce no trigger.
pub(crate) fn build_triggers(models: &Models) -> Result<BTreeMap<(String, String), Vec<Trigger>>, CoreError> {
    let mut triggers: BTreeMap<(String, String), Vec<Trigger>> = BTreeMap::new();
    for model in models.values() {
        for field in model.fields.values() {
            let depends: Vec<String> = match (&field.compute, &field.related) {
                (Some(compute), _) => compute.depends.clone(),
                (None, Some(path)) if !field.inherited => vec![path.join(".")],
                _ => continue,
            };
            for dep in depends {
                let segments: Vec<String> = dep.split('.').map(str::to_string).collect();
                let bad = || CoreError::BadDepends {
                    model: model.name.clone(),
                    field: field.name.clone(),
                    path: dep.clone(),
                };
                let mut current = model.name.clone();
                for (k, segment) in segments.iter().enumerate() {
                    let step = models.get(&current).ok_or_else(bad)?;
                    let dep_field = step.fields.get(segment).ok_or_else(bad)?;
                    if field.store {
                        let mut add = |on_model: &str, on_field: &str, path: &[String]| {
                            let list = triggers
                                .entry((on_model.to_string(), on_field.to_string()))
                                .or_default();
                            let trigger = Trigger {
                                model: model.name.clone(),
                                field: field.name.clone(),
                                path: path.to_vec(),
                            };
                            if !list.contains(&trigger) {
                                list.push(trigger);
                            }
                        };
                        add(&current, segment, &segments[..k]);
                        if dep_field.field_type == FieldType::One2many {
                            if let (Some(comodel), Some(inverse)) = (&dep_field.comodel, &dep_field.inverse_name) {
                                add(comodel, inverse, &segments[..=k]);
                            }
                        }
                    }
                    if k + 1 < segments.len() {
                        match (&dep_field.comodel, dep_field.field_type.is_relational()) {
                            (Some(comodel), true) => current = comodel.clone(),
                            _ => return Err(bad()),
                        }
                    }
                }
            }
        }
    }
    Ok(triggers)
}
