//! Normalization of incoming field values.

use serde_json::Value;

use crate::error::CoreError;
use crate::registry::{Field, FieldType};
use crate::store::RecordId;

use super::read::ids_of;

fn mismatch(field: &Field, value: &Value) -> CoreError {
    CoreError::ConstraintViolation {
        model: field.model.clone(),
        constraint: "type".to_string(),
        message: format!("invalid value {} for {} field '{}'", value, field.field_type, field.name),
    }
}

/// Converts `value` to the stored representation of `field`. `current` is
/// the stored value, needed to apply many2many commands.
pub(crate) fn normalize(field: &Field, value: &Value, current: Option<&Value>) -> Result<Value, CoreError> {
    let unset = matches!(value, Value::Null | Value::Bool(false));
    Ok(match field.field_type {
        FieldType::Boolean => match value {
            Value::Bool(_) => value.clone(),
            Value::Null => Value::Bool(false),
            Value::Number(n) => Value::Bool(n.as_i64().unwrap_or(0) != 0),
            _ => return Err(mismatch(field, value)),
        },
        FieldType::Integer => match value {
            Value::Number(n) if n.is_i64() || n.is_u64() => value.clone(),
            _ if unset => Value::Null,
            _ => return Err(mismatch(field, value)),
        },
        FieldType::Float | FieldType::Monetary => match value {
            Value::Number(_) => value.clone(),
            _ if unset => Value::Null,
            _ => return Err(mismatch(field, value)),
        },
        FieldType::Char | FieldType::Text | FieldType::Html | FieldType::Date | FieldType::Datetime => match value {
            Value::String(_) => value.clone(),
            _ if unset => Value::Null,
            _ => return Err(mismatch(field, value)),
        },
        FieldType::Selection => match value {
            Value::String(s) if field.accepts_selection(s) => value.clone(),
            _ if unset => Value::Null,
            Value::String(s) => {
                return Err(CoreError::ConstraintViolation {
                    model: field.model.clone(),
                    constraint: "selection".to_string(),
                    message: format!("'{}' is not a valid value for field '{}'", s, field.name),
                })
            }
            _ => return Err(mismatch(field, value)),
        },
        FieldType::Many2one => match value {
            Value::Number(n) if n.is_u64() => value.clone(),
            // [id, display name] pairs as returned by name lookups
            Value::Array(pair) if matches!(pair.first(), Some(Value::Number(_))) => pair[0].clone(),
            _ if unset => Value::Null,
            _ => return Err(mismatch(field, value)),
        },
        FieldType::Many2many => Value::from(apply_commands(field, value, current)?),
        FieldType::One2many => {
            return Err(CoreError::ConstraintViolation {
                model: field.model.clone(),
                constraint: "readonly".to_string(),
                message: format!("one2many field '{}' is set through its inverse", field.name),
            })
        }
        FieldType::Binary | FieldType::Reference | FieldType::Json => value.clone(),
    })
}

/// Applies a many2many value: a list of ids, or a list of commands
/// `(6, 0, ids)` replace, `(4, id)` link, `(3, id)` unlink, `(5,)` clear.
fn apply_commands(field: &Field, value: &Value, current: Option<&Value>) -> Result<Vec<RecordId>, CoreError> {
    let mut ids = current.map(ids_of).unwrap_or_default();
    let Value::Array(items) = value else {
        return match value {
            Value::Null | Value::Bool(false) => Ok(Vec::new()),
            _ => Err(mismatch(field, value)),
        };
    };
    if items.iter().all(Value::is_u64) {
        return Ok(dedup(items.iter().filter_map(Value::as_u64).collect()));
    }
    for item in items {
        let Value::Array(command) = item else {
            return Err(mismatch(field, value));
        };
        let code = command.first().and_then(Value::as_u64);
        let arg = command.get(1).and_then(Value::as_u64);
        match (code, arg) {
            (Some(6), _) => ids = command.get(2).map(ids_of).unwrap_or_default(),
            (Some(4), Some(id)) => {
                if !ids.contains(&id) {
                    ids.push(id);
                }
            }
            (Some(3), Some(id)) => ids.retain(|x| *x != id),
            (Some(5), _) => ids.clear(),
            _ => {
                return Err(CoreError::BadExpression {
                    expr: item.to_string(),
                    reason: format!("unsupported many2many command for field '{}'", field.name),
                })
            }
        }
    }
    Ok(dedup(ids))
}

fn dedup(ids: Vec<RecordId>) -> Vec<RecordId> {
    let mut out = Vec::with_capacity(ids.len());
    for id in ids {
        if !out.contains(&id) {
            out.push(id);
        }
    }
    out
}
