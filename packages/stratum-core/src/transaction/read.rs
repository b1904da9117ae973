//! Read access to records through the registry: computed and related
//! values, relational paths, search and ordering.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

use serde_json::{json, Map, Value};

use crate::domain::Domain;
use crate::error::CoreError;
use crate::registry::{Field, FieldType, Registry};
use crate::store::{Record, RecordId, Store};

/// Read-only view of the store interpreted through a registry.
#[derive(Clone, Copy)]
pub struct Reader<'a> {
    pub store: &'a Store,
    pub registry: &'a Registry,
    pub uid: RecordId,
}

impl<'a> Reader<'a> {
    pub fn new(store: &'a Store, registry: &'a Registry, uid: RecordId) -> Self {
        Self { store, registry, uid }
    }

    pub fn exists(&self, model: &str, id: RecordId) -> bool {
        self.store.exists(model, id)
    }

    /// Stored record.
    pub fn browse(&self, model: &str, id: RecordId) -> Result<&'a Record, CoreError> {
        self.store.record(model, id).ok_or_else(|| CoreError::RecordNotFound {
            model: model.to_string(),
            id,
        })
    }

    /// Ids of every record of `model`.
    pub fn all_ids(&self, model: &str) -> Vec<RecordId> {
        self.store.table(model).map(|t| t.ids()).unwrap_or_default()
    }

    /// Value of one field of one record. Non-stored fields are computed.
    pub fn value(&self, model: &str, id: RecordId, name: &str) -> Result<Value, CoreError> {
        if name == "id" {
            return Ok(json!(id));
        }
        let field = self.registry.field(model, name)?;
        let record = self.browse(model, id)?;
        if field.store {
            return Ok(record.get(name).clone());
        }
        if field.related.is_some() || field.compute.is_some() {
            let mut values = self.compute_values(model, field, &[id])?;
            return Ok(values.remove(&id).unwrap_or(Value::Null));
        }
        if field.field_type == FieldType::One2many {
            return Ok(Value::from(self.inverse_ids(field, id)));
        }
        Ok(Value::Null)
    }

    /// Records of the comodel whose inverse many2one points at `id`.
    fn inverse_ids(&self, field: &Field, id: RecordId) -> Vec<RecordId> {
        let (Some(comodel), Some(inverse)) = (&field.comodel, &field.inverse_name) else {
            return Vec::new();
        };
        self.store
            .table(comodel)
            .map(|t| {
                t.iter()
                    .filter(|r| r.get_id(inverse) == Some(id))
                    .map(|r| r.id)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Values of a computed or related field for several records.
    pub fn compute_values(
        &self,
        model: &str,
        field: &Field,
        ids: &[RecordId],
    ) -> Result<BTreeMap<RecordId, Value>, CoreError> {
        let mut out = BTreeMap::new();
        if let Some(compute) = &field.compute {
            let result = self.registry.call(
                self.store,
                self.uid,
                model,
                &compute.method,
                json!({ "ids": ids, "field": field.name }),
            )?;
            for id in ids {
                let value = result.get(id.to_string()).cloned().unwrap_or(Value::Null);
                out.insert(*id, value);
            }
        } else if let Some(path) = &field.related {
            let path: Vec<&str> = path.iter().map(String::as_str).collect();
            for id in ids {
                let values = self.path_values(model, *id, &path)?;
                let value = if field.field_type.is_x2many() {
                    Value::Array(values)
                } else {
                    values.into_iter().next().unwrap_or(Value::Null)
                };
                out.insert(*id, value);
            }
        }
        Ok(out)
    }

    /// Values found by following `path` from a record. To-many hops fan
    /// out; unset values yield nothing.
    pub fn path_values(&self, model: &str, id: RecordId, path: &[&str]) -> Result<Vec<Value>, CoreError> {
        let Some((first, rest)) = path.split_first() else {
            return Ok(Vec::new());
        };
        let value = self.value(model, id, first)?;
        if rest.is_empty() {
            let to_many = *first != "id" && self.registry.field(model, first)?.field_type.is_x2many();
            return Ok(match value {
                Value::Null => Vec::new(),
                Value::Array(items) if to_many => items,
                other => vec![other],
            });
        }
        let field = self.registry.field(model, first)?;
        let comodel = match (&field.comodel, field.field_type.is_relational()) {
            (Some(comodel), true) => comodel,
            _ => {
                return Err(CoreError::UnknownField {
                    model: model.to_string(),
                    field: path.join("."),
                })
            }
        };
        let mut out = Vec::new();
        for target in ids_of(&value) {
            if self.exists(comodel, target) {
                out.extend(self.path_values(comodel, target, rest)?);
            }
        }
        Ok(out)
    }

    /// Ids reached by following a relational path from a record.
    pub fn path_targets(&self, model: &str, id: RecordId, path: &[String]) -> Result<BTreeSet<RecordId>, CoreError> {
        let mut current_model = model.to_string();
        let mut current: BTreeSet<RecordId> = [id].into_iter().collect();
        for segment in path {
            let field = self.registry.field(&current_model, segment)?;
            let Some(comodel) = field.comodel.clone() else {
                return Ok(BTreeSet::new());
            };
            let mut next = BTreeSet::new();
            for source in &current {
                if self.exists(&current_model, *source) {
                    next.extend(ids_of(&self.value(&current_model, *source, segment)?));
                }
            }
            current_model = comodel;
            current = next;
        }
        Ok(current)
    }

    /// Records of `model` whose relational `path` reaches one of `targets`.
    pub fn records_reaching(
        &self,
        model: &str,
        path: &[String],
        targets: &[RecordId],
    ) -> Result<Vec<RecordId>, CoreError> {
        let mut out = Vec::new();
        for id in self.all_ids(model) {
            let reached = self.path_targets(model, id, path)?;
            if targets.iter().any(|t| reached.contains(t)) {
                out.push(id);
            }
        }
        Ok(out)
    }

    /// Reads fields of records as JSON objects carrying their `id`. An empty
    /// field list reads every field.
    pub fn read(&self, model: &str, ids: &[RecordId], fields: &[&str]) -> Result<Vec<Value>, CoreError> {
        let model_def = self.registry.model(model)?;
        let names: Vec<&str> = if fields.is_empty() {
            model_def.field_order.iter().map(String::as_str).collect()
        } else {
            fields.to_vec()
        };
        let mut rows = Vec::with_capacity(ids.len());
        for id in ids {
            let mut row = Map::new();
            row.insert("id".to_string(), json!(id));
            for name in &names {
                row.insert(name.to_string(), self.value(model, *id, name)?);
            }
            rows.push(Value::Object(row));
        }
        Ok(rows)
    }

    /// Ids of the records matching `domain`, sorted by `order` (the model's
    /// order when `None`), then paginated.
    pub fn search(
        &self,
        model: &str,
        domain: &Domain,
        limit: Option<usize>,
        offset: usize,
        order: Option<&str>,
    ) -> Result<Vec<RecordId>, CoreError> {
        let model_def = self.registry.model(model)?;
        let domain = domain.bind(&self.eval_context())?;
        let mut ids = Vec::new();
        for id in self.all_ids(model) {
            let matched = domain.matches(&|path: &str| {
                let segments: Vec<&str> = path.split('.').collect();
                self.path_values(model, id, &segments)
            })?;
            if matched {
                ids.push(id);
            }
        }

        let order = order.unwrap_or(model_def.order.as_str());
        let terms: Vec<(String, bool)> = order
            .split(',')
            .filter_map(|term| {
                let mut parts = term.split_whitespace();
                let name = parts.next()?;
                let descending = parts.next().is_some_and(|d| d.eq_ignore_ascii_case("desc"));
                Some((name.to_string(), descending))
            })
            .collect();
        let mut keyed = Vec::with_capacity(ids.len());
        for id in ids {
            let mut key = Vec::with_capacity(terms.len());
            for (name, _) in &terms {
                key.push(self.value(model, id, name)?);
            }
            keyed.push((key, id));
        }
        keyed.sort_by(|(a, ida), (b, idb)| {
            for (i, (_, descending)) in terms.iter().enumerate() {
                let ord = compare_values(&a[i], &b[i]);
                let ord = if *descending { ord.reverse() } else { ord };
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            ida.cmp(idb)
        });

        let page = keyed.into_iter().map(|(_, id)| id).skip(offset);
        Ok(match limit {
            Some(limit) => page.take(limit).collect(),
            None => page.collect(),
        })
    }

    /// Names available to domains: `uid` and `user.id`.
    pub fn eval_context(&self) -> BTreeMap<String, Value> {
        let mut context = BTreeMap::new();
        context.insert("uid".to_string(), json!(self.uid));
        context.insert("user.id".to_string(), json!(self.uid));
        context
    }

    /// Display name: the model's name field, else `model,id`.
    pub fn display_name(&self, model: &str, id: RecordId) -> String {
        let name = self
            .registry
            .model(model)
            .ok()
            .and_then(|m| m.display_field())
            .and_then(|f| self.value(model, id, f).ok())
            .and_then(|v| v.as_str().map(str::to_string));
        name.unwrap_or_else(|| format!("{},{}", model, id))
    }

    /// Runs a model method.
    pub fn call(&self, model: &str, method: &str, args: Value) -> Result<Value, CoreError> {
        self.registry.call(self.store, self.uid, model, method, args)
    }
}

/// Record ids held by a relational value.
pub(crate) fn ids_of(value: &Value) -> Vec<RecordId> {
    match value {
        Value::Number(n) => n.as_u64().into_iter().collect(),
        Value::Array(items) => items.iter().filter_map(Value::as_u64).collect(),
        _ => Vec::new(),
    }
}

/// Sort order: unset first, then booleans, numbers and strings.
pub(crate) fn compare_values(a: &Value, b: &Value) -> Ordering {
    fn rank(v: &Value) -> u8 {
        match v {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Number(_) => 2,
            Value::String(_) => 3,
            Value::Array(_) => 4,
            Value::Object(_) => 5,
        }
    }
    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => {
            let (x, y) = (x.as_f64().unwrap_or(0.0), y.as_f64().unwrap_or(0.0));
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Value::String(x), Value::String(y)) => x.cmp(y),
        _ => rank(a).cmp(&rank(b)),
    }
}
