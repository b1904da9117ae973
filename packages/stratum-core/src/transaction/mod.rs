//! Transactions over the record store.
//!
//! A [`Transaction`] borrows the store exclusively together with a registry
//! snapshot. Its writes are schema-checked, enforce `ondelete` rules and
//! schedule recomputation of stored computed fields. Dropping a transaction
//! without committing rolls every change back.

mod convert;
mod read;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde_json::{json, Map, Value};

pub use read::Reader;
pub(crate) use read::{compare_values, ids_of};

use crate::domain::Domain;
use crate::error::CoreError;
use crate::registry::{ConstraintKind, Field, FieldType, Model, OnDelete, Registry};
use crate::store::{Record, RecordId, Savepoint, Store};
use convert::normalize;

/// Id of the superuser, which bypasses access rules.
pub const SUPERUSER_ID: RecordId = 1;

const DEFAULT_MAX_RECOMPUTE_ROUNDS: usize = 16;

/// RAII transaction with auto-rollback on drop.
pub struct Transaction<'a> {
    store: &'a mut Store,
    registry: Arc<Registry>,
    uid: RecordId,
    start: Savepoint,
    /// Stored computed fields awaiting recomputation
    pending: BTreeMap<(String, String), BTreeSet<RecordId>>,
    max_recompute_rounds: usize,
    committed: bool,
}

impl<'a> Transaction<'a> {
    /// Starts a transaction acting as `uid`.
    pub fn new(store: &'a mut Store, registry: Arc<Registry>, uid: RecordId) -> Self {
        let start = store.savepoint();
        Self {
            store,
            registry,
            uid,
            start,
            pending: BTreeMap::new(),
            max_recompute_rounds: DEFAULT_MAX_RECOMPUTE_ROUNDS,
            committed: false,
        }
    }

    /// Bounds the number of recompute rounds run by [`flush`](Self::flush).
    pub fn with_max_recompute_rounds(mut self, rounds: usize) -> Self {
        self.max_recompute_rounds = rounds.max(1);
        self
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub(crate) fn registry_arc(&self) -> Arc<Registry> {
        Arc::clone(&self.registry)
    }

    /// Flushes pending recomputation, then continues under `registry`.
    pub(crate) fn switch_registry(&mut self, registry: Arc<Registry>) -> Result<(), CoreError> {
        self.flush()?;
        self.registry = registry;
        Ok(())
    }

    pub fn uid(&self) -> RecordId {
        self.uid
    }

    pub fn store(&self) -> &Store {
        self.store
    }

    pub(crate) fn store_mut(&mut self) -> &mut Store {
        self.store
    }

    /// Read access within the transaction; sees its own writes.
    pub fn reader(&self) -> Reader<'_> {
        Reader::new(self.store, &self.registry, self.uid)
    }

    pub fn savepoint(&self) -> Savepoint {
        self.store.savepoint()
    }

    /// Undoes the changes made since `savepoint`.
    pub fn rollback_to(&mut self, savepoint: Savepoint) {
        self.store.rollback_to(savepoint);
    }

    pub fn exists(&self, model: &str, id: RecordId) -> bool {
        self.store.exists(model, id)
    }

    pub fn browse(&self, model: &str, id: RecordId) -> Result<&Record, CoreError> {
        self.store.record(model, id).ok_or_else(|| CoreError::RecordNotFound {
            model: model.to_string(),
            id,
        })
    }

    pub fn read(&self, model: &str, ids: &[RecordId], fields: &[&str]) -> Result<Vec<Value>, CoreError> {
        self.reader().read(model, ids, fields)
    }

    pub fn search(
        &self,
        model: &str,
        domain: &Domain,
        limit: Option<usize>,
        offset: usize,
        order: Option<&str>,
    ) -> Result<Vec<RecordId>, CoreError> {
        self.reader().search(model, domain, limit, offset, order)
    }

    pub fn call(&self, model: &str, method: &str, args: Value) -> Result<Value, CoreError> {
        self.reader().call(model, method, args)
    }

    /// Creates a record.
    ///
    /// # Arguments
    /// * `model` - Model of the new record
    /// * `values` - JSON object of field values; delegated fields are
    ///   forwarded to the parent record, which is created when missing
    ///
    /// # Returns
    /// The id of the new record. On error nothing is created.
    pub fn create(&mut self, model: &str, values: Value) -> Result<RecordId, CoreError> {
        self.atomic(|tx| tx.create_inner(model, values))
    }

    fn create_inner(&mut self, model: &str, values: Value) -> Result<RecordId, CoreError> {
        let registry = self.registry_arc();
        let model_def = registry.model(model)?;
        if !self.store.has_table(model) {
            self.store.ensure_table(model);
        }
        let split = self.split_values(model_def, values)?;

        let mut own = BTreeMap::new();
        for (name, value) in &split.own {
            let field = registry.field(model, name)?;
            own.insert(name.clone(), normalize(field, value, None)?);
        }
        for link in &model_def.inherits {
            let parent_values = split.delegated.get(&link.parent).cloned().unwrap_or_default();
            match own.get(&link.field).and_then(Value::as_u64) {
                Some(parent_id) if !parent_values.is_empty() => {
                    self.write(&link.parent, &[parent_id], Value::Object(parent_values))?;
                }
                Some(_) => {}
                None => {
                    let parent_id = self.create(&link.parent, Value::Object(parent_values))?;
                    own.insert(link.field.clone(), json!(parent_id));
                }
            }
        }
        for field in model_def.ordered_fields() {
            if field.store && !field.is_computed() && !own.contains_key(&field.name) {
                if let Some(default) = &field.default {
                    own.insert(field.name.clone(), normalize(field, default, None)?);
                }
            }
        }
        for field in model_def.ordered_fields() {
            if field.store && field.required && !field.is_computed() {
                let value = own.get(&field.name).unwrap_or(&Value::Null);
                if is_missing(field, value) {
                    return Err(required_violation(field));
                }
            }
        }
        self.check_references(model_def, &own)?;

        let id = self.store.insert(model, own)?;
        self.apply_inverses(model, &[id], &split.inverse)?;

        let written: Vec<String> = model_def.field_order.clone();
        self.mark(model, &[id], &written)?;
        for field in model_def.ordered_fields() {
            if field.store && field.is_computed() && !field.inherited {
                self.pending
                    .entry((model.to_string(), field.name.clone()))
                    .or_default()
                    .insert(id);
            }
        }
        self.check_constraints(model, &[id], None)?;
        self.check_structure(model, &[id], None)?;
        tracing::trace!(model, id, "record created");
        Ok(id)
    }

    /// Writes the same values on several records, all or nothing.
    pub fn write(&mut self, model: &str, ids: &[RecordId], values: Value) -> Result<(), CoreError> {
        self.atomic(|tx| tx.write_inner(model, ids, values))
    }

    fn write_inner(&mut self, model: &str, ids: &[RecordId], values: Value) -> Result<(), CoreError> {
        let registry = self.registry_arc();
        let model_def = registry.model(model)?;
        for id in ids {
            self.browse(model, *id)?;
        }
        let split = self.split_values(model_def, values)?;

        for link in &model_def.inherits {
            let Some(parent_values) = split.delegated.get(&link.parent) else { continue };
            let parent_ids: Vec<RecordId> = ids
                .iter()
                .filter_map(|id| self.store.record(model, *id).and_then(|r| r.get_id(&link.field)))
                .collect();
            self.write(&link.parent, &parent_ids, Value::Object(parent_values.clone()))?;
        }

        let written: BTreeSet<String> = split.own.keys().cloned().collect();
        if !written.is_empty() {
            let names: Vec<String> = written.iter().cloned().collect();
            // records reached through the old values
            self.mark(model, ids, &names)?;
            for id in ids {
                let mut own = BTreeMap::new();
                for (name, value) in &split.own {
                    let field = registry.field(model, name)?;
                    let current = self.store.record(model, *id).map(|r| r.get(name).clone());
                    let value = normalize(field, value, current.as_ref())?;
                    if field.required && is_missing(field, &value) {
                        return Err(required_violation(field));
                    }
                    own.insert(name.clone(), value);
                }
                self.check_references(model_def, &own)?;
                self.store.update(model, *id, own)?;
            }
            self.mark(model, ids, &names)?;
            self.check_constraints(model, ids, Some(&written))?;
            self.check_structure(model, ids, Some(&written))?;
        }
        self.apply_inverses(model, ids, &split.inverse)?;
        Ok(())
    }

    /// Deletes records, applying the `ondelete` rule of every many2one
    /// pointing at them. Either every record is deleted or none is.
    pub fn unlink(&mut self, model: &str, ids: &[RecordId]) -> Result<(), CoreError> {
        let mut deleting = BTreeSet::new();
        self.atomic(|tx| tx.unlink_inner(model, ids, &mut deleting))
    }

    /// Runs `f`, undoing its changes and schedules when it fails.
    fn atomic<T, F>(&mut self, f: F) -> Result<T, CoreError>
    where
        F: FnOnce(&mut Self) -> Result<T, CoreError>,
    {
        let savepoint = self.store.savepoint();
        let pending = self.pending.clone();
        let result = f(self);
        if result.is_err() {
            self.store.rollback_to(savepoint);
            self.pending = pending;
        }
        result
    }

    fn unlink_inner(
        &mut self,
        model: &str,
        ids: &[RecordId],
        deleting: &mut BTreeSet<(String, RecordId)>,
    ) -> Result<(), CoreError> {
        let registry = self.registry_arc();
        let ids: Vec<RecordId> = ids
            .iter()
            .copied()
            .filter(|id| self.store.exists(model, *id) && !deleting.contains(&(model.to_string(), *id)))
            .collect();
        if ids.is_empty() {
            return Ok(());
        }
        deleting.extend(ids.iter().map(|id| (model.to_string(), *id)));
        if registry.has_model(model) {
            let fields: Vec<String> = registry.model(model)?.field_order.clone();
            self.mark_removal(model, &ids, &fields)?;
        }

        for field in registry.referencing_fields(model) {
            let Some(table) = self.store.table(&field.model) else { continue };
            let referrers: Vec<(RecordId, Vec<RecordId>)> = table
                .iter()
                .filter(|r| !deleting.contains(&(field.model.clone(), r.id)))
                .filter_map(|r| {
                    let targets = r.get_ids(&field.name);
                    targets
                        .iter()
                        .any(|t| ids.contains(t))
                        .then_some((r.id, targets))
                })
                .collect();
            if referrers.is_empty() {
                continue;
            }
            if field.field_type == FieldType::Many2many {
                for (id, targets) in referrers {
                    let kept: Vec<RecordId> = targets.into_iter().filter(|t| !ids.contains(t)).collect();
                    let mut values = BTreeMap::new();
                    values.insert(field.name.clone(), Value::from(kept));
                    self.store.update(&field.model, id, values)?;
                }
                continue;
            }
            let referrer_ids: Vec<RecordId> = referrers.into_iter().map(|(id, _)| id).collect();
            match field.ondelete {
                OnDelete::Cascade => self.unlink_inner(&field.model, &referrer_ids, deleting)?,
                OnDelete::SetNull if !field.required => {
                    for id in &referrer_ids {
                        let mut values = BTreeMap::new();
                        values.insert(field.name.clone(), Value::Null);
                        self.store.update(&field.model, *id, values)?;
                    }
                    let names = vec![field.name.clone()];
                    self.mark(&field.model, &referrer_ids, &names)?;
                }
                OnDelete::SetNull | OnDelete::Restrict => {
                    return Err(CoreError::ForeignKeyViolation {
                        model: model.to_string(),
                        ids: ids.clone(),
                        referrer: field.model.clone(),
                        field: field.name.clone(),
                    });
                }
            }
        }

        for id in &ids {
            self.store.remove(model, *id)?;
            let xmlids: Vec<String> = self
                .store
                .xmlids()
                .for_record(model, *id)
                .iter()
                .map(|x| x.full_name())
                .collect();
            for name in xmlids {
                self.store.remove_xmlid(&name);
            }
        }
        tracing::trace!(model, count = ids.len(), "records deleted");
        Ok(())
    }

    /// Runs pending recomputations until none remain.
    pub fn flush(&mut self) -> Result<(), CoreError> {
        let mut rounds = 0;
        while !self.pending.is_empty() {
            if rounds >= self.max_recompute_rounds {
                let members: Vec<String> = self.pending.keys().map(|(m, f)| format!("{}.{}", m, f)).collect();
                tracing::error!(fields = ?members, rounds, "stored computed fields did not settle");
                return Err(CoreError::CyclicDependency {
                    kind: "stored computed fields",
                    members,
                });
            }
            rounds += 1;
            let registry = self.registry_arc();
            let batch = std::mem::take(&mut self.pending);
            for ((model, name), ids) in batch {
                let ids: Vec<RecordId> = ids.into_iter().filter(|id| self.store.exists(&model, *id)).collect();
                if ids.is_empty() {
                    continue;
                }
                let field = registry.field(&model, &name)?;
                let values = self.reader().compute_values(&model, field, &ids)?;
                let mut changed = Vec::new();
                for (id, value) in values {
                    let current = self.store.record(&model, id).map(|r| r.get(&name).clone());
                    if current.as_ref() == Some(&value) {
                        continue;
                    }
                    let mut update = BTreeMap::new();
                    update.insert(name.clone(), value);
                    self.store.update(&model, id, update)?;
                    changed.push(id);
                }
                if !changed.is_empty() {
                    self.mark(&model, &changed, std::slice::from_ref(&name))?;
                }
            }
        }
        Ok(())
    }

    /// Flushes recomputation and makes every change permanent.
    pub fn commit(mut self) -> Result<(), CoreError> {
        self.flush()?;
        self.store.commit(self.start);
        self.committed = true;
        Ok(())
    }

    /// Discards every change.
    pub fn rollback(mut self) {
        self.store.rollback_to(self.start);
        self.committed = true;
    }

    /// Schedules the stored computed fields depending on `fields` of `ids`.
    fn mark(&mut self, model: &str, ids: &[RecordId], fields: &[String]) -> Result<(), CoreError> {
        let registry = self.registry_arc();
        for name in fields {
            for trigger in registry.triggers(model, name) {
                let affected = if trigger.path.is_empty() {
                    ids.to_vec()
                } else {
                    self.reader().records_reaching(&trigger.model, &trigger.path, ids)?
                };
                if !affected.is_empty() {
                    self.pending
                        .entry((trigger.model.clone(), trigger.field.clone()))
                        .or_default()
                        .extend(affected);
                }
            }
        }
        Ok(())
    }

    /// Like `mark`, for records about to disappear: only other records are
    /// scheduled.
    fn mark_removal(&mut self, model: &str, ids: &[RecordId], fields: &[String]) -> Result<(), CoreError> {
        let registry = self.registry_arc();
        for name in fields {
            for trigger in registry.triggers(model, name) {
                if trigger.path.is_empty() {
                    continue;
                }
                let affected: Vec<RecordId> = self
                    .reader()
                    .records_reaching(&trigger.model, &trigger.path, ids)?
                    .into_iter()
                    .filter(|id| trigger.model != model || !ids.contains(id))
                    .collect();
                if !affected.is_empty() {
                    self.pending
                        .entry((trigger.model.clone(), trigger.field.clone()))
                        .or_default()
                        .extend(affected);
                }
            }
        }
        Ok(())
    }

    fn split_values(&self, model: &Model, values: Value) -> Result<SplitValues, CoreError> {
        let values = match values {
            Value::Object(values) => values,
            other => {
                return Err(CoreError::BadExpression {
                    expr: other.to_string(),
                    reason: "record values must be an object".to_string(),
                })
            }
        };
        let mut split = SplitValues::default();
        for (name, value) in values {
            let field = model.fields.get(&name).ok_or_else(|| CoreError::UnknownField {
                model: model.name.clone(),
                field: name.clone(),
            })?;
            if let Some(parent) = &field.inherited_from {
                split.delegated.entry(parent.clone()).or_default().insert(name, value);
            } else if field.store {
                split.own.insert(name, value);
            } else if field.compute.as_ref().is_some_and(|c| c.inverse.is_some()) {
                split.inverse.insert(name, value);
            } else {
                return Err(CoreError::ConstraintViolation {
                    model: model.name.clone(),
                    constraint: "readonly".to_string(),
                    message: format!("field '{}' is not stored and cannot be written", name),
                });
            }
        }
        Ok(split)
    }

    /// Calls inverse methods; they return stored values to write back.
    fn apply_inverses(&mut self, model: &str, ids: &[RecordId], values: &Map<String, Value>) -> Result<(), CoreError> {
        let registry = self.registry_arc();
        for (name, value) in values {
            let field = registry.field(model, name)?;
            let Some(inverse) = field.compute.as_ref().and_then(|c| c.inverse.clone()) else {
                continue;
            };
            let result = self.call(model, &inverse, json!({ "ids": ids, "value": value }))?;
            if let Value::Object(writes) = result {
                if !writes.is_empty() {
                    self.write(model, ids, Value::Object(writes))?;
                }
            }
        }
        Ok(())
    }

    fn check_references(&self, model: &Model, values: &BTreeMap<String, Value>) -> Result<(), CoreError> {
        for (name, value) in values {
            let Some(field) = model.fields.get(name) else { continue };
            if !matches!(field.field_type, FieldType::Many2one | FieldType::Many2many) {
                continue;
            }
            let Some(comodel) = &field.comodel else { continue };
            for id in ids_of(value) {
                if !self.store.exists(comodel, id) {
                    return Err(CoreError::RecordNotFound {
                        model: comodel.clone(),
                        id,
                    });
                }
            }
        }
        Ok(())
    }

    /// Enforces `unique(...)` table constraints and in-code checks touching
    /// the written fields (every constraint when `written` is `None`).
    fn check_constraints(
        &self,
        model: &str,
        ids: &[RecordId],
        written: Option<&BTreeSet<String>>,
    ) -> Result<(), CoreError> {
        let touches = |fields: &[String]| match written {
            None => true,
            Some(written) => fields.is_empty() || fields.iter().any(|f| written.contains(f)),
        };
        for constraint in self.registry.constraints(model)? {
            let violation = |message: String| CoreError::ConstraintViolation {
                model: model.to_string(),
                constraint: constraint.name.clone(),
                message,
            };
            match &constraint.kind {
                ConstraintKind::Check { method, fields } => {
                    if !touches(fields.as_slice()) {
                        continue;
                    }
                    match self.call(model, method, json!({ "ids": ids }))? {
                        Value::Bool(false) => return Err(violation(constraint.message.clone())),
                        Value::String(message) => return Err(violation(message)),
                        _ => {}
                    }
                }
                sql => {
                    let Some(fields) = sql.unique_fields() else { continue };
                    if !touches(fields.as_slice()) {
                        continue;
                    }
                    let Some(table) = self.store.table(model) else { continue };
                    for id in ids {
                        let Some(record) = table.get(*id) else { continue };
                        let key: Vec<&Value> = fields.iter().map(|f| record.get(f)).collect();
                        if key.iter().any(|v| v.is_null()) {
                            continue;
                        }
                        let duplicate = table
                            .iter()
                            .any(|other| other.id != *id && fields.iter().zip(&key).all(|(f, v)| other.get(f) == *v));
                        if duplicate {
                            return Err(violation(constraint.message.clone()));
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Rejects view inheritance cycles and group implication cycles.
    fn check_structure(
        &self,
        model: &str,
        ids: &[RecordId],
        written: Option<&BTreeSet<String>>,
    ) -> Result<(), CoreError> {
        let (link, kind) = match model {
            "ir.ui.view" => ("inherit_id", "views"),
            "res.groups" => ("implied_ids", "group implication"),
            _ => return Ok(()),
        };
        if written.is_some_and(|w| !w.contains(link)) {
            return Ok(());
        }
        for id in ids {
            let mut stack = vec![(*id, vec![*id])];
            let mut seen = BTreeSet::new();
            while let Some((current, chain)) = stack.pop() {
                let Some(record) = self.store.record(model, current) else { continue };
                for next in record.get_ids(link) {
                    let mut next_chain = chain.clone();
                    next_chain.push(next);
                    if next == *id {
                        let members: Vec<String> = next_chain.iter().map(|i| format!("{}({})", model, i)).collect();
                        return Err(CoreError::CyclicDependency { kind, members });
                    }
                    if seen.insert(next) {
                        stack.push((next, next_chain));
                    }
                }
            }
        }
        Ok(())
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if !self.committed {
            self.store.rollback_to(self.start);
            tracing::debug!("transaction rolled back");
        }
    }
}

#[derive(Default)]
struct SplitValues {
    /// Stored values of the model itself
    own: BTreeMap<String, Value>,
    /// Values forwarded to delegation parents, by parent model
    delegated: BTreeMap<String, Map<String, Value>>,
    /// Values handed to inverse methods
    inverse: Map<String, Value>,
}

fn is_missing(field: &Field, value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(false) => field.field_type != FieldType::Boolean,
        Value::String(s) => s.is_empty(),
        Value::Array(items) => items.is_empty() && field.field_type == FieldType::Many2many,
        _ => false,
    }
}

fn required_violation(field: &Field) -> CoreError {
    CoreError::ConstraintViolation {
        model: field.model.clone(),
        constraint: "required".to_string(),
        message: format!("field '{}' is required", field.name),
    }
}
