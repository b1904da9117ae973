//! Reflection of the registry into the `ir.model*` meta tables.
//!
//! Every model, field, selection value, constraint and many2many relation
//! gets a meta record and one external id per contributing module. These
//! external ids are what the uninstall executor follows to find the
//! metadata owned by a module.

use serde_json::{json, Map, Value};

use crate::error::CoreError;
use crate::registry::{Field, FieldType, Model};
use crate::store::{ExternalId, RecordId};
use crate::transaction::Transaction;

use super::LoadTracker;

/// Local external id of a model's `ir.model` record.
pub fn model_xmlid(model: &str) -> String {
    format!("model_{}", model.replace('.', "_"))
}

/// Local external id of a field's `ir.model.fields` record.
pub fn field_xmlid(model: &str, field: &str) -> String {
    format!("field_{}__{}", model.replace('.', "_"), field)
}

pub fn selection_xmlid(model: &str, field: &str, value: &str) -> String {
    format!(
        "selection__{}__{}__{}",
        model.replace('.', "_"),
        field,
        value.replace(['.', ' '], "_").to_lowercase()
    )
}

pub fn constraint_xmlid(table: &str, name: &str) -> String {
    format!("constraint_{}_{}", table, name)
}

pub fn relation_xmlid(table: &str) -> String {
    format!("relation_{}", table)
}

/// Creates or updates the meta records of every model of the registry and
/// makes sure every model has a table.
///
/// # Returns
/// The number of meta records written.
pub fn reflect_registry(tx: &mut Transaction<'_>, tracker: &mut LoadTracker) -> Result<usize, CoreError> {
    let registry = tx.registry_arc();
    for model in registry.models() {
        tx.store_mut().ensure_table(&model.name);
    }
    let mut reflector = Reflector { tx, tracker, written: 0 };
    for model in registry.models() {
        let model_id = reflector.reflect_model(model)?;
        for field in model.ordered_fields() {
            let field_id = reflector.reflect_field(model, model_id, field)?;
            reflector.reflect_selection(model, field, field_id)?;
            reflector.reflect_relation(model_id, field)?;
        }
        reflector.reflect_constraints(model, model_id)?;
    }
    tracing::debug!(models = registry.models().count(), written = reflector.written, "registry reflected");
    Ok(reflector.written)
}

struct Reflector<'t, 'a> {
    tx: &'t mut Transaction<'a>,
    tracker: &'t mut LoadTracker,
    written: usize,
}

impl Reflector<'_, '_> {
    fn find<P>(&self, model: &str, pred: P) -> Option<RecordId>
    where
        P: Fn(&crate::store::Record) -> bool,
    {
        self.tx.store().table(model)?.iter().find(|r| pred(r)).map(|r| r.id)
    }

    /// Writes the changed values of an existing record or creates it.
    fn upsert(&mut self, model: &str, existing: Option<RecordId>, values: Map<String, Value>) -> Result<RecordId, CoreError> {
        match existing {
            Some(id) => {
                let record = self.tx.browse(model, id)?;
                let changed: Map<String, Value> = values
                    .into_iter()
                    .filter(|(k, v)| record.get(k) != v)
                    .collect();
                if !changed.is_empty() {
                    self.tx.write(model, &[id], Value::Object(changed))?;
                    self.written += 1;
                }
                Ok(id)
            }
            None => {
                self.written += 1;
                self.tx.create(model, Value::Object(values))
            }
        }
    }

    /// Points `module.name` at the record for every contributing module.
    fn own(&mut self, modules: &[String], name: &str, model: &str, id: RecordId) {
        for module in modules {
            let external = ExternalId::new(module, name, model, id);
            let full = external.full_name();
            let current = self.tx.store().xmlid(&full);
            if current.map(|x| (x.model.as_str(), x.res_id)) != Some((model, id)) {
                self.tx.store_mut().set_xmlid(external);
            }
            self.tracker.insert(full);
        }
    }

    fn reflect_model(&mut self, model: &Model) -> Result<RecordId, CoreError> {
        let existing = self.find("ir.model", |r| r.get_str("model") == Some(model.name.as_str()));
        let values = object(json!({
            "model": model.name,
            "name": model.description,
            "order": model.order,
            "modules": model.modules.join(", "),
        }));
        let id = self.upsert("ir.model", existing, values)?;
        self.own(&model.modules, &model_xmlid(&model.name), "ir.model", id);
        Ok(id)
    }

    fn reflect_field(&mut self, model: &Model, model_id: RecordId, field: &Field) -> Result<RecordId, CoreError> {
        let existing = self.find("ir.model.fields", |r| {
            r.get_str("model") == Some(model.name.as_str()) && r.get_str("name") == Some(field.name.as_str())
        });
        let values = object(json!({
            "model_id": model_id,
            "model": model.name,
            "name": field.name,
            "field_description": field.string,
            "help": field.help,
            "ttype": field.field_type.as_str(),
            "relation": field.comodel,
            "relation_field": field.inverse_name,
            "relation_table": field.relation_table,
            "related": field.related.as_ref().map(|p| p.join(".")),
            "depends": field.compute.as_ref().map(|c| c.depends.join(",")),
            "compute": field.compute.as_ref().map(|c| c.method.clone()),
            "groups": (!field.groups.is_empty()).then(|| field.groups.join(",")),
            "store": field.store,
            "required": field.required,
            "readonly": field.readonly,
            "index": field.index,
            "translate": field.translate,
            "on_delete": (field.field_type == FieldType::Many2one).then(|| field.ondelete.as_str()),
            "modules": field.modules.join(", "),
        }));
        let id = self.upsert("ir.model.fields", existing, values)?;
        self.own(&field.modules, &field_xmlid(&model.name, &field.name), "ir.model.fields", id);
        Ok(id)
    }

    fn reflect_selection(&mut self, model: &Model, field: &Field, field_id: RecordId) -> Result<(), CoreError> {
        if field.field_type != FieldType::Selection || field.inherited {
            return Ok(());
        }
        for (sequence, option) in field.selection.iter().enumerate() {
            let existing = self.find("ir.model.fields.selection", |r| {
                r.get_id("field_id") == Some(field_id) && r.get_str("value") == Some(option.value.as_str())
            });
            let values = object(json!({
                "field_id": field_id,
                "value": option.value,
                "name": option.label,
                "sequence": sequence,
            }));
            let id = self.upsert("ir.model.fields.selection", existing, values)?;
            let name = selection_xmlid(&model.name, &field.name, &option.value);
            self.own(std::slice::from_ref(&option.module), &name, "ir.model.fields.selection", id);
        }
        Ok(())
    }

    fn reflect_relation(&mut self, model_id: RecordId, field: &Field) -> Result<(), CoreError> {
        let (FieldType::Many2many, Some(table), false) = (field.field_type, &field.relation_table, field.inherited) else {
            return Ok(());
        };
        if field.related.is_some() {
            return Ok(());
        }
        let existing = self.find("ir.model.relation", |r| {
            r.get_str("name") == Some(table.as_str()) && r.get_id("model") == Some(model_id)
        });
        let module = field.modules.first().cloned().unwrap_or_default();
        let values = object(json!({ "name": table, "model": model_id, "module": module }));
        let id = self.upsert("ir.model.relation", existing, values)?;
        self.own(std::slice::from_ref(&module), &relation_xmlid(table), "ir.model.relation", id);
        Ok(())
    }

    fn reflect_constraints(&mut self, model: &Model, model_id: RecordId) -> Result<(), CoreError> {
        for constraint in model.constraints.values() {
            let module = constraint.modules.first().cloned().unwrap_or_default();
            let name = format!("{}_{}", model.table(), constraint.name);
            let existing = self.find("ir.model.constraint", |r| {
                r.get_str("name") == Some(name.as_str()) && r.get_str("module") == Some(module.as_str())
            });
            let definition = match &constraint.kind {
                crate::registry::ConstraintKind::Sql { definition } => definition.clone(),
                crate::registry::ConstraintKind::Check { method, .. } => method.clone(),
            };
            let values = object(json!({
                "name": name,
                "model": model_id,
                "module": module,
                "type": constraint.kind.code(),
                "definition": definition,
                "message": constraint.message,
            }));
            let id = self.upsert("ir.model.constraint", existing, values)?;
            let xmlid = constraint_xmlid(&model.table(), &constraint.name);
            self.own(&constraint.modules, &xmlid, "ir.model.constraint", id);
        }
        Ok(())
    }
}

fn object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}
