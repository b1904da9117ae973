use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use serde_json::Value;

use crate::config::CoreConfig;
use crate::error::CoreError;
use crate::store::RecordId;
use crate::transaction::Transaction;

use super::graph::{MetaClass, NodeKey, UninstallGraph};

/// Record the executor failed to delete.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Undeletable {
    pub model: String,
    pub id: RecordId,
    pub display_name: String,
    /// External ids pointing at the record
    pub xmlids: Vec<String>,
    pub error: String,
}

/// Outcome of an uninstall pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct UninstallReport {
    /// Input records that no longer exist
    pub deleted: usize,
    /// External ids (or `model,id`) of input records still present
    pub residue: Vec<String>,
    pub undeletable: Vec<Undeletable>,
    /// Nodes drained, in deletion order
    pub steps: Vec<String>,
    /// External ids dropped from records other modules still own
    pub released: Vec<String>,
}

impl UninstallReport {
    /// Fails with `UninstallPartial` when residue remains.
    pub fn into_result(self) -> Result<Self, CoreError> {
        if self.residue.is_empty() {
            Ok(self)
        } else {
            Err(CoreError::UninstallPartial { residue: self.residue })
        }
    }
}

/// Removes everything the given modules own.
///
/// External ids of `modules` on records another module also owns are
/// released; the other records, plus every record of the models whose
/// `ir.model` entry goes away, form the deletion input.
pub fn uninstall_modules(
    tx: &mut Transaction<'_>,
    modules: &BTreeSet<String>,
    config: &CoreConfig,
) -> Result<UninstallReport, CoreError> {
    tracing::info!(modules = ?modules, "uninstalling modules");
    let owned: Vec<_> = tx
        .store()
        .xmlids()
        .iter()
        .filter(|x| modules.contains(&x.module))
        .cloned()
        .collect();

    let mut input: BTreeMap<String, BTreeSet<RecordId>> = BTreeMap::new();
    let mut released = Vec::new();
    for xmlid in owned {
        let shared = tx
            .store()
            .xmlids()
            .for_record(&xmlid.model, xmlid.res_id)
            .iter()
            .any(|other| !modules.contains(&other.module));
        if shared || !tx.exists(&xmlid.model, xmlid.res_id) {
            tx.store_mut().remove_xmlid(&xmlid.full_name());
            if shared {
                released.push(xmlid.full_name());
            }
            continue;
        }
        input.entry(xmlid.model.clone()).or_default().insert(xmlid.res_id);
    }

    let dropped_models: Vec<String> = input
        .get(MetaClass::Models.model())
        .into_iter()
        .flatten()
        .filter_map(|id| tx.store().record(MetaClass::Models.model(), *id))
        .filter_map(|r| r.get_str("model").map(str::to_string))
        .collect();
    for model in dropped_models {
        let ids = tx.store().table(&model).map(|t| t.ids()).unwrap_or_default();
        input.entry(model).or_default().extend(ids);
    }

    let mut report = uninstall_records(tx, input, config)?;
    report.released = released;
    tracing::info!(
        modules = ?modules,
        deleted = report.deleted,
        residue = report.residue.len(),
        "modules uninstalled"
    );
    Ok(report)
}

/// Deletes `input` (model to record ids) in dependency order.
///
/// # Returns
/// The report; `UninstallCyclic` when the graph cannot be drained. Records
/// that fail to delete are residue, not errors.
pub fn uninstall_records(
    tx: &mut Transaction<'_>,
    input: BTreeMap<String, BTreeSet<RecordId>>,
    config: &CoreConfig,
) -> Result<UninstallReport, CoreError> {
    let graph = UninstallGraph::build(&tx.reader(), &input, config);
    let mut executor = Executor {
        tx,
        undeletable: Vec::new(),
        steps: Vec::new(),
    };
    executor.drain(&graph)?;
    executor.post_pass(&input);

    let Executor { tx, undeletable, steps } = executor;
    let mut report = UninstallReport {
        undeletable,
        steps,
        ..UninstallReport::default()
    };
    for (model, ids) in &input {
        for id in ids {
            if !tx.exists(model, *id) {
                report.deleted += 1;
                continue;
            }
            let xmlids: Vec<String> = tx
                .store()
                .xmlids()
                .for_record(model, *id)
                .iter()
                .map(|x| x.full_name())
                .collect();
            if xmlids.is_empty() {
                report.residue.push(format!("{},{}", model, id));
            } else {
                report.residue.extend(xmlids);
            }
        }
    }
    Ok(report)
}

struct Executor<'t, 'a> {
    tx: &'t mut Transaction<'a>,
    undeletable: Vec<Undeletable>,
    steps: Vec<String>,
}

impl Executor<'_, '_> {
    /// Kahn drain: repeatedly deletes a node without pending predecessors.
    fn drain(&mut self, graph: &UninstallGraph) -> Result<(), CoreError> {
        let mut degrees = graph.in_degrees();
        let mut ready: BTreeSet<NodeKey> = degrees
            .iter()
            .filter(|(_, count)| **count == 0)
            .map(|(k, _)| k.clone())
            .collect();
        let mut remaining: BTreeSet<NodeKey> = degrees.keys().cloned().collect();
        let records: BTreeMap<&NodeKey, &[RecordId]> = graph.nodes().collect();

        while let Some(key) = ready.pop_first() {
            remaining.remove(&key);
            let ids = records.get(&key).copied().unwrap_or_default();
            let deleted = match &key {
                NodeKey::Records(model) => {
                    let existing: Vec<RecordId> = ids.iter().copied().filter(|id| self.tx.exists(model, *id)).collect();
                    self.delete_batch(model, &existing)
                }
                NodeKey::Meta { class, id } => self.delete_meta(*class, *id),
                NodeKey::Groups | NodeKey::Class(_) => 0,
            };
            if !ids.is_empty() {
                let label = graph.label(&key);
                tracing::info!(node = %label, deleted, total = ids.len(), "uninstall batch");
                self.steps.push(label);
            }
            for succ in graph.successors(&key) {
                if let Some(count) = degrees.get_mut(succ) {
                    *count = count.saturating_sub(1);
                    if *count == 0 {
                        ready.insert(succ.clone());
                    }
                }
            }
        }

        if remaining.is_empty() {
            return Ok(());
        }
        let nodes: Vec<String> = remaining
            .iter()
            .map(|key| {
                let waiting: Vec<String> = graph.predecessors_in(key, &remaining).map(|p| graph.label(p)).collect();
                format!("{} <- [{}]", graph.label(key), waiting.join(", "))
            })
            .collect();
        tracing::error!(nodes = ?nodes, "uninstall graph has a cycle");
        Err(CoreError::UninstallCyclic { nodes })
    }

    /// Deletes `ids` at once, splitting in halves on failure down to single
    /// records. Returns how many were deleted.
    fn delete_batch(&mut self, model: &str, ids: &[RecordId]) -> usize {
        if ids.is_empty() {
            return 0;
        }
        let savepoint = self.tx.savepoint();
        match self.tx.unlink(model, ids) {
            Ok(()) => ids.len(),
            Err(error) => {
                self.tx.rollback_to(savepoint);
                if let [id] = ids {
                    self.record_failure(model, *id, error);
                    return 0;
                }
                let (left, right) = ids.split_at(ids.len() / 2);
                self.delete_batch(model, left) + self.delete_batch(model, right)
            }
        }
    }

    fn delete_meta(&mut self, class: MetaClass, id: RecordId) -> usize {
        if !self.tx.exists(class.model(), id) {
            return 0;
        }
        let savepoint = self.tx.savepoint();
        match self.drop_meta(class, id) {
            Ok(()) => 1,
            Err(error) => {
                self.tx.rollback_to(savepoint);
                self.record_failure(class.model(), id, error);
                0
            }
        }
    }

    /// Deletes a metadata record together with the schema it describes.
    fn drop_meta(&mut self, class: MetaClass, id: RecordId) -> Result<(), CoreError> {
        let record = self.tx.browse(class.model(), id)?.clone();
        match class {
            MetaClass::Models => {
                self.tx.unlink(class.model(), &[id])?;
                if let Some(model) = record.get_str("model") {
                    self.tx.store_mut().drop_table(model);
                }
            }
            MetaClass::Fields => {
                self.tx.unlink(class.model(), &[id])?;
                if let (Some(model), Some(name), true) =
                    (record.get_str("model"), record.get_str("name"), record.get_bool("store"))
                {
                    self.tx.store_mut().drop_column(model, name);
                }
            }
            MetaClass::Selections => {
                let field = record
                    .get_id("field_id")
                    .and_then(|f| self.tx.store().record(MetaClass::Fields.model(), f))
                    .cloned();
                self.tx.unlink(class.model(), &[id])?;
                let (Some(field), Some(value)) = (field, record.get_str("value")) else {
                    return Ok(());
                };
                let (Some(model), Some(name)) = (field.get_str("model"), field.get_str("name")) else {
                    return Ok(());
                };
                // records holding the removed value lose it
                let holders: Vec<RecordId> = self
                    .tx
                    .store()
                    .table(model)
                    .map(|t| t.iter().filter(|r| r.get_str(name) == Some(value)).map(|r| r.id).collect())
                    .unwrap_or_default();
                for holder in holders {
                    let values = BTreeMap::from([(name.to_string(), Value::Null)]);
                    self.tx.store_mut().update(model, holder, values)?;
                }
            }
            MetaClass::Constraints | MetaClass::Relations => self.tx.unlink(class.model(), &[id])?,
        }
        Ok(())
    }

    fn record_failure(&mut self, model: &str, id: RecordId, error: CoreError) {
        let reader = self.tx.reader();
        let display_name = reader.display_name(model, id);
        let xmlids: Vec<String> = reader
            .store
            .xmlids()
            .for_record(model, id)
            .iter()
            .map(|x| x.full_name())
            .collect();
        tracing::warn!(model, id, record = %display_name, error = %error, "record could not be deleted");
        self.undeletable.push(Undeletable {
            model: model.to_string(),
            id,
            display_name,
            xmlids,
            error: error.to_string(),
        });
    }

    /// Forgets undeletable records that vanished since (their table may have
    /// been dropped), with the external ids of every deleted input record.
    fn post_pass(&mut self, input: &BTreeMap<String, BTreeSet<RecordId>>) {
        let tx = &mut *self.tx;
        self.undeletable.retain(|u| tx.exists(&u.model, u.id));
        for (model, ids) in input {
            for id in ids {
                if tx.exists(model, *id) {
                    continue;
                }
                let names: Vec<String> = tx
                    .store()
                    .xmlids()
                    .for_record(model, *id)
                    .iter()
                    .map(|x| x.full_name())
                    .collect();
                for name in names {
                    tx.store_mut().remove_xmlid(&name);
                }
            }
        }
    }
}
