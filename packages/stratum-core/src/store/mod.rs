//! In-memory record store.
//!
//! Tables hold JSON-valued records keyed by id. Every mutation is appended to
//! a journal so that savepoints can be rolled back, and bumps the version of
//! the table it touches so caches derived from the table can be validated.

mod change;
mod table;
mod xmlid;

use std::collections::BTreeMap;

use serde_json::Value;

pub use change::Change;
pub use table::{Record, RecordId, Table};
pub use xmlid::{ExternalId, ExternalIds};

use crate::error::CoreError;

/// Journal position returned by [`Store::savepoint`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Savepoint(usize);

/// Record store.
#[derive(Debug, Default)]
pub struct Store {
    tables: BTreeMap<String, Table>,
    xmlids: ExternalIds,
    journal: Vec<Change>,
    versions: BTreeMap<String, u64>,
    clock: u64,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn table(&self, name: &str) -> Option<&Table> {
        self.tables.get(name)
    }

    pub fn has_table(&self, name: &str) -> bool {
        self.tables.contains_key(name)
    }

    pub fn table_names(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(String::as_str)
    }

    pub fn record(&self, model: &str, id: RecordId) -> Option<&Record> {
        self.tables.get(model).and_then(|t| t.get(id))
    }

    pub fn exists(&self, model: &str, id: RecordId) -> bool {
        self.record(model, id).is_some()
    }

    /// Creates the table if missing. Returns whether it was created.
    pub fn ensure_table(&mut self, name: &str) -> bool {
        if self.tables.contains_key(name) {
            return false;
        }
        self.tables.insert(name.to_string(), Table::new(name));
        self.journal.push(Change::CreateTable {
            table: name.to_string(),
        });
        self.bump(name);
        true
    }

    /// Drops a table with its records. Returns whether it existed.
    pub fn drop_table(&mut self, name: &str) -> bool {
        let Some(table) = self.tables.remove(name) else {
            return false;
        };
        self.journal.push(Change::DropTable { table });
        self.bump(name);
        true
    }

    /// Removes a column from every record of a table.
    pub fn drop_column(&mut self, name: &str, column: &str) {
        let Some(table) = self.tables.get_mut(name) else {
            return;
        };
        let mut values = Vec::new();
        for record in table.records_mut() {
            if let Some(value) = record.values.remove(column) {
                values.push((record.id, value));
            }
        }
        self.journal.push(Change::DropColumn {
            table: name.to_string(),
            column: column.to_string(),
            values,
        });
        self.bump(name);
    }

    /// Inserts a record.
    ///
    /// # Arguments
    /// * `model` - Table to insert into
    /// * `values` - Column values
    ///
    /// # Returns
    /// The new record id, or `UnknownModel` when the table does not exist.
    pub fn insert(&mut self, model: &str, values: BTreeMap<String, Value>) -> Result<RecordId, CoreError> {
        let table = self.tables.get_mut(model).ok_or_else(|| missing_table(model))?;
        let id = table.insert(values);
        self.journal.push(Change::Insert {
            table: model.to_string(),
            id,
        });
        self.bump(model);
        Ok(id)
    }

    /// Overwrites the given columns of a record.
    pub fn update(&mut self, model: &str, id: RecordId, values: BTreeMap<String, Value>) -> Result<(), CoreError> {
        let table = self.tables.get_mut(model).ok_or_else(|| missing_table(model))?;
        let record = table.get_mut(id).ok_or_else(|| CoreError::RecordNotFound {
            model: model.to_string(),
            id,
        })?;
        let old = record.clone();
        record.values.extend(values);
        self.journal.push(Change::Update {
            table: model.to_string(),
            old,
        });
        self.bump(model);
        Ok(())
    }

    /// Removes a record, returning it.
    pub fn remove(&mut self, model: &str, id: RecordId) -> Result<Record, CoreError> {
        let table = self.tables.get_mut(model).ok_or_else(|| missing_table(model))?;
        let record = table.remove(id).ok_or_else(|| CoreError::RecordNotFound {
            model: model.to_string(),
            id,
        })?;
        self.journal.push(Change::Remove {
            table: model.to_string(),
            record: record.clone(),
        });
        self.bump(model);
        Ok(record)
    }

    pub fn xmlids(&self) -> &ExternalIds {
        &self.xmlids
    }

    pub fn xmlid(&self, full_name: &str) -> Option<&ExternalId> {
        self.xmlids.get(full_name)
    }

    /// Creates or repoints an external id.
    pub fn set_xmlid(&mut self, xmlid: ExternalId) {
        let key = xmlid.full_name();
        let old = self.xmlids.insert(xmlid);
        self.journal.push(Change::SetExternalId { key, old });
    }

    pub fn remove_xmlid(&mut self, full_name: &str) -> Option<ExternalId> {
        let old = self.xmlids.remove(full_name)?;
        self.journal.push(Change::RemoveExternalId { old: old.clone() });
        Some(old)
    }

    /// Marks the current journal position.
    pub fn savepoint(&self) -> Savepoint {
        Savepoint(self.journal.len())
    }

    /// Undoes every change made after `savepoint`, newest first.
    pub fn rollback_to(&mut self, savepoint: Savepoint) {
        while self.journal.len() > savepoint.0 {
            let Some(change) = self.journal.pop() else { break };
            if let Some(table) = change.table() {
                let table = table.to_string();
                self.bump(&table);
            }
            self.undo(change);
        }
    }

    /// Forgets the changes made after `savepoint`; they can no longer be undone.
    pub fn commit(&mut self, savepoint: Savepoint) {
        self.journal.truncate(savepoint.0);
    }

    /// Number of journaled changes not yet committed.
    pub fn pending_changes(&self) -> usize {
        self.journal.len()
    }

    /// Version of a table, bumped on every change to it.
    pub fn version(&self, table: &str) -> u64 {
        self.versions.get(table).copied().unwrap_or(0)
    }

    fn bump(&mut self, table: &str) {
        self.clock += 1;
        self.versions.insert(table.to_string(), self.clock);
    }

    fn undo(&mut self, change: Change) {
        match change {
            Change::CreateTable { table } => {
                self.tables.remove(&table);
            }
            Change::DropTable { table } => {
                self.tables.insert(table.name.clone(), table);
            }
            Change::Insert { table, id } => {
                if let Some(t) = self.tables.get_mut(&table) {
                    t.remove(id);
                }
            }
            Change::Update { table, old } | Change::Remove { table, record: old } => {
                if let Some(t) = self.tables.get_mut(&table) {
                    t.restore(old);
                }
            }
            Change::DropColumn { table, column, values } => {
                if let Some(t) = self.tables.get_mut(&table) {
                    for (id, value) in values {
                        if let Some(record) = t.get_mut(id) {
                            record.values.insert(column.clone(), value);
                        }
                    }
                }
            }
            Change::SetExternalId { key, old } => {
                self.xmlids.remove(&key);
                if let Some(old) = old {
                    self.xmlids.insert(old);
                }
            }
            Change::RemoveExternalId { old } => {
                self.xmlids.insert(old);
            }
        }
    }
}

fn missing_table(model: &str) -> CoreError {
    CoreError::UnknownModel {
        model: model.to_string(),
        context: "no table in the store".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ntest::timeout;
    use serde_json::json;

    fn values(pairs: &[(&str, Value)]) -> BTreeMap<String, Value> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[timeout(1000)]
    #[test]
    fn test_rollback_restores_everything() {
        let mut store = Store::new();
        store.ensure_table("widget");
        let a = store.insert("widget", values(&[("name", json!("a"))])).unwrap();
        store.set_xmlid(ExternalId::new("m", "widget_a", "widget", a));
        store.commit(Savepoint(0));

        let sp = store.savepoint();
        store.update("widget", a, values(&[("name", json!("renamed"))])).unwrap();
        let b = store.insert("widget", values(&[("name", json!("b"))])).unwrap();
        store.remove_xmlid("m.widget_a");
        store.drop_column("widget", "name");
        store.ensure_table("gadget");
        store.drop_table("widget");
        assert!(!store.has_table("widget"));

        store.rollback_to(sp);
        assert!(!store.has_table("gadget"));
        let table = store.table("widget").unwrap();
        assert_eq!(table.len(), 1);
        assert!(!table.contains(b));
        assert_eq!(table.get(a).unwrap().get("name"), &json!("a"));
        assert_eq!(store.xmlid("m.widget_a").unwrap().res_id, a);
    }

    #[timeout(1000)]
    #[test]
    fn test_removed_record_comes_back_on_rollback() {
        let mut store = Store::new();
        store.ensure_table("widget");
        let id = store.insert("widget", values(&[("qty", json!(3))])).unwrap();
        let sp = store.savepoint();
        store.remove("widget", id).unwrap();
        assert!(!store.exists("widget", id));
        store.rollback_to(sp);
        assert_eq!(store.record("widget", id).unwrap().get("qty"), &json!(3));
        // ids are not reused
        let next = store.insert("widget", BTreeMap::new()).unwrap();
        assert!(next > id);
    }

    #[timeout(1000)]
    #[test]
    fn test_versions_bump_per_table() {
        let mut store = Store::new();
        store.ensure_table("ir.ui.view");
        store.ensure_table("widget");
        let before = store.version("ir.ui.view");
        store.insert("widget", BTreeMap::new()).unwrap();
        assert_eq!(store.version("ir.ui.view"), before);
        store.insert("ir.ui.view", BTreeMap::new()).unwrap();
        assert!(store.version("ir.ui.view") > before);
    }

    #[timeout(1000)]
    #[test]
    fn test_missing_table_and_record() {
        let mut store = Store::new();
        assert_eq!(store.insert("ghost", BTreeMap::new()).unwrap_err().kind(), "UnknownModel");
        store.ensure_table("widget");
        assert_eq!(store.remove("widget", 9).unwrap_err().kind(), "RecordNotFound");
    }

    #[timeout(1000)]
    #[test]
    fn test_reverse_index() {
        let mut store = Store::new();
        store.set_xmlid(ExternalId::new("a", "x", "widget", 1));
        store.set_xmlid(ExternalId::new("b", "y", "widget", 1));
        let names: Vec<String> = store.xmlids().for_record("widget", 1).iter().map(|x| x.full_name()).collect();
        assert_eq!(names, vec!["a.x", "b.y"]);
        store.set_xmlid(ExternalId::new("a", "x", "widget", 2));
        assert_eq!(store.xmlids().for_record("widget", 1).len(), 1);
        assert_eq!(store.xmlids().of_module("a").count(), 1);
    }
}
