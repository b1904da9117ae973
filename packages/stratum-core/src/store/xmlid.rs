use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use super::table::RecordId;

/// External identifier `module.name` pointing at a record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExternalId {
    pub module: String,
    pub name: String,
    pub model: String,
    pub res_id: RecordId,
    /// Record values are not overwritten when the module is upgraded
    pub noupdate: bool,
}

impl ExternalId {
    pub fn new(module: &str, name: &str, model: &str, res_id: RecordId) -> Self {
        Self {
            module: module.to_string(),
            name: name.to_string(),
            model: model.to_string(),
            res_id,
            noupdate: false,
        }
    }

    /// `module.name`
    pub fn full_name(&self) -> String {
        format!("{}.{}", self.module, self.name)
    }
}

/// External id table with a reverse index by record.
#[derive(Debug, Clone, Default)]
pub struct ExternalIds {
    by_name: BTreeMap<String, ExternalId>,
    by_record: BTreeMap<(String, RecordId), BTreeSet<String>>,
}

impl ExternalIds {
    pub fn get(&self, full_name: &str) -> Option<&ExternalId> {
        self.by_name.get(full_name)
    }

    /// Full names pointing at a record.
    pub fn for_record(&self, model: &str, id: RecordId) -> Vec<&ExternalId> {
        self.by_record
            .get(&(model.to_string(), id))
            .map(|names| names.iter().filter_map(|n| self.by_name.get(n)).collect())
            .unwrap_or_default()
    }

    pub fn of_module<'a>(&'a self, module: &'a str) -> impl Iterator<Item = &'a ExternalId> + 'a {
        self.by_name.values().filter(move |x| x.module == module)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ExternalId> {
        self.by_name.values()
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }

    /// Inserts or replaces, returning the previous mapping.
    pub(crate) fn insert(&mut self, xmlid: ExternalId) -> Option<ExternalId> {
        let key = xmlid.full_name();
        let old = self.remove(&key);
        self.by_record
            .entry((xmlid.model.clone(), xmlid.res_id))
            .or_default()
            .insert(key.clone());
        self.by_name.insert(key, xmlid);
        old
    }

    pub(crate) fn remove(&mut self, full_name: &str) -> Option<ExternalId> {
        let old = self.by_name.remove(full_name)?;
        let record_key = (old.model.clone(), old.res_id);
        if let Some(names) = self.by_record.get_mut(&record_key) {
            names.remove(full_name);
            if names.is_empty() {
                self.by_record.remove(&record_key);
            }
        }
        Some(old)
    }
}
