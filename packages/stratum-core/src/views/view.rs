use std::collections::BTreeMap;

use serde::Serialize;

use crate::store::{Record, RecordId, Store};

/// Model holding view definitions.
pub const VIEW_MODEL: &str = "ir.ui.view";

/// Inheritance mode of a view with a parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ViewMode {
    /// Composed on its own; a parent, if any, is composed first
    Primary,
    /// Patches applied whenever the primary root above it is composed
    Extension,
}

/// View definition read from an `ir.ui.view` record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct View {
    pub id: RecordId,
    pub name: String,
    pub model: String,
    pub view_type: String,
    pub arch: String,
    pub priority: i64,
    pub inherit_id: Option<RecordId>,
    pub mode: ViewMode,
    pub active: bool,
    pub groups: Vec<RecordId>,
    pub key: Option<String>,
    /// First external id pointing at the view
    pub xmlid: Option<String>,
    /// Module owning that external id
    pub module: Option<String>,
}

impl View {
    pub fn from_record(record: &Record, store: &Store) -> Self {
        let external = store.xmlids().for_record(VIEW_MODEL, record.id).into_iter().next();
        let inherit_id = record.get_id("inherit_id");
        let mode = match (record.get_str("mode"), inherit_id) {
            (_, None) | (Some("primary"), _) => ViewMode::Primary,
            _ => ViewMode::Extension,
        };
        Self {
            id: record.id,
            name: record.get_str("name").unwrap_or_default().to_string(),
            model: record.get_str("model").unwrap_or_default().to_string(),
            view_type: record.get_str("type").unwrap_or_default().to_string(),
            arch: record.get_str("arch").unwrap_or_default().to_string(),
            priority: record.get("priority").as_i64().unwrap_or(16),
            inherit_id,
            mode,
            active: record.get("active").as_bool().unwrap_or(true),
            groups: record.get_ids("groups_id"),
            key: record.get_str("key").map(str::to_string),
            xmlid: external.map(|x| x.full_name()),
            module: external.map(|x| x.module.clone()),
        }
    }

    /// External id when present, else the view name with its id.
    pub fn label(&self) -> String {
        match &self.xmlid {
            Some(xmlid) => xmlid.clone(),
            None => format!("{} ({})", self.name, self.id),
        }
    }

    /// Ordering of sibling inheriting views.
    pub fn sort_key(&self) -> (i64, RecordId) {
        (self.priority, self.id)
    }
}

/// Every view of the store, by id.
pub fn load_views(store: &Store) -> BTreeMap<RecordId, View> {
    store
        .table(VIEW_MODEL)
        .map(|t| t.iter().map(|r| (r.id, View::from_record(r, store))).collect())
        .unwrap_or_default()
}
