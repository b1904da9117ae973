use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;

/// Record identifier, unique within a table.
pub type RecordId = u64;

static NULL: Value = Value::Null;

/// Stored record: column values keyed by field name.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Record {
    pub id: RecordId,
    pub values: BTreeMap<String, Value>,
}

impl Record {
    /// Column value, `null` when absent.
    pub fn get(&self, field: &str) -> &Value {
        self.values.get(field).unwrap_or(&NULL)
    }

    /// Many2one target id.
    pub fn get_id(&self, field: &str) -> Option<RecordId> {
        self.get(field).as_u64()
    }

    /// Many2many target ids.
    pub fn get_ids(&self, field: &str) -> Vec<RecordId> {
        match self.get(field) {
            Value::Array(items) => items.iter().filter_map(Value::as_u64).collect(),
            Value::Number(n) => n.as_u64().into_iter().collect(),
            _ => Vec::new(),
        }
    }

    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.get(field).as_str()
    }

    /// Boolean value; `null` and missing read as false.
    pub fn get_bool(&self, field: &str) -> bool {
        self.get(field).as_bool().unwrap_or(false)
    }
}

/// Records of one model.
#[derive(Debug, Clone)]
pub struct Table {
    pub name: String,
    records: BTreeMap<RecordId, Record>,
    next_id: RecordId,
}

impl Table {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            records: BTreeMap::new(),
            next_id: 1,
        }
    }

    pub fn get(&self, id: RecordId) -> Option<&Record> {
        self.records.get(&id)
    }

    pub fn contains(&self, id: RecordId) -> bool {
        self.records.contains_key(&id)
    }

    /// Records in id order.
    pub fn iter(&self) -> impl Iterator<Item = &Record> {
        self.records.values()
    }

    pub fn ids(&self) -> Vec<RecordId> {
        self.records.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Inserts a record under the next free id. Ids are never reused.
    pub(crate) fn insert(&mut self, values: BTreeMap<String, Value>) -> RecordId {
        let id = self.next_id;
        self.next_id += 1;
        self.records.insert(id, Record { id, values });
        id
    }

    /// Puts a record back, used when undoing a removal.
    pub(crate) fn restore(&mut self, record: Record) {
        self.next_id = self.next_id.max(record.id + 1);
        self.records.insert(record.id, record);
    }

    pub(crate) fn get_mut(&mut self, id: RecordId) -> Option<&mut Record> {
        self.records.get_mut(&id)
    }

    pub(crate) fn remove(&mut self, id: RecordId) -> Option<Record> {
        self.records.remove(&id)
    }

    pub(crate) fn records_mut(&mut self) -> impl Iterator<Item = &mut Record> {
        self.records.values_mut()
    }
}
