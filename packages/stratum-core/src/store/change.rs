use serde_json::Value;

use super::table::{Record, RecordId, Table};
use super::xmlid::ExternalId;

/// A single journaled change to the store, holding what is needed to undo it.
#[derive(Debug, Clone)]
pub enum Change {
    /// A table was created
    CreateTable {
        /// Name of the created table
        table: String,
    },
    /// A table was dropped
    DropTable {
        /// The dropped table with its records
        table: Table,
    },
    /// A record was inserted
    Insert {
        /// Model of the record
        table: String,
        /// Id of the inserted record
        id: RecordId,
    },
    /// Values of a record were changed
    Update {
        /// Model of the record
        table: String,
        /// Record as it was before the change
        old: Record,
    },
    /// A record was removed
    Remove {
        /// Model of the record
        table: String,
        /// The removed record
        record: Record,
    },
    /// A column was dropped from every record of a table
    DropColumn {
        table: String,
        column: String,
        /// Previous values by record
        values: Vec<(RecordId, Value)>,
    },
    /// An external id was created or repointed
    SetExternalId {
        key: String,
        /// Previous mapping, if any
        old: Option<ExternalId>,
    },
    /// An external id was removed
    RemoveExternalId {
        /// The removed mapping
        old: ExternalId,
    },
}

impl Change {
    /// Table touched by the change, if any.
    pub fn table(&self) -> Option<&str> {
        match self {
            Change::CreateTable { table }
            | Change::Insert { table, .. }
            | Change::Update { table, .. }
            | Change::Remove { table, .. }
            | Change::DropColumn { table, .. } => Some(table),
            Change::DropTable { table } => Some(&table.name),
            Change::SetExternalId { .. } | Change::RemoveExternalId { .. } => None,
        }
    }
}
