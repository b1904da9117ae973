//! Uninstall executor: deletes the records and metadata owned by modules
//! in an order derived from a dependency graph, collecting what cannot be
//! deleted as residue.

mod executor;
mod graph;

pub use executor::{uninstall_modules, uninstall_records, Undeletable, UninstallReport};
pub use graph::{MetaClass, NodeKey, UninstallGraph, GROUPS_MODEL};
