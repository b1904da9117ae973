//! Data loading: declarative data files and registry reflection.

mod loader;
mod reflect;

pub use loader::{load_data_file, LoadMode, LoadTracker};
pub use reflect::{constraint_xmlid, field_xmlid, model_xmlid, reflect_registry, relation_xmlid, selection_xmlid};
