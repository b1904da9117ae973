//! Core error types.

use thiserror::Error;

/// Errors raised by the registry, the view engine, the record store and the
/// uninstall executor.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CoreError {
    /// Module dependency graph, view inheritance or group implication has a cycle
    #[error("Cyclic dependency between {kind}: {}", members.join(" -> "))]
    CyclicDependency {
        kind: &'static str,
        members: Vec<String>,
    },

    /// A module depends on a module that is not in the catalogue
    #[error("Module '{module}' depends on unknown module '{dependency}'")]
    MissingDependency { module: String, dependency: String },

    /// Module not found in the catalogue
    #[error("Module '{module}' not found")]
    ModuleNotFound { module: String },

    /// Module is flagged as not installable
    #[error("Module '{module}' is not installable")]
    ModuleNotInstallable { module: String },

    /// Module cannot be removed while installed modules depend on it
    #[error("Module '{module}' is required by installed modules: {}", dependents.join(", "))]
    ModuleInUse {
        module: String,
        dependents: Vec<String>,
    },

    /// Manifest could not be read or is malformed
    #[error("Invalid manifest for module '{module}': {message}")]
    InvalidManifest { module: String, message: String },

    /// Two declarations of the same field cannot be reconciled
    #[error("Incompatible declaration of field '{model}.{field}' in module '{module}': {reason}")]
    IncompatibleFieldDeclaration {
        model: String,
        field: String,
        module: String,
        reason: String,
    },

    /// Reference to a model missing from the registry
    #[error("Unknown model '{model}' ({context})")]
    UnknownModel { model: String, context: String },

    /// Reference to a field missing from its model
    #[error("Unknown field '{field}' on model '{model}'")]
    UnknownField { model: String, field: String },

    /// Reference to a group that does not resolve
    #[error("Unknown group '{group}' ({context})")]
    UnknownGroup { group: String, context: String },

    /// Method not defined on model
    #[error("Unknown method '{method}' on model '{model}'")]
    UnknownMethod { model: String, method: String },

    /// External identifier does not resolve
    #[error("External identifier '{xmlid}' not found")]
    UnknownExternalId { xmlid: String },

    /// Related field path does not resolve
    #[error("Bad related field '{model}.{field}' (path '{path}'): {reason}")]
    BadRelated {
        model: String,
        field: String,
        path: String,
        reason: String,
    },

    /// Computed field dependency does not resolve
    #[error("Bad dependency '{path}' of computed field '{model}.{field}'")]
    BadDepends {
        model: String,
        field: String,
        path: String,
    },

    /// Domain expression could not be parsed or references unknown fields
    #[error("Bad domain '{domain}': {reason}")]
    BadDomain { domain: String, reason: String },

    /// Declarative expression could not be parsed
    #[error("Bad expression '{expr}': {reason}")]
    BadExpression { expr: String, reason: String },

    /// Inheriting view could not locate the node it patches
    #[error("View '{view}' (module '{module}', line {line}): element '{spec}' cannot be located in parent view")]
    PatchTargetNotFound {
        view: String,
        module: String,
        line: usize,
        spec: String,
    },

    /// Patch spec is malformed
    #[error("View '{view}' (line {line}): invalid patch spec: {reason}")]
    InvalidPatch {
        view: String,
        line: usize,
        reason: String,
    },

    /// Composed view failed validation
    #[error("Invalid view '{view}': {message}")]
    ValidationError { view: String, message: String },

    /// User does not satisfy a group restriction or access rule
    #[error("Access denied: {message}")]
    AccessDenied { message: String },

    /// Record values violate a model constraint
    #[error("Constraint '{constraint}' violated on model '{model}': {message}")]
    ConstraintViolation {
        model: String,
        constraint: String,
        message: String,
    },

    /// Deleting records would break a restricting reference
    #[error("Cannot delete {model} records {ids:?}: referenced by '{referrer}.{field}'")]
    ForeignKeyViolation {
        model: String,
        ids: Vec<u64>,
        referrer: String,
        field: String,
    },

    /// Record not found
    #[error("Record {model}({id}) not found")]
    RecordNotFound { model: String, id: u64 },

    /// Uninstall graph has an irreducible cycle
    #[error("Uninstall graph has a cycle:\n{}", nodes.join("\n"))]
    UninstallCyclic { nodes: Vec<String> },

    /// Uninstall left undeletable records behind
    #[error("Uninstall left {} undeletable records", residue.len())]
    UninstallPartial { residue: Vec<String> },

    /// XML text could not be parsed
    #[error("XML parse error in {source_name} at line {line}: {message}")]
    XmlParse {
        source_name: String,
        line: usize,
        message: String,
    },

    /// Declarative data file could not be loaded
    #[error("Error loading {module}/{file} at line {line}: {message}")]
    DataFile {
        module: String,
        file: String,
        line: usize,
        message: String,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(String),

    /// Lock poisoned (RwLock poisoned)
    #[error("Lock poisoned")]
    LockPoisoned,
}

impl CoreError {
    /// Stable name of the error kind, independent of the variant payload.
    pub fn kind(&self) -> &'static str {
        match self {
            CoreError::CyclicDependency { .. } => "CyclicDependency",
            CoreError::MissingDependency { .. } => "MissingDependency",
            CoreError::ModuleNotFound { .. } => "ModuleNotFound",
            CoreError::ModuleNotInstallable { .. } => "ModuleNotInstallable",
            CoreError::ModuleInUse { .. } => "ModuleInUse",
            CoreError::InvalidManifest { .. } => "InvalidManifest",
            CoreError::IncompatibleFieldDeclaration { .. } => "IncompatibleFieldDeclaration",
            CoreError::UnknownModel { .. } => "UnknownModel",
            CoreError::UnknownField { .. } => "UnknownField",
            CoreError::UnknownGroup { .. } => "UnknownGroup",
            CoreError::UnknownMethod { .. } => "UnknownMethod",
            CoreError::UnknownExternalId { .. } => "UnknownExternalId",
            CoreError::BadRelated { .. } => "BadRelated",
            CoreError::BadDepends { .. } => "BadDepends",
            CoreError::BadDomain { .. } => "BadDomain",
            CoreError::BadExpression { .. } => "BadExpression",
            CoreError::PatchTargetNotFound { .. } => "PatchTargetNotFound",
            CoreError::InvalidPatch { .. } => "InvalidPatch",
            CoreError::ValidationError { .. } => "ValidationError",
            CoreError::AccessDenied { .. } => "AccessDenied",
            CoreError::ConstraintViolation { .. } => "ConstraintViolation",
            CoreError::ForeignKeyViolation { .. } => "ForeignKeyViolation",
            CoreError::RecordNotFound { .. } => "RecordNotFound",
            CoreError::UninstallCyclic { .. } => "UninstallCyclic",
            CoreError::UninstallPartial { .. } => "UninstallPartial",
            CoreError::XmlParse { .. } => "XmlParse",
            CoreError::DataFile { .. } => "DataFile",
            CoreError::Io(_) => "Io",
            CoreError::LockPoisoned => "LockPoisoned",
        }
    }
}

impl From<std::io::Error> for CoreError {
    fn from(e: std::io::Error) -> Self {
        CoreError::Io(e.to_string())
    }
}
