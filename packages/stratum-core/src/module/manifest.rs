//! Module manifest (`__manifest__.toml`).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Module manifest.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct Manifest {
    pub name: String,
    pub version: String,
    pub summary: String,
    /// Modules that must be loaded first
    pub depends: Vec<String>,
    /// Data files loaded at install, in order
    pub data: Vec<String>,
    /// Model declaration files, in order
    pub models: Vec<String>,
    pub installable: bool,
    /// Installed automatically once every dependency is installed
    pub auto_install: bool,
    /// Informational: external packages by ecosystem
    pub external_dependencies: BTreeMap<String, Vec<String>>,
}

impl Default for Manifest {
    fn default() -> Self {
        Self {
            name: String::new(),
            version: "1.0".to_string(),
            summary: String::new(),
            depends: Vec::new(),
            data: Vec::new(),
            models: Vec::new(),
            installable: true,
            auto_install: false,
            external_dependencies: BTreeMap::new(),
        }
    }
}

impl Manifest {
    /// Parses manifest text. `fallback_name` (the directory name) is used
    /// when the manifest has no `name`.
    pub fn from_toml_str(text: &str, fallback_name: &str) -> Result<Self, CoreError> {
        let mut manifest: Manifest = toml::from_str(text).map_err(|e| CoreError::InvalidManifest {
            module: fallback_name.to_string(),
            message: e.to_string(),
        })?;
        if manifest.name.is_empty() {
            manifest.name = fallback_name.to_string();
        }
        if manifest.depends.iter().any(|d| d == &manifest.name) {
            return Err(CoreError::InvalidManifest {
                module: manifest.name.clone(),
                message: "a module cannot depend on itself".to_string(),
            });
        }
        Ok(manifest)
    }
}
