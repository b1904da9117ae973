//! Core configuration.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::CoreError;

/// Extra many2one link treated as an uninstall ordering edge.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Deserialize)]
pub struct CascadeLink {
    /// Referring model
    pub model: String,
    /// Many2one field on the referring model
    pub field: String,
}

/// Core configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    /// Directories scanned for module directories
    pub addons_paths: Vec<PathBuf>,
    /// Manifest file name inside a module directory
    pub manifest_file: String,
    /// Maximum number of assembled views kept in the view cache
    pub view_cache_capacity: usize,
    /// Non-cascading links that still order uninstall deletions
    pub uninstall_allow_list: Vec<CascadeLink>,
    /// Upper bound on stored-compute flush rounds per commit
    pub max_recompute_rounds: usize,
    /// Validate composed views against the registry
    pub validate_views: bool,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            addons_paths: Vec::new(),
            manifest_file: "__manifest__.toml".to_string(),
            view_cache_capacity: 512,
            uninstall_allow_list: Vec::new(),
            max_recompute_rounds: 16,
            validate_views: true,
        }
    }
}

impl CoreConfig {
    /// Reads a configuration from a TOML file. Missing keys keep their defaults.
    pub fn from_toml_file(path: &Path) -> Result<Self, CoreError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Parses a configuration from TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self, CoreError> {
        toml::from_str(text).map_err(|e| CoreError::Io(format!("invalid configuration: {}", e)))
    }

    /// Returns whether `(model, field)` is on the uninstall allow-list.
    pub fn is_allow_listed(&self, model: &str, field: &str) -> bool {
        self.uninstall_allow_list
            .iter()
            .any(|link| link.model == model && link.field == field)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = CoreConfig::from_toml_str(
            r#"
            addons_paths = ["/opt/addons"]
            view_cache_capacity = 8

            [[uninstall_allow_list]]
            model = "crm.lead"
            field = "team_id"
            "#,
        )
        .unwrap();

        assert_eq!(config.addons_paths, vec![PathBuf::from("/opt/addons")]);
        assert_eq!(config.view_cache_capacity, 8);
        assert_eq!(config.manifest_file, "__manifest__.toml");
        assert!(config.is_allow_listed("crm.lead", "team_id"));
        assert!(!config.is_allow_listed("crm.lead", "user_id"));
    }

    #[test]
    fn test_invalid_toml_is_reported() {
        let err = CoreConfig::from_toml_str("view_cache_capacity = \"many\"").unwrap_err();
        assert_eq!(err.kind(), "Io");
    }
}
