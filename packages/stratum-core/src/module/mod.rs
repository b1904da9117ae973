//! Modules and the module catalogue.
//!
//! A module is either loaded from a directory holding a manifest, model
//! declaration files and data files, or built programmatically so it can
//! carry method overrides.

mod manifest;
mod order;

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub use manifest::Manifest;
pub use order::{sort_modules, BASE_MODULE};

use crate::error::CoreError;
use crate::registry::{parse_model_file, ModelDecl};

/// Declarative data file contents.
#[derive(Debug, Clone, PartialEq)]
pub struct DataFile {
    /// Path relative to the module
    pub name: String,
    pub content: String,
}

/// Loaded module.
#[derive(Debug, Clone)]
pub struct Module {
    pub manifest: Manifest,
    pub models: Vec<ModelDecl>,
    pub data_files: Vec<DataFile>,
    pub path: Option<PathBuf>,
}

impl Module {
    /// Programmatic module with an empty manifest.
    pub fn new(name: &str) -> Self {
        Self {
            manifest: Manifest {
                name: name.to_string(),
                ..Manifest::default()
            },
            models: Vec::new(),
            data_files: Vec::new(),
            path: None,
        }
    }

    pub fn depends(mut self, depends: &[&str]) -> Self {
        self.manifest.depends = depends.iter().map(|d| d.to_string()).collect();
        self
    }

    pub fn auto_install(mut self, auto_install: bool) -> Self {
        self.manifest.auto_install = auto_install;
        self
    }

    pub fn installable(mut self, installable: bool) -> Self {
        self.manifest.installable = installable;
        self
    }

    pub fn with_model(mut self, decl: ModelDecl) -> Self {
        self.models.push(decl);
        self
    }

    /// Appends a data file, loaded after the ones already added.
    pub fn with_data(mut self, name: &str, content: &str) -> Self {
        self.manifest.data.push(name.to_string());
        self.data_files.push(DataFile {
            name: name.to_string(),
            content: content.to_string(),
        });
        self
    }

    pub fn name(&self) -> &str {
        &self.manifest.name
    }

    /// Loads a module directory: manifest, model declarations and data files.
    pub fn load_dir(dir: &Path, manifest_file: &str) -> Result<Self, CoreError> {
        let dir_name = dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let text = fs::read_to_string(dir.join(manifest_file))?;
        let manifest = Manifest::from_toml_str(&text, &dir_name)?;

        let read = |rel: &str| {
            fs::read_to_string(dir.join(rel)).map_err(|e| CoreError::InvalidManifest {
                module: manifest.name.clone(),
                message: format!("cannot read '{}': {}", rel, e),
            })
        };

        let mut models = Vec::new();
        for rel in &manifest.models {
            let content = read(rel)?;
            models.extend(parse_model_file(&content, &manifest.name, rel)?);
        }
        let mut data_files = Vec::with_capacity(manifest.data.len());
        for rel in &manifest.data {
            data_files.push(DataFile {
                name: rel.clone(),
                content: read(rel)?,
            });
        }

        tracing::debug!(module = %manifest.name, path = %dir.display(), "loaded module");
        Ok(Self {
            manifest,
            models,
            data_files,
            path: Some(dir.to_path_buf()),
        })
    }
}

/// Every module known to the system, installed or not.
#[derive(Debug, Clone, Default)]
pub struct ModuleCatalog {
    modules: BTreeMap<String, Arc<Module>>,
}

impl ModuleCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Discovers module directories under each path. When two paths carry
    /// the same module, the first one wins.
    pub fn scan(paths: &[PathBuf], manifest_file: &str) -> Result<Self, CoreError> {
        let mut catalog = Self::new();
        for path in paths {
            let mut dirs: Vec<PathBuf> = fs::read_dir(path)?
                .filter_map(|entry| entry.ok().map(|e| e.path()))
                .filter(|p| p.join(manifest_file).is_file())
                .collect();
            dirs.sort();
            for dir in dirs {
                let module = Module::load_dir(&dir, manifest_file)?;
                if catalog.modules.contains_key(module.name()) {
                    tracing::debug!(module = %module.name(), path = %dir.display(), "module shadowed by earlier addons path");
                    continue;
                }
                catalog.add(module);
            }
        }
        tracing::info!(modules = catalog.modules.len(), "module catalogue scanned");
        Ok(catalog)
    }

    /// Adds or replaces a module.
    pub fn add(&mut self, module: Module) {
        self.modules.insert(module.name().to_string(), Arc::new(module));
    }

    pub fn get(&self, name: &str) -> Result<&Arc<Module>, CoreError> {
        self.modules.get(name).ok_or_else(|| CoreError::ModuleNotFound {
            module: name.to_string(),
        })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.modules.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.modules.keys().map(String::as_str)
    }

    pub fn modules(&self) -> impl Iterator<Item = &Arc<Module>> {
        self.modules.values()
    }

    /// Modules to install for `requested` on top of `installed`: the
    /// requested modules, their transitive dependencies, then every
    /// auto-install module whose dependencies are all present, to a fixpoint.
    pub fn install_closure(
        &self,
        requested: &[&str],
        installed: &BTreeSet<String>,
    ) -> Result<BTreeSet<String>, CoreError> {
        let mut set = installed.clone();
        let mut stack: Vec<String> = requested.iter().map(|r| r.to_string()).collect();
        if !set.contains(BASE_MODULE) && self.contains(BASE_MODULE) {
            stack.push(BASE_MODULE.to_string());
        }
        while let Some(name) = stack.pop() {
            if set.contains(&name) {
                continue;
            }
            let module = self.get(&name)?;
            if !module.manifest.installable {
                return Err(CoreError::ModuleNotInstallable { module: name });
            }
            for dep in &module.manifest.depends {
                if !self.contains(dep) {
                    return Err(CoreError::MissingDependency {
                        module: name.clone(),
                        dependency: dep.clone(),
                    });
                }
                stack.push(dep.clone());
            }
            set.insert(name);
        }

        loop {
            let added: Vec<String> = self
                .modules
                .values()
                .filter(|m| {
                    !set.contains(m.name())
                        && m.manifest.auto_install
                        && m.manifest.installable
                        && m.manifest.depends.iter().all(|d| set.contains(d))
                })
                .map(|m| m.name().to_string())
                .collect();
            if added.is_empty() {
                break;
            }
            set.extend(added);
        }
        Ok(set)
    }

    /// Modules of `names` in dependency order.
    pub fn ordered(&self, names: &BTreeSet<String>) -> Result<Vec<Arc<Module>>, CoreError> {
        let modules = names
            .iter()
            .map(|n| self.get(n).cloned())
            .collect::<Result<Vec<_>, _>>()?;
        sort_modules(&modules)
    }

    /// Modules of `within` that depend on `name`, directly or transitively.
    pub fn dependents(&self, name: &str, within: &BTreeSet<String>) -> BTreeSet<String> {
        let mut found = BTreeSet::new();
        let mut stack = vec![name.to_string()];
        while let Some(current) = stack.pop() {
            for candidate in within {
                let Some(module) = self.modules.get(candidate) else { continue };
                if module.manifest.depends.contains(&current) && found.insert(candidate.clone()) {
                    stack.push(candidate.clone());
                }
            }
        }
        found
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ntest::timeout;

    fn catalog(modules: Vec<Module>) -> ModuleCatalog {
        let mut catalog = ModuleCatalog::new();
        for m in modules {
            catalog.add(m);
        }
        catalog
    }

    #[timeout(1000)]
    #[test]
    fn test_install_closure_with_auto_install() {
        let catalog = catalog(vec![
            Module::new("base"),
            Module::new("sale").depends(&["base", "product"]),
            Module::new("product").depends(&["base"]),
            Module::new("stock").depends(&["product"]),
            Module::new("sale_stock").depends(&["sale", "stock"]).auto_install(true),
            Module::new("sale_extra").depends(&["sale"]).auto_install(true),
        ]);
        let set = catalog.install_closure(&["sale"], &BTreeSet::new()).unwrap();
        let names: Vec<_> = set.iter().map(String::as_str).collect();
        assert_eq!(names, vec!["base", "product", "sale", "sale_extra"]);

        let set = catalog.install_closure(&["stock"], &set).unwrap();
        assert!(set.contains("sale_stock"));
    }

    #[timeout(1000)]
    #[test]
    fn test_install_closure_errors() {
        let catalog = catalog(vec![
            Module::new("base"),
            Module::new("broken").depends(&["ghost"]),
            Module::new("legacy").installable(false),
        ]);
        let err = catalog.install_closure(&["broken"], &BTreeSet::new()).unwrap_err();
        assert_eq!(err.kind(), "MissingDependency");
        let err = catalog.install_closure(&["legacy"], &BTreeSet::new()).unwrap_err();
        assert_eq!(err.kind(), "ModuleNotInstallable");
        let err = catalog.install_closure(&["nowhere"], &BTreeSet::new()).unwrap_err();
        assert_eq!(err.kind(), "ModuleNotFound");
    }

    #[timeout(1000)]
    #[test]
    fn test_dependents_are_transitive() {
        let catalog = catalog(vec![
            Module::new("base"),
            Module::new("a").depends(&["base"]),
            Module::new("b").depends(&["a"]),
            Module::new("c").depends(&["b"]),
        ]);
        let within: BTreeSet<String> = ["base", "a", "b", "c"].iter().map(|s| s.to_string()).collect();
        let deps: Vec<_> = catalog.dependents("a", &within).into_iter().collect();
        assert_eq!(deps, vec!["b", "c"]);
    }

    #[timeout(1000)]
    #[test]
    fn test_scan_directory() {
        let dir = tempfile::tempdir().unwrap();
        let module_dir = dir.path().join("widgets");
        fs::create_dir_all(module_dir.join("models")).unwrap();
        fs::write(
            module_dir.join("__manifest__.toml"),
            "depends = [\"base\"]\nmodels = [\"models/widget.xml\"]\ndata = [\"data/widgets.xml\"]\n",
        )
        .unwrap();
        fs::write(
            module_dir.join("models/widget.xml"),
            r#"<models><model name="widget"><field name="name" type="char"/></model></models>"#,
        )
        .unwrap();
        fs::create_dir_all(module_dir.join("data")).unwrap();
        fs::write(module_dir.join("data/widgets.xml"), "<odoo/>").unwrap();
        fs::create_dir_all(dir.path().join("not_a_module")).unwrap();

        let catalog = ModuleCatalog::scan(&[dir.path().to_path_buf()], "__manifest__.toml").unwrap();
        assert_eq!(catalog.names().collect::<Vec<_>>(), vec!["widgets"]);
        let module = catalog.get("widgets").unwrap();
        assert_eq!(module.models.len(), 1);
        assert_eq!(module.data_files[0].content, "<odoo/>");
    }

    #[timeout(1000)]
    #[test]
    fn test_missing_data_file() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("__manifest__.toml"), "data = [\"missing.xml\"]").unwrap();
        let err = Module::load_dir(dir.path(), "__manifest__.toml").unwrap_err();
        assert_eq!(err.kind(), "InvalidManifest");
    }
}
