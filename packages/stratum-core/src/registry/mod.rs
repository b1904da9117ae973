//! Registry: the composed schema of every installed module.
//!
//! A registry is built once per install, upgrade or uninstall and never
//! mutated afterwards. The database swaps whole registries atomically.

mod compose;
mod decl_xml;
mod field;
mod method;
mod model;
mod validate;

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;

pub use decl_xml::parse_model_file;
pub use field::{Compute, Field, FieldDecl, FieldType, OnDelete, SelectionOption};
pub use method::{ids_arg, Call, MethodChain, MethodFn, MethodOverride};
pub use model::{table_name, Constraint, ConstraintDecl, ConstraintKind, InheritsLink, Model, ModelDecl};

use crate::error::CoreError;
use crate::module::{sort_modules, Module};
use crate::store::{RecordId, Store};

/// Stored computed field to recompute when a dependency changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Trigger {
    /// Model of the computed field
    pub model: String,
    /// Computed field
    pub field: String,
    /// Relational path from `model` to the model whose field changed
    pub path: Vec<String>,
}

/// Composed schema.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    models: BTreeMap<String, Model>,
    modules: Vec<String>,
    triggers: BTreeMap<(String, String), Vec<Trigger>>,
    generation: u64,
}

impl Registry {
    /// Registry with no models.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Composes the given modules. They are sorted by dependency first.
    pub fn build(modules: &[Arc<Module>], generation: u64) -> Result<Self, CoreError> {
        let ordered = sort_modules(modules)?;
        let mut models = compose::Models::new();
        for module in &ordered {
            for decl in &module.models {
                compose::apply_decl(&mut models, decl, module.name())?;
            }
        }
        compose::resolve_inherits(&mut models)?;
        compose::resolve_related(&mut models)?;
        validate::validate(&models)?;
        let triggers = validate::build_triggers(&models)?;

        tracing::debug!(
            modules = ordered.len(),
            models = models.len(),
            generation,
            "registry built"
        );
        Ok(Self {
            models,
            modules: ordered.iter().map(|m| m.name().to_string()).collect(),
            triggers,
            generation,
        })
    }

    /// Build counter, bumped on every reload.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Module names in load order.
    pub fn modules(&self) -> &[String] {
        &self.modules
    }

    pub fn models(&self) -> impl Iterator<Item = &Model> {
        self.models.values()
    }

    pub fn has_model(&self, name: &str) -> bool {
        self.models.contains_key(name)
    }

    pub fn model(&self, name: &str) -> Result<&Model, CoreError> {
        self.models.get(name).ok_or_else(|| CoreError::UnknownModel {
            model: name.to_string(),
            context: "registry lookup".to_string(),
        })
    }

    /// Field table of a model.
    pub fn fields_of(&self, model: &str) -> Result<&BTreeMap<String, Field>, CoreError> {
        Ok(&self.model(model)?.fields)
    }

    pub fn field(&self, model: &str, name: &str) -> Result<&Field, CoreError> {
        self.model(model)?
            .fields
            .get(name)
            .ok_or_else(|| CoreError::UnknownField {
                model: model.to_string(),
                field: name.to_string(),
            })
    }

    pub fn constraints(&self, model: &str) -> Result<Vec<&Constraint>, CoreError> {
        Ok(self.model(model)?.constraints.values().collect())
    }

    /// Method names of a model.
    pub fn methods(&self, model: &str) -> Result<Vec<&str>, CoreError> {
        Ok(self.model(model)?.methods.keys().map(String::as_str).collect())
    }

    pub fn has_method(&self, model: &str, method: &str) -> bool {
        self.models
            .get(model)
            .is_some_and(|m| m.methods.contains_key(method))
    }

    /// Runs the newest override of `method` on `model`.
    pub fn call(
        &self,
        store: &Store,
        uid: RecordId,
        model: &str,
        method: &str,
        args: Value,
    ) -> Result<Value, CoreError> {
        let chain = self
            .model(model)?
            .methods
            .get(method)
            .ok_or_else(|| CoreError::UnknownMethod {
                model: model.to_string(),
                method: method.to_string(),
            })?;
        Call::invoke(chain, model, method, self, store, uid, args)
    }

    /// Stored computed fields depending on `model.field`.
    pub fn triggers(&self, model: &str, field: &str) -> &[Trigger] {
        self.triggers
            .get(&(model.to_string(), field.to_string()))
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Field reached by following `path` from `model`.
    pub fn field_at_path(&self, model: &str, path: &[&str]) -> Result<&Field, CoreError> {
        let mut current = model;
        let mut found = None;
        for (i, segment) in path.iter().enumerate() {
            let field = self.field(current, segment)?;
            if i + 1 < path.len() {
                current = field.comodel.as_deref().ok_or_else(|| CoreError::UnknownField {
                    model: current.to_string(),
                    field: path[i + 1].to_string(),
                })?;
            }
            found = Some(field);
        }
        found.ok_or_else(|| CoreError::UnknownField {
            model: model.to_string(),
            field: String::new(),
        })
    }

    /// Many2one and many2many fields pointing at `model`.
    pub fn referencing_fields(&self, model: &str) -> Vec<&Field> {
        self.models
            .values()
            .flat_map(|m| m.fields.values())
            .filter(|f| {
                f.store
                    && matches!(f.field_type, FieldType::Many2one | FieldType::Many2many)
                    && f.comodel.as_deref() == Some(model)
            })
            .collect()
    }

    /// Checks every group named by a field declaration.
    pub fn validate_groups<F>(&self, exists: F) -> Result<(), CoreError>
    where
        F: Fn(&str) -> bool,
    {
        for model in self.models.values() {
            for field in model.fields.values() {
                for group in &field.groups {
                    let name = group.trim_start_matches('!');
                    if !exists(name) {
                        tracing::error!(group = %name, model = %model.name, field = %field.name, "unknown group");
                        return Err(CoreError::UnknownGroup {
                            group: name.to_string(),
                            context: format!("groups of field '{}.{}'", model.name, field.name),
                        });
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ntest::timeout;
    use serde_json::json;

    fn double(call: &Call<'_>, args: Value) -> Result<Value, CoreError> {
        let base = call.super_call(args)?;
        Ok(json!(base.as_i64().unwrap_or_default() * 2))
    }

    fn one(_call: &Call<'_>, _args: Value) -> Result<Value, CoreError> {
        Ok(json!(1))
    }

    fn add_ten(call: &Call<'_>, args: Value) -> Result<Value, CoreError> {
        let base = call.super_call(args)?;
        Ok(json!(base.as_i64().unwrap_or_default() + 10))
    }

    fn build(modules: Vec<Module>) -> Result<Registry, CoreError> {
        let modules: Vec<Arc<Module>> = modules.into_iter().map(Arc::new).collect();
        Registry::build(&modules, 1)
    }

    #[timeout(1000)]
    #[test]
    fn test_fields_are_contributed_by_declaring_modules() {
        let registry = build(vec![
            Module::new("a").with_model(
                ModelDecl::new("widget")
                    .field(FieldDecl::char("name"))
                    .field(FieldDecl::float("price")),
            ),
            Module::new("b")
                .depends(&["a"])
                .with_model(ModelDecl::extend("widget").field(FieldDecl::float("tax"))),
        ])
        .unwrap();
        let names: Vec<_> = registry.fields_of("widget").unwrap().keys().cloned().collect();
        assert_eq!(names, vec!["name", "price", "tax"]);
        for field in registry.fields_of("widget").unwrap().values() {
            assert!(field.modules.iter().all(|m| registry.modules().contains(m)));
        }
        assert_eq!(registry.field("widget", "ghost").unwrap_err().kind(), "UnknownField");
    }

    #[timeout(1000)]
    #[test]
    fn test_method_chain_super_call() {
        let registry = build(vec![
            Module::new("a").with_model(ModelDecl::new("widget").method("value", one)),
            Module::new("b")
                .depends(&["a"])
                .with_model(ModelDecl::extend("widget").method("value", double)),
            Module::new("c")
                .depends(&["b"])
                .with_model(ModelDecl::extend("widget").method("value", add_ten)),
        ])
        .unwrap();
        let store = Store::new();
        // c(b(a)) = (1 * 2) + 10
        let value = registry.call(&store, 1, "widget", "value", json!({})).unwrap();
        assert_eq!(value, json!(12));
        assert_eq!(registry.model("widget").unwrap().methods["value"].modules(), vec!["a", "b", "c"]);

        let err = registry.call(&store, 1, "widget", "missing", json!({})).unwrap_err();
        assert_eq!(err.kind(), "UnknownMethod");
    }

    #[timeout(1000)]
    #[test]
    fn test_super_call_past_oldest_override_fails() {
        let registry = build(vec![Module::new("a").with_model(ModelDecl::new("widget").method("value", double))]).unwrap();
        let err = registry.call(&Store::new(), 1, "widget", "value", json!({})).unwrap_err();
        assert_eq!(err.kind(), "UnknownMethod");
    }

    #[timeout(1000)]
    #[test]
    fn test_validation_errors() {
        let err = build(vec![Module::new("a").with_model(
            ModelDecl::new("widget").field(FieldDecl::many2one("partner_id", "res.partner")),
        )])
        .unwrap_err();
        assert_eq!(err.kind(), "UnknownModel");

        let err = build(vec![Module::new("a").with_model(
            ModelDecl::new("widget").field(FieldDecl::char("name").domain("[('a', '=')]")),
        )])
        .unwrap_err();
        assert_eq!(err.kind(), "BadDomain");

        let err = build(vec![Module::new("a").with_model(
            ModelDecl::new("widget").field(FieldDecl::float("total").compute("_compute_total", &["price"], true)),
        )])
        .unwrap_err();
        assert_eq!(err.kind(), "UnknownMethod");

        let err = build(vec![Module::new("a").with_model(
            ModelDecl::new("widget")
                .method("_compute_total", one)
                .field(FieldDecl::float("total").compute("_compute_total", &["price"], true)),
        )])
        .unwrap_err();
        assert_eq!(err.kind(), "BadDepends");

        let err = build(vec![Module::new("a").with_model(ModelDecl::new("widget").order("name"))]).unwrap_err();
        assert_eq!(err.kind(), "UnknownField");
    }

    #[timeout(1000)]
    #[test]
    fn test_triggers_follow_dependency_paths() {
        let registry = build(vec![Module::new("a")
            .with_model(
                ModelDecl::new("sale.order")
                    .method("_compute_total", one)
                    .field(FieldDecl::one2many("line_ids", "sale.line", "order_id"))
                    .field(FieldDecl::float("total").compute("_compute_total", &["line_ids.amount"], true)),
            )
            .with_model(
                ModelDecl::new("sale.line")
                    .field(FieldDecl::many2one("order_id", "sale.order"))
                    .field(FieldDecl::float("amount")),
            )])
        .unwrap();
        let on_amount = registry.triggers("sale.line", "amount");
        assert_eq!(
            on_amount,
            &[Trigger {
                model: "sale.order".to_string(),
                field: "total".to_string(),
                path: vec!["line_ids".to_string()],
            }]
        );
        assert_eq!(registry.triggers("sale.order", "line_ids").len(), 1);
        assert_eq!(registry.triggers("sale.line", "order_id").len(), 1);
        assert!(registry.triggers("sale.line", "name").is_empty());
    }

    #[timeout(1000)]
    #[test]
    fn test_module_cycle_is_rejected() {
        let err = build(vec![
            Module::new("a").depends(&["b"]),
            Module::new("b").depends(&["a"]),
        ])
        .unwrap_err();
        assert_eq!(err.kind(), "CyclicDependency");
    }
}
