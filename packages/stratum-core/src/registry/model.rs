//! Model declarations and composed model descriptors.

use std::collections::BTreeMap;

use serde::Serialize;

use super::field::{Field, FieldDecl};
use super::method::{MethodChain, MethodFn};

/// Constraint body.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ConstraintKind {
    /// Table-level definition such as `unique(name, company_id)`
    Sql { definition: String },
    /// In-code check: `method` returns `true` when the records in `{"ids"}` are valid
    Check { method: String, fields: Vec<String> },
}

impl ConstraintKind {
    /// Reflection type code: `u` for table constraints, `c` for checks.
    pub fn code(&self) -> &'static str {
        match self {
            ConstraintKind::Sql { .. } => "u",
            ConstraintKind::Check { .. } => "c",
        }
    }

    /// Fields of a `unique(...)` definition.
    pub fn unique_fields(&self) -> Option<Vec<String>> {
        let ConstraintKind::Sql { definition } = self else {
            return None;
        };
        let inner = definition
            .trim()
            .strip_prefix("unique(")
            .or_else(|| definition.trim().strip_prefix("UNIQUE("))?
            .strip_suffix(')')?;
        Some(inner.split(',').map(|f| f.trim().to_string()).collect())
    }
}

/// One module's declaration of a constraint.
#[derive(Debug, Clone, PartialEq)]
pub struct ConstraintDecl {
    pub name: String,
    pub kind: ConstraintKind,
    pub message: String,
}

/// Composed constraint.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Constraint {
    pub name: String,
    pub kind: ConstraintKind,
    pub message: String,
    pub modules: Vec<String>,
}

/// Delegation link: fields of `parent` are exposed through `field`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InheritsLink {
    pub parent: String,
    pub field: String,
    pub module: String,
}

/// One module's declaration of a model.
#[derive(Debug, Clone)]
pub struct ModelDecl {
    pub name: String,
    /// Models this declaration inherits from; the model's own name marks an
    /// extension of an existing model, other names copy their definition
    pub inherit: Vec<String>,
    /// Delegation parents: parent model -> many2one link field
    pub inherits: Vec<(String, String)>,
    pub description: Option<String>,
    pub order: Option<String>,
    pub rec_name: Option<String>,
    pub fields: Vec<FieldDecl>,
    pub constraints: Vec<ConstraintDecl>,
    pub methods: Vec<(String, MethodFn)>,
}

impl ModelDecl {
    /// Declares a new model.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            inherit: Vec::new(),
            inherits: Vec::new(),
            description: None,
            order: None,
            rec_name: None,
            fields: Vec::new(),
            constraints: Vec::new(),
            methods: Vec::new(),
        }
    }

    /// Extends a model declared by a dependency.
    pub fn extend(name: &str) -> Self {
        let mut decl = Self::new(name);
        decl.inherit.push(name.to_string());
        decl
    }

    /// Adds a parent for prototype inheritance.
    pub fn inherit(mut self, parent: &str) -> Self {
        self.inherit.push(parent.to_string());
        self
    }

    /// Adds a delegation parent reached through the many2one `field`.
    pub fn inherits(mut self, parent: &str, field: &str) -> Self {
        self.inherits.push((parent.to_string(), field.to_string()));
        self
    }

    pub fn description(mut self, description: &str) -> Self {
        self.description = Some(description.to_string());
        self
    }

    pub fn order(mut self, order: &str) -> Self {
        self.order = Some(order.to_string());
        self
    }

    pub fn rec_name(mut self, field: &str) -> Self {
        self.rec_name = Some(field.to_string());
        self
    }

    pub fn field(mut self, field: FieldDecl) -> Self {
        self.fields.push(field);
        self
    }

    pub fn sql_constraint(mut self, name: &str, definition: &str, message: &str) -> Self {
        self.constraints.push(ConstraintDecl {
            name: name.to_string(),
            kind: ConstraintKind::Sql {
                definition: definition.to_string(),
            },
            message: message.to_string(),
        });
        self
    }

    pub fn check_constraint(mut self, name: &str, method: &str, fields: &[&str], message: &str) -> Self {
        self.constraints.push(ConstraintDecl {
            name: name.to_string(),
            kind: ConstraintKind::Check {
                method: method.to_string(),
                fields: fields.iter().map(|f| f.to_string()).collect(),
            },
            message: message.to_string(),
        });
        self
    }

    pub fn method(mut self, name: &str, func: MethodFn) -> Self {
        self.methods.push((name.to_string(), func));
        self
    }

    /// Whether the declaration extends an existing model of the same name.
    pub fn is_extension(&self) -> bool {
        self.inherit.iter().any(|p| p == &self.name)
    }
}

/// Composed model.
#[derive(Debug, Clone)]
pub struct Model {
    pub name: String,
    pub description: String,
    pub order: String,
    pub rec_name: Option<String>,
    pub fields: BTreeMap<String, Field>,
    /// Field names in declaration order
    pub field_order: Vec<String>,
    pub constraints: BTreeMap<String, Constraint>,
    pub methods: BTreeMap<String, MethodChain>,
    pub inherits: Vec<InheritsLink>,
    /// Prototype parents
    pub parents: Vec<String>,
    /// Modules declaring the model, in load order
    pub modules: Vec<String>,
}

impl Model {
    pub(crate) fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            description: name.to_string(),
            order: "id".to_string(),
            rec_name: None,
            fields: BTreeMap::new(),
            field_order: Vec::new(),
            constraints: BTreeMap::new(),
            methods: BTreeMap::new(),
            inherits: Vec::new(),
            parents: Vec::new(),
            modules: Vec::new(),
        }
    }

    /// Table name: dots replaced by underscores.
    pub fn table(&self) -> String {
        table_name(&self.name)
    }

    /// Fields in declaration order.
    pub fn ordered_fields(&self) -> impl Iterator<Item = &Field> {
        self.field_order.iter().filter_map(|n| self.fields.get(n))
    }

    /// Field used as display name: `rec_name`, else `name` when present.
    pub fn display_field(&self) -> Option<&str> {
        match &self.rec_name {
            Some(name) => Some(name.as_str()),
            None if self.fields.contains_key("name") => Some("name"),
            None => None,
        }
    }

    pub(crate) fn insert_field(&mut self, field: Field) {
        if !self.fields.contains_key(&field.name) {
            self.field_order.push(field.name.clone());
        }
        self.fields.insert(field.name.clone(), field);
    }
}

/// Table name of a model.
pub fn table_name(model: &str) -> String {
    model.replace('.', "_")
}
