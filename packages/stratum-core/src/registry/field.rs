//! Field declarations and composed field descriptors.

use serde::Serialize;
use serde_json::{json, Value};

use crate::error::CoreError;

/// Closed set of field types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Boolean,
    Integer,
    Float,
    Monetary,
    Char,
    Text,
    Html,
    Date,
    Datetime,
    Selection,
    Binary,
    Reference,
    Many2one,
    One2many,
    Many2many,
    Json,
}

impl FieldType {
    /// Parses a type name (`"many2one"`, `"char"`, ...).
    pub fn parse(name: &str) -> Option<Self> {
        Some(match name {
            "boolean" => FieldType::Boolean,
            "integer" => FieldType::Integer,
            "float" => FieldType::Float,
            "monetary" => FieldType::Monetary,
            "char" => FieldType::Char,
            "text" => FieldType::Text,
            "html" => FieldType::Html,
            "date" => FieldType::Date,
            "datetime" => FieldType::Datetime,
            "selection" => FieldType::Selection,
            "binary" => FieldType::Binary,
            "reference" => FieldType::Reference,
            "many2one" => FieldType::Many2one,
            "one2many" => FieldType::One2many,
            "many2many" => FieldType::Many2many,
            "json" => FieldType::Json,
            _ => return None,
        })
    }

    /// Type name as used in declarations and reflection.
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::Boolean => "boolean",
            FieldType::Integer => "integer",
            FieldType::Float => "float",
            FieldType::Monetary => "monetary",
            FieldType::Char => "char",
            FieldType::Text => "text",
            FieldType::Html => "html",
            FieldType::Date => "date",
            FieldType::Datetime => "datetime",
            FieldType::Selection => "selection",
            FieldType::Binary => "binary",
            FieldType::Reference => "reference",
            FieldType::Many2one => "many2one",
            FieldType::One2many => "one2many",
            FieldType::Many2many => "many2many",
            FieldType::Json => "json",
        }
    }

    /// many2one, one2many or many2many.
    pub fn is_relational(&self) -> bool {
        matches!(self, FieldType::Many2one | FieldType::One2many | FieldType::Many2many)
    }

    /// one2many or many2many.
    pub fn is_x2many(&self) -> bool {
        matches!(self, FieldType::One2many | FieldType::Many2many)
    }
}

impl std::fmt::Display for FieldType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Behaviour of a many2one when its target is deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OnDelete {
    SetNull,
    Cascade,
    Restrict,
}

impl OnDelete {
    pub fn parse(text: &str) -> Option<Self> {
        match text {
            "set null" | "set_null" => Some(OnDelete::SetNull),
            "cascade" => Some(OnDelete::Cascade),
            "restrict" => Some(OnDelete::Restrict),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OnDelete::SetNull => "set null",
            OnDelete::Cascade => "cascade",
            OnDelete::Restrict => "restrict",
        }
    }
}

/// Selection value with the module that contributed it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SelectionOption {
    pub value: String,
    pub label: String,
    pub module: String,
}

/// Computation attached to a computed field.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Compute {
    /// Method called with `{"ids": [...]}`, returning `{"<id>": value}`
    pub method: String,
    /// Dependency paths (`"line_ids.amount"`)
    pub depends: Vec<String>,
    /// Whether the value is stored and recomputed on dependency writes
    pub store: bool,
    /// Method called with `{"ids": [...], "value": v}` on writes
    pub inverse: Option<String>,
}

/// One module's declaration of a field. Unset attributes leave the composed
/// value untouched when merged into an existing field.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDecl {
    pub name: String,
    pub field_type: FieldType,
    pub string: Option<String>,
    pub help: Option<String>,
    pub required: Option<bool>,
    pub readonly: Option<bool>,
    pub index: Option<bool>,
    pub translate: Option<bool>,
    pub groups: Vec<String>,
    pub default: Option<Value>,
    pub domain: Option<String>,
    pub comodel: Option<String>,
    pub inverse_name: Option<String>,
    pub relation_table: Option<String>,
    pub ondelete: Option<OnDelete>,
    pub selection: Vec<(String, String)>,
    pub selection_add: Vec<(String, String)>,
    pub compute: Option<Compute>,
    pub related: Option<String>,
    pub store: Option<bool>,
}

impl FieldDecl {
    /// Declares a field of the given type.
    pub fn new(name: &str, field_type: FieldType) -> Self {
        Self {
            name: name.to_string(),
            field_type,
            string: None,
            help: None,
            required: None,
            readonly: None,
            index: None,
            translate: None,
            groups: Vec::new(),
            default: None,
            domain: None,
            comodel: None,
            inverse_name: None,
            relation_table: None,
            ondelete: None,
            selection: Vec::new(),
            selection_add: Vec::new(),
            compute: None,
            related: None,
            store: None,
        }
    }

    pub fn char(name: &str) -> Self {
        Self::new(name, FieldType::Char)
    }

    pub fn text(name: &str) -> Self {
        Self::new(name, FieldType::Text)
    }

    pub fn boolean(name: &str) -> Self {
        Self::new(name, FieldType::Boolean)
    }

    pub fn integer(name: &str) -> Self {
        Self::new(name, FieldType::Integer)
    }

    pub fn float(name: &str) -> Self {
        Self::new(name, FieldType::Float)
    }

    pub fn selection(name: &str, options: &[(&str, &str)]) -> Self {
        let mut decl = Self::new(name, FieldType::Selection);
        decl.selection = options
            .iter()
            .map(|(v, l)| (v.to_string(), l.to_string()))
            .collect();
        decl
    }

    pub fn many2one(name: &str, comodel: &str) -> Self {
        let mut decl = Self::new(name, FieldType::Many2one);
        decl.comodel = Some(comodel.to_string());
        decl
    }

    pub fn one2many(name: &str, comodel: &str, inverse_name: &str) -> Self {
        let mut decl = Self::new(name, FieldType::One2many);
        decl.comodel = Some(comodel.to_string());
        decl.inverse_name = Some(inverse_name.to_string());
        decl
    }

    pub fn many2many(name: &str, comodel: &str) -> Self {
        let mut decl = Self::new(name, FieldType::Many2many);
        decl.comodel = Some(comodel.to_string());
        decl
    }

    /// Related field; its type is taken from the end of `path` at build time.
    pub fn related(name: &str, path: &str) -> Self {
        let mut decl = Self::new(name, FieldType::Char);
        decl.related = Some(path.to_string());
        decl
    }

    /// Redeclares an existing field of `field_type` in a later module.
    pub fn extend(name: &str, field_type: FieldType) -> Self {
        Self::new(name, field_type)
    }

    pub fn string(mut self, label: &str) -> Self {
        self.string = Some(label.to_string());
        self
    }

    pub fn help(mut self, help: &str) -> Self {
        self.help = Some(help.to_string());
        self
    }

    pub fn required(mut self, required: bool) -> Self {
        self.required = Some(required);
        self
    }

    pub fn readonly(mut self, readonly: bool) -> Self {
        self.readonly = Some(readonly);
        self
    }

    pub fn index(mut self, index: bool) -> Self {
        self.index = Some(index);
        self
    }

    pub fn translate(mut self, translate: bool) -> Self {
        self.translate = Some(translate);
        self
    }

    /// Comma-separated group external ids.
    pub fn groups(mut self, groups: &str) -> Self {
        self.groups = split_list(groups);
        self
    }

    pub fn default(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }

    pub fn domain(mut self, domain: &str) -> Self {
        self.domain = Some(domain.to_string());
        self
    }

    pub fn ondelete(mut self, ondelete: OnDelete) -> Self {
        self.ondelete = Some(ondelete);
        self
    }

    pub fn relation_table(mut self, table: &str) -> Self {
        self.relation_table = Some(table.to_string());
        self
    }

    pub fn selection_add(mut self, options: &[(&str, &str)]) -> Self {
        self.selection_add = options
            .iter()
            .map(|(v, l)| (v.to_string(), l.to_string()))
            .collect();
        self
    }

    pub fn compute(mut self, method: &str, depends: &[&str], store: bool) -> Self {
        self.compute = Some(Compute {
            method: method.to_string(),
            depends: depends.iter().map(|d| d.to_string()).collect(),
            store,
            inverse: None,
        });
        self
    }

    pub fn inverse(mut self, method: &str) -> Self {
        if let Some(compute) = self.compute.as_mut() {
            compute.inverse = Some(method.to_string());
        }
        self
    }

    pub fn store(mut self, store: bool) -> Self {
        self.store = Some(store);
        self
    }
}

/// Composed field descriptor, the merge of every module's declaration.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Field {
    pub name: String,
    pub model: String,
    pub field_type: FieldType,
    pub string: String,
    pub help: Option<String>,
    pub required: bool,
    pub readonly: bool,
    pub index: bool,
    pub translate: bool,
    pub groups: Vec<String>,
    pub default: Option<Value>,
    pub domain: Option<String>,
    pub comodel: Option<String>,
    pub inverse_name: Option<String>,
    pub relation_table: Option<String>,
    pub ondelete: OnDelete,
    pub selection: Vec<SelectionOption>,
    pub compute: Option<Compute>,
    /// Resolved related path segments
    pub related: Option<Vec<String>>,
    /// Whether the value has a column in the model's table
    pub store: bool,
    /// Exposed through delegation inheritance from `inherited_from`
    pub inherited: bool,
    pub inherited_from: Option<String>,
    /// Modules whose declarations contribute to the field, in load order
    pub modules: Vec<String>,
}

impl Field {
    /// Builds a descriptor from its first declaration.
    pub(crate) fn from_decl(model: &str, decl: &FieldDecl, module: &str) -> Self {
        let related = decl
            .related
            .as_ref()
            .map(|path| path.split('.').map(str::to_string).collect::<Vec<_>>());
        let store = match (&decl.compute, &related) {
            (Some(compute), _) => compute.store,
            (None, Some(_)) => decl.store.unwrap_or(false),
            (None, None) => decl.field_type != FieldType::One2many,
        };
        let required = decl.required.unwrap_or(false);
        let readonly = decl.readonly.unwrap_or_else(|| {
            decl.compute
                .as_ref()
                .is_some_and(|c| c.inverse.is_none())
        });
        let ondelete = decl.ondelete.unwrap_or(if required && decl.field_type == FieldType::Many2one {
            OnDelete::Restrict
        } else {
            OnDelete::SetNull
        });
        let relation_table = match (decl.field_type, &decl.relation_table, &decl.comodel) {
            (FieldType::Many2many, None, Some(comodel)) => Some(default_relation_table(model, comodel)),
            (_, table, _) => table.clone(),
        };
        Self {
            name: decl.name.clone(),
            model: model.to_string(),
            field_type: decl.field_type,
            string: decl.string.clone().unwrap_or_else(|| default_label(&decl.name)),
            help: decl.help.clone(),
            required,
            readonly,
            index: decl.index.unwrap_or(false),
            translate: decl.translate.unwrap_or(false),
            groups: decl.groups.clone(),
            default: decl.default.clone(),
            domain: decl.domain.clone(),
            comodel: decl.comodel.clone(),
            inverse_name: decl.inverse_name.clone(),
            relation_table,
            ondelete,
            selection: decl
                .selection
                .iter()
                .chain(decl.selection_add.iter())
                .map(|(value, label)| SelectionOption {
                    value: value.clone(),
                    label: label.clone(),
                    module: module.to_string(),
                })
                .collect(),
            compute: decl.compute.clone(),
            related,
            store,
            inherited: false,
            inherited_from: None,
            modules: vec![module.to_string()],
        }
    }

    /// Merges a later module's declaration into this descriptor.
    pub(crate) fn merge(&mut self, decl: &FieldDecl, module: &str) -> Result<(), CoreError> {
        let incompatible = |reason: String| CoreError::IncompatibleFieldDeclaration {
            model: self.model.clone(),
            field: self.name.clone(),
            module: module.to_string(),
            reason,
        };

        if decl.related.is_none() && self.related.is_none() && decl.field_type != self.field_type {
            return Err(incompatible(format!(
                "type changed from {} to {}",
                self.field_type, decl.field_type
            )));
        }
        if let (Some(new), Some(old)) = (&decl.comodel, &self.comodel) {
            if new != old {
                return Err(incompatible(format!("comodel changed from {} to {}", old, new)));
            }
        }
        if decl.required == Some(true) && !self.required {
            return Err(incompatible("cannot narrow an optional field to required".to_string()));
        }

        if decl.required == Some(false) {
            self.required = false;
        }
        if let Some(readonly) = decl.readonly {
            self.readonly = readonly;
        }
        if let Some(index) = decl.index {
            self.index = index;
        }
        if let Some(translate) = decl.translate {
            self.translate = translate;
        }
        if let Some(string) = &decl.string {
            self.string = string.clone();
        }
        if decl.help.is_some() {
            self.help = decl.help.clone();
        }
        if decl.default.is_some() {
            self.default = decl.default.clone();
        }
        if decl.domain.is_some() {
            self.domain = decl.domain.clone();
        }
        if let Some(ondelete) = decl.ondelete {
            self.ondelete = ondelete;
        }
        if self.comodel.is_none() {
            self.comodel = decl.comodel.clone();
        }
        if decl.inverse_name.is_some() {
            self.inverse_name = decl.inverse_name.clone();
        }
        for group in &decl.groups {
            if !self.groups.contains(group) {
                self.groups.push(group.clone());
            }
        }
        if !decl.selection.is_empty() {
            let previous = std::mem::take(&mut self.selection);
            self.selection = decl
                .selection
                .iter()
                .map(|(value, label)| SelectionOption {
                    value: value.clone(),
                    label: label.clone(),
                    module: previous
                        .iter()
                        .find(|o| &o.value == value)
                        .map(|o| o.module.clone())
                        .unwrap_or_else(|| module.to_string()),
                })
                .collect();
        }
        for (value, label) in &decl.selection_add {
            match self.selection.iter_mut().find(|o| &o.value == value) {
                Some(option) => option.label = label.clone(),
                None => self.selection.push(SelectionOption {
                    value: value.clone(),
                    label: label.clone(),
                    module: module.to_string(),
                }),
            }
        }
        if let Some(compute) = &decl.compute {
            self.store = compute.store;
            self.compute = Some(compute.clone());
        }
        if let Some(path) = &decl.related {
            self.related = Some(path.split('.').map(str::to_string).collect());
            self.store = decl.store.unwrap_or(false);
        } else if let Some(store) = decl.store {
            if self.related.is_some() || self.compute.is_some() {
                self.store = store;
            }
        }
        if !self.modules.iter().any(|m| m == module) {
            self.modules.push(module.to_string());
        }
        Ok(())
    }

    /// Whether the field is computed (explicitly or as a related field).
    pub fn is_computed(&self) -> bool {
        self.compute.is_some() || self.related.is_some()
    }

    /// Whether the value lives in the model's table.
    pub fn is_stored(&self) -> bool {
        self.store
    }

    /// Whether `value` is one of the selection values.
    pub fn accepts_selection(&self, value: &str) -> bool {
        self.selection.iter().any(|o| o.value == value)
    }

    /// Client-facing description used by assembled views.
    pub fn describe(&self) -> Value {
        let mut desc = json!({
            "type": self.field_type.as_str(),
            "string": self.string,
            "required": self.required,
            "readonly": self.readonly,
            "store": self.store,
        });
        if let Some(comodel) = &self.comodel {
            desc["relation"] = json!(comodel);
        }
        if let Some(help) = &self.help {
            desc["help"] = json!(help);
        }
        if let Some(domain) = &self.domain {
            desc["domain"] = json!(domain);
        }
        if !self.selection.is_empty() {
            desc["selection"] = Value::Array(
                self.selection
                    .iter()
                    .map(|o| json!([o.value, o.label]))
                    .collect(),
            );
        }
        if let Some(related) = &self.related {
            desc["related"] = json!(related.join("."));
        }
        desc
    }
}

/// Splits a comma-separated list, dropping blanks.
pub(crate) fn split_list(text: &str) -> Vec<String> {
    text.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Label derived from a field name: `partner_id` becomes `Partner`.
fn default_label(name: &str) -> String {
    let base = name
        .strip_suffix("_ids")
        .or_else(|| name.strip_suffix("_id"))
        .unwrap_or(name);
    base.split('_')
        .filter(|w| !w.is_empty())
        .enumerate()
        .map(|(i, word)| {
            if i == 0 {
                let mut chars = word.chars();
                match chars.next() {
                    Some(first) => first.to_uppercase().chain(chars).collect(),
                    None => String::new(),
                }
            } else {
                word.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Default many2many relation table name.
fn default_relation_table(model: &str, comodel: &str) -> String {
    let mut tables = [model.replace('.', "_"), comodel.replace('.', "_")];
    tables.sort();
    format!("{}_{}_rel", tables[0], tables[1])
}
