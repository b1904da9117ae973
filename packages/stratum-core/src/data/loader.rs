//! Declarative data files: `<record>`, `<template>` and `<delete>` elements
//! under an `<odoo>` root.

use std::collections::BTreeSet;

use serde_json::{json, Map, Value};

use crate::domain::Domain;
use crate::error::CoreError;
use crate::expr::{parse_bool, parse_literal, Literal};
use crate::module::DataFile;
use crate::registry::{Field, FieldType};
use crate::store::{ExternalId, RecordId};
use crate::transaction::Transaction;
use crate::xml::{self, Element, Node};

/// Whether records are loaded for a first install or a module upgrade.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadMode {
    Install,
    /// Records flagged `noupdate` keep their current values
    Update,
}

/// External ids produced while loading, used to find stale records after
/// an upgrade.
#[derive(Debug, Clone, Default)]
pub struct LoadTracker {
    produced: BTreeSet<String>,
}

impl LoadTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, full_name: String) {
        self.produced.insert(full_name);
    }

    pub fn contains(&self, full_name: &str) -> bool {
        self.produced.contains(full_name)
    }

    pub fn len(&self) -> usize {
        self.produced.len()
    }

    pub fn is_empty(&self) -> bool {
        self.produced.is_empty()
    }
}

/// Loads one data file of `module` into the transaction.
///
/// # Returns
/// The number of records created or updated.
pub fn load_data_file(
    tx: &mut Transaction<'_>,
    module: &str,
    file: &DataFile,
    mode: LoadMode,
    tracker: &mut LoadTracker,
) -> Result<usize, CoreError> {
    let source = format!("{}/{}", module, file.name);
    let root = xml::parse_xml(&file.content, &source)?;
    let mut loader = Loader {
        tx,
        module,
        file: &file.name,
        mode,
        tracker,
        loaded: 0,
    };
    match root.tag.as_str() {
        "odoo" | "openerp" | "data" => {
            let noupdate = root.attr("noupdate").is_some_and(parse_bool);
            loader.load_children(&root, noupdate)?;
        }
        other => return Err(loader.fail(&root, format!("unexpected root element <{}>", other))),
    }
    tracing::debug!(module, file = %file.name, records = loader.loaded, "data file loaded");
    Ok(loader.loaded)
}

struct Loader<'t, 'a> {
    tx: &'t mut Transaction<'a>,
    module: &'t str,
    file: &'t str,
    mode: LoadMode,
    tracker: &'t mut LoadTracker,
    loaded: usize,
}

impl Loader<'_, '_> {
    fn fail(&self, el: &Element, message: String) -> CoreError {
        CoreError::DataFile {
            module: self.module.to_string(),
            file: self.file.to_string(),
            line: el.line,
            message,
        }
    }

    /// Logs an error raised by a record with its location, then returns it.
    fn located(&self, el: &Element, error: CoreError) -> CoreError {
        tracing::error!(
            module = self.module,
            file = self.file,
            line = el.line,
            element = %el.describe(),
            error = %error,
            "failed to load record"
        );
        error
    }

    fn load_children(&mut self, parent: &Element, noupdate: bool) -> Result<(), CoreError> {
        for child in parent.child_elements() {
            match child.tag.as_str() {
                "data" => {
                    let noupdate = child.attr("noupdate").map(parse_bool).unwrap_or(noupdate);
                    self.load_children(child, noupdate)?;
                }
                "record" => self.load_record(child, noupdate).map_err(|e| self.located(child, e))?,
                "template" => self.load_template(child, noupdate).map_err(|e| self.located(child, e))?,
                "delete" => self.load_delete(child).map_err(|e| self.located(child, e))?,
                other => return Err(self.fail(child, format!("unsupported element <{}>", other))),
            }
        }
        Ok(())
    }

    /// `module.name` for a local id; already qualified ids are kept.
    fn qualify(&self, id: &str) -> String {
        if id.contains('.') {
            id.to_string()
        } else {
            format!("{}.{}", self.module, id)
        }
    }

    fn resolve_ref(&self, xmlid: &str) -> Result<RecordId, CoreError> {
        let full = self.qualify(xmlid.trim());
        self.tx
            .store()
            .xmlid(&full)
            .map(|x| x.res_id)
            .ok_or(CoreError::UnknownExternalId { xmlid: full })
    }

    fn load_record(&mut self, el: &Element, noupdate: bool) -> Result<(), CoreError> {
        let model = el
            .attr("model")
            .ok_or_else(|| self.fail(el, "<record> without model".to_string()))?
            .to_string();
        self.tx.registry().model(&model)?;
        let mut values = Map::new();
        for field_el in el.child_elements() {
            if field_el.tag != "field" {
                return Err(self.fail(field_el, format!("unexpected <{}> inside <record>", field_el.tag)));
            }
            let name = field_el
                .attr("name")
                .ok_or_else(|| self.fail(field_el, "<field> without name".to_string()))?;
            let value = self.field_value(&model, name, field_el)?;
            values.insert(name.to_string(), value);
        }
        // views declared with a parent extend it unless told otherwise
        if model == "ir.ui.view" && values.get("inherit_id").is_some_and(|v| !v.is_null()) {
            values.entry("mode").or_insert_with(|| json!("extension"));
        }
        let xmlid = el.attr("id").map(|id| self.qualify(id));
        self.upsert(&model, xmlid, values, noupdate)
    }

    fn load_template(&mut self, el: &Element, noupdate: bool) -> Result<(), CoreError> {
        let id = el
            .attr("id")
            .ok_or_else(|| self.fail(el, "<template> without id".to_string()))?;
        let full = self.qualify(id);
        let content = Element {
            children: el.children.clone(),
            ..Element::new("t")
        };
        let mut values = Map::new();
        values.insert("name".to_string(), json!(el.attr("name").unwrap_or(id)));
        values.insert("type".to_string(), json!("qweb"));
        values.insert("key".to_string(), json!(full));
        match el.attr("inherit_id") {
            Some(parent) => {
                let arch = Element {
                    tag: "data".to_string(),
                    ..content
                };
                values.insert("arch".to_string(), json!(xml::to_string(&arch)));
                values.insert("inherit_id".to_string(), json!(self.resolve_ref(parent)?));
                let primary = el.attr("primary").is_some_and(parse_bool);
                values.insert("mode".to_string(), json!(if primary { "primary" } else { "extension" }));
            }
            None => {
                let arch = content.with_attr("t-name", &full);
                values.insert("arch".to_string(), json!(xml::to_string(&arch)));
            }
        }
        if let Some(priority) = el.attr("priority") {
            let priority: i64 = priority
                .trim()
                .parse()
                .map_err(|_| self.fail(el, format!("invalid priority '{}'", priority)))?;
            values.insert("priority".to_string(), json!(priority));
        }
        if let Some(active) = el.attr("active") {
            values.insert("active".to_string(), json!(parse_bool(active)));
        }
        self.upsert("ir.ui.view", Some(full), values, noupdate)
    }

    fn load_delete(&mut self, el: &Element) -> Result<(), CoreError> {
        let model = el
            .attr("model")
            .ok_or_else(|| self.fail(el, "<delete> without model".to_string()))?;
        let ids = match (el.attr("id"), el.attr("search")) {
            (Some(id), _) => {
                let full = self.qualify(id);
                match self.tx.store().xmlid(&full) {
                    Some(x) if self.tx.exists(model, x.res_id) => vec![x.res_id],
                    _ => {
                        tracing::debug!(xmlid = %full, "nothing to delete");
                        Vec::new()
                    }
                }
            }
            (None, Some(search)) => self.tx.search(model, &Domain::parse(search)?, None, 0, None)?,
            (None, None) => return Err(self.fail(el, "<delete> needs an id or a search".to_string())),
        };
        if !ids.is_empty() {
            self.tx.unlink(model, &ids)?;
        }
        Ok(())
    }

    /// Creates or updates the record behind `xmlid`.
    fn upsert(
        &mut self,
        model: &str,
        xmlid: Option<String>,
        values: Map<String, Value>,
        noupdate: bool,
    ) -> Result<(), CoreError> {
        let existing = xmlid
            .as_deref()
            .and_then(|name| self.tx.store().xmlid(name))
            .filter(|x| x.model == model && self.tx.exists(model, x.res_id))
            .map(|x| x.res_id);
        match existing {
            Some(_) if noupdate && self.mode == LoadMode::Update => {}
            Some(id) => {
                self.tx.write(model, &[id], Value::Object(values))?;
                self.loaded += 1;
            }
            None => {
                let id = self.tx.create(model, Value::Object(values))?;
                if let Some(name) = &xmlid {
                    let local = name
                        .strip_prefix(&format!("{}.", self.module))
                        .unwrap_or(name.as_str());
                    let mut external = ExternalId::new(self.module, local, model, id);
                    external.noupdate = noupdate;
                    self.tx.store_mut().set_xmlid(external);
                }
                self.loaded += 1;
            }
        }
        if let Some(name) = xmlid {
            self.tracker.insert(name);
        }
        Ok(())
    }

    fn field_value(&self, model: &str, name: &str, el: &Element) -> Result<Value, CoreError> {
        let registry = self.tx.registry();
        let field = registry.field(model, name)?;
        if let Some(xmlid) = el.attr("ref") {
            let id = self.resolve_ref(xmlid)?;
            return Ok(if field.field_type.is_x2many() { json!([id]) } else { json!(id) });
        }
        if let Some(source) = el.attr("eval") {
            return self.eval(source);
        }
        let as_xml = el.attr("type") == Some("xml") || (model == "ir.ui.view" && name == "arch");
        if as_xml {
            return Ok(json!(inner_xml(el)));
        }
        self.convert_text(field, el)
    }

    /// Evaluates an `eval` attribute: literals plus `ref('xmlid')`.
    fn eval(&self, source: &str) -> Result<Value, CoreError> {
        let literal = parse_literal(source)?;
        literal.to_json(&mut |lit| match lit {
            Literal::Call(name, args) if name == "ref" => match args.as_slice() {
                [Literal::Str(xmlid)] => Ok(json!(self.resolve_ref(xmlid)?)),
                _ => Err(CoreError::BadExpression {
                    expr: source.to_string(),
                    reason: "ref() takes one string".to_string(),
                }),
            },
            other => Err(CoreError::BadExpression {
                expr: source.to_string(),
                reason: format!("cannot evaluate {:?} in a data file", other),
            }),
        })
    }

    fn convert_text(&self, field: &Field, el: &Element) -> Result<Value, CoreError> {
        let raw = el.text();
        let text = raw.trim();
        let invalid = || self.fail(el, format!("invalid {} value '{}' for field '{}'", field.field_type, text, field.name));
        if text.is_empty() && !matches!(field.field_type, FieldType::Char | FieldType::Text | FieldType::Html) {
            return Ok(Value::Null);
        }
        Ok(match field.field_type {
            FieldType::Boolean => json!(parse_bool(text)),
            FieldType::Integer => json!(text.parse::<i64>().map_err(|_| invalid())?),
            FieldType::Float | FieldType::Monetary => json!(text.parse::<f64>().map_err(|_| invalid())?),
            FieldType::Many2one => json!(self.resolve_ref(text)?),
            FieldType::Many2many => {
                let mut ids = Vec::new();
                for xmlid in text.split(',').filter(|s| !s.trim().is_empty()) {
                    ids.push(self.resolve_ref(xmlid)?);
                }
                json!(ids)
            }
            FieldType::Text | FieldType::Html => json!(raw),
            _ => json!(text),
        })
    }
}

/// Serialized children of an element, text included.
fn inner_xml(el: &Element) -> String {
    let mut out = String::new();
    for child in &el.children {
        match child {
            Node::Element(e) => out.push_str(&xml::to_string(e)),
            Node::Text(t) if !t.trim().is_empty() => out.push_str(t.trim()),
            _ => {}
        }
    }
    out
}
