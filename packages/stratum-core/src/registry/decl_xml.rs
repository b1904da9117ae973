//! Model declarations written as XML files.
//!
//! ```xml
//! <models>
//!   <model name="widget" description="Widget" order="name">
//!     <field name="name" type="char" required="1"/>
//!     <field name="state" type="selection" selection="draft:Draft,done:Done"/>
//!     <inherits model="res.partner" field="partner_id"/>
//!     <constraint name="name_uniq" sql="unique(name)" message="Name must be unique"/>
//!   </model>
//! </models>
//! ```

use serde_json::Value;

use crate::error::CoreError;
use crate::expr::{parse_bool, parse_literal};
use crate::xml::{parse_xml, Element};

use super::field::{split_list, Compute, FieldDecl, FieldType, OnDelete};
use super::model::{ConstraintDecl, ConstraintKind, ModelDecl};

/// Parses every `<model>` element of a declaration file.
pub fn parse_model_file(content: &str, module: &str, file: &str) -> Result<Vec<ModelDecl>, CoreError> {
    let root = parse_xml(content, file).map_err(|e| data_error(module, file, 0, e.to_string()))?;
    let elements: Vec<&Element> = if root.tag == "model" {
        vec![&root]
    } else {
        root.child_elements().filter(|el| el.tag == "model").collect()
    };
    elements
        .into_iter()
        .map(|el| parse_model(el, module, file))
        .collect()
}

fn data_error(module: &str, file: &str, line: usize, message: String) -> CoreError {
    CoreError::DataFile {
        module: module.to_string(),
        file: file.to_string(),
        line,
        message,
    }
}

fn parse_model(el: &Element, module: &str, file: &str) -> Result<ModelDecl, CoreError> {
    let err = |el: &Element, message: String| data_error(module, file, el.line, message);
    let name = el
        .attr("name")
        .ok_or_else(|| err(el, "<model> requires a name".to_string()))?;

    let mut decl = ModelDecl::new(name);
    decl.inherit = el.attr("inherit").map(split_list).unwrap_or_default();
    decl.description = el.attr("description").map(str::to_string);
    decl.order = el.attr("order").map(str::to_string);
    decl.rec_name = el.attr("rec_name").map(str::to_string);
    let extension = decl.is_extension();

    for child in el.child_elements() {
        match child.tag.as_str() {
            "field" => decl
                .fields
                .push(parse_field(child, extension).map_err(|m| err(child, m))?),
            "inherits" => {
                let (Some(parent), Some(field)) = (child.attr("model"), child.attr("field")) else {
                    return Err(err(child, "<inherits> requires model and field".to_string()));
                };
                decl.inherits.push((parent.to_string(), field.to_string()));
            }
            "constraint" => decl.constraints.push(parse_constraint(child).map_err(|m| err(child, m))?),
            other => return Err(err(child, format!("unexpected element <{}> in <model>", other))),
        }
    }
    Ok(decl)
}

/// `<option>` children replace the selection of a new field and extend the
/// selection of a field redeclared by an extension.
fn parse_field(el: &Element, extension: bool) -> Result<FieldDecl, String> {
    let name = el.attr("name").ok_or("<field> requires a name")?;
    let mut decl = match (el.attr("type"), el.attr("related")) {
        (_, Some(path)) => FieldDecl::related(name, path),
        (Some(ty), None) => {
            let field_type = FieldType::parse(ty).ok_or_else(|| format!("unknown field type '{}'", ty))?;
            FieldDecl::new(name, field_type)
        }
        (None, None) => return Err(format!("field '{}' needs a type or a related path", name)),
    };
    if let (Some(ty), Some(_)) = (el.attr("type"), el.attr("related")) {
        decl.field_type = FieldType::parse(ty).ok_or_else(|| format!("unknown field type '{}'", ty))?;
    }

    decl.string = el.attr("string").map(str::to_string);
    decl.help = el.attr("help").map(str::to_string);
    decl.required = el.attr("required").map(parse_bool);
    decl.readonly = el.attr("readonly").map(parse_bool);
    decl.index = el.attr("index").map(parse_bool);
    decl.translate = el.attr("translate").map(parse_bool);
    decl.store = el.attr("store").map(parse_bool);
    decl.groups = el.attr("groups").map(split_list).unwrap_or_default();
    decl.domain = el.attr("domain").map(str::to_string);
    decl.comodel = el.attr("comodel").map(str::to_string);
    decl.inverse_name = el.attr("inverse").map(str::to_string);
    decl.relation_table = el.attr("relation").map(str::to_string);
    decl.default = el.attr("default").map(parse_default);
    if let Some(ondelete) = el.attr("ondelete") {
        decl.ondelete = Some(OnDelete::parse(ondelete).ok_or_else(|| format!("unknown ondelete '{}'", ondelete))?);
    }
    if let Some(options) = el.attr("selection") {
        decl.selection = parse_options(options)?;
    }
    if let Some(options) = el.attr("selection_add") {
        decl.selection_add = parse_options(options)?;
    }
    for option in el.child_elements().filter(|c| c.tag == "option") {
        let value = option.attr("value").ok_or("<option> requires a value")?;
        let label = option.text();
        let label = if label.trim().is_empty() { value.to_string() } else { label.trim().to_string() };
        if extension {
            decl.selection_add.push((value.to_string(), label));
        } else {
            decl.selection.push((value.to_string(), label));
        }
    }
    if let Some(method) = el.attr("compute") {
        decl.compute = Some(Compute {
            method: method.to_string(),
            depends: el.attr("depends").map(split_list).unwrap_or_default(),
            store: decl.store.unwrap_or(false),
            inverse: el.attr("inverse_method").map(str::to_string),
        });
    }
    if decl.field_type.is_relational() && decl.comodel.is_none() && decl.related.is_none() {
        return Err(format!("relational field '{}' requires a comodel", name));
    }
    if decl.field_type == FieldType::One2many && decl.inverse_name.is_none() && decl.related.is_none() {
        return Err(format!("one2many field '{}' requires an inverse", name));
    }
    Ok(decl)
}

/// `default="'draft'"`, `default="1"`, `default="True"`; bare words are strings.
fn parse_default(text: &str) -> Value {
    parse_literal(text)
        .and_then(|lit| lit.to_constant(text))
        .unwrap_or_else(|_| Value::String(text.to_string()))
}

/// `draft:Draft,done:Done`
fn parse_options(text: &str) -> Result<Vec<(String, String)>, String> {
    split_list(text)
        .into_iter()
        .map(|item| match item.split_once(':') {
            Some((value, label)) => Ok((value.trim().to_string(), label.trim().to_string())),
            None => Ok((item.clone(), item.clone())),
        })
        .collect()
}

fn parse_constraint(el: &Element) -> Result<ConstraintDecl, String> {
    let name = el.attr("name").ok_or("<constraint> requires a name")?;
    let kind = match (el.attr("sql"), el.attr("method")) {
        (Some(definition), None) => ConstraintKind::Sql {
            definition: definition.to_string(),
        },
        (None, Some(method)) => ConstraintKind::Check {
            method: method.to_string(),
            fields: el.attr("fields").map(split_list).unwrap_or_default(),
        },
        _ => return Err(format!("constraint '{}' needs exactly one of sql or method", name)),
    };
    Ok(ConstraintDecl {
        name: name.to_string(),
        kind,
        message: el.attr("message").unwrap_or(name).to_string(),
    })
}
