//! Validation of composed architectures against the registry.

use crate::domain::Domain;
use crate::error::CoreError;
use crate::expr::free_names;
use crate::registry::Registry;
use crate::store::Store;
use crate::xml::Element;

/// Names every client-side expression may use besides fields.
const EVAL_BUILTINS: &[&str] = &[
    "uid",
    "context",
    "parent",
    "id",
    "active_id",
    "active_ids",
    "active_model",
    "context_today",
    "current_date",
    "today",
    "now",
    "time",
    "datetime",
    "relativedelta",
    "user",
    "ref",
    "allowed_company_ids",
];

/// Boolean attributes that may hold an expression.
const MODIFIERS: &[&str] = &["invisible", "readonly", "required", "column_invisible"];

/// Checks a composed arch of a `view_type` view on `model`.
///
/// # Arguments
/// * `arch` - composed tree, after gating
/// * `view` - label used in errors
pub fn validate_arch(
    arch: &Element,
    model: &str,
    view_type: &str,
    registry: &Registry,
    store: &Store,
    view: &str,
) -> Result<(), CoreError> {
    let validator = Validator { registry, store, view };
    if view_type == "qweb" {
        return Ok(());
    }
    let root_ok = arch.tag == view_type || (view_type == "list" && arch.tag == "tree");
    if !root_ok {
        return Err(validator.error(format!(
            "root element <{}> does not match view type '{}'",
            arch.tag, view_type
        )));
    }
    registry.model(model)?;
    validator.check(arch, model)
}

struct Validator<'a> {
    registry: &'a Registry,
    store: &'a Store,
    view: &'a str,
}

impl Validator<'_> {
    fn error(&self, message: String) -> CoreError {
        CoreError::ValidationError {
            view: self.view.to_string(),
            message,
        }
    }

    fn check(&self, el: &Element, model: &str) -> Result<(), CoreError> {
        let mut child_model = model.to_string();
        match el.tag.as_str() {
            "field" => {
                let name = el
                    .attr("name")
                    .ok_or_else(|| self.error(format!("line {}: <field> without name", el.line)))?;
                let field = self.registry.field(model, name).map_err(|_| {
                    self.error(format!("line {}: field '{}' does not exist in model '{}'", el.line, name, model))
                })?;
                if let Some(comodel) = &field.comodel {
                    if let Some(domain) = el.attr("domain") {
                        self.check_domain(domain, comodel, model, el)?;
                    }
                    child_model = comodel.clone();
                }
            }
            "filter" => {
                if let Some(domain) = el.attr("domain") {
                    self.check_domain(domain, model, model, el)?;
                }
            }
            "button" => self.check_button(el, model)?,
            _ => {}
        }

        if let Some(context) = el.attr("context") {
            self.check_names(context, model, el, "context")?;
        }
        for modifier in MODIFIERS {
            if let Some(expr) = el.attr(modifier) {
                if !matches!(expr.trim(), "0" | "1" | "True" | "False" | "true" | "false") {
                    self.check_names(expr, model, el, modifier)?;
                }
            }
        }
        for child in el.child_elements() {
            self.check(child, &child_model)?;
        }
        Ok(())
    }

    fn check_button(&self, el: &Element, model: &str) -> Result<(), CoreError> {
        let name = el.attr("name").unwrap_or_default();
        match el.attr("type") {
            Some("object") => {
                if name.starts_with('_') {
                    return Err(self.error(format!(
                        "line {}: private method '{}' cannot be called from a button",
                        el.line, name
                    )));
                }
                if !self.registry.has_method(model, name) {
                    return Err(self.error(format!(
                        "line {}: '{}' is not a valid action on '{}'",
                        el.line, name, model
                    )));
                }
            }
            Some("action") => {
                let xmlid = name
                    .strip_prefix("%(")
                    .and_then(|s| s.strip_suffix(")d"))
                    .unwrap_or(name);
                let found = match xmlid.parse::<u64>() {
                    Ok(id) => self.store.exists("ir.actions.act_window", id),
                    Err(_) => self.store.xmlid(xmlid).is_some(),
                };
                if !found {
                    return Err(self.error(format!(
                        "line {}: action '{}' does not exist",
                        el.line, xmlid
                    )));
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// Domain paths resolve on `target`; operand names on `model`.
    fn check_domain(&self, source: &str, target: &str, model: &str, el: &Element) -> Result<(), CoreError> {
        let domain = Domain::parse(source)
            .map_err(|e| self.error(format!("line {}: invalid domain {}: {}", el.line, source, e)))?;
        for path in domain.field_paths() {
            if path == "id" {
                continue;
            }
            let segments: Vec<&str> = path.split('.').collect();
            self.registry.field_at_path(target, &segments).map_err(|_| {
                self.error(format!(
                    "line {}: domain {} uses unknown field '{}' of model '{}'",
                    el.line, source, path, target
                ))
            })?;
        }
        for name in domain.operand_names() {
            let first = name.split('.').next().unwrap_or(&name);
            self.check_name(first, model, el, "domain")?;
        }
        Ok(())
    }

    fn check_names(&self, source: &str, model: &str, el: &Element, attr: &str) -> Result<(), CoreError> {
        let names = free_names(source)
            .map_err(|e| self.error(format!("line {}: invalid {} {}: {}", el.line, attr, source, e)))?;
        for name in names {
            self.check_name(&name, model, el, attr)?;
        }
        Ok(())
    }

    fn check_name(&self, name: &str, model: &str, el: &Element, attr: &str) -> Result<(), CoreError> {
        if EVAL_BUILTINS.contains(&name) || self.registry.field(model, name).is_ok() {
            return Ok(());
        }
        Err(self.error(format!(
            "line {}: {} of {} uses '{}' which is not a field of '{}'",
            el.line,
            attr,
            el.describe(),
            name,
            model
        )))
    }
}
