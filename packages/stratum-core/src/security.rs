//! Group membership, model access rights and record rules.

use std::collections::BTreeSet;

use crate::domain::Domain;
use crate::error::CoreError;
use crate::store::RecordId;
use crate::transaction::{Reader, SUPERUSER_ID};

/// Operation checked against access rights and record rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Read,
    Write,
    Create,
    Unlink,
}

impl Operation {
    /// Name of the `perm_*` flag on `ir.model.access` and `ir.rule`.
    pub fn perm_field(&self) -> &'static str {
        match self {
            Operation::Read => "perm_read",
            Operation::Write => "perm_write",
            Operation::Create => "perm_create",
            Operation::Unlink => "perm_unlink",
        }
    }

    pub fn parse(text: &str) -> Option<Self> {
        match text {
            "read" => Some(Operation::Read),
            "write" => Some(Operation::Write),
            "create" => Some(Operation::Create),
            "unlink" => Some(Operation::Unlink),
            _ => None,
        }
    }
}

/// Groups of a user: direct `groups_id` closed over `implied_ids`.
pub fn user_groups(reader: &Reader<'_>, uid: RecordId) -> BTreeSet<RecordId> {
    let mut groups = BTreeSet::new();
    let Some(user) = reader.store.record("res.users", uid) else {
        return groups;
    };
    let mut stack = user.get_ids("groups_id");
    while let Some(group) = stack.pop() {
        if !groups.insert(group) {
            continue;
        }
        if let Some(record) = reader.store.record("res.groups", group) {
            stack.extend(record.get_ids("implied_ids"));
        }
    }
    groups
}

/// Resolves a group external id to its record id.
pub fn group_id(reader: &Reader<'_>, xmlid: &str) -> Result<RecordId, CoreError> {
    match reader.store.xmlid(xmlid) {
        Some(x) if x.model == "res.groups" => Ok(x.res_id),
        _ => Err(CoreError::UnknownGroup {
            group: xmlid.to_string(),
            context: "group lookup".to_string(),
        }),
    }
}

pub fn has_group(reader: &Reader<'_>, uid: RecordId, xmlid: &str) -> Result<bool, CoreError> {
    let group = group_id(reader, xmlid)?;
    Ok(user_groups(reader, uid).contains(&group))
}

/// Evaluates a `groups` expression: comma-separated group external ids,
/// each optionally negated with `!`. Any negated group the user belongs to
/// denies; otherwise one positive match grants. An expression with only
/// negations grants.
pub fn groups_match(reader: &Reader<'_>, groups: &BTreeSet<RecordId>, expr: &str) -> Result<bool, CoreError> {
    let mut positive = Vec::new();
    for item in expr.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        match item.strip_prefix('!') {
            Some(negated) => {
                if groups.contains(&group_id(reader, negated.trim())?) {
                    return Ok(false);
                }
            }
            None => positive.push(group_id(reader, item)?),
        }
    }
    Ok(positive.is_empty() || positive.iter().any(|g| groups.contains(g)))
}

/// Record id of the `ir.model` entry for `model`.
fn model_record(reader: &Reader<'_>, model: &str) -> Option<RecordId> {
    reader
        .store
        .table("ir.model")?
        .iter()
        .find(|r| r.get_str("model") == Some(model))
        .map(|r| r.id)
}

/// Whether `uid` may perform `operation` on `model`.
///
/// Granted when an `ir.model.access` entry for the model with the matching
/// `perm_*` flag has no group or a group of the user. The superuser always
/// passes; a model without entries denies everybody else.
pub fn check_access(reader: &Reader<'_>, model: &str, uid: RecordId, operation: Operation) -> bool {
    if uid == SUPERUSER_ID {
        return true;
    }
    let (Some(model_id), Some(table)) = (model_record(reader, model), reader.store.table("ir.model.access")) else {
        return false;
    };
    let groups = user_groups(reader, uid);
    let granted = table.iter().any(|rule| {
        rule.get_id("model_id") == Some(model_id)
            && rule.get_bool(operation.perm_field())
            && rule.get_id("group_id").map_or(true, |g| groups.contains(&g))
    });
    if !granted {
        tracing::debug!(model, uid, operation = operation.perm_field(), "access denied");
    }
    granted
}

/// Like [`check_access`], failing with `AccessDenied`.
pub fn require_access(reader: &Reader<'_>, model: &str, uid: RecordId, operation: Operation) -> Result<(), CoreError> {
    if check_access(reader, model, uid, operation) {
        return Ok(());
    }
    Err(CoreError::AccessDenied {
        message: format!(
            "user {} may not {} records of '{}'",
            uid,
            operation.perm_field().trim_start_matches("perm_"),
            model
        ),
    })
}

/// Record rule domain restricting `uid` on `model`: every global rule, and
/// at least one of the rules of the user's groups when any applies.
pub fn rule_domain(reader: &Reader<'_>, model: &str, uid: RecordId, operation: Operation) -> Result<Domain, CoreError> {
    if uid == SUPERUSER_ID {
        return Ok(Domain::True);
    }
    let (Some(model_id), Some(table)) = (model_record(reader, model), reader.store.table("ir.rule")) else {
        return Ok(Domain::True);
    };
    let groups = user_groups(reader, uid);
    let mut global = Vec::new();
    let mut grouped = Vec::new();
    for rule in table.iter() {
        if rule.get_id("model_id") != Some(model_id) || !rule.get_bool(operation.perm_field()) {
            continue;
        }
        if rule.values.get("active").is_some_and(|v| v == &serde_json::Value::Bool(false)) {
            continue;
        }
        let domain = Domain::parse(rule.get_str("domain_force").unwrap_or("[]"))?;
        let rule_groups = rule.get_ids("groups");
        if rule_groups.is_empty() {
            global.push(domain);
        } else if rule_groups.iter().any(|g| groups.contains(g)) {
            grouped.push(domain);
        }
    }
    if !grouped.is_empty() {
        global.push(Domain::or(grouped));
    }
    Ok(Domain::and(global))
}
