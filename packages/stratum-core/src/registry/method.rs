//! Method override chains.
//!
//! Each module may contribute an override of a model method. Overrides are
//! stored oldest first; a call runs the newest one, which reaches the older
//! ones through [`Call::super_call`].

use serde_json::Value;

use crate::error::CoreError;
use crate::registry::Registry;
use crate::store::{Record, RecordId, Store};

/// Method body.
pub type MethodFn = fn(&Call<'_>, Value) -> Result<Value, CoreError>;

/// One module's implementation of a method.
#[derive(Debug, Clone)]
pub struct MethodOverride {
    pub module: String,
    pub func: MethodFn,
}

/// All overrides of one method, oldest first.
#[derive(Debug, Clone, Default)]
pub struct MethodChain {
    overrides: Vec<MethodOverride>,
}

impl MethodChain {
    pub(crate) fn push(&mut self, module: &str, func: MethodFn) {
        self.overrides.push(MethodOverride {
            module: module.to_string(),
            func,
        });
    }

    /// Overrides, oldest first.
    pub fn overrides(&self) -> &[MethodOverride] {
        &self.overrides
    }

    /// Modules contributing an override, oldest first.
    pub fn modules(&self) -> Vec<&str> {
        self.overrides.iter().map(|o| o.module.as_str()).collect()
    }
}

/// Invocation context handed to a method body.
#[derive(Clone, Copy)]
pub struct Call<'a> {
    pub model: &'a str,
    pub method: &'a str,
    pub registry: &'a Registry,
    pub store: &'a Store,
    pub uid: RecordId,
    remaining: &'a [MethodOverride],
}

impl<'a> Call<'a> {
    /// Runs the newest override of `chain`.
    pub(crate) fn invoke(
        chain: &'a MethodChain,
        model: &'a str,
        method: &'a str,
        registry: &'a Registry,
        store: &'a Store,
        uid: RecordId,
        args: Value,
    ) -> Result<Value, CoreError> {
        let call = Call {
            model,
            method,
            registry,
            store,
            uid,
            remaining: &chain.overrides,
        };
        call.super_call(args)
    }

    /// Runs the next-older override.
    pub fn super_call(&self, args: Value) -> Result<Value, CoreError> {
        let Some((last, rest)) = self.remaining.split_last() else {
            return Err(CoreError::UnknownMethod {
                model: self.model.to_string(),
                method: format!("{} (no parent implementation)", self.method),
            });
        };
        let next = Call {
            remaining: rest,
            ..*self
        };
        (last.func)(&next, args)
    }

    /// Stored record of the called model.
    pub fn record(&self, id: RecordId) -> Result<&'a Record, CoreError> {
        self.store
            .table(self.model)
            .and_then(|t| t.get(id))
            .ok_or_else(|| CoreError::RecordNotFound {
                model: self.model.to_string(),
                id,
            })
    }

    /// Stored records of `model`.
    pub fn records_of(&self, model: &str) -> Vec<&'a Record> {
        self.store
            .table(model)
            .map(|t| t.iter().collect())
            .unwrap_or_default()
    }
}

/// Ids passed as `{"ids": [...]}`.
pub fn ids_arg(args: &Value) -> Vec<RecordId> {
    args.get("ids")
        .and_then(Value::as_array)
        .map(|ids| ids.iter().filter_map(Value::as_u64).collect())
        .unwrap_or_default()
}
