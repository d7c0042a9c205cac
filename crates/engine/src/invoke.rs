//! Function invocation
//!
//! Wraps [`Sandbox::execute`] with everything the query path expects
//! around a call: the column storage contract on arguments, the NULL
//! policy, argument type checks and return normalization.

use ferrule_core::{Error, NullPolicy, Result, Value};
use ferrule_marshal::column;
use ferrule_sandbox::{PreparedFunction, Sandbox};
use std::sync::Arc;
use tracing::debug;

/// Runs prepared functions through the sandbox
#[derive(Debug, Clone)]
pub struct Invoker {
    sandbox: Arc<Sandbox>,
}

impl Invoker {
    /// Invoker over a shared sandbox
    pub fn new(sandbox: Arc<Sandbox>) -> Self {
        Self { sandbox }
    }

    /// The underlying sandbox
    pub fn sandbox(&self) -> &Arc<Sandbox> {
        &self.sandbox
    }

    /// Call a function with decoded arguments
    ///
    /// # Errors
    ///
    /// - `TypeMismatch` for a wrong number of arguments
    /// - `Marshal` / `TypeMismatch` for an argument or result that does not fit its type
    /// - `ExecutionFault` / `ExecutionTimeout` from the body
    pub fn execute(&self, function: &PreparedFunction, args: Vec<Value>) -> Result<Value> {
        let def = &function.definition;
        if args.len() != def.arg_types.len() {
            return Err(Error::type_mismatch(
                format!("{} arguments", def.arg_types.len()),
                format!("{} arguments", args.len()),
            ));
        }

        let args: Vec<Value> = args
            .into_iter()
            .zip(&def.arg_types)
            .map(|(value, ty)| column::normalize(value, ty))
            .collect();

        if def.null_policy == NullPolicy::ReturnsNullOnNull && args.iter().any(Value::is_null) {
            debug!(
                target: "ferrule::engine",
                function = %def.key(),
                "NULL argument, body skipped"
            );
            return Ok(Value::Null);
        }

        for (value, ty) in args.iter().zip(&def.arg_types) {
            ferrule_marshal::encode(value, ty)?;
        }

        let result = self.sandbox.execute(function, args)?;
        ferrule_marshal::encode(&result, &def.return_type)?;
        Ok(column::normalize(result, &def.return_type))
    }

    /// Call a function with serialized cells, returning a serialized cell
    ///
    /// `None` is a NULL cell.
    pub fn execute_serialized(
        &self,
        function: &PreparedFunction,
        args: Vec<Option<Vec<u8>>>,
    ) -> Result<Option<Vec<u8>>> {
        let def = &function.definition;
        if args.len() != def.arg_types.len() {
            return Err(Error::type_mismatch(
                format!("{} arguments", def.arg_types.len()),
                format!("{} arguments", args.len()),
            ));
        }
        let decoded = args
            .iter()
            .zip(&def.arg_types)
            .map(|(cell, ty)| column::load(cell.as_deref(), ty))
            .collect::<Result<Vec<Value>>>()?;
        let result = self.execute(function, decoded)?;
        column::store(&result, &def.return_type)
    }
}
