//! Per-invocation execution context
//!
//! An [`ExecutionContext`] is created for exactly one invocation (one
//! aggregate step counts as one invocation). It owns the bound argument
//! values and the deadline and is consumed by [`ExecutionContext::run`],
//! so it cannot be reused or shared.
//!
//! ```text
//! Created -> ArgumentsBound -> Running -> Completed
//!                                      -> Faulted
//!                                      -> TimedOut
//! ```

use crate::limits::Deadline;
use crate::sandbox::PreparedFunction;
use ferrule_core::{Error, Result, Value};
use std::time::Duration;

/// Lifecycle state of an execution context
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionState {
    /// Context exists, no arguments yet
    Created,
    /// Arguments checked against the signature
    ArgumentsBound,
    /// Body is running
    Running,
    /// Body returned a value
    Completed,
    /// Body raised an error, or its result did not fit the return type
    Faulted,
    /// Body exceeded its time budget
    TimedOut,
}

impl ExecutionState {
    /// True for the three final states
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionState::Completed | ExecutionState::Faulted | ExecutionState::TimedOut
        )
    }
}

/// Result of running a context
#[derive(Debug)]
pub struct ExecutionOutcome {
    /// Terminal state reached
    pub state: ExecutionState,
    /// Returned value or error
    pub result: Result<Value>,
}

impl ExecutionOutcome {
    /// Drop the state and keep the result
    pub fn into_result(self) -> Result<Value> {
        self.result
    }
}

/// Context of one invocation
#[derive(Debug)]
pub struct ExecutionContext<'a> {
    function: &'a PreparedFunction,
    state: ExecutionState,
    args: Vec<Value>,
    timeout: Duration,
}

impl<'a> ExecutionContext<'a> {
    /// Create a context for `function` with a wall-clock budget
    pub fn new(function: &'a PreparedFunction, timeout: Duration) -> Self {
        Self {
            function,
            state: ExecutionState::Created,
            args: Vec::new(),
            timeout,
        }
    }

    /// Current state
    pub fn state(&self) -> ExecutionState {
        self.state
    }

    /// Bind argument values
    ///
    /// # Errors
    ///
    /// `InvalidDefinition` if called twice, `TypeMismatch` if the number of
    /// values differs from the function's arity.
    pub fn bind(mut self, args: Vec<Value>) -> Result<Self> {
        let def = &self.function.definition;
        if self.state != ExecutionState::Created {
            return Err(Error::invalid_definition(
                def.key(),
                "arguments are already bound",
            ));
        }
        if args.len() != def.arg_types.len() {
            return Err(Error::type_mismatch(
                format!("{} arguments", def.arg_types.len()),
                format!("{} arguments", args.len()),
            ));
        }
        self.args = args;
        self.state = ExecutionState::ArgumentsBound;
        Ok(self)
    }

    /// Run the body through `invoke` and settle in a terminal state
    ///
    /// Running a context whose arguments were never bound faults without
    /// calling `invoke`.
    pub fn run<F>(mut self, invoke: F) -> ExecutionOutcome
    where
        F: FnOnce(&[Value], Deadline) -> Result<Value>,
    {
        if self.state != ExecutionState::ArgumentsBound {
            return ExecutionOutcome {
                state: ExecutionState::Faulted,
                result: Err(Error::ExecutionFault {
                    function: self.function.definition.key().to_string(),
                    message: format!("cannot run from state {:?}", self.state),
                }),
            };
        }
        self.state = ExecutionState::Running;
        let result = invoke(&self.args, Deadline::after(self.timeout));
        let state = match &result {
            Ok(_) => ExecutionState::Completed,
            Err(Error::ExecutionTimeout { .. }) => ExecutionState::TimedOut,
            Err(_) => ExecutionState::Faulted,
        };
        ExecutionOutcome { state, result }
    }
}
