//! Aggregate driver
//!
//! Folds a row stream through an aggregate's state function, then applies
//! the final function. A driver is a plain value: independent aggregate
//! runs never share state.

use crate::invoke::Invoker;
use ferrule_core::{AggregateDefinition, Error, Result, Value};
use ferrule_sandbox::PreparedFunction;
use std::sync::Arc;
use tracing::trace;

/// Where a driver is in its run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregatePhase {
    /// Holding the initial condition, no row seen yet
    Init,
    /// At least one row folded into the state
    Accumulating,
    /// Final function running
    Finalizing,
    /// Result produced
    Done,
}

/// Runs one aggregate over one row stream
#[derive(Debug)]
pub struct AggregateDriver {
    aggregate: Arc<AggregateDefinition>,
    state_function: Arc<PreparedFunction>,
    final_function: Option<Arc<PreparedFunction>>,
    invoker: Invoker,
    state: Value,
    phase: AggregatePhase,
    rows: u64,
}

impl AggregateDriver {
    /// Start a run from the aggregate's initial condition
    pub fn new(
        aggregate: Arc<AggregateDefinition>,
        state_function: Arc<PreparedFunction>,
        final_function: Option<Arc<PreparedFunction>>,
        invoker: Invoker,
    ) -> Self {
        let state = aggregate.initcond.clone();
        Self {
            aggregate,
            state_function,
            final_function,
            invoker,
            state,
            phase: AggregatePhase::Init,
            rows: 0,
        }
    }

    /// Current phase
    pub fn phase(&self) -> AggregatePhase {
        self.phase
    }

    /// Current state value
    pub fn state(&self) -> &Value {
        &self.state
    }

    /// Rows folded so far
    pub fn rows(&self) -> u64 {
        self.rows
    }

    /// Fold one row into the state
    ///
    /// # Errors
    ///
    /// Any invocation error of the state function. The driver should be
    /// discarded afterwards.
    pub fn accumulate(&mut self, row: Vec<Value>) -> Result<()> {
        if matches!(self.phase, AggregatePhase::Finalizing | AggregatePhase::Done) {
            return Err(Error::invalid_definition(
                self.aggregate.key(),
                "aggregate already finished",
            ));
        }
        let mut args = Vec::with_capacity(row.len() + 1);
        args.push(std::mem::replace(&mut self.state, Value::Null));
        args.extend(row);

        self.state = self.invoker.execute(&self.state_function, args)?;
        self.rows += 1;
        self.phase = AggregatePhase::Accumulating;
        Ok(())
    }

    /// Produce the result, applying the final function if there is one
    pub fn finish(&mut self) -> Result<Value> {
        if self.phase == AggregatePhase::Done {
            return Err(Error::invalid_definition(
                self.aggregate.key(),
                "aggregate already finished",
            ));
        }
        self.phase = AggregatePhase::Finalizing;
        let state = std::mem::replace(&mut self.state, Value::Null);
        let result = match &self.final_function {
            Some(f) => self.invoker.execute(f, vec![state])?,
            None => state,
        };
        self.phase = AggregatePhase::Done;
        trace!(
            target: "ferrule::engine",
            aggregate = %self.aggregate.key(),
            rows = self.rows,
            "Aggregate finished"
        );
        Ok(result)
    }

    /// Fold every row in order and finish
    pub fn run<I>(mut self, rows: I) -> Result<Value>
    where
        I: IntoIterator<Item = Vec<Value>>,
    {
        for row in rows {
            self.accumulate(row)?;
        }
        self.finish()
    }
}
