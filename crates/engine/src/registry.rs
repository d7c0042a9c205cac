//! Function registry
//!
//! Holds every prepared function and every aggregate, keyed by
//! `(keyspace, name, signature)`. Functions and aggregates share one
//! namespace. Aggregates refer to their state and final functions by key
//! only, so replacing a function is picked up by every aggregate using it.
//!
//! ## Concurrency
//!
//! One `RwLock` around both maps. Readers clone `Arc`s out and drop the
//! lock before running anything; writers publish whole entries.

use ferrule_core::{
    AggregateDefinition, CqlType, Error, FunctionKey, FunctionName, Result, RoutineKind,
};
use ferrule_sandbox::PreparedFunction;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

/// What to do with aggregates when a function they use is dropped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DropPolicy {
    /// Refuse the drop with `DependentAggregateExists`
    #[default]
    Reject,
    /// Drop the dependent aggregates too
    Cascade,
}

/// A registered function or aggregate
#[derive(Debug, Clone)]
pub enum Routine {
    /// Scalar function
    Function(Arc<PreparedFunction>),
    /// Aggregate
    Aggregate(Arc<AggregateDefinition>),
}

impl Routine {
    /// Identity
    pub fn key(&self) -> FunctionKey {
        match self {
            Routine::Function(f) => f.definition.key(),
            Routine::Aggregate(a) => a.key(),
        }
    }

    /// Function or aggregate
    pub fn kind(&self) -> RoutineKind {
        match self {
            Routine::Function(_) => RoutineKind::Function,
            Routine::Aggregate(_) => RoutineKind::Aggregate,
        }
    }
}

/// Result of a successful function drop
#[derive(Debug, Clone)]
pub struct DroppedFunction {
    /// The removed function
    pub function: Arc<PreparedFunction>,
    /// Aggregates removed with it under [`DropPolicy::Cascade`]
    pub cascaded: Vec<Arc<AggregateDefinition>>,
}

#[derive(Debug, Default)]
struct Schema {
    functions: HashMap<FunctionKey, Arc<PreparedFunction>>,
    aggregates: HashMap<FunctionKey, Arc<AggregateDefinition>>,
}

impl Schema {
    fn function(&self, key: &FunctionKey) -> Result<&Arc<PreparedFunction>> {
        self.functions.get(key).ok_or_else(|| Error::NotFound {
            kind: RoutineKind::Function.as_str(),
            name: key.to_string(),
        })
    }

    fn dependents(&self, key: &FunctionKey) -> Vec<Arc<AggregateDefinition>> {
        let mut out: Vec<Arc<AggregateDefinition>> = self
            .aggregates
            .values()
            .filter(|a| a.depends_on(key))
            .cloned()
            .collect();
        out.sort_by_key(|a| a.key().to_string());
        out
    }

    /// Aggregate invariants against the current functions
    fn check_aggregate_invariants(&self, agg: &AggregateDefinition) -> Result<CqlType> {
        let invalid = |reason: String| Error::InvalidDefinition {
            name: agg.key().to_string(),
            reason,
        };

        let sfunc = self.function(&agg.state_function_key())?;
        let sfunc_returns = &sfunc.definition.return_type;
        if !sfunc_returns.matches(&agg.state_type) {
            return Err(invalid(format!(
                "state function {} returns {}, expected state type {}",
                agg.state_function_key(),
                sfunc_returns,
                agg.state_type
            )));
        }

        let return_type = match agg.final_function_key() {
            Some(fkey) => self.function(&fkey)?.definition.return_type.clone(),
            None => agg.state_type.clone(),
        };

        ferrule_marshal::encode(&agg.initcond, &agg.state_type).map_err(|e| {
            invalid(format!(
                "initial condition is not a valid {}: {}",
                agg.state_type, e
            ))
        })?;
        Ok(return_type)
    }

    fn check_function(&self, function: &PreparedFunction, replace: bool) -> Result<bool> {
        let key = function.definition.key();
        if self.aggregates.contains_key(&key) {
            return Err(Error::AlreadyExists {
                kind: RoutineKind::Aggregate.as_str(),
                name: key.to_string(),
            });
        }
        let exists = self.functions.contains_key(&key);
        if exists && !replace {
            return Err(Error::AlreadyExists {
                kind: RoutineKind::Function.as_str(),
                name: key.to_string(),
            });
        }
        // Replacing keeps the key, so only the state function's return type can break
        let returns = &function.definition.return_type;
        for agg in self.dependents(&key) {
            if agg.state_function_key() == key && !returns.matches(&agg.state_type) {
                return Err(Error::InvalidDefinition {
                    name: key.to_string(),
                    reason: format!(
                        "aggregate {} needs a state function returning {}",
                        agg.key(),
                        agg.state_type
                    ),
                });
            }
        }
        Ok(exists)
    }

    fn check_aggregate_define(&self, agg: &AggregateDefinition, replace: bool) -> Result<CqlType> {
        let key = agg.key();
        if self.functions.contains_key(&key) {
            return Err(Error::AlreadyExists {
                kind: RoutineKind::Function.as_str(),
                name: key.to_string(),
            });
        }
        if self.aggregates.contains_key(&key) && !replace {
            return Err(Error::AlreadyExists {
                kind: RoutineKind::Aggregate.as_str(),
                name: key.to_string(),
            });
        }
        self.check_aggregate_invariants(agg)
    }

    fn routine(&self, key: &FunctionKey) -> Option<Routine> {
        if let Some(f) = self.functions.get(key) {
            return Some(Routine::Function(Arc::clone(f)));
        }
        self.aggregates
            .get(key)
            .map(|a| Routine::Aggregate(Arc::clone(a)))
    }

    fn overloads(&self, name: &FunctionName) -> Vec<Routine> {
        let mut out: Vec<Routine> = self
            .functions
            .iter()
            .filter(|(k, _)| &k.name == name)
            .map(|(_, f)| Routine::Function(Arc::clone(f)))
            .chain(
                self.aggregates
                    .iter()
                    .filter(|(k, _)| &k.name == name)
                    .map(|(_, a)| Routine::Aggregate(Arc::clone(a))),
            )
            .collect();
        out.sort_by_key(|r| r.key().to_string());
        out
    }
}

/// Registry of functions and aggregates
#[derive(Debug, Default)]
pub struct FunctionRegistry {
    schema: RwLock<Schema>,
}

impl FunctionRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Check that `function` could be published without publishing it
    ///
    /// Returns true when it would replace an existing function.
    ///
    /// # Errors
    ///
    /// - `AlreadyExists` if the key is taken and `replace` is false, or the key names an aggregate
    /// - `InvalidDefinition` if the replacement breaks an aggregate using it
    pub fn check_function(&self, function: &PreparedFunction, replace: bool) -> Result<bool> {
        self.schema.read().check_function(function, replace)
    }

    /// Publish a prepared function
    ///
    /// Returns the function it replaced, if any. Fails as
    /// [`check_function`](Self::check_function) does, leaving the registry
    /// unchanged.
    pub fn define_function(
        &self,
        function: PreparedFunction,
        replace: bool,
    ) -> Result<Option<Arc<PreparedFunction>>> {
        let key = function.definition.key();
        let mut schema = self.schema.write();
        schema.check_function(&function, replace)?;

        let language = function.definition.language;
        let previous = schema.functions.insert(key.clone(), Arc::new(function));
        info!(
            target: "ferrule::registry",
            function = %key,
            language = language.as_str(),
            replaced = previous.is_some(),
            "Defined function"
        );
        Ok(previous)
    }

    /// Check that `aggregate` could be published without publishing it
    ///
    /// Returns the aggregate's return type.
    ///
    /// # Errors
    ///
    /// - `AlreadyExists` as for functions
    /// - `NotFound` if the state or final function is missing
    /// - `InvalidDefinition` if the state function's return type or the
    ///   initial condition does not match the state type
    pub fn check_aggregate(&self, aggregate: &AggregateDefinition, replace: bool) -> Result<CqlType> {
        self.schema.read().check_aggregate_define(aggregate, replace)
    }

    /// Publish an aggregate
    pub fn define_aggregate(
        &self,
        aggregate: AggregateDefinition,
        replace: bool,
    ) -> Result<Option<Arc<AggregateDefinition>>> {
        let key = aggregate.key();
        let mut schema = self.schema.write();
        schema.check_aggregate_define(&aggregate, replace)?;

        let previous = schema.aggregates.insert(key.clone(), Arc::new(aggregate));
        info!(
            target: "ferrule::registry",
            aggregate = %key,
            replaced = previous.is_some(),
            "Defined aggregate"
        );
        Ok(previous)
    }

    /// Look up a routine by exact signature, modulo top-level frozen-ness
    ///
    /// # Errors
    ///
    /// `NotFound` when nothing has that signature.
    pub fn resolve(&self, keyspace: &str, name: &str, arg_types: &[CqlType]) -> Result<Routine> {
        let key = FunctionKey::new(FunctionName::new(keyspace, name), arg_types);
        self.schema.read().routine(&key).ok_or_else(|| Error::NotFound {
            kind: "routine",
            name: key.to_string(),
        })
    }

    /// Look up a function by key
    pub fn resolve_function(&self, key: &FunctionKey) -> Result<Arc<PreparedFunction>> {
        self.schema.read().function(key).map(Arc::clone)
    }

    /// Look up an aggregate by key
    pub fn resolve_aggregate(&self, key: &FunctionKey) -> Result<Arc<AggregateDefinition>> {
        self.schema
            .read()
            .aggregates
            .get(key)
            .cloned()
            .ok_or_else(|| Error::NotFound {
                kind: RoutineKind::Aggregate.as_str(),
                name: key.to_string(),
            })
    }

    /// Return type of an aggregate: the final function's, else the state type
    pub fn aggregate_return_type(&self, aggregate: &AggregateDefinition) -> Result<CqlType> {
        match aggregate.final_function_key() {
            Some(fkey) => Ok(self.resolve_function(&fkey)?.definition.return_type.clone()),
            None => Ok(aggregate.state_type.clone()),
        }
    }

    /// Every routine named `keyspace.name`, sorted by signature
    pub fn overloads(&self, keyspace: &str, name: &str) -> Vec<Routine> {
        self.schema
            .read()
            .overloads(&FunctionName::new(keyspace, name))
    }

    /// The single routine a DROP statement refers to
    ///
    /// With `arg_types` this is an exact lookup. Without, the name must
    /// have exactly one overload.
    ///
    /// # Errors
    ///
    /// `NotFound`, or `AmbiguousSignature` when several overloads match.
    pub fn find_unique(&self, name: &FunctionName, arg_types: Option<&[CqlType]>) -> Result<Routine> {
        match arg_types {
            Some(types) => self.resolve(&name.keyspace, &name.name, types),
            None => {
                let mut overloads = self.schema.read().overloads(name);
                match overloads.len() {
                    0 => Err(Error::NotFound {
                        kind: "routine",
                        name: name.to_string(),
                    }),
                    1 => Ok(overloads.remove(0)),
                    n => Err(Error::AmbiguousSignature {
                        name: name.to_string(),
                        candidates: n,
                    }),
                }
            }
        }
    }

    /// Aggregates using `key` as state or final function
    pub fn dependents(&self, key: &FunctionKey) -> Vec<Arc<AggregateDefinition>> {
        self.schema.read().dependents(key)
    }

    /// Remove a function
    ///
    /// # Errors
    ///
    /// `NotFound`, or `DependentAggregateExists` under [`DropPolicy::Reject`]
    /// while an aggregate still uses the function.
    pub fn drop_function(&self, key: &FunctionKey, policy: DropPolicy) -> Result<DroppedFunction> {
        let mut schema = self.schema.write();
        schema.function(key)?;

        let dependents = schema.dependents(key);
        if let (DropPolicy::Reject, Some(first)) = (policy, dependents.first()) {
            return Err(Error::DependentAggregateExists {
                function: key.to_string(),
                aggregate: first.key().to_string(),
            });
        }
        for agg in &dependents {
            schema.aggregates.remove(&agg.key());
        }
        let function = schema.functions.remove(key).ok_or_else(|| Error::NotFound {
            kind: RoutineKind::Function.as_str(),
            name: key.to_string(),
        })?;

        info!(
            target: "ferrule::registry",
            function = %key,
            cascaded = dependents.len(),
            "Dropped function"
        );
        Ok(DroppedFunction {
            function,
            cascaded: dependents,
        })
    }

    /// Remove an aggregate
    pub fn drop_aggregate(&self, key: &FunctionKey) -> Result<Arc<AggregateDefinition>> {
        let removed = self
            .schema
            .write()
            .aggregates
            .remove(key)
            .ok_or_else(|| Error::NotFound {
                kind: RoutineKind::Aggregate.as_str(),
                name: key.to_string(),
            })?;
        info!(target: "ferrule::registry", aggregate = %key, "Dropped aggregate");
        Ok(removed)
    }

    /// Bulk population at startup: functions first, then aggregates
    ///
    /// # Errors
    ///
    /// Fails on the first entry that could not be defined; entries before it
    /// stay published.
    pub fn load(
        &self,
        functions: Vec<PreparedFunction>,
        aggregates: Vec<AggregateDefinition>,
    ) -> Result<()> {
        for f in functions {
            self.define_function(f, true)?;
        }
        for a in aggregates {
            self.define_aggregate(a, true)?;
        }
        Ok(())
    }

    /// Number of functions and aggregates
    pub fn len(&self) -> usize {
        let schema = self.schema.read();
        schema.functions.len() + schema.aggregates.len()
    }

    /// True when nothing is registered
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
