//! Error types for the function engine
//!
//! Every layer (verifier, marshaling, sandbox, registry, permission checks,
//! metadata store) reports failures through the single [`Error`] enum so the
//! query executor can map them onto query-level errors without losing detail.
//! We use `thiserror` for automatic `Display` and `Error` trait implementations.
//!
//! # Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | Definition | `VerificationFailure`, `FrozenSignatureViolation`, `InvalidDefinition`, `CompilationFailure` |
//! | Lookup | `NotFound`, `AlreadyExists`, `AmbiguousSignature`, `DependentAggregateExists` |
//! | Permission | `Unauthorized`, `InvalidResource` |
//! | Types | `TypeMismatch`, `Marshal` |
//! | Execution | `ExecutionFault`, `ExecutionTimeout` |
//! | System | `Config`, `Io`, `Corruption`, `Serialization` |

use std::io;
use thiserror::Error;

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for the function engine
#[derive(Debug, Error)]
pub enum Error {
    // ==================== Definition ====================
    /// The verifier found unsafe constructs in a function body.
    ///
    /// `violations` is already sorted and deduplicated.
    #[error("{language} UDF validation failed: [{}]", violations.join(", "))]
    VerificationFailure {
        /// Display name of the language ("Lua", "Wasm")
        language: String,
        /// Sorted, deduplicated violation messages
        violations: Vec<String>,
    },

    /// A user-defined type was declared frozen in a function signature
    #[error("argument {position} of {function}: user-defined type {type_name} should not be frozen")]
    FrozenSignatureViolation {
        /// Function being defined
        function: String,
        /// Argument name, or "return" for the return type
        position: String,
        /// Offending type as written
        type_name: String,
    },

    /// Definition is structurally invalid (arity, names, language, aggregate shape)
    #[error("invalid definition of {name}: {reason}")]
    InvalidDefinition {
        /// Function or aggregate being defined
        name: String,
        /// Human-readable reason
        reason: String,
    },

    /// The runtime rejected the body (syntax error, invalid module, missing export)
    #[error("failed to compile {language} body of {function}: {reason}")]
    CompilationFailure {
        /// Display name of the language
        language: String,
        /// Function being compiled
        function: String,
        /// Runtime diagnostic
        reason: String,
    },

    // ==================== Lookup ====================
    /// No function or aggregate matches
    #[error("{kind} {name} not found")]
    NotFound {
        /// "function", "aggregate" or "routine"
        kind: &'static str,
        /// Qualified name, with signature when known
        name: String,
    },

    /// An identical signature is already defined
    #[error("{kind} {name} already exists")]
    AlreadyExists {
        /// "function" or "aggregate"
        kind: &'static str,
        /// Qualified name with signature
        name: String,
    },

    /// DROP without a signature matched several overloads
    #[error("{name} matches multiple function definitions; specify the argument types")]
    AmbiguousSignature {
        /// Qualified name
        name: String,
        /// Number of overloads found
        candidates: usize,
    },

    /// The function is still referenced by an aggregate
    #[error("cannot drop {function}: it is used by aggregate {aggregate}")]
    DependentAggregateExists {
        /// Function being dropped
        function: String,
        /// First dependent aggregate
        aggregate: String,
    },

    // ==================== Permission ====================
    /// The permission gate refused the operation
    #[error("user {grantee} has no {permission} permission on {resource} or any of its parents")]
    Unauthorized {
        /// Role the operation ran as
        grantee: String,
        /// Required permission
        permission: String,
        /// Resource in display form
        resource: String,
    },

    /// Resource descriptor could not be parsed, or the permission does not apply to it
    #[error("invalid resource {resource}: {reason}")]
    InvalidResource {
        /// Resource as given
        resource: String,
        /// Human-readable reason
        reason: String,
    },

    // ==================== Types ====================
    /// Argument, return or component types disagree
    #[error("type mismatch: expected {expected}, got {actual}")]
    TypeMismatch {
        /// Expected type
        expected: String,
        /// What was found
        actual: String,
    },

    /// Serialized value is malformed for its type
    #[error("cannot marshal {type_name}: {reason}")]
    Marshal {
        /// Target type
        type_name: String,
        /// What went wrong
        reason: String,
    },

    // ==================== Execution ====================
    /// Uncaught error inside a function body
    #[error("execution of {function} failed: {message}")]
    ExecutionFault {
        /// Function that faulted
        function: String,
        /// Runtime error message
        message: String,
    },

    /// Function body exceeded its time or instruction budget
    #[error("execution of {function} timed out after {elapsed_ms}ms")]
    ExecutionTimeout {
        /// Function that was interrupted
        function: String,
        /// Wall-clock time spent before interruption
        elapsed_ms: u64,
    },

    // ==================== System ====================
    /// Invalid configuration value
    #[error("configuration error: {0}")]
    Config(String),

    /// I/O error (metadata store files)
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Persisted metadata failed validation
    #[error("data corruption: {0}")]
    Corruption(String),

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<rmp_serde::encode::Error> for Error {
    fn from(e: rmp_serde::encode::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for Error {
    fn from(e: rmp_serde::decode::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl Error {
    /// Create a type mismatch error from anything displayable
    pub fn type_mismatch(expected: impl ToString, actual: impl ToString) -> Self {
        Error::TypeMismatch {
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }

    /// Create a marshaling error for the given type
    pub fn marshal(type_name: impl ToString, reason: impl Into<String>) -> Self {
        Error::Marshal {
            type_name: type_name.to_string(),
            reason: reason.into(),
        }
    }

    /// Create an invalid definition error
    pub fn invalid_definition(name: impl ToString, reason: impl Into<String>) -> Self {
        Error::InvalidDefinition {
            name: name.to_string(),
            reason: reason.into(),
        }
    }

    /// True for failures raised while a body was running
    ///
    /// These never leave registry state modified.
    pub fn is_execution_error(&self) -> bool {
        matches!(
            self,
            Error::ExecutionFault { .. } | Error::ExecutionTimeout { .. }
        )
    }

    /// True when the permission gate refused the call
    pub fn is_permission_error(&self) -> bool {
        matches!(self, Error::Unauthorized { .. })
    }
}
