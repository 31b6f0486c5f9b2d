//! Error types for the FHIRPath engine.
//!
//! Compile-time errors are returned from `Engine::compile`; evaluation-time
//! errors from `CompiledExpression::evaluate`. Empty-propagation cases
//! (missing fields in permissive mode, out-of-range indexes, precision
//! mismatches, ...) are not errors: they produce empty collections.

use thiserror::Error;

/// Result type alias.
pub type Result<T> = std::result::Result<T, Error>;

/// FHIRPath compile and evaluation errors.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("lex error at line {line}, column {column}: {message}")]
    LexError {
        message: String,
        line: usize,
        column: usize,
    },

    #[error("parse error: {0}")]
    ParseError(String),

    #[error("invalid field: {0}")]
    InvalidField(String),

    #[error("wrong arity: {0}")]
    WrongArity(String),

    #[error("wrong type: {0}")]
    WrongType(String),

    #[error("unsupported operation: {0}")]
    UnsupportedOperation(String),

    #[error("invalid reference: {0}")]
    InvalidReference(String),

    #[error("resolve() requires a resolver to be configured in the evaluation context")]
    UnconfiguredResolver,

    #[error("memberOf() requires a terminology service to be configured in the evaluation context")]
    UnconfiguredTerminologyService,

    #[error("evaluation cancelled")]
    Cancelled,

    #[error("multiple bundle entries with the same id and version found for the same resource type")]
    MultipleResourcesWithSameIdAndVersion,

    #[error("multiple versionless matches found with missing meta or meta.lastUpdated fields")]
    MissingMetaOrLastUpdated,

    #[error("internal error: {0}")]
    Internal(String),
}
