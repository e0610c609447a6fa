//! Crate-wide error types.
//!
//! One `thiserror` enum per layer, aggregated into a top-level
//! [`QueryError`] the way the engine's driver functions return errors to
//! their callers.

use thiserror::Error;

/// Errors raised while initializing schemas, disambiguating attributes, or
/// expanding a `From` node into a join tree.
#[derive(Debug, Clone, Error)]
pub enum OptimizeError {
    #[error("schema initialization did not converge after {0} iterations")]
    SchemaInitCycle(usize),

    #[error("attribute reference '{0}' is ambiguous: it matches more than one child schema")]
    AttributeAmbiguous(String),

    #[error("attribute reference '{0}' could not be bound to any child schema")]
    AttributeUnbound(String),

    #[error("unsupported operator: {0}")]
    UnsupportedOperator(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("attribute '{attr}' already bound to table '{existing}', cannot rebind to '{new}'")]
    ConflictingTablename {
        attr: String,
        existing: String,
        new: String,
    },
}

/// Errors raised while evaluating an expression against a row, or while
/// looking up a user-defined function at call time.
#[derive(Debug, Clone, Error)]
pub enum EvalError {
    #[error("no such UDF registered: '{0}'")]
    UdfNotFound(String),

    #[error("UDF '{name}' expects {expected} argument(s), got {got}")]
    UdfArityMismatch {
        name: String,
        expected: usize,
        got: usize,
    },

    #[error("type mismatch: {0}")]
    TypeMismatch(String),

    #[error("attribute at index {0} is unbound (idx is null)")]
    UnboundAttr(usize),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

/// Errors raised while compiling an expression or operator subtree into
/// generated source text.
#[derive(Debug, Clone, Error)]
pub enum CompileError {
    #[error(transparent)]
    Eval(#[from] EvalError),

    #[error("cannot compile an unbound attribute reference '{0}'")]
    UnboundAttr(String),

    #[error("produce/consume protocol violation: {0}")]
    ProtocolViolation(String),
}

/// Errors raised by the hand-rolled SQL-ish parser.
#[derive(Debug, Clone, Error)]
pub enum ParseError {
    #[error("unexpected end of input, expected {0}")]
    UnexpectedEof(String),

    #[error("unexpected token '{found}', expected {expected}")]
    UnexpectedToken { found: String, expected: String },

    #[error("syntax error: {0}")]
    Syntax(String),
}

/// Errors raised by the catalog (relation lookup, CSV loading).
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("relation '{0}' not found")]
    RelationNotFound(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed CSV in '{path}': {reason}")]
    MalformedCsv { path: String, reason: String },
}

/// Errors raised by the UDF registry.
#[derive(Debug, Clone, Error)]
pub enum UdfError {
    #[error("a UDF named '{0}' is already registered")]
    DuplicateName(String),

    #[error("'{0}' is registered as both a scalar and an aggregate UDF")]
    NamespaceCollision(String),
}

/// Top-level error type returned by the driver functions
/// (`optimize`, `execute`, `compile_to_string`).
#[derive(Debug, Error)]
pub enum QueryError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Optimize(#[from] OptimizeError),

    #[error(transparent)]
    Eval(#[from] EvalError),

    #[error(transparent)]
    Compile(#[from] CompileError),

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    Udf(#[from] UdfError),

    #[error("configuration error: {0}")]
    Config(#[from] figment::Error),
}

pub type QueryResult<T> = Result<T, QueryError>;
