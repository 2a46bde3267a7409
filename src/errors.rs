use thiserror::Error;

/// Everything that can go wrong between a mapping entry and a matched document.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum FieldError {
    /// A null or malformed predicate argument, rejected before any script runs.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A raw value handed to display coercion is not binary.
    #[error("invalid value: {0}")]
    InvalidValue(String),

    #[error("script compilation failed: {0}")]
    ScriptCompilation(String),

    /// The compiled script could not be bound to a query or segment context.
    #[error("script binding failed: {0}")]
    ScriptBinding(String),

    #[error("script runtime error: {0}")]
    ScriptRuntime(String),

    /// The mapping entry itself is malformed.
    #[error("mapping error: {0}")]
    Mapping(String),
}

pub type Result<T> = std::result::Result<T, FieldError>;
