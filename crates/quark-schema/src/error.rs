/// Errors that can occur while reading an API document.
#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    /// The embedded document schema could not be compiled.
    #[error("failed to compile schema: {0}")]
    CompileFailed(String),

    /// The document failed schema validation.
    #[error("API document validation failed: {0}")]
    ValidationFailed(String),

    /// The payload is not valid JSON or does not match the document types.
    #[error("API document is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    /// The document exceeds the configured size limit.
    #[error("API document too large ({size} bytes, max {max})")]
    TooLarge { size: usize, max: usize },

    /// A descriptor is structurally valid but semantically wrong.
    #[error("invalid descriptor for {path}: {reason}")]
    InvalidDescriptor { path: String, reason: String },

    /// Two declarations of the same method share an arity.
    #[error("method {path} declares arity {arity} more than once")]
    DuplicateArity { path: String, arity: usize },

    /// A method path collides with an existing branch, or the reverse.
    #[error("path conflict at {path}")]
    PathConflict { path: String },
}

pub type Result<T> = std::result::Result<T, SchemaError>;
