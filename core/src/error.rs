use thiserror::Error;

#[derive(Debug, Error)]
pub enum TrestleError {
    /// Malformed finder argument (e.g. a float or object passed as an id)
    #[error("Invalid find argument: {0}")]
    Argument(String),

    /// A requested id could not be resolved to a record
    #[error("Record not found: {0}")]
    RecordNotFound(String),

    /// A modifier value was neither a map nor a deferred call returning a map
    #[error("Modifier value is not a map: {0}")]
    ModifierType(String),

    /// Dynamic dispatch exhausted every capability check
    #[error("No method `{method}` on relation for `{source_name}`")]
    NoMethod { method: String, source_name: String },

    /// The backend does not implement the requested operation
    #[error("`{mode}` is not supported by the `{kind}` backend")]
    Unsupported { mode: String, kind: String },

    /// Downstream backend failure, propagated unmodified
    #[error("Backend error: {0}")]
    Backend(String),

    /// Error in adapter or middleware configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// No backend factory registered under the requested name
    #[error("Unknown adapter type: {0}")]
    UnknownAdapter(String),
}

/// Result type for data-access operations
pub type Result<T> = std::result::Result<T, TrestleError>;
