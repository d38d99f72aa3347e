use thiserror::Error;

/// Error produced by a user-supplied persister transform.
pub type PersisterError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Error, Debug)]
pub enum MapperError {
    #[error("Schema definition error in {entity}: {message}")]
    SchemaDefinition { entity: String, message: String },
    #[error("Schema conflict on column '{column}': declared differently by {first} and {second}")]
    SchemaConflict {
        column: String,
        first: String,
        second: String,
    },
    #[error("Type mismatch: expected an instance of {expected} but got {found}")]
    TypeMismatch { expected: String, found: String },
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Missing value for suffix key '{0}'")]
    MissingSuffix(String),
    #[error("Value '{value}' is excluded for suffix key '{suffix}'")]
    ExcludedSuffix { suffix: String, value: String },
    #[error("Codec error on field '{field}' with persister '{persister}': {source}")]
    ValueCodec {
        field: String,
        persister: String,
        #[source]
        source: PersisterError,
    },
    #[error("Object conversion error for {entity}: {message}")]
    ObjectConversion { entity: String, message: String },
    #[error("Config error: {0}")]
    Config(String),
    #[error("Execution error: {0}")]
    Execution(String),
    #[error("Operation cancelled")]
    Cancelled,
    #[error("Operation timed out")]
    Timeout,
    #[error("Lock poisoned: {0}")]
    Lock(String),
}

pub type Result<T> = std::result::Result<T, MapperError>;

impl MapperError {
    pub(crate) fn schema(entity: &str, message: impl Into<String>) -> Self {
        Self::SchemaDefinition {
            entity: entity.to_owned(),
            message: message.into(),
        }
    }
    pub(crate) fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }
    pub(crate) fn conversion(entity: &str, message: impl Into<String>) -> Self {
        Self::ObjectConversion {
            entity: entity.to_owned(),
            message: message.into(),
        }
    }
}

// Helper conversions
impl From<::config::ConfigError> for MapperError {
    fn from(e: ::config::ConfigError) -> Self {
        Self::Config(e.to_string())
    }
}
impl<T> From<std::sync::PoisonError<T>> for MapperError {
    fn from(e: std::sync::PoisonError<T>) -> Self {
        Self::Lock(e.to_string())
    }
}
