use std::{borrow::Cow, error::Error as StdError, io};

use serde::{Deserialize, Serialize};
use serde_json::Error as JsonError;
use sqlx::{
    error::{DatabaseError, ErrorKind as DatabaseErrorKind},
    Error as SqlxError,
};
use thiserror::Error;

/// Crate-wide error type.
///
/// Query operations return `Ok(None)`/empty collections for legitimately
/// absent data and reserve these variants for genuine failures: malformed
/// input, broken invariants, storage errors, and stale repairs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Error)]
pub enum StratumError {
    #[error("Invalid command or argument: {0}")]
    Command(String),
    #[error("Stale repair precondition: {0}")]
    ConcurrencyConflict(String),
    #[error("Property deserialization error: {0}")]
    Deserialization(String),
    #[error("Projection invariant violated: {0}")]
    InvariantViolation(String),
    #[error("Item not found: {0}")]
    NotFound(String),
    #[error("Node type schema violation: {0}")]
    SchemaViolation(String),
    #[error("(De)Serialization error: {0}")]
    Serialization(String),
    #[error("Storage error: {0}")]
    Store(String),
}

impl From<toml::de::Error> for StratumError {
    fn from(src: toml::de::Error) -> StratumError {
        StratumError::Serialization(format!("Toml deserialization error: {src}"))
    }
}

impl From<toml::ser::Error> for StratumError {
    fn from(src: toml::ser::Error) -> StratumError {
        StratumError::Serialization(format!("Toml serialization error: {src}"))
    }
}

impl From<JsonError> for StratumError {
    fn from(src: JsonError) -> StratumError {
        StratumError::Serialization(format!("JSON (de)serialization error: {src}"))
    }
}

impl From<uuid::Error> for StratumError {
    fn from(src: uuid::Error) -> StratumError {
        StratumError::Serialization(format!("UUID conversion failed: {src}"))
    }
}

impl From<io::Error> for StratumError {
    fn from(x: io::Error) -> Self {
        match x.kind() {
            io::ErrorKind::NotFound => StratumError::NotFound(format!("{x}")),
            _ => StratumError::Store(format!("IOError: {}", x.kind())),
        }
    }
}

impl From<SqlxError> for StratumError {
    fn from(db_error: SqlxError) -> Self {
        match db_error {
            SqlxError::RowNotFound => StratumError::NotFound("database row not found".to_string()),
            other => StratumError::Store(format!("database error: {other:?}")),
        }
    }
}

// Lets row-mapping code return StratumError from inside sqlx::FromRow impls.
impl DatabaseError for StratumError {
    fn message(&self) -> &str {
        "stratum-core FromRow parsing failure"
    }

    fn kind(&self) -> sqlx::error::ErrorKind {
        DatabaseErrorKind::Other
    }

    /// The extended result code.
    #[inline]
    fn code(&self) -> Option<Cow<'_, str>> {
        None
    }

    #[doc(hidden)]
    fn as_error(&self) -> &(dyn StdError + Send + Sync + 'static) {
        self
    }

    #[doc(hidden)]
    fn as_error_mut(&mut self) -> &mut (dyn StdError + Send + Sync + 'static) {
        self
    }

    #[doc(hidden)]
    fn into_error(self: Box<Self>) -> Box<dyn StdError + Send + Sync + 'static> {
        self
    }
}
