//! Error types for `marketledger-core`.

use thiserror::Error;

/// A payload or input that does not have the shape its operation type
/// requires. Always names the offending field.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid `{field}`: {message}")]
pub struct ValidationError {
  pub field:   String,
  pub message: String,
}

impl ValidationError {
  pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
    Self { field: field.into(), message: message.into() }
  }

  pub(crate) fn required(field: &str) -> Self { Self::new(field, "is required") }
}

#[derive(Debug, Error)]
pub enum Error {
  #[error("{0}")]
  Validation(#[from] ValidationError),

  #[error("unknown entity type: {0:?}")]
  UnknownEntityType(String),

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
}

impl Error {
  /// The validation failure carried by this error, if it is one.
  pub fn as_validation(&self) -> Option<&ValidationError> {
    match self {
      Self::Validation(v) => Some(v),
      _ => None,
    }
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
