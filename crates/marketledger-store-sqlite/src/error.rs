//! Error type for `marketledger-store-sqlite`.

use marketledger_core::ValidationError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("core error: {0}")]
  Core(#[from] marketledger_core::Error),

  #[error("database error: {0}")]
  Database(#[from] tokio_rusqlite::Error),

  #[error("json error: {0}")]
  Json(#[from] serde_json::Error),

  #[error("date/time parse error: {0}")]
  DateParse(String),

  #[error("corrupt row: {0}")]
  Decode(String),

  #[error("market not found: {0}")]
  MarketNotFound(i64),

  /// `cancels_operation_id` names no operation of the same market. The
  /// source is the field-level failure callers report.
  #[error("cancelled operation not found in market: {operation_id}")]
  CancelledOperationNotFound {
    operation_id: i64,
    #[source]
    source:       ValidationError,
  },
}

impl Error {
  pub(crate) fn cancelled_not_found(operation_id: i64, market_id: i64) -> Self {
    Self::CancelledOperationNotFound {
      operation_id,
      source: ValidationError::new(
        "cancels_operation_id",
        format!("operation {operation_id} does not exist in market {market_id}"),
      ),
    }
  }

  /// The validation failure behind this error, if it is one.
  pub fn as_validation(&self) -> Option<&ValidationError> {
    match self {
      Self::Core(e) => e.as_validation(),
      Self::CancelledOperationNotFound { source, .. } => Some(source),
      _ => None,
    }
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
