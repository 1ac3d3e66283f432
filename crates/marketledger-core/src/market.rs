//! Records the ledger reads but does not own: markets, accruals, and the
//! acting user.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// An independent marketplace with its own timezone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Market {
  pub market_id:  i64,
  pub name:       String,
  /// IANA timezone name as configured. May be invalid; see
  /// [`crate::period::PeriodResolver::market_tz`].
  pub timezone:   String,
  pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewMarket {
  pub name:     String,
  pub timezone: String,
}

/// A billing accrual for a space in a period. Only its period matters to the
/// ledger (it makes the month selectable).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Accrual {
  pub accrual_id:      i64,
  pub market_id:       i64,
  pub market_space_id: i64,
  /// First day of the month.
  pub period:          NaiveDate,
  pub amount:          f64,
  pub recorded_at:     DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewAccrual {
  pub market_id:       i64,
  pub market_space_id: i64,
  /// Any day of the month; truncated on write.
  pub period:          NaiveDate,
  pub amount:          f64,
}

/// The authenticated user performing a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
  pub user_id: i64,
}
