//! The `LedgerStore` trait and supporting query types.
//!
//! The trait is implemented by storage backends (e.g.
//! `marketledger-store-sqlite`). The API layer depends on this abstraction,
//! not on any concrete backend.

use std::{collections::BTreeMap, future::Future};

use chrono::NaiveDate;
use chrono_tz::Tz;

use crate::{
  market::{Accrual, Actor, Market, NewAccrual, NewMarket},
  operation::{NewOperation, Operation, OperationType},
  period::PeriodOption,
  state::SpaceState,
};

// ─── Query type ──────────────────────────────────────────────────────────────

/// Parameters for [`LedgerStore::list_operations`].
#[derive(Debug, Clone, Default)]
pub struct OperationQuery {
  pub market_id:       i64,
  /// Restrict to operations about this trading space.
  pub market_space_id: Option<i64>,
  /// Restrict to these types; empty means all.
  pub types:           Vec<OperationType>,
  /// Restrict to operations whose `effective_month` is this month.
  pub period:          Option<NaiveDate>,
  pub limit:           Option<usize>,
  pub offset:          Option<usize>,
}

// ─── Trait ───────────────────────────────────────────────────────────────────

/// Abstraction over a market ledger backend.
///
/// Operations are append-only: there is no update or delete. Reads fold the
/// log on every call; nothing is cached.
///
/// Period arguments may be any day of the month; they are truncated to the
/// month start. Period boundaries use the market's timezone, falling back to
/// the backend's default timezone when the market is missing or its timezone
/// does not parse.
pub trait LedgerStore: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  // ── Markets ───────────────────────────────────────────────────────────

  fn add_market(
    &self,
    input: NewMarket,
  ) -> impl Future<Output = Result<Market, Self::Error>> + Send + '_;

  /// Returns `None` if not found.
  fn get_market(
    &self,
    market_id: i64,
  ) -> impl Future<Output = Result<Option<Market>, Self::Error>> + Send + '_;

  fn list_markets(
    &self,
  ) -> impl Future<Output = Result<Vec<Market>, Self::Error>> + Send + '_;

  /// Change a market's timezone. Existing operations keep the timezone they
  /// were recorded with.
  fn set_market_timezone(
    &self,
    market_id: i64,
    timezone: String,
  ) -> impl Future<Output = Result<Market, Self::Error>> + Send + '_;

  // ── Accruals ──────────────────────────────────────────────────────────

  fn record_accrual(
    &self,
    input: NewAccrual,
  ) -> impl Future<Output = Result<Accrual, Self::Error>> + Send + '_;

  // ── Operations: append-only writes ─ ───────────────────────────────────

  /// Validate, normalize, and append an operation.
  ///
  /// Nothing is written if the payload fails validation or if
  /// `cancels_operation_id` does not name an operation of the same market.
  fn record_operation(
    &self,
    input: NewOperation,
    actor: Option<Actor>,
  ) -> impl Future<Output = Result<Operation, Self::Error>> + Send + '_;

  // ── Reads ─────────────────────────────────────────────────────────────

  fn get_operation(
    &self,
    operation_id: i64,
  ) -> impl Future<Output = Result<Option<Operation>, Self::Error>> + Send + '_;

  /// Operations matching `query`, ordered by `effective_at` then insertion.
  fn list_operations<'a>(
    &'a self,
    query: &'a OperationQuery,
  ) -> impl Future<Output = Result<Vec<Operation>, Self::Error>> + Send + 'a;

  /// The effective state of one trading space for `period`.
  fn space_state_for_period(
    &self,
    market_id: i64,
    period: NaiveDate,
    market_space_id: i64,
  ) -> impl Future<Output = Result<SpaceState, Self::Error>> + Send + '_;

  /// Electricity totals per trading space for `period`.
  fn electricity_totals_for_period(
    &self,
    market_id: i64,
    period: NaiveDate,
  ) -> impl Future<Output = Result<BTreeMap<i64, f64>, Self::Error>> + Send + '_;

  /// Accrual adjustment totals per trading space for `period`.
  fn adjustment_totals_for_period(
    &self,
    market_id: i64,
    period: NaiveDate,
  ) -> impl Future<Output = Result<BTreeMap<i64, f64>, Self::Error>> + Send + '_;

  /// Months with ledger activity or accruals for the market, plus the
  /// current month in `tz`, most recent first. Never fewer than three
  /// entries.
  fn available_periods(
    &self,
    market_id: i64,
    tz: Tz,
  ) -> impl Future<Output = Result<Vec<PeriodOption>, Self::Error>> + Send + '_;
}
