//! Read-model and accrual handlers.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `GET`  | `/markets/:id/periods` | Period picker, newest first |
//! | `GET`  | `/markets/:id/spaces/:space_id/state` | `?period=YYYY-MM-DD`; defaults to the market's current month |
//! | `GET`  | `/markets/:id/totals/electricity` | `?period=`; totals keyed by space |
//! | `GET`  | `/markets/:id/totals/adjustments` | `?period=`; totals keyed by space |
//! | `POST` | `/markets/:id/accruals` | Body: [`AccrualBody`] |
//!
//! A missing market is not an error here: its periods are computed in the
//! default timezone.

use std::collections::BTreeMap;

use axum::{
  Json,
  extract::{Path, Query, State},
  http::StatusCode,
  response::IntoResponse,
};
use chrono::NaiveDate;
use marketledger_core::{
  market::{Market, NewAccrual},
  period::PeriodOption,
  state::SpaceState,
  store::LedgerStore,
};
use serde::{Deserialize, Serialize};

use crate::{AppState, error::ApiError};

#[derive(Debug, Deserialize, Default)]
pub struct PeriodParams {
  pub period: Option<String>,
}

/// Per-space totals for one period.
#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct Totals {
  pub market_id: i64,
  pub period:    NaiveDate,
  pub totals:    BTreeMap<i64, f64>,
}

async fn market<S: LedgerStore>(
  state: &AppState<S>,
  market_id: i64,
) -> Result<Option<Market>, ApiError> {
  state.store.get_market(market_id).await.map_err(ApiError::from_store)
}

async fn resolve_period<S: LedgerStore>(
  state: &AppState<S>,
  market_id: i64,
  input: Option<&str>,
) -> Result<NaiveDate, ApiError> {
  let market = market(state, market_id).await?;
  Ok(state.resolver.resolve_market_period(market.as_ref(), input))
}

// ─── Periods ──────────────────────────────────────────────────────────────────

/// `GET /markets/:id/periods`
pub async fn periods<S: LedgerStore>(
  State(state): State<AppState<S>>,
  Path(market_id): Path<i64>,
) -> Result<Json<Vec<PeriodOption>>, ApiError> {
  let market = market(&state, market_id).await?;
  let tz = state.resolver.market_tz(market.as_ref());
  let periods = state
    .store
    .available_periods(market_id, tz)
    .await
    .map_err(ApiError::from_store)?;
  Ok(Json(periods))
}

// ─── Space state ──────────────────────────────────────────────────────────────

/// `GET /markets/:id/spaces/:space_id/state[?period=YYYY-MM-DD]`
pub async fn space_state<S: LedgerStore>(
  State(state): State<AppState<S>>,
  Path((market_id, space_id)): Path<(i64, i64)>,
  Query(params): Query<PeriodParams>,
) -> Result<Json<SpaceState>, ApiError> {
  let period = resolve_period(&state, market_id, params.period.as_deref()).await?;
  let space = state
    .store
    .space_state_for_period(market_id, period, space_id)
    .await
    .map_err(ApiError::from_store)?;
  Ok(Json(space))
}

// ─── Totals ───────────────────────────────────────────────────────────────────

/// `GET /markets/:id/totals/electricity[?period=YYYY-MM-DD]`
pub async fn electricity_totals<S: LedgerStore>(
  State(state): State<AppState<S>>,
  Path(market_id): Path<i64>,
  Query(params): Query<PeriodParams>,
) -> Result<Json<Totals>, ApiError> {
  let period = resolve_period(&state, market_id, params.period.as_deref()).await?;
  let totals = state
    .store
    .electricity_totals_for_period(market_id, period)
    .await
    .map_err(ApiError::from_store)?;
  Ok(Json(Totals { market_id, period, totals }))
}

/// `GET /markets/:id/totals/adjustments[?period=YYYY-MM-DD]`
pub async fn adjustment_totals<S: LedgerStore>(
  State(state): State<AppState<S>>,
  Path(market_id): Path<i64>,
  Query(params): Query<PeriodParams>,
) -> Result<Json<Totals>, ApiError> {
  let period = resolve_period(&state, market_id, params.period.as_deref()).await?;
  let totals = state
    .store
    .adjustment_totals_for_period(market_id, period)
    .await
    .map_err(ApiError::from_store)?;
  Ok(Json(Totals { market_id, period, totals }))
}

// ─── Accruals ─────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct AccrualBody {
  pub market_space_id: i64,
  /// Any day of the billed month.
  pub period:          NaiveDate,
  pub amount:          f64,
}

/// `POST /markets/:id/accruals`: returns 201 + the stored accrual.
pub async fn create_accrual<S: LedgerStore>(
  State(state): State<AppState<S>>,
  Path(market_id): Path<i64>,
  Json(body): Json<AccrualBody>,
) -> Result<impl IntoResponse, ApiError> {
  if !body.amount.is_finite() {
    return Err(ApiError::validation("amount", "must be numeric"));
  }
  let accrual = state
    .store
    .record_accrual(NewAccrual {
      market_id,
      market_space_id: body.market_space_id,
      period: body.period,
      amount: body.amount,
    })
    .await
    .map_err(ApiError::from_store)?;
  Ok((StatusCode::CREATED, Json(accrual)))
}
