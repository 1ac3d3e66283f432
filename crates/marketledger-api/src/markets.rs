//! Handlers for `/markets` endpoints.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `GET`  | `/markets` | All markets, oldest first |
//! | `POST` | `/markets` | Body: `{"name":"...","timezone":"Europe/Moscow"}` |
//! | `GET`  | `/markets/:id` | 404 if not found |
//! | `PUT`  | `/markets/:id/timezone` | Body: `{"timezone":"..."}` |

use axum::{
  Json,
  extract::{Path, State},
  http::StatusCode,
  response::IntoResponse,
};
use chrono_tz::Tz;
use marketledger_core::{
  market::{Market, NewMarket},
  store::LedgerStore,
};
use serde::Deserialize;

use crate::{AppState, error::ApiError};

/// Reject timezone names that do not parse. Stored markets may still carry
/// one (older rows, manual edits); reads fall back to the default then.
fn check_timezone(name: &str) -> Result<String, ApiError> {
  let name = name.trim();
  name
    .parse::<Tz>()
    .map(|_| name.to_owned())
    .map_err(|_| ApiError::validation("timezone", "must be an IANA timezone name"))
}

// ─── List ─────────────────────────────────────────────────────────────────────

/// `GET /markets`
pub async fn list<S: LedgerStore>(
  State(state): State<AppState<S>>,
) -> Result<Json<Vec<Market>>, ApiError> {
  let markets = state.store.list_markets().await.map_err(ApiError::from_store)?;
  Ok(Json(markets))
}

// ─── Create ───────────────────────────────────────────────────────────────────

/// `POST /markets`: returns 201 + the stored [`Market`].
pub async fn create<S: LedgerStore>(
  State(state): State<AppState<S>>,
  Json(body): Json<NewMarket>,
) -> Result<impl IntoResponse, ApiError> {
  let name = body.name.trim().to_owned();
  if name.is_empty() {
    return Err(ApiError::validation("name", "is required"));
  }
  let timezone = check_timezone(&body.timezone)?;

  let market = state
    .store
    .add_market(NewMarket { name, timezone })
    .await
    .map_err(ApiError::from_store)?;
  Ok((StatusCode::CREATED, Json(market)))
}

// ─── Get one ──────────────────────────────────────────────────────────────────

/// `GET /markets/:id`
pub async fn get_one<S: LedgerStore>(
  State(state): State<AppState<S>>,
  Path(id): Path<i64>,
) -> Result<Json<Market>, ApiError> {
  let market = state
    .store
    .get_market(id)
    .await
    .map_err(ApiError::from_store)?
    .ok_or_else(|| ApiError::NotFound(format!("market {id} not found")))?;
  Ok(Json(market))
}

// ─── Timezone ─────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct TimezoneBody {
  pub timezone: String,
}

/// `PUT /markets/:id/timezone`
///
/// Operations already recorded keep the timezone and month they were stamped
/// with.
pub async fn set_timezone<S: LedgerStore>(
  State(state): State<AppState<S>>,
  Path(id): Path<i64>,
  Json(body): Json<TimezoneBody>,
) -> Result<Json<Market>, ApiError> {
  let timezone = check_timezone(&body.timezone)?;

  if state.store.get_market(id).await.map_err(ApiError::from_store)?.is_none() {
    return Err(ApiError::NotFound(format!("market {id} not found")));
  }
  let market = state
    .store
    .set_market_timezone(id, timezone)
    .await
    .map_err(ApiError::from_store)?;
  Ok(Json(market))
}
