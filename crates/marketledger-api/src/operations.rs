//! Handlers for operation endpoints.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `GET`  | `/markets/:id/operations` | Optional `space_id`, `type` (comma-separated), `period`, `limit`, `offset` |
//! | `POST` | `/markets/:id/operations` | Body: [`NewOperationBody`]; returns 201 + stored operation |
//! | `GET`  | `/operations/:id` | Single operation |

use axum::{
  Json,
  extract::{Path, Query, State},
  http::{HeaderMap, StatusCode},
  response::IntoResponse,
};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use marketledger_core::{
  market::Actor,
  operation::{EffectiveAt, EntityRef, NewOperation, Operation, OperationStatus},
  payload::parse_type,
  period::normalize_period_input,
  store::{LedgerStore, OperationQuery},
};
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::{AppState, error::ApiError};

/// Header carrying the acting user's id.
pub const ACTOR_HEADER: &str = "x-actor-id";

/// The acting user named by [`ACTOR_HEADER`], if any.
fn actor(headers: &HeaderMap) -> Result<Option<Actor>, ApiError> {
  let Some(raw) = headers.get(ACTOR_HEADER) else {
    return Ok(None);
  };
  raw
    .to_str()
    .ok()
    .and_then(|s| s.trim().parse::<i64>().ok())
    .map(|user_id| Some(Actor { user_id }))
    .ok_or_else(|| ApiError::BadRequest("X-Actor-Id must be an integer".into()))
}

// ─── List ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize, Default)]
pub struct ListParams {
  pub space_id: Option<i64>,
  /// Comma-separated operation type names, e.g. `tenant_switch,rent_rate_change`.
  #[serde(rename = "type")]
  pub types:    Option<String>,
  /// `YYYY-MM` or `YYYY-MM-DD`; matched against `effective_month`.
  pub period:   Option<String>,
  pub limit:    Option<usize>,
  pub offset:   Option<usize>,
}

/// `GET /markets/:id/operations[?space_id=..][&type=..][&period=..][&limit=..][&offset=..]`
pub async fn list<S: LedgerStore>(
  State(state): State<AppState<S>>,
  Path(market_id): Path<i64>,
  Query(params): Query<ListParams>,
) -> Result<Json<Vec<Operation>>, ApiError> {
  let types = params
    .types
    .as_deref()
    .map(|s| {
      s.split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(parse_type)
        .collect::<Result<Vec<_>, _>>()
    })
    .transpose()
    .map_err(ApiError::from)?
    .unwrap_or_default();

  let period = params
    .period
    .as_deref()
    .map(|p| {
      normalize_period_input(p, state.resolver.default_tz()).ok_or_else(|| {
        ApiError::BadRequest(format!("period must be YYYY-MM or YYYY-MM-DD: {p:?}"))
      })
    })
    .transpose()?;

  let query = OperationQuery {
    market_id,
    market_space_id: params.space_id,
    types,
    period,
    limit: params.limit,
    offset: params.offset,
  };

  let operations = state
    .store
    .list_operations(&query)
    .await
    .map_err(ApiError::from_store)?;
  Ok(Json(operations))
}

// ─── Get one ──────────────────────────────────────────────────────────────────

/// `GET /operations/:id`
pub async fn get_one<S: LedgerStore>(
  State(state): State<AppState<S>>,
  Path(id): Path<i64>,
) -> Result<Json<Operation>, ApiError> {
  let operation = state
    .store
    .get_operation(id)
    .await
    .map_err(ApiError::from_store)?
    .ok_or_else(|| ApiError::NotFound(format!("operation {id} not found")))?;
  Ok(Json(operation))
}

// ─── Create ───────────────────────────────────────────────────────────────────

/// JSON body accepted by `POST /markets/:id/operations`.
///
/// `effective_at` is either an RFC 3339 instant (`2026-01-05T09:00:00Z`), a
/// local wall-clock time without offset (`2026-01-05T09:00:00`), or a plain
/// date meaning local midnight. Local forms are read in the market's
/// timezone.
#[derive(Debug, Deserialize)]
pub struct NewOperationBody {
  #[serde(rename = "type", alias = "operation_type")]
  pub operation_type:       String,
  #[serde(default)]
  pub payload:              Map<String, Value>,
  pub entity_type:          Option<String>,
  pub entity_id:            Option<i64>,
  pub effective_at:         Option<String>,
  pub status:               Option<String>,
  pub comment:              Option<String>,
  pub created_by:           Option<i64>,
  pub cancels_operation_id: Option<i64>,
}

impl NewOperationBody {
  /// Convert into a [`NewOperation`] for `market_id`. Payload validation is
  /// left to the store.
  pub fn into_new_operation(self, market_id: i64) -> Result<NewOperation, ApiError> {
    let entity = match (self.entity_type.as_deref(), self.entity_id) {
      (None, None) => None,
      (Some(t), Some(id)) => Some(EntityRef::from_parts(t, id).map_err(|_| {
        ApiError::validation("entity_type", format!("unknown entity type {t:?}"))
      })?),
      (None, Some(_)) => return Err(ApiError::validation("entity_type", "is required")),
      (Some(_), None) => return Err(ApiError::validation("entity_id", "is required")),
    };

    let effective_at = self
      .effective_at
      .as_deref()
      .map(parse_effective_at)
      .transpose()?;

    Ok(NewOperation {
      market_id,
      operation_type: self.operation_type,
      payload: self.payload,
      entity,
      effective_at,
      status: self
        .status
        .map(|s| s.trim().to_owned())
        .filter(|s| !s.is_empty())
        .map(OperationStatus::from),
      comment: self.comment,
      created_by: self.created_by,
      cancels_operation_id: self.cancels_operation_id,
    })
  }
}

fn parse_effective_at(s: &str) -> Result<EffectiveAt, ApiError> {
  let s = s.trim();
  if let Ok(at) = DateTime::parse_from_rfc3339(s) {
    return Ok(EffectiveAt::Instant(at.with_timezone(&Utc)));
  }
  for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
    if let Ok(local) = NaiveDateTime::parse_from_str(s, fmt) {
      return Ok(EffectiveAt::Local(local));
    }
  }
  if let Ok(day) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
    return Ok(EffectiveAt::Local(day.and_time(chrono::NaiveTime::MIN)));
  }
  Err(ApiError::validation(
    "effective_at",
    "must be an RFC 3339 timestamp, a local date-time, or a date",
  ))
}

/// `POST /markets/:id/operations`: returns 201 + the stored [`Operation`].
pub async fn create<S: LedgerStore>(
  State(state): State<AppState<S>>,
  Path(market_id): Path<i64>,
  headers: HeaderMap,
  Json(body): Json<NewOperationBody>,
) -> Result<impl IntoResponse, ApiError> {
  let actor = actor(&headers)?;
  let input = body.into_new_operation(market_id)?;

  let operation = state
    .store
    .record_operation(input, actor)
    .await
    .map_err(ApiError::from_store)?;

  tracing::info!(
    operation_id = operation.operation_id,
    market_id,
    operation_type = %operation.operation_type(),
    "operation recorded"
  );
  Ok((StatusCode::CREATED, Json(operation)))
}
