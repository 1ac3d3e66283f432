//! The per-space read model and the folds that build it.
//!
//! State is never stored. Point-in-time attributes (tenant, rent rate) take
//! the payload of the latest applicable fact; flow attributes (electricity,
//! adjustments) sum every fact inside the period.
//!
//! The folds work on [`FactRow`]s: the raw payload plus the columns needed
//! for ordering. Values are extracted leniently so rows written before a
//! payload rule existed still aggregate.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{
  operation::EntityRef,
  payload::{coerce_int, coerce_number},
  period::MonthBounds,
};

// ─── Read model ──────────────────────────────────────────────────────────────

/// The effective state of a trading space for one market-local month.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpaceState {
  pub market_id:         i64,
  pub market_space_id:   i64,
  /// First day of the month.
  pub period:            NaiveDate,
  pub tenant_id:         Option<i64>,
  pub rent_rate:         Option<f64>,
  pub electricity_total: f64,
  pub adjustments_total: f64,
}

// ─── Fact rows ───────────────────────────────────────────────────────────────

/// The slice of an operation row the folds need.
#[derive(Debug, Clone, PartialEq)]
pub struct FactRow {
  pub operation_id: i64,
  pub entity:       Option<EntityRef>,
  pub effective_at: DateTime<Utc>,
  pub payload:      Map<String, Value>,
}

impl FactRow {
  /// The trading space this fact is about: the payload's `market_space_id`,
  /// else the row's entity reference.
  pub fn space_id(&self) -> Option<i64> {
    self
      .payload
      .get("market_space_id")
      .and_then(coerce_int)
      .or_else(|| self.entity.and_then(|e| e.market_space_id()))
  }

  pub fn int(&self, key: &str) -> Option<i64> {
    self.payload.get(key).and_then(coerce_int)
  }

  /// A numeric payload value; missing or non-numeric reads as zero.
  pub fn amount(&self, key: &str) -> f64 {
    self.payload.get(key).and_then(coerce_number).unwrap_or(0.0)
  }
}

// ─── Folds ───────────────────────────────────────────────────────────────────

/// The latest fact taking effect before `bounds.end_exclusive`. Ties on
/// `effective_at` go to the later insertion.
pub fn latest_wins<'a>(
  rows: impl IntoIterator<Item = &'a FactRow>,
  bounds: &MonthBounds,
) -> Option<&'a FactRow> {
  rows
    .into_iter()
    .filter(|r| r.effective_at < bounds.end_exclusive)
    .max_by_key(|r| (r.effective_at, r.operation_id))
}

/// Sum `key` over facts inside the period.
pub fn sum_flow<'a>(
  rows: impl IntoIterator<Item = &'a FactRow>,
  bounds: &MonthBounds,
  key: &str,
) -> f64 {
  rows
    .into_iter()
    .filter(|r| bounds.contains(r.effective_at))
    .map(|r| r.amount(key))
    .sum()
}

/// Sum `key` per trading space over facts inside the period. Rows without a
/// usable space id are skipped.
pub fn sum_flow_by_space<'a>(
  rows: impl IntoIterator<Item = &'a FactRow>,
  bounds: &MonthBounds,
  key: &str,
) -> BTreeMap<i64, f64> {
  let mut totals = BTreeMap::new();
  for row in rows.into_iter().filter(|r| bounds.contains(r.effective_at)) {
    let Some(space_id) = row.space_id() else { continue };
    *totals.entry(space_id).or_insert(0.0) += row.amount(key);
  }
  totals
}

/// Fold the four fact streams of one space into its [`SpaceState`].
pub struct SpaceFacts<'a> {
  pub tenant_switches:   &'a [FactRow],
  pub rent_rate_changes: &'a [FactRow],
  pub electricity:       &'a [FactRow],
  pub adjustments:       &'a [FactRow],
}

impl SpaceFacts<'_> {
  pub fn fold(
    &self,
    market_id: i64,
    market_space_id: i64,
    period: NaiveDate,
    bounds: &MonthBounds,
  ) -> SpaceState {
    SpaceState {
      market_id,
      market_space_id,
      period,
      tenant_id: latest_wins(self.tenant_switches, bounds)
        .and_then(|r| r.int("to_tenant_id")),
      rent_rate: latest_wins(self.rent_rate_changes, bounds)
        .and_then(|r| r.payload.get("rent_rate").and_then(coerce_number)),
      electricity_total: sum_flow(self.electricity, bounds, "amount"),
      adjustments_total: sum_flow(self.adjustments, bounds, "amount_delta"),
    }
  }
}
