//! Operation types: the fundamental unit of the market ledger.
//!
//! An operation is an immutable, typed business event about a market. Current
//! state is never stored; it is derived from the log at query time (see
//! [`crate::state`]). Corrections are expressed by appending new operations.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use strum::{EnumIter, EnumString, IntoStaticStr};

use crate::{Error, Result};

// ─── Type discriminant ───────────────────────────────────────────────────────

/// The closed set of ledger event kinds. The snake_case name is the value
/// stored in the `operation_type` column.
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Hash,
  PartialOrd,
  Ord,
  Serialize,
  Deserialize,
  EnumString,
  EnumIter,
  IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum OperationType {
  TenantSwitch,
  RentRateChange,
  SpaceAttrsChange,
  ElectricityInput,
  AccrualAdjustment,
  PeriodClose,
}

impl OperationType {
  pub fn as_str(self) -> &'static str { self.into() }
}

impl std::fmt::Display for OperationType {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(self.as_str())
  }
}

// ─── Target entity ───────────────────────────────────────────────────────────

/// The object an operation is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "entity_type", content = "entity_id", rename_all = "snake_case")]
pub enum EntityRef {
  MarketSpace(i64),
}

impl EntityRef {
  /// The value stored in the `entity_type` column.
  pub fn entity_type(&self) -> &'static str {
    match self {
      Self::MarketSpace(_) => "market_space",
    }
  }

  pub fn entity_id(&self) -> i64 {
    match self {
      Self::MarketSpace(id) => *id,
    }
  }

  /// The trading space this reference points at, if it is one.
  pub fn market_space_id(&self) -> Option<i64> {
    match self {
      Self::MarketSpace(id) => Some(*id),
    }
  }

  /// Rebuild from the `(entity_type, entity_id)` column pair.
  pub fn from_parts(entity_type: &str, entity_id: i64) -> Result<Self> {
    match entity_type {
      "market_space" => Ok(Self::MarketSpace(entity_id)),
      other => Err(Error::UnknownEntityType(other.to_owned())),
    }
  }
}

// ─── Status ──────────────────────────────────────────────────────────────────

/// Lifecycle tag. Only `applied` is produced by this crate; other values are
/// preserved verbatim and ignored by aggregation.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum OperationStatus {
  #[default]
  Applied,
  Other(String),
}

impl OperationStatus {
  pub fn as_str(&self) -> &str {
    match self {
      Self::Applied => "applied",
      Self::Other(s) => s,
    }
  }
}

impl From<String> for OperationStatus {
  fn from(s: String) -> Self {
    if s == "applied" { Self::Applied } else { Self::Other(s) }
  }
}

impl From<OperationStatus> for String {
  fn from(s: OperationStatus) -> Self {
    match s {
      OperationStatus::Applied => "applied".to_owned(),
      OperationStatus::Other(s) => s,
    }
  }
}

// ─── Payloads ────────────────────────────────────────────────────────────────

/// A tenant moving into or out of a trading space. Either side may be absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TenantSwitch {
  pub market_space_id: i64,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub from_tenant_id:  Option<i64>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub to_tenant_id:    Option<i64>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub reason:          Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RentRateChange {
  pub market_space_id: i64,
  pub rent_rate:       f64,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub currency:        Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub unit:            Option<String>,
}

/// A sparse patch of space attributes; absent fields are left untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpaceAttrsChange {
  pub market_space_id: i64,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub area_sqm:        Option<f64>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub activity_type:   Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub location_id:     Option<i64>,
  #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
  pub space_type:      Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub is_active:       Option<bool>,
}

/// Metered consumption for a space. A flow value: inputs within a period are
/// summed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElectricityInput {
  pub market_space_id: i64,
  pub amount:          f64,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub unit:            Option<String>,
}

/// A signed correction to a space's accruals. `reason` is mandatory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccrualAdjustment {
  pub market_space_id: i64,
  pub amount_delta:    f64,
  pub reason:          String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeriodClose {
  /// `YYYY-MM-DD`.
  pub period: String,
  pub closed: bool,
}

/// The normalized payload of an operation. The variant determines the
/// operation type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum OperationPayload {
  TenantSwitch(TenantSwitch),
  RentRateChange(RentRateChange),
  SpaceAttrsChange(SpaceAttrsChange),
  ElectricityInput(ElectricityInput),
  AccrualAdjustment(AccrualAdjustment),
  PeriodClose(PeriodClose),
}

impl OperationPayload {
  pub fn operation_type(&self) -> OperationType {
    match self {
      Self::TenantSwitch(_) => OperationType::TenantSwitch,
      Self::RentRateChange(_) => OperationType::RentRateChange,
      Self::SpaceAttrsChange(_) => OperationType::SpaceAttrsChange,
      Self::ElectricityInput(_) => OperationType::ElectricityInput,
      Self::AccrualAdjustment(_) => OperationType::AccrualAdjustment,
      Self::PeriodClose(_) => OperationType::PeriodClose,
    }
  }

  /// The trading space the payload refers to; `None` for `period_close`.
  pub fn market_space_id(&self) -> Option<i64> {
    match self {
      Self::TenantSwitch(p) => Some(p.market_space_id),
      Self::RentRateChange(p) => Some(p.market_space_id),
      Self::SpaceAttrsChange(p) => Some(p.market_space_id),
      Self::ElectricityInput(p) => Some(p.market_space_id),
      Self::AccrualAdjustment(p) => Some(p.market_space_id),
      Self::PeriodClose(_) => None,
    }
  }

  /// Serialise the inner payload (without the type tag) for the
  /// `payload_json` column.
  pub fn to_json(&self) -> Result<Map<String, Value>> {
    // The full serialised form is `{"type": "...", "payload": {...}}`.
    let full = serde_json::to_value(self)?;
    match full {
      Value::Object(mut obj) => match obj.remove("payload") {
        Some(Value::Object(data)) => Ok(data),
        _ => Ok(Map::new()),
      },
      _ => Ok(Map::new()),
    }
  }

  /// Deserialise from a stored type discriminant and JSON payload.
  pub fn from_parts(kind: OperationType, data: Value) -> Result<Self> {
    let wrapped = serde_json::json!({ "type": kind.as_str(), "payload": data });
    Ok(serde_json::from_value(wrapped)?)
  }
}

// ─── Time input ──────────────────────────────────────────────────────────────

/// When an operation takes effect, as supplied by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum EffectiveAt {
  /// An absolute instant.
  Instant(DateTime<Utc>),
  /// A wall-clock time in the market's timezone, as typed on a form.
  Local(NaiveDateTime),
}

// ─── Operation ───────────────────────────────────────────────────────────────

/// A persisted ledger fact. No field changes after insertion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
  /// Store-assigned, strictly increasing.
  pub operation_id:         i64,
  pub market_id:            i64,
  #[serde(flatten)]
  pub entity:               Option<EntityRef>,
  #[serde(flatten)]
  pub payload:              OperationPayload,
  pub effective_at:         DateTime<Utc>,
  /// IANA name of the timezone `effective_month` was derived in.
  pub effective_tz:         String,
  /// First day of the market-local month containing `effective_at`.
  pub effective_month:      NaiveDate,
  pub status:               OperationStatus,
  pub comment:              Option<String>,
  pub created_by:           Option<i64>,
  pub cancels_operation_id: Option<i64>,
  pub recorded_at:          DateTime<Utc>,
}

impl Operation {
  pub fn operation_type(&self) -> OperationType { self.payload.operation_type() }
}

// ─── NewOperation ────────────────────────────────────────────────────────────

/// Input to [`crate::store::LedgerStore::record_operation`].
///
/// The type and payload are raw; they are validated and normalized before
/// anything is written. `effective_month`, `effective_tz`, `operation_id` and
/// `recorded_at` are always computed and cannot be supplied.
#[derive(Debug, Clone, Default)]
pub struct NewOperation {
  pub market_id:            i64,
  /// Raw type name; parsed case-insensitively.
  pub operation_type:       String,
  pub payload:              Map<String, Value>,
  /// Inferred from the payload's `market_space_id` when unset.
  pub entity:               Option<EntityRef>,
  pub effective_at:         Option<EffectiveAt>,
  pub status:               Option<OperationStatus>,
  pub comment:              Option<String>,
  pub created_by:           Option<i64>,
  pub cancels_operation_id: Option<i64>,
}

impl NewOperation {
  /// Convenience constructor with all optional fields unset.
  pub fn new(
    market_id: i64,
    operation_type: impl Into<String>,
    payload: Map<String, Value>,
  ) -> Self {
    Self {
      market_id,
      operation_type: operation_type.into(),
      payload,
      ..Self::default()
    }
  }

  pub fn effective_at(mut self, at: EffectiveAt) -> Self {
    self.effective_at = Some(at);
    self
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn operation_type_parses_both_cases() {
    assert_eq!(
      "tenant_switch".parse::<OperationType>().unwrap(),
      OperationType::TenantSwitch
    );
    assert_eq!(
      "PERIOD_CLOSE".parse::<OperationType>().unwrap(),
      OperationType::PeriodClose
    );
    assert!("bogus_type".parse::<OperationType>().is_err());
  }

  #[test]
  fn payload_json_omits_absent_optionals() {
    let payload = OperationPayload::SpaceAttrsChange(SpaceAttrsChange {
      market_space_id: 7,
      area_sqm:        None,
      activity_type:   None,
      location_id:     None,
      space_type:      Some("kiosk".into()),
      is_active:       Some(false),
    });
    let json = payload.to_json().unwrap();
    assert_eq!(json.len(), 3);
    assert_eq!(json["type"], "kiosk");

    let back =
      OperationPayload::from_parts(OperationType::SpaceAttrsChange, json.into())
        .unwrap();
    assert_eq!(back, payload);
  }

  #[test]
  fn entity_ref_rejects_unknown_kind() {
    assert_eq!(
      EntityRef::from_parts("market_space", 3).unwrap(),
      EntityRef::MarketSpace(3)
    );
    assert!(matches!(
      EntityRef::from_parts("tenant", 3),
      Err(Error::UnknownEntityType(_))
    ));
  }

  #[test]
  fn status_round_trips_unknown_values() {
    let s: OperationStatus = "pending_review".to_owned().into();
    assert_eq!(s.as_str(), "pending_review");
    assert_eq!(OperationStatus::from("applied".to_owned()), OperationStatus::Applied);
  }
}
