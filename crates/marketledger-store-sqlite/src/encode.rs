//! Encoding and decoding helpers between Rust domain types and the plain-text
//! representations stored in SQLite columns.
//!
//! Instants are stored as fixed-width RFC 3339 UTC strings with microsecond
//! precision, so lexical order in SQL equals chronological order. Calendar
//! dates are `YYYY-MM-DD`. Payloads are compact JSON objects.

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use marketledger_core::{
  market::Market,
  operation::{EntityRef, Operation, OperationPayload, OperationType},
  state::FactRow,
};
use serde_json::{Map, Value};

use crate::{Error, Result};

// ─── DateTime<Utc> ───────────────────────────────────────────────────────────

pub fn encode_dt(dt: DateTime<Utc>) -> String {
  dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::DateParse(format!("{s:?}: {e}")))
}

// ─── NaiveDate ───────────────────────────────────────────────────────────────

pub fn encode_date(d: NaiveDate) -> String { d.format("%Y-%m-%d").to_string() }

pub fn decode_date(s: &str) -> Result<NaiveDate> {
  NaiveDate::parse_from_str(s, "%Y-%m-%d")
    .map_err(|e| Error::DateParse(format!("{s:?}: {e}")))
}

// ─── OperationType ───────────────────────────────────────────────────────────

pub fn decode_operation_type(s: &str) -> Result<OperationType> {
  s.parse()
    .map_err(|_| Error::Decode(format!("unknown operation type: {s:?}")))
}

// ─── Entity ──────────────────────────────────────────────────────────────────

pub fn encode_entity(e: Option<EntityRef>) -> (Option<&'static str>, Option<i64>) {
  match e {
    Some(e) => (Some(e.entity_type()), Some(e.entity_id())),
    None => (None, None),
  }
}

pub fn decode_entity(
  entity_type: Option<&str>,
  entity_id: Option<i64>,
) -> Result<Option<EntityRef>> {
  match (entity_type, entity_id) {
    (Some(t), Some(id)) => Ok(Some(EntityRef::from_parts(t, id)?)),
    _ => Ok(None),
  }
}

// ─── Payload ─────────────────────────────────────────────────────────────────

pub fn encode_payload(p: &OperationPayload) -> Result<String> {
  Ok(Value::Object(p.to_json()?).to_string())
}

/// Parse a stored payload without validating its shape. Anything that is not
/// a JSON object reads as empty.
pub fn decode_payload_lenient(s: &str) -> Map<String, Value> {
  match serde_json::from_str::<Value>(s) {
    Ok(Value::Object(m)) => m,
    _ => Map::new(),
  }
}

// ─── Row types ───────────────────────────────────────────────────────────────

/// Column list matching [`RawOperation`]'s field order.
pub const OPERATION_COLUMNS: &str = "operation_id, market_id, entity_type, \
  entity_id, operation_type, effective_at, effective_tz, effective_month, \
  status, payload_json, comment, created_by, cancels_operation_id, recorded_at";

/// Raw values read directly from an `operations` row.
pub struct RawOperation {
  pub operation_id:         i64,
  pub market_id:            i64,
  pub entity_type:          Option<String>,
  pub entity_id:            Option<i64>,
  pub operation_type:       String,
  pub effective_at:         String,
  pub effective_tz:         String,
  pub effective_month:      String,
  pub status:               String,
  pub payload_json:         String,
  pub comment:              Option<String>,
  pub created_by:           Option<i64>,
  pub cancels_operation_id: Option<i64>,
  pub recorded_at:          String,
}

impl RawOperation {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      operation_id:         row.get(0)?,
      market_id:            row.get(1)?,
      entity_type:          row.get(2)?,
      entity_id:            row.get(3)?,
      operation_type:       row.get(4)?,
      effective_at:         row.get(5)?,
      effective_tz:         row.get(6)?,
      effective_month:      row.get(7)?,
      status:               row.get(8)?,
      payload_json:         row.get(9)?,
      comment:              row.get(10)?,
      created_by:           row.get(11)?,
      cancels_operation_id: row.get(12)?,
      recorded_at:          row.get(13)?,
    })
  }

  pub fn into_operation(self) -> Result<Operation> {
    let kind = decode_operation_type(&self.operation_type)?;
    let payload_value: Value = serde_json::from_str(&self.payload_json)?;
    let payload = OperationPayload::from_parts(kind, payload_value)?;

    Ok(Operation {
      operation_id: self.operation_id,
      market_id: self.market_id,
      entity: decode_entity(self.entity_type.as_deref(), self.entity_id)?,
      payload,
      effective_at: decode_dt(&self.effective_at)?,
      effective_tz: self.effective_tz,
      effective_month: decode_date(&self.effective_month)?,
      status: self.status.into(),
      comment: self.comment,
      created_by: self.created_by,
      cancels_operation_id: self.cancels_operation_id,
      recorded_at: decode_dt(&self.recorded_at)?,
    })
  }
}

/// Column list matching [`RawFactRow`]'s field order.
pub const FACT_ROW_COLUMNS: &str =
  "operation_id, entity_type, entity_id, effective_at, payload_json";

/// The subset of an `operations` row the read model folds over.
pub struct RawFactRow {
  pub operation_id: i64,
  pub entity_type:  Option<String>,
  pub entity_id:    Option<i64>,
  pub effective_at: String,
  pub payload_json: String,
}

impl RawFactRow {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      operation_id: row.get(0)?,
      entity_type:  row.get(1)?,
      entity_id:    row.get(2)?,
      effective_at: row.get(3)?,
      payload_json: row.get(4)?,
    })
  }

  /// Unknown entity kinds read as "no entity" here: the row may still carry
  /// a usable `market_space_id` in its payload.
  pub fn into_fact_row(self) -> Result<FactRow> {
    let entity =
      decode_entity(self.entity_type.as_deref(), self.entity_id).unwrap_or(None);
    Ok(FactRow {
      operation_id: self.operation_id,
      entity,
      effective_at: decode_dt(&self.effective_at)?,
      payload: decode_payload_lenient(&self.payload_json),
    })
  }
}

/// Raw values read directly from a `markets` row.
pub struct RawMarket {
  pub market_id:  i64,
  pub name:       String,
  pub timezone:   String,
  pub created_at: String,
}

impl RawMarket {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      market_id:  row.get(0)?,
      name:       row.get(1)?,
      timezone:   row.get(2)?,
      created_at: row.get(3)?,
    })
  }

  pub fn into_market(self) -> Result<Market> {
    Ok(Market {
      market_id:  self.market_id,
      name:       self.name,
      timezone:   self.timezone,
      created_at: decode_dt(&self.created_at)?,
    })
  }
}

#[cfg(test)]
mod tests {
  use chrono::TimeZone;

  use super::*;

  #[test]
  fn encoded_instants_sort_chronologically() {
    let a = Utc.with_ymd_and_hms(2026, 1, 5, 9, 0, 0).unwrap();
    let b = a + chrono::Duration::microseconds(1);
    let c = Utc.with_ymd_and_hms(2026, 1, 5, 10, 0, 0).unwrap();
    let (ea, eb, ec) = (encode_dt(a), encode_dt(b), encode_dt(c));
    assert_eq!(ea.len(), eb.len());
    assert!(ea < eb && eb < ec);
    assert_eq!(decode_dt(&eb).unwrap(), b);
  }

  #[test]
  fn lenient_payload_tolerates_garbage() {
    assert!(decode_payload_lenient("not json").is_empty());
    assert!(decode_payload_lenient("[1,2]").is_empty());
    assert_eq!(decode_payload_lenient(r#"{"amount":1}"#).len(), 1);
  }
}
