//! Payload validation and normalization.
//!
//! Raw payloads arrive as loosely-typed JSON maps (form posts, API bodies).
//! Each operation type has one normalizer that coerces numeric-looking
//! strings, enforces required fields, and builds a fresh typed payload from
//! recognised keys only. Unknown keys are dropped.

use chrono::NaiveDate;
use serde_json::{Map, Value};

use crate::{
  error::ValidationError,
  operation::{
    AccrualAdjustment, ElectricityInput, OperationPayload, OperationType,
    PeriodClose, RentRateChange, SpaceAttrsChange, TenantSwitch,
  },
};

type Result<T> = std::result::Result<T, ValidationError>;

/// Normalize a payload for an operation type given by name.
///
/// The name is matched case-insensitively against the snake_case type names;
/// anything else fails on field `type`.
pub fn normalize(
  operation_type: &str,
  raw: &Map<String, Value>,
) -> Result<OperationPayload> {
  let kind = parse_type(operation_type)?;
  normalize_typed(kind, raw)
}

/// Parse a raw operation type name.
pub fn parse_type(operation_type: &str) -> Result<OperationType> {
  operation_type.trim().parse::<OperationType>().map_err(|_| {
    ValidationError::new(
      "type",
      format!("unknown operation type {operation_type:?}"),
    )
  })
}

/// Normalize a payload for a known operation type.
pub fn normalize_typed(
  kind: OperationType,
  raw: &Map<String, Value>,
) -> Result<OperationPayload> {
  let p = Fields(raw);
  Ok(match kind {
    OperationType::TenantSwitch => {
      OperationPayload::TenantSwitch(TenantSwitch {
        market_space_id: p.required_int("market_space_id")?,
        from_tenant_id:  p.optional_int("from_tenant_id")?,
        to_tenant_id:    p.optional_int("to_tenant_id")?,
        reason:          p.optional_string("reason")?,
      })
    }
    OperationType::RentRateChange => {
      OperationPayload::RentRateChange(RentRateChange {
        market_space_id: p.required_int("market_space_id")?,
        rent_rate:       p.required_number("rent_rate")?,
        currency:        p.optional_string("currency")?,
        unit:            p.optional_string("unit")?,
      })
    }
    OperationType::SpaceAttrsChange => {
      OperationPayload::SpaceAttrsChange(SpaceAttrsChange {
        market_space_id: p.required_int("market_space_id")?,
        area_sqm:        p.optional_number("area_sqm")?,
        activity_type:   p.optional_string("activity_type")?,
        location_id:     p.optional_int("location_id")?,
        space_type:      p.optional_string("type")?,
        is_active:       p.optional_bool("is_active")?,
      })
    }
    OperationType::ElectricityInput => {
      OperationPayload::ElectricityInput(ElectricityInput {
        market_space_id: p.required_int("market_space_id")?,
        amount:          p.required_number("amount")?,
        unit:            p.optional_string("unit")?,
      })
    }
    OperationType::AccrualAdjustment => {
      OperationPayload::AccrualAdjustment(AccrualAdjustment {
        market_space_id: p.required_int("market_space_id")?,
        amount_delta:    p.required_number("amount_delta")?,
        reason:          p.required_string("reason")?,
      })
    }
    OperationType::PeriodClose => OperationPayload::PeriodClose(PeriodClose {
      period: p.required_period("period")?,
      closed: p.optional_bool("closed")?.unwrap_or(true),
    }),
  })
}

// ─── Scalar coercion ─────────────────────────────────────────────────────────
//
// These are also used by the read model to pull values out of stored
// payloads without re-validating the whole shape.

/// An integer from a JSON number or an integer-looking string.
pub fn coerce_int(value: &Value) -> Option<i64> {
  match value {
    Value::Number(n) => n.as_i64().or_else(|| n.as_f64().and_then(whole_f64)),
    Value::String(s) => {
      let s = s.trim();
      s.parse::<i64>()
        .ok()
        .or_else(|| s.parse::<f64>().ok().and_then(whole_f64))
    }
    _ => None,
  }
}

/// `f` as an integer if it is whole and inside `i64` range; `as` would
/// saturate otherwise.
fn whole_f64(f: f64) -> Option<i64> {
  (f.is_finite() && f.fract() == 0.0 && f.abs() < i64::MAX as f64)
    .then_some(f as i64)
}

/// A finite float from a JSON number or a numeric-looking string.
pub fn coerce_number(value: &Value) -> Option<f64> {
  match value {
    Value::Number(n) => n.as_f64(),
    Value::String(s) => s.trim().parse::<f64>().ok().filter(|f| f.is_finite()),
    _ => None,
  }
}

fn coerce_bool(value: &Value) -> Option<bool> {
  match value {
    Value::Bool(b) => Some(*b),
    Value::Number(n) => match n.as_i64() {
      Some(0) => Some(false),
      Some(1) => Some(true),
      _ => None,
    },
    Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
      "1" | "true" | "yes" | "on" => Some(true),
      "0" | "false" | "no" | "off" => Some(false),
      _ => None,
    },
    _ => None,
  }
}

fn is_blank(value: &Value) -> bool {
  match value {
    Value::Null => true,
    Value::String(s) => s.trim().is_empty(),
    _ => false,
  }
}

/// `YYYY-MM-DD` exactly: four digits, two digits, two digits.
pub(crate) fn is_iso_date_shape(s: &str) -> bool {
  let b = s.as_bytes();
  b.len() == 10
    && b[4] == b'-'
    && b[7] == b'-'
    && b
      .iter()
      .enumerate()
      .all(|(i, c)| i == 4 || i == 7 || c.is_ascii_digit())
}

// ─── Field access ────────────────────────────────────────────────────────────

struct Fields<'a>(&'a Map<String, Value>);

impl Fields<'_> {
  /// The value under `key`, or `None` if absent or blank.
  fn present(&self, key: &str) -> Option<&Value> {
    self.0.get(key).filter(|v| !is_blank(v))
  }

  fn required<'v>(&'v self, key: &str) -> Result<&'v Value> {
    self.present(key).ok_or_else(|| ValidationError::required(key))
  }

  fn required_int(&self, key: &str) -> Result<i64> {
    let v = self.required(key)?;
    coerce_int(v).ok_or_else(|| ValidationError::new(key, "must be an integer"))
  }

  fn optional_int(&self, key: &str) -> Result<Option<i64>> {
    self
      .present(key)
      .map(|v| {
        coerce_int(v)
          .ok_or_else(|| ValidationError::new(key, "must be an integer"))
      })
      .transpose()
  }

  fn required_number(&self, key: &str) -> Result<f64> {
    let v = self.required(key)?;
    coerce_number(v).ok_or_else(|| ValidationError::new(key, "must be numeric"))
  }

  fn optional_number(&self, key: &str) -> Result<Option<f64>> {
    self
      .present(key)
      .map(|v| {
        coerce_number(v).ok_or_else(|| ValidationError::new(key, "must be numeric"))
      })
      .transpose()
  }

  fn optional_bool(&self, key: &str) -> Result<Option<bool>> {
    self
      .present(key)
      .map(|v| {
        coerce_bool(v).ok_or_else(|| ValidationError::new(key, "must be a boolean"))
      })
      .transpose()
  }

  fn string_of(key: &str, v: &Value) -> Result<String> {
    match v {
      Value::String(s) => Ok(s.trim().to_owned()),
      Value::Number(n) => Ok(n.to_string()),
      _ => Err(ValidationError::new(key, "must be a string")),
    }
  }

  fn required_string(&self, key: &str) -> Result<String> {
    let v = self.required(key)?;
    Self::string_of(key, v)
  }

  fn optional_string(&self, key: &str) -> Result<Option<String>> {
    self.present(key).map(|v| Self::string_of(key, v)).transpose()
  }

  fn required_period(&self, key: &str) -> Result<String> {
    let s = self.required_string(key)?;
    if !is_iso_date_shape(&s)
      || NaiveDate::parse_from_str(&s, "%Y-%m-%d").is_err()
    {
      return Err(ValidationError::new(key, "must be a date in YYYY-MM-DD format"));
    }
    Ok(s)
  }
}

#[cfg(test)]
mod tests {
  use proptest::prelude::*;
  use serde_json::json;
  use strum::IntoEnumIterator as _;

  use super::*;

  fn map(v: Value) -> Map<String, Value> {
    match v {
      Value::Object(m) => m,
      _ => panic!("not an object"),
    }
  }

  fn minimal(kind: OperationType) -> Map<String, Value> {
    map(match kind {
      OperationType::TenantSwitch => json!({ "market_space_id": 1 }),
      OperationType::RentRateChange => {
        json!({ "market_space_id": 1, "rent_rate": "1500.50" })
      }
      OperationType::SpaceAttrsChange => json!({ "market_space_id": "1" }),
      OperationType::ElectricityInput => {
        json!({ "market_space_id": 1, "amount": 100 })
      }
      OperationType::AccrualAdjustment => {
        json!({ "market_space_id": 1, "amount_delta": -25, "reason": "refund" })
      }
      OperationType::PeriodClose => json!({ "period": "2026-01-01" }),
    })
  }

  #[test]
  fn normalizing_twice_is_idempotent_for_every_type() {
    for kind in OperationType::iter() {
      let once = normalize_typed(kind, &minimal(kind)).unwrap();
      let again = normalize_typed(kind, &once.to_json().unwrap()).unwrap();
      assert_eq!(once, again, "{kind}");
      assert_eq!(once.operation_type(), kind);
    }
  }

  #[test]
  fn unknown_type_is_rejected_on_type_field() {
    let err = normalize("bogus_type", &Map::new()).unwrap_err();
    assert_eq!(err.field, "type");
  }

  #[test]
  fn type_names_are_case_insensitive() {
    let p = normalize("ELECTRICITY_INPUT", &minimal(OperationType::ElectricityInput))
      .unwrap();
    assert_eq!(p.operation_type(), OperationType::ElectricityInput);
  }

  #[test]
  fn numeric_strings_are_coerced() {
    let p = normalize_typed(
      OperationType::RentRateChange,
      &map(json!({ "market_space_id": " 42 ", "rent_rate": "1500.50" })),
    )
    .unwrap();
    assert_eq!(
      p,
      OperationPayload::RentRateChange(RentRateChange {
        market_space_id: 42,
        rent_rate:       1500.5,
        currency:        None,
        unit:            None,
      })
    );
  }

  #[test]
  fn non_numeric_amount_names_the_field() {
    let err = normalize_typed(
      OperationType::ElectricityInput,
      &map(json!({ "market_space_id": 1, "amount": "lots" })),
    )
    .unwrap_err();
    assert_eq!(err.field, "amount");
    assert_eq!(err.message, "must be numeric");
  }

  #[test]
  fn out_of_range_ids_are_rejected_not_saturated() {
    for raw in [json!("1e30"), json!(1e30), json!("-1e30"), json!("9.3e18")] {
      let err = normalize_typed(
        OperationType::TenantSwitch,
        &map(json!({ "market_space_id": raw })),
      )
      .unwrap_err();
      assert_eq!(err.field, "market_space_id", "{raw}");
      assert_eq!(err.message, "must be an integer", "{raw}");
    }
    assert_eq!(coerce_int(&json!("12.0")), Some(12));
    assert_eq!(coerce_int(&json!(" 7 ")), Some(7));
    assert_eq!(coerce_int(&json!("inf")), None);
  }

  #[test]
  fn blank_required_fields_are_rejected() {
    let err = normalize_typed(
      OperationType::AccrualAdjustment,
      &map(json!({ "market_space_id": 1, "amount_delta": 10, "reason": "  " })),
    )
    .unwrap_err();
    assert_eq!(err.field, "reason");

    let err = normalize_typed(
      OperationType::TenantSwitch,
      &map(json!({ "market_space_id": null })),
    )
    .unwrap_err();
    assert_eq!(err.field, "market_space_id");
  }

  #[test]
  fn unknown_keys_are_stripped() {
    let p = normalize_typed(
      OperationType::ElectricityInput,
      &map(json!({ "market_space_id": 3, "amount": 5, "injected": "x" })),
    )
    .unwrap();
    let json = p.to_json().unwrap();
    assert!(!json.contains_key("injected"));
    assert_eq!(json.len(), 2);
  }

  #[test]
  fn tenant_switch_allows_move_out() {
    let p = normalize_typed(
      OperationType::TenantSwitch,
      &map(json!({ "market_space_id": 3, "from_tenant_id": "12", "to_tenant_id": "" })),
    )
    .unwrap();
    let OperationPayload::TenantSwitch(ts) = p else { panic!("wrong variant") };
    assert_eq!(ts.from_tenant_id, Some(12));
    assert_eq!(ts.to_tenant_id, None);
  }

  #[test]
  fn space_attrs_keep_only_present_keys() {
    let p = normalize_typed(
      OperationType::SpaceAttrsChange,
      &map(json!({ "market_space_id": 3, "is_active": "0", "area_sqm": "12.5" })),
    )
    .unwrap();
    let OperationPayload::SpaceAttrsChange(attrs) = p else {
      panic!("wrong variant")
    };
    assert_eq!(attrs.is_active, Some(false));
    assert_eq!(attrs.area_sqm, Some(12.5));
    assert_eq!(attrs.space_type, None);
    assert_eq!(attrs.location_id, None);
  }

  #[test]
  fn space_attrs_rejects_bad_bool() {
    let err = normalize_typed(
      OperationType::SpaceAttrsChange,
      &map(json!({ "market_space_id": 3, "is_active": "maybe" })),
    )
    .unwrap_err();
    assert_eq!(err.field, "is_active");
  }

  #[test]
  fn period_close_defaults_closed_to_true() {
    let p = normalize_typed(OperationType::PeriodClose, &minimal(OperationType::PeriodClose))
      .unwrap();
    assert_eq!(
      p,
      OperationPayload::PeriodClose(PeriodClose {
        period: "2026-01-01".into(),
        closed: true,
      })
    );
    assert_eq!(p.market_space_id(), None);
  }

  #[test]
  fn period_close_rejects_malformed_periods() {
    for bad in ["2026-01", "2026-1-01", "01.01.2026", "2026-02-30", "20260101"] {
      let err = normalize_typed(
        OperationType::PeriodClose,
        &map(json!({ "period": bad })),
      )
      .unwrap_err();
      assert_eq!(err.field, "period", "{bad}");
    }
  }

  proptest! {
    #[test]
    fn period_close_accepts_only_iso_dates(s in "\\PC{0,12}") {
      let result = normalize_typed(
        OperationType::PeriodClose,
        &map(json!({ "period": s.clone() })),
      );
      let valid = is_iso_date_shape(s.trim())
        && NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").is_ok();
      prop_assert_eq!(result.is_ok(), valid);
    }

    #[test]
    fn electricity_normalization_is_idempotent(
      space in 1i64..1_000_000,
      amount in -1.0e9f64..1.0e9,
    ) {
      let raw = map(json!({ "market_space_id": space, "amount": amount.to_string() }));
      let once = normalize_typed(OperationType::ElectricityInput, &raw).unwrap();
      let again = normalize_typed(
        OperationType::ElectricityInput,
        &once.to_json().unwrap(),
      ).unwrap();
      prop_assert_eq!(once, again);
    }
  }
}
