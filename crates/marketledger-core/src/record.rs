//! Save-time normalization of new operations.
//!
//! Every bookkeeping field is derived here before the row becomes visible to
//! readers. The steps are idempotent: preparing an already-prepared operation
//! again yields the same result.

use chrono::{DateTime, NaiveDate, SubsecRound as _, Utc};

use crate::{
  Result,
  market::{Actor, Market},
  operation::{
    EffectiveAt, EntityRef, NewOperation, Operation, OperationPayload,
    OperationStatus,
  },
  payload,
  period::{PeriodResolver, effective_month, local_to_utc},
};

/// A validated operation ready for insertion. Only the store-assigned
/// `operation_id` and `recorded_at` are missing.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedOperation {
  pub market_id:            i64,
  pub entity:               Option<EntityRef>,
  pub payload:              OperationPayload,
  pub effective_at:         DateTime<Utc>,
  pub effective_tz:         String,
  pub effective_month:      NaiveDate,
  pub status:               OperationStatus,
  pub comment:              Option<String>,
  pub created_by:           Option<i64>,
  pub cancels_operation_id: Option<i64>,
}

impl PreparedOperation {
  /// Attach the store-assigned identity.
  pub fn into_operation(
    self,
    operation_id: i64,
    recorded_at: DateTime<Utc>,
  ) -> Operation {
    Operation {
      operation_id,
      market_id: self.market_id,
      entity: self.entity,
      payload: self.payload,
      effective_at: self.effective_at,
      effective_tz: self.effective_tz,
      effective_month: self.effective_month,
      status: self.status,
      comment: self.comment,
      created_by: self.created_by,
      cancels_operation_id: self.cancels_operation_id,
      recorded_at,
    }
  }
}

/// Validate and stamp a new operation.
///
/// `market` is the market record if one exists; a missing market or an
/// invalid market timezone falls back to the resolver's default timezone.
/// A payload validation failure aborts before anything else is derived.
pub fn prepare(
  input: NewOperation,
  market: Option<&Market>,
  actor: Option<Actor>,
  resolver: &PeriodResolver,
  now: DateTime<Utc>,
) -> Result<PreparedOperation> {
  let payload = payload::normalize(&input.operation_type, &input.payload)?;

  let entity = input
    .entity
    .or_else(|| payload.market_space_id().map(EntityRef::MarketSpace));

  let created_by = input.created_by.or(actor.map(|a| a.user_id));

  let tz = resolver.market_tz(market);

  // Stored with microsecond precision.
  let effective_at = match input.effective_at {
    Some(EffectiveAt::Instant(at)) => at,
    Some(EffectiveAt::Local(local)) => local_to_utc(local, tz),
    None => now,
  }
  .trunc_subsecs(6);

  let comment = input
    .comment
    .map(|c| c.trim().to_owned())
    .filter(|c| !c.is_empty());

  Ok(PreparedOperation {
    market_id: input.market_id,
    entity,
    payload,
    effective_at,
    effective_tz: tz.name().to_owned(),
    effective_month: effective_month(effective_at, tz),
    status: input.status.unwrap_or_default(),
    comment,
    created_by,
    cancels_operation_id: input.cancels_operation_id,
  })
}

#[cfg(test)]
mod tests {
  use chrono::{NaiveDate, TimeZone};
  use serde_json::{Map, Value, json};

  use super::*;
  use crate::{Error, operation::ElectricityInput};

  fn map(v: Value) -> Map<String, Value> {
    match v {
      Value::Object(m) => m,
      _ => panic!("not an object"),
    }
  }

  fn market(tz: &str) -> Market {
    Market {
      market_id:  9,
      name:       "Riverside".into(),
      timezone:   tz.into(),
      created_at: Utc::now(),
    }
  }

  fn electricity(amount: i64) -> NewOperation {
    NewOperation::new(
      9,
      "electricity_input",
      map(json!({ "market_space_id": "5", "amount": amount, "extra": true })),
    )
  }

  #[test]
  fn stamps_all_bookkeeping_fields() {
    let resolver = PeriodResolver::default();
    let m = market("Asia/Vladivostok");
    // 2026-01-31 20:00 UTC is already February in Vladivostok (UTC+10).
    let now = Utc.with_ymd_and_hms(2026, 1, 31, 20, 0, 0).unwrap();

    let prepared = prepare(
      electricity(100),
      Some(&m),
      Some(Actor { user_id: 77 }),
      &resolver,
      now,
    )
    .unwrap();

    assert_eq!(prepared.entity, Some(EntityRef::MarketSpace(5)));
    assert_eq!(prepared.created_by, Some(77));
    assert_eq!(prepared.effective_tz, "Asia/Vladivostok");
    assert_eq!(prepared.effective_at, now);
    assert_eq!(
      prepared.effective_month,
      NaiveDate::from_ymd_opt(2026, 2, 1).unwrap()
    );
    assert_eq!(prepared.status, OperationStatus::Applied);
    assert_eq!(
      prepared.payload,
      OperationPayload::ElectricityInput(ElectricityInput {
        market_space_id: 5,
        amount:          100.0,
        unit:            None,
      })
    );
  }

  #[test]
  fn explicit_fields_are_not_overwritten() {
    let resolver = PeriodResolver::default();
    let mut input = electricity(1);
    input.entity = Some(EntityRef::MarketSpace(6));
    input.created_by = Some(3);

    let prepared = prepare(
      input,
      None,
      Some(Actor { user_id: 77 }),
      &resolver,
      Utc::now(),
    )
    .unwrap();
    assert_eq!(prepared.entity, Some(EntityRef::MarketSpace(6)));
    assert_eq!(prepared.created_by, Some(3));
  }

  #[test]
  fn local_effective_at_is_interpreted_in_market_timezone() {
    let resolver = PeriodResolver::default();
    let m = market("Europe/Moscow");
    let local = NaiveDate::from_ymd_opt(2026, 2, 1)
      .unwrap()
      .and_hms_opt(1, 30, 0)
      .unwrap();
    let input = electricity(1).effective_at(EffectiveAt::Local(local));

    let prepared = prepare(input, Some(&m), None, &resolver, Utc::now()).unwrap();
    assert_eq!(
      prepared.effective_at,
      Utc.with_ymd_and_hms(2026, 1, 31, 22, 30, 0).unwrap()
    );
    assert_eq!(
      prepared.effective_month,
      NaiveDate::from_ymd_opt(2026, 2, 1).unwrap()
    );
  }

  #[test]
  fn missing_market_uses_default_timezone() {
    let resolver = PeriodResolver::new(chrono_tz::Europe::Berlin);
    let prepared =
      prepare(electricity(1), None, None, &resolver, Utc::now()).unwrap();
    assert_eq!(prepared.effective_tz, "Europe/Berlin");
  }

  #[test]
  fn garbage_market_timezone_does_not_fail_the_save() {
    let resolver = PeriodResolver::default();
    let m = market("Neverland/Lost_Boys");
    let prepared =
      prepare(electricity(1), Some(&m), None, &resolver, Utc::now()).unwrap();
    assert_eq!(prepared.effective_tz, "UTC");
  }

  #[test]
  fn invalid_payload_aborts() {
    let resolver = PeriodResolver::default();
    let input = NewOperation::new(9, "rent_rate_change", map(json!({ "market_space_id": 1 })));
    let err = prepare(input, None, None, &resolver, Utc::now()).unwrap_err();
    assert!(matches!(err, Error::Validation(ref v) if v.field == "rent_rate"));
  }

  #[test]
  fn preparing_twice_is_stable() {
    let resolver = PeriodResolver::default();
    let m = market("America/Los_Angeles");
    let now = Utc.with_ymd_and_hms(2026, 3, 1, 5, 0, 0).unwrap();
    let first = prepare(electricity(10), Some(&m), None, &resolver, now).unwrap();

    let again = NewOperation {
      market_id:            first.market_id,
      operation_type:       first.payload.operation_type().to_string(),
      payload:              first.payload.to_json().unwrap(),
      entity:               first.entity,
      effective_at:         Some(EffectiveAt::Instant(first.effective_at)),
      status:               Some(first.status.clone()),
      comment:              first.comment.clone(),
      created_by:           first.created_by,
      cancels_operation_id: first.cancels_operation_id,
    };
    let second = prepare(again, Some(&m), None, &resolver, Utc::now()).unwrap();
    assert_eq!(first, second);
    // 05:00 UTC on March 1 is still February 28 in Los Angeles.
    assert_eq!(first.effective_month, NaiveDate::from_ymd_opt(2026, 2, 1).unwrap());
  }
}
