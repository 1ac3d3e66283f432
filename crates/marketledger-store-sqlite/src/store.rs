//! [`SqliteStore`], the SQLite implementation of [`LedgerStore`].

use std::{collections::BTreeMap, path::Path};

use chrono::{NaiveDate, SubsecRound as _, Utc};
use chrono_tz::Tz;
use rusqlite::OptionalExtension as _;

use marketledger_core::{
  market::{Accrual, Actor, Market, NewAccrual, NewMarket},
  operation::{NewOperation, Operation, OperationType},
  period::{
    MonthBounds, PeriodOption, PeriodResolver, month_bounds, month_start,
    period_options,
  },
  record,
  state::{FactRow, SpaceFacts, SpaceState, sum_flow_by_space},
  store::{LedgerStore, OperationQuery},
};

use crate::{
  Error, Result,
  encode::{
    FACT_ROW_COLUMNS, OPERATION_COLUMNS, RawFactRow, RawMarket, RawOperation,
    decode_date, encode_date, encode_dt, encode_entity, encode_payload,
  },
  schema::SCHEMA,
};

// ─── Store ───────────────────────────────────────────────────────────────────

/// A market ledger backed by a single SQLite file.
///
/// Cloning is cheap; the inner connection is reference-counted.
#[derive(Clone)]
pub struct SqliteStore {
  pub(crate) conn: tokio_rusqlite::Connection,
  resolver:        PeriodResolver,
}

impl SqliteStore {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    let store = Self { conn, resolver: PeriodResolver::default() };
    store.init_schema().await?;
    Ok(store)
  }

  /// Open an in-memory store for tests.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    let store = Self { conn, resolver: PeriodResolver::default() };
    store.init_schema().await?;
    Ok(store)
  }

  /// Use `tz` wherever a market timezone is missing or invalid.
  pub fn with_default_timezone(mut self, tz: Tz) -> Self {
    self.resolver = PeriodResolver::new(tz);
    self
  }

  /// The resolver this store applies; hand it to the API layer so both use
  /// the same default timezone.
  pub fn resolver(&self) -> &PeriodResolver { &self.resolver }

  async fn init_schema(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        conn.execute_batch(SCHEMA)?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  /// The timezone periods of `market_id` are computed in.
  async fn market_tz(&self, market_id: i64) -> Result<Tz> {
    let market = self.get_market(market_id).await?;
    Ok(self.resolver.market_tz(market.as_ref()))
  }

  async fn period_bounds(
    &self,
    market_id: i64,
    period: NaiveDate,
  ) -> Result<(NaiveDate, MonthBounds)> {
    let tz = self.market_tz(market_id).await?;
    let period = month_start(period);
    Ok((period, month_bounds(period, tz)))
  }

  /// Fact rows of one type for a market, effective before
  /// `bounds.end_exclusive` and, if `from_start`, at or after
  /// `bounds.start`. Optionally restricted to one trading space.
  async fn fact_rows(
    &self,
    market_id: i64,
    kind: OperationType,
    market_space_id: Option<i64>,
    bounds: &MonthBounds,
    from_start: bool,
  ) -> Result<Vec<FactRow>> {
    let kind_str  = kind.as_str();
    let until_str = encode_dt(bounds.end_exclusive);
    let from_str  = from_start.then(|| encode_dt(bounds.start));

    let raws: Vec<RawFactRow> = self
      .conn
      .call(move |conn| {
        let sql = format!(
          "SELECT {FACT_ROW_COLUMNS}
           FROM operations
           WHERE market_id = ?1
             AND operation_type = ?2
             AND effective_at < ?3
             AND (?4 IS NULL OR effective_at >= ?4)
             AND (?5 IS NULL OR (entity_type = 'market_space' AND entity_id = ?5))
           ORDER BY effective_at, operation_id"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
          .query_map(
            rusqlite::params![market_id, kind_str, until_str, from_str, market_space_id],
            RawFactRow::from_row,
          )?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawFactRow::into_fact_row).collect()
  }

  async fn flow_totals(
    &self,
    market_id: i64,
    period: NaiveDate,
    kind: OperationType,
    key: &str,
  ) -> Result<BTreeMap<i64, f64>> {
    let (_, bounds) = self.period_bounds(market_id, period).await?;
    let rows = self.fact_rows(market_id, kind, None, &bounds, true).await?;
    Ok(sum_flow_by_space(&rows, &bounds, key))
  }
}

// ─── LedgerStore impl ────────────────────────────────────────────────────────

impl LedgerStore for SqliteStore {
  type Error = Error;

  // ── Markets ───────────────────────────────────────────────────────────────

  async fn add_market(&self, input: NewMarket) -> Result<Market> {
    let created_at = Utc::now().trunc_subsecs(6);
    let at_str     = encode_dt(created_at);
    let name       = input.name.clone();
    let timezone   = input.timezone.clone();

    let market_id = self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO markets (name, timezone, created_at) VALUES (?1, ?2, ?3)",
          rusqlite::params![name, timezone, at_str],
        )?;
        Ok(conn.last_insert_rowid())
      })
      .await?;

    tracing::info!(market_id, timezone = %input.timezone, "market created");

    Ok(Market {
      market_id,
      name: input.name,
      timezone: input.timezone,
      created_at,
    })
  }

  async fn get_market(&self, market_id: i64) -> Result<Option<Market>> {
    let raw: Option<RawMarket> = self
      .conn
      .call(move |conn| {
        Ok(conn
          .query_row(
            "SELECT market_id, name, timezone, created_at
             FROM markets WHERE market_id = ?1",
            rusqlite::params![market_id],
            RawMarket::from_row,
          )
          .optional()?)
      })
      .await?;

    raw.map(RawMarket::into_market).transpose()
  }

  async fn list_markets(&self) -> Result<Vec<Market>> {
    let raws: Vec<RawMarket> = self
      .conn
      .call(|conn| {
        let mut stmt = conn.prepare(
          "SELECT market_id, name, timezone, created_at
           FROM markets ORDER BY market_id",
        )?;
        let rows = stmt
          .query_map([], RawMarket::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawMarket::into_market).collect()
  }

  async fn set_market_timezone(
    &self,
    market_id: i64,
    timezone: String,
  ) -> Result<Market> {
    let tz_str = timezone.clone();
    let changed = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "UPDATE markets SET timezone = ?1 WHERE market_id = ?2",
          rusqlite::params![tz_str, market_id],
        )?)
      })
      .await?;

    if changed == 0 {
      return Err(Error::MarketNotFound(market_id));
    }
    tracing::info!(market_id, %timezone, "market timezone changed");

    self
      .get_market(market_id)
      .await?
      .ok_or(Error::MarketNotFound(market_id))
  }

  // ── Accruals ──────────────────────────────────────────────────────────────

  async fn record_accrual(&self, input: NewAccrual) -> Result<Accrual> {
    let NewAccrual { market_id, market_space_id, period, amount } = input;
    let period      = month_start(period);
    let recorded_at = Utc::now().trunc_subsecs(6);
    let period_str  = encode_date(period);
    let at_str      = encode_dt(recorded_at);

    let accrual_id = self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO accruals (market_id, market_space_id, period, amount, recorded_at)
           VALUES (?1, ?2, ?3, ?4, ?5)",
          rusqlite::params![market_id, market_space_id, period_str, amount, at_str],
        )?;
        Ok(conn.last_insert_rowid())
      })
      .await?;

    Ok(Accrual {
      accrual_id,
      market_id,
      market_space_id,
      period,
      amount,
      recorded_at,
    })
  }

  // ── Operations: append-only writes ─ ───────────────────────────────────────

  async fn record_operation(
    &self,
    input: NewOperation,
    actor: Option<Actor>,
  ) -> Result<Operation> {
    let market = self.get_market(input.market_id).await?;
    if market.is_none() {
      tracing::debug!(
        market_id = input.market_id,
        "recording operation for unknown market; using default timezone"
      );
    }

    let prepared =
      record::prepare(input, market.as_ref(), actor, &self.resolver, Utc::now())?;
    let recorded_at = Utc::now().trunc_subsecs(6);

    let (entity_type, entity_id) = encode_entity(prepared.entity);
    let market_id        = prepared.market_id;
    let kind_str         = prepared.payload.operation_type().as_str();
    let payload_str      = encode_payload(&prepared.payload)?;
    let effective_at_str = encode_dt(prepared.effective_at);
    let effective_tz     = prepared.effective_tz.clone();
    let month_str        = encode_date(prepared.effective_month);
    let status_str       = prepared.status.as_str().to_owned();
    let comment          = prepared.comment.clone();
    let created_by       = prepared.created_by;
    let cancels          = prepared.cancels_operation_id;
    let recorded_at_str  = encode_dt(recorded_at);

    let inserted: Option<i64> = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;

        if let Some(cancelled) = cancels {
          let found = tx
            .query_row(
              "SELECT 1 FROM operations WHERE operation_id = ?1 AND market_id = ?2",
              rusqlite::params![cancelled, market_id],
              |_| Ok(()),
            )
            .optional()?;
          if found.is_none() {
            return Ok(None);
          }
        }

        tx.execute(
          "INSERT INTO operations (
             market_id, entity_type, entity_id, operation_type,
             effective_at, effective_tz, effective_month, status,
             payload_json, comment, created_by, cancels_operation_id,
             recorded_at
           ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
          rusqlite::params![
            market_id,
            entity_type,
            entity_id,
            kind_str,
            effective_at_str,
            effective_tz,
            month_str,
            status_str,
            payload_str,
            comment,
            created_by,
            cancels,
            recorded_at_str,
          ],
        )?;
        let id = tx.last_insert_rowid();
        tx.commit()?;
        Ok(Some(id))
      })
      .await?;

    let Some(operation_id) = inserted else {
      return Err(Error::cancelled_not_found(
        cancels.unwrap_or_default(),
        market_id,
      ));
    };

    tracing::debug!(
      operation_id,
      market_id,
      operation_type = kind_str,
      effective_month = %prepared.effective_month,
      "operation recorded"
    );

    Ok(prepared.into_operation(operation_id, recorded_at))
  }

  // ── Reads ─────────────────────────────────────────────────────────────────

  async fn get_operation(&self, operation_id: i64) -> Result<Option<Operation>> {
    let raw: Option<RawOperation> = self
      .conn
      .call(move |conn| {
        Ok(conn
          .query_row(
            &format!(
              "SELECT {OPERATION_COLUMNS} FROM operations WHERE operation_id = ?1"
            ),
            rusqlite::params![operation_id],
            RawOperation::from_row,
          )
          .optional()?)
      })
      .await?;

    raw.map(RawOperation::into_operation).transpose()
  }

  async fn list_operations(&self, query: &OperationQuery) -> Result<Vec<Operation>> {
    use rusqlite::types::Value as SqlValue;

    // Build WHERE clause dynamically.
    let mut conds: Vec<String> = vec!["market_id = ?".into()];
    let mut params: Vec<SqlValue> = vec![SqlValue::Integer(query.market_id)];

    if let Some(space) = query.market_space_id {
      conds.push("entity_type = 'market_space' AND entity_id = ?".into());
      params.push(SqlValue::Integer(space));
    }
    if !query.types.is_empty() {
      let marks = vec!["?"; query.types.len()].join(", ");
      conds.push(format!("operation_type IN ({marks})"));
      params.extend(
        query
          .types
          .iter()
          .map(|t| SqlValue::Text(t.as_str().to_owned())),
      );
    }
    if let Some(period) = query.period {
      conds.push("effective_month = ?".into());
      params.push(SqlValue::Text(encode_date(month_start(period))));
    }
    // Out-of-range values clamp to "everything" rather than wrapping negative.
    let clamp = |n: usize| i64::try_from(n).unwrap_or(i64::MAX);
    params.push(SqlValue::Integer(clamp(query.limit.unwrap_or(100))));
    params.push(SqlValue::Integer(clamp(query.offset.unwrap_or(0))));

    let sql = format!(
      "SELECT {OPERATION_COLUMNS}
       FROM operations
       WHERE {}
       ORDER BY effective_at, operation_id
       LIMIT ? OFFSET ?",
      conds.join(" AND ")
    );

    let raws: Vec<RawOperation> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
          .query_map(rusqlite::params_from_iter(params), RawOperation::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawOperation::into_operation).collect()
  }

  async fn space_state_for_period(
    &self,
    market_id: i64,
    period: NaiveDate,
    market_space_id: i64,
  ) -> Result<SpaceState> {
    let (period, bounds) = self.period_bounds(market_id, period).await?;
    let space = Some(market_space_id);

    let tenant_switches = self
      .fact_rows(market_id, OperationType::TenantSwitch, space, &bounds, false)
      .await?;
    let rent_rate_changes = self
      .fact_rows(market_id, OperationType::RentRateChange, space, &bounds, false)
      .await?;
    let electricity = self
      .fact_rows(market_id, OperationType::ElectricityInput, space, &bounds, true)
      .await?;
    let adjustments = self
      .fact_rows(market_id, OperationType::AccrualAdjustment, space, &bounds, true)
      .await?;

    Ok(
      SpaceFacts {
        tenant_switches:   &tenant_switches,
        rent_rate_changes: &rent_rate_changes,
        electricity:       &electricity,
        adjustments:       &adjustments,
      }
      .fold(market_id, market_space_id, period, &bounds),
    )
  }

  async fn electricity_totals_for_period(
    &self,
    market_id: i64,
    period: NaiveDate,
  ) -> Result<BTreeMap<i64, f64>> {
    self
      .flow_totals(market_id, period, OperationType::ElectricityInput, "amount")
      .await
  }

  async fn adjustment_totals_for_period(
    &self,
    market_id: i64,
    period: NaiveDate,
  ) -> Result<BTreeMap<i64, f64>> {
    self
      .flow_totals(
        market_id,
        period,
        OperationType::AccrualAdjustment,
        "amount_delta",
      )
      .await
  }

  async fn available_periods(
    &self,
    market_id: i64,
    tz: Tz,
  ) -> Result<Vec<PeriodOption>> {
    let month_strs: Vec<String> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(
          "SELECT effective_month FROM operations WHERE market_id = ?1
           UNION
           SELECT period FROM accruals WHERE market_id = ?1",
        )?;
        let rows = stmt
          .query_map(rusqlite::params![market_id], |r| r.get(0))?
          .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(rows)
      })
      .await?;

    let months = month_strs
      .iter()
      .map(|s| decode_date(s))
      .collect::<Result<Vec<_>>>()?;

    let current = self.resolver.current_month(tz, Utc::now());
    Ok(period_options(months, current))
  }
}
