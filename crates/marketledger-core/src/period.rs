//! Market-local calendar periods.
//!
//! Every market keeps its own timezone, so month boundaries are always
//! re-derived per market. A period is identified by the first day of its
//! month. Nothing here fails: malformed timezones and period strings degrade
//! to the application default timezone and the current month.

use chrono::{
  DateTime, Datelike, Duration, LocalResult, Months, NaiveDate, NaiveDateTime,
  NaiveTime, TimeZone, Utc,
};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::{market::Market, payload::is_iso_date_shape};

// ─── Types ───────────────────────────────────────────────────────────────────

/// The UTC instants bounding a market-local month. `end_exclusive` is the
/// start of the following month; a fact at `t` is in the period iff
/// `start <= t < end_exclusive`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonthBounds {
  pub start:         DateTime<Utc>,
  pub end_exclusive: DateTime<Utc>,
}

impl MonthBounds {
  pub fn contains(&self, at: DateTime<Utc>) -> bool {
    self.start <= at && at < self.end_exclusive
  }
}

/// One entry of a period picker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeriodOption {
  /// First day of the month.
  pub period: NaiveDate,
  /// `MM.YYYY`.
  pub label:  String,
}

impl PeriodOption {
  pub fn new(period: NaiveDate) -> Self {
    Self { period, label: period_label(period) }
  }
}

// ─── Pure helpers ────────────────────────────────────────────────────────────

/// First day of the month containing `date`.
pub fn month_start(date: NaiveDate) -> NaiveDate {
  date.with_day(1).unwrap_or(date)
}

/// The market-local month `at` falls into, as its first day.
pub fn effective_month(at: DateTime<Utc>, tz: Tz) -> NaiveDate {
  month_start(at.with_timezone(&tz).date_naive())
}

/// `MM.YYYY`.
pub fn period_label(period: NaiveDate) -> String {
  format!("{:02}.{:04}", period.month(), period.year())
}

/// Interpret a wall-clock time in `tz`. Ambiguous times (DST fall-back) take
/// the earlier instant; times inside a DST gap move forward to the first
/// instant that exists.
pub fn local_to_utc(local: NaiveDateTime, tz: Tz) -> DateTime<Utc> {
  match tz.from_local_datetime(&local) {
    LocalResult::Single(dt) | LocalResult::Ambiguous(dt, _) => {
      dt.with_timezone(&Utc)
    }
    LocalResult::None => {
      // Gaps are at most a few hours; step forward a minute at a time.
      let mut probe = local;
      for _ in 0..(24 * 60) {
        probe += Duration::minutes(1);
        if let Some(dt) = tz.from_local_datetime(&probe).earliest() {
          return dt.with_timezone(&Utc);
        }
      }
      Utc.from_utc_datetime(&local)
    }
  }
}

/// UTC bounds of the market-local month containing `period`.
pub fn month_bounds(period: NaiveDate, tz: Tz) -> MonthBounds {
  let first = month_start(period);
  let next = first.checked_add_months(Months::new(1)).unwrap_or(first);
  MonthBounds {
    start:         local_to_utc(first.and_time(NaiveTime::MIN), tz),
    end_exclusive: local_to_utc(next.and_time(NaiveTime::MIN), tz),
  }
}

/// Parse a strict `YYYY-MM-DD` or `YYYY-MM` period into its month start.
/// Returns `None` when the input is not one of those shapes.
///
/// `tz` is accepted for symmetry with the other resolvers; a calendar date
/// names the same month in every zone.
pub fn normalize_period_input(input: &str, _tz: Tz) -> Option<NaiveDate> {
  let s = input.trim();
  if is_iso_date_shape(s) {
    return NaiveDate::parse_from_str(s, "%Y-%m-%d").ok().map(month_start);
  }
  if is_iso_date_shape(&format!("{s}-01")) {
    return NaiveDate::parse_from_str(&format!("{s}-01"), "%Y-%m-%d").ok();
  }
  None
}

/// The trailing `count` months ending at (and including) `current`, most
/// recent first.
pub fn trailing_months(current: NaiveDate, count: u32) -> Vec<NaiveDate> {
  let current = month_start(current);
  (0..count)
    .filter_map(|i| current.checked_sub_months(Months::new(i)))
    .collect()
}

/// Merge recorded months into a picker list: the current month is always
/// present, and if fewer than three distinct months have facts or accruals
/// the trailing 24 months are added. Sorted most recent first.
pub fn period_options(
  recorded: impl IntoIterator<Item = NaiveDate>,
  current: NaiveDate,
) -> Vec<PeriodOption> {
  let mut months: std::collections::BTreeSet<NaiveDate> =
    recorded.into_iter().map(month_start).collect();
  let sparse = months.len() < 3;
  months.insert(month_start(current));

  if sparse {
    months.extend(trailing_months(current, 24));
  }

  months.into_iter().rev().map(PeriodOption::new).collect()
}

// ─── Resolver ────────────────────────────────────────────────────────────────

/// Resolves market timezones and periods against an application default.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeriodResolver {
  default_tz: Tz,
}

impl Default for PeriodResolver {
  fn default() -> Self { Self { default_tz: Tz::UTC } }
}

impl PeriodResolver {
  pub fn new(default_tz: Tz) -> Self { Self { default_tz } }

  pub fn default_tz(&self) -> Tz { self.default_tz }

  /// Parse a timezone name, falling back to the default.
  pub fn parse_tz(&self, name: Option<&str>) -> Tz {
    let Some(name) = name.map(str::trim).filter(|n| !n.is_empty()) else {
      return self.default_tz;
    };
    match name.parse::<Tz>() {
      Ok(tz) => tz,
      Err(_) => {
        tracing::warn!(
          timezone = name,
          fallback = %self.default_tz,
          "unparseable timezone, using default"
        );
        self.default_tz
      }
    }
  }

  /// The market's timezone; the default when the market is absent or its
  /// timezone is invalid.
  pub fn market_tz(&self, market: Option<&Market>) -> Tz {
    self.parse_tz(market.map(|m| m.timezone.as_str()))
  }

  /// The current instant in the market's timezone.
  pub fn market_now(&self, market: Option<&Market>) -> DateTime<Tz> {
    self.market_now_at(market, Utc::now())
  }

  pub fn market_now_at(
    &self,
    market: Option<&Market>,
    now: DateTime<Utc>,
  ) -> DateTime<Tz> {
    now.with_timezone(&self.market_tz(market))
  }

  /// The period named by `input` (`YYYY-MM-DD`), or the market's current
  /// month when the input is absent or unparseable.
  pub fn resolve_market_period(
    &self,
    market: Option<&Market>,
    input: Option<&str>,
  ) -> NaiveDate {
    self.resolve_market_period_at(market, input, Utc::now())
  }

  pub fn resolve_market_period_at(
    &self,
    market: Option<&Market>,
    input: Option<&str>,
    now: DateTime<Utc>,
  ) -> NaiveDate {
    let parsed = input
      .map(str::trim)
      .filter(|s| is_iso_date_shape(s))
      .and_then(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d").ok());
    match parsed {
      Some(date) => month_start(date),
      None => month_start(self.market_now_at(market, now).date_naive()),
    }
  }

  /// The current month in `tz`.
  pub fn current_month(&self, tz: Tz, now: DateTime<Utc>) -> NaiveDate {
    effective_month(now, tz)
  }
}

#[cfg(test)]
mod tests {
  use chrono::NaiveDate;
  use proptest::prelude::*;

  use super::*;

  fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
  }

  fn market(tz: &str) -> Market {
    Market {
      market_id:  1,
      name:       "Central".into(),
      timezone:   tz.into(),
      created_at: Utc::now(),
    }
  }

  #[test]
  fn garbage_timezone_falls_back_to_default() {
    let resolver = PeriodResolver::new(chrono_tz::Europe::Moscow);
    let m = market("Mars/Olympus_Mons");
    assert_eq!(resolver.market_tz(Some(&m)), chrono_tz::Europe::Moscow);
    assert_eq!(resolver.market_now(Some(&m)).timezone(), chrono_tz::Europe::Moscow);
    assert_eq!(resolver.market_tz(None), chrono_tz::Europe::Moscow);
    assert_eq!(resolver.parse_tz(Some("  ")), chrono_tz::Europe::Moscow);
  }

  #[test]
  fn market_now_uses_market_timezone() {
    let resolver = PeriodResolver::default();
    let m = market("Asia/Vladivostok");
    let now = Utc.with_ymd_and_hms(2026, 1, 31, 20, 0, 0).unwrap();
    let local = resolver.market_now_at(Some(&m), now);
    assert_eq!(local.date_naive(), date(2026, 2, 1));
  }

  #[test]
  fn resolve_market_period_truncates_dates() {
    let resolver = PeriodResolver::default();
    let m = market("Europe/Berlin");
    assert_eq!(
      resolver.resolve_market_period(Some(&m), Some("2025-12-17")),
      date(2025, 12, 1)
    );
  }

  #[test]
  fn resolve_market_period_falls_back_to_current_month() {
    let resolver = PeriodResolver::default();
    let m = market("Asia/Vladivostok");
    let now = Utc.with_ymd_and_hms(2026, 1, 31, 20, 0, 0).unwrap();
    for input in [None, Some("2026-01"), Some("garbage"), Some("2026-02-31")] {
      assert_eq!(
        resolver.resolve_market_period_at(Some(&m), input, now),
        date(2026, 2, 1),
        "{input:?}"
      );
    }
  }

  #[test]
  fn resolve_market_period_survives_garbage_timezone() {
    let resolver = PeriodResolver::default();
    let m = market("not a zone");
    let now = Utc.with_ymd_and_hms(2026, 3, 10, 12, 0, 0).unwrap();
    assert_eq!(resolver.resolve_market_period_at(Some(&m), None, now), date(2026, 3, 1));
  }

  #[test]
  fn normalize_period_input_accepts_day_and_month_forms() {
    let tz = Tz::UTC;
    assert_eq!(normalize_period_input("2026-01-20", tz), Some(date(2026, 1, 1)));
    assert_eq!(normalize_period_input("2026-01", tz), Some(date(2026, 1, 1)));
    assert_eq!(normalize_period_input("2026-13", tz), None);
    assert_eq!(normalize_period_input("01.2026", tz), None);
    assert_eq!(normalize_period_input("", tz), None);
  }

  #[test]
  fn month_bounds_are_local_midnights() {
    let tz: Tz = "Europe/Moscow".parse().unwrap();
    let bounds = month_bounds(date(2026, 1, 15), tz);
    assert_eq!(bounds.start, Utc.with_ymd_and_hms(2025, 12, 31, 21, 0, 0).unwrap());
    assert_eq!(
      bounds.end_exclusive,
      Utc.with_ymd_and_hms(2026, 1, 31, 21, 0, 0).unwrap()
    );
    assert!(bounds.contains(Utc.with_ymd_and_hms(2026, 1, 31, 20, 59, 59).unwrap()));
    assert!(!bounds.contains(bounds.end_exclusive));
  }

  #[test]
  fn month_bounds_handle_midnight_dst_gap() {
    // Chile springs forward at 00:00 local on the first Sunday of September
    // 2024 (2024-09-08); 2024-09-01 is unaffected, so probe the gap directly.
    let tz: Tz = "America/Santiago".parse().unwrap();
    let local = date(2024, 9, 8).and_time(NaiveTime::MIN);
    let at = local_to_utc(local, tz);
    assert_eq!(at.with_timezone(&tz).date_naive(), date(2024, 9, 8));
  }

  #[test]
  fn labels_are_month_dot_year() {
    assert_eq!(period_label(date(2026, 1, 1)), "01.2026");
    assert_eq!(period_label(date(2025, 12, 1)), "12.2025");
  }

  #[test]
  fn period_options_backfill_when_sparse() {
    let options = period_options(Vec::new(), date(2026, 1, 1));
    assert_eq!(options.len(), 24);
    assert_eq!(options[0], PeriodOption::new(date(2026, 1, 1)));
    assert_eq!(options[23].period, date(2024, 2, 1));
  }

  #[test]
  fn period_options_keep_recorded_months_only_when_enough() {
    let options = period_options(
      [date(2025, 10, 2), date(2025, 11, 20), date(2025, 12, 3), date(2025, 12, 1)],
      date(2026, 1, 9),
    );
    let periods: Vec<_> = options.iter().map(|o| o.period).collect();
    assert_eq!(
      periods,
      vec![date(2026, 1, 1), date(2025, 12, 1), date(2025, 11, 1), date(2025, 10, 1)]
    );
  }

  #[test]
  fn current_month_does_not_count_towards_recorded_months() {
    // Two recorded months plus the current one is still sparse.
    let options = period_options([date(2020, 3, 5), date(2020, 1, 9)], date(2026, 1, 9));
    let periods: Vec<_> = options.iter().map(|o| o.period).collect();
    assert_eq!(periods.len(), 26);
    assert_eq!(periods[0], date(2026, 1, 1));
    assert_eq!(periods[23], date(2024, 2, 1));
    assert_eq!(&periods[24..], &[date(2020, 3, 1), date(2020, 1, 1)]);

    // Recorded months that include the current one count once.
    let options = period_options(
      [date(2026, 1, 2), date(2025, 12, 3), date(2025, 11, 4)],
      date(2026, 1, 9),
    );
    assert_eq!(options.len(), 3);
  }

  proptest! {
    #[test]
    fn effective_month_is_local_month_start(
      secs in 0i64..4_102_444_800,
      zone in prop::sample::select(vec![
        "UTC", "Europe/Moscow", "Asia/Vladivostok", "America/Los_Angeles",
        "Pacific/Chatham", "America/Santiago", "Asia/Kathmandu",
      ]),
    ) {
      let tz: Tz = zone.parse().unwrap();
      let at = DateTime::<Utc>::from_timestamp(secs, 0).unwrap();
      let month = effective_month(at, tz);
      let local = at.with_timezone(&tz).date_naive();

      prop_assert_eq!(month.day(), 1);
      prop_assert_eq!(month.year(), local.year());
      prop_assert_eq!(month.month(), local.month());
      prop_assert!(month_bounds(month, tz).contains(at));
    }
  }
}
