//! Splits a budget span into calendar-month reporting intervals.
//!
//! The span is walked month by month in the caller's time zone. Each interval starts at the first
//! instant of its month (the budget start for the first one) and ends at 23:59:59 on the last day
//! of the month. Months after the current month are never produced because the ledger cannot have
//! actuals for them yet.

use chrono::{DateTime, Datelike, Duration, LocalResult, NaiveDate, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use serde::Serialize;

/// One calendar month, first instant to last second.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Serialize)]
pub struct ReportingInterval {
    pub start: DateTime<Tz>,
    pub end: DateTime<Tz>,
}

impl ReportingInterval {
    pub fn start_utc(&self) -> DateTime<Utc> {
        self.start.with_timezone(&Utc)
    }

    pub fn end_utc(&self) -> DateTime<Utc> {
        self.end.with_timezone(&Utc)
    }
}

/// Returns the monthly reporting intervals between `start` and `end` in `zone`, stopping at the
/// end of the current month.
pub fn intervals<S, E>(start: DateTime<S>, end: DateTime<E>, zone: Tz) -> Vec<ReportingInterval>
where
    S: TimeZone,
    E: TimeZone,
{
    intervals_at(start, end, zone, Utc::now())
}

/// Like [`intervals`], with the current time supplied by the caller.
pub fn intervals_at<S, E>(
    start: DateTime<S>,
    end: DateTime<E>,
    zone: Tz,
    now: DateTime<Utc>,
) -> Vec<ReportingInterval>
where
    S: TimeZone,
    E: TimeZone,
{
    let end = end.with_timezone(&zone);
    let now = now.with_timezone(&zone);
    let last_instant_this_month = end_of_month(zone, now.year(), now.month());

    let mut intervals = Vec::new();
    let mut cursor = start.with_timezone(&zone);
    while cursor < end && cursor < last_instant_this_month {
        let (year, month) = (cursor.year(), cursor.month());
        intervals.push(ReportingInterval {
            start: cursor,
            end: end_of_month(zone, year, month),
        });
        let (next_year, next_month) = if month == 12 {
            (year + 1, 1)
        } else {
            (year, month + 1)
        };
        cursor = local(zone, first_day(next_year, next_month).and_hms_opt(0, 0, 0));
    }
    intervals
}

/// The number of days in `month` of `year` in the proleptic Gregorian calendar.
pub fn days_in_month(year: i32, month: u32) -> u32 {
    match month {
        4 | 6 | 9 | 11 => 30,
        2 if is_leap_year(year) => 29,
        2 => 28,
        _ => 31,
    }
}

/// The first instant of `date` in `zone`.
pub fn start_of_day(zone: Tz, date: NaiveDate) -> DateTime<Tz> {
    local(zone, date.and_hms_opt(0, 0, 0))
}

/// 23:59:59 on `date` in `zone`.
pub fn end_of_day(zone: Tz, date: NaiveDate) -> DateTime<Tz> {
    local(zone, date.and_hms_opt(23, 59, 59))
}

fn is_leap_year(year: i32) -> bool {
    year % 4 == 0 && (year % 100 != 0 || year % 400 == 0)
}

fn first_day(year: i32, month: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, 1).unwrap_or(NaiveDate::MAX)
}

fn end_of_month(zone: Tz, year: i32, month: u32) -> DateTime<Tz> {
    let last = NaiveDate::from_ymd_opt(year, month, days_in_month(year, month))
        .unwrap_or(NaiveDate::MAX);
    local(zone, last.and_hms_opt(23, 59, 59))
}

/// Resolves a wall-clock time in `zone`. Ambiguous times take the earlier instant; times inside a
/// DST gap move forward to the first valid instant after it.
fn local(zone: Tz, naive: Option<NaiveDateTime>) -> DateTime<Tz> {
    let naive = naive.unwrap_or(NaiveDateTime::MAX);
    match zone.from_local_datetime(&naive) {
        LocalResult::Single(dt) => dt,
        LocalResult::Ambiguous(earliest, _) => earliest,
        LocalResult::None => {
            // Gaps are at most a few hours wide; step forward a minute at a time.
            let mut candidate = naive;
            for _ in 0..(24 * 60) {
                candidate += Duration::minutes(1);
                if let Some(dt) = zone.from_local_datetime(&candidate).earliest() {
                    return dt;
                }
            }
            zone.from_utc_datetime(&naive)
        }
    }
}
