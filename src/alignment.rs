// src/alignment.rs - Exchange-local (US Eastern) timestamps -> chart epoch seconds
//
// The chart displays timestamps as local-interpreted-as-UTC, so every bar time
// carries the viewer's UTC offset. Pattern timestamps arrive as Eastern wall-clock
// date/time pairs and must be shifted into the same convention to land on a candle.

use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, NaiveTime, Offset, TimeZone, Utc};
use chrono_tz::America::New_York;

use crate::errors::{DashboardError, Result};

const NAIVE_BAR_FORMATS: [&str; 4] = [
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

/// Viewer's current UTC offset in seconds, east positive.
pub fn viewer_offset_secs() -> i32 {
    Local::now().offset().fix().local_minus_utc()
}

/// Eastern UTC offset for a calendar date, in milliseconds (positive: Eastern is behind UTC).
///
/// The offset is sampled at noon UTC on that date, so the whole calendar day uses the
/// offset in effect at midday, including the hour around a DST switch.
pub fn eastern_offset_ms(date: NaiveDate) -> i64 {
    let reference = date.and_time(NaiveTime::default()) + chrono::Duration::hours(12);
    let rendered_eastern = New_York.from_utc_datetime(&reference).naive_local();
    (reference - rendered_eastern).num_milliseconds()
}

/// Decode `yyyymmdd` / `hhmm` integers into a naive exchange-local datetime.
pub fn decode_exchange_time(yyyymmdd: u32, hhmm: u32) -> Result<NaiveDateTime> {
    let invalid = || DashboardError::InvalidExchangeTime { yyyymmdd, hhmm };

    let year = (yyyymmdd / 10_000) as i32;
    let month = (yyyymmdd % 10_000) / 100;
    let day = yyyymmdd % 100;
    let hour = hhmm / 100;
    let minute = hhmm % 100;

    let date = NaiveDate::from_ymd_opt(year, month, day).ok_or_else(invalid)?;
    let time = NaiveTime::from_hms_opt(hour, minute, 0).ok_or_else(invalid)?;
    Ok(NaiveDateTime::new(date, time))
}

/// Shift an exchange-local wall-clock datetime into chart milliseconds.
fn exchange_local_to_chart_ms(local: NaiveDateTime, viewer_offset_secs: i32) -> i64 {
    let as_utc_ms = Utc.from_utc_datetime(&local).timestamp_millis();
    let true_utc_ms = as_utc_ms + eastern_offset_ms(local.date());
    true_utc_ms + i64::from(viewer_offset_secs) * 1000
}

/// Chart timestamp for a pattern bar, with an explicit viewer offset.
pub fn align_exchange_time_with_offset(
    yyyymmdd: u32,
    hhmm: u32,
    viewer_offset_secs: i32,
) -> Result<i64> {
    let local = decode_exchange_time(yyyymmdd, hhmm)?;
    Ok(exchange_local_to_chart_ms(local, viewer_offset_secs).div_euclid(1000))
}

/// Chart timestamp for a pattern bar, using the viewer offset observed now.
pub fn align_exchange_time(yyyymmdd: u32, hhmm: u32) -> Result<i64> {
    align_exchange_time_with_offset(yyyymmdd, hhmm, viewer_offset_secs())
}

/// Chart timestamp for a `bar_datetime` string from the bars endpoint.
///
/// Strings carrying an offset are absolute instants; naive strings are exchange-local.
pub fn chart_bar_time(bar_datetime: &str, viewer_offset_secs: i32) -> Result<i64> {
    let raw = bar_datetime.trim();

    if let Ok(instant) = DateTime::parse_from_rfc3339(raw) {
        let shifted_ms = instant.timestamp_millis() + i64::from(viewer_offset_secs) * 1000;
        return Ok(shifted_ms.div_euclid(1000));
    }

    NAIVE_BAR_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|local| exchange_local_to_chart_ms(local, viewer_offset_secs).div_euclid(1000))
        .ok_or_else(|| DashboardError::InvalidBarDatetime(bar_datetime.to_string()))
}
