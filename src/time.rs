use chrono::{Months, NaiveDate, SecondsFormat, Utc};

pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Current UTC instant as an RFC 3339 string with millisecond precision.
pub fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn today() -> NaiveDate {
    Utc::now().date_naive()
}

/// Advance `start` by `months` calendar months.
///
/// When the start day does not exist in the target month the result is clamped
/// to that month's last day (Jan 31 + 1 month = Feb 28/29), never rolled into
/// the following month.
pub fn add_months_clamped(start: NaiveDate, months: u32) -> NaiveDate {
    match start.checked_add_months(Months::new(months)) {
        Some(date) => date,
        None => NaiveDate::MAX,
    }
}

/// Same month and day one year later; Feb 29 clamps to Feb 28.
pub fn add_one_year(start: NaiveDate) -> NaiveDate {
    add_months_clamped(start, 12)
}
