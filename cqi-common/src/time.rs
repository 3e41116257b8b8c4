//! Timestamp and reporting period utilities

use chrono::{DateTime, Datelike, Duration, Months, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::{Error, Result};

/// Storage format for timestamps in the aggregate store (matches SQLite `CURRENT_TIMESTAMP`)
pub const DB_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Get current UTC timestamp
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Format a timestamp the way the aggregate store writes `CURRENT_TIMESTAMP`
pub fn to_db_timestamp(ts: DateTime<Utc>) -> String {
    ts.format(DB_TIMESTAMP_FORMAT).to_string()
}

/// Parse a stored timestamp (either store format or RFC 3339)
pub fn from_db_timestamp(text: &str) -> Option<DateTime<Utc>> {
    if let Ok(naive) = NaiveDateTime::parse_from_str(text, DB_TIMESTAMP_FORMAT) {
        return Some(naive.and_utc());
    }
    DateTime::parse_from_rfc3339(text)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Subtract whole calendar months, clamping to the earliest representable instant
pub fn months_before(ts: DateTime<Utc>, months: u32) -> DateTime<Utc> {
    ts.checked_sub_months(Months::new(months))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Relative reporting window used by scheduled population jobs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PeriodType {
    #[default]
    #[serde(rename = "current_quarter")]
    CurrentQuarter,
    #[serde(rename = "current_month")]
    CurrentMonth,
    #[serde(rename = "current_year")]
    CurrentYear,
    #[serde(rename = "last_30_days")]
    Last30Days,
}

impl PeriodType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PeriodType::CurrentQuarter => "current_quarter",
            PeriodType::CurrentMonth => "current_month",
            PeriodType::CurrentYear => "current_year",
            PeriodType::Last30Days => "last_30_days",
        }
    }

    /// Resolve the window containing `today`
    pub fn range_at(&self, today: NaiveDate) -> Period {
        let year = today.year();
        match self {
            PeriodType::CurrentQuarter => {
                let first_month = ((today.month0() / 3) * 3) + 1;
                let start = first_of_month(year, first_month);
                let end = last_of_month(year, first_month + 2);
                Period::new(start, end)
            }
            PeriodType::CurrentMonth => {
                Period::new(first_of_month(year, today.month()), last_of_month(year, today.month()))
            }
            PeriodType::CurrentYear => Period::new(first_of_month(year, 1), last_of_month(year, 12)),
            PeriodType::Last30Days => Period::new(today - Duration::days(30), today),
        }
    }
}

impl fmt::Display for PeriodType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PeriodType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "current_quarter" => Ok(PeriodType::CurrentQuarter),
            "current_month" => Ok(PeriodType::CurrentMonth),
            "current_year" => Ok(PeriodType::CurrentYear),
            "last_30_days" => Ok(PeriodType::Last30Days),
            other => Err(Error::InvalidInput(format!("Unknown period type: {}", other))),
        }
    }
}

/// Inclusive reporting period
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Period {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl Period {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self { start, end }
    }

    /// Parse `YYYY-MM-DD` bounds
    pub fn parse(start: &str, end: &str) -> Result<Self> {
        let start = parse_date(start)?;
        let end = parse_date(end)?;
        if end < start {
            return Err(Error::InvalidInput(format!(
                "Period end {} precedes start {}",
                end, start
            )));
        }
        Ok(Self { start, end })
    }

    /// Last day before the period starts (comparison baseline for cohort queries)
    pub fn previous_end(&self) -> NaiveDate {
        self.start.pred_opt().unwrap_or(self.start)
    }

    pub fn start_str(&self) -> String {
        self.start.format("%Y-%m-%d").to_string()
    }

    pub fn end_str(&self) -> String {
        self.end.format("%Y-%m-%d").to_string()
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", self.start_str(), self.end_str())
    }
}

fn parse_date(text: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .map_err(|e| Error::InvalidInput(format!("Invalid date '{}': {}", text, e)))
}

fn first_of_month(year: i32, month: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, 1).unwrap_or(NaiveDate::MIN)
}

fn last_of_month(year: i32, month: u32) -> NaiveDate {
    let (next_year, next_month) = if month == 12 { (year + 1, 1) } else { (year, month + 1) };
    first_of_month(next_year, next_month)
        .pred_opt()
        .unwrap_or(NaiveDate::MIN)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_current_quarter_bounds() {
        let period = PeriodType::CurrentQuarter.range_at(date(2024, 5, 17));
        assert_eq!(period.start, date(2024, 4, 1));
        assert_eq!(period.end, date(2024, 6, 30));
        assert_eq!(period.previous_end(), date(2024, 3, 31));
    }

    #[test]
    fn test_fourth_quarter_ends_on_december_31() {
        let period = PeriodType::CurrentQuarter.range_at(date(2024, 11, 2));
        assert_eq!(period.start, date(2024, 10, 1));
        assert_eq!(period.end, date(2024, 12, 31));
    }

    #[test]
    fn test_current_month_handles_leap_february() {
        let period = PeriodType::CurrentMonth.range_at(date(2024, 2, 10));
        assert_eq!(period.start, date(2024, 2, 1));
        assert_eq!(period.end, date(2024, 2, 29));
    }

    #[test]
    fn test_current_year_and_last_30_days() {
        let year = PeriodType::CurrentYear.range_at(date(2024, 7, 4));
        assert_eq!(year.start, date(2024, 1, 1));
        assert_eq!(year.end, date(2024, 12, 31));

        let recent = PeriodType::Last30Days.range_at(date(2024, 3, 15));
        assert_eq!(recent.end, date(2024, 3, 15));
        assert_eq!(recent.start, date(2024, 2, 14));
    }

    #[test]
    fn test_period_type_serde_names() {
        let parsed: PeriodType = serde_json::from_str("\"last_30_days\"").unwrap();
        assert_eq!(parsed, PeriodType::Last30Days);
        assert_eq!(
            serde_json::to_string(&PeriodType::CurrentQuarter).unwrap(),
            "\"current_quarter\""
        );
        assert!("fortnight".parse::<PeriodType>().is_err());
    }

    #[test]
    fn test_period_parse_rejects_inverted_range() {
        assert!(Period::parse("2024-12-31", "2024-01-01").is_err());
        assert!(Period::parse("2024-13-01", "2024-12-31").is_err());
        let period = Period::parse("2024-01-01", "2024-12-31").unwrap();
        assert_eq!(period.to_string(), "2024-01-01..2024-12-31");
    }

    #[test]
    fn test_months_before_and_db_timestamps() {
        let ts = Utc.with_ymd_and_hms(2026, 3, 31, 12, 0, 0).unwrap();
        let cutoff = months_before(ts, 24);
        assert_eq!(to_db_timestamp(cutoff), "2024-03-31 12:00:00");

        let parsed = from_db_timestamp("2024-03-31 12:00:00").unwrap();
        assert_eq!(parsed, cutoff);
        assert!(from_db_timestamp("not a date").is_none());
    }
}
