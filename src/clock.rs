//! Calendar date abstraction and the injectable clock.
//!
//! All date decisions in a run are taken against a single [`CalendarDate`]
//! obtained once from a [`Clock`], so a run never straddles midnight.

use chrono::{Datelike, NaiveDate, Utc};
use chrono_tz::Tz;

/// A calendar day with the string renderings the matcher compares against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CalendarDate(NaiveDate);

impl CalendarDate {
    pub fn new(date: NaiveDate) -> Self {
        Self(date)
    }

    /// Build from year/month/day, `None` when the date does not exist.
    pub fn from_ymd(year: i32, month: u32, day: u32) -> Option<Self> {
        NaiveDate::from_ymd_opt(year, month, day).map(Self)
    }

    /// Parse an ISO `YYYY-MM-DD` date.
    pub fn parse_iso(value: &str) -> Option<Self> {
        NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d")
            .ok()
            .map(Self)
    }

    pub fn day(&self) -> u32 {
        self.0.day()
    }

    pub fn month(&self) -> u32 {
        self.0.month()
    }

    pub fn year(&self) -> i32 {
        self.0.year()
    }

    /// ISO rendering, e.g. `2024-12-01`.
    pub fn iso(&self) -> String {
        self.0.format("%Y-%m-%d").to_string()
    }

    /// Zero-padded `DD/MM`, the format of annual rule dates.
    pub fn day_month(&self) -> String {
        format!("{:02}/{:02}", self.day(), self.month())
    }

    pub fn naive(&self) -> NaiveDate {
        self.0
    }
}

impl std::fmt::Display for CalendarDate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.iso())
    }
}

/// Number of days in `month` of `year` (leap years included).
pub fn days_in_month(year: i32, month: u32) -> u32 {
    let (next_year, next_month) = if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    };
    NaiveDate::from_ymd_opt(next_year, next_month, 1)
        .and_then(|first| first.pred_opt())
        .map(|last| last.day())
        .unwrap_or(31)
}

/// Source of "today".
pub trait Clock: Send + Sync {
    fn today(&self) -> CalendarDate;
}

/// Wall clock evaluated in a fixed IANA timezone.
#[derive(Debug, Clone)]
pub struct SystemClock {
    timezone: Tz,
}

impl SystemClock {
    pub fn new(timezone: Tz) -> Self {
        Self { timezone }
    }
}

impl Clock for SystemClock {
    fn today(&self) -> CalendarDate {
        CalendarDate(Utc::now().with_timezone(&self.timezone).date_naive())
    }
}

/// Clock pinned to one date (tests and `--date` replays).
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(CalendarDate);

impl FixedClock {
    pub fn new(date: CalendarDate) -> Self {
        Self(date)
    }
}

impl Clock for FixedClock {
    fn today(&self) -> CalendarDate {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_iso_and_day_month_zero_padded() {
        let date = CalendarDate::from_ymd(2024, 3, 5).unwrap();
        assert_eq!(date.iso(), "2024-03-05");
        assert_eq!(date.day_month(), "05/03");
        assert_eq!(date.to_string(), "2024-03-05");
    }

    #[test]
    fn parse_iso_accepts_valid_and_rejects_garbage() {
        assert_eq!(
            CalendarDate::parse_iso("2024-12-01"),
            CalendarDate::from_ymd(2024, 12, 1)
        );
        assert_eq!(CalendarDate::parse_iso(" 2024-12-01 "), CalendarDate::from_ymd(2024, 12, 1));
        assert!(CalendarDate::parse_iso("01/12/2024").is_none());
        assert!(CalendarDate::parse_iso("2024-02-30").is_none());
        assert!(CalendarDate::parse_iso("").is_none());
    }

    #[test]
    fn days_in_month_handles_leap_years_and_december() {
        assert_eq!(days_in_month(2024, 2), 29);
        assert_eq!(days_in_month(2023, 2), 28);
        assert_eq!(days_in_month(1900, 2), 28);
        assert_eq!(days_in_month(2000, 2), 29);
        assert_eq!(days_in_month(2024, 4), 30);
        assert_eq!(days_in_month(2024, 12), 31);
        assert_eq!(days_in_month(2024, 1), 31);
    }

    #[test]
    fn fixed_clock_returns_pinned_date() {
        let date = CalendarDate::from_ymd(2025, 7, 9).unwrap();
        let clock = FixedClock::new(date);
        assert_eq!(clock.today(), date);
        assert_eq!(clock.today(), date);
    }

    #[test]
    fn system_clock_today_is_close_to_utc_today() {
        let clock = SystemClock::new(chrono_tz::UTC);
        let today = clock.today();
        let utc_today = Utc::now().date_naive();
        let delta = (today.naive() - utc_today).num_days().abs();
        assert!(delta <= 1, "system clock drifted: {today} vs {utc_today}");
    }
}
