//! Decides whether a rule fires on a given day.

use crate::clock::{CalendarDate, days_in_month};
use crate::model::{NotificationRule, Schedule};

/// Whether `rule` is due on `today`.
///
/// Field-triggered rules are always due here; which records match is
/// decided per record by the resolver.
pub fn is_due(rule: &NotificationRule, today: CalendarDate) -> bool {
    schedule_fires(&rule.schedule, today)
}

pub fn schedule_fires(schedule: &Schedule, today: CalendarDate) -> bool {
    match schedule {
        Schedule::Field { .. } => true,
        Schedule::Annual { day_month } => day_month.trim() == today.day_month(),
        Schedule::Monthly { day_of_month } => nominal_day(day_of_month)
            .map(|day| adjusted_day(day, today.month(), today.year()) == today.day())
            .unwrap_or(false),
        Schedule::FixedDate { date } => date.trim() == today.iso(),
        Schedule::TwoFixedDates { first, second } => {
            let iso = today.iso();
            first.trim() == iso || second.trim() == iso
        }
    }
}

/// Parse a nominal day of month, `None` outside 1..=31.
fn nominal_day(value: &str) -> Option<u32> {
    value
        .trim()
        .parse::<u32>()
        .ok()
        .filter(|day| (1..=31).contains(day))
}

/// Clamp a nominal day to the last day of `month` in `year`.
pub fn adjusted_day(nominal: u32, month: u32, year: i32) -> u32 {
    nominal.min(days_in_month(year, month))
}
