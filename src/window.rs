//! Slot arithmetic: (date, time-of-day, duration) triples as comparable
//! half-open millisecond intervals on the business-local clock.

use std::fmt;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};

use crate::limits::MAX_DURATION_MINUTES;
use crate::model::{Ms, Span};

pub const SECOND_MS: Ms = 1_000;
pub const MINUTE_MS: Ms = 60 * SECOND_MS;
pub const DAY_MS: Ms = 24 * 60 * MINUTE_MS;

// A booking spills into at most the following date.
const _: () = assert!(MAX_DURATION_MINUTES <= 24 * 60);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WindowError {
    NonPositiveDuration(i64),
}

impl fmt::Display for WindowError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WindowError::NonPositiveDuration(d) => {
                write!(f, "duration must be positive, got {d} minutes")
            }
        }
    }
}

impl std::error::Error for WindowError {}

/// Local wall-clock instant as milliseconds. The naive date-time is read as
/// if it were UTC so every slot of a business lives on one comparable axis.
pub fn instant_ms(at: NaiveDateTime) -> Ms {
    at.and_utc().timestamp_millis()
}

pub fn start_ms(date: NaiveDate, time_slot: NaiveTime) -> Ms {
    instant_ms(date.and_time(time_slot))
}

pub fn to_interval(
    date: NaiveDate,
    time_slot: NaiveTime,
    duration_minutes: i64,
) -> Result<Span, WindowError> {
    if duration_minutes <= 0 {
        return Err(WindowError::NonPositiveDuration(duration_minutes));
    }
    let start = start_ms(date, time_slot);
    Ok(Span::new(start, start + duration_minutes * MINUTE_MS))
}

pub fn overlaps(a: &Span, b: &Span) -> bool {
    a.overlaps(b)
}

/// Dates whose bookings can overlap `span`, a slot starting on `date`: the
/// previous date (a late booking running past midnight), `date` itself, and
/// every later date `span` reaches into.
pub fn dates_around(date: NaiveDate, span: &Span) -> Vec<NaiveDate> {
    let mut dates: Vec<NaiveDate> = date.pred_opt().into_iter().collect();
    let mut day = date;
    dates.push(day);
    while let Some(next) = day.succ_opt()
        && start_ms(next, NaiveTime::default()) < span.end
    {
        dates.push(next);
        day = next;
    }
    dates
}
