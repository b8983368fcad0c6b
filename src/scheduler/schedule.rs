use std::fmt;

use chrono::{DateTime, Datelike, Duration, NaiveTime, Utc, Weekday};
use thiserror::Error;

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cadence {
    Daily,
    Weekly(Weekday),
}

/// A fixed UTC firing time, repeated daily or on one weekday.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Schedule {
    pub cadence: Cadence,
    pub time_of_day: NaiveTime,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScheduleError {
    #[error("unknown cadence {0:?}, expected 'daily' or 'weekly'")]
    Cadence(String),

    #[error("unknown weekday {0:?}")]
    Weekday(String),

    #[error("invalid time of day {0:?}, expected HH:MM")]
    TimeOfDay(String),
}

impl Schedule {
    pub fn daily(time_of_day: NaiveTime) -> Self {
        Self {
            cadence: Cadence::Daily,
            time_of_day,
        }
    }

    pub fn weekly(weekday: Weekday, time_of_day: NaiveTime) -> Self {
        Self {
            cadence: Cadence::Weekly(weekday),
            time_of_day,
        }
    }

    /// Builds a schedule from its textual parts. `weekday` is ignored for a daily cadence.
    pub fn from_parts(cadence: &str, weekday: &str, time_of_day: &str) -> Result<Self, ScheduleError> {
        let time = NaiveTime::parse_from_str(time_of_day.trim(), "%H:%M")
            .map_err(|_| ScheduleError::TimeOfDay(time_of_day.to_string()))?;

        match cadence.trim().to_ascii_lowercase().as_str() {
            "daily" => Ok(Self::daily(time)),
            "weekly" => {
                let day = weekday
                    .trim()
                    .parse::<Weekday>()
                    .map_err(|_| ScheduleError::Weekday(weekday.to_string()))?;
                Ok(Self::weekly(day, time))
            }
            _ => Err(ScheduleError::Cadence(cadence.to_string())),
        }
    }

    /// The first firing instant strictly after `now`.
    pub fn next_after(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let today = now.date_naive();
        let at_time_today = today.and_time(self.time_of_day).and_utc();

        match self.cadence {
            Cadence::Daily => {
                if at_time_today > now {
                    at_time_today
                } else {
                    at_time_today + Duration::days(1)
                }
            }
            Cadence::Weekly(weekday) => {
                let days_ahead = (7 + weekday.num_days_from_monday()
                    - today.weekday().num_days_from_monday())
                    % 7;
                let candidate = at_time_today + Duration::days(i64::from(days_ahead));
                if candidate > now {
                    candidate
                } else {
                    candidate + Duration::days(7)
                }
            }
        }
    }
}

impl fmt::Display for Schedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.cadence {
            Cadence::Daily => write!(f, "daily at {} UTC", self.time_of_day.format("%H:%M")),
            Cadence::Weekly(day) => write!(
                f,
                "every {day} at {} UTC",
                self.time_of_day.format("%H:%M")
            ),
        }
    }
}
