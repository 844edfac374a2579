//! Dates of local tasks, which may be more or less accurate

use chrono::{DateTime, Duration, NaiveDate, Timelike, Utc};
use serde::{Deserialize, Serialize};

/// A vague deadline, e.g. "next week"
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FuzzyTerm {
    Now,
    Soon,
    NextWeek,
    Someday,
}

impl FuzzyTerm {
    pub fn as_str(&self) -> &'static str {
        match self {
            FuzzyTerm::Now => "now",
            FuzzyTerm::Soon => "soon",
            FuzzyTerm::NextWeek => "next_week",
            FuzzyTerm::Someday => "someday",
        }
    }

    pub fn parse(term: &str) -> Option<Self> {
        match term.trim().to_lowercase().as_str() {
            "now" => Some(FuzzyTerm::Now),
            "soon" => Some(FuzzyTerm::Soon),
            "next_week" | "next week" => Some(FuzzyTerm::NextWeek),
            "someday" => Some(FuzzyTerm::Someday),
            _ => None,
        }
    }

    /// The calendar date clients that do not know about fuzzy terms should display
    pub fn concrete_date(&self, today: NaiveDate) -> NaiveDate {
        let offset = match self {
            FuzzyTerm::Now => 0,
            FuzzyTerm::Soon => 15,
            FuzzyTerm::NextWeek => 7,
            FuzzyTerm::Someday => 365,
        };
        today + Duration::days(offset)
    }
}


/// How accurate a [`TaskDate`] is
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DateAccuracy {
    None,
    Timestamp,
    Date,
    Fuzzy,
}

/// A due, start or completion date
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum TaskDate {
    NoDate,
    Timestamp(DateTime<Utc>),
    Date(NaiveDate),
    Fuzzy(FuzzyTerm),
}

impl Default for TaskDate {
    fn default() -> Self {
        TaskDate::NoDate
    }
}

impl TaskDate {
    pub fn accuracy(&self) -> DateAccuracy {
        match self {
            TaskDate::NoDate => DateAccuracy::None,
            TaskDate::Timestamp(_) => DateAccuracy::Timestamp,
            TaskDate::Date(_) => DateAccuracy::Date,
            TaskDate::Fuzzy(_) => DateAccuracy::Fuzzy,
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, TaskDate::NoDate)
    }

    /// The same date, with sub-second jitter removed
    pub fn normalized(&self) -> Self {
        match self {
            TaskDate::Timestamp(dt) => TaskDate::Timestamp(dt.with_nanosecond(0).unwrap_or(*dt)),
            other => other.clone(),
        }
    }
}
