//! Year-month labels and the linear month index used for range filtering.
//!
//! Raw files label every transaction with a "YYYY-MM" month. Filtering and the
//! dashboard's range slider work on a linear count of months where January
//! 1990 is index 1. Index 0 is reserved for a missing or malformed label.

use std::fmt;
use std::sync::OnceLock;

use regex::Regex;

use crate::error::{PipelineError, PipelineResult};

pub const EPOCH_YEAR: i32 = 1990;

/// Index given to a null or unparseable month label.
pub const UNKNOWN_MONTH_INDEX: i64 = 0;

pub const MONTH_NAMES: [&str; 12] = [
    "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
];

fn month_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^\s*(\d{4})-(\d{1,2})\s*$").expect("valid month pattern"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Month {
    year: i32,
    month: u32,
}

impl Month {
    pub fn new(year: i32, month: u32) -> Option<Self> {
        (1..=12).contains(&month).then_some(Self { year, month })
    }

    pub fn parse(label: &str) -> PipelineResult<Self> {
        let caps = month_pattern()
            .captures(label)
            .ok_or_else(|| PipelineError::parse(format!("month label {label:?}")))?;
        let year = caps[1]
            .parse::<i32>()
            .map_err(|e| PipelineError::parse(format!("year in {label:?}: {e}")))?;
        let month = caps[2]
            .parse::<u32>()
            .map_err(|e| PipelineError::parse(format!("month in {label:?}: {e}")))?;
        Self::new(year, month)
            .ok_or_else(|| PipelineError::parse(format!("month out of range in {label:?}")))
    }

    pub fn index(&self) -> i64 {
        (i64::from(self.year) - i64::from(EPOCH_YEAR)) * 12 + i64::from(self.month)
    }

    /// Inverse of [`Month::index`]. Indices below 1, or past the last
    /// representable year, have no month.
    pub fn from_index(index: i64) -> Option<Self> {
        if index < 1 {
            return None;
        }
        let zero_based = index - 1;
        let year = EPOCH_YEAR.checked_add(i32::try_from(zero_based / 12).ok()?)?;
        Self::new(year, (zero_based % 12) as u32 + 1)
    }

    /// Short human label, e.g. "Mar 2012".
    pub fn label(&self) -> String {
        format!("{} {}", MONTH_NAMES[(self.month - 1) as usize], self.year)
    }
}

impl fmt::Display for Month {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

/// Month index of an optional label; null and malformed labels map to
/// [`UNKNOWN_MONTH_INDEX`].
pub fn month_index(label: Option<&str>) -> i64 {
    label
        .and_then(|l| Month::parse(l).ok())
        .map_or(UNKNOWN_MONTH_INDEX, |m| m.index())
}
