//! Time bucket frequencies.
//!
//! Frequencies are written as pandas-style aliases (`D`, `W-SUN`, `M`) in
//! config files, on the command line and in logs.

use chrono::{Datelike, Days, NaiveDate, Weekday};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Width of one aggregation bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum BucketFreq {
    /// One calendar day.
    Daily,
    /// Seven days ending on (and including) `ends_on`.
    Weekly { ends_on: Weekday },
    /// One calendar month.
    Monthly,
}

impl Default for BucketFreq {
    fn default() -> Self {
        BucketFreq::Weekly {
            ends_on: Weekday::Sun,
        }
    }
}

impl BucketFreq {
    /// First and last day of the bucket containing `date`.
    ///
    /// Returns `None` only at the edges of the representable calendar.
    pub fn bounds(&self, date: NaiveDate) -> Option<(NaiveDate, NaiveDate)> {
        match *self {
            BucketFreq::Daily => Some((date, date)),
            BucketFreq::Weekly { ends_on } => {
                let ahead = (ends_on.num_days_from_monday() + 7
                    - date.weekday().num_days_from_monday())
                    % 7;
                let end = date.checked_add_days(Days::new(u64::from(ahead)))?;
                let start = end.checked_sub_days(Days::new(6))?;
                Some((start, end))
            }
            BucketFreq::Monthly => {
                let start = date.with_day(1)?;
                let next = start.checked_add_months(chrono::Months::new(1))?;
                let end = next.pred_opt()?;
                Some((start, end))
            }
        }
    }
}

impl fmt::Display for BucketFreq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BucketFreq::Daily => write!(f, "D"),
            BucketFreq::Weekly { ends_on } => {
                write!(f, "W-{}", ends_on.to_string().to_uppercase())
            }
            BucketFreq::Monthly => write!(f, "M"),
        }
    }
}

impl FromStr for BucketFreq {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_uppercase();
        match normalized.as_str() {
            "D" | "DAY" | "DAILY" => Ok(BucketFreq::Daily),
            "W" | "WEEK" | "WEEKLY" => Ok(BucketFreq::default()),
            "M" | "ME" | "MONTH" | "MONTHLY" => Ok(BucketFreq::Monthly),
            other => {
                let day = other
                    .strip_prefix("W-")
                    .ok_or_else(|| format!("unknown bucket frequency '{}'", s))?;
                let ends_on = day
                    .parse::<Weekday>()
                    .map_err(|_| format!("unknown weekday '{}' in bucket frequency", day))?;
                Ok(BucketFreq::Weekly { ends_on })
            }
        }
    }
}

impl TryFrom<String> for BucketFreq {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<BucketFreq> for String {
    fn from(value: BucketFreq) -> Self {
        value.to_string()
    }
}

/// Which edge of the bucket names it (and decides its month).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BucketLabel {
    Start,
    #[default]
    End,
}

impl BucketLabel {
    pub fn pick(&self, start: NaiveDate, end: NaiveDate) -> NaiveDate {
        match self {
            BucketLabel::Start => start,
            BucketLabel::End => end,
        }
    }
}
