//! Data models for the sentiment tree.
//!
//! This module contains the message, bucket and hierarchy types that flow
//! from ingestion through aggregation into the grammar word producer.

use crate::error::{PipelineError, Stage};
use chrono::{Datelike, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Neutral midpoint of the sentiment scale.
pub const NEUTRAL_SCORE: f64 = 0.5;

/// Sentiment label assigned by the classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SentimentLabel {
    Positive,
    Negative,
    #[default]
    Neutral,
}

impl fmt::Display for SentimentLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SentimentLabel::Positive => write!(f, "positive"),
            SentimentLabel::Negative => write!(f, "negative"),
            SentimentLabel::Neutral => write!(f, "neutral"),
        }
    }
}

impl FromStr for SentimentLabel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "positive" | "pos" => Ok(SentimentLabel::Positive),
            "negative" | "neg" => Ok(SentimentLabel::Negative),
            "neutral" | "neu" => Ok(SentimentLabel::Neutral),
            other => Err(format!("unknown sentiment label '{}'", other)),
        }
    }
}

/// One `(label, confidence)` pair returned by a classifier.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub label: SentimentLabel,
    pub confidence: f64,
}

impl Classification {
    pub fn new(label: SentimentLabel, confidence: f64) -> Self {
        Self { label, confidence }
    }
}

/// Map a label and its confidence onto the `[0,1]` sentiment scale.
///
/// Positive messages score their confidence, negative ones the complement,
/// and everything else (neutral or non-analyzable) sits at the midpoint.
pub fn sentiment_score(label: SentimentLabel, certainty: f64, is_analyzable: bool) -> f64 {
    if !is_analyzable {
        return NEUTRAL_SCORE;
    }
    match label {
        SentimentLabel::Positive => certainty,
        SentimentLabel::Negative => 1.0 - certainty,
        SentimentLabel::Neutral => NEUTRAL_SCORE,
    }
}

/// A single message with its sentiment attached.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredMessage {
    pub timestamp: NaiveDateTime,
    pub text: String,
    pub is_analyzable: bool,
    pub sentiment_label: SentimentLabel,
    pub certainty: f64,
    pub sentiment_score: f64,
}

impl ScoredMessage {
    /// Build a message from a classifier result, deriving the score.
    pub fn classified(
        timestamp: NaiveDateTime,
        text: String,
        is_analyzable: bool,
        classification: Classification,
    ) -> Self {
        Self {
            timestamp,
            text,
            is_analyzable,
            sentiment_label: classification.label,
            certainty: classification.confidence,
            sentiment_score: sentiment_score(
                classification.label,
                classification.confidence,
                is_analyzable,
            ),
        }
    }

    /// Build a message from an already computed score.
    ///
    /// Non-analyzable messages are pinned to the neutral score regardless of
    /// what was supplied.
    pub fn with_score(
        timestamp: NaiveDateTime,
        text: String,
        is_analyzable: bool,
        score: f64,
    ) -> Self {
        let sentiment_score = if is_analyzable { score } else { NEUTRAL_SCORE };
        let (sentiment_label, certainty) = if sentiment_score > NEUTRAL_SCORE {
            (SentimentLabel::Positive, sentiment_score)
        } else if sentiment_score < NEUTRAL_SCORE {
            (SentimentLabel::Negative, 1.0 - sentiment_score)
        } else {
            (SentimentLabel::Neutral, 0.0)
        };

        Self {
            timestamp,
            text,
            is_analyzable,
            sentiment_label,
            certainty,
            sentiment_score,
        }
    }
}

/// Calendar year and month, rendered as `YYYY-MM`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct YearMonth {
    pub year: i32,
    pub month: u32,
}

impl YearMonth {
    pub fn new(year: i32, month: u32) -> Option<Self> {
        (1..=12).contains(&month).then_some(Self { year, month })
    }

    /// Whether `date` falls inside this month.
    pub fn contains(&self, date: NaiveDate) -> bool {
        date.year() == self.year && date.month() == self.month
    }
}

impl From<NaiveDate> for YearMonth {
    fn from(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            month: date.month(),
        }
    }
}

impl fmt::Display for YearMonth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

impl FromStr for YearMonth {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (year, month) = s
            .split_once('-')
            .ok_or_else(|| format!("expected YYYY-MM, got '{}'", s))?;
        let year: i32 = year
            .parse()
            .map_err(|_| format!("invalid year in '{}'", s))?;
        let month: u32 = month
            .parse()
            .map_err(|_| format!("invalid month in '{}'", s))?;
        YearMonth::new(year, month).ok_or_else(|| format!("month out of range in '{}'", s))
    }
}

impl TryFrom<String> for YearMonth {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<YearMonth> for String {
    fn from(value: YearMonth) -> Self {
        value.to_string()
    }
}

/// Aggregated sentiment for one time bucket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeBucket {
    /// Anchor date naming the bucket.
    #[serde(rename = "send_datetime")]
    pub label: NaiveDate,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    #[serde(rename = "msg_count")]
    pub message_count: u64,
    pub avg_sentiment_raw: f64,
    /// Mean sentiment after the contrast stretch; this is what the fruit carries.
    #[serde(rename = "avg_sentiment")]
    pub avg_sentiment_contrasted: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub normalized_count: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_count: Option<u64>,
}

/// Buckets sharing a calendar month.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonthGroup {
    pub month: YearMonth,
    pub weeks: Vec<TimeBucket>,
}

/// Summary values the renderer needs before walking the word.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HierarchyMeta {
    pub trunk_height: f64,
    pub total_months: usize,
}

/// Months of buckets in chronological order, plus metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeHierarchy {
    pub meta: HierarchyMeta,
    pub months: Vec<MonthGroup>,
}

impl TreeHierarchy {
    pub fn trunk_height(&self) -> f64 {
        self.meta.trunk_height
    }

    pub fn total_months(&self) -> usize {
        self.meta.total_months
    }

    /// Number of buckets across all months.
    pub fn bucket_count(&self) -> usize {
        self.months.iter().map(|m| m.weeks.len()).sum()
    }

    /// Number of messages across all buckets.
    pub fn message_count(&self) -> u64 {
        self.months
            .iter()
            .flat_map(|m| &m.weeks)
            .map(|w| w.message_count)
            .sum()
    }

    /// Re-check invariants on a hierarchy that did not come from the aggregator,
    /// e.g. one loaded from a cached JSON file.
    ///
    /// The trunk height must lie within `[min_trunk_height, max_trunk_height]`.
    pub fn validate(
        &self,
        min_trunk_height: f64,
        max_trunk_height: f64,
    ) -> Result<(), PipelineError> {
        let fail = |reason: String| Err(PipelineError::invalid(Stage::Hierarchy, reason));

        let trunk = self.meta.trunk_height;
        if !trunk.is_finite() || !(min_trunk_height..=max_trunk_height).contains(&trunk) {
            return fail(format!(
                "trunk height {} is outside [{}, {}]",
                trunk, min_trunk_height, max_trunk_height
            ));
        }
        if self.meta.total_months != self.months.len() {
            return fail(format!(
                "total_months is {} but {} months are present",
                self.meta.total_months,
                self.months.len()
            ));
        }

        for pair in self.months.windows(2) {
            if pair[0].month >= pair[1].month {
                return fail(format!(
                    "months out of order: {} before {}",
                    pair[0].month, pair[1].month
                ));
            }
        }

        for group in &self.months {
            for pair in group.weeks.windows(2) {
                if pair[0].label >= pair[1].label {
                    return fail(format!(
                        "buckets out of order in {}: {} before {}",
                        group.month, pair[0].label, pair[1].label
                    ));
                }
            }
            for bucket in &group.weeks {
                if bucket.message_count == 0 {
                    return fail(format!("empty bucket {} in {}", bucket.label, group.month));
                }
                if !group.month.contains(bucket.label) {
                    return fail(format!(
                        "bucket {} filed under {}",
                        bucket.label, group.month
                    ));
                }
                for (name, value) in [
                    ("avg_sentiment_raw", bucket.avg_sentiment_raw),
                    ("avg_sentiment", bucket.avg_sentiment_contrasted),
                ] {
                    if !(0.0..=1.0).contains(&value) {
                        return fail(format!(
                            "{} of bucket {} is {}, outside [0,1]",
                            name, bucket.label, value
                        ));
                    }
                }
            }
        }

        Ok(())
    }
}
