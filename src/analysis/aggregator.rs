//! Temporal aggregation of scored messages.
//!
//! Messages are bucketed by time, averaged, contrast-stretched and nested
//! under their calendar month. Everything here is a pure function of its
//! arguments.

use crate::analysis::buckets::{BucketFreq, BucketLabel};
use crate::error::{PipelineError, Stage};
use crate::models::{
    HierarchyMeta, MonthGroup, ScoredMessage, TimeBucket, TreeHierarchy, YearMonth, NEUTRAL_SCORE,
};
use chrono::NaiveDate;
use std::collections::BTreeMap;
use tracing::debug;

/// Height budget shared by all trunk segments before clamping.
pub const MAX_TREE_HEIGHT: f64 = 600.0;
pub const MIN_TRUNK_HEIGHT: f64 = 10.0;
pub const MAX_TRUNK_HEIGHT: f64 = 40.0;

/// Scale applied to `ln(1 + count)` for the normalized count column.
const NORMALIZED_COUNT_SCALE: f64 = 5.0;

/// Parameters of one aggregation run.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregationSettings {
    pub bucket_freq: BucketFreq,
    pub bucket_label: BucketLabel,
    pub contrast_factor: f64,
    pub max_tree_height: f64,
    pub min_trunk_height: f64,
    pub max_trunk_height: f64,
    /// Emit `normalized_count` on every bucket.
    pub normalized_count: bool,
    /// Emit `raw_count` on every bucket.
    pub raw_count: bool,
}

impl Default for AggregationSettings {
    fn default() -> Self {
        Self {
            bucket_freq: BucketFreq::default(),
            bucket_label: BucketLabel::default(),
            contrast_factor: 2.0,
            max_tree_height: MAX_TREE_HEIGHT,
            min_trunk_height: MIN_TRUNK_HEIGHT,
            max_trunk_height: MAX_TRUNK_HEIGHT,
            normalized_count: true,
            raw_count: true,
        }
    }
}

impl From<&crate::config::AggregationConfig> for AggregationSettings {
    fn from(config: &crate::config::AggregationConfig) -> Self {
        Self {
            bucket_freq: config.bucket_freq,
            bucket_label: config.bucket_label,
            contrast_factor: config.contrast_factor,
            max_tree_height: config.max_tree_height,
            min_trunk_height: config.min_trunk_height,
            max_trunk_height: config.max_trunk_height,
            normalized_count: config.normalized_count,
            raw_count: config.raw_count,
        }
    }
}

impl AggregationSettings {
    /// Reject parameters the transform is undefined for.
    pub fn validate(&self) -> Result<(), PipelineError> {
        if !self.contrast_factor.is_finite() || self.contrast_factor <= 0.0 {
            return Err(PipelineError::invalid(
                Stage::Aggregation,
                format!(
                    "contrast factor must be a positive number, got {}",
                    self.contrast_factor
                ),
            ));
        }
        if !self.max_tree_height.is_finite() || self.max_tree_height <= 0.0 {
            return Err(PipelineError::invalid(
                Stage::Aggregation,
                format!(
                    "max tree height must be a positive number, got {}",
                    self.max_tree_height
                ),
            ));
        }
        if !(self.min_trunk_height.is_finite()
            && self.max_trunk_height.is_finite()
            && 0.0 < self.min_trunk_height
            && self.min_trunk_height <= self.max_trunk_height)
        {
            return Err(PipelineError::invalid(
                Stage::Aggregation,
                format!(
                    "trunk height bounds [{}, {}] are not a valid range",
                    self.min_trunk_height, self.max_trunk_height
                ),
            ));
        }
        Ok(())
    }
}

/// Power-law stretch of `value` around the neutral midpoint.
///
/// `factor > 1` pushes values away from 0.5, `factor == 1` is the identity and
/// `factor < 1` pulls them in. The midpoint is a fixed point.
pub fn contrast(value: f64, factor: f64) -> f64 {
    let centered = value - NEUTRAL_SCORE;
    // f64::signum(0.0) is 1.0, so the midpoint needs its own branch
    if centered == 0.0 {
        return NEUTRAL_SCORE;
    }
    centered.signum() * (centered.abs() * 2.0).powf(1.0 / factor) / 2.0 + NEUTRAL_SCORE
}

/// Trunk segment height for a tree with `total_months` months.
pub fn trunk_height(total_months: usize, max_tree_height: f64, min: f64, max: f64) -> f64 {
    (max_tree_height / (total_months as f64 + 2.0)).max(min).min(max)
}

/// Running totals for one bucket.
#[derive(Debug)]
struct BucketAccumulator {
    start: NaiveDate,
    end: NaiveDate,
    count: u64,
    score_sum: f64,
}

/// Aggregate scored messages into the month/bucket hierarchy.
pub fn aggregate(
    messages: &[ScoredMessage],
    settings: &AggregationSettings,
) -> Result<TreeHierarchy, PipelineError> {
    settings.validate()?;

    let accumulators = accumulate(messages, settings.bucket_freq)?;
    debug!(
        "Bucketed {} messages into {} {} buckets",
        messages.len(),
        accumulators.len(),
        settings.bucket_freq
    );

    let buckets = accumulators
        .into_values()
        // empty buckets never reach the hierarchy
        .filter(|acc| acc.count > 0)
        .map(|acc| finish_bucket(acc, settings));

    let months = group_by_month(buckets);
    let total_months = months.len();
    let trunk = trunk_height(
        total_months,
        settings.max_tree_height,
        settings.min_trunk_height,
        settings.max_trunk_height,
    );
    debug!("Grouped into {} months, trunk height {:.2}", total_months, trunk);

    Ok(TreeHierarchy {
        meta: HierarchyMeta {
            trunk_height: trunk,
            total_months,
        },
        months,
    })
}

/// Sum scores per bucket, keyed (and therefore ordered) by bucket start.
fn accumulate(
    messages: &[ScoredMessage],
    freq: BucketFreq,
) -> Result<BTreeMap<NaiveDate, BucketAccumulator>, PipelineError> {
    let mut buckets: BTreeMap<NaiveDate, BucketAccumulator> = BTreeMap::new();

    for (index, message) in messages.iter().enumerate() {
        let score = message.sentiment_score;
        if !(0.0..=1.0).contains(&score) {
            return Err(PipelineError::invalid(
                Stage::Aggregation,
                format!(
                    "message {} at {} has sentiment score {}, outside [0,1]",
                    index + 1,
                    message.timestamp,
                    score
                ),
            ));
        }

        let date = message.timestamp.date();
        let (start, end) = freq.bounds(date).ok_or_else(|| {
            PipelineError::invalid(
                Stage::Aggregation,
                format!("cannot place {} in a {} bucket", date, freq),
            )
        })?;

        let entry = buckets.entry(start).or_insert_with(|| BucketAccumulator {
            start,
            end,
            count: 0,
            score_sum: 0.0,
        });
        entry.count += 1;
        entry.score_sum += score;
    }

    Ok(buckets)
}

fn finish_bucket(acc: BucketAccumulator, settings: &AggregationSettings) -> TimeBucket {
    let raw = (acc.score_sum / acc.count as f64).clamp(0.0, 1.0);

    TimeBucket {
        label: settings.bucket_label.pick(acc.start, acc.end),
        period_start: acc.start,
        period_end: acc.end,
        message_count: acc.count,
        avg_sentiment_raw: raw,
        avg_sentiment_contrasted: contrast(raw, settings.contrast_factor),
        normalized_count: settings
            .normalized_count
            .then(|| (acc.count as f64).ln_1p() * NORMALIZED_COUNT_SCALE),
        raw_count: settings.raw_count.then_some(acc.count),
    }
}

/// Nest chronologically ordered buckets under the month of their label.
fn group_by_month(buckets: impl Iterator<Item = TimeBucket>) -> Vec<MonthGroup> {
    let mut months: Vec<MonthGroup> = Vec::new();

    for bucket in buckets {
        let month = YearMonth::from(bucket.label);
        match months.last_mut() {
            Some(group) if group.month == month => group.weeks.push(bucket),
            _ => months.push(MonthGroup {
                month,
                weeks: vec![bucket],
            }),
        }
    }

    months
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDateTime;

    fn at(y: i32, m: u32, d: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(9, 30, 0)
            .unwrap()
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn msg(ts: NaiveDateTime, score: f64) -> ScoredMessage {
        ScoredMessage::with_score(ts, "hello".to_string(), true, score)
    }

    #[test]
    fn test_contrast_fixed_point() {
        for factor in [0.1, 0.5, 1.0, 2.0, 2.5, 10.0] {
            assert_eq!(contrast(0.5, factor), 0.5);
        }
    }

    #[test]
    fn test_contrast_identity() {
        for step in 0..=20 {
            let v = step as f64 / 20.0;
            assert!((contrast(v, 1.0) - v).abs() < 1e-12, "v = {}", v);
        }
    }

    #[test]
    fn test_contrast_strictly_increasing() {
        for factor in [0.5, 1.0, 2.0, 2.5] {
            let mut previous = contrast(0.0, factor);
            for step in 1..=100 {
                let current = contrast(step as f64 / 100.0, factor);
                assert!(current > previous, "factor {} step {}", factor, step);
                previous = current;
            }
        }
    }

    #[test]
    fn test_contrast_stays_in_unit_range() {
        assert_eq!(contrast(0.0, 2.0), 0.0);
        assert_eq!(contrast(1.0, 2.0), 1.0);
        assert!((contrast(0.7, 2.0) - 0.816_227_766).abs() < 1e-6);
        assert!((contrast(0.3, 2.0) - 0.183_772_234).abs() < 1e-6);
        // compression pulls toward the midpoint
        assert!(contrast(0.7, 0.5) < 0.7);
    }

    #[test]
    fn test_trunk_height_bounds() {
        for months in 0..500 {
            let h = trunk_height(months, MAX_TREE_HEIGHT, MIN_TRUNK_HEIGHT, MAX_TRUNK_HEIGHT);
            assert!((10.0..=40.0).contains(&h), "months {} -> {}", months, h);
        }
        assert_eq!(trunk_height(0, 600.0, 10.0, 40.0), 40.0);
        assert!((trunk_height(20, 600.0, 10.0, 40.0) - 600.0 / 22.0).abs() < 1e-12);
        assert_eq!(trunk_height(100, 600.0, 10.0, 40.0), 10.0);
    }

    #[test]
    fn test_empty_input_gives_empty_hierarchy() {
        let hierarchy = aggregate(&[], &AggregationSettings::default()).unwrap();
        assert_eq!(hierarchy.total_months(), 0);
        assert_eq!(hierarchy.trunk_height(), 40.0);
        assert!(hierarchy.months.is_empty());
    }

    #[test]
    fn test_two_messages_one_week() {
        let messages = vec![
            msg(at(2024, 1, 3), 0.9),
            ScoredMessage::with_score(at(2024, 1, 4), "<sticker>".to_string(), false, 0.5),
        ];
        let hierarchy = aggregate(&messages, &AggregationSettings::default()).unwrap();

        assert_eq!(hierarchy.total_months(), 1);
        let bucket = &hierarchy.months[0].weeks[0];
        assert_eq!(bucket.message_count, 2);
        assert!((bucket.avg_sentiment_raw - 0.7).abs() < 1e-12);
        assert!((bucket.avg_sentiment_contrasted - 0.8162).abs() < 1e-4);
        assert_eq!(bucket.label, date(2024, 1, 7));
        assert_eq!(bucket.raw_count, Some(2));
        assert!((bucket.normalized_count.unwrap() - 3f64.ln() * 5.0).abs() < 1e-12);
    }

    #[test]
    fn test_non_analyzable_messages_pull_toward_neutral() {
        let messages = vec![
            msg(at(2024, 1, 2), 0.1),
            ScoredMessage::with_score(at(2024, 1, 2), String::new(), false, 0.0),
            ScoredMessage::with_score(at(2024, 1, 2), String::new(), false, 0.0),
        ];
        let hierarchy = aggregate(&messages, &AggregationSettings::default()).unwrap();
        let bucket = &hierarchy.months[0].weeks[0];
        assert!((bucket.avg_sentiment_raw - (0.1 + 0.5 + 0.5) / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_weeks_nest_under_label_month() {
        // Mon 2024-01-29 .. Sun 2024-02-04 is labelled by its Sunday
        let messages = vec![msg(at(2024, 1, 10), 0.6), msg(at(2024, 1, 30), 0.4)];

        let by_end = aggregate(&messages, &AggregationSettings::default()).unwrap();
        let months: Vec<String> = by_end.months.iter().map(|m| m.month.to_string()).collect();
        assert_eq!(months, vec!["2024-01", "2024-02"]);
        assert_eq!(by_end.months[1].weeks[0].period_start, date(2024, 1, 29));

        let settings = AggregationSettings {
            bucket_label: BucketLabel::Start,
            ..AggregationSettings::default()
        };
        let by_start = aggregate(&messages, &settings).unwrap();
        assert_eq!(by_start.total_months(), 1);
        assert_eq!(by_start.months[0].weeks.len(), 2);
    }

    #[test]
    fn test_unsorted_input_comes_out_chronological() {
        let messages = vec![
            msg(at(2024, 3, 20), 0.2),
            msg(at(2024, 1, 2), 0.8),
            msg(at(2024, 3, 5), 0.5),
            msg(at(2024, 1, 16), 0.9),
        ];
        let hierarchy = aggregate(&messages, &AggregationSettings::default()).unwrap();

        let months: Vec<String> = hierarchy.months.iter().map(|m| m.month.to_string()).collect();
        assert_eq!(months, vec!["2024-01", "2024-03"]);
        let labels: Vec<NaiveDate> = hierarchy
            .months
            .iter()
            .flat_map(|m| m.weeks.iter().map(|w| w.label))
            .collect();
        let mut sorted = labels.clone();
        sorted.sort();
        assert_eq!(labels, sorted);
        assert!(hierarchy.validate(MIN_TRUNK_HEIGHT, MAX_TRUNK_HEIGHT).is_ok());
    }

    #[test]
    fn test_gaps_do_not_create_empty_buckets() {
        let messages = vec![msg(at(2023, 1, 2), 0.6), msg(at(2024, 6, 3), 0.6)];
        let hierarchy = aggregate(&messages, &AggregationSettings::default()).unwrap();

        assert_eq!(hierarchy.bucket_count(), 2);
        assert!(hierarchy
            .months
            .iter()
            .flat_map(|m| &m.weeks)
            .all(|w| w.message_count >= 1));
    }

    #[test]
    fn test_monthly_and_daily_frequencies() {
        let messages = vec![
            msg(at(2024, 2, 1), 0.6),
            msg(at(2024, 2, 1), 0.6),
            msg(at(2024, 2, 28), 0.6),
        ];

        let monthly = AggregationSettings {
            bucket_freq: BucketFreq::Monthly,
            ..AggregationSettings::default()
        };
        let hierarchy = aggregate(&messages, &monthly).unwrap();
        assert_eq!(hierarchy.bucket_count(), 1);
        assert_eq!(hierarchy.months[0].weeks[0].label, date(2024, 2, 29));

        let daily = AggregationSettings {
            bucket_freq: BucketFreq::Daily,
            ..AggregationSettings::default()
        };
        let hierarchy = aggregate(&messages, &daily).unwrap();
        assert_eq!(hierarchy.bucket_count(), 2);
        assert_eq!(hierarchy.months[0].weeks[0].message_count, 2);
    }

    #[test]
    fn test_derived_fields_can_be_disabled() {
        let settings = AggregationSettings {
            normalized_count: false,
            raw_count: false,
            ..AggregationSettings::default()
        };
        let hierarchy = aggregate(&[msg(at(2024, 5, 5), 0.5)], &settings).unwrap();
        let bucket = &hierarchy.months[0].weeks[0];
        assert_eq!(bucket.normalized_count, None);
        assert_eq!(bucket.raw_count, None);
    }

    #[test]
    fn test_rejects_non_positive_contrast() {
        for factor in [0.0, -1.0, f64::NAN] {
            let settings = AggregationSettings {
                contrast_factor: factor,
                ..AggregationSettings::default()
            };
            let err = aggregate(&[msg(at(2024, 5, 5), 0.5)], &settings).unwrap_err();
            assert!(matches!(
                err,
                PipelineError::InvalidInput {
                    stage: Stage::Aggregation,
                    ..
                }
            ));
        }
    }

    #[test]
    fn test_rejects_out_of_range_score() {
        let mut bad = msg(at(2024, 5, 5), 0.5);
        bad.sentiment_score = 1.5;
        let err = aggregate(&[msg(at(2024, 5, 4), 0.5), bad], &AggregationSettings::default())
            .unwrap_err();
        assert!(err.to_string().contains("message 2"));
    }

    #[test]
    fn test_rejects_inverted_trunk_bounds() {
        let settings = AggregationSettings {
            min_trunk_height: 50.0,
            max_trunk_height: 40.0,
            ..AggregationSettings::default()
        };
        assert!(aggregate(&[], &settings).is_err());
    }
}
