//! Message table loading and validation.
//!
//! Rows are read loosely (every column optional, lenient booleans and
//! timestamps) and then validated into [`ScoredMessage`]s, so a bad row is
//! reported with its row number instead of as a parser error deep inside
//! serde.

use crate::error::{PipelineError, Stage};
use crate::models::{Classification, ScoredMessage, SentimentLabel};
use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Deserializer, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use tracing::{debug, info};

/// Supported input table formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputFormat {
    Csv,
    Json,
}

impl InputFormat {
    /// Pick the format from a file extension.
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_lowercase();
        match ext.as_str() {
            "csv" => Some(InputFormat::Csv),
            "json" => Some(InputFormat::Json),
            _ => None,
        }
    }
}

/// Timestamp as found in the input: text, or epoch milliseconds as written
/// by pandas `to_json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawTimestamp {
    EpochMillis(i64),
    Text(String),
}

/// One input row before validation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageRecord {
    #[serde(default)]
    pub send_datetime: Option<RawTimestamp>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default, deserialize_with = "lenient_bool")]
    pub is_analyzable: Option<bool>,
    /// Classifier label, if the table was already classified.
    #[serde(default)]
    pub sentiment: Option<String>,
    #[serde(default)]
    pub certainty: Option<f64>,
    #[serde(default)]
    pub sentiment_score: Option<f64>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum BoolLike {
    Bool(bool),
    Int(i64),
    Text(String),
}

/// Accept `true/false`, `True/False`, `1/0` and `yes/no`.
fn lenient_bool<'de, D>(deserializer: D) -> std::result::Result<Option<bool>, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;

    let value: Option<BoolLike> = Option::deserialize(deserializer)?;
    match value {
        None => Ok(None),
        Some(BoolLike::Bool(b)) => Ok(Some(b)),
        Some(BoolLike::Int(0)) => Ok(Some(false)),
        Some(BoolLike::Int(1)) => Ok(Some(true)),
        Some(BoolLike::Int(other)) => Err(D::Error::custom(format!(
            "expected a boolean, got {}",
            other
        ))),
        Some(BoolLike::Text(text)) => match text.trim().to_lowercase().as_str() {
            "" => Ok(None),
            "true" | "t" | "yes" | "y" | "1" => Ok(Some(true)),
            "false" | "f" | "no" | "n" | "0" => Ok(Some(false)),
            _ => Err(D::Error::custom(format!(
                "expected a boolean, got '{}'",
                text
            ))),
        },
    }
}

/// Parse the timestamp formats chat exports and pandas produce.
pub fn parse_timestamp(raw: &RawTimestamp) -> Option<NaiveDateTime> {
    match raw {
        RawTimestamp::EpochMillis(ms) => DateTime::from_timestamp_millis(*ms).map(|dt| dt.naive_utc()),
        RawTimestamp::Text(text) => {
            let text = text.trim();
            if text.is_empty() {
                return None;
            }

            for format in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M"] {
                if let Ok(ts) = NaiveDateTime::parse_from_str(text, format) {
                    return Some(ts);
                }
            }

            // offset dropped: buckets follow the sender's wall clock
            if let Ok(ts) = DateTime::parse_from_rfc3339(text) {
                return Some(ts.naive_local());
            }

            NaiveDate::parse_from_str(text, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        }
    }
}

/// Load raw message rows from a CSV or JSON file.
pub fn load_messages(path: &Path) -> Result<Vec<MessageRecord>> {
    let format = InputFormat::from_path(path).with_context(|| {
        format!(
            "Unsupported input format (expected .csv or .json): {}",
            path.display()
        )
    })?;

    info!("Loading messages from {} ({:?})", path.display(), format);

    let records = match format {
        InputFormat::Csv => {
            let mut reader = csv::Reader::from_path(path)
                .with_context(|| format!("Failed to open {}", path.display()))?;
            let mut records = Vec::new();
            for (index, row) in reader.deserialize::<MessageRecord>().enumerate() {
                let record = row.with_context(|| {
                    format!("Failed to parse row {} of {}", index + 1, path.display())
                })?;
                records.push(record);
            }
            records
        }
        InputFormat::Json => {
            let file =
                File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
            serde_json::from_reader(BufReader::new(file))
                .with_context(|| format!("Failed to parse {}", path.display()))?
        }
    };

    debug!("Loaded {} rows", records.len());
    Ok(records)
}

impl MessageRecord {
    /// Validated timestamp of this row (`row` is 1-based, for messages).
    pub fn timestamp(&self, row: usize) -> std::result::Result<NaiveDateTime, PipelineError> {
        let raw = self.send_datetime.as_ref().ok_or_else(|| {
            PipelineError::invalid(Stage::Ingest, format!("row {} has no send_datetime", row))
        })?;
        parse_timestamp(raw).ok_or_else(|| {
            PipelineError::invalid(
                Stage::Ingest,
                format!("row {} has an unreadable send_datetime {:?}", row, raw),
            )
        })
    }

    /// Validated `is_analyzable` flag of this row.
    pub fn analyzable(&self, row: usize) -> std::result::Result<bool, PipelineError> {
        self.is_analyzable.ok_or_else(|| {
            PipelineError::invalid(Stage::Ingest, format!("row {} has no is_analyzable", row))
        })
    }

    /// Text handed to the classifier.
    pub fn text(&self) -> &str {
        self.message.as_deref().unwrap_or("")
    }

    /// Build a scored message, taking sentiment from a classifier result when
    /// given and from the row's own columns otherwise.
    pub fn into_scored(
        self,
        row: usize,
        classification: Option<Classification>,
    ) -> std::result::Result<ScoredMessage, PipelineError> {
        let timestamp = self.timestamp(row)?;
        let is_analyzable = self.analyzable(row)?;
        let text = self.message.unwrap_or_default();

        if let Some(classification) = classification {
            check_unit(row, "classifier confidence", classification.confidence)?;
            return Ok(ScoredMessage::classified(
                timestamp,
                text,
                is_analyzable,
                classification,
            ));
        }

        // sentiment columns are ignored on non-analyzable rows
        if !is_analyzable {
            return Ok(ScoredMessage::with_score(
                timestamp,
                text,
                false,
                crate::models::NEUTRAL_SCORE,
            ));
        }

        let label = self
            .sentiment
            .as_deref()
            .map(|s| s.parse::<SentimentLabel>())
            .transpose()
            .map_err(|e| PipelineError::invalid(Stage::Scoring, format!("row {}: {}", row, e)))?;
        if let Some(certainty) = self.certainty {
            check_unit(row, "certainty", certainty)?;
        }

        if let Some(score) = self.sentiment_score {
            check_unit(row, "sentiment_score", score)?;
            let mut message = ScoredMessage::with_score(timestamp, text, true, score);
            if let (Some(label), Some(certainty)) = (label, self.certainty) {
                message.sentiment_label = label;
                message.certainty = certainty;
            }
            return Ok(message);
        }

        match (label, self.certainty) {
            (Some(label), Some(certainty)) => Ok(ScoredMessage::classified(
                timestamp,
                text,
                true,
                Classification::new(label, certainty),
            )),
            _ => Err(PipelineError::invalid(
                Stage::Scoring,
                format!(
                    "row {} is analyzable but has no sentiment_score (or sentiment + certainty); \
                     run with --classify to score it",
                    row
                ),
            )),
        }
    }
}

fn check_unit(row: usize, column: &str, value: f64) -> std::result::Result<(), PipelineError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(PipelineError::invalid(
            Stage::Scoring,
            format!("row {} has {} {}, outside [0,1]", row, column, value),
        ))
    }
}

/// Validate rows that already carry their sentiment.
pub fn into_scored(
    records: Vec<MessageRecord>,
) -> std::result::Result<Vec<ScoredMessage>, PipelineError> {
    records
        .into_iter()
        .enumerate()
        .map(|(index, record)| record.into_scored(index + 1, None))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{aggregate, AggregationSettings};
    use std::io::Write;
    use std::path::PathBuf;

    fn fixture(name: &str) -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR"))
            .join("fixtures")
            .join(name)
    }

    fn record(ts: &str, analyzable: Option<bool>, score: Option<f64>) -> MessageRecord {
        MessageRecord {
            send_datetime: Some(RawTimestamp::Text(ts.to_string())),
            message: Some("hi".to_string()),
            is_analyzable: analyzable,
            sentiment: None,
            certainty: None,
            sentiment_score: score,
        }
    }

    #[test]
    fn test_input_format_from_extension() {
        assert_eq!(InputFormat::from_path(Path::new("a.csv")), Some(InputFormat::Csv));
        assert_eq!(InputFormat::from_path(Path::new("a.JSON")), Some(InputFormat::Json));
        assert_eq!(InputFormat::from_path(Path::new("a.txt")), None);
        assert_eq!(InputFormat::from_path(Path::new("noext")), None);
    }

    #[test]
    fn test_parse_timestamp_formats() {
        let expected = NaiveDate::from_ymd_opt(2024, 1, 2)
            .unwrap()
            .and_hms_opt(9, 15, 0)
            .unwrap();
        for text in [
            "2024-01-02 09:15:00",
            "2024-01-02T09:15:00",
            "2024-01-02 09:15",
            "2024-01-02T09:15:00+02:00",
        ] {
            assert_eq!(
                parse_timestamp(&RawTimestamp::Text(text.to_string())),
                Some(expected),
                "{}",
                text
            );
        }

        let with_fraction = parse_timestamp(&RawTimestamp::Text("2024-01-02 09:15:00.250".into()));
        assert_eq!(with_fraction.map(|t| t.date()), Some(expected.date()));

        let date_only = parse_timestamp(&RawTimestamp::Text("2024-01-02".into())).unwrap();
        assert_eq!(date_only.date(), expected.date());

        // 2024-01-02T09:15:00Z
        let millis = parse_timestamp(&RawTimestamp::EpochMillis(1_704_186_900_000));
        assert_eq!(millis, Some(expected));

        assert_eq!(parse_timestamp(&RawTimestamp::Text("yesterday".into())), None);
        assert_eq!(parse_timestamp(&RawTimestamp::Text("  ".into())), None);
    }

    #[test]
    fn test_load_fixture_csv() {
        let records = load_messages(&fixture("conversation.csv")).unwrap();
        assert_eq!(records.len(), 12);
        assert_eq!(records[1].is_analyzable, Some(false));
        assert_eq!(records[8].message.as_deref(), Some("sorry, running late"));

        let messages = into_scored(records).unwrap();
        let hierarchy = aggregate(&messages, &AggregationSettings::default()).unwrap();
        let months: Vec<String> = hierarchy.months.iter().map(|m| m.month.to_string()).collect();
        assert_eq!(months, vec!["2024-01", "2024-02", "2024-03"]);
        assert_eq!(hierarchy.bucket_count(), 7);
        assert_eq!(hierarchy.message_count(), 12);
    }

    #[test]
    fn test_load_json_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chat.json");
        let mut file = File::create(&path).unwrap();
        write!(
            file,
            r#"[
                {{"send_datetime": "2024-05-01 10:00:00", "message": "yay", "is_analyzable": true, "sentiment": "positive", "certainty": 0.9}},
                {{"send_datetime": 1714557600000, "message": null, "is_analyzable": "False"}}
            ]"#
        )
        .unwrap();

        let records = load_messages(&path).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].send_datetime, Some(RawTimestamp::EpochMillis(1_714_557_600_000)));

        let messages = into_scored(records).unwrap();
        assert_eq!(messages[0].sentiment_score, 0.9);
        assert_eq!(messages[0].sentiment_label, SentimentLabel::Positive);
        assert_eq!(messages[1].sentiment_score, 0.5);
        assert_eq!(messages[1].text, "");
    }

    #[test]
    fn test_csv_with_bad_boolean_fails_with_row() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chat.csv");
        std::fs::write(
            &path,
            "send_datetime,message,is_analyzable,sentiment_score\n\
             2024-01-01 10:00:00,a,true,0.6\n\
             2024-01-01 10:00:00,b,maybe,0.6\n",
        )
        .unwrap();

        let err = load_messages(&path).unwrap_err();
        assert!(format!("{:#}", err).contains("row 2"));
    }

    #[test]
    fn test_missing_timestamp_is_invalid_input() {
        let mut bad = record("2024-01-01", Some(true), Some(0.6));
        bad.send_datetime = None;
        let err = into_scored(vec![record("2024-01-01", Some(true), Some(0.6)), bad]).unwrap_err();

        assert!(matches!(
            err,
            PipelineError::InvalidInput {
                stage: Stage::Ingest,
                ..
            }
        ));
        assert!(err.to_string().contains("row 2"));
    }

    #[test]
    fn test_missing_analyzable_flag_is_invalid_input() {
        let err = into_scored(vec![record("2024-01-01", None, Some(0.6))]).unwrap_err();
        assert!(err.to_string().contains("is_analyzable"));
    }

    #[test]
    fn test_non_analyzable_without_score_defaults_to_neutral() {
        let messages = into_scored(vec![record("2024-01-01", Some(false), None)]).unwrap();
        assert_eq!(messages[0].sentiment_score, 0.5);
    }

    #[test]
    fn test_analyzable_without_score_needs_classifier() {
        let err = into_scored(vec![record("2024-01-01", Some(true), None)]).unwrap_err();
        assert!(err.to_string().contains("--classify"));
    }

    #[test]
    fn test_out_of_range_score_is_rejected() {
        let err = into_scored(vec![record("2024-01-01", Some(true), Some(1.4))]).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::InvalidInput {
                stage: Stage::Scoring,
                ..
            }
        ));
    }

    #[test]
    fn test_non_analyzable_row_ignores_sentiment_columns() {
        let mut r = record("2024-01-01", Some(false), Some(1.7));
        r.sentiment = Some("ecstatic".to_string());
        r.certainty = Some(-3.0);

        let messages = into_scored(vec![r]).unwrap();
        assert_eq!(messages[0].sentiment_score, 0.5);
        assert_eq!(messages[0].sentiment_label, SentimentLabel::Neutral);
    }

    #[test]
    fn test_negative_label_uses_complement() {
        let mut r = record("2024-01-01", Some(true), None);
        r.sentiment = Some("negative".to_string());
        r.certainty = Some(0.75);
        let messages = into_scored(vec![r]).unwrap();
        assert!((messages[0].sentiment_score - 0.25).abs() < 1e-12);
    }
}
