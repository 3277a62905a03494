//! Sentiment classification of raw messages.
//!
//! Only analyzable messages are sent to the classifier. Batches run
//! concurrently but results are reassembled in input order.

pub mod ollama;

pub use ollama::OllamaClassifier;

use crate::error::{PipelineError, Stage};
use crate::ingest::MessageRecord;
use crate::models::{Classification, ScoredMessage};
use anyhow::Result;
use futures::stream::{self, StreamExt};
use indicatif::{ProgressBar, ProgressStyle};
use std::future::Future;
use tracing::{debug, info};

/// Anything that can label a batch of texts.
///
/// Implementations must return exactly one classification per input text,
/// in input order.
pub trait SentimentClassifier {
    fn classify(
        &self,
        texts: &[String],
    ) -> impl Future<Output = Result<Vec<Classification>>> + Send;
}

/// Classify every analyzable record and build scored messages.
///
/// Non-analyzable records never reach the classifier and score neutral.
pub async fn score_records<C>(
    classifier: &C,
    records: Vec<MessageRecord>,
    batch_size: usize,
    concurrency: usize,
    show_progress: bool,
) -> Result<Vec<ScoredMessage>, PipelineError>
where
    C: SentimentClassifier + Sync,
{
    if batch_size == 0 || concurrency == 0 {
        return Err(PipelineError::invalid(
            Stage::Scoring,
            "batch size and concurrency must be at least 1",
        ));
    }

    // every row is checked before the first request goes out
    let mut texts = Vec::new();
    for (index, record) in records.iter().enumerate() {
        record.timestamp(index + 1)?;
        if record.analyzable(index + 1)? {
            texts.push(record.text().replace(['\r', '\n'], " "));
        }
    }

    info!(
        "Classifying {} of {} messages ({} per batch, {} in flight)",
        texts.len(),
        records.len(),
        batch_size,
        concurrency
    );

    let progress = if show_progress && !texts.is_empty() {
        let pb = ProgressBar::new(texts.len() as u64);
        if let Ok(style) = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})")
        {
            pb.set_style(style.progress_chars("#>-"));
        }
        pb
    } else {
        ProgressBar::hidden()
    };

    let batches: Vec<Result<Vec<Classification>>> = stream::iter(texts.chunks(batch_size))
        .map(|chunk| {
            let pb = progress.clone();
            async move {
                let result = classifier.classify(chunk).await;
                pb.inc(chunk.len() as u64);
                result.and_then(|labels| {
                    if labels.len() == chunk.len() {
                        Ok(labels)
                    } else {
                        Err(anyhow::anyhow!(
                            "classifier returned {} results for {} messages",
                            labels.len(),
                            chunk.len()
                        ))
                    }
                })
            }
        })
        .buffered(concurrency)
        .collect()
        .await;

    progress.finish_and_clear();

    let mut classifications = Vec::with_capacity(texts.len());
    for (batch, result) in batches.into_iter().enumerate() {
        let labels =
            result.map_err(|e| PipelineError::Classifier(format!("batch {}: {:#}", batch + 1, e)))?;
        classifications.extend(labels);
    }
    debug!("Received {} classifications", classifications.len());

    let mut classifications = classifications.into_iter();
    let mut messages = Vec::with_capacity(records.len());
    for (index, record) in records.into_iter().enumerate() {
        let row = index + 1;
        let classification = if record.analyzable(row)? {
            classifications.next()
        } else {
            None
        };
        messages.push(record.into_scored(row, classification)?);
    }

    Ok(messages)
}
