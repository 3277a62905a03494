//! Typed pipeline errors.
//!
//! The core returns [`PipelineError`]; the binary wraps it into
//! `anyhow::Error` with context where it crosses into I/O.

use std::fmt;
use thiserror::Error;

/// Pipeline stage in which a failure was detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Reading and validating input rows.
    Ingest,
    /// Turning classifier output into sentiment scores.
    Scoring,
    /// Bucketing and month grouping.
    Aggregation,
    /// Loading or checking a hierarchy artifact.
    Hierarchy,
    /// Producing or checking the grammar word.
    Grammar,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Ingest => write!(f, "ingest"),
            Stage::Scoring => write!(f, "scoring"),
            Stage::Aggregation => write!(f, "aggregation"),
            Stage::Hierarchy => write!(f, "hierarchy"),
            Stage::Grammar => write!(f, "grammar"),
        }
    }
}

/// Structural problem found in a grammar word.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GrammarError {
    #[error("unexpected symbol '{symbol}' at offset {offset}")]
    UnexpectedSymbol { symbol: char, offset: usize },

    #[error("'{closing}' at offset {offset} has no matching opener")]
    UnmatchedClose { closing: char, offset: usize },

    #[error("'{opening}' at offset {offset} is never closed")]
    UnclosedScope { opening: char, offset: usize },
}

/// Errors surfaced by the aggregation and grammar pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Malformed or missing input, or an invalid parameter. Fatal for the run.
    #[error("invalid input during {stage}: {reason}")]
    InvalidInput { stage: Stage, reason: String },

    /// The sentiment classifier failed or broke its contract.
    #[error("sentiment classifier failed: {0}")]
    Classifier(String),

    /// The produced word is not well formed.
    #[error("malformed grammar word: {0}")]
    Grammar(#[from] GrammarError),
}

impl PipelineError {
    /// Shorthand for [`PipelineError::InvalidInput`].
    pub fn invalid(stage: Stage, reason: impl Into<String>) -> Self {
        PipelineError::InvalidInput {
            stage,
            reason: reason.into(),
        }
    }
}
