//! Grammar word generation.
//!
//! This module turns a [`TreeHierarchy`] into an L-system word. Each month is
//! a trunk segment carrying one branch; each bucket in the month is a step
//! along that branch with a sub-branch ending in a fruit.
//!
//! ```text
//! T(20)[+ M(8)[+W(11.0)F(0.82,2)] M(8)[+W(12.5)F(0.40,5)] ]
//! ```
//! (spaces added for readability; the real word has none)

use crate::error::{PipelineError, Stage};
use crate::models::{MonthGroup, TimeBucket, TreeHierarchy};
use serde::{Deserialize, Serialize};

/// Side a month branch leans toward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Counter-clockwise, emitted as `-`.
    Left,
    /// Clockwise, emitted as `+`.
    #[default]
    Right,
}

impl Direction {
    pub fn sign(&self) -> char {
        match self {
            Direction::Left => '-',
            Direction::Right => '+',
        }
    }

    pub fn flipped(&self) -> Self {
        match self {
            Direction::Left => Direction::Right,
            Direction::Right => Direction::Left,
        }
    }
}

/// Geometry constants baked into the word.
#[derive(Debug, Clone, PartialEq)]
pub struct GrammarSettings {
    /// Parameter of every `T` token.
    pub trunk_segment_height: f64,
    /// Parameter of every `M` token.
    pub week_step: f64,
    /// `W` length for an empty bucket.
    pub week_length_base: f64,
    /// `W` length added per message.
    pub week_length_scale: f64,
    /// Lean of the first month's branch; later months alternate.
    pub first_branch: Direction,
}

impl Default for GrammarSettings {
    fn default() -> Self {
        Self {
            trunk_segment_height: 20.0,
            week_step: 8.0,
            week_length_base: 10.0,
            week_length_scale: 0.5,
            first_branch: Direction::Right,
        }
    }
}

impl From<&crate::config::GrammarConfig> for GrammarSettings {
    fn from(config: &crate::config::GrammarConfig) -> Self {
        Self {
            trunk_segment_height: config.trunk_segment_height,
            week_step: config.week_step,
            week_length_base: config.week_length_base,
            week_length_scale: config.week_length_scale,
            first_branch: config.first_branch,
        }
    }
}

impl GrammarSettings {
    /// Geometry must render as plain decimal numbers.
    pub fn validate(&self) -> Result<(), PipelineError> {
        let values = [
            ("trunk_segment_height", self.trunk_segment_height),
            ("week_step", self.week_step),
            ("week_length_base", self.week_length_base),
            ("week_length_scale", self.week_length_scale),
        ];
        for (name, value) in values {
            if !value.is_finite() || value < 0.0 {
                return Err(PipelineError::invalid(
                    Stage::Grammar,
                    format!("{} must be a non-negative number, got {}", name, value),
                ));
            }
        }
        Ok(())
    }
}

/// Produce the grammar word for a whole hierarchy.
pub fn produce(hierarchy: &TreeHierarchy, settings: &GrammarSettings) -> String {
    let mut word = String::new();
    let mut direction = settings.first_branch;

    for month in &hierarchy.months {
        word.push_str(&produce_month(month, direction, settings));
        direction = direction.flipped();
    }

    word
}

/// Trunk segment plus one signed branch holding every bucket of the month.
fn produce_month(month: &MonthGroup, direction: Direction, settings: &GrammarSettings) -> String {
    let mut section = String::new();

    section.push_str(&format!("T({})", settings.trunk_segment_height));
    section.push('[');
    section.push(direction.sign());

    for bucket in &month.weeks {
        section.push_str(&produce_week(bucket, settings));
    }

    section.push(']');

    section
}

/// Step along the month branch, then a sub-branch ending in the fruit.
fn produce_week(bucket: &TimeBucket, settings: &GrammarSettings) -> String {
    let length =
        settings.week_length_base + bucket.message_count as f64 * settings.week_length_scale;

    format!(
        "M({})[+W({:.1})F({:.2},{})]",
        settings.week_step, length, bucket.avg_sentiment_contrasted, bucket.message_count
    )
}
