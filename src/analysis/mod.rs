//! Temporal aggregation.
//!
//! Turns scored messages into the month/bucket hierarchy the grammar
//! producer walks.

pub mod aggregator;
pub mod buckets;

pub use aggregator::{aggregate, AggregationSettings};
pub use buckets::{BucketFreq, BucketLabel};
