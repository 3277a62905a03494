//! L-system grammar word production.

pub mod check;
pub mod producer;

pub use check::check_word;
pub use producer::{produce, Direction, GrammarSettings};
