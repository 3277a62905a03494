//! Structural check of a grammar word before it leaves the process.

use crate::error::GrammarError;

/// Counts gathered while checking a word.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WordStats {
    /// `T` tokens, one per month.
    pub trunk_segments: usize,
    /// `M` tokens, one per bucket.
    pub steps: usize,
    /// `F` tokens, one per bucket.
    pub fruits: usize,
    /// Deepest `[` nesting seen.
    pub max_depth: usize,
}

fn is_word_symbol(c: char) -> bool {
    matches!(
        c,
        'T' | 'M' | 'W' | 'F' | '(' | ')' | '[' | ']' | '+' | '-' | '.' | ','
    ) || c.is_ascii_digit()
}

/// Verify the alphabet and that every `[`/`(` closes exactly once, in order.
pub fn check_word(word: &str) -> Result<WordStats, GrammarError> {
    let mut stats = WordStats::default();
    let mut open: Vec<(char, usize)> = Vec::new();
    let mut depth = 0usize;

    for (offset, c) in word.char_indices() {
        if !is_word_symbol(c) {
            return Err(GrammarError::UnexpectedSymbol { symbol: c, offset });
        }

        match c {
            'T' => stats.trunk_segments += 1,
            'M' => stats.steps += 1,
            'F' => stats.fruits += 1,
            '[' | '(' => {
                open.push((c, offset));
                if c == '[' {
                    depth += 1;
                    stats.max_depth = stats.max_depth.max(depth);
                }
            }
            ']' | ')' => {
                let expected = if c == ']' { '[' } else { '(' };
                match open.pop() {
                    Some((opening, _)) if opening == expected => {
                        if c == ']' {
                            depth -= 1;
                        }
                    }
                    _ => return Err(GrammarError::UnmatchedClose { closing: c, offset }),
                }
            }
            _ => {}
        }
    }

    if let Some((opening, offset)) = open.pop() {
        return Err(GrammarError::UnclosedScope { opening, offset });
    }

    Ok(stats)
}
