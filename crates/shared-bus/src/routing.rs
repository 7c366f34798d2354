//! # Routing Patterns
//!
//! Topic-exchange matching over dot-separated routing keys.
//!
//! - A literal word matches only itself.
//! - `*` matches exactly one word.
//! - `#` matches zero or more words.
//!
//! ```text
//! pattern      key              match
//! ---------    --------------   -----
//! #            anything.at.all  yes
//! test         test             yes
//! test         other            no
//! node.*       node.discovered  yes
//! node.*       node.a.b         no
//! node.#       node             yes
//! ```

use shared_types::TransportError;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Star,
    Hash,
}

/// A parsed binding pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutingPattern {
    raw: String,
    segments: Vec<Segment>,
}

impl RoutingPattern {
    /// Parse a pattern. Wildcards must occupy a whole word.
    pub fn parse(pattern: &str) -> Result<Self, TransportError> {
        let segments = pattern
            .split('.')
            .map(|word| match word {
                "#" => Ok(Segment::Hash),
                "*" => Ok(Segment::Star),
                w if w.contains(['#', '*']) => Err(TransportError::InvalidPattern {
                    pattern: pattern.to_string(),
                    reason: format!("wildcard inside word '{}'", w),
                }),
                w => Ok(Segment::Literal(w.to_string())),
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            raw: pattern.to_string(),
            segments,
        })
    }

    /// The pattern as written.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// True if the pattern contains no wildcards.
    #[must_use]
    pub fn is_literal(&self) -> bool {
        self.segments
            .iter()
            .all(|s| matches!(s, Segment::Literal(_)))
    }

    /// Test a routing key against this pattern.
    #[must_use]
    pub fn matches(&self, routing_key: &str) -> bool {
        let words: Vec<&str> = routing_key.split('.').collect();
        match_words(&self.segments, &words)
    }
}

fn match_words(pattern: &[Segment], words: &[&str]) -> bool {
    match pattern.split_first() {
        None => words.is_empty(),
        Some((Segment::Hash, rest)) => {
            // Collapse consecutive hashes; they match the same set of keys.
            if matches!(rest.first(), Some(Segment::Hash)) {
                return match_words(rest, words);
            }
            (0..=words.len()).any(|skip| match_words(rest, &words[skip..]))
        }
        Some((Segment::Star, rest)) => !words.is_empty() && match_words(rest, &words[1..]),
        Some((Segment::Literal(lit), rest)) => {
            words.first() == Some(&lit.as_str()) && match_words(rest, &words[1..])
        }
    }
}

impl fmt::Display for RoutingPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}
