//! Value and column-name matchers used by classification entries.
//!
//! A closed set of matcher variants behind one dispatch function:
//!
//! - [`Matcher::ValueRegex`] - regex over a column *value*, partial (search)
//!   semantics
//! - [`Matcher::NameRegex`] - regex over a column *name*, anchored
//!   full-string semantics
//! - [`Matcher::SetLookup`] - exact membership in a dictionary file,
//!   fully materialized at construction

use regex::Regex;
use std::path::Path;

/// Error type for matcher construction
#[derive(Debug, thiserror::Error)]
pub enum MatcherError {
    #[error("Invalid pattern: {0}")]
    InvalidPattern(#[from] regex::Error),
    #[error("Cannot load dictionary: {0}")]
    Dictionary(#[from] std::io::Error),
}

/// A compiled predicate over a column name or value.
#[derive(Debug, Clone)]
pub enum Matcher {
    /// Anchored regex over column names
    NameRegex(Regex),
    /// Search regex over column values
    ValueRegex(Regex),
    /// Exact membership in a materialized dictionary
    SetLookup(Vec<String>),
}

impl Matcher {
    /// Compile a column-name matcher. The pattern is anchored so that it
    /// must cover the whole name.
    pub fn name_regex(pattern: &str) -> Result<Self, MatcherError> {
        let anchored = format!("^(?:{})$", pattern);
        Ok(Self::NameRegex(Regex::new(&anchored)?))
    }

    /// Compile a value matcher with search semantics
    pub fn value_regex(pattern: &str) -> Result<Self, MatcherError> {
        Ok(Self::ValueRegex(Regex::new(pattern)?))
    }

    /// Load a dictionary matcher from a file, one entry per line
    pub fn set_lookup(path: &Path) -> Result<Self, MatcherError> {
        let content = std::fs::read_to_string(path)?;
        let entries = content.lines().map(str::to_string).collect();
        Ok(Self::SetLookup(entries))
    }

    /// Test an input string against this matcher
    pub fn is_match(&self, input: &str) -> bool {
        match self {
            Self::NameRegex(re) | Self::ValueRegex(re) => re.is_match(input),
            Self::SetLookup(entries) => entries.iter().any(|e| e == input),
        }
    }

    /// Variant name for logs
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NameRegex(_) => "name-regex",
            Self::ValueRegex(_) => "value-regex",
            Self::SetLookup(_) => "set-lookup",
        }
    }
}
