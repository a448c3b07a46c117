//! Include/exclude title filtering.
//!
//! A title matches when at least one include pattern matches it (an empty
//! include list imposes no constraint) and no exclude pattern does. Patterns
//! are case-insensitive and searched anywhere in the title unless they anchor
//! themselves. A blank title never matches.

use regex::{Regex, RegexBuilder};

use crate::error::AppError;

/// Why a title was accepted or rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterVerdict {
    Matched,
    /// The title is empty or whitespace.
    EmptyTitle,
    /// No include pattern matched.
    NotIncluded,
    /// The exclude pattern at this index matched.
    Excluded(usize),
}

impl FilterVerdict {
    pub fn is_match(&self) -> bool {
        matches!(self, FilterVerdict::Matched)
    }
}

/// Compiled include/exclude rule set. Immutable once built.
#[derive(Debug, Clone)]
pub struct PatternFilter {
    include: Vec<Regex>,
    exclude: Vec<Regex>,
}

impl PatternFilter {
    /// Compile both pattern lists. Any pattern that fails to compile is a
    /// configuration error.
    pub fn new<S: AsRef<str>>(include: &[S], exclude: &[S]) -> Result<Self, AppError> {
        Ok(Self {
            include: compile_all(include, "match_patterns")?,
            exclude: compile_all(exclude, "not_match_patterns")?,
        })
    }

    /// A filter that accepts every non-blank title.
    pub fn accept_all() -> Self {
        Self {
            include: Vec::new(),
            exclude: Vec::new(),
        }
    }

    pub fn include_count(&self) -> usize {
        self.include.len()
    }

    pub fn exclude_count(&self) -> usize {
        self.exclude.len()
    }

    pub fn matches(&self, title: &str) -> bool {
        self.evaluate(title).is_match()
    }

    /// Evaluate includes first (first hit wins), then excludes (first hit rejects).
    pub fn evaluate(&self, title: &str) -> FilterVerdict {
        if title.trim().is_empty() {
            return FilterVerdict::EmptyTitle;
        }
        if !self.include.is_empty() && !self.include.iter().any(|re| re.is_match(title)) {
            return FilterVerdict::NotIncluded;
        }
        match self.exclude.iter().position(|re| re.is_match(title)) {
            Some(idx) => FilterVerdict::Excluded(idx),
            None => FilterVerdict::Matched,
        }
    }

    /// Source text of the exclude pattern at `idx`, for log messages.
    pub fn exclude_pattern(&self, idx: usize) -> Option<&str> {
        self.exclude.get(idx).map(Regex::as_str)
    }
}

fn compile_all<S: AsRef<str>>(patterns: &[S], field: &str) -> Result<Vec<Regex>, AppError> {
    patterns
        .iter()
        .enumerate()
        .map(|(idx, pattern)| {
            RegexBuilder::new(pattern.as_ref())
                .case_insensitive(true)
                .build()
                .map_err(|e| {
                    AppError::ConfigError(format!(
                        "{field}[{idx}] '{}' is not a valid regex: {e}",
                        pattern.as_ref()
                    ))
                })
        })
        .collect()
}
