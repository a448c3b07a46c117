use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::AppError;

static IMDB_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\btt(\d{7,8})\b").expect("IMDb id regex is valid"));

/// A release item produced by the feed for one pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateItem {
    /// Unique identifier of the item; the dedup key.
    pub guid: String,
    pub title: String,
    pub link: Option<String>,
    /// Raw IMDb attribute as published by the indexer (with or without `tt`).
    pub imdb_id: Option<String>,
}

impl CandidateItem {
    pub fn new(guid: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            guid: guid.into(),
            title: title.into(),
            link: None,
            imdb_id: None,
        }
    }

    pub fn with_imdb_id(mut self, imdb_id: impl Into<String>) -> Self {
        self.imdb_id = Some(imdb_id.into());
        self
    }

    pub fn with_link(mut self, link: impl Into<String>) -> Self {
        self.link = Some(link.into());
        self
    }

    /// Resolve the external database id used by the acquisition service.
    ///
    /// The indexer attribute wins; otherwise the first `tt1234567` found in the
    /// title or link is used.
    pub fn external_id(&self) -> Result<String, AppError> {
        if let Some(raw) = self.imdb_id.as_deref().map(str::trim)
            && !raw.is_empty()
        {
            return normalize_imdb_id(raw);
        }

        [Some(self.title.as_str()), self.link.as_deref()]
            .into_iter()
            .flatten()
            .find_map(|text| IMDB_ID.captures(text))
            .map(|caps| format!("tt{}", &caps[1]))
            .ok_or_else(|| {
                AppError::ExtractionError(format!("no IMDb id for '{}'", self.title))
            })
    }
}

/// Normalise an IMDb id to the `tt`-prefixed form.
pub fn normalize_imdb_id(raw: &str) -> Result<String, AppError> {
    let digits = raw
        .strip_prefix("tt")
        .or_else(|| raw.strip_prefix("TT"))
        .unwrap_or(raw);
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(AppError::ExtractionError(format!(
            "malformed IMDb id '{raw}'"
        )));
    }
    Ok(format!("tt{digits}"))
}

/// What the acquisition service needs to add one movie.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AcquisitionRequest {
    pub imdb_id: String,
    pub title: String,
}

/// Outcome category reported by the acquisition service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AcquisitionOutcome {
    Added,
    Exists,
    Invalid,
    Excluded,
}

impl AcquisitionOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            AcquisitionOutcome::Added => "added",
            AcquisitionOutcome::Exists => "exists",
            AcquisitionOutcome::Invalid => "invalid",
            AcquisitionOutcome::Excluded => "excluded",
        }
    }
}

impl fmt::Display for AcquisitionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Counters for one pipeline pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub fetched: usize,
    /// Rejected by the include/exclude patterns.
    pub filtered_out: usize,
    /// Matched but already recorded in the ledger.
    pub already_seen: usize,
    pub added: usize,
    pub exists: usize,
    pub invalid: usize,
    /// Rejected by the acquisition service's own exclusion list.
    pub excluded: usize,
    /// Dispatch gave up; the item will be retried next pass.
    pub failed: usize,
    /// Ledger writes that failed; those GUIDs may be reprocessed after a restart.
    pub ledger_errors: usize,
    /// Titles of matched items that did not end up added.
    pub unprocessed: Vec<String>,
}

impl RunSummary {
    pub fn record_outcome(&mut self, outcome: AcquisitionOutcome, title: &str) {
        match outcome {
            AcquisitionOutcome::Added => self.added += 1,
            AcquisitionOutcome::Exists => self.exists += 1,
            AcquisitionOutcome::Invalid => self.invalid += 1,
            AcquisitionOutcome::Excluded => self.excluded += 1,
        }
        if outcome != AcquisitionOutcome::Added {
            self.unprocessed.push(title.to_string());
        }
    }

    pub fn record_failure(&mut self, title: &str) {
        self.failed += 1;
        self.unprocessed.push(title.to_string());
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Added: {}, Exists: {}, Invalid: {}, Excluded: {} (fetched {}, filtered {}, seen {}, failed {})",
            self.added,
            self.exists,
            self.invalid,
            self.excluded,
            self.fetched,
            self.filtered_out,
            self.already_seen,
            self.failed
        )?;
        if self.ledger_errors > 0 {
            write!(f, ", {} ledger write errors", self.ledger_errors)?;
        }
        Ok(())
    }
}

/// Process-lifetime totals across every pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunTotals {
    pub passes: u64,
    pub aborted: u64,
    pub added: u64,
    pub exists: u64,
    pub invalid: u64,
    pub excluded: u64,
}

impl RunTotals {
    pub fn absorb(&mut self, summary: &RunSummary) {
        self.passes += 1;
        self.added += summary.added as u64;
        self.exists += summary.exists as u64;
        self.invalid += summary.invalid as u64;
        self.excluded += summary.excluded as u64;
    }
}

impl fmt::Display for RunTotals {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Total Added: {}, Total Exists: {}, Total Invalid: {}, Total Excluded: {}",
            self.added, self.exists, self.invalid, self.excluded
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_external_id_prefers_attribute() {
        let item = CandidateItem::new("g1", "Movie.tt7654321.2025").with_imdb_id("1234567");
        assert_eq!(item.external_id().unwrap(), "tt1234567");
    }

    #[test]
    fn test_external_id_keeps_existing_prefix() {
        let item = CandidateItem::new("g1", "Movie").with_imdb_id("tt0111161");
        assert_eq!(item.external_id().unwrap(), "tt0111161");
    }

    #[test]
    fn test_external_id_falls_back_to_title_then_link() {
        let item = CandidateItem::new("g1", "Movie.A.2025.tt12345678.1080p");
        assert_eq!(item.external_id().unwrap(), "tt12345678");

        let item = CandidateItem::new("g1", "Movie.A.2025.1080p")
            .with_link("https://www.imdb.com/title/tt0068646/");
        assert_eq!(item.external_id().unwrap(), "tt0068646");
    }

    #[test]
    fn test_external_id_missing_is_extraction_error() {
        let item = CandidateItem::new("g1", "Movie.A.2025.1080p");
        assert!(matches!(
            item.external_id(),
            Err(AppError::ExtractionError(_))
        ));
    }

    #[test]
    fn test_malformed_attribute_is_extraction_error() {
        let item = CandidateItem::new("g1", "Movie").with_imdb_id("n/a");
        assert!(matches!(
            item.external_id(),
            Err(AppError::ExtractionError(_))
        ));
    }

    #[test]
    fn test_summary_counts_and_unprocessed_titles() {
        let mut summary = RunSummary::default();
        summary.record_outcome(AcquisitionOutcome::Added, "A");
        summary.record_outcome(AcquisitionOutcome::Invalid, "B");
        summary.record_failure("C");

        assert_eq!(summary.added, 1);
        assert_eq!(summary.invalid, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.unprocessed, vec!["B".to_string(), "C".to_string()]);
    }

    #[test]
    fn test_totals_accumulate() {
        let mut totals = RunTotals::default();
        let summary = RunSummary {
            added: 2,
            exists: 1,
            ..Default::default()
        };
        totals.absorb(&summary);
        totals.absorb(&summary);
        assert_eq!(totals.passes, 2);
        assert_eq!(totals.added, 4);
        assert_eq!(totals.exists, 2);
    }
}
