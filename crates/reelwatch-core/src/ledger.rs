//! Persistent, bounded record of already-processed feed GUIDs.
//!
//! The on-disk format is one identifier per line, oldest first. Every
//! mutation rewrites the whole file through a temporary file in the same
//! directory followed by a rename, so readers only ever observe the previous
//! or the new complete ledger.

use std::collections::{HashSet, VecDeque};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use crate::error::AppError;

/// Insertion-ordered set of GUIDs with FIFO eviction.
#[derive(Debug)]
pub struct DedupLedger {
    entries: VecDeque<String>,
    index: HashSet<String>,
    max_entries: usize,
    /// `None` keeps the ledger in memory only.
    path: Option<PathBuf>,
}

impl DedupLedger {
    /// A ledger that is never read from or written to disk.
    pub fn in_memory(max_entries: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            index: HashSet::new(),
            max_entries: max_entries.max(1),
            path: None,
        }
    }

    /// Load the ledger stored at `path`. A missing file yields an empty ledger.
    ///
    /// Blank lines are skipped and repeated identifiers keep their first
    /// position. If the file holds more than `max_entries`, the oldest are
    /// dropped in memory and disappear from disk on the next write.
    pub fn load(path: impl Into<PathBuf>, max_entries: usize) -> Result<Self, AppError> {
        let path = path.into();
        let mut ledger = Self {
            path: None,
            ..Self::in_memory(max_entries)
        };

        match std::fs::read_to_string(&path) {
            Ok(content) => {
                for line in content.lines().filter(|l| !l.is_empty()) {
                    ledger.insert(line);
                }
                tracing::debug!(
                    path = %path.display(),
                    entries = ledger.len(),
                    "Loaded dedup ledger"
                );
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "No dedup ledger yet, starting empty");
            }
            Err(source) => return Err(AppError::PersistenceError { path, source }),
        }

        ledger.path = Some(path);
        Ok(ledger)
    }

    pub fn contains(&self, guid: &str) -> bool {
        self.index.contains(guid)
    }

    /// Record `guid`, evicting the oldest entries beyond the bound, and
    /// persist the result.
    ///
    /// Returns `Ok(false)` without touching the disk if the GUID was already
    /// present. On a persistence error the in-memory ledger still holds the
    /// new entry.
    pub fn record(&mut self, guid: &str) -> Result<bool, AppError> {
        if guid.is_empty() || guid.contains(['\n', '\r']) {
            return Err(AppError::Generic(format!(
                "identifier {guid:?} cannot be stored in the ledger"
            )));
        }
        if !self.insert(guid) {
            return Ok(false);
        }
        self.persist()?;
        Ok(true)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Entries from oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(String::as_str)
    }

    fn insert(&mut self, guid: &str) -> bool {
        if !self.index.insert(guid.to_string()) {
            return false;
        }
        self.entries.push_back(guid.to_string());
        while self.entries.len() > self.max_entries {
            if let Some(evicted) = self.entries.pop_front() {
                self.index.remove(&evicted);
            }
        }
        true
    }

    fn persist(&self) -> Result<(), AppError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let io_err = |source: std::io::Error| AppError::PersistenceError {
            path: path.clone(),
            source,
        };

        let dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(dir).map_err(io_err)?;

        let mut tmp = NamedTempFile::new_in(dir).map_err(io_err)?;
        {
            let mut writer = BufWriter::new(tmp.as_file_mut());
            for guid in &self.entries {
                writeln!(writer, "{guid}").map_err(io_err)?;
            }
            writer.flush().map_err(io_err)?;
        }
        tmp.as_file().sync_all().map_err(io_err)?;
        tmp.persist(path).map_err(|e| io_err(e.error))?;

        tracing::debug!(path = %path.display(), entries = self.len(), "Persisted dedup ledger");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ledger_path(dir: &tempfile::TempDir) -> PathBuf {
        dir.path().join("scanned_guids.txt")
    }

    #[test]
    fn missing_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = DedupLedger::load(ledger_path(&dir), 10).unwrap();
        assert!(ledger.is_empty());
        assert!(!ledger_path(&dir).exists());
    }

    #[test]
    fn record_then_contains_survives_reload() {
        let dir = tempfile::tempdir().unwrap();
        let mut ledger = DedupLedger::load(ledger_path(&dir), 10).unwrap();

        assert!(ledger.record("g1").unwrap());
        assert!(ledger.record("g2").unwrap());
        assert!(ledger.contains("g1"));

        let reloaded = DedupLedger::load(ledger_path(&dir), 10).unwrap();
        assert!(reloaded.contains("g1"));
        assert!(reloaded.contains("g2"));
        assert_eq!(reloaded.iter().collect::<Vec<_>>(), vec!["g1", "g2"]);
    }

    #[test]
    fn record_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let mut ledger = DedupLedger::load(ledger_path(&dir), 10).unwrap();

        assert!(ledger.record("g1").unwrap());
        assert!(!ledger.record("g1").unwrap());
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn eviction_removes_oldest_first() {
        let dir = tempfile::tempdir().unwrap();
        let mut ledger = DedupLedger::load(ledger_path(&dir), 3).unwrap();

        for guid in ["g1", "g2", "g3", "g4", "g5"] {
            ledger.record(guid).unwrap();
            assert!(ledger.len() <= 3);
        }

        assert!(!ledger.contains("g1"));
        assert!(!ledger.contains("g2"));
        assert_eq!(ledger.iter().collect::<Vec<_>>(), vec!["g3", "g4", "g5"]);

        let on_disk = std::fs::read_to_string(ledger_path(&dir)).unwrap();
        assert_eq!(on_disk, "g3\ng4\ng5\n");
    }

    #[test]
    fn oversized_file_is_trimmed_on_load() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(ledger_path(&dir), "a\nb\n\nb\nc\nd\n").unwrap();

        let ledger = DedupLedger::load(ledger_path(&dir), 2).unwrap();
        assert_eq!(ledger.iter().collect::<Vec<_>>(), vec!["c", "d"]);
    }

    #[test]
    fn crlf_files_round_trip_exactly() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(ledger_path(&dir), "abc-123\r\nurn:guid:def\r\n").unwrap();

        let ledger = DedupLedger::load(ledger_path(&dir), 10).unwrap();
        assert!(ledger.contains("abc-123"));
        assert!(ledger.contains("urn:guid:def"));
    }

    #[test]
    fn rejects_identifiers_with_line_breaks() {
        let mut ledger = DedupLedger::in_memory(10);
        assert!(ledger.record("a\nb").is_err());
        assert!(ledger.record("").is_err());
        assert!(ledger.is_empty());
    }

    #[test]
    fn in_memory_ledger_never_touches_disk() {
        let mut ledger = DedupLedger::in_memory(2);
        assert!(ledger.record("g1").unwrap());
        assert!(ledger.path().is_none());
        assert!(ledger.contains("g1"));
    }

    #[test]
    fn write_failure_keeps_entry_in_memory() {
        let dir = tempfile::tempdir().unwrap();
        // A directory where the ledger file should be makes the final rename fail.
        let path = ledger_path(&dir);
        std::fs::create_dir(&path).unwrap();
        std::fs::write(path.join("blocker"), "x").unwrap();

        let mut ledger = DedupLedger {
            path: Some(path),
            ..DedupLedger::in_memory(10)
        };
        let err = ledger.record("g1").unwrap_err();

        assert!(matches!(err, AppError::PersistenceError { .. }));
        assert!(ledger.contains("g1"));
    }

    #[test]
    fn no_temp_files_left_behind() {
        let dir = tempfile::tempdir().unwrap();
        let mut ledger = DedupLedger::load(ledger_path(&dir), 10).unwrap();
        ledger.record("g1").unwrap();
        ledger.record("g2").unwrap();

        let names: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![std::ffi::OsString::from("scanned_guids.txt")]);
    }
}
