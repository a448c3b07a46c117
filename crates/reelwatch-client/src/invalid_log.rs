use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Local;
use reelwatch_core::AppError;
use reelwatch_core::traits::InvalidItemRecorder;

/// Append-only text log of items classified as invalid.
///
/// One line per item: `YYYY-MM-DD HH:MM:SS - <title> - <imdb id or ->`.
#[derive(Debug, Clone)]
pub struct InvalidItemLog {
    path: PathBuf,
}

impl InvalidItemLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl InvalidItemRecorder for InvalidItemLog {
    fn record(&self, title: &str, external_id: Option<&str>) -> Result<(), AppError> {
        let io_err = |source: std::io::Error| AppError::PersistenceError {
            path: self.path.clone(),
            source,
        };
        let line = format!(
            "{} - {} - {}\n",
            Local::now().format("%Y-%m-%d %H:%M:%S"),
            title.replace(['\n', '\r'], " "),
            external_id.unwrap_or("-")
        );
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(io_err)?;
        file.write_all(line.as_bytes()).map_err(io_err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn appends_one_line_per_item() {
        let dir = tempfile::tempdir().unwrap();
        let log = InvalidItemLog::new(dir.path().join("invalid_movie.log"));

        log.record("Movie.A.2025", Some("tt1234567")).unwrap();
        log.record("Movie\nB", None).unwrap();

        let content = std::fs::read_to_string(log.path()).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with(" - Movie.A.2025 - tt1234567"));
        assert!(lines[1].ends_with(" - Movie B - -"));
        // "YYYY-MM-DD HH:MM:SS" prefix
        assert_eq!(lines[0].find(" - "), Some(19));
    }

    #[test]
    fn missing_directory_is_a_persistence_error() {
        let dir = tempfile::tempdir().unwrap();
        let log = InvalidItemLog::new(dir.path().join("missing").join("invalid.log"));
        assert!(matches!(
            log.record("x", None),
            Err(AppError::PersistenceError { .. })
        ));
    }
}
