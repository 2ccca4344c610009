//! NDJSON (Newline Delimited JSON) file processing utilities.
//!
//! Capture files hold one JSON object per line; these helpers read and
//! append them with line-accurate error reporting.

use serde::{de::DeserializeOwned, Serialize};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use thiserror::Error;
use tokio::io::AsyncWriteExt;

/// Errors raised while reading or writing capture files.
#[derive(Error, Debug)]
pub enum CaptureError {
    /// I/O error when reading or writing files
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON parsing error at line {line}: {source}")]
    JsonParse {
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    /// Entry could not be serialized
    #[error("JSON serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    /// An entry failed validation
    #[error("Invalid entry at line {line}: {reason}")]
    InvalidEntry { line: usize, reason: String },

    /// Empty or invalid data
    #[error("No valid data found: {context}")]
    NoData { context: String },

    /// Replaying a capture failed
    #[error("Replay failed: {0}")]
    Replay(String),
}

impl CaptureError {
    /// Create a no data error
    pub fn no_data(context: impl Into<String>) -> Self {
        Self::NoData {
            context: context.into(),
        }
    }
}

/// Parse an NDJSON file, validating each entry.
///
/// Empty lines are skipped. A file without any entry is an error.
pub fn parse_ndjson_file<T, F>(path: &Path, validate_entry: F) -> Result<Vec<T>, CaptureError>
where
    T: DeserializeOwned,
    F: Fn(&T) -> Result<(), String>,
{
    let file = File::open(path)?;
    let reader = BufReader::new(file);
    let mut entries = Vec::new();

    for (line_number, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }

        let entry: T = serde_json::from_str(&line).map_err(|e| CaptureError::JsonParse {
            line: line_number + 1,
            source: e,
        })?;

        validate_entry(&entry).map_err(|reason| CaptureError::InvalidEntry {
            line: line_number + 1,
            reason,
        })?;

        entries.push(entry);
    }

    if entries.is_empty() {
        return Err(CaptureError::no_data(format!(
            "No valid entries found in file '{}'",
            path.display()
        )));
    }

    Ok(entries)
}

/// Append one entry as a single line, creating the file if needed.
pub async fn append_ndjson_line<T: Serialize>(path: &Path, entry: &T) -> Result<(), CaptureError> {
    let json_line = serde_json::to_string(entry)?;

    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    file.write_all(format!("{}\n", json_line).as_bytes()).await?;
    file.flush().await?;

    Ok(())
}

/// Count non-empty lines in an NDJSON file; a missing file counts as zero.
pub fn count_entries(path: &Path) -> Result<usize, CaptureError> {
    if !path.exists() {
        return Ok(0);
    }
    let reader = BufReader::new(File::open(path)?);
    let mut count = 0;
    for line in reader.lines() {
        if !line?.trim().is_empty() {
            count += 1;
        }
    }
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use tempfile::TempDir;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Entry {
        timestamp: i64,
        value: String,
    }

    fn no_check(_: &Entry) -> Result<(), String> {
        Ok(())
    }

    #[tokio::test]
    async fn test_append_then_parse() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("entries.ndjson");

        for (timestamp, value) in [(1, "a"), (2, "b")] {
            append_ndjson_line(
                &path,
                &Entry {
                    timestamp,
                    value: value.to_string(),
                },
            )
            .await
            .unwrap();
        }

        let entries: Vec<Entry> = parse_ndjson_file(&path, no_check).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].value, "b");
        assert_eq!(count_entries(&path).unwrap(), 2);
    }

    #[test]
    fn test_parse_error_reports_line() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("broken.ndjson");
        std::fs::write(&path, "{\"timestamp\":1,\"value\":\"a\"}\n\n{broken\n").unwrap();

        match parse_ndjson_file::<Entry, _>(&path, no_check) {
            Err(CaptureError::JsonParse { line, .. }) => assert_eq!(line, 3),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_validation_and_empty_files() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("zero.ndjson");
        std::fs::write(&path, "{\"timestamp\":0,\"value\":\"a\"}\n").unwrap();

        let result = parse_ndjson_file(&path, |entry: &Entry| {
            if entry.timestamp == 0 {
                Err("Invalid timestamp (zero)".to_string())
            } else {
                Ok(())
            }
        });
        assert!(matches!(result, Err(CaptureError::InvalidEntry { line: 1, .. })));

        let empty = temp_dir.path().join("empty.ndjson");
        std::fs::write(&empty, "\n").unwrap();
        assert!(matches!(
            parse_ndjson_file::<Entry, _>(&empty, no_check),
            Err(CaptureError::NoData { .. })
        ));
        assert_eq!(count_entries(&temp_dir.path().join("missing")).unwrap(), 0);
    }
}
