use anyhow::{Context, Result};
use common::BackupStatus;
use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::path::Path;
use std::sync::{Mutex, PoisonError};

/// Append-only JSON-lines log of `BackupStatus` records.
pub struct HistoryLog {
    write_lock: Mutex<()>,
}

impl HistoryLog {
    pub fn new() -> Self {
        Self { write_lock: Mutex::new(()) }
    }

    pub fn append(&self, path: impl AsRef<Path>, record: &BackupStatus) -> Result<()> {
        let path = path.as_ref();
        let mut line = serde_json::to_string(record)?;
        line.push('\n');

        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("opening history {:?}", path))?;
        file.write_all(line.as_bytes())
            .with_context(|| format!("writing history {:?}", path))?;
        log::info!("history record saved, missing files: {}", record.missing_files);
        Ok(())
    }
}

impl Default for HistoryLog {
    fn default() -> Self {
        Self::new()
    }
}

/// Every record in the log, oldest first. Blank lines are skipped; a
/// malformed line is an error naming its line number.
pub fn read_all(path: impl AsRef<Path>) -> Result<Vec<BackupStatus>> {
    let path = path.as_ref();
    let file = std::fs::File::open(path).with_context(|| format!("opening history {:?}", path))?;
    let mut records = Vec::new();
    for (n, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let record = serde_json::from_str(&line)
            .with_context(|| format!("parsing history record at line {}", n + 1))?;
        records.push(record);
    }
    Ok(records)
}
