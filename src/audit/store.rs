use std::fs;
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::audit::record::AuditRecord;
use crate::error::ConsoleResult;

const AUDIT_DIR_NAME: &str = "audit";
const EVENTS_FILE_NAME: &str = "events.jsonl";

/// Append-only JSONL audit trail on the local filesystem.
#[derive(Debug)]
pub struct AuditTrail {
    events_path: PathBuf,
    write_lock: Mutex<()>,
}

impl AuditTrail {
    /// Create an audit trail under `<base_dir>/audit/`.
    pub fn new(base_dir: impl AsRef<Path>) -> ConsoleResult<Self> {
        let dir = base_dir.as_ref().join(AUDIT_DIR_NAME);
        fs::create_dir_all(&dir)?;
        Ok(Self {
            events_path: dir.join(EVENTS_FILE_NAME),
            write_lock: Mutex::new(()),
        })
    }

    /// Append a single record.
    pub fn append(&self, record: &AuditRecord) -> ConsoleResult<()> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.events_path)?;
        file.write_all(line.as_bytes())?;
        file.sync_data()?;
        Ok(())
    }

    /// Append a record on the blocking pool.
    pub async fn append_async(self: &Arc<Self>, record: AuditRecord) -> ConsoleResult<()> {
        let trail = Arc::clone(self);
        tokio::task::spawn_blocking(move || trail.append(&record)).await?
    }

    /// Load every record in append order. Unparseable lines are skipped.
    pub fn load(&self) -> ConsoleResult<Vec<AuditRecord>> {
        let file = match fs::File::open(&self.events_path) {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };

        let mut records = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(&line) {
                Ok(record) => records.push(record),
                Err(err) => tracing::warn!(error = %err, "skipping malformed audit line"),
            }
        }
        Ok(records)
    }

    /// Path of the events file.
    pub fn events_path(&self) -> &Path {
        &self.events_path
    }
}
