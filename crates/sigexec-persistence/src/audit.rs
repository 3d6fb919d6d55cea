//! Audit exception capture.
//!
//! Every transition to `error`/`canceled_error` and every swallowed
//! non-fatal failure is recorded here. Recording is best-effort: callers log
//! a failed write and carry on.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::StoreResult;

pub const AUDIT_FILE: &str = "audit.jsonl";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditLevel {
    Warning,
    Error,
}

/// One captured exception.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditException {
    pub service: String,
    pub module: String,
    pub method: String,
    pub level: AuditLevel,
    /// Structured details (ids, symbol, error kind).
    #[serde(default)]
    pub context: serde_json::Value,
    pub message: String,
    pub at: DateTime<Utc>,
}

impl AuditException {
    pub fn new(
        service: impl Into<String>,
        module: impl Into<String>,
        method: impl Into<String>,
        level: AuditLevel,
        message: impl Into<String>,
    ) -> Self {
        Self {
            service: service.into(),
            module: module.into(),
            method: method.into(),
            level,
            context: serde_json::Value::Null,
            message: message.into(),
            at: Utc::now(),
        }
    }

    pub fn with_context(mut self, context: serde_json::Value) -> Self {
        self.context = context;
        self
    }

    pub fn at(mut self, at: DateTime<Utc>) -> Self {
        self.at = at;
        self
    }
}

/// Destination for audit exceptions.
pub trait AuditSink: Send + Sync {
    fn record(&self, exception: &AuditException) -> StoreResult<()>;
}

/// Arc wrapper for audit sink trait objects.
pub type DynAuditSink = Arc<dyn AuditSink>;

/// Appends exceptions to `audit.jsonl`, one JSON object per line.
pub struct JsonLinesAuditSink {
    path: PathBuf,
    writer: Mutex<BufWriter<File>>,
}

impl JsonLinesAuditSink {
    pub fn open(dir: impl AsRef<Path>) -> StoreResult<Self> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;
        let path = dir.join(AUDIT_FILE);

        info!(path = %path.display(), "Opening audit log (append mode)");

        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            writer: Mutex::new(BufWriter::new(file)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl AuditSink for JsonLinesAuditSink {
    fn record(&self, exception: &AuditException) -> StoreResult<()> {
        let json = serde_json::to_string(exception)?;
        let mut writer = self.writer.lock();
        writeln!(writer, "{}", json)?;
        writer.flush()?;
        debug!(
            module = %exception.module,
            method = %exception.method,
            "Recorded audit exception"
        );
        Ok(())
    }
}

impl Drop for JsonLinesAuditSink {
    fn drop(&mut self) {
        if let Err(e) = self.writer.lock().flush() {
            warn!(?e, "Failed to flush audit log on drop");
        }
    }
}

/// Keeps exceptions in memory. Used by tests and paper runs.
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    records: Mutex<Vec<AuditException>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<AuditException> {
        self.records.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

impl AuditSink for MemoryAuditSink {
    fn record(&self, exception: &AuditException) -> StoreResult<()> {
        self.records.lock().push(exception.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, BufReader};
    use tempfile::TempDir;

    fn sample() -> AuditException {
        AuditException::new(
            "sigexec",
            "controller",
            "place_entry",
            AuditLevel::Error,
            "exchange rejected order",
        )
        .with_context(serde_json::json!({"order_id": 3, "kind": "placement"}))
    }

    #[test]
    fn test_json_lines_sink_appends() {
        let temp = TempDir::new().unwrap();
        {
            let sink = JsonLinesAuditSink::open(temp.path()).unwrap();
            sink.record(&sample()).unwrap();
            sink.record(&sample()).unwrap();
        }
        {
            let sink = JsonLinesAuditSink::open(temp.path()).unwrap();
            sink.record(&sample()).unwrap();
        }

        let file = File::open(temp.path().join(AUDIT_FILE)).unwrap();
        let records: Vec<AuditException> = BufReader::new(file)
            .lines()
            .map(|line| serde_json::from_str(&line.unwrap()).unwrap())
            .collect();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].method, "place_entry");
        assert_eq!(records[0].level, AuditLevel::Error);
        assert_eq!(records[0].context["kind"], "placement");
    }

    #[test]
    fn test_level_serializes_lowercase() {
        let json = serde_json::to_string(&sample()).unwrap();
        assert!(json.contains("\"level\":\"error\""));
    }

    #[test]
    fn test_memory_sink_collects() {
        let sink = MemoryAuditSink::new();
        assert!(sink.is_empty());
        sink.record(&sample()).unwrap();
        assert_eq!(sink.len(), 1);
        assert_eq!(sink.records()[0].module, "controller");
    }
}
