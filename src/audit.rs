//! Audit sinks that persist raw inbound payloads.
//!
//! The orchestrator only ever calls [`AuditSink::persist`]; it does not care
//! where records end up. Keys come from [`audit_key`] and are unique per
//! request, so concurrent writers never touch the same record.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::error::{Result, ShimError};

const MAX_MEMORY_RECORDS: usize = 10_000;

#[async_trait]
pub trait AuditSink: Send + Sync {
    /// Store `payload` under `key`. Must never overwrite an existing record.
    async fn persist(&self, key: &str, payload: Bytes) -> Result<()>;
}

/// Build a fresh audit key: microsecond UTC timestamp plus a random suffix.
///
/// The timestamp keeps records sortable; the suffix keeps two requests that
/// land in the same microsecond apart.
#[must_use]
pub fn audit_key() -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{}_{}", Utc::now().format("%Y%m%d_%H%M%S_%6f"), &suffix[..8])
}

fn validate_key(key: &str) -> Result<()> {
    let valid = !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
        && !key.starts_with('.');
    if valid {
        Ok(())
    } else {
        Err(ShimError::audit(format!("invalid audit key '{key}'")))
    }
}

/// Writes each payload to `<dir>/<key>.json`, byte-for-byte as received.
#[derive(Debug, Clone)]
pub struct FileAuditSink {
    dir: PathBuf,
}

impl FileAuditSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    #[must_use]
    pub fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }
}

#[async_trait]
impl AuditSink for FileAuditSink {
    async fn persist(&self, key: &str, payload: Bytes) -> Result<()> {
        validate_key(key)?;
        tokio::fs::create_dir_all(&self.dir).await.map_err(|e| {
            ShimError::audit(format!("cannot create {}: {}", self.dir.display(), e))
        })?;

        let path = self.path_for(key);
        let file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
            .map_err(|e| ShimError::audit(format!("cannot create {}: {}", path.display(), e)))?;

        write_or_discard(&path, file, &payload).await?;

        tracing::debug!(path = %path.display(), bytes = payload.len(), "Audit record written");
        Ok(())
    }
}

/// Write `payload` through `out`. On failure the half-written file at `path`
/// is removed.
async fn write_or_discard<W>(path: &Path, mut out: W, payload: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut written = out.write_all(payload).await;
    if written.is_ok() {
        written = out.flush().await;
    }
    drop(out);

    if let Err(e) = written {
        if let Err(rm) = tokio::fs::remove_file(path).await {
            tracing::warn!(path = %path.display(), error = %rm, "Could not remove partial audit record");
        }
        return Err(ShimError::audit(format!(
            "cannot write {}: {}",
            path.display(),
            e
        )));
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub struct AuditRecord {
    pub key: String,
    pub timestamp: DateTime<Utc>,
    pub payload: Bytes,
}

/// Ring buffer of the most recent records, kept in memory. `keys` mirrors
/// the keys in `records`.
#[derive(Debug, Default)]
struct RecordBuffer {
    records: VecDeque<AuditRecord>,
    keys: HashSet<String>,
}

impl RecordBuffer {
    fn push(&mut self, record: AuditRecord) -> Result<()> {
        if self.keys.contains(&record.key) {
            return Err(ShimError::audit(format!(
                "record '{}' already exists",
                record.key
            )));
        }
        if self.records.len() >= MAX_MEMORY_RECORDS {
            if let Some(evicted) = self.records.pop_front() {
                self.keys.remove(&evicted.key);
            }
        }
        self.keys.insert(record.key.clone());
        self.records.push_back(record);
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemoryAuditSink(Arc<Mutex<RecordBuffer>>);

impl MemoryAuditSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Most recent records first.
    #[must_use]
    pub fn recent(&self, limit: usize) -> Vec<AuditRecord> {
        self.0
            .lock()
            .map(|b| b.records.iter().rev().take(limit).cloned().collect())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<AuditRecord> {
        self.0
            .lock()
            .ok()
            .and_then(|b| b.records.iter().find(|r| r.key == key).cloned())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.lock().map(|b| b.records.len()).unwrap_or_default()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn persist(&self, key: &str, payload: Bytes) -> Result<()> {
        validate_key(key)?;
        let mut buffer = self
            .0
            .lock()
            .map_err(|_| ShimError::audit("audit buffer poisoned"))?;
        buffer.push(AuditRecord {
            key: key.to_string(),
            timestamp: Utc::now(),
            payload,
        })
    }
}

/// Used when auditing is switched off.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopAuditSink;

#[async_trait]
impl AuditSink for NoopAuditSink {
    async fn persist(&self, _key: &str, _payload: Bytes) -> Result<()> {
        Ok(())
    }
}
