//! Append-only audit trail with a tamper-evident hash chain.
//!
//! Each record is one JSON line in `audit.jsonl`. Every line carries the
//! SHA-256 of the previous stored line in `prev`, so editing, deleting or
//! reordering any record breaks the chain from that point on.
//!
//! ```json
//! {"v":1,"seq":3,"ts":"2026-10-19T09:14:02.118734112Z","subject":"voice-session","operation":"restart","target":"n8n","status":"SUCCESS","detail":"...","prev":"<hex SHA-256>"}
//! ```
//!
//! Appends are serialized by a mutex and `fsync`ed before returning. Readers
//! only consider newline-terminated lines, so they never observe a record
//! that is still being written.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use sha2::{Digest, Sha256};

use jett_core::error::AuditError;
use jett_core::security::{AuditEntry, AuditRecord, AUDIT_SCHEMA_VERSION};

/// `prev` of the very first record in a chain.
pub const GENESIS_HASH: &str =
    "0000000000000000000000000000000000000000000000000000000000000000";

pub const AUDIT_FILE_NAME: &str = "audit.jsonl";

/// Durable sink for audit records. No update or delete exists.
pub trait AuditSink: Send + Sync {
    /// Sequence, timestamp and persist `entry`. Returns once the record is durable.
    fn append(&self, entry: AuditEntry) -> Result<AuditRecord, AuditError>;

    /// The last `n` records in append order.
    fn recent(&self, n: usize) -> Result<Vec<AuditRecord>, AuditError>;

    /// Re-check the whole chain. Returns the number of verified records.
    fn verify(&self) -> Result<u64, AuditError>;
}

/// Compute hex-encoded SHA-256 of raw bytes.
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    let result = hasher.finalize();
    result.iter().map(|b| format!("{b:02x}")).collect()
}

/// Verify hash-chain integrity and sequence order across stored lines.
pub fn verify_chain(lines: &[&str]) -> Result<u64, AuditError> {
    let mut expected_prev = GENESIS_HASH.to_string();
    let mut last_seq: Option<u64> = None;
    let mut last_ts: Option<DateTime<Utc>> = None;

    for (i, line) in lines.iter().enumerate() {
        let record: AuditRecord =
            serde_json::from_str(line).map_err(|e| AuditError::ChainBroken {
                seq: last_seq.map_or(0, |s| s + 1),
                reason: format!("line {i}: unparsable record: {e}"),
            })?;

        if record.prev != expected_prev {
            return Err(AuditError::ChainBroken {
                seq: record.seq,
                reason: format!(
                    "expected prev={}, got prev={}",
                    &expected_prev[..16],
                    record.prev.chars().take(16).collect::<String>()
                ),
            });
        }
        if last_seq.is_some_and(|s| record.seq <= s) {
            return Err(AuditError::ChainBroken {
                seq: record.seq,
                reason: "sequence not increasing".into(),
            });
        }
        if last_ts.is_some_and(|t| record.ts <= t) {
            return Err(AuditError::ChainBroken {
                seq: record.seq,
                reason: "timestamp not increasing".into(),
            });
        }

        expected_prev = sha256_hex(line.as_bytes());
        last_seq = Some(record.seq);
        last_ts = Some(record.ts);
    }

    Ok(lines.len() as u64)
}

/// Split raw file contents into complete (newline-terminated) lines.
/// A trailing fragment without a newline is an unfinished write and is skipped.
fn complete_lines(content: &str) -> Vec<&str> {
    let body = match content.rfind('\n') {
        Some(idx) => &content[..idx],
        None => return Vec::new(),
    };
    body.split('\n').filter(|l| !l.trim().is_empty()).collect()
}

/// Timestamp strictly after `last`, normally the wall clock.
fn next_timestamp(last: Option<DateTime<Utc>>) -> DateTime<Utc> {
    let now = Utc::now();
    match last {
        Some(last) if now <= last => last + ChronoDuration::nanoseconds(1),
        _ => now,
    }
}

struct ChainHead {
    next_seq: u64,
    prev: String,
    last_ts: Option<DateTime<Utc>>,
}

impl ChainHead {
    fn genesis() -> Self {
        Self {
            next_seq: 1,
            prev: GENESIS_HASH.to_string(),
            last_ts: None,
        }
    }

    /// Build the next record and its serialized line.
    fn seal(&self, entry: AuditEntry) -> Result<(AuditRecord, String), AuditError> {
        let record = AuditRecord {
            v: AUDIT_SCHEMA_VERSION,
            seq: self.next_seq,
            ts: next_timestamp(self.last_ts),
            subject: entry.subject,
            operation: entry.operation,
            target: entry.target,
            status: entry.status,
            detail: entry.detail,
            prev: self.prev.clone(),
        };
        let line = serde_json::to_string(&record)?;
        Ok((record, line))
    }

    fn advance(&mut self, record: &AuditRecord, line: &str) {
        self.next_seq = record.seq + 1;
        self.prev = sha256_hex(line.as_bytes());
        self.last_ts = Some(record.ts);
    }
}

/// The byte store under [`FileAuditLog`].
trait LogFile: Write {
    fn stored_len(&self) -> io::Result<u64>;
    fn truncate_to(&mut self, len: u64) -> io::Result<()>;
    fn sync(&mut self) -> io::Result<()>;
}

impl LogFile for File {
    fn stored_len(&self) -> io::Result<u64> {
        Ok(self.metadata()?.len())
    }

    fn truncate_to(&mut self, len: u64) -> io::Result<()> {
        self.set_len(len)
    }

    fn sync(&mut self) -> io::Result<()> {
        self.sync_data()
    }
}

/// Write `buf` at the end of the file and sync it. A failed write is cut
/// back off so the next record never lands behind a fragment. If even that
/// fails, the length is kept in `repair` and restored before the next write.
fn append_line<F: LogFile>(file: &mut F, buf: &[u8], repair: &mut Option<u64>) -> io::Result<()> {
    if let Some(len) = *repair {
        tracing::warn!("Audit log: removing fragment of a failed write past {len} bytes");
        file.truncate_to(len).and_then(|()| file.sync())?;
        *repair = None;
    }
    let len = file.stored_len()?;
    if let Err(e) = file.write_all(buf).and_then(|()| file.sync()) {
        if let Err(undo) = file.truncate_to(len).and_then(|()| file.sync()) {
            tracing::error!("Audit rollback to {len} bytes failed: {undo}");
            *repair = Some(len);
        }
        return Err(e);
    }
    Ok(())
}

struct FileInner {
    file: File,
    head: ChainHead,
    repair: Option<u64>,
}

/// JSONL audit log on disk.
pub struct FileAuditLog {
    inner: Mutex<FileInner>,
    path: PathBuf,
    max_recent: usize,
}

impl FileAuditLog {
    /// Open or create `dir/audit.jsonl`, resuming the chain from the last
    /// complete record. An unterminated trailing fragment left by a crash is
    /// truncated; it was never acknowledged to any caller.
    pub fn open(dir: &Path, max_recent: usize) -> Result<Self, AuditError> {
        fs::create_dir_all(dir)?;
        let path = dir.join(AUDIT_FILE_NAME);

        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)?;

        let mut content = String::new();
        file.read_to_string(&mut content)?;

        let complete_len = content.rfind('\n').map_or(0, |i| i + 1);
        if complete_len < content.len() {
            tracing::warn!(
                "Audit log {} has a torn trailing line ({} bytes), truncating",
                path.display(),
                content.len() - complete_len
            );
            file.set_len(complete_len as u64)?;
            file.sync_data()?;
        }
        file.seek(SeekFrom::End(0))?;

        let mut head = ChainHead::genesis();
        if let Some(last) = complete_lines(&content).last() {
            let record: AuditRecord =
                serde_json::from_str(last).map_err(|e| AuditError::ChainBroken {
                    seq: 0,
                    reason: format!("last record unparsable: {e}"),
                })?;
            head.advance(&record, last);
        }

        tracing::info!(
            "Audit log: {} (next seq {})",
            path.display(),
            head.next_seq
        );
        Ok(Self {
            inner: Mutex::new(FileInner {
                file,
                head,
                repair: None,
            }),
            path,
            max_recent,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_content(&self) -> Result<String, AuditError> {
        match fs::read_to_string(&self.path) {
            Ok(c) => Ok(c),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
            Err(e) => Err(e.into()),
        }
    }
}

impl AuditSink for FileAuditLog {
    fn append(&self, entry: AuditEntry) -> Result<AuditRecord, AuditError> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let FileInner { file, head, repair } = &mut *inner;
        let (record, line) = head.seal(entry)?;

        let mut buf = line.clone().into_bytes();
        buf.push(b'\n');
        append_line(file, &buf, repair)?;

        head.advance(&record, &line);
        Ok(record)
    }

    fn recent(&self, n: usize) -> Result<Vec<AuditRecord>, AuditError> {
        let n = n.min(self.max_recent);
        let content = self.read_content()?;
        let lines = complete_lines(&content);
        let start = lines.len().saturating_sub(n);
        lines[start..]
            .iter()
            .map(|l| serde_json::from_str(l).map_err(AuditError::from))
            .collect()
    }

    fn verify(&self) -> Result<u64, AuditError> {
        // Hold the writer lock so the file does not grow mid-verification.
        let _guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let content = self.read_content()?;
        verify_chain(&complete_lines(&content))
    }
}

/// In-memory sink with the same sequencing and chaining as the file log.
pub struct MemoryAuditLog {
    inner: Mutex<(ChainHead, Vec<String>)>,
}

impl MemoryAuditLog {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new((ChainHead::genesis(), Vec::new())),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).1.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All records in append order.
    pub fn records(&self) -> Vec<AuditRecord> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner
            .1
            .iter()
            .filter_map(|l| serde_json::from_str(l).ok())
            .collect()
    }
}

impl Default for MemoryAuditLog {
    fn default() -> Self {
        Self::new()
    }
}

impl AuditSink for MemoryAuditLog {
    fn append(&self, entry: AuditEntry) -> Result<AuditRecord, AuditError> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let (record, line) = inner.0.seal(entry)?;
        inner.0.advance(&record, &line);
        inner.1.push(line);
        Ok(record)
    }

    fn recent(&self, n: usize) -> Result<Vec<AuditRecord>, AuditError> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let start = inner.1.len().saturating_sub(n);
        inner.1[start..]
            .iter()
            .map(|l| serde_json::from_str(l).map_err(AuditError::from))
            .collect()
    }

    fn verify(&self) -> Result<u64, AuditError> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let lines: Vec<&str> = inner.1.iter().map(String::as_str).collect();
        verify_chain(&lines)
    }
}
