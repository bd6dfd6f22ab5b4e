//! Append-only JSONL audit log of delivered notifications.
//!
//! Each line is one [`AuditEvent`] in canonical (key-sorted, compact) JSON.
//! With the hash chain on, every event carries `hash_prev` and `hash_self`
//! so [`verify_hash_chain`] can locate the first edited or removed line.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use attest_orders::{NotificationSink, OutboxEntry};

pub struct AuditWriter {
    path: PathBuf,
    hash_chain: bool,
    last_hash: Option<String>,
    /// Events appended so far; feeds `event_id` derivation.
    seq: u64,
}

impl AuditWriter {
    /// Creates the writer and its parent dirs. Starts a fresh chain.
    pub fn new(path: impl AsRef<Path>, hash_chain: bool) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| format!("create_dir_all {:?}", parent))?;
        }

        Ok(Self {
            path,
            hash_chain,
            last_hash: None,
            seq: 0,
        })
    }

    /// Open an existing log and continue its chain after a restart.
    pub fn resume(path: impl AsRef<Path>, hash_chain: bool) -> Result<Self> {
        let mut w = Self::new(path, hash_chain)?;
        if !w.path.exists() {
            return Ok(w);
        }
        let content = fs::read_to_string(&w.path)
            .with_context(|| format!("read audit log {:?}", w.path))?;
        for (i, line) in content.lines().enumerate() {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            let ev: AuditEvent = serde_json::from_str(trimmed)
                .with_context(|| format!("parse audit event at line {}", i + 1))?;
            w.seq += 1;
            w.last_hash = ev.hash_self;
        }
        Ok(w)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn last_hash(&self) -> Option<String> {
        self.last_hash.clone()
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn append(&mut self, topic: &str, outbox_id: i64, payload: Value) -> Result<AuditEvent> {
        let event_id = derive_event_id(self.last_hash.as_deref(), &payload, self.seq)?;
        self.seq += 1;

        let mut ev = AuditEvent {
            event_id,
            ts_utc: Utc::now(),
            topic: topic.to_string(),
            outbox_id,
            payload,
            hash_prev: None,
            hash_self: None,
        };

        if self.hash_chain {
            ev.hash_prev = self.last_hash.clone();
            let self_hash = compute_event_hash(&ev)?;
            ev.hash_self = Some(self_hash.clone());
            self.last_hash = Some(self_hash);
        }

        let line = canonical_json_line(&ev)?;
        append_line(&self.path, &line)?;

        Ok(ev)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub event_id: Uuid,
    pub ts_utc: DateTime<Utc>,
    pub topic: String,
    /// Source outbox row. Redelivery after a sink failure may repeat it.
    pub outbox_id: i64,
    pub payload: Value,
    pub hash_prev: Option<String>,
    pub hash_self: Option<String>,
}

/// Event ids come from chain position, previous hash and payload. No RNG.
fn derive_event_id(prev: Option<&str>, payload: &Value, seq: u64) -> Result<Uuid> {
    let mut h = Sha256::new();
    h.update(prev.unwrap_or("").as_bytes());
    h.update(canonical_json_line(payload)?.as_bytes());
    h.update(seq.to_be_bytes());
    let digest = h.finalize();
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&digest[..16]);
    Ok(Uuid::from_bytes(bytes))
}

fn append_line(path: &Path, line: &str) -> Result<()> {
    let mut f = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("open audit log {:?}", path))?;
    f.write_all(line.as_bytes())
        .context("write audit line failed")?;
    f.write_all(b"\n").context("write newline failed")?;
    Ok(())
}

fn canonical_json_line<T: Serialize>(v: &T) -> Result<String> {
    let raw = serde_json::to_value(v).context("serialize audit event failed")?;
    serde_json::to_string(&sort_keys(&raw)).context("json stringify failed")
}

fn sort_keys(v: &Value) -> Value {
    match v {
        Value::Object(map) => {
            let mut keys: Vec<_> = map.keys().collect();
            keys.sort();
            let mut out = serde_json::Map::new();
            for k in keys {
                out.insert(k.clone(), sort_keys(&map[k]));
            }
            Value::Object(out)
        }
        Value::Array(arr) => Value::Array(arr.iter().map(sort_keys).collect()),
        _ => v.clone(),
    }
}

/// SHA-256 over the canonical event with `hash_self` cleared.
pub fn compute_event_hash(ev: &AuditEvent) -> Result<String> {
    let mut clone = ev.clone();
    clone.hash_self = None;
    let canonical = canonical_json_line(&clone)?;
    Ok(hex::encode(Sha256::digest(canonical.as_bytes())))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyResult {
    Valid { lines: usize },
    Broken { line: usize, reason: String },
}

pub fn verify_hash_chain(path: impl AsRef<Path>) -> Result<VerifyResult> {
    let content = fs::read_to_string(path.as_ref())
        .with_context(|| format!("read audit log {:?}", path.as_ref()))?;
    verify_hash_chain_str(&content)
}

/// Same as [`verify_hash_chain`] over in-memory JSONL.
pub fn verify_hash_chain_str(content: &str) -> Result<VerifyResult> {
    let mut prev_hash: Option<String> = None;
    let mut lines = 0usize;

    for (i, line) in content.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let ev: AuditEvent = serde_json::from_str(trimmed)
            .with_context(|| format!("parse audit event at line {}", i + 1))?;
        lines += 1;

        if ev.hash_prev != prev_hash {
            return Ok(VerifyResult::Broken {
                line: i + 1,
                reason: format!(
                    "hash_prev mismatch: expected {:?}, got {:?}",
                    prev_hash, ev.hash_prev
                ),
            });
        }

        if let Some(claimed) = &ev.hash_self {
            let recomputed = compute_event_hash(&ev)?;
            if *claimed != recomputed {
                return Ok(VerifyResult::Broken {
                    line: i + 1,
                    reason: format!(
                        "hash_self mismatch: claimed {claimed}, recomputed {recomputed}"
                    ),
                });
            }
        }

        prev_hash = ev.hash_self;
    }

    Ok(VerifyResult::Valid { lines })
}

/// Outbox sink that appends every delivered notification to the audit log.
pub struct AuditSink {
    writer: Mutex<AuditWriter>,
}

impl AuditSink {
    pub fn new(writer: AuditWriter) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    pub fn open(path: impl AsRef<Path>, hash_chain: bool) -> Result<Self> {
        Ok(Self::new(AuditWriter::resume(path, hash_chain)?))
    }
}

#[async_trait]
impl NotificationSink for AuditSink {
    fn name(&self) -> &str {
        "audit"
    }

    async fn deliver(&self, entry: &OutboxEntry) -> Result<()> {
        let payload =
            serde_json::to_value(&entry.notification).context("serialize notification failed")?;
        let mut w = self
            .writer
            .lock()
            .map_err(|_| anyhow!("audit writer lock poisoned"))?;
        let ev = w.append(entry.notification.topic(), entry.id, payload)?;
        tracing::debug!(outbox_id = entry.id, event_id = %ev.event_id, "audit event appended");
        Ok(())
    }
}
