//! Append-only audit sink (§6: "audit sink: append-only JSON-line writer").
//!
//! Writes JSON Lines, one event per line, canonically (sorted keys). Every
//! processed webhook delivery emits a line through this interface (§4.4);
//! the ingress itself does not decide retention.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Append-only audit writer. Optional hash chain: each event can carry
/// `hash_prev` + `hash_self` for tamper-evidence.
pub struct AuditWriter {
    path: PathBuf,
    hash_chain: bool,
    last_hash: Option<String>,
    seq: u64,
}

impl AuditWriter {
    pub fn new(path: impl AsRef<Path>, hash_chain: bool) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| format!("create_dir_all {parent:?}"))?;
        }
        Ok(Self {
            path,
            hash_chain,
            last_hash: None,
            seq: 0,
        })
    }

    /// Restore chain state when resuming an existing log (e.g. after restart).
    pub fn set_last_hash(&mut self, last_hash: Option<String>) {
        self.last_hash = last_hash;
    }

    pub fn last_hash(&self) -> Option<String> {
        self.last_hash.clone()
    }

    pub fn set_seq(&mut self, seq: u64) {
        self.seq = seq;
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Append one event.
    pub fn append(
        &mut self,
        run_id: &str,
        topic: &str,
        event_type: &str,
        payload: Value,
    ) -> Result<AuditEvent> {
        let ts_utc = Utc::now();
        let event_id = derive_event_id(self.last_hash.as_deref(), &payload, self.seq);
        self.seq += 1;

        let mut ev = AuditEvent {
            event_id,
            run_id: run_id.to_string(),
            ts_utc,
            topic: topic.to_string(),
            event_type: event_type.to_string(),
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

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub event_id: Uuid,
    pub run_id: String,
    pub ts_utc: DateTime<Utc>,
    pub topic: String,
    pub event_type: String,
    pub payload: Value,
    pub hash_prev: Option<String>,
    pub hash_self: Option<String>,
}

/// Deterministic `event_id`, no RNG: derived from chain state + payload + seq
/// so replaying the same audit log from scratch reproduces identical ids.
fn derive_event_id(last_hash: Option<&str>, payload: &Value, seq: u64) -> Uuid {
    let basis = format!("{}:{}:{}", last_hash.unwrap_or(""), canonical_json(payload), seq);
    Uuid::new_v5(&Uuid::NAMESPACE_OID, basis.as_bytes())
}

fn append_line(path: &Path, line: &str) -> Result<()> {
    let mut f = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("open audit log {path:?}"))?;
    f.write_all(line.as_bytes()).context("write audit line failed")?;
    f.write_all(b"\n").context("write newline failed")?;
    Ok(())
}

fn canonical_json_line<T: Serialize>(v: &T) -> Result<String> {
    let raw = serde_json::to_value(v).context("serialize audit event failed")?;
    Ok(serde_json::to_string(&sort_keys(&raw)).context("json stringify failed")?)
}

fn canonical_json(v: &Value) -> String {
    serde_json::to_string(&sort_keys(v)).expect("canonical json")
}

fn sort_keys(v: &Value) -> Value {
    match v {
        Value::Object(map) => {
            let mut keys: Vec<_> = map.keys().cloned().collect();
            keys.sort();
            let mut new = serde_json::Map::new();
            for k in keys {
                new.insert(k.clone(), sort_keys(&map[&k]));
            }
            Value::Object(new)
        }
        Value::Array(arr) => Value::Array(arr.iter().map(sort_keys).collect()),
        _ => v.clone(),
    }
}

/// Hash chain is computed over canonical JSON of the event WITHOUT
/// `hash_self` (to avoid self-reference).
pub fn compute_event_hash(ev: &AuditEvent) -> Result<String> {
    let mut clone = ev.clone();
    clone.hash_self = None;
    let canonical = canonical_json_line(&clone)?;
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    Ok(hex::encode(hasher.finalize()))
}

/// Result of hash chain verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyResult {
    Valid { lines: usize },
    Broken { line: usize, reason: String },
}

pub fn verify_hash_chain(path: impl AsRef<Path>) -> Result<VerifyResult> {
    let content =
        fs::read_to_string(path.as_ref()).with_context(|| format!("read audit log {:?}", path.as_ref()))?;
    verify_hash_chain_str(&content)
}

pub fn verify_hash_chain_str(content: &str) -> Result<VerifyResult> {
    let mut prev_hash: Option<String> = None;
    let mut line_count = 0usize;

    for (i, line) in content.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let ev: AuditEvent = serde_json::from_str(trimmed)
            .with_context(|| format!("parse audit event at line {}", i + 1))?;
        line_count += 1;

        if ev.hash_prev != prev_hash {
            return Ok(VerifyResult::Broken {
                line: i + 1,
                reason: format!(
                    "hash_prev mismatch: expected {:?}, got {:?}",
                    prev_hash, ev.hash_prev
                ),
            });
        }

        if let Some(ref claimed_hash) = ev.hash_self {
            let recomputed = compute_event_hash(&ev)?;
            if *claimed_hash != recomputed {
                return Ok(VerifyResult::Broken {
                    line: i + 1,
                    reason: format!(
                        "hash_self mismatch: claimed {claimed_hash}, recomputed {recomputed}"
                    ),
                });
            }
        }

        prev_hash = ev.hash_self.clone();
    }

    Ok(VerifyResult::Valid { lines: line_count })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    #[test]
    fn append_then_verify_chain_valid() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        let mut w = AuditWriter::new(&path, true).unwrap();
        w.append("run_1", "webhook", "check_suite", json!({"conclusion": "success"}))
            .unwrap();
        w.append("run_1", "webhook", "pull_request_review", json!({"state": "approved"}))
            .unwrap();

        let content = fs::read_to_string(&path).unwrap();
        let result = verify_hash_chain_str(&content).unwrap();
        assert_eq!(result, VerifyResult::Valid { lines: 2 });
    }

    #[test]
    fn tampered_line_breaks_chain() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        let mut w = AuditWriter::new(&path, true).unwrap();
        w.append("run_1", "webhook", "check_suite", json!({"conclusion": "success"}))
            .unwrap();
        w.append("run_1", "webhook", "check_suite", json!({"conclusion": "failure"}))
            .unwrap();

        let mut content = fs::read_to_string(&path).unwrap();
        content = content.replace("success", "tampered");
        let result = verify_hash_chain_str(&content).unwrap();
        assert!(matches!(result, VerifyResult::Broken { .. }));
    }

    #[test]
    fn event_id_derivation_is_deterministic() {
        let payload = json!({"a": 1});
        let id1 = derive_event_id(None, &payload, 0);
        let id2 = derive_event_id(None, &payload, 0);
        assert_eq!(id1, id2);
        let id3 = derive_event_id(None, &payload, 1);
        assert_ne!(id1, id3);
    }
}
