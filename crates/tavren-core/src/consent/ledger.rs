//! Tamper-evident consent ledger
//!
//! Records consent events with per-user SHA-256 hash chaining. Every event
//! is written to the durable store and appended to a JSON-lines journal;
//! the table is a query cache, the journal is the audit witness. An auditor
//! can verify chain integrity from the journal alone even if the primary
//! store is compromised.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tracing::{debug, error, info, warn};

use crate::crypto::sha256_hex;
use crate::entities::{ConsentEvent, ConsentEventDraft};
use crate::errors::{CoreError, CoreResult};
use crate::store::ConsentEventStore;

/// `prev_hash` of the first event in a user's chain
pub const GENESIS_HASH: &str = "0";

/// Bounded retry attempts for transient store failures
const MAX_WRITE_ATTEMPTS: u32 = 3;

/// Canonical timestamp form used in hashing and in the journal. Both sinks
/// must format identically or verification would fail on honest data.
pub fn timestamp_iso(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Verification hash for a consent event: SHA-256 over the colon-joined
/// id, user, action, ISO timestamp, and previous hash
pub fn chain_hash(
    id: i64,
    user_id: &str,
    action: &str,
    timestamp_iso: &str,
    prev_hash: &str,
) -> String {
    let data = format!(
        "{}:{}:{}:{}:{}",
        id, user_id, action, timestamp_iso, prev_hash
    );
    sha256_hex(data.as_bytes())
}

/// One line of the append-only journal
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalRecord {
    pub id: i64,
    pub user_id: String,
    pub action: String,
    pub timestamp: String,
    pub offer_id: Option<String>,
    pub scope: Option<String>,
    pub purpose: Option<String>,
    pub initiated_by: String,
    pub reason: Option<String>,
    pub reason_category: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub prev_hash: String,
    pub hash: String,
}

impl JournalRecord {
    fn from_event(event: &ConsentEvent) -> Self {
        Self {
            id: event.id,
            user_id: event.user_id.clone(),
            action: event.action.as_str().to_string(),
            timestamp: timestamp_iso(event.timestamp),
            offer_id: event.offer_id.clone(),
            scope: event.scope.clone(),
            purpose: event.purpose.clone(),
            initiated_by: event.initiated_by.as_str().to_string(),
            reason: event.reason.clone(),
            reason_category: event.reason_category.clone(),
            metadata: event.metadata.clone(),
            prev_hash: event.prev_hash.clone(),
            hash: event.hash.clone(),
        }
    }
}

/// Append-only JSON-lines file with exclusive-append discipline
pub struct LedgerJournal {
    path: PathBuf,
    write_lock: tokio::sync::Mutex<()>,
}

impl LedgerJournal {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one record as a single line
    pub async fn append(&self, record: &JournalRecord) -> CoreResult<()> {
        let line = serde_json::to_string(record)?;
        let _guard = self.write_lock.lock().await;

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| CoreError::dependency(format!("Ledger directory: {}", e)))?;
        }

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| CoreError::dependency(format!("Ledger journal open: {}", e)))?;

        file.write_all(format!("{}\n", line).as_bytes())
            .await
            .map_err(|e| CoreError::dependency(format!("Ledger journal write: {}", e)))?;
        file.flush()
            .await
            .map_err(|e| CoreError::dependency(format!("Ledger journal flush: {}", e)))?;

        Ok(())
    }

    /// Every record in the journal. A missing file is an empty ledger.
    pub async fn read_all(&self) -> CoreResult<Vec<JournalRecord>> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(CoreError::dependency(format!("Ledger journal read: {}", e)));
            }
        };

        let mut records = Vec::new();
        for line in content.lines() {
            if line.trim().is_empty() {
                continue;
            }
            let record: JournalRecord = serde_json::from_str(line)
                .map_err(|e| CoreError::integrity(format!("Corrupt journal line: {}", e)))?;
            records.push(record);
        }
        Ok(records)
    }

    /// All records for one user
    pub async fn read_user(&self, user_id: &str) -> CoreResult<Vec<JournalRecord>> {
        let mut records = self.read_all().await?;
        records.retain(|r| r.user_id == user_id);
        Ok(records)
    }
}

/// One detected break in a user's hash chain
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerInconsistency {
    pub user_id: String,
    pub event_id: i64,
    pub issue: String,
    pub expected: Option<String>,
    pub found: Option<String>,
}

/// Result of a ledger integrity check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationReport {
    pub ok: bool,
    pub users_checked: usize,
    pub events_checked: usize,
    pub inconsistencies: Vec<LedgerInconsistency>,
}

/// Service for recording and verifying consent events
pub struct ConsentLedgerService {
    store: Arc<dyn ConsentEventStore>,
    journal: LedgerJournal,
}

impl ConsentLedgerService {
    pub fn new(store: Arc<dyn ConsentEventStore>, journal: LedgerJournal) -> Self {
        Self { store, journal }
    }

    /// Record a new consent event with hash chaining.
    ///
    /// The store append is retried a bounded number of times on transient
    /// errors. If the journal append then fails, the store row is removed
    /// best-effort and the whole write surfaces as a `LedgerWrite` error so
    /// no sink is left ahead of the other.
    pub async fn record_event(&self, draft: ConsentEventDraft) -> CoreResult<ConsentEvent> {
        info!(
            user_id = %draft.user_id,
            action = draft.action.as_str(),
            "Recording consent event"
        );

        let event = self.append_with_retry(draft).await?;

        let record = JournalRecord::from_event(&event);
        if let Err(journal_err) = self.journal.append(&record).await {
            error!(
                event_id = event.id,
                error = %journal_err,
                "Journal append failed after store write; rolling back"
            );
            if let Err(rollback_err) = self.store.remove(event.id).await {
                error!(
                    event_id = event.id,
                    error = %rollback_err,
                    "Rollback of store write failed; sinks are out of sync"
                );
            }
            return Err(CoreError::LedgerWrite(format!(
                "Journal append failed: {}",
                journal_err
            )));
        }

        info!(
            event_id = event.id,
            hash_prefix = &event.hash[..8],
            "Consent event recorded"
        );
        Ok(event)
    }

    async fn append_with_retry(&self, draft: ConsentEventDraft) -> CoreResult<ConsentEvent> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.store.append_chained(draft.clone()).await {
                Ok(event) => return Ok(event),
                Err(e) if e.is_retryable() && attempt < MAX_WRITE_ATTEMPTS => {
                    warn!(
                        attempt,
                        error = %e,
                        "Transient ledger store failure, retrying"
                    );
                    tokio::time::sleep(Duration::from_millis(50 * 2u64.pow(attempt))).await;
                }
                Err(e) => {
                    return Err(CoreError::LedgerWrite(format!("Store append failed: {}", e)));
                }
            }
        }
    }

    /// Complete consent history for a user, ordered by timestamp then id
    pub async fn user_history(&self, user_id: &str) -> CoreResult<Vec<ConsentEvent>> {
        let mut events = self.store.history(user_id).await?;
        events.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then(a.id.cmp(&b.id)));
        debug!(user_id, count = events.len(), "Fetched consent history");
        Ok(events)
    }

    /// Look up one event by id
    pub async fn find_event(&self, id: i64) -> CoreResult<Option<ConsentEvent>> {
        self.store.find_by_id(id).await
    }

    /// Export journal records, optionally bounded by timestamps, for audit
    pub async fn export_range(
        &self,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> CoreResult<Vec<JournalRecord>> {
        let mut records = self.journal.read_all().await?;

        if start.is_some() || end.is_some() {
            records.retain(|r| {
                let ts = match DateTime::parse_from_rfc3339(&r.timestamp) {
                    Ok(ts) => ts.with_timezone(&Utc),
                    Err(_) => return false,
                };
                if let Some(start) = start {
                    if ts < start {
                        return false;
                    }
                }
                if let Some(end) = end {
                    if ts > end {
                        return false;
                    }
                }
                true
            });
        }

        info!(count = records.len(), "Exported ledger records");
        Ok(records)
    }

    /// Verify chain integrity from the journal, for one user or for all.
    ///
    /// Reports every mismatch instead of stopping at the first; read-only.
    pub async fn verify_integrity(&self, user_id: Option<&str>) -> CoreResult<VerificationReport> {
        let mut records = match user_id {
            Some(user_id) => self.journal.read_user(user_id).await?,
            None => self.journal.read_all().await?,
        };
        records.sort_by(|a, b| {
            a.user_id
                .cmp(&b.user_id)
                .then(a.timestamp.cmp(&b.timestamp))
                .then(a.id.cmp(&b.id))
        });

        let mut report = VerificationReport {
            ok: true,
            users_checked: 0,
            events_checked: records.len(),
            inconsistencies: Vec::new(),
        };

        let mut current_user: Option<&str> = None;
        let mut prev_hash: Option<&str> = None;

        for record in &records {
            if current_user != Some(record.user_id.as_str()) {
                current_user = Some(record.user_id.as_str());
                prev_hash = None;
                report.users_checked += 1;
            }

            match prev_hash {
                None => {
                    if !matches!(record.prev_hash.as_str(), "0" | "") {
                        report.ok = false;
                        report.inconsistencies.push(LedgerInconsistency {
                            user_id: record.user_id.clone(),
                            event_id: record.id,
                            issue: "First event has non-null prev_hash".to_string(),
                            expected: Some(GENESIS_HASH.to_string()),
                            found: Some(record.prev_hash.clone()),
                        });
                    }
                }
                Some(expected) => {
                    if record.prev_hash != expected {
                        report.ok = false;
                        report.inconsistencies.push(LedgerInconsistency {
                            user_id: record.user_id.clone(),
                            event_id: record.id,
                            issue: "Hash chain broken".to_string(),
                            expected: Some(expected.to_string()),
                            found: Some(record.prev_hash.clone()),
                        });
                    }
                }
            }

            let expected_hash = chain_hash(
                record.id,
                &record.user_id,
                &record.action,
                &record.timestamp,
                &record.prev_hash,
            );
            if record.hash != expected_hash {
                report.ok = false;
                report.inconsistencies.push(LedgerInconsistency {
                    user_id: record.user_id.clone(),
                    event_id: record.id,
                    issue: "Event hash mismatch".to_string(),
                    expected: Some(expected_hash),
                    found: Some(record.hash.clone()),
                });
            }

            prev_hash = Some(record.hash.as_str());
        }

        info!(
            ok = report.ok,
            events = report.events_checked,
            inconsistencies = report.inconsistencies.len(),
            "Ledger verification completed"
        );
        Ok(report)
    }

    /// Delete all of a user's events from the durable store. Only the DSR
    /// consent-deletion path calls this; the journal keeps its lines as the
    /// historical witness.
    pub async fn delete_user_events(&self, user_id: &str) -> CoreResult<u64> {
        self.store.delete_user_events(user_id).await
    }
}
