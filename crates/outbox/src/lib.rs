//! Durable FIFO outbox for not-yet-confirmed submissions.
//!
//! Entries are persisted in sled under monotonically increasing sequence
//! keys so iteration order is enqueue order, and they survive process
//! restarts. A sibling ledger tree records confirmed authorizations keyed
//! by submission key, so a replay after a crash never resubmits a document
//! the authority already accepted.

mod audit;

pub use audit::{write_audit_event, AuditEvent};

use std::future::Future;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sled::Db;
use tokio::sync::Mutex;

use fe_core::models::Authorization;
use fe_core::{sha256_hex, ClientError, ClientResult};

const ENTRIES_TREE: &str = "entries";
const LEDGER_TREE: &str = "ledger";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    Invoice,
    CreditNote,
    DebitNote,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxEntry {
    pub seq: u64,
    pub record_id: u64,
    pub kind: EntryKind,
    /// Wire payload frozen at enqueue time, replayed verbatim.
    pub payload: serde_json::Value,
    pub submission_key: String,
    pub enqueued_at: DateTime<Utc>,
    /// Set before the remote call of an attempt. A dispatched entry found
    /// at replay time means the prior attempt's outcome is unknown and the
    /// processor should reconcile before resubmitting.
    pub dispatched: bool,
}

/// Result of a drain pass.
#[derive(Debug, Default)]
pub struct DrainReport {
    /// Record ids confirmed (entry removed) during this pass.
    pub confirmed: Vec<u64>,
    /// Record ids removed after a validation rejection, with the error
    /// detail.
    pub rejected: Vec<(u64, String)>,
    /// Entries still queued after the pass.
    pub remaining: usize,
    /// True when another drain held the lock and this call did nothing.
    pub busy: bool,
}

pub struct Outbox {
    db: Db,
    entries: sled::Tree,
    ledger: sled::Tree,
    drain_lock: Mutex<()>,
    audit_path: Option<PathBuf>,
}

fn storage_err(e: impl std::fmt::Display) -> ClientError {
    ClientError::Storage(e.to_string())
}

impl Outbox {
    /// Open (or create) the outbox under `dir`. The audit log lives next
    /// to the database.
    pub fn open(dir: &Path) -> ClientResult<Self> {
        std::fs::create_dir_all(dir).map_err(storage_err)?;
        let db = sled::open(dir.join("outbox.db")).map_err(storage_err)?;
        Self::with_db(db, Some(dir.join("audit.jsonl")))
    }

    /// In-memory outbox for tests; no audit log.
    pub fn temporary() -> ClientResult<Self> {
        let db = sled::Config::new()
            .temporary(true)
            .open()
            .map_err(storage_err)?;
        Self::with_db(db, None)
    }

    fn with_db(db: Db, audit_path: Option<PathBuf>) -> ClientResult<Self> {
        let entries = db.open_tree(ENTRIES_TREE).map_err(storage_err)?;
        let ledger = db.open_tree(LEDGER_TREE).map_err(storage_err)?;
        Ok(Self {
            db,
            entries,
            ledger,
            drain_lock: Mutex::new(()),
            audit_path,
        })
    }

    fn audit(&self, event: AuditEvent) {
        if let Some(path) = &self.audit_path {
            write_audit_event(path, &event);
        }
    }

    fn next_seq(&self) -> ClientResult<u64> {
        let last = self.entries.last().map_err(storage_err)?;
        Ok(match last {
            Some((key, _)) => decode_seq(&key) + 1,
            None => 0,
        })
    }

    /// Append an entry and persist it immediately.
    pub fn enqueue(
        &self,
        record_id: u64,
        kind: EntryKind,
        payload: serde_json::Value,
    ) -> ClientResult<OutboxEntry> {
        self.append(record_id, kind, payload, false)
    }

    /// Append an entry whose payload already went out once but whose
    /// outcome was lost in transit. Replay reconciles it against the
    /// ledger and the authority before any resubmission.
    pub fn enqueue_dispatched(
        &self,
        record_id: u64,
        kind: EntryKind,
        payload: serde_json::Value,
    ) -> ClientResult<OutboxEntry> {
        self.append(record_id, kind, payload, true)
    }

    fn append(
        &self,
        record_id: u64,
        kind: EntryKind,
        payload: serde_json::Value,
        dispatched: bool,
    ) -> ClientResult<OutboxEntry> {
        let submission_key = submission_key(record_id, kind, &payload);
        let entry = OutboxEntry {
            seq: self.next_seq()?,
            record_id,
            kind,
            payload,
            submission_key: submission_key.clone(),
            enqueued_at: Utc::now(),
            dispatched,
        };
        self.put_entry(&entry)?;
        self.db.flush().map_err(storage_err)?;

        tracing::info!(record_id, seq = entry.seq, "submission queued");
        self.audit(
            AuditEvent::new("outbox_enqueued", record_id, "queued")
                .with_submission_key(submission_key),
        );
        Ok(entry)
    }

    fn put_entry(&self, entry: &OutboxEntry) -> ClientResult<()> {
        let value = serde_json::to_vec(entry).map_err(storage_err)?;
        self.entries
            .insert(encode_seq(entry.seq), value)
            .map_err(storage_err)?;
        Ok(())
    }

    fn remove_entry(&self, seq: u64) -> ClientResult<()> {
        self.entries.remove(encode_seq(seq)).map_err(storage_err)?;
        self.db.flush().map_err(storage_err)?;
        Ok(())
    }

    /// All queued entries in enqueue order.
    pub fn entries(&self) -> ClientResult<Vec<OutboxEntry>> {
        let mut out = Vec::new();
        for item in self.entries.iter() {
            let (_key, value) = item.map_err(storage_err)?;
            out.push(serde_json::from_slice(&value).map_err(storage_err)?);
        }
        Ok(out)
    }

    /// Record ids of queued entries, in enqueue order.
    pub fn pending_record_ids(&self) -> ClientResult<Vec<u64>> {
        Ok(self.entries()?.into_iter().map(|e| e.record_id).collect())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Record a confirmed authorization under the submission key.
    pub fn record_confirmed(&self, submission_key: &str, auth: &Authorization) -> ClientResult<()> {
        let value = serde_json::to_vec(auth).map_err(storage_err)?;
        self.ledger
            .insert(submission_key.as_bytes(), value)
            .map_err(storage_err)?;
        self.db.flush().map_err(storage_err)?;
        Ok(())
    }

    /// Look up a previously confirmed authorization.
    pub fn confirmed(&self, submission_key: &str) -> ClientResult<Option<Authorization>> {
        match self.ledger.get(submission_key.as_bytes()).map_err(storage_err)? {
            Some(value) => Ok(Some(serde_json::from_slice(&value).map_err(storage_err)?)),
            None => Ok(None),
        }
    }

    /// Drain the queue in enqueue order, awaiting `process` for each entry
    /// before advancing. A validation rejection is the only outcome that
    /// removes an entry without confirmation; any other failure (transport,
    /// authority outage, stale token) stops the pass and retains the
    /// remainder for a later attempt. Only one drain runs at a time; a
    /// concurrent call returns a `busy` report.
    pub async fn drain<F, Fut>(&self, mut process: F) -> ClientResult<DrainReport>
    where
        F: FnMut(OutboxEntry) -> Fut,
        Fut: Future<Output = ClientResult<()>>,
    {
        let _guard = match self.drain_lock.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                tracing::debug!("drain already running, skipping trigger");
                return Ok(DrainReport {
                    remaining: self.len(),
                    busy: true,
                    ..DrainReport::default()
                });
            }
        };

        let mut report = DrainReport::default();
        for entry in self.entries()? {
            // Persist the dispatch marker before the attempt: a crash
            // between here and the confirmation leaves evidence for
            // reconciliation. The entry handed to `process` keeps the
            // pre-attempt flag, which marks entries whose *prior* attempt
            // ended with an unknown outcome.
            let mut marked = entry.clone();
            marked.dispatched = true;
            self.put_entry(&marked)?;
            self.db.flush().map_err(storage_err)?;
            self.audit(
                AuditEvent::new("outbox_dispatched", entry.record_id, "in_flight")
                    .with_submission_key(entry.submission_key.clone()),
            );

            match process(entry.clone()).await {
                Ok(()) => {
                    self.remove_entry(entry.seq)?;
                    report.confirmed.push(entry.record_id);
                    self.audit(
                        AuditEvent::new("outbox_confirmed", entry.record_id, "confirmed")
                            .with_submission_key(entry.submission_key),
                    );
                }
                Err(e @ ClientError::Validation(_)) => {
                    tracing::warn!(record_id = entry.record_id, error = %e, "submission rejected, dropping entry");
                    self.remove_entry(entry.seq)?;
                    self.audit(
                        AuditEvent::new("outbox_rejected", entry.record_id, "rejected")
                            .with_submission_key(entry.submission_key)
                            .with_error(e.to_string()),
                    );
                    report.rejected.push((entry.record_id, e.to_string()));
                }
                Err(e) => {
                    // Connectivity, authority outage or a stale token: the
                    // same payload may still succeed on a later pass, so
                    // nothing gets removed without a terminal outcome.
                    tracing::warn!(record_id = entry.record_id, error = %e, "attempt failed, retaining queue");
                    self.audit(
                        AuditEvent::new("outbox_retained", entry.record_id, "queued")
                            .with_error(e.to_string()),
                    );
                    break;
                }
            }
        }

        report.remaining = self.len();
        Ok(report)
    }
}

/// Stable key identifying one submission attempt payload.
pub fn submission_key(record_id: u64, kind: EntryKind, payload: &serde_json::Value) -> String {
    let material = format!("{record_id}:{kind:?}:{payload}");
    sha256_hex(material.as_bytes())
}

fn encode_seq(seq: u64) -> [u8; 8] {
    seq.to_be_bytes()
}

fn decode_seq(key: &[u8]) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&key[..8]);
    u64::from_be_bytes(bytes)
}
