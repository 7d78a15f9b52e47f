//! Client façade for resilient electronic invoicing.
//!
//! `InvoicingClient` orchestrates authentication, transformation,
//! submission and the durable outbox. Callers keep ownership of their
//! invoice records; the client only reports outcomes and applies status
//! patches through the injected [`store::RecordStore`].
//!
//! Losing a sale is worse than a delayed submission: transient failures
//! (connectivity, authority 5xx) queue the document and report success with
//! `offline_mode` set, while setup problems and payload rejections surface
//! immediately and are never retried behind the caller's back.

pub mod connectivity;
pub mod notify;
pub mod session;
pub mod state;
pub mod store;

use std::sync::{Arc, Mutex as StdMutex};

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::sync::Mutex;

use authority::{AuthorityClient, ServiceAvailability, WireDocument};
use fe_core::models::{
    Authorization, Credentials, DocumentLetter, InvoiceRecord, NoteKind, NoteRecord,
};
use fe_core::transform::{self, WireInvoice, WireNote};
use fe_core::{qr, ClientError, ClientResult};
use outbox::{DrainReport, EntryKind, Outbox, OutboxEntry};

use connectivity::{ChannelObserver, ConnectivityNotifier, SubscriptionId};
use notify::{NoticeKind, Notifier};
use session::AuthenticationSession;
use state::ServiceState;
use store::{RecordPatch, RecordStore};

/// Outcome of a submit call that did not fail.
#[derive(Debug, Clone)]
pub struct SubmitOutcome {
    /// True when the document was queued instead of confirmed online.
    pub offline_mode: bool,
    /// Authorization granted by the authority; None while queued.
    pub authorization: Option<Authorization>,
}

pub struct InvoicingClient {
    credentials: Credentials,
    authority: Arc<dyn AuthorityClient>,
    store: Arc<dyn RecordStore>,
    outbox: Arc<Outbox>,
    notifier: Arc<dyn Notifier>,
    session: Mutex<AuthenticationSession>,
    state: StdMutex<ServiceState>,
}

impl InvoicingClient {
    pub fn new(
        credentials: Credentials,
        authority: Arc<dyn AuthorityClient>,
        store: Arc<dyn RecordStore>,
        outbox: Arc<Outbox>,
        notifier: Arc<dyn Notifier>,
    ) -> Arc<Self> {
        let session =
            AuthenticationSession::new(credentials.clone(), authority.clone(), store.clone());
        Arc::new(Self {
            state: StdMutex::new(ServiceState::new(
                credentials.environment,
                credentials.certificate.is_some(),
            )),
            session: Mutex::new(session),
            credentials,
            authority,
            store,
            outbox,
            notifier,
        })
    }

    /// Like [`new`](Self::new), but restores the cached session (or
    /// refreshes) before returning.
    pub async fn load(
        credentials: Credentials,
        authority: Arc<dyn AuthorityClient>,
        store: Arc<dyn RecordStore>,
        outbox: Arc<Outbox>,
        notifier: Arc<dyn Notifier>,
    ) -> Arc<Self> {
        let client = Self::new(credentials, authority, store, outbox, notifier);
        {
            let mut session = client.session.lock().await;
            *session = AuthenticationSession::load(
                client.credentials.clone(),
                client.authority.clone(),
                client.store.clone(),
            )
            .await;
            let ready = session.is_ready(false);
            client.state.lock().unwrap().authenticated = ready;
        }
        client
    }

    /// Credentials from the saved app config and OS keychain.
    pub async fn from_saved_config(
        authority: Arc<dyn AuthorityClient>,
        store: Arc<dyn RecordStore>,
        outbox: Arc<Outbox>,
        notifier: Arc<dyn Notifier>,
    ) -> ClientResult<Arc<Self>> {
        let credentials = config::load_credentials()?;
        Ok(Self::load(credentials, authority, store, outbox, notifier).await)
    }

    // ------------------------------------------------------------------
    // Submission
    // ------------------------------------------------------------------

    /// Submit an invoice. See the crate docs for the outcome contract.
    pub async fn submit(&self, record: &InvoiceRecord) -> ClientResult<SubmitOutcome> {
        let wire = transform::to_wire(record, self.credentials.point_of_sale)?;
        let payload = to_payload(&wire)?;
        self.submit_payload(record.id, EntryKind::Invoice, payload)
            .await
    }

    /// Submit a credit or debit note referencing `original`.
    pub async fn submit_note(
        &self,
        note: &NoteRecord,
        original: &InvoiceRecord,
    ) -> ClientResult<SubmitOutcome> {
        let wire = transform::note_to_wire(note, original, self.credentials.point_of_sale)?;
        let payload = to_payload(&wire)?;
        let kind = match note.kind {
            NoteKind::Credit => EntryKind::CreditNote,
            NoteKind::Debit => EntryKind::DebitNote,
        };
        self.submit_payload(note.record.id, kind, payload).await
    }

    async fn submit_payload(
        &self,
        record_id: u64,
        kind: EntryKind,
        payload: serde_json::Value,
    ) -> ClientResult<SubmitOutcome> {
        self.ensure_ready().await?;

        if self.is_offline() {
            return self.enqueue(record_id, kind, payload, false).await;
        }

        let key = outbox::submission_key(record_id, kind, &payload);
        match dispatch_payload(self.authority.as_ref(), kind, &payload).await {
            Ok(authorization) => {
                // Ledger first: if we crash before the record patch lands,
                // replay reconciliation finds the confirmation here.
                self.outbox.record_confirmed(&key, &authorization)?;
                self.store
                    .update_record(record_id, RecordPatch::approved(authorization.clone()))
                    .await?;
                self.mark_synced().await?;
                Ok(SubmitOutcome {
                    offline_mode: false,
                    authorization: Some(authorization),
                })
            }
            Err(e) if e.is_transient() => {
                // The payload reached the wire and the authority may have
                // accepted it with only the response lost, so the entry is
                // queued as dispatched and replay reconciles before
                // resubmitting.
                tracing::warn!(record_id, error = %e, "authority unreachable, queueing");
                self.enqueue(record_id, kind, payload, true).await
            }
            Err(e @ ClientError::Validation(_)) => {
                self.store
                    .update_record(record_id, RecordPatch::errored(e.to_string()))
                    .await?;
                self.push_error(&e);
                self.notifier.notify(
                    NoticeKind::SubmissionRejected,
                    &format!("document {record_id} rejected: {e}"),
                );
                Err(e)
            }
            Err(e) => {
                // Not a verdict on the document: surfaced to the caller
                // with the record left Pending for a manual retry.
                self.push_error(&e);
                Err(e)
            }
        }
    }

    async fn enqueue(
        &self,
        record_id: u64,
        kind: EntryKind,
        payload: serde_json::Value,
        dispatched: bool,
    ) -> ClientResult<SubmitOutcome> {
        if dispatched {
            self.outbox.enqueue_dispatched(record_id, kind, payload)?;
        } else {
            self.outbox.enqueue(record_id, kind, payload)?;
        }
        self.sync_pending().await?;
        self.notifier.notify(
            NoticeKind::OfflineQueued,
            &format!("document {record_id} queued for submission"),
        );
        Ok(SubmitOutcome {
            offline_mode: true,
            authorization: None,
        })
    }

    /// Readiness per the session rules; attempts one refresh when a live
    /// token is missing. Not-ready online is a setup problem, never a
    /// reason to queue.
    async fn ensure_ready(&self) -> ClientResult<()> {
        let offline = self.is_offline();
        let mut session = self.session.lock().await;

        if session.is_ready(offline) {
            return Ok(());
        }
        if offline {
            return Err(ClientError::Configuration(
                "credentials incomplete".into(),
            ));
        }

        let refresh_result = session.refresh().await;
        let ready = session.is_ready(false);
        self.state.lock().unwrap().authenticated = ready;
        if ready {
            return Ok(());
        }
        Err(match refresh_result {
            Err(e) => e,
            Ok(()) => ClientError::Authentication("session not established".into()),
        })
    }

    // ------------------------------------------------------------------
    // Outbox replay
    // ------------------------------------------------------------------

    /// Replay queued submissions in enqueue order. Safe to trigger from
    /// anywhere; a pass already running makes this a no-op.
    pub async fn drain_outbox(&self) -> ClientResult<DrainReport> {
        let authority = self.authority.clone();
        let store = self.store.clone();
        let ledger = self.outbox.clone();

        let report = self
            .outbox
            .drain(move |entry| {
                let authority = authority.clone();
                let store = store.clone();
                let ledger = ledger.clone();
                async move { process_entry(authority, store, ledger, entry).await }
            })
            .await?;

        if report.busy {
            return Ok(report);
        }

        self.sync_pending().await?;
        if !report.confirmed.is_empty() {
            self.mark_synced().await?;
            self.notifier.notify(
                NoticeKind::ReplayFinished,
                &format!("{} queued submission(s) confirmed", report.confirmed.len()),
            );
        }
        for (record_id, detail) in &report.rejected {
            self.notifier.notify(
                NoticeKind::SubmissionRejected,
                &format!("document {record_id} rejected: {detail}"),
            );
        }
        Ok(report)
    }

    // ------------------------------------------------------------------
    // Connectivity
    // ------------------------------------------------------------------

    /// Apply a connectivity transition. Reconnecting refreshes the session
    /// and replays the outbox; going offline only flips the flag, and
    /// in-flight results still land.
    pub async fn handle_connectivity(&self, online: bool) {
        let was_offline = {
            let mut state = self.state.lock().unwrap();
            let was = state.offline;
            state.offline = !online;
            state.connected = online;
            was
        };

        if online && was_offline {
            tracing::info!("connectivity restored, replaying outbox");
            {
                let mut session = self.session.lock().await;
                if let Err(e) = session.refresh().await {
                    self.push_error(&e);
                }
                let ready = session.is_ready(false);
                self.state.lock().unwrap().authenticated = ready;
            }
            if let Err(e) = self.drain_outbox().await {
                self.push_error(&e);
            }
        }
    }

    /// Subscribe to a connectivity signal source. Transitions are handled
    /// on a background task owned by this client.
    pub fn watch_connectivity(
        self: &Arc<Self>,
        notifier: &dyn ConnectivityNotifier,
    ) -> SubscriptionId {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let id = notifier.subscribe(Arc::new(ChannelObserver { tx }));
        let client = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(online) = rx.recv().await {
                client.handle_connectivity(online).await;
            }
        });
        id
    }

    // ------------------------------------------------------------------
    // Queries and reporting
    // ------------------------------------------------------------------

    /// Next free document number for the letter, from the authority's
    /// numbering.
    pub async fn next_document_number(&self, letter: DocumentLetter) -> ClientResult<u64> {
        self.ensure_ready().await?;
        let code = transform::invoice_type_code(letter);
        Ok(self.authority.last_number(code).await? + 1)
    }

    pub async fn query_document(&self, type_code: u16, number: u64) -> ClientResult<WireDocument> {
        self.ensure_ready().await?;
        self.authority.query_document(type_code, number).await
    }

    pub async fn download_pdf(&self, type_code: u16, number: u64) -> ClientResult<Vec<u8>> {
        self.ensure_ready().await?;
        self.authority.download_pdf(type_code, number).await
    }

    pub async fn authority_status(&self) -> ClientResult<ServiceAvailability> {
        self.authority.service_status().await
    }

    /// Verification QR URL for an approved document.
    pub fn compliance_qr(&self, record: &InvoiceRecord) -> ClientResult<String> {
        qr::build_url(record, &self.credentials)
    }

    /// Current health snapshot.
    pub fn service_state(&self) -> ServiceState {
        let mut snapshot = self.state.lock().unwrap().clone();
        snapshot.pending_count = self.outbox.len();
        snapshot
    }

    pub fn is_offline(&self) -> bool {
        self.state.lock().unwrap().offline
    }

    fn push_error(&self, error: &ClientError) {
        self.state.lock().unwrap().push_error(error.to_string());
    }

    async fn mark_synced(&self) -> ClientResult<()> {
        self.state.lock().unwrap().last_sync = Some(Utc::now());
        Ok(())
    }

    /// Mirror the outbox into the caller-visible pending list.
    async fn sync_pending(&self) -> ClientResult<()> {
        let ids = self.outbox.pending_record_ids()?;
        self.state.lock().unwrap().pending_count = ids.len();
        self.store.set_pending(&ids).await
    }
}

fn to_payload<T: serde::Serialize>(wire: &T) -> ClientResult<serde_json::Value> {
    serde_json::to_value(wire).map_err(|e| ClientError::Storage(e.to_string()))
}

async fn dispatch_payload(
    authority: &dyn AuthorityClient,
    kind: EntryKind,
    payload: &serde_json::Value,
) -> ClientResult<Authorization> {
    match kind {
        EntryKind::Invoice => {
            let wire: WireInvoice = serde_json::from_value(payload.clone())
                .map_err(|e| ClientError::Validation(format!("stored payload unreadable: {e}")))?;
            authority.submit_invoice(&wire).await
        }
        EntryKind::CreditNote | EntryKind::DebitNote => {
            let wire: WireNote = serde_json::from_value(payload.clone())
                .map_err(|e| ClientError::Validation(format!("stored payload unreadable: {e}")))?;
            authority.submit_note(&wire).await
        }
    }
}

fn payload_identity(payload: &serde_json::Value) -> Option<(u16, u64)> {
    let type_code = payload.get("type_code")?.as_u64()? as u16;
    let number = payload.get("number")?.as_u64()?;
    Some((type_code, number))
}

/// Process one outbox entry during a drain pass.
///
/// An entry whose prior attempt was dispatched but never confirmed is
/// reconciled before resubmitting: first against the local ledger, then by
/// querying the authority. Either finding the confirmation applies it
/// without a duplicate submission.
async fn process_entry(
    authority: Arc<dyn AuthorityClient>,
    store: Arc<dyn RecordStore>,
    ledger: Arc<Outbox>,
    entry: OutboxEntry,
) -> ClientResult<()> {
    if entry.dispatched {
        if let Some(authorization) = ledger.confirmed(&entry.submission_key)? {
            tracing::info!(record_id = entry.record_id, "already confirmed, applying ledger entry");
            store
                .update_record(entry.record_id, RecordPatch::approved(authorization))
                .await?;
            return Ok(());
        }
        if let Some((type_code, number)) = payload_identity(&entry.payload) {
            if let Ok(document) = authority.query_document(type_code, number).await {
                if let Some(authorization) = document.authorization {
                    tracing::info!(
                        record_id = entry.record_id,
                        "authority already accepted this document, skipping resubmit"
                    );
                    ledger.record_confirmed(&entry.submission_key, &authorization)?;
                    store
                        .update_record(entry.record_id, RecordPatch::approved(authorization))
                        .await?;
                    return Ok(());
                }
            }
        }
    }

    match dispatch_payload(authority.as_ref(), entry.kind, &entry.payload).await {
        Ok(authorization) => {
            ledger.record_confirmed(&entry.submission_key, &authorization)?;
            store
                .update_record(entry.record_id, RecordPatch::approved(authorization))
                .await?;
            Ok(())
        }
        Err(e @ ClientError::Validation(_)) => {
            store
                .update_record(entry.record_id, RecordPatch::errored(e.to_string()))
                .await?;
            Err(e)
        }
        // Anything else leaves the record and the entry alone; the drain
        // retains the queue and a later pass retries.
        Err(e) => Err(e),
    }
}
