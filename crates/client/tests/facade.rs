//! End-to-end scenarios for the invoicing client façade, driven by the
//! scriptable mock authority.

use std::sync::Arc;

use chrono::NaiveDate;

use authority::mock::MockAuthorityClient;
use client::connectivity::{ConnectivityNotifier, ManualNotifier};
use client::notify::NullNotifier;
use client::store::MemoryStore;
use client::InvoicingClient;
use fe_core::models::{
    Authorization, CertificateBundle, Credentials, Customer, DocumentLetter, Environment,
    InvoiceRecord, LineItem, NoteKind, NoteRecord, RecordStatus, Totals,
};
use fe_core::ClientError;
use outbox::Outbox;

fn credentials() -> Credentials {
    Credentials {
        tax_id: 20111111112,
        legal_name: "Test SA".into(),
        point_of_sale: 3,
        certificate: Some(CertificateBundle {
            certificate_pem: "---cert---".into(),
            private_key_pem: "---key---".into(),
        }),
        environment: Environment::Test,
    }
}

fn invoice(id: u64, number: u64) -> InvoiceRecord {
    InvoiceRecord {
        id,
        letter: DocumentLetter::B,
        number,
        customer: Customer {
            name: "Cliente".into(),
            doc_type: "dni".into(),
            doc_number: Some(30123456),
        },
        items: vec![LineItem {
            description: "service".into(),
            quantity: 1.0,
            unit_price: 121.0,
        }],
        totals: Totals {
            net: 100.0,
            tax: 21.0,
            total: 121.0,
        },
        issue_date: NaiveDate::from_ymd_opt(2026, 4, 2).unwrap(),
        status: RecordStatus::Pending,
        authorization: None,
    }
}

struct Fixture {
    client: Arc<InvoicingClient>,
    authority: Arc<MockAuthorityClient>,
    store: Arc<MemoryStore>,
    outbox: Arc<Outbox>,
}

fn fixture_with(credentials: Credentials) -> Fixture {
    let authority = MockAuthorityClient::new();
    let store = MemoryStore::new();
    let outbox = Arc::new(Outbox::temporary().unwrap());
    let client = InvoicingClient::new(
        credentials,
        authority.clone(),
        store.clone(),
        outbox.clone(),
        Arc::new(NullNotifier),
    );
    Fixture {
        client,
        authority,
        store,
        outbox,
    }
}

fn fixture() -> Fixture {
    fixture_with(credentials())
}

#[tokio::test]
async fn online_submit_goes_direct_and_never_enqueues() {
    let fx = fixture();
    let outcome = fx.client.submit(&invoice(1, 10)).await.unwrap();

    assert!(!outcome.offline_mode);
    assert!(outcome.authorization.is_some());
    assert!(fx.outbox.is_empty());

    let calls = fx.authority.calls();
    // One refresh (no cached session) followed by the direct submission.
    assert_eq!(calls, vec!["authenticate:20111111112", "submit_invoice:6:10"]);

    let patch = fx.store.patch_for(1).unwrap();
    assert_eq!(patch.status, RecordStatus::Approved);
    assert!(patch.authorization.is_some());
}

#[tokio::test]
async fn offline_submit_queues_and_reports_offline_mode() {
    let fx = fixture();
    fx.client.handle_connectivity(false).await;

    let outcome = fx.client.submit(&invoice(42, 11)).await.unwrap();
    assert!(outcome.offline_mode);
    assert!(outcome.authorization.is_none());

    // No network traffic at all while offline.
    assert!(fx.authority.calls().is_empty());
    assert_eq!(fx.outbox.pending_record_ids().unwrap(), vec![42]);
    assert_eq!(fx.store.pending_ids_sync(), vec![42]);
    // The record was not patched: still Pending on the caller's side.
    assert!(fx.store.patch_for(42).is_none());

    let state = fx.client.service_state();
    assert!(state.offline);
    assert_eq!(state.pending_count, 1);
}

#[tokio::test]
async fn reconnect_replays_queue_and_approves() {
    let fx = fixture();
    fx.client.handle_connectivity(false).await;
    fx.client.submit(&invoice(42, 11)).await.unwrap();

    fx.client.handle_connectivity(true).await;

    let patch = fx.store.patch_for(42).unwrap();
    assert_eq!(patch.status, RecordStatus::Approved);
    assert_eq!(patch.authorization.as_ref().unwrap().code.len(), 14);
    assert!(fx.outbox.is_empty());
    assert!(fx.store.pending_ids_sync().is_empty());

    let state = fx.client.service_state();
    assert!(!state.offline);
    assert!(state.last_sync.is_some());
    assert_eq!(state.pending_count, 0);
}

#[tokio::test]
async fn transient_failure_on_direct_submit_queues() {
    let fx = fixture();
    fx.authority
        .script_submission(Err(ClientError::Connectivity("gateway unreachable".into())));

    let outcome = fx.client.submit(&invoice(7, 12)).await.unwrap();
    assert!(outcome.offline_mode);
    assert_eq!(fx.outbox.pending_record_ids().unwrap(), vec![7]);
    // The payload went out before the failure, so the entry carries the
    // dispatch marker for reconciliation.
    assert!(fx.outbox.entries().unwrap()[0].dispatched);
    // Record untouched, still pending retry.
    assert!(fx.store.patch_for(7).is_none());
}

#[tokio::test]
async fn interrupted_direct_submit_reconciles_instead_of_resubmitting() {
    let fx = fixture();
    fx.authority
        .script_submission(Err(ClientError::Connectivity("response lost".into())));

    let outcome = fx.client.submit(&invoice(55, 45)).await.unwrap();
    assert!(outcome.offline_mode);

    // The authority had in fact accepted the document; only the response
    // was lost in transit.
    let auth = Authorization {
        code: "74555566667777".into(),
        expiry: NaiveDate::from_ymd_opt(2026, 8, 1).unwrap(),
    };
    fx.authority.set_document(authority::WireDocument {
        type_code: 6,
        point_of_sale: 3,
        number: 45,
        total_amount: "121.00".into(),
        authorization: Some(auth.clone()),
    });

    let report = fx.client.drain_outbox().await.unwrap();
    assert_eq!(report.confirmed, vec![55]);
    assert_eq!(fx.store.patch_for(55).unwrap().authorization, Some(auth));
    assert!(fx.outbox.is_empty());

    // The lost first attempt stays the only submission ever sent.
    let submits = fx
        .authority
        .calls()
        .iter()
        .filter(|c| c.starts_with("submit_"))
        .count();
    assert_eq!(submits, 1);
}

#[tokio::test]
async fn failed_reauth_on_reconnect_keeps_queue_intact() {
    let fx = fixture();
    fx.client.handle_connectivity(false).await;
    fx.client.submit(&invoice(1, 70)).await.unwrap();
    fx.client.submit(&invoice(2, 71)).await.unwrap();

    // Reconnect with credentials the authority now refuses. The replay
    // pass must not consume the queue or mark any record in error.
    fx.authority
        .script_auth(Err(ClientError::Authentication("token refresh failed".into())));
    fx.authority
        .script_submission(Err(ClientError::Authentication("token refresh failed".into())));
    fx.client.handle_connectivity(true).await;

    assert_eq!(fx.outbox.pending_record_ids().unwrap(), vec![1, 2]);
    assert!(fx.store.patch_for(1).is_none());
    assert!(fx.store.patch_for(2).is_none());

    // Once authentication recovers, the next transition replays both.
    fx.client.handle_connectivity(false).await;
    fx.client.handle_connectivity(true).await;
    assert!(fx.outbox.is_empty());
    assert_eq!(fx.store.patch_for(1).unwrap().status, RecordStatus::Approved);
    assert_eq!(fx.store.patch_for(2).unwrap().status, RecordStatus::Approved);
}

#[tokio::test]
async fn validation_rejection_marks_error_and_never_retries() {
    let fx = fixture();
    fx.authority
        .script_submission(Err(ClientError::Validation("total mismatch".into())));

    let err = fx.client.submit(&invoice(5, 13)).await.unwrap_err();
    assert!(matches!(err, ClientError::Validation(_)));

    let patch = fx.store.patch_for(5).unwrap();
    assert_eq!(patch.status, RecordStatus::Error);
    assert!(fx.outbox.is_empty());

    // A later replay pass resubmits nothing.
    let report = fx.client.drain_outbox().await.unwrap();
    assert!(report.confirmed.is_empty());
    let submits = fx
        .authority
        .calls()
        .iter()
        .filter(|c| c.starts_with("submit_"))
        .count();
    assert_eq!(submits, 1);
}

#[tokio::test]
async fn queued_validation_rejection_is_dropped_during_drain() {
    let fx = fixture();
    fx.client.handle_connectivity(false).await;
    fx.client.submit(&invoice(1, 20)).await.unwrap();
    fx.client.submit(&invoice(2, 21)).await.unwrap();

    fx.authority
        .script_submission(Err(ClientError::Validation("rejected".into())));

    fx.client.handle_connectivity(true).await;

    assert_eq!(fx.store.patch_for(1).unwrap().status, RecordStatus::Error);
    assert_eq!(fx.store.patch_for(2).unwrap().status, RecordStatus::Approved);
    assert!(fx.outbox.is_empty());
}

#[tokio::test]
async fn local_validation_failure_leaves_record_untouched() {
    let fx = fixture();
    let mut bad = invoice(9, 14);
    bad.totals.total = 0.0;

    let err = fx.client.submit(&bad).await.unwrap_err();
    assert!(matches!(err, ClientError::Validation(_)));
    // Nothing dispatched, nothing queued, nothing patched.
    assert!(fx.authority.calls().is_empty());
    assert!(fx.outbox.is_empty());
    assert!(fx.store.patch_for(9).is_none());
}

#[tokio::test]
async fn missing_certificate_is_a_setup_failure_not_a_queue() {
    let mut creds = credentials();
    creds.certificate = None;
    let fx = fixture_with(creds);

    let err = fx.client.submit(&invoice(1, 15)).await.unwrap_err();
    assert!(matches!(err, ClientError::Configuration(_)));
    assert!(fx.outbox.is_empty());
    assert!(fx.authority.calls().is_empty());
}

#[tokio::test]
async fn rejected_credentials_fail_without_queueing() {
    let fx = fixture();
    fx.authority
        .script_auth(Err(ClientError::Authentication("bad certificate".into())));

    let err = fx.client.submit(&invoice(1, 16)).await.unwrap_err();
    assert!(matches!(err, ClientError::Authentication(_)));
    assert!(fx.outbox.is_empty());
}

#[tokio::test]
async fn note_submission_references_original_invoice() {
    let fx = fixture();
    let original = invoice(1, 30);
    let note = NoteRecord {
        record: invoice(2, 5),
        kind: NoteKind::Credit,
        invoice_id: original.id,
    };

    let outcome = fx.client.submit_note(&note, &original).await.unwrap();
    assert!(!outcome.offline_mode);
    // Credit note over a type B invoice is type code 8.
    assert!(fx.authority.calls().contains(&"submit_note:8:5".to_string()));
    assert_eq!(fx.store.patch_for(2).unwrap().status, RecordStatus::Approved);
}

#[tokio::test]
async fn replayed_entry_with_ledger_confirmation_is_not_resubmitted() {
    let fx = fixture();
    fx.client.handle_connectivity(false).await;
    fx.client.submit(&invoice(77, 40)).await.unwrap();

    // First replay attempt dies with a transient failure after dispatch.
    fx.authority
        .script_submission(Err(ClientError::Service("502".into())));
    fx.client.handle_connectivity(true).await;
    assert_eq!(fx.outbox.pending_record_ids().unwrap(), vec![77]);

    // The confirmation for that attempt eventually lands in the ledger
    // (as it would if the crash happened after the authority accepted).
    let entry = fx.outbox.entries().unwrap().remove(0);
    let auth = Authorization {
        code: "74999988887777".into(),
        expiry: NaiveDate::from_ymd_opt(2026, 5, 1).unwrap(),
    };
    fx.outbox.record_confirmed(&entry.submission_key, &auth).unwrap();

    let report = fx.client.drain_outbox().await.unwrap();
    assert_eq!(report.confirmed, vec![77]);
    assert_eq!(fx.store.patch_for(77).unwrap().authorization, Some(auth));

    // Exactly one real submission attempt ever reached the authority.
    let submits = fx
        .authority
        .calls()
        .iter()
        .filter(|c| c.starts_with("submit_"))
        .count();
    assert_eq!(submits, 1);
}

#[tokio::test]
async fn replayed_entry_reconciles_against_authority_query() {
    let fx = fixture();
    fx.client.handle_connectivity(false).await;
    fx.client.submit(&invoice(88, 41)).await.unwrap();

    fx.authority
        .script_submission(Err(ClientError::Connectivity("reset".into())));
    fx.client.handle_connectivity(true).await;
    assert!(fx.outbox.entries().unwrap()[0].dispatched);

    // The authority did accept the document in that first attempt.
    let auth = Authorization {
        code: "74111122223333".into(),
        expiry: NaiveDate::from_ymd_opt(2026, 6, 1).unwrap(),
    };
    fx.authority.set_document(authority::WireDocument {
        type_code: 6,
        point_of_sale: 3,
        number: 41,
        total_amount: "121.00".into(),
        authorization: Some(auth.clone()),
    });

    let report = fx.client.drain_outbox().await.unwrap();
    assert_eq!(report.confirmed, vec![88]);
    assert_eq!(fx.store.patch_for(88).unwrap().authorization, Some(auth));
    let submits = fx
        .authority
        .calls()
        .iter()
        .filter(|c| c.starts_with("submit_"))
        .count();
    assert_eq!(submits, 1);
}

#[tokio::test]
async fn manual_notifier_drives_replay() {
    let fx = fixture();
    let signal = ManualNotifier::new();
    let subscription = fx.client.watch_connectivity(signal.as_ref());

    fx.client.handle_connectivity(false).await;
    fx.client.submit(&invoice(3, 50)).await.unwrap();

    signal.set_online(true);
    // The transition is handled on a background task.
    for _ in 0..50 {
        if fx.outbox.is_empty() {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }

    assert!(fx.outbox.is_empty());
    assert_eq!(fx.store.patch_for(3).unwrap().status, RecordStatus::Approved);
    signal.unsubscribe(subscription);
}

#[tokio::test]
async fn next_document_number_uses_authority_numbering() {
    let fx = fixture();
    fx.authority.set_last_number(6, 41);
    let next = fx
        .client
        .next_document_number(DocumentLetter::B)
        .await
        .unwrap();
    assert_eq!(next, 42);
}

#[tokio::test]
async fn compliance_qr_only_for_approved_records() {
    let fx = fixture();
    let mut record = invoice(1, 60);
    assert!(fx.client.compliance_qr(&record).is_err());

    record.authorization = Some(Authorization {
        code: "74123412341234".into(),
        expiry: NaiveDate::from_ymd_opt(2026, 7, 1).unwrap(),
    });
    let url = fx.client.compliance_qr(&record).unwrap();
    assert!(url.starts_with("https://www.afip.gob.ar/fe/qr/?p="));
}
