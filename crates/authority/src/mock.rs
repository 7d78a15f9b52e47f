//! Scriptable in-memory authority used by the workspace tests.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{Duration, Utc};
use rand::Rng;

use fe_core::models::Authorization;
use fe_core::transform::{WireInvoice, WireNote};
use fe_core::ClientResult;

use crate::{
    default_authorization_expiry, AuthGrant, AuthRequest, AuthorityClient, ServiceAvailability,
    WireDocument,
};

/// Mock authority. Scripted outcomes are consumed in FIFO order; when a
/// queue is empty the call succeeds with generated data. Every call is
/// appended to the log so tests can assert on call order and absence.
#[derive(Default)]
pub struct MockAuthorityClient {
    auth_outcomes: Mutex<VecDeque<ClientResult<AuthGrant>>>,
    submit_outcomes: Mutex<VecDeque<ClientResult<Authorization>>>,
    documents: Mutex<HashMap<(u16, u64), WireDocument>>,
    last_numbers: Mutex<HashMap<u16, u64>>,
    calls: Mutex<Vec<String>>,
}

impl MockAuthorityClient {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn script_auth(&self, outcome: ClientResult<AuthGrant>) {
        self.auth_outcomes.lock().unwrap().push_back(outcome);
    }

    pub fn script_submission(&self, outcome: ClientResult<Authorization>) {
        self.submit_outcomes.lock().unwrap().push_back(outcome);
    }

    pub fn set_document(&self, document: WireDocument) {
        self.documents
            .lock()
            .unwrap()
            .insert((document.type_code, document.number), document);
    }

    pub fn set_last_number(&self, type_code: u16, number: u64) {
        self.last_numbers.lock().unwrap().insert(type_code, number);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn log(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }

    fn generated_authorization() -> Authorization {
        let code: String = (0..14)
            .map(|_| rand::thread_rng().gen_range(0..10).to_string())
            .collect();
        Authorization {
            code,
            expiry: default_authorization_expiry(Utc::now().date_naive()),
        }
    }

    fn next_submission(&self) -> ClientResult<Authorization> {
        self.submit_outcomes
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(Self::generated_authorization()))
    }
}

#[async_trait]
impl AuthorityClient for MockAuthorityClient {
    async fn authenticate(&self, request: &AuthRequest) -> ClientResult<AuthGrant> {
        self.log(format!("authenticate:{}", request.tax_id));
        self.auth_outcomes.lock().unwrap().pop_front().unwrap_or_else(|| {
            Ok(AuthGrant {
                token: "mock-token".into(),
                expiry: Utc::now() + Duration::hours(12),
            })
        })
    }

    async fn submit_invoice(&self, invoice: &WireInvoice) -> ClientResult<Authorization> {
        self.log(format!("submit_invoice:{}:{}", invoice.type_code, invoice.number));
        self.next_submission()
    }

    async fn submit_note(&self, note: &WireNote) -> ClientResult<Authorization> {
        self.log(format!(
            "submit_note:{}:{}",
            note.document.type_code, note.document.number
        ));
        self.next_submission()
    }

    async fn query_document(&self, type_code: u16, number: u64) -> ClientResult<WireDocument> {
        self.log(format!("query_document:{type_code}:{number}"));
        self.documents
            .lock()
            .unwrap()
            .get(&(type_code, number))
            .cloned()
            .ok_or_else(|| {
                fe_core::ClientError::Validation(format!(
                    "document {type_code}/{number} not found"
                ))
            })
    }

    async fn last_number(&self, type_code: u16) -> ClientResult<u64> {
        self.log(format!("last_number:{type_code}"));
        Ok(*self.last_numbers.lock().unwrap().get(&type_code).unwrap_or(&0))
    }

    async fn download_pdf(&self, type_code: u16, number: u64) -> ClientResult<Vec<u8>> {
        self.log(format!("download_pdf:{type_code}:{number}"));
        Ok(format!("%PDF mock {type_code}/{number}").into_bytes())
    }

    async fn service_status(&self) -> ClientResult<ServiceAvailability> {
        self.log("service_status".into());
        Ok(ServiceAvailability { available: true })
    }
}
