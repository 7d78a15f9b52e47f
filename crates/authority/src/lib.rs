use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use fe_core::models::{Authorization, CertificateBundle, Environment};
use fe_core::transform::{WireInvoice, WireNote};
use fe_core::ClientResult;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthRequest {
    pub tax_id: u64,
    pub certificate: CertificateBundle,
    pub environment: Environment,
}

/// Bearer grant returned by a successful authentication.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthGrant {
    pub token: String,
    pub expiry: DateTime<Utc>,
}

/// A document as known to the authority, returned by queries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireDocument {
    pub type_code: u16,
    pub point_of_sale: u32,
    pub number: u64,
    pub total_amount: String,
    pub authorization: Option<Authorization>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceAvailability {
    pub available: bool,
}

/// The remote tax authority, behind an injected client so the transport
/// specifics stay out of the core. All failures are `ClientError` values
/// carrying the transient/permanent taxonomy.
#[async_trait]
pub trait AuthorityClient: Send + Sync {
    async fn authenticate(&self, request: &AuthRequest) -> ClientResult<AuthGrant>;
    async fn submit_invoice(&self, invoice: &WireInvoice) -> ClientResult<Authorization>;
    async fn submit_note(&self, note: &WireNote) -> ClientResult<Authorization>;
    async fn query_document(&self, type_code: u16, number: u64) -> ClientResult<WireDocument>;
    async fn last_number(&self, type_code: u16) -> ClientResult<u64>;
    async fn download_pdf(&self, type_code: u16, number: u64) -> ClientResult<Vec<u8>>;
    async fn service_status(&self) -> ClientResult<ServiceAvailability>;
}

pub fn default_authorization_expiry(issued: NaiveDate) -> NaiveDate {
    issued + chrono::Duration::days(10)
}

pub mod mock;
pub mod rest;
