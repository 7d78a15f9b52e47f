use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Test,
    Production,
}

impl Default for Environment {
    fn default() -> Self {
        Environment::Test
    }
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Test => "test",
            Environment::Production => "production",
        }
    }
}

/// Certificate bundle used to authenticate against the authority.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CertificateBundle {
    pub certificate_pem: String,
    pub private_key_pem: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credentials {
    /// CUIT of the issuing taxpayer.
    pub tax_id: u64,
    pub legal_name: String,
    /// Point-of-sale number registered with the authority; scopes document
    /// numbering.
    pub point_of_sale: u32,
    pub certificate: Option<CertificateBundle>,
    pub environment: Environment,
}

impl Credentials {
    pub fn is_complete(&self) -> bool {
        self.tax_id != 0 && self.point_of_sale != 0 && self.certificate.is_some()
    }
}

/// Bearer token issued by the authority. Replaced wholesale on each refresh.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub token: String,
    pub expiry: DateTime<Utc>,
    pub environment: Environment,
}

impl Session {
    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        now < self.expiry
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DocumentLetter {
    A,
    B,
    C,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoteKind {
    Credit,
    Debit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordStatus {
    Pending,
    Approved,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Customer {
    pub name: String,
    /// Document-type label ("cuit", "dni", ...). Unknown labels map to the
    /// final-consumer code on the wire.
    pub doc_type: String,
    pub doc_number: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineItem {
    pub description: String,
    pub quantity: f64,
    pub unit_price: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Totals {
    pub net: f64,
    pub tax: f64,
    pub total: f64,
}

/// Authorization issued by the authority for an approved document (CAE).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Authorization {
    pub code: String,
    pub expiry: NaiveDate,
}

/// A locally-issued invoice. Created by the caller at sale time; only the
/// submission outcome fields are ever mutated, and only by the client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvoiceRecord {
    pub id: u64,
    pub letter: DocumentLetter,
    /// Document number within the point of sale.
    pub number: u64,
    pub customer: Customer,
    pub items: Vec<LineItem>,
    pub totals: Totals,
    pub issue_date: NaiveDate,
    pub status: RecordStatus,
    pub authorization: Option<Authorization>,
}

/// Credit or debit note. Same shape as an invoice plus the kind and a
/// reference to the invoice it adjusts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NoteRecord {
    pub record: InvoiceRecord,
    pub kind: NoteKind,
    /// Id of the referenced invoice. Existence is the caller's contract;
    /// its status is not checked here.
    pub invoice_id: u64,
}
