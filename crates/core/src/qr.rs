//! Compliance QR payload for printed documents.
//!
//! The printed QR carries a base64-encoded JSON object appended to the
//! authority's verification URL, so a third party can check the document
//! against the authority's records. A document without an authorization
//! code must not receive a QR: the QR asserts the authority already
//! approved it.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::error::{ClientError, ClientResult};
use crate::models::{Credentials, InvoiceRecord};
use crate::transform::{invoice_type_code, recipient_doc_code};

/// Verification URL template; the payload is appended as the `p` query
/// parameter.
pub const VERIFICATION_URL: &str = "https://www.afip.gob.ar/fe/qr/";

const PAYLOAD_VERSION: u8 = 1;
const AUTHORIZATION_KIND: &str = "E";

/// The fixed field set of the QR payload. Consumers decode by key, not by
/// position.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QrPayload {
    pub ver: u8,
    /// Issue date, `YYYY-MM-DD`.
    pub fecha: String,
    pub cuit: u64,
    #[serde(rename = "ptoVta")]
    pub pto_vta: u32,
    #[serde(rename = "tipoCmp")]
    pub tipo_cmp: u16,
    #[serde(rename = "nroCmp")]
    pub nro_cmp: u64,
    pub importe: f64,
    pub moneda: String,
    pub ctz: f64,
    #[serde(rename = "tipoDocRec")]
    pub tipo_doc_rec: u16,
    #[serde(rename = "nroDocRec")]
    pub nro_doc_rec: u64,
    #[serde(rename = "tipoCodAut")]
    pub tipo_cod_aut: String,
    #[serde(rename = "codAut")]
    pub cod_aut: u64,
}

/// Build the payload for an approved document.
pub fn build_payload(record: &InvoiceRecord, credentials: &Credentials) -> ClientResult<QrPayload> {
    let authorization = record.authorization.as_ref().ok_or_else(|| {
        ClientError::Validation(format!(
            "record {}: no authorization code, refusing to build QR",
            record.id
        ))
    })?;
    let cod_aut: u64 = authorization.code.parse().map_err(|_| {
        ClientError::Validation(format!(
            "record {}: authorization code {:?} is not numeric",
            record.id, authorization.code
        ))
    })?;

    Ok(QrPayload {
        ver: PAYLOAD_VERSION,
        fecha: record.issue_date.format("%Y-%m-%d").to_string(),
        cuit: credentials.tax_id,
        pto_vta: credentials.point_of_sale,
        tipo_cmp: invoice_type_code(record.letter),
        nro_cmp: record.number,
        importe: record.totals.total,
        moneda: "PES".to_string(),
        ctz: 1.0,
        tipo_doc_rec: recipient_doc_code(&record.customer.doc_type),
        nro_doc_rec: record.customer.doc_number.unwrap_or(0),
        tipo_cod_aut: AUTHORIZATION_KIND.to_string(),
        cod_aut,
    })
}

/// Full verification URL with the base64 payload appended.
pub fn build_url(record: &InvoiceRecord, credentials: &Credentials) -> ClientResult<String> {
    let payload = build_payload(record, credentials)?;
    let json = serde_json::to_vec(&payload)
        .map_err(|e| ClientError::Validation(format!("QR payload serialization: {e}")))?;
    Ok(format!("{VERIFICATION_URL}?p={}", STANDARD.encode(json)))
}
