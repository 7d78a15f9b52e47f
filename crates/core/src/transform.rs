//! Pure mapping from the domain records to the authority's submission
//! schema. No I/O, no side effects; the only failure mode is a validation
//! error for missing required fields.

use serde::{Deserialize, Serialize};

use crate::error::{ClientError, ClientResult};
use crate::models::{DocumentLetter, InvoiceRecord, NoteKind, NoteRecord};

/// Final-consumer recipient code, used when the document-type label is
/// unknown or absent.
pub const FINAL_CONSUMER: u16 = 99;

const CURRENCY_PESO: &str = "PES";

/// Invoice letter to the authority's numeric type code.
pub fn invoice_type_code(letter: DocumentLetter) -> u16 {
    match letter {
        DocumentLetter::A => 1,
        DocumentLetter::B => 6,
        DocumentLetter::C => 11,
    }
}

/// Note letter/kind to numeric type code.
pub fn note_type_code(letter: DocumentLetter, kind: NoteKind) -> u16 {
    match (kind, letter) {
        (NoteKind::Credit, DocumentLetter::A) => 3,
        (NoteKind::Credit, DocumentLetter::B) => 8,
        (NoteKind::Credit, DocumentLetter::C) => 13,
        (NoteKind::Debit, DocumentLetter::A) => 2,
        (NoteKind::Debit, DocumentLetter::B) => 7,
        (NoteKind::Debit, DocumentLetter::C) => 12,
    }
}

/// Recipient document-type label to numeric code. Unmapped labels fall back
/// to the final-consumer code.
pub fn recipient_doc_code(label: &str) -> u16 {
    match label.to_ascii_lowercase().as_str() {
        "cuit" => 80,
        "cuil" => 86,
        "dni" => 96,
        "passport" | "pasaporte" => 94,
        "cdi" => 87,
        "le" => 89,
        "lc" => 90,
        _ => FINAL_CONSUMER,
    }
}

pub fn format_amount(value: f64) -> String {
    format!("{value:.2}")
}

pub fn format_date(date: chrono::NaiveDate) -> String {
    date.format("%Y%m%d").to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireItem {
    pub description: String,
    pub quantity: String,
    pub unit_price: String,
}

/// An invoice in the authority's submission schema. Amounts are fixed
/// two-decimal strings, dates are `YYYYMMDD`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireInvoice {
    pub point_of_sale: u32,
    pub type_code: u16,
    pub number: u64,
    pub issue_date: String,
    pub recipient_doc_code: u16,
    pub recipient_doc_number: u64,
    pub net_amount: String,
    pub tax_amount: String,
    pub total_amount: String,
    pub currency: String,
    pub exchange_rate: String,
    pub items: Vec<WireItem>,
}

/// Reference to the invoice a note adjusts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireReference {
    pub type_code: u16,
    pub point_of_sale: u32,
    pub number: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireNote {
    #[serde(flatten)]
    pub document: WireInvoice,
    pub reference: WireReference,
}

fn check_required(record: &InvoiceRecord, recipient_code: u16) -> ClientResult<()> {
    if record.totals.total <= 0.0 {
        return Err(ClientError::Validation(format!(
            "record {}: total amount must be positive",
            record.id
        )));
    }
    if recipient_code != FINAL_CONSUMER && record.customer.doc_number.is_none() {
        return Err(ClientError::Validation(format!(
            "record {}: recipient document number required for doc type {}",
            record.id, record.customer.doc_type
        )));
    }
    // Type A documents are only valid against an identified CUIT holder.
    if record.letter == DocumentLetter::A && recipient_code != 80 {
        return Err(ClientError::Validation(format!(
            "record {}: type A documents require a CUIT recipient",
            record.id
        )));
    }
    Ok(())
}

fn wire_body(record: &InvoiceRecord, point_of_sale: u32, type_code: u16) -> ClientResult<WireInvoice> {
    let recipient_code = recipient_doc_code(&record.customer.doc_type);
    check_required(record, recipient_code)?;

    Ok(WireInvoice {
        point_of_sale,
        type_code,
        number: record.number,
        issue_date: format_date(record.issue_date),
        recipient_doc_code: recipient_code,
        recipient_doc_number: record.customer.doc_number.unwrap_or(0),
        net_amount: format_amount(record.totals.net),
        tax_amount: format_amount(record.totals.tax),
        total_amount: format_amount(record.totals.total),
        currency: CURRENCY_PESO.to_string(),
        exchange_rate: format_amount(1.0),
        items: record
            .items
            .iter()
            .map(|i| WireItem {
                description: i.description.clone(),
                quantity: format_amount(i.quantity),
                unit_price: format_amount(i.unit_price),
            })
            .collect(),
    })
}

/// Map an invoice to its wire form.
pub fn to_wire(record: &InvoiceRecord, point_of_sale: u32) -> ClientResult<WireInvoice> {
    wire_body(record, point_of_sale, invoice_type_code(record.letter))
}

/// Map a note to its wire form, embedding the reference to the original
/// invoice.
pub fn note_to_wire(
    note: &NoteRecord,
    original: &InvoiceRecord,
    point_of_sale: u32,
) -> ClientResult<WireNote> {
    let type_code = note_type_code(note.record.letter, note.kind);
    let document = wire_body(&note.record, point_of_sale, type_code)?;
    Ok(WireNote {
        document,
        reference: WireReference {
            type_code: invoice_type_code(original.letter),
            point_of_sale,
            number: original.number,
        },
    })
}
