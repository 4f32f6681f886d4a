// SPDX-License-Identifier: MIT OR Apache-2.0
//! Inbound `metadata.json` schema.
//!
//! These are the raw shapes emitted by scanning bureaus. Parsing is strict:
//! unknown fields are rejected (`deny_unknown_fields`), and timestamps go
//! through a tolerant deserializer because bureau exports alternate between
//! `T`-separated and space-separated forms. Normalization into persisted
//! entities happens in the envelope builder, not here.

use crate::Classification;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Serde helper for bureau timestamps with tolerant input formats.
///
/// Accepts RFC 3339 (`2018-06-24T12:00:00.000Z`), a zone-less `T`-separated
/// variant, and the space-separated variant some bureaus emit. Zone-less
/// values are taken as UTC. Serializes back as RFC 3339 with milliseconds.
pub mod scan_timestamp {
    use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    const NAIVE_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

    /// Parse a bureau timestamp string into UTC.
    pub fn parse(value: &str) -> Option<DateTime<Utc>> {
        if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
            return Some(dt.with_timezone(&Utc));
        }
        NAIVE_FORMATS
            .iter()
            .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
            .map(|naive| naive.and_utc())
    }

    /// Serde hook: emit RFC 3339 with millisecond precision.
    pub fn serialize<S: Serializer>(val: &DateTime<Utc>, ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_str(&val.to_rfc3339_opts(SecondsFormat::Millis, true))
    }

    /// Serde hook: accept any of the tolerated input formats.
    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(de)?;
        parse(&raw).ok_or_else(|| {
            serde::de::Error::custom(format!("unrecognized timestamp format: {raw:?}"))
        })
    }
}

// ---------------------------------------------------------------------------
// Metadata shapes
// ---------------------------------------------------------------------------

/// Top-level `metadata.json` document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EnvelopeMetadata {
    /// P.O. box the post was delivered to.
    pub po_box: String,
    /// Jurisdiction short code. Must agree with the container mapping.
    pub jurisdiction: String,
    /// When the post was delivered.
    #[serde(with = "scan_timestamp")]
    pub delivery_date: chrono::DateTime<chrono::Utc>,
    /// When the envelope was opened.
    #[serde(with = "scan_timestamp")]
    pub opening_date: chrono::DateTime<chrono::Utc>,
    /// When the bureau created the archive.
    #[serde(with = "scan_timestamp")]
    pub zip_file_createddate: chrono::DateTime<chrono::Utc>,
    /// Archive filename as the bureau recorded it.
    pub zip_file_name: String,
    /// Case number, when known at scanning time.
    #[serde(default)]
    pub case_number: Option<String>,
    /// Declared classification.
    pub envelope_classification: Classification,
    /// Scanned documents.
    #[serde(default)]
    pub scannable_items: Vec<ScannableItemMetadata>,
    /// Declared payments.
    #[serde(default)]
    pub payments: Vec<PaymentMetadata>,
    /// Declared non-scannable items.
    #[serde(default)]
    pub non_scannable_items: Vec<NonScannableItemMetadata>,
}

/// One declared scanned document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScannableItemMetadata {
    /// Bureau-assigned document control number.
    pub document_control_number: String,
    /// PDF filename this record describes.
    pub file_name: String,
    /// When the page set was scanned.
    #[serde(with = "scan_timestamp")]
    pub scanning_date: chrono::DateTime<chrono::Utc>,
    /// Bureau-reported OCR accuracy, verbatim.
    #[serde(default)]
    pub ocr_accuracy: Option<String>,
    /// Base64-encoded OCR output. Decoded and parsed by the validator.
    #[serde(default)]
    pub ocr_data: Option<String>,
    /// Declared document type.
    #[serde(default)]
    pub document_type: Option<String>,
    /// Declared document sub-type.
    #[serde(default)]
    pub document_sub_type: Option<String>,
    /// Free-text bureau notes.
    #[serde(default)]
    pub notes: Option<String>,
}

/// One declared payment.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PaymentMetadata {
    /// Control number of the payment slip.
    pub document_control_number: String,
    /// Payment method.
    #[serde(default)]
    pub method: Option<String>,
    /// Declared amount.
    #[serde(default)]
    pub amount: Option<f64>,
    /// ISO currency code.
    #[serde(default)]
    pub currency: Option<String>,
}

/// One declared non-scannable item.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NonScannableItemMetadata {
    /// Control number assigned to the item.
    pub document_control_number: String,
    /// Declared item type.
    #[serde(default)]
    pub item_type: Option<String>,
    /// Free-text bureau notes.
    #[serde(default)]
    pub notes: Option<String>,
}

// ---------------------------------------------------------------------------
// OCR data
// ---------------------------------------------------------------------------

/// Error decoding or parsing a scannable item's OCR blob.
#[derive(Debug, thiserror::Error)]
pub enum OcrParseError {
    /// The blob was not valid base64.
    #[error("ocr data is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    /// The decoded bytes were not the expected JSON document.
    #[error("ocr data is not valid json: {0}")]
    Json(#[from] serde_json::Error),
}

/// Structured OCR output attached to a scannable item.
///
/// The wire form is a base64-encoded JSON document of key/value pairs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct OcrData {
    /// Recognized fields, in document order.
    pub metadata_file: Vec<OcrField>,
}

/// A single recognized OCR field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct OcrField {
    /// Field name as printed on the form.
    pub key: String,
    /// Recognized value. Bureaus emit strings and numbers.
    pub value: serde_json::Value,
}

impl OcrData {
    /// Decode the base64 wire form and parse the embedded JSON document.
    pub fn from_base64(encoded: &str) -> Result<Self, OcrParseError> {
        let bytes = BASE64.decode(encoded.trim())?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Encode back to the base64 wire form.
    pub fn to_base64(&self) -> String {
        // Serialization of a value built from these types cannot fail.
        let json = serde_json::to_vec(self).expect("ocr data serializes");
        BASE64.encode(json)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
