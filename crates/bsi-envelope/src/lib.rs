// SPDX-License-Identifier: MIT OR Apache-2.0
//! bsi-envelope
#![deny(unsafe_code)]
#![warn(missing_docs)]
//!
//! Validation of the inner archive and normalization into a persistable
//! [`Envelope`].
//!
//! Three steps, each with its own typed failure:
//!
//! 1. [`parse_inner_archive`]: split the inner ZIP into `metadata.json`
//!    plus PDFs, rejecting anything else.
//! 2. [`validate_metadata`]: strict schema parse of the metadata
//!    document, including per-item OCR blobs.
//! 3. [`build_envelope`]: cross-check the PDF set against the declared
//!    scannable items and produce the unsaved envelope.

use bsi_core::metadata::{EnvelopeMetadata, OcrData};
use bsi_core::{
    Classification, Envelope, NonScannableItem, Payment, ScannableItem, Status,
};
use bsi_error::IngestFailure;
use chrono::{DateTime, DurationRound, TimeDelta, Utc};
use std::collections::BTreeMap;
use std::io::{Cursor, Read};
use uuid::Uuid;

/// Required inner metadata entry. Matched exactly, unlike the outer
/// archive's case-insensitive entries.
const METADATA_ENTRY: &str = "metadata.json";

// ---------------------------------------------------------------------------
// Inner archive
// ---------------------------------------------------------------------------

/// Contents of a validated inner archive.
#[derive(Debug, Clone)]
pub struct InnerArchive {
    /// Raw bytes of `metadata.json`.
    pub metadata: Vec<u8>,
    /// PDF entries by exact entry name.
    pub pdfs: BTreeMap<String, Vec<u8>>,
}

/// Split the inner archive into metadata and PDFs.
///
/// Exactly one `metadata.json` entry is required; every other file entry
/// must carry a `.pdf` extension (matched case-insensitively).
pub fn parse_inner_archive(bytes: &[u8]) -> Result<InnerArchive, IngestFailure> {
    let mut archive =
        zip::ZipArchive::new(Cursor::new(bytes)).map_err(|e| IngestFailure::MetadataSchema {
            report: format!("inner archive is not a valid zip: {e}"),
        })?;

    let mut metadata: Option<Vec<u8>> = None;
    let mut pdfs = BTreeMap::new();

    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|e| IngestFailure::MetadataSchema {
                report: format!("unreadable inner entry: {e}"),
            })?;
        if entry.is_dir() {
            continue;
        }
        let name = entry.name().to_string();
        let mut content = Vec::with_capacity(entry.size() as usize);
        entry
            .read_to_end(&mut content)
            .map_err(|e| IngestFailure::MetadataSchema {
                report: format!("unreadable inner entry {name}: {e}"),
            })?;

        if name == METADATA_ENTRY {
            if metadata.is_some() {
                return Err(IngestFailure::MetadataSchema {
                    report: "duplicate metadata.json entry".into(),
                });
            }
            metadata = Some(content);
        } else if name.to_ascii_lowercase().ends_with(".pdf") {
            pdfs.insert(name, content);
        } else {
            return Err(IngestFailure::NonPdfFile { entry: name });
        }
    }

    let metadata = metadata.ok_or(IngestFailure::MetadataNotFound)?;
    Ok(InnerArchive { metadata, pdfs })
}

// ---------------------------------------------------------------------------
// Metadata validation
// ---------------------------------------------------------------------------

/// Parse `metadata.json` against the envelope schema.
///
/// Unknown fields, missing required fields, and malformed timestamps all
/// surface as [`IngestFailure::MetadataSchema`] with the parser's report;
/// a bad per-item OCR blob is the more specific
/// [`IngestFailure::OcrDataParse`].
pub fn validate_metadata(bytes: &[u8]) -> Result<EnvelopeMetadata, IngestFailure> {
    let metadata: EnvelopeMetadata =
        serde_json::from_slice(bytes).map_err(|e| IngestFailure::MetadataSchema {
            report: e.to_string(),
        })?;

    // OCR blobs are opaque to the schema; parse them separately so the
    // failure names the offending item.
    for item in &metadata.scannable_items {
        if let Some(encoded) = &item.ocr_data {
            OcrData::from_base64(encoded).map_err(|e| IngestFailure::OcrDataParse {
                document_control_number: item.document_control_number.clone(),
                reason: e.to_string(),
            })?;
        }
    }
    Ok(metadata)
}

// ---------------------------------------------------------------------------
// Envelope builder
// ---------------------------------------------------------------------------

/// Cross-check the archive's PDF set against the metadata and normalize
/// into an unsaved [`Envelope`].
///
/// The multiset of PDF entry names must equal the multiset of declared
/// `file_name`s; the declared jurisdiction must agree (case-insensitively)
/// with the container's configured jurisdiction. Timestamps are truncated
/// to whole milliseconds and absent collections become empty vectors.
pub fn build_envelope(
    container: &str,
    zip_file_name: &str,
    expected_jurisdiction: &str,
    metadata: &EnvelopeMetadata,
    pdf_names: impl IntoIterator<Item = impl AsRef<str>>,
) -> Result<Envelope, IngestFailure> {
    check_filenames(metadata, pdf_names)?;

    if !metadata
        .jurisdiction
        .eq_ignore_ascii_case(expected_jurisdiction)
    {
        return Err(IngestFailure::JurisdictionMismatch {
            container: container.to_string(),
            declared: metadata.jurisdiction.clone(),
            expected: expected_jurisdiction.to_string(),
        });
    }

    let exception_record =
        metadata.envelope_classification == Classification::Exception;

    let scannable_items = metadata
        .scannable_items
        .iter()
        .map(|item| {
            let ocr_data = match &item.ocr_data {
                // Validated above; a decode failure here is unreachable.
                Some(encoded) => Some(OcrData::from_base64(encoded).map_err(|e| {
                    IngestFailure::OcrDataParse {
                        document_control_number: item.document_control_number.clone(),
                        reason: e.to_string(),
                    }
                })?),
                None => None,
            };
            Ok(ScannableItem {
                id: Uuid::new_v4(),
                document_control_number: item.document_control_number.clone(),
                file_name: item.file_name.clone(),
                scanning_date: millis(item.scanning_date),
                ocr_accuracy: item.ocr_accuracy.clone(),
                ocr_data,
                exception_record,
                document_type: item.document_type.clone(),
                document_sub_type: item.document_sub_type.clone(),
                notes: item.notes.clone(),
                document_url: None,
            })
        })
        .collect::<Result<Vec<_>, IngestFailure>>()?;

    let payments = metadata
        .payments
        .iter()
        .map(|p| Payment {
            id: Uuid::new_v4(),
            document_control_number: p.document_control_number.clone(),
            method: p.method.clone(),
            amount: p.amount,
            currency: p.currency.clone(),
        })
        .collect();

    let non_scannable_items = metadata
        .non_scannable_items
        .iter()
        .map(|n| NonScannableItem {
            id: Uuid::new_v4(),
            document_control_number: n.document_control_number.clone(),
            item_type: n.item_type.clone(),
            notes: n.notes.clone(),
        })
        .collect();

    Ok(Envelope {
        id: Uuid::new_v4(),
        container: container.to_string(),
        jurisdiction: metadata.jurisdiction.clone(),
        case_number: metadata.case_number.clone(),
        po_box: metadata.po_box.clone(),
        classification: metadata.envelope_classification,
        delivery_date: millis(metadata.delivery_date),
        opening_date: millis(metadata.opening_date),
        zip_file_created_date: millis(metadata.zip_file_createddate),
        zip_file_name: zip_file_name.to_string(),
        status: Status::Created,
        upload_failure_count: 0,
        zip_deleted: false,
        created_at: Utc::now(),
        ccd_id: None,
        ccd_action: None,
        scannable_items,
        payments,
        non_scannable_items,
    })
}

/// Full validation of a verified inner archive: parse, schema-check, and
/// build. Returns the unsaved envelope together with the extracted PDFs.
pub fn assemble(
    container: &str,
    zip_file_name: &str,
    expected_jurisdiction: &str,
    inner_bytes: &[u8],
) -> Result<(Envelope, BTreeMap<String, Vec<u8>>), IngestFailure> {
    let inner = parse_inner_archive(inner_bytes)?;
    let metadata = validate_metadata(&inner.metadata)?;
    let envelope = build_envelope(
        container,
        zip_file_name,
        expected_jurisdiction,
        &metadata,
        inner.pdfs.keys(),
    )?;
    Ok((envelope, inner.pdfs))
}

fn millis(ts: DateTime<Utc>) -> DateTime<Utc> {
    // Truncation cannot fail for a 1 ms granule.
    ts.duration_trunc(TimeDelta::milliseconds(1)).unwrap_or(ts)
}

fn check_filenames(
    metadata: &EnvelopeMetadata,
    pdf_names: impl IntoIterator<Item = impl AsRef<str>>,
) -> Result<(), IngestFailure> {
    let mut declared: BTreeMap<String, i64> = BTreeMap::new();
    for item in &metadata.scannable_items {
        *declared.entry(item.file_name.clone()).or_default() += 1;
    }
    // Subtract the archive's multiset from the declared one.
    let mut balance = declared;
    for name in pdf_names {
        *balance.entry(name.as_ref().to_string()).or_default() -= 1;
    }

    let missing: Vec<String> = balance
        .iter()
        .filter(|(_, n)| **n > 0)
        .map(|(name, _)| name.clone())
        .collect();
    let extra: Vec<String> = balance
        .iter()
        .filter(|(_, n)| **n < 0)
        .map(|(name, _)| name.clone())
        .collect();

    if missing.is_empty() && extra.is_empty() {
        Ok(())
    } else {
        Err(IngestFailure::FileNameIrregularity { missing, extra })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
