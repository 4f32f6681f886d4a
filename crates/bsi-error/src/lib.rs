// SPDX-License-Identifier: MIT OR Apache-2.0
//! bsi-error
#![deny(unsafe_code)]
#![warn(missing_docs)]
//!
//! Classified per-archive failures and the stable outward error codes
//! surfaced on the notification bus.
//!
//! Validators and the verifier raise [`IngestFailure`] locally; the
//! ingestion coordinator is the sole sink that turns a failure into an
//! event, a notification, and (for terminal failures) a move to the
//! rejected container. Nothing escapes the per-archive boundary.

use bsi_core::EventKind;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// IngestFailure
// ---------------------------------------------------------------------------

/// A classified failure raised while processing one archive.
#[derive(Debug, Clone, thiserror::Error)]
pub enum IngestFailure {
    /// Outer-archive signature verification failed.
    #[error("signature verification failed: {reason}")]
    Signature {
        /// Human-readable cause (wrong entries, verification false, bad key).
        reason: String,
    },

    /// The inner archive has no `metadata.json` entry.
    #[error("metadata.json not found in inner archive")]
    MetadataNotFound,

    /// `metadata.json` violated the envelope schema.
    #[error("metadata schema violation: {report}")]
    MetadataSchema {
        /// Processing report from the parser.
        report: String,
    },

    /// The inner archive contains an entry that is neither `metadata.json`
    /// nor a PDF.
    #[error("non-pdf entry in inner archive: {entry}")]
    NonPdfFile {
        /// Offending entry name.
        entry: String,
    },

    /// The PDF entries and the declared scannable-item filenames disagree.
    #[error("{}", filename_irregularity_message(.missing, .extra))]
    FileNameIrregularity {
        /// Declared in metadata but absent from the archive. Sorted.
        missing: Vec<String>,
        /// Present in the archive but undeclared. Sorted.
        extra: Vec<String>,
    },

    /// A scannable item's OCR blob could not be decoded or parsed.
    #[error("ocr data parse failure for {document_control_number}: {reason}")]
    OcrDataParse {
        /// Control number of the offending item.
        document_control_number: String,
        /// Decode/parse error detail.
        reason: String,
    },

    /// Declared jurisdiction disagrees with the container mapping.
    #[error("jurisdiction {declared:?} does not match container {container:?} ({expected:?})")]
    JurisdictionMismatch {
        /// Container the archive arrived in.
        container: String,
        /// Jurisdiction declared in metadata.
        declared: String,
        /// Jurisdiction configured for the container.
        expected: String,
    },

    /// Retryable infrastructure failure (blob I/O, bus, downstream RPC).
    /// The archive stays in place and the next tick retries.
    #[error("transient failure: {reason}")]
    Transient {
        /// What went wrong.
        reason: String,
    },

    /// Anything not classified above. The archive is left in place for
    /// operator inspection.
    #[error("unclassified failure: {reason}")]
    Unclassified {
        /// What went wrong.
        reason: String,
    },
}

fn filename_irregularity_message(missing: &[String], extra: &[String]) -> String {
    let mut parts = Vec::new();
    if !missing.is_empty() {
        parts.push(format!("Missing PDFs: {}", missing.join(", ")));
    }
    if !extra.is_empty() {
        parts.push(format!("Extra PDFs: {}", extra.join(", ")));
    }
    parts.join("; ")
}

impl IngestFailure {
    /// The audit event this failure produces, if any.
    ///
    /// Transient failures produce no event; the blob simply remains for the
    /// next tick.
    pub fn event_kind(&self) -> Option<EventKind> {
        match self {
            Self::Signature { .. } => Some(EventKind::DocSignatureFailure),
            Self::MetadataNotFound
            | Self::MetadataSchema { .. }
            | Self::NonPdfFile { .. }
            | Self::FileNameIrregularity { .. }
            | Self::OcrDataParse { .. }
            | Self::JurisdictionMismatch { .. } => Some(EventKind::FileValidationFailure),
            Self::Transient { .. } => None,
            Self::Unclassified { .. } => Some(EventKind::DocFailure),
        }
    }

    /// `true` when the failure is terminal: the archive is moved to the
    /// rejected container and a notification is emitted.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Transient { .. } | Self::Unclassified { .. })
    }
}

// ---------------------------------------------------------------------------
// ErrorCode
// ---------------------------------------------------------------------------

/// Stable outward error code published on the notification bus.
///
/// Serialises to a `SCREAMING_SNAKE_CASE` string that does not change
/// across releases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Signature verification failed.
    ErrSigVerifyFailed,
    /// `metadata.json` was missing, malformed, or carried bad OCR data.
    ErrMetafileInvalid,
    /// Archive content was inconsistent (file set, entry types, routing).
    ErrZipProcessingFailed,
}

impl ErrorCode {
    /// Outward code for a classified failure. Non-terminal failures have no
    /// outward code; they are never published.
    pub fn for_failure(failure: &IngestFailure) -> Option<Self> {
        match failure {
            IngestFailure::Signature { .. } => Some(Self::ErrSigVerifyFailed),
            IngestFailure::MetadataNotFound
            | IngestFailure::MetadataSchema { .. }
            | IngestFailure::OcrDataParse { .. } => Some(Self::ErrMetafileInvalid),
            IngestFailure::NonPdfFile { .. }
            | IngestFailure::FileNameIrregularity { .. }
            | IngestFailure::JurisdictionMismatch { .. } => Some(Self::ErrZipProcessingFailed),
            IngestFailure::Transient { .. } | IngestFailure::Unclassified { .. } => None,
        }
    }

    /// Stable `&'static str` representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ErrSigVerifyFailed => "ERR_SIG_VERIFY_FAILED",
            Self::ErrMetafileInvalid => "ERR_METAFILE_INVALID",
            Self::ErrZipProcessingFailed => "ERR_ZIP_PROCESSING_FAILED",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
