// SPDX-License-Identifier: MIT OR Apache-2.0
//! bsi-core
#![deny(unsafe_code)]
#![warn(missing_docs)]
//!
//! The stable contract for the bulk-scan ingestion pipeline: the envelope
//! data model, the lifecycle status/event tables, and the inbound metadata
//! schema.
//!
//! If you only take one dependency, take this one.

/// Inbound `metadata.json` schema and its tolerant timestamp handling.
pub mod metadata;
/// Event-log replay: derive an envelope's current row from its events.
pub mod replay;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Lifecycle status of an [`Envelope`].
///
/// Transitions are driven exclusively by status-inducing [`EventKind`]s; the
/// permitted edges live in [`Status::can_transition_to`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    /// Envelope persisted; PDFs not yet pushed to the document store.
    Created,
    /// All PDFs uploaded and their durable URLs recorded.
    Uploaded,
    /// The last upload attempt failed; eligible for retry below the cap.
    UploadFailure,
    /// Downstream processing finished.
    Processed,
    /// Downstream processed-notification emitted.
    NotificationSent,
    /// Downstream consumer confirmed reception. Final success state.
    Consumed,
    /// Terminal validation failure. No envelope row is ever created in
    /// this state; it exists for event classification only.
    MetadataFailure,
    /// Terminal signature failure. Event-only, like [`Status::MetadataFailure`].
    SignatureFailure,
}

impl Status {
    /// Stable `&'static str` form (e.g. `"UPLOAD_FAILURE"`).
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "CREATED",
            Self::Uploaded => "UPLOADED",
            Self::UploadFailure => "UPLOAD_FAILURE",
            Self::Processed => "PROCESSED",
            Self::NotificationSent => "NOTIFICATION_SENT",
            Self::Consumed => "CONSUMED",
            Self::MetadataFailure => "METADATA_FAILURE",
            Self::SignatureFailure => "SIGNATURE_FAILURE",
        }
    }

    /// Adjacency predicate of the envelope state machine.
    ///
    /// Terminal failure states and [`Status::Consumed`] have no outgoing
    /// edges. `UPLOAD_FAILURE → UPLOAD_FAILURE` is a legal self-edge (each
    /// traversal increments the failure counter).
    pub fn can_transition_to(&self, next: Status) -> bool {
        matches!(
            (self, next),
            (Self::Created, Status::Uploaded)
                | (Self::Created, Status::UploadFailure)
                | (Self::UploadFailure, Status::Uploaded)
                | (Self::UploadFailure, Status::UploadFailure)
                | (Self::Uploaded, Status::Processed)
                | (Self::Processed, Status::NotificationSent)
                | (Self::NotificationSent, Status::Consumed)
        )
    }

    /// `true` for the statuses in which the source archive may be deleted.
    pub fn blob_deletable(&self) -> bool {
        matches!(self, Self::Processed | Self::NotificationSent | Self::Consumed)
    }

    /// `true` for the event-only terminal failure states.
    pub fn is_terminal_failure(&self) -> bool {
        matches!(self, Self::MetadataFailure | Self::SignatureFailure)
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// EventKind
// ---------------------------------------------------------------------------

/// Kind of an append-only [`ProcessEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    /// A well-formed archive was accepted and its envelope persisted.
    ZipfileProcessingStarted,
    /// Metadata or content validation failed; archive moved to rejected.
    FileValidationFailure,
    /// Outer-archive signature verification failed; archive moved to rejected.
    DocSignatureFailure,
    /// All PDFs uploaded to the document store.
    DocUploaded,
    /// A PDF upload attempt failed.
    DocUploadFailure,
    /// Downstream processing completed.
    DocProcessed,
    /// Processed-notification was emitted downstream.
    DocProcessedNotificationSent,
    /// Downstream consumer confirmed reception.
    DocConsumed,
    /// Unclassified processing failure; archive left in place for inspection.
    DocFailure,
}

impl EventKind {
    /// Static total table from event kind to the status it induces.
    ///
    /// Every kind currently induces a status; the `Option` keeps the table
    /// total for future audit-only kinds.
    pub fn status(&self) -> Option<Status> {
        match self {
            Self::ZipfileProcessingStarted => Some(Status::Created),
            Self::FileValidationFailure | Self::DocFailure => Some(Status::MetadataFailure),
            Self::DocSignatureFailure => Some(Status::SignatureFailure),
            Self::DocUploaded => Some(Status::Uploaded),
            Self::DocUploadFailure => Some(Status::UploadFailure),
            Self::DocProcessed => Some(Status::Processed),
            Self::DocProcessedNotificationSent => Some(Status::NotificationSent),
            Self::DocConsumed => Some(Status::Consumed),
        }
    }

    /// Stable `&'static str` form (e.g. `"DOC_UPLOAD_FAILURE"`).
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ZipfileProcessingStarted => "ZIPFILE_PROCESSING_STARTED",
            Self::FileValidationFailure => "FILE_VALIDATION_FAILURE",
            Self::DocSignatureFailure => "DOC_SIGNATURE_FAILURE",
            Self::DocUploaded => "DOC_UPLOADED",
            Self::DocUploadFailure => "DOC_UPLOAD_FAILURE",
            Self::DocProcessed => "DOC_PROCESSED",
            Self::DocProcessedNotificationSent => "DOC_PROCESSED_NOTIFICATION_SENT",
            Self::DocConsumed => "DOC_CONSUMED",
            Self::DocFailure => "DOC_FAILURE",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Classification
// ---------------------------------------------------------------------------

/// Declared classification of an inbound envelope.
///
/// Scanning bureaus emit the lowercase spellings; both forms deserialize.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Classification {
    /// A fresh application; downstream opens a new case.
    #[serde(alias = "new_application")]
    NewApplication,
    /// Additional evidence attached to an existing case.
    #[serde(alias = "supplementary_evidence")]
    SupplementaryEvidence,
    /// Requires manual operator handling.
    #[serde(alias = "exception")]
    Exception,
    /// Supplementary evidence whose OCR output must be forwarded.
    #[serde(alias = "supplementary_evidence_with_ocr")]
    SupplementaryEvidenceWithOcr,
}

// ---------------------------------------------------------------------------
// Persisted entities
// ---------------------------------------------------------------------------

/// The unit of work: one archive's normalized contents and lifecycle.
///
/// The row persists for audit after the source archive is deleted; only the
/// blob is removed at the end of the lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Envelope {
    /// Opaque identifier.
    pub id: Uuid,
    /// Input container the archive arrived in.
    pub container: String,
    /// Jurisdiction short code (e.g. `divorce`, `probate`).
    pub jurisdiction: String,
    /// Case number, when the bureau supplied one.
    pub case_number: Option<String>,
    /// P.O. box the post was delivered to.
    pub po_box: String,
    /// Declared classification.
    pub classification: Classification,
    /// When the post was delivered to the bureau.
    pub delivery_date: DateTime<Utc>,
    /// When the envelope was opened.
    pub opening_date: DateTime<Utc>,
    /// When the bureau created the archive.
    pub zip_file_created_date: DateTime<Utc>,
    /// Source archive filename.
    pub zip_file_name: String,
    /// Current lifecycle status.
    pub status: Status,
    /// Count of `DOC_UPLOAD_FAILURE` events. Monotonically non-decreasing.
    pub upload_failure_count: u32,
    /// `true` once the source archive has been deleted. Final.
    pub zip_deleted: bool,
    /// When this row was persisted.
    pub created_at: DateTime<Utc>,
    /// Downstream case id, set by the consumer's confirmation.
    pub ccd_id: Option<String>,
    /// Downstream action taken, set by the consumer's confirmation.
    pub ccd_action: Option<String>,
    /// Scanned documents, one per PDF in the archive.
    pub scannable_items: Vec<ScannableItem>,
    /// Declared payments. Descriptive only.
    pub payments: Vec<Payment>,
    /// Declared non-scannable items. Descriptive only.
    pub non_scannable_items: Vec<NonScannableItem>,
}

/// One scanned document (PDF) and its scanning metadata.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ScannableItem {
    /// Identifier of this document row.
    pub id: Uuid,
    /// Bureau-assigned document control number.
    pub document_control_number: String,
    /// PDF filename inside the inner archive.
    pub file_name: String,
    /// When the page set was scanned.
    pub scanning_date: DateTime<Utc>,
    /// Bureau-reported OCR accuracy, verbatim.
    pub ocr_accuracy: Option<String>,
    /// Parsed OCR key/value output, when present.
    pub ocr_data: Option<metadata::OcrData>,
    /// `true` when the envelope was classified as an exception record.
    pub exception_record: bool,
    /// Declared document type.
    pub document_type: Option<String>,
    /// Declared document sub-type.
    pub document_sub_type: Option<String>,
    /// Free-text bureau notes.
    pub notes: Option<String>,
    /// Durable document-store URL, filled by the uploader.
    pub document_url: Option<String>,
}

/// A payment declared in the envelope metadata.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Payment {
    /// Identifier of this payment row.
    pub id: Uuid,
    /// Control number of the payment slip.
    pub document_control_number: String,
    /// Payment method (cheque, postal order, ...).
    pub method: Option<String>,
    /// Declared amount.
    pub amount: Option<f64>,
    /// ISO currency code.
    pub currency: Option<String>,
}

/// A physical item that could not be scanned (e.g. a cheque book).
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct NonScannableItem {
    /// Identifier of this item row.
    pub id: Uuid,
    /// Control number assigned to the item.
    pub document_control_number: String,
    /// Declared item type.
    pub item_type: Option<String>,
    /// Free-text bureau notes.
    pub notes: Option<String>,
}

/// Append-only audit row.
///
/// `envelope_id` is present for events recorded after envelope creation;
/// earlier events (`ZIPFILE_PROCESSING_STARTED` failures, validation
/// rejections) carry only the `(container, zip_file_name)` pair.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ProcessEvent {
    /// Identifier of this event row.
    pub id: Uuid,
    /// Envelope the event belongs to, when one exists.
    pub envelope_id: Option<Uuid>,
    /// Input container.
    pub container: String,
    /// Source archive filename.
    pub zip_file_name: String,
    /// Event kind.
    pub event: EventKind,
    /// When the event was recorded.
    pub created_at: DateTime<Utc>,
    /// Optional free-text reason.
    pub reason: Option<String>,
}

impl ProcessEvent {
    /// Build an event for an archive with no envelope row yet.
    pub fn pre_envelope(
        container: impl Into<String>,
        zip_file_name: impl Into<String>,
        event: EventKind,
        reason: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            envelope_id: None,
            container: container.into(),
            zip_file_name: zip_file_name.into(),
            event,
            created_at: Utc::now(),
            reason,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_STATUSES: &[Status] = &[
        Status::Created,
        Status::Uploaded,
        Status::UploadFailure,
        Status::Processed,
        Status::NotificationSent,
        Status::Consumed,
        Status::MetadataFailure,
        Status::SignatureFailure,
    ];

    const ALL_EVENTS: &[EventKind] = &[
        EventKind::ZipfileProcessingStarted,
        EventKind::FileValidationFailure,
        EventKind::DocSignatureFailure,
        EventKind::DocUploaded,
        EventKind::DocUploadFailure,
        EventKind::DocProcessed,
        EventKind::DocProcessedNotificationSent,
        EventKind::DocConsumed,
        EventKind::DocFailure,
    ];

    #[test]
    fn happy_path_is_a_chain() {
        let path = [
            Status::Created,
            Status::Uploaded,
            Status::Processed,
            Status::NotificationSent,
            Status::Consumed,
        ];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{} -> {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn upload_failure_retry_edges() {
        assert!(Status::Created.can_transition_to(Status::UploadFailure));
        assert!(Status::UploadFailure.can_transition_to(Status::Uploaded));
        assert!(Status::UploadFailure.can_transition_to(Status::UploadFailure));
    }

    #[test]
    fn consumed_and_failures_are_sinks() {
        for from in [Status::Consumed, Status::MetadataFailure, Status::SignatureFailure] {
            for to in ALL_STATUSES {
                assert!(!from.can_transition_to(*to), "{from} must not reach {to}");
            }
        }
    }

    #[test]
    fn no_skipping_upload() {
        assert!(!Status::Created.can_transition_to(Status::Processed));
        assert!(!Status::Created.can_transition_to(Status::Consumed));
        assert!(!Status::Uploaded.can_transition_to(Status::NotificationSent));
    }

    #[test]
    fn event_status_table_is_total() {
        for ev in ALL_EVENTS {
            assert!(ev.status().is_some(), "{ev} must map to a status");
        }
    }

    #[test]
    fn failure_events_map_to_terminal_states() {
        assert_eq!(
            EventKind::FileValidationFailure.status(),
            Some(Status::MetadataFailure)
        );
        assert_eq!(EventKind::DocFailure.status(), Some(Status::MetadataFailure));
        assert_eq!(
            EventKind::DocSignatureFailure.status(),
            Some(Status::SignatureFailure)
        );
        assert!(Status::MetadataFailure.is_terminal_failure());
        assert!(Status::SignatureFailure.is_terminal_failure());
    }

    #[test]
    fn blob_deletable_set() {
        let deletable: Vec<_> = ALL_STATUSES.iter().filter(|s| s.blob_deletable()).collect();
        assert_eq!(
            deletable,
            vec![&Status::Processed, &Status::NotificationSent, &Status::Consumed]
        );
    }

    #[test]
    fn status_serde_screaming_snake() {
        let json = serde_json::to_string(&Status::NotificationSent).unwrap();
        assert_eq!(json, r#""NOTIFICATION_SENT""#);
        let back: Status = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Status::NotificationSent);
    }

    #[test]
    fn event_serde_matches_as_str() {
        for ev in ALL_EVENTS {
            let json = serde_json::to_string(ev).unwrap();
            assert_eq!(json, format!(r#""{}""#, ev.as_str()));
        }
    }

    #[test]
    fn classification_accepts_both_spellings() {
        let upper: Classification = serde_json::from_str(r#""NEW_APPLICATION""#).unwrap();
        let lower: Classification = serde_json::from_str(r#""new_application""#).unwrap();
        assert_eq!(upper, Classification::NewApplication);
        assert_eq!(lower, Classification::NewApplication);

        let ocr: Classification =
            serde_json::from_str(r#""supplementary_evidence_with_ocr""#).unwrap();
        assert_eq!(ocr, Classification::SupplementaryEvidenceWithOcr);
    }

    #[test]
    fn unique_status_strings() {
        let mut seen = std::collections::HashSet::new();
        for s in ALL_STATUSES {
            assert!(seen.insert(s.as_str()));
        }
    }
}
