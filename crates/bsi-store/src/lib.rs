// SPDX-License-Identifier: MIT OR Apache-2.0
//! bsi-store
#![deny(unsafe_code)]
#![warn(missing_docs)]
//!
//! Persistence for envelopes and their append-only process events.
//!
//! [`EnvelopeStore`] is the capability set the pipeline drivers consume;
//! any relational backend can implement it. The crate ships
//! [`MemoryEnvelopeStore`], which holds all rows behind one lock so that
//! every event append commits together with its status update and
//! concurrent transition attempts serialize: exactly one wins, losers
//! observe the updated row and error.

/// In-memory store implementation.
pub mod memory;

pub use memory::MemoryEnvelopeStore;

use async_trait::async_trait;
use bsi_core::{Envelope, EventKind, ProcessEvent, Status};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Minimum length of a document control number accepted by lookups.
pub const MIN_DCN_LENGTH: usize = 6;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors surfaced by an [`EnvelopeStore`].
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// No envelope with the given id.
    #[error("envelope not found: {id}")]
    NotFound {
        /// Requested envelope id.
        id: Uuid,
    },

    /// A live envelope already exists for this `(container, zip_file_name)`.
    #[error("duplicate envelope for {container}/{zip_file_name}")]
    Duplicate {
        /// Container name.
        container: String,
        /// Archive filename.
        zip_file_name: String,
    },

    /// The requested edge is not in the state machine, or another writer
    /// already took a conflicting edge.
    #[error("invalid transition {from} -> {to}")]
    InvalidTransition {
        /// Status at the time of the attempt.
        from: Status,
        /// Status the event would induce.
        to: Status,
    },

    /// The envelope's archive is deleted; its lifecycle is frozen.
    #[error("envelope {id} is frozen: source archive already deleted")]
    ZipAlreadyDeleted {
        /// Envelope id.
        id: Uuid,
    },

    /// The blob may only be deleted from a processed status.
    #[error("blob of envelope {id} not deletable in status {status}")]
    BlobNotDeletable {
        /// Envelope id.
        id: Uuid,
        /// Current status.
        status: Status,
    },

    /// The supplied document control number is too short to query by.
    #[error("document control number {dcn:?} is shorter than {MIN_DCN_LENGTH} characters")]
    DcnTooShort {
        /// Rejected control number.
        dcn: String,
    },

    /// Backend failure (connection loss, constraint violation, ...).
    #[error("store backend failure: {reason}")]
    Backend {
        /// Backend detail.
        reason: String,
    },
}

// ---------------------------------------------------------------------------
// Store trait
// ---------------------------------------------------------------------------

/// Persistence capabilities consumed by the pipeline drivers.
#[async_trait]
pub trait EnvelopeStore: Send + Sync {
    /// Persist a freshly built envelope in `CREATED` together with its
    /// `ZIPFILE_PROCESSING_STARTED` event, in one commit.
    ///
    /// Fails with [`StoreError::Duplicate`] when a live envelope already
    /// exists for the same `(container, zip_file_name)`.
    async fn create(&self, envelope: Envelope) -> Result<Envelope, StoreError>;

    /// Fetch an envelope by id.
    async fn get(&self, id: Uuid) -> Result<Envelope, StoreError>;

    /// Idempotency lookup: the at-most-one live envelope for an archive.
    async fn find_by_container_and_filename(
        &self,
        container: &str,
        zip_file_name: &str,
    ) -> Result<Option<Envelope>, StoreError>;

    /// Envelopes owning a scannable item with the given control number.
    ///
    /// Control numbers shorter than [`MIN_DCN_LENGTH`] are rejected.
    async fn find_by_dcn(&self, dcn: &str) -> Result<Vec<Envelope>, StoreError>;

    /// Upload queue: envelopes in `CREATED` or `UPLOAD_FAILURE` with a
    /// failure count below `max_failures`, oldest first.
    async fn find_upload_candidates(&self, max_failures: u32)
    -> Result<Vec<Envelope>, StoreError>;

    /// Sweep queue: envelopes in a processed status whose archive is still
    /// present and whose creation predates `older_than`.
    async fn find_sweep_candidates(
        &self,
        older_than: DateTime<Utc>,
    ) -> Result<Vec<Envelope>, StoreError>;

    /// Envelopes still mid-lifecycle that predate `older_than`. Feeds the
    /// out-of-band stale reporting.
    async fn find_stale(&self, older_than: DateTime<Utc>) -> Result<Vec<Envelope>, StoreError>;

    /// Atomically append an event and apply the status it induces.
    ///
    /// `DOC_UPLOAD_FAILURE` additionally increments the failure counter.
    /// Concurrent attempts on one envelope serialize; exactly one takes a
    /// given edge.
    async fn transition(
        &self,
        id: Uuid,
        event: EventKind,
        reason: Option<String>,
    ) -> Result<ProcessEvent, StoreError>;

    /// Append an event that has no envelope row (validation and signature
    /// failures, which never create one).
    async fn record_event(&self, event: ProcessEvent) -> Result<ProcessEvent, StoreError>;

    /// Record the durable URLs returned by the document store, keyed by
    /// scannable-item filename. Unmatched filenames are ignored.
    async fn set_document_urls(
        &self,
        id: Uuid,
        urls: &BTreeMap<String, String>,
    ) -> Result<(), StoreError>;

    /// Flag the source archive as deleted. Only legal in a processed
    /// status; afterwards the envelope is frozen.
    async fn mark_zip_deleted(&self, id: Uuid) -> Result<(), StoreError>;

    /// Downstream confirmation: record the CCD outcome and take the
    /// `DOC_CONSUMED` edge.
    async fn confirm(
        &self,
        id: Uuid,
        ccd_id: &str,
        ccd_action: &str,
    ) -> Result<ProcessEvent, StoreError>;

    /// All events for an envelope, in commit order.
    async fn events_for(&self, id: Uuid) -> Result<Vec<ProcessEvent>, StoreError>;

    /// All events for an archive, including pre-envelope ones.
    async fn events_for_archive(
        &self,
        container: &str,
        zip_file_name: &str,
    ) -> Result<Vec<ProcessEvent>, StoreError>;
}
