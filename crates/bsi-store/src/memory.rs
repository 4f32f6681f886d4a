// SPDX-License-Identifier: MIT OR Apache-2.0
//! In-memory [`EnvelopeStore`].
//!
//! One `Mutex` guards both tables, which gives the two properties the
//! contract demands for free: an event append and its status update are a
//! single commit, and concurrent transition attempts on one envelope
//! serialize.

use crate::{EnvelopeStore, MIN_DCN_LENGTH, StoreError};
use async_trait::async_trait;
use bsi_core::{Envelope, EventKind, ProcessEvent, Status};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Default)]
struct Inner {
    envelopes: BTreeMap<Uuid, Envelope>,
    events: Vec<ProcessEvent>,
}

/// In-memory store for tests and embedded deployments.
#[derive(Debug, Clone, Default)]
pub struct MemoryEnvelopeStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryEnvelopeStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of envelopes, any status.
    pub async fn len(&self) -> usize {
        self.inner.lock().await.envelopes.len()
    }

    /// `true` when the store holds no envelopes.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    fn apply_transition(
        envelope: &mut Envelope,
        event: EventKind,
        reason: Option<String>,
    ) -> Result<ProcessEvent, StoreError> {
        if envelope.zip_deleted {
            return Err(StoreError::ZipAlreadyDeleted { id: envelope.id });
        }
        let row = ProcessEvent {
            id: Uuid::new_v4(),
            envelope_id: Some(envelope.id),
            container: envelope.container.clone(),
            zip_file_name: envelope.zip_file_name.clone(),
            event,
            created_at: Utc::now(),
            reason,
        };
        if let Some(next) = event.status() {
            if !envelope.status.can_transition_to(next) {
                return Err(StoreError::InvalidTransition {
                    from: envelope.status,
                    to: next,
                });
            }
            envelope.status = next;
        }
        if event == EventKind::DocUploadFailure {
            envelope.upload_failure_count += 1;
        }
        Ok(row)
    }
}

#[async_trait]
impl EnvelopeStore for MemoryEnvelopeStore {
    async fn create(&self, envelope: Envelope) -> Result<Envelope, StoreError> {
        let mut inner = self.inner.lock().await;
        if envelope.status != Status::Created {
            return Err(StoreError::InvalidTransition {
                from: envelope.status,
                to: Status::Created,
            });
        }
        let duplicate = inner.envelopes.values().any(|e| {
            e.container == envelope.container && e.zip_file_name == envelope.zip_file_name
        });
        if duplicate {
            return Err(StoreError::Duplicate {
                container: envelope.container.clone(),
                zip_file_name: envelope.zip_file_name.clone(),
            });
        }
        // Row insert and first event are one commit under the lock.
        let event = ProcessEvent {
            id: Uuid::new_v4(),
            envelope_id: Some(envelope.id),
            container: envelope.container.clone(),
            zip_file_name: envelope.zip_file_name.clone(),
            event: EventKind::ZipfileProcessingStarted,
            created_at: Utc::now(),
            reason: None,
        };
        inner.events.push(event);
        inner.envelopes.insert(envelope.id, envelope.clone());
        debug!(target: "bsi.store", id = %envelope.id, zip = %envelope.zip_file_name, "envelope created");
        Ok(envelope)
    }

    async fn get(&self, id: Uuid) -> Result<Envelope, StoreError> {
        let inner = self.inner.lock().await;
        inner
            .envelopes
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound { id })
    }

    async fn find_by_container_and_filename(
        &self,
        container: &str,
        zip_file_name: &str,
    ) -> Result<Option<Envelope>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .envelopes
            .values()
            .find(|e| e.container == container && e.zip_file_name == zip_file_name)
            .cloned())
    }

    async fn find_by_dcn(&self, dcn: &str) -> Result<Vec<Envelope>, StoreError> {
        if dcn.len() < MIN_DCN_LENGTH {
            return Err(StoreError::DcnTooShort { dcn: dcn.to_string() });
        }
        let inner = self.inner.lock().await;
        Ok(inner
            .envelopes
            .values()
            .filter(|e| {
                e.scannable_items
                    .iter()
                    .any(|item| item.document_control_number == dcn)
            })
            .cloned()
            .collect())
    }

    async fn find_upload_candidates(
        &self,
        max_failures: u32,
    ) -> Result<Vec<Envelope>, StoreError> {
        let inner = self.inner.lock().await;
        let mut candidates: Vec<Envelope> = inner
            .envelopes
            .values()
            .filter(|e| {
                matches!(e.status, Status::Created | Status::UploadFailure)
                    && e.upload_failure_count < max_failures
            })
            .cloned()
            .collect();
        // FIFO fairness.
        candidates.sort_by_key(|e| e.created_at);
        Ok(candidates)
    }

    async fn find_sweep_candidates(
        &self,
        older_than: DateTime<Utc>,
    ) -> Result<Vec<Envelope>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .envelopes
            .values()
            .filter(|e| e.status.blob_deletable() && !e.zip_deleted && e.created_at <= older_than)
            .cloned()
            .collect())
    }

    async fn find_stale(&self, older_than: DateTime<Utc>) -> Result<Vec<Envelope>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .envelopes
            .values()
            .filter(|e| e.status != Status::Consumed && e.created_at <= older_than)
            .cloned()
            .collect())
    }

    async fn transition(
        &self,
        id: Uuid,
        event: EventKind,
        reason: Option<String>,
    ) -> Result<ProcessEvent, StoreError> {
        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;
        let envelope = inner
            .envelopes
            .get_mut(&id)
            .ok_or(StoreError::NotFound { id })?;
        let row = Self::apply_transition(envelope, event, reason)?;
        debug!(target: "bsi.store", %id, event = %event, status = %envelope.status, "transition");
        inner.events.push(row.clone());
        Ok(row)
    }

    async fn record_event(&self, event: ProcessEvent) -> Result<ProcessEvent, StoreError> {
        let mut inner = self.inner.lock().await;
        inner.events.push(event.clone());
        Ok(event)
    }

    async fn set_document_urls(
        &self,
        id: Uuid,
        urls: &BTreeMap<String, String>,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        let envelope = inner
            .envelopes
            .get_mut(&id)
            .ok_or(StoreError::NotFound { id })?;
        for item in &mut envelope.scannable_items {
            if let Some(url) = urls.get(&item.file_name) {
                item.document_url = Some(url.clone());
            }
        }
        Ok(())
    }

    async fn mark_zip_deleted(&self, id: Uuid) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        let envelope = inner
            .envelopes
            .get_mut(&id)
            .ok_or(StoreError::NotFound { id })?;
        if !envelope.status.blob_deletable() {
            return Err(StoreError::BlobNotDeletable {
                id,
                status: envelope.status,
            });
        }
        envelope.zip_deleted = true;
        Ok(())
    }

    async fn confirm(
        &self,
        id: Uuid,
        ccd_id: &str,
        ccd_action: &str,
    ) -> Result<ProcessEvent, StoreError> {
        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;
        let envelope = inner
            .envelopes
            .get_mut(&id)
            .ok_or(StoreError::NotFound { id })?;
        let row = Self::apply_transition(envelope, EventKind::DocConsumed, None)?;
        envelope.ccd_id = Some(ccd_id.to_string());
        envelope.ccd_action = Some(ccd_action.to_string());
        inner.events.push(row.clone());
        Ok(row)
    }

    async fn events_for(&self, id: Uuid) -> Result<Vec<ProcessEvent>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .events
            .iter()
            .filter(|e| e.envelope_id == Some(id))
            .cloned()
            .collect())
    }

    async fn events_for_archive(
        &self,
        container: &str,
        zip_file_name: &str,
    ) -> Result<Vec<ProcessEvent>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .events
            .iter()
            .filter(|e| e.container == container && e.zip_file_name == zip_file_name)
            .cloned()
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
