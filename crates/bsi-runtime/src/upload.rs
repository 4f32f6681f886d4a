// SPDX-License-Identifier: MIT OR Apache-2.0
//! The document uploader.
//!
//! Each tick drains the upload queue: envelopes in `CREATED` or
//! `UPLOAD_FAILURE` whose failure count is below the cap, oldest first.
//! The source archive is re-leased and re-extracted per envelope so
//! decoded bytes never outlive a single envelope's work. The document
//! store dedups by filename within an envelope, so a retried PUT is safe.

use bsi_blob::{BlobError, BlobGateway, Lease};
use bsi_config::IngestConfig;
use bsi_core::{Envelope, EventKind};
use bsi_docstore::{DocumentClient, Pdf};
use bsi_envelope::parse_inner_archive;
use bsi_store::EnvelopeStore;
use bsi_verify::{ArchiveContext, ZipVerifier};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Outcome counters for one uploader invocation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UploadSummary {
    /// Envelopes advanced to `UPLOADED`.
    pub uploaded: usize,
    /// Envelopes moved (back) to `UPLOAD_FAILURE`.
    pub failed: usize,
    /// Envelopes skipped this tick (lease busy, transient I/O).
    pub deferred: usize,
}

enum Outcome {
    Uploaded,
    Failed,
    Deferred,
}

/// Scheduled driver that pushes envelope PDFs to the document store.
pub struct DocumentUploader {
    gateway: Arc<dyn BlobGateway>,
    store: Arc<dyn EnvelopeStore>,
    verifier: Arc<ZipVerifier>,
    documents: Arc<dyn DocumentClient>,
    config: Arc<IngestConfig>,
}

impl DocumentUploader {
    /// Wire an uploader over its collaborators.
    pub fn new(
        gateway: Arc<dyn BlobGateway>,
        store: Arc<dyn EnvelopeStore>,
        verifier: Arc<ZipVerifier>,
        documents: Arc<dyn DocumentClient>,
        config: Arc<IngestConfig>,
    ) -> Self {
        Self {
            gateway,
            store,
            verifier,
            documents,
            config,
        }
    }

    /// Drain the upload queue once.
    pub async fn run_once(&self) -> UploadSummary {
        let mut summary = UploadSummary::default();
        let candidates = match self
            .store
            .find_upload_candidates(self.config.max_upload_failures)
            .await
        {
            Ok(c) => c,
            Err(e) => {
                warn!(target: "bsi.upload", error = %e, "candidate query failed");
                return summary;
            }
        };

        for envelope in candidates {
            match self.upload_one(&envelope).await {
                Outcome::Uploaded => summary.uploaded += 1,
                Outcome::Failed => summary.failed += 1,
                Outcome::Deferred => summary.deferred += 1,
            }
        }

        info!(
            target: "bsi.upload",
            uploaded = summary.uploaded,
            failed = summary.failed,
            deferred = summary.deferred,
            "upload tick complete"
        );
        summary
    }

    async fn upload_one(&self, envelope: &Envelope) -> Outcome {
        let ttl = Duration::from_secs(self.config.lease_ttl_seconds);
        let lease = match self
            .gateway
            .acquire_lease(&envelope.container, &envelope.zip_file_name, ttl)
            .await
        {
            Ok(Some(lease)) => lease,
            Ok(None) => {
                debug!(
                    target: "bsi.upload",
                    id = %envelope.id,
                    zip = %envelope.zip_file_name,
                    "archive busy"
                );
                return Outcome::Deferred;
            }
            Err(BlobError::NotFound { .. }) => {
                // The source archive is gone; record the failure so the
                // envelope surfaces to operators once the cap is reached.
                return self
                    .record_failure(envelope, "source archive missing".to_string())
                    .await;
            }
            Err(e) => {
                warn!(target: "bsi.upload", id = %envelope.id, error = %e, "lease acquisition failed");
                return Outcome::Deferred;
            }
        };

        let outcome = self.upload_under_lease(envelope, &lease).await;
        let _ = self.gateway.release_lease(&lease).await;
        outcome
    }

    async fn upload_under_lease(&self, envelope: &Envelope, lease: &Lease) -> Outcome {
        let outer = match self.gateway.read(lease).await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(target: "bsi.upload", id = %envelope.id, error = %e, "archive read failed");
                return Outcome::Deferred;
            }
        };

        // Re-extract rather than caching: memory stays bounded by one
        // archive, and the bytes are re-verified on every attempt.
        let ctx = ArchiveContext {
            container: &envelope.container,
            zip_file_name: &envelope.zip_file_name,
        };
        let inner_bytes = match self.verifier.verify(ctx, &outer) {
            Ok(bytes) => bytes,
            Err(e) => return self.record_failure(envelope, e.to_string()).await,
        };
        let inner = match parse_inner_archive(&inner_bytes) {
            Ok(inner) => inner,
            Err(e) => return self.record_failure(envelope, e.to_string()).await,
        };

        let pdfs: Vec<Pdf> = inner
            .pdfs
            .into_iter()
            .map(|(file_name, content)| Pdf { file_name, content })
            .collect();

        match self.documents.upload(pdfs).await {
            Ok(urls) => {
                if let Err(e) = self.store.set_document_urls(envelope.id, &urls).await {
                    warn!(target: "bsi.upload", id = %envelope.id, error = %e, "url update failed");
                    return Outcome::Deferred;
                }
                match self
                    .store
                    .transition(envelope.id, EventKind::DocUploaded, None)
                    .await
                {
                    Ok(_) => {
                        info!(
                            target: "bsi.upload",
                            id = %envelope.id,
                            zip = %envelope.zip_file_name,
                            "documents uploaded"
                        );
                        Outcome::Uploaded
                    }
                    Err(e) => {
                        warn!(target: "bsi.upload", id = %envelope.id, error = %e, "transition failed");
                        Outcome::Deferred
                    }
                }
            }
            Err(e) => self.record_failure(envelope, e.to_string()).await,
        }
    }

    async fn record_failure(&self, envelope: &Envelope, reason: String) -> Outcome {
        match self
            .store
            .transition(envelope.id, EventKind::DocUploadFailure, Some(reason.clone()))
            .await
        {
            Ok(_) => {
                warn!(
                    target: "bsi.upload",
                    id = %envelope.id,
                    zip = %envelope.zip_file_name,
                    reason = %reason,
                    "upload failed"
                );
                Outcome::Failed
            }
            Err(e) => {
                warn!(target: "bsi.upload", id = %envelope.id, error = %e, "failure transition failed");
                Outcome::Deferred
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{test_config, unsigned_outer};
    use bsi_blob::MemoryBlobStore;
    use bsi_core::Status;
    use bsi_docstore::{DocUploadError, MockDocumentClient};
    use bsi_notify::{ErrorNotifier, MemoryNotificationBus};
    use bsi_store::MemoryEnvelopeStore;

    struct Fixture {
        gateway: Arc<MemoryBlobStore>,
        store: Arc<MemoryEnvelopeStore>,
        documents: Arc<MockDocumentClient>,
        uploader: DocumentUploader,
    }

    fn fixture() -> Fixture {
        let gateway = Arc::new(MemoryBlobStore::new(["bulkscan"]));
        let store = Arc::new(MemoryEnvelopeStore::new());
        let documents = Arc::new(MockDocumentClient::new());
        let config = Arc::new(test_config());
        let uploader = DocumentUploader::new(
            gateway.clone(),
            store.clone(),
            Arc::new(ZipVerifier::disabled()),
            documents.clone(),
            config,
        );
        Fixture {
            gateway,
            store,
            documents,
            uploader,
        }
    }

    /// Ingest one valid archive so an upload candidate exists.
    async fn seed_envelope(f: &Fixture, zip_name: &str) -> Envelope {
        f.gateway
            .put("bulkscan", zip_name, unsigned_outer(&["1111002.pdf"]))
            .await;
        let coordinator = crate::ingest::IngestionCoordinator::new(
            f.gateway.clone(),
            f.store.clone(),
            Arc::new(ZipVerifier::disabled()),
            ErrorNotifier::new(Arc::new(MemoryNotificationBus::new())),
            Arc::new(test_config()),
        );
        coordinator.run_once().await;
        f.store
            .find_by_container_and_filename("bulkscan", zip_name)
            .await
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn successful_upload_advances_and_records_urls() {
        let f = fixture();
        let envelope = seed_envelope(&f, "a.zip").await;
        f.documents
            .set_url(
                "1111002.pdf",
                "http://localhost:8080/documents/0fa1ab60-f836-43aa-8c65-b07cc9bebcbe",
            )
            .await;

        let summary = f.uploader.run_once().await;
        assert_eq!(summary.uploaded, 1);

        let current = f.store.get(envelope.id).await.unwrap();
        assert_eq!(current.status, Status::Uploaded);
        assert_eq!(
            current.scannable_items[0].document_url.as_deref(),
            Some("http://localhost:8080/documents/0fa1ab60-f836-43aa-8c65-b07cc9bebcbe")
        );
    }

    #[tokio::test]
    async fn timeout_then_retry_succeeds() {
        let f = fixture();
        let envelope = seed_envelope(&f, "a.zip").await;
        f.documents
            .push_failure(DocUploadError::Timeout(Duration::from_secs(30)))
            .await;

        // First tick fails and re-queues.
        let first = f.uploader.run_once().await;
        assert_eq!(first.failed, 1);
        let mid = f.store.get(envelope.id).await.unwrap();
        assert_eq!(mid.status, Status::UploadFailure);
        assert_eq!(mid.upload_failure_count, 1);

        // Second tick succeeds.
        let second = f.uploader.run_once().await;
        assert_eq!(second.uploaded, 1);
        let done = f.store.get(envelope.id).await.unwrap();
        assert_eq!(done.status, Status::Uploaded);
        assert_eq!(done.upload_failure_count, 1);

        let kinds: Vec<EventKind> = f
            .store
            .events_for(envelope.id)
            .await
            .unwrap()
            .iter()
            .map(|e| e.event)
            .collect();
        assert_eq!(
            kinds,
            vec![
                EventKind::ZipfileProcessingStarted,
                EventKind::DocUploadFailure,
                EventKind::DocUploaded,
            ]
        );
    }

    #[tokio::test]
    async fn cap_reached_leaves_envelope_for_operators() {
        let f = fixture();
        let envelope = seed_envelope(&f, "a.zip").await;
        for _ in 0..5 {
            f.documents
                .push_failure(DocUploadError::Transport("connection refused".into()))
                .await;
        }

        for _ in 0..5 {
            f.uploader.run_once().await;
        }
        let current = f.store.get(envelope.id).await.unwrap();
        assert_eq!(current.status, Status::UploadFailure);
        assert_eq!(current.upload_failure_count, 5);

        // No candidates remain; the mock sees no further calls.
        let calls_before = f.documents.calls().await.len();
        let idle = f.uploader.run_once().await;
        assert_eq!(idle, UploadSummary::default());
        assert_eq!(f.documents.calls().await.len(), calls_before);
    }

    #[tokio::test]
    async fn busy_archive_defers_without_counting_a_failure() {
        let f = fixture();
        let envelope = seed_envelope(&f, "a.zip").await;
        let _held = f
            .gateway
            .acquire_lease("bulkscan", "a.zip", Duration::from_secs(60))
            .await
            .unwrap()
            .unwrap();

        let summary = f.uploader.run_once().await;
        assert_eq!(summary.deferred, 1);
        let current = f.store.get(envelope.id).await.unwrap();
        assert_eq!(current.status, Status::Created);
        assert_eq!(current.upload_failure_count, 0);
    }

    #[tokio::test]
    async fn missing_archive_counts_as_upload_failure() {
        let f = fixture();
        let envelope = seed_envelope(&f, "a.zip").await;
        // The blob vanishes out from under the envelope.
        let lease = f
            .gateway
            .acquire_lease("bulkscan", "a.zip", Duration::from_secs(60))
            .await
            .unwrap()
            .unwrap();
        f.gateway.delete_if_exists(&lease).await.unwrap();

        let summary = f.uploader.run_once().await;
        assert_eq!(summary.failed, 1);
        let current = f.store.get(envelope.id).await.unwrap();
        assert_eq!(current.status, Status::UploadFailure);
        assert!(
            f.store.events_for(envelope.id).await.unwrap()[1]
                .reason
                .as_deref()
                .unwrap()
                .contains("missing")
        );
    }

    #[tokio::test]
    async fn oldest_candidate_goes_first() {
        let f = fixture();
        seed_envelope(&f, "a.zip").await;
        seed_envelope(&f, "b.zip").await;

        f.uploader.run_once().await;
        let calls = f.documents.calls().await;
        assert_eq!(calls.len(), 2);
    }
}
