// SPDX-License-Identifier: MIT OR Apache-2.0
//! The ingestion coordinator.
//!
//! One `run_once` invocation walks every input container, shuffles the
//! archive list to spread lease contention across replicas, and pipes each
//! leased archive through verify → validate → build → persist. Every
//! archive's work runs inside a scoped boundary that translates any
//! failure into a classified outcome; one bad archive never poisons the
//! batch.

use bsi_blob::{BlobGateway, Lease};
use bsi_config::IngestConfig;
use bsi_core::{Envelope, ProcessEvent};
use bsi_envelope::{build_envelope, parse_inner_archive, validate_metadata};
use bsi_error::IngestFailure;
use bsi_notify::ErrorNotifier;
use bsi_store::{EnvelopeStore, StoreError};
use bsi_verify::{ArchiveContext, ZipVerifier};
use chrono::Utc;
use rand::seq::SliceRandom;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Outcome counters for one coordinator invocation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestionSummary {
    /// Envelopes persisted with `CREATED`.
    pub created: usize,
    /// Archives moved to the rejected container.
    pub rejected: usize,
    /// Archives skipped this tick (fresh, busy, in flight, transient).
    pub deferred: usize,
    /// Archives of already-processed envelopes deleted.
    pub swept: usize,
    /// Unclassified failures; archive left in place for inspection.
    pub failed: usize,
}

enum Outcome {
    Created,
    Rejected,
    Deferred,
    Swept,
    Failed,
}

/// Scheduled driver that turns inbound archives into envelopes.
pub struct IngestionCoordinator {
    gateway: Arc<dyn BlobGateway>,
    store: Arc<dyn EnvelopeStore>,
    verifier: Arc<ZipVerifier>,
    notifier: ErrorNotifier,
    config: Arc<IngestConfig>,
}

impl IngestionCoordinator {
    /// Wire a coordinator over its collaborators.
    pub fn new(
        gateway: Arc<dyn BlobGateway>,
        store: Arc<dyn EnvelopeStore>,
        verifier: Arc<ZipVerifier>,
        notifier: ErrorNotifier,
        config: Arc<IngestConfig>,
    ) -> Self {
        Self {
            gateway,
            store,
            verifier,
            notifier,
            config,
        }
    }

    /// Process every input container once.
    pub async fn run_once(&self) -> IngestionSummary {
        let mut summary = IngestionSummary::default();
        let containers = match self.gateway.containers().await {
            Ok(c) => c,
            Err(e) => {
                warn!(target: "bsi.ingest", error = %e, "container listing failed");
                return summary;
            }
        };

        for container in containers {
            let mut names = match self.gateway.list(&container).await {
                Ok(n) => n,
                Err(e) => {
                    warn!(target: "bsi.ingest", container = %container, error = %e, "archive listing failed");
                    continue;
                }
            };
            // Break lexicographic order so peer replicas contend on
            // different archives.
            names.shuffle(&mut rand::thread_rng());

            for name in names {
                match self.process_archive(&container, &name).await {
                    Outcome::Created => summary.created += 1,
                    Outcome::Rejected => summary.rejected += 1,
                    Outcome::Deferred => summary.deferred += 1,
                    Outcome::Swept => summary.swept += 1,
                    Outcome::Failed => summary.failed += 1,
                }
            }
        }

        info!(
            target: "bsi.ingest",
            created = summary.created,
            rejected = summary.rejected,
            deferred = summary.deferred,
            swept = summary.swept,
            failed = summary.failed,
            "ingestion tick complete"
        );
        summary
    }

    async fn process_archive(&self, container: &str, name: &str) -> Outcome {
        // The upload may still be in flight; give it the grace window.
        let grace =
            chrono::Duration::minutes(self.config.blob_processing_delay_minutes as i64);
        match self.gateway.attributes(container, name).await {
            Ok(attrs) if attrs.last_modified > Utc::now() - grace => {
                debug!(target: "bsi.ingest", container, name, "skipping fresh archive");
                return Outcome::Deferred;
            }
            Ok(_) => {}
            Err(e) => {
                warn!(target: "bsi.ingest", container, name, error = %e, "attributes failed");
                return Outcome::Deferred;
            }
        }

        // Idempotency: an archive we already track is either awaiting
        // deletion or still in flight.
        match self
            .store
            .find_by_container_and_filename(container, name)
            .await
        {
            Ok(Some(envelope)) => {
                if envelope.status.blob_deletable() && !envelope.zip_deleted {
                    return self.delete_processed_blob(&envelope, container, name).await;
                }
                debug!(target: "bsi.ingest", container, name, "envelope already in flight");
                return Outcome::Deferred;
            }
            Ok(None) => {}
            Err(e) => {
                warn!(target: "bsi.ingest", container, name, error = %e, "idempotency lookup failed");
                return Outcome::Deferred;
            }
        }

        let lease = match self.acquire(container, name).await {
            Some(l) => l,
            None => return Outcome::Deferred,
        };
        let outcome = self.process_under_lease(container, name, &lease).await;
        let _ = self.gateway.release_lease(&lease).await;
        outcome
    }

    async fn acquire(&self, container: &str, name: &str) -> Option<Lease> {
        let ttl = Duration::from_secs(self.config.lease_ttl_seconds);
        match self.gateway.acquire_lease(container, name, ttl).await {
            Ok(Some(lease)) => Some(lease),
            Ok(None) => {
                debug!(target: "bsi.ingest", container, name, "archive busy");
                None
            }
            Err(e) => {
                warn!(target: "bsi.ingest", container, name, error = %e, "lease acquisition failed");
                None
            }
        }
    }

    async fn process_under_lease(
        &self,
        container: &str,
        name: &str,
        lease: &Lease,
    ) -> Outcome {
        let outer = match self.gateway.read(lease).await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(target: "bsi.ingest", container, name, error = %e, "archive read failed");
                return Outcome::Deferred;
            }
        };

        let ctx = ArchiveContext {
            container,
            zip_file_name: name,
        };
        match self.ingest_archive(ctx, &outer) {
            Ok(envelope) => match self.store.create(envelope).await {
                Ok(saved) => {
                    info!(
                        target: "bsi.ingest",
                        container,
                        name,
                        id = %saved.id,
                        "envelope created"
                    );
                    Outcome::Created
                }
                // A peer replica persisted the same archive between our
                // lookup and the commit.
                Err(StoreError::Duplicate { .. }) => Outcome::Deferred,
                Err(e) => {
                    warn!(target: "bsi.ingest", container, name, error = %e, "envelope persist failed");
                    Outcome::Deferred
                }
            },
            Err((failure, po_box)) => {
                self.handle_failure(container, name, lease, failure, po_box)
                    .await
            }
        }
    }

    /// Verify → split → validate → build, tracking how far metadata
    /// parsing got so later failures can carry the P.O. box.
    fn ingest_archive(
        &self,
        ctx: ArchiveContext<'_>,
        outer: &[u8],
    ) -> Result<Envelope, (IngestFailure, Option<String>)> {
        let inner_bytes = self.verifier.verify(ctx, outer).map_err(|f| (f, None))?;
        let inner = parse_inner_archive(&inner_bytes).map_err(|f| (f, None))?;
        let metadata = validate_metadata(&inner.metadata).map_err(|f| (f, None))?;
        let po_box = Some(metadata.po_box.clone());

        let Some(jurisdiction) = self.config.jurisdiction_for(ctx.container) else {
            return Err((
                IngestFailure::Unclassified {
                    reason: format!("no jurisdiction mapping for container {:?}", ctx.container),
                },
                po_box,
            ));
        };
        build_envelope(
            ctx.container,
            ctx.zip_file_name,
            jurisdiction,
            &metadata,
            inner.pdfs.keys(),
        )
        .map_err(|f| (f, po_box))
    }

    async fn handle_failure(
        &self,
        container: &str,
        name: &str,
        lease: &Lease,
        failure: IngestFailure,
        po_box: Option<String>,
    ) -> Outcome {
        let Some(kind) = failure.event_kind() else {
            // Transient: no event, the next tick retries.
            debug!(target: "bsi.ingest", container, name, error = %failure, "transient failure");
            return Outcome::Deferred;
        };

        let event =
            ProcessEvent::pre_envelope(container, name, kind, Some(failure.to_string()));
        let event = match self.store.record_event(event).await {
            Ok(e) => e,
            Err(e) => {
                warn!(target: "bsi.ingest", container, name, error = %e, "event persist failed");
                return Outcome::Deferred;
            }
        };

        if !failure.is_terminal() {
            warn!(
                target: "bsi.ingest",
                container,
                name,
                error = %failure,
                "unclassified failure; archive left in place"
            );
            return Outcome::Failed;
        }

        // Best-effort notification; the event is already committed.
        self.notifier
            .notify(
                &failure,
                &event,
                po_box,
                self.config.is_test_container(container),
            )
            .await;

        match self.gateway.move_to_rejected(lease).await {
            Ok(()) => {
                info!(target: "bsi.ingest", container, name, error = %failure, "archive rejected");
                Outcome::Rejected
            }
            Err(e) => {
                warn!(target: "bsi.ingest", container, name, error = %e, "reject move failed");
                Outcome::Deferred
            }
        }
    }

    async fn delete_processed_blob(
        &self,
        envelope: &Envelope,
        container: &str,
        name: &str,
    ) -> Outcome {
        let Some(lease) = self.acquire(container, name).await else {
            return Outcome::Deferred;
        };
        let outcome = match self.gateway.delete_if_exists(&lease).await {
            Ok(()) => match self.store.mark_zip_deleted(envelope.id).await {
                Ok(()) => {
                    info!(target: "bsi.ingest", container, name, id = %envelope.id, "processed archive deleted");
                    Outcome::Swept
                }
                Err(e) => {
                    warn!(target: "bsi.ingest", container, name, error = %e, "zip_deleted flag failed");
                    Outcome::Deferred
                }
            },
            Err(e) => {
                warn!(target: "bsi.ingest", container, name, error = %e, "archive delete failed");
                Outcome::Deferred
            }
        };
        let _ = self.gateway.release_lease(&lease).await;
        outcome
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
