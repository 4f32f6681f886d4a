// SPDX-License-Identifier: MIT OR Apache-2.0
//! The completion sweeper.
//!
//! Envelopes that reached a processed status keep their source archive
//! until a grace period passes, then the archive is deleted and the
//! envelope frozen with `zip_deleted = true`. The row itself is retained
//! indefinitely for reconciliation.

use bsi_blob::{BlobError, BlobGateway};
use bsi_config::IngestConfig;
use bsi_core::Envelope;
use bsi_store::EnvelopeStore;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Outcome counters for one sweeper invocation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepSummary {
    /// Archives deleted and envelopes frozen.
    pub deleted: usize,
    /// Envelopes skipped this tick.
    pub deferred: usize,
}

/// Scheduled driver that deletes archives of completed envelopes.
pub struct CompletionSweeper {
    gateway: Arc<dyn BlobGateway>,
    store: Arc<dyn EnvelopeStore>,
    config: Arc<IngestConfig>,
}

impl CompletionSweeper {
    /// Wire a sweeper over its collaborators.
    pub fn new(
        gateway: Arc<dyn BlobGateway>,
        store: Arc<dyn EnvelopeStore>,
        config: Arc<IngestConfig>,
    ) -> Self {
        Self {
            gateway,
            store,
            config,
        }
    }

    /// Sweep once.
    pub async fn run_once(&self) -> SweepSummary {
        let mut summary = SweepSummary::default();
        let cutoff =
            Utc::now() - chrono::Duration::minutes(self.config.sweep_grace_minutes as i64);
        let candidates = match self.store.find_sweep_candidates(cutoff).await {
            Ok(c) => c,
            Err(e) => {
                warn!(target: "bsi.sweep", error = %e, "candidate query failed");
                return summary;
            }
        };

        for envelope in candidates {
            if self.sweep_one(&envelope).await {
                summary.deleted += 1;
            } else {
                summary.deferred += 1;
            }
        }

        info!(
            target: "bsi.sweep",
            deleted = summary.deleted,
            deferred = summary.deferred,
            "sweep tick complete"
        );
        summary
    }

    async fn sweep_one(&self, envelope: &Envelope) -> bool {
        let ttl = Duration::from_secs(self.config.lease_ttl_seconds);
        let lease = match self
            .gateway
            .acquire_lease(&envelope.container, &envelope.zip_file_name, ttl)
            .await
        {
            Ok(Some(lease)) => Some(lease),
            Ok(None) => {
                debug!(target: "bsi.sweep", id = %envelope.id, "archive busy");
                return false;
            }
            // Already gone; only the flag is left to set.
            Err(BlobError::NotFound { .. }) => None,
            Err(e) => {
                warn!(target: "bsi.sweep", id = %envelope.id, error = %e, "lease acquisition failed");
                return false;
            }
        };

        if let Some(lease) = &lease {
            if let Err(e) = self.gateway.delete_if_exists(lease).await {
                warn!(target: "bsi.sweep", id = %envelope.id, error = %e, "archive delete failed");
                let _ = self.gateway.release_lease(lease).await;
                return false;
            }
        }

        match self.store.mark_zip_deleted(envelope.id).await {
            Ok(()) => {
                info!(
                    target: "bsi.sweep",
                    id = %envelope.id,
                    zip = %envelope.zip_file_name,
                    "source archive deleted"
                );
                true
            }
            Err(e) => {
                warn!(target: "bsi.sweep", id = %envelope.id, error = %e, "zip_deleted flag failed");
                false
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
