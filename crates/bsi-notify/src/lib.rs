// SPDX-License-Identifier: MIT OR Apache-2.0
//! bsi-notify
#![deny(unsafe_code)]
#![warn(missing_docs)]
//!
//! Producer side of the error notification bus.
//!
//! For every terminal ingestion failure the pipeline publishes one
//! [`ErrorNotification`] keyed by the persisted event id. Publishing is
//! best-effort: a bus outage is logged and never rolls back the event.

use async_trait::async_trait;
use bsi_core::ProcessEvent;
use bsi_error::{ErrorCode, IngestFailure};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Wire shape
// ---------------------------------------------------------------------------

/// Message published for a failed archive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorNotification {
    /// Fresh random message id.
    pub id: Uuid,
    /// Id of the persisted event row this message reports.
    pub event_id: Uuid,
    /// Source archive filename.
    pub zip_file_name: String,
    /// Input container.
    pub container: String,
    /// P.O. box, when metadata parsed far enough to know it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub po_box: Option<String>,
    /// Control number, when a single document is at fault.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document_control_number: Option<String>,
    /// Stable outward error code.
    pub error_code: ErrorCode,
    /// Human-readable description.
    pub error_description: String,
    /// `true` when the source container is a configured test container.
    pub test_only: bool,
}

// ---------------------------------------------------------------------------
// Publisher
// ---------------------------------------------------------------------------

/// Error publishing to the notification bus.
#[derive(Debug, thiserror::Error)]
#[error("notification bus unavailable: {reason}")]
pub struct PublishError {
    /// Bus detail.
    pub reason: String,
}

/// Producer over the notification bus.
#[async_trait]
pub trait NotificationPublisher: Send + Sync {
    /// Publish one message.
    async fn publish(&self, message: ErrorNotification) -> Result<(), PublishError>;
}

/// In-memory bus with publishing statistics, for tests and embedded use.
#[derive(Debug, Default)]
pub struct MemoryNotificationBus {
    messages: Mutex<Vec<ErrorNotification>>,
    total_published: AtomicU64,
    fail_next: AtomicU64,
}

impl MemoryNotificationBus {
    /// Create an empty bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything published so far.
    pub async fn published(&self) -> Vec<ErrorNotification> {
        self.messages.lock().await.clone()
    }

    /// Total number of accepted messages.
    pub fn total_published(&self) -> u64 {
        self.total_published.load(Ordering::Relaxed)
    }

    /// Make the next `n` publish calls fail, simulating a bus outage.
    pub fn fail_next(&self, n: u64) {
        self.fail_next.store(n, Ordering::Relaxed);
    }
}

#[async_trait]
impl NotificationPublisher for MemoryNotificationBus {
    async fn publish(&self, message: ErrorNotification) -> Result<(), PublishError> {
        let remaining = self.fail_next.load(Ordering::Relaxed);
        if remaining > 0 {
            self.fail_next.store(remaining - 1, Ordering::Relaxed);
            return Err(PublishError {
                reason: "simulated outage".into(),
            });
        }
        self.messages.lock().await.push(message);
        self.total_published.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Notifier
// ---------------------------------------------------------------------------

/// Translates classified ingestion failures into bus messages.
pub struct ErrorNotifier {
    publisher: Arc<dyn NotificationPublisher>,
}

impl ErrorNotifier {
    /// Create a notifier over the given publisher.
    pub fn new(publisher: Arc<dyn NotificationPublisher>) -> Self {
        Self { publisher }
    }

    /// Publish a notification for a terminal failure, best-effort.
    ///
    /// `po_box` is present when metadata parsed far enough to know it.
    /// Returns the message that was (or would have been) sent, or `None`
    /// when the failure has no outward code. A publish error is logged and
    /// swallowed; the persisted event is already committed.
    pub async fn notify(
        &self,
        failure: &IngestFailure,
        event: &ProcessEvent,
        po_box: Option<String>,
        test_only: bool,
    ) -> Option<ErrorNotification> {
        let error_code = ErrorCode::for_failure(failure)?;
        let message = ErrorNotification {
            id: Uuid::new_v4(),
            event_id: event.id,
            zip_file_name: event.zip_file_name.clone(),
            container: event.container.clone(),
            po_box,
            document_control_number: match failure {
                IngestFailure::OcrDataParse {
                    document_control_number,
                    ..
                } => Some(document_control_number.clone()),
                _ => None,
            },
            error_code,
            error_description: failure.to_string(),
            test_only,
        };
        match self.publisher.publish(message.clone()).await {
            Ok(()) => {
                debug!(
                    target: "bsi.notify",
                    event_id = %event.id,
                    code = %error_code,
                    "notification published"
                );
            }
            Err(e) => {
                warn!(
                    target: "bsi.notify",
                    event_id = %event.id,
                    error = %e,
                    "notification publish failed; event already committed"
                );
            }
        }
        Some(message)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
