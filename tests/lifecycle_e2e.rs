// SPDX-License-Identifier: MIT OR Apache-2.0
//! Full lifecycle: ingest → upload → downstream confirmation → sweep, and
//! the invariants that must hold along the way.

mod common;

use bsi_core::replay::{replay, validate_trace};
use bsi_core::{EventKind, Status};
use bsi_store::EnvelopeStore;
use common::*;

const ZIP: &str = "1_24-06-2018-00-00-00.zip";

#[tokio::test]
async fn consumed_envelope_ends_with_deleted_archive() {
    let p = pipeline();
    let inner = inner_archive(&["1111002.pdf"], &["1111002.pdf"]);
    p.gateway.put("bulkscan", ZIP, signed_outer(&inner)).await;

    p.coordinator.run_once().await;
    p.uploader.run_once().await;

    let envelope = p
        .store
        .find_by_container_and_filename("bulkscan", ZIP)
        .await
        .unwrap()
        .unwrap();

    // Downstream processing and notification, then the consumer confirms.
    p.store
        .transition(envelope.id, EventKind::DocProcessed, None)
        .await
        .unwrap();
    p.store
        .transition(envelope.id, EventKind::DocProcessedNotificationSent, None)
        .await
        .unwrap();
    p.store
        .confirm(envelope.id, "ccd-4242", "case_created")
        .await
        .unwrap();

    let swept = p.sweeper.run_once().await;
    assert_eq!(swept.deleted, 1);
    assert!(!p.gateway.contains("bulkscan", ZIP).await);

    let current = p.store.get(envelope.id).await.unwrap();
    assert_eq!(current.status, Status::Consumed);
    assert!(current.zip_deleted);
    assert_eq!(current.ccd_id.as_deref(), Some("ccd-4242"));

    // zip_deleted implies a processed status.
    assert!(current.status.blob_deletable());
}

#[tokio::test]
async fn event_log_is_a_valid_trace_and_replays_to_the_row() {
    let p = pipeline();
    let inner = inner_archive(&["1111002.pdf"], &["1111002.pdf"]);
    p.gateway.put("bulkscan", ZIP, signed_outer(&inner)).await;
    p.documents
        .push_failure(bsi_docstore::DocUploadError::Transport("reset".into()))
        .await;

    p.coordinator.run_once().await;
    p.uploader.run_once().await; // fails
    p.uploader.run_once().await; // succeeds

    let envelope = p
        .store
        .find_by_container_and_filename("bulkscan", ZIP)
        .await
        .unwrap()
        .unwrap();
    let kinds: Vec<EventKind> = p
        .store
        .events_for(envelope.id)
        .await
        .unwrap()
        .iter()
        .map(|e| e.event)
        .collect();

    assert!(validate_trace(&kinds), "log must follow the state machine");
    let derived = replay(&kinds);
    assert_eq!(derived.status, Some(envelope.status));
    assert_eq!(derived.upload_failure_count, envelope.upload_failure_count);
}

#[tokio::test]
async fn coordinator_cleans_up_processed_archives_too() {
    // The coordinator's idempotency path deletes blobs of envelopes that
    // completed between ticks, without waiting for the sweeper.
    let p = pipeline();
    let inner = inner_archive(&["1111002.pdf"], &["1111002.pdf"]);
    p.gateway.put("bulkscan", ZIP, signed_outer(&inner)).await;

    p.coordinator.run_once().await;
    p.uploader.run_once().await;
    let envelope = p
        .store
        .find_by_container_and_filename("bulkscan", ZIP)
        .await
        .unwrap()
        .unwrap();
    p.store
        .transition(envelope.id, EventKind::DocProcessed, None)
        .await
        .unwrap();

    let summary = p.coordinator.run_once().await;
    assert_eq!(summary.swept, 1);
    assert!(!p.gateway.contains("bulkscan", ZIP).await);
    assert!(p.store.get(envelope.id).await.unwrap().zip_deleted);
}

#[tokio::test]
async fn frozen_envelope_rejects_further_transitions() {
    let p = pipeline();
    let inner = inner_archive(&["1111002.pdf"], &["1111002.pdf"]);
    p.gateway.put("bulkscan", ZIP, signed_outer(&inner)).await;

    p.coordinator.run_once().await;
    p.uploader.run_once().await;
    let envelope = p
        .store
        .find_by_container_and_filename("bulkscan", ZIP)
        .await
        .unwrap()
        .unwrap();
    p.store
        .transition(envelope.id, EventKind::DocProcessed, None)
        .await
        .unwrap();
    p.sweeper.run_once().await;

    let err = p
        .store
        .transition(envelope.id, EventKind::DocProcessedNotificationSent, None)
        .await
        .unwrap_err();
    assert!(matches!(err, bsi_store::StoreError::ZipAlreadyDeleted { .. }));
}
