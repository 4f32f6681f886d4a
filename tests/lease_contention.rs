// SPDX-License-Identifier: MIT OR Apache-2.0
//! Replica contention: two coordinators over the same blob store and
//! database must never double-process an archive.

mod common;

use bsi_core::EventKind;
use bsi_notify::{ErrorNotifier, MemoryNotificationBus};
use bsi_runtime::IngestionCoordinator;
use bsi_store::EnvelopeStore;
use bsi_verify::ZipVerifier;
use common::*;
use std::sync::Arc;
use tokio::task::JoinSet;

fn replica(p: &Pipeline) -> IngestionCoordinator {
    IngestionCoordinator::new(
        p.gateway.clone(),
        p.store.clone(),
        Arc::new(ZipVerifier::sha256_with_rsa(&keypair().1).unwrap()),
        ErrorNotifier::new(Arc::new(MemoryNotificationBus::new())),
        Arc::new(test_config()),
    )
}

#[tokio::test(flavor = "multi_thread")]
async fn two_replicas_one_envelope() {
    let p = pipeline();
    let inner = inner_archive(&["1111002.pdf"], &["1111002.pdf"]);
    p.gateway
        .put("bulkscan", "contested.zip", signed_outer(&inner))
        .await;

    let replicas: Vec<Arc<IngestionCoordinator>> =
        (0..2).map(|_| Arc::new(replica(&p))).collect();
    let barrier = Arc::new(tokio::sync::Barrier::new(replicas.len()));

    let mut set = JoinSet::new();
    for coordinator in replicas {
        let barrier = Arc::clone(&barrier);
        set.spawn(async move {
            barrier.wait().await;
            coordinator.run_once().await
        });
    }

    let mut created = 0;
    while let Some(result) = set.join_next().await {
        created += result.unwrap().created;
    }

    // Exactly one replica wins the lease (or the persist race); the
    // envelope and its first event exist exactly once.
    assert_eq!(created, 1);
    let envelope = p
        .store
        .find_by_container_and_filename("bulkscan", "contested.zip")
        .await
        .unwrap()
        .unwrap();
    let events = p.store.events_for(envelope.id).await.unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event, EventKind::ZipfileProcessingStarted);
}

#[tokio::test(flavor = "multi_thread")]
async fn many_replicas_over_many_archives_cover_everything_once() {
    let p = pipeline();
    for i in 0..6 {
        let inner = inner_archive(&["1111002.pdf"], &["1111002.pdf"]);
        p.gateway
            .put("bulkscan", &format!("batch-{i}.zip"), signed_outer(&inner))
            .await;
    }

    let replicas: Vec<Arc<IngestionCoordinator>> =
        (0..3).map(|_| Arc::new(replica(&p))).collect();
    let barrier = Arc::new(tokio::sync::Barrier::new(replicas.len()));

    let mut set = JoinSet::new();
    for coordinator in replicas {
        let barrier = Arc::clone(&barrier);
        set.spawn(async move {
            barrier.wait().await;
            // A few ticks each, as the schedulers would.
            let mut created = 0;
            for _ in 0..3 {
                created += coordinator.run_once().await.created;
            }
            created
        });
    }

    let mut total_created = 0;
    while let Some(result) = set.join_next().await {
        total_created += result.unwrap();
    }

    assert_eq!(total_created, 6, "every archive ingested exactly once");
    assert_eq!(p.store.len().await, 6);
}
