// SPDX-License-Identifier: MIT OR Apache-2.0
//! In-memory blob store.
//!
//! Backs the test suite and embedded single-process deployments. Lease
//! semantics are identical to the filesystem store: one live holder per
//! blob, expiry checked on every authenticated call.

use crate::{
    BlobAttributes, BlobError, BlobGateway, Lease, rejected_container_name,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Debug, Clone)]
struct Entry {
    bytes: Vec<u8>,
    last_modified: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct LeaseEntry {
    token: Uuid,
    expires_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct Inner {
    // container -> blob name -> entry
    blobs: BTreeMap<String, BTreeMap<String, Entry>>,
    // (container, name) -> current lease
    leases: BTreeMap<(String, String), LeaseEntry>,
}

/// In-memory [`BlobGateway`].
#[derive(Debug, Clone)]
pub struct MemoryBlobStore {
    input_containers: Vec<String>,
    inner: Arc<Mutex<Inner>>,
}

impl MemoryBlobStore {
    /// Create a store with the given input containers and their rejected
    /// siblings.
    pub fn new(input_containers: impl IntoIterator<Item = impl Into<String>>) -> Self {
        let input_containers: Vec<String> =
            input_containers.into_iter().map(Into::into).collect();
        let mut inner = Inner::default();
        for c in &input_containers {
            inner.blobs.entry(c.clone()).or_default();
            inner
                .blobs
                .entry(rejected_container_name(c))
                .or_default();
        }
        Self {
            input_containers,
            inner: Arc::new(Mutex::new(inner)),
        }
    }

    /// Store an archive with `last_modified = now`.
    pub async fn put(&self, container: &str, name: &str, bytes: Vec<u8>) {
        self.put_with_modified(container, name, bytes, Utc::now()).await;
    }

    /// Store an archive with an explicit modification time.
    pub async fn put_with_modified(
        &self,
        container: &str,
        name: &str,
        bytes: Vec<u8>,
        last_modified: DateTime<Utc>,
    ) {
        let mut inner = self.inner.lock().await;
        inner
            .blobs
            .entry(container.to_string())
            .or_default()
            .insert(name.to_string(), Entry { bytes, last_modified });
    }

    /// `true` when the blob currently exists.
    pub async fn contains(&self, container: &str, name: &str) -> bool {
        let inner = self.inner.lock().await;
        inner
            .blobs
            .get(container)
            .is_some_and(|c| c.contains_key(name))
    }

    fn check_lease(inner: &Inner, lease: &Lease) -> Result<(), BlobError> {
        let key = (lease.container.clone(), lease.name.clone());
        let live = inner.leases.get(&key).is_some_and(|entry| {
            entry.token == lease.token && entry.expires_at > Utc::now()
        });
        if live {
            Ok(())
        } else {
            Err(BlobError::LeaseLost {
                container: lease.container.clone(),
                name: lease.name.clone(),
            })
        }
    }
}

#[async_trait]
impl BlobGateway for MemoryBlobStore {
    async fn containers(&self) -> Result<Vec<String>, BlobError> {
        Ok(self.input_containers.clone())
    }

    async fn list(&self, container: &str) -> Result<Vec<String>, BlobError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .blobs
            .get(container)
            .map(|c| c.keys().cloned().collect())
            .unwrap_or_default())
    }

    async fn attributes(&self, container: &str, name: &str) -> Result<BlobAttributes, BlobError> {
        let inner = self.inner.lock().await;
        inner
            .blobs
            .get(container)
            .and_then(|c| c.get(name))
            .map(|e| BlobAttributes {
                last_modified: e.last_modified,
                size: e.bytes.len() as u64,
            })
            .ok_or_else(|| BlobError::NotFound {
                container: container.to_string(),
                name: name.to_string(),
            })
    }

    async fn acquire_lease(
        &self,
        container: &str,
        name: &str,
        ttl: Duration,
    ) -> Result<Option<Lease>, BlobError> {
        let mut inner = self.inner.lock().await;
        if !inner.blobs.get(container).is_some_and(|c| c.contains_key(name)) {
            return Err(BlobError::NotFound {
                container: container.to_string(),
                name: name.to_string(),
            });
        }
        let key = (container.to_string(), name.to_string());
        let now = Utc::now();
        if inner.leases.get(&key).is_some_and(|l| l.expires_at > now) {
            return Ok(None);
        }
        let token = Uuid::new_v4();
        let expires_at = now
            + chrono::Duration::from_std(ttl).map_err(BlobError::io)?;
        inner.leases.insert(key, LeaseEntry { token, expires_at });
        Ok(Some(Lease {
            container: container.to_string(),
            name: name.to_string(),
            token,
            expires_at,
        }))
    }

    async fn release_lease(&self, lease: &Lease) -> Result<(), BlobError> {
        let mut inner = self.inner.lock().await;
        let key = (lease.container.clone(), lease.name.clone());
        if inner.leases.get(&key).is_some_and(|l| l.token == lease.token) {
            inner.leases.remove(&key);
        }
        Ok(())
    }

    async fn read(&self, lease: &Lease) -> Result<Vec<u8>, BlobError> {
        let inner = self.inner.lock().await;
        Self::check_lease(&inner, lease)?;
        inner
            .blobs
            .get(&lease.container)
            .and_then(|c| c.get(&lease.name))
            .map(|e| e.bytes.clone())
            .ok_or_else(|| BlobError::NotFound {
                container: lease.container.clone(),
                name: lease.name.clone(),
            })
    }

    async fn delete_if_exists(&self, lease: &Lease) -> Result<(), BlobError> {
        let mut inner = self.inner.lock().await;
        Self::check_lease(&inner, lease)?;
        if let Some(c) = inner.blobs.get_mut(&lease.container) {
            c.remove(&lease.name);
        }
        let key = (lease.container.clone(), lease.name.clone());
        inner.leases.remove(&key);
        Ok(())
    }

    async fn move_to_rejected(&self, lease: &Lease) -> Result<(), BlobError> {
        let mut inner = self.inner.lock().await;
        Self::check_lease(&inner, lease)?;
        let entry = inner
            .blobs
            .get(&lease.container)
            .and_then(|c| c.get(&lease.name))
            .cloned()
            .ok_or_else(|| BlobError::NotFound {
                container: lease.container.clone(),
                name: lease.name.clone(),
            })?;
        let rejected = rejected_container_name(&lease.container);
        // Same-named blob in the rejected container is overwritten.
        inner
            .blobs
            .entry(rejected)
            .or_default()
            .insert(lease.name.clone(), entry);
        if let Some(c) = inner.blobs.get_mut(&lease.container) {
            c.remove(&lease.name);
        }
        let key = (lease.container.clone(), lease.name.clone());
        inner.leases.remove(&key);
        Ok(())
    }
}
