// SPDX-License-Identifier: MIT OR Apache-2.0
//! Filesystem blob store: one directory per container.
//!
//! Single-binary deployment mode. Lease exclusion lives in-process; peer
//! replicas on other hosts need a shared store instead.

use crate::{
    BlobAttributes, BlobError, BlobGateway, Lease, rejected_container_name,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Clone)]
struct LeaseEntry {
    token: Uuid,
    expires_at: DateTime<Utc>,
}

/// Filesystem-backed [`BlobGateway`] rooted at a base directory.
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
    input_containers: Vec<String>,
    leases: Arc<Mutex<BTreeMap<(String, String), LeaseEntry>>>,
}

impl FsBlobStore {
    /// Create a store rooted at `root`, creating each input container
    /// directory and its rejected sibling.
    pub fn new(
        root: impl Into<PathBuf>,
        input_containers: impl IntoIterator<Item = impl Into<String>>,
    ) -> Result<Self, BlobError> {
        let root = root.into();
        let input_containers: Vec<String> =
            input_containers.into_iter().map(Into::into).collect();
        for c in &input_containers {
            std::fs::create_dir_all(root.join(c)).map_err(BlobError::io)?;
            std::fs::create_dir_all(root.join(rejected_container_name(c)))
                .map_err(BlobError::io)?;
        }
        Ok(Self {
            root,
            input_containers,
            leases: Arc::new(Mutex::new(BTreeMap::new())),
        })
    }

    fn blob_path(&self, container: &str, name: &str) -> PathBuf {
        self.root.join(container).join(name)
    }

    async fn check_lease(&self, lease: &Lease) -> Result<(), BlobError> {
        let leases = self.leases.lock().await;
        let key = (lease.container.clone(), lease.name.clone());
        let live = leases.get(&key).is_some_and(|entry| {
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

    fn map_io(container: &str, name: &str, err: std::io::Error) -> BlobError {
        if err.kind() == ErrorKind::NotFound {
            BlobError::NotFound {
                container: container.to_string(),
                name: name.to_string(),
            }
        } else if err.kind() == ErrorKind::PermissionDenied {
            BlobError::Unauthorized {
                reason: err.to_string(),
            }
        } else {
            BlobError::io(err)
        }
    }
}

#[async_trait]
impl BlobGateway for FsBlobStore {
    async fn containers(&self) -> Result<Vec<String>, BlobError> {
        Ok(self.input_containers.clone())
    }

    async fn list(&self, container: &str) -> Result<Vec<String>, BlobError> {
        let dir = self.root.join(container);
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(rd) => rd,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(BlobError::io(e)),
        };
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(BlobError::io)? {
            if entry.file_type().await.map_err(BlobError::io)?.is_file() {
                if let Some(name) = entry.file_name().to_str() {
                    names.push(name.to_string());
                }
            }
        }
        Ok(names)
    }

    async fn attributes(&self, container: &str, name: &str) -> Result<BlobAttributes, BlobError> {
        let meta = tokio::fs::metadata(self.blob_path(container, name))
            .await
            .map_err(|e| Self::map_io(container, name, e))?;
        let modified = meta.modified().map_err(BlobError::io)?;
        Ok(BlobAttributes {
            last_modified: DateTime::<Utc>::from(modified),
            size: meta.len(),
        })
    }

    async fn acquire_lease(
        &self,
        container: &str,
        name: &str,
        ttl: Duration,
    ) -> Result<Option<Lease>, BlobError> {
        if !tokio::fs::try_exists(self.blob_path(container, name))
            .await
            .map_err(BlobError::io)?
        {
            return Err(BlobError::NotFound {
                container: container.to_string(),
                name: name.to_string(),
            });
        }
        let mut leases = self.leases.lock().await;
        let key = (container.to_string(), name.to_string());
        let now = Utc::now();
        if leases.get(&key).is_some_and(|l| l.expires_at > now) {
            return Ok(None);
        }
        let token = Uuid::new_v4();
        let expires_at = now + chrono::Duration::from_std(ttl).map_err(BlobError::io)?;
        leases.insert(key, LeaseEntry { token, expires_at });
        debug!(target: "bsi.blob", container, name, %token, "lease acquired");
        Ok(Some(Lease {
            container: container.to_string(),
            name: name.to_string(),
            token,
            expires_at,
        }))
    }

    async fn release_lease(&self, lease: &Lease) -> Result<(), BlobError> {
        let mut leases = self.leases.lock().await;
        let key = (lease.container.clone(), lease.name.clone());
        if leases.get(&key).is_some_and(|l| l.token == lease.token) {
            leases.remove(&key);
        }
        Ok(())
    }

    async fn read(&self, lease: &Lease) -> Result<Vec<u8>, BlobError> {
        self.check_lease(lease).await?;
        tokio::fs::read(self.blob_path(&lease.container, &lease.name))
            .await
            .map_err(|e| Self::map_io(&lease.container, &lease.name, e))
    }

    async fn delete_if_exists(&self, lease: &Lease) -> Result<(), BlobError> {
        self.check_lease(lease).await?;
        match tokio::fs::remove_file(self.blob_path(&lease.container, &lease.name)).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(BlobError::io(e)),
        }
        self.leases
            .lock()
            .await
            .remove(&(lease.container.clone(), lease.name.clone()));
        Ok(())
    }

    async fn move_to_rejected(&self, lease: &Lease) -> Result<(), BlobError> {
        self.check_lease(lease).await?;
        let source = self.blob_path(&lease.container, &lease.name);
        let rejected_dir = self.root.join(rejected_container_name(&lease.container));
        tokio::fs::create_dir_all(&rejected_dir)
            .await
            .map_err(BlobError::io)?;
        let target = rejected_dir.join(&lease.name);
        // copy-then-delete; the copy overwrites any same-named reject.
        tokio::fs::copy(&source, &target)
            .await
            .map_err(|e| Self::map_io(&lease.container, &lease.name, e))?;
        match tokio::fs::remove_file(&source).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(BlobError::io(e)),
        }
        self.leases
            .lock()
            .await
            .remove(&(lease.container.clone(), lease.name.clone()));
        debug!(
            target: "bsi.blob",
            container = %lease.container,
            name = %lease.name,
            "moved to rejected"
        );
        Ok(())
    }
}
