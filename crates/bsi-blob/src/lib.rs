// SPDX-License-Identifier: MIT OR Apache-2.0
//! bsi-blob
#![deny(unsafe_code)]
#![warn(missing_docs)]
//!
//! Gateway over the per-jurisdiction blob containers that scanning bureaus
//! drop archives into, and the short-lived exclusive leases that keep peer
//! replicas from processing the same archive twice.
//!
//! Leases auto-expire; renewal is deliberately absent. The pipeline is
//! sized so a single TTL covers worst-case per-file work, and expiry is
//! re-checked on every lease-authenticated call.

/// Local-filesystem store: one directory per container.
pub mod fs;
/// In-memory store for tests and embedded use.
pub mod memory;

pub use fs::FsBlobStore;
pub use memory::MemoryBlobStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;
use uuid::Uuid;

/// Suffix of the sibling container that receives rejected archives.
pub const REJECTED_SUFFIX: &str = "-rejected";

/// Name of the rejected sibling for an input container.
pub fn rejected_container_name(container: &str) -> String {
    format!("{container}{REJECTED_SUFFIX}")
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors surfaced by a [`BlobGateway`].
#[derive(Debug, thiserror::Error)]
pub enum BlobError {
    /// The requested blob does not exist.
    #[error("blob not found: {container}/{name}")]
    NotFound {
        /// Container name.
        container: String,
        /// Blob name.
        name: String,
    },

    /// The presented lease no longer holds the blob (expired or superseded).
    #[error("lease lost for {container}/{name}")]
    LeaseLost {
        /// Container name.
        container: String,
        /// Blob name.
        name: String,
    },

    /// The caller is not authorised. Fatal; retrying cannot help.
    #[error("unauthorized: {reason}")]
    Unauthorized {
        /// Provider detail.
        reason: String,
    },

    /// Transient I/O failure. The next tick retries.
    #[error("blob i/o failure: {reason}")]
    Io {
        /// Provider detail.
        reason: String,
    },
}

impl BlobError {
    /// `true` when the next scheduled tick may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Io { .. } | Self::LeaseLost { .. })
    }

    fn io(err: impl std::fmt::Display) -> Self {
        Self::Io {
            reason: err.to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Lease & attributes
// ---------------------------------------------------------------------------

/// An exclusive claim on one blob, valid until `expires_at`.
///
/// The token is opaque; gateways compare it against their lease table on
/// every authenticated call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lease {
    /// Container of the leased blob.
    pub container: String,
    /// Name of the leased blob.
    pub name: String,
    /// Opaque lease token.
    pub token: Uuid,
    /// When the lease lapses.
    pub expires_at: DateTime<Utc>,
}

/// Attributes of a stored blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlobAttributes {
    /// Last modification time.
    pub last_modified: DateTime<Utc>,
    /// Size in bytes.
    pub size: u64,
}

// ---------------------------------------------------------------------------
// Gateway trait
// ---------------------------------------------------------------------------

/// Gateway over input containers, their archives, and the rejected
/// siblings.
///
/// Lease-taking methods (`read`, `delete_if_exists`, `move_to_rejected`)
/// fail with [`BlobError::LeaseLost`] when the presented lease has expired
/// or been superseded.
#[async_trait]
pub trait BlobGateway: Send + Sync {
    /// Enumerate the configured input containers.
    async fn containers(&self) -> Result<Vec<String>, BlobError>;

    /// List archive names in a container. Order unspecified.
    async fn list(&self, container: &str) -> Result<Vec<String>, BlobError>;

    /// Fetch a blob's attributes.
    async fn attributes(&self, container: &str, name: &str) -> Result<BlobAttributes, BlobError>;

    /// Acquire an exclusive lease.
    ///
    /// Returns `Ok(None)` when another holder currently has the blob: a
    /// "busy" signal, not an error.
    async fn acquire_lease(
        &self,
        container: &str,
        name: &str,
        ttl: Duration,
    ) -> Result<Option<Lease>, BlobError>;

    /// Release a lease early. Releasing an expired lease is a no-op.
    async fn release_lease(&self, lease: &Lease) -> Result<(), BlobError>;

    /// Read the full archive under the lease.
    async fn read(&self, lease: &Lease) -> Result<Vec<u8>, BlobError>;

    /// Delete the blob under the lease. Idempotent: deleting an absent
    /// blob succeeds.
    async fn delete_if_exists(&self, lease: &Lease) -> Result<(), BlobError>;

    /// Copy the blob to its `-rejected` sibling (overwriting any
    /// same-named blob there), then delete the source.
    async fn move_to_rejected(&self, lease: &Lease) -> Result<(), BlobError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejected_naming() {
        assert_eq!(rejected_container_name("bulkscan"), "bulkscan-rejected");
    }

    #[test]
    fn io_and_lease_loss_are_retryable() {
        assert!(BlobError::io("connection reset").is_retryable());
        assert!(
            BlobError::LeaseLost {
                container: "bulkscan".into(),
                name: "a.zip".into(),
            }
            .is_retryable()
        );
        assert!(
            !BlobError::Unauthorized {
                reason: "expired credentials".into(),
            }
            .is_retryable()
        );
    }
}
