// SPDX-License-Identifier: MIT OR Apache-2.0
//! Umbrella crate for the bulk-scan ingestion pipeline.
//!
//! Re-exports the workspace members so integration tests and downstream
//! consumers can depend on a single crate.

pub use bsi_blob as blob;
pub use bsi_config as config;
pub use bsi_core as model;
pub use bsi_docstore as docstore;
pub use bsi_envelope as envelope;
pub use bsi_error as error;
pub use bsi_notify as notify;
pub use bsi_runtime as runtime;
pub use bsi_store as store;
pub use bsi_verify as verify;
