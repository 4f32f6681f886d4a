// SPDX-License-Identifier: MIT OR Apache-2.0
//! bsi-runtime
#![deny(unsafe_code)]
#![warn(missing_docs)]
//!
//! The scheduled drivers that move envelopes through their lifecycle:
//!
//! * [`IngestionCoordinator`]: lists input containers, leases archives,
//!   runs verification and validation, and persists accepted envelopes.
//! * [`DocumentUploader`]: pushes PDFs of `CREATED`/`UPLOAD_FAILURE`
//!   envelopes to the document store.
//! * [`CompletionSweeper`]: deletes source archives of processed
//!   envelopes after a grace period.
//!
//! Each driver exposes a `run_once` unit of work; [`drivers`] wraps them
//! in fixed-delay loops. Within one invocation archives are handled
//! sequentially so memory stays bounded by a single archive; exclusion
//! across replicas is the blob lease, exclusion across drivers is the
//! store's per-envelope serialization.

/// Fixed-delay driver loops and shutdown plumbing.
pub mod drivers;
/// The ingestion coordinator.
pub mod ingest;
/// The completion sweeper.
pub mod sweep;
/// The document uploader.
pub mod upload;

pub use ingest::{IngestionCoordinator, IngestionSummary};
pub use sweep::{CompletionSweeper, SweepSummary};
pub use upload::{DocumentUploader, UploadSummary};

#[cfg(test)]
pub(crate) mod testutil {
    use bsi_config::{ContainerConfig, IngestConfig, SignatureAlgorithm, SignatureConfig};
    use std::io::{Cursor, Write};
    use zip::write::SimpleFileOptions;

    pub fn zip_of(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        for (name, bytes) in entries {
            writer
                .start_file(*name, SimpleFileOptions::default())
                .unwrap();
            writer.write_all(bytes).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    pub fn metadata_json(file_names: &[&str]) -> Vec<u8> {
        let items: Vec<serde_json::Value> = file_names
            .iter()
            .map(|name| {
                serde_json::json!({
                    "document_control_number": "1111002",
                    "file_name": name,
                    "scanning_date": "2018-06-24T12:30:00.000Z"
                })
            })
            .collect();
        serde_json::to_vec(&serde_json::json!({
            "po_box": "BM 12345",
            "jurisdiction": "divorce",
            "delivery_date": "2018-06-24T12:00:00.000Z",
            "opening_date": "2018-06-24T13:00:00.000Z",
            "zip_file_createddate": "2018-06-24T11:00:00.000Z",
            "zip_file_name": "1_24-06-2018-00-00-00.zip",
            "envelope_classification": "new_application",
            "scannable_items": items
        }))
        .unwrap()
    }

    /// Outer archive with an unverified signature entry, for use with the
    /// disabled verifier.
    pub fn unsigned_outer(pdf_names: &[&str]) -> Vec<u8> {
        let metadata = metadata_json(pdf_names);
        let mut entries: Vec<(&str, &[u8])> = vec![("metadata.json", metadata.as_slice())];
        for name in pdf_names {
            entries.push((name, b"%PDF-1.4"));
        }
        let inner = zip_of(&entries);
        zip_of(&[("envelope.zip", inner.as_slice()), ("signature", b"unverified")])
    }

    pub fn test_config() -> IngestConfig {
        IngestConfig {
            signature: SignatureConfig {
                algorithm: SignatureAlgorithm::None,
                public_key_path: None,
            },
            blob_processing_delay_minutes: 0,
            lease_ttl_seconds: 60,
            max_upload_failures: 5,
            sweep_grace_minutes: 0,
            containers: vec![ContainerConfig {
                name: "bulkscan".into(),
                jurisdiction: "divorce".into(),
                test: false,
            }],
            ..IngestConfig::default()
        }
    }
}
