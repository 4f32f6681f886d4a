// SPDX-License-Identifier: MIT OR Apache-2.0
//! Shared helpers for the end-to-end pipeline tests: signed archive
//! builders backed by a real RSA keypair, and a fully wired in-memory
//! pipeline fixture.
#![allow(dead_code)]

use bsi_blob::MemoryBlobStore;
use bsi_config::{ContainerConfig, IngestConfig, SignatureAlgorithm, SignatureConfig};
use bsi_docstore::MockDocumentClient;
use bsi_notify::{ErrorNotifier, MemoryNotificationBus};
use bsi_runtime::{CompletionSweeper, DocumentUploader, IngestionCoordinator};
use bsi_store::MemoryEnvelopeStore;
use bsi_verify::ZipVerifier;
use rsa::RsaPrivateKey;
use rsa::pkcs1v15::SigningKey;
use rsa::pkcs8::EncodePublicKey;
use rsa::signature::{SignatureEncoding, Signer};
use sha2::Sha256;
use std::io::{Cursor, Write};
use std::sync::Arc;
use std::sync::OnceLock;
use zip::write::SimpleFileOptions;

/// Test keypair, generated once per test binary.
pub fn keypair() -> &'static (RsaPrivateKey, Vec<u8>) {
    static KEYS: OnceLock<(RsaPrivateKey, Vec<u8>)> = OnceLock::new();
    KEYS.get_or_init(|| {
        let mut rng = rand::thread_rng();
        let private = RsaPrivateKey::new(&mut rng, 2048).expect("keygen");
        let spki = private
            .to_public_key()
            .to_public_key_der()
            .expect("spki encoding")
            .as_bytes()
            .to_vec();
        (private, spki)
    })
}

pub fn sign(payload: &[u8]) -> Vec<u8> {
    let signing = SigningKey::<Sha256>::new(keypair().0.clone());
    signing.sign(payload).to_bytes().to_vec()
}

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

/// Metadata document declaring one scannable item per filename.
pub fn metadata_json(file_names: &[&str]) -> Vec<u8> {
    let items: Vec<serde_json::Value> = file_names
        .iter()
        .enumerate()
        .map(|(i, name)| {
            serde_json::json!({
                "document_control_number": format!("111100{}", i + 2),
                "file_name": name,
                "scanning_date": "2018-06-24T12:30:00.000Z",
                "ocr_accuracy": "high",
                "document_type": "other"
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
        "case_number": "1100001",
        "envelope_classification": "new_application",
        "scannable_items": items,
        "payments": [],
        "non_scannable_items": []
    }))
    .unwrap()
}

/// Inner archive: metadata declaring `declared`, PDF entries for `present`.
pub fn inner_archive(declared: &[&str], present: &[&str]) -> Vec<u8> {
    let metadata = metadata_json(declared);
    let mut entries: Vec<(&str, &[u8])> = vec![("metadata.json", metadata.as_slice())];
    for name in present {
        entries.push((name, b"%PDF-1.4 test document"));
    }
    zip_of(&entries)
}

/// Correctly signed outer archive.
pub fn signed_outer(inner: &[u8]) -> Vec<u8> {
    zip_of(&[("envelope.zip", inner), ("signature", &sign(inner))])
}

/// Outer archive whose signature covers different bytes than it carries.
pub fn tampered_outer(inner: &[u8]) -> Vec<u8> {
    let mut tampered = inner.to_vec();
    tampered.extend_from_slice(b"tamper");
    zip_of(&[("envelope.zip", tampered.as_slice()), ("signature", &sign(inner))])
}

pub fn test_config() -> IngestConfig {
    IngestConfig {
        signature: SignatureConfig {
            algorithm: SignatureAlgorithm::Sha256WithRsa,
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

/// Fully wired in-memory pipeline.
pub struct Pipeline {
    pub gateway: Arc<MemoryBlobStore>,
    pub store: Arc<MemoryEnvelopeStore>,
    pub bus: Arc<MemoryNotificationBus>,
    pub documents: Arc<MockDocumentClient>,
    pub coordinator: IngestionCoordinator,
    pub uploader: DocumentUploader,
    pub sweeper: CompletionSweeper,
}

pub fn pipeline() -> Pipeline {
    pipeline_with(test_config())
}

pub fn pipeline_with(config: IngestConfig) -> Pipeline {
    let config = Arc::new(config);
    let gateway = Arc::new(MemoryBlobStore::new(["bulkscan"]));
    let store = Arc::new(MemoryEnvelopeStore::new());
    let bus = Arc::new(MemoryNotificationBus::new());
    let documents = Arc::new(MockDocumentClient::new());
    let verifier = Arc::new(ZipVerifier::sha256_with_rsa(&keypair().1).unwrap());

    let coordinator = IngestionCoordinator::new(
        gateway.clone(),
        store.clone(),
        verifier.clone(),
        ErrorNotifier::new(bus.clone()),
        config.clone(),
    );
    let uploader = DocumentUploader::new(
        gateway.clone(),
        store.clone(),
        verifier,
        documents.clone(),
        config.clone(),
    );
    let sweeper = CompletionSweeper::new(gateway.clone(), store.clone(), config);

    Pipeline {
        gateway,
        store,
        bus,
        documents,
        coordinator,
        uploader,
        sweeper,
    }
}
