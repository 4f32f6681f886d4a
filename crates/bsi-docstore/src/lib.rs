// SPDX-License-Identifier: MIT OR Apache-2.0
//! bsi-docstore
#![deny(unsafe_code)]
#![warn(missing_docs)]
//!
//! Client for the downstream document store.
//!
//! The contract is small: submit a set of PDFs, get back a mapping from
//! filename to durable URL. The store deduplicates by filename within an
//! envelope, so retried uploads are safe; retry policy itself belongs to
//! the uploader driver.

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::debug;

// ---------------------------------------------------------------------------
// Contract
// ---------------------------------------------------------------------------

/// One PDF to upload.
#[derive(Debug, Clone)]
pub struct Pdf {
    /// Filename within the envelope. The store's dedup key.
    pub file_name: String,
    /// Raw PDF bytes.
    pub content: Vec<u8>,
}

/// Errors from a document upload attempt.
#[derive(Debug, thiserror::Error)]
pub enum DocUploadError {
    /// The RPC deadline elapsed.
    #[error("document store timed out after {0:?}")]
    Timeout(Duration),

    /// Transport-level failure (connect refused, reset, DNS).
    #[error("document store transport failure: {0}")]
    Transport(String),

    /// Non-success HTTP status.
    #[error("document store returned status {status}")]
    Http {
        /// HTTP status code.
        status: u16,
    },

    /// The response body did not match the contract.
    #[error("document store response malformed: {0}")]
    Protocol(String),
}

impl DocUploadError {
    /// `true` when a later attempt may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout(_) | Self::Transport(_) => true,
            Self::Http { status } => *status >= 500,
            Self::Protocol(_) => false,
        }
    }
}

/// Client over the document store's upload endpoint.
#[async_trait]
pub trait DocumentClient: Send + Sync {
    /// Upload the PDFs; returns filename → durable URL for every file.
    async fn upload(&self, pdfs: Vec<Pdf>) -> Result<BTreeMap<String, String>, DocUploadError>;
}

// ---------------------------------------------------------------------------
// HTTP client
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct UploadResponse {
    files: BTreeMap<String, String>,
}

/// [`DocumentClient`] over HTTP multipart upload.
#[derive(Debug, Clone)]
pub struct HttpDocumentClient {
    url: String,
    timeout: Duration,
    client: reqwest::Client,
}

impl HttpDocumentClient {
    /// Create a client for the given endpoint with a bounded deadline.
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            url: url.into(),
            timeout,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl DocumentClient for HttpDocumentClient {
    async fn upload(&self, pdfs: Vec<Pdf>) -> Result<BTreeMap<String, String>, DocUploadError> {
        let mut form = reqwest::multipart::Form::new();
        for pdf in pdfs {
            let part = reqwest::multipart::Part::bytes(pdf.content)
                .file_name(pdf.file_name.clone())
                .mime_str("application/pdf")
                .map_err(|e| DocUploadError::Protocol(e.to_string()))?;
            form = form.part("files", part);
        }

        let response = self
            .client
            .post(&self.url)
            .timeout(self.timeout)
            .multipart(form)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    DocUploadError::Timeout(self.timeout)
                } else {
                    DocUploadError::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(DocUploadError::Http {
                status: status.as_u16(),
            });
        }

        let body: UploadResponse = response
            .json()
            .await
            .map_err(|e| DocUploadError::Protocol(e.to_string()))?;
        debug!(target: "bsi.docstore", files = body.files.len(), "upload accepted");
        Ok(body.files)
    }
}

// ---------------------------------------------------------------------------
// Mock client
// ---------------------------------------------------------------------------

/// Scriptable in-memory [`DocumentClient`] for tests.
///
/// Scripted failures are consumed first, one per call; once drained,
/// uploads succeed with either a fixed URL per filename or a generated
/// one.
#[derive(Debug, Clone, Default)]
pub struct MockDocumentClient {
    inner: std::sync::Arc<tokio::sync::Mutex<MockState>>,
}

#[derive(Debug, Default)]
struct MockState {
    fixed_urls: BTreeMap<String, String>,
    failures: std::collections::VecDeque<DocUploadError>,
    calls: Vec<Vec<String>>,
}

impl MockDocumentClient {
    /// Create a mock that succeeds with generated URLs.
    pub fn new() -> Self {
        Self::default()
    }

    /// Return `url` for `file_name` instead of a generated one.
    pub async fn set_url(&self, file_name: impl Into<String>, url: impl Into<String>) {
        self.inner
            .lock()
            .await
            .fixed_urls
            .insert(file_name.into(), url.into());
    }

    /// Queue a failure for the next upload call.
    pub async fn push_failure(&self, failure: DocUploadError) {
        self.inner.lock().await.failures.push_back(failure);
    }

    /// Filenames submitted per call, in call order.
    pub async fn calls(&self) -> Vec<Vec<String>> {
        self.inner.lock().await.calls.clone()
    }
}

#[async_trait]
impl DocumentClient for MockDocumentClient {
    async fn upload(&self, pdfs: Vec<Pdf>) -> Result<BTreeMap<String, String>, DocUploadError> {
        let mut state = self.inner.lock().await;
        state
            .calls
            .push(pdfs.iter().map(|p| p.file_name.clone()).collect());
        if let Some(failure) = state.failures.pop_front() {
            return Err(failure);
        }
        Ok(pdfs
            .into_iter()
            .map(|pdf| {
                let url = state.fixed_urls.get(&pdf.file_name).cloned().unwrap_or_else(|| {
                    format!("http://localhost:8080/documents/{}", uuid::Uuid::new_v4())
                });
                (pdf.file_name, url)
            })
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
