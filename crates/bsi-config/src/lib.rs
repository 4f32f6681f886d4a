// SPDX-License-Identifier: MIT OR Apache-2.0
//! Configuration loading and validation for the bulk-scan ingestion
//! pipeline.
//!
//! Provides [`IngestConfig`], the full runtime settings, with TOML
//! loading, semantic validation that accumulates every problem before
//! failing, and startup decoding of the signature public key.
#![deny(unsafe_code)]
#![warn(missing_docs)]

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::Path;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors that can occur during configuration loading or validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The requested configuration file was not found or unreadable.
    #[error("config file not found: {path}")]
    FileNotFound {
        /// Path that was requested.
        path: String,
    },

    /// The file could not be parsed as valid TOML.
    #[error("failed to parse config: {reason}")]
    ParseError {
        /// Human-readable parse error detail.
        reason: String,
    },

    /// Semantic validation failed (one or more problems).
    #[error("config validation failed: {reasons:?}")]
    ValidationError {
        /// Individual validation failure messages.
        reasons: Vec<String>,
    },

    /// The configured public key could not be read or decoded.
    #[error("failed to load public key from {path}: {reason}")]
    PublicKey {
        /// Key file path.
        path: String,
        /// What went wrong.
        reason: String,
    },
}

// ---------------------------------------------------------------------------
// Config types
// ---------------------------------------------------------------------------

/// Signature verification algorithm selector.
///
/// `none` bypasses verification and exists for test profiles only; any
/// selector other than the two below is rejected at parse time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum SignatureAlgorithm {
    /// SHA-256 with RSA PKCS#1 v1.5 over the inner archive bytes.
    #[serde(rename = "sha256withrsa")]
    Sha256WithRsa,
    /// No verification. Test profiles only.
    #[serde(rename = "none")]
    None,
}

/// Signature verification settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct SignatureConfig {
    /// Algorithm selector.
    pub algorithm: SignatureAlgorithm,
    /// Path to the base64-encoded X.509 SubjectPublicKeyInfo key file.
    /// Required when the algorithm is `sha256withrsa`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_key_path: Option<String>,
}

impl Default for SignatureConfig {
    fn default() -> Self {
        Self {
            algorithm: SignatureAlgorithm::Sha256WithRsa,
            public_key_path: None,
        }
    }
}

/// Fixed delays between scheduled driver invocations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct SchedulingConfig {
    /// Delay between ingestion ticks, in milliseconds.
    pub ingestion_interval_ms: u64,
    /// Delay between uploader ticks, in milliseconds.
    pub upload_interval_ms: u64,
    /// Delay between sweeper ticks, in milliseconds.
    pub sweep_interval_ms: u64,
}

impl Default for SchedulingConfig {
    fn default() -> Self {
        Self {
            ingestion_interval_ms: 5_000,
            upload_interval_ms: 5_000,
            sweep_interval_ms: 60_000,
        }
    }
}

/// Document store endpoint settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct DocumentStoreConfig {
    /// Upload endpoint URL.
    pub url: String,
    /// RPC deadline in milliseconds.
    #[serde(default = "default_docstore_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_docstore_timeout_ms() -> u64 {
    30_000
}

/// One input container and its routing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ContainerConfig {
    /// Container name (e.g. `bulkscan`).
    pub name: String,
    /// Jurisdiction the container belongs to; declared metadata must agree.
    pub jurisdiction: String,
    /// `true` marks a test container; notifications carry the flag.
    #[serde(default)]
    pub test: bool,
}

/// Top-level runtime configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct IngestConfig {
    /// Log level override (e.g. `"debug"`, `"info"`, `"warn"`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,

    /// Signature verification settings.
    pub signature: SignatureConfig,

    /// Scheduled driver delays.
    pub scheduling: SchedulingConfig,

    /// Grace window: archives modified within the last N minutes are
    /// skipped because the upload may still be in flight.
    pub blob_processing_delay_minutes: u64,

    /// Blob lease TTL in seconds. Must cover worst-case per-file work.
    pub lease_ttl_seconds: u64,

    /// Upload attempts beyond this count leave the envelope in
    /// `UPLOAD_FAILURE` for operator attention.
    pub max_upload_failures: u32,

    /// Minimum age in minutes before the sweeper deletes a processed
    /// envelope's archive.
    pub sweep_grace_minutes: u64,

    /// Document store endpoint; `None` disables the uploader.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document_store: Option<DocumentStoreConfig>,

    /// Input containers and their jurisdiction mapping.
    pub containers: Vec<ContainerConfig>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            log_level: Some("info".into()),
            signature: SignatureConfig::default(),
            scheduling: SchedulingConfig::default(),
            blob_processing_delay_minutes: 5,
            lease_ttl_seconds: 120,
            max_upload_failures: 5,
            sweep_grace_minutes: 60,
            document_store: None,
            containers: Vec::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Recognised log levels.
const VALID_LOG_LEVELS: &[&str] = &["error", "warn", "info", "debug", "trace"];

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

/// Load an [`IngestConfig`] from an optional TOML file path.
///
/// * If `path` is `Some`, reads and parses the file.
/// * If `path` is `None`, returns [`IngestConfig::default()`].
///
/// The `BSI_LOG` environment variable overrides the log level in both
/// cases.
pub fn load_config(path: Option<&Path>) -> Result<IngestConfig, ConfigError> {
    let mut config = match path {
        Some(p) => {
            let content = std::fs::read_to_string(p).map_err(|_| ConfigError::FileNotFound {
                path: p.display().to_string(),
            })?;
            parse_toml(&content)?
        }
        None => IngestConfig::default(),
    };
    if let Ok(level) = std::env::var("BSI_LOG") {
        if !level.is_empty() {
            config.log_level = Some(level);
        }
    }
    Ok(config)
}

/// Parse a TOML string into an [`IngestConfig`].
pub fn parse_toml(content: &str) -> Result<IngestConfig, ConfigError> {
    toml::from_str(content).map_err(|e| ConfigError::ParseError {
        reason: e.to_string(),
    })
}

impl IngestConfig {
    /// Semantic validation. Collects every problem before failing.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut reasons = Vec::new();

        if let Some(level) = &self.log_level {
            if !VALID_LOG_LEVELS.contains(&level.as_str()) {
                reasons.push(format!("unknown log level '{level}'"));
            }
        }
        if self.signature.algorithm == SignatureAlgorithm::Sha256WithRsa
            && self.signature.public_key_path.is_none()
        {
            reasons.push("signature.public_key_path is required for sha256withrsa".into());
        }
        if self.lease_ttl_seconds == 0 {
            reasons.push("lease_ttl_seconds must be positive".into());
        }
        if self.max_upload_failures == 0 {
            reasons.push("max_upload_failures must be positive".into());
        }

        let mut seen = std::collections::BTreeSet::new();
        for c in &self.containers {
            if c.name.trim().is_empty() {
                reasons.push("container with empty name".into());
            }
            if c.jurisdiction.trim().is_empty() {
                reasons.push(format!("container '{}' has empty jurisdiction", c.name));
            }
            if !seen.insert(c.name.as_str()) {
                reasons.push(format!("duplicate container '{}'", c.name));
            }
        }

        if reasons.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::ValidationError { reasons })
        }
    }

    /// Jurisdiction configured for a container, if the container is known.
    pub fn jurisdiction_for(&self, container: &str) -> Option<&str> {
        self.containers
            .iter()
            .find(|c| c.name == container)
            .map(|c| c.jurisdiction.as_str())
    }

    /// `true` when the container is flagged as a test container.
    pub fn is_test_container(&self, container: &str) -> bool {
        self.containers
            .iter()
            .any(|c| c.name == container && c.test)
    }

    /// Read and base64-decode the configured SubjectPublicKeyInfo key file.
    ///
    /// Returns `Ok(None)` when the algorithm is `none`.
    pub fn load_public_key(&self) -> Result<Option<Vec<u8>>, ConfigError> {
        if self.signature.algorithm == SignatureAlgorithm::None {
            return Ok(None);
        }
        let path = self.signature.public_key_path.as_deref().ok_or_else(|| {
            ConfigError::ValidationError {
                reasons: vec!["signature.public_key_path is required for sha256withrsa".into()],
            }
        })?;
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::PublicKey {
            path: path.to_string(),
            reason: e.to_string(),
        })?;
        let der: String = content.split_whitespace().collect();
        let bytes = BASE64.decode(der).map_err(|e| ConfigError::PublicKey {
            path: path.to_string(),
            reason: format!("invalid base64: {e}"),
        })?;
        Ok(Some(bytes))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const FULL_CONFIG: &str = r#"
log_level = "debug"
blob_processing_delay_minutes = 10
lease_ttl_seconds = 300
max_upload_failures = 3
sweep_grace_minutes = 30

[signature]
algorithm = "sha256withrsa"
public_key_path = "/etc/bsi/public-key.der.b64"

[scheduling]
ingestion_interval_ms = 2000
upload_interval_ms = 4000
sweep_interval_ms = 30000

[document_store]
url = "http://localhost:8080/documents"
timeout_ms = 15000

[[containers]]
name = "bulkscan"
jurisdiction = "divorce"

[[containers]]
name = "probate-scans"
jurisdiction = "probate"
test = true
"#;

    #[test]
    fn parses_full_config() {
        let config = parse_toml(FULL_CONFIG).unwrap();
        assert_eq!(config.log_level.as_deref(), Some("debug"));
        assert_eq!(config.signature.algorithm, SignatureAlgorithm::Sha256WithRsa);
        assert_eq!(config.scheduling.ingestion_interval_ms, 2000);
        assert_eq!(config.max_upload_failures, 3);
        assert_eq!(config.document_store.as_ref().unwrap().timeout_ms, 15000);
        assert_eq!(config.jurisdiction_for("bulkscan"), Some("divorce"));
        assert!(config.is_test_container("probate-scans"));
        assert!(!config.is_test_container("bulkscan"));
        config.validate().unwrap();
    }

    #[test]
    fn defaults_are_sane() {
        let config = IngestConfig::default();
        assert_eq!(config.blob_processing_delay_minutes, 5);
        assert_eq!(config.max_upload_failures, 5);
        assert_eq!(config.scheduling.upload_interval_ms, 5_000);
        assert_eq!(config.signature.algorithm, SignatureAlgorithm::Sha256WithRsa);
    }

    #[test]
    fn unknown_algorithm_is_a_parse_error() {
        let err = parse_toml("[signature]\nalgorithm = \"md5withrsa\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }), "{err}");
    }

    #[test]
    fn rsa_without_key_path_fails_validation() {
        let config = parse_toml("[signature]\nalgorithm = \"sha256withrsa\"\n").unwrap();
        let err = config.validate().unwrap_err();
        let ConfigError::ValidationError { reasons } = err else {
            panic!("expected validation error");
        };
        assert!(reasons.iter().any(|r| r.contains("public_key_path")));
    }

    #[test]
    fn none_algorithm_needs_no_key() {
        let config = parse_toml("[signature]\nalgorithm = \"none\"\n").unwrap();
        config.validate().unwrap();
        assert!(config.load_public_key().unwrap().is_none());
    }

    #[test]
    fn duplicate_containers_rejected() {
        let config = parse_toml(
            r#"
[signature]
algorithm = "none"

[[containers]]
name = "bulkscan"
jurisdiction = "divorce"

[[containers]]
name = "bulkscan"
jurisdiction = "probate"
"#,
        )
        .unwrap();
        let err = config.validate().unwrap_err();
        let ConfigError::ValidationError { reasons } = err else {
            panic!("expected validation error");
        };
        assert!(reasons.iter().any(|r| r.contains("duplicate container")));
    }

    #[test]
    fn loads_base64_public_key_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        // "key-bytes" base64-encoded, split over lines like openssl output.
        writeln!(file, "a2V5\nLWJ5dGVz").unwrap();

        let config = IngestConfig {
            signature: SignatureConfig {
                algorithm: SignatureAlgorithm::Sha256WithRsa,
                public_key_path: Some(file.path().display().to_string()),
            },
            ..IngestConfig::default()
        };
        let key = config.load_public_key().unwrap().unwrap();
        assert_eq!(key, b"key-bytes");
    }

    #[test]
    fn missing_key_file_is_a_key_error() {
        let config = IngestConfig {
            signature: SignatureConfig {
                algorithm: SignatureAlgorithm::Sha256WithRsa,
                public_key_path: Some("/nonexistent/key.b64".into()),
            },
            ..IngestConfig::default()
        };
        assert!(matches!(
            config.load_public_key(),
            Err(ConfigError::PublicKey { .. })
        ));
    }

    #[test]
    fn missing_file_reported() {
        let err = load_config(Some(Path::new("/nonexistent/bsi.toml"))).unwrap_err();
        assert!(matches!(err, ConfigError::FileNotFound { .. }));
    }
}
