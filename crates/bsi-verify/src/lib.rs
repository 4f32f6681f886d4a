// SPDX-License-Identifier: MIT OR Apache-2.0
//! bsi-verify
#![deny(unsafe_code)]
#![warn(missing_docs)]
//!
//! Verification of the signed outer archive.
//!
//! The wire format is byte-exact: a ZIP with exactly two entries whose
//! names are case-insensitively `envelope.zip` (the inner archive) and
//! `signature` (a detached RSA PKCS#1 v1.5 SHA-256 signature over the
//! inner archive bytes). Anything else is a signature failure; the
//! verifier never guesses at malformed input.

use bsi_error::IngestFailure;
use rsa::RsaPublicKey;
use rsa::pkcs1v15::{Signature, VerifyingKey};
use rsa::pkcs8::DecodePublicKey;
use rsa::signature::Verifier;
use sha2::Sha256;
use std::io::{Cursor, Read};
use tracing::debug;

/// Canonical (lowercased) name of the inner-archive entry.
const ENVELOPE_ENTRY: &str = "envelope.zip";
/// Canonical (lowercased) name of the signature entry.
const SIGNATURE_ENTRY: &str = "signature";

// ---------------------------------------------------------------------------
// Construction
// ---------------------------------------------------------------------------

/// Error constructing a [`ZipVerifier`] from configuration.
#[derive(Debug, thiserror::Error)]
pub enum VerifierInitError {
    /// The configured public key was not a valid X.509
    /// SubjectPublicKeyInfo document.
    #[error("public key decode error: {0}")]
    KeyDecode(String),
}

#[derive(Debug)]
enum Mode {
    /// SHA-256 with RSA over the inner archive bytes.
    Sha256WithRsa(Box<VerifyingKey<Sha256>>),
    /// Verification bypassed. Test profiles only.
    Disabled,
}

/// Verifier over the signed outer archive.
#[derive(Debug)]
pub struct ZipVerifier {
    mode: Mode,
}

/// Identifies the archive being verified; carried into failure reasons.
///
/// A plain value: stream, key, and filenames travel together with no
/// hidden shared state.
#[derive(Debug, Clone, Copy)]
pub struct ArchiveContext<'a> {
    /// Input container.
    pub container: &'a str,
    /// Archive filename.
    pub zip_file_name: &'a str,
}

impl ZipVerifier {
    /// Build a verifier from DER-encoded X.509 SubjectPublicKeyInfo bytes.
    pub fn sha256_with_rsa(spki_der: &[u8]) -> Result<Self, VerifierInitError> {
        let key = RsaPublicKey::from_public_key_der(spki_der)
            .map_err(|e| VerifierInitError::KeyDecode(e.to_string()))?;
        Ok(Self {
            mode: Mode::Sha256WithRsa(Box::new(VerifyingKey::new(key))),
        })
    }

    /// Build a verifier that bypasses signature checks. Test profiles only.
    pub fn disabled() -> Self {
        Self {
            mode: Mode::Disabled,
        }
    }

    /// Verify the outer archive and return the inner archive bytes.
    ///
    /// Every defect (wrong entry count or names, a signature that does not
    /// verify, a malformed outer archive) is an
    /// [`IngestFailure::Signature`] carrying a human-readable reason.
    pub fn verify(
        &self,
        ctx: ArchiveContext<'_>,
        outer: &[u8],
    ) -> Result<Vec<u8>, IngestFailure> {
        let (envelope, signature) = split_outer(ctx, outer)?;

        match &self.mode {
            Mode::Disabled => {
                debug!(
                    target: "bsi.verify",
                    container = ctx.container,
                    zip = ctx.zip_file_name,
                    "signature verification bypassed"
                );
            }
            Mode::Sha256WithRsa(key) => {
                let sig = Signature::try_from(signature.as_slice()).map_err(|e| {
                    signature_failure(ctx, format!("invalid signature encoding: {e}"))
                })?;
                key.verify(&envelope, &sig).map_err(|_| {
                    signature_failure(ctx, "signature verification false".to_string())
                })?;
            }
        }
        Ok(envelope)
    }
}

fn signature_failure(ctx: ArchiveContext<'_>, detail: String) -> IngestFailure {
    IngestFailure::Signature {
        reason: format!("{}/{}: {detail}", ctx.container, ctx.zip_file_name),
    }
}

// ---------------------------------------------------------------------------
// Outer archive parsing
// ---------------------------------------------------------------------------

/// Split the outer archive into `(envelope.zip bytes, signature bytes)`.
///
/// The archive must hold exactly those two entries, matched
/// case-insensitively.
fn split_outer(
    ctx: ArchiveContext<'_>,
    outer: &[u8],
) -> Result<(Vec<u8>, Vec<u8>), IngestFailure> {
    let mut archive = zip::ZipArchive::new(Cursor::new(outer))
        .map_err(|e| signature_failure(ctx, format!("outer archive is not a valid zip: {e}")))?;

    if archive.len() != 2 {
        return Err(signature_failure(
            ctx,
            format!("expected 2 outer entries, found {}", archive.len()),
        ));
    }

    let mut envelope = None;
    let mut signature = None;
    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|e| signature_failure(ctx, format!("unreadable outer entry: {e}")))?;
        let name = entry.name().to_ascii_lowercase();
        let mut bytes = Vec::with_capacity(entry.size() as usize);
        entry
            .read_to_end(&mut bytes)
            .map_err(|e| signature_failure(ctx, format!("unreadable outer entry {name}: {e}")))?;
        match name.as_str() {
            ENVELOPE_ENTRY => envelope = Some(bytes),
            SIGNATURE_ENTRY => signature = Some(bytes),
            other => {
                return Err(signature_failure(
                    ctx,
                    format!("unexpected outer entry {other:?}"),
                ));
            }
        }
    }

    match (envelope, signature) {
        (Some(e), Some(s)) => Ok((e, s)),
        _ => Err(signature_failure(
            ctx,
            "outer archive must contain envelope.zip and signature".to_string(),
        )),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
