//! Signed package verification and expansion.
//!
//! A package is a 64-byte Ed25519 signature followed by a gzip-compressed
//! tar payload. The signature covers the payload bytes. The trusted
//! certificate file holds the 32-byte verifying key, hex encoded.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use ed25519_dalek::{Signature, VerifyingKey, SIGNATURE_LENGTH};
use flate2::read::GzDecoder;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PackageError {
    #[error("Validation certificate not found: {}", .0.display())]
    CertificateMissing(PathBuf),

    #[error("trusted certificate is invalid: {0}")]
    CertificateInvalid(String),

    /// The package is not signed by the trusted key.
    #[error("package signature rejected: {0}")]
    Signature(String),

    #[error("package could not be unpacked: {0}")]
    Unpack(String),

    #[error("package IO error: {0}")]
    Io(#[from] io::Error),
}

impl PackageError {
    pub fn is_signature_failure(&self) -> bool {
        matches!(self, PackageError::Signature(_))
    }
}

/// Checks an uploaded archive and expands it into a target directory.
pub trait PackageVerifier: Send + Sync {
    fn decompress_and_verify(&self, archive: &Path, target: &Path, trusted_cert: &Path) -> Result<(), PackageError>;
}

/// Ed25519-signed `.tar.gz` packages.
#[derive(Debug, Clone, Copy, Default)]
pub struct SignedTarballVerifier;

/// Parse a hex-encoded Ed25519 verifying key.
pub fn load_verifying_key(path: &Path) -> Result<VerifyingKey, PackageError> {
    if !path.is_file() {
        return Err(PackageError::CertificateMissing(path.to_path_buf()));
    }
    let text = fs::read_to_string(path)?;
    let bytes = hex::decode(text.trim()).map_err(|e| PackageError::CertificateInvalid(e.to_string()))?;
    let bytes: [u8; 32] = bytes
        .try_into()
        .map_err(|_| PackageError::CertificateInvalid("expected a 32-byte key".to_string()))?;
    VerifyingKey::from_bytes(&bytes).map_err(|e| PackageError::CertificateInvalid(e.to_string()))
}

impl PackageVerifier for SignedTarballVerifier {
    fn decompress_and_verify(&self, archive: &Path, target: &Path, trusted_cert: &Path) -> Result<(), PackageError> {
        let key = load_verifying_key(trusted_cert)?;
        let contents = fs::read(archive)?;

        if contents.len() < SIGNATURE_LENGTH {
            return Err(PackageError::Signature("package is shorter than its signature".to_string()));
        }
        let (signature, payload) = contents.split_at(SIGNATURE_LENGTH);
        let signature = Signature::from_slice(signature).map_err(|e| PackageError::Signature(e.to_string()))?;
        key.verify_strict(payload, &signature)
            .map_err(|e| PackageError::Signature(e.to_string()))?;

        let mut unpacker = tar::Archive::new(GzDecoder::new(payload));
        for entry in unpacker.entries().map_err(|e| PackageError::Unpack(e.to_string()))? {
            let mut entry = entry.map_err(|e| PackageError::Unpack(e.to_string()))?;
            // unpack_in refuses paths that would land outside `target`.
            let inside = entry
                .unpack_in(target)
                .map_err(|e| PackageError::Unpack(e.to_string()))?;
            if !inside {
                let name = entry
                    .path()
                    .map(|p| p.display().to_string())
                    .unwrap_or_default();
                return Err(PackageError::Unpack(format!("entry escapes target: {}", name)));
            }
        }

        tracing::info!(
            archive = %archive.display(),
            target = %target.display(),
            "Package verified and expanded"
        );
        Ok(())
    }
}
