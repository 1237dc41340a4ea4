//! Source fingerprinting
//!
//! Reads a module's source file and produces a stable digest used to
//! detect meaningful changes. When canonicalization is enabled the source
//! is normalized first, so formatting-only edits do not produce a new
//! fingerprint.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use sha2::{Digest, Sha256};
use tracing::debug;

/// Opaque, order-sensitive digest of (canonicalized) source text.
///
/// Equal post-canonicalization source always yields equal fingerprints.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Digest raw bytes.
    pub fn of_bytes(bytes: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        Self(format!("{:x}", hasher.finalize()))
    }

    /// Hex form of the digest.
    pub fn as_hex(&self) -> &str {
        &self.0
    }
}

/// Fingerprinting error types
#[derive(Debug, thiserror::Error)]
pub enum FingerprintError {
    /// File missing or unreadable at scan time. Treated as transient (the
    /// file may be mid-write): the caller keeps the previous fingerprint.
    #[error("source unreadable: {path}: {source}")]
    SourceUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The canonicalizer could not process the source (e.g. malformed
    /// syntax). Surfaced visibly; the previous fingerprint is kept so the
    /// same change is re-evaluated on the next poll.
    #[error("canonicalization failed for {path}: {reason}")]
    Canonicalization { path: PathBuf, reason: String },
}

/// External source canonicalizer (minifier/normalizer).
///
/// Pure and deterministic for identical input; invoked before hashing to
/// strip behavior-irrelevant differences.
pub trait Canonicalizer: Send + Sync {
    fn canonicalize(&self, source: &str) -> Result<String, CanonicalizeError>;
}

/// Error reported by a [`Canonicalizer`].
#[derive(Debug, Clone, thiserror::Error)]
#[error("{0}")]
pub struct CanonicalizeError(pub String);

/// Computes fingerprints of module source files.
#[derive(Clone)]
pub struct SourceFingerprinter {
    canonicalizer: Option<Arc<dyn Canonicalizer>>,
}

impl SourceFingerprinter {
    /// Fingerprinter that always hashes raw bytes.
    pub fn new() -> Self {
        Self {
            canonicalizer: None,
        }
    }

    /// Attach a canonicalizer, used when a fingerprint is requested with
    /// `canonicalize = true`.
    pub fn with_canonicalizer(mut self, canonicalizer: Arc<dyn Canonicalizer>) -> Self {
        self.canonicalizer = Some(canonicalizer);
        self
    }

    /// Fingerprint the file at `path`.
    ///
    /// With `canonicalize` set and a canonicalizer attached, UTF-8 sources
    /// are normalized before hashing; non-UTF-8 sources fall back to raw
    /// bytes.
    pub fn fingerprint(
        &self,
        path: &Path,
        canonicalize: bool,
    ) -> Result<Fingerprint, FingerprintError> {
        let bytes = std::fs::read(path).map_err(|source| FingerprintError::SourceUnreadable {
            path: path.to_path_buf(),
            source,
        })?;

        if canonicalize {
            if let Some(canonicalizer) = &self.canonicalizer {
                match std::str::from_utf8(&bytes) {
                    Ok(text) => {
                        let canonical = canonicalizer.canonicalize(text).map_err(|e| {
                            FingerprintError::Canonicalization {
                                path: path.to_path_buf(),
                                reason: e.0,
                            }
                        })?;
                        return Ok(Fingerprint::of_bytes(canonical.as_bytes()));
                    }
                    Err(_) => {
                        debug!("Source at {:?} is not UTF-8, hashing raw bytes", path);
                    }
                }
            }
        }

        Ok(Fingerprint::of_bytes(&bytes))
    }
}

impl Default for SourceFingerprinter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StripSpaces;

    impl Canonicalizer for StripSpaces {
        fn canonicalize(&self, source: &str) -> Result<String, CanonicalizeError> {
            Ok(source.chars().filter(|c| !c.is_whitespace()).collect())
        }
    }

    struct AlwaysFails;

    impl Canonicalizer for AlwaysFails {
        fn canonicalize(&self, _source: &str) -> Result<String, CanonicalizeError> {
            Err(CanonicalizeError("parse error".to_string()))
        }
    }

    #[test]
    fn test_fingerprint_stable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("widget.src");
        std::fs::write(&path, "class Widget: pass").unwrap();

        let fp = SourceFingerprinter::new();
        let a = fp.fingerprint(&path, false).unwrap();
        let b = fp.fingerprint(&path, false).unwrap();
        assert_eq!(a, b);

        std::fs::write(&path, "class Widget: changed").unwrap();
        let c = fp.fingerprint(&path, false).unwrap();
        assert_ne!(a, c);
    }

    #[test]
    fn test_canonicalized_ignores_whitespace() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("widget.src");
        std::fs::write(&path, "class Widget: pass").unwrap();

        let fp = SourceFingerprinter::new().with_canonicalizer(Arc::new(StripSpaces));
        let a = fp.fingerprint(&path, true).unwrap();

        std::fs::write(&path, "class   Widget:\n    pass\n").unwrap();
        let b = fp.fingerprint(&path, true).unwrap();
        assert_eq!(a, b);

        // But the raw hash does see the edit.
        std::fs::write(&path, "class Widget: pass").unwrap();
        let raw_a = fp.fingerprint(&path, false).unwrap();
        std::fs::write(&path, "class   Widget:\n    pass\n").unwrap();
        let raw_b = fp.fingerprint(&path, false).unwrap();
        assert_ne!(raw_a, raw_b);
    }

    #[test]
    fn test_missing_file_is_source_unreadable() {
        let fp = SourceFingerprinter::new();
        let err = fp
            .fingerprint(Path::new("/nonexistent/widget.src"), false)
            .unwrap_err();
        assert!(matches!(err, FingerprintError::SourceUnreadable { .. }));
    }

    #[test]
    fn test_canonicalization_failure_is_distinct() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("widget.src");
        std::fs::write(&path, "class Widget(: pass").unwrap();

        let fp = SourceFingerprinter::new().with_canonicalizer(Arc::new(AlwaysFails));
        let err = fp.fingerprint(&path, true).unwrap_err();
        assert!(matches!(err, FingerprintError::Canonicalization { .. }));
    }
}
