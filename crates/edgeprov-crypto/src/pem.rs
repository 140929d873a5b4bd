//! Structural PEM checks.
//!
//! These do not parse DER; they only make sure a blob carries at least one
//! complete `BEGIN`/`END` pair of the expected kind so obviously wrong
//! content (empty strings, placeholders, a key where a certificate belongs)
//! is rejected before it reaches disk.

use crate::error::CryptoError;

/// What a PEM blob is expected to contain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PemKind {
    Certificate,
    PrivateKey,
}

impl PemKind {
    const fn labels(self) -> &'static [&'static str] {
        match self {
            Self::Certificate => &["CERTIFICATE"],
            Self::PrivateKey => &["PRIVATE KEY", "RSA PRIVATE KEY", "EC PRIVATE KEY"],
        }
    }

    const fn describe(self) -> &'static str {
        match self {
            Self::Certificate => "a PEM certificate",
            Self::PrivateKey => "a PEM private key",
        }
    }
}

/// True if `text` contains at least one complete block of `kind`.
pub fn has_pem_block(text: &str, kind: PemKind) -> bool {
    kind.labels().iter().any(|label| {
        let begin = format!("-----BEGIN {label}-----");
        let end = format!("-----END {label}-----");
        text.find(&begin)
            .is_some_and(|start| text[start + begin.len()..].contains(&end))
    })
}

/// Number of complete certificate blocks in `text` (chain length).
pub fn certificate_count(text: &str) -> usize {
    text.matches("-----END CERTIFICATE-----").count()
}

/// Fail with [`CryptoError::InvalidPem`] unless `text` holds a block of `kind`.
pub fn require_pem(text: &str, kind: PemKind) -> Result<(), CryptoError> {
    if has_pem_block(text, kind) {
        Ok(())
    } else {
        Err(CryptoError::InvalidPem {
            expected: kind.describe(),
        })
    }
}
