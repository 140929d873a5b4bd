//! Crypto error types.

/// Errors from identity material handling.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("Certificate generation failed: {0}")]
    Generation(String),

    #[error("Invalid PEM: expected {expected}")]
    InvalidPem { expected: &'static str },
}
