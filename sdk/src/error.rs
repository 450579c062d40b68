//! Error types for keystore, derivation and ledger operations

use std::path::PathBuf;

use thiserror::Error;

// ================================
// Keystore Errors
// ================================

/// Errors raised while generating, persisting or loading wallet keys.
///
/// Messages carry paths and public keys only, never key bytes.
#[derive(Debug, Error)]
pub enum KeyStoreError {
    #[error("random source unavailable: {0}")]
    RandomSourceUnavailable(String),

    #[error("keystore entry not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("corrupt keystore entry {}: {reason}", .path.display())]
    CorruptData { path: PathBuf, reason: String },

    #[error("keystore io error at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl KeyStoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn corrupt(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::CorruptData {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

// ================================
// Derivation Errors
// ================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DerivationError {
    /// No bump in `[0, 255]` produced an off-curve address.
    #[error("no bump seed in [0, 255] yields an off-curve address")]
    ExhaustedBumpSpace,

    #[error("seed component of {0} bytes exceeds the 32 byte limit")]
    MaxSeedLengthExceeded(usize),

    #[error("{0} seed components exceed the limit of 15")]
    TooManySeeds(usize),
}

// ================================
// Ledger Errors
// ================================

/// Failures of ledger queries that are not themselves submission outcomes.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("RPC error: {0}")]
    Rpc(Box<solana_client::client_error::ClientError>),

    #[error("invalid ledger configuration: {0}")]
    InvalidConfiguration(String),

    #[error("ledger error: {0}")]
    Other(String),
}

impl From<solana_client::client_error::ClientError> for LedgerError {
    fn from(err: solana_client::client_error::ClientError) -> Self {
        Self::Rpc(Box::new(err))
    }
}

pub type LedgerResult<T> = std::result::Result<T, LedgerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_corrupt_message_names_path() {
        let err = KeyStoreError::corrupt("/tmp/wallets/abc_secret_key.json", "expected 64 bytes");
        let msg = err.to_string();
        assert!(msg.contains("abc_secret_key.json"));
        assert!(msg.contains("expected 64 bytes"));
    }

    #[test]
    fn test_io_error_keeps_source() {
        use std::error::Error as _;

        let err = KeyStoreError::io(
            "/tmp/x",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        assert!(err.source().is_some());
    }
}
