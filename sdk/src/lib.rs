//! Lenous SDK - client-side building blocks for the Lenous program
//!
//! This SDK provides:
//! - Wallet keystore (generate, persist, load)
//! - User account address derivation
//! - `initialize_user_account` instruction and transaction builders
//! - Ledger RPC with bounded submission
//! - An in-memory ledger for tests (feature `mock`)

pub mod addresses;
pub mod config;
pub mod error;
pub mod instructions;
pub mod keystore;
pub mod rpc;

#[cfg(any(test, feature = "mock"))]
pub mod testing;

// Re-export key types
pub use addresses::{AddressDeriver, CurvePredicate, DerivedAddress, Ed25519Curve, USER_ACCOUNT_SEED};
pub use config::LedgerConfig;
pub use error::{DerivationError, KeyStoreError, LedgerError, LedgerResult};
pub use keystore::KeyStore;
pub use rpc::{LedgerAccount, LedgerRpc, SolanaLedgerRpc, SubmissionOutcome};

/// Decode a base58 string into raw bytes.
///
/// Public keys and signatures both use this encoding.
pub fn decode_base58(encoded: &str) -> Result<Vec<u8>, bs58::decode::Error> {
    bs58::decode(encoded.trim()).into_vec()
}
