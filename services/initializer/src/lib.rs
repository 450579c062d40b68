//! Lenous Initializer Service
//!
//! Creates the per-wallet user account of the Lenous program:
//! - Selects or generates a wallet keypair
//! - Derives the wallet's user account address
//! - Submits `initialize_user_account` and classifies the outcome

pub mod config;
pub mod harness;

pub use config::HarnessConfig;
pub use harness::{
    HarnessError, InitializationHarness, InitializationOutcome, InitializationReport,
    WalletSelection,
};
