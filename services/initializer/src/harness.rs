//! User account initialization flow
//!
//! One run walks a fixed sequence: select a wallet, derive its user account
//! address, optionally fund the wallet, build and sign the
//! `initialize_user_account` transaction, submit it, and classify the result.
//! Every terminal state is returned in an [`InitializationReport`].

use std::fmt::{self, Display, Formatter};
use std::path::PathBuf;
use std::sync::Arc;

use lenous_sdk::instructions::{build_signed_transaction, initialize_user_account};
use lenous_sdk::{
    DerivationError, DerivedAddress, KeyStore, KeyStoreError, LedgerError, LedgerRpc,
    SubmissionOutcome,
};
use serde::{Serialize, Serializer};
use solana_sdk::{
    pubkey::Pubkey,
    signature::{Keypair, Signature},
    signer::{Signer, SignerError},
    transaction::Transaction,
};
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::config::HarnessConfig;

/// Errors that end a run before a submission outcome exists.
#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("wallet selection failed: {0}")]
    KeyStore(#[from] KeyStoreError),

    #[error("address derivation failed: {0}")]
    Derivation(#[from] DerivationError),

    #[error("ledger query failed: {0}")]
    Ledger(#[from] LedgerError),

    #[error("transaction signing failed: {0}")]
    Signing(#[from] SignerError),
}

/// Which wallet a run acts for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalletSelection {
    /// Generate a fresh keypair and persist it in the keystore.
    Generate,
    /// Load the keystore entry for this public key.
    Existing(Pubkey),
    /// Load a key file from an arbitrary path.
    File(PathBuf),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum InitializationOutcome {
    Initialized {
        #[serde(serialize_with = "as_display")]
        address: Pubkey,
        #[serde(serialize_with = "as_display")]
        signature: Signature,
    },
    AlreadyInitialized {
        #[serde(serialize_with = "as_display")]
        address: Pubkey,
    },
    Failed {
        reason: String,
    },
    TimedOut {
        #[serde(serialize_with = "as_display")]
        signature: Signature,
    },
}

impl InitializationOutcome {
    /// Whether the user account is known to exist after the run.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Initialized { .. } | Self::AlreadyInitialized { .. })
    }
}

impl Display for InitializationOutcome {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Initialized { address, signature } => {
                write!(f, "initialized {address} (signature {signature})")
            }
            Self::AlreadyInitialized { address } => write!(f, "already initialized {address}"),
            Self::Failed { reason } => write!(f, "failed: {reason}"),
            Self::TimedOut { signature } => {
                write!(f, "timed out; check signature {signature} later")
            }
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct InitializationReport {
    #[serde(serialize_with = "as_display")]
    pub wallet: Pubkey,
    pub wallet_file: PathBuf,
    #[serde(serialize_with = "as_display")]
    pub user_account: Pubkey,
    pub bump: u8,
    pub outcome: InitializationOutcome,
}

impl InitializationReport {
    pub fn derived(&self) -> DerivedAddress {
        DerivedAddress {
            address: self.user_account,
            bump: self.bump,
        }
    }
}

fn as_display<T: Display, S: Serializer>(value: &T, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(value)
}

pub struct InitializationHarness<R> {
    config: HarnessConfig,
    keystore: KeyStore,
    rpc: Arc<R>,
}

impl<R: LedgerRpc> InitializationHarness<R> {
    pub fn new(config: HarnessConfig, rpc: Arc<R>) -> Self {
        let keystore = KeyStore::new(config.keystore_root.clone());
        Self {
            config,
            keystore,
            rpc,
        }
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    pub fn keystore(&self) -> &KeyStore {
        &self.keystore
    }

    /// Run the initialization flow once for `selection`.
    pub async fn run(&self, selection: WalletSelection) -> Result<InitializationReport, HarnessError> {
        let (wallet, wallet_file) = self.select_wallet(selection)?;
        let derived = self.derive_target(&wallet.pubkey())?;
        info!(
            wallet = %wallet.pubkey(),
            user_account = %derived.address,
            bump = derived.bump,
            "derived user account"
        );

        let report = |outcome| InitializationReport {
            wallet: wallet.pubkey(),
            wallet_file: wallet_file.clone(),
            user_account: derived.address,
            bump: derived.bump,
            outcome,
        };

        if let Err(reason) = self.ensure_funded(&wallet.pubkey()).await {
            warn!(wallet = %wallet.pubkey(), %reason, "funding failed");
            return Ok(report(InitializationOutcome::Failed { reason }));
        }

        let transaction = self.build_transaction(&wallet, &derived.address).await?;
        let outcome = self.submit(&transaction, &derived.address).await;
        info!(wallet = %wallet.pubkey(), %outcome, "initialization finished");

        Ok(report(outcome))
    }

    /// Address of the user account owned by `wallet`.
    pub fn derive_target(&self, wallet: &Pubkey) -> Result<DerivedAddress, HarnessError> {
        Ok(self.config.derive_user_account(wallet)?)
    }

    fn select_wallet(&self, selection: WalletSelection) -> Result<(Keypair, PathBuf), HarnessError> {
        match selection {
            WalletSelection::Generate => {
                let keypair = self.keystore.generate_and_persist()?;
                let location = self.keystore.location_for(&keypair.pubkey());
                info!(wallet = %keypair.pubkey(), path = %location.display(), "generated wallet");
                Ok((keypair, location))
            }
            WalletSelection::Existing(pubkey) => {
                let keypair = self.keystore.load_wallet(&pubkey)?;
                Ok((keypair, self.keystore.location_for(&pubkey)))
            }
            WalletSelection::File(path) => {
                let keypair = self.keystore.load(&path)?;
                Ok((keypair, path))
            }
        }
    }

    /// Top the wallet up to `fund_lamports` through an airdrop.
    async fn ensure_funded(&self, wallet: &Pubkey) -> Result<(), String> {
        let target = self.config.fund_lamports;
        if target == 0 {
            return Ok(());
        }

        let balance = self
            .rpc
            .get_balance(wallet)
            .await
            .map_err(|e| format!("balance query failed: {e}"))?;
        if balance >= target {
            debug!(%wallet, balance, "wallet already funded");
            return Ok(());
        }

        let signature = self
            .rpc
            .request_airdrop(wallet, target - balance)
            .await
            .map_err(|e| format!("airdrop request failed: {e}"))?;
        info!(%wallet, lamports = target - balance, %signature, "requested airdrop");

        match self.poll_status(&signature).await {
            SubmissionOutcome::Confirmed(_) => Ok(()),
            SubmissionOutcome::Rejected(reason) => Err(format!("airdrop {signature} rejected: {reason}")),
            SubmissionOutcome::TimedOut => Err(format!("airdrop {signature} was not confirmed")),
        }
    }

    async fn build_transaction(&self, wallet: &Keypair, target: &Pubkey) -> Result<Transaction, HarnessError> {
        let instruction = initialize_user_account(&self.config.program_id, target, &wallet.pubkey());
        let blockhash = self.rpc.latest_blockhash().await?;
        debug!(endpoint = %self.rpc.endpoint(), %blockhash, "signing against latest blockhash");
        Ok(build_signed_transaction(instruction, wallet, blockhash)?)
    }

    async fn submit(&self, transaction: &Transaction, target: &Pubkey) -> InitializationOutcome {
        let signature = transaction.signatures[0];

        let outcome = match self.rpc.submit(transaction).await {
            SubmissionOutcome::TimedOut => {
                info!(%signature, "submission not confirmed in time, polling status");
                self.poll_status(&signature).await
            }
            outcome => outcome,
        };

        match outcome {
            SubmissionOutcome::Confirmed(signature) => InitializationOutcome::Initialized {
                address: *target,
                signature,
            },
            SubmissionOutcome::Rejected(reason) if self.is_already_initialized(&reason) => {
                debug!(%reason, "rejection means the account exists");
                InitializationOutcome::AlreadyInitialized { address: *target }
            }
            SubmissionOutcome::Rejected(reason) => InitializationOutcome::Failed { reason },
            SubmissionOutcome::TimedOut => InitializationOutcome::TimedOut { signature },
        }
    }

    /// Query `signature` up to `max_status_polls` times.
    async fn poll_status(&self, signature: &Signature) -> SubmissionOutcome {
        for attempt in 1..=self.config.max_status_polls {
            match self.rpc.get_status(signature).await {
                SubmissionOutcome::TimedOut => {
                    debug!(%signature, attempt, "still pending");
                }
                outcome => return outcome,
            }
            if attempt < self.config.max_status_polls {
                sleep(self.config.status_poll_interval).await;
            }
        }
        SubmissionOutcome::TimedOut
    }

    fn is_already_initialized(&self, reason: &str) -> bool {
        let reason = reason.to_lowercase();
        self.config
            .already_initialized_markers
            .iter()
            .any(|marker| reason.contains(&marker.to_lowercase()))
    }
}
