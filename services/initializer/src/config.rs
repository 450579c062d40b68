//! Service configuration

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use lenous_sdk::addresses::MAX_SEED_LEN;
use lenous_sdk::config::{parse_commitment, DEFAULT_RPC_URL};
use lenous_sdk::{AddressDeriver, DerivationError, DerivedAddress, LedgerConfig, USER_ACCOUNT_SEED};
use solana_sdk::pubkey::Pubkey;

pub const ENV_PROGRAM_ID: &str = "LENOUS_PROGRAM_ID";
pub const ENV_RPC_URL: &str = "LENOUS_RPC_URL";
pub const ENV_COMMITMENT: &str = "LENOUS_COMMITMENT";
pub const ENV_KEYSTORE: &str = "LENOUS_KEYSTORE";
pub const ENV_SEED_TAG: &str = "LENOUS_SEED_TAG";
pub const ENV_CONFIRM_TIMEOUT_SECS: &str = "LENOUS_CONFIRM_TIMEOUT_SECS";
pub const ENV_POLL_INTERVAL_MS: &str = "LENOUS_POLL_INTERVAL_MS";
pub const ENV_MAX_STATUS_POLLS: &str = "LENOUS_MAX_STATUS_POLLS";
pub const ENV_FUND_LAMPORTS: &str = "LENOUS_FUND_LAMPORTS";
pub const ENV_ALREADY_INITIALIZED_MARKERS: &str = "LENOUS_ALREADY_INITIALIZED_MARKERS";

/// Wallet files land next to the working directory unless configured.
pub const DEFAULT_KEYSTORE: &str = "./wallets";

/// Rejection fragments that mean the user account already exists.
pub const DEFAULT_ALREADY_INITIALIZED_MARKERS: &[&str] = &["already in use", "already initialized"];

#[derive(Clone, Debug)]
pub struct HarnessConfig {
    /// Program that owns the user accounts
    pub program_id: Pubkey,

    /// Ledger endpoint and submission window
    pub ledger: LedgerConfig,

    /// Directory holding `{pubkey}_secret_key.json` files
    pub keystore_root: PathBuf,

    /// First seed component of the user account address
    pub seed_tag: Vec<u8>,

    /// Status queries after a submission times out
    pub max_status_polls: u32,

    /// Delay between those status queries
    pub status_poll_interval: Duration,

    /// Minimum wallet balance before submitting; 0 disables funding
    pub fund_lamports: u64,

    /// Case-insensitive fragments classifying a rejection as already initialized
    pub already_initialized_markers: Vec<String>,
}

impl HarnessConfig {
    pub fn new(program_id: Pubkey) -> Self {
        let ledger = LedgerConfig::default();
        Self {
            program_id,
            status_poll_interval: ledger.poll_interval,
            ledger,
            keystore_root: expand_path(DEFAULT_KEYSTORE),
            seed_tag: USER_ACCOUNT_SEED.to_vec(),
            max_status_polls: 10,
            fund_lamports: 0,
            already_initialized_markers: DEFAULT_ALREADY_INITIALIZED_MARKERS
                .iter()
                .map(|marker| (*marker).to_string())
                .collect(),
        }
    }

    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from `lookup`, which maps variable names to
    /// values the way the process environment does.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let program_id = lookup(ENV_PROGRAM_ID)
            .context("LENOUS_PROGRAM_ID not set")?
            .trim()
            .parse()
            .context("Invalid LENOUS_PROGRAM_ID")?;

        let mut config = Self::new(program_id);
        config.ledger = ledger_config_from_lookup(&lookup)?;
        config.status_poll_interval = config.ledger.poll_interval;
        config.keystore_root = keystore_root_from_lookup(&lookup);

        if let Some(tag) = lookup(ENV_SEED_TAG) {
            config.seed_tag = tag.into_bytes();
        }
        config.max_status_polls =
            parse_var(&lookup, ENV_MAX_STATUS_POLLS)?.unwrap_or(config.max_status_polls);
        config.fund_lamports = parse_var(&lookup, ENV_FUND_LAMPORTS)?.unwrap_or(0);
        if let Some(markers) = lookup(ENV_ALREADY_INITIALIZED_MARKERS) {
            config.already_initialized_markers = markers
                .split(',')
                .map(str::trim)
                .filter(|marker| !marker.is_empty())
                .map(str::to_string)
                .collect();
        }

        config.validate()?;
        Ok(config)
    }

    /// Address of the user account owned by `wallet`. Needs no ledger access.
    pub fn derive_user_account(&self, wallet: &Pubkey) -> Result<DerivedAddress, DerivationError> {
        AddressDeriver::new(self.program_id).derive(&[self.seed_tag.as_slice(), wallet.as_ref()])
    }

    pub fn validate(&self) -> Result<()> {
        self.ledger.validate()?;
        if self.seed_tag.is_empty() || self.seed_tag.len() > MAX_SEED_LEN {
            bail!(
                "seed tag must be 1..={MAX_SEED_LEN} bytes, got {}",
                self.seed_tag.len()
            );
        }
        if self.status_poll_interval.is_zero() {
            bail!("status poll interval must be non-zero");
        }
        Ok(())
    }
}

/// Ledger settings from `lookup`, falling back to localnet defaults.
pub fn ledger_config_from_lookup(lookup: &impl Fn(&str) -> Option<String>) -> Result<LedgerConfig> {
    let mut ledger = LedgerConfig::new(lookup(ENV_RPC_URL).unwrap_or_else(|| DEFAULT_RPC_URL.to_string()));

    if let Some(level) = lookup(ENV_COMMITMENT) {
        ledger = ledger.with_commitment(parse_commitment(&level).context("Invalid LENOUS_COMMITMENT")?);
    }
    if let Some(secs) = parse_var::<u64>(lookup, ENV_CONFIRM_TIMEOUT_SECS)? {
        ledger = ledger.with_confirm_timeout(Duration::from_secs(secs));
    }
    if let Some(millis) = parse_var::<u64>(lookup, ENV_POLL_INTERVAL_MS)? {
        ledger = ledger.with_poll_interval(Duration::from_millis(millis));
    }

    ledger.validate()?;
    Ok(ledger)
}

pub fn keystore_root_from_lookup(lookup: &impl Fn(&str) -> Option<String>) -> PathBuf {
    expand_path(&lookup(ENV_KEYSTORE).unwrap_or_else(|| DEFAULT_KEYSTORE.to_string()))
}

/// Expand a leading `~` to the home directory.
pub fn expand_path(raw: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(raw).as_ref())
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    lookup(key)
        .map(|raw| {
            raw.trim()
                .parse::<T>()
                .with_context(|| format!("Invalid {key}: `{raw}`"))
        })
        .transpose()
}
