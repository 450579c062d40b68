//! Ledger connection configuration

use std::time::Duration;

use solana_sdk::commitment_config::CommitmentConfig;

use crate::error::{LedgerError, LedgerResult};

pub const DEFAULT_RPC_URL: &str = "http://127.0.0.1:8899";

/// Longest accepted confirmation window or request timeout.
pub const MAX_TIMEOUT: Duration = Duration::from_secs(60 * 60);

/// Connection settings for a single ledger endpoint.
#[derive(Debug, Clone)]
pub struct LedgerConfig {
    /// RPC endpoint URL
    pub rpc_url: String,

    /// Commitment level a submission must reach to count as confirmed
    pub commitment: CommitmentConfig,

    /// Timeout applied to each individual HTTP request
    pub request_timeout: Duration,

    /// Bounded wait window for a submission to be confirmed
    pub confirm_timeout: Duration,

    /// Delay between signature status polls and transport retries
    pub poll_interval: Duration,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            rpc_url: DEFAULT_RPC_URL.to_string(),
            commitment: CommitmentConfig::confirmed(),
            request_timeout: Duration::from_secs(10),
            confirm_timeout: Duration::from_secs(30),
            poll_interval: Duration::from_millis(500),
        }
    }
}

impl LedgerConfig {
    pub fn new(rpc_url: impl Into<String>) -> Self {
        Self {
            rpc_url: rpc_url.into(),
            ..Self::default()
        }
    }

    pub fn with_commitment(mut self, commitment: CommitmentConfig) -> Self {
        self.commitment = commitment;
        self
    }

    pub fn with_confirm_timeout(mut self, timeout: Duration) -> Self {
        self.confirm_timeout = timeout;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn validate(&self) -> LedgerResult<()> {
        if self.rpc_url.trim().is_empty() {
            return Err(LedgerError::InvalidConfiguration(
                "rpc_url must not be empty".to_string(),
            ));
        }
        if self.poll_interval.is_zero() {
            return Err(LedgerError::InvalidConfiguration(
                "poll_interval must be non-zero".to_string(),
            ));
        }
        for (name, value) in [
            ("confirm_timeout", self.confirm_timeout),
            ("request_timeout", self.request_timeout),
        ] {
            if value > MAX_TIMEOUT {
                return Err(LedgerError::InvalidConfiguration(format!(
                    "{name} {value:?} exceeds the maximum of {MAX_TIMEOUT:?}"
                )));
            }
        }
        if self.confirm_timeout < self.poll_interval {
            return Err(LedgerError::InvalidConfiguration(format!(
                "confirm_timeout {:?} is shorter than poll_interval {:?}",
                self.confirm_timeout, self.poll_interval
            )));
        }
        Ok(())
    }
}

/// Parse a commitment level name as accepted by the Solana CLI.
pub fn parse_commitment(level: &str) -> LedgerResult<CommitmentConfig> {
    match level.trim().to_ascii_lowercase().as_str() {
        "processed" => Ok(CommitmentConfig::processed()),
        "confirmed" => Ok(CommitmentConfig::confirmed()),
        "finalized" => Ok(CommitmentConfig::finalized()),
        other => Err(LedgerError::InvalidConfiguration(format!(
            "unknown commitment level `{other}`"
        ))),
    }
}
