//! Ledger RPC: transaction submission and status queries
//!
//! `LedgerRpc` is the seam between the initialization flow and the ledger.
//! `SolanaLedgerRpc` talks JSON-RPC to a single configured endpoint; the
//! `mock` feature provides an in-memory ledger for tests.

use std::fmt::{Debug, Formatter};

use async_trait::async_trait;
use solana_client::{
    client_error::{ClientError, ClientErrorKind},
    nonblocking::rpc_client::RpcClient,
    rpc_config::RpcSendTransactionConfig,
    rpc_request::{RpcError as RpcRequestError, RpcResponseErrorData},
};
use solana_sdk::{
    hash::Hash,
    instruction::InstructionError,
    pubkey::Pubkey,
    signature::Signature,
    transaction::{Transaction, TransactionError},
};
use tokio::time::{sleep, timeout_at, Instant};
use tracing::{debug, info, warn};

use crate::config::LedgerConfig;
use crate::error::{LedgerError, LedgerResult};

/// Result of handing a transaction to the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmissionOutcome {
    /// Included and confirmed at the configured commitment.
    Confirmed(Signature),
    /// Refused by the ledger; the reason is the ledger's own wording.
    Rejected(String),
    /// No confirmation observed within the wait window.
    TimedOut,
}

/// Summary of an on-ledger account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerAccount {
    pub address: Pubkey,
    pub owner: Pubkey,
    pub lamports: u64,
    pub data_len: usize,
    pub executable: bool,
}

#[async_trait]
pub trait LedgerRpc: Send + Sync {
    fn endpoint(&self) -> String;

    async fn latest_blockhash(&self) -> LedgerResult<Hash>;

    /// Send `transaction` and wait, bounded, for its confirmation.
    async fn submit(&self, transaction: &Transaction) -> SubmissionOutcome;

    /// Query the current outcome of `signature`. Safe to repeat.
    ///
    /// `TimedOut` means no confirmation has been observed yet.
    async fn get_status(&self, signature: &Signature) -> SubmissionOutcome;

    async fn get_account(&self, address: &Pubkey) -> LedgerResult<Option<LedgerAccount>>;

    async fn get_balance(&self, address: &Pubkey) -> LedgerResult<u64>;

    async fn request_airdrop(&self, to: &Pubkey, lamports: u64) -> LedgerResult<Signature>;
}

// ================================
// Failure classification
// ================================

/// How a failed RPC call should be treated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum RpcFailure {
    /// The endpoint could not be reached or did not answer; retryable.
    Transport(String),
    /// The ledger answered and refused.
    Rejected(String),
    /// The ledger has already seen this exact transaction.
    AlreadyProcessed(String),
}

pub(crate) fn classify_client_error(err: &ClientError) -> RpcFailure {
    match err.kind() {
        ClientErrorKind::Io(_) | ClientErrorKind::Reqwest(_) => {
            RpcFailure::Transport(err.to_string())
        }
        ClientErrorKind::RpcError(RpcRequestError::RpcResponseError {
            message,
            data: RpcResponseErrorData::SendTransactionPreflightFailure(simulation),
            ..
        }) => {
            let mut reason = message.clone();
            if let Some(logs) = simulation.logs.as_ref().filter(|logs| !logs.is_empty()) {
                reason.push_str("; logs: ");
                reason.push_str(&logs.join(" | "));
            }
            refusal(reason)
        }
        ClientErrorKind::RpcError(RpcRequestError::RpcResponseError { message, .. }) => {
            refusal(message.clone())
        }
        ClientErrorKind::TransactionError(TransactionError::AlreadyProcessed) => {
            RpcFailure::AlreadyProcessed(TransactionError::AlreadyProcessed.to_string())
        }
        ClientErrorKind::TransactionError(tx_err) => {
            RpcFailure::Rejected(describe_transaction_error(tx_err))
        }
        _ => refusal(err.to_string()),
    }
}

/// Validator wording for a duplicate of an already processed transaction.
const ALREADY_PROCESSED: &str = "already been processed";

fn refusal(reason: String) -> RpcFailure {
    if reason.contains(ALREADY_PROCESSED) {
        RpcFailure::AlreadyProcessed(reason)
    } else {
        RpcFailure::Rejected(reason)
    }
}

/// Render a transaction error for a rejection reason.
///
/// Anchor reserves custom codes from 100 upward, so code 0 inside an Anchor
/// instruction is the system program's `AccountAlreadyInUse`.
pub fn describe_transaction_error(err: &TransactionError) -> String {
    match err {
        TransactionError::InstructionError(_, InstructionError::Custom(0)) => {
            format!("{err} (account already in use)")
        }
        _ => err.to_string(),
    }
}

// ================================
// Solana JSON-RPC implementation
// ================================

pub struct SolanaLedgerRpc {
    client: RpcClient,
    config: LedgerConfig,
}

impl Debug for SolanaLedgerRpc {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "SolanaLedgerRpc {{ url: {:?} }}", self.config.rpc_url)
    }
}

impl SolanaLedgerRpc {
    pub fn new(config: LedgerConfig) -> LedgerResult<Self> {
        config.validate()?;
        let client = RpcClient::new_with_timeout_and_commitment(
            config.rpc_url.clone(),
            config.request_timeout,
            config.commitment,
        );
        Ok(Self { client, config })
    }

    fn send_config(&self) -> RpcSendTransactionConfig {
        RpcSendTransactionConfig {
            skip_preflight: false,
            preflight_commitment: Some(self.config.commitment.commitment),
            ..RpcSendTransactionConfig::default()
        }
    }

    /// Send until the ledger accepts or refuses, retrying transport failures
    /// until `deadline`.
    ///
    /// A duplicate refusal after a lost attempt means that attempt reached
    /// the ledger, so the signature is handed on for confirmation.
    async fn send_until(
        &self,
        transaction: &Transaction,
        deadline: Instant,
    ) -> Result<Signature, SubmissionOutcome> {
        let mut attempts = 0u32;
        let mut lost_attempts = 0u32;
        loop {
            attempts += 1;
            let sent = timeout_at(
                deadline,
                self.client
                    .send_transaction_with_config(transaction, self.send_config()),
            )
            .await;

            match sent {
                Err(_elapsed) => {
                    warn!(attempts, "send did not complete within the wait window");
                    return Err(SubmissionOutcome::TimedOut);
                }
                Ok(Ok(signature)) => {
                    debug!(%signature, attempts, "transaction accepted for processing");
                    return Ok(signature);
                }
                Ok(Err(err)) => match classify_client_error(&err) {
                    RpcFailure::AlreadyProcessed(reason) if lost_attempts > 0 => {
                        let signature = transaction.signatures[0];
                        info!(%signature, lost_attempts, %reason, "earlier send reached the ledger");
                        return Ok(signature);
                    }
                    RpcFailure::Rejected(reason) | RpcFailure::AlreadyProcessed(reason) => {
                        warn!(%reason, "ledger rejected transaction");
                        return Err(SubmissionOutcome::Rejected(reason));
                    }
                    RpcFailure::Transport(cause) => {
                        lost_attempts += 1;
                        if self.next_poll_misses(deadline) {
                            warn!(attempts, %cause, "endpoint unreachable for the whole wait window");
                            return Err(SubmissionOutcome::TimedOut);
                        }
                        warn!(
                            "Send failed, retrying in {:?} (attempt {}): {}",
                            self.config.poll_interval, attempts, cause
                        );
                        sleep(self.config.poll_interval).await;
                    }
                },
            }
        }
    }

    /// Poll signature status until confirmed, refused or `deadline`.
    async fn await_confirmation(&self, signature: &Signature, deadline: Instant) -> SubmissionOutcome {
        loop {
            match timeout_at(deadline, self.get_status(signature)).await {
                Err(_elapsed) => return SubmissionOutcome::TimedOut,
                Ok(SubmissionOutcome::TimedOut) => {}
                Ok(outcome) => return outcome,
            }
            if self.next_poll_misses(deadline) {
                info!(%signature, "no confirmation within {:?}", self.config.confirm_timeout);
                return SubmissionOutcome::TimedOut;
            }
            sleep(self.config.poll_interval).await;
        }
    }

    fn next_poll_misses(&self, deadline: Instant) -> bool {
        match Instant::now().checked_add(self.config.poll_interval) {
            Some(next) => next >= deadline,
            None => true,
        }
    }
}

#[async_trait]
impl LedgerRpc for SolanaLedgerRpc {
    fn endpoint(&self) -> String {
        self.config.rpc_url.clone()
    }

    async fn latest_blockhash(&self) -> LedgerResult<Hash> {
        Ok(self.client.get_latest_blockhash().await?)
    }

    async fn submit(&self, transaction: &Transaction) -> SubmissionOutcome {
        let Some(deadline) = Instant::now().checked_add(self.config.confirm_timeout) else {
            warn!(timeout = ?self.config.confirm_timeout, "wait window out of range");
            return SubmissionOutcome::TimedOut;
        };
        match self.send_until(transaction, deadline).await {
            Ok(signature) => self.await_confirmation(&signature, deadline).await,
            Err(outcome) => outcome,
        }
    }

    async fn get_status(&self, signature: &Signature) -> SubmissionOutcome {
        // `None` until the transaction reaches the configured commitment.
        let status = self
            .client
            .get_signature_status_with_commitment(signature, self.config.commitment)
            .await;

        match status {
            Ok(Some(Ok(()))) => SubmissionOutcome::Confirmed(*signature),
            Ok(Some(Err(err))) => SubmissionOutcome::Rejected(describe_transaction_error(&err)),
            Ok(None) => SubmissionOutcome::TimedOut,
            Err(err) => {
                debug!(%signature, error = %err, "status query failed");
                SubmissionOutcome::TimedOut
            }
        }
    }

    async fn get_account(&self, address: &Pubkey) -> LedgerResult<Option<LedgerAccount>> {
        let response = self
            .client
            .get_account_with_commitment(address, self.config.commitment)
            .await?;
        Ok(response.value.map(|account| LedgerAccount {
            address: *address,
            owner: account.owner,
            lamports: account.lamports,
            data_len: account.data.len(),
            executable: account.executable,
        }))
    }

    async fn get_balance(&self, address: &Pubkey) -> LedgerResult<u64> {
        Ok(self.client.get_balance(address).await?)
    }

    async fn request_airdrop(&self, to: &Pubkey, lamports: u64) -> LedgerResult<Signature> {
        self.client
            .request_airdrop(to, lamports)
            .await
            .map_err(LedgerError::from)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use solana_client::rpc_response::RpcSimulateTransactionResult;
    use solana_sdk::signature::{Keypair, Signer};

    use super::*;
    use crate::instructions::{build_signed_transaction, initialize_user_account};
    use crate::testing::{RpcReply, ScriptedRpcServer};

    fn preflight_error(message: &str, logs: &[&str]) -> ClientError {
        let simulation: RpcSimulateTransactionResult =
            serde_json::from_value(serde_json::json!({ "err": null, "logs": logs })).unwrap();
        ClientError::from(ClientErrorKind::RpcError(RpcRequestError::RpcResponseError {
            code: -32002,
            message: message.to_string(),
            data: RpcResponseErrorData::SendTransactionPreflightFailure(simulation),
        }))
    }

    fn signed_transaction() -> Transaction {
        let payer = Keypair::new();
        let ix = initialize_user_account(&Pubkey::new_unique(), &Pubkey::new_unique(), &payer.pubkey());
        build_signed_transaction(ix, &payer, Hash::new_unique()).unwrap()
    }

    #[test]
    fn test_transport_errors_are_retryable() {
        let err = ClientError::from(ClientErrorKind::Io(std::io::Error::new(
            std::io::ErrorKind::ConnectionRefused,
            "connection refused",
        )));
        assert!(matches!(classify_client_error(&err), RpcFailure::Transport(_)));
    }

    #[test]
    fn test_stale_blockhash_is_rejected() {
        let err = ClientError::from(ClientErrorKind::TransactionError(
            TransactionError::BlockhashNotFound,
        ));
        assert_eq!(
            classify_client_error(&err),
            RpcFailure::Rejected("Blockhash not found".to_string())
        );
    }

    #[test]
    fn test_custom_zero_is_annotated() {
        let err = TransactionError::InstructionError(0, InstructionError::Custom(0));
        assert!(describe_transaction_error(&err).ends_with("(account already in use)"));

        let other = TransactionError::InstructionError(0, InstructionError::Custom(6000));
        assert!(!describe_transaction_error(&other).contains("already in use"));
    }

    #[test]
    fn test_new_validates_config() {
        let config = LedgerConfig::new("");
        assert!(matches!(
            SolanaLedgerRpc::new(config),
            Err(LedgerError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_unbounded_confirm_window_is_refused() {
        let config = LedgerConfig::new("http://127.0.0.1:8899")
            .with_confirm_timeout(Duration::from_secs(u64::MAX));
        assert!(matches!(
            SolanaLedgerRpc::new(config),
            Err(LedgerError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_preflight_logs_are_kept_in_reason() {
        let address = Pubkey::new_unique();
        let in_use = format!("Allocate: account Address {{ address: {address}, base: None }} already in use");
        let err = preflight_error(
            "Transaction simulation failed: Error processing Instruction 0: custom program error: 0x0",
            &[
                "Program 11111111111111111111111111111111 invoke [2]",
                &in_use,
                "Program 11111111111111111111111111111111 failed: custom program error: 0x0",
            ],
        );

        let RpcFailure::Rejected(reason) = classify_client_error(&err) else {
            panic!("expected a rejection");
        };
        assert!(reason.starts_with("Transaction simulation failed: Error processing Instruction 0"));
        assert!(reason.contains("; logs: Program 11111111111111111111111111111111 invoke [2] | "));
        assert!(reason.contains(&in_use));
    }

    #[test]
    fn test_preflight_without_logs_keeps_message() {
        let err = preflight_error("Transaction simulation failed: Blockhash not found", &[]);
        assert_eq!(
            classify_client_error(&err),
            RpcFailure::Rejected("Transaction simulation failed: Blockhash not found".to_string())
        );
    }

    #[test]
    fn test_duplicate_submission_is_recognized() {
        let err = preflight_error(
            "Transaction simulation failed: This transaction has already been processed",
            &[],
        );
        assert!(matches!(classify_client_error(&err), RpcFailure::AlreadyProcessed(_)));

        let err = ClientError::from(ClientErrorKind::TransactionError(
            TransactionError::AlreadyProcessed,
        ));
        assert!(matches!(classify_client_error(&err), RpcFailure::AlreadyProcessed(_)));
    }

    #[tokio::test]
    async fn test_lost_send_then_duplicate_awaits_confirmation() {
        let transaction = signed_transaction();
        let signature = transaction.signatures[0];
        let server = ScriptedRpcServer::start(move |method, earlier| match (method, earlier) {
            // The first answer arrives after the client gave up on it.
            ("sendTransaction", 0) => {
                Some(RpcReply::accepted(&signature).delayed(Duration::from_secs(2)))
            }
            ("sendTransaction", _) => Some(RpcReply::preflight_failure(
                "Transaction simulation failed: This transaction has already been processed",
                &[],
            )),
            ("getSignatureStatuses", _) => Some(RpcReply::finalized()),
            _ => None,
        })
        .await
        .unwrap();

        let rpc = SolanaLedgerRpc::new(
            LedgerConfig::new(server.url())
                .with_request_timeout(Duration::from_millis(300))
                .with_poll_interval(Duration::from_millis(50))
                .with_confirm_timeout(Duration::from_secs(10)),
        )
        .unwrap();

        assert_eq!(
            rpc.submit(&transaction).await,
            SubmissionOutcome::Confirmed(signature)
        );
        assert_eq!(server.calls("sendTransaction"), 2);
        assert!(server.calls("getSignatureStatuses") >= 1);
    }

    #[tokio::test]
    async fn test_duplicate_without_lost_send_is_rejected() {
        let transaction = signed_transaction();
        let server = ScriptedRpcServer::start(|method, _| match method {
            "sendTransaction" => Some(RpcReply::preflight_failure(
                "Transaction simulation failed: This transaction has already been processed",
                &[],
            )),
            _ => None,
        })
        .await
        .unwrap();

        let rpc = SolanaLedgerRpc::new(
            LedgerConfig::new(server.url()).with_poll_interval(Duration::from_millis(50)),
        )
        .unwrap();

        match rpc.submit(&transaction).await {
            SubmissionOutcome::Rejected(reason) => assert!(reason.contains("already been processed")),
            other => panic!("expected rejection, got {other:?}"),
        }
        assert_eq!(server.calls("getSignatureStatuses"), 0);
    }
}
