//! In-memory ledger for exercising the initialization flow without a
//! validator.
//!
//! `MockLedger` verifies signatures and blockhashes, executes
//! `initialize_user_account` against a single program id and reports
//! refusals with the same wording a Solana validator uses, so callers that
//! classify reasons behave identically against both.
//!
//! `ScriptedRpcServer` answers JSON-RPC over plain HTTP on a local port with
//! canned replies, for driving `SolanaLedgerRpc` through responses a real
//! validator only produces under load.

use std::io;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use serde_json::{json, Value};
use solana_sdk::{hash::Hash, pubkey::Pubkey, signature::Signature, transaction::Transaction};
use solana_system_interface::program as system_program;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::debug;

use crate::addresses::AddressDeriver;
use crate::error::{DerivationError, LedgerError, LedgerResult};
use crate::instructions::{is_invocation_of, INITIALIZE_USER_ACCOUNT};
use crate::rpc::{LedgerAccount, LedgerRpc, SubmissionOutcome};

/// Space of a created user account: discriminator plus owner key.
pub const USER_ACCOUNT_SPACE: usize = 8 + 32;

/// Rent-exempt balance the mock assigns to a created user account.
pub const USER_ACCOUNT_LAMPORTS: u64 = 1_169_280;

#[derive(Debug, Clone, Copy)]
struct MockAccount {
    owner: Pubkey,
    lamports: u64,
    data_len: usize,
}

pub struct MockLedger {
    program_id: Pubkey,
    accounts: DashMap<Pubkey, MockAccount>,
    valid_blockhashes: DashSet<Hash>,
    latest: RwLock<Hash>,
    /// Remaining status polls before a signature reports confirmed.
    statuses: DashMap<Signature, u32>,
    submissions: AtomicUsize,
    confirmation_delay: AtomicU32,
    stale_blockhash: AtomicBool,
    unreachable: AtomicBool,
    require_funded_payer: AtomicBool,
    fail_airdrops: AtomicBool,
}

impl MockLedger {
    pub fn new(program_id: Pubkey) -> Self {
        let genesis = Hash::new_unique();
        let valid_blockhashes = DashSet::new();
        valid_blockhashes.insert(genesis);
        Self {
            program_id,
            accounts: DashMap::new(),
            valid_blockhashes,
            latest: RwLock::new(genesis),
            statuses: DashMap::new(),
            submissions: AtomicUsize::new(0),
            confirmation_delay: AtomicU32::new(0),
            stale_blockhash: AtomicBool::new(false),
            unreachable: AtomicBool::new(false),
            require_funded_payer: AtomicBool::new(false),
            fail_airdrops: AtomicBool::new(false),
        }
    }

    pub fn program_id(&self) -> &Pubkey {
        &self.program_id
    }

    /// Number of transactions handed to `submit`, accepted or not.
    pub fn submissions(&self) -> usize {
        self.submissions.load(Ordering::SeqCst)
    }

    pub fn is_initialized(&self, address: &Pubkey) -> bool {
        self.accounts
            .get(address)
            .is_some_and(|account| account.owner == self.program_id)
    }

    /// Create the user account for `wallet` as if an earlier run had done so.
    pub fn preinitialize(&self, wallet: &Pubkey) -> Result<Pubkey, DerivationError> {
        let address = self.expected_user_account(wallet)?;
        self.accounts.insert(address, self.user_account());
        Ok(address)
    }

    /// Credit `lamports` to `address`.
    pub fn fund(&self, address: &Pubkey, lamports: u64) {
        self.accounts
            .entry(*address)
            .and_modify(|account| account.lamports = account.lamports.saturating_add(lamports))
            .or_insert(MockAccount {
                owner: system_program::id(),
                lamports,
                data_len: 0,
            });
    }

    /// Hand out blockhashes the ledger no longer recognizes.
    pub fn set_stale_blockhash(&self, stale: bool) {
        self.stale_blockhash.store(stale, Ordering::SeqCst);
    }

    /// Apply transactions but report them confirmed only after `polls`
    /// status queries; `submit` itself returns `TimedOut`.
    pub fn set_confirmation_delay(&self, polls: u32) {
        self.confirmation_delay.store(polls, Ordering::SeqCst);
    }

    /// Drop every request as if the endpoint were down.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    /// Refuse transactions whose fee payer holds no lamports.
    pub fn set_require_funded_payer(&self, required: bool) {
        self.require_funded_payer.store(required, Ordering::SeqCst);
    }

    pub fn set_fail_airdrops(&self, fail: bool) {
        self.fail_airdrops.store(fail, Ordering::SeqCst);
    }

    /// Deriver for this ledger's program.
    pub fn deriver(&self) -> AddressDeriver {
        AddressDeriver::new(self.program_id)
    }

    fn expected_user_account(&self, wallet: &Pubkey) -> Result<Pubkey, DerivationError> {
        Ok(self.deriver().derive_user_account(wallet)?.address)
    }

    fn user_account(&self) -> MockAccount {
        MockAccount {
            owner: self.program_id,
            lamports: USER_ACCOUNT_LAMPORTS,
            data_len: USER_ACCOUNT_SPACE,
        }
    }

    fn current_blockhash(&self) -> Hash {
        *self.latest.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start a new slot: register a fresh blockhash and make it the latest.
    fn advance_slot(&self) {
        let next = Hash::new_unique();
        self.valid_blockhashes.insert(next);
        *self.latest.write().unwrap_or_else(PoisonError::into_inner) = next;
    }

    fn balance_of(&self, address: &Pubkey) -> u64 {
        self.accounts.get(address).map_or(0, |account| account.lamports)
    }

    /// Run the transaction's instructions; all-or-nothing.
    fn execute(&self, transaction: &Transaction) -> Result<(), String> {
        let keys = &transaction.message.account_keys;
        let mut created = Vec::new();

        for (index, compiled) in transaction.message.instructions.iter().enumerate() {
            let program_id = keys[usize::from(compiled.program_id_index)];
            if program_id != self.program_id {
                return Err(format!(
                    "Transaction simulation failed: Error processing Instruction {index}: \
                     incorrect program id for instruction"
                ));
            }
            if !is_invocation_of(&compiled.data, INITIALIZE_USER_ACCOUNT) {
                return Err(format!(
                    "Transaction simulation failed: Error processing Instruction {index}: \
                     invalid instruction data"
                ));
            }

            let account_at = |position: usize| {
                compiled
                    .accounts
                    .get(position)
                    .map(|key_index| keys[usize::from(*key_index)])
            };
            let (Some(target), Some(user)) = (account_at(0), account_at(1)) else {
                return Err(format!(
                    "Transaction simulation failed: Error processing Instruction {index}: \
                     not enough account keys given to the instruction"
                ));
            };

            let expected = self
                .expected_user_account(&user)
                .map_err(|e| format!("Error processing Instruction {index}: {e}"))?;
            if target != expected {
                return Err(format!(
                    "Transaction simulation failed: Error processing Instruction {index}: \
                     custom program error: 0x7d6; logs: Program log: AnchorError caused by \
                     account: user_account. Error Code: ConstraintSeeds."
                ));
            }
            if self.accounts.contains_key(&target) || created.contains(&target) {
                return Err(format!(
                    "Transaction simulation failed: Error processing Instruction {index}: \
                     custom program error: 0x0; logs: Program {} invoke [2] | \
                     Allocate: account Address {{ address: {target}, base: None }} already in use",
                    system_program::id()
                ));
            }
            created.push(target);
        }

        for address in created {
            self.accounts.insert(address, self.user_account());
        }
        Ok(())
    }
}

#[async_trait]
impl LedgerRpc for MockLedger {
    fn endpoint(&self) -> String {
        "mock://ledger".to_string()
    }

    async fn latest_blockhash(&self) -> LedgerResult<Hash> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(LedgerError::Other("connection refused".to_string()));
        }
        if self.stale_blockhash.load(Ordering::SeqCst) {
            return Ok(Hash::new_unique());
        }
        Ok(self.current_blockhash())
    }

    async fn submit(&self, transaction: &Transaction) -> SubmissionOutcome {
        self.submissions.fetch_add(1, Ordering::SeqCst);
        if self.unreachable.load(Ordering::SeqCst) {
            return SubmissionOutcome::TimedOut;
        }

        if transaction.verify().is_err() {
            return SubmissionOutcome::Rejected(
                "Transaction signature verification failure".to_string(),
            );
        }
        if !self
            .valid_blockhashes
            .contains(&transaction.message.recent_blockhash)
        {
            return SubmissionOutcome::Rejected(
                "Transaction simulation failed: Blockhash not found".to_string(),
            );
        }

        let signature = transaction.signatures[0];
        if self.statuses.contains_key(&signature) {
            return SubmissionOutcome::Rejected(
                "Transaction simulation failed: This transaction has already been processed"
                    .to_string(),
            );
        }

        let payer = transaction.message.account_keys[0];
        if self.require_funded_payer.load(Ordering::SeqCst) && self.balance_of(&payer) == 0 {
            return SubmissionOutcome::Rejected(
                "Transaction simulation failed: Attempt to debit an account but found no \
                 record of a prior credit."
                    .to_string(),
            );
        }

        if let Err(reason) = self.execute(transaction) {
            debug!(%signature, %reason, "mock ledger refused transaction");
            return SubmissionOutcome::Rejected(reason);
        }

        let delay = self.confirmation_delay.load(Ordering::SeqCst);
        self.statuses.insert(signature, delay);
        self.advance_slot();

        if delay == 0 {
            SubmissionOutcome::Confirmed(signature)
        } else {
            SubmissionOutcome::TimedOut
        }
    }

    async fn get_status(&self, signature: &Signature) -> SubmissionOutcome {
        if self.unreachable.load(Ordering::SeqCst) {
            return SubmissionOutcome::TimedOut;
        }
        let Some(mut remaining) = self.statuses.get_mut(signature) else {
            return SubmissionOutcome::TimedOut;
        };
        if *remaining == 0 {
            return SubmissionOutcome::Confirmed(*signature);
        }
        *remaining -= 1;
        if *remaining == 0 {
            SubmissionOutcome::Confirmed(*signature)
        } else {
            SubmissionOutcome::TimedOut
        }
    }

    async fn get_account(&self, address: &Pubkey) -> LedgerResult<Option<LedgerAccount>> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(LedgerError::Other("connection refused".to_string()));
        }
        Ok(self.accounts.get(address).map(|account| LedgerAccount {
            address: *address,
            owner: account.owner,
            lamports: account.lamports,
            data_len: account.data_len,
            executable: false,
        }))
    }

    async fn get_balance(&self, address: &Pubkey) -> LedgerResult<u64> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(LedgerError::Other("connection refused".to_string()));
        }
        Ok(self.balance_of(address))
    }

    async fn request_airdrop(&self, to: &Pubkey, lamports: u64) -> LedgerResult<Signature> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(LedgerError::Other("connection refused".to_string()));
        }
        if self.fail_airdrops.load(Ordering::SeqCst) {
            return Err(LedgerError::Other("airdrop request failed".to_string()));
        }
        self.fund(to, lamports);
        let signature = Signature::new_unique();
        self.statuses.insert(signature, 0);
        Ok(signature)
    }
}

// ================================
// Scripted JSON-RPC endpoint
// ================================

/// Canned answer to one JSON-RPC request.
#[derive(Debug, Clone)]
pub struct RpcReply {
    delay: Duration,
    body: Result<Value, Value>,
}

impl RpcReply {
    pub fn result(value: Value) -> Self {
        Self {
            delay: Duration::ZERO,
            body: Ok(value),
        }
    }

    pub fn error(code: i64, message: &str, data: Value) -> Self {
        Self {
            delay: Duration::ZERO,
            body: Err(json!({ "code": code, "message": message, "data": data })),
        }
    }

    /// Hold the answer back for `delay`.
    #[must_use]
    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Response to `getLatestBlockhash`.
    pub fn blockhash(blockhash: &Hash) -> Self {
        Self::result(json!({
            "context": { "slot": 1 },
            "value": { "blockhash": blockhash.to_string(), "lastValidBlockHeight": 300 },
        }))
    }

    /// Response to `sendTransaction` accepting `signature`.
    pub fn accepted(signature: &Signature) -> Self {
        Self::result(json!(signature.to_string()))
    }

    /// Preflight refusal carrying simulation `logs`.
    pub fn preflight_failure(message: &str, logs: &[&str]) -> Self {
        Self::error(
            -32002,
            message,
            json!({ "err": null, "logs": logs, "accounts": null, "unitsConsumed": 0 }),
        )
    }

    /// Response to `getSignatureStatuses` for one finalized, successful signature.
    pub fn finalized() -> Self {
        Self::result(json!({
            "context": { "slot": 2 },
            "value": [{
                "slot": 2,
                "confirmations": null,
                "status": { "Ok": null },
                "err": null,
                "confirmationStatus": "finalized",
            }],
        }))
    }

    /// Answer for methods the script leaves out.
    fn fallback(method: &str) -> Self {
        match method {
            "getVersion" => Self::result(json!({ "solana-core": "2.2.0", "feature-set": 0 })),
            _ => Self::error(-32601, &format!("Method not found: {method}"), Value::Null),
        }
    }
}

type Script = dyn Fn(&str, usize) -> Option<RpcReply> + Send + Sync;

/// Local HTTP endpoint that answers each JSON-RPC method from a script.
///
/// The script receives the method name and how many earlier calls of that
/// method were made; `None` falls back to a node version for `getVersion`
/// and "method not found" otherwise.
pub struct ScriptedRpcServer {
    url: String,
    calls: Arc<DashMap<String, usize>>,
    accept_loop: JoinHandle<()>,
}

impl ScriptedRpcServer {
    pub async fn start<F>(script: F) -> io::Result<Self>
    where
        F: Fn(&str, usize) -> Option<RpcReply> + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let url = format!("http://{}", listener.local_addr()?);
        let calls = Arc::new(DashMap::new());
        let script: Arc<Script> = Arc::new(script);

        let loop_calls = Arc::clone(&calls);
        let accept_loop = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let script = Arc::clone(&script);
                let calls = Arc::clone(&loop_calls);
                tokio::spawn(async move {
                    if let Err(err) = serve_connection(stream, script, calls).await {
                        debug!(error = %err, "scripted rpc connection closed");
                    }
                });
            }
        });

        Ok(Self {
            url,
            calls,
            accept_loop,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Requests received for `method` so far.
    pub fn calls(&self, method: &str) -> usize {
        self.calls.get(method).map_or(0, |count| *count)
    }
}

impl Drop for ScriptedRpcServer {
    fn drop(&mut self) {
        self.accept_loop.abort();
    }
}

async fn serve_connection(
    mut stream: TcpStream,
    script: Arc<Script>,
    calls: Arc<DashMap<String, usize>>,
) -> io::Result<()> {
    let mut buffer = Vec::new();
    while let Some(body) = read_request(&mut stream, &mut buffer).await? {
        let request: Value = serde_json::from_slice(&body)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        let method = request["method"].as_str().unwrap_or_default().to_string();

        let earlier = {
            let mut count = calls.entry(method.clone()).or_insert(0);
            let earlier = *count;
            *count += 1;
            earlier
        };
        let reply = script(&method, earlier).unwrap_or_else(|| RpcReply::fallback(&method));
        sleep(reply.delay).await;

        let response = match reply.body {
            Ok(result) => json!({ "jsonrpc": "2.0", "result": result, "id": request["id"] }),
            Err(error) => json!({ "jsonrpc": "2.0", "error": error, "id": request["id"] }),
        }
        .to_string();
        let head = format!(
            "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\n\r\n",
            response.len()
        );
        stream.write_all(head.as_bytes()).await?;
        stream.write_all(response.as_bytes()).await?;
        stream.flush().await?;
    }
    Ok(())
}

/// Read one HTTP request and return its body; `None` once the peer closes.
async fn read_request(stream: &mut TcpStream, buffer: &mut Vec<u8>) -> io::Result<Option<Vec<u8>>> {
    loop {
        if let Some(header_end) = buffer.windows(4).position(|window| window == b"\r\n\r\n") {
            let headers = String::from_utf8_lossy(&buffer[..header_end]).to_ascii_lowercase();
            let length = headers
                .lines()
                .find_map(|line| line.strip_prefix("content-length:"))
                .and_then(|value| value.trim().parse::<usize>().ok())
                .unwrap_or(0);
            let total = header_end + 4 + length;
            if buffer.len() >= total {
                let body = buffer[header_end + 4..total].to_vec();
                buffer.drain(..total);
                return Ok(Some(body));
            }
        }

        let mut chunk = [0u8; 4096];
        let read = stream.read(&mut chunk).await?;
        if read == 0 {
            return Ok(None);
        }
        buffer.extend_from_slice(&chunk[..read]);
    }
}

#[cfg(test)]
mod tests {
    use solana_sdk::signature::{Keypair, Signer};

    use super::*;
    use crate::instructions::{build_signed_transaction, initialize_user_account};

    async fn init_tx(ledger: &MockLedger, wallet: &Keypair) -> Transaction {
        let target = ledger.deriver()
            .derive_user_account(&wallet.pubkey())
            .unwrap()
            .address;
        let ix = initialize_user_account(ledger.program_id(), &target, &wallet.pubkey());
        let blockhash = ledger.latest_blockhash().await.unwrap();
        build_signed_transaction(ix, wallet, blockhash).unwrap()
    }

    #[tokio::test]
    async fn test_first_initialization_confirms() {
        let ledger = MockLedger::new(Pubkey::new_unique());
        let wallet = Keypair::new();
        let tx = init_tx(&ledger, &wallet).await;

        let outcome = ledger.submit(&tx).await;

        assert_eq!(outcome, SubmissionOutcome::Confirmed(tx.signatures[0]));
        let target = ledger.deriver()
            .derive_user_account(&wallet.pubkey())
            .unwrap()
            .address;
        assert!(ledger.is_initialized(&target));
    }

    #[tokio::test]
    async fn test_second_initialization_reports_in_use() {
        let ledger = MockLedger::new(Pubkey::new_unique());
        let wallet = Keypair::new();
        ledger.preinitialize(&wallet.pubkey()).unwrap();

        let tx = init_tx(&ledger, &wallet).await;
        match ledger.submit(&tx).await {
            SubmissionOutcome::Rejected(reason) => assert!(reason.contains("already in use")),
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_stale_blockhash_is_refused() {
        let ledger = MockLedger::new(Pubkey::new_unique());
        ledger.set_stale_blockhash(true);
        let tx = init_tx(&ledger, &Keypair::new()).await;

        assert_eq!(
            ledger.submit(&tx).await,
            SubmissionOutcome::Rejected(
                "Transaction simulation failed: Blockhash not found".to_string()
            )
        );
    }

    #[tokio::test]
    async fn test_wrong_address_violates_seeds() {
        let ledger = MockLedger::new(Pubkey::new_unique());
        let wallet = Keypair::new();
        let ix = initialize_user_account(ledger.program_id(), &Pubkey::new_unique(), &wallet.pubkey());
        let blockhash = ledger.latest_blockhash().await.unwrap();
        let tx = build_signed_transaction(ix, &wallet, blockhash).unwrap();

        match ledger.submit(&tx).await {
            SubmissionOutcome::Rejected(reason) => assert!(reason.contains("ConstraintSeeds")),
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_delayed_confirmation() {
        let ledger = MockLedger::new(Pubkey::new_unique());
        ledger.set_confirmation_delay(2);
        let tx = init_tx(&ledger, &Keypair::new()).await;
        let signature = tx.signatures[0];

        assert_eq!(ledger.submit(&tx).await, SubmissionOutcome::TimedOut);
        assert_eq!(ledger.get_status(&signature).await, SubmissionOutcome::TimedOut);
        assert_eq!(
            ledger.get_status(&signature).await,
            SubmissionOutcome::Confirmed(signature)
        );
        // Repeated queries keep answering the same.
        assert_eq!(
            ledger.get_status(&signature).await,
            SubmissionOutcome::Confirmed(signature)
        );
    }

    #[tokio::test]
    async fn test_airdrop_credits_balance() {
        let ledger = MockLedger::new(Pubkey::new_unique());
        let wallet = Pubkey::new_unique();

        let signature = ledger.request_airdrop(&wallet, 500).await.unwrap();

        assert_eq!(ledger.get_balance(&wallet).await.unwrap(), 500);
        assert_eq!(
            ledger.get_status(&signature).await,
            SubmissionOutcome::Confirmed(signature)
        );
    }
}
