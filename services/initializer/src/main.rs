//! Lenous initializer command-line tool

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use lenous_initializer::config::{
    expand_path, keystore_root_from_lookup, ledger_config_from_lookup, ENV_COMMITMENT,
    ENV_KEYSTORE, ENV_PROGRAM_ID, ENV_RPC_URL,
};
use lenous_initializer::{HarnessConfig, InitializationHarness, WalletSelection};
use lenous_sdk::{DerivedAddress, KeyStore, LedgerRpc, SolanaLedgerRpc, SubmissionOutcome};
use solana_sdk::{pubkey::Pubkey, signature::Signature, signer::Signer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "lenous-init")]
#[command(about = "Create Lenous user accounts for local wallets")]
#[command(version)]
struct Cli {
    /// RPC endpoint URL
    #[arg(long, global = true, env = ENV_RPC_URL)]
    rpc_url: Option<String>,

    /// Program that owns the user accounts
    #[arg(long, global = true, env = ENV_PROGRAM_ID)]
    program_id: Option<String>,

    /// Directory holding wallet key files
    #[arg(long, global = true, env = ENV_KEYSTORE)]
    keystore: Option<String>,

    /// Commitment level: processed, confirmed or finalized
    #[arg(long, global = true, env = ENV_COMMITMENT)]
    commitment: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the user account of a wallet
    Init {
        /// Use the keystore entry for this public key
        #[arg(long, conflicts_with = "keypair")]
        wallet: Option<Pubkey>,

        /// Use the key file at this path
        #[arg(long)]
        keypair: Option<PathBuf>,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Generate wallets into the keystore
    Generate {
        #[arg(long, default_value_t = 3)]
        count: usize,
    },
    /// List wallets in the keystore
    List,
    /// Print the user account address of a wallet
    Derive {
        #[arg(long)]
        wallet: Pubkey,
    },
    /// Query the status of a submitted transaction
    Status { signature: Signature },
    /// Show an account on the ledger
    Inspect { address: Pubkey },
    /// Decode a base58 string into its byte array
    Decode { encoded: String },
}

impl Cli {
    /// Command-line values take precedence over the process environment.
    fn lookup(&self, key: &str) -> Option<String> {
        let flag = match key {
            ENV_RPC_URL => self.rpc_url.clone(),
            ENV_PROGRAM_ID => self.program_id.clone(),
            ENV_KEYSTORE => self.keystore.clone(),
            ENV_COMMITMENT => self.commitment.clone(),
            _ => None,
        };
        flag.or_else(|| std::env::var(key).ok())
    }

    fn harness_config(&self) -> Result<HarnessConfig> {
        HarnessConfig::from_lookup(|key| self.lookup(key))
    }

    fn keystore(&self) -> KeyStore {
        KeyStore::new(keystore_root_from_lookup(&|key: &str| self.lookup(key)))
    }

    /// User account of `wallet`; computed locally.
    fn derive(&self, wallet: &Pubkey) -> Result<DerivedAddress> {
        let config = self.harness_config()?;
        config
            .derive_user_account(wallet)
            .context("Failed to derive user account")
    }

    fn ledger(&self) -> Result<SolanaLedgerRpc> {
        let ledger = ledger_config_from_lookup(&|key: &str| self.lookup(key))?;
        SolanaLedgerRpc::new(ledger).context("Failed to create RPC client")
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    match &cli.command {
        Commands::Init {
            wallet,
            keypair,
            json,
        } => {
            let config = cli.harness_config()?;
            info!(
                program_id = %config.program_id,
                rpc_url = %config.ledger.rpc_url,
                "Starting user account initialization"
            );
            let rpc = Arc::new(SolanaLedgerRpc::new(config.ledger.clone())?);
            let harness = InitializationHarness::new(config, rpc);

            let selection = match (wallet, keypair) {
                (Some(pubkey), _) => WalletSelection::Existing(*pubkey),
                (None, Some(path)) => WalletSelection::File(expand_path(&path.to_string_lossy())),
                (None, None) => WalletSelection::Generate,
            };
            let report = harness.run(selection).await?;

            if *json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("Wallet:       {}", report.wallet);
                println!("Key file:     {}", report.wallet_file.display());
                println!("User account: {} (bump {})", report.user_account, report.bump);
                println!("Outcome:      {}", report.outcome);
            }

            Ok(if report.outcome.is_success() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        Commands::Generate { count } => {
            let keystore = cli.keystore();
            for i in 0..*count {
                let keypair = keystore
                    .generate_and_persist()
                    .context("Failed to generate wallet")?;
                let pubkey = keypair.pubkey();
                println!("Wallet {}:", i + 1);
                println!("Public Key: {pubkey}");
                println!("Secret Key Path: {}", keystore.location_for(&pubkey).display());
                println!("----------------------------------------");
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::List => {
            let keystore = cli.keystore();
            for pubkey in keystore.list().context("Failed to list keystore")? {
                println!("{pubkey}");
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::Derive { wallet } => {
            let derived = cli.derive(wallet)?;
            println!("{} (bump {})", derived.address, derived.bump);
            Ok(ExitCode::SUCCESS)
        }
        Commands::Status { signature } => {
            let outcome = cli.ledger()?.get_status(signature).await;
            match outcome {
                SubmissionOutcome::Confirmed(_) => println!("confirmed"),
                SubmissionOutcome::Rejected(reason) => println!("rejected: {reason}"),
                SubmissionOutcome::TimedOut => println!("not confirmed"),
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::Inspect { address } => {
            let account = cli
                .ledger()?
                .get_account(address)
                .await
                .context("Failed to fetch account")?;
            match account {
                Some(account) => {
                    println!("Address:    {}", account.address);
                    println!("Owner:      {}", account.owner);
                    println!("Lamports:   {}", account.lamports);
                    println!("Data bytes: {}", account.data_len);
                    println!("Executable: {}", account.executable);
                }
                None => println!("{address} does not exist"),
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::Decode { encoded } => {
            let bytes = lenous_sdk::decode_base58(encoded).context("Invalid base58 input")?;
            println!("{bytes:?}");
            Ok(ExitCode::SUCCESS)
        }
    }
}
