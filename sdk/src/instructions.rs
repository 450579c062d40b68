//! Instruction and transaction builders for the Lenous program

use sha2::{Digest, Sha256};
use solana_sdk::{
    hash::Hash,
    instruction::{AccountMeta, Instruction},
    message::Message,
    pubkey::Pubkey,
    signature::Keypair,
    signer::{Signer, SignerError},
    transaction::Transaction,
};
use solana_system_interface::program as system_program;

/// Anchor method name of the user-account initializer.
pub const INITIALIZE_USER_ACCOUNT: &str = "initialize_user_account";

/// Anchor discriminator: the first 8 bytes of `sha256("global:<method>")`.
pub fn instruction_discriminator(method: &str) -> [u8; 8] {
    let mut hasher = Sha256::new();
    hasher.update(format!("global:{method}").as_bytes());
    let hash = hasher.finalize();
    let mut discriminator = [0u8; 8];
    discriminator.copy_from_slice(&hash[..8]);
    discriminator
}

/// Build the `initialize_user_account` instruction.
///
/// The method takes no arguments, so the data is the bare discriminator.
pub fn initialize_user_account(
    program_id: &Pubkey,
    user_account: &Pubkey,
    user: &Pubkey,
) -> Instruction {
    Instruction {
        program_id: *program_id,
        accounts: vec![
            AccountMeta::new(*user_account, false), // Account to create
            AccountMeta::new(*user, true),          // Payer and owner
            AccountMeta::new_readonly(system_program::id(), false),
        ],
        data: instruction_discriminator(INITIALIZE_USER_ACCOUNT).to_vec(),
    }
}

/// Sign a single-instruction transaction paid for by `payer`.
///
/// Fails with `SignerError` if the instruction names a signer other than
/// `payer`.
pub fn build_signed_transaction(
    instruction: Instruction,
    payer: &Keypair,
    recent_blockhash: Hash,
) -> Result<Transaction, SignerError> {
    let message = Message::new(&[instruction], Some(&payer.pubkey()));
    let mut transaction = Transaction::new_unsigned(message);
    transaction.try_sign(&[payer], recent_blockhash)?;
    Ok(transaction)
}

/// Whether `data` invokes `method` on an Anchor program.
pub fn is_invocation_of(data: &[u8], method: &str) -> bool {
    data.len() >= 8 && data[..8] == instruction_discriminator(method)
}
