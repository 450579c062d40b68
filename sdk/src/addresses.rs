//! Program-derived address (PDA) derivation
//!
//! A derived address is a SHA-256 digest of the seed components, a one-byte
//! bump and the program id, chosen so that it does *not* decode to a point on
//! the ed25519 curve. Such an address has no private key; only the program
//! can sign for it.
//!
//! Bumps are searched from 255 downward and the first off-curve candidate
//! wins, which makes the result a pure function of `(program_id, seeds)` and
//! identical to `Pubkey::find_program_address` on the ledger side.

use sha2::{Digest, Sha256};
use solana_sdk::pubkey::Pubkey;

use crate::error::DerivationError;

/// Seed tag of the per-wallet user account.
pub const USER_ACCOUNT_SEED: &[u8] = b"user_account";

/// Maximum number of caller seeds; the bump occupies the last of 16 slots.
pub const MAX_SEEDS: usize = 15;

/// Maximum length of a single seed component.
pub const MAX_SEED_LEN: usize = 32;

/// Domain separator appended by the ledger when hashing PDA candidates.
const PDA_MARKER: &[u8] = b"ProgramDerivedAddress";

/// Decides whether a 32-byte candidate is a valid curve point.
pub trait CurvePredicate {
    fn is_on_curve(&self, candidate: &[u8; 32]) -> bool;
}

/// The ed25519 curve used by Solana signing keys.
#[derive(Debug, Clone, Copy, Default)]
pub struct Ed25519Curve;

impl CurvePredicate for Ed25519Curve {
    fn is_on_curve(&self, candidate: &[u8; 32]) -> bool {
        Pubkey::new_from_array(*candidate).is_on_curve()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DerivedAddress {
    pub address: Pubkey,
    pub bump: u8,
}

/// Derives addresses owned by a single program.
#[derive(Debug, Clone)]
pub struct AddressDeriver<C = Ed25519Curve> {
    program_id: Pubkey,
    curve: C,
}

impl AddressDeriver {
    pub fn new(program_id: Pubkey) -> Self {
        Self {
            program_id,
            curve: Ed25519Curve,
        }
    }
}

impl<C: CurvePredicate> AddressDeriver<C> {
    pub fn with_curve(program_id: Pubkey, curve: C) -> Self {
        Self { program_id, curve }
    }

    pub fn program_id(&self) -> &Pubkey {
        &self.program_id
    }

    /// Find the first off-curve address for `seeds`, searching bumps 255..=0.
    pub fn derive(&self, seeds: &[&[u8]]) -> Result<DerivedAddress, DerivationError> {
        if seeds.len() > MAX_SEEDS {
            return Err(DerivationError::TooManySeeds(seeds.len()));
        }
        if let Some(seed) = seeds.iter().find(|seed| seed.len() > MAX_SEED_LEN) {
            return Err(DerivationError::MaxSeedLengthExceeded(seed.len()));
        }

        for bump in (0..=u8::MAX).rev() {
            let candidate = self.candidate(seeds, bump);
            if !self.curve.is_on_curve(&candidate) {
                return Ok(DerivedAddress {
                    address: Pubkey::new_from_array(candidate),
                    bump,
                });
            }
        }
        Err(DerivationError::ExhaustedBumpSpace)
    }

    /// Derive the user account PDA for `wallet`.
    pub fn derive_user_account(&self, wallet: &Pubkey) -> Result<DerivedAddress, DerivationError> {
        self.derive(&[USER_ACCOUNT_SEED, wallet.as_ref()])
    }

    fn candidate(&self, seeds: &[&[u8]], bump: u8) -> [u8; 32] {
        let mut hasher = Sha256::new();
        for seed in seeds {
            hasher.update(seed);
        }
        hasher.update([bump]);
        hasher.update(self.program_id.as_ref());
        hasher.update(PDA_MARKER);
        hasher.finalize().into()
    }
}

/// Derive the address for `seeds` under `program_id` on the ed25519 curve.
pub fn derive(program_id: &Pubkey, seeds: &[&[u8]]) -> Result<DerivedAddress, DerivationError> {
    AddressDeriver::new(*program_id).derive(seeds)
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;

    struct AlwaysOnCurve;

    impl CurvePredicate for AlwaysOnCurve {
        fn is_on_curve(&self, _candidate: &[u8; 32]) -> bool {
            true
        }
    }

    /// Reports the first `rejections` candidates as on-curve.
    struct RejectFirst {
        rejections: u32,
        calls: Cell<u32>,
    }

    impl CurvePredicate for RejectFirst {
        fn is_on_curve(&self, _candidate: &[u8; 32]) -> bool {
            let call = self.calls.get();
            self.calls.set(call + 1);
            call < self.rejections
        }
    }

    #[test]
    fn test_matches_ledger_derivation() {
        let program_id = Pubkey::new_unique();
        let wallet = Pubkey::new_unique();

        let derived = derive(&program_id, &[USER_ACCOUNT_SEED, wallet.as_ref()]).unwrap();
        let expected =
            Pubkey::find_program_address(&[USER_ACCOUNT_SEED, wallet.as_ref()], &program_id);

        assert_eq!((derived.address, derived.bump), expected);
    }

    #[test]
    fn test_derived_address_is_off_curve() {
        let deriver = AddressDeriver::new(Pubkey::new_unique());
        let derived = deriver.derive_user_account(&Pubkey::new_unique()).unwrap();
        assert!(!derived.address.is_on_curve());
    }

    #[test]
    fn test_program_id_changes_address() {
        let wallet = Pubkey::new_unique();
        let a = AddressDeriver::new(Pubkey::new_unique())
            .derive_user_account(&wallet)
            .unwrap();
        let b = AddressDeriver::new(Pubkey::new_unique())
            .derive_user_account(&wallet)
            .unwrap();
        assert_ne!(a.address, b.address);
    }

    #[test]
    fn test_bumps_are_searched_downward() {
        let deriver = AddressDeriver::with_curve(
            Pubkey::new_unique(),
            RejectFirst {
                rejections: 3,
                calls: Cell::new(0),
            },
        );
        let derived = deriver.derive(&[b"seed"]).unwrap();
        assert_eq!(derived.bump, 252);
    }

    #[test]
    fn test_only_bump_zero_left() {
        let deriver = AddressDeriver::with_curve(
            Pubkey::new_unique(),
            RejectFirst {
                rejections: 255,
                calls: Cell::new(0),
            },
        );
        assert_eq!(deriver.derive(&[b"seed"]).unwrap().bump, 0);
    }

    #[test]
    fn test_exhausted_bump_space() {
        let deriver = AddressDeriver::with_curve(Pubkey::new_unique(), AlwaysOnCurve);
        assert_eq!(
            deriver.derive(&[USER_ACCOUNT_SEED]),
            Err(DerivationError::ExhaustedBumpSpace)
        );
    }

    #[test]
    fn test_seed_limits() {
        let deriver = AddressDeriver::new(Pubkey::new_unique());

        let long = [7u8; MAX_SEED_LEN + 1];
        assert_eq!(
            deriver.derive(&[&long]),
            Err(DerivationError::MaxSeedLengthExceeded(MAX_SEED_LEN + 1))
        );

        let seed: &[u8] = b"s";
        let seeds = vec![seed; MAX_SEEDS + 1];
        assert_eq!(
            deriver.derive(&seeds),
            Err(DerivationError::TooManySeeds(MAX_SEEDS + 1))
        );

        let max = [7u8; MAX_SEED_LEN];
        assert!(deriver.derive(&[&max]).is_ok());
    }
}
