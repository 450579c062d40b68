use lenous_sdk::addresses::{derive, AddressDeriver, MAX_SEED_LEN, USER_ACCOUNT_SEED};
use proptest::prelude::*;
use solana_sdk::pubkey::Pubkey;

/// Property: derivation is a pure function of program id and seeds
#[test]
fn prop_derivation_is_deterministic() {
    proptest!(|(
        program_id in any::<[u8; 32]>(),
        seeds in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..=MAX_SEED_LEN), 1..4),
    )| {
        let program_id = Pubkey::new_from_array(program_id);
        let seed_refs: Vec<&[u8]> = seeds.iter().map(Vec::as_slice).collect();

        let first = derive(&program_id, &seed_refs).unwrap();
        let second = derive(&program_id, &seed_refs).unwrap();

        prop_assert_eq!(first, second);
        prop_assert!(!first.address.is_on_curve());
    });
}

/// Property: derivation agrees with the ledger's own search
#[test]
fn prop_user_account_matches_ledger() {
    proptest!(ProptestConfig::with_cases(64), |(
        program_id in any::<[u8; 32]>(),
        wallet in any::<[u8; 32]>(),
    )| {
        let program_id = Pubkey::new_from_array(program_id);
        let wallet = Pubkey::new_from_array(wallet);

        let derived = AddressDeriver::new(program_id)
            .derive_user_account(&wallet)
            .unwrap();
        let (address, bump) =
            Pubkey::find_program_address(&[USER_ACCOUNT_SEED, wallet.as_ref()], &program_id);

        prop_assert_eq!(derived.address, address);
        prop_assert_eq!(derived.bump, bump);
    });
}

/// Property: distinct wallets never share a user account
#[test]
fn prop_distinct_wallets_get_distinct_accounts() {
    proptest!(ProptestConfig::with_cases(64), |(
        a in any::<[u8; 32]>(),
        b in any::<[u8; 32]>(),
    )| {
        prop_assume!(a != b);
        let deriver = AddressDeriver::new(Pubkey::new_unique());

        let first = deriver.derive_user_account(&Pubkey::new_from_array(a)).unwrap();
        let second = deriver.derive_user_account(&Pubkey::new_from_array(b)).unwrap();

        prop_assert_ne!(first.address, second.address);
    });
}
