//! Filesystem keystore for wallet keypairs
//!
//! Each wallet lives in its own file, `{root}/{pubkey}_secret_key.json`,
//! holding the 64 secret-key bytes as a JSON array (the Solana CLI format).
//!
//! Writes go through a temporary file in the target directory followed by a
//! rename, so a reader never observes a partially written key. Concurrent
//! `persist`/`load` calls against the *same* location are not coordinated
//! here; callers that share a location must serialize access themselves.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use rand::{rngs::OsRng, RngCore};
use solana_sdk::{
    pubkey::Pubkey,
    signature::Keypair,
    signer::{keypair::keypair_from_seed, Signer},
};
use tempfile::NamedTempFile;
use tracing::debug;

use crate::error::KeyStoreError;

const KEY_FILE_SUFFIX: &str = "_secret_key.json";
const SECRET_KEY_LEN: usize = 64;
const SEED_LEN: usize = 32;

pub struct KeyStore {
    root: PathBuf,
}

impl KeyStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Generate a fresh keypair from the OS random source.
    pub fn generate(&self) -> Result<Keypair, KeyStoreError> {
        let mut seed = [0u8; SEED_LEN];
        OsRng
            .try_fill_bytes(&mut seed)
            .map_err(|e| KeyStoreError::RandomSourceUnavailable(e.to_string()))?;
        let keypair = keypair_from_seed(&seed)
            .map_err(|e| KeyStoreError::RandomSourceUnavailable(e.to_string()))?;
        seed.fill(0);
        Ok(keypair)
    }

    /// Location of the key file for `pubkey` under this store's root.
    pub fn location_for(&self, pubkey: &Pubkey) -> PathBuf {
        self.root.join(format!("{pubkey}{KEY_FILE_SUFFIX}"))
    }

    /// Write `keypair` to `location`, all-or-nothing.
    ///
    /// Existing key files are never overwritten; persisting over one fails
    /// with an `AlreadyExists` io error.
    pub fn persist(&self, keypair: &Keypair, location: &Path) -> Result<(), KeyStoreError> {
        let parent = location
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(parent).map_err(|e| KeyStoreError::io(parent, e))?;

        let encoded = serde_json::to_vec(&keypair.to_bytes()[..])
            .map_err(|e| KeyStoreError::io(location, io::Error::new(io::ErrorKind::InvalidData, e)))?;

        // tempfile creates the file with mode 0600 on unix
        let mut temp = NamedTempFile::new_in(parent).map_err(|e| KeyStoreError::io(parent, e))?;
        temp.write_all(&encoded)
            .and_then(|()| temp.as_file().sync_all())
            .map_err(|e| KeyStoreError::io(location, e))?;
        temp.persist_noclobber(location)
            .map_err(|e| KeyStoreError::io(location, e.error))?;

        debug!(pubkey = %keypair.pubkey(), path = %location.display(), "persisted wallet key");
        Ok(())
    }

    /// Read the keypair stored at `location`.
    pub fn load(&self, location: &Path) -> Result<Keypair, KeyStoreError> {
        let raw = match fs::read(location) {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(KeyStoreError::NotFound(location.to_path_buf()));
            }
            Err(e) => return Err(KeyStoreError::io(location, e)),
        };

        let bytes: Vec<u8> = serde_json::from_slice(&raw)
            .map_err(|e| KeyStoreError::corrupt(location, format!("not a JSON byte array: {e}")))?;
        if bytes.len() != SECRET_KEY_LEN {
            return Err(KeyStoreError::corrupt(
                location,
                format!("expected {SECRET_KEY_LEN} bytes, found {}", bytes.len()),
            ));
        }

        // The stored public half must match the one the seed produces.
        let keypair = keypair_from_seed(&bytes[..SEED_LEN])
            .map_err(|e| KeyStoreError::corrupt(location, e.to_string()))?;
        if keypair.pubkey().as_ref() != &bytes[SEED_LEN..] {
            return Err(KeyStoreError::corrupt(
                location,
                "public key does not match secret seed",
            ));
        }

        debug!(pubkey = %keypair.pubkey(), path = %location.display(), "loaded wallet key");
        Ok(keypair)
    }

    /// Generate a keypair and persist it at its canonical location.
    pub fn generate_and_persist(&self) -> Result<Keypair, KeyStoreError> {
        let keypair = self.generate()?;
        self.persist(&keypair, &self.location_for(&keypair.pubkey()))?;
        Ok(keypair)
    }

    /// Load the wallet stored for `pubkey`.
    pub fn load_wallet(&self, pubkey: &Pubkey) -> Result<Keypair, KeyStoreError> {
        let keypair = self.load(&self.location_for(pubkey))?;
        if keypair.pubkey() != *pubkey {
            return Err(KeyStoreError::corrupt(
                self.location_for(pubkey),
                format!("file holds key for {}", keypair.pubkey()),
            ));
        }
        Ok(keypair)
    }

    /// Public keys of every wallet stored under the root, sorted.
    pub fn list(&self) -> Result<Vec<Pubkey>, KeyStoreError> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(KeyStoreError::io(&self.root, e)),
        };

        let mut wallets = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| KeyStoreError::io(&self.root, e))?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if let Some(pubkey) = name
                .strip_suffix(KEY_FILE_SUFFIX)
                .and_then(|prefix| prefix.parse::<Pubkey>().ok())
            {
                wallets.push(pubkey);
            }
        }
        wallets.sort();
        Ok(wallets)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_yields_distinct_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = KeyStore::new(dir.path());
        let a = store.generate().unwrap();
        let b = store.generate().unwrap();
        assert_ne!(a.pubkey(), b.pubkey());
    }

    #[test]
    fn test_location_is_keyed_by_pubkey() {
        let store = KeyStore::new("/var/wallets");
        let pubkey = Pubkey::new_unique();
        let location = store.location_for(&pubkey);
        assert_eq!(
            location,
            PathBuf::from(format!("/var/wallets/{pubkey}_secret_key.json"))
        );
    }

    #[test]
    fn test_persist_refuses_to_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let store = KeyStore::new(dir.path());
        let keypair = store.generate().unwrap();
        let location = store.location_for(&keypair.pubkey());

        store.persist(&keypair, &location).unwrap();
        let other = store.generate().unwrap();
        let err = store.persist(&other, &location).unwrap_err();
        assert!(matches!(
            err,
            KeyStoreError::Io { ref source, .. } if source.kind() == io::ErrorKind::AlreadyExists
        ));

        // The first key is untouched.
        let loaded = store.load(&location).unwrap();
        assert_eq!(loaded.pubkey(), keypair.pubkey());
    }

    #[test]
    fn test_list_ignores_foreign_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = KeyStore::new(dir.path());
        let a = store.generate_and_persist().unwrap();
        let b = store.generate_and_persist().unwrap();
        fs::write(dir.path().join("notes.txt"), b"hello").unwrap();
        fs::write(dir.path().join("garbage_secret_key.json"), b"[]").unwrap();

        let mut expected = vec![a.pubkey(), b.pubkey()];
        expected.sort();
        assert_eq!(store.list().unwrap(), expected);
    }

    #[test]
    fn test_list_of_missing_root_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = KeyStore::new(dir.path().join("absent"));
        assert!(store.list().unwrap().is_empty());
    }
}
