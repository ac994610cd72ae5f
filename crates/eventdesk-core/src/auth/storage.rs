//! Durable storage backends for the credential pair.
//!
//! Every backend writes both tokens as one JSON document, so a store never
//! holds an access token from one exchange next to a refresh token from
//! another.

use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};

use anyhow::{Context, Result};
use keyring::Entry;
use serde::{Deserialize, Serialize};

use super::Credential;

/// Session file name in cache directory
const SESSION_FILE: &str = "session.json";

/// Keyring service name
const SERVICE_NAME: &str = "eventdesk";

/// Keyring account holding the credential document
const KEYRING_ACCOUNT: &str = "session";

/// Parse a stored credential document. Empty tokens count as corrupt.
fn parse_stored(json: &str) -> Result<Credential> {
    let credential: Credential = serde_json::from_str(json)?;
    if !credential.is_complete() {
        anyhow::bail!("stored credential has an empty token");
    }
    Ok(credential)
}

pub trait CredentialStore: Send + Sync {
    /// Load the stored credential, `None` if nothing is stored
    fn load(&self) -> Result<Option<Credential>>;

    /// Replace whatever is stored with `credential`
    fn save(&self, credential: &Credential) -> Result<()>;

    /// Remove the stored credential. Clearing an empty store is not an error.
    fn clear(&self) -> Result<()>;
}

/// Which backend a `Config` selects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    #[default]
    File,
    Keyring,
    Memory,
}

impl StoreKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "file" => Some(StoreKind::File),
            "keyring" => Some(StoreKind::Keyring),
            "memory" => Some(StoreKind::Memory),
            _ => None,
        }
    }

    /// Build the backend, rooting file storage at `cache_dir`
    pub fn open(self, cache_dir: PathBuf) -> Box<dyn CredentialStore> {
        match self {
            StoreKind::File => Box::new(FileCredentialStore::new(cache_dir)),
            StoreKind::Keyring => Box::new(KeyringCredentialStore::new()),
            StoreKind::Memory => Box::new(MemoryCredentialStore::default()),
        }
    }
}

// ============================================================================
// File
// ============================================================================

/// Credential persisted as `session.json` in the cache directory.
pub struct FileCredentialStore {
    cache_dir: PathBuf,
}

impl FileCredentialStore {
    pub fn new(cache_dir: PathBuf) -> Self {
        Self { cache_dir }
    }

    fn session_path(&self) -> PathBuf {
        self.cache_dir.join(SESSION_FILE)
    }
}

impl CredentialStore for FileCredentialStore {
    fn load(&self) -> Result<Option<Credential>> {
        let path = self.session_path();
        if !path.exists() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(&path).context("Failed to read session file")?;
        let credential = parse_stored(&contents).context("Failed to parse session file")?;
        Ok(Some(credential))
    }

    fn save(&self, credential: &Credential) -> Result<()> {
        std::fs::create_dir_all(&self.cache_dir).context("Failed to create cache directory")?;

        // Write then rename so a crash never leaves half a document behind
        let path = self.session_path();
        let tmp = path.with_extension("json.tmp");
        let contents = serde_json::to_string_pretty(credential)?;
        std::fs::write(&tmp, contents).context("Failed to write session file")?;
        std::fs::rename(&tmp, &path).context("Failed to replace session file")?;
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        let path = self.session_path();
        if path.exists() {
            std::fs::remove_file(path).context("Failed to remove session file")?;
        }
        Ok(())
    }
}

// ============================================================================
// Keyring
// ============================================================================

/// Credential stored in the OS keychain.
pub struct KeyringCredentialStore {
    account: String,
}

impl KeyringCredentialStore {
    pub fn new() -> Self {
        Self::with_account(KEYRING_ACCOUNT)
    }

    pub fn with_account(account: &str) -> Self {
        Self {
            account: account.to_string(),
        }
    }

    fn entry(&self) -> Result<Entry> {
        Entry::new(SERVICE_NAME, &self.account).context("Failed to create keyring entry")
    }
}

impl Default for KeyringCredentialStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CredentialStore for KeyringCredentialStore {
    fn load(&self) -> Result<Option<Credential>> {
        match self.entry()?.get_password() {
            Ok(json) => {
                let credential =
                    parse_stored(&json).context("Failed to parse keychain credential")?;
                Ok(Some(credential))
            }
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(e).context("Failed to retrieve credential from keychain"),
        }
    }

    fn save(&self, credential: &Credential) -> Result<()> {
        let json = serde_json::to_string(credential)?;
        self.entry()?
            .set_password(&json)
            .context("Failed to store credential in keychain")
    }

    fn clear(&self) -> Result<()> {
        match self.entry()?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(e).context("Failed to delete credential from keychain"),
        }
    }
}

// ============================================================================
// Memory
// ============================================================================

/// Process-local store, gone when the process exits.
#[derive(Default)]
pub struct MemoryCredentialStore {
    credential: Mutex<Option<Credential>>,
}

impl MemoryCredentialStore {
    pub fn with_credential(credential: Credential) -> Self {
        Self {
            credential: Mutex::new(Some(credential)),
        }
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn load(&self) -> Result<Option<Credential>> {
        Ok(self
            .credential
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }

    fn save(&self, credential: &Credential) -> Result<()> {
        *self.credential.lock().unwrap_or_else(PoisonError::into_inner) = Some(credential.clone());
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        *self.credential.lock().unwrap_or_else(PoisonError::into_inner) = None;
        Ok(())
    }
}
