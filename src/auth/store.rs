//! Persistence for the credential pair.
//!
//! Exactly one pair is stored at a time and every write is a full
//! overwrite - last writer wins, consistent with the single-process
//! assumption. Reads fail soft: a missing or malformed stored value is
//! treated as absent rather than surfaced as an error.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Token file name within the data directory
const TOKEN_FILE: &str = "tokens.json";

/// Application name used for the default data directory path
const APP_NAME: &str = "larder";

/// Access/refresh token pair issued by the API.
///
/// Both halves are opaque bearer strings. The access half is short-lived
/// and replaced on refresh; the refresh half stays fixed for the life of
/// the session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialPair {
    pub access: String,
    pub refresh: String,
}

/// Storage for the single persisted credential pair.
///
/// Abstracting the medium keeps it swappable (file, keychain, in-memory
/// fake for tests). Implementations make no confidentiality guarantee.
pub trait TokenStore: Send + Sync {
    /// Read the stored pair, treating missing or malformed data as absent.
    fn get(&self) -> Option<CredentialPair>;

    /// Overwrite the stored pair.
    fn set(&self, pair: &CredentialPair) -> Result<()>;

    /// Remove the stored pair, if any.
    fn clear(&self) -> Result<()>;
}

/// File-backed store: one JSON document at a well-known path.
pub struct FileTokenStore {
    path: PathBuf,
}

impl FileTokenStore {
    /// Store under the platform data directory
    /// (`<data_dir>/larder/tokens.json`).
    pub fn new() -> Result<Self> {
        let data_dir = dirs::data_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find data directory"))?;
        Ok(Self {
            path: data_dir.join(APP_NAME).join(TOKEN_FILE),
        })
    }

    /// Store at an explicit path.
    pub fn with_path(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl TokenStore for FileTokenStore {
    fn get(&self) -> Option<CredentialPair> {
        let contents = std::fs::read_to_string(&self.path).ok()?;
        match serde_json::from_str(&contents) {
            Ok(pair) => Some(pair),
            Err(err) => {
                warn!(error = %err, "Stored token file is malformed, treating as absent");
                None
            }
        }
    }

    fn set(&self, pair: &CredentialPair) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .context("Failed to create token directory")?;
        }
        let contents = serde_json::to_string_pretty(pair)?;
        std::fs::write(&self.path, contents).context("Failed to write token file")?;
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        if self.path.exists() {
            std::fs::remove_file(&self.path).context("Failed to delete token file")?;
        }
        Ok(())
    }
}

/// In-memory store for tests and ephemeral sessions.
#[derive(Default)]
pub struct MemoryTokenStore {
    pair: Mutex<Option<CredentialPair>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TokenStore for MemoryTokenStore {
    fn get(&self) -> Option<CredentialPair> {
        self.pair.lock().unwrap().clone()
    }

    fn set(&self, pair: &CredentialPair) -> Result<()> {
        *self.pair.lock().unwrap() = Some(pair.clone());
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        *self.pair.lock().unwrap() = None;
        Ok(())
    }
}
