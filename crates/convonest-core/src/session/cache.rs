//! Persisted session credentials.
//!
//! Stores the signed-in account and its tokens in `<home>/session.json` with
//! restricted permissions (0600). Tokens are never logged or displayed in full.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

use convonest_types::Principal;
use serde::{Deserialize, Serialize};

use super::identity::IdentityError;

/// Tokens are treated as expired this long before the provider says so.
const EXPIRY_BUFFER_MS: u64 = 5 * 60 * 1000;

pub(crate) fn now_millis_u64() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .ok()
        .and_then(|d| u64::try_from(d.as_millis()).ok())
        .unwrap_or(u64::MAX)
}

/// Expiry timestamp for a token that lives `expires_in_secs` from now.
pub(crate) fn expiry_from_now(expires_in_secs: u64) -> u64 {
    now_millis_u64()
        .saturating_add(expires_in_secs.saturating_mul(1000))
        .saturating_sub(EXPIRY_BUFFER_MS)
}

/// A signed-in account with its tokens.
#[derive(Clone, Serialize, Deserialize)]
pub struct StoredSession {
    pub principal: Principal,
    /// Short-lived bearer token.
    pub id_token: String,
    /// Long-lived token used to mint new id tokens.
    pub refresh_token: String,
    /// Expiry of `id_token`, milliseconds since epoch (buffer already applied).
    pub expires: u64,
}

impl StoredSession {
    pub fn is_expired(&self) -> bool {
        now_millis_u64() >= self.expires
    }
}

impl std::fmt::Debug for StoredSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoredSession")
            .field("principal", &self.principal)
            .field("id_token", &crate::logging::mask_token(&self.id_token))
            .field("expires", &self.expires)
            .finish_non_exhaustive()
    }
}

/// Write-through cache of the current session.
///
/// Without a path the cache lives in memory only.
#[derive(Debug)]
pub struct CredentialStore {
    path: Option<PathBuf>,
    current: Mutex<Option<StoredSession>>,
}

impl CredentialStore {
    pub fn in_memory() -> Self {
        Self {
            path: None,
            current: Mutex::new(None),
        }
    }

    /// Opens the store at `path`, loading an existing session if present.
    ///
    /// An unreadable or corrupt file starts the store empty; the next `set`
    /// or `clear` replaces it.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let current = load_file(&path).unwrap_or_else(|e| {
            tracing::warn!("Ignoring stored session: {e}");
            None
        });
        Self {
            path: Some(path),
            current: Mutex::new(current),
        }
    }

    pub fn get(&self) -> Option<StoredSession> {
        self.lock().clone()
    }

    /// Replaces the stored session.
    ///
    /// # Errors
    /// Returns an error if the file cannot be written.
    pub fn set(&self, session: StoredSession) -> Result<(), IdentityError> {
        if let Some(path) = &self.path {
            save_file(path, &session)?;
        }
        *self.lock() = Some(session);
        Ok(())
    }

    /// Removes the stored session. Returns whether one existed.
    ///
    /// # Errors
    /// Returns an error if the file exists but cannot be removed.
    pub fn clear(&self) -> Result<bool, IdentityError> {
        let had_session = self.lock().take().is_some();
        if let Some(path) = &self.path
            && path.exists()
        {
            fs::remove_file(path).map_err(|e| {
                IdentityError::Storage(format!("Failed to remove {}: {e}", path.display()))
            })?;
        }
        Ok(had_session)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<StoredSession>> {
        self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn load_file(path: &Path) -> Result<Option<StoredSession>, IdentityError> {
    if !path.exists() {
        return Ok(None);
    }

    let contents = fs::read_to_string(path).map_err(|e| {
        IdentityError::Storage(format!("Failed to read session from {}: {e}", path.display()))
    })?;

    serde_json::from_str(&contents).map(Some).map_err(|e| {
        IdentityError::Storage(format!(
            "Failed to parse session from {}: {e}",
            path.display()
        ))
    })
}

fn save_file(path: &Path, session: &StoredSession) -> Result<(), IdentityError> {
    let storage_err = |what: &str, e: &dyn std::fmt::Display| {
        IdentityError::Storage(format!("{what} {}: {e}", path.display()))
    };

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| storage_err("Failed to create directory for", &e))?;
    }

    let contents = serde_json::to_string_pretty(session)
        .map_err(|e| storage_err("Failed to serialize session for", &e))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .map_err(|e| storage_err("Failed to open", &e))?;
        file.write_all(contents.as_bytes())
            .map_err(|e| storage_err("Failed to write", &e))?;
    }

    #[cfg(not(unix))]
    {
        fs::write(path, contents).map_err(|e| storage_err("Failed to write", &e))?;
    }

    Ok(())
}
