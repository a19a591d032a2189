//! Persisted credential and identity snapshot.
//!
//! The file is a flat JSON object holding two fixed keys, read once at
//! startup and kept in memory afterwards. Every clone of [`CredentialStore`]
//! shares the same state.

use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{Context, Result};
use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::models::User;

/// Key under which the bearer credential is stored.
pub const TOKEN_KEY: &str = "token";
/// Key under which the serialized identity snapshot is stored.
pub const USER_KEY: &str = "user";

/// Shared, file-backed holder of the bearer credential.
#[derive(Clone)]
pub struct CredentialStore {
    inner: Arc<RwLock<Inner>>,
}

struct Inner {
    path: Option<PathBuf>,
    entries: BTreeMap<String, String>,
}

impl CredentialStore {
    /// Open the store at `path`, loading any previously persisted entries.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let entries = read_entries(&path)?;
        debug!(
            path = %path.display(),
            has_token = entries.contains_key(TOKEN_KEY),
            "Credential store opened"
        );
        Ok(Self {
            inner: Arc::new(RwLock::new(Inner {
                path: Some(path),
                entries,
            })),
        })
    }

    /// A store that never touches the filesystem.
    pub fn in_memory() -> Self {
        Self {
            inner: Arc::new(RwLock::new(Inner {
                path: None,
                entries: BTreeMap::new(),
            })),
        }
    }

    /// Current bearer credential, if any.
    pub fn token(&self) -> Option<String> {
        self.inner.read().entries.get(TOKEN_KEY).cloned()
    }

    /// Current identity. Present only when both keys are set and the
    /// snapshot parses.
    pub fn user(&self) -> Option<User> {
        let inner = self.inner.read();
        inner.entries.get(TOKEN_KEY)?;
        let raw = inner.entries.get(USER_KEY)?;
        match serde_json::from_str(raw) {
            Ok(user) => Some(user),
            Err(err) => {
                warn!(?err, "Ignoring unreadable identity snapshot");
                None
            }
        }
    }

    /// Persist a new credential and identity, replacing any previous pair.
    pub fn store(&self, token: &str, user: &User) -> Result<()> {
        let snapshot = serde_json::to_string(user).context("failed to serialize identity")?;
        let mut inner = self.inner.write();
        let mut entries = inner.entries.clone();
        entries.insert(TOKEN_KEY.to_string(), token.to_string());
        entries.insert(USER_KEY.to_string(), snapshot);
        if let Some(path) = inner.path.as_deref() {
            write_entries(path, &entries)?;
        }
        inner.entries = entries;
        Ok(())
    }

    /// Remove both keys. Returns `true` only when something was cleared, so
    /// repeated purges are no-ops.
    pub fn purge(&self) -> Result<bool> {
        let mut inner = self.inner.write();
        let mut entries = inner.entries.clone();
        let had_token = entries.remove(TOKEN_KEY).is_some();
        let had_user = entries.remove(USER_KEY).is_some();
        if !(had_token || had_user) {
            return Ok(false);
        }
        if let Some(path) = inner.path.as_deref() {
            write_entries(path, &entries)?;
        }
        inner.entries = entries;
        debug!("Credential store purged");
        Ok(true)
    }
}

fn read_entries(path: &Path) -> Result<BTreeMap<String, String>> {
    if !path.exists() {
        return Ok(BTreeMap::new());
    }
    let contents =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    if contents.trim().is_empty() {
        return Ok(BTreeMap::new());
    }
    serde_json::from_str(&contents).with_context(|| format!("failed to parse {}", path.display()))
}

fn write_entries(path: &Path, entries: &BTreeMap<String, String>) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let serialized = serde_json::to_vec_pretty(entries)?;
    fs::write(path, serialized).with_context(|| format!("failed to write {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample_user() -> User {
        User {
            id: "u1".to_string(),
            email: "ada@example.com".to_string(),
            full_name: "Ada Lovelace".to_string(),
            created_at: None,
        }
    }

    #[test]
    fn store_survives_reopen() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("state").join("session.json");

        let store = CredentialStore::open(&path)?;
        assert!(store.token().is_none());
        store.store("secret", &sample_user())?;

        let reopened = CredentialStore::open(&path)?;
        assert_eq!(reopened.token().as_deref(), Some("secret"));
        assert_eq!(reopened.user(), Some(sample_user()));
        Ok(())
    }

    #[test]
    fn identity_requires_token() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("session.json");
        let snapshot = serde_json::to_string(&sample_user())?;
        fs::write(&path, serde_json::json!({ "user": snapshot }).to_string())?;

        let store = CredentialStore::open(&path)?;
        assert!(store.user().is_none());
        Ok(())
    }

    #[test]
    fn purge_is_idempotent() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("session.json");
        let store = CredentialStore::open(&path)?;
        store.store("secret", &sample_user())?;

        let shared = store.clone();
        assert!(shared.purge()?);
        assert!(!store.purge()?);
        assert!(store.token().is_none());

        let reopened = CredentialStore::open(&path)?;
        assert!(reopened.token().is_none());
        assert!(reopened.user().is_none());
        Ok(())
    }

    #[test]
    fn failed_purge_keeps_memory_and_file_in_step() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("session.json");
        let store = CredentialStore::open(&path)?;
        store.store("secret", &sample_user())?;

        fs::remove_file(&path)?;
        fs::create_dir(&path)?;
        assert!(store.purge().is_err());
        assert_eq!(store.token().as_deref(), Some("secret"));
        assert_eq!(store.user(), Some(sample_user()));

        fs::remove_dir(&path)?;
        assert!(store.purge()?);
        assert!(store.token().is_none());
        Ok(())
    }
}
