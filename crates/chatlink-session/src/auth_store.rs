//! Credential storage.
//!
//! Each user owns one directory of opaque credential files written by the
//! protocol library. The session manager never looks inside them; it loads,
//! saves and purges the directory as a unit.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, info};

use crate::error::AuthStoreError;

pub type Result<T> = std::result::Result<T, AuthStoreError>;

/// Opaque credential material, keyed by file name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CredentialState {
    files: BTreeMap<String, Vec<u8>>,
}

impl CredentialState {
    /// Create an empty state (no prior session).
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a credential file.
    pub fn with_file(mut self, name: impl Into<String>, contents: impl Into<Vec<u8>>) -> Self {
        self.insert(name, contents);
        self
    }

    /// Add or replace a credential file.
    pub fn insert(&mut self, name: impl Into<String>, contents: impl Into<Vec<u8>>) {
        self.files.insert(name.into(), contents.into());
    }

    /// Contents of a credential file.
    pub fn get(&self, name: &str) -> Option<&[u8]> {
        self.files.get(name).map(Vec::as_slice)
    }

    /// Whether no credential material exists.
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Number of credential files.
    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// Iterate over `(file name, contents)`.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[u8])> {
        self.files.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }
}

/// Per-user credential persistence.
#[async_trait]
pub trait AuthStore: Send + Sync {
    /// Load a user's credentials; an empty state means no prior session.
    async fn load(&self, user_id: &str) -> Result<CredentialState>;

    /// Persist updated credentials.
    async fn save(&self, user_id: &str, state: &CredentialState) -> Result<()>;

    /// Delete all credential material for a user. Idempotent.
    async fn purge(&self, user_id: &str) -> Result<()>;

    /// Whether any credential material exists for a user.
    async fn exists(&self, user_id: &str) -> Result<bool>;
}

/// Reject ids that could escape the credential root.
pub fn validate_user_id(user_id: &str) -> Result<()> {
    let invalid = user_id.trim().is_empty()
        || user_id == "."
        || user_id == ".."
        || user_id.contains('/')
        || user_id.contains('\\')
        || user_id.contains('\0');
    if invalid {
        return Err(AuthStoreError::InvalidUserId(user_id.to_string()));
    }
    Ok(())
}

/// Stores credentials under `<root>/<user_id>/`.
pub struct FileAuthStore {
    root: PathBuf,
}

impl FileAuthStore {
    /// Create a store rooted at `root`. Directories are created lazily.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root directory of all user directories.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding one user's credentials.
    pub fn user_dir(&self, user_id: &str) -> Result<PathBuf> {
        validate_user_id(user_id)?;
        Ok(self.root.join(user_id))
    }

    /// List users with a credential directory, with their file counts.
    pub async fn list_users(&self) -> Result<Vec<(String, usize)>> {
        let mut users = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(users),
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            let count = count_files(&entry.path()).await?;
            users.push((name, count));
        }

        users.sort();
        Ok(users)
    }
}

async fn count_files(dir: &Path) -> Result<usize> {
    let mut count = 0;
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_type().await?.is_file() {
            count += 1;
        }
    }
    Ok(count)
}

#[async_trait]
impl AuthStore for FileAuthStore {
    async fn load(&self, user_id: &str) -> Result<CredentialState> {
        let dir = self.user_dir(user_id)?;
        tokio::fs::create_dir_all(&dir).await?;

        let mut state = CredentialState::new();
        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.ends_with(".tmp") {
                continue;
            }
            let contents = tokio::fs::read(entry.path()).await?;
            state.insert(name, contents);
        }

        debug!(user_id = %user_id, files = state.len(), "Loaded credentials");
        Ok(state)
    }

    async fn save(&self, user_id: &str, state: &CredentialState) -> Result<()> {
        let dir = self.user_dir(user_id)?;
        tokio::fs::create_dir_all(&dir).await?;

        for (name, contents) in state.iter() {
            // Credential file names come from the protocol library.
            if name.contains('/') || name.contains('\\') || name == ".." {
                return Err(AuthStoreError::Io(std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    format!("invalid credential file name '{}'", name),
                )));
            }
            let target = dir.join(name);
            let tmp = dir.join(format!("{}.tmp", name));
            tokio::fs::write(&tmp, contents).await?;
            tokio::fs::rename(&tmp, &target).await?;
        }

        debug!(user_id = %user_id, files = state.len(), "Saved credentials");
        Ok(())
    }

    async fn purge(&self, user_id: &str) -> Result<()> {
        let dir = self.user_dir(user_id)?;
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => {
                info!(user_id = %user_id, "Purged credentials");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn exists(&self, user_id: &str) -> Result<bool> {
        let dir = self.user_dir(user_id)?;
        match count_files(&dir).await {
            Ok(count) => Ok(count > 0),
            Err(AuthStoreError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store() -> (TempDir, FileAuthStore) {
        let dir = TempDir::new().unwrap();
        let store = FileAuthStore::new(dir.path().join("auth"));
        (dir, store)
    }

    #[tokio::test]
    async fn test_load_missing_user_is_empty() {
        let (_dir, store) = store();
        let state = store.load("u1").await.unwrap();
        assert!(state.is_empty());
        assert!(!store.exists("u1").await.unwrap());
        // load creates the directory
        assert!(store.user_dir("u1").unwrap().is_dir());
    }

    #[tokio::test]
    async fn test_save_then_load() {
        let (_dir, store) = store();
        let state = CredentialState::new()
            .with_file("creds.json", b"{\"me\":1}".to_vec())
            .with_file("session-1.json", b"key".to_vec());

        store.save("u1", &state).await.unwrap();
        assert!(store.exists("u1").await.unwrap());

        let loaded = store.load("u1").await.unwrap();
        assert_eq!(loaded, state);
    }

    #[tokio::test]
    async fn test_purge_is_idempotent() {
        let (_dir, store) = store();
        store
            .save("u1", &CredentialState::new().with_file("creds.json", b"x".to_vec()))
            .await
            .unwrap();

        store.purge("u1").await.unwrap();
        assert!(!store.exists("u1").await.unwrap());
        assert!(!store.user_dir("u1").unwrap().exists());

        store.purge("u1").await.unwrap();
    }

    #[tokio::test]
    async fn test_list_users() {
        let (_dir, store) = store();
        assert!(store.list_users().await.unwrap().is_empty());

        store
            .save("b", &CredentialState::new().with_file("creds.json", b"x".to_vec()))
            .await
            .unwrap();
        store.load("a").await.unwrap();

        let users = store.list_users().await.unwrap();
        assert_eq!(users, vec![("a".to_string(), 0), ("b".to_string(), 1)]);
    }

    #[tokio::test]
    async fn test_rejects_path_like_user_ids() {
        let (_dir, store) = store();
        for id in ["", "..", "a/b", "a\\b"] {
            assert!(matches!(
                store.load(id).await,
                Err(AuthStoreError::InvalidUserId(_))
            ));
        }
    }

    #[tokio::test]
    async fn test_rejects_path_like_file_names() {
        let (_dir, store) = store();
        let state = CredentialState::new().with_file("../escape", b"x".to_vec());
        assert!(store.save("u1", &state).await.is_err());
    }
}
