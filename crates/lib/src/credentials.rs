//! Credential store: bearer token and signed-in user, persisted as JSON.
//!
//! The REST client reads the token for every request and clears it when the server rejects it;
//! the application context sets it after login and clears it on logout.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tokio::sync::{watch, RwLock};

/// Persisted credential: access token plus the user object returned by login.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredCredentials {
    pub auth_token: Option<String>,
    pub user: Option<Value>,
}

impl StoredCredentials {
    fn is_complete(&self) -> bool {
        self.auth_token.is_some() && self.user.is_some()
    }
}

/// In-memory credential holder, optionally backed by a file.
pub struct CredentialStore {
    path: Option<PathBuf>,
    inner: RwLock<StoredCredentials>,
    /// Whether a complete credential is held; flips to false when it is cleared.
    authenticated: watch::Sender<bool>,
}

impl Default for CredentialStore {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl CredentialStore {
    /// Store that never touches disk.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            inner: RwLock::new(StoredCredentials::default()),
            authenticated: watch::channel(false).0,
        }
    }

    /// Load from path. Missing file => empty. A file that does not parse, or that holds a token
    /// without a user, is removed and the store starts empty.
    pub async fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let stored = match tokio::fs::read_to_string(&path).await {
            Ok(s) => match serde_json::from_str::<StoredCredentials>(&s) {
                Ok(c) if c.auth_token.is_some() == c.user.is_some() => c,
                Ok(_) => {
                    log::warn!("incomplete credentials in {}, clearing", path.display());
                    let _ = tokio::fs::remove_file(&path).await;
                    StoredCredentials::default()
                }
                Err(e) => {
                    log::error!("error parsing stored credentials {}: {}", path.display(), e);
                    let _ = tokio::fs::remove_file(&path).await;
                    StoredCredentials::default()
                }
            },
            Err(_) => StoredCredentials::default(),
        };
        let authenticated = watch::channel(stored.is_complete()).0;
        Self {
            path: Some(path),
            inner: RwLock::new(stored),
            authenticated,
        }
    }

    async fn save(&self) -> std::io::Result<()> {
        let Some(path) = self.path.as_ref() else {
            return Ok(());
        };
        let inner = self.inner.read().await;
        if inner.auth_token.is_none() && inner.user.is_none() {
            return match tokio::fs::remove_file(path).await {
                Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e),
                _ => Ok(()),
            };
        }
        let json = serde_json::to_string_pretty(&*inner)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, json).await
    }

    pub async fn token(&self) -> Option<String> {
        self.inner.read().await.auth_token.clone()
    }

    pub async fn user(&self) -> Option<Value> {
        self.inner.read().await.user.clone()
    }

    pub async fn snapshot(&self) -> StoredCredentials {
        self.inner.read().await.clone()
    }

    pub async fn is_authenticated(&self) -> bool {
        self.inner.read().await.is_complete()
    }

    /// Follow the authenticated flag, e.g. to tear down a session when a rejected token is
    /// cleared.
    pub fn watch(&self) -> watch::Receiver<bool> {
        self.authenticated.subscribe()
    }

    /// Store token and user and persist.
    pub async fn set(&self, token: String, user: Value) -> anyhow::Result<()> {
        {
            let mut g = self.inner.write().await;
            g.auth_token = Some(token);
            g.user = Some(user);
            self.authenticated.send_replace(g.is_complete());
        }
        self.save().await.map_err(anyhow::Error::from)
    }

    /// Replace only the token (after a refresh) and persist.
    pub async fn set_token(&self, token: String) -> anyhow::Result<()> {
        {
            let mut g = self.inner.write().await;
            g.auth_token = Some(token);
            self.authenticated.send_replace(g.is_complete());
        }
        self.save().await.map_err(anyhow::Error::from)
    }

    /// Forget token and user. Persistence failures are logged.
    pub async fn clear(&self) {
        *self.inner.write().await = StoredCredentials::default();
        self.authenticated.send_replace(false);
        if let Err(e) = self.save().await {
            log::error!("error clearing credential storage: {}", e);
        } else {
            log::debug!("credentials cleared");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("airavata-cred-{}-{}", name, uuid::Uuid::new_v4()))
            .join("auth.json")
    }

    #[tokio::test]
    async fn set_persists_and_load_restores() {
        let path = temp_path("roundtrip");
        let store = CredentialStore::load(&path).await;
        assert!(!store.is_authenticated().await);
        store
            .set("tok-1".to_string(), json!({"id": "u1", "name": "Ranger"}))
            .await
            .unwrap();

        let reloaded = CredentialStore::load(&path).await;
        assert_eq!(reloaded.token().await.as_deref(), Some("tok-1"));
        assert_eq!(reloaded.user().await, Some(json!({"id": "u1", "name": "Ranger"})));

        reloaded.clear().await;
        assert!(!path.exists());
        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[tokio::test]
    async fn corrupt_file_is_removed() {
        let path = temp_path("corrupt");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "{not json").unwrap();

        let store = CredentialStore::load(&path).await;
        assert!(store.token().await.is_none());
        assert!(!path.exists());
        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[tokio::test]
    async fn token_without_user_is_discarded() {
        let path = temp_path("partial");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, r#"{"authToken":"orphan"}"#).unwrap();

        let store = CredentialStore::load(&path).await;
        assert!(store.token().await.is_none());
        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[tokio::test]
    async fn watch_follows_set_and_clear() {
        let store = CredentialStore::in_memory();
        let mut rx = store.watch();
        assert!(!*rx.borrow_and_update());
        store.set("t".to_string(), json!({"id": 1})).await.unwrap();
        assert!(rx.has_changed().unwrap());
        assert!(*rx.borrow_and_update());
        store.set_token("t2".to_string()).await.unwrap();
        assert!(*rx.borrow_and_update());
        store.clear().await;
        assert!(!*rx.borrow_and_update());
    }

    #[tokio::test]
    async fn in_memory_store_never_writes() {
        let store = CredentialStore::in_memory();
        store.set("t".to_string(), json!({})).await.unwrap();
        store.set_token("t2".to_string()).await.unwrap();
        assert_eq!(store.token().await.as_deref(), Some("t2"));
        store.clear().await;
        assert!(store.snapshot().await == StoredCredentials::default());
    }
}
