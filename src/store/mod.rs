//! Persistent per-instance token storage.
//!
//! Two backends exist: the OS keyring ([`KeyringStore`]) and plain files with
//! owner-only permissions ([`FileStore`]). [`FallbackStore`] picks one of them
//! once, when it is constructed, and keeps that choice for its lifetime.

pub mod fallback;
pub mod file;
pub mod keyring;

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::AuthSettings;
use crate::error::AuthError;
use crate::oauth::Token;

pub use self::fallback::{probe, FallbackStore};
pub use self::file::{default_token_dir, FileStore};
pub use self::keyring::{KeyringStore, KEYRING_SERVICE};

/// Which backend a store writes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Keyring,
    File,
}

impl fmt::Display for StoreBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StoreBackend::Keyring => "keyring",
            StoreBackend::File => "file",
        })
    }
}

/// Configured backend choice.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorePreference {
    /// Keyring when it works and persists on this machine, otherwise files.
    #[default]
    Auto,
    Keyring,
    File,
}

impl FromStr for StorePreference {
    type Err = AuthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(StorePreference::Auto),
            "keyring" => Ok(StorePreference::Keyring),
            "file" => Ok(StorePreference::File),
            other => Err(AuthError::Configuration(format!(
                "Unknown token store '{other}' (expected auto, keyring or file)"
            ))),
        }
    }
}

impl fmt::Display for StorePreference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StorePreference::Auto => "auto",
            StorePreference::Keyring => "keyring",
            StorePreference::File => "file",
        })
    }
}

#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Persist `token` under `instance`, replacing any previous one.
    async fn save(&self, instance: &str, token: &Token) -> Result<(), AuthError>;

    /// `Ok(None)` when nothing usable is stored.
    async fn load(&self, instance: &str) -> Result<Option<Token>, AuthError>;

    /// Removing a token that does not exist is not an error.
    async fn delete(&self, instance: &str) -> Result<(), AuthError>;

    async fn exists(&self, instance: &str) -> Result<bool, AuthError> {
        Ok(self.load(instance).await?.is_some())
    }

    fn backend(&self) -> StoreBackend;
}

#[async_trait]
impl<T: TokenStore + ?Sized> TokenStore for Arc<T> {
    async fn save(&self, instance: &str, token: &Token) -> Result<(), AuthError> {
        (**self).save(instance, token).await
    }

    async fn load(&self, instance: &str) -> Result<Option<Token>, AuthError> {
        (**self).load(instance).await
    }

    async fn delete(&self, instance: &str) -> Result<(), AuthError> {
        (**self).delete(instance).await
    }

    async fn exists(&self, instance: &str) -> Result<bool, AuthError> {
        (**self).exists(instance).await
    }

    fn backend(&self) -> StoreBackend {
        (**self).backend()
    }
}

/// Build the store described by the `auth` settings.
pub async fn open_store(settings: &AuthSettings) -> Result<Arc<dyn TokenStore>, AuthError> {
    let dir = match &settings.token_dir {
        Some(dir) => dir.clone(),
        None => default_token_dir()?,
    };
    open_store_with(settings.token_store, dir).await
}

pub async fn open_store_with(
    preference: StorePreference,
    token_dir: PathBuf,
) -> Result<Arc<dyn TokenStore>, AuthError> {
    let store: Arc<dyn TokenStore> = match preference {
        StorePreference::File => Arc::new(FileStore::new(token_dir)),
        StorePreference::Keyring => {
            let keyring = KeyringStore::new();
            if !probe(&keyring).await {
                return Err(AuthError::StoreUnavailable(
                    "the OS keyring is not reachable and the keyring backend was requested".into(),
                ));
            }
            if !KeyringStore::is_persistent() {
                tracing::warn!("OS keyring on this platform does not keep tokens across reboots");
            }
            Arc::new(keyring)
        }
        StorePreference::Auto => Arc::new(FallbackStore::new(token_dir).await?),
    };
    tracing::debug!(backend = %store.backend(), %preference, "token store opened");
    Ok(store)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preference_parsing() {
        assert_eq!("auto".parse::<StorePreference>().unwrap(), StorePreference::Auto);
        assert_eq!(" File ".parse::<StorePreference>().unwrap(), StorePreference::File);
        assert_eq!(
            "keyring".parse::<StorePreference>().unwrap(),
            StorePreference::Keyring
        );
        let err = "vault".parse::<StorePreference>().unwrap_err();
        assert!(matches!(err, AuthError::Configuration(_)));
    }

    #[test]
    fn preference_serde_is_lowercase() {
        let pref: StorePreference = serde_json::from_str(r#""keyring""#).unwrap();
        assert_eq!(pref, StorePreference::Keyring);
        assert_eq!(serde_json::to_string(&StorePreference::File).unwrap(), r#""file""#);
    }

    #[test]
    fn backend_display() {
        assert_eq!(StoreBackend::Keyring.to_string(), "keyring");
        assert_eq!(StoreBackend::File.to_string(), "file");
    }

    #[tokio::test]
    async fn file_preference_opens_file_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store_with(StorePreference::File, dir.path().to_path_buf())
            .await
            .unwrap();
        assert_eq!(store.backend(), StoreBackend::File);
    }
}
