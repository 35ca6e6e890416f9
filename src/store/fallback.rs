use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::AuthError;
use crate::oauth::Token;
use crate::store::{FileStore, KeyringStore, StoreBackend, TokenStore};

/// Save, load and delete a throwaway record to find out whether `store`
/// works on this machine.
pub async fn probe(store: &dyn TokenStore) -> bool {
    let key = format!("__probe-{}", uuid::Uuid::new_v4());
    let token = Token {
        access_token: key.clone(),
        refresh_token: None,
        token_type: "Bearer".into(),
        expiry: None,
    };
    let outcome = async {
        store.save(&key, &token).await?;
        let loaded = store.load(&key).await?;
        Ok::<_, AuthError>(loaded.as_ref() == Some(&token))
    }
    .await;
    let _ = store.delete(&key).await;

    match outcome {
        Ok(ok) => ok,
        Err(e) => {
            tracing::debug!(backend = %store.backend(), "store probe failed: {e}");
            false
        }
    }
}

/// Keyring when it works and keeps tokens across reboots, files otherwise.
///
/// The choice is made once in the constructor and held in `active`; later
/// changes in keyring availability do not move tokens between backends.
pub struct FallbackStore {
    active: Arc<dyn TokenStore>,
}

impl std::fmt::Debug for FallbackStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FallbackStore")
            .field("backend", &self.active.backend())
            .finish()
    }
}

impl FallbackStore {
    pub async fn new(token_dir: impl Into<PathBuf>) -> Result<Self, AuthError> {
        if !KeyringStore::is_persistent() {
            tracing::debug!("OS keyring does not persist on this platform; using token files");
            return Self::files_only(Arc::new(FileStore::new(token_dir))).await;
        }
        Self::with_backends(
            Arc::new(KeyringStore::new()),
            Arc::new(FileStore::new(token_dir)),
        )
        .await
    }

    pub async fn with_backends(
        secure: Arc<dyn TokenStore>,
        file: Arc<dyn TokenStore>,
    ) -> Result<Self, AuthError> {
        if probe(secure.as_ref()).await {
            tracing::debug!(backend = %secure.backend(), "secure token store available");
            return Ok(Self { active: secure });
        }
        tracing::info!(
            "OS keyring unavailable; storing tokens in owner-only files"
        );
        Self::files_only(file).await
    }

    async fn files_only(file: Arc<dyn TokenStore>) -> Result<Self, AuthError> {
        if !probe(file.as_ref()).await {
            return Err(AuthError::StoreUnavailable(
                "neither the OS keyring nor the token directory is usable".into(),
            ));
        }
        Ok(Self { active: file })
    }
}

#[async_trait]
impl TokenStore for FallbackStore {
    async fn save(&self, instance: &str, token: &Token) -> Result<(), AuthError> {
        self.active.save(instance, token).await
    }

    async fn load(&self, instance: &str) -> Result<Option<Token>, AuthError> {
        self.active.load(instance).await
    }

    async fn delete(&self, instance: &str) -> Result<(), AuthError> {
        self.active.delete(instance).await
    }

    async fn exists(&self, instance: &str) -> Result<bool, AuthError> {
        self.active.exists(instance).await
    }

    fn backend(&self) -> StoreBackend {
        self.active.backend()
    }
}
