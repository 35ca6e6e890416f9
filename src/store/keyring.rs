use async_trait::async_trait;
use keyring::Entry;

use crate::error::AuthError;
use crate::oauth::Token;
use crate::store::{StoreBackend, TokenStore};

pub const KEYRING_SERVICE: &str = "lmsctl";

/// Tokens in the OS credential store, one entry per instance.
///
/// The entry is `(service = "lmsctl", account = <instance>)` and holds the
/// token as JSON. Keyring calls block, so they run on the blocking pool.
#[derive(Debug, Clone)]
pub struct KeyringStore {
    service: String,
}

impl Default for KeyringStore {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyringStore {
    pub fn new() -> Self {
        Self::with_service(KEYRING_SERVICE)
    }

    pub fn with_service(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    /// Whether entries outlive a reboot on this platform. The Linux backend
    /// is the kernel keyutils session keyring, which does not.
    pub fn is_persistent() -> bool {
        cfg!(any(target_os = "macos", target_os = "ios", target_os = "windows"))
    }

    fn entry(&self, account: &str) -> Result<Entry, AuthError> {
        Entry::new(&self.service, account)
            .map_err(|e| AuthError::StoreUnavailable(format!("Failed to open keyring entry: {e}")))
    }
}

async fn run_blocking<T: Send + 'static>(
    f: impl FnOnce() -> Result<T, keyring::Error> + Send + 'static,
) -> Result<Result<T, keyring::Error>, AuthError> {
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| AuthError::StoreUnavailable(format!("Keyring task failed: {e}")))
}

#[async_trait]
impl TokenStore for KeyringStore {
    async fn save(&self, instance: &str, token: &Token) -> Result<(), AuthError> {
        let entry = self.entry(instance)?;
        let json = serde_json::to_string(token).map_err(|e| {
            AuthError::StoreUnavailable(format!("Failed to serialize token: {e}"))
        })?;
        run_blocking(move || entry.set_password(&json))
            .await?
            .map_err(|e| AuthError::StoreUnavailable(format!("Failed to write keyring entry: {e}")))
    }

    async fn load(&self, instance: &str) -> Result<Option<Token>, AuthError> {
        let entry = self.entry(instance)?;
        match run_blocking(move || entry.get_password()).await? {
            Ok(json) => match serde_json::from_str(&json) {
                Ok(token) => Ok(Some(token)),
                Err(e) => {
                    tracing::warn!("Ignoring unreadable keyring entry for '{instance}': {e}");
                    Ok(None)
                }
            },
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(AuthError::StoreUnavailable(format!(
                "Failed to read keyring entry: {e}"
            ))),
        }
    }

    async fn delete(&self, instance: &str) -> Result<(), AuthError> {
        let entry = self.entry(instance)?;
        match run_blocking(move || entry.delete_credential()).await? {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(AuthError::StoreUnavailable(format!(
                "Failed to delete keyring entry: {e}"
            ))),
        }
    }

    fn backend(&self) -> StoreBackend {
        StoreBackend::Keyring
    }
}
