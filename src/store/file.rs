use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;

use crate::error::AuthError;
use crate::oauth::Token;
use crate::store::{StoreBackend, TokenStore};

/// `<config_dir>/lmsctl/tokens`, e.g. `~/.config/lmsctl/tokens` on Linux.
pub fn default_token_dir() -> Result<PathBuf, AuthError> {
    dirs::config_dir()
        .map(|dir| dir.join("lmsctl").join("tokens"))
        .ok_or_else(|| {
            AuthError::StoreUnavailable("cannot determine the user configuration directory".into())
        })
}

/// One JSON file per instance, readable by the owner only.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, instance: &str) -> Result<PathBuf, AuthError> {
        validate_instance_name(instance)?;
        Ok(self.dir.join(format!("{instance}.json")))
    }

    async fn ensure_dir(&self) -> Result<(), AuthError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&self.dir, std::fs::Permissions::from_mode(0o700)).await?;
        }
        Ok(())
    }
}

async fn write_synced(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let mut options = tokio::fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    options.mode(0o600);
    let mut file = options.open(path).await?;
    file.write_all(data).await?;
    file.sync_all().await
}

fn validate_instance_name(instance: &str) -> Result<(), AuthError> {
    if instance.is_empty()
        || instance.contains('/')
        || instance.contains('\\')
        || instance.contains("..")
        || instance.starts_with('.')
    {
        return Err(AuthError::Configuration(format!(
            "Invalid instance name '{instance}' for the token store"
        )));
    }
    Ok(())
}

#[async_trait]
impl TokenStore for FileStore {
    async fn save(&self, instance: &str, token: &Token) -> Result<(), AuthError> {
        let path = self.path_for(instance)?;
        self.ensure_dir().await?;
        let data = serde_json::to_vec_pretty(token).map_err(|e| {
            AuthError::StoreUnavailable(format!("Failed to serialize token: {e}"))
        })?;

        // Unique per save: concurrent writers of one instance never share a
        // temp file, and the last rename wins with a complete payload.
        let tmp = self
            .dir
            .join(format!(".{instance}.json.{}.tmp", uuid::Uuid::new_v4().simple()));
        let written = async {
            write_synced(&tmp, &data).await?;
            tokio::fs::rename(&tmp, &path).await
        }
        .await;
        if let Err(e) = written {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        tracing::debug!(%instance, path = %path.display(), "token written");
        Ok(())
    }

    async fn load(&self, instance: &str) -> Result<Option<Token>, AuthError> {
        let path = self.path_for(instance)?;
        let data = match tokio::fs::read(&path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        match serde_json::from_slice(&data) {
            Ok(token) => Ok(Some(token)),
            Err(e) => {
                tracing::warn!("Ignoring unreadable token file {}: {e}", path.display());
                Ok(None)
            }
        }
    }

    async fn delete(&self, instance: &str) -> Result<(), AuthError> {
        let path = self.path_for(instance)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn exists(&self, instance: &str) -> Result<bool, AuthError> {
        Ok(self.load(instance).await?.is_some())
    }

    fn backend(&self) -> StoreBackend {
        StoreBackend::File
    }
}
