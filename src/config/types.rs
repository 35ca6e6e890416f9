use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::AuthError;
use crate::oauth::ReceiverMode;
use crate::store::StorePreference;

pub const DEFAULT_AUTHORIZE_PATH: &str = "/login/oauth2/auth";
pub const DEFAULT_TOKEN_PATH: &str = "/login/oauth2/token";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LmsctlConfig {
    #[serde(default, rename = "defaultInstance")]
    pub default_instance: Option<String>,
    #[serde(default)]
    pub instances: HashMap<String, InstanceConfig>,
    #[serde(default)]
    pub auth: AuthSettings,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct InstanceConfig {
    #[serde(rename = "baseUrl")]
    pub base_url: String,
    #[serde(rename = "clientId")]
    pub client_id: String,
    #[serde(default, rename = "clientSecret")]
    pub client_secret: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default, rename = "authorizePath")]
    pub authorize_path: Option<String>,
    #[serde(default, rename = "tokenPath")]
    pub token_path: Option<String>,
}

impl std::fmt::Debug for InstanceConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstanceConfig")
            .field("base_url", &self.base_url)
            .field("client_id", &self.client_id)
            .field("scope", &self.scope)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthSettings {
    #[serde(default, rename = "redirectMode")]
    pub redirect_mode: ReceiverMode,
    #[serde(default = "default_timeout_secs", rename = "timeoutSecs")]
    pub timeout_secs: u64,
    #[serde(default = "default_refresh_margin_secs", rename = "refreshMarginSecs")]
    pub refresh_margin_secs: u64,
    #[serde(default, rename = "tokenStore")]
    pub token_store: StorePreference,
    #[serde(default, rename = "tokenDir")]
    pub token_dir: Option<PathBuf>,
    #[serde(default = "default_open_browser", rename = "openBrowser")]
    pub open_browser: bool,
}

fn default_timeout_secs() -> u64 {
    300
}

fn default_refresh_margin_secs() -> u64 {
    60
}

fn default_open_browser() -> bool {
    true
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            redirect_mode: ReceiverMode::default(),
            timeout_secs: default_timeout_secs(),
            refresh_margin_secs: default_refresh_margin_secs(),
            token_store: StorePreference::default(),
            token_dir: None,
            open_browser: default_open_browser(),
        }
    }
}

impl AuthSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn refresh_margin(&self) -> Duration {
        Duration::from_secs(self.refresh_margin_secs)
    }
}

/// A fully resolved instance record: everything needed to log in and refresh.
#[derive(Clone)]
pub struct Instance {
    pub name: String,
    pub base_url: String,
    pub client_id: String,
    pub client_secret: Option<String>,
    pub scope: Option<String>,
    pub authorize_path: String,
    pub token_path: String,
}

impl std::fmt::Debug for Instance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Instance")
            .field("name", &self.name)
            .field("base_url", &self.base_url)
            .field("client_id", &self.client_id)
            .field("confidential", &self.client_secret.is_some())
            .field("scope", &self.scope)
            .finish_non_exhaustive()
    }
}

impl Instance {
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        client_id: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.into(),
            client_id: client_id.into(),
            client_secret: None,
            scope: None,
            authorize_path: DEFAULT_AUTHORIZE_PATH.to_string(),
            token_path: DEFAULT_TOKEN_PATH.to_string(),
        }
    }

    pub fn from_config(name: &str, cfg: &InstanceConfig) -> Self {
        Self {
            name: name.to_string(),
            base_url: cfg.base_url.clone(),
            client_id: cfg.client_id.clone(),
            client_secret: cfg.client_secret.clone().filter(|s| !s.is_empty()),
            scope: cfg.scope.clone().filter(|s| !s.is_empty()),
            authorize_path: cfg
                .authorize_path
                .clone()
                .unwrap_or_else(|| DEFAULT_AUTHORIZE_PATH.to_string()),
            token_path: cfg
                .token_path
                .clone()
                .unwrap_or_else(|| DEFAULT_TOKEN_PATH.to_string()),
        }
    }

    pub fn with_client_secret(mut self, secret: impl Into<String>) -> Self {
        self.client_secret = Some(secret.into());
        self
    }

    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }

    /// Checks the fields every flow needs. The client secret stays optional.
    pub fn validate(&self) -> Result<(), AuthError> {
        if self.name.trim().is_empty() {
            return Err(AuthError::Configuration("Instance name is empty".into()));
        }
        if self.base_url.trim().is_empty() {
            return Err(AuthError::Configuration(format!(
                "Instance '{}' has no baseUrl",
                self.name
            )));
        }
        if self.client_id.trim().is_empty() {
            return Err(AuthError::Configuration(format!(
                "Instance '{}' has no clientId",
                self.name
            )));
        }
        let url = reqwest::Url::parse(&self.base_url).map_err(|e| {
            AuthError::Configuration(format!(
                "Invalid baseUrl '{}' for instance '{}': {e}",
                self.base_url, self.name
            ))
        })?;
        match url.scheme() {
            "https" | "http" => Ok(()),
            scheme => Err(AuthError::Configuration(format!(
                "Unsupported URL scheme '{scheme}' for instance '{}'",
                self.name
            ))),
        }
    }

    fn endpoint(&self, path: &str) -> Result<reqwest::Url, AuthError> {
        let raw = format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        );
        reqwest::Url::parse(&raw).map_err(|e| {
            AuthError::Configuration(format!("Invalid endpoint URL '{raw}': {e}"))
        })
    }

    pub fn authorization_endpoint(&self) -> Result<reqwest::Url, AuthError> {
        self.endpoint(&self.authorize_path)
    }

    pub fn token_endpoint(&self) -> Result<reqwest::Url, AuthError> {
        self.endpoint(&self.token_path)
    }
}
