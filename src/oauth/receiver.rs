use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::{AuthError, FlowStage};

/// How the authorization code gets back to the CLI.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReceiverMode {
    /// Local callback server, falling back to out-of-band if it cannot bind.
    #[default]
    Auto,
    Local,
    #[serde(rename = "oob", alias = "out-of-band")]
    OutOfBand,
}

impl FromStr for ReceiverMode {
    type Err = AuthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(ReceiverMode::Auto),
            "local" => Ok(ReceiverMode::Local),
            "oob" | "out-of-band" => Ok(ReceiverMode::OutOfBand),
            other => Err(AuthError::Configuration(format!(
                "Unknown redirect mode '{other}' (expected auto, local or oob)"
            ))),
        }
    }
}

impl std::fmt::Display for ReceiverMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            ReceiverMode::Auto => "auto",
            ReceiverMode::Local => "local",
            ReceiverMode::OutOfBand => "oob",
        })
    }
}

/// What the provider put in the redirect besides `state`.
#[derive(Clone, PartialEq, Eq)]
pub enum Grant {
    Code(String),
    Denied {
        error: String,
        description: Option<String>,
    },
}

impl std::fmt::Debug for Grant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Grant::Code(_) => f.write_str("Code(<redacted>)"),
            Grant::Denied { error, description } => f
                .debug_struct("Denied")
                .field("error", error)
                .field("description", description)
                .finish(),
        }
    }
}

/// What a receiver hands back: the grant and the state it arrived with.
/// The state is checked by the flow before the grant is looked at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Redirect {
    pub grant: Grant,
    pub state: String,
}

impl Redirect {
    pub fn code(&self) -> Option<&str> {
        match &self.grant {
            Grant::Code(code) => Some(code),
            Grant::Denied { .. } => None,
        }
    }
}

/// Raw `code`/`state`/`error` parameters of a redirect, before validation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RedirectParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

impl RedirectParams {
    pub fn from_url(url: &reqwest::Url) -> Self {
        let mut params = RedirectParams::default();
        for (key, value) in url.query_pairs() {
            let value = value.into_owned();
            match key.as_ref() {
                "code" => params.code = Some(value),
                "state" => params.state = Some(value),
                "error" => params.error = Some(value),
                "error_description" => params.error_description = Some(value),
                _ => {}
            }
        }
        params
    }

    /// Parse the target of an HTTP request line, e.g. `/callback?code=..&state=..`.
    pub fn from_request_target(target: &str) -> Option<(String, Self)> {
        let url = reqwest::Url::parse("http://127.0.0.1")
            .ok()?
            .join(target)
            .ok()?;
        let params = Self::from_url(&url);
        Some((url.path().to_string(), params))
    }

    pub fn is_empty(&self) -> bool {
        self.code.as_deref().unwrap_or_default().is_empty() && self.error.is_none()
    }

    /// Validate into a [`Redirect`]. `fallback_state` is only used when no
    /// state parameter was present at all.
    pub fn into_redirect(self, fallback_state: Option<&str>) -> Result<Redirect, AuthError> {
        let state = self
            .state
            .or_else(|| fallback_state.map(str::to_string))
            .unwrap_or_default();
        let grant = match (self.error, self.code.filter(|c| !c.is_empty())) {
            (Some(error), _) => Grant::Denied {
                error,
                description: self.error_description,
            },
            (None, Some(code)) => Grant::Code(code),
            (None, None) => {
                return Err(AuthError::invalid_response(
                    FlowStage::AwaitingRedirect,
                    "Redirect carried no authorization code",
                ))
            }
        };
        Ok(Redirect { grant, state })
    }
}

pub struct RedirectContext<'a> {
    pub authorization_url: &'a str,
    /// State generated for this flow.
    pub state: &'a str,
    pub timeout: Duration,
    pub cancel: &'a CancellationToken,
}

#[async_trait]
pub trait RedirectReceiver: Send {
    /// Short name used in logs: `local` or `oob`.
    fn kind(&self) -> &'static str;

    /// The `redirect_uri` to register in the authorization request.
    fn redirect_uri(&self) -> String;

    /// Wait until the user completes authorization, the timeout elapses or
    /// the flow is cancelled.
    async fn await_redirect(&mut self, ctx: &RedirectContext<'_>) -> Result<Redirect, AuthError>;

    /// Release any resources held by the receiver. Safe to call repeatedly.
    async fn shutdown(&mut self) {}
}
