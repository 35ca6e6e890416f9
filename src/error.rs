use std::fmt;
use std::sync::Arc;

/// The step of a login or refresh that produced an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlowStage {
    Initialized,
    AuthorizationUrlBuilt,
    AwaitingRedirect,
    CodeReceived,
    ExchangingToken,
    Persisting,
    Refreshing,
    Completed,
    Failed,
}

impl fmt::Display for FlowStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FlowStage::Initialized => "initialization",
            FlowStage::AuthorizationUrlBuilt => "authorization URL construction",
            FlowStage::AwaitingRedirect => "authorization redirect",
            FlowStage::CodeReceived => "callback verification",
            FlowStage::ExchangingToken => "token exchange",
            FlowStage::Persisting => "token persistence",
            FlowStage::Refreshing => "token refresh",
            FlowStage::Completed => "completion",
            FlowStage::Failed => "failure",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum AuthError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Instance '{name}' not found.{}", format_suggestion(.suggestion.as_deref()))]
    InstanceNotFound {
        name: String,
        suggestion: Option<String>,
    },

    #[error("Network error during {stage}: {detail}")]
    Network { stage: FlowStage, detail: String },

    #[error("Unexpected response during {stage}: {detail}")]
    InvalidResponse { stage: FlowStage, detail: String },

    #[error("OAuth state mismatch: the callback does not belong to this login attempt")]
    StateMismatch,

    #[error("Authorization denied by provider: {}", format_denial(.error, .description.as_deref()))]
    AuthorizationDenied {
        error: String,
        description: Option<String>,
    },

    #[error("Login cancelled during {stage}: {reason}")]
    Cancelled { stage: FlowStage, reason: String },

    #[error("No usable token store: {0}")]
    StoreUnavailable(String),

    #[error("Refresh token for '{instance}' was rejected ({detail}). Run: lmsctl auth login {instance}")]
    RefreshRevoked { instance: String, detail: String },

    #[error("Instance '{0}' is not authenticated. Run: lmsctl auth login {0}")]
    AuthRequired(String),

    #[error("I/O error: {0}")]
    Io(Arc<std::io::Error>),
}

impl From<std::io::Error> for AuthError {
    fn from(err: std::io::Error) -> Self {
        AuthError::Io(Arc::new(err))
    }
}

fn format_suggestion(suggestion: Option<&str>) -> String {
    match suggestion {
        Some(s) => format!(" Did you mean '{s}'?"),
        None => String::new(),
    }
}

fn format_denial(error: &str, description: Option<&str>) -> String {
    match description {
        Some(d) if !d.is_empty() => format!("{error} ({d})"),
        _ => error.to_string(),
    }
}

impl AuthError {
    pub(crate) fn network(stage: FlowStage, detail: impl Into<String>) -> Self {
        AuthError::Network {
            stage,
            detail: detail.into(),
        }
    }

    pub(crate) fn invalid_response(stage: FlowStage, detail: impl Into<String>) -> Self {
        AuthError::InvalidResponse {
            stage,
            detail: detail.into(),
        }
    }

    pub(crate) fn cancelled(stage: FlowStage, reason: impl Into<String>) -> Self {
        AuthError::Cancelled {
            stage,
            reason: reason.into(),
        }
    }

    /// Error code string for structured JSON output.
    pub fn code(&self) -> &'static str {
        match self {
            AuthError::Configuration(_) => "configuration_error",
            AuthError::InstanceNotFound { .. } => "not_found",
            AuthError::Network { .. } => "network_error",
            AuthError::InvalidResponse { .. } => "network_error",
            AuthError::StateMismatch => "state_mismatch",
            AuthError::AuthorizationDenied { .. } => "authorization_denied",
            AuthError::Cancelled { .. } => "user_cancelled",
            AuthError::StoreUnavailable(_) => "store_unavailable",
            AuthError::RefreshRevoked { .. } => "refresh_revoked",
            AuthError::AuthRequired(_) => "auth_required",
            AuthError::Io(_) => "io_error",
        }
    }

    /// The flow stage this error was raised in, when it belongs to one.
    pub fn stage(&self) -> Option<FlowStage> {
        match self {
            AuthError::Configuration(_) => Some(FlowStage::Initialized),
            AuthError::Network { stage, .. } => Some(*stage),
            AuthError::InvalidResponse { stage, .. } => Some(*stage),
            AuthError::StateMismatch => Some(FlowStage::CodeReceived),
            AuthError::AuthorizationDenied { .. } => Some(FlowStage::CodeReceived),
            AuthError::Cancelled { stage, .. } => Some(*stage),
            AuthError::StoreUnavailable(_) => Some(FlowStage::Persisting),
            AuthError::RefreshRevoked { .. } => Some(FlowStage::Refreshing),
            _ => None,
        }
    }

    /// Timeouts and explicit aborts are a normal outcome of an interactive login.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, AuthError::Cancelled { .. })
    }

    /// Whether the user has to run `auth login` again to recover.
    pub fn requires_login(&self) -> bool {
        matches!(
            self,
            AuthError::RefreshRevoked { .. } | AuthError::AuthRequired(_)
        )
    }

    pub fn instance_name(&self) -> Option<&str> {
        match self {
            AuthError::InstanceNotFound { name, .. } => Some(name),
            AuthError::RefreshRevoked { instance, .. } => Some(instance),
            AuthError::AuthRequired(name) => Some(name),
            _ => None,
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        let mut obj = serde_json::Map::new();
        if let Some(instance) = self.instance_name() {
            obj.insert("instance".into(), serde_json::Value::String(instance.to_string()));
        }
        if let Some(stage) = self.stage() {
            obj.insert("stage".into(), serde_json::Value::String(format!("{stage:?}")));
        }
        obj.insert("message".into(), serde_json::Value::String(self.to_string()));
        obj.insert("code".into(), serde_json::Value::String(self.code().to_string()));
        serde_json::json!({ "error": obj })
    }
}
