use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::Instance;
use crate::error::{AuthError, FlowStage};

const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// OAuth error codes that mean the refresh grant is dead and only a new login helps.
const REVOKED_GRANT_ERRORS: &[&str] = &["invalid_grant", "unauthorized_client"];

#[derive(Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Token {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    /// Absolute UTC expiry; `None` when the provider did not report a lifetime.
    #[serde(default)]
    pub expiry: Option<DateTime<Utc>>,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

impl std::fmt::Debug for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Token")
            .field("access_token", &"<redacted>")
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "<redacted>"),
            )
            .field("token_type", &self.token_type)
            .field("expiry", &self.expiry)
            .finish()
    }
}

impl Token {
    pub fn is_expired(&self) -> bool {
        self.is_stale_at(Utc::now(), Duration::ZERO)
    }

    /// True once `now` is within `margin` of the expiry.
    pub fn is_stale(&self, margin: Duration) -> bool {
        self.is_stale_at(Utc::now(), margin)
    }

    pub fn is_stale_at(&self, now: DateTime<Utc>, margin: Duration) -> bool {
        match self.expiry {
            Some(expiry) => match chrono::Duration::from_std(margin)
                .ok()
                .and_then(|m| expiry.checked_sub_signed(m))
            {
                Some(threshold) => now >= threshold,
                None => true,
            },
            None => false,
        }
    }

    pub fn can_refresh(&self) -> bool {
        self.refresh_token.as_deref().is_some_and(|t| !t.is_empty())
    }
}

/// Raw token response from the provider.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    token_type: Option<String>,
}

impl TokenResponse {
    /// `sent_at` is when the request left, so the lifetime is never overcounted.
    fn into_token(self, sent_at: DateTime<Utc>, previous_refresh: Option<&str>) -> Token {
        let expiry = self
            .expires_in
            .map(|secs| sent_at + chrono::Duration::seconds(secs));
        let refresh_token = self
            .refresh_token
            .filter(|t| !t.is_empty())
            .or_else(|| previous_refresh.map(str::to_string));
        Token {
            access_token: self.access_token,
            refresh_token,
            token_type: self.token_type.unwrap_or_else(default_token_type),
            expiry,
        }
    }
}

#[derive(Debug, Deserialize)]
struct OAuthErrorBody {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

fn describe_error_body(body: &str) -> String {
    match serde_json::from_str::<OAuthErrorBody>(body) {
        Ok(err) => match err.error_description {
            Some(desc) => format!("{}: {desc}", err.error),
            None => err.error,
        },
        Err(_) => body.trim().to_string(),
    }
}

/// Client for one instance's token endpoint.
#[derive(Clone)]
pub struct OAuthClient {
    http: reqwest::Client,
    instance: String,
    token_endpoint: reqwest::Url,
    client_id: String,
    client_secret: Option<String>,
}

impl std::fmt::Debug for OAuthClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthClient")
            .field("instance", &self.instance)
            .field("token_endpoint", &self.token_endpoint.as_str())
            .field("client_id", &self.client_id)
            .finish_non_exhaustive()
    }
}

impl OAuthClient {
    pub fn new(instance: &Instance) -> Result<Self, AuthError> {
        let http = reqwest::Client::builder()
            .timeout(DEFAULT_HTTP_TIMEOUT)
            .build()
            .map_err(|e| AuthError::Configuration(format!("Failed to build HTTP client: {e}")))?;
        Self::with_http_client(instance, http)
    }

    pub fn with_http_client(instance: &Instance, http: reqwest::Client) -> Result<Self, AuthError> {
        instance.validate()?;
        Ok(Self {
            http,
            instance: instance.name.clone(),
            token_endpoint: instance.token_endpoint()?,
            client_id: instance.client_id.clone(),
            client_secret: instance.client_secret.clone(),
        })
    }

    pub fn instance(&self) -> &str {
        &self.instance
    }

    pub fn token_endpoint(&self) -> &reqwest::Url {
        &self.token_endpoint
    }

    fn credentials<'a>(&'a self, form: &mut Vec<(&'static str, &'a str)>) {
        form.push(("client_id", &self.client_id));
        if let Some(secret) = self.client_secret.as_deref().filter(|s| !s.is_empty()) {
            form.push(("client_secret", secret));
        }
    }

    pub async fn exchange_code(
        &self,
        code: &str,
        code_verifier: &str,
        redirect_uri: &str,
    ) -> Result<Token, AuthError> {
        let stage = FlowStage::ExchangingToken;
        let mut form = vec![
            ("grant_type", "authorization_code"),
            ("code", code),
            ("code_verifier", code_verifier),
            ("redirect_uri", redirect_uri),
        ];
        self.credentials(&mut form);

        let sent_at = Utc::now();
        let resp = self
            .http
            .post(self.token_endpoint.clone())
            .form(&form)
            .send()
            .await
            .map_err(|e| AuthError::network(stage, format!("Token exchange request failed: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(AuthError::network(
                stage,
                format!(
                    "Token exchange failed with status {status}: {}",
                    describe_error_body(&body)
                ),
            ));
        }

        let token_resp: TokenResponse = resp.json().await.map_err(|e| {
            AuthError::invalid_response(stage, format!("Failed to parse token response: {e}"))
        })?;

        tracing::debug!(instance = %self.instance, "authorization code exchanged");
        Ok(token_resp.into_token(sent_at, None))
    }

    /// Redeem a refresh token. A response without a new refresh token keeps the old one.
    pub async fn refresh(&self, refresh_tok: &str) -> Result<Token, AuthError> {
        let stage = FlowStage::Refreshing;
        let mut form = vec![
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_tok),
        ];
        self.credentials(&mut form);

        let sent_at = Utc::now();
        let resp = self
            .http
            .post(self.token_endpoint.clone())
            .form(&form)
            .send()
            .await
            .map_err(|e| AuthError::network(stage, format!("Token refresh request failed: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            let parsed = serde_json::from_str::<OAuthErrorBody>(&body).ok();
            let revoked = match &parsed {
                Some(err) => REVOKED_GRANT_ERRORS.contains(&err.error.as_str()),
                None => status == reqwest::StatusCode::UNAUTHORIZED,
            };
            if revoked {
                return Err(AuthError::RefreshRevoked {
                    instance: self.instance.clone(),
                    detail: describe_error_body(&body),
                });
            }
            return Err(AuthError::network(
                stage,
                format!(
                    "Token refresh failed with status {status}: {}",
                    describe_error_body(&body)
                ),
            ));
        }

        let token_resp: TokenResponse = resp.json().await.map_err(|e| {
            AuthError::invalid_response(stage, format!("Failed to parse refresh token response: {e}"))
        })?;

        tracing::debug!(instance = %self.instance, "access token refreshed");
        Ok(token_resp.into_token(sent_at, Some(refresh_tok)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token(expiry: Option<DateTime<Utc>>) -> Token {
        Token {
            access_token: "a".into(),
            refresh_token: None,
            token_type: "Bearer".into(),
            expiry,
        }
    }

    #[test]
    fn token_serialization_roundtrip() {
        let original = Token {
            access_token: "access123".into(),
            refresh_token: Some("refresh456".into()),
            token_type: "Bearer".into(),
            expiry: Some(Utc::now() + chrono::Duration::hours(1)),
        };
        let json = serde_json::to_string(&original).unwrap();
        let parsed: Token = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, original);
    }

    #[test]
    fn expiry_serialized_as_rfc3339_utc() {
        let t = token(Some("2026-01-02T03:04:05Z".parse().unwrap()));
        let value = serde_json::to_value(&t).unwrap();
        assert_eq!(value["expiry"], "2026-01-02T03:04:05Z");
        assert_eq!(value["token_type"], "Bearer");
    }

    #[test]
    fn missing_optional_fields_use_defaults() {
        let parsed: Token = serde_json::from_str(r#"{"access_token":"x"}"#).unwrap();
        assert_eq!(parsed.token_type, "Bearer");
        assert!(parsed.refresh_token.is_none());
        assert!(parsed.expiry.is_none());
    }

    #[test]
    fn token_without_expiry_is_never_stale() {
        let t = token(None);
        assert!(!t.is_expired());
        assert!(!t.is_stale(Duration::from_secs(3600)));
    }

    #[test]
    fn staleness_margin_applies_before_expiry() {
        let now = Utc::now();
        let t = token(Some(now + chrono::Duration::seconds(30)));
        assert!(!t.is_stale_at(now, Duration::from_secs(10)));
        assert!(t.is_stale_at(now, Duration::from_secs(60)));
        assert!(!t.is_expired());
    }

    #[test]
    fn token_expired_when_past() {
        let t = token(Some(Utc::now() - chrono::Duration::hours(1)));
        assert!(t.is_expired());
    }

    #[test]
    fn expiry_counts_from_send_time() {
        let sent_at: DateTime<Utc> = "2026-03-01T12:00:00Z".parse().unwrap();
        let resp = TokenResponse {
            access_token: "a".into(),
            refresh_token: None,
            expires_in: Some(3600),
            token_type: None,
        };
        let t = resp.into_token(sent_at, None);
        assert_eq!(t.expiry, Some("2026-03-01T13:00:00Z".parse().unwrap()));
        assert_eq!(t.token_type, "Bearer");
    }

    #[test]
    fn refresh_without_new_refresh_token_keeps_previous() {
        let resp = TokenResponse {
            access_token: "new".into(),
            refresh_token: None,
            expires_in: None,
            token_type: Some("Bearer".into()),
        };
        let t = resp.into_token(Utc::now(), Some("old-refresh"));
        assert_eq!(t.refresh_token.as_deref(), Some("old-refresh"));
    }

    #[test]
    fn refresh_with_rotated_refresh_token_uses_new_one() {
        let resp = TokenResponse {
            access_token: "new".into(),
            refresh_token: Some("rotated".into()),
            expires_in: None,
            token_type: None,
        };
        let t = resp.into_token(Utc::now(), Some("old-refresh"));
        assert_eq!(t.refresh_token.as_deref(), Some("rotated"));
    }

    #[test]
    fn debug_redacts_secrets() {
        let t = Token {
            access_token: "very-secret-access".into(),
            refresh_token: Some("very-secret-refresh".into()),
            token_type: "Bearer".into(),
            expiry: None,
        };
        let rendered = format!("{t:?}");
        assert!(!rendered.contains("very-secret"));
    }

    #[test]
    fn describe_error_body_prefers_oauth_fields() {
        assert_eq!(
            describe_error_body(r#"{"error":"invalid_grant","error_description":"expired"}"#),
            "invalid_grant: expired"
        );
        assert_eq!(describe_error_body("plain failure\n"), "plain failure");
    }
}
