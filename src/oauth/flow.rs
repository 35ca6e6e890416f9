use std::net::SocketAddr;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::config::{AuthSettings, Instance};
use crate::error::{AuthError, FlowStage};
use crate::oauth::callback::{default_callback_addr, LocalCallbackServer};
use crate::oauth::oob::OutOfBandReceiver;
use crate::oauth::pkce::{generate_state, PkceChallenge, CHALLENGE_METHOD};
use crate::oauth::receiver::{Grant, ReceiverMode, RedirectContext, RedirectReceiver};
use crate::oauth::token::{OAuthClient, Token};
use crate::store::TokenStore;

#[derive(Debug, Clone)]
pub struct FlowOptions {
    pub mode: ReceiverMode,
    /// Upper bound on the wait for the user to finish in the browser.
    pub timeout: Duration,
    pub callback_addr: SocketAddr,
    pub open_browser: bool,
}

impl Default for FlowOptions {
    fn default() -> Self {
        Self {
            mode: ReceiverMode::Auto,
            timeout: Duration::from_secs(300),
            callback_addr: default_callback_addr(),
            open_browser: true,
        }
    }
}

impl From<&AuthSettings> for FlowOptions {
    fn from(settings: &AuthSettings) -> Self {
        Self {
            mode: settings.redirect_mode,
            timeout: settings.timeout(),
            callback_addr: default_callback_addr(),
            open_browser: settings.open_browser,
        }
    }
}

/// Parameters of one authorization request. Lives for a single flow.
#[derive(Clone)]
pub struct AuthorizationRequest {
    pub client_id: String,
    pub redirect_uri: String,
    pub scope: Option<String>,
    pub state: String,
    pub code_verifier: String,
    pub code_challenge: String,
    pub code_challenge_method: &'static str,
}

impl std::fmt::Debug for AuthorizationRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthorizationRequest")
            .field("client_id", &self.client_id)
            .field("redirect_uri", &self.redirect_uri)
            .field("scope", &self.scope)
            .field("code_challenge", &self.code_challenge)
            .field("code_challenge_method", &self.code_challenge_method)
            .finish_non_exhaustive()
    }
}

impl AuthorizationRequest {
    pub fn new(instance: &Instance, redirect_uri: String, state: String, pkce: PkceChallenge) -> Self {
        Self {
            client_id: instance.client_id.clone(),
            redirect_uri,
            scope: instance.scope.clone(),
            state,
            code_verifier: pkce.code_verifier,
            code_challenge: pkce.code_challenge,
            code_challenge_method: CHALLENGE_METHOD,
        }
    }

    pub fn authorization_url(&self, endpoint: &reqwest::Url) -> reqwest::Url {
        let mut url = endpoint.clone();
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("response_type", "code")
                .append_pair("client_id", &self.client_id)
                .append_pair("redirect_uri", &self.redirect_uri);
            if let Some(scope) = &self.scope {
                query.append_pair("scope", scope);
            }
            query
                .append_pair("state", &self.state)
                .append_pair("code_challenge", &self.code_challenge)
                .append_pair("code_challenge_method", self.code_challenge_method);
        }
        url
    }
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    a.len() == b.len()
        && a.bytes()
            .zip(b.bytes())
            .fold(0u8, |acc, (x, y)| acc | (x ^ y))
            == 0
}

type UrlLauncher = Box<dyn Fn(&str) -> bool + Send + Sync>;

fn open_in_browser(url: &str) -> bool {
    webbrowser::open(url).is_ok()
}

/// Drives one interactive Authorization Code + PKCE login for an instance.
pub struct OAuthFlow {
    instance: Instance,
    client: OAuthClient,
    options: FlowOptions,
    prompt: Option<OutOfBandReceiver>,
    launcher: UrlLauncher,
}

impl std::fmt::Debug for OAuthFlow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthFlow")
            .field("instance", &self.instance)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl OAuthFlow {
    pub fn new(instance: Instance, options: FlowOptions) -> Result<Self, AuthError> {
        instance.validate()?;
        let client = OAuthClient::new(&instance)?;
        Ok(Self {
            instance,
            client,
            options,
            prompt: None,
            launcher: Box::new(open_in_browser),
        })
    }

    pub fn with_client(mut self, client: OAuthClient) -> Self {
        self.client = client;
        self
    }

    /// Use this prompt instead of stdin/stderr when out-of-band is selected.
    pub fn with_prompt(mut self, prompt: OutOfBandReceiver) -> Self {
        self.prompt = Some(prompt);
        self
    }

    /// Replace the browser launcher. It returns whether the URL was opened.
    pub fn with_url_launcher(mut self, launcher: impl Fn(&str) -> bool + Send + Sync + 'static) -> Self {
        self.launcher = Box::new(launcher);
        self
    }

    pub fn instance(&self) -> &Instance {
        &self.instance
    }

    fn take_prompt(&mut self) -> OutOfBandReceiver {
        self.prompt.take().unwrap_or_else(OutOfBandReceiver::stdio)
    }

    /// Pick the receiver for this invocation. In auto mode a failed bind
    /// falls back to out-of-band once; the choice is not revisited.
    async fn select_receiver(&mut self) -> Result<Box<dyn RedirectReceiver>, AuthError> {
        let addr = self.options.callback_addr;
        match self.options.mode {
            ReceiverMode::OutOfBand => Ok(Box::new(self.take_prompt())),
            ReceiverMode::Local => match LocalCallbackServer::bind(addr).await {
                Ok(server) => Ok(Box::new(server)),
                Err(e) => Err(AuthError::network(
                    FlowStage::Initialized,
                    format!("Cannot listen for the OAuth callback on {addr}: {e}"),
                )),
            },
            ReceiverMode::Auto => match LocalCallbackServer::bind(addr).await {
                Ok(server) => Ok(Box::new(server)),
                Err(e) => {
                    tracing::warn!(
                        "Cannot start local callback server on {addr} ({e}); using out-of-band login"
                    );
                    Ok(Box::new(self.take_prompt()))
                }
            },
        }
    }

    /// Run the flow to completion and return the new token.
    pub async fn run(mut self, cancel: &CancellationToken) -> Result<Token, AuthError> {
        let instance = self.instance.name.clone();
        tracing::debug!(%instance, stage = ?FlowStage::Initialized, "starting login");

        let pkce = PkceChallenge::generate();
        let state = generate_state();
        let mut receiver = self.select_receiver().await?;
        tracing::debug!(%instance, receiver = receiver.kind(), "redirect receiver selected");

        let result = self.drive(receiver.as_mut(), pkce, state, cancel).await;
        receiver.shutdown().await;

        match &result {
            Ok(_) => tracing::debug!(%instance, stage = ?FlowStage::Completed, "login flow finished"),
            Err(e) => tracing::debug!(
                %instance,
                stage = ?FlowStage::Failed,
                failed_in = ?e.stage(),
                "login flow failed: {e}"
            ),
        }
        result
    }

    async fn drive(
        &mut self,
        receiver: &mut dyn RedirectReceiver,
        pkce: PkceChallenge,
        state: String,
        cancel: &CancellationToken,
    ) -> Result<Token, AuthError> {
        let request = AuthorizationRequest::new(&self.instance, receiver.redirect_uri(), state, pkce);
        let auth_url = request.authorization_url(&self.instance.authorization_endpoint()?);
        tracing::debug!(
            stage = ?FlowStage::AuthorizationUrlBuilt,
            redirect_uri = %request.redirect_uri,
            "authorization URL built"
        );

        let opened = self.options.open_browser && (self.launcher)(auth_url.as_str());
        if self.options.open_browser && !opened {
            tracing::warn!("Could not open a browser; open the authorization URL manually");
        }
        if !opened && receiver.kind() == "local" {
            eprintln!("Open this URL in a browser to authorize lmsctl:\n\n    {auth_url}\n");
        }

        tracing::debug!(stage = ?FlowStage::AwaitingRedirect, "waiting for authorization");
        let ctx = RedirectContext {
            authorization_url: auth_url.as_str(),
            state: &request.state,
            timeout: self.options.timeout,
            cancel,
        };
        let redirect = receiver.await_redirect(&ctx).await?;

        // State is checked before anything else in the redirect is trusted,
        // including a provider error.
        if !constant_time_eq(&redirect.state, &request.state) {
            tracing::warn!("Rejecting OAuth callback with mismatched state");
            return Err(AuthError::StateMismatch);
        }
        let code = match redirect.grant {
            Grant::Code(code) => code,
            Grant::Denied { error, description } => {
                tracing::debug!(%error, "provider denied authorization");
                return Err(AuthError::AuthorizationDenied { error, description });
            }
        };
        tracing::debug!(stage = ?FlowStage::CodeReceived, "authorization code received");

        tracing::debug!(stage = ?FlowStage::ExchangingToken, "exchanging code for token");
        tokio::select! {
            token = self.client.exchange_code(&code, &request.code_verifier, &request.redirect_uri) => token,
            _ = cancel.cancelled() => Err(AuthError::cancelled(FlowStage::ExchangingToken, "login aborted")),
        }
    }

    /// Run the flow and persist the token under the instance name.
    pub async fn login(
        self,
        store: &dyn TokenStore,
        cancel: &CancellationToken,
    ) -> Result<Token, AuthError> {
        let instance = self.instance.name.clone();
        let token = self.run(cancel).await?;
        store.save(&instance, &token).await?;
        tracing::info!(%instance, backend = %store.backend(), "login complete");
        Ok(token)
    }
}
