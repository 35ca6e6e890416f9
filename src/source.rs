//! Access tokens that stay valid: load once, refresh ahead of expiry.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared};
use tokio::sync::OnceCell;

use crate::config::Instance;
use crate::error::AuthError;
use crate::oauth::{OAuthClient, Token};
use crate::store::TokenStore;

pub const DEFAULT_REFRESH_MARGIN: Duration = Duration::from_secs(60);

type SharedRefresh = Shared<BoxFuture<'static, Result<Token, AuthError>>>;

#[derive(Default)]
struct State {
    token: Option<Token>,
    /// Refresh currently running for this instance, if any.
    in_flight: Option<SharedRefresh>,
    /// Why the last refreshed token could not be written to the store.
    persist_error: Option<AuthError>,
}

struct Inner {
    instance: String,
    client: OAuthClient,
    store: Arc<dyn TokenStore>,
    margin: Duration,
    loaded: OnceCell<()>,
    state: Mutex<State>,
}

impl Inner {
    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Hands out a valid access token for one instance.
///
/// Concurrent callers that find the token stale share a single refresh
/// request and all see its outcome. Cloning is cheap and clones share state;
/// separate sources share nothing.
#[derive(Clone)]
pub struct TokenSource {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for TokenSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenSource")
            .field("instance", &self.inner.instance)
            .field("margin", &self.inner.margin)
            .field("backend", &self.inner.store.backend())
            .finish_non_exhaustive()
    }
}

impl TokenSource {
    pub fn new(client: OAuthClient, store: Arc<dyn TokenStore>, margin: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                instance: client.instance().to_string(),
                client,
                store,
                margin,
                loaded: OnceCell::new(),
                state: Mutex::new(State::default()),
            }),
        }
    }

    pub fn for_instance(
        instance: &Instance,
        store: Arc<dyn TokenStore>,
        margin: Duration,
    ) -> Result<Self, AuthError> {
        Ok(Self::new(OAuthClient::new(instance)?, store, margin))
    }

    pub fn instance(&self) -> &str {
        &self.inner.instance
    }

    pub fn margin(&self) -> Duration {
        self.inner.margin
    }

    /// The token currently held in memory, without loading or refreshing.
    pub fn cached(&self) -> Option<Token> {
        self.inner.state().token.clone()
    }

    /// Set when the most recent refresh succeeded but its token could not be
    /// saved. The token is then held in memory only and a later process will
    /// not see it. Cleared by the next refresh that saves.
    pub fn last_persist_error(&self) -> Option<AuthError> {
        self.inner.state().persist_error.clone()
    }

    async fn ensure_loaded(&self) -> Result<(), AuthError> {
        let inner = &self.inner;
        inner
            .loaded
            .get_or_try_init(|| async {
                let stored = inner.store.load(&inner.instance).await?;
                tracing::debug!(
                    instance = %inner.instance,
                    found = stored.is_some(),
                    backend = %inner.store.backend(),
                    "token loaded from store"
                );
                let mut state = inner.state();
                if state.token.is_none() {
                    state.token = stored;
                }
                Ok::<(), AuthError>(())
            })
            .await?;
        Ok(())
    }

    /// A token that is not within the refresh margin of its expiry.
    pub async fn token(&self) -> Result<Token, AuthError> {
        self.ensure_loaded().await?;

        let refresh = {
            let mut state = self.inner.state();
            if let Some(in_flight) = state.in_flight.clone() {
                in_flight
            } else {
                let current = state
                    .token
                    .clone()
                    .ok_or_else(|| AuthError::AuthRequired(self.inner.instance.clone()))?;
                if !current.is_stale(self.inner.margin) {
                    return Ok(current);
                }
                let Some(refresh_token) = current.refresh_token.filter(|t| !t.is_empty()) else {
                    return Err(AuthError::AuthRequired(self.inner.instance.clone()));
                };
                tracing::debug!(instance = %self.inner.instance, "token stale, refreshing");
                let task = refresh_task(self.inner.clone(), refresh_token)
                    .boxed()
                    .shared();
                state.in_flight = Some(task.clone());
                task
            }
        };
        refresh.await
    }

    pub async fn access_token(&self) -> Result<String, AuthError> {
        Ok(self.token().await?.access_token)
    }

    /// Attach `Authorization: Bearer <token>` to an outgoing request.
    pub async fn bearer(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<reqwest::RequestBuilder, AuthError> {
        let token = self.access_token().await?;
        Ok(request.bearer_auth(token))
    }
}

/// The single refresh for one staleness event. It persists the new token,
/// installs it and clears the in-flight slot; on failure only the slot is
/// cleared. A failed save does not fail the refresh; it is recorded for
/// [`TokenSource::last_persist_error`].
async fn refresh_task(inner: Arc<Inner>, refresh_token: String) -> Result<Token, AuthError> {
    let result = inner.client.refresh(&refresh_token).await;
    let saved = match &result {
        Ok(token) => match inner.store.save(&inner.instance, token).await {
            Ok(()) => None,
            Err(e) => {
                tracing::warn!(
                    "Refreshed token for '{}' could not be saved ({e}); it is kept in memory only",
                    inner.instance
                );
                Some(e)
            }
        },
        Err(_) => None,
    };

    let mut state = inner.state();
    match &result {
        Ok(token) => {
            state.token = Some(token.clone());
            state.persist_error = saved;
            tracing::debug!(instance = %inner.instance, "refreshed token installed");
        }
        Err(e) => {
            tracing::debug!(instance = %inner.instance, "token refresh failed: {e}");
        }
    }
    state.in_flight = None;
    result
}
