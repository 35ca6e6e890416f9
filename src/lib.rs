pub mod cli;
pub mod config;
pub mod error;
pub mod oauth;
pub mod source;
pub mod store;

pub use config::{load_config, Instance, LmsctlConfig};
pub use error::{AuthError, FlowStage};
pub use oauth::{FlowOptions, OAuthClient, OAuthFlow, ReceiverMode, Token};
pub use source::TokenSource;
pub use store::{open_store, StoreBackend, StorePreference, TokenStore};

/// Log in to `instance` interactively and persist the token in `store`.
pub async fn login(
    instance: Instance,
    store: &dyn TokenStore,
    options: FlowOptions,
    cancel: &tokio_util::sync::CancellationToken,
) -> Result<Token, AuthError> {
    OAuthFlow::new(instance, options)?.login(store, cancel).await
}
