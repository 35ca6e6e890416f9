use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::cli::output::{self, InstanceStatus};
use crate::config::{load_config, LmsctlConfig};
use crate::error::AuthError;
use crate::oauth::{FlowOptions, OAuthFlow, ReceiverMode};
use crate::source::TokenSource;
use crate::store::{open_store, TokenStore};

/// Command-line overrides for `auth login`.
#[derive(Debug, Clone, Default)]
pub struct LoginOverrides {
    pub mode: Option<ReceiverMode>,
    pub timeout: Option<Duration>,
    pub no_browser: bool,
}

impl LoginOverrides {
    fn apply(&self, mut options: FlowOptions) -> FlowOptions {
        if let Some(mode) = self.mode {
            options.mode = mode;
        }
        if let Some(timeout) = self.timeout {
            options.timeout = timeout;
        }
        if self.no_browser {
            options.open_browser = false;
        }
        options
    }
}

pub async fn run_login(
    config_path: Option<&str>,
    instance: Option<&str>,
    overrides: &LoginOverrides,
    cancel: &CancellationToken,
) -> Result<(), AuthError> {
    let config = load_config(config_path)?;
    let instance = config.resolve_instance(instance)?;
    let store = open_store(&config.auth).await?;
    let options = overrides.apply(FlowOptions::from(&config.auth));

    let name = instance.name.clone();
    let token = OAuthFlow::new(instance, options)?
        .login(store.as_ref(), cancel)
        .await?;

    println!("Logged in to '{name}' (token stored in {}).", store.backend());
    if let Some(expiry) = token.expiry {
        println!("Access token expires at {}", expiry.to_rfc3339());
    }
    Ok(())
}

pub async fn run_logout(config_path: Option<&str>, instance: Option<&str>) -> Result<(), AuthError> {
    let config = load_config(config_path)?;
    let instance = config.resolve_instance(instance)?;
    let store = open_store(&config.auth).await?;

    let existed = store.exists(&instance.name).await?;
    store.delete(&instance.name).await?;
    if existed {
        println!("Logged out of '{}'.", instance.name);
    } else {
        println!("No stored token for '{}'.", instance.name);
    }
    Ok(())
}

pub async fn run_status(
    config_path: Option<&str>,
    instance: Option<&str>,
    json: bool,
) -> Result<(), AuthError> {
    let config = load_config(config_path)?;
    let names = status_targets(&config, instance)?;
    let store = open_store(&config.auth).await?;

    let mut rows = Vec::with_capacity(names.len());
    for name in names {
        let token = store.load(&name).await?;
        rows.push(InstanceStatus::new(
            name,
            token.as_ref(),
            store.backend(),
            config.auth.refresh_margin(),
        ));
    }
    output::print_status(&rows, json, output::stdout_is_tty());
    Ok(())
}

/// The instances `auth status` reports on: the one asked for, or all of them.
fn status_targets(config: &LmsctlConfig, instance: Option<&str>) -> Result<Vec<String>, AuthError> {
    match instance {
        Some(name) => Ok(vec![config.resolve_instance(Some(name))?.name]),
        None => Ok(config.instance_names()),
    }
}

pub async fn run_token(config_path: Option<&str>, instance: Option<&str>) -> Result<(), AuthError> {
    let config = load_config(config_path)?;
    let instance = config.resolve_instance(instance)?;
    let store = open_store(&config.auth).await?;

    let source = TokenSource::for_instance(&instance, store, config.auth.refresh_margin())?;
    println!("{}", source.access_token().await?);
    if let Some(e) = source.last_persist_error() {
        eprintln!(
            "Warning: refreshed token for '{}' was not saved: {e}",
            source.instance()
        );
    }
    Ok(())
}
