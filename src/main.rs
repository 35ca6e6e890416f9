use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;

use lmsctl::cli::auth::LoginOverrides;
use lmsctl::{AuthError, ReceiverMode};

#[derive(Parser)]
#[command(name = "lmsctl", version, about = "Command-line access to LMS instances")]
struct Cli {
    /// Path to the config file
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Log in, log out and inspect stored credentials
    Auth {
        #[command(subcommand)]
        action: AuthAction,
    },
}

#[derive(Subcommand)]
enum AuthAction {
    /// Authorize lmsctl against an instance in the browser
    Login {
        /// Instance name (defaults to defaultInstance)
        instance: Option<String>,

        /// How the authorization code is received
        #[arg(long, value_parser = parse_mode)]
        mode: Option<ReceiverMode>,

        /// Give up waiting for the browser after this many milliseconds
        #[arg(long, env = "LMSCTL_OAUTH_TIMEOUT_MS")]
        timeout_ms: Option<u64>,

        /// Print the authorization URL instead of opening a browser
        #[arg(long)]
        no_browser: bool,

        /// Report errors as JSON
        #[arg(long)]
        json: bool,
    },

    /// Remove the stored token for an instance
    Logout {
        /// Instance name (defaults to defaultInstance)
        instance: Option<String>,
    },

    /// Show which instances have stored tokens
    Status {
        /// Instance name (all configured instances if omitted)
        instance: Option<String>,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Print a valid access token, refreshing it if needed
    Token {
        /// Instance name (defaults to defaultInstance)
        instance: Option<String>,
    },
}

fn parse_mode(s: &str) -> Result<ReceiverMode, String> {
    s.parse().map_err(|e: AuthError| e.to_string())
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("LMSCTL_LOG_LEVEL")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let json = matches!(
        cli.command,
        Commands::Auth {
            action: AuthAction::Login { json: true, .. } | AuthAction::Status { json: true, .. }
        }
    );

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_signal.cancel();
        }
    });

    if let Err(e) = run(cli, &cancel).await {
        lmsctl::cli::output::print_error(&e, json);
        std::process::exit(if e.is_cancelled() { 130 } else { 1 });
    }
}

async fn run(cli: Cli, cancel: &CancellationToken) -> Result<(), AuthError> {
    let config = cli.config.as_deref();
    match cli.command {
        Commands::Auth { action } => match action {
            AuthAction::Login {
                instance,
                mode,
                timeout_ms,
                no_browser,
                json: _,
            } => {
                let overrides = LoginOverrides {
                    mode,
                    timeout: timeout_ms.map(Duration::from_millis),
                    no_browser,
                };
                lmsctl::cli::auth::run_login(config, instance.as_deref(), &overrides, cancel).await
            }
            AuthAction::Logout { instance } => {
                lmsctl::cli::auth::run_logout(config, instance.as_deref()).await
            }
            AuthAction::Status { instance, json } => {
                lmsctl::cli::auth::run_status(config, instance.as_deref(), json).await
            }
            AuthAction::Token { instance } => {
                lmsctl::cli::auth::run_token(config, instance.as_deref()).await
            }
        },
    }
}
