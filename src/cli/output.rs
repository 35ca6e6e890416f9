use std::io::IsTerminal;
use std::time::Duration;

use chrono::{DateTime, Utc};
use colored::Colorize;
use serde::Serialize;

use crate::error::AuthError;
use crate::oauth::Token;
use crate::store::StoreBackend;

pub fn stdout_is_tty() -> bool {
    std::io::stdout().is_terminal()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenState {
    Valid,
    /// Inside the refresh margin; the next use refreshes it.
    Stale,
    Expired,
    Missing,
}

/// One row of `auth status`.
#[derive(Debug, Clone, Serialize)]
pub struct InstanceStatus {
    pub instance: String,
    pub stored: bool,
    pub state: TokenState,
    pub backend: StoreBackend,
    pub expiry: Option<DateTime<Utc>>,
    pub refreshable: bool,
}

impl InstanceStatus {
    pub fn new(
        instance: String,
        token: Option<&Token>,
        backend: StoreBackend,
        margin: Duration,
    ) -> Self {
        let state = match token {
            None => TokenState::Missing,
            Some(t) if t.is_expired() => TokenState::Expired,
            Some(t) if t.is_stale(margin) => TokenState::Stale,
            Some(_) => TokenState::Valid,
        };
        Self {
            instance,
            stored: token.is_some(),
            state,
            backend,
            expiry: token.and_then(|t| t.expiry),
            refreshable: token.is_some_and(Token::can_refresh),
        }
    }

    fn describe(&self, is_tty: bool) -> String {
        let label = match self.state {
            TokenState::Valid => "logged in",
            TokenState::Stale => "logged in (refresh due)",
            TokenState::Expired if self.refreshable => "expired (refreshable)",
            TokenState::Expired => "expired",
            TokenState::Missing => "not logged in",
        };
        if !is_tty {
            return label.to_string();
        }
        match self.state {
            TokenState::Valid => label.green().to_string(),
            TokenState::Stale => label.yellow().to_string(),
            TokenState::Expired if self.refreshable => label.yellow().to_string(),
            TokenState::Expired | TokenState::Missing => label.red().to_string(),
        }
    }
}

pub fn format_status(row: &InstanceStatus, is_tty: bool) -> String {
    let name = if is_tty {
        row.instance.bold().to_string()
    } else {
        row.instance.clone()
    };
    let mut line = format!("{name}: {}", row.describe(is_tty));
    if row.stored {
        match row.expiry {
            Some(expiry) => line.push_str(&format!(", expires {}", expiry.to_rfc3339())),
            None => line.push_str(", no expiry"),
        }
        let backend = format!("[{}]", row.backend);
        if is_tty {
            line.push_str(&format!(" {}", backend.dimmed()));
        } else {
            line.push_str(&format!(" {backend}"));
        }
    }
    line
}

pub fn print_status(rows: &[InstanceStatus], json: bool, is_tty: bool) {
    if json {
        let value = serde_json::json!({ "instances": rows });
        println!("{}", serde_json::to_string_pretty(&value).unwrap_or_default());
        return;
    }
    if rows.is_empty() {
        println!("No instances configured.");
        return;
    }
    for row in rows {
        println!("{}", format_status(row, is_tty));
    }
}

pub fn print_error(err: &AuthError, json_mode: bool) {
    if json_mode {
        println!("{}", serde_json::to_string_pretty(&err.to_json()).unwrap_or_default());
    } else {
        eprintln!("Error: {err}");
    }
}
