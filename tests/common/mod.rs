pub mod token_endpoint;

use std::path::{Path, PathBuf};

use chrono::Utc;
use lmsctl::{Instance, Token};

pub const TOKEN_PATH: &str = "/login/oauth2/token";

/// An instance whose endpoints live on `base_url`.
#[allow(dead_code)]
pub fn instance(name: &str, base_url: &str) -> Instance {
    Instance::new(name, base_url, "10000000000001")
}

/// A stored token expiring `expires_in_secs` from now.
#[allow(dead_code)]
pub fn stored_token(access: &str, refresh: Option<&str>, expires_in_secs: i64) -> Token {
    Token {
        access_token: access.to_string(),
        refresh_token: refresh.map(str::to_string),
        token_type: "Bearer".to_string(),
        expiry: Some(Utc::now() + chrono::Duration::seconds(expires_in_secs)),
    }
}

/// Write an `lmsctl.json` with a single `prod` instance into `dir`.
#[allow(dead_code)]
pub fn write_config(dir: &Path, base_url: &str) -> PathBuf {
    let config = serde_json::json!({
        "defaultInstance": "prod",
        "instances": {
            "prod": {
                "baseUrl": base_url,
                "clientId": "10000000000001",
                "clientSecret": "${LMSCTL_TEST_SECRET:-s3cret}"
            }
        },
        "auth": {
            "redirectMode": "oob",
            "timeoutSecs": 5,
            "openBrowser": false
        }
    });
    let path = dir.join("lmsctl.json");
    std::fs::write(&path, serde_json::to_string_pretty(&config).unwrap()).unwrap();
    path
}

/// Put a token file where the file store expects it.
#[allow(dead_code)]
pub fn write_token_file(token_dir: &Path, instance: &str, token: &Token) {
    std::fs::create_dir_all(token_dir).unwrap();
    let json = serde_json::to_string_pretty(token).unwrap();
    std::fs::write(token_dir.join(format!("{instance}.json")), json).unwrap();
}

#[allow(dead_code)]
pub fn read_token_file(token_dir: &Path, instance: &str) -> Option<Token> {
    let data = std::fs::read_to_string(token_dir.join(format!("{instance}.json"))).ok()?;
    serde_json::from_str(&data).ok()
}
