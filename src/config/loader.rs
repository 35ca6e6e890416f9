use std::path::{Path, PathBuf};

use crate::error::AuthError;

use super::env::expand_instance_config;
use super::types::{Instance, LmsctlConfig};

pub const CONFIG_ENV: &str = "LMSCTL_CONFIG";
pub const TIMEOUT_ENV: &str = "LMSCTL_OAUTH_TIMEOUT_MS";
pub const TOKEN_STORE_ENV: &str = "LMSCTL_TOKEN_STORE";
pub const TOKEN_DIR_ENV: &str = "LMSCTL_TOKEN_DIR";

/// Directory for per-user state: `~/.lmsctl`.
pub fn home_config_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".lmsctl")
}

/// Find the config file to use, highest precedence first.
///
/// 1. `--config` CLI flag
/// 2. `LMSCTL_CONFIG` env var
/// 3. `./config/lmsctl.json` (project-level)
/// 4. `~/.lmsctl/lmsctl.json`
pub fn discover_config_file(cli_config: Option<&str>) -> Option<PathBuf> {
    let mut candidates = Vec::new();
    if let Some(path) = cli_config {
        candidates.push(PathBuf::from(path));
    }
    if let Ok(env_path) = std::env::var(CONFIG_ENV) {
        if !env_path.is_empty() {
            candidates.push(PathBuf::from(env_path));
        }
    }
    candidates.push(PathBuf::from("./config/lmsctl.json"));
    candidates.push(home_config_dir().join("lmsctl.json"));

    candidates.into_iter().find(|p| p.exists())
}

fn load_config_file(path: &Path) -> Result<LmsctlConfig, AuthError> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        AuthError::Configuration(format!("Cannot read {}: {e}", path.display()))
    })?;
    serde_json::from_str::<LmsctlConfig>(&content).map_err(|e| {
        AuthError::Configuration(format!("Invalid JSON in {}: {e}", path.display()))
    })
}

/// Apply `LMSCTL_*` environment overrides on top of the file settings.
fn apply_env_overrides(config: &mut LmsctlConfig) -> Result<(), AuthError> {
    if let Ok(ms) = std::env::var(TIMEOUT_ENV) {
        let ms: u64 = ms.trim().parse().map_err(|_| {
            AuthError::Configuration(format!("{TIMEOUT_ENV} must be a number of milliseconds"))
        })?;
        config.auth.timeout_secs = ms.div_ceil(1000);
    }
    if let Ok(store) = std::env::var(TOKEN_STORE_ENV) {
        config.auth.token_store = store.parse()?;
    }
    if let Ok(dir) = std::env::var(TOKEN_DIR_ENV) {
        if !dir.is_empty() {
            config.auth.token_dir = Some(PathBuf::from(dir));
        }
    }
    Ok(())
}

/// Load the config file (if any), expand env references and apply overrides.
pub fn load_config(cli_config: Option<&str>) -> Result<LmsctlConfig, AuthError> {
    if let Some(explicit) = cli_config {
        if !Path::new(explicit).exists() {
            return Err(AuthError::Configuration(format!(
                "Config file {explicit} does not exist"
            )));
        }
    }
    let mut config = match discover_config_file(cli_config) {
        Some(path) => {
            tracing::debug!(path = %path.display(), "loading config");
            load_config_file(&path)?
        }
        None => LmsctlConfig::default(),
    };

    for instance in config.instances.values_mut() {
        expand_instance_config(instance)?;
    }
    apply_env_overrides(&mut config)?;
    Ok(config)
}

/// Suggest an instance name within Levenshtein distance 2, if unambiguous.
pub fn suggest_instance(input: &str, known: &[&str]) -> Option<String> {
    let mut best_dist = usize::MAX;
    let mut best: Option<&str> = None;
    let mut ambiguous = false;

    for &name in known {
        let dist = strsim::levenshtein(input, name);
        if dist < best_dist {
            best_dist = dist;
            best = Some(name);
            ambiguous = false;
        } else if dist == best_dist {
            ambiguous = true;
        }
    }

    if best_dist <= 2 && !ambiguous {
        best.map(str::to_string)
    } else {
        None
    }
}

impl LmsctlConfig {
    /// Resolve a name (or the default instance) into a full record.
    pub fn resolve_instance(&self, name: Option<&str>) -> Result<Instance, AuthError> {
        let name = match name.or(self.default_instance.as_deref()) {
            Some(n) => n.to_string(),
            None => match (self.instances.len(), self.instances.keys().next()) {
                (1, Some(only)) => only.clone(),
                _ => {
                    return Err(AuthError::Configuration(
                        "No instance given and no defaultInstance configured".into(),
                    ))
                }
            },
        };

        match self.instances.get(&name) {
            Some(cfg) => {
                let instance = Instance::from_config(&name, cfg);
                instance.validate()?;
                Ok(instance)
            }
            None => {
                let known: Vec<&str> = self.instances.keys().map(String::as_str).collect();
                Err(AuthError::InstanceNotFound {
                    suggestion: suggest_instance(&name, &known),
                    name,
                })
            }
        }
    }

    pub fn instance_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.instances.keys().cloned().collect();
        names.sort();
        names
    }
}
