use crate::error::AuthError;

use super::types::InstanceConfig;

/// Expand `${VAR}` and `${VAR:-fallback}` references in a string.
pub fn expand_env_vars(input: &str) -> Result<String, AuthError> {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch != '$' || chars.peek() != Some(&'{') {
            result.push(ch);
            continue;
        }

        chars.next(); // consume '{'
        let mut var_expr = String::new();
        let mut found_close = false;
        for c in chars.by_ref() {
            if c == '}' {
                found_close = true;
                break;
            }
            var_expr.push(c);
        }
        if !found_close {
            return Err(AuthError::Configuration(format!(
                "Unclosed variable reference: ${{{var_expr}"
            )));
        }

        if let Some(sep_pos) = var_expr.find(":-") {
            let var_name = &var_expr[..sep_pos];
            let fallback = &var_expr[sep_pos + 2..];
            match std::env::var(var_name) {
                Ok(val) if !val.is_empty() => result.push_str(&val),
                _ => result.push_str(fallback),
            }
        } else {
            let val = std::env::var(&var_expr).map_err(|_| {
                AuthError::Configuration(format!(
                    "Environment variable '{var_expr}' is not set"
                ))
            })?;
            result.push_str(&val);
        }
    }

    Ok(result)
}

/// Expand references in the credential-bearing fields of an instance.
pub fn expand_instance_config(config: &mut InstanceConfig) -> Result<(), AuthError> {
    config.base_url = expand_env_vars(&config.base_url)?;
    config.client_id = expand_env_vars(&config.client_id)?;
    if let Some(secret) = config.client_secret.as_mut() {
        *secret = expand_env_vars(secret)?;
    }
    Ok(())
}
