use std::collections::HashSet;

use super::{AppConfig, ConfigError};

/// Validate the full application config, returning an error if any rule is violated.
///
/// # Errors
///
/// Returns [`ConfigError::Validation`] when any configuration invariant is violated.
pub fn validate_config(config: &AppConfig) -> Result<(), ConfigError> {
    validate_client(config)?;
    validate_providers(config)?;
    validate_log_level(config)?;
    Ok(())
}

fn validation_err(msg: impl Into<String>) -> ConfigError {
    ConfigError::Validation(msg.into())
}

fn validate_client(config: &AppConfig) -> Result<(), ConfigError> {
    if config.client.timeout == 0 {
        return Err(validation_err("client.timeout must be greater than 0"));
    }
    if config.client.http_pool_max_idle_per_host == 0 {
        return Err(validation_err(
            "client.http_pool_max_idle_per_host must be greater than 0",
        ));
    }
    Ok(())
}

fn validate_providers(config: &AppConfig) -> Result<(), ConfigError> {
    if config.providers.is_empty() {
        return Err(validation_err("providers cannot be empty"));
    }

    let mut names = HashSet::new();
    for provider in &config.providers {
        if provider.name.trim().is_empty() {
            return Err(validation_err("provider name cannot be empty"));
        }
        if !names.insert(provider.name.as_str()) {
            return Err(validation_err(format!(
                "duplicate provider name '{}'",
                provider.name
            )));
        }
        let parsed = url::Url::parse(&provider.base_url).map_err(|err| {
            validation_err(format!(
                "Provider '{}': base_url is not a valid URL: {err}",
                provider.name
            ))
        })?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(validation_err(format!(
                "Provider '{}': base_url must use http:// or https://",
                provider.name
            )));
        }
        if provider.model.trim().is_empty() {
            return Err(validation_err(format!(
                "Provider '{}': model cannot be empty",
                provider.name
            )));
        }
        if provider.api_key_env.trim().is_empty() {
            return Err(validation_err(format!(
                "Provider '{}': api_key_env cannot be empty",
                provider.name
            )));
        }
        if provider.max_tokens == Some(0) {
            return Err(validation_err(format!(
                "Provider '{}': max_tokens must be greater than 0 when set",
                provider.name
            )));
        }
        for (header, _) in &provider.extra_headers {
            if header.trim().is_empty() {
                return Err(validation_err(format!(
                    "Provider '{}': extra header name cannot be empty",
                    provider.name
                )));
            }
        }
    }
    Ok(())
}

fn validate_log_level(config: &AppConfig) -> Result<(), ConfigError> {
    let valid_levels = ["DEBUG", "INFO", "WARNING", "ERROR", "CRITICAL", "DISABLED"];
    if !valid_levels.contains(&config.features.log_level.to_uppercase().as_str()) {
        return Err(validation_err(format!(
            "log_level must be one of {valid_levels:?}"
        )));
    }
    Ok(())
}
