pub mod validation;

use serde::{Deserialize, Serialize};

use self::validation::validate_config;
use crate::protocol::Dialect;

/// Error type for configuration loading and validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// One configured vendor endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub name: String,
    #[serde(default)]
    pub dialect: Dialect,
    pub base_url: String,
    pub model: String,
    /// Name of the environment variable holding the API key. The key itself
    /// never appears in the config file.
    pub api_key_env: String,
    #[serde(default)]
    pub extra_headers: Vec<(String, String)>,
    #[serde(default = "default_true")]
    pub tool_calling: bool,
    /// `None` means unknown; images are sent and the endpoint may reject them.
    #[serde(default)]
    pub image_input: Option<bool>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
}

/// HTTP client settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    #[serde(default = "default_pool_max_idle_per_host")]
    pub http_pool_max_idle_per_host: usize,
    #[serde(default = "default_pool_idle_timeout_secs")]
    pub http_pool_idle_timeout_secs: u64,
    #[serde(default)]
    pub http_use_env_proxy: bool,
}

fn default_timeout() -> u64 {
    300
}
fn default_pool_max_idle_per_host() -> usize {
    8
}
fn default_pool_idle_timeout_secs() -> u64 {
    90
}
fn default_true() -> bool {
    true
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            timeout: default_timeout(),
            http_pool_max_idle_per_host: default_pool_max_idle_per_host(),
            http_pool_idle_timeout_secs: default_pool_idle_timeout_secs(),
            http_use_env_proxy: false,
        }
    }
}

/// Feature flags and settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeaturesConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_level() -> String {
    "INFO".to_string()
}

impl Default for FeaturesConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

/// Top-level application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub providers: Vec<ProviderConfig>,
    #[serde(default)]
    pub client: ClientConfig,
    #[serde(default)]
    pub features: FeaturesConfig,
}

impl AppConfig {
    #[must_use]
    pub fn provider(&self, name: &str) -> Option<&ProviderConfig> {
        self.providers.iter().find(|p| p.name == name)
    }
}

/// Load configuration from a YAML file and validate it.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] when reading the file fails, [`ConfigError::Yaml`]
/// when parsing fails, or [`ConfigError::Validation`] when semantic validation fails.
pub fn load_config(path: &str) -> Result<AppConfig, ConfigError> {
    let contents = std::fs::read_to_string(path)?;
    let config: AppConfig = serde_yaml::from_str(&contents)?;
    validate_config(&config)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_example_config() {
        let config = load_config("config.example.yaml");
        assert!(
            config.is_ok(),
            "Failed to load example config: {:?}",
            config.err()
        );
        let config = config.unwrap();
        assert!(config.providers.len() >= 2);
        assert!(config.provider("anthropic").is_some());
        assert_eq!(config.client.timeout, 300);
        let local = config.provider("local").unwrap();
        assert!(!local.tool_calling);
        let openrouter = config.provider("openrouter").unwrap();
        assert_eq!(openrouter.image_input, Some(false));
        assert_eq!(openrouter.extra_headers.len(), 1);
    }

    #[test]
    fn test_minimal_yaml_roundtrip() {
        let yaml = r"
providers:
  - name: main
    dialect: anthropic
    base_url: https://api.anthropic.com
    model: claude-sonnet-4
    api_key_env: ANTHROPIC_API_KEY
";
        let config: AppConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.providers.len(), 1);
        assert_eq!(config.providers[0].dialect, Dialect::Anthropic);
        assert!(config.providers[0].tool_calling);
        assert_eq!(config.providers[0].image_input, None);
        assert_eq!(config.client.timeout, 300);
        assert_eq!(config.features.log_level, "INFO");
    }

    #[test]
    fn test_dialect_defaults_to_openai() {
        let yaml = r"
providers:
  - name: local
    base_url: http://127.0.0.1:8080/v1
    model: llama
    api_key_env: LOCAL_API_KEY
";
        let config: AppConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.providers[0].dialect, Dialect::OpenAi);
    }

    #[test]
    fn test_provider_lookup() {
        let yaml = r"
providers:
  - name: a
    base_url: https://a.example/v1
    model: m
    api_key_env: A_KEY
  - name: b
    base_url: https://b.example/v1
    model: m
    api_key_env: B_KEY
";
        let config: AppConfig = serde_yaml::from_str(yaml).unwrap();
        assert!(config.provider("b").is_some());
        assert!(config.provider("missing").is_none());
    }
}
