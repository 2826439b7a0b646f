//! Provider configuration.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Groq's OpenAI-compatible endpoint.
pub const DEFAULT_BASE_URL: &str = "https://api.groq.com/openai/v1";

pub const ENV_API_KEY: &str = "PLANFORGE_LLM_API_KEY";
pub const ENV_BASE_URL: &str = "PLANFORGE_LLM_BASE_URL";
pub const ENV_TIMEOUT_SECS: &str = "PLANFORGE_LLM_TIMEOUT_SECS";
pub const ENV_MAX_COMPLETION_TOKENS: &str = "PLANFORGE_LLM_MAX_COMPLETION_TOKENS";

/// Errors raised while building a provider.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderConfigError {
    #[error("{ENV_API_KEY} is not set")]
    MissingApiKey,

    #[error("Invalid value '{value}' for {name}")]
    InvalidValue { name: &'static str, value: String },

    #[error("Failed to build HTTP client: {0}")]
    Client(String),
}

/// Connection settings for an OpenAI-compatible chat completions endpoint.
#[derive(Clone, PartialEq, Eq)]
pub struct ProviderConfig {
    pub base_url: String,
    pub api_key: String,
    /// Transport timeout for one completion call.
    pub timeout: Duration,
    pub max_completion_tokens: u32,
}

impl ProviderConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: api_key.into(),
            timeout: Duration::from_secs(120),
            max_completion_tokens: 4096,
        }
    }

    /// Reads the configuration from the process environment.
    pub fn from_env() -> Result<Self, ProviderConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Reads the configuration through `lookup`; the API key is required.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ProviderConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let api_key = lookup(ENV_API_KEY)
            .filter(|key| !key.trim().is_empty())
            .ok_or(ProviderConfigError::MissingApiKey)?;
        let mut config = Self::new(api_key.trim());

        if let Some(url) = lookup(ENV_BASE_URL) {
            let url = url.trim().trim_end_matches('/');
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(ProviderConfigError::InvalidValue {
                    name: ENV_BASE_URL,
                    value: url.to_string(),
                });
            }
            config.base_url = url.to_string();
        }
        if let Some(raw) = lookup(ENV_TIMEOUT_SECS) {
            let secs = parse_positive(ENV_TIMEOUT_SECS, &raw)?;
            config.timeout = Duration::from_secs(u64::from(secs));
        }
        if let Some(raw) = lookup(ENV_MAX_COMPLETION_TOKENS) {
            config.max_completion_tokens = parse_positive(ENV_MAX_COMPLETION_TOKENS, &raw)?;
        }
        Ok(config)
    }

    /// Full URL of the chat completions endpoint.
    pub fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }
}

impl fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &"<redacted>")
            .field("timeout", &self.timeout)
            .field("max_completion_tokens", &self.max_completion_tokens)
            .finish()
    }
}

fn parse_positive(name: &'static str, raw: &str) -> Result<u32, ProviderConfigError> {
    match raw.trim().parse::<u32>() {
        Ok(value) if value > 0 => Ok(value),
        _ => Err(ProviderConfigError::InvalidValue {
            name,
            value: raw.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn api_key_is_required() {
        assert_eq!(
            ProviderConfig::from_lookup(lookup(&[])),
            Err(ProviderConfigError::MissingApiKey)
        );
        assert_eq!(
            ProviderConfig::from_lookup(lookup(&[(ENV_API_KEY, "  ")])),
            Err(ProviderConfigError::MissingApiKey)
        );
    }

    #[test]
    fn defaults_target_groq() {
        let config = ProviderConfig::from_lookup(lookup(&[(ENV_API_KEY, "gsk_test")])).unwrap();
        assert_eq!(config.completions_url(), "https://api.groq.com/openai/v1/chat/completions");
        assert_eq!(config.timeout, Duration::from_secs(120));
        assert_eq!(config.max_completion_tokens, 4096);
    }

    #[test]
    fn overrides_are_applied() {
        let config = ProviderConfig::from_lookup(lookup(&[
            (ENV_API_KEY, "k"),
            (ENV_BASE_URL, "http://localhost:8080/v1/"),
            (ENV_TIMEOUT_SECS, "15"),
            (ENV_MAX_COMPLETION_TOKENS, "2048"),
        ]))
        .unwrap();
        assert_eq!(config.completions_url(), "http://localhost:8080/v1/chat/completions");
        assert_eq!(config.timeout, Duration::from_secs(15));
        assert_eq!(config.max_completion_tokens, 2048);
    }

    #[test]
    fn bad_overrides_are_rejected() {
        let err = ProviderConfig::from_lookup(lookup(&[(ENV_API_KEY, "k"), (ENV_TIMEOUT_SECS, "0")]))
            .unwrap_err();
        assert!(matches!(err, ProviderConfigError::InvalidValue { name, .. } if name == ENV_TIMEOUT_SECS));

        let err = ProviderConfig::from_lookup(lookup(&[(ENV_API_KEY, "k"), (ENV_BASE_URL, "ftp://x")]))
            .unwrap_err();
        assert!(matches!(err, ProviderConfigError::InvalidValue { name, .. } if name == ENV_BASE_URL));
    }

    #[test]
    fn debug_output_hides_the_key() {
        let rendered = format!("{:?}", ProviderConfig::new("gsk_secret"));
        assert!(!rendered.contains("gsk_secret"));
        assert!(rendered.contains("<redacted>"));
    }
}
