use std::time::Duration;

use tracing::warn;

pub const DEFAULT_READER_URL: &str = "https://r.jina.ai/";
pub const DEFAULT_MODEL_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "gpt-3.5-turbo";

/// Per-request timeout for both the proxy and the chat model.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(25);

/// Which proxy rate ceiling applies. Decided by whether a proxy credential is set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateTier {
    /// No credential: roughly 20 requests per minute.
    Free,
    /// Bearer credential: roughly 200 requests per minute.
    Authenticated,
}

impl RateTier {
    /// Minimum spacing between two proxy requests.
    pub fn interval(self) -> Duration {
        match self {
            RateTier::Free => Duration::from_millis(3500),
            RateTier::Authenticated => Duration::from_millis(500),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProxyConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub rate_tier: RateTier,
}

impl ProxyConfig {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Self {
        let api_key = api_key.filter(|k| !k.trim().is_empty());
        let rate_tier = if api_key.is_some() {
            RateTier::Authenticated
        } else {
            RateTier::Free
        };
        Self {
            base_url: base_url.into(),
            api_key,
            rate_tier,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ModelConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
}

/// Everything the pipeline reads from the environment, read once at startup.
#[derive(Debug, Clone)]
pub struct ScoutConfig {
    pub proxy: ProxyConfig,
    /// `None` when no model credential is configured; extraction then yields empty records.
    pub model: Option<ModelConfig>,
    pub spider_api_key: Option<String>,
}

impl ScoutConfig {
    pub fn from_env() -> Self {
        let proxy = ProxyConfig::new(
            env_or("READER_BASE_URL", DEFAULT_READER_URL),
            non_empty_env("READER_API_KEY"),
        );

        let model = match non_empty_env("OPENAI_API_KEY") {
            Some(api_key) => Some(ModelConfig {
                api_key,
                base_url: env_or("OPENAI_BASE_URL", DEFAULT_MODEL_URL),
                model: env_or("OPENAI_MODEL", DEFAULT_MODEL),
            }),
            None => {
                warn!("OPENAI_API_KEY not set; title and salary extraction are disabled");
                None
            }
        };

        Self {
            proxy,
            model,
            spider_api_key: non_empty_env("SPIDER_API_KEY"),
        }
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_or(key: &str, default: &str) -> String {
    non_empty_env(key).unwrap_or_else(|| default.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credential_selects_tier() {
        let free = ProxyConfig::new(DEFAULT_READER_URL, None);
        assert_eq!(free.rate_tier, RateTier::Free);
        assert_eq!(free.rate_tier.interval(), Duration::from_millis(3500));

        let paid = ProxyConfig::new(DEFAULT_READER_URL, Some("key".into()));
        assert_eq!(paid.rate_tier, RateTier::Authenticated);
        assert_eq!(paid.rate_tier.interval(), Duration::from_millis(500));
    }

    #[test]
    fn blank_credential_is_ignored() {
        let cfg = ProxyConfig::new(DEFAULT_READER_URL, Some("   ".into()));
        assert!(cfg.api_key.is_none());
        assert_eq!(cfg.rate_tier, RateTier::Free);
    }
}
