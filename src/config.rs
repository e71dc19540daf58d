//! On-disk configuration for the `pulseboard` binary.

use std::time::Duration;

use pulseboard_api_client::{ApiConfig, ApiError};
use pulseboard_core_types::TokenPair;
use pulseboard_notebook_runner::RunnerConfig;
use pulseboard_stream_client::StreamConfig;
use serde::{Deserialize, Serialize};

pub const ENV_API_URL: &str = "PULSEBOARD_API_URL";
pub const ENV_TOKEN: &str = "PULSEBOARD_TOKEN";
pub const ENV_REFRESH_TOKEN: &str = "PULSEBOARD_REFRESH_TOKEN";

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub api: ApiSection,
    pub auth: AuthSection,
    pub stream: StreamSection,
    pub notebook: NotebookSection,
    pub cache: CacheSection,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiSection {
    pub base_url: String,
    pub timeout_secs: u64,
}

impl Default for ApiSection {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000/api".to_string(),
            timeout_secs: 30,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthSection {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamSection {
    pub path: String,
    pub reconnect_base_delay_ms: u64,
    pub max_attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_delay_ms: Option<u64>,
}

impl Default for StreamSection {
    fn default() -> Self {
        Self {
            path: "/events/stream".to_string(),
            reconnect_base_delay_ms: 1_000,
            max_attempts: 5,
            max_delay_ms: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotebookSection {
    pub poll_interval_ms: u64,
}

impl Default for NotebookSection {
    fn default() -> Self {
        Self {
            poll_interval_ms: 2_000,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSection {
    pub dashboard_ttl_secs: u64,
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            dashboard_ttl_secs: 60,
        }
    }
}

impl Config {
    /// Applies `PULSEBOARD_*` overrides read through `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        if let Some(url) = non_empty(ENV_API_URL) {
            self.api.base_url = url;
        }
        if let Some(token) = non_empty(ENV_TOKEN) {
            self.auth.access_token = Some(token);
        }
        if let Some(token) = non_empty(ENV_REFRESH_TOKEN) {
            self.auth.refresh_token = Some(token);
        }
    }

    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    pub fn api_config(&self) -> Result<ApiConfig, ApiError> {
        Ok(ApiConfig::new(&self.api.base_url)?
            .with_timeout(Duration::from_secs(self.api.timeout_secs.max(1))))
    }

    pub fn stream_config(&self) -> StreamConfig {
        StreamConfig {
            reconnect_base_delay: Duration::from_millis(self.stream.reconnect_base_delay_ms),
            max_attempts: self.stream.max_attempts,
            max_delay: self.stream.max_delay_ms.map(Duration::from_millis),
            ..StreamConfig::default()
        }
    }

    pub fn runner_config(&self) -> RunnerConfig {
        RunnerConfig {
            poll_interval: Duration::from_millis(self.notebook.poll_interval_ms.max(1)),
        }
    }

    pub fn dashboard_ttl(&self) -> Duration {
        Duration::from_secs(self.cache.dashboard_ttl_secs)
    }

    /// With only a refresh token configured the access token is left empty,
    /// so the first request answers 401 and triggers a refresh.
    pub fn token_pair(&self) -> Option<TokenPair> {
        match (&self.auth.access_token, &self.auth.refresh_token) {
            (None, None) => None,
            (access, refresh) => Some(TokenPair::new(
                access.clone().unwrap_or_default(),
                refresh.clone(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn partial_yaml_keeps_defaults() {
        let config: Config = serde_yaml::from_str(
            "api:\n  base_url: https://pulse.example.com/api\nstream:\n  max_attempts: 3\n",
        )
        .unwrap();
        assert_eq!(config.api.base_url, "https://pulse.example.com/api");
        assert_eq!(config.api.timeout_secs, 30);
        assert_eq!(config.stream.max_attempts, 3);
        assert_eq!(config.stream.path, "/events/stream");
        assert_eq!(config.notebook.poll_interval_ms, 2_000);
        assert_eq!(config.dashboard_ttl(), Duration::from_secs(60));
    }

    #[test]
    fn overrides_replace_file_values() {
        let mut config = Config::default();
        config.auth.access_token = Some("from-file".into());
        let env: HashMap<&str, &str> = [
            (ENV_API_URL, "https://override.example.com"),
            (ENV_TOKEN, "from-env"),
            (ENV_REFRESH_TOKEN, " "),
        ]
        .into_iter()
        .collect();

        config.apply_overrides(|key| env.get(key).map(|value| value.to_string()));

        assert_eq!(config.api.base_url, "https://override.example.com");
        assert_eq!(config.auth.access_token.as_deref(), Some("from-env"));
        assert_eq!(config.auth.refresh_token, None);
    }

    #[test]
    fn refresh_token_alone_still_yields_credentials() {
        let mut config = Config::default();
        assert_eq!(config.token_pair(), None);

        config.auth.refresh_token = Some("r".into());
        assert_eq!(config.token_pair(), Some(TokenPair::new("", Some("r".into()))));
    }

    #[test]
    fn converts_into_component_configs() {
        let mut config = Config::default();
        config.stream.max_delay_ms = Some(4_000);
        config.auth.access_token = Some("a".into());
        config.auth.refresh_token = Some("r".into());

        let stream = config.stream_config();
        assert_eq!(stream.reconnect_base_delay, Duration::from_secs(1));
        assert_eq!(stream.max_delay, Some(Duration::from_secs(4)));
        assert_eq!(config.runner_config().poll_interval, Duration::from_secs(2));
        assert_eq!(
            config.token_pair(),
            Some(TokenPair::new("a", Some("r".into())))
        );
        assert_eq!(
            config.api_config().unwrap().timeout,
            Duration::from_secs(30)
        );
    }
}
