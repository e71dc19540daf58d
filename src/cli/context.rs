use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use pulseboard_api_client::{ApiClient, AuthSession, HttpTokenRefresher};
use pulseboard_core_types::{MemoryTokenStore, TokenStore};
use tokio::sync::OnceCell;

use super::output::OutputFormat;
use crate::config::Config;

/// Shared REST plumbing, built on first use.
pub struct Services {
    pub tokens: Arc<dyn TokenStore>,
    pub session: Arc<AuthSession>,
    pub api: Arc<ApiClient>,
}

pub struct CliContext {
    config: Arc<Config>,
    config_path: PathBuf,
    output: OutputFormat,
    services: OnceCell<Arc<Services>>,
}

impl CliContext {
    pub fn new(config: Config, config_path: PathBuf, output: OutputFormat) -> Self {
        Self {
            config: Arc::new(config),
            config_path,
            output,
            services: OnceCell::new(),
        }
    }

    pub fn config(&self) -> &Config {
        self.config.as_ref()
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn output(&self) -> OutputFormat {
        self.output
    }

    pub async fn services(&self) -> Result<Arc<Services>> {
        self.services
            .get_or_try_init(|| async { build_services(self.config()).map(Arc::new) })
            .await
            .cloned()
    }
}

fn build_services(config: &Config) -> Result<Services> {
    let api_config = config.api_config().context("Invalid api.base_url")?;
    let http = reqwest::Client::builder()
        .timeout(api_config.timeout)
        .build()
        .context("Failed to build HTTP client")?;
    let tokens: Arc<dyn TokenStore> = Arc::new(MemoryTokenStore::new(config.token_pair()));
    let refresher = Arc::new(
        HttpTokenRefresher::new(http.clone(), &api_config).context("Invalid refresh endpoint")?,
    );
    let session = Arc::new(AuthSession::new(Arc::clone(&tokens), refresher));
    let api = Arc::new(ApiClient::with_client(http, api_config, Arc::clone(&session)));
    Ok(Services {
        tokens,
        session,
        api,
    })
}
