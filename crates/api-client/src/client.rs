use std::sync::Arc;

use async_trait::async_trait;
use pulseboard_core_types::{ExecutionId, NotebookId, ProjectId, SyncError, TokenPair};
use pulseboard_notebook_runner::{ExecutionApi, ExecutionReport, Notebook, NotebookTemplate};
use reqwest::{Client, Method, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::auth::{AuthSession, TokenResponse};
use crate::config::ApiConfig;
use crate::error::ApiError;

/// Auth endpoints answer 401 for bad credentials, not for an expired token.
pub fn is_auth_exempt(segments: &[&str]) -> bool {
    matches!(segments, ["auth", "refresh" | "login" | "mfa", ..])
}

pub struct ApiClient {
    http: Client,
    config: ApiConfig,
    auth: Arc<AuthSession>,
}

impl ApiClient {
    pub fn new(config: ApiConfig, auth: Arc<AuthSession>) -> Result<Self, ApiError> {
        let http = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|err| ApiError::Transport(format!("failed to build HTTP client: {err}")))?;
        Ok(Self::with_client(http, config, auth))
    }

    pub fn with_client(http: Client, config: ApiConfig, auth: Arc<AuthSession>) -> Self {
        Self { http, config, auth }
    }

    pub fn config(&self) -> &ApiConfig {
        &self.config
    }

    pub fn auth(&self) -> &Arc<AuthSession> {
        &self.auth
    }

    pub fn http(&self) -> &Client {
        &self.http
    }

    /// Exchanges credentials for a token pair and stores it in the session.
    /// A 401 here means bad credentials and is returned as-is.
    pub async fn login(&self, credentials: &Value) -> Result<TokenPair, ApiError> {
        self.sign_in(&["auth", "login"], credentials).await
    }

    /// Completes a login that asked for a second factor.
    pub async fn verify_mfa(&self, challenge: &Value) -> Result<TokenPair, ApiError> {
        self.sign_in(&["auth", "mfa", "verify"], challenge).await
    }

    async fn sign_in(&self, segments: &[&str], body: &Value) -> Result<TokenPair, ApiError> {
        let issued: TokenResponse = self
            .json(Method::POST, segments, &[], Some(body.clone()))
            .await?;
        let pair = TokenPair::from(issued);
        self.auth.token_store().store(pair.clone());
        Ok(pair)
    }

    pub async fn list_notebooks(&self) -> Result<Vec<Notebook>, ApiError> {
        self.json(Method::GET, &["notebooks"], &[], None).await
    }

    pub async fn get_notebook(&self, id: &NotebookId) -> Result<Notebook, ApiError> {
        self.json(Method::GET, &["notebooks", id.as_str()], &[], None)
            .await
    }

    pub async fn create_notebook(&self, notebook: &Notebook) -> Result<Notebook, ApiError> {
        let body = encode(notebook)?;
        self.json(Method::POST, &["notebooks"], &[], Some(body)).await
    }

    pub async fn update_notebook(&self, notebook: &Notebook) -> Result<Notebook, ApiError> {
        let body = encode(notebook)?;
        self.json(
            Method::PUT,
            &["notebooks", notebook.id.as_str()],
            &[],
            Some(body),
        )
        .await
    }

    pub async fn delete_notebook(&self, id: &NotebookId) -> Result<(), ApiError> {
        self.send(Method::DELETE, &["notebooks", id.as_str()], &[], None)
            .await
            .map(drop)
    }

    pub async fn notebook_templates(&self) -> Result<Vec<NotebookTemplate>, ApiError> {
        self.json(Method::GET, &["notebooks", "templates"], &[], None)
            .await
    }

    pub async fn execute_notebook(&self, id: &NotebookId) -> Result<ExecutionReport, ApiError> {
        self.json(
            Method::POST,
            &["notebooks", id.as_str(), "execute"],
            &[],
            None,
        )
        .await
    }

    pub async fn get_execution(&self, id: &ExecutionId) -> Result<ExecutionReport, ApiError> {
        self.json(Method::GET, &["executions", id.as_str()], &[], None)
            .await
    }

    /// Aggregate dashboard data, optionally narrowed to one project.
    pub async fn dashboard_summary(&self, scope: Option<&ProjectId>) -> Result<Value, ApiError> {
        let query: Vec<(&str, &str)> = scope
            .map(|project| vec![("project_id", project.as_str())])
            .unwrap_or_default();
        self.json(Method::GET, &["dashboard", "summary"], &query, None)
            .await
    }

    pub async fn compare_cpi(&self, request: &Value) -> Result<Value, ApiError> {
        self.json(Method::POST, &["cpi", "compare"], &[], Some(request.clone()))
            .await
    }

    pub async fn cache_stats(&self) -> Result<Value, ApiError> {
        self.json(Method::GET, &["cache", "stats"], &[], None).await
    }

    pub async fn clear_server_cache(&self) -> Result<(), ApiError> {
        self.send(Method::DELETE, &["cache", "clear"], &[], None)
            .await
            .map(drop)
    }

    async fn json<T: DeserializeOwned>(
        &self,
        method: Method,
        segments: &[&str],
        query: &[(&str, &str)],
        body: Option<Value>,
    ) -> Result<T, ApiError> {
        let response = self.send(method, segments, query, body).await?;
        response
            .json()
            .await
            .map_err(|err| ApiError::Decode(err.to_string()))
    }

    /// Sends one request, replaying it once after a token refresh if the
    /// server answers 401.
    async fn send(
        &self,
        method: Method,
        segments: &[&str],
        query: &[(&str, &str)],
        body: Option<Value>,
    ) -> Result<Response, ApiError> {
        let url = self.config.endpoint(segments)?;
        let token = self.auth.access_token();
        let response = self
            .dispatch(&method, &url, query, body.as_ref(), token.as_deref())
            .await?;

        if response.status() != StatusCode::UNAUTHORIZED {
            return check_status(response).await;
        }
        if is_auth_exempt(segments) {
            return Err(ApiError::Unauthorized);
        }

        debug!(target: "api-client", %method, path = url.path(), "401; refreshing token before replay");
        let fresh = self
            .auth
            .refresh_after_unauthorized(token.as_deref())
            .await?;
        let replay = self
            .dispatch(&method, &url, query, body.as_ref(), Some(&fresh))
            .await?;
        if replay.status() == StatusCode::UNAUTHORIZED {
            warn!(target: "api-client", %method, path = url.path(), "request still unauthorized after refresh");
            return Err(ApiError::Unauthorized);
        }
        check_status(replay).await
    }

    async fn dispatch(
        &self,
        method: &Method,
        url: &url::Url,
        query: &[(&str, &str)],
        body: Option<&Value>,
        token: Option<&str>,
    ) -> Result<Response, ApiError> {
        let mut request = self.http.request(method.clone(), url.clone());
        if !query.is_empty() {
            request = request.query(query);
        }
        if let Some(token) = token {
            request = request.bearer_auth(token);
        }
        if let Some(body) = body {
            request = request.json(body);
        }
        request
            .send()
            .await
            .map_err(|err| ApiError::Transport(err.to_string()))
    }
}

async fn check_status(response: Response) -> Result<Response, ApiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let message = response
        .text()
        .await
        .unwrap_or_else(|_| "<response unavailable>".to_string());
    Err(ApiError::Status {
        status: status.as_u16(),
        message,
    })
}

fn encode<T: Serialize>(value: &T) -> Result<Value, ApiError> {
    serde_json::to_value(value).map_err(|err| ApiError::Encode(err.to_string()))
}

#[async_trait]
impl ExecutionApi for ApiClient {
    async fn execute_notebook(&self, notebook_id: &NotebookId) -> Result<ExecutionReport, SyncError> {
        ApiClient::execute_notebook(self, notebook_id)
            .await
            .map_err(SyncError::from)
    }

    async fn get_execution(&self, execution_id: &ExecutionId) -> Result<ExecutionReport, SyncError> {
        ApiClient::get_execution(self, execution_id)
            .await
            .map_err(SyncError::from)
    }
}
