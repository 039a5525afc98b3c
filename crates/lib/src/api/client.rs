//! HTTP client for the Airavata REST API.
//!
//! Every call carries `Authorization: Bearer <token>` when a token is stored. A 401 triggers one
//! token refresh and one retry; if that does not succeed the stored credential is cleared and
//! the caller gets [`ApiError::Unauthorized`].

use crate::config::{self, Config};
use crate::credentials::CredentialStore;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Method, StatusCode};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("api request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("api error: {status} {body}")]
    Status { status: StatusCode, body: String },
    #[error("unauthorized: session expired, credentials cleared")]
    Unauthorized,
    #[error("unexpected api response: {0}")]
    Decode(String),
}

impl ApiError {
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            ApiError::Status { status, .. } => Some(*status),
            ApiError::Unauthorized => Some(StatusCode::UNAUTHORIZED),
            ApiError::Request(e) => e.status(),
            ApiError::Decode(_) => None,
        }
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(e: serde_json::Error) -> Self {
        ApiError::Decode(e.to_string())
    }
}

/// Client for the Airavata HTTP API.
#[derive(Clone)]
pub struct ApiClient {
    base_url: String,
    http: reqwest::Client,
    credentials: Arc<CredentialStore>,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>, credentials: Arc<CredentialStore>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
            credentials,
        }
    }

    /// Client for the configured base URL (env override applies) with the configured timeout.
    pub fn from_config(config: &Config, credentials: Arc<CredentialStore>) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.api.request_timeout_secs))
            .build()?;
        Ok(Self {
            base_url: config::resolve_base_url(config),
            http,
            credentials,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn credentials(&self) -> &Arc<CredentialStore> {
        &self.credentials
    }

    async fn execute(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<&Value>,
        token: Option<&str>,
    ) -> Result<reqwest::Response, reqwest::Error> {
        let url = format!("{}{}", self.base_url, path);
        let mut req = self
            .http
            .request(method, &url)
            .header(CONTENT_TYPE, "application/json");
        if !query.is_empty() {
            req = req.query(query);
        }
        if let Some(t) = token {
            req = req.bearer_auth(t);
        }
        if let Some(b) = body {
            req = req.json(b);
        }
        req.send().await
    }

    async fn into_json(res: reqwest::Response) -> Result<Value, ApiError> {
        let status = res.status();
        let text = res.text().await?;
        if !status.is_success() {
            return Err(ApiError::Status { status, body: text });
        }
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text).map_err(ApiError::from)
    }

    /// Authenticated request with the 401 refresh / clear policy.
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<&Value>,
    ) -> Result<Value, ApiError> {
        let token = self.credentials.token().await;
        let res = self
            .execute(method.clone(), path, query, body, token.as_deref())
            .await?;
        if res.status() != StatusCode::UNAUTHORIZED {
            return Self::into_json(res).await;
        }

        log::debug!("{} {} returned 401, attempting token refresh", method, path);
        let new_token = match self.refresh_token().await {
            Ok(t) => t,
            Err(e) => {
                log::warn!("token refresh failed: {}", e);
                self.credentials.clear().await;
                return Err(ApiError::Unauthorized);
            }
        };
        let retry = self
            .execute(method, path, query, body, Some(&new_token))
            .await?;
        if retry.status() == StatusCode::UNAUTHORIZED {
            log::warn!("{} still unauthorized after refresh", path);
            self.credentials.clear().await;
            return Err(ApiError::Unauthorized);
        }
        Self::into_json(retry).await
    }

    /// Request without bearer token or refresh handling (login, register).
    pub(crate) async fn request_public(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<Value, ApiError> {
        let res = self.execute(method, path, &[], body, None).await?;
        Self::into_json(res).await
    }

    /// POST /api/auth/refresh: obtain a new access token and store it. Never itself refreshed.
    pub async fn refresh_token(&self) -> Result<String, ApiError> {
        let token = self.credentials.token().await;
        let res = self
            .execute(
                Method::POST,
                "/api/auth/refresh",
                &[],
                Some(&Value::Object(Default::default())),
                token.as_deref(),
            )
            .await?;
        let body = Self::into_json(res).await?;
        let new_token = body
            .get("accessToken")
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ApiError::Decode("refresh response without accessToken".to_string()))?
            .to_string();
        if let Err(e) = self.credentials.set_token(new_token.clone()).await {
            log::warn!("persisting refreshed token failed: {}", e);
        }
        Ok(new_token)
    }

    pub(crate) async fn get(&self, path: &str) -> Result<Value, ApiError> {
        self.request(Method::GET, path, &[], None).await
    }

    pub(crate) async fn get_with(&self, path: &str, query: &[(&str, String)]) -> Result<Value, ApiError> {
        self.request(Method::GET, path, query, None).await
    }

    pub(crate) async fn post(&self, path: &str, body: Option<&Value>) -> Result<Value, ApiError> {
        self.request(Method::POST, path, &[], body).await
    }

    pub(crate) async fn put(&self, path: &str, body: Option<&Value>) -> Result<Value, ApiError> {
        self.request(Method::PUT, path, &[], body).await
    }

    pub(crate) async fn delete(&self, path: &str) -> Result<Value, ApiError> {
        self.request(Method::DELETE, path, &[], None).await
    }
}
