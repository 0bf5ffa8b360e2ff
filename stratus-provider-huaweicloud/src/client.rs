//! Service client
//!
//! One `ServiceClient` per cloud service (DCS, IMS, ...). Clients are built
//! from a [`Config`] and handed to resource kinds explicitly.

use std::collections::BTreeMap;
use std::sync::LazyLock;
use std::time::Duration;

use chrono::Utc;
use log::{debug, warn};
use regex::Regex;
use reqwest::{Method, StatusCode, Url};
use thiserror::Error;

use crate::config::{Config, Credentials};
use crate::signer::{Signer, sdk_date};

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{([a-z_]+)\}").unwrap_or_else(|e| unreachable!("invalid placeholder regex: {}", e))
});

const MAX_RETRY_BACKOFF: Duration = Duration::from_secs(10);

/// Errors returned by service calls
#[derive(Debug, Error)]
pub enum ClientError {
    /// Transport-level failure
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The API answered with a non-success status
    #[error("API error (HTTP {status}){}: {message}", code_suffix(.code))]
    Api {
        status: u16,
        code: Option<String>,
        message: String,
    },

    /// A `{placeholder}` in a path template had no value
    #[error("Missing path parameter: {0}")]
    MissingPathParam(String),

    /// The endpoint and path did not form a valid URL
    #[error("Invalid URL {url}: {message}")]
    InvalidUrl { url: String, message: String },

    /// Response body is not valid JSON
    #[error("Invalid response body: {0}")]
    Json(#[from] serde_json::Error),
}

fn code_suffix(code: &Option<String>) -> String {
    match code {
        Some(code) => format!(" {}", code),
        None => String::new(),
    }
}

impl ClientError {
    pub fn status(&self) -> Option<u16> {
        match self {
            ClientError::Api { status, .. } => Some(*status),
            ClientError::Http(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.status() == Some(404)
    }

    /// Platform error code (e.g., "DCS.4026")
    pub fn error_code(&self) -> Option<&str> {
        match self {
            ClientError::Api { code, .. } => code.as_deref(),
            _ => None,
        }
    }

    /// Connection problems and throttling are worth another try
    pub fn is_retryable(&self) -> bool {
        match self {
            ClientError::Http(e) => e.is_connect() || e.is_timeout(),
            ClientError::Api { status, .. } => *status == 429 || *status == 503,
            _ => false,
        }
    }
}

pub type ClientResult<T> = Result<T, ClientError>;

#[derive(Debug, Clone)]
enum Auth {
    AkSk {
        signer: Signer,
        security_token: Option<String>,
    },
    Token(String),
}

/// Client for one cloud service in one region
#[derive(Debug, Clone)]
pub struct ServiceClient {
    http: reqwest::Client,
    endpoint: String,
    project_id: String,
    auth: Auth,
    max_retries: u32,
}

impl ServiceClient {
    /// Build a client for `service` (e.g., "dcs")
    pub fn new(config: &Config, service: &str) -> ClientResult<Self> {
        let http = reqwest::Client::builder()
            .danger_accept_invalid_certs(config.insecure)
            .timeout(Duration::from_secs(60))
            .build()?;

        let auth = match &config.credentials {
            Credentials::AkSk {
                access_key,
                secret_key,
                security_token,
            } => Auth::AkSk {
                signer: Signer::new(access_key, secret_key),
                security_token: security_token.clone(),
            },
            Credentials::Token(token) => Auth::Token(token.clone()),
        };

        Ok(Self {
            http,
            endpoint: config.endpoint(service),
            project_id: config.project_id.clone(),
            auth,
            max_retries: config.max_retries,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    /// Expand a path template such as `v2/{project_id}/instances/{instance_id}`.
    ///
    /// `project_id` is filled in automatically.
    pub fn url(&self, template: &str, params: &[(&str, &str)]) -> ClientResult<String> {
        let lookup = |name: &str| -> Option<String> {
            if name == "project_id" {
                return Some(self.project_id.clone());
            }
            params
                .iter()
                .find(|(k, _)| *k == name)
                .map(|(_, v)| v.to_string())
        };

        if let Some(missing) = PLACEHOLDER
            .captures_iter(template)
            .map(|c| c[1].to_string())
            .find(|name| lookup(name).is_none())
        {
            return Err(ClientError::MissingPathParam(missing));
        }

        Ok(PLACEHOLDER
            .replace_all(template, |c: &regex::Captures| {
                lookup(&c[1]).unwrap_or_default()
            })
            .into_owned())
    }

    pub async fn get(&self, path: &str) -> ClientResult<serde_json::Value> {
        self.request(Method::GET, path, None).await
    }

    /// GET with query parameters, percent-encoded
    pub async fn get_with_query(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> ClientResult<serde_json::Value> {
        let mut url = self.resolve(path)?;
        url.query_pairs_mut().extend_pairs(query);
        self.execute(Method::GET, url, None).await
    }

    pub async fn post(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> ClientResult<serde_json::Value> {
        self.request(Method::POST, path, Some(body)).await
    }

    pub async fn put(&self, path: &str, body: &serde_json::Value) -> ClientResult<serde_json::Value> {
        self.request(Method::PUT, path, Some(body)).await
    }

    pub async fn delete(
        &self,
        path: &str,
        body: Option<&serde_json::Value>,
    ) -> ClientResult<serde_json::Value> {
        self.request(Method::DELETE, path, body).await
    }

    /// Send a request and flatten the JSON response (`null` for an empty body).
    ///
    /// Retryable failures are retried up to `max_retries` times.
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<&serde_json::Value>,
    ) -> ClientResult<serde_json::Value> {
        let url = self.resolve(path)?;
        self.execute(method, url, body).await
    }

    fn resolve(&self, path: &str) -> ClientResult<Url> {
        let raw = format!("{}{}", self.endpoint, path.trim_start_matches('/'));
        Url::parse(&raw).map_err(|e| ClientError::InvalidUrl {
            message: e.to_string(),
            url: raw,
        })
    }

    async fn execute(
        &self,
        method: Method,
        url: Url,
        body: Option<&serde_json::Value>,
    ) -> ClientResult<serde_json::Value> {
        let payload = match body {
            Some(body) => Some(serde_json::to_vec(body)?),
            None => None,
        };

        let mut attempt = 0;
        loop {
            match self.send(&method, &url, payload.as_deref()).await {
                Err(e) if attempt < self.max_retries && e.is_retryable() => {
                    attempt += 1;
                    let backoff = retry_backoff(attempt);
                    warn!(
                        "{} {} failed (retry {}/{} in {:?}): {}",
                        method, url, attempt, self.max_retries, backoff, e
                    );
                    tokio::time::sleep(backoff).await;
                }
                result => return result,
            }
        }
    }

    async fn send(
        &self,
        method: &Method,
        url: &Url,
        payload: Option<&[u8]>,
    ) -> ClientResult<serde_json::Value> {
        let mut headers = BTreeMap::new();
        headers.insert("host".to_string(), host_header(url));
        headers.insert("x-project-id".to_string(), self.project_id.clone());
        if payload.is_some() {
            headers.insert("content-type".to_string(), "application/json".to_string());
        }

        let authorization = match &self.auth {
            Auth::AkSk {
                signer,
                security_token,
            } => {
                headers.insert("x-sdk-date".to_string(), sdk_date(Utc::now()));
                if let Some(token) = security_token {
                    headers.insert("x-security-token".to_string(), token.clone());
                }
                Some(signer.authorization(
                    method.as_str(),
                    url,
                    &headers,
                    payload.unwrap_or_default(),
                ))
            }
            Auth::Token(token) => {
                headers.insert("x-auth-token".to_string(), token.clone());
                None
            }
        };

        let mut request = self.http.request(method.clone(), url.clone());
        for (name, value) in headers.iter().filter(|(name, _)| *name != "host") {
            request = request.header(name.as_str(), value.as_str());
        }
        if let Some(authorization) = authorization {
            request = request.header("authorization", authorization);
        }
        if let Some(payload) = payload {
            request = request.body(payload.to_vec());
        }

        debug!("{} {}", method, url);
        let response = request.send().await?;
        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            return Err(api_error(status, &text));
        }
        if text.trim().is_empty() {
            return Ok(serde_json::Value::Null);
        }
        Ok(serde_json::from_str(&text)?)
    }
}

/// Pause before retry number `attempt` (1-based): 500ms doubling, capped at 10s
fn retry_backoff(attempt: u32) -> Duration {
    let millis = 2u64
        .saturating_pow(attempt.saturating_sub(1))
        .saturating_mul(500);
    Duration::from_millis(millis).min(MAX_RETRY_BACKOFF)
}

fn host_header(url: &Url) -> String {
    let host = url.host_str().unwrap_or_default();
    match url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    }
}

/// Build an API error from the platform's error body
fn api_error(status: StatusCode, text: &str) -> ClientError {
    let body: serde_json::Value = serde_json::from_str(text).unwrap_or_default();
    let field = |flat: &str, nested: &str| {
        body.get(flat)
            .or_else(|| body.pointer(nested))
            .and_then(|v| v.as_str())
            .map(str::to_string)
    };

    let code = field("error_code", "/error/code");
    let message = field("error_msg", "/error/message").unwrap_or_else(|| {
        if text.trim().is_empty() {
            status
                .canonical_reason()
                .unwrap_or("unknown error")
                .to_string()
        } else {
            text.trim().to_string()
        }
    });

    ClientError::Api {
        status: status.as_u16(),
        code,
        message,
    }
}
