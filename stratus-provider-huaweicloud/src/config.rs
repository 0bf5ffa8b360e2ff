//! Provider configuration
//!
//! Settings come from `HW_*` environment variables first, then from the
//! shared CLI config file for whatever is still missing.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

/// Default cloud domain
pub const DEFAULT_CLOUD: &str = "myhuaweicloud.com";
/// Default retries for failed HTTP calls
pub const DEFAULT_MAX_RETRIES: u32 = 5;

/// Errors that can occur while building the configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required setting is missing everywhere
    #[error("Missing configuration: {0}")]
    Missing(&'static str),

    /// A setting has a malformed value
    #[error("Invalid value for {key}: {value}")]
    Invalid { key: &'static str, value: String },

    /// The shared config file could not be read
    #[error("Failed to read shared config file {}: {message}", .path.display())]
    SharedFile { path: PathBuf, message: String },

    /// The requested profile is not in the shared config file
    #[error("Profile not found in shared config file: {0}")]
    ProfileNotFound(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// How requests are authenticated
#[derive(Debug, Clone, PartialEq)]
pub enum Credentials {
    /// Access key / secret key pair, optionally temporary
    AkSk {
        access_key: String,
        secret_key: String,
        security_token: Option<String>,
    },
    /// Pre-issued IAM token sent as `X-Auth-Token`
    Token(String),
}

/// Huawei Cloud provider configuration
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub region: String,
    pub project_id: String,
    pub credentials: Credentials,
    /// Cloud domain used to build endpoints
    pub cloud: String,
    /// Per-service endpoint overrides (service name -> base URL)
    pub endpoints: HashMap<String, String>,
    pub max_retries: u32,
    /// Skip TLS certificate verification
    pub insecure: bool,
}

/// Shared CLI config file layout
#[derive(Debug, Deserialize)]
struct SharedConfig {
    #[serde(default)]
    current: String,
    #[serde(default)]
    profiles: Vec<SharedProfile>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SharedProfile {
    name: String,
    #[serde(default)]
    mode: String,
    #[serde(default)]
    access_key_id: String,
    #[serde(default)]
    secret_access_key: String,
    #[serde(default)]
    security_token: String,
    #[serde(default)]
    region: String,
    #[serde(default)]
    project_id: String,
}

impl Config {
    /// Build the configuration from the process environment
    pub fn from_env() -> ConfigResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> ConfigResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.is_empty());

        let profile = match get("HW_SHARED_CONFIG_FILE") {
            Some(path) => Some(load_profile(Path::new(&path), get("HW_PROFILE").as_deref())?),
            None => None,
        };
        let from_profile = |field: fn(&SharedProfile) -> &str| {
            profile
                .as_ref()
                .map(field)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };

        let region = get("HW_REGION_NAME")
            .or_else(|| from_profile(|p| &p.region))
            .ok_or(ConfigError::Missing("HW_REGION_NAME"))?;
        let project_id = get("HW_PROJECT_ID")
            .or_else(|| from_profile(|p| &p.project_id))
            .ok_or(ConfigError::Missing("HW_PROJECT_ID"))?;

        let credentials = if let Some(token) = get("HW_AUTH_TOKEN") {
            Credentials::Token(token)
        } else {
            let access_key = get("HW_ACCESS_KEY").or_else(|| from_profile(|p| &p.access_key_id));
            let secret_key =
                get("HW_SECRET_KEY").or_else(|| from_profile(|p| &p.secret_access_key));
            match (access_key, secret_key) {
                (Some(access_key), Some(secret_key)) => Credentials::AkSk {
                    access_key,
                    secret_key,
                    security_token: get("HW_SECURITY_TOKEN")
                        .or_else(|| from_profile(|p| &p.security_token)),
                },
                (Some(_), None) => return Err(ConfigError::Missing("HW_SECRET_KEY")),
                (None, Some(_)) => return Err(ConfigError::Missing("HW_ACCESS_KEY")),
                (None, None) => return Err(ConfigError::Missing("HW_ACCESS_KEY or HW_AUTH_TOKEN")),
            }
        };

        let max_retries = match get("HW_MAX_RETRIES") {
            Some(v) => v.parse().map_err(|_| ConfigError::Invalid {
                key: "HW_MAX_RETRIES",
                value: v,
            })?,
            None => DEFAULT_MAX_RETRIES,
        };

        let insecure = match get("HW_INSECURE").as_deref() {
            None | Some("false") | Some("0") => false,
            Some("true") | Some("1") => true,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    key: "HW_INSECURE",
                    value: other.to_string(),
                });
            }
        };

        Ok(Self {
            region,
            project_id,
            credentials,
            cloud: get("HW_CLOUD").unwrap_or_else(|| DEFAULT_CLOUD.to_string()),
            endpoints: HashMap::new(),
            max_retries,
            insecure,
        })
    }

    /// Override the endpoint of a service
    pub fn with_endpoint(mut self, service: impl Into<String>, url: impl Into<String>) -> Self {
        self.endpoints.insert(service.into(), url.into());
        self
    }

    /// Base URL of a service, always ending with `/`
    pub fn endpoint(&self, service: &str) -> String {
        let url = match self.endpoints.get(service) {
            Some(url) => url.clone(),
            None => format!("https://{}.{}.{}/", service, self.region, self.cloud),
        };
        if url.ends_with('/') {
            url
        } else {
            format!("{}/", url)
        }
    }
}

/// Load one profile from the shared config file
fn load_profile(path: &Path, profile: Option<&str>) -> ConfigResult<SharedProfile> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::SharedFile {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    let shared: SharedConfig =
        serde_json::from_str(&content).map_err(|e| ConfigError::SharedFile {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

    let name = profile.unwrap_or(&shared.current).to_string();
    let found = shared
        .profiles
        .into_iter()
        .find(|p| p.name == name)
        .ok_or(ConfigError::ProfileNotFound(name))?;

    if !found.mode.is_empty() && found.mode != "AKSK" {
        return Err(ConfigError::Invalid {
            key: "mode",
            value: found.mode,
        });
    }
    Ok(found)
}
