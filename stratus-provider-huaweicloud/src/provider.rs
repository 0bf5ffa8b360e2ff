//! Huawei Cloud Provider implementation
//!
//! Builds one service client per cloud service from the configuration and
//! hands them to the resource kinds through the registry.

use stratus_core::registry::ResourceRegistry;
use stratus_core::wait::CancelToken;

use crate::client::{ClientResult, ServiceClient};
use crate::config::Config;
use crate::resources::resource_registry;

/// Huawei Cloud Provider
pub struct HuaweiCloudProvider {
    region: String,
    pub(crate) registry: ResourceRegistry,
}

impl HuaweiCloudProvider {
    /// Create a provider from the configuration
    pub fn new(config: &Config) -> ClientResult<Self> {
        Self::build(config, None)
    }

    /// Create a provider whose waits stop when `token` is cancelled
    pub fn with_cancel(config: &Config, token: CancelToken) -> ClientResult<Self> {
        Self::build(config, Some(token))
    }

    fn build(config: &Config, cancel: Option<CancelToken>) -> ClientResult<Self> {
        let dcs = ServiceClient::new(config, "dcs")?;
        let ims = ServiceClient::new(config, "ims")?;
        Ok(Self {
            region: config.region.clone(),
            registry: resource_registry(&dcs, &ims, cancel),
        })
    }

    pub fn region(&self) -> &str {
        &self.region
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Credentials;
    use serde_json::json;
    use stratus_core::provider::Provider;
    use stratus_core::resource::{ResourceId, Value};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(uri: &str) -> Config {
        Config {
            region: "cn-north-4".to_string(),
            project_id: "p1".to_string(),
            credentials: Credentials::AkSk {
                access_key: "AK".to_string(),
                secret_key: "SK".to_string(),
                security_token: None,
            },
            cloud: "myhuaweicloud.com".to_string(),
            endpoints: Default::default(),
            max_retries: 0,
            insecure: false,
        }
        .with_endpoint("dcs", uri)
        .with_endpoint("ims", uri)
    }

    #[test]
    fn lists_resource_types() {
        let provider = HuaweiCloudProvider::new(&config("http://127.0.0.1:1")).unwrap();
        assert_eq!(provider.name(), "huaweicloud");
        assert_eq!(provider.region(), "cn-north-4");
        assert_eq!(
            provider.resource_types(),
            vec!["dcs_diagnosis_task", "dcs_instance", "ims_image_registration"]
        );
    }

    #[tokio::test]
    async fn read_dispatches_to_kind() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v2/p1/instances/i-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "name": "cache",
                "status": "RUNNING"
            })))
            .mount(&server)
            .await;

        let provider = HuaweiCloudProvider::new(&config(&server.uri())).unwrap();
        let id = ResourceId::new("dcs_instance", "cache");
        let state = provider.read(&id, "i-1").await.unwrap();
        assert!(state.exists);
        assert_eq!(
            state.attributes.get("status"),
            Some(&Value::String("RUNNING".to_string()))
        );
    }

    #[tokio::test]
    async fn unknown_type_is_rejected() {
        let provider = HuaweiCloudProvider::new(&config("http://127.0.0.1:1")).unwrap();
        let id = ResourceId::new("vpc", "main");
        let error = provider.delete(&id, "vpc-1").await.unwrap_err();
        assert_eq!(error.to_string(), "[vpc.main] Unknown resource type: vpc");
    }
}
