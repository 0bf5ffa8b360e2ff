//! Resource kinds for Huawei Cloud
//!
//! Each kind owns the service client it talks to and implements
//! [`ResourceKind`](stratus_core::provider::ResourceKind) directly.

mod dcs_diagnosis_task;
mod dcs_instance;
mod ims_image_registration;

use std::collections::HashMap;
use std::time::Duration;

use stratus_core::provider::ProviderError;
use stratus_core::registry::ResourceRegistry;
use stratus_core::resource::{Resource, ResourceId, Value};
use stratus_core::wait::{CancelToken, PollOptions, StateWaiter};

use crate::client::{ClientError, ServiceClient};

pub use dcs_diagnosis_task::DcsDiagnosisTask;
pub use dcs_instance::DcsInstance;
pub use ims_image_registration::ImsImageRegistration;

// =============================================================================
// Attribute Mapping
// =============================================================================

/// Attribute mapping: (attribute_name, api_name, is_required_for_create)
pub type AttrMapping = (&'static str, &'static str, bool);

/// Build a request body from the mapped attributes of a resource
pub(crate) fn build_body(
    resource: &Resource,
    mappings: &[AttrMapping],
) -> Result<serde_json::Map<String, serde_json::Value>, ProviderError> {
    let mut body = serde_json::Map::new();
    for (attr, api_name, required) in mappings {
        match resource.attributes.get(*attr) {
            Some(value) => {
                body.insert(api_name.to_string(), value.to_json());
            }
            None if *required => {
                return Err(ProviderError::new(format!(
                    "Missing required attribute: {}",
                    attr
                ))
                .for_resource(resource.id.clone()));
            }
            None => {}
        }
    }
    Ok(body)
}

/// Pick the mapped fields out of an API response
pub(crate) fn read_attributes(
    body: &serde_json::Value,
    mappings: &[AttrMapping],
) -> HashMap<String, Value> {
    mappings
        .iter()
        .filter_map(|(attr, api_name, _)| {
            body.get(*api_name)
                .and_then(Value::from_json)
                .map(|value| (attr.to_string(), value))
        })
        .collect()
}

pub(crate) fn required_str<'a>(resource: &'a Resource, key: &str) -> Result<&'a str, ProviderError> {
    resource.get_str(key).ok_or_else(|| {
        ProviderError::new(format!("Missing required attribute: {}", key))
            .for_resource(resource.id.clone())
    })
}

/// Wrap a client error with what was being attempted
pub(crate) fn api_failure(
    action: &'static str,
    id: &ResourceId,
) -> impl FnOnce(ClientError) -> ProviderError {
    let id = id.clone();
    move |e| ProviderError::new(format!("Failed to {}: {}", action, e))
        .with_cause(e)
        .for_resource(id)
}

// =============================================================================
// Wait Pacing
// =============================================================================

/// How a kind paces its waits on remote state
#[derive(Debug, Clone, PartialEq)]
pub struct WaitSettings {
    /// Pause before the first refresh
    pub delay: Duration,
    /// Fixed refresh interval; exponential backoff when unset
    pub poll_interval: Option<Duration>,
    /// Floor for the backoff
    pub min_timeout: Duration,
    /// Pause between attempts rejected because the resource is busy
    pub retry_delay: Duration,
}

impl WaitSettings {
    /// Refresh on a fixed interval after an initial delay
    pub const fn fixed(delay: Duration, interval: Duration) -> Self {
        Self {
            delay,
            poll_interval: Some(interval),
            min_timeout: Duration::ZERO,
            retry_delay: interval,
        }
    }

    /// Back off exponentially, never refreshing faster than `min_timeout`
    pub const fn backoff(delay: Duration, min_timeout: Duration) -> Self {
        Self {
            delay,
            poll_interval: None,
            min_timeout,
            retry_delay: min_timeout,
        }
    }

    pub(crate) fn waiter(
        &self,
        resource: impl Into<String>,
        timeout: Duration,
        cancel: Option<&CancelToken>,
    ) -> StateWaiter {
        let mut waiter = StateWaiter::new(resource)
            .timeout(timeout)
            .delay(self.delay)
            .min_timeout(self.min_timeout);
        if let Some(interval) = self.poll_interval {
            waiter = waiter.poll_interval(interval);
        }
        if let Some(token) = cancel {
            waiter = waiter.with_cancel(token.clone());
        }
        waiter
    }

    pub(crate) fn poll_options(&self, timeout: Duration) -> PollOptions {
        PollOptions::default()
            .with_timeout(timeout)
            .with_initial_delay(self.delay)
            .with_interval(self.poll_interval.unwrap_or(self.min_timeout))
    }
}

// =============================================================================
// Registry
// =============================================================================

/// Register every kind this provider manages
pub fn resource_registry(
    dcs: &ServiceClient,
    ims: &ServiceClient,
    cancel: Option<CancelToken>,
) -> ResourceRegistry {
    let mut instance = DcsInstance::new(dcs.clone());
    let mut diagnosis = DcsDiagnosisTask::new(dcs.clone());
    let mut image = ImsImageRegistration::new(ims.clone());
    if let Some(token) = cancel {
        instance = instance.with_cancel(token.clone());
        diagnosis = diagnosis.with_cancel(token.clone());
        image = image.with_cancel(token);
    }

    ResourceRegistry::new()
        .with(instance)
        .with(diagnosis)
        .with(image)
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::config::{Config, Credentials};
    use stratus_core::provider::Timeouts;

    /// Client pointed at a mock server, authenticated with a token
    pub fn client(service: &str, uri: &str) -> ServiceClient {
        let config = Config {
            region: "cn-north-4".to_string(),
            project_id: "p1".to_string(),
            credentials: Credentials::Token("tok".to_string()),
            cloud: "myhuaweicloud.com".to_string(),
            endpoints: Default::default(),
            max_retries: 0,
            insecure: false,
        }
        .with_endpoint(service, uri);
        ServiceClient::new(&config, service).unwrap()
    }

    pub fn fast_wait() -> WaitSettings {
        WaitSettings::fixed(Duration::ZERO, Duration::from_millis(10))
    }

    pub fn short_timeouts() -> Timeouts {
        Timeouts::uniform(Duration::from_secs(5))
    }
}
