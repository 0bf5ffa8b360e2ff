//! dcs_instance - Distributed Cache Service instances

use std::time::Duration;

use async_trait::async_trait;
use log::info;
use serde_json::json;
use stratus_core::provider::{ProviderError, ProviderResult, ResourceKind, Timeouts};
use stratus_core::resource::{Resource, ResourceId, State};
use stratus_core::wait::{Attempt, CancelToken, RetryOptions, WaitError, retry_until_settled};

use super::{AttrMapping, WaitSettings, api_failure, build_body, read_attributes};
use crate::client::{ClientError, ClientResult, ServiceClient};

pub(crate) const STATUS_RUNNING: &str = "RUNNING";
/// Reported for an instance whose GET answers 404
pub(crate) const STATUS_DELETED: &str = "DELETED";

/// Error codes meaning another operation is in progress on the instance
const BUSY_ERROR_CODES: &[&str] = &[
    "DCS.4026",
    "DCS.4049",
    "DCS.4096",
    "DCS.4097",
    "DCS.4111",
    "DCS.4113",
    "CBC.99003651",
];

const CREATE_ATTRIBUTES: &[AttrMapping] = &[
    ("name", "name", true),
    ("engine", "engine", true),
    ("engine_version", "engine_version", false),
    ("capacity", "capacity", true),
    ("flavor", "spec_code", true),
    ("vpc_id", "vpc_id", true),
    ("subnet_id", "subnet_id", true),
    ("availability_zones", "available_zones", true),
    ("password", "password", false),
    ("description", "description", false),
    ("enterprise_project_id", "enterprise_project_id", false),
];

const COMPUTED_ATTRIBUTES: &[AttrMapping] = &[
    ("status", "status", false),
    ("private_ip", "ip", false),
    ("port", "port", false),
    ("domain_name", "domain_name", false),
    ("max_memory", "max_memory", false),
    ("used_memory", "used_memory", false),
];

/// Attributes that can change without replacing the instance
const UPDATABLE: &[&str] = &["name", "description"];

/// Never returned by the API
const WRITE_ONLY: &[&str] = &["password"];

/// Whether the API rejected a request because the instance is busy
pub(crate) fn is_busy(error: &ClientError) -> bool {
    error.status() == Some(400)
        && error
            .error_code()
            .is_some_and(|code| BUSY_ERROR_CODES.contains(&code))
}

pub(crate) fn busy_attempt<R>(result: ClientResult<R>) -> Attempt<R, ClientError> {
    match result {
        Ok(response) => Attempt::Done(response),
        Err(e) if is_busy(&e) => Attempt::Retry(e),
        Err(e) => Attempt::Fatal(e),
    }
}

/// Fetch the instance and its status
pub(crate) async fn refresh_instance(
    client: &ServiceClient,
    instance_id: &str,
) -> ClientResult<Option<(serde_json::Value, String)>> {
    let path = client.url(
        "v2/{project_id}/instances/{instance_id}",
        &[("instance_id", instance_id)],
    )?;
    match client.get(&path).await {
        Ok(body) => {
            let status = body
                .get("status")
                .and_then(|s| s.as_str())
                .unwrap_or_default()
                .to_string();
            Ok(Some((body, status)))
        }
        Err(e) if e.is_not_found() => Ok(Some((serde_json::Value::Null, STATUS_DELETED.to_string()))),
        Err(e) => Err(e),
    }
}

/// Wait until the instance reports `RUNNING`; every other state is pending
pub(crate) async fn wait_until_running(
    client: &ServiceClient,
    instance_id: &str,
    settings: &WaitSettings,
    timeout: Duration,
    cancel: Option<&CancelToken>,
) -> Result<(), WaitError<ClientError>> {
    settings
        .waiter(format!("dcs_instance/{}", instance_id), timeout, cancel)
        .target([STATUS_RUNNING])
        .wait(move || refresh_instance(client, instance_id))
        .await
        .map(|_| ())
}

/// DCS instance kind
pub struct DcsInstance {
    client: ServiceClient,
    timeouts: Timeouts,
    wait: WaitSettings,
    cancel: Option<CancelToken>,
}

impl DcsInstance {
    pub fn new(client: ServiceClient) -> Self {
        Self {
            client,
            timeouts: Timeouts::default(),
            wait: WaitSettings::fixed(Duration::from_secs(10), Duration::from_secs(10)),
            cancel: None,
        }
    }

    pub fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn with_wait(mut self, wait: WaitSettings) -> Self {
        self.wait = wait;
        self
    }

    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Wait for the instance to leave `pending` and settle in `RUNNING`
    async fn wait_for_running(
        &self,
        id: &ResourceId,
        instance_id: &str,
        pending: &[&str],
        timeout: Duration,
    ) -> ProviderResult<()> {
        let client = &self.client;
        self.wait
            .waiter(format!("dcs_instance/{}", instance_id), timeout, self.cancel.as_ref())
            .pending(pending.iter().copied())
            .target([STATUS_RUNNING])
            .continuous_target_occurrence(2)
            .wait(move || refresh_instance(client, instance_id))
            .await
            .map_err(|e| ProviderError::from(e).for_resource(id.clone()))?;
        Ok(())
    }
}

#[async_trait]
impl ResourceKind for DcsInstance {
    fn name(&self) -> &'static str {
        "dcs_instance"
    }

    async fn create(&self, resource: &Resource) -> ProviderResult<State> {
        let body = build_body(resource, CREATE_ATTRIBUTES)?;
        let path = self
            .client
            .url("v2/{project_id}/instances", &[])
            .map_err(api_failure("create DCS instance", &resource.id))?;
        let response = self
            .client
            .post(&path, &serde_json::Value::Object(body))
            .await
            .map_err(api_failure("create DCS instance", &resource.id))?;

        let instance_id = response
            .pointer("/instances/0/instance_id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| {
                ProviderError::new("Failed to create DCS instance: instance_id not found in API response")
                    .for_resource(resource.id.clone())
            })?
            .to_string();
        info!("{}: created DCS instance {}", resource.id, instance_id);

        self.wait_for_running(&resource.id, &instance_id, &["CREATING"], self.timeouts.create)
            .await?;
        self.read(&resource.id, &instance_id).await
    }

    async fn read(&self, id: &ResourceId, identifier: &str) -> ProviderResult<State> {
        let path = self
            .client
            .url(
                "v2/{project_id}/instances/{instance_id}",
                &[("instance_id", identifier)],
            )
            .map_err(api_failure("read DCS instance", id))?;
        let body = match self.client.get(&path).await {
            Ok(body) => body,
            Err(e) if e.is_not_found() => return Ok(State::not_found(id.clone())),
            Err(e) => return Err(api_failure("read DCS instance", id)(e)),
        };

        let mut attributes = read_attributes(&body, CREATE_ATTRIBUTES);
        attributes.extend(read_attributes(&body, COMPUTED_ATTRIBUTES));
        Ok(State::existing(id.clone(), attributes).with_identifier(identifier))
    }

    async fn update(
        &self,
        id: &ResourceId,
        identifier: &str,
        from: &State,
        to: &Resource,
    ) -> ProviderResult<State> {
        for (attr, _, _) in CREATE_ATTRIBUTES {
            if UPDATABLE.contains(attr) || WRITE_ONLY.contains(attr) {
                continue;
            }
            if let Some(new) = to.attributes.get(*attr)
                && from.attributes.get(*attr).is_some_and(|old| old != new)
            {
                return Err(ProviderError::new(format!(
                    "Cannot change {} of dcs_instance in place, delete and recreate",
                    attr
                ))
                .for_resource(id.clone()));
            }
        }

        let changes: serde_json::Map<String, serde_json::Value> = UPDATABLE
            .iter()
            .filter_map(|attr| {
                let new = to.attributes.get(*attr)?;
                (from.attributes.get(*attr) != Some(new))
                    .then(|| (attr.to_string(), new.to_json()))
            })
            .collect();
        if changes.is_empty() {
            return self.read(id, identifier).await;
        }

        let path = self
            .client
            .url(
                "v2/{project_id}/instances/{instance_id}",
                &[("instance_id", identifier)],
            )
            .map_err(api_failure("update DCS instance", id))?;
        self.client
            .put(&path, &serde_json::Value::Object(changes))
            .await
            .map_err(api_failure("update DCS instance", id))?;
        info!("{}: updated DCS instance {}", id, identifier);

        self.wait_for_running(id, identifier, &["EXTENDING", "RESTARTING"], self.timeouts.update)
            .await?;
        self.read(id, identifier).await
    }

    async fn delete(&self, id: &ResourceId, identifier: &str) -> ProviderResult<()> {
        let path = self
            .client
            .url(
                "v2/{project_id}/instances/{instance_id}",
                &[("instance_id", identifier)],
            )
            .map_err(api_failure("delete DCS instance", id))?;

        let client = &self.client;
        let path = path.as_str();
        let wait = &self.wait;
        let cancel = self.cancel.as_ref();
        let label = format!("dcs_instance/{}", identifier);
        let options = RetryOptions {
            timeout: self.timeouts.delete,
            delay: self.wait.retry_delay,
        };

        retry_until_settled(
            &label,
            &options,
            cancel,
            move || async move {
                match client.delete(path, None).await {
                    Err(e) if e.is_not_found() => Attempt::Done(json!(null)),
                    result => busy_attempt(result),
                }
            },
            move |remaining| wait_until_running(client, identifier, wait, remaining, cancel),
        )
        .await
        .map_err(|e| ProviderError::from(e).for_resource(id.clone()))?;
        info!("{}: deleting DCS instance {}", id, identifier);

        self.wait
            .waiter(label, self.timeouts.delete, cancel)
            .pending([STATUS_RUNNING])
            .target([STATUS_DELETED])
            .continuous_target_occurrence(2)
            .wait(move || refresh_instance(client, identifier))
            .await
            .map_err(|e| ProviderError::from(e).for_resource(id.clone()))?;
        Ok(())
    }
}
