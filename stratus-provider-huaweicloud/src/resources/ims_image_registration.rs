//! ims_image_registration - Register an uploaded image file with IMS

use std::time::Duration;

use async_trait::async_trait;
use log::info;
use serde_json::json;
use stratus_core::provider::{ProviderError, ProviderResult, ResourceKind, Timeouts};
use stratus_core::resource::{Resource, ResourceId, State, Value};
use stratus_core::wait::CancelToken;

use super::{AttrMapping, WaitSettings, api_failure, read_attributes, required_str};
use crate::client::{ClientError, ClientResult, ServiceClient};
use crate::jobs::wait_for_job;

const IMAGE_ATTRIBUTES: &[AttrMapping] = &[
    ("name", "name", false),
    ("status", "status", false),
    ("visibility", "visibility", false),
    ("disk_format", "disk_format", false),
    ("min_disk", "min_disk", false),
    ("min_ram", "min_ram", false),
    ("protected", "protected", false),
    ("tags", "tags", false),
    ("os_version", "__os_version", false),
    ("created_at", "created_at", false),
];

/// Attributes that can only change by registering again
const REPLACE_ON_CHANGE: &[&str] = &["image_id", "image_url"];

/// Look the image up by ID
async fn find_image(client: &ServiceClient, image_id: &str) -> ClientResult<Option<serde_json::Value>> {
    let path = client.url("v2/cloudimages", &[])?;
    let body = client.get_with_query(&path, &[("id", image_id)]).await?;
    Ok(body.pointer("/images/0").cloned())
}

/// IMS image registration kind
pub struct ImsImageRegistration {
    client: ServiceClient,
    timeouts: Timeouts,
    /// Pacing of the registration job wait
    job_wait: WaitSettings,
    /// Pacing of the deletion wait
    delete_wait: WaitSettings,
    cancel: Option<CancelToken>,
}

impl ImsImageRegistration {
    pub fn new(client: ServiceClient) -> Self {
        Self {
            client,
            timeouts: Timeouts {
                create: Duration::from_secs(20 * 60),
                update: Duration::from_secs(20 * 60),
                delete: Duration::from_secs(10 * 60),
            },
            job_wait: WaitSettings::fixed(Duration::from_secs(10), Duration::from_secs(10)),
            delete_wait: WaitSettings::backoff(Duration::from_secs(5), Duration::from_secs(3)),
            cancel: None,
        }
    }

    pub fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn with_wait(mut self, job_wait: WaitSettings, delete_wait: WaitSettings) -> Self {
        self.job_wait = job_wait;
        self.delete_wait = delete_wait;
        self
    }

    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }
}

#[async_trait]
impl ResourceKind for ImsImageRegistration {
    fn name(&self) -> &'static str {
        "ims_image_registration"
    }

    async fn create(&self, resource: &Resource) -> ProviderResult<State> {
        let image_id = required_str(resource, "image_id")?;
        let image_url = required_str(resource, "image_url")?;

        let path = self
            .client
            .url("v1/cloudimages/{image_id}/upload", &[("image_id", image_id)])
            .map_err(api_failure("register IMS image", &resource.id))?;
        let response = self
            .client
            .put(&path, &json!({"image_url": image_url}))
            .await
            .map_err(api_failure("register IMS image", &resource.id))?;

        let job_id = response
            .get("job_id")
            .and_then(|v| v.as_str())
            .filter(|id| !id.is_empty())
            .ok_or_else(|| {
                ProviderError::new("Failed to register IMS image: job ID not found in API response")
                    .for_resource(resource.id.clone())
            })?;
        info!("{}: registering image {} (job {})", resource.id, image_id, job_id);

        let job = wait_for_job(
            &self.client,
            job_id,
            self.job_wait.poll_options(self.timeouts.create),
            self.cancel.clone(),
        )
        .await
        .map_err(|e| e.for_resource(resource.id.clone()))?;

        let registered = job
            .pointer("/entities/image_id")
            .and_then(|v| v.as_str())
            .filter(|id| !id.is_empty())
            .ok_or_else(|| {
                ProviderError::new("Failed to register IMS image: image ID not found in job result")
                    .for_resource(resource.id.clone())
            })?;

        let mut state = self.read(&resource.id, registered).await?;
        state
            .attributes
            .insert("image_url".to_string(), Value::String(image_url.to_string()));
        Ok(state)
    }

    async fn read(&self, id: &ResourceId, identifier: &str) -> ProviderResult<State> {
        let image = find_image(&self.client, identifier)
            .await
            .map_err(api_failure("read IMS image", id))?;
        let Some(image) = image else {
            return Ok(State::not_found(id.clone()));
        };

        let mut attributes = read_attributes(&image, IMAGE_ATTRIBUTES);
        attributes.insert("image_id".to_string(), Value::String(identifier.to_string()));
        Ok(State::existing(id.clone(), attributes).with_identifier(identifier))
    }

    async fn update(
        &self,
        id: &ResourceId,
        identifier: &str,
        from: &State,
        to: &Resource,
    ) -> ProviderResult<State> {
        if let Some(attr) = REPLACE_ON_CHANGE.iter().find(|attr| {
            to.attributes
                .get(**attr)
                .is_some_and(|new| from.attributes.get(**attr) != Some(new))
        }) {
            return Err(ProviderError::new(format!(
                "Cannot change {} of ims_image_registration in place, delete and recreate",
                attr
            ))
            .for_resource(id.clone()));
        }
        self.read(id, identifier).await
    }

    async fn delete(&self, id: &ResourceId, identifier: &str) -> ProviderResult<()> {
        let path = self
            .client
            .url("v2/images/{image_id}", &[("image_id", identifier)])
            .map_err(api_failure("delete IMS image", id))?;
        match self.client.delete(&path, None).await {
            Ok(_) => {}
            Err(e) if e.is_not_found() => return Ok(()),
            Err(e) => return Err(api_failure("delete IMS image", id)(e)),
        }
        info!("{}: deleting image {}", id, identifier);

        let client = &self.client;
        self.delete_wait
            .waiter(
                format!("ims_image/{}", identifier),
                self.timeouts.delete,
                self.cancel.as_ref(),
            )
            .wait(move || async move {
                Ok::<_, ClientError>(find_image(client, identifier).await?.map(
                    |image| {
                        let status = image
                            .get("status")
                            .and_then(|s| s.as_str())
                            .unwrap_or_default()
                            .to_string();
                        (image, status)
                    },
                ))
            })
            .await
            .map_err(|e| ProviderError::from(e).for_resource(id.clone()))?;
        Ok(())
    }
}
