//! dcs_diagnosis_task - Diagnosis reports of a DCS instance
//!
//! The identifier is `<instance_id>/<report_id>`. Starting a diagnosis is
//! refused while the instance is busy, so creation retries until the
//! instance is back to `RUNNING`.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::DateTime;
use log::info;
use serde_json::json;
use stratus_core::provider::{ProviderError, ProviderResult, ResourceKind, Timeouts};
use stratus_core::resource::{Resource, ResourceId, State, Value};
use stratus_core::wait::{CancelToken, RetryOptions, retry_until_settled};

use super::dcs_instance::{busy_attempt, wait_until_running};
use super::{AttrMapping, WaitSettings, api_failure, read_attributes, required_str};
use crate::client::{ClientResult, ServiceClient};

const STATUS_DIAGNOSING: &str = "diagnosing";
const STATUS_FINISHED: &str = "finished";

const REPORT_ATTRIBUTES: &[AttrMapping] = &[
    ("abnormal_item_sum", "abnormal_item_sum", false),
    ("failed_item_sum", "failed_item_sum", false),
    ("diagnosis_node_report_list", "diagnosis_node_report_list", false),
];

/// Split `<instance_id>/<report_id>`
fn parse_identifier<'a>(id: &ResourceId, identifier: &'a str) -> ProviderResult<(&'a str, &'a str)> {
    match identifier.split_once('/') {
        Some((instance_id, report_id)) if !instance_id.is_empty() && !report_id.is_empty() => {
            Ok((instance_id, report_id))
        }
        _ => Err(ProviderError::new(format!(
            "Invalid identifier '{}', must be <instance_id>/<report_id>",
            identifier
        ))
        .for_resource(id.clone())),
    }
}

/// RFC 3339 timestamp to Unix milliseconds
fn unix_millis(resource: &Resource, key: &str) -> ProviderResult<i64> {
    let raw = required_str(resource, key)?;
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.timestamp_millis())
        .map_err(|e| {
            ProviderError::new(format!("Invalid {} '{}': {}", key, raw, e))
                .for_resource(resource.id.clone())
        })
}

/// Find one report in the instance's report list.
///
/// Only the first page of the list is read. A report beyond it looks
/// missing, which the report wait tolerates up to its not-found checks.
// TODO: page through the list by `offset` once paging is shared by clients.
async fn find_report(
    client: &ServiceClient,
    instance_id: &str,
    report_id: &str,
) -> ClientResult<Option<serde_json::Value>> {
    let path = client.url(
        "v2/{project_id}/instances/{instance_id}/diagnosis",
        &[("instance_id", instance_id)],
    )?;
    let body = client.get(&path).await?;
    Ok(body
        .get("diagnosis_report_list")
        .and_then(|list| list.as_array())
        .and_then(|list| {
            list.iter()
                .find(|r| r.get("report_id").and_then(|v| v.as_str()) == Some(report_id))
        })
        .cloned())
}

async fn refresh_report(
    client: &ServiceClient,
    instance_id: &str,
    report_id: &str,
) -> ClientResult<Option<(serde_json::Value, String)>> {
    Ok(find_report(client, instance_id, report_id).await?.map(|report| {
        let status = report
            .get("status")
            .and_then(|s| s.as_str())
            .unwrap_or_default()
            .to_string();
        (report, status)
    }))
}

/// Node addresses without their port
fn node_ips(detail: &serde_json::Value) -> Vec<Value> {
    detail
        .get("diagnosis_node_report_list")
        .and_then(|list| list.as_array())
        .map(|nodes| {
            nodes
                .iter()
                .filter_map(|node| node.get("node_ip").and_then(|ip| ip.as_str()))
                .map(|ip| Value::String(ip.split(':').next().unwrap_or(ip).to_string()))
                .collect()
        })
        .unwrap_or_default()
}

/// DCS diagnosis task kind
pub struct DcsDiagnosisTask {
    client: ServiceClient,
    timeouts: Timeouts,
    /// Pacing of the report wait
    wait: WaitSettings,
    /// Pacing of the instance wait between busy retries
    settle: WaitSettings,
    cancel: Option<CancelToken>,
}

impl DcsDiagnosisTask {
    pub fn new(client: ServiceClient) -> Self {
        Self {
            client,
            timeouts: Timeouts::default(),
            wait: WaitSettings::fixed(Duration::from_secs(2), Duration::from_secs(2)),
            settle: WaitSettings::fixed(Duration::from_secs(10), Duration::from_secs(10)),
            cancel: None,
        }
    }

    pub fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn with_wait(mut self, wait: WaitSettings, settle: WaitSettings) -> Self {
        self.wait = wait;
        self.settle = settle;
        self
    }

    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }
}

#[async_trait]
impl ResourceKind for DcsDiagnosisTask {
    fn name(&self) -> &'static str {
        "dcs_diagnosis_task"
    }

    async fn create(&self, resource: &Resource) -> ProviderResult<State> {
        let instance_id = required_str(resource, "instance_id")?;
        let mut body = json!({
            "begin_time": unix_millis(resource, "begin_time")?,
            "end_time": unix_millis(resource, "end_time")?,
        });
        if let Some(Value::List(ips)) = resource.attributes.get("node_ip_list")
            && !ips.is_empty()
        {
            body["node_ip_list"] = Value::List(ips.clone()).to_json();
        }

        let path = self
            .client
            .url(
                "v2/{project_id}/instances/{instance_id}/diagnosis",
                &[("instance_id", instance_id)],
            )
            .map_err(api_failure("create diagnosis task", &resource.id))?;

        let client = &self.client;
        let path = path.as_str();
        let body = &body;
        let settle = &self.settle;
        let cancel = self.cancel.as_ref();
        let options = RetryOptions {
            timeout: self.timeouts.create,
            delay: self.settle.retry_delay,
        };

        let response = retry_until_settled(
            &format!("dcs_instance/{}", instance_id),
            &options,
            cancel,
            move || async move { busy_attempt(client.post(path, body).await) },
            move |remaining| wait_until_running(client, instance_id, settle, remaining, cancel),
        )
        .await
        .map_err(|e| ProviderError::from(e).for_resource(resource.id.clone()))?;

        let report_id = response
            .get("report_id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| {
                ProviderError::new("Failed to create diagnosis task: report_id not found in API response")
                    .for_resource(resource.id.clone())
            })?
            .to_string();
        info!(
            "{}: started diagnosis {} on instance {}",
            resource.id, report_id, instance_id
        );

        let report = report_id.as_str();
        self.wait
            .waiter(
                format!("dcs_diagnosis_task/{}", report_id),
                self.timeouts.create,
                cancel,
            )
            .pending([STATUS_DIAGNOSING])
            .target([STATUS_FINISHED])
            .wait(move || refresh_report(client, instance_id, report))
            .await
            .map_err(|e| ProviderError::from(e).for_resource(resource.id.clone()))?;

        let identifier = format!("{}/{}", instance_id, report_id);
        self.read(&resource.id, &identifier).await
    }

    async fn read(&self, id: &ResourceId, identifier: &str) -> ProviderResult<State> {
        let (instance_id, report_id) = parse_identifier(id, identifier)?;

        let path = self
            .client
            .url("v2/{project_id}/diagnosis/{report_id}", &[("report_id", report_id)])
            .map_err(api_failure("read diagnosis report", id))?;
        let detail = match self.client.get(&path).await {
            Ok(detail) => detail,
            Err(e) if e.is_not_found() => return Ok(State::not_found(id.clone())),
            Err(e) => return Err(api_failure("read diagnosis report", id)(e)),
        };

        let summary = find_report(&self.client, instance_id, report_id)
            .await
            .map_err(api_failure("list diagnosis reports", id))?;
        let Some(summary) = summary else {
            return Ok(State::not_found(id.clone()));
        };

        let mut attributes: HashMap<String, Value> = read_attributes(&detail, REPORT_ATTRIBUTES);
        attributes.insert("instance_id".to_string(), Value::String(instance_id.to_string()));
        attributes.insert("node_ip_list".to_string(), Value::List(node_ips(&detail)));
        for field in ["begin_time", "end_time", "status"] {
            if let Some(value) = summary.get(field).and_then(Value::from_json) {
                attributes.insert(field.to_string(), value);
            }
        }

        Ok(State::existing(id.clone(), attributes).with_identifier(identifier))
    }

    async fn update(
        &self,
        id: &ResourceId,
        _identifier: &str,
        _from: &State,
        _to: &Resource,
    ) -> ProviderResult<State> {
        Err(ProviderError::new(
            "Update not supported for dcs_diagnosis_task, delete and recreate",
        )
        .for_resource(id.clone()))
    }

    async fn delete(&self, id: &ResourceId, identifier: &str) -> ProviderResult<()> {
        let (instance_id, report_id) = parse_identifier(id, identifier)?;
        let path = self
            .client
            .url(
                "v2/{project_id}/instances/{instance_id}/diagnosis",
                &[("instance_id", instance_id)],
            )
            .map_err(api_failure("delete diagnosis report", id))?;

        match self
            .client
            .delete(&path, Some(&json!({"report_id_list": [report_id]})))
            .await
        {
            Ok(_) => {
                info!("{}: deleted diagnosis report {}", id, report_id);
                Ok(())
            }
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(api_failure("delete diagnosis report", id)(e)),
        }
    }
}
