//! Asynchronous job polling
//!
//! Several services answer long operations with a job ID; the job is then
//! polled until it reports `SUCCESS` or `FAIL`.

use log::info;
use serde_json::Value;
use stratus_core::provider::{ProviderError, ProviderResult};
use stratus_core::wait::{Acceptance, CancelToken, PollOptions, Poller};
use thiserror::Error;

use crate::client::{ClientError, ServiceClient};

pub const JOB_SUCCESS: &str = "SUCCESS";
pub const JOB_FAIL: &str = "FAIL";

/// Errors while fetching a job
#[derive(Debug, Error)]
pub enum JobError {
    #[error(transparent)]
    Client(#[from] ClientError),

    #[error("job {0} response has no status")]
    MissingStatus(String),
}

impl JobError {
    fn is_retryable(&self) -> bool {
        matches!(self, JobError::Client(e) if e.is_retryable())
    }
}

/// Fetch a job once
pub async fn get_job(client: &ServiceClient, job_id: &str) -> Result<Value, JobError> {
    let path = client.url("v1/{project_id}/jobs/{job_id}", &[("job_id", job_id)])?;
    let body = client.get(&path).await?;
    if job_status(&body).is_none() {
        return Err(JobError::MissingStatus(job_id.to_string()));
    }
    Ok(body)
}

fn job_status(body: &Value) -> Option<&str> {
    body.get("status").and_then(Value::as_str)
}

/// Poll a job until it finishes and return the final job body.
///
/// A job that ends in `FAIL` is an error carrying the job's reason.
pub async fn wait_for_job(
    client: &ServiceClient,
    job_id: &str,
    options: PollOptions,
    cancel: Option<CancelToken>,
) -> ProviderResult<Value> {
    let mut poller = Poller::new(format!("job/{}", job_id)).with_options(options);
    if let Some(token) = cancel {
        poller = poller.with_cancel(token);
    }

    let finished = Acceptance::OneOf(vec![JOB_SUCCESS, JOB_FAIL]);
    let body = poller
        .poll_with_retry(
            || get_job(client, job_id),
            |body: &Value| job_status(body).unwrap_or_default().to_string(),
            |status: &String| finished.matches(status),
            JobError::is_retryable,
        )
        .await
        .into_result()?;

    if job_status(&body) == Some(JOB_FAIL) {
        let reason = body
            .get("fail_reason")
            .and_then(Value::as_str)
            .filter(|r| !r.is_empty())
            .unwrap_or("no reason given");
        return Err(ProviderError::new(format!(
            "Job {} failed: {}",
            job_id, reason
        )));
    }

    info!("job {} succeeded", job_id);
    Ok(body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, Credentials};
    use serde_json::json;
    use std::time::Duration;
    use stratus_core::wait::cancel_pair;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn client_for(server: &MockServer) -> ServiceClient {
        let config = Config {
            region: "cn-north-4".to_string(),
            project_id: "p1".to_string(),
            credentials: Credentials::Token("tok".to_string()),
            cloud: "myhuaweicloud.com".to_string(),
            endpoints: Default::default(),
            max_retries: 0,
            insecure: false,
        }
        .with_endpoint("ims", server.uri());
        ServiceClient::new(&config, "ims").unwrap()
    }

    fn fast() -> PollOptions {
        PollOptions::default()
            .with_interval(Duration::from_millis(10))
            .with_timeout(Duration::from_secs(2))
    }

    #[tokio::test]
    async fn job_completes_after_running() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/p1/jobs/j-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "RUNNING"})))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/p1/jobs/j-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "SUCCESS",
                "entities": {"image_id": "img-1"}
            })))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let body = wait_for_job(&client, "j-1", fast(), None).await.unwrap();
        assert_eq!(body["entities"]["image_id"], "img-1");
        assert_eq!(server.received_requests().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn failed_job_reports_reason() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/p1/jobs/j-2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "FAIL",
                "fail_reason": "image file is corrupted"
            })))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let error = wait_for_job(&client, "j-2", fast(), None).await.unwrap_err();
        assert_eq!(error.to_string(), "Job j-2 failed: image file is corrupted");
    }

    #[tokio::test]
    async fn missing_status_fails_immediately() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/p1/jobs/j-3"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"job_id": "j-3"})))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let error = wait_for_job(&client, "j-3", fast(), None).await.unwrap_err();
        assert!(error.to_string().contains("job j-3 response has no status"));
    }

    #[tokio::test]
    async fn cancelled_wait_stops_polling() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/p1/jobs/j-4"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "RUNNING"})))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let (handle, token) = cancel_pair();
        handle.cancel();

        let error = wait_for_job(&client, "j-4", fast(), Some(token))
            .await
            .unwrap_err();
        assert!(error.to_string().contains("cancelled"));
        assert!(server.received_requests().await.unwrap().is_empty());
    }
}
