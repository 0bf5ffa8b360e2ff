//! Retry an operation that the remote side may reject while busy
//!
//! Some APIs refuse a request while the parent resource is in the middle of
//! another operation. Such rejections are classified as [`Attempt::Retry`];
//! the helper then waits for the parent to settle and tries again.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use log::info;
use tokio::time::Instant;

use super::cancel::CancelToken;
use super::error::WaitError;
use super::sleep_or_cancel;

/// Result of one attempt
#[derive(Debug)]
pub enum Attempt<R, E> {
    /// The operation went through
    Done(R),
    /// Rejected because the resource is busy; worth retrying
    Retry(E),
    /// Rejected for good
    Fatal(E),
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetryOptions {
    /// Total time allowed for all attempts and settling
    pub timeout: Duration,
    /// Pause after settling, before the next attempt
    pub delay: Duration,
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(600),
            delay: Duration::from_secs(10),
        }
    }
}

/// Run `attempt` until it is done, settling the resource between retries.
///
/// `settle` receives the time left before the deadline.
pub async fn retry_until_settled<R, E, A, AF, S, SF>(
    resource: &str,
    options: &RetryOptions,
    cancel: Option<&CancelToken>,
    mut attempt: A,
    mut settle: S,
) -> Result<R, WaitError<E>>
where
    A: FnMut() -> AF,
    AF: Future<Output = Attempt<R, E>>,
    S: FnMut(Duration) -> SF,
    SF: Future<Output = Result<(), WaitError<E>>>,
    E: fmt::Display,
{
    let started = Instant::now();
    let mut attempts = 0;
    let mut last_error: Option<String> = None;

    let timed_out = |last_error: Option<String>| WaitError::Timeout {
        resource: resource.to_string(),
        last_state: None,
        timeout: options.timeout,
        last_error,
    };

    loop {
        if cancel.is_some_and(CancelToken::is_cancelled) {
            return Err(WaitError::Cancelled {
                resource: resource.to_string(),
                last_state: None,
            });
        }
        if started.elapsed() >= options.timeout {
            return Err(timed_out(last_error));
        }

        attempts += 1;
        match attempt().await {
            Attempt::Done(result) => return Ok(result),
            Attempt::Fatal(source) => {
                return Err(WaitError::Fetch {
                    resource: resource.to_string(),
                    last_state: None,
                    source,
                });
            }
            Attempt::Retry(e) => {
                info!("{}: busy on attempt {}, retrying: {}", resource, attempts, e);
                last_error = Some(e.to_string());
            }
        }

        let remaining = match options.timeout.checked_sub(started.elapsed()) {
            Some(remaining) if !remaining.is_zero() => remaining,
            _ => return Err(timed_out(last_error)),
        };
        settle(remaining).await?;

        if sleep_or_cancel(options.delay, cancel).await {
            return Err(WaitError::Cancelled {
                resource: resource.to_string(),
                last_state: None,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::io;

    fn options() -> RetryOptions {
        RetryOptions {
            timeout: Duration::from_secs(60),
            delay: Duration::from_secs(5),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn settles_between_busy_attempts() {
        let mut script: VecDeque<Attempt<&str, io::Error>> = VecDeque::from(vec![
            Attempt::Retry(io::Error::other("DCS.4026 instance busy")),
            Attempt::Retry(io::Error::other("DCS.4026 instance busy")),
            Attempt::Done("report-1"),
        ]);
        let mut settled = Vec::new();

        let result = retry_until_settled(
            "dcs_diagnosis_task",
            &options(),
            None,
            || {
                let next = script
                    .pop_front()
                    .unwrap_or(Attempt::Fatal(io::Error::other("script exhausted")));
                async move { next }
            },
            |remaining| {
                settled.push(remaining);
                async { Ok(()) }
            },
        )
        .await
        .unwrap();

        assert_eq!(result, "report-1");
        assert_eq!(settled.len(), 2);
        assert!(settled[1] < settled[0]);
    }

    #[tokio::test(start_paused = true)]
    async fn fatal_rejection_is_returned() {
        let error = retry_until_settled(
            "dcs_diagnosis_task",
            &options(),
            None,
            || async { Attempt::<(), _>::Fatal(io::Error::other("DCS.4100 bad request")) },
            |_| async { Ok(()) },
        )
        .await
        .unwrap_err();

        assert!(matches!(error, WaitError::Fetch { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn always_busy_times_out_with_last_error() {
        let error = retry_until_settled(
            "dcs_diagnosis_task",
            &options(),
            None,
            || async { Attempt::<(), _>::Retry(io::Error::other("still busy")) },
            |_| async { Ok(()) },
        )
        .await
        .unwrap_err();

        match error {
            WaitError::Timeout { last_error, .. } => {
                assert_eq!(last_error.as_deref(), Some("still busy"));
            }
            other => panic!("expected timeout, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn settle_failure_propagates() {
        let error = retry_until_settled(
            "dcs_diagnosis_task",
            &options(),
            None,
            || async { Attempt::<(), _>::Retry(io::Error::other("busy")) },
            |_| async {
                Err(WaitError::UnexpectedState {
                    resource: "dcs_instance/abc".to_string(),
                    state: "ERROR".to_string(),
                    expected: vec!["RUNNING".to_string()],
                })
            },
        )
        .await
        .unwrap_err();

        assert_eq!(error.last_state(), Some("ERROR"));
    }
}
