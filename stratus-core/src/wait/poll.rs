//! Poll-until-condition
//!
//! Fetch a status on a fixed interval, extract a value from each response and
//! stop as soon as the value is acceptable, the fetch fails, the deadline
//! passes or the caller cancels.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use log::{debug, warn};
use tokio::time::Instant;

use super::cancel::CancelToken;
use super::error::WaitError;
use super::sleep_or_cancel;

/// Timing for a poll
#[derive(Debug, Clone, PartialEq)]
pub struct PollOptions {
    /// Total time allowed, including the initial delay
    pub timeout: Duration,
    /// Pause between two fetches
    pub interval: Duration,
    /// Pause before the first fetch
    pub initial_delay: Duration,
    /// Consecutive retryable fetch errors tolerated by `poll_with_retry`
    pub max_transient_errors: u32,
}

impl Default for PollOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(600),
            interval: Duration::from_secs(5),
            initial_delay: Duration::ZERO,
            max_transient_errors: 3,
        }
    }
}

impl PollOptions {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn with_max_transient_errors(mut self, max: u32) -> Self {
        self.max_transient_errors = max;
        self
    }
}

/// Acceptance predicate over an extracted value
#[derive(Debug, Clone, PartialEq)]
pub enum Acceptance<T> {
    /// Value must equal the target
    Equals(T),
    /// Value must be one of the terminal values
    OneOf(Vec<T>),
}

impl<T> Acceptance<T> {
    pub fn matches<V>(&self, value: &V) -> bool
    where
        V: PartialEq<T> + ?Sized,
    {
        match self {
            Acceptance::Equals(target) => value == target,
            Acceptance::OneOf(targets) => targets.iter().any(|t| value == t),
        }
    }
}

/// Result of a poll
#[derive(Debug)]
pub enum PollOutcome<R, E> {
    /// The predicate held for this response
    Succeeded(R),
    /// Fetch failed or the poll was cancelled
    Failed(WaitError<E>),
    /// The deadline passed without the predicate holding
    TimedOut {
        resource: String,
        last_state: Option<String>,
        attempts: u32,
        timeout: Duration,
    },
}

impl<R, E> PollOutcome<R, E> {
    pub fn is_succeeded(&self) -> bool {
        matches!(self, PollOutcome::Succeeded(_))
    }

    pub fn is_timed_out(&self) -> bool {
        matches!(self, PollOutcome::TimedOut { .. })
    }

    /// Collapse into a `Result`, turning a timeout into [`WaitError::Timeout`]
    pub fn into_result(self) -> Result<R, WaitError<E>> {
        match self {
            PollOutcome::Succeeded(response) => Ok(response),
            PollOutcome::Failed(error) => Err(error),
            PollOutcome::TimedOut {
                resource,
                last_state,
                timeout,
                ..
            } => Err(WaitError::Timeout {
                resource,
                last_state,
                timeout,
                last_error: None,
            }),
        }
    }
}

/// Polls one resource until an extracted value is accepted
#[derive(Debug, Clone)]
pub struct Poller {
    resource: String,
    options: PollOptions,
    cancel: Option<CancelToken>,
}

impl Poller {
    pub fn new(resource: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            options: PollOptions::default(),
            cancel: None,
        }
    }

    pub fn with_options(mut self, options: PollOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Poll until `accept(extract(response))` holds.
    ///
    /// The first fetch error ends the poll as `Failed`.
    pub async fn poll<R, V, E, F, Fut, X, P>(
        &self,
        fetch: F,
        extract: X,
        accept: P,
    ) -> PollOutcome<R, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<R, E>>,
        X: Fn(&R) -> V,
        P: Fn(&V) -> bool,
        V: fmt::Display,
        E: fmt::Display,
    {
        self.poll_with_retry(fetch, extract, accept, |_: &E| false)
            .await
    }

    /// Like [`Poller::poll`], but fetch errors for which `is_retryable`
    /// holds are tolerated up to `max_transient_errors` times in a row.
    pub async fn poll_with_retry<R, V, E, F, Fut, X, P, C>(
        &self,
        mut fetch: F,
        extract: X,
        accept: P,
        is_retryable: C,
    ) -> PollOutcome<R, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<R, E>>,
        X: Fn(&R) -> V,
        P: Fn(&V) -> bool,
        C: Fn(&E) -> bool,
        V: fmt::Display,
        E: fmt::Display,
    {
        let started = Instant::now();
        let cancel = self.cancel.as_ref();
        let mut attempts = 0;
        let mut transient_errors = 0;
        let mut last_state: Option<String> = None;

        if !self.options.initial_delay.is_zero()
            && sleep_or_cancel(self.options.initial_delay, cancel).await
        {
            return self.cancelled(last_state);
        }

        loop {
            if cancel.is_some_and(CancelToken::is_cancelled) {
                return self.cancelled(last_state);
            }

            let remaining = match self.options.timeout.checked_sub(started.elapsed()) {
                Some(remaining) if !remaining.is_zero() => remaining,
                _ => return self.timed_out(last_state, attempts),
            };

            attempts += 1;
            let fetched = match tokio::time::timeout(remaining, fetch()).await {
                Ok(fetched) => fetched,
                Err(_) => return self.timed_out(last_state, attempts),
            };

            match fetched {
                Ok(response) => {
                    transient_errors = 0;
                    let value = extract(&response);
                    debug!(
                        "{}: attempt {} observed state {}",
                        self.resource, attempts, value
                    );
                    let accepted = accept(&value);
                    last_state = Some(value.to_string());
                    if accepted {
                        return PollOutcome::Succeeded(response);
                    }
                }
                Err(e)
                    if transient_errors < self.options.max_transient_errors
                        && is_retryable(&e) =>
                {
                    transient_errors += 1;
                    warn!(
                        "{}: transient error on attempt {} ({}/{}): {}",
                        self.resource,
                        attempts,
                        transient_errors,
                        self.options.max_transient_errors,
                        e
                    );
                }
                Err(e) => {
                    return PollOutcome::Failed(WaitError::Fetch {
                        resource: self.resource.clone(),
                        last_state,
                        source: e,
                    });
                }
            }

            let remaining = match self.options.timeout.checked_sub(started.elapsed()) {
                Some(remaining) if !remaining.is_zero() => remaining,
                _ => return self.timed_out(last_state, attempts),
            };

            // Never sleep past the deadline
            if sleep_or_cancel(self.options.interval.min(remaining), cancel).await {
                return self.cancelled(last_state);
            }
        }
    }

    fn cancelled<R, E>(&self, last_state: Option<String>) -> PollOutcome<R, E> {
        debug!("{}: poll cancelled", self.resource);
        PollOutcome::Failed(WaitError::Cancelled {
            resource: self.resource.clone(),
            last_state,
        })
    }

    fn timed_out<R, E>(&self, last_state: Option<String>, attempts: u32) -> PollOutcome<R, E> {
        debug!(
            "{}: poll timed out after {} attempts",
            self.resource, attempts
        );
        PollOutcome::TimedOut {
            resource: self.resource.clone(),
            last_state,
            attempts,
            timeout: self.options.timeout,
        }
    }
}
