//! Pending/target state waiter
//!
//! The refresh function reports the resource together with its current state
//! string, or `None` when the resource does not exist. The waiter keeps
//! refreshing while the state is pending and stops once a target state has
//! been seen often enough in a row.

use std::future::Future;
use std::time::Duration;

use log::debug;
use tokio::time::Instant;

use super::cancel::CancelToken;
use super::error::WaitError;
use super::sleep_or_cancel;

/// Upper bound of the backoff between refreshes
const MAX_BACKOFF: Duration = Duration::from_secs(10);
/// Poll intervals at or above this are ignored in favour of the backoff
const MAX_POLL_INTERVAL: Duration = Duration::from_secs(180);

/// Waits for a resource to move from pending states into a target state
#[derive(Debug, Clone)]
pub struct StateWaiter {
    resource: String,
    pending: Vec<String>,
    target: Vec<String>,
    timeout: Duration,
    delay: Duration,
    poll_interval: Option<Duration>,
    min_timeout: Duration,
    not_found_checks: u32,
    continuous_target_occurrence: u32,
    cancel: Option<CancelToken>,
}

impl StateWaiter {
    pub fn new(resource: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            pending: Vec::new(),
            target: Vec::new(),
            timeout: Duration::from_secs(600),
            delay: Duration::ZERO,
            poll_interval: None,
            min_timeout: Duration::ZERO,
            not_found_checks: 20,
            continuous_target_occurrence: 1,
            cancel: None,
        }
    }

    pub fn pending<I, S>(mut self, states: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.pending = states.into_iter().map(Into::into).collect();
        self
    }

    /// Target states. Empty means waiting for the resource to disappear.
    pub fn target<I, S>(mut self, states: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.target = states.into_iter().map(Into::into).collect();
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Fixed interval between refreshes, replacing the backoff
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = Some(interval);
        self
    }

    /// Lower bound of the backoff between refreshes
    pub fn min_timeout(mut self, min_timeout: Duration) -> Self {
        self.min_timeout = min_timeout;
        self
    }

    pub fn not_found_checks(mut self, checks: u32) -> Self {
        self.not_found_checks = checks;
        self
    }

    pub fn continuous_target_occurrence(mut self, occurrences: u32) -> Self {
        self.continuous_target_occurrence = occurrences.max(1);
        self
    }

    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Refresh until a target state is reached.
    ///
    /// Returns the last refreshed resource, or `None` when the target was
    /// the resource disappearing.
    pub async fn wait<R, E, F, Fut>(&self, mut refresh: F) -> Result<Option<R>, WaitError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Option<(R, String)>, E>>,
    {
        let started = Instant::now();
        let cancel = self.cancel.as_ref();
        let mut last_state: Option<String> = None;
        let mut target_occurrences = 0;
        let mut not_found = 0;
        let mut wait = Duration::from_millis(100);

        if !self.delay.is_zero() && sleep_or_cancel(self.delay, cancel).await {
            return Err(self.cancelled(last_state));
        }

        loop {
            if cancel.is_some_and(CancelToken::is_cancelled) {
                return Err(self.cancelled(last_state));
            }

            let remaining = match self.timeout.checked_sub(started.elapsed()) {
                Some(remaining) if !remaining.is_zero() => remaining,
                _ => return Err(self.timed_out(last_state)),
            };

            let refreshed = match tokio::time::timeout(remaining, refresh()).await {
                Ok(refreshed) => refreshed,
                Err(_) => return Err(self.timed_out(last_state)),
            };

            let refreshed = refreshed.map_err(|source| WaitError::Fetch {
                resource: self.resource.clone(),
                last_state: last_state.clone(),
                source,
            })?;

            match refreshed {
                None if self.target.is_empty() => {
                    target_occurrences += 1;
                    if target_occurrences >= self.continuous_target_occurrence {
                        debug!("{}: gone", self.resource);
                        return Ok(None);
                    }
                }
                None => {
                    not_found += 1;
                    debug!(
                        "{}: not found ({}/{})",
                        self.resource, not_found, self.not_found_checks
                    );
                    if not_found > self.not_found_checks {
                        return Err(WaitError::NotFound {
                            resource: self.resource.clone(),
                            checks: not_found,
                        });
                    }
                }
                Some((result, state)) => {
                    not_found = 0;
                    debug!("{}: state {}", self.resource, state);

                    if self.target.contains(&state) {
                        target_occurrences += 1;
                        if target_occurrences >= self.continuous_target_occurrence {
                            return Ok(Some(result));
                        }
                    } else if self.pending.contains(&state) {
                        target_occurrences = 0;
                    } else if !self.pending.is_empty() {
                        return Err(WaitError::UnexpectedState {
                            resource: self.resource.clone(),
                            state,
                            expected: self.target.clone(),
                        });
                    }
                    last_state = Some(state);
                }
            }

            let remaining = match self.timeout.checked_sub(started.elapsed()) {
                Some(remaining) if !remaining.is_zero() => remaining,
                _ => return Err(self.timed_out(last_state)),
            };

            wait = self.next_wait(wait, target_occurrences);
            if sleep_or_cancel(wait.min(remaining), cancel).await {
                return Err(self.cancelled(last_state));
            }
        }
    }

    /// Backoff doubles except while waiting for a target state to recur
    fn next_wait(&self, previous: Duration, target_occurrences: u32) -> Duration {
        if let Some(interval) = self.poll_interval
            && !interval.is_zero()
            && interval < MAX_POLL_INTERVAL
        {
            return interval;
        }

        let wait = if target_occurrences == 0 {
            previous.saturating_mul(2)
        } else {
            previous
        };
        wait.max(self.min_timeout).min(MAX_BACKOFF)
    }

    fn cancelled<E>(&self, last_state: Option<String>) -> WaitError<E> {
        WaitError::Cancelled {
            resource: self.resource.clone(),
            last_state,
        }
    }

    fn timed_out<E>(&self, last_state: Option<String>) -> WaitError<E> {
        WaitError::Timeout {
            resource: self.resource.clone(),
            last_state,
            timeout: self.timeout,
            last_error: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wait::cancel_pair;
    use std::collections::VecDeque;
    use std::io;

    type Refreshed = Result<Option<(u32, String)>, io::Error>;

    fn states(script: &[Option<&str>]) -> VecDeque<Refreshed> {
        script
            .iter()
            .enumerate()
            .map(|(i, s)| Ok(s.map(|s| (i as u32, s.to_string()))))
            .collect()
    }

    fn instance_waiter() -> StateWaiter {
        StateWaiter::new("dcs_instance/abc")
            .pending(["CREATING"])
            .target(["RUNNING"])
            .timeout(Duration::from_secs(60))
            .poll_interval(Duration::from_secs(1))
    }

    #[tokio::test(start_paused = true)]
    async fn returns_resource_in_target_state() {
        let mut script = states(&[Some("CREATING"), Some("CREATING"), Some("RUNNING")]);

        let result = instance_waiter()
            .wait(|| {
                let next = script.pop_front().unwrap_or(Ok(None));
                async move { next }
            })
            .await
            .unwrap();

        assert_eq!(result, Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn pending_state_resets_continuous_target_count() {
        let mut script = states(&[
            Some("RUNNING"),
            Some("CREATING"),
            Some("RUNNING"),
            Some("RUNNING"),
        ]);

        let result = instance_waiter()
            .continuous_target_occurrence(2)
            .wait(|| {
                let next = script.pop_front().unwrap_or(Ok(None));
                async move { next }
            })
            .await
            .unwrap();

        assert_eq!(result, Some(3));
    }

    #[tokio::test(start_paused = true)]
    async fn unexpected_state_fails() {
        let mut script = states(&[Some("CREATING"), Some("CREATEFAILED")]);

        let error = instance_waiter()
            .wait(|| {
                let next = script.pop_front().unwrap_or(Ok(None));
                async move { next }
            })
            .await
            .unwrap_err();

        match error {
            WaitError::UnexpectedState {
                state, expected, ..
            } => {
                assert_eq!(state, "CREATEFAILED");
                assert_eq!(expected, vec!["RUNNING".to_string()]);
            }
            other => panic!("expected unexpected state, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_state_is_tolerated_without_pending_list() {
        let mut script = states(&[Some("QUEUED"), Some("whatever"), Some("finished")]);

        let result = StateWaiter::new("report/1")
            .target(["finished"])
            .poll_interval(Duration::from_secs(2))
            .wait(|| {
                let next = script.pop_front().unwrap_or(Ok(None));
                async move { next }
            })
            .await
            .unwrap();

        assert_eq!(result, Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn too_many_not_found_checks_fail() {
        let mut calls = 0;

        let error = instance_waiter()
            .not_found_checks(2)
            .wait(|| {
                calls += 1;
                async { Ok::<Option<(u32, String)>, io::Error>(None) }
            })
            .await
            .unwrap_err();

        assert!(matches!(error, WaitError::NotFound { checks: 3, .. }));
        assert_eq!(calls, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_target_waits_for_disappearance() {
        let mut script = states(&[Some("RUNNING"), Some("DELETING"), None]);

        let result = StateWaiter::new("dcs_instance/abc")
            .pending(["RUNNING", "DELETING"])
            .poll_interval(Duration::from_secs(1))
            .wait(|| {
                let next = script.pop_front().unwrap_or(Ok(None));
                async move { next }
            })
            .await
            .unwrap();

        assert_eq!(result, None);
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_error_keeps_last_state() {
        let mut script = states(&[Some("CREATING")]);
        script.push_back(Err(io::Error::other("500 Internal Server Error")));

        let error = instance_waiter()
            .wait(|| {
                let next = script.pop_front().unwrap_or(Ok(None));
                async move { next }
            })
            .await
            .unwrap_err();

        assert!(matches!(error, WaitError::Fetch { .. }));
        assert_eq!(error.last_state(), Some("CREATING"));
    }

    #[tokio::test(start_paused = true)]
    async fn times_out_while_pending() {
        let started = Instant::now();
        let error = instance_waiter()
            .timeout(Duration::from_millis(4500))
            .wait(|| async { Ok::<_, io::Error>(Some((0u32, "CREATING".to_string()))) })
            .await
            .unwrap_err();

        assert!(error.is_timeout());
        assert_eq!(error.last_state(), Some("CREATING"));
        assert_eq!(started.elapsed(), Duration::from_millis(4500));
    }

    #[tokio::test(start_paused = true)]
    async fn delay_and_backoff_between_refreshes() {
        let mut seen = Vec::new();
        let started = Instant::now();
        let mut script = states(&[
            Some("CREATING"),
            Some("CREATING"),
            Some("CREATING"),
            Some("RUNNING"),
        ]);

        StateWaiter::new("dcs_instance/abc")
            .pending(["CREATING"])
            .target(["RUNNING"])
            .delay(Duration::from_secs(3))
            .wait(|| {
                seen.push(Instant::now());
                let next = script.pop_front().unwrap_or(Ok(None));
                async move { next }
            })
            .await
            .unwrap();

        let gaps: Vec<Duration> = seen.windows(2).map(|w| w[1] - w[0]).collect();
        assert!(seen[0] - started >= Duration::from_secs(3));
        assert_eq!(
            gaps,
            vec![
                Duration::from_millis(200),
                Duration::from_millis(400),
                Duration::from_millis(800),
            ]
        );
    }

    #[test]
    fn backoff_respects_bounds() {
        let waiter = StateWaiter::new("x").min_timeout(Duration::from_secs(3));
        assert_eq!(
            waiter.next_wait(Duration::from_millis(100), 0),
            Duration::from_secs(3)
        );
        assert_eq!(
            waiter.next_wait(Duration::from_secs(8), 0),
            Duration::from_secs(10)
        );
        assert_eq!(
            waiter.next_wait(Duration::from_secs(4), 1),
            Duration::from_secs(4)
        );

        let fixed = StateWaiter::new("x").poll_interval(Duration::from_secs(2));
        assert_eq!(
            fixed.next_wait(Duration::from_secs(8), 0),
            Duration::from_secs(2)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_the_wait() {
        let (handle, token) = cancel_pair();
        let waiter = instance_waiter()
            .timeout(Duration::from_secs(3600))
            .with_cancel(token);

        let task = tokio::spawn(async move {
            waiter
                .wait(|| async { Ok::<_, io::Error>(Some((0u32, "CREATING".to_string()))) })
                .await
        });

        tokio::time::sleep(Duration::from_millis(1500)).await;
        handle.cancel();

        let error = task.await.unwrap().unwrap_err();
        assert!(error.is_cancelled());
    }
}
