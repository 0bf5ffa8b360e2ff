//! Wait - Converging on asynchronous remote state
//!
//! Most cloud operations return before the resource is usable. The helpers
//! here re-fetch the resource until an observed value is acceptable:
//!
//! - `poll` - fixed-interval poll-until-condition with a three-way outcome
//! - `state_change` - pending/target state waiter with not-found tolerance
//!   and backoff
//! - `retry` - retry an operation while the remote side reports it is busy
//! - `cancel` - cooperative cancellation shared by all of the above

pub mod cancel;
mod error;
mod poll;
mod retry;
mod state_change;

use std::time::Duration;

pub use cancel::{CancelHandle, CancelToken, cancel_pair};
pub use error::WaitError;
pub use poll::{Acceptance, PollOptions, PollOutcome, Poller};
pub use retry::{Attempt, RetryOptions, retry_until_settled};
pub use state_change::StateWaiter;

/// Sleep for `duration`, returning early with `true` if cancelled
async fn sleep_or_cancel(duration: Duration, cancel: Option<&CancelToken>) -> bool {
    match cancel {
        None => {
            tokio::time::sleep(duration).await;
            false
        }
        Some(token) => {
            if token.is_cancelled() {
                return true;
            }
            tokio::select! {
                _ = tokio::time::sleep(duration) => token.is_cancelled(),
                _ = token.cancelled() => true,
            }
        }
    }
}
