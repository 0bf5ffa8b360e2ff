use std::time::Duration;

use thiserror::Error;

/// Why waiting for a resource to converge did not succeed
#[derive(Debug, Error)]
pub enum WaitError<E> {
    /// The status fetch itself failed
    #[error("failed to fetch status of {resource} (last state: {}): {source}", display_state(.last_state))]
    Fetch {
        resource: String,
        last_state: Option<String>,
        #[source]
        source: E,
    },

    /// Cancelled from outside before the resource converged
    #[error("waiting for {resource} was cancelled (last state: {})", display_state(.last_state))]
    Cancelled {
        resource: String,
        last_state: Option<String>,
    },

    /// The resource reported a state that is neither pending nor target
    #[error("unexpected state '{state}' for {resource}, wanted one of {expected:?}")]
    UnexpectedState {
        resource: String,
        state: String,
        expected: Vec<String>,
    },

    /// The resource kept disappearing while a target state was expected
    #[error("{resource} was not found after {checks} consecutive checks")]
    NotFound { resource: String, checks: u32 },

    /// The deadline passed before the resource converged
    #[error("timeout after {timeout:?} waiting for {resource} (last state: {}){}", display_state(.last_state), display_last_error(.last_error))]
    Timeout {
        resource: String,
        last_state: Option<String>,
        timeout: Duration,
        last_error: Option<String>,
    },
}

impl<E> WaitError<E> {
    /// Identifier of the resource being waited on
    pub fn resource(&self) -> &str {
        match self {
            WaitError::Fetch { resource, .. }
            | WaitError::Cancelled { resource, .. }
            | WaitError::UnexpectedState { resource, .. }
            | WaitError::NotFound { resource, .. }
            | WaitError::Timeout { resource, .. } => resource,
        }
    }

    /// Last state observed before giving up, if any
    pub fn last_state(&self) -> Option<&str> {
        match self {
            WaitError::Fetch { last_state, .. }
            | WaitError::Cancelled { last_state, .. }
            | WaitError::Timeout { last_state, .. } => last_state.as_deref(),
            WaitError::UnexpectedState { state, .. } => Some(state),
            WaitError::NotFound { .. } => None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, WaitError::Timeout { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, WaitError::Cancelled { .. })
    }
}

fn display_state(state: &Option<String>) -> &str {
    state.as_deref().unwrap_or("none observed")
}

fn display_last_error(error: &Option<String>) -> String {
    match error {
        Some(e) => format!(", last error: {}", e),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wait_error_display() {
        let error: WaitError<std::io::Error> = WaitError::Timeout {
            resource: "dcs_instance/abc".to_string(),
            last_state: Some("CREATING".to_string()),
            timeout: Duration::from_secs(5),
            last_error: None,
        };
        assert_eq!(
            error.to_string(),
            "timeout after 5s waiting for dcs_instance/abc (last state: CREATING)"
        );

        let error: WaitError<std::io::Error> = WaitError::Cancelled {
            resource: "job/1".to_string(),
            last_state: None,
        };
        assert_eq!(
            error.to_string(),
            "waiting for job/1 was cancelled (last state: none observed)"
        );
    }

    #[test]
    fn test_wait_error_context_accessors() {
        let error: WaitError<std::io::Error> = WaitError::UnexpectedState {
            resource: "dcs_instance/abc".to_string(),
            state: "ERROR".to_string(),
            expected: vec!["RUNNING".to_string()],
        };
        assert_eq!(error.resource(), "dcs_instance/abc");
        assert_eq!(error.last_state(), Some("ERROR"));
        assert!(!error.is_timeout());
    }
}
