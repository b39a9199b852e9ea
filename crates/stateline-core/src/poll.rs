//! Eventual-consistency poller
//!
//! Drives a submitted remote operation (resource readiness, provisioning
//! jobs, analytics queries) to a terminal state with capped exponential
//! backoff. Transitions are forward-only: once a status check reports a
//! terminal state the operation never re-enters a pending one.

use crate::error::{CoreError, Result};
use std::fmt;
use std::future::Future;
use std::time::Duration;

/// Backoff and budget policy for one polling loop.
#[derive(Debug, Clone)]
pub struct PollConfig {
    /// Delay before the second status check.
    pub initial_delay: Duration,

    /// Upper bound the growing delay is capped at.
    pub max_delay: Duration,

    /// Multiplier applied to the delay after each non-terminal check.
    pub backoff_factor: f64,

    /// Hard ceiling on status checks. Exhausting it is a local policy
    /// failure, distinct from the remote's own timed-out state.
    pub max_attempts: u32,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            backoff_factor: 2.0,
            max_attempts: 40,
        }
    }
}

/// Observed status of an in-flight remote operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollStatus<T> {
    Pending,
    InProgress,
    Succeeded(T),
    Failed(String),
    Cancelled(String),
    TimedOut(String),
}

impl<T> PollStatus<T> {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, PollStatus::Pending | PollStatus::InProgress)
    }

    fn label(&self) -> &'static str {
        match self {
            PollStatus::Pending => "pending",
            PollStatus::InProgress => "in_progress",
            PollStatus::Succeeded(_) => "succeeded",
            PollStatus::Failed(_) => "failed",
            PollStatus::Cancelled(_) => "cancelled",
            PollStatus::TimedOut(_) => "timed_out",
        }
    }
}

/// Terminal failure states, as reported by the remote system.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalStatus {
    Failed,
    Cancelled,
    TimedOut,
}

impl fmt::Display for TerminalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TerminalStatus::Failed => write!(f, "failed"),
            TerminalStatus::Cancelled => write!(f, "cancelled"),
            TerminalStatus::TimedOut => write!(f, "timed out"),
        }
    }
}

/// Repeatedly run `check` until the operation reaches a terminal state.
///
/// `Succeeded` returns the operation's result payload. The remote's own
/// `Failed`/`Cancelled`/`TimedOut` become [`CoreError::AsyncOperationFailed`]
/// carrying the remote reason; running out of `max_attempts` becomes
/// [`CoreError::PollBudgetExceeded`] instead.
pub async fn poll_until_terminal<T, F, Fut>(config: &PollConfig, mut check: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<PollStatus<T>>>,
{
    let mut delay = config.initial_delay;

    for attempt in 1..=config.max_attempts {
        let status = check().await?;
        match status {
            PollStatus::Succeeded(value) => return Ok(value),
            PollStatus::Failed(reason) => {
                return Err(CoreError::AsyncOperationFailed {
                    status: TerminalStatus::Failed,
                    reason,
                });
            }
            PollStatus::Cancelled(reason) => {
                return Err(CoreError::AsyncOperationFailed {
                    status: TerminalStatus::Cancelled,
                    reason,
                });
            }
            PollStatus::TimedOut(reason) => {
                return Err(CoreError::AsyncOperationFailed {
                    status: TerminalStatus::TimedOut,
                    reason,
                });
            }
            status @ (PollStatus::Pending | PollStatus::InProgress) => {
                tracing::debug!(
                    attempt,
                    status = status.label(),
                    delay_ms = delay.as_millis() as u64,
                    "operation not terminal yet"
                );
                if attempt < config.max_attempts {
                    tokio::time::sleep(delay).await;
                    delay = next_delay(delay, config);
                }
            }
        }
    }

    Err(CoreError::PollBudgetExceeded {
        attempts: config.max_attempts,
    })
}

fn next_delay(current: Duration, config: &PollConfig) -> Duration {
    let scaled = current.as_secs_f64() * config.backoff_factor;
    Duration::from_secs_f64(scaled.min(config.max_delay.as_secs_f64()))
}
