//! Bounded waiting on the remote platform.
//!
//! Two independent combinators share one [`Budget`]: [`retry`] re-issues a call
//! while the remote reports the object busy, [`await_task`] polls an
//! asynchronous task until it is terminal. Exhausting the budget is a fatal
//! `Timeout`.

use crate::config::ReconcileConfig;
use crate::CoreError;
use std::thread;
use std::time::{Duration, Instant};
use stratus_remote::{ErrorClass, RemoteApi, RemoteError, TaskStatus};
use stratus_schema::TaskId;
use tracing::debug;

#[derive(Debug, Clone, Copy)]
pub struct Budget {
    deadline: Instant,
    initial_backoff: Duration,
    max_backoff: Duration,
    poll_interval: Duration,
}

impl Budget {
    /// A budget that starts now.
    pub fn start(config: &ReconcileConfig) -> Self {
        Self {
            deadline: Instant::now() + config.timeout(),
            initial_backoff: config.initial_backoff(),
            max_backoff: config.max_backoff(),
            poll_interval: config.task_poll_interval(),
        }
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    pub fn expired(&self) -> bool {
        Instant::now() >= self.deadline
    }
}

/// Call `f` until it succeeds or fails with a non-retryable error, backing off
/// exponentially between busy responses.
pub fn retry<T>(
    budget: &Budget,
    operation: &str,
    mut f: impl FnMut() -> Result<T, RemoteError>,
) -> Result<T, CoreError> {
    let mut backoff = budget.initial_backoff;
    let mut attempt = 1u32;
    loop {
        match f() {
            Ok(v) => return Ok(v),
            Err(e) if e.class() == ErrorClass::Retryable => {
                if budget.remaining() <= backoff {
                    return Err(CoreError::Timeout {
                        operation: format!(
                            "{operation} (still busy after {attempt} attempts: {e})"
                        ),
                    });
                }
                debug!("{operation}: {e}; retrying in {backoff:?}");
                thread::sleep(backoff);
                backoff = (backoff * 2).min(budget.max_backoff);
                attempt += 1;
            }
            Err(e) => return Err(e.into()),
        }
    }
}

/// Wait for `task` to reach a terminal status. `None` means the call completed
/// synchronously.
pub fn await_task(
    remote: &dyn RemoteApi,
    budget: &Budget,
    task: Option<&TaskId>,
    operation: &str,
) -> Result<(), CoreError> {
    let Some(task) = task else {
        return Ok(());
    };
    loop {
        match retry(budget, operation, || remote.task_status(task))? {
            TaskStatus::Succeeded => return Ok(()),
            TaskStatus::Failed(reason) => {
                return Err(RemoteError::TaskFailed {
                    task: task.to_string(),
                    reason,
                }
                .into())
            }
            TaskStatus::Running => {
                if budget.expired() {
                    return Err(CoreError::Timeout {
                        operation: format!("{operation} (task {task} still running)"),
                    });
                }
                thread::sleep(budget.poll_interval.min(budget.remaining()));
            }
        }
    }
}
