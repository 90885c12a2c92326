//! Runner abstraction over the external agent process.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;

/// Parsed result of one agent invocation.
///
/// The flags are not mutually exclusive; the loop checks them in a fixed
/// priority order (rate limit, timeout, complete, continue, blocked).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunResult {
    /// Combined stdout and stderr of the process
    pub output: String,
    /// Agent says every item in the session is done
    pub complete: bool,
    /// Agent finished one item and more remain
    pub continue_: bool,
    /// Agent cannot make progress
    pub blocked: bool,
    pub blocked_reason: Option<String>,
    /// Backend refused the request; retry the same iteration later
    pub rate_limited: bool,
    /// Explicit wait requested by the backend, if it gave one
    pub retry_after: Option<Duration>,
    /// Process was killed after exceeding its timeout
    pub timed_out: bool,
}

impl RunResult {
    /// A result carrying output and no signals.
    pub fn with_output(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            ..Default::default()
        }
    }

    pub fn complete() -> Self {
        Self {
            complete: true,
            ..Default::default()
        }
    }

    pub fn continue_() -> Self {
        Self {
            continue_: true,
            ..Default::default()
        }
    }

    pub fn blocked(reason: impl Into<String>) -> Self {
        Self {
            blocked: true,
            blocked_reason: Some(reason.into()),
            ..Default::default()
        }
    }

    pub fn rate_limited(retry_after: Option<Duration>) -> Self {
        Self {
            rate_limited: true,
            retry_after,
            ..Default::default()
        }
    }

    pub fn timed_out() -> Self {
        Self {
            timed_out: true,
            ..Default::default()
        }
    }
}

/// Invokes the agent process once per call.
///
/// Rate limits, timeouts and blocked/complete/continue signals are ordinary
/// `Ok` results. `Err` means the process could not be invoked at all and is
/// never retried.
#[async_trait]
pub trait Runner: Send + Sync {
    /// Run the agent with `prompt`. A zero `timeout` means wait indefinitely.
    async fn run(&self, prompt: &str, trust: bool, timeout: Duration) -> Result<RunResult>;
}
