//! Agent loop outcome types.
//!
//! The agent loop's result carries independent flags; `LoopOutcome` folds them
//! into the single outcome a caller renders.

/// Outcome of an agent loop run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopOutcome {
    /// Every item in the session reached a terminal state
    Complete,
    /// The agent reported it cannot proceed
    Blocked(String),
    /// One iteration ran past its timeout
    TimedOut(String),
    /// Rate-limit waits would have exceeded the configured budget
    RateLimitExceeded,
    /// Ran out of iterations without a terminal outcome
    MaxIterations,
}

impl LoopOutcome {
    /// Process exit code the CLI reports for this outcome
    pub fn exit_code(&self) -> i32 {
        match self {
            LoopOutcome::Complete => 0,
            LoopOutcome::Blocked(_) => 2,
            LoopOutcome::TimedOut(_) => 3,
            LoopOutcome::RateLimitExceeded => 4,
            LoopOutcome::MaxIterations => 5,
        }
    }

    /// Short label for summaries
    pub fn label(&self) -> &'static str {
        match self {
            LoopOutcome::Complete => "complete",
            LoopOutcome::Blocked(_) => "blocked",
            LoopOutcome::TimedOut(_) => "timed out",
            LoopOutcome::RateLimitExceeded => "rate limit budget exceeded",
            LoopOutcome::MaxIterations => "max iterations reached",
        }
    }
}
