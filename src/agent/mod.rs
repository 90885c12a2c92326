//! Agent - runs an external coding agent over a session until its work settles
//!
//! - `Runner`: one invocation of the agent process, returning a typed result
//! - `AgentLoop`: the orchestration loop with rate-limit backoff and
//!   completion checks against the store
//! - `mock`: in-memory doubles for driving the loop in tests

mod backoff;
mod claude;
mod loop_runner;
pub mod mock;
mod runner;
mod signals;

pub use backoff::{
    BACKOFF_BASE, BACKOFF_MAX, COUNTDOWN_TICK, RETRY_AFTER_BUFFER, RateLimitState, backoff_delay, format_duration,
    wait_with_countdown,
};
pub use claude::{ClaudeRunner, ClaudeRunnerConfig};
pub use loop_runner::{
    AgentLoop, AgentLoopConfig, AgentLoopResult, DEFAULT_ITERATION_DELAY, DEFAULT_ITERATION_TIMEOUT,
    DEFAULT_MAX_ITERATIONS, LoopEvent,
};
pub use runner::{RunResult, Runner};
pub use signals::{MAX_RETRY_AFTER, parse_output, parse_retry_after};
