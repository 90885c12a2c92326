//! Agent loop - drives the agent process over a session until its items settle.
//!
//! Each iteration asks the prompt provider for a fresh prompt, runs the agent
//! once, and interprets the typed result:
//!
//! 1. Rate limited: back off and retry the same iteration, within the wait budget
//! 2. Timed out: stop
//! 3. Complete: stop only if the store agrees every item is terminal
//! 4. Continue: stop if the store shows every item terminal
//! 5. Blocked: stop
//! 6. No signal: same check as Continue
//!
//! Item state is re-read from the store after every run; the agent's own claim
//! of completion is never trusted on its own.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;

use super::backoff::{COUNTDOWN_TICK, RateLimitState, format_duration, wait_with_countdown};
use super::runner::Runner;
use crate::domain::LoopOutcome;
use crate::error::{JuggleError, Result};
use crate::prompt::PromptProvider;
use crate::storage::{LoopStore, SessionCounts};

pub const DEFAULT_MAX_ITERATIONS: u32 = 10;
pub const DEFAULT_ITERATION_DELAY: Duration = Duration::from_secs(2);
pub const DEFAULT_ITERATION_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Caller-supplied settings for one loop run.
#[derive(Debug, Clone)]
pub struct AgentLoopConfig {
    /// Session to work through
    pub session_id: String,
    /// Project whose store and prompt the loop uses
    pub project_root: PathBuf,
    pub max_iterations: u32,
    /// Passed through to the runner
    pub trust: bool,
    /// Passed through to the prompt provider
    pub debug: bool,
    /// Pause between iterations
    pub iteration_delay: Duration,
    /// Per-run limit; zero means none
    pub iteration_timeout: Duration,
    /// Cumulative rate-limit wait budget; zero means unbounded
    pub max_wait: Duration,
}

impl AgentLoopConfig {
    pub fn new(session_id: impl Into<String>, project_root: impl Into<PathBuf>) -> Self {
        Self {
            session_id: session_id.into(),
            project_root: project_root.into(),
            max_iterations: DEFAULT_MAX_ITERATIONS,
            trust: false,
            debug: false,
            iteration_delay: DEFAULT_ITERATION_DELAY,
            iteration_timeout: DEFAULT_ITERATION_TIMEOUT,
            max_wait: Duration::ZERO,
        }
    }

    pub fn max_iterations(mut self, n: u32) -> Self {
        self.max_iterations = n;
        self
    }

    pub fn trust(mut self, trust: bool) -> Self {
        self.trust = trust;
        self
    }

    pub fn debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn iteration_delay(mut self, delay: Duration) -> Self {
        self.iteration_delay = delay;
        self
    }

    pub fn iteration_timeout(mut self, timeout: Duration) -> Self {
        self.iteration_timeout = timeout;
        self
    }

    pub fn max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = max_wait;
        self
    }
}

/// What happened during a loop run.
///
/// At most one of `complete`, `blocked`, `timed_out` and `rate_limit_exceeded`
/// is set. None set means the iteration limit was reached.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentLoopResult {
    /// Non-rate-limited agent runs performed
    pub iterations: u32,
    pub complete: bool,
    pub blocked: bool,
    pub timed_out: bool,
    pub rate_limit_exceeded: bool,
    pub blocked_reason: Option<String>,
    pub timeout_message: Option<String>,
    /// Time spent sleeping on rate limits
    pub total_wait: Duration,
    pub items_complete: usize,
    pub items_blocked: usize,
    pub items_total: usize,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl AgentLoopResult {
    fn new() -> Self {
        Self {
            iterations: 0,
            complete: false,
            blocked: false,
            timed_out: false,
            rate_limit_exceeded: false,
            blocked_reason: None,
            timeout_message: None,
            total_wait: Duration::ZERO,
            items_complete: 0,
            items_blocked: 0,
            items_total: 0,
            started_at: Utc::now(),
            ended_at: None,
        }
    }

    fn apply_counts(&mut self, counts: SessionCounts) {
        self.items_complete = counts.complete;
        self.items_blocked = counts.blocked;
        self.items_total = counts.total;
    }

    /// Fold the flags into a single outcome.
    pub fn outcome(&self) -> LoopOutcome {
        if self.complete {
            LoopOutcome::Complete
        } else if self.blocked {
            LoopOutcome::Blocked(self.blocked_reason.clone().unwrap_or_default())
        } else if self.timed_out {
            LoopOutcome::TimedOut(self.timeout_message.clone().unwrap_or_default())
        } else if self.rate_limit_exceeded {
            LoopOutcome::RateLimitExceeded
        } else {
            LoopOutcome::MaxIterations
        }
    }

    /// Wall-clock duration of the run (up to now if it has not ended).
    pub fn elapsed(&self) -> Duration {
        let end = self.ended_at.unwrap_or_else(Utc::now);
        (end - self.started_at).to_std().unwrap_or_default()
    }
}

/// Progress notifications for whoever is rendering the run.
#[derive(Debug, Clone, PartialEq)]
pub enum LoopEvent {
    IterationStarted { iteration: u32, max_iterations: u32 },
    RateLimited { iteration: u32, wait: Duration, retry: u32 },
    WaitRemaining { remaining: Duration },
    PrematureCompletion { counts: SessionCounts },
    CountsRefreshed { counts: SessionCounts },
    Delay { duration: Duration },
    Finished { outcome: LoopOutcome },
}

/// Drives one session through repeated agent runs.
pub struct AgentLoop<R, P, S>
where
    R: Runner,
    P: PromptProvider,
    S: LoopStore,
{
    runner: Arc<R>,
    prompts: Arc<P>,
    store: Arc<S>,
    events: Option<mpsc::UnboundedSender<LoopEvent>>,
}

impl<R, P, S> AgentLoop<R, P, S>
where
    R: Runner,
    P: PromptProvider,
    S: LoopStore,
{
    pub fn new(runner: Arc<R>, prompts: Arc<P>, store: Arc<S>) -> Self {
        Self {
            runner,
            prompts,
            store,
            events: None,
        }
    }

    /// Send progress events to `tx`. Delivery is fire-and-forget.
    pub fn with_events(mut self, tx: mpsc::UnboundedSender<LoopEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    /// Run until a terminal outcome or the iteration limit.
    ///
    /// Errors only for a missing session, a prompt failure, or a runner that
    /// could not be invoked. Every other ending is described by the result.
    pub async fn run(&self, config: &AgentLoopConfig) -> Result<AgentLoopResult> {
        let session_id = config.session_id.as_str();
        self.store.load_session(session_id)?;

        log::info!(
            "Starting agent loop for session {} (max {} iterations, timeout {:?}, max wait {:?})",
            session_id,
            config.max_iterations,
            config.iteration_timeout,
            config.max_wait
        );

        let mut result = AgentLoopResult::new();
        let mut backoff = RateLimitState::new(config.max_wait);
        let mut suppress_boundary = false;
        let mut iteration: u32 = 1;

        while iteration <= config.max_iterations {
            if !suppress_boundary {
                log::info!("Session {}: iteration {}/{}", session_id, iteration, config.max_iterations);
                self.emit(LoopEvent::IterationStarted {
                    iteration,
                    max_iterations: config.max_iterations,
                });
            }
            suppress_boundary = false;

            let prompt = self
                .prompts
                .generate(&config.project_root, session_id, config.debug)
                .await
                .map_err(|e| JuggleError::Prompt(format!("session {}: {}", session_id, e)))?;

            let run = self
                .runner
                .run(&prompt, config.trust, config.iteration_timeout)
                .await?;

            if run.rate_limited {
                let wait = backoff.next_wait(run.retry_after);
                if !backoff.within_budget(wait) {
                    log::warn!(
                        "Session {}: rate limit wait {} would exceed budget {} ({} already waited)",
                        session_id,
                        format_duration(wait),
                        format_duration(config.max_wait),
                        format_duration(backoff.total_wait)
                    );
                    self.log_progress(
                        session_id,
                        &format!(
                            "[RATE_LIMIT] iteration {}: giving up, waiting {} more would exceed max wait {} (waited {})",
                            iteration,
                            format_duration(wait),
                            format_duration(config.max_wait),
                            format_duration(backoff.total_wait)
                        ),
                    );
                    result.rate_limit_exceeded = true;
                    break;
                }

                self.log_progress(
                    session_id,
                    &format!(
                        "[RATE_LIMIT] iteration {}: waiting {} before retry {}",
                        iteration,
                        format_duration(wait),
                        backoff.consecutive_retries + 1
                    ),
                );
                self.emit(LoopEvent::RateLimited {
                    iteration,
                    wait,
                    retry: backoff.consecutive_retries + 1,
                });
                wait_with_countdown(wait, COUNTDOWN_TICK, |remaining| {
                    self.emit(LoopEvent::WaitRemaining { remaining });
                })
                .await;
                backoff.record_wait(wait);
                suppress_boundary = true;
                continue;
            }
            backoff.record_success();
            result.iterations = iteration;

            self.save_output(session_id, &run.output);

            if run.timed_out {
                let message = format!(
                    "iteration {} timed out after {}",
                    iteration,
                    format_duration(config.iteration_timeout)
                );
                log::warn!("Session {}: {}", session_id, message);
                self.log_progress(session_id, &format!("[TIMEOUT] {}", message));
                result.timed_out = true;
                result.timeout_message = Some(message);
                break;
            }

            if run.complete {
                let counts = self.refresh_counts(session_id, &mut result);
                if counts.all_terminal() {
                    log::info!("Session {}: all {} items terminal", session_id, counts.total);
                    result.complete = true;
                    break;
                }
                log::warn!(
                    "Session {}: agent reported complete but only {}/{} items are terminal",
                    session_id,
                    counts.terminal,
                    counts.total
                );
                self.log_progress(
                    session_id,
                    &format!(
                        "[PREMATURE_COMPLETE] iteration {}: {}/{} items terminal",
                        iteration, counts.terminal, counts.total
                    ),
                );
                self.emit(LoopEvent::PrematureCompletion { counts });
            } else if run.continue_ {
                let counts = self.refresh_counts(session_id, &mut result);
                self.emit(LoopEvent::CountsRefreshed { counts });
                if counts.all_terminal() {
                    log::info!("Session {}: all {} items terminal", session_id, counts.total);
                    result.complete = true;
                    break;
                }
            } else if run.blocked {
                let reason = run
                    .blocked_reason
                    .clone()
                    .unwrap_or_else(|| "no reason given".to_string());
                log::warn!("Session {}: agent blocked: {}", session_id, reason);
                self.log_progress(session_id, &format!("[BLOCKED] iteration {}: {}", iteration, reason));
                result.blocked = true;
                result.blocked_reason = Some(reason);
                break;
            } else {
                let counts = self.refresh_counts(session_id, &mut result);
                self.emit(LoopEvent::CountsRefreshed { counts });
                if counts.all_terminal() {
                    log::info!("Session {}: all {} items terminal", session_id, counts.total);
                    result.complete = true;
                    break;
                }
            }

            if iteration < config.max_iterations && !config.iteration_delay.is_zero() {
                self.emit(LoopEvent::Delay {
                    duration: config.iteration_delay,
                });
                tokio::time::sleep(config.iteration_delay).await;
            }
            iteration += 1;
        }

        self.refresh_counts(session_id, &mut result);
        result.total_wait = backoff.total_wait;
        result.ended_at = Some(Utc::now());

        let outcome = result.outcome();
        log::info!(
            "Session {} finished: {} after {} iterations ({}/{} complete, {} blocked)",
            session_id,
            outcome.label(),
            result.iterations,
            result.items_complete,
            result.items_total,
            result.items_blocked
        );
        self.emit(LoopEvent::Finished { outcome });
        Ok(result)
    }

    fn refresh_counts(&self, session_id: &str, result: &mut AgentLoopResult) -> SessionCounts {
        let counts = self.store.terminal_counts(session_id);
        result.apply_counts(counts);
        counts
    }

    fn emit(&self, event: LoopEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event);
        }
    }

    /// Best-effort: a failed progress append never affects the run.
    fn log_progress(&self, session_id: &str, line: &str) {
        if let Err(e) = self.store.append_progress(session_id, line) {
            log::debug!("Progress log write failed for {}: {}", session_id, e);
        }
    }

    /// Best-effort: a failed output write never affects the run.
    fn save_output(&self, session_id: &str, output: &str) {
        if let Err(e) = self.store.write_output(session_id, output) {
            log::debug!("Output write failed for {}: {}", session_id, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::RunResult;
    use crate::agent::mock::{MemoryStore, ScriptedRunner, StaticPrompt};

    fn config(max_iterations: u32) -> AgentLoopConfig {
        AgentLoopConfig::new("s", "/tmp/project")
            .max_iterations(max_iterations)
            .iteration_delay(Duration::ZERO)
    }

    fn build(
        runner: ScriptedRunner,
        store: Arc<MemoryStore>,
    ) -> (AgentLoop<ScriptedRunner, StaticPrompt, MemoryStore>, Arc<ScriptedRunner>) {
        let runner = Arc::new(runner);
        let agent = AgentLoop::new(runner.clone(), Arc::new(StaticPrompt::new("work")), store);
        (agent, runner)
    }

    #[test]
    fn test_config_defaults() {
        let config = AgentLoopConfig::new("s", "/p");
        assert_eq!(config.max_iterations, DEFAULT_MAX_ITERATIONS);
        assert_eq!(config.iteration_delay, DEFAULT_ITERATION_DELAY);
        assert_eq!(config.iteration_timeout, DEFAULT_ITERATION_TIMEOUT);
        assert!(config.max_wait.is_zero());
        assert!(!config.trust);
        assert!(!config.debug);
    }

    #[test]
    fn test_outcome_folding() {
        let mut result = AgentLoopResult::new();
        assert_eq!(result.outcome(), LoopOutcome::MaxIterations);
        result.blocked = true;
        result.blocked_reason = Some("creds".into());
        assert_eq!(result.outcome(), LoopOutcome::Blocked("creds".into()));
    }

    #[tokio::test]
    async fn test_missing_session_is_fatal() {
        let store = Arc::new(MemoryStore::new());
        let (agent, runner) = build(ScriptedRunner::new(vec![RunResult::complete()]), store);
        let err = agent.run(&config(3)).await.unwrap_err();
        assert!(matches!(err, JuggleError::SessionNotFound(_)));
        assert_eq!(runner.calls(), 0);
    }

    #[tokio::test]
    async fn test_prompt_failure_is_fatal() {
        let store = Arc::new(MemoryStore::with_session("s", 1));
        let runner = Arc::new(ScriptedRunner::new(vec![RunResult::complete()]));
        let agent = AgentLoop::new(runner.clone(), Arc::new(StaticPrompt::failing()), store);
        let err = agent.run(&config(3)).await.unwrap_err();
        assert!(matches!(err, JuggleError::Prompt(_)));
        assert_eq!(runner.calls(), 0);
    }

    #[tokio::test]
    async fn test_runner_invocation_error_is_fatal_and_not_retried() {
        let store = Arc::new(MemoryStore::with_session("s", 1));
        let (agent, runner) = build(ScriptedRunner::failing("claude: not found"), store);
        let err = agent.run(&config(5)).await.unwrap_err();
        assert!(matches!(err, JuggleError::RunnerInvocation(_)));
        assert_eq!(runner.calls(), 1);
    }

    #[tokio::test]
    async fn test_timeout_stops_and_logs() {
        let store = Arc::new(MemoryStore::with_session("s", 1));
        let (agent, _runner) = build(ScriptedRunner::new(vec![RunResult::timed_out()]), store.clone());
        let config = config(5).iteration_timeout(Duration::from_secs(90));

        let result = agent.run(&config).await.unwrap();

        assert!(result.timed_out);
        assert_eq!(result.iterations, 1);
        let message = result.timeout_message.clone().unwrap();
        assert!(message.contains("iteration 1"));
        assert!(message.contains("1m30s"));
        assert!(store.progress_lines().iter().any(|l| l.starts_with("[TIMEOUT]")));
        assert!(matches!(result.outcome(), LoopOutcome::TimedOut(_)));
    }

    #[tokio::test]
    async fn test_blocked_stops_with_reason() {
        let store = Arc::new(MemoryStore::with_session("s", 2));
        let (agent, _runner) = build(ScriptedRunner::new(vec![RunResult::blocked("needs VPN")]), store);

        let result = agent.run(&config(5)).await.unwrap();

        assert!(result.blocked);
        assert!(!result.complete);
        assert_eq!(result.blocked_reason.as_deref(), Some("needs VPN"));
        assert_eq!(result.iterations, 1);
    }

    #[tokio::test]
    async fn test_premature_completion_is_not_trusted() {
        let store = Arc::new(MemoryStore::with_session("s", 2));
        let hook_store = store.clone();
        // Agent claims completion every time but only finishes one item per run
        let runner = ScriptedRunner::new(vec![RunResult::complete()]).with_hook(move |_| {
            hook_store.complete_next("s");
        });
        let (agent, runner) = build(runner, store.clone());

        let result = agent.run(&config(5)).await.unwrap();

        assert!(result.complete);
        assert_eq!(result.iterations, 2);
        assert_eq!(runner.calls(), 2);
        let premature: Vec<_> = store
            .progress_lines()
            .into_iter()
            .filter(|l| l.starts_with("[PREMATURE_COMPLETE]"))
            .collect();
        assert_eq!(premature.len(), 1);
    }

    #[tokio::test]
    async fn test_blocked_items_count_as_terminal() {
        let store = Arc::new(MemoryStore::with_session("s", 2));
        let hook_store = store.clone();
        let runner = ScriptedRunner::new(vec![RunResult::continue_()]).with_hook(move |call| {
            if call == 0 {
                hook_store.complete_next("s");
            } else {
                hook_store.block_next("s", "flaky upstream");
            }
        });
        let (agent, _runner) = build(runner, store);

        let result = agent.run(&config(5)).await.unwrap();

        assert!(result.complete);
        assert!(!result.blocked);
        assert_eq!(result.iterations, 2);
        assert_eq!(result.items_complete, 1);
        assert_eq!(result.items_blocked, 1);
        assert_eq!(result.items_total, 2);
    }

    #[tokio::test]
    async fn test_empty_session_runs_to_limit() {
        let store = Arc::new(MemoryStore::with_session("s", 0));
        let (agent, runner) = build(ScriptedRunner::new(vec![RunResult::complete()]), store);

        let result = agent.run(&config(4)).await.unwrap();

        assert_eq!(result.outcome(), LoopOutcome::MaxIterations);
        assert_eq!(result.iterations, 4);
        assert_eq!(runner.calls(), 4);
        assert_eq!(result.items_total, 0);
    }

    #[tokio::test]
    async fn test_output_saved_each_iteration() {
        let store = Arc::new(MemoryStore::with_session("s", 1));
        let runner = ScriptedRunner::new(vec![
            RunResult::with_output("first"),
            RunResult::with_output("second"),
        ]);
        let (agent, _runner) = build(runner, store.clone());

        agent.run(&config(2)).await.unwrap();

        assert_eq!(store.output("s").as_deref(), Some("second"));
    }

    #[tokio::test]
    async fn test_failing_side_channels_do_not_matter() {
        let store = Arc::new(MemoryStore::with_session("s", 1));
        store.fail_writes(true);
        let (agent, _runner) = build(ScriptedRunner::new(vec![RunResult::timed_out()]), store.clone());

        let result = agent.run(&config(3)).await.unwrap();

        assert!(result.timed_out);
        assert!(store.progress_lines().is_empty());
        assert!(store.output("s").is_none());
    }

    #[tokio::test]
    async fn test_timeout_passed_to_runner() {
        let store = Arc::new(MemoryStore::with_session("s", 1));
        let (agent, runner) = build(ScriptedRunner::new(vec![RunResult::default()]), store);
        let config = config(2).iteration_timeout(Duration::from_secs(42)).debug(true);

        agent.run(&config).await.unwrap();

        assert_eq!(runner.timeouts(), vec![Duration::from_secs(42); 2]);
        assert!(runner.prompts().iter().all(|p| p.ends_with("[debug]")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_huge_retry_after_exceeds_budget_without_panic() {
        let store = Arc::new(MemoryStore::with_session("s", 1));
        let output = "rate_limit_error: retry after 18446744073709551615 seconds";
        let run = crate::agent::parse_output(output, false);
        let (agent, runner) = build(ScriptedRunner::new(vec![run]), store);
        let config = config(3).max_wait(Duration::from_secs(3600));

        let result = agent.run(&config).await.unwrap();

        assert!(result.rate_limit_exceeded);
        assert_eq!(result.total_wait, Duration::ZERO);
        assert_eq!(result.iterations, 0);
        assert_eq!(runner.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_events_and_suppressed_boundary() {
        let store = Arc::new(MemoryStore::with_session("s", 1));
        let hook_store = store.clone();
        let runner = ScriptedRunner::new(vec![
            RunResult::rate_limited(Some(Duration::from_secs(1))),
            RunResult::continue_(),
        ])
        .with_hook(move |call| {
            if call == 1 {
                hook_store.complete_next("s");
            }
        });
        let (agent, _runner) = build(runner, store);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let agent = agent.with_events(tx);

        let result = agent.run(&config(3)).await.unwrap();
        assert!(result.complete);

        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        let boundaries = events
            .iter()
            .filter(|e| matches!(e, LoopEvent::IterationStarted { .. }))
            .count();
        assert_eq!(boundaries, 1);
        assert!(events.contains(&LoopEvent::RateLimited {
            iteration: 1,
            wait: Duration::from_secs(6),
            retry: 1
        }));
        assert!(events.contains(&LoopEvent::WaitRemaining {
            remaining: Duration::from_secs(6)
        }));
        assert_eq!(
            events.last(),
            Some(&LoopEvent::Finished {
                outcome: LoopOutcome::Complete
            })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_inter_iteration_delay_skipped_after_last() {
        let store = Arc::new(MemoryStore::with_session("s", 1));
        let (agent, _runner) = build(ScriptedRunner::new(vec![RunResult::default()]), store);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let agent = agent.with_events(tx);
        let config = config(3).iteration_delay(Duration::from_secs(5));

        let start = tokio::time::Instant::now();
        agent.run(&config).await.unwrap();

        let mut delays = 0;
        while let Ok(event) = rx.try_recv() {
            if matches!(event, LoopEvent::Delay { .. }) {
                delays += 1;
            }
        }
        assert_eq!(delays, 2);
        assert!(start.elapsed() >= Duration::from_secs(10));
    }
}
