//! In-memory doubles for driving the agent loop without a real agent process
//! or project directory.

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use super::runner::{RunResult, Runner};
use crate::domain::{Session, WorkItem};
use crate::error::{JuggleError, Result};
use crate::prompt::PromptProvider;
use crate::storage::{LoopStore, SessionCounts};

type Hook = Box<dyn Fn(usize) + Send + Sync>;

/// Runner that replays a script of results.
///
/// Once the script runs out the last result repeats. An optional hook runs
/// after each call with the zero-based call index, which is where tests
/// simulate the agent changing item state.
pub struct ScriptedRunner {
    script: Mutex<VecDeque<RunResult>>,
    last: Mutex<RunResult>,
    fail_with: Option<String>,
    hook: Option<Hook>,
    calls: AtomicUsize,
    prompts: Mutex<Vec<String>>,
    timeouts: Mutex<Vec<Duration>>,
}

impl ScriptedRunner {
    pub fn new(script: Vec<RunResult>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            last: Mutex::new(RunResult::default()),
            fail_with: None,
            hook: None,
            calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
            timeouts: Mutex::new(Vec::new()),
        }
    }

    /// A runner whose every call fails to invoke.
    pub fn failing(message: impl Into<String>) -> Self {
        let mut runner = Self::new(Vec::new());
        runner.fail_with = Some(message.into());
        runner
    }

    pub fn with_hook(mut self, hook: impl Fn(usize) + Send + Sync + 'static) -> Self {
        self.hook = Some(Box::new(hook));
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().map(|p| p.clone()).unwrap_or_default()
    }

    pub fn timeouts(&self) -> Vec<Duration> {
        self.timeouts.lock().map(|t| t.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Runner for ScriptedRunner {
    async fn run(&self, prompt: &str, _trust: bool, timeout: Duration) -> Result<RunResult> {
        let index = self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(prompt.to_string());
        }
        if let Ok(mut timeouts) = self.timeouts.lock() {
            timeouts.push(timeout);
        }
        if let Some(message) = &self.fail_with {
            return Err(JuggleError::RunnerInvocation(message.clone()));
        }

        let next = self
            .script
            .lock()
            .map_err(|e| JuggleError::InvalidState(e.to_string()))?
            .pop_front();
        let mut last = self.last.lock().map_err(|e| JuggleError::InvalidState(e.to_string()))?;
        let result = match next {
            Some(result) => {
                *last = result.clone();
                result
            }
            None => last.clone(),
        };
        drop(last);

        if let Some(hook) = &self.hook {
            hook(index);
        }
        Ok(result)
    }
}

/// Prompt provider returning a fixed prompt, or failing when built with
/// `failing`.
pub struct StaticPrompt {
    prompt: Option<String>,
}

impl StaticPrompt {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: Some(prompt.into()),
        }
    }

    pub fn failing() -> Self {
        Self { prompt: None }
    }
}

#[async_trait]
impl PromptProvider for StaticPrompt {
    async fn generate(&self, _project_root: &Path, session_id: &str, debug: bool) -> Result<String> {
        match &self.prompt {
            Some(prompt) if debug => Ok(format!("{}\n[debug]", prompt)),
            Some(prompt) => Ok(prompt.clone()),
            None => Err(JuggleError::Prompt(format!("no prompt for {}", session_id))),
        }
    }
}

/// Loop store kept entirely in memory.
#[derive(Default)]
pub struct MemoryStore {
    sessions: Mutex<HashMap<String, Session>>,
    items: Mutex<Vec<WorkItem>>,
    progress: Mutex<Vec<String>>,
    outputs: Mutex<HashMap<String, String>>,
    fail_writes: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store with one session holding `pending` fresh items.
    pub fn with_session(session_id: &str, pending: usize) -> Self {
        let store = Self::new();
        store.add_session(Session::new(session_id, ""));
        for n in 0..pending {
            store.add_item(WorkItem::new(format!("item {}", n + 1)).with_tag(session_id));
        }
        store
    }

    pub fn add_session(&self, session: Session) {
        if let Ok(mut sessions) = self.sessions.lock() {
            sessions.insert(session.id.clone(), session);
        }
    }

    pub fn add_item(&self, item: WorkItem) {
        if let Ok(mut items) = self.items.lock() {
            items.push(item);
        }
    }

    /// Complete the first non-terminal item of a session. Returns false when
    /// there was none.
    pub fn complete_next(&self, session_id: &str) -> bool {
        self.transition_next(session_id, |item| item.complete("done"))
    }

    /// Block the first non-terminal item of a session.
    pub fn block_next(&self, session_id: &str, reason: &str) -> bool {
        self.transition_next(session_id, |item| item.block(reason))
    }

    fn transition_next(&self, session_id: &str, f: impl FnOnce(&mut WorkItem) -> Result<()>) -> bool {
        let Ok(mut items) = self.items.lock() else {
            return false;
        };
        items
            .iter_mut()
            .find(|i| i.has_tag(session_id) && !i.is_terminal())
            .map(|item| f(item).is_ok())
            .unwrap_or(false)
    }

    /// Make `append_progress` and `write_output` fail.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn progress_lines(&self) -> Vec<String> {
        self.progress.lock().map(|p| p.clone()).unwrap_or_default()
    }

    pub fn output(&self, session_id: &str) -> Option<String> {
        self.outputs.lock().ok()?.get(session_id).cloned()
    }

    fn check_writable(&self) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(JuggleError::Io(std::io::Error::other("disk full")));
        }
        Ok(())
    }
}

impl LoopStore for MemoryStore {
    fn load_session(&self, session_id: &str) -> Result<Session> {
        self.sessions
            .lock()
            .map_err(|e| JuggleError::Storage(e.to_string()))?
            .get(session_id)
            .cloned()
            .ok_or_else(|| JuggleError::SessionNotFound(session_id.to_string()))
    }

    fn terminal_counts(&self, session_id: &str) -> SessionCounts {
        match self.items.lock() {
            Ok(items) => SessionCounts::from_items(items.iter().filter(|i| i.has_tag(session_id))),
            Err(_) => SessionCounts::default(),
        }
    }

    fn append_progress(&self, _session_id: &str, line: &str) -> Result<()> {
        self.check_writable()?;
        self.progress
            .lock()
            .map_err(|e| JuggleError::Storage(e.to_string()))?
            .push(line.to_string());
        Ok(())
    }

    fn write_output(&self, session_id: &str, output: &str) -> Result<()> {
        self.check_writable()?;
        self.outputs
            .lock()
            .map_err(|e| JuggleError::Storage(e.to_string()))?
            .insert(session_id.to_string(), output.to_string());
        Ok(())
    }
}
