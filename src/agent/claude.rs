//! Subprocess runner for the `claude` CLI (or any agent CLI that reads its
//! prompt from stdin and prints to stdout).

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tokio::task::JoinHandle;

use super::runner::{RunResult, Runner};
use super::signals::parse_output;
use crate::error::{JuggleError, Result};

/// How long to keep draining pipes after killing a timed-out process.
const DRAIN_GRACE: Duration = Duration::from_secs(2);

/// Configuration for launching the agent process.
#[derive(Debug, Clone)]
pub struct ClaudeRunnerConfig {
    /// Executable to spawn
    pub program: String,
    /// Arguments always passed
    pub args: Vec<String>,
    /// Extra arguments when the caller trusts the agent with unattended edits
    pub trust_args: Vec<String>,
    /// Model alias passed as `--model`
    pub model: Option<String>,
    /// Working directory for the process
    pub working_dir: Option<PathBuf>,
}

impl Default for ClaudeRunnerConfig {
    fn default() -> Self {
        Self {
            program: "claude".to_string(),
            args: vec!["-p".to_string(), "--output-format".to_string(), "text".to_string()],
            trust_args: vec!["--dangerously-skip-permissions".to_string()],
            model: None,
            working_dir: None,
        }
    }
}

impl ClaudeRunnerConfig {
    pub fn program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    pub fn args<I, A>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn model(mut self, model: Option<String>) -> Self {
        self.model = model;
        self
    }

    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }
}

/// Runs the agent CLI once per call, feeding the prompt on stdin.
pub struct ClaudeRunner {
    config: ClaudeRunnerConfig,
}

impl ClaudeRunner {
    pub fn new(config: ClaudeRunnerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ClaudeRunnerConfig {
        &self.config
    }

    /// Full argument list for one invocation.
    pub fn build_args(&self, trust: bool) -> Vec<String> {
        let mut args = self.config.args.clone();
        if trust {
            args.extend(self.config.trust_args.iter().cloned());
        }
        if let Some(model) = &self.config.model {
            args.push("--model".to_string());
            args.push(model.clone());
        }
        args
    }

    fn invocation_error(&self, what: impl std::fmt::Display) -> JuggleError {
        JuggleError::RunnerInvocation(format!("{}: {}", self.config.program, what))
    }
}

type Sink = Arc<Mutex<Vec<u8>>>;

/// Copy a pipe into a shared buffer so partial output survives an abort.
fn spawn_reader<R>(mut pipe: R, sink: Sink) -> JoinHandle<std::io::Result<()>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = [0u8; 8192];
        loop {
            let n = pipe.read(&mut buf).await?;
            if n == 0 {
                return Ok(());
            }
            if let Ok(mut sink) = sink.lock() {
                sink.extend_from_slice(&buf[..n]);
            }
        }
    })
}

fn take_text(sink: &Sink) -> String {
    sink.lock()
        .map(|buf| String::from_utf8_lossy(&buf).into_owned())
        .unwrap_or_default()
}

/// Stdout, then stderr under a separator when present.
fn combine(stdout: String, stderr: String) -> String {
    if stderr.trim().is_empty() {
        return stdout;
    }
    let mut output = stdout;
    if !output.is_empty() {
        output.push_str("\n--- stderr ---\n");
    }
    output.push_str(&stderr);
    output
}

#[async_trait]
impl Runner for ClaudeRunner {
    async fn run(&self, prompt: &str, trust: bool, timeout: Duration) -> Result<RunResult> {
        if prompt.trim().is_empty() {
            return Err(self.invocation_error("refusing to run with an empty prompt"));
        }

        let mut cmd = Command::new(&self.config.program);
        cmd.args(self.build_args(trust))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.config.working_dir {
            cmd.current_dir(dir);
        }

        log::debug!("Spawning {} (trust: {}, timeout: {:?})", self.config.program, trust, timeout);
        let mut child = cmd
            .spawn()
            .map_err(|e| self.invocation_error(format!("failed to spawn: {}", e)))?;

        let mut stdin = child.stdin.take().ok_or_else(|| self.invocation_error("stdin not captured"))?;
        let stdout = child.stdout.take().ok_or_else(|| self.invocation_error("stdout not captured"))?;
        let stderr = child.stderr.take().ok_or_else(|| self.invocation_error("stderr not captured"))?;

        let out_sink = Sink::default();
        let err_sink = Sink::default();
        let out_reader = spawn_reader(stdout, out_sink.clone());
        let err_reader = spawn_reader(stderr, err_sink.clone());

        // Written from a task so a child that never reads stdin cannot wedge us
        let prompt = prompt.to_string();
        let writer = tokio::spawn(async move {
            stdin.write_all(prompt.as_bytes()).await?;
            stdin.shutdown().await
        });

        let status = if timeout.is_zero() {
            Some(child.wait().await)
        } else {
            let waited = tokio::time::timeout(timeout, child.wait()).await;
            match waited {
                Ok(status) => Some(status),
                Err(_) => {
                    log::warn!("{} exceeded {:?}, killing it", self.config.program, timeout);
                    if let Err(e) = child.kill().await {
                        log::warn!("Failed to kill {}: {}", self.config.program, e);
                    }
                    None
                }
            }
        };

        match writer.await {
            Ok(Err(e)) => log::debug!("Prompt write ended early: {}", e),
            Err(e) => log::debug!("Prompt writer task failed: {}", e),
            Ok(Ok(())) => {}
        }

        match status {
            Some(status) => {
                let status = status.map_err(|e| self.invocation_error(format!("wait failed: {}", e)))?;
                for reader in [out_reader, err_reader] {
                    reader
                        .await
                        .map_err(|e| self.invocation_error(format!("output reader failed: {}", e)))?
                        .map_err(|e| self.invocation_error(format!("failed to read output: {}", e)))?;
                }
                let output = combine(take_text(&out_sink), take_text(&err_sink));
                log::debug!("{} exited with {} ({} bytes)", self.config.program, status, output.len());
                Ok(parse_output(&output, status.success()))
            }
            None => {
                // Descendants may still hold the pipes open; keep whatever arrived
                for mut reader in [out_reader, err_reader] {
                    if tokio::time::timeout(DRAIN_GRACE, &mut reader).await.is_err() {
                        reader.abort();
                    }
                }
                let mut result = RunResult::timed_out();
                result.output = combine(take_text(&out_sink), take_text(&err_sink));
                Ok(result)
            }
        }
    }
}
