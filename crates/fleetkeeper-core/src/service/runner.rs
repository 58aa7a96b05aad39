//! External process capability.
//!
//! The dispatcher never forks directly. It hands an `ExternalCommand` to an
//! `ExternalRunner` and gets back a `RunHandle` as soon as the process has
//! started; completion is observable through the handle but nobody is forced
//! to wait for it.

use std::path::PathBuf;
use std::process::Stdio;

use anyhow::Context;
use async_trait::async_trait;
use tokio::sync::oneshot;
use tracing::{info, warn};

/// Program plus arguments, with an optional file that receives stdout/stderr.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalCommand {
    pub program: String,
    pub args: Vec<String>,
    pub log_file: Option<PathBuf>,
}

impl ExternalCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            log_file: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn log_to(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_file = Some(path.into());
        self
    }

    /// Command line for logs. Arguments never carry secrets.
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// How a started process ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitOutcome {
    Success,
    /// Non-zero exit, `None` when killed by a signal
    Failed { code: Option<i32> },
    /// The watcher went away before reporting
    Lost(String),
}

impl ExitOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

/// Handle to a started process.
#[derive(Debug)]
pub struct RunHandle {
    pub pid: Option<u32>,
    exit: oneshot::Receiver<ExitOutcome>,
}

impl RunHandle {
    pub fn new(pid: Option<u32>, exit: oneshot::Receiver<ExitOutcome>) -> Self {
        Self { pid, exit }
    }

    /// Handle whose outcome is already known.
    pub fn finished(pid: Option<u32>, outcome: ExitOutcome) -> Self {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(outcome);
        Self::new(pid, rx)
    }

    pub async fn wait(self) -> ExitOutcome {
        self.exit
            .await
            .unwrap_or_else(|_| ExitOutcome::Lost("process watcher dropped".to_string()))
    }
}

#[async_trait]
pub trait ExternalRunner: Send + Sync {
    /// Start `command`. Returns once the process is running, not when it exits.
    async fn run(&self, command: &ExternalCommand) -> anyhow::Result<RunHandle>;
}

/// Production runner backed by `tokio::process`.
#[derive(Debug, Default, Clone)]
pub struct ProcessRunner;

impl ProcessRunner {
    pub fn new() -> Self {
        Self
    }

    fn output_streams(command: &ExternalCommand) -> anyhow::Result<(Stdio, Stdio)> {
        let Some(path) = &command.log_file else {
            return Ok((Stdio::null(), Stdio::null()));
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating log directory {}", parent.display()))?;
        }
        let stdout = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("opening log file {}", path.display()))?;
        let stderr = stdout.try_clone()?;
        Ok((Stdio::from(stdout), Stdio::from(stderr)))
    }
}

#[async_trait]
impl ExternalRunner for ProcessRunner {
    async fn run(&self, command: &ExternalCommand) -> anyhow::Result<RunHandle> {
        let (stdout, stderr) = Self::output_streams(command)?;
        let mut child = tokio::process::Command::new(&command.program)
            .args(&command.args)
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(stderr)
            .spawn()
            .with_context(|| format!("failed to spawn {}", command.program))?;

        let pid = child.id();
        info!(pid = ?pid, "[Runner] Started {}", command.display());

        let (tx, rx) = oneshot::channel();
        let program = command.program.clone();
        tokio::spawn(async move {
            let outcome = match child.wait().await {
                Ok(status) if status.success() => ExitOutcome::Success,
                Ok(status) => ExitOutcome::Failed {
                    code: status.code(),
                },
                Err(e) => ExitOutcome::Lost(e.to_string()),
            };
            if !outcome.is_success() {
                warn!("[Runner] {} finished with {:?}", program, outcome);
            } else {
                info!("[Runner] {} finished", program);
            }
            let _ = tx.send(outcome);
        });

        Ok(RunHandle::new(pid, rx))
    }
}
