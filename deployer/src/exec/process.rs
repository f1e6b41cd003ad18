//! External process execution
//!
//! Every external tool (terraform, ssh, docker, aws, git) is driven through a
//! [`ProcessRunner`] with an argument vector, never a shell string. A
//! non-zero exit is not an error at this layer: callers get a typed
//! [`CommandOutput`] and decide whether the failure is fatal.

use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use crate::errors::DeployError;

/// A command to run
#[derive(Debug, Clone)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub env: Vec<(String, String)>,
    /// Fed to the child's stdin, then closed. Kept out of Debug/Display output.
    pub stdin: Option<SecretString>,
    pub timeout: Option<Duration>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            env: Vec::new(),
            stdin: None,
            timeout: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn stdin(mut self, input: impl Into<String>) -> Self {
        self.stdin = Some(SecretString::from(input.into()));
        self
    }

    pub fn stdin_secret(mut self, input: SecretString) -> Self {
        self.stdin = Some(input);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Captured result of a finished command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    /// `None` when the process was killed by a signal
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Stderr if present, otherwise stdout, trimmed
    pub fn diagnostic(&self) -> String {
        let err = self.stderr.trim();
        if err.is_empty() {
            self.stdout.trim().to_string()
        } else {
            err.to_string()
        }
    }
}

/// Runs external commands
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    async fn run(
        &self,
        spec: &CommandSpec,
        cancel: &CancellationToken,
    ) -> Result<CommandOutput, DeployError>;
}

/// [`ProcessRunner`] backed by `tokio::process`
#[derive(Debug, Clone, Default)]
pub struct TokioProcessRunner;

impl TokioProcessRunner {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ProcessRunner for TokioProcessRunner {
    #[instrument(skip_all, fields(program = %spec.program))]
    async fn run(
        &self,
        spec: &CommandSpec,
        cancel: &CancellationToken,
    ) -> Result<CommandOutput, DeployError> {
        debug!("Running: {}", spec);
        let started = Instant::now();

        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .envs(spec.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(if spec.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = &spec.cwd {
            command.current_dir(cwd);
        }

        let spawn_err = |source| DeployError::CommandSpawn {
            program: spec.program.clone(),
            source,
        };

        let mut child = command.spawn().map_err(spawn_err)?;
        let stdin = child.stdin.take();
        // Feeding stdin shares the timeout and cancellation of the wait
        let finish = async move {
            if let (Some(input), Some(mut stdin)) = (&spec.stdin, stdin) {
                if let Err(e) = stdin.write_all(input.expose_secret().as_bytes()).await {
                    return Err(e);
                }
                // Closing stdin signals EOF to the child
                drop(stdin);
            }
            child.wait_with_output().await
        };

        let output = match spec.timeout {
            Some(limit) => tokio::select! {
                _ = cancel.cancelled() => return Err(DeployError::Cancelled),
                result = tokio::time::timeout(limit, finish) => match result {
                    Ok(output) => output.map_err(spawn_err)?,
                    Err(_) => {
                        return Err(DeployError::CommandTimeout {
                            program: spec.program.clone(),
                            secs: limit.as_secs(),
                        })
                    }
                },
            },
            None => tokio::select! {
                _ = cancel.cancelled() => return Err(DeployError::Cancelled),
                output = finish => output.map_err(spawn_err)?,
            },
        };

        let result = CommandOutput {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            duration: started.elapsed(),
        };
        debug!(
            "{} exited with {:?} after {:?}",
            spec.program, result.exit_code, result.duration
        );
        Ok(result)
    }
}
