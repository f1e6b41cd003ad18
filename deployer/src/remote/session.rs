//! Remote shell sessions
//!
//! A [`RemoteSession`] is one authenticated connection bound to a single
//! username. The OpenSSH implementation keeps a ControlMaster connection open
//! for the session's lifetime and multiplexes every command over it.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::errors::DeployError;
use crate::exec::process::{CommandOutput, CommandSpec, ProcessRunner};

/// Build an argument vector from string-likes
pub fn argv<I, S>(args: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    args.into_iter().map(Into::into).collect()
}

/// Quote one word for a POSIX shell. The remote side of ssh always goes
/// through the login shell, so every argument is quoted on the way out.
pub fn shell_quote(word: &str) -> String {
    let safe = !word.is_empty()
        && word
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "_@%+=:,./-".contains(c));
    if safe {
        word.to_string()
    } else {
        format!("'{}'", word.replace('\'', r"'\''"))
    }
}

/// Join an argument vector into a single, safely quoted remote command line
pub fn shell_join(args: &[String]) -> String {
    args.iter()
        .map(|a| shell_quote(a))
        .collect::<Vec<_>>()
        .join(" ")
}

/// A live authenticated shell connection to a host
#[async_trait]
pub trait RemoteSession: Send + Sync {
    fn host(&self) -> &str;

    fn username(&self) -> &str;

    /// Run an argument vector on the host and wait for it to finish
    async fn exec(
        &self,
        args: &[String],
        cancel: &CancellationToken,
    ) -> Result<CommandOutput, DeployError>;

    /// Write `contents` to `remote_path` as the session user
    async fn upload(
        &self,
        contents: &str,
        remote_path: &str,
        cancel: &CancellationToken,
    ) -> Result<CommandOutput, DeployError>;

    /// Release the connection. Safe to call more than once.
    async fn close(&mut self) -> Result<(), DeployError>;
}

/// Opens sessions for a given identity
#[async_trait]
pub trait SessionConnector: Send + Sync {
    /// `Ok(None)` means the host rejected this username/key pair
    async fn connect(
        &self,
        host: &str,
        username: &str,
        key_path: &Path,
        cancel: &CancellationToken,
    ) -> Result<Option<Box<dyn RemoteSession>>, DeployError>;
}

/// OpenSSH client options
#[derive(Debug, Clone)]
pub struct SshOptions {
    /// ssh executable
    pub ssh_binary: String,

    /// Per-attempt connection timeout
    pub connect_timeout: Duration,

    /// Limit for each remote command
    pub command_timeout: Duration,

    /// Directory for ControlMaster sockets
    pub control_dir: PathBuf,
}

impl Default for SshOptions {
    fn default() -> Self {
        Self {
            ssh_binary: "ssh".to_string(),
            connect_timeout: Duration::from_secs(10),
            command_timeout: Duration::from_secs(900),
            control_dir: std::env::temp_dir(),
        }
    }
}

/// [`SessionConnector`] driving the system `ssh` client
pub struct OpenSshConnector {
    runner: Arc<dyn ProcessRunner>,
    options: SshOptions,
}

impl OpenSshConnector {
    pub fn new(runner: Arc<dyn ProcessRunner>, options: SshOptions) -> Self {
        Self { runner, options }
    }
}

#[async_trait]
impl SessionConnector for OpenSshConnector {
    async fn connect(
        &self,
        host: &str,
        username: &str,
        key_path: &Path,
        cancel: &CancellationToken,
    ) -> Result<Option<Box<dyn RemoteSession>>, DeployError> {
        // Unix socket paths are length limited, so keep the name short
        let token = uuid::Uuid::new_v4().simple().to_string();
        let control_path = self
            .options
            .control_dir
            .join(format!("autodeploy-{}.sock", &token[..12]));

        let mut session = OpenSshSession {
            runner: self.runner.clone(),
            options: self.options.clone(),
            host: host.to_string(),
            username: username.to_string(),
            control_path,
            open: false,
        };

        let spec = CommandSpec::new(&self.options.ssh_binary)
            .arg("-i")
            .arg(key_path.to_string_lossy())
            .args(session.common_options())
            .args([
                "-o",
                "ControlMaster=yes",
                "-o",
                "ControlPersist=yes",
                "-o",
                &format!("ConnectTimeout={}", self.options.connect_timeout.as_secs()),
                "-f",
                "-N",
            ])
            .arg(session.destination())
            .timeout(self.options.connect_timeout + Duration::from_secs(5));

        match self.runner.run(&spec, cancel).await {
            Ok(output) if output.success() => {
                debug!("Opened ssh master to {}@{}", username, host);
                session.open = true;
                Ok(Some(Box::new(session)))
            }
            Ok(output) => {
                debug!(
                    "ssh {}@{} rejected (exit {:?}): {}",
                    username,
                    host,
                    output.exit_code,
                    output.diagnostic()
                );
                Ok(None)
            }
            Err(DeployError::CommandTimeout { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// Session multiplexed over an OpenSSH ControlMaster socket
pub struct OpenSshSession {
    runner: Arc<dyn ProcessRunner>,
    options: SshOptions,
    host: String,
    username: String,
    control_path: PathBuf,
    open: bool,
}

impl OpenSshSession {
    fn destination(&self) -> String {
        format!("{}@{}", self.username, self.host)
    }

    fn common_options(&self) -> Vec<String> {
        argv([
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            "StrictHostKeyChecking=no".to_string(),
            "-o".to_string(),
            "UserKnownHostsFile=/dev/null".to_string(),
            "-o".to_string(),
            "LogLevel=ERROR".to_string(),
            "-o".to_string(),
            format!("ControlPath={}", self.control_path.display()),
        ])
    }

    fn remote(&self, command_line: String) -> CommandSpec {
        CommandSpec::new(&self.options.ssh_binary)
            .args(self.common_options())
            .arg(self.destination())
            .arg("--")
            .arg(command_line)
            .timeout(self.options.command_timeout)
    }

    fn exit_spec(&self) -> CommandSpec {
        CommandSpec::new(&self.options.ssh_binary)
            .args(self.common_options())
            .args(["-O", "exit"])
            .arg(self.destination())
            .timeout(Duration::from_secs(10))
    }
}

#[async_trait]
impl RemoteSession for OpenSshSession {
    fn host(&self) -> &str {
        &self.host
    }

    fn username(&self) -> &str {
        &self.username
    }

    async fn exec(
        &self,
        args: &[String],
        cancel: &CancellationToken,
    ) -> Result<CommandOutput, DeployError> {
        self.runner.run(&self.remote(shell_join(args)), cancel).await
    }

    async fn upload(
        &self,
        contents: &str,
        remote_path: &str,
        cancel: &CancellationToken,
    ) -> Result<CommandOutput, DeployError> {
        let line = shell_join(&argv(["sh", "-c", "cat > \"$1\"", "sh", remote_path]));
        let spec = self.remote(line).stdin(contents);
        self.runner.run(&spec, cancel).await
    }

    async fn close(&mut self) -> Result<(), DeployError> {
        if !self.open {
            return Ok(());
        }
        self.open = false;
        // Closing must still work after the job was cancelled
        let output = self
            .runner
            .run(&self.exit_spec(), &CancellationToken::new())
            .await?;
        if !output.success() {
            warn!(
                "Closing ssh master for {} returned {:?}: {}",
                self.destination(),
                output.exit_code,
                output.diagnostic()
            );
        }
        Ok(())
    }
}

impl Drop for OpenSshSession {
    fn drop(&mut self) {
        if !self.open {
            return;
        }
        // Best effort: a master left behind by a panicking task
        if tokio::runtime::Handle::try_current().is_ok() {
            let spec = self.exit_spec();
            let _ = tokio::process::Command::new(&spec.program)
                .args(&spec.args)
                .stdin(std::process::Stdio::null())
                .stdout(std::process::Stdio::null())
                .stderr(std::process::Stdio::null())
                .spawn();
        }
    }
}
