//! Remote configuration engine
//!
//! Turns a freshly provisioned VM into a running service. The engine walks a
//! fixed sequence of [`RemoteStage`]s over a single [`RemoteSession`]:
//!
//! ```text
//! AwaitingKey -> AwaitingConnectivity -> UsernameProbing -> DependencyBootstrap
//!   -> SourceFetch -> PortAndHostNormalization -> ServiceInstall -> Done
//! ```
//!
//! Any stage may fail the run. Bootstrap and fetch problems are degradations
//! and only produce warnings. The session is closed on every exit path.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, instrument, warn};

use crate::deploy::context::JobContext;
use crate::errors::{Degradation, DeployError};
use crate::exec::process::CommandOutput;
use crate::models::analysis::{Analysis, Framework};
use crate::models::job::DeployOutcome;
use crate::remote::rewrite::HostRewrite;
use crate::remote::session::{argv, RemoteSession, SessionConnector};
use crate::remote::unit::ServiceUnit;

/// Port used when analysis could not determine one
pub const FALLBACK_PORT: u16 = 5000;

/// Remote configuration policy
#[derive(Debug, Clone)]
pub struct RemoteOptions {
    /// How many times to look for the generated private key
    pub key_poll_attempts: u32,

    /// Delay between key lookups
    pub key_poll_interval: Duration,

    /// Wait after provisioning before the first connection attempt
    pub readiness_wait: Duration,

    /// Login names tried in order; the first accepted one is used throughout
    pub candidate_users: Vec<String>,
}

impl Default for RemoteOptions {
    fn default() -> Self {
        Self {
            key_poll_attempts: 30,
            key_poll_interval: Duration::from_millis(500),
            readiness_wait: Duration::from_secs(60),
            candidate_users: vec![
                "ec2-user".to_string(),
                "ubuntu".to_string(),
                "debian".to_string(),
            ],
        }
    }
}

/// Stages of a remote configuration run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteStage {
    AwaitingKey,
    AwaitingConnectivity,
    UsernameProbing,
    DependencyBootstrap,
    SourceFetch,
    PortAndHostNormalization,
    ServiceInstall,
    Done,
    Failed,
}

impl RemoteStage {
    /// Successor on success. `Done` and `Failed` are terminal.
    pub fn next(self) -> RemoteStage {
        match self {
            RemoteStage::AwaitingKey => RemoteStage::AwaitingConnectivity,
            RemoteStage::AwaitingConnectivity => RemoteStage::UsernameProbing,
            RemoteStage::UsernameProbing => RemoteStage::DependencyBootstrap,
            RemoteStage::DependencyBootstrap => RemoteStage::SourceFetch,
            RemoteStage::SourceFetch => RemoteStage::PortAndHostNormalization,
            RemoteStage::PortAndHostNormalization => RemoteStage::ServiceInstall,
            RemoteStage::ServiceInstall => RemoteStage::Done,
            RemoteStage::Done => RemoteStage::Done,
            RemoteStage::Failed => RemoteStage::Failed,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, RemoteStage::Done | RemoteStage::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RemoteStage::AwaitingKey => "awaiting_key",
            RemoteStage::AwaitingConnectivity => "awaiting_connectivity",
            RemoteStage::UsernameProbing => "username_probing",
            RemoteStage::DependencyBootstrap => "dependency_bootstrap",
            RemoteStage::SourceFetch => "source_fetch",
            RemoteStage::PortAndHostNormalization => "port_and_host_normalization",
            RemoteStage::ServiceInstall => "service_install",
            RemoteStage::Done => "done",
            RemoteStage::Failed => "failed",
        }
    }
}

impl fmt::Display for RemoteStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Start command actually written into the unit
pub fn effective_start_command(analysis: &Analysis, port: u16) -> String {
    let command = analysis.start_command.trim();
    if analysis.framework == Framework::Flask && command.contains("flask run") {
        return format!("flask run --host=0.0.0.0 --port={}", port);
    }
    if command.is_empty() {
        return "python3 app.py".to_string();
    }
    command.to_string()
}

/// State carried between stages of one run
struct Run<'a> {
    ctx: &'a JobContext,
    host: &'a str,
    analysis: &'a Analysis,
    key_path: Option<PathBuf>,
    session: Option<Box<dyn RemoteSession>>,
    app_dir: String,
    port: u16,
}

impl Run<'_> {
    fn session(&self) -> Result<&dyn RemoteSession, DeployError> {
        self.session
            .as_deref()
            .ok_or_else(|| DeployError::Internal("no remote session open".to_string()))
    }

    fn home(&self) -> Result<String, DeployError> {
        Ok(format!("/home/{}", self.session()?.username()))
    }
}

/// Configures a provisioned VM and starts the application on it
pub struct RemoteConfigEngine {
    connector: Arc<dyn SessionConnector>,
    options: RemoteOptions,
}

impl RemoteConfigEngine {
    pub fn new(connector: Arc<dyn SessionConnector>, options: RemoteOptions) -> Self {
        Self { connector, options }
    }

    pub fn options(&self) -> &RemoteOptions {
        &self.options
    }

    /// Run every stage against `host` and return where the app is reachable
    #[instrument(skip(self, ctx, analysis), fields(job_id = %ctx.id()))]
    pub async fn configure(
        &self,
        ctx: &JobContext,
        host: &str,
        analysis: &Analysis,
    ) -> Result<DeployOutcome, DeployError> {
        let mut run = Run {
            ctx,
            host,
            analysis,
            key_path: None,
            session: None,
            app_dir: String::new(),
            port: analysis.port,
        };

        let mut stage = RemoteStage::AwaitingKey;
        let result = loop {
            ctx.log(format!("Remote stage: {}", stage));
            if stage.is_terminal() {
                break Ok(());
            }
            stage = match self.step(stage, &mut run).await {
                Ok(()) => stage.next(),
                Err(e) => {
                    ctx.warn(format!("Remote stage {} failed: {}", stage, e));
                    ctx.log(format!("Remote stage: {}", RemoteStage::Failed));
                    break Err(e);
                }
            };
        };

        if let Some(mut session) = run.session.take() {
            if let Err(e) = session.close().await {
                warn!("Failed to close session to {}: {}", host, e);
            }
        }

        result?;
        Ok(DeployOutcome {
            url: format!("http://{}:{}", host, run.port),
            public_ip: Some(host.to_string()),
        })
    }

    async fn step(&self, stage: RemoteStage, run: &mut Run<'_>) -> Result<(), DeployError> {
        match stage {
            RemoteStage::AwaitingKey => self.await_key(run).await,
            RemoteStage::AwaitingConnectivity => {
                run.ctx.log(format!(
                    "Waiting {}s for {} to accept connections...",
                    self.options.readiness_wait.as_secs(),
                    run.host
                ));
                run.ctx.sleep(self.options.readiness_wait).await
            }
            RemoteStage::UsernameProbing => self.probe_usernames(run).await,
            RemoteStage::DependencyBootstrap => self.bootstrap(run).await,
            RemoteStage::SourceFetch => self.fetch_source(run).await,
            RemoteStage::PortAndHostNormalization => self.normalize(run).await,
            RemoteStage::ServiceInstall => self.install_service(run).await,
            RemoteStage::Done | RemoteStage::Failed => Ok(()),
        }
    }

    async fn exec(&self, run: &Run<'_>, args: Vec<String>) -> Result<CommandOutput, DeployError> {
        let session = run.session()?;
        debug!("[{}@{}] {}", session.username(), session.host(), args.join(" "));
        session.exec(&args, run.ctx.cancel()).await
    }

    async fn await_key(&self, run: &mut Run<'_>) -> Result<(), DeployError> {
        let paths = run.ctx.paths();
        let candidates = [paths.ssh_key_file(), paths.nested_ssh_key_file()];

        for attempt in 1..=self.options.key_poll_attempts {
            for candidate in &candidates {
                if tokio::fs::try_exists(candidate).await.unwrap_or(false) {
                    run.ctx.log(format!("Found SSH key at {}", candidate.display()));
                    run.key_path = Some(candidate.clone());
                    return Ok(());
                }
            }
            debug!("SSH key not present yet (attempt {})", attempt);
            if attempt < self.options.key_poll_attempts {
                run.ctx.sleep(self.options.key_poll_interval).await?;
            }
        }

        Err(DeployError::KeyNotFound {
            tried: candidates.to_vec(),
        })
    }

    async fn probe_usernames(&self, run: &mut Run<'_>) -> Result<(), DeployError> {
        let key_path = run
            .key_path
            .clone()
            .ok_or_else(|| DeployError::Internal("key path not resolved".to_string()))?;

        for user in &self.options.candidate_users {
            run.ctx.log(format!("Trying to connect as {}@{}", user, run.host));
            match self
                .connector
                .connect(run.host, user, &key_path, run.ctx.cancel())
                .await?
            {
                Some(session) => {
                    run.ctx.log(format!("Connected as {}", user));
                    run.session = Some(session);
                    return Ok(());
                }
                None => debug!("{} rejected by {}", user, run.host),
            }
        }

        Err(DeployError::NoValidCredential {
            host: run.host.to_string(),
            tried: self.options.candidate_users.clone(),
        })
    }

    async fn bootstrap(&self, run: &mut Run<'_>) -> Result<(), DeployError> {
        let steps = [
            argv(["sudo", "apt-get", "update", "-y"]),
            argv(["sudo", "apt-get", "install", "-y", "git"]),
            argv(["sudo", "apt-get", "install", "-y", "python3"]),
            argv(["sudo", "apt-get", "install", "-y", "python3-pip"]),
            argv(["sudo", "pip3", "install", "--upgrade", "pip"]),
        ];

        for step in steps {
            let label = step.join(" ");
            run.ctx.log(format!("Running: {}", label));
            let output = self.exec(run, step).await?;
            if !output.success() {
                run.ctx.degrade(Degradation::BootstrapStepFailed {
                    step: label,
                    exit_code: output.exit_code,
                });
            }
        }
        Ok(())
    }

    async fn fetch_source(&self, run: &mut Run<'_>) -> Result<(), DeployError> {
        // Never empty and never `.`/`..`, so the checkout stays below the home directory
        let name = run
            .analysis
            .repo_name()
            .unwrap_or_else(|| format!("autodeploy-{}", run.ctx.id()));
        let checkout = format!("{}/{}", run.home()?, name);
        run.app_dir = format!("{}/app", checkout);

        run.ctx.log(format!("Cloning {} into {}", run.analysis.repo_url, checkout));
        let output = self.exec(run, argv(["rm", "-rf", checkout.as_str()])).await?;
        if !output.success() {
            run.ctx.degrade(Degradation::FetchWarning(format!(
                "could not remove {}: {}",
                checkout,
                output.diagnostic()
            )));
        }

        let output = self
            .exec(
                run,
                argv([
                    "git",
                    "clone",
                    "--",
                    run.analysis.repo_url.as_str(),
                    checkout.as_str(),
                ]),
            )
            .await?;
        if !output.success() {
            run.ctx.degrade(Degradation::FetchWarning(format!(
                "git clone failed: {}",
                output.diagnostic()
            )));
        }

        let output = self.exec(run, argv(["ls", "-la", run.app_dir.as_str()])).await?;
        if !output.success() {
            run.ctx.degrade(Degradation::FetchWarning(format!(
                "cannot list {}: {}",
                run.app_dir,
                output.diagnostic()
            )));
        }
        Ok(())
    }

    async fn find(&self, run: &Run<'_>, args: Vec<String>) -> Result<Vec<String>, DeployError> {
        let output = self.exec(run, args).await?;
        if !output.success() {
            run.ctx.warn(format!("find failed: {}", output.diagnostic()));
        }
        Ok(output
            .stdout
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect())
    }

    async fn rewrite(&self, run: &Run<'_>, rewrite: &HostRewrite, file: &str) -> Result<(), DeployError> {
        run.ctx.log(format!("Rewriting loopback hosts in {} to {}", file, rewrite.replacement()));
        let output = self.exec(run, rewrite.sed_args(file)).await?;
        if !output.success() {
            run.ctx.warn(format!("Rewrite of {} failed: {}", file, output.diagnostic()));
        }
        Ok(())
    }

    async fn normalize(&self, run: &mut Run<'_>) -> Result<(), DeployError> {
        if run.port == 0 {
            run.ctx.warn(format!("No port detected, defaulting to {}", FALLBACK_PORT));
            run.port = FALLBACK_PORT;
        }

        let mut entry_points = Vec::new();
        for &name in run.analysis.framework.entry_points() {
            let found = self
                .find(run, argv(["find", run.app_dir.as_str(), "-name", name]))
                .await?;
            entry_points.extend(found);
        }

        if entry_points.is_empty() {
            run.ctx.degrade(Degradation::EntryPointNotFound(format!(
                "no {} under {}",
                run.analysis.framework.entry_points().join("/"),
                run.app_dir
            )));
        }
        let bind_all = HostRewrite::bind_all();
        for file in &entry_points {
            self.rewrite(run, &bind_all, file).await?;
        }

        let templates = self
            .find(
                run,
                argv([
                    "find",
                    run.app_dir.as_str(),
                    "-type",
                    "f",
                    "-path",
                    "*/templates/*",
                    "-name",
                    "*.html",
                ]),
            )
            .await?;
        let public = HostRewrite::public_host(run.host);
        for file in &templates {
            self.rewrite(run, &public, file).await?;
        }

        if run.analysis.framework == Framework::Flask {
            let requirements = format!("{}/requirements.txt", run.app_dir);
            let step = argv(["sudo", "pip3", "install", "-r", requirements.as_str()]);
            let label = step.join(" ");
            run.ctx.log(format!("Running: {}", label));
            let output = self.exec(run, step).await?;
            if !output.success() {
                run.ctx.degrade(Degradation::BootstrapStepFailed {
                    step: label,
                    exit_code: output.exit_code,
                });
            }
        }
        Ok(())
    }

    async fn install_service(&self, run: &mut Run<'_>) -> Result<(), DeployError> {
        let session = run.session()?;
        let unit = ServiceUnit::new(
            run.ctx.id(),
            session.username(),
            run.app_dir.clone(),
            effective_start_command(run.analysis, run.port),
            run.port,
        );
        info!("Installing {} on {}", unit.name, run.host);
        run.ctx.log(format!("Installing service {}", unit.name));

        let output = session
            .upload(&unit.render(), &unit.staging_path(), run.ctx.cancel())
            .await?;
        check_install("upload", output)?;

        let install_path = unit.install_path();
        let steps = [
            ("move", argv(["sudo", "mv", unit.staging_path().as_str(), install_path.as_str()])),
            ("chmod", argv(["sudo", "chmod", "644", install_path.as_str()])),
            ("daemon-reload", argv(["sudo", "systemctl", "daemon-reload"])),
            ("enable", argv(["sudo", "systemctl", "enable", unit.name.as_str()])),
            ("restart", argv(["sudo", "systemctl", "restart", unit.name.as_str()])),
        ];
        for (step, args) in steps {
            let output = self.exec(run, args).await?;
            check_install(step, output)?;
        }

        run.ctx.log(format!("Service {} restarted", unit.name));
        Ok(())
    }
}

fn check_install(step: &str, output: CommandOutput) -> Result<(), DeployError> {
    if output.success() {
        Ok(())
    } else {
        Err(DeployError::ServiceInstallFailed {
            step: step.to_string(),
            output: output.diagnostic(),
        })
    }
}
