//! Repository analysis
//!
//! Clones the repository into the job's `repo` directory and looks at the
//! application directory (`app/` when present, otherwise the checkout root)
//! to guess framework, port and start command.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::fs;
use tracing::{debug, instrument};

use crate::deploy::context::JobContext;
use crate::errors::DeployError;
use crate::exec::process::{CommandSpec, ProcessRunner};
use crate::models::analysis::{Analysis, Framework};

const DEFAULT_START_COMMAND: &str = "python app.py";

/// Produces an [`Analysis`] for a repository
#[async_trait]
pub trait RepoAnalyzer: Send + Sync {
    async fn analyze(&self, ctx: &JobContext, repo_url: &str) -> Result<Analysis, DeployError>;
}

/// Options for [`GitRepoAnalyzer`]
#[derive(Debug, Clone)]
pub struct AnalyzerOptions {
    pub git_binary: String,
    pub clone_timeout: Duration,
}

impl Default for AnalyzerOptions {
    fn default() -> Self {
        Self {
            git_binary: "git".to_string(),
            clone_timeout: Duration::from_secs(300),
        }
    }
}

/// Clones with `git` and inspects the checkout
pub struct GitRepoAnalyzer {
    runner: Arc<dyn ProcessRunner>,
    options: AnalyzerOptions,
}

impl GitRepoAnalyzer {
    pub fn new(runner: Arc<dyn ProcessRunner>, options: AnalyzerOptions) -> Self {
        Self { runner, options }
    }
}

#[async_trait]
impl RepoAnalyzer for GitRepoAnalyzer {
    #[instrument(skip(self, ctx), fields(job_id = %ctx.id()))]
    async fn analyze(&self, ctx: &JobContext, repo_url: &str) -> Result<Analysis, DeployError> {
        let repo_dir = ctx.paths().repo_dir();
        if fs::try_exists(&repo_dir).await.unwrap_or(false) {
            fs::remove_dir_all(&repo_dir).await?;
        }
        ctx.paths().create().await?;

        let spec = CommandSpec::new(&self.options.git_binary)
            .args(["clone", "--depth", "1", "--", repo_url])
            .arg(repo_dir.to_string_lossy())
            .env("GIT_TERMINAL_PROMPT", "0")
            .timeout(self.options.clone_timeout);
        let output = self.runner.run(&spec, ctx.cancel()).await?;
        if !output.success() {
            return Err(DeployError::SourceFetchFailed {
                repo_url: repo_url.to_string(),
                output: output.diagnostic(),
            });
        }

        inspect_checkout(&repo_dir, repo_url).await
    }
}

/// `app/` if the checkout has one, else the checkout itself
pub async fn app_dir(repo_dir: &Path) -> PathBuf {
    let nested = repo_dir.join("app");
    match fs::metadata(&nested).await {
        Ok(meta) if meta.is_dir() => nested,
        _ => repo_dir.to_path_buf(),
    }
}

/// Inspect an already cloned repository
pub async fn inspect_checkout(repo_dir: &Path, repo_url: &str) -> Result<Analysis, DeployError> {
    let dir = app_dir(repo_dir).await;
    debug!("Inspecting {}", dir.display());

    let mut framework = Framework::Unknown;
    let mut port = framework.default_port();
    let mut start_command: Option<String> = None;

    if let Some(requirements) = read_optional(&dir.join("requirements.txt")).await? {
        let requirements = requirements.to_lowercase();
        if requirements.contains("flask") {
            framework = Framework::Flask;
            start_command = Some("python3 app.py".to_string());
            port = 5000;
        }
        if requirements.contains("django") {
            framework = Framework::Django;
            start_command = Some("python manage.py runserver 0.0.0.0:8000".to_string());
            port = 8000;
        }
    }

    if fs::try_exists(dir.join("package.json")).await.unwrap_or(false) {
        framework = Framework::Node;
        start_command = Some("npm start".to_string());
        port = 3000;
    }

    if fs::try_exists(dir.join("Dockerfile")).await.unwrap_or(false) {
        framework = Framework::Docker;
    }

    Ok(Analysis {
        repo_path: repo_dir.to_path_buf(),
        repo_url: repo_url.to_string(),
        framework,
        port,
        start_command: start_command.unwrap_or_else(|| DEFAULT_START_COMMAND.to_string()),
    })
}

async fn read_optional(path: &Path) -> Result<Option<String>, DeployError> {
    match fs::read_to_string(path).await {
        Ok(content) => Ok(Some(content)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}
