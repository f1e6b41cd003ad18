//! Job-scoped working directory layout
//!
//! ```text
//! <work_root>/<job_id>/repo        repository checkout
//! <work_root>/<job_id>/terraform   rendered IaC, provisioning working dir
//! <work_root>/<job_id>/ssh_key     private key written by provisioning
//! ```
//!
//! Isolation between concurrent jobs relies on job ids being unique.

use std::path::{Component, Path, PathBuf};

use tokio::fs;

use crate::errors::DeployError;
use crate::models::job::JobId;

/// Storage layout for all jobs
#[derive(Debug, Clone)]
pub struct WorkLayout {
    /// Base directory for all job directories
    pub work_root: PathBuf,
}

impl WorkLayout {
    /// Create a new layout rooted at `work_root`
    pub fn new(work_root: impl Into<PathBuf>) -> Self {
        Self {
            work_root: work_root.into(),
        }
    }

    /// Paths for one job
    pub fn job(&self, job_id: &JobId) -> JobPaths {
        JobPaths {
            root: self.work_root.join(job_id.as_str()),
        }
    }

    /// Create the work root
    pub async fn setup(&self) -> Result<(), DeployError> {
        fs::create_dir_all(&self.work_root).await?;
        Ok(())
    }
}

impl Default for WorkLayout {
    fn default() -> Self {
        Self::new("jobs")
    }
}

/// Paths belonging to a single job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobPaths {
    root: PathBuf,
}

impl JobPaths {
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn repo_dir(&self) -> PathBuf {
        self.root.join("repo")
    }

    pub fn terraform_dir(&self) -> PathBuf {
        self.root.join("terraform")
    }

    pub fn ssh_key_file(&self) -> PathBuf {
        self.root.join("ssh_key")
    }

    /// The key path nested under the terraform directory, where a template
    /// given a relative key path ends up writing it
    pub fn nested_ssh_key_file(&self) -> PathBuf {
        let relative: PathBuf = self
            .root
            .components()
            .filter(|c| matches!(c, Component::Normal(_)))
            .collect();
        self.terraform_dir().join(relative).join("ssh_key")
    }

    /// Create the job directory if absent
    pub async fn create(&self) -> Result<(), DeployError> {
        fs::create_dir_all(&self.root).await?;
        Ok(())
    }
}
