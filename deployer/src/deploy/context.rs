//! Per-job execution context

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::errors::{DeployError, Degradation};
use crate::jobs::registry::JobRegistry;
use crate::models::job::JobId;
use crate::storage::layout::JobPaths;

/// Everything a pipeline stage needs to report on and stop a job
#[derive(Debug, Clone)]
pub struct JobContext {
    id: JobId,
    paths: JobPaths,
    registry: Arc<JobRegistry>,
    cancel: CancellationToken,
}

impl JobContext {
    pub fn new(
        id: JobId,
        paths: JobPaths,
        registry: Arc<JobRegistry>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            id,
            paths,
            registry,
            cancel,
        }
    }

    pub fn id(&self) -> &JobId {
        &self.id
    }

    pub fn paths(&self) -> &JobPaths {
        &self.paths
    }

    pub fn cancel(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn log(&self, message: impl Into<String>) {
        self.registry.log(&self.id, message);
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.registry.warn(&self.id, message);
    }

    /// Record a recoverable condition; never changes job status
    pub fn degrade(&self, degradation: Degradation) {
        self.registry.warn(&self.id, degradation.to_string());
    }

    /// Sleep that returns early with `Cancelled`
    pub async fn sleep(&self, duration: std::time::Duration) -> Result<(), DeployError> {
        tokio::select! {
            _ = self.cancel.cancelled() => Err(DeployError::Cancelled),
            _ = tokio::time::sleep(duration) => Ok(()),
        }
    }
}
