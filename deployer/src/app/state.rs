//! Application state management

use std::sync::Arc;

use tracing::info;

use crate::app::options::AppOptions;
use crate::deploy::executor::Orchestrator;
use crate::errors::DeployError;
use crate::jobs::registry::JobRegistry;

/// Main application state
pub struct AppState {
    /// All jobs, process-wide
    pub registry: Arc<JobRegistry>,

    /// Pipeline entry point
    pub orchestrator: Arc<Orchestrator>,
}

impl AppState {
    /// Initialize application state
    pub async fn init(options: &AppOptions) -> Result<Self, DeployError> {
        info!("Initializing application state...");

        options.pipeline.layout.setup().await?;

        let registry = Arc::new(JobRegistry::new());
        let orchestrator = Arc::new(Orchestrator::new(
            options.pipeline.clone(),
            registry.clone(),
        )?);

        Ok(Self {
            registry,
            orchestrator,
        })
    }

    /// Cancel in-flight jobs
    pub async fn shutdown(&self) -> Result<(), DeployError> {
        info!("Shutting down application state...");
        self.orchestrator.shutdown().await;
        Ok(())
    }
}
