//! Deployment pipeline executor
//!
//! The [`Orchestrator`] owns every pipeline component and runs one job per
//! tokio task: classify, analyze, decide, render, then hand off to the driver
//! picked by the [`InfraSpec`]. The final status always goes through the
//! [`JobRegistry`].

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{error, info, instrument};

use crate::deploy::context::JobContext;
use crate::deploy::docker::{ContainerDeployDriver, ContainerOptions};
use crate::errors::DeployError;
use crate::exec::process::{ProcessRunner, TokioProcessRunner};
use crate::iac::generator::IacGenerator;
use crate::infra::decider::decide;
use crate::infra::spec::{DriverKind, InfraSpec};
use crate::intake::analyzer::{AnalyzerOptions, GitRepoAnalyzer, RepoAnalyzer};
use crate::intake::classifier::{IntentClassifier, KeywordClassifier};
use crate::jobs::registry::JobRegistry;
use crate::models::analysis::Analysis;
use crate::models::job::{DeployOutcome, JobId, JobSnapshot};
use crate::provision::terraform::{ProvisionOptions, TerraformDriver};
use crate::remote::engine::{RemoteConfigEngine, RemoteOptions};
use crate::remote::session::{OpenSshConnector, SessionConnector, SshOptions};
use crate::storage::layout::WorkLayout;

/// Everything the pipeline can be tuned with
#[derive(Debug, Clone, Default)]
pub struct PipelineOptions {
    pub layout: WorkLayout,
    pub analyzer: AnalyzerOptions,
    pub provision: ProvisionOptions,
    pub remote: RemoteOptions,
    pub ssh: SshOptions,
    pub container: ContainerOptions,
}

/// Pluggable collaborators. Defaults shell out to real tools.
pub struct Components {
    pub runner: Arc<dyn ProcessRunner>,
    pub connector: Arc<dyn SessionConnector>,
    pub classifier: Arc<dyn IntentClassifier>,
    pub analyzer: Arc<dyn RepoAnalyzer>,
}

impl Components {
    pub fn from_options(options: &PipelineOptions) -> Self {
        let runner: Arc<dyn ProcessRunner> = Arc::new(TokioProcessRunner::new());
        Self {
            connector: Arc::new(OpenSshConnector::new(runner.clone(), options.ssh.clone())),
            classifier: Arc::new(KeywordClassifier),
            analyzer: Arc::new(GitRepoAnalyzer::new(runner.clone(), options.analyzer.clone())),
            runner,
        }
    }
}

pub struct Orchestrator {
    registry: Arc<JobRegistry>,
    layout: WorkLayout,
    classifier: Arc<dyn IntentClassifier>,
    analyzer: Arc<dyn RepoAnalyzer>,
    generator: IacGenerator,
    terraform: Arc<TerraformDriver>,
    remote: RemoteConfigEngine,
    container: ContainerDeployDriver,
    root_cancel: CancellationToken,
    cancels: Mutex<HashMap<JobId, CancellationToken>>,
    /// Background jobs started by `submit`
    tasks: TaskTracker,
}

impl Orchestrator {
    /// Orchestrator driving the real external tools
    pub fn new(options: PipelineOptions, registry: Arc<JobRegistry>) -> Result<Self, DeployError> {
        let components = Components::from_options(&options);
        Self::with_components(options, registry, components)
    }

    pub fn with_components(
        options: PipelineOptions,
        registry: Arc<JobRegistry>,
        components: Components,
    ) -> Result<Self, DeployError> {
        let terraform = Arc::new(TerraformDriver::new(
            components.runner.clone(),
            options.provision.clone(),
        ));
        Ok(Self {
            registry,
            generator: IacGenerator::new(options.layout.clone())?,
            layout: options.layout,
            classifier: components.classifier,
            analyzer: components.analyzer,
            remote: RemoteConfigEngine::new(components.connector, options.remote),
            container: ContainerDeployDriver::new(
                components.runner,
                terraform.clone(),
                options.container,
            ),
            terraform,
            root_cancel: CancellationToken::new(),
            cancels: Mutex::new(HashMap::new()),
            tasks: TaskTracker::new(),
        })
    }

    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.registry
    }

    /// Create a job and run its pipeline in the background
    pub fn submit(
        self: &Arc<Self>,
        description: impl Into<String>,
        repo_url: impl Into<String>,
    ) -> Result<JobId, DeployError> {
        let id = JobId::new();
        let ctx = self.open_job(&id)?;
        let (description, repo_url) = (description.into(), repo_url.into());

        let this = self.clone();
        self.tasks.spawn(async move {
            let _ = this.execute(ctx, &description, &repo_url).await;
        });
        info!(job_id = %id, "Job submitted");
        Ok(id)
    }

    /// Create a job with the given id and run it to completion
    pub async fn run(
        &self,
        id: &JobId,
        description: &str,
        repo_url: &str,
    ) -> Result<DeployOutcome, DeployError> {
        let ctx = self.open_job(id)?;
        self.execute(ctx, description, repo_url).await
    }

    pub fn status(&self, id: &JobId) -> Option<JobSnapshot> {
        self.registry.get(id)
    }

    /// Request cancellation. False when the job is unknown or already done.
    pub fn cancel(&self, id: &JobId) -> bool {
        let cancels = self.cancels.lock().unwrap_or_else(|e| e.into_inner());
        match cancels.get(id) {
            Some(token) => {
                self.registry.warn(id, "Cancellation requested");
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancel every in-flight job and wait until each has released its
    /// resources, remote sessions included
    pub async fn shutdown(&self) {
        info!("Cancelling {} in-flight job(s)...", self.tasks.len());
        self.root_cancel.cancel();
        self.tasks.close();
        self.tasks.wait().await;
        info!("All jobs stopped");
    }

    fn open_job(&self, id: &JobId) -> Result<JobContext, DeployError> {
        self.registry.create(id)?;
        let token = self.root_cancel.child_token();
        self.cancels
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id.clone(), token.clone());
        Ok(JobContext::new(
            id.clone(),
            self.layout.job(id),
            self.registry.clone(),
            token,
        ))
    }

    async fn execute(
        &self,
        ctx: JobContext,
        description: &str,
        repo_url: &str,
    ) -> Result<DeployOutcome, DeployError> {
        let result = self.pipeline(&ctx, description, repo_url).await;

        self.cancels
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(ctx.id());

        let recorded = match &result {
            Ok(outcome) => self.registry.succeed(ctx.id(), outcome.clone()),
            Err(e) => {
                error!(job_id = %ctx.id(), "Deployment failed: {}", e);
                self.registry.fail(ctx.id(), e)
            }
        };
        if let Err(e) = recorded {
            error!(job_id = %ctx.id(), "Failed to record final status: {}", e);
        }
        result
    }

    #[instrument(skip(self, ctx, description), fields(job_id = %ctx.id()))]
    async fn pipeline(
        &self,
        ctx: &JobContext,
        description: &str,
        repo_url: &str,
    ) -> Result<DeployOutcome, DeployError> {
        ctx.log("Parsing deployment description...");
        let intent = self.classifier.classify(description);
        ctx.log(format!("Intent: {}", intent));

        ctx.log("Cloning & analyzing repository...");
        let analysis = self.analyzer.analyze(ctx, repo_url).await?;
        ctx.log(format!(
            "Repository analysis: framework={}, port={}, start_command={}",
            analysis.framework.as_str(),
            analysis.port,
            analysis.start_command
        ));

        ctx.log("Deciding infrastructure requirements...");
        let spec = decide(&intent, &analysis)?;
        ctx.log(format!("Infrastructure chosen: {}", spec));

        let terraform_dir = self.generator.render(ctx.id(), &spec, &analysis).await?;
        ctx.log(format!("Terraform generated at: {}", terraform_dir.display()));

        self.dispatch(ctx, &spec, &analysis, &terraform_dir).await
    }

    async fn dispatch(
        &self,
        ctx: &JobContext,
        spec: &InfraSpec,
        analysis: &Analysis,
        terraform_dir: &Path,
    ) -> Result<DeployOutcome, DeployError> {
        match spec.driver() {
            DriverKind::Remote => {
                ctx.log("Provisioning VM...");
                let result = self.terraform.provision(ctx, terraform_dir).await?;
                let host = result.require_public_address()?;
                ctx.log(format!("VM reachable at {}", host));
                self.remote.configure(ctx, &host, analysis).await
            }
            DriverKind::Container => {
                self.container
                    .deploy(ctx, spec.region(), &analysis.repo_path, terraform_dir)
                    .await
            }
        }
    }
}
