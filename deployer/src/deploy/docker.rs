//! Container deployment to a managed registry-backed service
//!
//! Build the image locally, log in to the account's ECR registry, create the
//! repository with a first apply, push, then re-apply with the service enabled.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use secrecy::SecretString;
use tracing::{debug, info, instrument};

use crate::deploy::context::JobContext;
use crate::errors::DeployError;
use crate::exec::process::{CommandOutput, CommandSpec, ProcessRunner};
use crate::models::job::DeployOutcome;
use crate::provision::terraform::TerraformDriver;

/// Options for the container path
#[derive(Debug, Clone)]
pub struct ContainerOptions {
    pub docker_binary: String,
    pub aws_binary: String,

    /// Local image name, without tag
    pub image_name: String,
    pub image_tag: String,

    /// Limit for each docker/aws invocation
    pub timeout: Duration,
}

impl Default for ContainerOptions {
    fn default() -> Self {
        Self {
            docker_binary: "docker".to_string(),
            aws_binary: "aws".to_string(),
            image_name: "autodeploy-app".to_string(),
            image_tag: "latest".to_string(),
            timeout: Duration::from_secs(1800),
        }
    }
}

impl ContainerOptions {
    pub fn local_image(&self) -> String {
        format!("{}:{}", self.image_name, self.image_tag)
    }
}

/// ECR registry host for an account and region
pub fn registry_host(account: &str, region: &str) -> String {
    format!("{}.dkr.ecr.{}.amazonaws.com", account, region)
}

pub struct ContainerDeployDriver {
    runner: Arc<dyn ProcessRunner>,
    terraform: Arc<TerraformDriver>,
    options: ContainerOptions,
}

impl ContainerDeployDriver {
    pub fn new(
        runner: Arc<dyn ProcessRunner>,
        terraform: Arc<TerraformDriver>,
        options: ContainerOptions,
    ) -> Self {
        Self {
            runner,
            terraform,
            options,
        }
    }

    async fn run_step(
        &self,
        ctx: &JobContext,
        step: &str,
        spec: CommandSpec,
    ) -> Result<CommandOutput, DeployError> {
        debug!("[{}] {}", step, spec);
        let output = self.runner.run(&spec.timeout(self.options.timeout), ctx.cancel()).await?;
        if !output.success() {
            return Err(DeployError::ContainerDeployFailed {
                step: step.to_string(),
                output: output.diagnostic(),
            });
        }
        Ok(output)
    }

    fn docker(&self) -> CommandSpec {
        CommandSpec::new(&self.options.docker_binary)
    }

    fn aws(&self) -> CommandSpec {
        CommandSpec::new(&self.options.aws_binary)
    }

    /// Build, push and run the image; returns the service URL
    #[instrument(skip(self, ctx, repo_dir, terraform_dir), fields(job_id = %ctx.id()))]
    pub async fn deploy(
        &self,
        ctx: &JobContext,
        region: &str,
        repo_dir: &Path,
        terraform_dir: &Path,
    ) -> Result<DeployOutcome, DeployError> {
        let local_image = self.options.local_image();

        ctx.log(format!("Building image {}...", local_image));
        let build = self
            .docker()
            .current_dir(repo_dir)
            .args(["build", "-t", local_image.as_str(), "."]);
        self.run_step(ctx, "build", build).await?;

        self.login(ctx, region).await?;

        ctx.log("Creating registry repository...");
        self.terraform.init(ctx, terraform_dir).await?;
        self.terraform.apply(ctx, terraform_dir, &[]).await?;
        let ecr_repo_url = self
            .terraform
            .outputs(ctx, terraform_dir)
            .await?
            .require("ecr_repo_url")?;

        let remote_image = format!("{}:{}", ecr_repo_url, self.options.image_tag);
        ctx.log(format!("Pushing {}...", remote_image));
        let tag = self
            .docker()
            .args(["tag", local_image.as_str(), remote_image.as_str()]);
        self.run_step(ctx, "tag", tag).await?;
        let push = self.docker().args(["push", remote_image.as_str()]);
        self.run_step(ctx, "push", push).await?;

        ctx.log("Starting service...");
        self.terraform
            .apply(ctx, terraform_dir, &[("image_pushed", "true")])
            .await?;
        let app_url = self
            .terraform
            .outputs(ctx, terraform_dir)
            .await?
            .require("app_url")?;

        info!("Container service available at {}", app_url);
        Ok(DeployOutcome {
            url: app_url,
            public_ip: None,
        })
    }

    /// `docker login` against the account's registry with a short-lived token
    async fn login(&self, ctx: &JobContext, region: &str) -> Result<(), DeployError> {
        ctx.log("Logging in to the container registry...");

        let identity = self.aws().args([
            "sts",
            "get-caller-identity",
            "--query",
            "Account",
            "--output",
            "text",
        ]);
        let account = self.run_step(ctx, "login", identity).await?.stdout.trim().to_string();
        if account.is_empty() {
            return Err(DeployError::ContainerDeployFailed {
                step: "login".to_string(),
                output: "empty account id".to_string(),
            });
        }

        let token = self
            .aws()
            .args(["ecr", "get-login-password", "--region", region]);
        let password = SecretString::from(self.run_step(ctx, "login", token).await?.stdout.trim().to_string());

        let registry = registry_host(&account, region);
        let login = self
            .docker()
            .args(["login", "--username", "AWS", "--password-stdin", registry.as_str()])
            .stdin_secret(password);
        self.run_step(ctx, "login", login).await?;
        ctx.log(format!("Logged in to {}", registry));
        Ok(())
    }
}
