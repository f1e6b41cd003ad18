//! Terraform provisioning driver

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tracing::instrument;

use crate::deploy::context::JobContext;
use crate::errors::DeployError;
use crate::exec::process::{CommandOutput, CommandSpec, ProcessRunner};

/// Output keys that may carry a VM's address, in priority order
pub const ADDRESS_OUTPUTS: [&str; 3] = ["public_ip", "instance_ip", "ip"];

/// Provisioning options
#[derive(Debug, Clone)]
pub struct ProvisionOptions {
    /// Terraform executable
    pub terraform_binary: String,

    /// Limit for each init/apply/output invocation
    pub timeout: Duration,
}

impl Default for ProvisionOptions {
    fn default() -> Self {
        Self {
            terraform_binary: "terraform".to_string(),
            timeout: Duration::from_secs(1800),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawOutput {
    value: serde_json::Value,
}

/// Parsed `terraform output -json`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProvisionResult {
    outputs: HashMap<String, serde_json::Value>,
}

impl ProvisionResult {
    /// Parse `{"name": {"value": ..., "type": ..., "sensitive": ...}, ...}`
    pub fn from_json(raw: &str) -> Result<Self, DeployError> {
        let parsed: HashMap<String, RawOutput> = serde_json::from_str(raw)?;
        Ok(Self {
            outputs: parsed.into_iter().map(|(k, v)| (k, v.value)).collect(),
        })
    }

    pub fn from_values<I, K, V>(values: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<serde_json::Value>,
    {
        Self {
            outputs: values
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Output as a string; null and empty values count as absent
    pub fn get(&self, name: &str) -> Option<String> {
        let value = match self.outputs.get(name)? {
            serde_json::Value::Null => return None,
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        (!value.trim().is_empty()).then_some(value)
    }

    /// First present address-like output
    pub fn public_address(&self) -> Option<String> {
        ADDRESS_OUTPUTS.iter().find_map(|name| self.get(name))
    }

    pub fn require(&self, name: &str) -> Result<String, DeployError> {
        self.get(name)
            .ok_or_else(|| DeployError::ProvisioningIncomplete {
                missing: name.to_string(),
            })
    }

    pub fn require_public_address(&self) -> Result<String, DeployError> {
        self.public_address()
            .ok_or_else(|| DeployError::ProvisioningIncomplete {
                missing: ADDRESS_OUTPUTS.join("/"),
            })
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.outputs.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

/// Drives `terraform` in a job's working directory
pub struct TerraformDriver {
    runner: Arc<dyn ProcessRunner>,
    options: ProvisionOptions,
}

impl TerraformDriver {
    pub fn new(runner: Arc<dyn ProcessRunner>, options: ProvisionOptions) -> Self {
        Self { runner, options }
    }

    fn command(&self, dir: &Path) -> CommandSpec {
        CommandSpec::new(&self.options.terraform_binary)
            .current_dir(dir)
            .env("TF_IN_AUTOMATION", "1")
            .timeout(self.options.timeout)
    }

    async fn run_step(
        &self,
        ctx: &JobContext,
        step: &str,
        spec: CommandSpec,
    ) -> Result<CommandOutput, DeployError> {
        let output = self.runner.run(&spec, ctx.cancel()).await?;
        if !output.success() {
            return Err(DeployError::ProvisioningFailed {
                step: step.to_string(),
                exit_code: output.exit_code,
                stderr: output.diagnostic(),
            });
        }
        ctx.log(format!("terraform {} finished in {:.1}s", step, output.duration.as_secs_f64()));
        Ok(output)
    }

    #[instrument(skip(self, ctx), fields(job_id = %ctx.id()))]
    pub async fn init(&self, ctx: &JobContext, dir: &Path) -> Result<(), DeployError> {
        ctx.log("Running terraform init...");
        let spec = self.command(dir).args(["init", "-input=false", "-no-color"]);
        self.run_step(ctx, "init", spec).await.map(|_| ())
    }

    /// `terraform apply -auto-approve`, with optional `-var name=value` pairs
    #[instrument(skip(self, ctx, vars), fields(job_id = %ctx.id()))]
    pub async fn apply(
        &self,
        ctx: &JobContext,
        dir: &Path,
        vars: &[(&str, &str)],
    ) -> Result<(), DeployError> {
        ctx.log("Running terraform apply...");
        let mut spec = self
            .command(dir)
            .args(["apply", "-auto-approve", "-input=false", "-no-color"]);
        for (name, value) in vars {
            spec = spec.arg("-var").arg(format!("{}={}", name, value));
        }
        self.run_step(ctx, "apply", spec).await.map(|_| ())
    }

    #[instrument(skip(self, ctx), fields(job_id = %ctx.id()))]
    pub async fn outputs(&self, ctx: &JobContext, dir: &Path) -> Result<ProvisionResult, DeployError> {
        let spec = self.command(dir).args(["output", "-json", "-no-color"]);
        let output = self.run_step(ctx, "output", spec).await?;
        let result = ProvisionResult::from_json(&output.stdout)?;
        ctx.log(format!("Terraform outputs: {}", result.names().join(", ")));
        Ok(result)
    }

    /// init, apply, then read outputs
    pub async fn provision(&self, ctx: &JobContext, dir: &Path) -> Result<ProvisionResult, DeployError> {
        self.init(ctx, dir).await?;
        self.apply(ctx, dir, &[]).await?;
        self.outputs(ctx, dir).await
    }
}
