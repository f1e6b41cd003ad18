//! IaC generator: renders the Terraform tree for an [`InfraSpec`]

use std::path::PathBuf;

use tera::{Context, Tera};
use tokio::fs;
use tracing::{debug, info};

use crate::errors::DeployError;
use crate::iac::templates;
use crate::infra::spec::InfraSpec;
use crate::models::analysis::Analysis;
use crate::models::job::JobId;
use crate::storage::layout::WorkLayout;

/// Renders provider templates into job-scoped directories
pub struct IacGenerator {
    tera: Tera,
    layout: WorkLayout,
}

impl IacGenerator {
    /// Create a generator from the embedded templates
    pub fn new(layout: WorkLayout) -> Result<Self, DeployError> {
        let mut tera = Tera::default();
        for (name, content) in templates::ALL_TEMPLATES {
            tera.add_raw_template(name, content)?;
        }
        debug!("Loaded {} IaC templates", templates::ALL_TEMPLATES.len());
        Ok(Self { tera, layout })
    }

    /// Pick the template and build its context. Only the fields a template
    /// declares are inserted.
    fn context(
        &self,
        job_id: &JobId,
        spec: &InfraSpec,
        analysis: &Analysis,
    ) -> Result<(&'static str, Context), DeployError> {
        let paths = self.layout.job(job_id);
        let mut context = Context::new();
        context.insert("job_id", job_id.as_str());

        let template = match spec {
            InfraSpec::AwsVm {
                instance_type,
                region,
            } => {
                context.insert("instance_type", instance_type);
                context.insert("region", region);
                context.insert("port", &analysis.port);
                context.insert("ssh_key_path", &key_path_literal(paths.ssh_key_file())?);
                templates::AWS_VM
            }
            InfraSpec::GcpVm {
                machine_type,
                region,
            } => {
                context.insert("machine_type", machine_type);
                context.insert("region", region);
                context.insert("port", &analysis.port);
                context.insert("ssh_key_path", &key_path_literal(paths.ssh_key_file())?);
                templates::GCP_VM
            }
            InfraSpec::AwsAppRunner { region, port } => {
                context.insert("region", region);
                context.insert("port", port);
                templates::AWS_APP_RUNNER
            }
        };

        Ok((template, context))
    }

    /// Render `main.tf` for `spec` into `<work_root>/<job_id>/terraform`,
    /// creating the directory if absent. Returns the directory.
    pub async fn render(
        &self,
        job_id: &JobId,
        spec: &InfraSpec,
        analysis: &Analysis,
    ) -> Result<PathBuf, DeployError> {
        let (template, context) = self.context(job_id, spec, analysis)?;
        let rendered = self.tera.render(template, &context)?;

        let dir = self.layout.job(job_id).terraform_dir();
        fs::create_dir_all(&dir).await?;
        fs::write(dir.join("main.tf"), rendered).await?;

        info!(job_id = %job_id, "Rendered {} into {}", template, dir.display());
        Ok(dir)
    }
}

/// Absolute key path, so terraform writes it where the engine polls for it
/// regardless of its working directory
fn key_path_literal(path: PathBuf) -> Result<String, DeployError> {
    let absolute = std::path::absolute(&path)?;
    Ok(absolute.to_string_lossy().replace('\\', "/"))
}
