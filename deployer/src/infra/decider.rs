//! Infrastructure decision engine

use crate::errors::DeployError;
use crate::infra::spec::InfraSpec;
use crate::models::analysis::Analysis;
use crate::models::intent::{Intent, Provider, Resource};

pub const AWS_REGION: &str = "us-east-1";
pub const AWS_INSTANCE_TYPE: &str = "t2.micro";
pub const GCP_REGION: &str = "us-central1";
pub const GCP_MACHINE_TYPE: &str = "e2-micro";

/// Map an intent and repository analysis to concrete infrastructure.
///
/// Rules are checked in order and the first match wins; App Runner is
/// matched before the generic AWS fallback so it can never degrade to a VM.
/// Region and machine sizing are fixed per provider, only the App Runner
/// port comes from the analysis.
pub fn decide(intent: &Intent, analysis: &Analysis) -> Result<InfraSpec, DeployError> {
    match (intent.provider, intent.resource) {
        (Provider::Aws, Resource::AppRunner) => Ok(InfraSpec::AwsAppRunner {
            region: AWS_REGION.to_string(),
            port: analysis.port,
        }),
        (Provider::Aws, _) => Ok(InfraSpec::AwsVm {
            instance_type: AWS_INSTANCE_TYPE.to_string(),
            region: AWS_REGION.to_string(),
        }),
        (Provider::Gcp, _) => Ok(InfraSpec::GcpVm {
            machine_type: GCP_MACHINE_TYPE.to_string(),
            region: GCP_REGION.to_string(),
        }),
        (Provider::Azure, resource) => Err(DeployError::UnsupportedConfiguration {
            provider: intent.provider.as_str().to_string(),
            resource: resource.as_str().to_string(),
        }),
    }
}
