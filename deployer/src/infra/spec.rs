//! Concrete infrastructure specifications

use serde::{Deserialize, Serialize};

use crate::models::intent::{Provider, Resource};

/// Infrastructure chosen for a job. Closed over the combinations this
/// service knows how to provision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InfraSpec {
    AwsVm { instance_type: String, region: String },
    AwsAppRunner { region: String, port: u16 },
    GcpVm { machine_type: String, region: String },
}

/// Downstream driver that finishes a deployment after provisioning
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverKind {
    /// Log into the VM and install a supervised service
    Remote,
    /// Build and push an image, then redeploy
    Container,
}

impl InfraSpec {
    pub fn provider(&self) -> Provider {
        match self {
            InfraSpec::AwsVm { .. } | InfraSpec::AwsAppRunner { .. } => Provider::Aws,
            InfraSpec::GcpVm { .. } => Provider::Gcp,
        }
    }

    pub fn resource(&self) -> Resource {
        match self {
            InfraSpec::AwsVm { .. } | InfraSpec::GcpVm { .. } => Resource::Vm,
            InfraSpec::AwsAppRunner { .. } => Resource::AppRunner,
        }
    }

    pub fn region(&self) -> &str {
        match self {
            InfraSpec::AwsVm { region, .. }
            | InfraSpec::AwsAppRunner { region, .. }
            | InfraSpec::GcpVm { region, .. } => region,
        }
    }

    pub fn driver(&self) -> DriverKind {
        match self {
            InfraSpec::AwsVm { .. } | InfraSpec::GcpVm { .. } => DriverKind::Remote,
            InfraSpec::AwsAppRunner { .. } => DriverKind::Container,
        }
    }
}

impl std::fmt::Display for InfraSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InfraSpec::AwsVm { instance_type, region } => {
                write!(f, "aws/vm ({}, {})", instance_type, region)
            }
            InfraSpec::AwsAppRunner { region, port } => {
                write!(f, "aws/app-runner ({}, port {})", region, port)
            }
            InfraSpec::GcpVm { machine_type, region } => {
                write!(f, "gcp/vm ({}, {})", machine_type, region)
            }
        }
    }
}
