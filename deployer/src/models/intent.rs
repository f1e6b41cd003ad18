//! Deployment intent models

use serde::{Deserialize, Serialize};

/// Cloud provider requested by the user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Aws,
    Gcp,
    Azure,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Aws => "aws",
            Provider::Gcp => "gcp",
            Provider::Azure => "azure",
        }
    }
}

/// Kind of compute resource requested by the user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Resource {
    Vm,
    AppRunner,
    CloudRun,
    K8s,
}

impl Resource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Resource::Vm => "vm",
            Resource::AppRunner => "app-runner",
            Resource::CloudRun => "cloud-run",
            Resource::K8s => "k8s",
        }
    }
}

/// Structured intent derived from a free-text request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Intent {
    pub provider: Provider,
    pub resource: Resource,
}

impl Intent {
    pub fn new(provider: Provider, resource: Resource) -> Self {
        Self { provider, resource }
    }
}

impl std::fmt::Display for Intent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.provider.as_str(), self.resource.as_str())
    }
}
