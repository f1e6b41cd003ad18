//! Error types for the autodeploy orchestrator

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Main error type for the orchestrator. Every variant is fatal for the job
/// it occurs in; recoverable conditions are reported as [`Degradation`].
#[derive(Error, Debug)]
pub enum DeployError {
    #[error("Unsupported configuration: provider={provider}, resource={resource}")]
    UnsupportedConfiguration { provider: String, resource: String },

    #[error("Provisioning failed during '{step}' (exit code {exit_code:?}): {stderr}")]
    ProvisioningFailed {
        step: String,
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("Provisioning incomplete: missing output(s) {missing}")]
    ProvisioningIncomplete { missing: String },

    #[error("SSH key not found. Tried: {}", .tried.iter().map(|p| p.display().to_string()).collect::<Vec<_>>().join(", "))]
    KeyNotFound { tried: Vec<PathBuf> },

    #[error("Could not open a session to {host} with any of: {}", .tried.join(", "))]
    NoValidCredential { host: String, tried: Vec<String> },

    #[error("Service install failed at '{step}': {output}")]
    ServiceInstallFailed { step: String, output: String },

    #[error("Container deploy failed at '{step}': {output}")]
    ContainerDeployFailed { step: String, output: String },

    #[error("Could not fetch source from {repo_url}: {output}")]
    SourceFetchFailed { repo_url: String, output: String },

    #[error("Failed to run {program}: {source}")]
    CommandSpawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} timed out after {secs}s")]
    CommandTimeout { program: String, secs: u64 },

    #[error("Job cancelled")]
    Cancelled,

    #[error("Template error: {0}")]
    Template(#[from] tera::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Shutdown error: {0}")]
    ShutdownError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Invalid transition: {0}")]
    InvalidTransition(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<anyhow::Error> for DeployError {
    fn from(err: anyhow::Error) -> Self {
        DeployError::Internal(err.to_string())
    }
}

/// Serializable classification of a [`DeployError`], recorded on failed jobs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    UnsupportedConfiguration,
    ProvisioningFailed,
    ProvisioningIncomplete,
    KeyNotFound,
    NoValidCredential,
    ServiceInstallFailed,
    ContainerDeployFailed,
    CommandFailed,
    Cancelled,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::UnsupportedConfiguration => "unsupported_configuration",
            ErrorKind::ProvisioningFailed => "provisioning_failed",
            ErrorKind::ProvisioningIncomplete => "provisioning_incomplete",
            ErrorKind::KeyNotFound => "key_not_found",
            ErrorKind::NoValidCredential => "no_valid_credential",
            ErrorKind::ServiceInstallFailed => "service_install_failed",
            ErrorKind::ContainerDeployFailed => "container_deploy_failed",
            ErrorKind::CommandFailed => "command_failed",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Internal => "internal",
        }
    }
}

impl DeployError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DeployError::UnsupportedConfiguration { .. } => ErrorKind::UnsupportedConfiguration,
            DeployError::ProvisioningFailed { .. } => ErrorKind::ProvisioningFailed,
            DeployError::ProvisioningIncomplete { .. } => ErrorKind::ProvisioningIncomplete,
            DeployError::KeyNotFound { .. } => ErrorKind::KeyNotFound,
            DeployError::NoValidCredential { .. } => ErrorKind::NoValidCredential,
            DeployError::ServiceInstallFailed { .. } => ErrorKind::ServiceInstallFailed,
            DeployError::ContainerDeployFailed { .. } => ErrorKind::ContainerDeployFailed,
            DeployError::SourceFetchFailed { .. }
            | DeployError::CommandSpawn { .. }
            | DeployError::CommandTimeout { .. } => {
                ErrorKind::CommandFailed
            }
            DeployError::Cancelled => ErrorKind::Cancelled,
            _ => ErrorKind::Internal,
        }
    }
}

/// Recoverable conditions: logged as warnings, the pipeline carries on
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Degradation {
    BootstrapStepFailed { step: String, exit_code: Option<i32> },
    FetchWarning(String),
    EntryPointNotFound(String),
}

impl std::fmt::Display for Degradation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Degradation::BootstrapStepFailed { step, exit_code } => {
                write!(f, "Bootstrap step '{}' failed (exit code {:?}), continuing", step, exit_code)
            }
            Degradation::FetchWarning(msg) => write!(f, "Source fetch warning: {}", msg),
            Degradation::EntryPointNotFound(msg) => write!(f, "Entry point not found: {}", msg),
        }
    }
}
