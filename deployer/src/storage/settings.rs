//! Settings file management

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::debug;

use crate::app::options::{AppOptions, LifecycleOptions, ServerOptions};
use crate::deploy::docker::ContainerOptions;
use crate::deploy::executor::PipelineOptions;
use crate::errors::DeployError;
use crate::intake::analyzer::AnalyzerOptions;
use crate::logs::{LogLevel, LogOptions};
use crate::provision::terraform::ProvisionOptions;
use crate::remote::engine::RemoteOptions;
use crate::remote::session::SshOptions;
use crate::storage::layout::WorkLayout;

/// Environment variable naming the settings file
pub const SETTINGS_ENV: &str = "AUTODEPLOY_SETTINGS";

/// Service settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,

    /// Emit logs as JSON
    #[serde(default)]
    pub log_json: bool,

    /// Also write daily rolling log files here
    #[serde(default)]
    pub log_dir: Option<PathBuf>,

    /// Root of the per-job working directories
    #[serde(default = "default_work_root")]
    pub work_root: PathBuf,

    #[serde(default)]
    pub server: ServerSettings,

    #[serde(default)]
    pub terraform: TerraformSettings,

    #[serde(default)]
    pub remote: RemoteSettings,

    #[serde(default)]
    pub container: ContainerSettings,

    /// git executable used for repository analysis
    #[serde(default = "default_git_binary")]
    pub git_binary: String,

    /// Maximum delay for graceful shutdown, in seconds
    #[serde(default = "default_max_shutdown_delay")]
    pub max_shutdown_delay_secs: u64,
}

fn default_work_root() -> PathBuf {
    PathBuf::from("jobs")
}

fn default_git_binary() -> String {
    "git".to_string()
}

fn default_max_shutdown_delay() -> u64 {
    30
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            log_json: false,
            log_dir: None,
            work_root: default_work_root(),
            server: ServerSettings::default(),
            terraform: TerraformSettings::default(),
            remote: RemoteSettings::default(),
            container: ContainerSettings::default(),
            git_binary: default_git_binary(),
            max_shutdown_delay_secs: default_max_shutdown_delay(),
        }
    }
}

/// HTTP server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_server_host")]
    pub host: String,

    #[serde(default = "default_server_port")]
    pub port: u16,
}

fn default_server_host() -> String {
    "127.0.0.1".to_string()
}

fn default_server_port() -> u16 {
    8000
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_server_host(),
            port: default_server_port(),
        }
    }
}

/// Provisioning settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TerraformSettings {
    #[serde(default = "default_terraform_binary")]
    pub binary: String,

    /// Limit per terraform invocation, in seconds
    #[serde(default = "default_terraform_timeout")]
    pub timeout_secs: u64,
}

fn default_terraform_binary() -> String {
    "terraform".to_string()
}

fn default_terraform_timeout() -> u64 {
    1800
}

impl Default for TerraformSettings {
    fn default() -> Self {
        Self {
            binary: default_terraform_binary(),
            timeout_secs: default_terraform_timeout(),
        }
    }
}

/// Remote configuration settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteSettings {
    #[serde(default = "default_ssh_binary")]
    pub ssh_binary: String,

    #[serde(default = "default_key_poll_attempts")]
    pub key_poll_attempts: u32,

    #[serde(default = "default_key_poll_interval_ms")]
    pub key_poll_interval_ms: u64,

    /// Wait between provisioning and the first connection, in seconds
    #[serde(default = "default_readiness_wait")]
    pub readiness_wait_secs: u64,

    /// Login names tried in order
    #[serde(default = "default_candidate_users")]
    pub candidate_users: Vec<String>,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,
}

fn default_ssh_binary() -> String {
    "ssh".to_string()
}

fn default_key_poll_attempts() -> u32 {
    30
}

fn default_key_poll_interval_ms() -> u64 {
    500
}

fn default_readiness_wait() -> u64 {
    60
}

fn default_candidate_users() -> Vec<String> {
    RemoteOptions::default().candidate_users
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_command_timeout() -> u64 {
    900
}

impl Default for RemoteSettings {
    fn default() -> Self {
        Self {
            ssh_binary: default_ssh_binary(),
            key_poll_attempts: default_key_poll_attempts(),
            key_poll_interval_ms: default_key_poll_interval_ms(),
            readiness_wait_secs: default_readiness_wait(),
            candidate_users: default_candidate_users(),
            connect_timeout_secs: default_connect_timeout(),
            command_timeout_secs: default_command_timeout(),
        }
    }
}

/// Container path settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerSettings {
    #[serde(default = "default_docker_binary")]
    pub docker_binary: String,

    #[serde(default = "default_aws_binary")]
    pub aws_binary: String,

    #[serde(default = "default_image_name")]
    pub image_name: String,

    #[serde(default = "default_container_timeout")]
    pub timeout_secs: u64,
}

fn default_docker_binary() -> String {
    "docker".to_string()
}

fn default_aws_binary() -> String {
    "aws".to_string()
}

fn default_image_name() -> String {
    "autodeploy-app".to_string()
}

fn default_container_timeout() -> u64 {
    1800
}

impl Default for ContainerSettings {
    fn default() -> Self {
        Self {
            docker_binary: default_docker_binary(),
            aws_binary: default_aws_binary(),
            image_name: default_image_name(),
            timeout_secs: default_container_timeout(),
        }
    }
}

impl Settings {
    /// Read settings from `path`, or defaults when no path is given
    pub async fn load(path: Option<&Path>) -> Result<Self, DeployError> {
        let Some(path) = path else {
            debug!("No settings file given, using defaults");
            return Ok(Self::default());
        };
        let raw = fs::read_to_string(path).await.map_err(|e| {
            DeployError::ConfigError(format!("cannot read {}: {}", path.display(), e))
        })?;
        serde_json::from_str(&raw).map_err(|e| {
            DeployError::ConfigError(format!("invalid settings in {}: {}", path.display(), e))
        })
    }

    /// `--settings=<path>` wins over the environment
    pub fn resolve_path(cli_value: Option<&str>) -> Option<PathBuf> {
        cli_value
            .map(PathBuf::from)
            .or_else(|| std::env::var_os(SETTINGS_ENV).map(PathBuf::from))
    }

    pub fn log_options(&self) -> LogOptions {
        LogOptions {
            log_level: self.log_level.clone(),
            json_format: self.log_json,
            log_dir: self.log_dir.clone(),
            ..Default::default()
        }
    }

    pub fn app_options(&self) -> AppOptions {
        AppOptions {
            lifecycle: LifecycleOptions {
                max_shutdown_delay: Duration::from_secs(self.max_shutdown_delay_secs),
            },
            server: ServerOptions {
                host: self.server.host.clone(),
                port: self.server.port,
            },
            pipeline: self.pipeline_options(),
        }
    }

    pub fn pipeline_options(&self) -> PipelineOptions {
        let container_defaults = ContainerOptions::default();
        PipelineOptions {
            layout: WorkLayout::new(self.work_root.clone()),
            analyzer: AnalyzerOptions {
                git_binary: self.git_binary.clone(),
                ..Default::default()
            },
            provision: ProvisionOptions {
                terraform_binary: self.terraform.binary.clone(),
                timeout: Duration::from_secs(self.terraform.timeout_secs),
            },
            remote: RemoteOptions {
                key_poll_attempts: self.remote.key_poll_attempts,
                key_poll_interval: Duration::from_millis(self.remote.key_poll_interval_ms),
                readiness_wait: Duration::from_secs(self.remote.readiness_wait_secs),
                candidate_users: self.remote.candidate_users.clone(),
            },
            ssh: SshOptions {
                ssh_binary: self.remote.ssh_binary.clone(),
                connect_timeout: Duration::from_secs(self.remote.connect_timeout_secs),
                command_timeout: Duration::from_secs(self.remote.command_timeout_secs),
                ..Default::default()
            },
            container: ContainerOptions {
                docker_binary: self.container.docker_binary.clone(),
                aws_binary: self.container.aws_binary.clone(),
                image_name: self.container.image_name.clone(),
                timeout: Duration::from_secs(self.container.timeout_secs),
                ..container_defaults
            },
        }
    }
}
