//! Job models

use chrono::{DateTime, Utc};
use openapi_server::models::{
    DeployResult, JobError, JobLogEntry, JobStatus, JobStatusResponse,
};
use serde::{Deserialize, Serialize};

use crate::deploy::fsm::JobState;
use crate::errors::{DeployError, ErrorKind};

/// Opaque job identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    /// Generate a fresh random id
    pub fn new() -> Self {
        Self(crate::utils::generate_uuid())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<String> for JobId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for JobId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Severity of a job log line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobLogLevel {
    Info,
    Warn,
    Error,
}

impl JobLogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobLogLevel::Info => "info",
            JobLogLevel::Warn => "warn",
            JobLogLevel::Error => "error",
        }
    }
}

/// A timestamped job log line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: JobLogLevel,
    pub message: String,
}

impl LogEntry {
    pub fn new(level: JobLogLevel, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            level,
            message: message.into(),
        }
    }
}

/// What a successful deployment hands back
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployOutcome {
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub public_ip: Option<String>,
}

/// Structured record of why a job failed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobFailure {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&DeployError> for JobFailure {
    fn from(err: &DeployError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

/// Point-in-time copy of a job
#[derive(Debug, Clone)]
pub struct JobSnapshot {
    pub id: JobId,
    pub status: JobState,
    pub logs: Vec<LogEntry>,
    pub result: Option<DeployOutcome>,
    pub error: Option<JobFailure>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<JobSnapshot> for JobStatusResponse {
    fn from(job: JobSnapshot) -> Self {
        let status = match job.status {
            JobState::Running => JobStatus::Running,
            JobState::Succeeded => JobStatus::Succeeded,
            JobState::Failed => JobStatus::Failed,
        };

        JobStatusResponse {
            job_id: job.id.to_string(),
            status,
            logs: job
                .logs
                .into_iter()
                .map(|entry| JobLogEntry {
                    timestamp: entry.timestamp,
                    level: entry.level.as_str().to_string(),
                    message: entry.message,
                })
                .collect(),
            result: job.result.map(|r| DeployResult {
                url: r.url,
                public_ip: r.public_ip,
            }),
            error: job.error.map(|e| JobError {
                kind: e.kind.as_str().to_string(),
                message: e.message,
            }),
            created_at: job.created_at,
            updated_at: job.updated_at,
        }
    }
}
