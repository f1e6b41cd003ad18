//! In-memory job registry
//!
//! Process-wide, constructed once at startup and dropped on shutdown. Jobs
//! are never evicted and are lost on restart.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use chrono::{DateTime, Utc};
use tracing::{error, info, warn};

use crate::deploy::fsm::{JobEvent, JobFsm, JobState};
use crate::errors::DeployError;
use crate::models::job::{
    DeployOutcome, JobFailure, JobId, JobLogLevel, JobSnapshot, LogEntry,
};

/// Mutable per-job record
#[derive(Debug)]
struct JobRecord {
    fsm: JobFsm,
    logs: Vec<LogEntry>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl JobRecord {
    fn new() -> Self {
        let now = Utc::now();
        Self {
            fsm: JobFsm::new(),
            logs: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    fn snapshot(&self, id: &JobId) -> JobSnapshot {
        JobSnapshot {
            id: id.clone(),
            status: self.fsm.state(),
            logs: self.logs.clone(),
            result: self.fsm.result().cloned(),
            error: self.fsm.error().cloned(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// Registry of all jobs. The map lock is only held to look up or insert a
/// job; log appends and status changes lock that job alone.
#[derive(Debug, Default)]
pub struct JobRegistry {
    jobs: RwLock<HashMap<JobId, Arc<Mutex<JobRecord>>>>,
}

impl JobRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, id: &JobId) -> Option<Arc<Mutex<JobRecord>>> {
        let jobs = self.jobs.read().unwrap_or_else(|e| e.into_inner());
        jobs.get(id).cloned()
    }

    /// Register a new job in `running` state. Fails if the id is taken.
    pub fn create(&self, id: &JobId) -> Result<(), DeployError> {
        let mut jobs = self.jobs.write().unwrap_or_else(|e| e.into_inner());
        if jobs.contains_key(id) {
            return Err(DeployError::Internal(format!("job {} already exists", id)));
        }
        jobs.insert(id.clone(), Arc::new(Mutex::new(JobRecord::new())));
        Ok(())
    }

    /// Append a log line to a job. Unknown ids are ignored.
    pub fn append_log(&self, id: &JobId, level: JobLogLevel, message: impl Into<String>) {
        let message = message.into();
        match level {
            JobLogLevel::Info => info!(job_id = %id, "{}", message),
            JobLogLevel::Warn => warn!(job_id = %id, "{}", message),
            JobLogLevel::Error => error!(job_id = %id, "{}", message),
        }

        let Some(record) = self.record(id) else {
            warn!(job_id = %id, "Log line for unknown job dropped");
            return;
        };
        let mut record = record.lock().unwrap_or_else(|e| e.into_inner());
        record.logs.push(LogEntry::new(level, message));
        record.updated_at = Utc::now();
    }

    /// Convenience for `append_log(id, Info, ..)`
    pub fn log(&self, id: &JobId, message: impl Into<String>) {
        self.append_log(id, JobLogLevel::Info, message);
    }

    /// Convenience for `append_log(id, Warn, ..)`
    pub fn warn(&self, id: &JobId, message: impl Into<String>) {
        self.append_log(id, JobLogLevel::Warn, message);
    }

    /// Get a snapshot of a job
    pub fn get(&self, id: &JobId) -> Option<JobSnapshot> {
        let record = self.record(id)?;
        let record = record.lock().unwrap_or_else(|e| e.into_inner());
        Some(record.snapshot(id))
    }

    /// Current status of a job
    pub fn status(&self, id: &JobId) -> Option<JobState> {
        let record = self.record(id)?;
        let record = record.lock().unwrap_or_else(|e| e.into_inner());
        Some(record.fsm.state())
    }

    /// Apply a terminal status transition
    pub fn set_status(&self, id: &JobId, event: JobEvent) -> Result<JobState, DeployError> {
        let record = self
            .record(id)
            .ok_or_else(|| DeployError::NotFound(format!("job {}", id)))?;
        let mut record = record.lock().unwrap_or_else(|e| e.into_inner());
        record
            .fsm
            .process(event)
            .map_err(DeployError::InvalidTransition)?;
        record.updated_at = Utc::now();
        Ok(record.fsm.state())
    }

    /// Mark a job succeeded
    pub fn succeed(&self, id: &JobId, outcome: DeployOutcome) -> Result<(), DeployError> {
        let url = outcome.url.clone();
        self.set_status(id, JobEvent::Succeed(outcome))?;
        self.log(id, format!("Deployment complete: {}", url));
        Ok(())
    }

    /// Mark a job failed; the error text goes into the log verbatim
    pub fn fail(&self, id: &JobId, err: &DeployError) -> Result<(), DeployError> {
        self.set_status(id, JobEvent::Fail(JobFailure::from(err)))?;
        self.append_log(id, JobLogLevel::Error, err.to_string());
        Ok(())
    }

    /// Number of registered jobs
    pub fn len(&self) -> usize {
        let jobs = self.jobs.read().unwrap_or_else(|e| e.into_inner());
        jobs.len()
    }

    /// Check if registry is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
