//! Finite State Machine for job status

use serde::{Deserialize, Serialize};

use crate::models::job::{DeployOutcome, JobFailure};

/// Job state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    /// Pipeline in progress
    Running,

    /// Deploy driver returned a result
    Succeeded,

    /// A fatal error stopped the pipeline
    Failed,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobState::Running)
    }
}

/// Job event
#[derive(Debug, Clone)]
pub enum JobEvent {
    /// Deployment finished
    Succeed(DeployOutcome),

    /// Deployment failed
    Fail(JobFailure),
}

/// Job FSM. `Running` is the only non-terminal state and each job makes
/// exactly one forward transition out of it.
#[derive(Debug, Clone)]
pub struct JobFsm {
    state: JobState,
    result: Option<DeployOutcome>,
    error: Option<JobFailure>,
}

impl JobFsm {
    /// Create a new FSM in running state
    pub fn new() -> Self {
        Self {
            state: JobState::Running,
            result: None,
            error: None,
        }
    }

    /// Get current state
    pub fn state(&self) -> JobState {
        self.state
    }

    /// Get the deployment result if succeeded
    pub fn result(&self) -> Option<&DeployOutcome> {
        self.result.as_ref()
    }

    /// Get the failure if failed
    pub fn error(&self) -> Option<&JobFailure> {
        self.error.as_ref()
    }

    /// Process an event and transition state
    pub fn process(&mut self, event: JobEvent) -> Result<(), String> {
        match (self.state, event) {
            (JobState::Running, JobEvent::Succeed(outcome)) => {
                self.result = Some(outcome);
                self.state = JobState::Succeeded;
            }
            (JobState::Running, JobEvent::Fail(failure)) => {
                self.error = Some(failure);
                self.state = JobState::Failed;
            }

            // Terminal states never re-enter
            (state, event) => {
                return Err(format!("Invalid transition: {:?} -> {:?}", state, event));
            }
        }

        Ok(())
    }
}

impl Default for JobFsm {
    fn default() -> Self {
        Self::new()
    }
}
