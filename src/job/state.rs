use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::Failure;

/// States of the job state machine.
///
/// A job flows through:
/// LOAD_MANAGED_OBJECTS → ENSURE_MANAGED_OBJECTS_LOADED →
/// [DO_PRE_TASK_ADMINISTRATION →] EXECUTE_JOB → ACTIVATE_PARALLEL_JOB →
/// [DO_POST_TASK_ADMINISTRATION →] ACTIVATE_NEXT_JOB_IN_FLOW → COMPLETED
///
/// `Failed` and `HandlingFailure` branch off from any of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobState {
    LoadManagedObjects,
    EnsureManagedObjectsLoaded,
    DoPreTaskAdministration,
    ExecuteJob,
    ActivateParallelJob,
    DoPostTaskAdministration,
    ActivateNextJobInFlow,
    Completed,
    Failed,
    HandlingFailure,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        self == JobState::Completed
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobState::LoadManagedObjects => write!(f, "LOAD_MANAGED_OBJECTS"),
            JobState::EnsureManagedObjectsLoaded => write!(f, "ENSURE_MANAGED_OBJECTS_LOADED"),
            JobState::DoPreTaskAdministration => write!(f, "DO_PRE_TASK_ADMINISTRATION"),
            JobState::ExecuteJob => write!(f, "EXECUTE_JOB"),
            JobState::ActivateParallelJob => write!(f, "ACTIVATE_PARALLEL_JOB"),
            JobState::DoPostTaskAdministration => write!(f, "DO_POST_TASK_ADMINISTRATION"),
            JobState::ActivateNextJobInFlow => write!(f, "ACTIVATE_NEXT_JOB_IN_FLOW"),
            JobState::Completed => write!(f, "COMPLETED"),
            JobState::Failed => write!(f, "FAILED"),
            JobState::HandlingFailure => write!(f, "HANDLING_FAILURE"),
        }
    }
}

/// Result of running a single state of the machine.
#[derive(Debug)]
pub enum Step {
    /// Fall through to the next state within the same invocation.
    Advance(JobState),
    /// Give the worker back; something else re-activates the job.
    Suspend,
    /// Job (and its subtree) is done.
    Complete,
    Fail(Failure),
}

/// What `do_job` reports back to the team.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobProgress {
    Complete,
    /// Parked on an asset, a flow or its parallel jobs. The team must not
    /// re-queue it.
    Suspended,
}
