//! Jobs: the unit a team executes.
//!
//! A job record ([`node::JobNode`]) lives in its thread's arena and is
//! addressed through a [`JobHandle`]. Running a handle drives the state
//! machine in [`container`] under the thread lock.

mod activate;
pub(crate) mod container;
pub mod context;
pub(crate) mod node;
mod state;

pub use activate::JobActivateSet;
pub(crate) use activate::ActivationCollector;
pub use context::{DutyContext, TaskContext};
pub use state::{JobProgress, JobState, Step};

use std::fmt;
use std::sync::Arc;

use tracing::trace;

use crate::arena::ArenaIndex;
use crate::error::Failure;
use crate::execution::ThreadState;
use crate::team::{Job, JobContext};

pub type JobId = ArenaIndex;

/// Stable reference to a job of a thread.
///
/// Handles outlive their job: activating or running a handle whose job
/// has completed (or was abandoned by a thread reset) does nothing.
#[derive(Clone)]
pub struct JobHandle {
    thread: Arc<ThreadState>,
    job: JobId,
}

impl JobHandle {
    pub(crate) fn new(thread: Arc<ThreadState>, job: JobId) -> Self {
        Self { thread, job }
    }

    pub fn id(&self) -> JobId {
        self.job
    }

    pub fn thread(&self) -> &Arc<ThreadState> {
        &self.thread
    }

    /// Whether the job still exists on its thread.
    pub fn is_live(&self) -> bool {
        self.thread.lock().jobs.contains(self.job)
    }

    /// Current state, `None` once the job is gone.
    pub fn state(&self) -> Option<JobState> {
        self.thread.lock().jobs.get(self.job).map(|node| node.state)
    }

    /// Hands the job to its team unless it is already queued. A failure is
    /// escalated on the job's next run.
    pub(crate) fn activate(&self, failure: Option<Failure>) {
        let team = {
            let mut inner = self.thread.lock();
            let Some(node) = inner.jobs.get_mut(self.job) else {
                trace!(job = %self, "activation of completed job ignored");
                return;
            };
            if let Some(failure) = failure {
                node.pending_failure = Some(failure);
            }
            if node.queued {
                return;
            }
            node.queued = true;
            node.meta.team().clone()
        };
        team.assign_job(Arc::new(self.clone()));
    }
}

impl Job for JobHandle {
    fn do_job(&self, context: &JobContext) -> JobProgress {
        let _collector = ActivationCollector::install();
        let mut inner = self.thread.lock();
        container::execute(self, &mut inner, context)
    }

    fn describe(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for JobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let thread = self.thread.id().simple().to_string();
        write!(f, "{}/{}", &thread[..8], self.job)
    }
}

impl fmt::Debug for JobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "JobHandle({self})")
    }
}

/// Activates `job` now, or once the current job's thread lock is released.
pub(crate) fn activate_job(job: JobHandle) {
    let mut set = JobActivateSet::new();
    set.add_job(job, None);
    set.activate_jobs();
}
