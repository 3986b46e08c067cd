//! Teams run jobs.
//!
//! A [`Team`] decides which OS thread executes a [`Job`]: inline on the
//! caller ([`PassiveTeam`]), on one dedicated thread ([`OnePersonTeam`]) or on
//! tokio's blocking pool ([`WorkerPoolTeam`]).

mod one_person;
mod passive;
mod worker_pool;

pub use one_person::OnePersonTeam;
pub use passive::PassiveTeam;
pub use worker_pool::WorkerPoolTeam;

use std::sync::Arc;

use crate::clock::Clock;
use crate::job::JobProgress;

/// Context for a single `do_job` invocation.
#[derive(Debug, Clone, Copy)]
pub struct JobContext {
    time: u64,
}

impl JobContext {
    pub fn new(time: u64) -> Self {
        Self { time }
    }

    pub fn from_clock(clock: &dyn Clock) -> Self {
        Self::new(clock.time_millis())
    }

    /// Time the invocation started, in clock millis.
    pub fn time(&self) -> u64 {
        self.time
    }
}

/// Unit of work handed to a team.
pub trait Job: Send + Sync {
    fn do_job(&self, context: &JobContext) -> JobProgress;

    fn describe(&self) -> String;
}

pub trait Team: Send + Sync {
    fn name(&self) -> &str;

    fn start_working(&self) {}

    fn assign_job(&self, job: Arc<dyn Job>);

    fn stop_working(&self) {}

    /// Whether [`assign_job`](Self::assign_job) runs the job before returning
    /// (modulo trampolining of nested assignments). Informational: the
    /// runtime learns about inline completion by walking the job tree.
    fn executes_synchronously(&self) -> bool {
        false
    }
}

impl std::fmt::Debug for dyn Team {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Team({})", self.name())
    }
}
