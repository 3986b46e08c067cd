use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::runtime::Handle;
use tokio::sync::Semaphore;
use tracing::{trace, warn};

use super::{Job, JobContext, Team};
use crate::clock::Clock;

/// Runs jobs on tokio's blocking pool, at most `size` at a time.
pub struct WorkerPoolTeam {
    name: String,
    clock: Arc<dyn Clock>,
    runtime: Handle,
    permits: Arc<Semaphore>,
    size: usize,
    stopped: AtomicBool,
}

impl WorkerPoolTeam {
    pub fn new(name: impl Into<String>, size: usize, clock: Arc<dyn Clock>, runtime: Handle) -> Self {
        let size = size.max(1);
        Self {
            name: name.into(),
            clock,
            runtime,
            permits: Arc::new(Semaphore::new(size)),
            size,
            stopped: AtomicBool::new(false),
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Jobs that could start right now without waiting for a worker.
    pub fn idle_workers(&self) -> usize {
        self.permits.available_permits()
    }
}

impl Team for WorkerPoolTeam {
    fn name(&self) -> &str {
        &self.name
    }

    fn assign_job(&self, job: Arc<dyn Job>) {
        if self.stopped.load(Ordering::Acquire) {
            warn!(team = %self.name, job = %job.describe(), "team has stopped, job dropped");
            return;
        }
        let permits = self.permits.clone();
        let clock = self.clock.clone();
        let name = self.name.clone();
        self.runtime.spawn(async move {
            let Ok(permit) = permits.acquire_owned().await else {
                warn!(team = %name, job = %job.describe(), "team has stopped, job dropped");
                return;
            };
            let ran = tokio::task::spawn_blocking(move || {
                let _permit = permit;
                trace!(team = %name, job = %job.describe(), "worker picked up job");
                job.do_job(&JobContext::from_clock(clock.as_ref()))
            })
            .await;
            if let Err(err) = ran {
                warn!(%err, "worker panicked running job");
            }
        });
    }

    fn stop_working(&self) {
        self.stopped.store(true, Ordering::Release);
        self.permits.close();
    }
}
