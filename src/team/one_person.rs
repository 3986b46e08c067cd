use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::Mutex;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, warn};

use super::{Job, JobContext, Team};
use crate::clock::Clock;

/// One dedicated OS thread working through assigned jobs in order.
pub struct OnePersonTeam {
    name: String,
    clock: Arc<dyn Clock>,
    sender: Mutex<Option<UnboundedSender<Arc<dyn Job>>>>,
    receiver: Mutex<Option<UnboundedReceiver<Arc<dyn Job>>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl OnePersonTeam {
    pub fn new(name: impl Into<String>, clock: Arc<dyn Clock>) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            name: name.into(),
            clock,
            sender: Mutex::new(Some(sender)),
            receiver: Mutex::new(Some(receiver)),
            worker: Mutex::new(None),
        }
    }
}

impl Team for OnePersonTeam {
    fn name(&self) -> &str {
        &self.name
    }

    fn start_working(&self) {
        let Some(mut receiver) = self.receiver.lock().take() else {
            return;
        };
        let clock = self.clock.clone();
        let name = self.name.clone();
        let spawned = std::thread::Builder::new()
            .name(format!("team-{name}"))
            .spawn(move || {
                while let Some(job) = receiver.blocking_recv() {
                    job.do_job(&JobContext::from_clock(clock.as_ref()));
                }
                debug!(team = %name, "one person team finished");
            });
        match spawned {
            Ok(handle) => *self.worker.lock() = Some(handle),
            Err(err) => warn!(team = %self.name, %err, "failed to start team thread"),
        }
    }

    fn assign_job(&self, job: Arc<dyn Job>) {
        let sender = self.sender.lock();
        match sender.as_ref() {
            Some(sender) => {
                if sender.send(job).is_err() {
                    warn!(team = %self.name, "team has stopped, job dropped");
                }
            }
            None => warn!(team = %self.name, job = %job.describe(), "team has stopped, job dropped"),
        }
    }

    fn stop_working(&self) {
        self.sender.lock().take();
        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            if worker.join().is_err() {
                warn!(team = %self.name, "team thread panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::job::JobProgress;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Count(Arc<AtomicUsize>);

    impl Job for Count {
        fn do_job(&self, _context: &JobContext) -> JobProgress {
            self.0.fetch_add(1, Ordering::SeqCst);
            JobProgress::Complete
        }

        fn describe(&self) -> String {
            "count".into()
        }
    }

    #[test]
    fn runs_jobs_queued_before_and_after_start() {
        let team = OnePersonTeam::new("one", Arc::new(ManualClock::new(0)));
        let count = Arc::new(AtomicUsize::new(0));

        team.assign_job(Arc::new(Count(count.clone())));
        team.start_working();
        team.assign_job(Arc::new(Count(count.clone())));
        team.stop_working();

        assert_eq!(count.load(Ordering::SeqCst), 2);
    }
}
