use std::cell::RefCell;
use std::collections::VecDeque;
use std::sync::Arc;

use tracing::{trace, warn};

use super::{Job, JobContext, Team};
use crate::clock::Clock;

type Queued = (Arc<dyn Job>, Arc<dyn Clock>);

thread_local! {
    static TRAMPOLINE: RefCell<Option<VecDeque<Queued>>> = const { RefCell::new(None) };
}

/// Clears the trampoline when the outermost assignment ends, including by
/// unwinding, so a panicking job cannot leave later assignments queued
/// forever.
struct Draining;

impl Drop for Draining {
    fn drop(&mut self) {
        let abandoned = TRAMPOLINE.with(|trampoline| trampoline.borrow_mut().take().map_or(0, |queue| queue.len()));
        if abandoned > 0 {
            warn!(abandoned, "passive team unwound with jobs still queued");
        }
    }
}

/// Runs jobs on the thread that assigns them.
///
/// Assignments made while a passive job is already running on this OS
/// thread are queued and drained by the outermost call, so chains of jobs
/// run depth-first in order without growing the stack.
pub struct PassiveTeam {
    name: String,
    clock: Arc<dyn Clock>,
}

impl PassiveTeam {
    pub fn new(name: impl Into<String>, clock: Arc<dyn Clock>) -> Self {
        Self {
            name: name.into(),
            clock,
        }
    }
}

impl Team for PassiveTeam {
    fn name(&self) -> &str {
        &self.name
    }

    fn assign_job(&self, job: Arc<dyn Job>) {
        let entry = (job, self.clock.clone());
        let entry = TRAMPOLINE.with(|trampoline| {
            let mut trampoline = trampoline.borrow_mut();
            match trampoline.as_mut() {
                Some(queue) => {
                    trace!(job = %entry.0.describe(), "queued on running passive team");
                    queue.push_back(entry);
                    None
                }
                None => {
                    *trampoline = Some(VecDeque::new());
                    Some(entry)
                }
            }
        });
        let Some(mut current) = entry else {
            return;
        };
        let _draining = Draining;

        loop {
            let (job, clock) = current;
            job.do_job(&JobContext::from_clock(clock.as_ref()));

            let next = TRAMPOLINE.with(|trampoline| trampoline.borrow_mut().as_mut().and_then(VecDeque::pop_front));
            match next {
                Some(queued) => current = queued,
                None => break,
            }
        }
    }

    fn executes_synchronously(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::job::JobProgress;
    use parking_lot::Mutex;

    struct Recorder {
        name: &'static str,
        log: Arc<Mutex<Vec<String>>>,
        spawn: Vec<Arc<dyn Job>>,
        team: Arc<PassiveTeam>,
    }

    impl Job for Recorder {
        fn do_job(&self, _context: &JobContext) -> JobProgress {
            self.log.lock().push(format!("start {}", self.name));
            for job in &self.spawn {
                self.team.assign_job(job.clone());
            }
            self.log.lock().push(format!("end {}", self.name));
            JobProgress::Complete
        }

        fn describe(&self) -> String {
            self.name.to_string()
        }
    }

    #[test]
    fn nested_assignments_run_after_current_job() {
        let team = Arc::new(PassiveTeam::new("passive", Arc::new(ManualClock::new(0))));
        let log = Arc::new(Mutex::new(Vec::new()));
        let child = |name| -> Arc<dyn Job> {
            Arc::new(Recorder {
                name,
                log: log.clone(),
                spawn: Vec::new(),
                team: team.clone(),
            })
        };
        let parent = Recorder {
            name: "parent",
            log: log.clone(),
            spawn: vec![child("a"), child("b")],
            team: team.clone(),
        };

        team.assign_job(Arc::new(parent));

        assert_eq!(
            *log.lock(),
            vec!["start parent", "end parent", "start a", "end a", "start b", "end b"]
        );
        assert!(team.executes_synchronously());
    }

    struct Exploding;

    impl Job for Exploding {
        fn do_job(&self, _context: &JobContext) -> JobProgress {
            panic!("job exploded");
        }

        fn describe(&self) -> String {
            "exploding".into()
        }
    }

    #[test]
    fn team_keeps_running_after_a_job_unwinds() {
        let team = Arc::new(PassiveTeam::new("passive", Arc::new(ManualClock::new(0))));
        let log = Arc::new(Mutex::new(Vec::new()));

        let unwound = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| team.assign_job(Arc::new(Exploding))));
        assert!(unwound.is_err());

        team.assign_job(Arc::new(Recorder {
            name: "after",
            log: log.clone(),
            spawn: Vec::new(),
            team: team.clone(),
        }));
        assert_eq!(*log.lock(), vec!["start after", "end after"]);
    }
}
