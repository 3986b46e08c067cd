//! Deferred job activation.
//!
//! Waking a job means taking its thread lock. When the wake-up is raised
//! from inside another job's `do_job` (the thread lock is held, possibly of
//! the very thread being woken), activations are parked in the collector
//! installed for that invocation and fired once its thread lock is
//! released.

use std::cell::RefCell;

use super::JobHandle;
use crate::error::Failure;

type Activation = (JobHandle, Option<Failure>);

thread_local! {
    static COLLECTORS: RefCell<Vec<Vec<Activation>>> = const { RefCell::new(Vec::new()) };
}

/// Jobs to activate once the triggering operation has finished.
#[derive(Default)]
pub struct JobActivateSet {
    activations: Vec<Activation>,
}

impl JobActivateSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_job(&mut self, job: JobHandle, failure: Option<Failure>) {
        self.activations.push((job, failure));
    }

    pub fn is_empty(&self) -> bool {
        self.activations.is_empty()
    }

    pub fn len(&self) -> usize {
        self.activations.len()
    }

    /// Activates the collected jobs, or hands them to the enclosing
    /// `do_job` on this OS thread if there is one.
    pub fn activate_jobs(self) {
        if self.activations.is_empty() {
            return;
        }
        let leftover = COLLECTORS.with(|collectors| {
            let mut collectors = collectors.borrow_mut();
            match collectors.last_mut() {
                Some(collector) => {
                    collector.extend(self.activations);
                    None
                }
                None => Some(self.activations),
            }
        });
        if let Some(activations) = leftover {
            fire(activations);
        }
    }
}

fn fire(activations: Vec<Activation>) {
    for (job, failure) in activations {
        job.activate(failure);
    }
}

/// Collects activations for the duration of one `do_job`.
///
/// Must be created before the thread lock is taken so that it is dropped
/// after the lock guard.
pub(crate) struct ActivationCollector {
    depth: usize,
}

impl ActivationCollector {
    pub(crate) fn install() -> Self {
        let depth = COLLECTORS.with(|collectors| {
            let mut collectors = collectors.borrow_mut();
            collectors.push(Vec::new());
            collectors.len()
        });
        Self { depth }
    }
}

impl Drop for ActivationCollector {
    fn drop(&mut self) {
        let collected = COLLECTORS.with(|collectors| {
            let mut collectors = collectors.borrow_mut();
            if collectors.len() == self.depth {
                collectors.pop()
            } else {
                None
            }
        });
        if let Some(activations) = collected {
            fire(activations);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::PassiveFixture;

    #[test]
    fn activations_fire_at_once_outside_a_job() {
        let fixture = PassiveFixture::new();
        let mut set = JobActivateSet::new();
        set.add_job(fixture.suspended_job(), None);
        assert_eq!(set.len(), 1);

        set.activate_jobs();
        assert_eq!(fixture.executions(), 1);
    }

    #[test]
    fn collector_holds_activations_until_dropped() {
        let fixture = PassiveFixture::new();
        let collector = ActivationCollector::install();

        let mut set = JobActivateSet::new();
        set.add_job(fixture.suspended_job(), None);
        set.activate_jobs();
        assert_eq!(fixture.executions(), 0);

        drop(collector);
        assert_eq!(fixture.executions(), 1);
    }

    #[test]
    fn failure_is_escalated_when_the_job_runs() {
        let fixture = PassiveFixture::new();
        let mut set = JobActivateSet::new();
        set.add_job(fixture.suspended_job(), Some(Failure::msg("monitor failed")));
        set.activate_jobs();

        let escalated = fixture.last_escalation().map(|failure| failure.to_string());
        assert_eq!(escalated.as_deref(), Some("monitor failed"));
        assert_eq!(fixture.executions(), 0);
    }

    #[test]
    fn empty_set_is_a_no_op() {
        let set = JobActivateSet::new();
        assert!(set.is_empty());
        set.activate_jobs();
    }
}
