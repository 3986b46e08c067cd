//! The job state machine.
//!
//! [`execute`] runs under the thread lock. Each state either advances to
//! the next one within the same invocation, suspends (the job is parked on
//! a monitor, a flow or its parallel jobs, and will be activated again),
//! completes, or fails into escalation.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use tracing::{debug, trace, warn};

use super::context::{DutyContext, JobScope, TaskContext};
use super::node::{self, NewJob, is_parallel_job_not_complete};
use super::{JobHandle, JobId, JobProgress, JobState, Step, activate_job};
use crate::administrator::DutyKey;
use crate::error::{ExecutionError, Failure};
use crate::escalation::{EscalationFocus, EscalationOutcome};
use crate::execution::{self, ThreadInner, ThreadState, WorkContainer};
use crate::managed_object::ManagedObjectContainer;
use crate::meta::{FlowMetaData, JobMetaData, Parameter, TaskDutyAssociation};
use crate::team::JobContext;

pub(crate) fn execute(handle: &JobHandle, inner: &mut ThreadInner, context: &JobContext) -> JobProgress {
    let id = handle.id();
    let (state, pending) = match inner.jobs.get_mut(id) {
        Some(node) => {
            node.queued = false;
            node.activated = true;
            (node.state, node.pending_failure.take())
        }
        None => return JobProgress::Complete,
    };

    let mut execution = Execution {
        handle,
        thread: handle.thread(),
        inner,
        id,
        time: context.time(),
    };
    let mut step = match pending {
        Some(failure) => Step::Fail(failure),
        None => execution.run(state),
    };
    loop {
        match step {
            Step::Advance(next) => {
                trace!(job = %handle, state = %next, "advancing");
                if let Some(node) = execution.inner.jobs.get_mut(id) {
                    node.state = next;
                }
                step = execution.run(next);
            }
            Step::Suspend => return JobProgress::Suspended,
            Step::Complete => {
                complete_job(execution.thread, execution.inner, id);
                return JobProgress::Complete;
            }
            Step::Fail(failure) => step = execution.escalate(failure),
        }
    }
}

/// Removes a job from its flow and work. Idempotent.
pub(crate) fn complete_job(thread: &ThreadState, inner: &mut ThreadInner, id: JobId) {
    let Some(node) = inner.jobs.remove(id) else {
        return;
    };
    debug!(job = %id, task = node.meta.name(), "job complete");
    thread.process().record_job_completed();

    let release_link = match inner.work_links.get_mut(node.work_link) {
        Some(link) => {
            link.jobs = link.jobs.saturating_sub(1);
            link.jobs == 0
        }
        None => false,
    };
    if release_link {
        if let Some(link) = inner.work_links.remove_entry(node.work_link) {
            link.work.release();
        }
    }

    let flow_done = match inner.flows.get_mut(node.flow) {
        Some(flow) => {
            flow.active_jobs = flow.active_jobs.saturating_sub(1);
            flow.active_jobs == 0
        }
        None => false,
    };
    if flow_done {
        if let Some(flow) = inner.flows.remove_entry(node.flow) {
            flow.monitor.notify_tasks();
        }
        if inner.flows.is_empty() {
            thread.complete(inner);
        }
    }
}

/// Runs user code; a panic becomes a failure of `name` instead of
/// unwinding through the team.
fn guarded(name: &str, body: impl FnOnce() -> anyhow::Result<()>) -> Result<(), Failure> {
    match panic::catch_unwind(AssertUnwindSafe(body)) {
        Ok(result) => result.map_err(Failure::from),
        Err(payload) => {
            warn!(name, "panic caught");
            Err(ExecutionError::panicked(name, payload).into())
        }
    }
}

struct Execution<'a> {
    handle: &'a JobHandle,
    thread: &'a Arc<ThreadState>,
    inner: &'a mut ThreadInner,
    id: JobId,
    time: u64,
}

impl Execution<'_> {
    fn run(&mut self, state: JobState) -> Step {
        match state {
            JobState::LoadManagedObjects => self.load_managed_objects(),
            JobState::EnsureManagedObjectsLoaded => self.ensure_managed_objects_loaded(),
            JobState::DoPreTaskAdministration => self.administer(JobState::DoPreTaskAdministration),
            JobState::ExecuteJob => self.execute_job(),
            JobState::ActivateParallelJob | JobState::HandlingFailure | JobState::Failed => {
                self.activate_parallel_job(state)
            }
            JobState::DoPostTaskAdministration => self.administer(JobState::DoPostTaskAdministration),
            JobState::ActivateNextJobInFlow => self.activate_next_job_in_flow(),
            JobState::Completed => Step::Complete,
        }
    }

    fn meta_and_work(&self) -> Option<(JobMetaData, Arc<WorkContainer>)> {
        self.inner
            .jobs
            .get(self.id)
            .map(|node| (node.meta.clone(), node.work.clone()))
    }

    fn required(&self, meta: &JobMetaData, work: &WorkContainer) -> Result<Vec<Arc<ManagedObjectContainer>>, Failure> {
        meta.required_managed_objects()
            .iter()
            .map(|index| execution::managed_object(self.thread, work, *index))
            .collect()
    }

    fn load_managed_objects(&mut self) -> Step {
        let Some((meta, work)) = self.meta_and_work() else {
            return Step::Complete;
        };
        let containers = match self.required(&meta, &work) {
            Ok(containers) => containers,
            Err(failure) => return Step::Fail(failure),
        };
        for container in &containers {
            container.load();
        }
        Step::Advance(JobState::EnsureManagedObjectsLoaded)
    }

    fn ensure_managed_objects_loaded(&mut self) -> Step {
        let Some((meta, work)) = self.meta_and_work() else {
            return Step::Complete;
        };
        match self.ensure_ready(&meta, &work) {
            Ok(true) if meta.pre_duties().is_empty() => Step::Advance(JobState::ExecuteJob),
            Ok(true) => Step::Advance(JobState::DoPreTaskAdministration),
            Ok(false) => Step::Suspend,
            Err(failure) => Step::Fail(failure),
        }
    }

    fn ensure_ready(&self, meta: &JobMetaData, work: &WorkContainer) -> Result<bool, Failure> {
        let containers = self.required(meta, work)?;
        for container in &containers {
            if !container.is_loaded(self.handle)? {
                return Ok(false);
            }
        }
        for container in &containers {
            if !self.ensure_coordinated(container, work, &mut Vec::new())? {
                return Ok(false);
            }
        }
        for container in &containers {
            if !container.is_managed_object_ready(self.handle, self.time)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Loads and readies the dependencies of a loaded `container`
    /// (depth first), then coordinates it. `Ok(false)` parks the job on the
    /// first dependency still outstanding.
    fn ensure_coordinated(
        &self,
        container: &Arc<ManagedObjectContainer>,
        work: &WorkContainer,
        visiting: &mut Vec<Arc<ManagedObjectContainer>>,
    ) -> Result<bool, Failure> {
        let dependencies = container
            .meta()
            .dependencies
            .iter()
            .map(|index| execution::managed_object(self.thread, work, *index))
            .collect::<Result<Vec<_>, _>>()?;
        visiting.push(container.clone());
        for dependency in &dependencies {
            // A dependency cycle is coordinated by its outermost member.
            if visiting.iter().any(|seen| Arc::ptr_eq(seen, dependency)) {
                continue;
            }
            dependency.load();
            if !dependency.is_loaded(self.handle)? {
                return Ok(false);
            }
            if !self.ensure_coordinated(dependency, work, visiting)? {
                return Ok(false);
            }
            if !dependency.is_managed_object_ready(self.handle, self.time)? {
                return Ok(false);
            }
        }
        container.coordinate(&dependencies)?;
        Ok(true)
    }

    fn administer(&mut self, stage: JobState) -> Step {
        let Some((meta, work)) = self.meta_and_work() else {
            return Step::Complete;
        };
        let (duties, next) = match stage {
            JobState::DoPreTaskAdministration => (meta.pre_duties().to_vec(), JobState::ExecuteJob),
            _ => (meta.post_duties().to_vec(), JobState::ActivateNextJobInFlow),
        };
        for duty in duties {
            if let Err(failure) = self.run_duty(duty, &work) {
                return Step::Fail(failure);
            }
        }
        Step::Advance(next)
    }

    fn run_duty(&mut self, association: TaskDutyAssociation, work: &Arc<WorkContainer>) -> Result<(), Failure> {
        let container = execution::administrator(self.thread, work, association.administrator)?;
        let administrator = container.administrator()?;
        let admin_meta = container.meta().clone();
        let extensions = admin_meta
            .administered
            .iter()
            .map(|index| execution::managed_object(self.thread, work, *index))
            .collect::<Result<Vec<_>, _>>()?;

        let parameter = self.parameter();
        let mut context = DutyContext::new(
            JobScope::new(self.handle, &mut *self.inner, work, parameter, self.time),
            &admin_meta,
            association.duty,
            extensions,
        );
        guarded(&admin_meta.name, || administrator.do_duty(DutyKey(association.duty), &mut context))
    }

    fn parameter(&self) -> Option<Parameter> {
        self.inner.jobs.get(self.id).and_then(|node| node.parameter.clone())
    }

    fn execute_job(&mut self) -> Step {
        let Some((meta, work)) = self.meta_and_work() else {
            return Step::Complete;
        };
        debug!(job = %self.handle, task = meta.name(), "executing");

        let outcome = match &meta {
            JobMetaData::Task(task) => {
                let objects = match self.required(&meta, &work) {
                    Ok(objects) => objects,
                    Err(failure) => return Step::Fail(failure),
                };
                let parameter = self.parameter();
                let mut context = TaskContext::new(
                    JobScope::new(self.handle, &mut *self.inner, &work, parameter, self.time),
                    task,
                    objects,
                );
                let result = guarded(&task.name, || (task.body)(&mut context));
                let (joins, next_parameter) = context.into_outcome();
                result.map(|()| (joins, next_parameter))
            }
            JobMetaData::Duty(duty) => self.run_duty(duty.duty, &work).map(|()| (Vec::new(), None)),
        };
        let (joins, next_parameter) = match outcome {
            Ok(outcome) => outcome,
            Err(failure) => return Step::Fail(failure),
        };

        if let Some(node) = self.inner.jobs.get_mut(self.id) {
            node.next_parameter = next_parameter;
            node.joins = joins;
        }
        Step::Advance(JobState::ActivateParallelJob)
    }

    /// Waits for joined flows, then for the parallel chain, activating its
    /// head the first time.
    fn activate_parallel_job(&mut self, state: JobState) -> Step {
        let Some(node) = self.inner.jobs.get(self.id) else {
            return Step::Complete;
        };
        for monitor in &node.joins {
            match monitor.wait(self.handle) {
                Ok(true) => {}
                Ok(false) => return Step::Suspend,
                Err(failure) => return Step::Fail(failure),
            }
        }
        let after = if state == JobState::ActivateParallelJob && !node.meta.post_duties().is_empty() {
            JobState::DoPostTaskAdministration
        } else {
            JobState::ActivateNextJobInFlow
        };

        if let Some(parallel) = node.parallel_node {
            if is_parallel_job_not_complete(&self.inner.jobs, parallel) {
                self.activate_once(parallel);
                return Step::Suspend;
            }
        }
        if let Some(node) = self.inner.jobs.get_mut(self.id) {
            node.parallel_node = None;
            node.joins.clear();
        }
        Step::Advance(after)
    }

    fn activate_once(&mut self, job: JobId) {
        let Some(node) = self.inner.jobs.get_mut(job) else {
            return;
        };
        if node.activated {
            return;
        }
        node.activated = true;
        activate_job(JobHandle::new(self.thread.clone(), job));
    }

    fn activate_next_job_in_flow(&mut self) -> Step {
        let Some(node) = self.inner.jobs.get_mut(self.id) else {
            return Step::Complete;
        };
        if !node.sequential_instigated {
            if let Some(next) = node.meta.next_job().cloned() {
                let parameter = node.next_parameter.take();
                node::instigate_sequential(self.thread, self.inner, self.id, next, parameter);
            }
        }

        let Some(node) = self.inner.jobs.get(self.id) else {
            return Step::Complete;
        };
        let (next, owner) = (node.next_node, node.parallel_owner);
        match (next, owner) {
            (Some(next), owner) => {
                if let Some(owner) = owner.and_then(|owner| self.inner.jobs.get_mut(owner)) {
                    if owner.parallel_node == Some(self.id) {
                        owner.parallel_node = Some(next);
                    }
                }
                self.activate_once(next);
            }
            (None, Some(owner)) => {
                if let Some(owner_node) = self.inner.jobs.get_mut(owner) {
                    if owner_node.parallel_node == Some(self.id) {
                        owner_node.parallel_node = None;
                    }
                }
                activate_job(JobHandle::new(self.thread.clone(), owner));
            }
            (None, None) => {}
        }
        Step::Complete
    }

    /// Routes `failure` to the first matching escalation level.
    fn escalate(&mut self, failure: Failure) -> Step {
        let cause = failure.escalation_cause();
        let Some(node) = self.inner.jobs.get_mut(self.id) else {
            return Step::Complete;
        };
        node.state = JobState::Failed;
        node.joins.clear();
        let focus = node.focus.clone();
        let meta = node.meta.clone();
        let work = node.work.clone();
        warn!(job = %self.handle, task = meta.name(), %cause, "job failed, escalating");

        let process = self.thread.process().clone();
        let outcome = focus.escalate(
            &cause,
            meta.escalation_procedure(),
            process.meta().escalation_procedure.as_ref(),
        );
        match outcome {
            EscalationOutcome::Handled {
                level,
                handler_focus,
            } => {
                process.record_escalation_handled();
                debug!(
                    job = %self.handle,
                    cause_type = level.type_of_cause.name(),
                    reset = level.reset_thread_state,
                    "escalation handled"
                );
                if level.reset_thread_state {
                    self.reset_thread(&level.flow, cause, handler_focus, work);
                    return Step::Complete;
                }
                let mut handler = NewJob::new(level.flow.initial_job.clone(), Some(Arc::new(cause) as Parameter))
                    .with_work(Some(work));
                handler.focus = handler_focus;
                node::instigate_parallel(self.thread, self.inner, self.id, handler);
            }
            EscalationOutcome::Unhandled => {
                process.record_unhandled_failure();
                process.office().catch_all().handle_escalation(&cause);
            }
        }

        if let Some(node) = self.inner.jobs.get_mut(self.id) {
            node.sequential_instigated = true;
        }
        Step::Advance(JobState::HandlingFailure)
    }

    /// Abandons every job and flow of the thread and starts `flow` as the
    /// thread's only flow.
    fn reset_thread(&mut self, flow: &Arc<FlowMetaData>, cause: Failure, focus: EscalationFocus, work: Arc<WorkContainer>) {
        let abandoned = self.inner.jobs.drain();
        debug!(thread = %self.thread.id(), jobs = abandoned.len(), "resetting thread");
        drop(abandoned);

        for record in self.inner.flows.purge_entries() {
            record.monitor.notify_tasks();
        }
        let links = self.inner.work_links.purge_entries();

        let flow_id = self.inner.new_flow();
        let mut handler = NewJob::new(flow.initial_job.clone(), Some(Arc::new(cause) as Parameter))
            .with_work(Some(work));
        handler.focus = focus;
        let job = node::create_job(self.thread, self.inner, flow_id, handler);

        for link in links {
            link.work.release();
        }
        activate_job(JobHandle::new(self.thread.clone(), job));
    }
}
