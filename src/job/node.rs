use std::sync::Arc;

use tracing::debug;

use super::{JobHandle, JobId, JobState, activate_job};
use crate::arena::Arena;
use crate::asset::AssetMonitor;
use crate::error::Failure;
use crate::escalation::EscalationFocus;
use crate::execution::{FlowFuture, FlowId, ThreadInner, ThreadState, WorkContainer, WorkLink};
use crate::linked_list::EntryId;
use crate::meta::{JobMetaData, Parameter};

/// One job of a thread.
///
/// Jobs form a tree: `parallel_owner` points up to the job waiting on this
/// one, `parallel_node` down to the first job of the chain this one waits
/// on, `next_node` to its sequential successor in the same flow.
pub(crate) struct JobNode {
    pub(crate) meta: JobMetaData,
    pub(crate) state: JobState,
    pub(crate) flow: FlowId,
    pub(crate) work_link: EntryId,
    pub(crate) work: Arc<WorkContainer>,
    pub(crate) parameter: Option<Parameter>,
    pub(crate) parallel_owner: Option<JobId>,
    pub(crate) parallel_node: Option<JobId>,
    pub(crate) next_node: Option<JobId>,
    /// Last job sequentially instigated by this one.
    pub(crate) sequential_tail: Option<JobId>,
    pub(crate) sequential_instigated: bool,
    pub(crate) next_parameter: Option<Parameter>,
    /// Flows of other threads the task joined on.
    pub(crate) joins: Vec<Arc<AssetMonitor>>,
    pub(crate) queued: bool,
    /// Handed to its team at least once.
    pub(crate) activated: bool,
    pub(crate) pending_failure: Option<Failure>,
    pub(crate) focus: EscalationFocus,
}

pub(crate) struct NewJob {
    pub(crate) meta: JobMetaData,
    pub(crate) parameter: Option<Parameter>,
    /// Reused when the job belongs to the same work.
    pub(crate) work_hint: Option<Arc<WorkContainer>>,
    pub(crate) parallel_owner: Option<JobId>,
    pub(crate) focus: EscalationFocus,
}

impl NewJob {
    pub(crate) fn new(meta: JobMetaData, parameter: Option<Parameter>) -> Self {
        Self {
            meta,
            parameter,
            work_hint: None,
            parallel_owner: None,
            focus: EscalationFocus::Job,
        }
    }

    pub(crate) fn with_work(mut self, work: Option<Arc<WorkContainer>>) -> Self {
        self.work_hint = work;
        self
    }
}

/// Registers a new job in `flow`, linking it to its work.
pub(crate) fn create_job(thread: &ThreadState, inner: &mut ThreadInner, flow: FlowId, new: NewJob) -> JobId {
    let work = match new.work_hint {
        Some(work) if Arc::ptr_eq(work.meta(), new.meta.work()) => work,
        _ => WorkContainer::new(new.meta.work().clone(), thread.process().office()),
    };

    let existing = inner.work_links.entry_ids().into_iter().find(|id| {
        inner
            .work_links
            .get(*id)
            .is_some_and(|link| Arc::ptr_eq(&link.work, &work))
    });
    let work_link = existing.unwrap_or_else(|| inner.work_links.add_entry(WorkLink::new(work.clone())));
    if let Some(link) = inner.work_links.get_mut(work_link) {
        link.jobs += 1;
    }
    if let Some(record) = inner.flows.get_mut(flow) {
        record.active_jobs += 1;
    }

    let id = inner.jobs.insert(JobNode {
        meta: new.meta,
        state: JobState::LoadManagedObjects,
        flow,
        work_link,
        work,
        parameter: new.parameter,
        parallel_owner: new.parallel_owner,
        parallel_node: None,
        next_node: None,
        sequential_tail: None,
        sequential_instigated: false,
        next_parameter: None,
        joins: Vec::new(),
        queued: false,
        activated: false,
        pending_failure: None,
        focus: new.focus,
    });
    debug!(job = %id, thread = %thread.id(), "job created");
    id
}

/// Queues `meta` to run after `from` (and after anything `from` already
/// instigated sequentially), in `from`'s flow.
pub(crate) fn instigate_sequential(
    thread: &ThreadState,
    inner: &mut ThreadInner,
    from: JobId,
    meta: JobMetaData,
    parameter: Option<Parameter>,
) -> Option<FlowId> {
    let (flow, anchor, owner, work, focus) = {
        let node = inner.jobs.get(from)?;
        (
            node.flow,
            node.sequential_tail.unwrap_or(from),
            node.parallel_owner,
            node.work.clone(),
            node.focus.clone(),
        )
    };
    let following = inner.jobs.get(anchor).and_then(|node| node.next_node);

    let mut new = NewJob::new(meta, parameter).with_work(Some(work));
    new.parallel_owner = owner;
    new.focus = focus;
    let id = create_job(thread, inner, flow, new);

    if let Some(node) = inner.jobs.get_mut(id) {
        node.next_node = following;
    }
    if let Some(node) = inner.jobs.get_mut(anchor) {
        node.next_node = Some(id);
    }
    if let Some(node) = inner.jobs.get_mut(from) {
        node.sequential_tail = Some(id);
        node.sequential_instigated = true;
    }
    Some(flow)
}

/// Starts a new flow on this thread that `from` waits on. Several parallel
/// flows of one job are chained: each new one is owned by the last job of
/// the current chain, so they run one after the other, depth first.
pub(crate) fn instigate_parallel(
    thread: &ThreadState,
    inner: &mut ThreadInner,
    from: JobId,
    new: NewJob,
) -> Option<(FlowId, JobId)> {
    let work = inner.jobs.get(from)?.work.clone();
    let owner = last_in_parallel_chain(&inner.jobs, from);
    let flow = inner.new_flow();

    let mut new = new;
    new.parallel_owner = Some(owner);
    if new.work_hint.is_none() {
        new.work_hint = Some(work);
    }
    let id = create_job(thread, inner, flow, new);
    if let Some(node) = inner.jobs.get_mut(owner) {
        node.parallel_node = Some(id);
    }
    Some((flow, id))
}

/// Starts `meta` on a new thread of the same process and activates it.
pub(crate) fn instigate_asynchronous(
    thread: &ThreadState,
    work: Option<Arc<WorkContainer>>,
    meta: JobMetaData,
    parameter: Option<Parameter>,
) -> FlowFuture {
    let spawned = ThreadState::new(thread.process().clone());
    let (job, monitor) = {
        let mut inner = spawned.lock();
        let flow = inner.new_flow();
        let job = create_job(&spawned, &mut inner, flow, NewJob::new(meta, parameter).with_work(work));
        let monitor = inner
            .flows
            .get(flow)
            .map(|record| record.monitor.clone())
            .unwrap_or_else(AssetMonitor::unmanaged);
        (job, monitor)
    };
    let future = FlowFuture::new(spawned.id(), monitor);
    activate_job(JobHandle::new(spawned, job));
    future
}

pub(crate) fn flow_future(thread: &ThreadState, inner: &ThreadInner, flow: FlowId) -> FlowFuture {
    let monitor = inner
        .flows
        .get(flow)
        .map(|record| record.monitor.clone())
        .unwrap_or_else(completed_monitor);
    FlowFuture::new(thread.id(), monitor)
}

pub(crate) fn completed_monitor() -> Arc<AssetMonitor> {
    let monitor = AssetMonitor::unmanaged();
    monitor.notify_tasks();
    monitor
}

pub(crate) fn last_in_parallel_chain(jobs: &Arena<JobNode>, from: JobId) -> JobId {
    let mut last = from;
    while let Some(next) = jobs.get(last).and_then(|node| node.parallel_node) {
        last = next;
    }
    last
}

/// Whether `job` or anything it waits on, or anything queued after it in
/// its flow, is still to run.
pub(crate) fn is_parallel_job_not_complete(jobs: &Arena<JobNode>, job: JobId) -> bool {
    let Some(node) = jobs.get(job) else {
        return false;
    };
    node.state != JobState::Completed
        || node
            .parallel_node
            .is_some_and(|parallel| is_parallel_job_not_complete(jobs, parallel))
        || node
            .next_node
            .is_some_and(|next| is_parallel_job_not_complete(jobs, next))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::PassiveFixture;

    #[test]
    fn sequential_instigations_keep_instigation_order() {
        let fixture = PassiveFixture::new();
        let (thread, root) = fixture.bare_job();
        let mut inner = thread.lock();

        instigate_sequential(&thread, &mut inner, root, fixture.noop_job("a"), None);
        instigate_sequential(&thread, &mut inner, root, fixture.noop_job("b"), None);

        let a = inner.jobs.get(root).and_then(|node| node.next_node).unwrap();
        let b = inner.jobs.get(a).and_then(|node| node.next_node).unwrap();
        assert_eq!(inner.jobs.get(a).unwrap().meta.name(), "a");
        assert_eq!(inner.jobs.get(b).unwrap().meta.name(), "b");
        assert!(inner.jobs.get(b).unwrap().next_node.is_none());
        assert!(inner.jobs.get(root).unwrap().sequential_instigated);
        assert_eq!(inner.flows.len(), 1);
        assert_eq!(inner.flows.head().map(|flow| flow.active_jobs), Some(3));
    }

    #[test]
    fn parallel_instigations_chain_depth_first() {
        let fixture = PassiveFixture::new();
        let (thread, root) = fixture.bare_job();
        let mut inner = thread.lock();

        let (_, first) =
            instigate_parallel(&thread, &mut inner, root, NewJob::new(fixture.noop_job("p1"), None)).unwrap();
        let (_, second) =
            instigate_parallel(&thread, &mut inner, root, NewJob::new(fixture.noop_job("p2"), None)).unwrap();

        assert_eq!(inner.jobs.get(root).unwrap().parallel_node, Some(first));
        assert_eq!(inner.jobs.get(first).unwrap().parallel_owner, Some(root));
        assert_eq!(inner.jobs.get(first).unwrap().parallel_node, Some(second));
        assert_eq!(inner.jobs.get(second).unwrap().parallel_owner, Some(first));
        assert_eq!(inner.flows.len(), 3);
        assert!(is_parallel_job_not_complete(&inner.jobs, first));
    }

    #[test]
    fn jobs_of_one_work_share_a_link() {
        let fixture = PassiveFixture::new();
        let (thread, root) = fixture.bare_job();
        let mut inner = thread.lock();

        instigate_sequential(&thread, &mut inner, root, fixture.noop_job("same-work"), None);

        assert_eq!(inner.work_links.len(), 1);
        assert_eq!(inner.work_links.head().map(|link| link.jobs), Some(2));
    }

    #[test]
    fn removed_jobs_count_as_complete() {
        let fixture = PassiveFixture::new();
        let (thread, root) = fixture.bare_job();
        let mut inner = thread.lock();
        assert!(is_parallel_job_not_complete(&inner.jobs, root));
        inner.jobs.remove(root);
        assert!(!is_parallel_job_not_complete(&inner.jobs, root));
    }
}
