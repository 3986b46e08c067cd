use std::fmt;
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};
use tracing::debug;
use uuid::Uuid;

use super::{FlowId, FlowRecord, ProcessState, WorkLink};
use crate::administrator::AdministratorContainer;
use crate::arena::Arena;
use crate::asset::AssetMonitor;
use crate::job::node::JobNode;
use crate::linked_list::LinkedList;
use crate::managed_object::ManagedObjectContainer;

/// Everything guarded by the thread lock.
pub(crate) struct ThreadInner {
    pub(crate) jobs: Arena<JobNode>,
    pub(crate) flows: LinkedList<FlowRecord>,
    pub(crate) work_links: LinkedList<WorkLink>,
    pub(crate) completed: bool,
}

impl ThreadInner {
    pub(crate) fn new_flow(&mut self) -> FlowId {
        self.flows.add_entry(FlowRecord::new())
    }
}

/// One logical thread of control within a process.
///
/// All job state of the thread lives behind a single lock; jobs of
/// different threads run concurrently, jobs of one thread never do.
pub struct ThreadState {
    id: Uuid,
    process: Arc<ProcessState>,
    inner: Mutex<ThreadInner>,
    managed_objects: Vec<Arc<ManagedObjectContainer>>,
    administrators: Vec<Arc<AdministratorContainer>>,
    completion: Arc<AssetMonitor>,
}

impl ThreadState {
    pub fn new(process: Arc<ProcessState>) -> Arc<Self> {
        let office = process.office().clone();
        let managed_objects = process
            .meta()
            .thread_managed_objects
            .iter()
            .map(|mo| ManagedObjectContainer::new(mo.clone(), office.clone()))
            .collect();
        let administrators = process
            .meta()
            .thread_administrators
            .iter()
            .map(|admin| AdministratorContainer::new(admin.clone()))
            .collect();
        process.thread_started();

        let thread = Arc::new(Self {
            id: Uuid::new_v4(),
            process,
            inner: Mutex::new(ThreadInner {
                jobs: Arena::new(),
                flows: LinkedList::new(),
                work_links: LinkedList::new(),
                completed: false,
            }),
            managed_objects,
            administrators,
            completion: AssetMonitor::unmanaged(),
        });
        debug!(thread = %thread.id, process = %thread.process.id(), "thread started");
        thread
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn process(&self) -> &Arc<ProcessState> {
        &self.process
    }

    pub fn managed_object(&self, index: usize) -> Option<&Arc<ManagedObjectContainer>> {
        self.managed_objects.get(index)
    }

    pub fn administrator(&self, index: usize) -> Option<&Arc<AdministratorContainer>> {
        self.administrators.get(index)
    }

    pub fn is_complete(&self) -> bool {
        self.inner.lock().completed
    }

    pub fn active_jobs(&self) -> usize {
        self.inner.lock().jobs.len()
    }

    pub fn active_flows(&self) -> usize {
        self.inner.lock().flows.len()
    }

    /// Woken once the thread's last flow completes.
    pub fn completion_monitor(&self) -> &Arc<AssetMonitor> {
        &self.completion
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, ThreadInner> {
        self.inner.lock()
    }

    /// Called with the thread lock held once the last flow is gone.
    pub(crate) fn complete(&self, inner: &mut ThreadInner) {
        if inner.completed {
            return;
        }
        inner.completed = true;
        debug!(thread = %self.id, "thread complete");
        for container in self.managed_objects.iter().rev() {
            container.unload();
        }
        self.process.thread_complete();
        self.completion.notify_tasks();
    }
}

impl fmt::Debug for ThreadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadState")
            .field("id", &self.id)
            .field("process", &self.process.id())
            .finish()
    }
}
