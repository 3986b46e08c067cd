use std::fmt;
use std::sync::Arc;

use uuid::Uuid;

use crate::asset::AssetMonitor;
use crate::linked_list::EntryId;

pub(crate) type FlowId = EntryId;

/// A flow as tracked by its thread: live job count and the monitor joiners
/// wait on.
pub(crate) struct FlowRecord {
    pub(crate) active_jobs: usize,
    pub(crate) monitor: Arc<AssetMonitor>,
}

impl FlowRecord {
    pub(crate) fn new() -> Self {
        Self {
            active_jobs: 0,
            monitor: AssetMonitor::unmanaged(),
        }
    }
}

/// Handle on an instigated flow. Complete once every job of the flow has
/// completed or its thread was reset.
#[derive(Clone)]
pub struct FlowFuture {
    thread_id: Uuid,
    monitor: Arc<AssetMonitor>,
}

impl FlowFuture {
    pub(crate) fn new(thread_id: Uuid, monitor: Arc<AssetMonitor>) -> Self {
        Self { thread_id, monitor }
    }

    pub fn is_complete(&self) -> bool {
        self.monitor.is_woken()
    }

    pub fn thread_id(&self) -> Uuid {
        self.thread_id
    }

    pub(crate) fn monitor(&self) -> &Arc<AssetMonitor> {
        &self.monitor
    }
}

impl fmt::Debug for FlowFuture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlowFuture")
            .field("thread_id", &self.thread_id)
            .field("complete", &self.is_complete())
            .finish()
    }
}
