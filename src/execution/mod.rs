//! Process → thread → flow scope hierarchy, plus the per-work containers
//! shared by the jobs of one work.

mod flow;
mod process;
mod thread;
mod work;

pub use flow::FlowFuture;
pub use process::{ProcessCompletionListener, ProcessState, ProcessSummary};
pub use thread::ThreadState;
pub use work::WorkContainer;

pub(crate) use flow::{FlowId, FlowRecord};
pub(crate) use thread::ThreadInner;
pub(crate) use work::WorkLink;

use std::sync::Arc;

use crate::administrator::AdministratorContainer;
use crate::error::{Failure, RuntimeError};
use crate::managed_object::ManagedObjectContainer;
use crate::meta::{AdministratorIndex, ManagedObjectIndex, Scope};

/// Container for `index` as seen by a job of `work` running on `thread`.
pub(crate) fn managed_object(
    thread: &ThreadState,
    work: &WorkContainer,
    index: ManagedObjectIndex,
) -> Result<Arc<ManagedObjectContainer>, Failure> {
    let container = match index.scope {
        Scope::Work => work.managed_object(index.index),
        Scope::Thread => thread.managed_object(index.index),
        Scope::Process => thread.process().managed_object(index.index),
    };
    container.cloned().ok_or_else(|| {
        Failure::new(RuntimeError::Config(format!("no managed object at {index}")))
    })
}

pub(crate) fn administrator(
    thread: &ThreadState,
    work: &WorkContainer,
    index: AdministratorIndex,
) -> Result<Arc<AdministratorContainer>, Failure> {
    let container = match index.scope {
        Scope::Work => work.administrator(index.index),
        Scope::Thread => thread.administrator(index.index),
        Scope::Process => thread.process().administrator(index.index),
    };
    container.cloned().ok_or_else(|| {
        Failure::new(RuntimeError::Config(format!("no administrator at {index}")))
    })
}
