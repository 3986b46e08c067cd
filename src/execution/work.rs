use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::administrator::AdministratorContainer;
use crate::error::Failure;
use crate::managed_object::ManagedObjectContainer;
use crate::meta::{Parameter, WorkMetaData};
use crate::office::Office;

struct WorkInner {
    work: Option<Parameter>,
    links: usize,
    unloaded: bool,
}

/// One instance of a work: its user object and work-scoped containers.
///
/// Shared by every job of the work, possibly across threads; each thread
/// holds one [`WorkLink`] to it. Work-scoped managed objects are unloaded
/// when the last link is released.
pub struct WorkContainer {
    meta: Arc<WorkMetaData>,
    managed_objects: Vec<Arc<ManagedObjectContainer>>,
    administrators: Vec<Arc<AdministratorContainer>>,
    inner: Mutex<WorkInner>,
}

impl WorkContainer {
    pub fn new(meta: Arc<WorkMetaData>, office: &Office) -> Arc<Self> {
        let managed_objects = meta
            .managed_objects
            .iter()
            .map(|mo| ManagedObjectContainer::new(mo.clone(), office.clone()))
            .collect();
        let administrators = meta
            .administrators
            .iter()
            .map(|admin| AdministratorContainer::new(admin.clone()))
            .collect();
        Arc::new(Self {
            meta,
            managed_objects,
            administrators,
            inner: Mutex::new(WorkInner {
                work: None,
                links: 0,
                unloaded: false,
            }),
        })
    }

    pub fn meta(&self) -> &Arc<WorkMetaData> {
        &self.meta
    }

    pub fn managed_object(&self, index: usize) -> Option<&Arc<ManagedObjectContainer>> {
        self.managed_objects.get(index)
    }

    pub fn administrator(&self, index: usize) -> Option<&Arc<AdministratorContainer>> {
        self.administrators.get(index)
    }

    /// The user object, created on first use. Works without a factory get `()`.
    pub fn work_object(&self) -> Result<Parameter, Failure> {
        let mut inner = self.inner.lock();
        if let Some(work) = &inner.work {
            return Ok(work.clone());
        }
        let work = match &self.meta.create_work {
            Some(create) => create()?,
            None => Arc::new(()) as Parameter,
        };
        inner.work = Some(work.clone());
        Ok(work)
    }

    pub fn links(&self) -> usize {
        self.inner.lock().links
    }

    pub fn is_unloaded(&self) -> bool {
        self.inner.lock().unloaded
    }

    pub(crate) fn link(&self) {
        self.inner.lock().links += 1;
    }

    /// Drops one thread's link, unloading the work once none are left.
    pub(crate) fn release(&self) {
        {
            let mut inner = self.inner.lock();
            inner.links = inner.links.saturating_sub(1);
            if inner.links > 0 || inner.unloaded {
                return;
            }
            inner.unloaded = true;
            inner.work = None;
        }
        debug!(work = %self.meta.name, "unloading work");
        for container in self.managed_objects.iter().rev() {
            container.unload();
        }
    }
}

impl fmt::Debug for WorkContainer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkContainer")
            .field("name", &self.meta.name)
            .field("links", &self.links())
            .finish()
    }
}

/// A thread's hold on a [`WorkContainer`], counting that thread's jobs of it.
pub(crate) struct WorkLink {
    pub(crate) work: Arc<WorkContainer>,
    pub(crate) jobs: usize,
}

impl WorkLink {
    pub(crate) fn new(work: Arc<WorkContainer>) -> Self {
        work.link();
        Self { work, jobs: 0 }
    }
}
