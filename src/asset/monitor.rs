use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::{debug, trace};

use super::{Asset, AssetManager, AssetReport};
use crate::error::Failure;
use crate::job::{JobActivateSet, JobHandle};
use crate::linked_list::{EntryId, LinkedList};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
    Waiting,
    Woken,
}

struct MonitorInner {
    state: MonitorState,
    failure: Option<Failure>,
    waiters: LinkedList<JobHandle>,
}

/// Queue of jobs parked on one asset.
///
/// Starts `Waiting`; [`notify_tasks`](Self::notify_tasks) or
/// [`fail_tasks`](Self::fail_tasks) drain the queue and flip it to `Woken`
/// for good. A managed monitor is registered with its [`AssetManager`] while
/// it has waiters and unregisters itself once the queue empties.
pub struct AssetMonitor {
    asset: Option<Arc<dyn Asset>>,
    manager: Option<Weak<AssetManager>>,
    inner: Mutex<MonitorInner>,
    registration: Mutex<Option<EntryId>>,
    weak_self: Weak<AssetMonitor>,
}

impl AssetMonitor {
    /// Monitor that is never swept (e.g. flow completion).
    pub fn unmanaged() -> Arc<Self> {
        Arc::new_cyclic(|weak_self| Self {
            asset: None,
            manager: None,
            inner: Mutex::new(MonitorInner {
                state: MonitorState::Waiting,
                failure: None,
                waiters: LinkedList::new(),
            }),
            registration: Mutex::new(None),
            weak_self: weak_self.clone(),
        })
    }

    pub(crate) fn managed(asset: Arc<dyn Asset>, manager: &Arc<AssetManager>) -> Arc<Self> {
        Arc::new_cyclic(|weak_self: &Weak<AssetMonitor>| {
            let observer_self = weak_self.clone();
            let waiters = LinkedList::with_last_entry_observer(Box::new(move || {
                if let Some(monitor) = observer_self.upgrade() {
                    monitor.unregister();
                }
            }));
            Self {
                asset: Some(asset),
                manager: Some(Arc::downgrade(manager)),
                inner: Mutex::new(MonitorInner {
                    state: MonitorState::Waiting,
                    failure: None,
                    waiters,
                }),
                registration: Mutex::new(None),
                weak_self: weak_self.clone(),
            }
        })
    }

    pub fn state(&self) -> MonitorState {
        self.inner.lock().state
    }

    pub fn is_woken(&self) -> bool {
        self.state() == MonitorState::Woken
    }

    pub fn failure(&self) -> Option<Failure> {
        self.inner.lock().failure.clone()
    }

    pub fn waiting_jobs(&self) -> usize {
        self.inner.lock().waiters.len()
    }

    pub fn is_registered(&self) -> bool {
        self.registration.lock().is_some()
    }

    /// Parks `job` on this monitor.
    ///
    /// Returns `Ok(false)` when the job was queued and must suspend,
    /// `Ok(true)` when the monitor is already woken and the job may carry
    /// on, or the recorded failure when the monitor was woken by
    /// [`fail_tasks`](Self::fail_tasks).
    pub fn wait(&self, job: &JobHandle) -> Result<bool, Failure> {
        let mut inner = self.inner.lock();
        match inner.state {
            MonitorState::Woken => match &inner.failure {
                Some(failure) => Err(failure.clone()),
                None => Ok(true),
            },
            MonitorState::Waiting => {
                let first = inner.waiters.is_empty();
                inner.waiters.add_entry(job.clone());
                trace!(job = %job, waiters = inner.waiters.len(), "job waiting on asset");
                if first {
                    self.register();
                }
                Ok(false)
            }
        }
    }

    /// Wakes every waiting job.
    pub fn notify_tasks(&self) {
        self.wake(None);
    }

    /// Wakes every waiting job with `failure`.
    pub fn fail_tasks(&self, failure: Failure) {
        self.wake(Some(failure));
    }

    fn wake(&self, failure: Option<Failure>) {
        let drained = {
            let mut inner = self.inner.lock();
            if inner.state == MonitorState::Waiting {
                inner.state = MonitorState::Woken;
                inner.failure = failure;
            }
            let failure = inner.failure.clone();
            inner
                .waiters
                .purge_entries()
                .into_iter()
                .map(|job| (job, failure.clone()))
                .collect::<Vec<_>>()
        };
        if drained.is_empty() {
            return;
        }

        debug!(jobs = drained.len(), "waking jobs on asset");
        let mut activate = JobActivateSet::new();
        for (job, failure) in drained {
            activate.add_job(job, failure);
        }
        activate.activate_jobs();
    }

    /// Asks the asset for a report. `None` when the asset is healthy.
    pub(crate) fn report(&self, time: u64) -> Option<Failure> {
        let asset = self.asset.as_ref()?;
        let mut report = AssetReport::new(time);
        asset.report_on_asset(&mut report);
        report.into_failure()
    }

    fn register(&self) {
        let (Some(manager), Some(monitor)) = (
            self.manager.as_ref().and_then(Weak::upgrade),
            self.weak_self.upgrade(),
        ) else {
            return;
        };
        let mut registration = self.registration.lock();
        if registration.is_none() {
            *registration = Some(manager.register(monitor));
        }
    }

    fn unregister(&self) {
        let Some(id) = self.registration.lock().take() else {
            return;
        };
        if let Some(manager) = self.manager.as_ref().and_then(Weak::upgrade) {
            manager.unregister(id);
        }
    }
}
