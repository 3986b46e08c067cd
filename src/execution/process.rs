use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, info};
use uuid::Uuid;

use crate::administrator::AdministratorContainer;
use crate::error::RuntimeError;
use crate::managed_object::ManagedObjectContainer;
use crate::meta::ProcessMetaData;
use crate::office::Office;

pub trait ProcessCompletionListener: Send + Sync {
    fn process_completed(&self, summary: &ProcessSummary);
}

/// Outcome counters of one process.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessSummary {
    pub process_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub jobs_completed: u64,
    pub escalations_handled: u64,
    pub unhandled_failures: u64,
}

impl ProcessSummary {
    pub fn is_complete(&self) -> bool {
        self.completed_at.is_some()
    }
}

struct ProcessInner {
    active_threads: usize,
    completed_at: Option<DateTime<Utc>>,
    listeners: Vec<Arc<dyn ProcessCompletionListener>>,
}

#[derive(Default)]
struct ProcessStats {
    jobs_completed: AtomicU64,
    escalations_handled: AtomicU64,
    unhandled_failures: AtomicU64,
}

/// Top-level execution scope.
///
/// Owns the process-scoped managed objects and administrators. Once the
/// last thread completes, the managed objects are unloaded and the
/// completion listeners fire, exactly once.
pub struct ProcessState {
    id: Uuid,
    office: Office,
    meta: Arc<ProcessMetaData>,
    managed_objects: Vec<Arc<ManagedObjectContainer>>,
    administrators: Vec<Arc<AdministratorContainer>>,
    inner: Mutex<ProcessInner>,
    completion: watch::Sender<bool>,
    started_at: DateTime<Utc>,
    stats: ProcessStats,
}

impl ProcessState {
    pub fn new(office: Office) -> Arc<Self> {
        let meta = office.process_meta().clone();
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
        let (completion, _) = watch::channel(false);
        Arc::new(Self {
            id: Uuid::new_v4(),
            office,
            meta,
            managed_objects,
            administrators,
            inner: Mutex::new(ProcessInner {
                active_threads: 0,
                completed_at: None,
                listeners: Vec::new(),
            }),
            completion,
            started_at: Utc::now(),
            stats: ProcessStats::default(),
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn office(&self) -> &Office {
        &self.office
    }

    pub fn meta(&self) -> &Arc<ProcessMetaData> {
        &self.meta
    }

    pub fn managed_object(&self, index: usize) -> Option<&Arc<ManagedObjectContainer>> {
        self.managed_objects.get(index)
    }

    pub fn administrator(&self, index: usize) -> Option<&Arc<AdministratorContainer>> {
        self.administrators.get(index)
    }

    pub fn active_threads(&self) -> usize {
        self.inner.lock().active_threads
    }

    pub fn is_complete(&self) -> bool {
        self.inner.lock().completed_at.is_some()
    }

    pub fn add_completion_listener(&self, listener: Arc<dyn ProcessCompletionListener>) -> Result<(), RuntimeError> {
        let mut inner = self.inner.lock();
        if inner.completed_at.is_some() {
            return Err(RuntimeError::ProcessCompleted(self.id.to_string()));
        }
        inner.listeners.push(listener);
        Ok(())
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.completion.subscribe()
    }

    pub fn summary(&self) -> ProcessSummary {
        ProcessSummary {
            process_id: self.id,
            started_at: self.started_at,
            completed_at: self.inner.lock().completed_at,
            jobs_completed: self.stats.jobs_completed.load(Ordering::Relaxed),
            escalations_handled: self.stats.escalations_handled.load(Ordering::Relaxed),
            unhandled_failures: self.stats.unhandled_failures.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn record_job_completed(&self) {
        self.stats.jobs_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_escalation_handled(&self) {
        self.stats.escalations_handled.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_unhandled_failure(&self) {
        self.stats.unhandled_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn thread_started(&self) {
        self.inner.lock().active_threads += 1;
    }

    pub(crate) fn thread_complete(&self) {
        let listeners = {
            let mut inner = self.inner.lock();
            inner.active_threads = inner.active_threads.saturating_sub(1);
            if inner.active_threads > 0 {
                return;
            }
            self.take_completion(&mut inner)
        };
        if let Some(listeners) = listeners {
            self.finish(listeners);
        }
    }

    /// Completes a process that never had a thread. No-op otherwise.
    pub fn complete_if_idle(&self) {
        let listeners = {
            let mut inner = self.inner.lock();
            if inner.active_threads > 0 {
                return;
            }
            self.take_completion(&mut inner)
        };
        if let Some(listeners) = listeners {
            self.finish(listeners);
        }
    }

    fn take_completion(&self, inner: &mut ProcessInner) -> Option<Vec<Arc<dyn ProcessCompletionListener>>> {
        if inner.completed_at.is_some() {
            return None;
        }
        inner.completed_at = Some(Utc::now());
        Some(std::mem::take(&mut inner.listeners))
    }

    fn finish(&self, listeners: Vec<Arc<dyn ProcessCompletionListener>>) {
        debug!(process = %self.id, "unloading process managed objects");
        for container in self.managed_objects.iter().rev() {
            container.unload();
        }
        let summary = self.summary();
        info!(
            process = %self.id,
            jobs = summary.jobs_completed,
            escalations = summary.escalations_handled,
            unhandled = summary.unhandled_failures,
            "process complete"
        );
        for listener in listeners {
            listener.process_completed(&summary);
        }
        self.completion.send_replace(true);
    }
}

impl fmt::Debug for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessState")
            .field("id", &self.id)
            .field("active_threads", &self.active_threads())
            .finish()
    }
}
