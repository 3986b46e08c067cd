use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tracing::{debug, warn};

use super::{Asset, AssetMonitor};
use crate::clock::Clock;
use crate::linked_list::{EntryId, LinkedList};

/// Registry of monitors that currently have waiting jobs.
///
/// [`manage_assets`](Self::manage_assets) is the periodic sweep: it only
/// holds the registry lock long enough to snapshot it, then reports on
/// each asset under that asset's own lock. Failed monitors are woken
/// outside any lock held by the sweep.
pub struct AssetManager {
    clock: Arc<dyn Clock>,
    monitors: Mutex<LinkedList<Arc<AssetMonitor>>>,
    sweeps: AtomicU64,
}

impl AssetManager {
    pub fn new(clock: Arc<dyn Clock>) -> Arc<Self> {
        Arc::new(Self {
            clock,
            monitors: Mutex::new(LinkedList::new()),
            sweeps: AtomicU64::new(0),
        })
    }

    pub fn create_monitor(self: &Arc<Self>, asset: Arc<dyn Asset>) -> Arc<AssetMonitor> {
        AssetMonitor::managed(asset, self)
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn registered_monitors(&self) -> usize {
        self.monitors.lock().len()
    }

    pub fn sweeps(&self) -> u64 {
        self.sweeps.load(Ordering::Relaxed)
    }

    pub(crate) fn register(&self, monitor: Arc<AssetMonitor>) -> EntryId {
        self.monitors.lock().add_entry(monitor)
    }

    pub(crate) fn unregister(&self, id: EntryId) {
        self.monitors.lock().remove_entry(id);
    }

    /// Sweeps every registered monitor, failing the waiters of any asset
    /// that reports a failure. Returns the number of monitors failed.
    pub fn manage_assets(&self) -> usize {
        self.sweeps.fetch_add(1, Ordering::Relaxed);
        let snapshot = self.monitors.lock().copy_entries();
        if snapshot.is_empty() {
            return 0;
        }

        let time = self.clock.time_millis();
        let mut failed = 0;
        for monitor in snapshot {
            if let Some(failure) = monitor.report(time) {
                warn!(%failure, waiting = monitor.waiting_jobs(), "asset failed, failing waiting jobs");
                monitor.fail_tasks(failure);
                failed += 1;
            }
        }
        debug!(failed, "asset sweep complete");
        failed
    }
}
