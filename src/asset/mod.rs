//! Suspend/resume for long-running resources.
//!
//! An [`Asset`] is anything a job may have to wait on: a managed object
//! being sourced, an asynchronous operation, a flow being joined. Each wait
//! point is an [`AssetMonitor`]; monitors with waiters are swept
//! periodically by the [`AssetManager`] so stalled assets can fail their
//! waiting jobs.

mod manager;
mod monitor;

pub use manager::AssetManager;
pub use monitor::{AssetMonitor, MonitorState};

use crate::error::Failure;

/// Resource that can report on its own health during a sweep.
pub trait Asset: Send + Sync {
    /// Inspects the asset under its own lock, failing the report if
    /// waiting jobs can no longer be satisfied (e.g. a timeout elapsed).
    fn report_on_asset(&self, report: &mut AssetReport);
}

/// Outcome of a single [`Asset::report_on_asset`] call.
#[derive(Debug)]
pub struct AssetReport {
    time: u64,
    failure: Option<Failure>,
}

impl AssetReport {
    pub fn new(time: u64) -> Self {
        Self {
            time,
            failure: None,
        }
    }

    /// Time of the sweep, in clock millis.
    pub fn time(&self) -> u64 {
        self.time
    }

    pub fn set_failure(&mut self, failure: Failure) {
        self.failure = Some(failure);
    }

    pub fn failure(&self) -> Option<&Failure> {
        self.failure.as_ref()
    }

    pub(crate) fn into_failure(self) -> Option<Failure> {
        self.failure
    }
}
