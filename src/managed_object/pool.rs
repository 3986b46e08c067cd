use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;
use tracing::{debug, warn};

use super::{ManagedObject, ManagedObjectPool, ManagedObjectSource, ManagedObjectUser};
use crate::error::Failure;

/// Idle stack in front of a source.
pub struct SimplePool {
    source: Arc<dyn ManagedObjectSource>,
    idle: Mutex<Vec<Arc<dyn ManagedObject>>>,
    lost: AtomicUsize,
}

impl SimplePool {
    pub fn new(source: Arc<dyn ManagedObjectSource>) -> Self {
        Self {
            source,
            idle: Mutex::new(Vec::new()),
            lost: AtomicUsize::new(0),
        }
    }

    pub fn idle(&self) -> usize {
        self.idle.lock().len()
    }

    pub fn lost(&self) -> usize {
        self.lost.load(Ordering::Relaxed)
    }
}

impl ManagedObjectPool for SimplePool {
    fn source_managed_object(&self, user: ManagedObjectUser) {
        let pooled = self.idle.lock().pop();
        match pooled {
            Some(managed_object) => {
                debug!(managed_object = user.managed_object_name(), "reusing pooled object");
                if let Err(err) = user.set_managed_object(managed_object) {
                    warn!(%err, "pooled object rejected");
                }
            }
            None => self.source.source_managed_object(user),
        }
    }

    fn return_managed_object(&self, managed_object: Arc<dyn ManagedObject>) {
        self.idle.lock().push(managed_object);
    }

    fn lost_managed_object(&self, _managed_object: Arc<dyn ManagedObject>, cause: &Failure) {
        self.lost.fetch_add(1, Ordering::Relaxed);
        warn!(%cause, "pooled object lost");
    }
}
