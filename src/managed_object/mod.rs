//! Managed objects: pooled, sourced dependencies handed to tasks.
//!
//! A [`ManagedObjectSource`] provides objects through a
//! [`ManagedObjectUser`], synchronously or from any other thread. The
//! runtime side of each object lives in a [`ManagedObjectContainer`].

mod container;
mod pool;

pub use container::{ContainerState, ManagedObjectContainer};
pub use pool::SimplePool;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use anyhow::anyhow;

use crate::error::{Failure, RuntimeError};
use crate::meta::Parameter;

pub trait ManagedObject: Send + Sync + 'static {
    /// The object injected into tasks.
    fn object(&self) -> anyhow::Result<Parameter>;

    /// Extension interface administrators operate on.
    fn extension(&self) -> Option<Parameter> {
        None
    }

    fn asynchronous(&self) -> Option<&dyn AsynchronousManagedObject> {
        None
    }

    fn coordinating(&self) -> Option<&dyn CoordinatingManagedObject> {
        None
    }
}

/// Managed object that performs operations outside of the task body and
/// reports them through an [`AsynchronousListener`].
pub trait AsynchronousManagedObject: Send + Sync {
    fn register_asynchronous_listener(&self, listener: AsynchronousListener);
}

/// Managed object that needs other managed objects injected before use.
pub trait CoordinatingManagedObject: Send + Sync {
    fn coordinate(&self, registry: &ObjectRegistry) -> anyhow::Result<()>;
}

pub trait ManagedObjectSource: Send + Sync {
    /// Must call exactly one of [`ManagedObjectUser::set_managed_object`]
    /// or [`ManagedObjectUser::set_failure`], now or later, on any thread.
    fn source_managed_object(&self, user: ManagedObjectUser);
}

pub trait ManagedObjectPool: Send + Sync {
    fn source_managed_object(&self, user: ManagedObjectUser);

    fn return_managed_object(&self, managed_object: Arc<dyn ManagedObject>);

    fn lost_managed_object(&self, managed_object: Arc<dyn ManagedObject>, cause: &Failure);
}

/// Callback surface handed to sources.
#[derive(Clone)]
pub struct ManagedObjectUser {
    container: Arc<ManagedObjectContainer>,
}

impl ManagedObjectUser {
    pub(crate) fn new(container: Arc<ManagedObjectContainer>) -> Self {
        Self { container }
    }

    pub fn set_managed_object(&self, managed_object: Arc<dyn ManagedObject>) -> Result<(), RuntimeError> {
        self.container.set_managed_object(managed_object)
    }

    pub fn set_failure(&self, cause: impl Into<Failure>) -> Result<(), RuntimeError> {
        self.container.set_failure(cause.into())
    }

    pub fn managed_object_name(&self) -> &str {
        &self.container.meta().name
    }
}

/// Start/complete notifications of an asynchronous operation.
#[derive(Clone)]
pub struct AsynchronousListener {
    container: Weak<ManagedObjectContainer>,
}

impl AsynchronousListener {
    pub(crate) fn new(container: Weak<ManagedObjectContainer>) -> Self {
        Self { container }
    }

    pub fn notify_started(&self) {
        if let Some(container) = self.container.upgrade() {
            container.notify_started();
        }
    }

    pub fn notify_complete(&self) {
        if let Some(container) = self.container.upgrade() {
            container.notify_complete();
        }
    }
}

/// Dependency objects handed to [`CoordinatingManagedObject::coordinate`],
/// in the order of `ManagedObjectMetaData::dependencies`.
pub struct ObjectRegistry {
    objects: Vec<Parameter>,
}

impl ObjectRegistry {
    pub fn new(objects: Vec<Parameter>) -> Self {
        Self { objects }
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn get(&self, index: usize) -> anyhow::Result<Parameter> {
        self.objects
            .get(index)
            .cloned()
            .ok_or_else(|| anyhow!("no dependency at index {index}"))
    }

    pub fn get_as<T: Send + Sync + 'static>(&self, index: usize) -> anyhow::Result<Arc<T>> {
        self.get(index)?
            .downcast::<T>()
            .map_err(|_| anyhow!("dependency {index} is not a {}", std::any::type_name::<T>()))
    }
}

/// Parameter of a recycle process.
pub struct RecycleParameter {
    managed_object: Arc<dyn ManagedObject>,
    pool: Option<Arc<dyn ManagedObjectPool>>,
    reused: AtomicBool,
}

impl RecycleParameter {
    pub(crate) fn new(managed_object: Arc<dyn ManagedObject>, pool: Option<Arc<dyn ManagedObjectPool>>) -> Self {
        Self {
            managed_object,
            pool,
            reused: AtomicBool::new(false),
        }
    }

    pub fn managed_object(&self) -> &Arc<dyn ManagedObject> {
        &self.managed_object
    }

    /// Hands the object back to its pool. Only the first call has an effect.
    pub fn reuse(&self) -> bool {
        if self.reused.swap(true, Ordering::SeqCst) {
            return false;
        }
        if let Some(pool) = &self.pool {
            pool.return_managed_object(self.managed_object.clone());
        }
        true
    }
}
