use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::{AsynchronousListener, ManagedObject, ManagedObjectUser, ObjectRegistry, RecycleParameter};
use crate::asset::{Asset, AssetMonitor, AssetReport};
use crate::error::{ExecutionError, Failure, RuntimeError};
use crate::job::JobHandle;
use crate::meta::{ManagedObjectMetaData, Parameter};
use crate::office::Office;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerState {
    NotLoaded,
    Loading,
    Loaded,
    Unloading,
}

impl fmt::Display for ContainerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContainerState::NotLoaded => write!(f, "NOT_LOADED"),
            ContainerState::Loading => write!(f, "LOADING"),
            ContainerState::Loaded => write!(f, "LOADED"),
            ContainerState::Unloading => write!(f, "UNLOADING"),
        }
    }
}

struct ContainerInner {
    state: ContainerState,
    managed_object: Option<Arc<dyn ManagedObject>>,
    object: Option<Parameter>,
    failure: Option<Failure>,
    sourcing_started: Option<u64>,
    asynchronous_start_time: Option<u64>,
    sourcing_monitor: Arc<AssetMonitor>,
    operations_monitor: Option<Arc<AssetMonitor>>,
    coordinated: bool,
    recycle_invoked: bool,
}

/// Runtime state of one managed object.
///
/// `NOT_LOADED → LOADING → LOADED`, with `UNLOADING` terminal. Jobs that
/// need the object before it is loaded (or while an asynchronous
/// operation is outstanding) park on the container's monitors.
pub struct ManagedObjectContainer {
    meta: Arc<ManagedObjectMetaData>,
    office: Office,
    inner: Mutex<ContainerInner>,
    weak_self: Weak<ManagedObjectContainer>,
}

impl ManagedObjectContainer {
    pub fn new(meta: Arc<ManagedObjectMetaData>, office: Office) -> Arc<Self> {
        Arc::new_cyclic(|weak_self: &Weak<ManagedObjectContainer>| {
            let sourcing_monitor = office
                .asset_manager()
                .create_monitor(ContainerAsset::new(weak_self.clone(), AssetKind::Sourcing));
            Self {
                meta,
                office,
                inner: Mutex::new(ContainerInner {
                    state: ContainerState::NotLoaded,
                    managed_object: None,
                    object: None,
                    failure: None,
                    sourcing_started: None,
                    asynchronous_start_time: None,
                    sourcing_monitor,
                    operations_monitor: None,
                    coordinated: false,
                    recycle_invoked: false,
                }),
                weak_self: weak_self.clone(),
            }
        })
    }

    pub fn meta(&self) -> &Arc<ManagedObjectMetaData> {
        &self.meta
    }

    pub fn state(&self) -> ContainerState {
        self.inner.lock().state
    }

    pub fn failure(&self) -> Option<Failure> {
        self.inner.lock().failure.clone()
    }

    pub fn is_asynchronous_operation_outstanding(&self) -> bool {
        self.inner.lock().asynchronous_start_time.is_some()
    }

    /// Triggers sourcing. Only the first call has an effect.
    pub fn load(&self) {
        {
            let mut inner = self.inner.lock();
            if inner.state != ContainerState::NotLoaded {
                return;
            }
            inner.state = ContainerState::Loading;
            inner.sourcing_started = Some(self.office.clock().time_millis());
        }
        let Some(container) = self.weak_self.upgrade() else {
            return;
        };
        debug!(managed_object = %self.meta.name, "sourcing managed object");
        let user = ManagedObjectUser::new(container);
        match &self.meta.pool {
            Some(pool) => pool.source_managed_object(user),
            None => self.meta.source.source_managed_object(user),
        }
    }

    /// `Ok(false)` parks `job` until sourcing completes.
    pub fn is_loaded(&self, job: &JobHandle) -> Result<bool, Failure> {
        loop {
            let monitor = {
                let inner = self.inner.lock();
                if let Some(failure) = &inner.failure {
                    return Err(failure.clone());
                }
                match inner.state {
                    ContainerState::Loaded => return Ok(true),
                    ContainerState::Loading => inner.sourcing_monitor.clone(),
                    ContainerState::NotLoaded | ContainerState::Unloading => {
                        return Err(self.not_loaded());
                    }
                }
            };
            if !monitor.wait(job)? {
                return Ok(false);
            }
        }
    }

    /// Injects `dependencies` into a coordinating managed object. Only a
    /// successful coordination is remembered; a failed one is retried by
    /// the next caller.
    pub fn coordinate(&self, dependencies: &[Arc<ManagedObjectContainer>]) -> Result<(), Failure> {
        let managed_object = {
            let inner = self.inner.lock();
            if inner.coordinated {
                return Ok(());
            }
            let Some(managed_object) = inner.managed_object.clone() else {
                return Err(self.not_loaded());
            };
            managed_object
        };
        if let Some(coordinating) = managed_object.coordinating() {
            let objects = dependencies
                .iter()
                .map(|dependency| dependency.get_object())
                .collect::<Result<Vec<_>, _>>()?;
            coordinating.coordinate(&ObjectRegistry::new(objects))?;
            debug!(managed_object = %self.meta.name, dependencies = dependencies.len(), "coordinated");
        }
        self.inner.lock().coordinated = true;
        Ok(())
    }

    /// Loaded, with no asynchronous operation pending. `Ok(false)` parks
    /// `job` until the operation completes.
    pub fn is_managed_object_ready(&self, job: &JobHandle, time: u64) -> Result<bool, Failure> {
        loop {
            let monitor = {
                let inner = self.inner.lock();
                if let Some(failure) = &inner.failure {
                    return Err(failure.clone());
                }
                if inner.state != ContainerState::Loaded {
                    return Err(self.not_loaded());
                }
                let Some(started) = inner.asynchronous_start_time else {
                    return Ok(true);
                };
                if time.saturating_sub(started) > self.meta.timeout_ms {
                    return Err(ExecutionError::ManagedObjectAsyncOperationTimedOut {
                        name: self.meta.name.clone(),
                        timeout_ms: self.meta.timeout_ms,
                    }
                    .into());
                }
                match &inner.operations_monitor {
                    Some(monitor) => monitor.clone(),
                    None => return Ok(true),
                }
            };
            if !monitor.wait(job)? {
                return Ok(false);
            }
        }
    }

    pub fn get_object(&self) -> Result<Parameter, Failure> {
        let mut inner = self.inner.lock();
        if inner.state != ContainerState::Loaded {
            return Err(self.not_loaded());
        }
        if let Some(object) = &inner.object {
            return Ok(object.clone());
        }
        let Some(managed_object) = inner.managed_object.clone() else {
            return Err(self.not_loaded());
        };
        let object = managed_object.object().map_err(|err| {
            Failure::from(ExecutionError::ManagedObjectFailedProvidingObject {
                name: self.meta.name.clone(),
                cause: Failure::from(err),
            })
        })?;
        inner.object = Some(object.clone());
        Ok(object)
    }

    pub fn extension(&self) -> Option<Parameter> {
        let managed_object = self.inner.lock().managed_object.clone();
        managed_object.and_then(|managed_object| managed_object.extension())
    }

    pub(crate) fn set_managed_object(&self, managed_object: Arc<dyn ManagedObject>) -> Result<(), RuntimeError> {
        match self.state() {
            ContainerState::NotLoaded => return Err(self.not_sourcing()),
            ContainerState::Loading => {}
            ContainerState::Loaded | ContainerState::Unloading => {
                self.discard_late(managed_object);
                return Ok(());
            }
        }

        if let Some(asynchronous) = managed_object.asynchronous() {
            asynchronous.register_asynchronous_listener(AsynchronousListener::new(self.weak_self.clone()));
        }

        let monitor = {
            let mut inner = self.inner.lock();
            if inner.state != ContainerState::Loading {
                drop(inner);
                self.discard_late(managed_object);
                return Ok(());
            }
            inner.state = ContainerState::Loaded;
            inner.managed_object = Some(managed_object);
            inner.sourcing_started = None;
            inner.sourcing_monitor.clone()
        };
        debug!(managed_object = %self.meta.name, "managed object loaded");
        monitor.notify_tasks();
        Ok(())
    }

    pub(crate) fn set_failure(&self, cause: Failure) -> Result<(), RuntimeError> {
        let (monitor, failure) = {
            let mut inner = self.inner.lock();
            match inner.state {
                ContainerState::NotLoaded => return Err(self.not_sourcing()),
                ContainerState::Loading => {}
                ContainerState::Loaded | ContainerState::Unloading => {
                    debug!(managed_object = %self.meta.name, %cause, "ignoring late sourcing failure");
                    return Ok(());
                }
            }
            let failure = Failure::from(ExecutionError::ManagedObjectSourcingFailure {
                name: self.meta.name.clone(),
                cause,
            });
            inner.failure = Some(failure.clone());
            inner.sourcing_started = None;
            (inner.sourcing_monitor.clone(), failure)
        };
        warn!(managed_object = %self.meta.name, %failure, "managed object failed to source");
        monitor.fail_tasks(failure);
        Ok(())
    }

    pub(crate) fn notify_started(&self) {
        let mut inner = self.inner.lock();
        if inner.state == ContainerState::Unloading {
            return;
        }
        inner.asynchronous_start_time = Some(self.office.clock().time_millis());
        let stale = inner
            .operations_monitor
            .as_ref()
            .is_none_or(|monitor| monitor.is_woken());
        if stale {
            inner.operations_monitor = Some(
                self.office
                    .asset_manager()
                    .create_monitor(ContainerAsset::new(self.weak_self.clone(), AssetKind::Operation)),
            );
        }
    }

    pub(crate) fn notify_complete(&self) {
        let monitor = {
            let mut inner = self.inner.lock();
            inner.asynchronous_start_time = None;
            inner.operations_monitor.take()
        };
        if let Some(monitor) = monitor {
            monitor.notify_tasks();
        }
    }

    /// Releases the object. Idempotent.
    pub fn unload(&self) {
        let (managed_object, failure, operations) = {
            let mut inner = self.inner.lock();
            if inner.state == ContainerState::Unloading {
                return;
            }
            inner.state = ContainerState::Unloading;
            inner.object = None;
            inner.asynchronous_start_time = None;
            (
                inner.managed_object.take(),
                inner.failure.clone(),
                inner.operations_monitor.take(),
            )
        };
        if let Some(monitor) = operations {
            monitor.notify_tasks();
        }
        let Some(managed_object) = managed_object else {
            return;
        };
        debug!(managed_object = %self.meta.name, "unloading managed object");
        match (failure, &self.meta.pool) {
            (Some(failure), Some(pool)) => pool.lost_managed_object(managed_object, &failure),
            _ => self.recycle(managed_object),
        }
    }

    fn discard_late(&self, managed_object: Arc<dyn ManagedObject>) {
        info!(managed_object = %self.meta.name, "recycling late managed object");
        self.recycle(managed_object);
    }

    fn recycle(&self, managed_object: Arc<dyn ManagedObject>) {
        if let Some(flow) = &self.meta.recycle {
            let first = {
                let mut inner = self.inner.lock();
                !std::mem::replace(&mut inner.recycle_invoked, true)
            };
            if first {
                let parameter = RecycleParameter::new(managed_object, self.meta.pool.clone());
                self.office.invoke_process(flow, Some(Arc::new(parameter)), None);
                return;
            }
        }
        if let Some(pool) = &self.meta.pool {
            pool.return_managed_object(managed_object);
        }
    }

    fn report(&self, kind: AssetKind, report: &mut AssetReport) {
        let mut inner = self.inner.lock();
        let timeout_ms = self.meta.timeout_ms;
        match kind {
            AssetKind::Sourcing => {
                if inner.state != ContainerState::Loading {
                    return;
                }
                let Some(started) = inner.sourcing_started else {
                    return;
                };
                if report.time().saturating_sub(started) > timeout_ms {
                    let failure = Failure::from(ExecutionError::ManagedObjectSourcingTimedOut {
                        name: self.meta.name.clone(),
                        timeout_ms,
                    });
                    inner.failure = Some(failure.clone());
                    report.set_failure(failure);
                }
            }
            AssetKind::Operation => {
                let Some(started) = inner.asynchronous_start_time else {
                    return;
                };
                if report.time().saturating_sub(started) > timeout_ms {
                    report.set_failure(
                        ExecutionError::ManagedObjectAsyncOperationTimedOut {
                            name: self.meta.name.clone(),
                            timeout_ms,
                        }
                        .into(),
                    );
                }
            }
        }
    }

    fn not_loaded(&self) -> Failure {
        ExecutionError::ManagedObjectNotLoaded {
            name: self.meta.name.clone(),
        }
        .into()
    }

    fn not_sourcing(&self) -> RuntimeError {
        RuntimeError::IllegalState(format!(
            "managed object '{}' was provided before it was loaded",
            self.meta.name
        ))
    }
}

impl fmt::Debug for ManagedObjectContainer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagedObjectContainer")
            .field("name", &self.meta.name)
            .field("state", &self.state())
            .finish()
    }
}

#[derive(Debug, Clone, Copy)]
enum AssetKind {
    Sourcing,
    Operation,
}

/// What a container's monitor reports on.
struct ContainerAsset {
    container: Weak<ManagedObjectContainer>,
    kind: AssetKind,
}

impl ContainerAsset {
    fn new(container: Weak<ManagedObjectContainer>, kind: AssetKind) -> Arc<dyn Asset> {
        Arc::new(Self { container, kind })
    }
}

impl Asset for ContainerAsset {
    fn report_on_asset(&self, report: &mut AssetReport) {
        if let Some(container) = self.container.upgrade() {
            container.report(self.kind, report);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::Clock;
    use crate::test_support::{
        AsyncObject, CoordinatingObject, CountingPool, PassiveFixture, RecordingSource, TestObject,
    };
    use std::io;

    fn container(fixture: &PassiveFixture, source: Arc<RecordingSource>, timeout_ms: u64) -> Arc<ManagedObjectContainer> {
        let meta = ManagedObjectMetaData::new("conn", source, timeout_ms);
        ManagedObjectContainer::new(Arc::new(meta), fixture.office())
    }

    #[test]
    fn load_sources_exactly_once() {
        let fixture = PassiveFixture::new();
        let source = Arc::new(RecordingSource::new());
        let container = container(&fixture, source.clone(), 100);

        container.load();
        container.load();
        assert_eq!(source.requests(), 1);
        assert_eq!(container.state(), ContainerState::Loading);

        source.provide(TestObject::shared("conn")).unwrap();
        assert_eq!(container.state(), ContainerState::Loaded);
        let object = container.get_object().unwrap();
        assert_eq!(object.downcast_ref::<String>().map(String::as_str), Some("conn"));
    }

    #[test]
    fn job_waits_until_object_provided() {
        let fixture = PassiveFixture::new();
        let source = Arc::new(RecordingSource::new());
        let container = container(&fixture, source.clone(), 100);
        let job = fixture.suspended_job();

        container.load();
        assert_eq!(container.is_loaded(&job).unwrap(), false);
        assert_eq!(fixture.executions(), 0);

        source.provide(TestObject::shared("conn")).unwrap();
        assert_eq!(fixture.executions(), 1);
        assert_eq!(container.is_loaded(&job).unwrap(), true);
    }

    #[test]
    fn set_failure_before_readiness_check_raises_sourcing_failure() {
        let fixture = PassiveFixture::new();
        let source = Arc::new(RecordingSource::new());
        let container = container(&fixture, source.clone(), 100);
        container.load();

        source
            .fail(Failure::new(io::Error::new(io::ErrorKind::ConnectionRefused, "refused")))
            .unwrap();

        let failure = container
            .is_managed_object_ready(&fixture.suspended_job(), 0)
            .unwrap_err();
        match failure.downcast_ref::<ExecutionError>() {
            Some(ExecutionError::ManagedObjectSourcingFailure { name, cause }) => {
                assert_eq!(name, "conn");
                let io = cause.downcast_ref::<io::Error>().unwrap();
                assert_eq!(io.kind(), io::ErrorKind::ConnectionRefused);
            }
            other => panic!("unexpected failure {other:?}"),
        }
    }

    #[test]
    fn providing_before_load_is_illegal() {
        let fixture = PassiveFixture::new();
        let container = container(&fixture, Arc::new(RecordingSource::new()), 100);
        let user = ManagedObjectUser::new(container.clone());

        let err = user.set_managed_object(TestObject::shared("early")).unwrap_err();
        assert!(matches!(err, RuntimeError::IllegalState(_)));
        let err = user.set_failure(Failure::msg("early")).unwrap_err();
        assert!(matches!(err, RuntimeError::IllegalState(_)));
        assert_eq!(container.state(), ContainerState::NotLoaded);
    }

    #[test]
    fn get_object_before_load_fails() {
        let fixture = PassiveFixture::new();
        let container = container(&fixture, Arc::new(RecordingSource::new()), 100);
        let failure = container.get_object().unwrap_err();
        assert!(matches!(
            failure.downcast_ref::<ExecutionError>(),
            Some(ExecutionError::ManagedObjectNotLoaded { .. })
        ));
    }

    #[test]
    fn failing_object_retrieval_is_wrapped() {
        let fixture = PassiveFixture::new();
        let source = Arc::new(RecordingSource::new());
        let container = container(&fixture, source.clone(), 100);
        container.load();
        source.provide(TestObject::broken("no handle")).unwrap();

        let failure = container.get_object().unwrap_err();
        assert!(matches!(
            failure.downcast_ref::<ExecutionError>(),
            Some(ExecutionError::ManagedObjectFailedProvidingObject { .. })
        ));
        assert_eq!(failure.escalation_cause().to_string(), "no handle");
    }

    #[test]
    fn asynchronous_operation_times_out_on_sweep() {
        let fixture = PassiveFixture::new();
        let source = Arc::new(RecordingSource::new());
        let container = container(&fixture, source.clone(), 50);
        let object = AsyncObject::new();
        container.load();
        source.provide(object.clone()).unwrap();

        object.listener().notify_started();
        let job = fixture.suspended_job();
        assert_eq!(container.is_managed_object_ready(&job, fixture.clock().time_millis()).unwrap(), false);

        fixture.clock().advance(51);
        assert_eq!(fixture.office().asset_manager().manage_assets(), 1);

        let failure = fixture.last_escalation().unwrap();
        assert!(matches!(
            failure.downcast_ref::<ExecutionError>(),
            Some(ExecutionError::ManagedObjectAsyncOperationTimedOut { timeout_ms: 50, .. })
        ));
        assert_eq!(fixture.executions(), 0);
    }

    #[test]
    fn asynchronous_operation_completion_wakes_job() {
        let fixture = PassiveFixture::new();
        let source = Arc::new(RecordingSource::new());
        let container = container(&fixture, source.clone(), 50);
        let object = AsyncObject::new();
        container.load();
        source.provide(object.clone()).unwrap();

        object.listener().notify_started();
        let job = fixture.suspended_job();
        assert_eq!(container.is_managed_object_ready(&job, 0).unwrap(), false);
        object.listener().notify_complete();

        assert_eq!(fixture.executions(), 1);
        assert!(!container.is_asynchronous_operation_outstanding());
        assert_eq!(container.is_managed_object_ready(&job, 0).unwrap(), true);
    }

    #[test]
    fn readiness_check_detects_elapsed_timeout() {
        let fixture = PassiveFixture::new();
        let source = Arc::new(RecordingSource::new());
        let container = container(&fixture, source.clone(), 50);
        let object = AsyncObject::new();
        container.load();
        source.provide(object.clone()).unwrap();
        object.listener().notify_started();

        let failure = container
            .is_managed_object_ready(&fixture.suspended_job(), 100)
            .unwrap_err();
        assert!(matches!(
            failure.downcast_ref::<ExecutionError>(),
            Some(ExecutionError::ManagedObjectAsyncOperationTimedOut { .. })
        ));
    }

    #[test]
    fn sourcing_times_out_on_sweep() {
        let fixture = PassiveFixture::new();
        let container = container(&fixture, Arc::new(RecordingSource::new()), 20);
        container.load();
        let job = fixture.suspended_job();
        assert_eq!(container.is_loaded(&job).unwrap(), false);

        fixture.clock().advance(10);
        assert_eq!(fixture.office().asset_manager().manage_assets(), 0);
        fixture.clock().advance(11);
        assert_eq!(fixture.office().asset_manager().manage_assets(), 1);

        assert!(matches!(
            container.failure().as_ref().and_then(|f| f.downcast_ref::<ExecutionError>()),
            Some(ExecutionError::ManagedObjectSourcingTimedOut { timeout_ms: 20, .. })
        ));
    }

    #[test]
    fn unload_is_idempotent_and_returns_to_pool() {
        let fixture = PassiveFixture::new();
        let source = Arc::new(RecordingSource::new());
        let pool = Arc::new(CountingPool::with_source(source.clone()));
        let mut meta = ManagedObjectMetaData::new("pooled", source.clone(), 100);
        meta.pool = Some(pool.clone());
        let container = ManagedObjectContainer::new(Arc::new(meta), fixture.office());

        container.load();
        assert_eq!(pool.sourced(), 1);
        source.provide(TestObject::shared("pooled")).unwrap();

        container.unload();
        container.unload();
        assert_eq!(pool.returned(), 1);
        assert_eq!(container.state(), ContainerState::Unloading);
    }

    #[test]
    fn late_object_after_unload_is_recycled() {
        let fixture = PassiveFixture::new();
        let source = Arc::new(RecordingSource::new());
        let pool = Arc::new(CountingPool::with_source(source.clone()));
        let mut meta = ManagedObjectMetaData::new("slow", source.clone(), 100);
        meta.pool = Some(pool.clone());
        let container = ManagedObjectContainer::new(Arc::new(meta), fixture.office());

        container.load();
        container.unload();
        source.provide(TestObject::shared("late")).unwrap();

        assert_eq!(pool.returned(), 1);
        assert_eq!(container.state(), ContainerState::Unloading);
    }

    #[test]
    fn recycle_flow_invoked_once() {
        let fixture = PassiveFixture::new();
        let source = Arc::new(RecordingSource::new());
        let pool = Arc::new(CountingPool::with_source(source.clone()));
        let mut meta = ManagedObjectMetaData::new("recycled", source.clone(), 100);
        meta.pool = Some(pool.clone());
        meta.recycle = Some(fixture.recycle_flow());
        let container = ManagedObjectContainer::new(Arc::new(meta), fixture.office());

        container.load();
        source.provide(TestObject::shared("recycled")).unwrap();
        container.unload();

        assert_eq!(fixture.recycled(), 1);
        assert_eq!(pool.returned(), 1);
    }

    #[test]
    fn coordination_receives_dependencies_once() {
        let fixture = PassiveFixture::new();
        let dependency_source = Arc::new(RecordingSource::new());
        let dependency = container(&fixture, dependency_source.clone(), 100);
        dependency.load();
        dependency_source.provide(TestObject::shared("config")).unwrap();

        let source = Arc::new(RecordingSource::new());
        let coordinating = container(&fixture, source.clone(), 100);
        coordinating.load();
        let object = CoordinatingObject::new();
        source.provide(object.clone()).unwrap();

        coordinating.coordinate(&[dependency.clone()]).unwrap();
        coordinating.coordinate(&[dependency]).unwrap();
        assert_eq!(object.coordinations(), vec![vec!["config".to_string()]]);
    }

    #[test]
    fn failed_coordination_is_retried() {
        let fixture = PassiveFixture::new();
        let dependency_source = Arc::new(RecordingSource::new());
        let dependency = container(&fixture, dependency_source.clone(), 100);

        let source = Arc::new(RecordingSource::new());
        let coordinating = container(&fixture, source.clone(), 100);
        coordinating.load();
        let object = CoordinatingObject::new();
        source.provide(object.clone()).unwrap();

        let err = coordinating.coordinate(&[dependency.clone()]).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ExecutionError>(),
            Some(ExecutionError::ManagedObjectNotLoaded { .. })
        ));
        assert!(object.coordinations().is_empty());

        dependency.load();
        dependency_source.provide(TestObject::shared("config")).unwrap();
        coordinating.coordinate(&[dependency]).unwrap();
        assert_eq!(object.coordinations(), vec![vec!["config".to_string()]]);
    }
}
