//! Test doubles shared by the unit tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;

use crate::administrator::{Administrator, AdministratorSource, DutyKey};
use crate::asset::{Asset, AssetReport};
use crate::clock::ManualClock;
use crate::config::OfficeConfig;
use crate::error::{Failure, RuntimeError};
use crate::escalation::EscalationHandler;
use crate::execution::{ProcessCompletionListener, ProcessState, ProcessSummary, ThreadState};
use crate::job::node::{self, NewJob};
use crate::job::{DutyContext, JobHandle, JobId};
use crate::managed_object::{
    AsynchronousListener, AsynchronousManagedObject, CoordinatingManagedObject, ManagedObject, ManagedObjectPool,
    ManagedObjectSource, ManagedObjectUser, ObjectRegistry, RecycleParameter,
};
use crate::meta::{FlowInstigationStrategy, FlowMetaData, JobMetaData, Parameter, ProcessMetaData, TaskMetaData, WorkMetaData};
use crate::office::{Office, OfficeBuilder};
use crate::team::{PassiveTeam, Team};

/// Office on a passive team and a manual clock, with a recording catch-all.
pub(crate) fn recording_office(meta: ProcessMetaData) -> (Office, Arc<ManualClock>, Arc<RecordingEscalations>) {
    let clock = Arc::new(ManualClock::new(0));
    let escalations = Arc::new(RecordingEscalations::default());
    let office = OfficeBuilder::new(OfficeConfig::default(), clock.clone())
        .expect("default config is valid")
        .catch_all(escalations.clone())
        .process_meta(meta)
        .build();
    (office, clock, escalations)
}

pub(crate) fn test_office_with(meta: ProcessMetaData) -> (Office, Arc<ManualClock>) {
    let (office, clock, _) = recording_office(meta);
    (office, clock)
}

pub(crate) fn noop_flow() -> Arc<FlowMetaData> {
    let team: Arc<dyn Team> = Arc::new(PassiveTeam::new("noop", Arc::new(ManualClock::new(0))));
    let task = TaskMetaData::new("noop", team, Arc::new(WorkMetaData::new("noop")), |_| Ok(()));
    FlowMetaData::new(FlowInstigationStrategy::Parallel, task.into())
}

/// Office, passive team and shared work for tests that need real jobs.
pub(crate) struct PassiveFixture {
    office: Office,
    clock: Arc<ManualClock>,
    escalations: Arc<RecordingEscalations>,
    team: Arc<dyn Team>,
    work: Arc<WorkMetaData>,
    executions: Arc<AtomicUsize>,
    recycled: Arc<AtomicUsize>,
}

impl PassiveFixture {
    pub(crate) fn new() -> Self {
        let (office, clock, escalations) = recording_office(ProcessMetaData::default());
        let team: Arc<dyn Team> = Arc::new(PassiveTeam::new("passive", clock.clone()));
        Self {
            office,
            clock,
            escalations,
            team,
            work: Arc::new(WorkMetaData::new("fixture")),
            executions: Arc::new(AtomicUsize::new(0)),
            recycled: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub(crate) fn office(&self) -> Office {
        self.office.clone()
    }

    pub(crate) fn clock(&self) -> &Arc<ManualClock> {
        &self.clock
    }

    /// Task bodies run so far by jobs from [`suspended_job`](Self::suspended_job).
    pub(crate) fn executions(&self) -> usize {
        self.executions.load(Ordering::SeqCst)
    }

    pub(crate) fn last_escalation(&self) -> Option<Failure> {
        self.escalations.failures().pop()
    }

    pub(crate) fn noop_job(&self, name: &str) -> JobMetaData {
        TaskMetaData::new(name, self.team.clone(), self.work.clone(), |_| Ok(())).into()
    }

    /// A job on a thread of its own that has not been activated yet.
    pub(crate) fn bare_job(&self) -> (Arc<ThreadState>, JobId) {
        self.create(self.noop_job("root"))
    }

    /// A job parked as if it had suspended; running it counts an execution.
    pub(crate) fn suspended_job(&self) -> JobHandle {
        let executions = self.executions.clone();
        let task = TaskMetaData::new("suspended", self.team.clone(), self.work.clone(), move |_| {
            executions.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        let (thread, job) = self.create(task.into());
        JobHandle::new(thread, job)
    }

    /// Flow that reuses its recycle parameter and counts the recycling.
    pub(crate) fn recycle_flow(&self) -> Arc<FlowMetaData> {
        let recycled = self.recycled.clone();
        let task = TaskMetaData::new("recycle", self.team.clone(), self.work.clone(), move |ctx| {
            if let Some(parameter) = ctx.parameter_as::<RecycleParameter>() {
                parameter.reuse();
            }
            recycled.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        FlowMetaData::new(FlowInstigationStrategy::Sequential, task.into())
    }

    pub(crate) fn recycled(&self) -> usize {
        self.recycled.load(Ordering::SeqCst)
    }

    fn create(&self, meta: JobMetaData) -> (Arc<ThreadState>, JobId) {
        let thread = ThreadState::new(ProcessState::new(self.office.clone()));
        let job = {
            let mut inner = thread.lock();
            let flow = inner.new_flow();
            node::create_job(&thread, &mut inner, flow, NewJob::new(meta, None))
        };
        (thread, job)
    }
}

/// Ordered record of what ran.
#[derive(Clone, Default)]
pub(crate) struct EventLog {
    events: Arc<Mutex<Vec<&'static str>>>,
    owned: Arc<Mutex<Vec<String>>>,
}

impl EventLog {
    pub(crate) fn push(&self, event: &'static str) {
        self.events.lock().push(event);
    }

    pub(crate) fn push_owned(&self, event: String) {
        self.owned.lock().push(event);
    }

    pub(crate) fn events(&self) -> Vec<&'static str> {
        self.events.lock().clone()
    }

    pub(crate) fn owned_events(&self) -> Vec<String> {
        self.owned.lock().clone()
    }
}

#[derive(Default)]
pub(crate) struct RecordingEscalations {
    failures: Mutex<Vec<Failure>>,
}

impl RecordingEscalations {
    pub(crate) fn failures(&self) -> Vec<Failure> {
        self.failures.lock().clone()
    }

    pub(crate) fn messages(&self) -> Vec<String> {
        self.failures.lock().iter().map(Failure::to_string).collect()
    }
}

impl EscalationHandler for RecordingEscalations {
    fn handle_escalation(&self, cause: &Failure) {
        self.failures.lock().push(cause.clone());
    }
}

#[derive(Default)]
pub(crate) struct RecordingListener {
    completions: AtomicUsize,
}

impl RecordingListener {
    pub(crate) fn completions(&self) -> usize {
        self.completions.load(Ordering::SeqCst)
    }
}

impl ProcessCompletionListener for RecordingListener {
    fn process_completed(&self, _summary: &ProcessSummary) {
        self.completions.fetch_add(1, Ordering::SeqCst);
    }
}

pub(crate) struct RecordingAsset {
    failure: Option<&'static str>,
    reports: AtomicUsize,
    last_time: Mutex<Option<u64>>,
}

impl RecordingAsset {
    pub(crate) fn healthy() -> Self {
        Self {
            failure: None,
            reports: AtomicUsize::new(0),
            last_time: Mutex::new(None),
        }
    }

    pub(crate) fn failing(message: &'static str) -> Self {
        Self {
            failure: Some(message),
            ..Self::healthy()
        }
    }

    pub(crate) fn reports(&self) -> usize {
        self.reports.load(Ordering::SeqCst)
    }

    pub(crate) fn last_time(&self) -> Option<u64> {
        *self.last_time.lock()
    }
}

impl Asset for RecordingAsset {
    fn report_on_asset(&self, report: &mut AssetReport) {
        self.reports.fetch_add(1, Ordering::SeqCst);
        *self.last_time.lock() = Some(report.time());
        if let Some(message) = self.failure {
            report.set_failure(Failure::msg(message));
        }
    }
}

/// Source that holds on to sourcing requests until the test answers them.
#[derive(Default)]
pub(crate) struct RecordingSource {
    pending: Mutex<Vec<ManagedObjectUser>>,
    requests: AtomicUsize,
}

impl RecordingSource {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    /// Answers the oldest outstanding request.
    pub(crate) fn provide(&self, managed_object: Arc<dyn ManagedObject>) -> Result<(), RuntimeError> {
        self.next_user()?.set_managed_object(managed_object)
    }

    pub(crate) fn fail(&self, cause: Failure) -> Result<(), RuntimeError> {
        self.next_user()?.set_failure(cause)
    }

    fn next_user(&self) -> Result<ManagedObjectUser, RuntimeError> {
        let mut pending = self.pending.lock();
        if pending.is_empty() {
            return Err(RuntimeError::IllegalState("no outstanding sourcing request".into()));
        }
        Ok(pending.remove(0))
    }
}

impl ManagedObjectSource for RecordingSource {
    fn source_managed_object(&self, user: ManagedObjectUser) {
        self.requests.fetch_add(1, Ordering::SeqCst);
        self.pending.lock().push(user);
    }
}

/// Managed object whose object is its name, or a failure.
pub(crate) struct TestObject {
    name: String,
    broken: bool,
}

impl TestObject {
    pub(crate) fn shared(name: &str) -> Arc<dyn ManagedObject> {
        Arc::new(Self {
            name: name.to_string(),
            broken: false,
        })
    }

    pub(crate) fn broken(message: &str) -> Arc<dyn ManagedObject> {
        Arc::new(Self {
            name: message.to_string(),
            broken: true,
        })
    }
}

impl ManagedObject for TestObject {
    fn object(&self) -> anyhow::Result<Parameter> {
        if self.broken {
            anyhow::bail!("{}", self.name);
        }
        Ok(Arc::new(self.name.clone()))
    }

    fn extension(&self) -> Option<Parameter> {
        Some(Arc::new(format!("{}-extension", self.name)))
    }
}

#[derive(Default)]
pub(crate) struct AsyncObject {
    listener: Mutex<Option<AsynchronousListener>>,
}

impl AsyncObject {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn listener(&self) -> AsynchronousListener {
        self.listener.lock().clone().expect("listener registered on load")
    }
}

impl ManagedObject for AsyncObject {
    fn object(&self) -> anyhow::Result<Parameter> {
        Ok(Arc::new("async".to_string()))
    }

    fn asynchronous(&self) -> Option<&dyn AsynchronousManagedObject> {
        Some(self)
    }
}

impl AsynchronousManagedObject for AsyncObject {
    fn register_asynchronous_listener(&self, listener: AsynchronousListener) {
        *self.listener.lock() = Some(listener);
    }
}

#[derive(Default)]
pub(crate) struct CoordinatingObject {
    coordinations: Mutex<Vec<Vec<String>>>,
}

impl CoordinatingObject {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn coordinations(&self) -> Vec<Vec<String>> {
        self.coordinations.lock().clone()
    }
}

impl ManagedObject for CoordinatingObject {
    fn object(&self) -> anyhow::Result<Parameter> {
        Ok(Arc::new("coordinating".to_string()))
    }

    fn coordinating(&self) -> Option<&dyn CoordinatingManagedObject> {
        Some(self)
    }
}

impl CoordinatingManagedObject for CoordinatingObject {
    fn coordinate(&self, registry: &ObjectRegistry) -> anyhow::Result<()> {
        let names = (0..registry.len())
            .map(|index| registry.get_as::<String>(index).map(|name| name.as_str().to_string()))
            .collect::<anyhow::Result<Vec<_>>>()?;
        self.coordinations.lock().push(names);
        Ok(())
    }
}

/// Pool that counts traffic and sources through an optional source.
#[derive(Default)]
pub(crate) struct CountingPool {
    source: Option<Arc<dyn ManagedObjectSource>>,
    sourced: AtomicUsize,
    returned: AtomicUsize,
    lost: AtomicUsize,
}

impl CountingPool {
    pub(crate) fn with_source(source: Arc<dyn ManagedObjectSource>) -> Self {
        Self {
            source: Some(source),
            ..Self::default()
        }
    }

    pub(crate) fn sourced(&self) -> usize {
        self.sourced.load(Ordering::SeqCst)
    }

    pub(crate) fn returned(&self) -> usize {
        self.returned.load(Ordering::SeqCst)
    }
}

impl ManagedObjectPool for CountingPool {
    fn source_managed_object(&self, user: ManagedObjectUser) {
        self.sourced.fetch_add(1, Ordering::SeqCst);
        if let Some(source) = &self.source {
            source.source_managed_object(user);
        }
    }

    fn return_managed_object(&self, _managed_object: Arc<dyn ManagedObject>) {
        self.returned.fetch_add(1, Ordering::SeqCst);
    }

    fn lost_managed_object(&self, _managed_object: Arc<dyn ManagedObject>, _cause: &Failure) {
        self.lost.fetch_add(1, Ordering::SeqCst);
    }
}

struct NoopAdministrator;

impl Administrator for NoopAdministrator {
    fn do_duty(&self, _key: DutyKey, _context: &mut DutyContext<'_>) -> anyhow::Result<()> {
        Ok(())
    }
}

pub(crate) struct NoopAdministratorSource;

impl AdministratorSource for NoopAdministratorSource {
    fn create_administrator(&self) -> anyhow::Result<Arc<dyn Administrator>> {
        Ok(Arc::new(NoopAdministrator))
    }
}
