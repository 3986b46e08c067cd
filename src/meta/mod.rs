//! Read-only metadata consumed by the runtime.
//!
//! Everything here is resolved once, before any process is invoked.
//! At runtime managed objects and administrators are addressed purely by
//! [`ManagedObjectIndex`] / [`AdministratorIndex`]; names are only kept
//! for logging.

mod registry;

pub use registry::{Issue, ScopeRegistry};

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use crate::administrator::AdministratorSource;
use crate::escalation::EscalationProcedure;
use crate::job::context::TaskContext;
use crate::managed_object::{ManagedObjectPool, ManagedObjectSource};
use crate::team::Team;

/// Type-erased value passed between jobs (flow parameters, work objects).
pub type Parameter = Arc<dyn Any + Send + Sync>;

pub type TaskBody = Arc<dyn Fn(&mut TaskContext<'_>) -> anyhow::Result<()> + Send + Sync>;

pub type WorkFactory = Arc<dyn Fn() -> anyhow::Result<Parameter> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    Work,
    Thread,
    Process,
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::Work => write!(f, "work"),
            Scope::Thread => write!(f, "thread"),
            Scope::Process => write!(f, "process"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ManagedObjectIndex {
    pub scope: Scope,
    pub index: usize,
}

impl ManagedObjectIndex {
    pub fn work(index: usize) -> Self {
        Self {
            scope: Scope::Work,
            index,
        }
    }

    pub fn thread(index: usize) -> Self {
        Self {
            scope: Scope::Thread,
            index,
        }
    }

    pub fn process(index: usize) -> Self {
        Self {
            scope: Scope::Process,
            index,
        }
    }
}

impl fmt::Display for ManagedObjectIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.scope, self.index)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AdministratorIndex {
    pub scope: Scope,
    pub index: usize,
}

impl AdministratorIndex {
    pub fn new(scope: Scope, index: usize) -> Self {
        Self { scope, index }
    }
}

impl fmt::Display for AdministratorIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.scope, self.index)
    }
}

/// How an instigated flow relates to the instigating job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowInstigationStrategy {
    /// Runs after the instigating job, in the same flow.
    Sequential,
    /// Runs in a new flow on the same thread; the instigating job waits for it.
    Parallel,
    /// Runs on a new thread of the same process.
    Asynchronous,
}

pub struct FlowMetaData {
    pub strategy: FlowInstigationStrategy,
    pub initial_job: JobMetaData,
}

impl FlowMetaData {
    pub fn new(strategy: FlowInstigationStrategy, initial_job: JobMetaData) -> Arc<Self> {
        Arc::new(Self {
            strategy,
            initial_job,
        })
    }
}

/// The user object tasks of a work operate on, and the work-scoped
/// managed objects and administrators around it.
pub struct WorkMetaData {
    pub name: String,
    pub create_work: Option<WorkFactory>,
    pub managed_objects: Vec<Arc<ManagedObjectMetaData>>,
    pub administrators: Vec<Arc<AdministratorMetaData>>,
}

impl WorkMetaData {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            create_work: None,
            managed_objects: Vec::new(),
            administrators: Vec::new(),
        }
    }
}

pub struct ManagedObjectMetaData {
    pub name: String,
    pub source: Arc<dyn ManagedObjectSource>,
    pub pool: Option<Arc<dyn ManagedObjectPool>>,
    /// Bounds both sourcing and asynchronous operations.
    pub timeout_ms: u64,
    /// Objects handed to a coordinating managed object, in order.
    pub dependencies: Vec<ManagedObjectIndex>,
    /// Flow invoked as a new process to recycle the object on unload.
    pub recycle: Option<Arc<FlowMetaData>>,
}

impl ManagedObjectMetaData {
    pub fn new(name: impl Into<String>, source: Arc<dyn ManagedObjectSource>, timeout_ms: u64) -> Self {
        Self {
            name: name.into(),
            source,
            pool: None,
            timeout_ms,
            dependencies: Vec::new(),
            recycle: None,
        }
    }
}

pub struct DutyMetaData {
    pub name: String,
    pub flows: Vec<Arc<FlowMetaData>>,
}

pub struct AdministratorMetaData {
    pub name: String,
    pub source: Arc<dyn AdministratorSource>,
    pub administered: Vec<ManagedObjectIndex>,
    pub duties: Vec<DutyMetaData>,
}

/// A duty run around a task, before or after its body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskDutyAssociation {
    pub administrator: AdministratorIndex,
    pub duty: usize,
}

pub struct TaskMetaData {
    pub name: String,
    pub team: Arc<dyn Team>,
    pub work: Arc<WorkMetaData>,
    pub body: TaskBody,
    pub required_managed_objects: Vec<ManagedObjectIndex>,
    pub pre_duties: Vec<TaskDutyAssociation>,
    pub post_duties: Vec<TaskDutyAssociation>,
    pub flows: Vec<Arc<FlowMetaData>>,
    pub next_job: Option<JobMetaData>,
    pub escalation_procedure: Option<Arc<EscalationProcedure>>,
}

impl TaskMetaData {
    pub fn new(
        name: impl Into<String>,
        team: Arc<dyn Team>,
        work: Arc<WorkMetaData>,
        body: impl Fn(&mut TaskContext<'_>) -> anyhow::Result<()> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            team,
            work,
            body: Arc::new(body),
            required_managed_objects: Vec::new(),
            pre_duties: Vec::new(),
            post_duties: Vec::new(),
            flows: Vec::new(),
            next_job: None,
            escalation_procedure: None,
        }
    }
}

/// A single administrator duty scheduled as a job of its own.
pub struct DutyJobMetaData {
    pub name: String,
    pub team: Arc<dyn Team>,
    pub work: Arc<WorkMetaData>,
    pub duty: TaskDutyAssociation,
    pub required_managed_objects: Vec<ManagedObjectIndex>,
    pub next_job: Option<JobMetaData>,
    pub escalation_procedure: Option<Arc<EscalationProcedure>>,
}

#[derive(Clone)]
pub enum JobMetaData {
    Task(Arc<TaskMetaData>),
    Duty(Arc<DutyJobMetaData>),
}

impl JobMetaData {
    pub fn name(&self) -> &str {
        match self {
            JobMetaData::Task(task) => &task.name,
            JobMetaData::Duty(duty) => &duty.name,
        }
    }

    pub fn team(&self) -> &Arc<dyn Team> {
        match self {
            JobMetaData::Task(task) => &task.team,
            JobMetaData::Duty(duty) => &duty.team,
        }
    }

    pub fn work(&self) -> &Arc<WorkMetaData> {
        match self {
            JobMetaData::Task(task) => &task.work,
            JobMetaData::Duty(duty) => &duty.work,
        }
    }

    pub fn required_managed_objects(&self) -> &[ManagedObjectIndex] {
        match self {
            JobMetaData::Task(task) => &task.required_managed_objects,
            JobMetaData::Duty(duty) => &duty.required_managed_objects,
        }
    }

    pub fn pre_duties(&self) -> &[TaskDutyAssociation] {
        match self {
            JobMetaData::Task(task) => &task.pre_duties,
            JobMetaData::Duty(_) => &[],
        }
    }

    pub fn post_duties(&self) -> &[TaskDutyAssociation] {
        match self {
            JobMetaData::Task(task) => &task.post_duties,
            JobMetaData::Duty(_) => &[],
        }
    }

    pub fn next_job(&self) -> Option<&JobMetaData> {
        match self {
            JobMetaData::Task(task) => task.next_job.as_ref(),
            JobMetaData::Duty(duty) => duty.next_job.as_ref(),
        }
    }

    pub fn escalation_procedure(&self) -> Option<&Arc<EscalationProcedure>> {
        match self {
            JobMetaData::Task(task) => task.escalation_procedure.as_ref(),
            JobMetaData::Duty(duty) => duty.escalation_procedure.as_ref(),
        }
    }
}

impl From<TaskMetaData> for JobMetaData {
    fn from(task: TaskMetaData) -> Self {
        JobMetaData::Task(Arc::new(task))
    }
}

impl From<DutyJobMetaData> for JobMetaData {
    fn from(duty: DutyJobMetaData) -> Self {
        JobMetaData::Duty(Arc::new(duty))
    }
}

impl fmt::Debug for JobMetaData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobMetaData::Task(task) => write!(f, "Task({})", task.name),
            JobMetaData::Duty(duty) => write!(f, "Duty({})", duty.name),
        }
    }
}

/// Process-wide and thread-wide scopes, plus the process fallback
/// procedure consulted after a job's own escalation procedure.
#[derive(Default)]
pub struct ProcessMetaData {
    pub managed_objects: Vec<Arc<ManagedObjectMetaData>>,
    pub administrators: Vec<Arc<AdministratorMetaData>>,
    pub thread_managed_objects: Vec<Arc<ManagedObjectMetaData>>,
    pub thread_administrators: Vec<Arc<AdministratorMetaData>>,
    pub escalation_procedure: Option<Arc<EscalationProcedure>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::team::PassiveTeam;

    #[test]
    fn job_meta_data_accessors() {
        let team: Arc<dyn Team> = Arc::new(PassiveTeam::new("passive", Arc::new(ManualClock::new(0))));
        let work = Arc::new(WorkMetaData::new("work"));
        let next: JobMetaData = TaskMetaData::new("second", team.clone(), work.clone(), |_| Ok(())).into();
        let mut first = TaskMetaData::new("first", team, work, |_| Ok(()));
        first.required_managed_objects = vec![ManagedObjectIndex::process(0)];
        first.next_job = Some(next);
        let first: JobMetaData = first.into();

        assert_eq!(first.name(), "first");
        assert_eq!(first.team().name(), "passive");
        assert_eq!(first.required_managed_objects(), &[ManagedObjectIndex::process(0)]);
        assert_eq!(first.next_job().map(JobMetaData::name), Some("second"));
        assert!(first.pre_duties().is_empty());
        assert!(first.escalation_procedure().is_none());
        assert_eq!(format!("{first:?}"), "Task(first)");
    }

    #[test]
    fn index_display() {
        assert_eq!(ManagedObjectIndex::work(2).to_string(), "work[2]");
        assert_eq!(AdministratorIndex::new(Scope::Process, 0).to_string(), "process[0]");
    }
}
