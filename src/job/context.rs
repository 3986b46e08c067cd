//! What a task body or an administrator duty sees while it runs.

use std::any::Any;
use std::sync::Arc;

use anyhow::{Context, anyhow};
use uuid::Uuid;

use super::node::{self, NewJob};
use super::JobHandle;
use crate::asset::AssetMonitor;
use crate::execution::{FlowFuture, ThreadInner, WorkContainer};
use crate::managed_object::ManagedObjectContainer;
use crate::meta::{AdministratorMetaData, FlowInstigationStrategy, FlowMetaData, Parameter, TaskMetaData};

/// State shared by task and duty contexts: the running job and its thread.
pub(crate) struct JobScope<'a> {
    handle: &'a JobHandle,
    inner: &'a mut ThreadInner,
    work: &'a Arc<WorkContainer>,
    parameter: Option<Parameter>,
    time: u64,
}

impl<'a> JobScope<'a> {
    pub(crate) fn new(
        handle: &'a JobHandle,
        inner: &'a mut ThreadInner,
        work: &'a Arc<WorkContainer>,
        parameter: Option<Parameter>,
        time: u64,
    ) -> Self {
        Self {
            handle,
            inner,
            work,
            parameter,
            time,
        }
    }

    fn instigate(&mut self, flow: &FlowMetaData, parameter: Option<Parameter>) -> FlowFuture {
        let thread = self.handle.thread();
        let job = self.handle.id();
        let initial = flow.initial_job.clone();
        let flow_id = match flow.strategy {
            FlowInstigationStrategy::Sequential => {
                node::instigate_sequential(thread, self.inner, job, initial, parameter)
            }
            FlowInstigationStrategy::Parallel => {
                node::instigate_parallel(thread, self.inner, job, NewJob::new(initial, parameter))
                    .map(|(flow, _)| flow)
            }
            FlowInstigationStrategy::Asynchronous => {
                return node::instigate_asynchronous(thread, Some(self.work.clone()), initial, parameter);
            }
        };
        match flow_id {
            Some(flow) => node::flow_future(thread, self.inner, flow),
            None => FlowFuture::new(thread.id(), node::completed_monitor()),
        }
    }
}

fn downcast<T: Any + Send + Sync>(value: Parameter, what: &str) -> anyhow::Result<Arc<T>> {
    value
        .downcast::<T>()
        .map_err(|_| anyhow!("{what} is not a {}", std::any::type_name::<T>()))
}

/// Handed to a task body.
pub struct TaskContext<'a> {
    scope: JobScope<'a>,
    task: &'a TaskMetaData,
    objects: Vec<Arc<ManagedObjectContainer>>,
    joins: Vec<Arc<AssetMonitor>>,
    next_parameter: Option<Parameter>,
}

impl<'a> TaskContext<'a> {
    pub(crate) fn new(scope: JobScope<'a>, task: &'a TaskMetaData, objects: Vec<Arc<ManagedObjectContainer>>) -> Self {
        Self {
            scope,
            task,
            objects,
            joins: Vec::new(),
            next_parameter: None,
        }
    }

    pub fn task_name(&self) -> &str {
        &self.task.name
    }

    /// Clock reading taken when the job was picked up by its team.
    pub fn time(&self) -> u64 {
        self.scope.time
    }

    pub fn process_id(&self) -> Uuid {
        self.scope.handle.thread().process().id()
    }

    pub fn thread_id(&self) -> Uuid {
        self.scope.handle.thread().id()
    }

    pub fn parameter(&self) -> Option<Parameter> {
        self.scope.parameter.clone()
    }

    pub fn parameter_as<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.parameter().and_then(|value| value.downcast::<T>().ok())
    }

    /// Object of the `index`-th required managed object.
    pub fn object(&self, index: usize) -> anyhow::Result<Parameter> {
        let container = self
            .objects
            .get(index)
            .with_context(|| format!("task '{}' has no managed object {index}", self.task.name))?;
        Ok(container.get_object()?)
    }

    pub fn object_as<T: Any + Send + Sync>(&self, index: usize) -> anyhow::Result<Arc<T>> {
        downcast(self.object(index)?, &format!("managed object {index}"))
    }

    /// The work object shared by all tasks of this work.
    pub fn work<T: Any + Send + Sync>(&self) -> anyhow::Result<Arc<T>> {
        let object = self.scope.work.work_object()?;
        downcast(object, &format!("work object of '{}'", self.scope.work.meta().name))
    }

    /// Instigates the `index`-th flow of this task.
    pub fn do_flow(&mut self, index: usize, parameter: Option<Parameter>) -> anyhow::Result<FlowFuture> {
        let flow = self
            .task
            .flows
            .get(index)
            .with_context(|| format!("task '{}' has no flow {index}", self.task.name))?
            .clone();
        Ok(self.scope.instigate(&flow, parameter))
    }

    /// Holds this job back until `future`'s flow completes. Flows of this
    /// job's own thread are awaited through the parallel chain instead, so
    /// joining them is a no-op.
    pub fn join(&mut self, future: &FlowFuture) {
        if future.thread_id() == self.scope.handle.thread().id() || future.is_complete() {
            return;
        }
        self.joins.push(future.monitor().clone());
    }

    /// Parameter handed to the task's static next job.
    pub fn set_next_parameter(&mut self, parameter: Parameter) {
        self.next_parameter = Some(parameter);
    }

    pub(crate) fn into_outcome(self) -> (Vec<Arc<AssetMonitor>>, Option<Parameter>) {
        (self.joins, self.next_parameter)
    }
}

/// Handed to an administrator for one duty.
pub struct DutyContext<'a> {
    scope: JobScope<'a>,
    administrator: &'a AdministratorMetaData,
    duty: usize,
    extensions: Vec<Arc<ManagedObjectContainer>>,
}

impl<'a> DutyContext<'a> {
    pub(crate) fn new(
        scope: JobScope<'a>,
        administrator: &'a AdministratorMetaData,
        duty: usize,
        extensions: Vec<Arc<ManagedObjectContainer>>,
    ) -> Self {
        Self {
            scope,
            administrator,
            duty,
            extensions,
        }
    }

    pub fn duty_name(&self) -> &str {
        self.administrator
            .duties
            .get(self.duty)
            .map(|duty| duty.name.as_str())
            .unwrap_or_default()
    }

    pub fn administrator_name(&self) -> &str {
        &self.administrator.name
    }

    pub fn time(&self) -> u64 {
        self.scope.time
    }

    pub fn parameter(&self) -> Option<Parameter> {
        self.scope.parameter.clone()
    }

    pub fn parameter_as<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.parameter().and_then(|value| value.downcast::<T>().ok())
    }

    /// Number of administered managed objects.
    pub fn extensions(&self) -> usize {
        self.extensions.len()
    }

    /// Extension interface of the `index`-th administered managed object.
    pub fn extension(&self, index: usize) -> anyhow::Result<Parameter> {
        let container = self
            .extensions
            .get(index)
            .with_context(|| format!("administrator '{}' has no managed object {index}", self.administrator.name))?;
        container
            .extension()
            .with_context(|| format!("managed object '{}' has no extension", container.meta().name))
    }

    pub fn extension_as<T: Any + Send + Sync>(&self, index: usize) -> anyhow::Result<Arc<T>> {
        downcast(self.extension(index)?, &format!("extension {index}"))
    }

    /// Instigates the `index`-th flow of this duty.
    pub fn do_flow(&mut self, index: usize, parameter: Option<Parameter>) -> anyhow::Result<FlowFuture> {
        let flow = self
            .administrator
            .duties
            .get(self.duty)
            .and_then(|duty| duty.flows.get(index))
            .with_context(|| format!("duty '{}' has no flow {index}", self.duty_name()))?
            .clone();
        Ok(self.scope.instigate(&flow, parameter))
    }
}
