//! The office: root handle of a running taskfloor runtime.
//!
//! An [`Office`] owns the teams, the asset manager and the process
//! metadata. Building one is two-phase: [`OfficeBuilder::new`] creates the
//! teams named in [`OfficeConfig`] so task metadata can refer to them, then
//! [`OfficeBuilder::build`] takes the finished [`ProcessMetaData`] and puts
//! the teams to work.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::asset::AssetManager;
use crate::clock::Clock;
use crate::config::{OfficeConfig, TeamKind};
use crate::error::RuntimeError;
use crate::escalation::{EscalationHandler, StderrEscalationHandler};
use crate::execution::{ProcessCompletionListener, ProcessState, ProcessSummary, ThreadState};
use crate::job::node::{self, NewJob};
use crate::job::{JobHandle, activate_job};
use crate::managed_object::ManagedObjectSource;
use crate::meta::{FlowMetaData, ManagedObjectMetaData, Parameter, ProcessMetaData};
use crate::team::{OnePersonTeam, PassiveTeam, Team, WorkerPoolTeam};

struct OfficeInner {
    config: OfficeConfig,
    clock: Arc<dyn Clock>,
    asset_manager: Arc<AssetManager>,
    process_meta: Arc<ProcessMetaData>,
    catch_all: Arc<dyn EscalationHandler>,
    teams: HashMap<String, Arc<dyn Team>>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

/// Cheap to clone; every clone is the same office.
#[derive(Clone)]
pub struct Office {
    inner: Arc<OfficeInner>,
}

pub struct OfficeBuilder {
    config: OfficeConfig,
    clock: Arc<dyn Clock>,
    teams: HashMap<String, Arc<dyn Team>>,
    process_meta: ProcessMetaData,
    catch_all: Arc<dyn EscalationHandler>,
}

impl OfficeBuilder {
    pub fn new(config: OfficeConfig, clock: Arc<dyn Clock>) -> Result<Self, RuntimeError> {
        config.validate()?;
        let teams = Office::build_teams(&config, &clock)?;
        Ok(Self {
            config,
            clock,
            teams,
            process_meta: ProcessMetaData::default(),
            catch_all: Arc::new(StderrEscalationHandler),
        })
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn config(&self) -> &OfficeConfig {
        &self.config
    }

    /// Managed object metadata carrying the configured default timeout.
    pub fn managed_object(&self, name: impl Into<String>, source: Arc<dyn ManagedObjectSource>) -> ManagedObjectMetaData {
        ManagedObjectMetaData::new(name, source, self.config.default_timeout_ms)
    }

    /// Team registered under `name` in the configuration.
    pub fn team(&self, name: &str) -> Result<Arc<dyn Team>, RuntimeError> {
        self.teams
            .get(name)
            .cloned()
            .ok_or_else(|| RuntimeError::UnknownTeam(name.to_string()))
    }

    /// Adds a team not described by the configuration.
    pub fn with_team(mut self, team: Arc<dyn Team>) -> Self {
        self.teams.insert(team.name().to_string(), team);
        self
    }

    pub fn catch_all(mut self, handler: Arc<dyn EscalationHandler>) -> Self {
        self.catch_all = handler;
        self
    }

    pub fn process_meta(mut self, meta: ProcessMetaData) -> Self {
        self.process_meta = meta;
        self
    }

    pub fn build(self) -> Office {
        for team in self.teams.values() {
            team.start_working();
        }
        info!(teams = self.teams.len(), "office open");
        Office {
            inner: Arc::new(OfficeInner {
                asset_manager: AssetManager::new(self.clock.clone()),
                config: self.config,
                clock: self.clock,
                process_meta: Arc::new(self.process_meta),
                catch_all: self.catch_all,
                teams: self.teams,
                sweeper: Mutex::new(None),
            }),
        }
    }
}

impl Office {
    /// Resolves every `[teams.<name>]` entry to a team. Worker pools need
    /// to be built inside a tokio runtime.
    pub fn build_teams(
        config: &OfficeConfig,
        clock: &Arc<dyn Clock>,
    ) -> Result<HashMap<String, Arc<dyn Team>>, RuntimeError> {
        let mut teams: HashMap<String, Arc<dyn Team>> = HashMap::new();
        for (name, team) in &config.teams {
            let built: Arc<dyn Team> = match team.kind {
                TeamKind::Passive => Arc::new(PassiveTeam::new(name.clone(), clock.clone())),
                TeamKind::OnePerson => Arc::new(OnePersonTeam::new(name.clone(), clock.clone())),
                TeamKind::WorkerPool => {
                    let runtime = Handle::try_current().map_err(|err| {
                        RuntimeError::Config(format!("worker pool team '{name}' needs a tokio runtime: {err}"))
                    })?;
                    Arc::new(WorkerPoolTeam::new(name.clone(), team.size, clock.clone(), runtime))
                }
            };
            debug!(team = %name, kind = ?team.kind, "team created");
            teams.insert(name.clone(), built);
        }
        Ok(teams)
    }

    pub fn config(&self) -> &OfficeConfig {
        &self.inner.config
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.inner.clock
    }

    pub fn asset_manager(&self) -> &Arc<AssetManager> {
        &self.inner.asset_manager
    }

    pub fn process_meta(&self) -> &Arc<ProcessMetaData> {
        &self.inner.process_meta
    }

    pub fn catch_all(&self) -> &Arc<dyn EscalationHandler> {
        &self.inner.catch_all
    }

    pub fn team(&self, name: &str) -> Result<Arc<dyn Team>, RuntimeError> {
        self.inner
            .teams
            .get(name)
            .cloned()
            .ok_or_else(|| RuntimeError::UnknownTeam(name.to_string()))
    }

    /// Starts `flow` as a new process: a fresh process state, one thread,
    /// one flow, and the flow's initial job activated with `parameter`.
    pub fn invoke_process(
        &self,
        flow: &Arc<FlowMetaData>,
        parameter: Option<Parameter>,
        listener: Option<Arc<dyn ProcessCompletionListener>>,
    ) -> ProcessFuture {
        let process = ProcessState::new(self.clone());
        if let Some(listener) = listener {
            if let Err(err) = process.add_completion_listener(listener) {
                warn!(%err, "completion listener not registered");
            }
        }
        let receiver = process.subscribe();

        let thread = ThreadState::new(process.clone());
        let job = {
            let mut inner = thread.lock();
            let flow_id = inner.new_flow();
            node::create_job(&thread, &mut inner, flow_id, NewJob::new(flow.initial_job.clone(), parameter))
        };
        info!(process = %process.id(), task = flow.initial_job.name(), "process invoked");
        activate_job(JobHandle::new(thread, job));

        ProcessFuture { process, receiver }
    }

    /// Sweeps assets every `monitor_interval_ms` on the current tokio
    /// runtime until [`shutdown`](Self::shutdown).
    pub fn spawn_asset_sweeper(&self) -> Result<(), RuntimeError> {
        let runtime = Handle::try_current()
            .map_err(|err| RuntimeError::Config(format!("asset sweeper needs a tokio runtime: {err}")))?;
        let manager = self.inner.asset_manager.clone();
        let period = Duration::from_millis(self.inner.config.monitor_interval_ms.max(1));
        let handle = runtime.spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                let manager = manager.clone();
                if let Err(err) = tokio::task::spawn_blocking(move || manager.manage_assets()).await {
                    warn!(%err, "asset sweep panicked");
                }
            }
        });
        if let Some(previous) = self.inner.sweeper.lock().replace(handle) {
            previous.abort();
        }
        Ok(())
    }

    /// Stops the sweeper and the teams. Jobs already running finish.
    pub fn shutdown(&self) {
        if let Some(sweeper) = self.inner.sweeper.lock().take() {
            sweeper.abort();
        }
        for team in self.inner.teams.values() {
            team.stop_working();
        }
        info!("office closed");
    }
}

impl fmt::Debug for Office {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Office")
            .field("teams", &self.inner.teams.keys().collect::<Vec<_>>())
            .field("monitor_interval_ms", &self.inner.config.monitor_interval_ms)
            .finish()
    }
}

/// Completion handle of an invoked process.
pub struct ProcessFuture {
    process: Arc<ProcessState>,
    receiver: watch::Receiver<bool>,
}

impl ProcessFuture {
    pub fn process(&self) -> &Arc<ProcessState> {
        &self.process
    }

    pub fn is_complete(&self) -> bool {
        *self.receiver.borrow()
    }

    pub fn summary(&self) -> ProcessSummary {
        self.process.summary()
    }

    /// Resolves once the process has completed.
    pub async fn wait(&self) -> ProcessSummary {
        let mut receiver = self.receiver.clone();
        if receiver.wait_for(|done| *done).await.is_err() {
            warn!(process = %self.process.id(), "process dropped before completing");
        }
        self.process.summary()
    }
}

impl fmt::Debug for ProcessFuture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessFuture")
            .field("process", &self.process.id())
            .field("complete", &self.is_complete())
            .finish()
    }
}
