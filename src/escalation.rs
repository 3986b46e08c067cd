//! Escalation: routing a failed job's cause to a handler flow.
//!
//! Levels are matched strictly in declared order and the first match wins,
//! even when a later level would match a more specific type. A failure
//! raised by a handler flow is not matched against the remaining levels of
//! the procedure that produced the handler; it continues with that
//! procedure's parent.

use std::fmt;
use std::sync::Arc;

use tracing::error;

use crate::error::Failure;
use crate::meta::FlowMetaData;

type Predicate = Arc<dyn Fn(&Failure) -> bool + Send + Sync>;

/// Decides whether a level handles a cause.
#[derive(Clone)]
pub struct CauseMatcher {
    name: String,
    predicate: Predicate,
}

impl CauseMatcher {
    /// Matches causes of type `E`.
    pub fn of<E>() -> Self
    where
        E: fmt::Display + fmt::Debug + Send + Sync + 'static,
    {
        Self {
            name: std::any::type_name::<E>().to_string(),
            predicate: Arc::new(|cause| cause.is::<E>()),
        }
    }

    /// Matches causes of type `E` accepted by `accept`.
    pub fn when<E, F>(accept: F) -> Self
    where
        E: fmt::Display + fmt::Debug + Send + Sync + 'static,
        F: Fn(&E) -> bool + Send + Sync + 'static,
    {
        Self {
            name: format!("{}(filtered)", std::any::type_name::<E>()),
            predicate: Arc::new(move |cause| cause.downcast_ref::<E>().is_some_and(&accept)),
        }
    }

    pub fn any() -> Self {
        Self {
            name: "any".to_string(),
            predicate: Arc::new(|_| true),
        }
    }

    pub fn matches(&self, cause: &Failure) -> bool {
        (self.predicate)(cause)
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Debug for CauseMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CauseMatcher({})", self.name)
    }
}

#[derive(Clone)]
pub struct EscalationLevel {
    pub type_of_cause: CauseMatcher,
    /// Abandon the thread's remaining jobs and run the handler as the
    /// thread's only flow.
    pub reset_thread_state: bool,
    pub flow: Arc<FlowMetaData>,
}

impl fmt::Debug for EscalationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EscalationLevel")
            .field("type_of_cause", &self.type_of_cause)
            .field("reset_thread_state", &self.reset_thread_state)
            .finish()
    }
}

#[derive(Default)]
pub struct EscalationProcedure {
    levels: Vec<EscalationLevel>,
    parent: Option<Arc<EscalationProcedure>>,
}

impl EscalationProcedure {
    pub fn new(levels: Vec<EscalationLevel>) -> Self {
        Self { levels, parent: None }
    }

    pub fn with_parent(levels: Vec<EscalationLevel>, parent: Arc<EscalationProcedure>) -> Self {
        Self {
            levels,
            parent: Some(parent),
        }
    }

    pub fn levels(&self) -> &[EscalationLevel] {
        &self.levels
    }

    pub fn parent(&self) -> Option<&Arc<EscalationProcedure>> {
        self.parent.as_ref()
    }

    /// First level matching `cause`, searching this procedure then its
    /// ancestors. Also returns the parent of the procedure that matched.
    pub fn escalate(&self, cause: &Failure) -> Option<(EscalationLevel, Option<Arc<EscalationProcedure>>)> {
        if let Some(level) = self.levels.iter().find(|level| level.type_of_cause.matches(cause)) {
            return Some((level.clone(), self.parent.clone()));
        }
        self.parent.as_ref().and_then(|parent| parent.escalate(cause))
    }
}

/// Where the next escalation of a job starts looking.
#[derive(Clone, Default)]
pub enum EscalationFocus {
    /// The job's own procedure, then the process procedure.
    #[default]
    Job,
    /// Remaining procedures after a handler flow was chosen.
    Procedure {
        procedure: Arc<EscalationProcedure>,
        then_process: bool,
    },
    Process,
    CatchAll,
}

#[derive(Debug)]
pub enum EscalationOutcome {
    Handled {
        level: EscalationLevel,
        /// Focus of the handler flow's jobs.
        handler_focus: EscalationFocus,
    },
    Unhandled,
}

impl fmt::Debug for EscalationFocus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EscalationFocus::Job => write!(f, "Job"),
            EscalationFocus::Procedure { then_process, .. } => {
                write!(f, "Procedure(then_process: {then_process})")
            }
            EscalationFocus::Process => write!(f, "Process"),
            EscalationFocus::CatchAll => write!(f, "CatchAll"),
        }
    }
}

impl EscalationFocus {
    pub fn escalate(
        &self,
        cause: &Failure,
        job_procedure: Option<&Arc<EscalationProcedure>>,
        process_procedure: Option<&Arc<EscalationProcedure>>,
    ) -> EscalationOutcome {
        match self {
            EscalationFocus::Job => match job_procedure {
                Some(procedure) => search(procedure, cause, true, process_procedure),
                None => EscalationFocus::Process.escalate(cause, job_procedure, process_procedure),
            },
            EscalationFocus::Procedure {
                procedure,
                then_process,
            } => search(procedure, cause, *then_process, process_procedure),
            EscalationFocus::Process => match process_procedure {
                Some(procedure) => search(procedure, cause, false, process_procedure),
                None => EscalationOutcome::Unhandled,
            },
            EscalationFocus::CatchAll => EscalationOutcome::Unhandled,
        }
    }
}

fn search(
    procedure: &Arc<EscalationProcedure>,
    cause: &Failure,
    then_process: bool,
    process_procedure: Option<&Arc<EscalationProcedure>>,
) -> EscalationOutcome {
    match procedure.escalate(cause) {
        Some((level, parent)) => {
            let handler_focus = match parent {
                Some(procedure) => EscalationFocus::Procedure {
                    procedure,
                    then_process,
                },
                None if then_process => EscalationFocus::Process,
                None => EscalationFocus::CatchAll,
            };
            EscalationOutcome::Handled {
                level,
                handler_focus,
            }
        }
        None if then_process => EscalationFocus::Process.escalate(cause, None, process_procedure),
        None => EscalationOutcome::Unhandled,
    }
}

/// Last resort for failures no procedure handles. Must not fail.
pub trait EscalationHandler: Send + Sync {
    fn handle_escalation(&self, cause: &Failure);
}

/// Logs the cause with its full chain and writes it to stderr.
#[derive(Debug, Default)]
pub struct StderrEscalationHandler;

impl EscalationHandler for StderrEscalationHandler {
    fn handle_escalation(&self, cause: &Failure) {
        error!(%cause, "unhandled escalation");
        eprintln!("Unhandled escalation: {cause:?}");
    }
}
