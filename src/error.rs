use std::any::Any;
use std::fmt;
use std::sync::Arc;

use thiserror::Error;

/// A cause that can be escalated.
///
/// Wraps an [`anyhow::Error`] behind an `Arc` so one failure can be handed
/// to every job woken by a failed monitor.
#[derive(Clone)]
pub struct Failure(Arc<anyhow::Error>);

impl Failure {
    pub fn new<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self(Arc::new(anyhow::Error::new(error)))
    }

    pub fn msg(message: impl fmt::Display + fmt::Debug + Send + Sync + 'static) -> Self {
        Self(Arc::new(anyhow::Error::msg(message)))
    }

    pub fn downcast_ref<E>(&self) -> Option<&E>
    where
        E: fmt::Display + fmt::Debug + Send + Sync + 'static,
    {
        self.0.downcast_ref::<E>()
    }

    pub fn is<E>(&self) -> bool
    where
        E: fmt::Display + fmt::Debug + Send + Sync + 'static,
    {
        self.0.is::<E>()
    }

    pub fn as_error(&self) -> &(dyn std::error::Error + Send + Sync + 'static) {
        &**self.0
    }

    /// The cause handed to escalation handlers.
    ///
    /// Lifecycle errors that wrap a cause are unwrapped to it; everything
    /// else escalates as is.
    pub fn escalation_cause(&self) -> Failure {
        match self.downcast_ref::<ExecutionError>().and_then(ExecutionError::cause) {
            Some(cause) => cause.escalation_cause(),
            None => self.clone(),
        }
    }

    pub fn ptr_eq(&self, other: &Failure) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl From<anyhow::Error> for Failure {
    fn from(error: anyhow::Error) -> Self {
        // `?` on a Failure inside a task body wraps it in anyhow.
        match error.downcast::<Failure>() {
            Ok(failure) => failure,
            Err(error) => Self(Arc::new(error)),
        }
    }
}

impl From<ExecutionError> for Failure {
    fn from(error: ExecutionError) -> Self {
        Self::new(error)
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#}", self.0)
    }
}

impl fmt::Debug for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.0)
    }
}

impl std::error::Error for Failure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.as_error().source()
    }
}

/// Faults raised by the runtime itself: managed object lifecycle errors
/// and panics caught in user code.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("managed object '{name}' failed to be sourced: {cause}")]
    ManagedObjectSourcingFailure {
        name: String,
        #[source]
        cause: Failure,
    },

    #[error("managed object '{name}' is not loaded")]
    ManagedObjectNotLoaded { name: String },

    #[error("asynchronous operation on managed object '{name}' timed out after {timeout_ms}ms")]
    ManagedObjectAsyncOperationTimedOut { name: String, timeout_ms: u64 },

    #[error("managed object '{name}' timed out being sourced after {timeout_ms}ms")]
    ManagedObjectSourcingTimedOut { name: String, timeout_ms: u64 },

    #[error("managed object '{name}' failed providing its object: {cause}")]
    ManagedObjectFailedProvidingObject {
        name: String,
        #[source]
        cause: Failure,
    },

    #[error("'{name}' panicked: {message}")]
    Panicked { name: String, message: String },
}

impl ExecutionError {
    /// Wraps the payload of a caught panic raised while running `name`.
    pub fn panicked(name: impl Into<String>, payload: Box<dyn Any + Send>) -> Self {
        let message = match payload.downcast::<String>() {
            Ok(message) => *message,
            Err(payload) => match payload.downcast::<&'static str>() {
                Ok(message) => (*message).to_string(),
                Err(_) => "non-string panic payload".to_string(),
            },
        };
        ExecutionError::Panicked {
            name: name.into(),
            message,
        }
    }

    pub fn cause(&self) -> Option<&Failure> {
        match self {
            ExecutionError::ManagedObjectSourcingFailure { cause, .. }
            | ExecutionError::ManagedObjectFailedProvidingObject { cause, .. } => Some(cause),
            _ => None,
        }
    }
}

/// Errors surfaced to whoever is configuring or driving the runtime.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("Illegal state: {0}")]
    IllegalState(String),

    #[error("Unknown team: {0}")]
    UnknownTeam(String),

    #[error("Process {0} has already completed")]
    ProcessCompleted(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}
