use crate::phase::{Direction, FailureKind};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PhasewatchError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("State source error: {0}")]
    Source(#[from] SourceError),

    #[error("Normalization error: {0}")]
    Normalize(#[from] NormalizeError),

    #[error("Lifecycle error: {0}")]
    Lifecycle(#[from] LifecycleError),

    #[error("Application request failed: {0}")]
    App(FailureKind),

    #[error("Permission denied: {principal} may not {action}")]
    PermissionDenied { action: String, principal: String },

    #[error("Resource {resource} already has a {active} operation in progress")]
    OperationInProgress { resource: String, active: Direction },

    #[error("{message}")]
    Rejected { message: String },

    #[error("Component error in {component}: {message}")]
    Component { component: String, message: String },
}

impl PhasewatchError {
    pub fn component<S: Into<String>>(component: S, message: S) -> Self {
        Self::Component {
            component: component.into(),
            message: message.into(),
        }
    }

    pub fn rejected<S: Into<String>>(message: S) -> Self {
        Self::Rejected {
            message: message.into(),
        }
    }
}

/// Failures raised by a state source query
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SourceError {
    /// The query could not be completed; the next tick retries it
    #[error("connectivity failure: {details}")]
    Connectivity { details: String },

    /// The source answered with something outside its contract
    #[error("malformed response: {details}")]
    Malformed { details: String },
}

impl SourceError {
    pub fn connectivity<S: Into<String>>(details: S) -> Self {
        Self::Connectivity {
            details: details.into(),
        }
    }

    pub fn malformed<S: Into<String>>(details: S) -> Self {
        Self::Malformed {
            details: details.into(),
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, SourceError::Connectivity { .. })
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NormalizeError {
    #[error("unknown infrastructure state code {0}")]
    UnknownInfraCode(u16),

    #[error("unknown application status '{0}'")]
    UnknownAppStatus(String),

    #[error("unrecoverable application failure: {0}")]
    Unrecoverable(FailureKind),
}

#[derive(Error, Debug, Clone)]
pub enum SinkError {
    #[error("no subscribers are listening for snapshots")]
    NoSubscribers,

    #[error("sink write failed: {details}")]
    Write { details: String },
}

#[derive(Error, Debug, Clone)]
pub enum LifecycleError {
    #[error("no command configured for {operation}")]
    NotConfigured { operation: String },

    #[error("failed to spawn {program}: {details}")]
    Spawn { program: String, details: String },

    #[error("{program} timed out after {seconds}s")]
    Timeout { program: String, seconds: u64 },

    #[error("{program} exited with status {status}: {stderr}")]
    Failed {
        program: String,
        status: String,
        stderr: String,
    },
}

pub type Result<T> = std::result::Result<T, PhasewatchError>;
