use crate::phase::FailureKind;
use crate::snapshot::Snapshot;
use serde::Serialize;
use std::fmt;
use std::time::Duration;

/// Poll cadence and overall bound for one convergence attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObserverSettings {
    pub poll_interval: Duration,
    /// `None` polls until convergence, abort or cancellation
    pub timeout: Option<Duration>,
}

impl ObserverSettings {
    pub fn new(poll_interval: Duration, timeout: Option<Duration>) -> Self {
        Self {
            poll_interval,
            timeout,
        }
    }
}

/// Why an operation stopped short of convergence
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum AbortReason {
    /// The resource is shutting down or terminated
    InfraInvalid,
    /// The application explicitly reported a failure
    AppInvalid,
    /// The application rejected our credentials
    AuthRejected,
    /// The application failed in a way that must not be read as progress
    Unrecoverable(FailureKind),
    /// A source answered outside its contract
    UnknownCode(String),
    /// The work between the two stages failed
    HandoffFailed(String),
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbortReason::InfraInvalid => f.write_str("instance entered a non-recoverable state"),
            AbortReason::AppInvalid => f.write_str("application reported a failure"),
            AbortReason::AuthRejected => f.write_str("application API key was rejected"),
            AbortReason::Unrecoverable(kind) => write!(f, "application request failed: {}", kind),
            AbortReason::UnknownCode(details) => write!(f, "unexpected state report: {}", details),
            AbortReason::HandoffFailed(details) => write!(f, "could not continue to the next stage: {}", details),
        }
    }
}

/// Final outcome of an observation. Every variant carries the snapshot the
/// caller should render last.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum TerminalResult {
    Converged(Snapshot),
    Aborted {
        snapshot: Snapshot,
        reason: AbortReason,
    },
    TimedOut(Snapshot),
    Cancelled(Snapshot),
}

impl TerminalResult {
    pub fn snapshot(&self) -> &Snapshot {
        match self {
            TerminalResult::Converged(snapshot)
            | TerminalResult::TimedOut(snapshot)
            | TerminalResult::Cancelled(snapshot) => snapshot,
            TerminalResult::Aborted { snapshot, .. } => snapshot,
        }
    }

    pub fn is_converged(&self) -> bool {
        matches!(self, TerminalResult::Converged(_))
    }

    pub fn label(&self) -> &'static str {
        match self {
            TerminalResult::Converged(_) => "converged",
            TerminalResult::Aborted { .. } => "aborted",
            TerminalResult::TimedOut(_) => "timed out",
            TerminalResult::Cancelled(_) => "cancelled",
        }
    }

    /// Process exit code conventionally associated with the outcome
    pub fn exit_code(&self) -> i32 {
        match self {
            TerminalResult::Converged(_) => 0,
            TerminalResult::Aborted { .. } => 1,
            TerminalResult::TimedOut(_) => 2,
            TerminalResult::Cancelled(_) => 130,
        }
    }
}

impl fmt::Display for TerminalResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let snapshot = self.snapshot();
        match self {
            TerminalResult::Aborted { reason, .. } => write!(
                f,
                "{} {} after {} ticks: {}",
                snapshot.direction, self.label(), snapshot.tick, reason
            ),
            _ => write!(
                f,
                "{} {} after {} ticks (instance {}, app {})",
                snapshot.direction,
                self.label(),
                snapshot.tick,
                snapshot.infra_phase,
                snapshot.app_phase
            ),
        }
    }
}
