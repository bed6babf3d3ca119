//! Raw and canonical state vocabularies shared by the sources, the
//! normalizer and the observer.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Normalized lifecycle phase used for every comparison and display decision.
///
/// The declaration order is the display order; it carries no arithmetic meaning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum CanonicalPhase {
    Stopped,
    Starting,
    Running,
    Stopping,
    Invalid,
}

impl CanonicalPhase {
    /// Human-readable name used by renderers
    pub fn display_name(&self) -> &'static str {
        match self {
            CanonicalPhase::Stopped => "Stopped",
            CanonicalPhase::Starting => "Starting",
            CanonicalPhase::Running => "Running",
            CanonicalPhase::Stopping => "Stopping",
            CanonicalPhase::Invalid => "Invalid State",
        }
    }
}

impl fmt::Display for CanonicalPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

/// Which extreme an operation is converging towards
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Start,
    Stop,
}

impl Direction {
    /// Phase both sides must reach for the operation to converge
    pub fn target(&self) -> CanonicalPhase {
        match self {
            Direction::Start => CanonicalPhase::Running,
            Direction::Stop => CanonicalPhase::Stopped,
        }
    }

    /// Phase reported while the two sides have not yet agreed
    pub fn transitional(&self) -> CanonicalPhase {
        match self {
            Direction::Start => CanonicalPhase::Starting,
            Direction::Stop => CanonicalPhase::Stopping,
        }
    }

    /// Phase assumed for both sides before anything has been observed
    pub fn origin(&self) -> CanonicalPhase {
        match self {
            Direction::Start => CanonicalPhase::Stopped,
            Direction::Stop => CanonicalPhase::Running,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Start => f.write_str("start"),
            Direction::Stop => f.write_str("stop"),
        }
    }
}

/// Raw lifecycle code reported by the infrastructure platform.
///
/// Only the low byte is meaningful; the platform reserves the high byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct InfraCode(pub u16);

impl InfraCode {
    pub fn value(&self) -> u16 {
        self.0 & 0x00ff
    }
}

impl From<InfraState> for InfraCode {
    fn from(state: InfraState) -> Self {
        InfraCode(state.code())
    }
}

impl fmt::Display for InfraCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.value())
    }
}

/// Typed infrastructure lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InfraState {
    Pending,
    Running,
    ShuttingDown,
    Terminated,
    Stopping,
    Stopped,
}

impl InfraState {
    pub const ALL: [InfraState; 6] = [
        InfraState::Pending,
        InfraState::Running,
        InfraState::ShuttingDown,
        InfraState::Terminated,
        InfraState::Stopping,
        InfraState::Stopped,
    ];

    pub fn code(&self) -> u16 {
        match self {
            InfraState::Pending => 0,
            InfraState::Running => 16,
            InfraState::ShuttingDown => 32,
            InfraState::Terminated => 48,
            InfraState::Stopping => 64,
            InfraState::Stopped => 80,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            InfraState::Pending => "pending",
            InfraState::Running => "running",
            InfraState::ShuttingDown => "shutting-down",
            InfraState::Terminated => "terminated",
            InfraState::Stopping => "stopping",
            InfraState::Stopped => "stopped",
        }
    }

    pub fn from_code(code: InfraCode) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.code() == code.value())
    }

    /// Accepts both the hyphenated and underscored spellings used by platform tooling
    pub fn from_name(name: &str) -> Option<Self> {
        let normalized = name.trim().to_ascii_lowercase().replace('_', "-");
        Self::ALL.into_iter().find(|s| s.name() == normalized)
    }
}

impl fmt::Display for InfraState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Status vocabulary of the application's health endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppStatus {
    Stopped,
    Starting,
    Running,
    Stopping,
    /// Explicit failure report; the only way the app side becomes Invalid
    Failed,
}

impl AppStatus {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "stopped" => Some(AppStatus::Stopped),
            "starting" => Some(AppStatus::Starting),
            "running" => Some(AppStatus::Running),
            "stopping" => Some(AppStatus::Stopping),
            "failed" | "crashed" => Some(AppStatus::Failed),
            _ => None,
        }
    }
}

/// Body of a successful health probe
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppReport {
    /// Raw status string, normalized later so unknown values fail loudly
    pub status: String,
    #[serde(default)]
    pub players: Vec<String>,
}

impl AppReport {
    pub fn with_status<S: Into<String>>(status: S) -> Self {
        Self {
            status: status.into(),
            players: Vec::new(),
        }
    }
}

/// Why an application request could not be completed
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FailureKind {
    /// No answer within the request timeout
    Timeout,
    /// Refused, reset or unresolvable: nothing is listening
    ConnectionFailed,
    /// The API key was rejected (HTTP 401)
    AuthRejected,
    /// The endpoint answered but the service behind it is not ready (HTTP 503)
    ServiceNotReady,
    UnexpectedStatus(u16),
    MalformedResponse(String),
    /// The resource has no reachable address yet
    AddressUnavailable,
    /// The request never reached the wire, or failed for a reason that
    /// says nothing about the endpoint (bad URL, redirect loop, body error)
    RequestFailed(String),
}

impl FailureKind {
    /// Failures that say nothing about the app beyond "not answering yet"
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            FailureKind::Timeout
                | FailureKind::ConnectionFailed
                | FailureKind::ServiceNotReady
                | FailureKind::AddressUnavailable
        )
    }

    /// Failures expected while the endpoint is being torn down
    pub fn is_teardown_race(&self) -> bool {
        matches!(self, FailureKind::Timeout | FailureKind::ConnectionFailed)
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::Timeout => f.write_str("request timed out"),
            FailureKind::ConnectionFailed => f.write_str("could not connect"),
            FailureKind::AuthRejected => f.write_str("API key rejected"),
            FailureKind::ServiceNotReady => f.write_str("service not ready"),
            FailureKind::UnexpectedStatus(code) => write!(f, "unexpected HTTP status {}", code),
            FailureKind::MalformedResponse(details) => write!(f, "malformed response: {}", details),
            FailureKind::AddressUnavailable => f.write_str("no address to reach the application"),
            FailureKind::RequestFailed(details) => write!(f, "request failed: {}", details),
        }
    }
}

/// Outcome of one application health probe
pub type AppProbe = std::result::Result<AppReport, FailureKind>;
