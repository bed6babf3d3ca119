mod command;
mod http;
mod mock;

use crate::error::SourceError;
use crate::phase::{AppProbe, Direction, FailureKind, InfraCode};
use serde::Serialize;

pub use command::{run_command, CommandInfraSource, CommandOutput};
pub use http::{classify_status, HttpAppClient, ADDRESS_PLACEHOLDER};
pub use mock::{ScriptedAppSource, ScriptedInfraSource};

/// Everything an infrastructure query can say about the resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InfraReport {
    pub code: InfraCode,
    /// Public address; absent while the resource has none
    pub address: Option<String>,
    /// Why the resource last changed state, when the platform says
    pub reason: Option<String>,
}

impl From<InfraCode> for InfraReport {
    fn from(code: InfraCode) -> Self {
        Self {
            code,
            address: None,
            reason: None,
        }
    }
}

/// Authoritative lifecycle state of the compute resource
#[async_trait::async_trait]
pub trait InfraStateSource: Send + Sync {
    /// Query the raw lifecycle code of `resource_id`
    async fn query(&self, resource_id: &str) -> Result<InfraCode, SourceError>;

    /// Query the code together with the address and transition reason.
    /// Sources that only know the code report neither.
    async fn describe(&self, resource_id: &str) -> Result<InfraReport, SourceError> {
        self.query(resource_id).await.map(InfraReport::from)
    }

    /// Name used in log lines
    fn source_name(&self) -> &str;
}

/// Health of the application running on the resource
#[async_trait::async_trait]
pub trait AppStateSource: Send + Sync {
    /// Probe the application. `direction` is passed through so adapters can
    /// tune the probe; the normalizer decides what a failure means.
    async fn query(&self, resource_id: &str, direction: Direction) -> AppProbe;

    /// Name used in log lines
    fn source_name(&self) -> &str;
}

/// Commands sent to the application's control API. Callers are expected to
/// check the resource is running first.
#[async_trait::async_trait]
pub trait AppControl: Send + Sync {
    async fn issue(&self, command: &str) -> Result<(), FailureKind>;

    async fn list_online_players(&self) -> Result<Vec<String>, FailureKind>;

    async fn shutdown(&self) -> Result<(), FailureKind>;
}
