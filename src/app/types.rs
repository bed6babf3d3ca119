use crate::phase::{AppProbe, CanonicalPhase, InfraCode, InfraState};
use crate::sink::{phase_marker, status_colour};
use serde::Serialize;
use std::fmt;

/// One-shot view of a resource and, when it is up, its application
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusReport {
    pub resource_id: String,
    pub infra_code: InfraCode,
    /// `None` when the platform reported a code we do not know
    pub infra_state: Option<InfraState>,
    /// Why the resource last changed state
    pub reason: Option<String>,
    pub public_address: Option<String>,
    /// Only probed while the resource is running
    pub app: Option<AppProbe>,
}

impl StatusReport {
    /// Phase the infrastructure side maps to, if the code is known
    pub fn infra_phase(&self) -> Option<CanonicalPhase> {
        crate::normalizer::normalize_infra(self.infra_code).ok()
    }

    pub fn colour(&self) -> u32 {
        self.infra_phase()
            .map(status_colour)
            .unwrap_or_else(|| status_colour(CanonicalPhase::Invalid))
    }
}

impl fmt::Display for StatusReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Instance ID: {}", self.resource_id)?;

        match (self.infra_state, self.infra_phase()) {
            (Some(state), Some(phase)) => {
                writeln!(f, "Status: {} {} (code {})", phase_marker(phase), state, self.infra_code)?
            }
            _ => writeln!(f, "Status: unknown (code {})", self.infra_code)?,
        }

        if let Some(reason) = &self.reason {
            writeln!(f, "Reason: {}", reason)?;
        }
        if let Some(address) = &self.public_address {
            writeln!(f, "Public IP Address: {}", address)?;
        }

        match &self.app {
            None => write!(f, "Application: not reachable while the instance is down"),
            Some(Ok(report)) if report.players.is_empty() => {
                write!(f, "Application: {} (no-one online)", report.status)
            }
            Some(Ok(report)) => write!(
                f,
                "Application: {} ({} online: {})",
                report.status,
                report.players.len(),
                report.players.join(", ")
            ),
            Some(Err(kind)) => write!(f, "Application: unreachable ({})", kind),
        }
    }
}
