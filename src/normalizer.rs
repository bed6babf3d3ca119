//! Pure mapping from the raw infrastructure and application vocabularies to
//! [`CanonicalPhase`].

use crate::error::NormalizeError;
use crate::phase::{AppProbe, AppStatus, CanonicalPhase, Direction, InfraCode, InfraState};

/// Map a raw infrastructure code to its canonical phase.
///
/// `shutting-down` and `terminated` are Invalid: the resource is going away,
/// not stopping cleanly.
pub fn normalize_infra(code: InfraCode) -> Result<CanonicalPhase, NormalizeError> {
    let state =
        InfraState::from_code(code).ok_or(NormalizeError::UnknownInfraCode(code.value()))?;

    Ok(match state {
        InfraState::Pending => CanonicalPhase::Starting,
        InfraState::Running => CanonicalPhase::Running,
        InfraState::ShuttingDown | InfraState::Terminated => CanonicalPhase::Invalid,
        InfraState::Stopping => CanonicalPhase::Stopping,
        InfraState::Stopped => CanonicalPhase::Stopped,
    })
}

/// Map an application probe to its canonical phase.
///
/// A probe that could not be completed is read according to `direction`: the
/// same timeout means "still booting" during a start and "already gone"
/// during a stop. Failures that say something about our credentials or the
/// endpoint's contract are never coerced.
pub fn normalize_app(
    probe: &AppProbe,
    direction: Direction,
) -> Result<CanonicalPhase, NormalizeError> {
    match probe {
        Ok(report) => {
            let status = AppStatus::parse(&report.status)
                .ok_or_else(|| NormalizeError::UnknownAppStatus(report.status.clone()))?;
            Ok(match status {
                AppStatus::Stopped => CanonicalPhase::Stopped,
                AppStatus::Starting => CanonicalPhase::Starting,
                AppStatus::Running => CanonicalPhase::Running,
                AppStatus::Stopping => CanonicalPhase::Stopping,
                AppStatus::Failed => CanonicalPhase::Invalid,
            })
        }
        Err(kind) => match direction {
            Direction::Start if kind.is_transient() => Ok(CanonicalPhase::Starting),
            Direction::Stop if kind.is_teardown_race() => Ok(CanonicalPhase::Stopped),
            Direction::Stop if kind.is_transient() => Ok(CanonicalPhase::Stopping),
            _ => Err(NormalizeError::Unrecoverable(kind.clone())),
        },
    }
}

/// Derive the combined phase of one observation.
pub fn combine(infra: CanonicalPhase, app: CanonicalPhase, direction: Direction) -> CanonicalPhase {
    match (infra, app) {
        (CanonicalPhase::Invalid, _) | (_, CanonicalPhase::Invalid) => CanonicalPhase::Invalid,
        (CanonicalPhase::Running, CanonicalPhase::Running) => CanonicalPhase::Running,
        (CanonicalPhase::Stopped, CanonicalPhase::Stopped) => CanonicalPhase::Stopped,
        _ => direction.transitional(),
    }
}
