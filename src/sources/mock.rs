use super::{AppStateSource, InfraReport, InfraStateSource};
use crate::error::SourceError;
use crate::phase::{AppProbe, AppReport, Direction, FailureKind, InfraCode, InfraState};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::debug;

/// Infrastructure source that replays a fixed script, for testing without a
/// real platform. Once the script runs out the last entry repeats.
pub struct ScriptedInfraSource {
    script: Mutex<VecDeque<Result<InfraCode, SourceError>>>,
    last: Mutex<Option<Result<InfraCode, SourceError>>>,
    calls: AtomicUsize,
    address: Option<String>,
    reason: Option<String>,
}

impl ScriptedInfraSource {
    pub fn new(script: Vec<Result<InfraCode, SourceError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            last: Mutex::new(None),
            calls: AtomicUsize::new(0),
            address: None,
            reason: None,
        }
    }

    /// Address reported by `describe` alongside every scripted code
    pub fn with_address<S: Into<String>>(mut self, address: S) -> Self {
        self.address = Some(address.into());
        self
    }

    pub fn with_reason<S: Into<String>>(mut self, reason: S) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn from_states(states: &[InfraState]) -> Self {
        Self::new(states.iter().map(|s| Ok(InfraCode::from(*s))).collect())
    }

    /// Number of queries answered so far
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl InfraStateSource for ScriptedInfraSource {
    async fn query(&self, resource_id: &str) -> Result<InfraCode, SourceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self.script.lock().pop_front();
        let answer = match next {
            Some(answer) => {
                *self.last.lock() = Some(answer.clone());
                answer
            }
            None => self
                .last
                .lock()
                .clone()
                .unwrap_or_else(|| Err(SourceError::connectivity("script is empty"))),
        };
        debug!("Scripted infra answer for {}: {:?}", resource_id, answer);
        answer
    }

    async fn describe(&self, resource_id: &str) -> Result<InfraReport, SourceError> {
        let code = self.query(resource_id).await?;
        Ok(InfraReport {
            code,
            address: self.address.clone(),
            reason: self.reason.clone(),
        })
    }

    fn source_name(&self) -> &str {
        "scripted"
    }
}

/// Application source that replays a fixed script of probes
pub struct ScriptedAppSource {
    script: Mutex<VecDeque<AppProbe>>,
    last: Mutex<Option<AppProbe>>,
    directions: Mutex<Vec<Direction>>,
}

impl ScriptedAppSource {
    pub fn new(script: Vec<AppProbe>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            last: Mutex::new(None),
            directions: Mutex::new(Vec::new()),
        }
    }

    pub fn from_statuses(statuses: &[&str]) -> Self {
        Self::new(
            statuses
                .iter()
                .map(|s| Ok(AppReport::with_status(*s)))
                .collect(),
        )
    }

    pub fn calls(&self) -> usize {
        self.directions.lock().len()
    }

    /// Direction passed with every query, in order
    pub fn directions(&self) -> Vec<Direction> {
        self.directions.lock().clone()
    }
}

#[async_trait::async_trait]
impl AppStateSource for ScriptedAppSource {
    async fn query(&self, resource_id: &str, direction: Direction) -> AppProbe {
        self.directions.lock().push(direction);
        let next = self.script.lock().pop_front();
        let answer = match next {
            Some(answer) => {
                *self.last.lock() = Some(answer.clone());
                answer
            }
            None => self
                .last
                .lock()
                .clone()
                .unwrap_or(Err(FailureKind::ConnectionFailed)),
        };
        debug!("Scripted app answer for {}: {:?}", resource_id, answer);
        answer
    }

    fn source_name(&self) -> &str {
        "scripted"
    }
}
