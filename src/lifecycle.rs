//! Start/stop requests against the infrastructure and the pre-flight rules
//! that decide whether a request may be issued at all.

use crate::config::InfraConfig;
use crate::error::{LifecycleError, PhasewatchError, Result};
use crate::phase::{Direction, InfraCode, InfraState};
use crate::sources::run_command;
use std::time::Duration;
use tracing::{debug, info};

/// Decide whether a start may be issued from the current lifecycle code
pub fn plan_start(current: InfraCode) -> Result<()> {
    let message = match InfraState::from_code(current) {
        Some(InfraState::Stopped) => return Ok(()),
        Some(InfraState::Running) => "The instance is already running.",
        Some(InfraState::Pending) => "The instance is already starting.",
        Some(InfraState::Stopping) => {
            "The instance is stopping, please wait a few moments before trying again."
        }
        _ => "The instance cannot be started from its current state.",
    };
    Err(PhasewatchError::rejected(message))
}

/// Decide whether a stop may be issued from the current lifecycle code
pub fn plan_stop(current: InfraCode) -> Result<()> {
    let message = match InfraState::from_code(current) {
        Some(InfraState::Running) => return Ok(()),
        Some(InfraState::Stopped) => "The instance is already stopped.",
        Some(InfraState::Stopping) => "The instance is already stopping.",
        Some(InfraState::Pending) => {
            "The instance is starting, please wait a few moments before trying again."
        }
        _ => "The instance cannot be stopped from its current state.",
    };
    Err(PhasewatchError::rejected(message))
}

pub fn plan(direction: Direction, current: InfraCode) -> Result<()> {
    match direction {
        Direction::Start => plan_start(current),
        Direction::Stop => plan_stop(current),
    }
}

/// Issues lifecycle requests to the infrastructure. Requests are fire and
/// forget; progress is watched by the observer.
#[async_trait::async_trait]
pub trait LifecycleController: Send + Sync {
    async fn start(&self, resource_id: &str) -> std::result::Result<(), LifecycleError>;

    async fn stop(&self, resource_id: &str) -> std::result::Result<(), LifecycleError>;

    async fn request(
        &self,
        direction: Direction,
        resource_id: &str,
    ) -> std::result::Result<(), LifecycleError> {
        match direction {
            Direction::Start => self.start(resource_id).await,
            Direction::Stop => self.stop(resource_id).await,
        }
    }
}

/// Lifecycle requests through operator-configured commands
pub struct CommandLifecycle {
    start_command: Vec<String>,
    stop_command: Vec<String>,
    timeout: Duration,
}

impl CommandLifecycle {
    pub fn new(start_command: Vec<String>, stop_command: Vec<String>, timeout: Duration) -> Self {
        Self {
            start_command,
            stop_command,
            timeout,
        }
    }

    pub fn from_config(config: &InfraConfig) -> Self {
        Self::new(
            config.start_command.clone(),
            config.stop_command.clone(),
            config.command_timeout(),
        )
    }

    async fn execute(
        &self,
        operation: &str,
        argv: &[String],
        resource_id: &str,
    ) -> std::result::Result<(), LifecycleError> {
        if argv.is_empty() {
            return Err(LifecycleError::NotConfigured {
                operation: operation.to_string(),
            });
        }

        let output = run_command(argv, resource_id, self.timeout).await?;
        if !output.success {
            return Err(LifecycleError::Failed {
                program: argv[0].clone(),
                status: output.status,
                stderr: output.stderr.trim().to_string(),
            });
        }

        debug!("{} command output: {}", operation, output.stdout.trim());
        info!("Issued {} for {}", operation, resource_id);
        Ok(())
    }
}

#[async_trait::async_trait]
impl LifecycleController for CommandLifecycle {
    async fn start(&self, resource_id: &str) -> std::result::Result<(), LifecycleError> {
        self.execute("start", &self.start_command, resource_id).await
    }

    async fn stop(&self, resource_id: &str) -> std::result::Result<(), LifecycleError> {
        self.execute("stop", &self.stop_command, resource_id).await
    }
}
