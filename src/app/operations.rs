use super::{Controller, StatusReport};
use crate::error::{PhasewatchError, Result};
use crate::lifecycle::{plan, LifecycleController};
use crate::observer::{ConvergenceObserver, StageHandoff, TerminalResult};
use crate::permissions::{Action, Principal};
use crate::phase::{Direction, InfraCode, InfraState};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Requests the resource stop once the application has let go of it
struct StopResource {
    lifecycle: Arc<dyn LifecycleController>,
}

#[async_trait::async_trait]
impl StageHandoff for StopResource {
    async fn handoff(&self, resource_id: &str, direction: Direction) -> Result<()> {
        self.lifecycle.request(direction, resource_id).await?;
        info!("Application on {} is down, {} requested", resource_id, direction);
        Ok(())
    }
}

impl Controller {
    /// Start the resource and watch it and its application come up
    pub async fn start(
        &self,
        principal: &Principal,
        cancel: &CancellationToken,
    ) -> Result<TerminalResult> {
        self.converge(Direction::Start, principal, cancel).await
    }

    /// Stop the application and the resource and watch both go down
    pub async fn stop(
        &self,
        principal: &Principal,
        cancel: &CancellationToken,
    ) -> Result<TerminalResult> {
        self.converge(Direction::Stop, principal, cancel).await
    }

    /// Current state of the resource and, when it is running, the application
    pub async fn status(&self, principal: &Principal) -> Result<StatusReport> {
        self.authorize(Action::Status, principal).await?;

        let described = self.sources.infra.describe(&self.resource_id).await?;
        let infra_code = described.code;
        let infra_state = InfraState::from_code(infra_code);

        let app = if infra_state == Some(InfraState::Running) {
            Some(self.sources.app.query(&self.resource_id, Direction::Start).await)
        } else {
            None
        };

        Ok(StatusReport {
            resource_id: self.resource_id.clone(),
            infra_code,
            infra_state,
            reason: described.reason,
            public_address: described.address,
            app,
        })
    }

    /// Send a console command to the application
    pub async fn issue(&self, principal: &Principal, command: &str) -> Result<()> {
        self.authorize(Action::Issue, principal).await?;
        self.require_running().await?;

        self.app_control
            .issue(command)
            .await
            .map_err(PhasewatchError::App)?;
        info!("Issued '{}' on {}", command, self.resource_id);
        Ok(())
    }

    /// Players currently connected to the application
    pub async fn players(&self, principal: &Principal) -> Result<Vec<String>> {
        self.authorize(Action::Players, principal).await?;
        self.require_running().await?;

        self.app_control
            .list_online_players()
            .await
            .map_err(PhasewatchError::App)
    }

    async fn converge(
        &self,
        direction: Direction,
        principal: &Principal,
        cancel: &CancellationToken,
    ) -> Result<TerminalResult> {
        let action = match direction {
            Direction::Start => Action::Start,
            Direction::Stop => Action::Stop,
        };
        self.authorize(action, principal).await?;

        // Held until the observer returns
        let _guard = self.registry.try_acquire(&self.resource_id, direction)?;

        let current = self.current_infra_code().await?;
        plan(direction, current)?;

        let observer = ConvergenceObserver::new(
            &self.resource_id,
            direction,
            self.sources.clone(),
            self.sink.clone(),
            self.settings,
        );

        // A stop whose application agreed to shut down waits for it before
        // stopping the resource. Otherwise the application goes down with
        // the resource and the request is made now.
        let observer = if direction == Direction::Stop && self.shut_down_app().await {
            info!("{} by {} waits for the application on {}", direction, principal, self.resource_id);
            observer.with_handoff(Arc::new(StopResource {
                lifecycle: self.lifecycle.clone(),
            }))
        } else {
            self.lifecycle.request(direction, &self.resource_id).await?;
            info!("{} requested for {} by {}", direction, self.resource_id, principal);
            observer
        };

        Ok(observer.run(cancel).await)
    }

    /// Ask the application to shut down when configured to. True when it
    /// accepted.
    async fn shut_down_app(&self) -> bool {
        if !self.graceful_shutdown {
            return false;
        }
        match self.app_control.shutdown().await {
            Ok(()) => {
                info!("Asked the application on {} to shut down", self.resource_id);
                true
            }
            Err(e) => {
                warn!("Graceful application shutdown failed, stopping the resource now: {}", e);
                false
            }
        }
    }

    async fn authorize(&self, action: Action, principal: &Principal) -> Result<()> {
        if self.permissions.can_perform(action, principal).await {
            return Ok(());
        }
        warn!("{} is not allowed to {}", principal, action);
        Err(PhasewatchError::PermissionDenied {
            action: action.to_string(),
            principal: principal.to_string(),
        })
    }

    async fn current_infra_code(&self) -> Result<InfraCode> {
        let code = self.sources.infra.query(&self.resource_id).await?;
        debug!("Pre-flight state of {}: {}", self.resource_id, code);
        Ok(code)
    }

    async fn require_running(&self) -> Result<()> {
        let code = self.current_infra_code().await?;
        if InfraState::from_code(code) == Some(InfraState::Running) {
            Ok(())
        } else {
            Err(PhasewatchError::rejected("The instance is not running."))
        }
    }
}
