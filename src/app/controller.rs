use crate::config::PhasewatchConfig;
use crate::error::{PhasewatchError, Result};
use crate::lifecycle::{CommandLifecycle, LifecycleController};
use crate::observer::{ObserverSettings, StateSources};
use crate::permissions::{AllowAll, CapabilityCheck, RoleTable};
use crate::registry::OperationRegistry;
use crate::sink::StatusSink;
use crate::sources::{AppControl, AppStateSource, CommandInfraSource, HttpAppClient, InfraStateSource};
use std::sync::Arc;
use tracing::debug;

/// Entry point for every operator action on one managed resource
pub struct Controller {
    pub(super) resource_id: String,
    pub(super) sources: StateSources,
    pub(super) lifecycle: Arc<dyn LifecycleController>,
    pub(super) app_control: Arc<dyn AppControl>,
    pub(super) permissions: Arc<dyn CapabilityCheck>,
    pub(super) registry: OperationRegistry,
    pub(super) sink: Arc<dyn StatusSink>,
    pub(super) settings: ObserverSettings,
    pub(super) graceful_shutdown: bool,
}

impl Controller {
    pub fn builder() -> ControllerBuilder {
        ControllerBuilder::new()
    }

    /// Wire the command and HTTP adapters described by `config`
    pub fn from_config(config: &PhasewatchConfig, sink: Arc<dyn StatusSink>) -> Result<Self> {
        let infra = Arc::new(CommandInfraSource::new(
            config.infra.status_command.clone(),
            config.infra.command_timeout(),
        ));
        let app = Arc::new(
            HttpAppClient::new(&config.app)?.with_address_source(&config.resource.id, infra.clone()),
        );

        let permissions: Arc<dyn CapabilityCheck> = if config.permissions.enabled {
            Arc::new(RoleTable::from_config(&config.permissions))
        } else {
            debug!("Permissions disabled, every action is allowed");
            Arc::new(AllowAll)
        };

        Self::builder()
            .with_resource_id(&config.resource.id)
            .with_infra_source(infra)
            .with_app_source(app.clone())
            .with_app_control(app)
            .with_lifecycle(Arc::new(CommandLifecycle::from_config(&config.infra)))
            .with_permissions(permissions)
            .with_registry(OperationRegistry::with_lock_dir(config.resource.lock_dir()))
            .with_sink(sink)
            .with_settings(config.observer.settings())
            .with_graceful_shutdown(config.app.graceful_shutdown)
            .build()
    }

    pub fn resource_id(&self) -> &str {
        &self.resource_id
    }

    /// Registry shared by every operation this controller runs
    pub fn registry(&self) -> &OperationRegistry {
        &self.registry
    }
}

/// Builder for [`Controller`]
pub struct ControllerBuilder {
    resource_id: Option<String>,
    infra: Option<Arc<dyn InfraStateSource>>,
    app: Option<Arc<dyn AppStateSource>>,
    app_control: Option<Arc<dyn AppControl>>,
    lifecycle: Option<Arc<dyn LifecycleController>>,
    permissions: Option<Arc<dyn CapabilityCheck>>,
    registry: Option<OperationRegistry>,
    sink: Option<Arc<dyn StatusSink>>,
    settings: Option<ObserverSettings>,
    graceful_shutdown: bool,
}

impl ControllerBuilder {
    pub fn new() -> Self {
        Self {
            resource_id: None,
            infra: None,
            app: None,
            app_control: None,
            lifecycle: None,
            permissions: None,
            registry: None,
            sink: None,
            settings: None,
            graceful_shutdown: false,
        }
    }

    pub fn with_resource_id(mut self, resource_id: &str) -> Self {
        self.resource_id = Some(resource_id.to_string());
        self
    }

    pub fn with_infra_source(mut self, infra: Arc<dyn InfraStateSource>) -> Self {
        self.infra = Some(infra);
        self
    }

    pub fn with_app_source(mut self, app: Arc<dyn AppStateSource>) -> Self {
        self.app = Some(app);
        self
    }

    pub fn with_app_control(mut self, app_control: Arc<dyn AppControl>) -> Self {
        self.app_control = Some(app_control);
        self
    }

    pub fn with_lifecycle(mut self, lifecycle: Arc<dyn LifecycleController>) -> Self {
        self.lifecycle = Some(lifecycle);
        self
    }

    /// Defaults to allowing everything
    pub fn with_permissions(mut self, permissions: Arc<dyn CapabilityCheck>) -> Self {
        self.permissions = Some(permissions);
        self
    }

    /// Share a registry between controllers managing the same resources.
    /// Defaults to an in-process registry.
    pub fn with_registry(mut self, registry: OperationRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn StatusSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn with_settings(mut self, settings: ObserverSettings) -> Self {
        self.settings = Some(settings);
        self
    }

    pub fn with_graceful_shutdown(mut self, enabled: bool) -> Self {
        self.graceful_shutdown = enabled;
        self
    }

    pub fn build(self) -> Result<Controller> {
        let resource_id = self
            .resource_id
            .filter(|id| !id.trim().is_empty())
            .ok_or_else(|| PhasewatchError::component("controller", "Resource id is required"))?;

        let infra = self
            .infra
            .ok_or_else(|| PhasewatchError::component("controller", "Infra source is required"))?;

        let app = self
            .app
            .ok_or_else(|| PhasewatchError::component("controller", "App source is required"))?;

        let app_control = self
            .app_control
            .ok_or_else(|| PhasewatchError::component("controller", "App control is required"))?;

        let lifecycle = self
            .lifecycle
            .ok_or_else(|| PhasewatchError::component("controller", "Lifecycle is required"))?;

        let sink = self
            .sink
            .ok_or_else(|| PhasewatchError::component("controller", "Status sink is required"))?;

        let settings = self
            .settings
            .ok_or_else(|| PhasewatchError::component("controller", "Observer settings are required"))?;

        Ok(Controller {
            resource_id,
            sources: StateSources::new(infra, app),
            lifecycle,
            app_control,
            permissions: self.permissions.unwrap_or_else(|| Arc::new(AllowAll)),
            registry: self.registry.unwrap_or_default(),
            sink,
            settings,
            graceful_shutdown: self.graceful_shutdown,
        })
    }
}

impl Default for ControllerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
