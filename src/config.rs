use crate::observer::ObserverSettings;
use crate::permissions::Role;
use crate::sources::ADDRESS_PLACEHOLDER;
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct PhasewatchConfig {
    pub resource: ResourceConfig,
    pub infra: InfraConfig,
    pub app: AppConfig,
    pub observer: ObserverConfig,
    #[serde(default)]
    pub permissions: PermissionsConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct ResourceConfig {
    /// Identifier of the managed resource, substituted for `{resource}`
    #[serde(default)]
    pub id: String,

    /// Directory holding the per-resource operation lock files, shared by
    /// every phasewatch process on the host. Defaults to a directory under
    /// the system temp dir.
    #[serde(default)]
    pub lock_dir: Option<PathBuf>,
}

impl ResourceConfig {
    pub fn lock_dir(&self) -> PathBuf {
        self.lock_dir
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("phasewatch"))
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct InfraConfig {
    /// Prints the lifecycle code or state name of the resource, optionally
    /// followed by its public address and the last transition reason
    #[serde(default = "default_status_command")]
    pub status_command: Vec<String>,

    #[serde(default = "default_start_command")]
    pub start_command: Vec<String>,

    #[serde(default = "default_stop_command")]
    pub stop_command: Vec<String>,

    /// Commands still running after this long are killed
    #[serde(default = "default_command_timeout")]
    pub command_timeout_seconds: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct AppConfig {
    /// Root of the application's control API. `{address}` is replaced by
    /// the resource's current public address on every request.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Sent as the `key` query parameter on every request
    #[serde(default)]
    pub api_key: String,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,

    /// The control API is usually served with a self-signed certificate
    #[serde(default = "default_accept_invalid_certs")]
    pub accept_invalid_certs: bool,

    /// Ask the application to shut down before stopping the resource
    #[serde(default = "default_graceful_shutdown")]
    pub graceful_shutdown: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct ObserverConfig {
    #[serde(default = "default_poll_interval")]
    pub poll_interval_seconds: u64,

    /// Overall bound for one operation; 0 waits indefinitely
    #[serde(default = "default_observer_timeout")]
    pub timeout_seconds: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Default)]
pub struct PermissionsConfig {
    /// When false every action is allowed
    #[serde(default)]
    pub enabled: bool,

    /// Role identifier (`starter`, `stopper`, `status`, `trusted`, `admin`)
    /// to the role name principals carry
    #[serde(default)]
    pub roles: BTreeMap<String, String>,

    /// Role names held by the local operator
    #[serde(default)]
    pub default_roles: Vec<String>,
}

impl ObserverConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_seconds)
    }

    pub fn timeout(&self) -> Option<Duration> {
        match self.timeout_seconds {
            0 => None,
            seconds => Some(Duration::from_secs(seconds)),
        }
    }

    pub fn settings(&self) -> ObserverSettings {
        ObserverSettings::new(self.poll_interval(), self.timeout())
    }
}

impl InfraConfig {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_seconds)
    }
}

impl PhasewatchConfig {
    /// Load configuration from default sources (file + environment variables)
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_file("phasewatch.toml")
    }

    /// Load configuration from a specific file path
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path_str = path.as_ref().to_string_lossy();
        debug!("Loading configuration from: {}", path_str);

        let settings = Config::builder()
            .set_default("resource.id", "")?
            .set_default("infra.status_command", default_status_command())?
            .set_default("infra.start_command", default_start_command())?
            .set_default("infra.stop_command", default_stop_command())?
            .set_default("infra.command_timeout_seconds", default_command_timeout())?
            .set_default("app.base_url", default_base_url())?
            .set_default("app.api_key", "")?
            .set_default("app.request_timeout_seconds", default_request_timeout())?
            .set_default("app.accept_invalid_certs", default_accept_invalid_certs())?
            .set_default("app.graceful_shutdown", default_graceful_shutdown())?
            .set_default("observer.poll_interval_seconds", default_poll_interval())?
            .set_default("observer.timeout_seconds", default_observer_timeout())?
            .set_default("permissions.enabled", false)?
            // Add configuration file (optional)
            .add_source(File::with_name(&path_str).required(false))
            // PHASEWATCH_OBSERVER__POLL_INTERVAL_SECONDS=10 and friends
            .add_source(
                Environment::with_prefix("PHASEWATCH")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: PhasewatchConfig = settings.try_deserialize()?;

        info!("Configuration loaded successfully");
        debug!("Final configuration: {:#?}", config);

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.resource.id.trim().is_empty() {
            return Err(ConfigError::Message(
                "resource.id must be set".to_string(),
            ));
        }

        if self.infra.status_command.is_empty() {
            return Err(ConfigError::Message(
                "infra.status_command must not be empty".to_string(),
            ));
        }

        if self.infra.command_timeout_seconds == 0 {
            return Err(ConfigError::Message(
                "infra.command_timeout_seconds must be greater than 0".to_string(),
            ));
        }

        // Any address will do: only the shape of the URL is checked here
        let sample = self.app.base_url.replace(ADDRESS_PLACEHOLDER, "192.0.2.1");
        match reqwest::Url::parse(&sample) {
            Ok(url) if matches!(url.scheme(), "http" | "https") && url.has_host() => {}
            _ => {
                return Err(ConfigError::Message(format!(
                    "app.base_url '{}' must be an http or https URL",
                    self.app.base_url
                )))
            }
        }

        if self.app.request_timeout_seconds == 0 {
            return Err(ConfigError::Message(
                "app.request_timeout_seconds must be greater than 0".to_string(),
            ));
        }

        if self.observer.poll_interval_seconds == 0 {
            return Err(ConfigError::Message(
                "observer.poll_interval_seconds must be greater than 0".to_string(),
            ));
        }

        if self.observer.timeout_seconds != 0
            && self.observer.timeout_seconds < self.observer.poll_interval_seconds
        {
            return Err(ConfigError::Message(format!(
                "observer.timeout_seconds ({}) must be 0 or at least the poll interval ({})",
                self.observer.timeout_seconds, self.observer.poll_interval_seconds
            )));
        }

        for identifier in self.permissions.roles.keys() {
            if Role::parse(identifier).is_none() {
                return Err(ConfigError::Message(format!(
                    "permissions.roles: unknown role identifier '{}'",
                    identifier
                )));
            }
        }

        Ok(())
    }
}

impl Default for PhasewatchConfig {
    fn default() -> Self {
        Self {
            resource: ResourceConfig {
                id: String::new(),
                lock_dir: None,
            },
            infra: InfraConfig {
                status_command: default_status_command(),
                start_command: default_start_command(),
                stop_command: default_stop_command(),
                command_timeout_seconds: default_command_timeout(),
            },
            app: AppConfig {
                base_url: default_base_url(),
                api_key: String::new(),
                request_timeout_seconds: default_request_timeout(),
                accept_invalid_certs: default_accept_invalid_certs(),
                graceful_shutdown: default_graceful_shutdown(),
            },
            observer: ObserverConfig {
                poll_interval_seconds: default_poll_interval(),
                timeout_seconds: default_observer_timeout(),
            },
            permissions: PermissionsConfig::default(),
        }
    }
}

fn argv(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|part| part.to_string()).collect()
}

fn default_status_command() -> Vec<String> {
    argv(&[
        "aws",
        "ec2",
        "describe-instances",
        "--instance-ids",
        "{resource}",
        "--query",
        "Reservations[0].Instances[0].[State.Code,PublicIpAddress,StateTransitionReason]",
        "--output",
        "text",
    ])
}
fn default_start_command() -> Vec<String> {
    argv(&["aws", "ec2", "start-instances", "--instance-ids", "{resource}"])
}
fn default_stop_command() -> Vec<String> {
    argv(&["aws", "ec2", "stop-instances", "--instance-ids", "{resource}"])
}
fn default_command_timeout() -> u64 {
    30
}

fn default_base_url() -> String {
    "https://{address}:8080".to_string()
}
fn default_request_timeout() -> u64 {
    3
}
fn default_accept_invalid_certs() -> bool {
    true
}
fn default_graceful_shutdown() -> bool {
    true
}

fn default_poll_interval() -> u64 {
    5
}
fn default_observer_timeout() -> u64 {
    600
}
