use super::{AppControl, AppStateSource, InfraStateSource};
use crate::config::AppConfig;
use crate::error::{PhasewatchError, Result, SourceError};
use crate::phase::{AppProbe, AppReport, Direction, FailureKind};
use reqwest::{Client, Response, StatusCode};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Placeholder in `app.base_url` replaced by the resource's current address
pub const ADDRESS_PLACEHOLDER: &str = "{address}";

#[derive(Serialize)]
struct IssueRequest<'a> {
    command: &'a str,
}

/// Where the current address of the resource comes from
struct AddressLookup {
    resource_id: String,
    source: Arc<dyn InfraStateSource>,
}

/// Client for the application's control API (status, issue, kill)
pub struct HttpAppClient {
    http_client: Client,
    base_url: String,
    api_key: String,
    address: Option<AddressLookup>,
}

impl HttpAppClient {
    pub fn new(config: &AppConfig) -> Result<Self> {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .danger_accept_invalid_certs(config.accept_invalid_certs)
            .build()
            .map_err(|e| {
                PhasewatchError::component("http_client".to_string(), e.to_string())
            })?;

        Ok(Self {
            http_client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            address: None,
        })
    }

    /// Resolve `{address}` in the base URL through `source` before every
    /// request. Public addresses change across stop and start.
    pub fn with_address_source(
        mut self,
        resource_id: &str,
        source: Arc<dyn InfraStateSource>,
    ) -> Self {
        self.address = Some(AddressLookup {
            resource_id: resource_id.to_string(),
            source,
        });
        self
    }

    async fn url(&self, path: &str) -> std::result::Result<String, FailureKind> {
        if !self.base_url.contains(ADDRESS_PLACEHOLDER) {
            return Ok(format!("{}/{}", self.base_url, path));
        }

        let lookup = self.address.as_ref().ok_or_else(|| {
            FailureKind::RequestFailed(format!(
                "base URL contains {} but no address source is configured",
                ADDRESS_PLACEHOLDER
            ))
        })?;

        let report = lookup
            .source
            .describe(&lookup.resource_id)
            .await
            .map_err(|e| match e {
                SourceError::Connectivity { details } => {
                    debug!("Address lookup for {} failed: {}", lookup.resource_id, details);
                    FailureKind::AddressUnavailable
                }
                SourceError::Malformed { details } => FailureKind::RequestFailed(details),
            })?;

        let address = report.address.ok_or(FailureKind::AddressUnavailable)?;
        let base = self.base_url.replace(ADDRESS_PLACEHOLDER, &address);
        Ok(format!("{}/{}", base, path))
    }

    /// Fetch the application's health report
    pub async fn status(&self) -> AppProbe {
        let response = self.get("status").await?;
        response
            .json::<AppReport>()
            .await
            .map_err(|e| FailureKind::MalformedResponse(e.to_string()))
    }

    /// Send a console command to the application
    pub async fn issue(&self, command: &str) -> std::result::Result<(), FailureKind> {
        let response = self
            .http_client
            .post(self.url("issue").await?)
            .query(&[("key", &self.api_key)])
            .json(&IssueRequest { command })
            .send()
            .await
            .map_err(|e| classify_transport(&e))?;
        check_status(response).map(|_| ())
    }

    /// Names of the players currently connected
    pub async fn list_online_players(&self) -> std::result::Result<Vec<String>, FailureKind> {
        self.status().await.map(|report| report.players)
    }

    /// Ask the application to shut itself down
    pub async fn shutdown(&self) -> std::result::Result<(), FailureKind> {
        self.get("kill").await.map(|_| ())
    }

    async fn get(&self, path: &str) -> std::result::Result<Response, FailureKind> {
        let response = self
            .http_client
            .get(self.url(path).await?)
            .query(&[("key", &self.api_key)])
            .send()
            .await
            .map_err(|e| classify_transport(&e))?;
        check_status(response)
    }
}

#[async_trait::async_trait]
impl AppStateSource for HttpAppClient {
    async fn query(&self, resource_id: &str, direction: Direction) -> AppProbe {
        let probe = self.status().await;
        match &probe {
            Ok(report) => debug!("App on {} reports '{}'", resource_id, report.status),
            Err(kind) => debug!(
                "App probe on {} failed during {}: {}",
                resource_id, direction, kind
            ),
        }
        probe
    }

    fn source_name(&self) -> &str {
        "http"
    }
}

#[async_trait::async_trait]
impl AppControl for HttpAppClient {
    async fn issue(&self, command: &str) -> std::result::Result<(), FailureKind> {
        HttpAppClient::issue(self, command).await
    }

    async fn list_online_players(&self) -> std::result::Result<Vec<String>, FailureKind> {
        HttpAppClient::list_online_players(self).await
    }

    async fn shutdown(&self) -> std::result::Result<(), FailureKind> {
        HttpAppClient::shutdown(self).await
    }
}

/// Map an HTTP status to a failure kind; `None` means success
pub fn classify_status(status: StatusCode) -> Option<FailureKind> {
    if status.is_success() {
        return None;
    }
    Some(match status {
        StatusCode::UNAUTHORIZED => FailureKind::AuthRejected,
        StatusCode::SERVICE_UNAVAILABLE => FailureKind::ServiceNotReady,
        other => FailureKind::UnexpectedStatus(other.as_u16()),
    })
}

fn check_status(response: Response) -> std::result::Result<Response, FailureKind> {
    match classify_status(response.status()) {
        None => Ok(response),
        Some(kind) => {
            if kind == FailureKind::AuthRejected {
                warn!("Application API key was rejected, check the app.api_key setting");
            }
            Err(kind)
        }
    }
}

/// Only a failed connect or a timeout may later read as "already gone";
/// everything else keeps its details and is never coerced.
fn classify_transport(error: &reqwest::Error) -> FailureKind {
    if error.is_timeout() {
        FailureKind::Timeout
    } else if error.is_connect() {
        FailureKind::ConnectionFailed
    } else if error.is_decode() {
        FailureKind::MalformedResponse(error.to_string())
    } else {
        FailureKind::RequestFailed(error.to_string())
    }
}
