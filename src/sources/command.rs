use super::{InfraReport, InfraStateSource};
use crate::error::{LifecycleError, SourceError};
use crate::phase::{InfraCode, InfraState};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tracing::{debug, trace};

/// Placeholder substituted with the resource id in configured commands
pub const RESOURCE_PLACEHOLDER: &str = "{resource}";

/// Captured result of a finished command
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub success: bool,
    pub status: String,
    pub stdout: String,
    pub stderr: String,
}

/// Run a configured argv with `{resource}` substituted, killing it if it
/// outlives `timeout`.
pub async fn run_command(
    argv: &[String],
    resource_id: &str,
    timeout: Duration,
) -> Result<CommandOutput, LifecycleError> {
    let (program, args) = argv.split_first().ok_or_else(|| LifecycleError::NotConfigured {
        operation: "command".to_string(),
    })?;
    let args: Vec<String> = args
        .iter()
        .map(|arg| arg.replace(RESOURCE_PLACEHOLDER, resource_id))
        .collect();

    trace!("Running {} {:?}", program, args);

    let mut child = tokio::process::Command::new(program)
        .args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| LifecycleError::Spawn {
            program: program.clone(),
            details: e.to_string(),
        })?;

    let mut stdout_handle = child.stdout.take();
    let mut stderr_handle = child.stderr.take();

    tokio::select! {
        result = async {
            let (status, stdout, stderr) = tokio::join!(
                child.wait(),
                async {
                    let mut buf = Vec::new();
                    if let Some(ref mut h) = stdout_handle {
                        let _ = h.read_to_end(&mut buf).await;
                    }
                    buf
                },
                async {
                    let mut buf = Vec::new();
                    if let Some(ref mut h) = stderr_handle {
                        let _ = h.read_to_end(&mut buf).await;
                    }
                    buf
                },
            );
            let status = status.map_err(|e| LifecycleError::Spawn {
                program: program.clone(),
                details: e.to_string(),
            })?;
            Ok(CommandOutput {
                success: status.success(),
                status: status.to_string(),
                stdout: String::from_utf8_lossy(&stdout).into_owned(),
                stderr: String::from_utf8_lossy(&stderr).into_owned(),
            })
        } => result,
        () = tokio::time::sleep(timeout) => {
            let _ = child.kill().await;
            Err(LifecycleError::Timeout {
                program: program.clone(),
                seconds: timeout.as_secs(),
            })
        }
    }
}

/// Infrastructure source backed by an operator-configured status command.
///
/// The command prints the numeric lifecycle code or the state name,
/// optionally followed by the public address and the transition reason.
/// Columns are tab separated; without tabs, whitespace separates the first
/// two and the rest is the reason.
pub struct CommandInfraSource {
    status_command: Vec<String>,
    timeout: Duration,
}

impl CommandInfraSource {
    pub fn new(status_command: Vec<String>, timeout: Duration) -> Self {
        Self {
            status_command,
            timeout,
        }
    }

    /// Parse the command output into a raw code.
    ///
    /// Numbers pass through untouched so unknown codes reach the normalizer
    /// and fail there; unrecognised names are a contract violation here.
    pub fn parse_output(stdout: &str) -> Result<InfraCode, SourceError> {
        Self::parse_report(stdout).map(|report| report.code)
    }

    /// Parse the full output: code, then optional address and reason
    pub fn parse_report(stdout: &str) -> Result<InfraReport, SourceError> {
        let line = stdout.trim();
        let (code, address, reason) = if line.contains('\t') {
            let mut columns = line.splitn(3, '\t');
            (columns.next(), columns.next(), columns.next())
        } else {
            let mut columns = line.splitn(3, char::is_whitespace);
            (columns.next(), columns.next(), columns.next())
        };

        Ok(InfraReport {
            code: parse_code(code.unwrap_or_default())?,
            address: column(address),
            reason: column(reason),
        })
    }

    async fn run_status(&self, resource_id: &str) -> Result<InfraReport, SourceError> {
        let output = run_command(&self.status_command, resource_id, self.timeout)
            .await
            .map_err(|e| SourceError::connectivity(e.to_string()))?;

        if !output.success {
            return Err(SourceError::connectivity(format!(
                "status command exited with {}: {}",
                output.status,
                output.stderr.trim()
            )));
        }

        let report = Self::parse_report(&output.stdout)?;
        debug!(
            "Infrastructure state code for {}: {} (address {:?})",
            resource_id, report.code, report.address
        );
        Ok(report)
    }
}

fn parse_code(text: &str) -> Result<InfraCode, SourceError> {
    let text = text.trim().trim_matches('"');
    if text.is_empty() {
        return Err(SourceError::malformed("status command printed nothing"));
    }
    if let Ok(code) = text.parse::<u16>() {
        return Ok(InfraCode(code));
    }
    InfraState::from_name(text)
        .map(InfraCode::from)
        .ok_or_else(|| SourceError::malformed(format!("unrecognised state '{}'", text)))
}

/// Optional output column; the AWS CLI prints `None` for missing values
fn column(text: Option<&str>) -> Option<String> {
    let text = text?.trim().trim_matches('"').trim();
    match text {
        "" | "None" | "null" => None,
        value => Some(value.to_string()),
    }
}

#[async_trait::async_trait]
impl InfraStateSource for CommandInfraSource {
    async fn query(&self, resource_id: &str) -> Result<InfraCode, SourceError> {
        self.run_status(resource_id).await.map(|report| report.code)
    }

    async fn describe(&self, resource_id: &str) -> Result<InfraReport, SourceError> {
        self.run_status(resource_id).await
    }

    fn source_name(&self) -> &str {
        "command"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|p| p.to_string()).collect()
    }

    #[test]
    fn test_parse_numeric_and_named_output() {
        assert_eq!(CommandInfraSource::parse_output("16\n"), Ok(InfraCode(16)));
        assert_eq!(CommandInfraSource::parse_output("\"stopped\""), Ok(InfraCode(80)));
        assert_eq!(CommandInfraSource::parse_output("shutting-down"), Ok(InfraCode(32)));
        // Unknown numbers are left for the normalizer to reject
        assert_eq!(CommandInfraSource::parse_output("99"), Ok(InfraCode(99)));
    }

    #[test]
    fn test_parse_rejects_unknown_names() {
        assert!(matches!(
            CommandInfraSource::parse_output("rebooting"),
            Err(SourceError::Malformed { .. })
        ));
        assert!(matches!(
            CommandInfraSource::parse_output("   "),
            Err(SourceError::Malformed { .. })
        ));
    }

    #[test]
    fn test_parse_address_and_reason_columns() {
        let report =
            CommandInfraSource::parse_report("16\t3.25.10.4\tUser initiated (2024-05-01 10:00:00 GMT)\n")
                .unwrap();
        assert_eq!(report.code, InfraCode(16));
        assert_eq!(report.address.as_deref(), Some("3.25.10.4"));
        assert_eq!(
            report.reason.as_deref(),
            Some("User initiated (2024-05-01 10:00:00 GMT)")
        );

        // A stopped instance has no public address
        let report = CommandInfraSource::parse_report("80\tNone\t\n").unwrap();
        assert_eq!(report.code, InfraCode(80));
        assert_eq!(report.address, None);
        assert_eq!(report.reason, None);

        let report = CommandInfraSource::parse_report("running 10.0.0.7 Scheduled start").unwrap();
        assert_eq!(report.address.as_deref(), Some("10.0.0.7"));
        assert_eq!(report.reason.as_deref(), Some("Scheduled start"));

        assert_eq!(CommandInfraSource::parse_report("64").unwrap(), InfraReport::from(InfraCode(64)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_source_describes_resource() {
        let source = CommandInfraSource::new(
            argv(&["printf", "16\\t10.1.2.3\\t\\n"]),
            Duration::from_secs(5),
        );
        let report = source.describe("i-abc").await.unwrap();
        assert_eq!(report.code, InfraCode(16));
        assert_eq!(report.address.as_deref(), Some("10.1.2.3"));
        assert_eq!(source.query("i-abc").await, Ok(InfraCode(16)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_command_substitutes_resource() {
        let output = run_command(
            &argv(&["echo", "id={resource}"]),
            "i-abc",
            Duration::from_secs(5),
        )
        .await
        .unwrap();
        assert!(output.success);
        assert_eq!(output.stdout.trim(), "id=i-abc");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_command_times_out() {
        let result = run_command(&argv(&["sleep", "5"]), "i-abc", Duration::from_millis(50)).await;
        assert!(matches!(result, Err(LifecycleError::Timeout { .. })));
    }

    #[tokio::test]
    async fn test_run_command_requires_program() {
        let result = run_command(&[], "i-abc", Duration::from_secs(1)).await;
        assert!(matches!(result, Err(LifecycleError::NotConfigured { .. })));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_source_reports_failures_as_connectivity() {
        let source = CommandInfraSource::new(argv(&["false"]), Duration::from_secs(5));
        let result = source.query("i-abc").await;
        assert!(matches!(result, Err(SourceError::Connectivity { .. })));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_source_reads_state() {
        let source = CommandInfraSource::new(argv(&["echo", "running"]), Duration::from_secs(5));
        assert_eq!(source.query("i-abc").await, Ok(InfraCode(16)));
    }
}
