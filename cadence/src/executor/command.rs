//! Executor that runs each attempt as an external process

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::config::ExecutorConfig;
use crate::domain::Key;

use super::{ExecutorError, JobExecutor, JobReport};

/// Runs a configured program once per attempt
///
/// The program receives the key and context through `CADENCE_KEY` and
/// `CADENCE_CONTEXT`. It may print a JSON [`JobReport`] as its last line of
/// stdout; without one the exit status decides the outcome.
#[derive(Debug, Clone)]
pub struct CommandExecutor {
    program: String,
    args: Vec<String>,
}

impl CommandExecutor {
    /// Create an executor for `program` invoked with `args`
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        let program = program.into();
        debug!(%program, ?args, "CommandExecutor::new: called");
        Self { program, args }
    }

    /// Create an executor from configuration
    pub fn from_config(config: &ExecutorConfig) -> Self {
        Self::new(config.program.clone(), config.args.clone())
    }
}

#[async_trait]
impl JobExecutor for CommandExecutor {
    async fn execute(&self, key: &Key, context: &str, deadline: Duration) -> Result<JobReport, ExecutorError> {
        debug!(%key, program = %self.program, ?deadline, "CommandExecutor::execute: called");
        let child = Command::new(&self.program)
            .args(&self.args)
            .env("CADENCE_KEY", key.expose())
            .env("CADENCE_CONTEXT", context)
            .env("CADENCE_DEADLINE_SECS", deadline.as_secs().to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(ExecutorError::Spawn)?;

        // Dropping the child on timeout kills it
        let output = match tokio::time::timeout(deadline, child.wait_with_output()).await {
            Ok(result) => result?,
            Err(_) => {
                debug!(%key, "CommandExecutor::execute: deadline exceeded");
                return Err(ExecutorError::Timeout(deadline));
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        debug!(status = ?output.status, stdout_len = stdout.len(), stderr_len = stderr.len(), "CommandExecutor::execute: process exited");

        parse_report(output.status.success(), output.status.code(), &stdout, &stderr)
    }
}

fn last_line(text: &str) -> Option<&str> {
    text.lines().rev().map(str::trim).find(|line| !line.is_empty())
}

/// Turn process output into a report
fn parse_report(exited_ok: bool, code: Option<i32>, stdout: &str, stderr: &str) -> Result<JobReport, ExecutorError> {
    if let Some(line) = last_line(stdout)
        && line.starts_with('{')
    {
        let report: JobReport = serde_json::from_str(line).map_err(|e| ExecutorError::InvalidReport(e.to_string()))?;
        if report.success && !exited_ok {
            return Ok(JobReport::failure(format!(
                "Reported success but exited with code {}",
                code.unwrap_or(-1)
            )));
        }
        return Ok(report);
    }

    if exited_ok {
        Ok(JobReport::success(None))
    } else {
        let reason = last_line(stderr)
            .map(str::to_string)
            .unwrap_or_else(|| format!("Exit code: {}", code.unwrap_or(-1)));
        Ok(JobReport::failure(reason))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shell(script: &str) -> CommandExecutor {
        CommandExecutor::new("sh", vec!["-c".to_string(), script.to_string()])
    }

    #[test]
    fn test_parse_report_json_line() {
        let report = parse_report(true, Some(0), "loading\n{\"success\":true,\"metric\":1050}\n", "").unwrap();
        assert_eq!(report, JobReport::success(Some(1050.0)));
    }

    #[test]
    fn test_parse_report_success_with_bad_exit_is_failure() {
        let report = parse_report(false, Some(3), "{\"success\":true}", "").unwrap();
        assert!(!report.success);
        assert!(report.reason.unwrap().contains("code 3"));
    }

    #[test]
    fn test_parse_report_falls_back_to_stderr() {
        let report = parse_report(false, Some(1), "", "warming up\nButton not found\n").unwrap();
        assert_eq!(report.reason.as_deref(), Some("Button not found"));
    }

    #[test]
    fn test_parse_report_exit_code_without_output() {
        let report = parse_report(false, Some(2), "", "").unwrap();
        assert_eq!(report.reason.as_deref(), Some("Exit code: 2"));
    }

    #[test]
    fn test_parse_report_rejects_malformed_json() {
        let result = parse_report(true, Some(0), "{\"success\":", "");
        assert!(matches!(result, Err(ExecutorError::InvalidReport(_))));
    }

    #[tokio::test]
    async fn test_execute_passes_key_and_context() {
        let executor = shell(r#"echo "{\"success\":true,\"reason\":\"$CADENCE_KEY|$CADENCE_CONTEXT\"}""#);
        let report = executor
            .execute(&Key::new("token-1"), "agent-a", Duration::from_secs(10))
            .await
            .unwrap();

        assert!(report.success);
        assert_eq!(report.reason.as_deref(), Some("token-1|agent-a"));
    }

    #[tokio::test]
    async fn test_execute_plain_exit_status() {
        let report = shell("exit 0")
            .execute(&Key::new("k"), "c", Duration::from_secs(10))
            .await
            .unwrap();
        assert_eq!(report, JobReport::success(None));

        let report = shell("echo oops >&2; exit 1")
            .execute(&Key::new("k"), "c", Duration::from_secs(10))
            .await
            .unwrap();
        assert_eq!(report.reason.as_deref(), Some("oops"));
    }

    #[tokio::test]
    async fn test_execute_times_out() {
        let result = shell("sleep 5")
            .execute(&Key::new("k"), "c", Duration::from_millis(100))
            .await;
        assert!(matches!(result, Err(ExecutorError::Timeout(_))));
    }

    #[tokio::test]
    async fn test_execute_missing_program() {
        let executor = CommandExecutor::new("/nonexistent/cadence-job", vec![]);
        let result = executor.execute(&Key::new("k"), "c", Duration::from_secs(1)).await;
        assert!(matches!(result, Err(ExecutorError::Spawn(_))));
    }
}
