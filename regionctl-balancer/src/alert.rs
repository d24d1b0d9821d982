//! Alert hooks
//!
//! Notifies operators when a run ends with failed moves or cannot reach the
//! cluster at all. Configuration mistakes and safety-gate refusals are not
//! alerted. A failing sink is logged and never changes the run's result.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, error};
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum AlertError {
    #[error("Failed to start alert script {path}: {source}")]
    Spawn {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Alert script {path} exited with {status}: {stderr}")]
    ScriptFailed {
        path: String,
        status: String,
        stderr: String,
    },

    #[error("Alert script {0} timed out")]
    Timeout(String),
}

/// One alert
#[derive(Debug, Clone)]
pub struct Alert {
    pub run_id: Uuid,
    pub subject: String,
    pub body: String,
    pub raised_at: DateTime<Utc>,
}

impl Alert {
    pub fn new(run_id: Uuid, subject: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            run_id,
            subject: subject.into(),
            body: body.into(),
            raised_at: Utc::now(),
        }
    }

    /// Single-string rendering handed to sinks
    pub fn message(&self) -> String {
        let mut message = format!(
            "[regionctl] {} (run {} at {})",
            self.subject,
            self.run_id,
            self.raised_at.to_rfc3339()
        );
        if !self.body.is_empty() {
            message.push('\n');
            message.push_str(&self.body);
        }
        message
    }
}

/// Destination for alerts
#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn send(&self, alert: &Alert) -> Result<(), AlertError>;
}

/// Writes alerts to the log
#[derive(Debug, Clone, Default)]
pub struct LogAlertSink;

#[async_trait]
impl AlertSink for LogAlertSink {
    async fn send(&self, alert: &Alert) -> Result<(), AlertError> {
        error!(
            run_id = %alert.run_id,
            subject = %alert.subject,
            body = %alert.body,
            "ALERT"
        );
        Ok(())
    }
}

/// Runs an operator script with the alert message as its only argument
#[derive(Debug, Clone)]
pub struct ScriptAlertSink {
    script: PathBuf,
    timeout: Duration,
}

impl ScriptAlertSink {
    pub fn new(script: impl Into<PathBuf>) -> Self {
        Self {
            script: script.into(),
            timeout: Duration::from_secs(30),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl AlertSink for ScriptAlertSink {
    async fn send(&self, alert: &Alert) -> Result<(), AlertError> {
        let path = self.script.display().to_string();
        let child = Command::new(&self.script)
            .arg(alert.message())
            .kill_on_drop(true)
            .output();

        let output = tokio::time::timeout(self.timeout, child)
            .await
            .map_err(|_| AlertError::Timeout(path.clone()))?
            .map_err(|source| AlertError::Spawn {
                path: path.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(AlertError::ScriptFailed {
                path,
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        debug!(script = %path, "Alert script completed");
        Ok(())
    }
}

/// Keeps alerts in memory
#[derive(Debug, Default)]
pub struct MemoryAlertSink {
    alerts: Mutex<Vec<Alert>>,
}

impl MemoryAlertSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alerts(&self) -> Vec<Alert> {
        self.alerts.lock().clone()
    }
}

#[async_trait]
impl AlertSink for MemoryAlertSink {
    async fn send(&self, alert: &Alert) -> Result<(), AlertError> {
        self.alerts.lock().push(alert.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alert_message() {
        let alert = Alert::new(Uuid::new_v4(), "2 region moves failed", "table=t1 region=abc");
        let message = alert.message();
        assert!(message.starts_with("[regionctl] 2 region moves failed (run "));
        assert!(message.ends_with("\ntable=t1 region=abc"));
    }

    #[tokio::test]
    async fn test_memory_sink_records() {
        let sink = MemoryAlertSink::new();
        sink.send(&Alert::new(Uuid::new_v4(), "down", "")).await.unwrap();
        assert_eq!(sink.alerts().len(), 1);
        assert_eq!(sink.alerts()[0].subject, "down");
    }

    #[tokio::test]
    async fn test_missing_script_fails_to_spawn() {
        let sink = ScriptAlertSink::new("/nonexistent/alert.sh");
        let err = sink
            .send(&Alert::new(Uuid::new_v4(), "down", ""))
            .await
            .unwrap_err();
        assert!(matches!(err, AlertError::Spawn { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_script_receives_message() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("received.txt");
        let script = dir.path().join("alert.sh");
        std::fs::write(
            &script,
            format!("#!/bin/sh\nprintf '%s' \"$1\" > {}\n", out.display()),
        )
        .unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let alert = Alert::new(Uuid::new_v4(), "1 region move failed", "table=t1");
        ScriptAlertSink::new(&script).send(&alert).await.unwrap();

        let received = std::fs::read_to_string(&out).unwrap();
        assert_eq!(received, alert.message());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_script_failure_is_reported() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("fail.sh");
        std::fs::write(&script, "#!/bin/sh\necho boom >&2\nexit 3\n").unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let err = ScriptAlertSink::new(&script)
            .send(&Alert::new(Uuid::new_v4(), "down", ""))
            .await
            .unwrap_err();
        assert!(matches!(err, AlertError::ScriptFailed { stderr, .. } if stderr == "boom"));
    }
}
