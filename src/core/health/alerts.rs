//! Operational alerting.
//!
//! Every alert is recorded to the event-log collaborator, preserving a
//! complete history; the minimum-severity filter applies only to the
//! external notification sinks (webhook, mail gateway). Sink delivery is
//! best-effort: a failed dispatch is logged and never raises back into the
//! code path that triggered the alert.

use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// How long a process-fatal path waits for its critical alert to go out
/// before the process exits.
pub const FATAL_ALERT_GRACE: Duration = Duration::from_secs(2);

/// Alert severity, ordered. The minimum-level sink filter compares with
/// this ordering.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Info,
    #[default]
    Warning,
    Error,
    Critical,
}

impl AlertSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertSeverity::Info => "info",
            AlertSeverity::Warning => "warning",
            AlertSeverity::Error => "error",
            AlertSeverity::Critical => "critical",
        }
    }

    /// Parse from config, with fallback to the default.
    pub fn from_str_or_default(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "info" => AlertSeverity::Info,
            "warning" => AlertSeverity::Warning,
            "error" => AlertSeverity::Error,
            "critical" => AlertSeverity::Critical,
            _ => AlertSeverity::default(),
        }
    }
}

/// An immutable, append-only alert record.
#[derive(Debug, Clone, Serialize)]
pub struct Alert {
    pub severity: AlertSeverity,
    pub title: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub business_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
    /// Seconds since the Unix epoch.
    pub timestamp: u64,
}

impl Alert {
    pub fn new(severity: AlertSeverity, title: &str, message: &str) -> Self {
        Self {
            severity,
            title: title.to_string(),
            message: message.to_string(),
            business_id: None,
            metadata: None,
            timestamp: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0),
        }
    }

    pub fn critical(title: &str, message: &str) -> Self {
        Self::new(AlertSeverity::Critical, title, message)
    }

    pub fn with_business_id(mut self, business_id: &str) -> Self {
        self.business_id = Some(business_id.to_string());
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// Errors from the event-log collaborator.
#[derive(Debug, Error)]
pub enum EventLogError {
    #[error("event log not configured")]
    NotConfigured,

    #[error("event log request failed: {0}")]
    Request(String),
}

/// Append-only audit/event log the bridge records alerts to.
///
/// The persistence readiness probe goes through [`EventLog::ping`].
#[async_trait]
pub trait EventLog: Send + Sync {
    /// Append one alert. Failures are logged by the caller, never fatal.
    async fn record(&self, alert: &Alert) -> Result<(), EventLogError>;

    /// Lightweight round trip to the backing store, returning the observed
    /// latency.
    async fn ping(&self) -> Result<Duration, EventLogError>;

    /// Whether a backing store is configured at all.
    fn is_configured(&self) -> bool;
}

/// Event log backed by an HTTP collector.
pub struct HttpEventLog {
    base_url: String,
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpEventLog {
    pub fn new(base_url: &str, client: reqwest::Client) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
            timeout: Duration::from_secs(5),
        }
    }
}

#[async_trait]
impl EventLog for HttpEventLog {
    async fn record(&self, alert: &Alert) -> Result<(), EventLogError> {
        self.client
            .post(format!("{}/events", self.base_url))
            .timeout(self.timeout)
            .json(alert)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map(|_| ())
            .map_err(|e| EventLogError::Request(e.to_string()))
    }

    async fn ping(&self) -> Result<Duration, EventLogError> {
        let started = Instant::now();
        self.client
            .get(format!("{}/health", self.base_url))
            .timeout(self.timeout)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| EventLogError::Request(e.to_string()))?;
        Ok(started.elapsed())
    }

    fn is_configured(&self) -> bool {
        true
    }
}

/// Fallback event log that only writes to the process log. Used when no
/// collector URL is configured; the readiness probe reports the
/// persistence dependency as not configured.
pub struct TracingEventLog;

#[async_trait]
impl EventLog for TracingEventLog {
    async fn record(&self, alert: &Alert) -> Result<(), EventLogError> {
        info!(
            severity = alert.severity.as_str(),
            title = %alert.title,
            business_id = alert.business_id.as_deref().unwrap_or(""),
            "alert: {}",
            alert.message
        );
        Ok(())
    }

    async fn ping(&self) -> Result<Duration, EventLogError> {
        Err(EventLogError::NotConfigured)
    }

    fn is_configured(&self) -> bool {
        false
    }
}

/// Notification sink configuration, from deployment config.
#[derive(Debug, Clone, Default)]
pub struct AlertConfig {
    /// Optional webhook URL; alerts at or above the minimum level are
    /// POSTed to it as JSON.
    pub webhook_url: Option<String>,
    /// Optional mail-gateway URL and recipient; delivered through the same
    /// best-effort dispatcher as the webhook.
    pub mail_gateway_url: Option<String>,
    pub email_to: Option<String>,
    /// Minimum severity forwarded to the sinks.
    pub min_severity: AlertSeverity,
}

/// Records alerts and fans them out to configured sinks.
pub struct AlertManager {
    event_log: Arc<dyn EventLog>,
    config: AlertConfig,
    client: reqwest::Client,
}

impl AlertManager {
    pub fn new(event_log: Arc<dyn EventLog>, config: AlertConfig) -> Self {
        Self {
            event_log,
            config,
            client: reqwest::Client::new(),
        }
    }

    pub fn event_log(&self) -> Arc<dyn EventLog> {
        self.event_log.clone()
    }

    /// Whether this alert would be forwarded to the sinks.
    fn forwards(&self, alert: &Alert) -> bool {
        alert.severity >= self.config.min_severity
    }

    /// Record and dispatch without blocking the caller. The triggering
    /// code path continues immediately; delivery runs on spawned tasks.
    pub fn dispatch(&self, alert: Alert) {
        let event_log = self.event_log.clone();
        let record = alert.clone();
        tokio::spawn(async move {
            if let Err(e) = event_log.record(&record).await {
                warn!("failed to record alert to event log: {e}");
            }
        });

        if !self.forwards(&alert) {
            debug!(
                severity = alert.severity.as_str(),
                "alert below sink threshold, recorded only"
            );
            return;
        }

        if let Some(url) = self.config.webhook_url.clone() {
            let client = self.client.clone();
            let payload = alert.clone();
            tokio::spawn(async move {
                if let Err(e) = client.post(&url).json(&payload).send().await {
                    warn!("alert webhook dispatch failed: {e}");
                }
            });
        }

        if let (Some(url), Some(to)) =
            (self.config.mail_gateway_url.clone(), self.config.email_to.clone())
        {
            let client = self.client.clone();
            let body = json!({
                "to": to,
                "subject": format!("[{}] {}", alert.severity.as_str(), alert.title),
                "body": alert.message,
                "business_id": alert.business_id,
            });
            tokio::spawn(async move {
                if let Err(e) = client.post(&url).json(&body).send().await {
                    warn!("alert email dispatch failed: {e}");
                }
            });
        }
    }

    /// Record and deliver, awaiting completion. Used by the fatal path,
    /// which has a bounded grace before the process exits.
    pub async fn deliver_now(&self, alert: Alert) {
        if let Err(e) = self.event_log.record(&alert).await {
            warn!("failed to record alert to event log: {e}");
        }

        if !self.forwards(&alert) {
            return;
        }

        if let Some(url) = &self.config.webhook_url {
            if let Err(e) = self.client.post(url).json(&alert).send().await {
                warn!("alert webhook dispatch failed: {e}");
            }
        }

        if let (Some(url), Some(to)) = (&self.config.mail_gateway_url, &self.config.email_to) {
            let body = json!({
                "to": to,
                "subject": format!("[{}] {}", alert.severity.as_str(), alert.title),
                "body": alert.message,
                "business_id": alert.business_id,
            });
            if let Err(e) = self.client.post(url).json(&body).send().await {
                warn!("alert email dispatch failed: {e}");
            }
        }
    }
}

/// Route process panics through the critical-alert path before the default
/// hook runs. The hook blocks its thread for at most [`FATAL_ALERT_GRACE`]
/// to give the delivery a chance; with `panic = "abort"` in release builds
/// this is the last thing the process does.
pub fn install_panic_hook(alerts: Arc<AlertManager>) {
    let handle = tokio::runtime::Handle::current();
    let default_hook = std::panic::take_hook();

    std::panic::set_hook(Box::new(move |info| {
        let message = info.to_string();
        error!("process-fatal condition: {message}");

        let alerts = alerts.clone();
        let (done_tx, done_rx) = std::sync::mpsc::channel::<()>();
        handle.spawn(async move {
            alerts
                .deliver_now(Alert::critical("call bridge panic", &message))
                .await;
            let _ = done_tx.send(());
        });
        let _ = done_rx.recv_timeout(FATAL_ALERT_GRACE);

        default_hook(info);
    }));
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    struct RecordingLog {
        records: Mutex<Vec<Alert>>,
    }

    #[async_trait]
    impl EventLog for RecordingLog {
        async fn record(&self, alert: &Alert) -> Result<(), EventLogError> {
            self.records.lock().push(alert.clone());
            Ok(())
        }

        async fn ping(&self) -> Result<Duration, EventLogError> {
            Ok(Duration::from_millis(1))
        }

        fn is_configured(&self) -> bool {
            true
        }
    }

    #[test]
    fn test_severity_ordering() {
        assert!(AlertSeverity::Info < AlertSeverity::Warning);
        assert!(AlertSeverity::Warning < AlertSeverity::Error);
        assert!(AlertSeverity::Error < AlertSeverity::Critical);
    }

    #[test]
    fn test_severity_parse() {
        assert_eq!(
            AlertSeverity::from_str_or_default("critical"),
            AlertSeverity::Critical
        );
        assert_eq!(
            AlertSeverity::from_str_or_default("bogus"),
            AlertSeverity::Warning
        );
    }

    #[test]
    fn test_sink_filter_threshold() {
        let manager = AlertManager::new(
            Arc::new(TracingEventLog),
            AlertConfig {
                min_severity: AlertSeverity::Error,
                ..Default::default()
            },
        );
        assert!(!manager.forwards(&Alert::new(AlertSeverity::Info, "t", "m")));
        assert!(!manager.forwards(&Alert::new(AlertSeverity::Warning, "t", "m")));
        assert!(manager.forwards(&Alert::new(AlertSeverity::Error, "t", "m")));
        assert!(manager.forwards(&Alert::critical("t", "m")));
    }

    #[tokio::test]
    async fn test_every_alert_recorded_regardless_of_level() {
        let log = Arc::new(RecordingLog {
            records: Mutex::new(Vec::new()),
        });
        let manager = AlertManager::new(
            log.clone(),
            AlertConfig {
                min_severity: AlertSeverity::Critical,
                ..Default::default()
            },
        );

        manager
            .deliver_now(Alert::new(AlertSeverity::Info, "below threshold", "m"))
            .await;
        manager.deliver_now(Alert::critical("above threshold", "m")).await;

        let records = log.records.lock();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].title, "below threshold");
    }

    #[test]
    fn test_alert_builders() {
        let alert = Alert::critical("peer init failed", "connection refused")
            .with_business_id("biz-1")
            .with_metadata(json!({ "call_sid": "CA123" }));
        assert_eq!(alert.severity, AlertSeverity::Critical);
        assert_eq!(alert.business_id.as_deref(), Some("biz-1"));
        assert!(alert.timestamp > 0);
    }
}
