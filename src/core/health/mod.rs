//! Health monitoring for the call bridge.
//!
//! Two read paths: a cheap liveness snapshot for load-balancer polling
//! (never leaves the process) and a readiness snapshot that classifies each
//! dependency independently, with a single bounded round trip to the
//! event-log store. Snapshots are ephemeral and recomputed per request.

pub mod alerts;

pub use alerts::{
    Alert, AlertConfig, AlertManager, AlertSeverity, EventLog, EventLogError, HttpEventLog,
    TracingEventLog, install_panic_hook,
};

use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;

use crate::core::session::SessionRegistry;

/// Classification of one dependency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum DependencyState {
    Up,
    Down,
    NotConfigured,
    Unknown,
}

/// Status of one dependency in the readiness snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct DependencyStatus {
    pub status: DependencyState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DependencyStatus {
    fn up(latency_ms: Option<u64>) -> Self {
        Self {
            status: DependencyState::Up,
            latency_ms,
            error: None,
        }
    }

    fn down(error: String) -> Self {
        Self {
            status: DependencyState::Down,
            latency_ms: None,
            error: Some(error),
        }
    }

    fn not_configured() -> Self {
        Self {
            status: DependencyState::NotConfigured,
            latency_ms: None,
            error: None,
        }
    }
}

/// Overall readiness classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OverallStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Liveness snapshot: server vitals only, no external calls.
#[derive(Debug, Clone, Serialize)]
pub struct LivenessSnapshot {
    pub status: &'static str,
    pub uptime_seconds: u64,
    pub active_sessions: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_rss_kb: Option<u64>,
}

/// Per-dependency readiness snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct ReadinessSnapshot {
    pub status: OverallStatus,
    pub uptime_seconds: u64,
    pub active_sessions: usize,
    pub persistence: DependencyStatus,
    pub ai_endpoint: DependencyStatus,
    pub telephony: DependencyStatus,
}

/// Aggregates dependency liveness and the bridge's own vitals.
pub struct HealthMonitor {
    started_at: Instant,
    registry: Arc<SessionRegistry>,
    event_log: Arc<dyn EventLog>,
    ai_configured: bool,
    telephony_configured: bool,
}

impl HealthMonitor {
    pub fn new(
        registry: Arc<SessionRegistry>,
        event_log: Arc<dyn EventLog>,
        ai_configured: bool,
        telephony_configured: bool,
    ) -> Self {
        Self {
            started_at: Instant::now(),
            registry,
            event_log,
            ai_configured,
            telephony_configured,
        }
    }

    /// Cheap snapshot for frequent polling.
    pub fn liveness(&self) -> LivenessSnapshot {
        LivenessSnapshot {
            status: "ok",
            uptime_seconds: self.started_at.elapsed().as_secs(),
            active_sessions: self.registry.active_count(),
            memory_rss_kb: resident_memory_kb(),
        }
    }

    /// Detailed snapshot with one bounded round trip to the event-log
    /// store. Credential dependencies are classified from configuration
    /// alone, without calling out.
    pub async fn readiness(&self) -> ReadinessSnapshot {
        let persistence = if self.event_log.is_configured() {
            match self.event_log.ping().await {
                Ok(latency) => DependencyStatus::up(Some(latency.as_millis() as u64)),
                Err(e) => DependencyStatus::down(e.to_string()),
            }
        } else {
            DependencyStatus::not_configured()
        };

        let ai_endpoint = if self.ai_configured {
            DependencyStatus::up(None)
        } else {
            DependencyStatus::not_configured()
        };

        let telephony = if self.telephony_configured {
            DependencyStatus::up(None)
        } else {
            DependencyStatus::not_configured()
        };

        // Unhealthy only when persistence is down; missing credentials
        // degrade readiness but do not affect live calls.
        let status = if persistence.status == DependencyState::Down {
            OverallStatus::Unhealthy
        } else if ai_endpoint.status != DependencyState::Up
            || telephony.status != DependencyState::Up
            || persistence.status == DependencyState::NotConfigured
        {
            OverallStatus::Degraded
        } else {
            OverallStatus::Healthy
        };

        ReadinessSnapshot {
            status,
            uptime_seconds: self.started_at.elapsed().as_secs(),
            active_sessions: self.registry.active_count(),
            persistence,
            ai_endpoint,
            telephony,
        }
    }
}

/// Resident set size from `/proc/self/status`, in kilobytes. `VmRSS` is
/// reported in kB directly, independent of the kernel page size. `None`
/// on platforms without procfs.
fn resident_memory_kb() -> Option<u64> {
    let status = std::fs::read_to_string("/proc/self/status").ok()?;
    let line = status.lines().find(|l| l.starts_with("VmRSS:"))?;
    line.split_whitespace().nth(1)?.parse().ok()
}
