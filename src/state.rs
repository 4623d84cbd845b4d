//! Shared application state, constructed once at startup and handed to every
//! handler through axum's state extractor.

use std::sync::Arc;
use std::time::Duration;

use crate::config::ServerConfig;
use crate::core::audio::BatchConfig;
use crate::core::health::{
    AlertConfig, AlertManager, AlertSeverity, EventLog, HealthMonitor, HttpEventLog,
    TracingEventLog,
};
use crate::core::peer::PeerConfig;
use crate::core::session::{RegistryConfig, SessionRegistry, TELEPHONY_SAMPLE_RATE};

/// Everything the HTTP and WebSocket handlers need, shared via `Arc`.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub registry: Arc<SessionRegistry>,
    pub alerts: Arc<AlertManager>,
    pub health: Arc<HealthMonitor>,
}

impl AppState {
    pub fn new(config: ServerConfig) -> Self {
        let peer = PeerConfig {
            api_key: config.openai_api_key.clone().unwrap_or_default(),
            model: config.ai_model.clone().unwrap_or_default(),
            voice: config.ai_voice.clone(),
            instructions: config.ai_instructions.clone(),
        };
        let registry = Arc::new(SessionRegistry::new(RegistryConfig {
            peer_provider: config.ai_provider.clone(),
            peer,
            telephony_rate: TELEPHONY_SAMPLE_RATE,
            ai_rate: 24000,
            resampler_quality: config.resampler_quality,
            batch: BatchConfig {
                target_bytes: config.batch_target_bytes,
                max_latency: Duration::from_millis(config.batch_max_latency_ms),
            },
        }));

        let event_log: Arc<dyn EventLog> = match &config.event_log_url {
            Some(url) => Arc::new(HttpEventLog::new(url, reqwest::Client::new())),
            None => Arc::new(TracingEventLog),
        };
        let alerts = Arc::new(AlertManager::new(
            event_log.clone(),
            AlertConfig {
                webhook_url: config.alert_webhook_url.clone(),
                mail_gateway_url: config.mail_gateway_url.clone(),
                email_to: config.alert_email_to.clone(),
                min_severity: AlertSeverity::from_str_or_default(&config.alert_min_severity),
            },
        ));

        let health = Arc::new(HealthMonitor::new(
            registry.clone(),
            event_log,
            config.ai_configured(),
            config.telephony_configured(),
        ));

        Self {
            config: Arc::new(config),
            registry,
            alerts,
            health,
        }
    }
}
