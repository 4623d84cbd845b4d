use serde::Deserialize;

/// Complete YAML configuration structure
///
/// All fields are optional to allow partial configuration; values set here
/// override environment variables.
///
/// # Example YAML structure
/// ```yaml
/// server:
///   host: "0.0.0.0"
///   port: 8080
///
/// ai:
///   provider: "openai"
///   api_key: "sk-..."
///   model: "gpt-4o-realtime-preview"
///   voice: "alloy"
///   instructions: "You are a friendly receptionist."
///
/// telephony:
///   account_sid: "AC..."
///   auth_token: "..."
///
/// audio:
///   batch_target_bytes: 4800
///   batch_max_latency_ms: 50
///   resampler_quality: 2
///
/// alerts:
///   webhook_url: "https://hooks.example.com/bridge"
///   email_to: "oncall@example.com"
///   mail_gateway_url: "https://mail.internal/send"
///   min_severity: "warning"
///
/// event_log:
///   url: "https://events.internal"
/// ```
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct YamlConfig {
    pub server: Option<ServerYaml>,
    pub ai: Option<AiYaml>,
    pub telephony: Option<TelephonyYaml>,
    pub audio: Option<AudioYaml>,
    pub alerts: Option<AlertsYaml>,
    pub event_log: Option<EventLogYaml>,
    pub security: Option<SecurityYaml>,
}

/// Server configuration from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ServerYaml {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub shutdown_grace_seconds: Option<u64>,
}

/// AI peer configuration from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AiYaml {
    pub provider: Option<String>,
    pub api_key: Option<String>,
    pub model: Option<String>,
    pub voice: Option<String>,
    pub instructions: Option<String>,
}

/// Telephony provider credentials from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct TelephonyYaml {
    pub account_sid: Option<String>,
    pub auth_token: Option<String>,
}

/// Audio pipeline tuning from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AudioYaml {
    pub batch_target_bytes: Option<usize>,
    pub batch_max_latency_ms: Option<u64>,
    pub resampler_quality: Option<usize>,
}

/// Alert sink configuration from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AlertsYaml {
    pub webhook_url: Option<String>,
    pub email_to: Option<String>,
    pub mail_gateway_url: Option<String>,
    pub min_severity: Option<String>,
}

/// Event-log collector from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct EventLogYaml {
    pub url: Option<String>,
}

/// Security configuration from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct SecurityYaml {
    pub intake_shared_secret: Option<String>,
    pub cors_allowed_origins: Option<String>,
}

impl YamlConfig {
    /// Load YAML configuration from a file
    pub fn from_file(path: &std::path::Path) -> Result<Self, Box<dyn std::error::Error>> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file {}: {e}", path.display()))?;
        let config: YamlConfig = serde_yaml::from_str(&contents)
            .map_err(|e| format!("Failed to parse config file {}: {e}", path.display()))?;
        Ok(config)
    }
}
