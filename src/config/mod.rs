//! Configuration management for the call bridge.
//!
//! Configuration is loaded from, in order of precedence:
//! 1. YAML config file (if provided via `-c` / `--config`)
//! 2. Environment variables
//! 3. `.env` file (loaded by the binary before config parsing)
//! 4. Built-in defaults
//!
//! # Example
//! ```no_run
//! use callbridge::config::ServerConfig;
//!
//! let config = ServerConfig::from_env().expect("invalid configuration");
//! println!("listening on {}", config.address());
//! ```

mod yaml;

pub use yaml::YamlConfig;

use std::path::Path;

use zeroize::Zeroize;

/// Runtime configuration for the bridge server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind host
    pub host: String,
    /// Bind port
    pub port: u16,
    /// Seconds to wait for live calls to wind down on shutdown
    pub shutdown_grace_seconds: u64,

    /// AI peer provider name ("openai")
    pub ai_provider: String,
    /// OpenAI API key for the realtime endpoint
    pub openai_api_key: Option<String>,
    /// Realtime model override
    pub ai_model: Option<String>,
    /// Voice override
    pub ai_voice: Option<String>,
    /// System instructions sent at session setup
    pub ai_instructions: Option<String>,

    /// Twilio account SID, used to validate intake callbacks
    pub twilio_account_sid: Option<String>,
    /// Twilio auth token
    pub twilio_auth_token: Option<String>,

    /// Outbound audio batch size in bytes of 24 kHz PCM
    pub batch_target_bytes: usize,
    /// Maximum time a partial batch may wait before flushing
    pub batch_max_latency_ms: u64,
    /// Resampler quality level (FFT chunking factor)
    pub resampler_quality: usize,

    /// Base URL of the event-log collector
    pub event_log_url: Option<String>,
    /// Webhook URL for operational alerts
    pub alert_webhook_url: Option<String>,
    /// Email recipient for alerts, delivered through the mail gateway
    pub alert_email_to: Option<String>,
    /// Base URL of the mail gateway
    pub mail_gateway_url: Option<String>,
    /// Minimum severity forwarded to alert sinks
    pub alert_min_severity: String,

    /// Shared secret for the intake API
    pub intake_shared_secret: Option<String>,
    /// Comma-separated CORS origins, "*" for any
    pub cors_allowed_origins: String,
}

impl Drop for ServerConfig {
    fn drop(&mut self) {
        if let Some(key) = self.openai_api_key.as_mut() {
            key.zeroize();
        }
        if let Some(token) = self.twilio_auth_token.as_mut() {
            token.zeroize();
        }
        if let Some(secret) = self.intake_shared_secret.as_mut() {
            secret.zeroize();
        }
    }
}

/// Read an environment variable, treating empty values as unset.
fn env_opt(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// Read and parse an environment variable, falling back to a default.
fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> Result<T, String> {
    match env_opt(name) {
        Some(raw) => raw
            .parse()
            .map_err(|_| format!("Invalid value for {name}: {raw}")),
        None => Ok(default),
    }
}

impl ServerConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, String> {
        let config = Self::load_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from environment variables, then apply overrides
    /// from a YAML file.
    pub fn from_file(path: &Path) -> Result<Self, String> {
        let yaml = YamlConfig::from_file(path).map_err(|e| e.to_string())?;
        let mut config = Self::load_env()?;
        config.apply_yaml(yaml);
        config.validate()?;
        Ok(config)
    }

    fn load_env() -> Result<Self, String> {
        Ok(Self {
            host: env_opt("HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port: env_parse("PORT", 8080)?,
            shutdown_grace_seconds: env_parse("SHUTDOWN_GRACE_SECONDS", 5)?,
            ai_provider: env_opt("AI_PROVIDER").unwrap_or_else(|| "openai".to_string()),
            openai_api_key: env_opt("OPENAI_API_KEY"),
            ai_model: env_opt("AI_MODEL"),
            ai_voice: env_opt("AI_VOICE"),
            ai_instructions: env_opt("AI_INSTRUCTIONS"),
            twilio_account_sid: env_opt("TWILIO_ACCOUNT_SID"),
            twilio_auth_token: env_opt("TWILIO_AUTH_TOKEN"),
            batch_target_bytes: env_parse("AUDIO_BATCH_TARGET_BYTES", 4800)?,
            batch_max_latency_ms: env_parse("AUDIO_BATCH_MAX_LATENCY_MS", 50)?,
            resampler_quality: env_parse("RESAMPLER_QUALITY", 2)?,
            event_log_url: env_opt("EVENT_LOG_URL"),
            alert_webhook_url: env_opt("ALERT_WEBHOOK_URL"),
            alert_email_to: env_opt("ALERT_EMAIL_TO"),
            mail_gateway_url: env_opt("MAIL_GATEWAY_URL"),
            alert_min_severity: env_opt("ALERT_MIN_SEVERITY")
                .unwrap_or_else(|| "warning".to_string()),
            intake_shared_secret: env_opt("INTAKE_SHARED_SECRET"),
            cors_allowed_origins: env_opt("CORS_ALLOWED_ORIGINS")
                .unwrap_or_else(|| "*".to_string()),
        })
    }

    fn apply_yaml(&mut self, yaml: YamlConfig) {
        if let Some(server) = yaml.server {
            if let Some(host) = server.host {
                self.host = host;
            }
            if let Some(port) = server.port {
                self.port = port;
            }
            if let Some(grace) = server.shutdown_grace_seconds {
                self.shutdown_grace_seconds = grace;
            }
        }
        if let Some(ai) = yaml.ai {
            if let Some(provider) = ai.provider {
                self.ai_provider = provider;
            }
            if ai.api_key.is_some() {
                self.openai_api_key = ai.api_key;
            }
            if ai.model.is_some() {
                self.ai_model = ai.model;
            }
            if ai.voice.is_some() {
                self.ai_voice = ai.voice;
            }
            if ai.instructions.is_some() {
                self.ai_instructions = ai.instructions;
            }
        }
        if let Some(telephony) = yaml.telephony {
            if telephony.account_sid.is_some() {
                self.twilio_account_sid = telephony.account_sid;
            }
            if telephony.auth_token.is_some() {
                self.twilio_auth_token = telephony.auth_token;
            }
        }
        if let Some(audio) = yaml.audio {
            if let Some(bytes) = audio.batch_target_bytes {
                self.batch_target_bytes = bytes;
            }
            if let Some(latency) = audio.batch_max_latency_ms {
                self.batch_max_latency_ms = latency;
            }
            if let Some(quality) = audio.resampler_quality {
                self.resampler_quality = quality;
            }
        }
        if let Some(alerts) = yaml.alerts {
            if alerts.webhook_url.is_some() {
                self.alert_webhook_url = alerts.webhook_url;
            }
            if alerts.email_to.is_some() {
                self.alert_email_to = alerts.email_to;
            }
            if alerts.mail_gateway_url.is_some() {
                self.mail_gateway_url = alerts.mail_gateway_url;
            }
            if let Some(severity) = alerts.min_severity {
                self.alert_min_severity = severity;
            }
        }
        if let Some(event_log) = yaml.event_log {
            if event_log.url.is_some() {
                self.event_log_url = event_log.url;
            }
        }
        if let Some(security) = yaml.security {
            if security.intake_shared_secret.is_some() {
                self.intake_shared_secret = security.intake_shared_secret;
            }
            if let Some(origins) = security.cors_allowed_origins {
                self.cors_allowed_origins = origins;
            }
        }
    }

    fn validate(&self) -> Result<(), String> {
        if self.batch_target_bytes == 0 {
            return Err("AUDIO_BATCH_TARGET_BYTES must be greater than zero".to_string());
        }
        if self.batch_max_latency_ms == 0 {
            return Err("AUDIO_BATCH_MAX_LATENCY_MS must be greater than zero".to_string());
        }
        if self.resampler_quality == 0 {
            return Err("RESAMPLER_QUALITY must be greater than zero".to_string());
        }
        if self.alert_email_to.is_some() && self.mail_gateway_url.is_none() {
            return Err(
                "ALERT_EMAIL_TO requires MAIL_GATEWAY_URL to be configured".to_string(),
            );
        }
        if self.twilio_account_sid.is_some() != self.twilio_auth_token.is_some() {
            return Err(
                "TWILIO_ACCOUNT_SID and TWILIO_AUTH_TOKEN must be set together".to_string(),
            );
        }
        Ok(())
    }

    /// Socket address string for binding.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Whether AI peer credentials are present.
    pub fn ai_configured(&self) -> bool {
        self.openai_api_key.is_some()
    }

    /// Whether telephony credentials are present.
    pub fn telephony_configured(&self) -> bool {
        self.twilio_account_sid.is_some() && self.twilio_auth_token.is_some()
    }
}
