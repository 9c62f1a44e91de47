pub mod scope;
pub use scope::{AgentIdValue, CallbackSecrets, CredentialScope, ScopeKey, WecomConfig};

use anyhow::{Context, Result};
use serde::Deserialize;
use std::time::Duration;

/// Default platform API base
pub const DEFAULT_API_BASE_URL: &str = "https://qyapi.weixin.qq.com/cgi-bin";

/// Complete gateway configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GatewayConfig {
    #[serde(default)]
    pub wecom: WecomConfig,
    #[serde(default)]
    pub webhook: WebhookConfig,
    #[serde(default)]
    pub client: ClientConfig,
}

/// Webhook listener configuration
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookConfig {
    #[serde(default = "default_webhook_port")]
    pub port: u16,
    #[serde(default = "default_webhook_path")]
    pub path: String,
}

fn default_webhook_port() -> u16 {
    3000
}

fn default_webhook_path() -> String {
    "/wecom/events".to_string()
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            port: default_webhook_port(),
            path: default_webhook_path(),
        }
    }
}

/// Outbound API client configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Per-attempt HTTP timeout (seconds)
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Total attempts per call, shared by token-expiry and transport retries
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Linear backoff unit; attempt n waits n * this
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
}

fn default_base_url() -> String {
    DEFAULT_API_BASE_URL.to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    3
}

fn default_backoff_base_ms() -> u64 {
    1000
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
            backoff_base_ms: default_backoff_base_ms(),
        }
    }
}

impl ClientConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }
}

impl GatewayConfig {
    /// Overlay values from environment variables.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("WECOM_CORP_ID") {
            self.wecom.corp_id = Some(v);
        }
        if let Some(v) = lookup("WECOM_CORP_SECRET") {
            self.wecom.corp_secret = Some(v);
        }
        if let Some(v) = lookup("WECOM_AGENT_ID") {
            self.wecom.agent_id = Some(AgentIdValue::Text(v));
        }
        if let Some(v) = lookup("WECOM_TOKEN") {
            self.wecom.token = Some(v);
        }
        if let Some(v) = lookup("WECOM_ENCODING_AES_KEY") {
            self.wecom.encoding_aes_key = Some(v);
        }
        if let Some(v) = lookup("WECOM_WEBHOOK_PORT") {
            if let Ok(port) = v.parse::<u16>() {
                self.webhook.port = port;
            }
        }
        if let Some(v) = lookup("WECOM_API_BASE_URL") {
            self.client.base_url = v;
        }
    }
}

/// Load configuration from a TOML file
pub fn load_config(path: &str) -> Result<GatewayConfig> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path))?;
    let config: GatewayConfig = toml::from_str(&contents)
        .with_context(|| format!("Failed to parse config file {}", path))?;
    Ok(config)
}
