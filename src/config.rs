use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::error::{Result, RouterError};

pub const ENV_AWS_ACCESS_KEY: &str = "AWS_ACCESS_KEY";
pub const ENV_AWS_SECRET_KEY: &str = "AWS_SECRET_KEY";

#[derive(Debug, Deserialize, Clone)]
pub struct RouterConfig {
    pub provider: ProviderConfig,
    pub processor: ProcessorConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProviderConfig {
    /// Emits nothing; the router idles until shut down.
    Fake,
    Http(HttpProviderConfig),
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct HttpProviderConfig {
    pub url: String,
    /// Origin tag stamped on every envelope. Defaults to `url`.
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProcessorConfig {
    AwsEventBridge(EventBridgeConfig),
    Webhook(WebhookConfig),
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct EventBridgeConfig {
    pub event_bus: String,
    pub region: String,
    pub rule_arn: String,
    pub auth: AuthMethod,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuthMethod {
    AwsAccessKey { access_key: String, secret_key: String },
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct WebhookConfig {
    pub url: String,
    #[serde(default)]
    pub auth: Option<BasicAuth>,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct BasicAuth {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct MetricsConfig {
    #[serde(default)]
    pub bind_address: Option<String>,
    #[serde(default = "default_push_interval_secs")]
    pub push_interval_secs: u64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            bind_address: None,
            push_interval_secs: default_push_interval_secs(),
        }
    }
}

fn default_poll_interval_secs() -> u64 {
    1
}

fn default_page_size() -> u32 {
    100
}

fn default_push_interval_secs() -> u64 {
    5
}

fn require(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(RouterError::MissingField(field.to_string()));
    }
    Ok(())
}

impl RouterConfig {
    /// Read, override from the environment, and validate the config at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path)?;

        let mut config = Self::from_toml(&content)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Secrets from the environment win over the file.
    pub fn apply_env_overrides(&mut self) {
        if let ProcessorConfig::AwsEventBridge(cfg) = &mut self.processor {
            let AuthMethod::AwsAccessKey {
                access_key,
                secret_key,
            } = &mut cfg.auth;
            if let Ok(key) = std::env::var(ENV_AWS_ACCESS_KEY) {
                if !key.is_empty() {
                    *access_key = key;
                }
            }
            if let Ok(secret) = std::env::var(ENV_AWS_SECRET_KEY) {
                if !secret.is_empty() {
                    *secret_key = secret;
                }
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        match &self.provider {
            ProviderConfig::Fake => {}
            ProviderConfig::Http(cfg) => cfg.validate()?,
        }
        match &self.processor {
            ProcessorConfig::AwsEventBridge(cfg) => cfg.validate()?,
            ProcessorConfig::Webhook(cfg) => cfg.validate()?,
        }
        if let Some(addr) = &self.metrics.bind_address {
            addr.parse::<std::net::SocketAddr>().map_err(|e| {
                RouterError::Config(format!("invalid metrics.bind_address '{}': {}", addr, e))
            })?;
        }
        Ok(())
    }
}

impl HttpProviderConfig {
    pub fn validate(&self) -> Result<()> {
        require("provider.url", &self.url)?;
        if self.poll_interval_secs == 0 {
            return Err(RouterError::Config(
                "provider.poll_interval_secs must be greater than zero".to_string(),
            ));
        }
        if self.page_size == 0 {
            return Err(RouterError::Config(
                "provider.page_size must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn source(&self) -> &str {
        self.source.as_deref().unwrap_or(&self.url)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

impl EventBridgeConfig {
    pub fn validate(&self) -> Result<()> {
        require("processor.event_bus", &self.event_bus)?;
        require("processor.region", &self.region)?;
        require("processor.rule_arn", &self.rule_arn)?;
        match &self.auth {
            AuthMethod::AwsAccessKey {
                access_key,
                secret_key,
            } => {
                require("processor.auth.access_key", access_key)?;
                require("processor.auth.secret_key", secret_key)?;
            }
        }
        Ok(())
    }
}

impl WebhookConfig {
    pub fn validate(&self) -> Result<()> {
        require("processor.url", &self.url)?;
        if let Some(auth) = &self.auth {
            require("processor.auth.username", &auth.username)?;
            require("processor.auth.password", &auth.password)?;
        }
        Ok(())
    }
}
