// src/config.rs

//! Client configuration
//!
//! Configuration is read from a TOML file. Every field has a default, so an
//! empty file is a valid configuration.
//!
//! # Example client.toml
//!
//! ```toml
//! endpoint_name = "urn:dev:os:0023C7-000001"
//! allow_legacy_server_initiated_bootstrap = false
//! update_immediately_on_dm_change = false
//! enable_self_notify = false
//!
//! [lwm2m_version]
//! minimum = "1.0"
//! maximum = "1.1"
//!
//! [exchange_lifetime]
//! udp_secs = 247
//! tcp_secs = 247
//! ```

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::time::Duration;

/// Default path for the client configuration file
pub const DEFAULT_CONFIG_PATH: &str = "/etc/lwm2m/client.toml";

/// LwM2M protocol version
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Lwm2mVersion {
    #[serde(rename = "1.0")]
    V1_0,
    #[serde(rename = "1.1")]
    V1_1,
}

impl Lwm2mVersion {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::V1_0 => "1.0",
            Self::V1_1 => "1.1",
        }
    }
}

impl fmt::Display for Lwm2mVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Transport a server connection runs over
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    Udp,
    Tcp,
    Sms,
    NonIp,
}

/// Supported version range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VersionConfig {
    pub minimum: Lwm2mVersion,
    pub maximum: Lwm2mVersion,
}

impl Default for VersionConfig {
    fn default() -> Self {
        Self {
            minimum: Lwm2mVersion::V1_0,
            maximum: Lwm2mVersion::V1_1,
        }
    }
}

/// CoAP EXCHANGE_LIFETIME per transport, in seconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExchangeLifetimeConfig {
    pub udp_secs: u64,
    pub tcp_secs: u64,
    pub sms_secs: u64,
    pub nonip_secs: u64,
}

impl Default for ExchangeLifetimeConfig {
    fn default() -> Self {
        Self {
            udp_secs: 247,
            tcp_secs: 247,
            sms_secs: 247,
            nonip_secs: 247,
        }
    }
}

/// Client configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Endpoint Client Name sent in Request Bootstrap
    pub endpoint_name: String,
    /// Keep the Bootstrap Server account enabled after Bootstrap Finish
    pub allow_legacy_server_initiated_bootstrap: bool,
    /// Reload servers once per notify flush instead of per changed object
    pub update_immediately_on_dm_change: bool,
    /// Notify observations even when the change came from the observer itself
    pub enable_self_notify: bool,
    /// Enable LwM2M Send handling (Mute Send, deferred Send retries)
    pub send_enabled: bool,
    /// Supported LwM2M versions
    pub lwm2m_version: VersionConfig,
    /// Exchange lifetimes used for the Bootstrap Finish timeout
    pub exchange_lifetime: ExchangeLifetimeConfig,
    /// Maximum number of simultaneously armed scheduler jobs
    pub scheduler_capacity: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint_name: "lwm2m-client".to_string(),
            allow_legacy_server_initiated_bootstrap: false,
            update_immediately_on_dm_change: false,
            enable_self_notify: false,
            send_enabled: true,
            lwm2m_version: VersionConfig::default(),
            exchange_lifetime: ExchangeLifetimeConfig::default(),
            scheduler_capacity: 1024,
        }
    }
}

impl ClientConfig {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {}", path.display(), e)))?;
        Self::from_toml(&content)
    }

    /// Parse configuration from TOML text
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.lwm2m_version.minimum > self.lwm2m_version.maximum {
            return Err(Error::Config(format!(
                "minimum LwM2M version {} is above maximum {}",
                self.lwm2m_version.minimum, self.lwm2m_version.maximum
            )));
        }
        if self.scheduler_capacity == 0 {
            return Err(Error::Config("scheduler_capacity must be positive".to_string()));
        }
        Ok(())
    }

    /// Set the endpoint name
    pub fn with_endpoint_name<S: Into<String>>(mut self, name: S) -> Self {
        self.endpoint_name = name.into();
        self
    }

    /// Allow or forbid legacy server-initiated bootstrap
    pub fn with_legacy_server_initiated_bootstrap(mut self, allow: bool) -> Self {
        self.allow_legacy_server_initiated_bootstrap = allow;
        self
    }

    /// Enable or disable consolidated server reload on data model change
    pub fn with_update_immediately_on_dm_change(mut self, enable: bool) -> Self {
        self.update_immediately_on_dm_change = enable;
        self
    }

    /// Enable or disable self-notify
    pub fn with_self_notify(mut self, enable: bool) -> Self {
        self.enable_self_notify = enable;
        self
    }

    /// Restrict the supported version range
    pub fn with_versions(mut self, minimum: Lwm2mVersion, maximum: Lwm2mVersion) -> Self {
        self.lwm2m_version = VersionConfig { minimum, maximum };
        self
    }

    /// Set the scheduler capacity
    pub fn with_scheduler_capacity(mut self, capacity: usize) -> Self {
        self.scheduler_capacity = capacity;
        self
    }

    /// True if LwM2M 1.1 behavior is enabled
    pub fn lwm2m11(&self) -> bool {
        self.lwm2m_version.maximum >= Lwm2mVersion::V1_1
    }

    /// EXCHANGE_LIFETIME for a transport
    pub fn exchange_lifetime(&self, transport: Transport) -> Duration {
        let secs = match transport {
            Transport::Udp => self.exchange_lifetime.udp_secs,
            Transport::Tcp => self.exchange_lifetime.tcp_secs,
            Transport::Sms => self.exchange_lifetime.sms_secs,
            Transport::NonIp => self.exchange_lifetime.nonip_secs,
        };
        Duration::from_secs(secs)
    }
}
