//! Configuration types for the neeo-brain crate
//!
//! This module defines the configuration consumed by a
//! [`BrainConnection`](crate::BrainConnection): which brain to talk to, how
//! the brain can reach us back, and the timing of connect attempts and
//! health checks.

use std::net::{IpAddr, Ipv6Addr};
use std::time::Duration;

use crate::error::{BrainError, Result};

/// Port the brain's API and the liveness probe listen on
pub const DEFAULT_BRAIN_PORT: u16 = 3000;

/// Adapter name announced to the brain when registering
pub const DEFAULT_ADAPTER_NAME: &str = "neeo-rs";

/// Configuration for a single brain session
///
/// Only the brain identifier, the brain host and the callback port are
/// required; everything else has defaults matching the brain's expectations.
#[derive(Debug, Clone)]
pub struct BrainConfig {
    /// Opaque brain identifier (used in logs and in the callback path)
    pub brain_id: String,

    /// Brain IP address or host name
    pub brain_host: String,

    /// Brain API port
    /// Default: 3000
    pub brain_port: u16,

    /// Interval between liveness probes once connected, zero disables probing
    /// Default: 10 seconds
    pub check_status_interval: Duration,

    /// Fixed delay before every connect attempt (no backoff growth)
    /// Default: 5 seconds
    pub connect_delay: Duration,

    /// Timeout for a single liveness probe
    /// Default: 5 seconds
    pub probe_timeout: Duration,

    /// Overall timeout for a single HTTP request to the brain
    /// Default: 10 seconds
    pub request_timeout: Duration,

    /// Address the brain should use to call us back; detected from the
    /// route to the brain when not set
    pub callback_address: Option<IpAddr>,

    /// Port our callback server listens on
    pub callback_port: u16,

    /// Path of the callback endpoint, `/neeo/<brain id>` when not set
    pub callback_path: Option<String>,

    /// Adapter name announced to the brain
    /// Default: "neeo-rs"
    pub adapter_name: String,

    /// Identifier of this process instance, appended to the adapter name
    pub instance_id: String,
}

impl BrainConfig {
    /// Create a configuration with default timings
    pub fn new(brain_id: impl Into<String>, brain_host: impl Into<String>, callback_port: u16) -> Self {
        Self {
            brain_id: brain_id.into(),
            brain_host: normalize_host(&brain_host.into()),
            brain_port: DEFAULT_BRAIN_PORT,
            check_status_interval: Duration::from_secs(10),
            connect_delay: Duration::from_secs(5),
            probe_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(10),
            callback_address: None,
            callback_port,
            callback_path: None,
            adapter_name: DEFAULT_ADAPTER_NAME.to_string(),
            instance_id: uuid::Uuid::new_v4().to_string(),
        }
    }

    /// Base URL of the brain's API, e.g. `http://192.168.1.20:3000`
    pub fn brain_url(&self) -> String {
        if self.brain_host.parse::<Ipv6Addr>().is_ok() {
            format!("http://[{}]:{}", self.brain_host, self.brain_port)
        } else {
            format!("http://{}:{}", self.brain_host, self.brain_port)
        }
    }

    /// Path the brain calls back into
    pub fn callback_path(&self) -> String {
        match &self.callback_path {
            Some(path) if path.starts_with('/') => path.clone(),
            Some(path) => format!("/{path}"),
            None => format!("/neeo/{}", self.brain_id),
        }
    }

    /// Name sent in the adapter registration payload
    pub fn adapter_registration_name(&self) -> String {
        format!("{}-{}", self.adapter_name, self.instance_id)
    }

    /// Whether liveness probing is enabled
    pub fn health_checks_enabled(&self) -> bool {
        !self.check_status_interval.is_zero()
    }

    /// Validate the configuration and return any issues
    pub fn validate(&self) -> Result<()> {
        if self.brain_id.trim().is_empty() {
            return Err(BrainError::Configuration(
                "Brain id cannot be empty".to_string(),
            ));
        }

        if self.brain_host.trim().is_empty() {
            return Err(BrainError::Configuration(
                "Brain host cannot be empty".to_string(),
            ));
        }

        if self.brain_port == 0 {
            return Err(BrainError::Configuration(
                "Brain port must be greater than 0".to_string(),
            ));
        }

        if self.callback_port == 0 {
            return Err(BrainError::Configuration(
                "Callback port must be greater than 0".to_string(),
            ));
        }

        if self.connect_delay.is_zero() {
            return Err(BrainError::Configuration(
                "Connect delay must be greater than 0".to_string(),
            ));
        }

        if self.probe_timeout.is_zero() || self.request_timeout.is_zero() {
            return Err(BrainError::Configuration(
                "Timeouts must be greater than 0".to_string(),
            ));
        }

        if self.adapter_name.trim().is_empty() {
            return Err(BrainError::Configuration(
                "Adapter name cannot be empty".to_string(),
            ));
        }

        Ok(())
    }

    /// Builder pattern methods for fluent configuration

    pub fn with_brain_port(mut self, port: u16) -> Self {
        self.brain_port = port;
        self
    }

    /// Interval between health checks; zero disables them
    pub fn with_check_status_interval(mut self, interval: Duration) -> Self {
        self.check_status_interval = interval;
        self
    }

    /// Interval in whole seconds as found in host configuration files;
    /// zero or negative disables health checks
    pub fn with_check_status_secs(self, secs: i64) -> Self {
        let interval = Duration::from_secs(secs.max(0) as u64);
        self.with_check_status_interval(interval)
    }

    pub fn with_connect_delay(mut self, delay: Duration) -> Self {
        self.connect_delay = delay;
        self
    }

    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_callback_address(mut self, address: IpAddr) -> Self {
        self.callback_address = Some(address);
        self
    }

    pub fn with_callback_path(mut self, path: impl Into<String>) -> Self {
        self.callback_path = Some(path.into());
        self
    }

    pub fn with_adapter_name(mut self, name: impl Into<String>) -> Self {
        self.adapter_name = name.into();
        self
    }

    pub fn with_instance_id(mut self, id: impl Into<String>) -> Self {
        self.instance_id = id.into();
        self
    }
}

/// Hosts discovered over mDNS sometimes arrive as `/192.168.1.20`
fn normalize_host(host: &str) -> String {
    host.trim().trim_start_matches('/').to_string()
}
