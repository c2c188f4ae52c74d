//! Registration of our callback endpoint with the brain.
//!
//! The brain delivers events by POSTing to the `baseUrl` of every registered
//! SDK adapter. Registration is keyed by adapter name, so a stale
//! registration from an earlier attempt is removed before a new one is made.

use std::net::{IpAddr, SocketAddr, UdpSocket};

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};
use url::Url;

use crate::config::BrainConfig;
use crate::endpoints;
use crate::error::{BrainError, Result};
use crate::session::Session;

/// Payload of the register and unregister calls
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdapterRegistration {
    pub name: String,
    #[serde(rename = "baseUrl")]
    pub base_url: String,
}

/// Resolves the local address the brain can reach us on
pub trait AddressResolver: Send + Sync {
    fn resolve(&self, brain_host: &str, brain_port: u16) -> Option<IpAddr>;
}

/// Always answers with a fixed address, or with nothing
#[derive(Debug, Clone, Copy, Default)]
pub struct StaticResolver(pub Option<IpAddr>);

impl AddressResolver for StaticResolver {
    fn resolve(&self, _brain_host: &str, _brain_port: u16) -> Option<IpAddr> {
        self.0
    }
}

/// Picks the local address of the interface routing to the brain.
///
/// Connecting a UDP socket sends nothing; it only makes the OS select the
/// outgoing interface, which is the one on the brain's subnet when there is
/// one.
#[derive(Debug, Clone, Copy, Default)]
pub struct RouteResolver;

impl AddressResolver for RouteResolver {
    fn resolve(&self, brain_host: &str, brain_port: u16) -> Option<IpAddr> {
        let socket = UdpSocket::bind("0.0.0.0:0").ok()?;
        socket.connect((brain_host, brain_port)).ok()?;
        let ip = socket.local_addr().ok()?.ip();
        if ip.is_unspecified() {
            None
        } else {
            Some(ip)
        }
    }
}

/// Resolver for a configuration: the configured address when present,
/// route detection otherwise
pub fn resolver_for(config: &BrainConfig) -> Box<dyn AddressResolver> {
    match config.callback_address {
        Some(address) => Box::new(StaticResolver(Some(address))),
        None => Box::new(RouteResolver),
    }
}

/// Build `http://<address>:<port><path>`
pub fn build_callback_url(address: IpAddr, port: u16, path: &str) -> Result<String> {
    let raw = format!("http://{}{}", SocketAddr::new(address, port), path);
    let url = Url::parse(&raw)
        .map_err(|e| BrainError::Configuration(format!("Invalid callback URL {raw}: {e}")))?;
    Ok(url.to_string())
}

/// Performs the register and unregister calls for a session
#[derive(Debug, Clone)]
pub struct CallbackRegistrar {
    registration_name: String,
}

impl CallbackRegistrar {
    pub fn new(registration_name: impl Into<String>) -> Self {
        Self {
            registration_name: registration_name.into(),
        }
    }

    pub fn from_config(config: &BrainConfig) -> Self {
        Self::new(config.adapter_registration_name())
    }

    pub fn registration_name(&self) -> &str {
        &self.registration_name
    }

    /// Register the session's callback URL with the brain.
    ///
    /// Any earlier registration of the same URL is removed first.
    pub async fn register(&self, session: &Session) -> Result<()> {
        self.deregister(session).await?;

        let callback_url = session
            .callback_url()
            .ok_or_else(|| BrainError::Precondition("Callback URL has not been set".to_string()))?;

        debug!(
            brain_id = %session.brain_id(),
            url = %format!("{}{}", session.brain_url(), endpoints::REGISTER_SDK_ADAPTER),
            callback = %callback_url,
            "registering callback"
        );
        self.post(session, endpoints::REGISTER_SDK_ADAPTER, &callback_url)
            .await
    }

    /// Remove the session's callback registration, if there is one.
    ///
    /// The health check is cancelled whether or not the call succeeds.
    pub async fn deregister(&self, session: &Session) -> Result<()> {
        self.deregister_url(session, session.callback_url()).await
    }

    /// Like [`deregister`](Self::deregister) for a URL read from the session
    /// earlier
    pub async fn deregister_url(&self, session: &Session, callback_url: Option<String>) -> Result<()> {
        let result = match callback_url {
            Some(callback_url) => {
                debug!(
                    brain_id = %session.brain_id(),
                    callback = %callback_url,
                    "deregistering callback"
                );
                self.post(session, endpoints::UNREGISTER_SDK_ADAPTER, &callback_url)
                    .await
            }
            None => {
                trace!(brain_id = %session.brain_id(), "no callback registered");
                Ok(())
            }
        };

        session.check_status().cancel();
        result
    }

    async fn post(&self, session: &Session, endpoint: &str, callback_url: &str) -> Result<()> {
        let transport = session
            .transport()
            .ok_or_else(|| BrainError::Precondition("No transport available".to_string()))?;

        let payload = serde_json::to_string(&AdapterRegistration {
            name: self.registration_name.clone(),
            base_url: callback_url.to_string(),
        })?;

        let url = format!("{}{}", session.brain_url(), endpoint);
        let response = transport.post_json(&url, &payload).await?;
        if !response.is_ok() {
            return Err(BrainError::Transport {
                status: response.status,
                body: response.body,
            });
        }

        Ok(())
    }
}
