//! Liveness probing of the brain's service port.

use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpStream;
use tracing::debug;

/// Default timeout for a single probe
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_millis(5000);

/// Reachability check against a host and port
#[async_trait]
pub trait HealthProbe: Send + Sync {
    /// True when the endpoint accepted a connection within `timeout`
    async fn probe(&self, host: &str, port: u16, timeout: Duration) -> bool;
}

/// Probe opening (and immediately dropping) a raw TCP connection
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpProbe;

#[async_trait]
impl HealthProbe for TcpProbe {
    async fn probe(&self, host: &str, port: u16, timeout: Duration) -> bool {
        match tokio::time::timeout(timeout, TcpStream::connect((host, port))).await {
            Ok(Ok(_stream)) => true,
            Ok(Err(e)) => {
                debug!(%host, port, error = %e, "probe connection failed");
                false
            }
            Err(_) => {
                debug!(%host, port, ?timeout, "probe timed out");
                false
            }
        }
    }
}
