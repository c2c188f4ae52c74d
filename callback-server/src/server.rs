//! HTTP server receiving brain callbacks.

use std::net::{IpAddr, Ipv4Addr, SocketAddr, TcpListener};
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use warp::http::{Method, StatusCode};
use warp::Filter;

use crate::error::CallbackServerError;
use crate::router::{CallbackRequest, EventRouter};

/// First path segment of every callback URL
pub const CALLBACK_ROOT: &str = "neeo";

/// HTTP callback server for brain events.
///
/// The server binds to a local port and accepts any method on
/// `/neeo/<brain id>/<tail>`. Requests for registered brain ids are answered
/// with `200` and forwarded to the channel; all others get a `404`.
pub struct CallbackServer {
    /// The port the server is bound to
    port: u16,
    /// Address advertised to brains
    local_ip: IpAddr,
    /// `http://<local ip>:<port>`
    base_url: String,
    /// Router deciding which brain ids are accepted
    event_router: Arc<EventRouter>,
    /// Shutdown signal sender
    shutdown_tx: Option<mpsc::Sender<()>>,
    /// Server task handle
    server_handle: Option<tokio::task::JoinHandle<()>>,
}

impl CallbackServer {
    /// Create and start a callback server.
    ///
    /// Binds the first free port of `port_range` (inclusive) and detects the
    /// local IP address used in [`base_url`](Self::base_url).
    pub async fn new(
        port_range: (u16, u16),
        sender: mpsc::UnboundedSender<CallbackRequest>,
    ) -> Result<Self, CallbackServerError> {
        let (start, end) = port_range;
        let port = Self::find_available_port(start, end)
            .ok_or(CallbackServerError::NoAvailablePort { start, end })?;

        let local_ip = Self::detect_local_ip().unwrap_or_else(|| {
            warn!("Failed to detect local IP address, advertising loopback");
            IpAddr::V4(Ipv4Addr::LOCALHOST)
        });
        let base_url = format!("http://{}", SocketAddr::new(local_ip, port));

        let event_router = Arc::new(EventRouter::new(sender));

        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>(1);
        let (ready_tx, mut ready_rx) = mpsc::channel::<()>(1);

        let server_handle = Self::start_server(port, event_router.clone(), shutdown_rx, ready_tx);

        ready_rx
            .recv()
            .await
            .ok_or_else(|| CallbackServerError::Startup(format!("could not bind port {port}")))?;

        Ok(Self {
            port,
            local_ip,
            base_url,
            event_router,
            shutdown_tx: Some(shutdown_tx),
            server_handle: Some(server_handle),
        })
    }

    /// `http://<local ip>:<port>`
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// URL a brain with `brain_id` should be registered with
    pub fn callback_url(&self, brain_id: &str) -> String {
        format!("{}/{}/{}", self.base_url, CALLBACK_ROOT, brain_id)
    }

    /// Get the port the server is bound to.
    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn local_ip(&self) -> IpAddr {
        self.local_ip
    }

    /// Router used to register and unregister brain ids
    pub fn router(&self) -> &Arc<EventRouter> {
        &self.event_router
    }

    /// Shutdown the server, waiting for in-flight requests to complete.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(()).await;
        }

        if let Some(handle) = self.server_handle.take() {
            let _ = handle.await;
        }
        debug!(port = self.port, "callback server stopped");
    }

    /// Find an available port in the given range.
    fn find_available_port(start: u16, end: u16) -> Option<u16> {
        (start..=end).find(|&port| Self::is_port_available(port))
    }

    /// Check if a port is available for binding.
    fn is_port_available(port: u16) -> bool {
        TcpListener::bind(SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port)).is_ok()
    }

    /// Detect the local IP address for callback URLs.
    ///
    /// This uses a UDP socket connection to determine the local IP address
    /// that would be used for outbound connections. No data is actually sent.
    fn detect_local_ip() -> Option<IpAddr> {
        let socket = std::net::UdpSocket::bind("0.0.0.0:0").ok()?;
        socket.connect("8.8.8.8:80").ok()?;
        let local_addr = socket.local_addr().ok()?;
        Some(local_addr.ip())
    }

    /// Start the HTTP server on the given port.
    fn start_server(
        port: u16,
        event_router: Arc<EventRouter>,
        mut shutdown_rx: mpsc::Receiver<()>,
        ready_tx: mpsc::Sender<()>,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let callback_route = warp::path(CALLBACK_ROOT)
                .and(warp::path::param::<String>())
                .and(warp::path::tail())
                .and(warp::method())
                .and(warp::body::bytes())
                .and_then({
                    let router = event_router.clone();
                    move |brain_id: String, tail: warp::path::Tail, method: Method, body: Bytes| {
                        let router = router.clone();
                        async move {
                            let request = CallbackRequest {
                                brain_id,
                                method: method.to_string(),
                                path: format!("/{}", tail.as_str()),
                                body: String::from_utf8_lossy(&body).into_owned(),
                            };
                            debug!(
                                brain_id = %request.brain_id,
                                method = %request.method,
                                path = %request.path,
                                body_len = request.body.len(),
                                "brain callback"
                            );

                            if router.route(request).await {
                                Ok::<_, warp::Rejection>(warp::reply::with_status("", StatusCode::OK))
                            } else {
                                Err(warp::reject::custom(UnknownBrain))
                            }
                        }
                    }
                });

            let routes = callback_route.recover(handle_rejection);

            let bound = warp::serve(routes).try_bind_with_graceful_shutdown(
                SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port),
                async move {
                    shutdown_rx.recv().await;
                },
            );

            match bound {
                Ok((addr, server)) => {
                    info!(%addr, "callback server listening");
                    let _ = ready_tx.send(()).await;
                    server.await;
                }
                Err(e) => {
                    // Dropping ready_tx reports the failure to `new`
                    warn!(port, error = %e, "callback server failed to bind");
                }
            }
        })
    }
}

/// Rejection for callbacks addressed to a brain id that is not registered.
#[derive(Debug)]
struct UnknownBrain;

impl warp::reject::Reject for UnknownBrain {}

/// Handle rejections and convert them to HTTP responses.
async fn handle_rejection(
    err: warp::Rejection,
) -> Result<impl warp::Reply, std::convert::Infallible> {
    let code;
    let message;

    if err.find::<UnknownBrain>().is_some() {
        code = StatusCode::NOT_FOUND;
        message = "Brain not registered";
    } else if err.is_not_found() {
        code = StatusCode::NOT_FOUND;
        message = "Not found";
    } else if err.find::<warp::reject::MethodNotAllowed>().is_some() {
        code = StatusCode::METHOD_NOT_ALLOWED;
        message = "Method not allowed";
    } else {
        code = StatusCode::INTERNAL_SERVER_ERROR;
        message = "Internal server error";
    }

    Ok(warp::reply::with_status(message, code))
}
