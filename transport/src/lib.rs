//! Private HTTP request transport for NEEO brain communication
//!
//! The brain speaks plain HTTP with JSON bodies on a fixed port. This crate
//! provides the minimal request/response primitive the connection manager
//! needs: a GET and a POST-with-JSON, each returning the status code and the
//! body text. Status codes are never turned into errors here; deciding what
//! counts as success is left to the caller.
//!
//! The [`HttpTransport`] trait is the seam used by the connection manager, so
//! tests can substitute an in-memory implementation. [`TransportFactory`]
//! produces a fresh transport for every connection attempt.

mod error;

pub use error::TransportError;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::trace;

/// Status code and body returned by the brain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    /// HTTP status code
    pub status: u16,
    /// Response body as text (empty when the brain sent none)
    pub body: String,
}

impl HttpResponse {
    /// Create a response from a status code and body
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    /// Whether the brain answered `200 OK`
    ///
    /// The brain signals success exclusively with 200; other 2xx codes are
    /// not used by its API and are treated as failures.
    pub fn is_ok(&self) -> bool {
        self.status == 200
    }
}

/// Minimal request primitive used to talk to a brain
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Issue a GET against an absolute URL
    async fn get(&self, url: &str) -> Result<HttpResponse, TransportError>;

    /// Issue a POST with a JSON body against an absolute URL
    async fn post_json(&self, url: &str, json: &str) -> Result<HttpResponse, TransportError>;
}

/// Produces a fresh [`HttpTransport`] for each connection attempt
pub trait TransportFactory: Send + Sync {
    fn create(&self) -> Result<Arc<dyn HttpTransport>, TransportError>;
}

/// [`HttpTransport`] backed by a `reqwest` client
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// Create a transport with a 5 second connect timeout and the given
    /// overall request timeout
    pub fn new(request_timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(request_timeout)
            .build()
            .map_err(|e| TransportError::Client(e.to_string()))?;

        Ok(Self { client })
    }

    /// Wrap an existing client (for advanced use cases)
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    async fn read(response: reqwest::Response) -> Result<HttpResponse, TransportError> {
        let status = response.status().as_u16();
        let body = response.text().await?;
        trace!(status, body_len = body.len(), "brain response");
        Ok(HttpResponse { status, body })
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn get(&self, url: &str) -> Result<HttpResponse, TransportError> {
        trace!(%url, "GET");
        let response = self.client.get(url).send().await?;
        Self::read(response).await
    }

    async fn post_json(&self, url: &str, json: &str) -> Result<HttpResponse, TransportError> {
        trace!(%url, body_len = json.len(), "POST");
        let response = self
            .client
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(json.to_string())
            .send()
            .await?;
        Self::read(response).await
    }
}

/// Factory building a new [`ReqwestTransport`] (and connection pool) per call
#[derive(Debug, Clone)]
pub struct ReqwestTransportFactory {
    request_timeout: Duration,
}

impl ReqwestTransportFactory {
    pub fn new(request_timeout: Duration) -> Self {
        Self { request_timeout }
    }
}

impl Default for ReqwestTransportFactory {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

impl TransportFactory for ReqwestTransportFactory {
    fn create(&self) -> Result<Arc<dyn HttpTransport>, TransportError> {
        Ok(Arc::new(ReqwestTransport::new(self.request_timeout)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server};
    use rstest::rstest;

    #[rstest]
    #[case(200, true)]
    #[case(201, false)]
    #[case(204, false)]
    #[case(404, false)]
    #[case(500, false)]
    fn test_is_ok(#[case] status: u16, #[case] expected: bool) {
        assert_eq!(HttpResponse::new(status, "").is_ok(), expected);
    }

    #[tokio::test]
    async fn test_get_returns_status_and_body() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/v1/systeminfo")
            .with_status(200)
            .with_body(r#"{"hostname":"NEEO-1234"}"#)
            .create_async()
            .await;

        let transport = ReqwestTransport::new(Duration::from_secs(5)).unwrap();
        let response = transport
            .get(&format!("{}/v1/systeminfo", server.url()))
            .await
            .unwrap();

        assert!(response.is_ok());
        assert!(response.body.contains("NEEO-1234"));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_non_success_status_is_not_an_error() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("GET", "/missing")
            .with_status(404)
            .with_body("not here")
            .create_async()
            .await;

        let transport = ReqwestTransport::new(Duration::from_secs(5)).unwrap();
        let response = transport
            .get(&format!("{}/missing", server.url()))
            .await
            .unwrap();

        assert_eq!(response, HttpResponse::new(404, "not here"));
    }

    #[tokio::test]
    async fn test_post_json_sends_body_and_content_type() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/notifications")
            .match_header("content-type", "application/json")
            .match_body(Matcher::JsonString(r#"{"type":"test"}"#.to_string()))
            .with_status(200)
            .create_async()
            .await;

        let transport = ReqwestTransport::new(Duration::from_secs(5)).unwrap();
        let response = transport
            .post_json(
                &format!("{}/v1/notifications", server.url()),
                r#"{"type":"test"}"#,
            )
            .await
            .unwrap();

        assert!(response.is_ok());
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_connection_refused_is_network_error() {
        // Bind then drop to get a port nobody listens on
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };

        let transport = ReqwestTransport::new(Duration::from_secs(2)).unwrap();
        let result = transport.get(&format!("http://127.0.0.1:{}/", port)).await;

        match result {
            Err(TransportError::Network(_)) | Err(TransportError::Timeout(_)) => {}
            other => panic!("Expected a network failure, got {:?}", other),
        }
    }

    #[test]
    fn test_factory_creates_independent_transports() {
        let factory = ReqwestTransportFactory::default();
        let first = factory.create().unwrap();
        let second = factory.create().unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
    }
}
