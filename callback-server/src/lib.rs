//! HTTP callback server for receiving NEEO brain events.
//!
//! A brain delivers events by calling the `baseUrl` an SDK adapter registered
//! with it. This crate provides the receiving end: a small warp server that
//! accepts any request below `/neeo/<brain id>/` and forwards it to a channel.
//!
//! # Overview
//!
//! - [`CallbackServer`]: binds the first free port of a range, detects the
//!   local address and serves requests until shut down.
//! - [`EventRouter`]: the set of brain ids requests are accepted for.
//! - [`CallbackRequest`]: one request received from a brain.
//!
//! The server knows nothing about the content of the events; interpreting
//! them is up to the consumer of the channel.
//!
//! # Example
//!
//! ```no_run
//! use callback_server::{CallbackRequest, CallbackServer};
//! use tokio::sync::mpsc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), callback_server::CallbackServerError> {
//!     let (tx, mut rx) = mpsc::unbounded_channel::<CallbackRequest>();
//!
//!     let server = CallbackServer::new((8400, 8500), tx).await?;
//!     server.router().register("brain-1".to_string()).await;
//!     println!("Brain callbacks go to {}", server.callback_url("brain-1"));
//!
//!     while let Some(request) = rx.recv().await {
//!         println!("{} {} from {}", request.method, request.path, request.brain_id);
//!     }
//!
//!     server.shutdown().await;
//!     Ok(())
//! }
//! ```

mod error;
pub mod router;
mod server;

pub use error::CallbackServerError;
pub use router::{CallbackRequest, EventRouter};
pub use server::{CallbackServer, CALLBACK_ROOT};
