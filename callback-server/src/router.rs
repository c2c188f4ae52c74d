//! Routing of brain callbacks to a channel.
//!
//! The `EventRouter` holds the brain ids the server currently accepts
//! requests for. Requests for any other brain id are rejected with a 404 so
//! that a brain still holding a stale registration learns about it.

use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, trace};

/// A request received from a brain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackRequest {
    /// Brain id taken from the request path
    pub brain_id: String,
    /// HTTP method, e.g. `POST`
    pub method: String,
    /// Remainder of the path after `/neeo/<brain id>`, always starting with `/`
    pub path: String,
    /// Request body as text
    pub body: String,
}

/// Routes brain callbacks to a channel.
#[derive(Clone)]
pub struct EventRouter {
    /// Brain ids callbacks are accepted for
    brains: Arc<RwLock<HashSet<String>>>,
    /// Channel receiving accepted requests
    sender: mpsc::UnboundedSender<CallbackRequest>,
}

impl EventRouter {
    /// Create a router forwarding to `sender`
    ///
    /// ```
    /// use tokio::sync::mpsc;
    /// use callback_server::router::{CallbackRequest, EventRouter};
    ///
    /// let (tx, _rx) = mpsc::unbounded_channel::<CallbackRequest>();
    /// let router = EventRouter::new(tx);
    /// ```
    pub fn new(sender: mpsc::UnboundedSender<CallbackRequest>) -> Self {
        Self {
            brains: Arc::new(RwLock::new(HashSet::new())),
            sender,
        }
    }

    /// Accept callbacks for `brain_id`
    pub async fn register(&self, brain_id: String) {
        debug!(%brain_id, "accepting callbacks");
        self.brains.write().await.insert(brain_id);
    }

    /// Stop accepting callbacks for `brain_id`
    pub async fn unregister(&self, brain_id: &str) {
        debug!(%brain_id, "no longer accepting callbacks");
        self.brains.write().await.remove(brain_id);
    }

    pub async fn is_registered(&self, brain_id: &str) -> bool {
        self.brains.read().await.contains(brain_id)
    }

    /// Forward `request` if its brain id is registered.
    ///
    /// Returns `false` (and drops the request) otherwise.
    pub async fn route(&self, request: CallbackRequest) -> bool {
        if !self.is_registered(&request.brain_id).await {
            trace!(brain_id = %request.brain_id, "dropping callback for unknown brain");
            return false;
        }

        // A dropped receiver only means nobody is listening anymore
        let _ = self.sender.send(request);
        true
    }
}
