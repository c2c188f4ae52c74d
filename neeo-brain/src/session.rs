//! Mutable state of one brain session.
//!
//! Every field is its own swappable cell so that the connect task, the health
//! check and callers of the public API can touch the session concurrently
//! without a session-wide lock. No lock here is ever held across an await.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;

use brain_transport::HttpTransport;
use parking_lot::Mutex;
use tracing::debug;

use crate::config::BrainConfig;
use crate::listener::{ConnectivityEvent, ListenerRegistry};
use crate::scheduler::TaskSlot;

/// Lifecycle state of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

impl ConnectionState {
    fn as_u8(self) -> u8 {
        match self {
            ConnectionState::Disconnected => 0,
            ConnectionState::Connecting => 1,
            ConnectionState::Connected => 2,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            1 => ConnectionState::Connecting,
            2 => ConnectionState::Connected,
            _ => ConnectionState::Disconnected,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
        }
    }
}

/// One managed connection to one brain
pub struct Session {
    brain_id: String,
    brain_host: String,
    brain_url: String,
    callback_url: Mutex<Option<String>>,
    transport: Mutex<Option<Arc<dyn HttpTransport>>>,
    connected: AtomicBool,
    state: AtomicU8,
    check_status: TaskSlot,
    connect: TaskSlot,
    listeners: ListenerRegistry,
}

impl Session {
    pub fn new(config: &BrainConfig) -> Self {
        Self {
            brain_id: config.brain_id.clone(),
            brain_host: config.brain_host.clone(),
            brain_url: config.brain_url(),
            callback_url: Mutex::new(None),
            transport: Mutex::new(None),
            connected: AtomicBool::new(false),
            state: AtomicU8::new(ConnectionState::Disconnected.as_u8()),
            check_status: TaskSlot::new("check-status"),
            connect: TaskSlot::new("connect"),
            listeners: ListenerRegistry::new(),
        }
    }

    pub fn brain_id(&self) -> &str {
        &self.brain_id
    }

    pub fn brain_host(&self) -> &str {
        &self.brain_host
    }

    pub fn brain_url(&self) -> &str {
        &self.brain_url
    }

    pub fn callback_url(&self) -> Option<String> {
        self.callback_url.lock().clone()
    }

    pub fn set_callback_url(&self, url: Option<String>) {
        *self.callback_url.lock() = url;
    }

    pub fn transport(&self) -> Option<Arc<dyn HttpTransport>> {
        self.transport.lock().clone()
    }

    /// Install a new transport, returning the one it replaces
    pub fn replace_transport(
        &self,
        transport: Option<Arc<dyn HttpTransport>>,
    ) -> Option<Arc<dyn HttpTransport>> {
        std::mem::replace(&mut *self.transport.lock(), transport)
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn set_state(&self, state: ConnectionState) {
        self.state.store(state.as_u8(), Ordering::Release);
    }

    /// Swap the connectivity flag and fire an event if it changed.
    ///
    /// Going offline also forgets the callback URL.
    pub fn set_connected(&self, connected: bool) {
        let old = self.connected.swap(connected, Ordering::AcqRel);
        if connected {
            self.set_state(ConnectionState::Connected);
        } else {
            self.set_callback_url(None);
            self.set_state(ConnectionState::Disconnected);
        }

        if old != connected {
            debug!(brain_id = %self.brain_id, old, new = connected, "connectivity changed");
            self.listeners.fire(ConnectivityEvent::new(old, connected));
        }
    }

    pub fn listeners(&self) -> &ListenerRegistry {
        &self.listeners
    }

    /// Slot of the recurring health check
    pub fn check_status(&self) -> &TaskSlot {
        &self.check_status
    }

    /// Slot of the pending connect attempt
    pub fn connect(&self) -> &TaskSlot {
        &self.connect
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("brain_id", &self.brain_id)
            .field("brain_url", &self.brain_url)
            .field("callback_url", &self.callback_url())
            .field("state", &self.state())
            .finish()
    }
}
