//! # NEEO Brain Connection
//!
//! Keeps an integration session with a NEEO brain alive: registers a callback
//! URL so the brain can push events to us, keeps the brain's device keys at
//! hand, probes the brain periodically and reconnects when it goes away.
//!
//! ```rust,ignore
//! use neeo_brain::{BrainConfig, BrainConnection};
//!
//! let config = BrainConfig::new("brain-1", "192.168.1.20", 8400);
//! let connection = BrainConnection::with_defaults(config)?;
//! let mut events = connection.connectivity_events();
//! connection.start();
//!
//! while let Some(event) = events.recv().await {
//!     println!("brain connected: {}", event.new_value);
//! }
//! ```
//!
//! Scheduling, HTTP, probing and local address resolution are all injected
//! (see [`TaskScheduler`], [`brain_transport::TransportFactory`],
//! [`HealthProbe`] and [`AddressResolver`]), which is how the `testing`
//! module drives the lifecycle deterministically.

pub mod config;
pub mod device_keys;
pub mod endpoints;
pub mod error;
pub mod listener;
pub mod logging;
pub mod manager;
pub mod probe;
pub mod recipes;
pub mod registrar;
pub mod scheduler;
pub mod session;
pub mod system;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use config::{BrainConfig, DEFAULT_ADAPTER_NAME, DEFAULT_BRAIN_PORT};
pub use device_keys::{DeviceKeySet, DeviceKeys};
pub use error::{BrainError, Result};
pub use listener::{ConnectivityEvent, ConnectivityListener, ListenerId, ListenerRegistry};
pub use manager::BrainConnection;
pub use probe::{HealthProbe, TcpProbe, DEFAULT_PROBE_TIMEOUT};
pub use recipes::{Recipe, RecipeUrls};
pub use registrar::{
    AddressResolver, AdapterRegistration, CallbackRegistrar, RouteResolver, StaticResolver,
};
pub use scheduler::{check_interrupt, PendingTask, TaskScheduler, TaskSlot, TokioScheduler};
pub use session::{ConnectionState, Session};
pub use system::{ansi_to_html, SystemInfo};

pub use brain_transport;
