//! Brain connection lifecycle.
//!
//! A [`BrainConnection`] owns one [`Session`] and drives it through
//! `Disconnected -> Connecting -> Connected` and back. Connect attempts and
//! health checks run as scheduled jobs holding only a weak reference to the
//! connection, so dropping the connection stops them.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use brain_transport::{ReqwestTransportFactory, TransportFactory};
use futures::future::BoxFuture;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::BrainConfig;
use crate::device_keys::{DeviceKeySet, DeviceKeys};
use crate::endpoints;
use crate::error::{BrainError, Result};
use crate::listener::{ConnectivityEvent, ConnectivityListener, ListenerId};
use crate::probe::{HealthProbe, TcpProbe};
use crate::recipes::{self, find_recipe};
use crate::registrar::{build_callback_url, resolver_for, AddressResolver, CallbackRegistrar};
use crate::scheduler::{check_interrupt, OnceJob, RecurringJob, TaskScheduler, TokioScheduler};
use crate::session::{ConnectionState, Session};
use crate::system::{self, SystemInfo};

/// Managed connection to a single NEEO brain
pub struct BrainConnection {
    inner: Arc<Inner>,
}

struct Inner {
    config: BrainConfig,
    session: Session,
    device_keys: DeviceKeys,
    registrar: CallbackRegistrar,
    scheduler: Arc<dyn TaskScheduler>,
    transports: Arc<dyn TransportFactory>,
    probe: Arc<dyn HealthProbe>,
    resolver: Arc<dyn AddressResolver>,
    closed: AtomicBool,
}

impl BrainConnection {
    /// Create a connection from its collaborators. Nothing happens until
    /// [`start`](Self::start) is called.
    pub fn new(
        config: BrainConfig,
        scheduler: Arc<dyn TaskScheduler>,
        transports: Arc<dyn TransportFactory>,
        probe: Arc<dyn HealthProbe>,
        resolver: Arc<dyn AddressResolver>,
    ) -> Result<Self> {
        config.validate()?;

        let inner = Inner {
            session: Session::new(&config),
            device_keys: DeviceKeys::new(),
            registrar: CallbackRegistrar::from_config(&config),
            config,
            scheduler,
            transports,
            probe,
            resolver,
            closed: AtomicBool::new(false),
        };

        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    /// Create a connection using the tokio runtime of the caller, `reqwest`
    /// transports, TCP probing and the configured or detected callback address
    pub fn with_defaults(config: BrainConfig) -> Result<Self> {
        let scheduler = Arc::new(TokioScheduler::current()?);
        let transports = Arc::new(ReqwestTransportFactory::new(config.request_timeout));
        let resolver: Arc<dyn AddressResolver> = Arc::from(resolver_for(&config));
        Self::new(config, scheduler, transports, Arc::new(TcpProbe), resolver)
    }

    /// Schedule a connect attempt after the connect delay, replacing any
    /// attempt already pending
    pub fn start(&self) {
        if self.inner.closed.load(Ordering::Acquire) {
            debug!(brain_id = %self.brain_id(), "start ignored - connection is closed");
            return;
        }
        self.inner.schedule_connect();
    }

    pub fn is_connected(&self) -> bool {
        self.inner.session.is_connected()
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.session.state()
    }

    pub fn brain_id(&self) -> &str {
        self.inner.session.brain_id()
    }

    pub fn brain_url(&self) -> &str {
        self.inner.session.brain_url()
    }

    /// The registered callback URL, present only while registered
    pub fn callback_url(&self) -> Option<String> {
        self.inner.session.callback_url()
    }

    pub fn config(&self) -> &BrainConfig {
        &self.inner.config
    }

    /// Latest device key snapshot
    pub fn device_keys(&self) -> Arc<DeviceKeySet> {
        self.inner.device_keys.get()
    }

    pub fn has_pending_connect(&self) -> bool {
        self.inner.session.connect().is_active()
    }

    pub fn has_health_check(&self) -> bool {
        self.inner.session.check_status().is_active()
    }

    pub fn add_listener(&self, listener: Arc<dyn ConnectivityListener>) -> ListenerId {
        self.inner.session.listeners().add(listener)
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.inner.session.listeners().remove(id)
    }

    /// Stream of connectivity changes
    pub fn connectivity_events(&self) -> mpsc::UnboundedReceiver<ConnectivityEvent> {
        let (_id, receiver) = self.inner.session.listeners().subscribe();
        receiver
    }

    /// Send a notification to the brain.
    ///
    /// Ignored (and successful) while the brain is not connected.
    pub async fn notify(&self, message: &str) -> Result<()> {
        let session = &self.inner.session;
        if !session.is_connected() {
            debug!(brain_id = %session.brain_id(), "notification ignored - brain not connected");
            return Ok(());
        }

        let transport = session
            .transport()
            .ok_or_else(|| BrainError::Precondition("No transport available".to_string()))?;

        debug!(brain_id = %session.brain_id(), %message, "sending notification");
        let url = format!("{}{}", session.brain_url(), endpoints::NOTIFICATIONS);
        let response = transport.post_json(&url, message).await?;
        if !response.is_ok() {
            return Err(BrainError::Transport {
                status: response.status,
                body: response.body,
            });
        }
        Ok(())
    }

    /// Power the recipe identified by `device_key` on or off.
    ///
    /// The first recipe whose uid matches case-insensitively is used. A
    /// missing recipe or a recipe without the requested action is a no-op.
    pub async fn execute_recipe(&self, device_key: &str, on: bool) -> Result<()> {
        if device_key.trim().is_empty() {
            return Err(BrainError::Precondition(
                "Device key cannot be empty".to_string(),
            ));
        }

        let session = &self.inner.session;
        let transport = session
            .transport()
            .ok_or_else(|| BrainError::Precondition("No transport available".to_string()))?;

        let recipes = recipes::fetch_recipes(transport.as_ref(), session.brain_url()).await?;
        let Some(recipe) = find_recipe(&recipes, device_key) else {
            debug!(brain_id = %session.brain_id(), %device_key, "no recipe found");
            return Ok(());
        };

        let Some(action) = recipe.action_url(on) else {
            debug!(brain_id = %session.brain_id(), %device_key, on, "recipe has no action url");
            return Ok(());
        };

        let url = recipes::resolve_action_url(session.brain_url(), action);
        debug!(brain_id = %session.brain_id(), %url, on, "executing recipe");
        let response = transport.get(&url).await?;
        if !response.is_ok() {
            return Err(BrainError::Transport {
                status: response.status,
                body: response.body,
            });
        }
        Ok(())
    }

    /// Brain system information, fetched with a fresh transport
    pub async fn system_info(&self) -> Result<SystemInfo> {
        let transport = self.inner.transports.create()?;
        system::fetch_system_info(transport.as_ref(), self.brain_url()).await
    }

    /// Make the brain blink its LED
    pub async fn blink_led(&self) -> Result<()> {
        let transport = self.inner.transports.create()?;
        system::identify_brain(transport.as_ref(), self.brain_url()).await
    }

    /// The brain's log, rendered as HTML
    pub async fn log_html(&self) -> Result<String> {
        let transport = self.inner.transports.create()?;
        system::fetch_log_html(transport.as_ref(), self.brain_url()).await
    }

    /// Stop all work and deregister from the brain. Further calls are no-ops.
    pub async fn close(&self) {
        let inner = &self.inner;
        if inner.closed.swap(true, Ordering::AcqRel) {
            debug!(brain_id = %self.brain_id(), "already closed");
            return;
        }

        let session = &inner.session;
        // An interrupted connect attempt clears the session's URL on its way out
        let callback_url = session.callback_url();
        session.check_status().cancel();
        session.connect().cancel();

        if let Err(e) = inner.registrar.deregister_url(session, callback_url).await {
            warn!(brain_id = %session.brain_id(), error = %e, "deregistering during close failed - ignoring");
        }

        session.replace_transport(None);
        session.set_callback_url(None);
        session.set_connected(false);
        info!(brain_id = %session.brain_id(), "connection closed");
    }
}

impl Drop for BrainConnection {
    fn drop(&mut self) {
        let session = &self.inner.session;
        session.check_status().cancel();
        session.connect().cancel();
        if !self.inner.closed.load(Ordering::Acquire) && session.callback_url().is_some() {
            debug!(brain_id = %session.brain_id(), "dropped without close - callback stays registered");
        }
    }
}

impl std::fmt::Debug for BrainConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrainConnection")
            .field("session", &self.inner.session)
            .field("closed", &self.inner.closed.load(Ordering::Relaxed))
            .finish()
    }
}

impl Inner {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn schedule_connect(self: &Arc<Self>) {
        let weak: Weak<Inner> = Arc::downgrade(self);
        let job: OnceJob = Box::new(move |token: CancellationToken| -> BoxFuture<'static, ()> {
            Box::pin(async move {
                if let Some(inner) = weak.upgrade() {
                    inner.connect(token).await;
                }
            })
        });

        let task = self.scheduler.schedule_once(self.config.connect_delay, job);
        self.session.connect().replace(task);

        // close() may have emptied the slot between the caller's check and here
        if self.is_closed() {
            self.session.connect().cancel();
        }
    }

    fn schedule_check_status(self: &Arc<Self>) {
        if !self.config.health_checks_enabled() {
            debug!(brain_id = %self.session.brain_id(), "health checks disabled");
            return;
        }

        let weak: Weak<Inner> = Arc::downgrade(self);
        let job: RecurringJob = Arc::new(move |token: CancellationToken| -> BoxFuture<'static, ()> {
            let weak = weak.clone();
            Box::pin(async move {
                if let Some(inner) = weak.upgrade() {
                    inner.check_status(token).await;
                }
            })
        });

        let task = self
            .scheduler
            .schedule_recurring(self.config.check_status_interval, job);
        self.session.check_status().replace(task);

        if self.is_closed() {
            self.session.check_status().cancel();
        }
    }

    async fn connect(self: &Arc<Self>, token: CancellationToken) {
        let brain_id = self.session.brain_id();
        let host = self.session.brain_host();
        debug!(%brain_id, %host, "starting connect");

        match self.try_connect(&token).await {
            Ok(true) => {
                info!(%brain_id, %host, "connection successful");
            }
            Ok(false) => {
                self.session.set_connected(false);
            }
            Err(e) if !e.is_retryable() || token.is_cancelled() => {
                debug!(%brain_id, error = %e, "connect was interrupted");
                self.session.set_connected(false);
            }
            Err(e) if e.is_communication() => {
                debug!(%brain_id, %host, error = %e, "connection failed - scheduling another connect");
                self.session.set_connected(false);
                self.schedule_connect();
            }
            Err(e) => {
                error!(%brain_id, %host, error = %e, "connect had an unexpected error");
                self.session.set_connected(false);
                self.schedule_connect();
            }
        }
    }

    /// One connect attempt. `Ok(false)` means no callback URL could be built
    /// and no retry should happen.
    async fn try_connect(self: &Arc<Self>, token: &CancellationToken) -> Result<bool> {
        let session = &self.session;
        session.set_connected(false);
        session.set_state(ConnectionState::Connecting);

        let transport = self.transports.create()?;
        session.replace_transport(Some(Arc::clone(&transport)));

        let Some(callback_url) = self.resolve_callback_url()? else {
            debug!(
                brain_id = %session.brain_id(),
                "unable to create a callback URL - no local address found"
            );
            return Ok(false);
        };
        session.set_callback_url(Some(callback_url));

        check_interrupt(token)?;
        self.registrar.register(session).await?;

        check_interrupt(token)?;
        self.device_keys
            .refresh(transport.as_ref(), session.brain_url())
            .await?;

        check_interrupt(token)?;
        session.set_connected(true);

        if let Err(e) = check_interrupt(token) {
            session.set_connected(false);
            return Err(e);
        }

        self.schedule_check_status();
        Ok(true)
    }

    fn resolve_callback_url(&self) -> Result<Option<String>> {
        let address = self
            .resolver
            .resolve(self.session.brain_host(), self.config.brain_port);

        match address {
            Some(address) => build_callback_url(
                address,
                self.config.callback_port,
                &self.config.callback_path(),
            )
            .map(Some),
            None => Ok(None),
        }
    }

    async fn check_status(self: &Arc<Self>, token: CancellationToken) {
        if token.is_cancelled() {
            return;
        }

        let host = self.session.brain_host();
        let port = self.config.brain_port;
        if self.probe.probe(host, port, self.config.probe_timeout).await {
            debug!(%host, port, "checking connectivity - successful");
            return;
        }

        if token.is_cancelled() {
            return;
        }

        debug!(%host, port, "checking connectivity - unsuccessful - going offline");
        self.session.set_connected(false);
        self.session.check_status().cancel();
        self.schedule_connect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registrar::StaticResolver;
    use crate::testing::{ManualScheduler, RecordingTransport, RecordingTransportFactory, ScriptedProbe};
    use std::net::{IpAddr, Ipv4Addr};
    use std::time::Duration;

    struct Fixture {
        connection: BrainConnection,
        scheduler: ManualScheduler,
        transport: Arc<RecordingTransport>,
        factory: Arc<RecordingTransportFactory>,
    }

    fn fixture() -> Fixture {
        let scheduler = ManualScheduler::new();
        let transport = Arc::new(RecordingTransport::healthy_brain());
        let factory = Arc::new(RecordingTransportFactory::new(Arc::clone(&transport)));
        let config = BrainConfig::new("brain-1", "10.0.0.20", 8400).with_instance_id("test");
        let connection = BrainConnection::new(
            config,
            Arc::new(scheduler.clone()),
            factory.clone(),
            Arc::new(ScriptedProbe::new(true)),
            Arc::new(StaticResolver(Some(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 5))))),
        )
        .unwrap();

        Fixture {
            connection,
            scheduler,
            transport,
            factory,
        }
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let result = BrainConnection::new(
            BrainConfig::new("", "10.0.0.20", 8400),
            Arc::new(ManualScheduler::new()),
            Arc::new(RecordingTransportFactory::default()),
            Arc::new(ScriptedProbe::new(true)),
            Arc::new(StaticResolver(None)),
        );
        assert!(matches!(result, Err(BrainError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_connect_uses_fixed_delay() {
        let f = fixture();
        f.connection.start();
        assert_eq!(f.scheduler.once_delays(), vec![Duration::from_secs(5)]);
        assert!(f.connection.has_pending_connect());
    }

    #[tokio::test]
    async fn test_connect_builds_callback_url_and_refreshes_keys() {
        let f = fixture();
        f.connection.start();
        assert!(f.scheduler.run_next_once().await);

        assert_eq!(f.connection.state(), ConnectionState::Connected);
        assert_eq!(
            f.connection.callback_url().as_deref(),
            Some("http://10.0.0.5:8400/neeo/brain-1")
        );
        assert!(f.connection.device_keys().contains("6242"));
        assert_eq!(f.factory.created(), 1);
        assert!(f
            .transport
            .last_body()
            .is_some_and(|body| body.contains("neeo-rs-test")));
    }

    #[tokio::test]
    async fn test_execute_recipe_requires_transport() {
        let f = fixture();
        let result = f.connection.execute_recipe("6242", true).await;
        assert!(matches!(result, Err(BrainError::Precondition(_))));

        let result = f.connection.execute_recipe("", true).await;
        assert!(matches!(result, Err(BrainError::Precondition(_))));
    }

    #[tokio::test]
    async fn test_execute_recipe_runs_first_match() {
        let f = fixture();
        f.connection.start();
        f.scheduler.run_next_once().await;

        f.transport.respond(
            "GET",
            endpoints::RECIPES,
            200,
            r#"[
                {"uid":"abc","urls":{"setPowerOn":"http://10.0.0.20:3000/v1/api/recipes/1/execute"}},
                {"uid":"ABC","urls":{"setPowerOn":"http://10.0.0.20:3000/v1/api/recipes/2/execute"}}
            ]"#,
        );
        f.transport
            .respond("GET", "/v1/api/recipes/1/execute", 200, "{}");
        f.transport.clear_calls();

        f.connection.execute_recipe("Abc", true).await.unwrap();
        assert_eq!(
            f.transport.requested_urls(),
            vec![
                "http://10.0.0.20:3000/v1/projects/home/recipes".to_string(),
                "http://10.0.0.20:3000/v1/api/recipes/1/execute".to_string(),
            ]
        );

        // No power-off URL: listing only
        f.transport.clear_calls();
        f.connection.execute_recipe("abc", false).await.unwrap();
        assert_eq!(f.transport.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_execute_recipe_action_failure() {
        let f = fixture();
        f.connection.start();
        f.scheduler.run_next_once().await;

        f.transport.respond(
            "GET",
            endpoints::RECIPES,
            200,
            r#"[{"uid":"abc","urls":{"setPowerOff":"/v1/api/recipes/1/poweroff"}}]"#,
        );
        f.transport
            .respond("GET", "/v1/api/recipes/1/poweroff", 500, "failed");

        let result = f.connection.execute_recipe("abc", false).await;
        assert!(matches!(
            result,
            Err(BrainError::Transport { status: 500, .. })
        ));
    }

    #[tokio::test]
    async fn test_notify_rejected_by_brain() {
        let f = fixture();
        f.connection.start();
        f.scheduler.run_next_once().await;

        f.transport
            .respond("POST", endpoints::NOTIFICATIONS, 400, "bad request");
        let result = f.connection.notify(r#"{"type":"x"}"#).await;
        assert!(matches!(
            result,
            Err(BrainError::Transport { status: 400, .. })
        ));
    }

    #[tokio::test]
    async fn test_start_after_close_is_ignored() {
        let f = fixture();
        f.connection.close().await;
        f.connection.start();
        assert_eq!(f.scheduler.live_once(), 0);
        assert!(!f.connection.has_pending_connect());
    }

    #[tokio::test]
    async fn test_drop_cancels_tasks() {
        let f = fixture();
        f.connection.start();
        f.scheduler.run_next_once().await;
        assert_eq!(f.scheduler.live_recurring(), 1);

        drop(f.connection);
        assert_eq!(f.scheduler.live_recurring(), 0);
        assert_eq!(f.scheduler.live_once(), 0);
    }

    #[tokio::test]
    async fn test_close_racing_connected_flag_leaves_flag_down() {
        let f = fixture();
        let weak = Arc::downgrade(&f.connection.inner);
        // Marks the connection closed right as the flag goes up
        f.connection.add_listener(Arc::new(move |event: ConnectivityEvent| {
            if let (true, Some(inner)) = (event.new_value, weak.upgrade()) {
                inner.closed.store(true, Ordering::Release);
                inner.session.connect().cancel();
            }
        }));

        f.connection.start();
        assert!(f.scheduler.run_next_once().await);

        assert!(!f.connection.is_connected());
        assert_eq!(f.connection.state(), ConnectionState::Disconnected);
        assert!(!f.connection.has_health_check());
        assert_eq!(f.scheduler.live_once(), 0);
    }

    #[tokio::test]
    async fn test_dropped_event_receivers_are_released() {
        let f = fixture();
        for _ in 0..1000 {
            drop(f.connection.connectivity_events());
        }
        assert!(f.connection.inner.session.listeners().len() <= 1);

        f.connection.start();
        f.scheduler.run_next_once().await;
        assert!(f.connection.inner.session.listeners().is_empty());
    }

    #[tokio::test]
    async fn test_system_calls_use_fresh_transport() {
        let f = fixture();
        f.transport
            .respond("GET", endpoints::IDENTIFY_BRAIN, 200, "");
        f.connection.blink_led().await.unwrap();
        assert_eq!(f.factory.created(), 1);
        assert_eq!(f.transport.count("GET", endpoints::IDENTIFY_BRAIN), 1);
    }
}
