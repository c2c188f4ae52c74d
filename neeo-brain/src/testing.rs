//! Deterministic test doubles for the connection manager.
//!
//! Available to unit tests and, through the `test-support` feature, to
//! integration tests and downstream crates.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use brain_transport::{HttpResponse, HttpTransport, TransportError, TransportFactory};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::endpoints;
use crate::probe::HealthProbe;
use crate::scheduler::{OnceJob, PendingTask, RecurringJob, TaskScheduler};

struct ScheduledOnce {
    delay: Duration,
    token: CancellationToken,
    finished: Arc<AtomicBool>,
    job: OnceJob,
}

struct ScheduledRecurring {
    interval: Duration,
    token: CancellationToken,
    finished: Arc<AtomicBool>,
    job: RecurringJob,
}

#[derive(Default)]
struct ManualState {
    once: VecDeque<ScheduledOnce>,
    recurring: Vec<ScheduledRecurring>,
    once_delays: Vec<Duration>,
}

/// [`TaskScheduler`] that only runs jobs when the test says so
#[derive(Clone, Default)]
pub struct ManualScheduler {
    state: Arc<Mutex<ManualState>>,
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run the oldest one-shot job that has not been cancelled.
    ///
    /// Returns false when there was nothing to run.
    pub async fn run_next_once(&self) -> bool {
        let next = {
            let mut state = self.state.lock();
            loop {
                match state.once.pop_front() {
                    Some(task) if task.token.is_cancelled() => {
                        task.finished.store(true, Ordering::Release);
                    }
                    other => break other,
                }
            }
        };

        match next {
            Some(task) => {
                (task.job)(task.token.clone()).await;
                task.finished.store(true, Ordering::Release);
                true
            }
            None => false,
        }
    }

    /// Run every live recurring job once, returning how many ran
    pub async fn tick_recurring(&self) -> usize {
        let due: Vec<(CancellationToken, Arc<AtomicBool>, RecurringJob)> = {
            let mut state = self.state.lock();
            state.recurring.retain(|task| {
                if task.token.is_cancelled() {
                    task.finished.store(true, Ordering::Release);
                    false
                } else {
                    true
                }
            });
            state
                .recurring
                .iter()
                .map(|task| (task.token.clone(), Arc::clone(&task.finished), Arc::clone(&task.job)))
                .collect()
        };

        let mut ran = 0;
        for (token, finished, job) in due {
            if token.is_cancelled() {
                continue;
            }
            job(token.clone()).await;
            ran += 1;
            if token.is_cancelled() {
                finished.store(true, Ordering::Release);
            }
        }
        ran
    }

    /// One-shot jobs scheduled and not cancelled
    pub fn live_once(&self) -> usize {
        self.state
            .lock()
            .once
            .iter()
            .filter(|task| !task.token.is_cancelled())
            .count()
    }

    /// Recurring jobs scheduled and not cancelled
    pub fn live_recurring(&self) -> usize {
        self.state
            .lock()
            .recurring
            .iter()
            .filter(|task| !task.token.is_cancelled())
            .count()
    }

    /// Delays of every one-shot job ever scheduled, in order
    pub fn once_delays(&self) -> Vec<Duration> {
        self.state.lock().once_delays.clone()
    }

    /// Intervals of the live recurring jobs
    pub fn recurring_intervals(&self) -> Vec<Duration> {
        self.state
            .lock()
            .recurring
            .iter()
            .filter(|task| !task.token.is_cancelled())
            .map(|task| task.interval)
            .collect()
    }
}

impl TaskScheduler for ManualScheduler {
    fn schedule_once(&self, delay: Duration, job: OnceJob) -> PendingTask {
        let token = CancellationToken::new();
        let finished = Arc::new(AtomicBool::new(false));

        let mut state = self.state.lock();
        state.once_delays.push(delay);
        state.once.push_back(ScheduledOnce {
            delay,
            token: token.clone(),
            finished: Arc::clone(&finished),
            job,
        });

        PendingTask::new(token, finished)
    }

    fn schedule_recurring(&self, interval: Duration, job: RecurringJob) -> PendingTask {
        let token = CancellationToken::new();
        let finished = Arc::new(AtomicBool::new(false));

        self.state.lock().recurring.push(ScheduledRecurring {
            interval,
            token: token.clone(),
            finished: Arc::clone(&finished),
            job,
        });

        PendingTask::new(token, finished)
    }
}

impl std::fmt::Debug for ManualScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("ManualScheduler")
            .field("once", &state.once.iter().map(|t| t.delay).collect::<Vec<_>>())
            .field("recurring", &state.recurring.len())
            .finish()
    }
}

/// A request seen by a [`RecordingTransport`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCall {
    pub method: String,
    pub url: String,
    pub body: Option<String>,
}

impl RecordedCall {
    /// Path component of the URL
    pub fn path(&self) -> String {
        path_of(&self.url)
    }
}

#[derive(Debug, Clone)]
enum Scripted {
    Respond(HttpResponse),
    Fail(String),
}

/// In-memory [`HttpTransport`] answering from a script keyed by method and path.
///
/// Unscripted requests get a `404`.
#[derive(Debug, Default)]
pub struct RecordingTransport {
    script: Mutex<HashMap<(String, String), Scripted>>,
    calls: Mutex<Vec<RecordedCall>>,
}

/// Home project used by [`RecordingTransport::healthy_brain`]
pub const SAMPLE_PROJECT: &str = r#"{
    "name": "home",
    "rooms": {
        "6241": {
            "name": "Living Room",
            "devices": {
                "6242": { "key": "6242", "name": "TV", "details": { "adapterName": "neeo-rs" } }
            }
        }
    }
}"#;

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// A brain accepting registrations and notifications, with one device
    /// and no recipes
    pub fn healthy_brain() -> Self {
        let transport = Self::new();
        transport.respond("POST", endpoints::REGISTER_SDK_ADAPTER, 200, "{}");
        transport.respond("POST", endpoints::UNREGISTER_SDK_ADAPTER, 200, "{}");
        transport.respond("POST", endpoints::NOTIFICATIONS, 200, "{}");
        transport.respond("GET", endpoints::PROJECTS_HOME, 200, SAMPLE_PROJECT);
        transport.respond("GET", endpoints::RECIPES, 200, "[]");
        transport
    }

    /// Answer `method path` with the given status and body
    pub fn respond(&self, method: &str, path: &str, status: u16, body: &str) {
        self.script.lock().insert(
            (method.to_string(), path.to_string()),
            Scripted::Respond(HttpResponse::new(status, body)),
        );
    }

    /// Make `method path` fail with a network error
    pub fn fail_with_io(&self, method: &str, path: &str) {
        self.script.lock().insert(
            (method.to_string(), path.to_string()),
            Scripted::Fail(format!("connection refused: {method} {path}")),
        );
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    pub fn requested_urls(&self) -> Vec<String> {
        self.calls.lock().iter().map(|c| c.url.clone()).collect()
    }

    /// `(method, path)` of every call, in order
    pub fn requested_paths(&self) -> Vec<(String, String)> {
        self.calls
            .lock()
            .iter()
            .map(|c| (c.method.clone(), c.path()))
            .collect()
    }

    /// How many calls hit `method path`
    pub fn count(&self, method: &str, path: &str) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.method == method && c.path() == path)
            .count()
    }

    /// Body of the most recent POST
    pub fn last_body(&self) -> Option<String> {
        self.calls.lock().iter().rev().find_map(|c| c.body.clone())
    }

    fn answer(&self, method: &str, url: &str, body: Option<&str>) -> Result<HttpResponse, TransportError> {
        self.calls.lock().push(RecordedCall {
            method: method.to_string(),
            url: url.to_string(),
            body: body.map(str::to_string),
        });

        let scripted = self
            .script
            .lock()
            .get(&(method.to_string(), path_of(url)))
            .cloned();

        match scripted {
            Some(Scripted::Respond(response)) => Ok(response),
            Some(Scripted::Fail(message)) => Err(TransportError::Network(message)),
            None => Ok(HttpResponse::new(404, "not found")),
        }
    }
}

#[async_trait]
impl HttpTransport for RecordingTransport {
    async fn get(&self, url: &str) -> Result<HttpResponse, TransportError> {
        self.answer("GET", url, None)
    }

    async fn post_json(&self, url: &str, json: &str) -> Result<HttpResponse, TransportError> {
        self.answer("POST", url, Some(json))
    }
}

fn path_of(url: &str) -> String {
    match url::Url::parse(url) {
        Ok(parsed) => parsed.path().to_string(),
        Err(_) => url.to_string(),
    }
}

/// [`TransportFactory`] handing out one shared [`RecordingTransport`]
#[derive(Debug, Default)]
pub struct RecordingTransportFactory {
    transport: Arc<RecordingTransport>,
    created: AtomicUsize,
    fail: AtomicBool,
}

impl RecordingTransportFactory {
    pub fn new(transport: Arc<RecordingTransport>) -> Self {
        Self {
            transport,
            created: AtomicUsize::new(0),
            fail: AtomicBool::new(false),
        }
    }

    pub fn transport(&self) -> &Arc<RecordingTransport> {
        &self.transport
    }

    /// Number of transports handed out
    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    /// Make subsequent `create` calls fail
    pub fn fail_creation(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

impl TransportFactory for RecordingTransportFactory {
    fn create(&self) -> Result<Arc<dyn HttpTransport>, TransportError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(TransportError::Client("transport creation disabled".to_string()));
        }
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(self.transport.clone())
    }
}

/// [`HealthProbe`] whose answer is set by the test
#[derive(Debug)]
pub struct ScriptedProbe {
    reachable: AtomicBool,
    probes: AtomicUsize,
}

impl ScriptedProbe {
    pub fn new(reachable: bool) -> Self {
        Self {
            reachable: AtomicBool::new(reachable),
            probes: AtomicUsize::new(0),
        }
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    pub fn probes(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HealthProbe for ScriptedProbe {
    async fn probe(&self, _host: &str, _port: u16, _timeout: Duration) -> bool {
        self.probes.fetch_add(1, Ordering::SeqCst);
        self.reachable.load(Ordering::SeqCst)
    }
}
