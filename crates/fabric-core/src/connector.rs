//! The per-service runtime object: identity, config, lifecycle, the
//! subscription and publication engines, tickers, and metric observers, all
//! sharing one bus handle. This is the boundary between service logic and
//! the bus.
//!
//! Lifecycle is linear: `CREATED -> STARTED -> STOPPED`. Subscriptions and
//! tickers registered before `startup` take effect only once `startup`
//! spawns the bus listeners and ticker loops that actually drive them —
//! registering early just fills in the trie and the ticker list, which is
//! harmless before anything is listening.

use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{error, info, trace, warn};

use fabric_bus::subject::{multicast_subject, unicast_subject};
use fabric_bus::{Bus, BusSubscription};
use fabric_errors::{error_args, Error};
use fabric_wire::openapi::OpenApiDoc;
use fabric_wire::{
    ConfigEntry, Frame, HttpResponse, PortPattern, Request, Response, ResponseQueue,
    SubscriptionPattern, ValidationRule,
};

use crate::config_store::{ConfigStore, Observer};
use crate::deployment::DeploymentMode;
use crate::ids::{IdSource, RandomIdSource};
use crate::publication_engine::PublicationEngine;
use crate::routing::RouteId;
use crate::subscription_engine::{Handler, SubscriptionEngine, SubscriptionOptions};

/// Default per-call deadline when neither the request nor the `TimeBudget`
/// config entry says otherwise.
const DEFAULT_TIME_BUDGET: Duration = Duration::from_secs(20);

/// How long `shutdown` waits for in-flight handlers to drain before giving
/// up and tearing the connector down anyway.
const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// A boxed, `Send` unit of async work that can fail — the shape `parallel`
/// and the metric-observer registry both traffic in.
pub type BoxedTask = Pin<Box<dyn Future<Output = Result<(), Error>> + Send>>;

type LifecycleCallback = Arc<dyn Fn() -> BoxedTask + Send + Sync>;
type TickerCallback = Arc<dyn Fn() -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Created,
    Started,
    Stopped,
}

struct Ticker {
    name: String,
    interval: Duration,
    callback: TickerCallback,
}

struct Inner {
    hostname: String,
    id: String,
    version: RwLock<String>,
    description: RwLock<String>,
    deployment: RwLock<DeploymentMode>,
    config: ConfigStore,
    id_source: Arc<dyn IdSource>,
    bus: Arc<dyn Bus>,
    subscriptions: SubscriptionEngine,

    lifecycle: RwLock<Lifecycle>,
    tickers: RwLock<Vec<Ticker>>,
    on_startup: RwLock<Vec<LifecycleCallback>>,
    on_shutdown: RwLock<Vec<LifecycleCallback>>,
    metric_observers: RwLock<Vec<LifecycleCallback>>,

    running_listeners: RwLock<Vec<JoinHandle<()>>>,
    running_tickers: RwLock<Vec<JoinHandle<()>>>,
    inflight: Arc<AtomicUsize>,
}

/// Per-service runtime. Cheap to clone: clones share the same state.
#[derive(Clone)]
pub struct Connector {
    inner: Arc<Inner>,
}

impl Connector {
    pub fn new(hostname: impl Into<String>, bus: Arc<dyn Bus>) -> Self {
        Connector::with_id_source(hostname, bus, Arc::new(RandomIdSource))
    }

    /// Builds a connector with a caller-supplied id source, so tests can
    /// pin the instance id instead of drawing a random one.
    pub fn with_id_source(hostname: impl Into<String>, bus: Arc<dyn Bus>, id_source: Arc<dyn IdSource>) -> Self {
        let hostname = hostname.into();
        let id = format!("{hostname}-{}", &id_source.next_id()[..8]);

        let config = ConfigStore::new();
        config.define(
            ConfigEntry::new("Port", ValidationRule::parse("int [0,65535]"), "0")
                .with_description("Port this connector's inbound calls are addressed at; 0 matches any port."),
        );
        config.define(
            ConfigEntry::new("TimeBudget", ValidationRule::parse("dur"), "20s")
                .with_description("Default per-call deadline when a Request sets none of its own."),
        );

        let subscriptions = SubscriptionEngine::new(bus.clone(), hostname.clone(), id.clone());

        let connector = Connector {
            inner: Arc::new(Inner {
                hostname,
                id,
                version: RwLock::new("0.0.0".to_owned()),
                description: RwLock::new(String::new()),
                deployment: RwLock::new(DeploymentMode::default()),
                config,
                id_source,
                bus,
                subscriptions,
                lifecycle: RwLock::new(Lifecycle::Created),
                tickers: RwLock::new(Vec::new()),
                on_startup: RwLock::new(Vec::new()),
                on_shutdown: RwLock::new(Vec::new()),
                metric_observers: RwLock::new(Vec::new()),
                running_listeners: RwLock::new(Vec::new()),
                running_tickers: RwLock::new(Vec::new()),
                inflight: Arc::new(AtomicUsize::new(0)),
            }),
        };
        connector.register_openapi_endpoint();
        connector
    }

    // -- identity ---------------------------------------------------------

    pub fn hostname(&self) -> &str {
        &self.inner.hostname
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn version(&self) -> String {
        self.inner.version.read().unwrap().clone()
    }

    pub fn set_version(&self, version: impl Into<String>) {
        *self.inner.version.write().unwrap() = version.into();
    }

    pub fn description(&self) -> String {
        self.inner.description.read().unwrap().clone()
    }

    pub fn set_description(&self, description: impl Into<String>) {
        *self.inner.description.write().unwrap() = description.into();
    }

    pub fn deployment(&self) -> DeploymentMode {
        *self.inner.deployment.read().unwrap()
    }

    pub fn set_deployment(&self, mode: DeploymentMode) {
        *self.inner.deployment.write().unwrap() = mode;
    }

    /// The `Port` config entry's current value, used both as the literal
    /// bus subject port and to resolve `Any`-port subscriptions.
    pub fn port(&self) -> u16 {
        self.inner.config.as_int("Port").unwrap_or(0) as u16
    }

    // -- config -------------------------------------------------------------

    /// Registers an additional config entry. Intended to be called before
    /// `startup`, typically from an `Init`-style setup step.
    pub fn define_config(&self, entry: ConfigEntry) {
        self.inner.config.define(entry);
    }

    pub fn config(&self, name: &str) -> Result<String, Error> {
        self.inner.config.value(name)
    }

    /// `SetConfig`: permitted only in `LOCAL`/`TESTING`, gated by the
    /// connector's own deployment mode.
    pub fn set_config(&self, name: &str, value: impl Into<String>) -> Result<(), Error> {
        self.inner.config.set(name, value, self.deployment())
    }

    pub fn on_config_changed(&self, name: &str, observer: Observer) {
        self.inner.config.on_changed(name, observer);
    }

    // -- subscriptions ------------------------------------------------------

    /// Registers a handler for `method` at `path_spec`, a string of the
    /// form `:port/path` (`:0/...` for any port, trailing `/` for an
    /// open-ended prefix). Returns an unsubscribe handle.
    pub fn subscribe(
        &self,
        method: &str,
        path_spec: &str,
        handler: Arc<dyn Handler>,
        options: SubscriptionOptions,
    ) -> Result<RouteId, Error> {
        let (port, path) = split_port_and_path(path_spec)?;
        let pattern = SubscriptionPattern::parse(method, &self.inner.hostname, &port, &path)?;
        Ok(self.inner.subscriptions.subscribe(pattern, handler, options))
    }

    pub fn unsubscribe(&self, id: RouteId) {
        self.inner.subscriptions.unsubscribe(id);
    }

    fn register_openapi_endpoint(&self) {
        let inner = self.inner.clone();
        let handler = move |_frame: Frame, _body: Vec<u8>| {
            let inner = inner.clone();
            async move {
                // Filtering the document by the requesting port would mean
                // tracking which port each registered route actually serves
                // separately from the trie's own `Any`-port matching; since
                // one connector in this workspace only ever listens on one
                // port, the full document is returned regardless of the
                // port the request arrived on.
                let mut doc = OpenApiDoc::new(inner.hostname.clone(), inner.version.read().unwrap().clone());
                for pattern in inner.subscriptions.registered_patterns() {
                    let path = if pattern.path.segments().is_empty() {
                        "/".to_owned()
                    } else {
                        format!("/{}", pattern.path.segments().join("/"))
                    };
                    let op_id = format!(
                        "{}_{}",
                        pattern.method.to_ascii_lowercase(),
                        path.replace('/', "_")
                    );
                    doc.add_operation(&pattern.method, &path, op_id);
                }
                let body = doc.to_json().unwrap_or_default().into_bytes();
                Response::from(HttpResponse::new(200, body).header("Content-Type", "application/json"))
            }
        };
        let pattern = SubscriptionPattern::parse("GET", &self.inner.hostname, "0", "/openapi.json")
            .expect("built-in pattern is well-formed");
        self.inner
            .subscriptions
            .subscribe(pattern, Arc::new(handler), SubscriptionOptions::default());
    }

    // -- tickers & lifecycle hooks -------------------------------------------

    /// Registers a periodic background task. Deferred like subscriptions
    /// until `startup`; cancelled on `shutdown`.
    pub fn start_ticker<F, Fut>(&self, name: impl Into<String>, interval: Duration, callback: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let callback: TickerCallback = Arc::new(move || Box::pin(callback()));
        self.inner.tickers.write().unwrap().push(Ticker {
            name: name.into(),
            interval,
            callback,
        });
    }

    pub fn on_startup<F, Fut>(&self, callback: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), Error>> + Send + 'static,
    {
        let cb: LifecycleCallback = Arc::new(move || Box::pin(callback()));
        self.inner.on_startup.write().unwrap().push(cb);
    }

    pub fn on_shutdown<F, Fut>(&self, callback: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), Error>> + Send + 'static,
    {
        let cb: LifecycleCallback = Arc::new(move || Box::pin(callback()));
        self.inner.on_shutdown.write().unwrap().push(cb);
    }

    /// Registers a callback invoked by `observe_metrics`, typically driven
    /// by an external metrics scrape.
    pub fn on_observe_metrics<F, Fut>(&self, callback: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), Error>> + Send + 'static,
    {
        let cb: LifecycleCallback = Arc::new(move || Box::pin(callback()));
        self.inner.metric_observers.write().unwrap().push(cb);
    }

    /// Runs every registered metric observer concurrently via `parallel`.
    pub async fn observe_metrics(&self) -> Result<(), Error> {
        let observers = self.inner.metric_observers.read().unwrap().clone();
        let tasks: Vec<BoxedTask> = observers.into_iter().map(|o| o() as BoxedTask).collect();
        self.parallel(tasks).await
    }

    /// Runs `tasks` concurrently, joining any errors into one.
    pub async fn parallel(&self, tasks: Vec<BoxedTask>) -> Result<(), Error> {
        let handles: Vec<_> = tasks.into_iter().map(tokio::spawn).collect();
        let mut errors = Vec::new();
        for handle in handles {
            match handle.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => errors.push(e),
                Err(join_err) => errors.push(Error::new(
                    format!("task panicked: {join_err}"),
                    error_args![500i32],
                )),
            }
        }
        match Error::join(errors) {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    // -- lifecycle ------------------------------------------------------------

    /// Validates config, connects to the bus, issues all deferred
    /// subscriptions and tickers, and invokes `OnStartup` callbacks. Rolls
    /// back everything it started if any step fails partway through.
    pub async fn startup(&self) -> Result<(), Error> {
        {
            let mut lifecycle = self.inner.lifecycle.write().unwrap();
            if *lifecycle != Lifecycle::Created {
                return Err(Error::new("connector has already started", error_args![500i32]));
            }
            *lifecycle = Lifecycle::Started;
        }

        // A route registered with an explicit port listens at that port
        // regardless of this connector's own `Port` config; a route
        // registered `:0/...` (any port) is reachable at whatever port this
        // connector itself is configured to answer on. Each distinct
        // (method, port) pair named by a registered route gets its own bus
        // listener — binding only at `self.port()` would leave every
        // explicit-port route (e.g. `:443/...`) permanently unreachable.
        let default_port = self.port();
        let mut method_ports: HashSet<(String, u16)> = HashSet::new();
        for pattern in self.inner.subscriptions.registered_patterns() {
            let port = match pattern.port {
                PortPattern::Explicit(p) => p,
                PortPattern::Any => default_port,
            };
            method_ports.insert((pattern.method.clone(), port));
        }

        let mut listeners = Vec::new();
        for (method, port) in &method_ports {
            match self.spawn_listener(method, *port).await {
                Ok(handles) => listeners.extend(handles),
                Err(e) => {
                    for h in listeners {
                        h.abort();
                    }
                    *self.inner.lifecycle.write().unwrap() = Lifecycle::Created;
                    return Err(e);
                }
            }
        }
        *self.inner.running_listeners.write().unwrap() = listeners;

        let running_tickers: Vec<JoinHandle<()>> = self
            .inner
            .tickers
            .read()
            .unwrap()
            .iter()
            .map(|t| self.spawn_ticker(t))
            .collect();
        *self.inner.running_tickers.write().unwrap() = running_tickers;

        let callbacks = self.inner.on_startup.read().unwrap().clone();
        for cb in callbacks {
            if let Err(e) = cb().await {
                self.abort_all();
                *self.inner.lifecycle.write().unwrap() = Lifecycle::Created;
                return Err(e);
            }
        }

        info!(hostname = %self.inner.hostname, id = %self.inner.id, port, "connector started");
        Ok(())
    }

    /// Stops accepting new inbound calls, waits up to `grace` for in-flight
    /// handlers to drain, cancels tickers, then invokes `OnShutdown`
    /// callbacks. Shutdown failures are reported but never retried.
    pub async fn shutdown(&self, grace: Duration) -> Result<(), Error> {
        {
            let mut lifecycle = self.inner.lifecycle.write().unwrap();
            if *lifecycle != Lifecycle::Started {
                return Err(Error::new("connector is not running", error_args![500i32]));
            }
            *lifecycle = Lifecycle::Stopped;
        }

        self.abort_all();

        let deadline = tokio::time::Instant::now() + grace;
        while self.inner.inflight.load(Ordering::SeqCst) > 0 && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let remaining = self.inner.inflight.load(Ordering::SeqCst);
        if remaining > 0 {
            warn!(remaining, "shutdown grace period elapsed with handlers still in flight");
        }

        let callbacks = self.inner.on_shutdown.read().unwrap().clone();
        let mut errors = Vec::new();
        for cb in callbacks {
            if let Err(e) = cb().await {
                error!(error = %e, "on_shutdown callback failed");
                errors.push(e);
            }
        }

        info!(hostname = %self.inner.hostname, id = %self.inner.id, "connector stopped");
        match Error::join(errors) {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// `shutdown` with the default 10s grace period.
    pub async fn shutdown_default(&self) -> Result<(), Error> {
        self.shutdown(DEFAULT_SHUTDOWN_GRACE).await
    }

    fn abort_all(&self) {
        for h in self.inner.running_listeners.write().unwrap().drain(..) {
            h.abort();
        }
        for h in self.inner.running_tickers.write().unwrap().drain(..) {
            h.abort();
        }
    }

    async fn spawn_listener(&self, method: &str, port: u16) -> Result<Vec<JoinHandle<()>>, Error> {
        let hostname = self.inner.hostname.clone();
        let unicast = unicast_subject(method, &hostname, port);
        let multicast = multicast_subject(method, &hostname, port);

        let uni_sub = self.inner.bus.subscribe(&unicast, Some(hostname.clone())).await?;
        let multi_sub = self.inner.bus.subscribe(&multicast, None).await?;

        Ok(vec![
            self.spawn_dispatch_loop(method.to_owned(), hostname.clone(), port, uni_sub),
            self.spawn_dispatch_loop(method.to_owned(), hostname, port, multi_sub),
        ])
    }

    /// One task per subscribed subject, reading frames off the bus and
    /// spawning a fresh task per inbound message so concurrent calls don't
    /// wait on one another (the worker-per-message model of the concurrency
    /// design).
    fn spawn_dispatch_loop(
        &self,
        method: String,
        host: String,
        port: u16,
        mut subscription: BusSubscription,
    ) -> JoinHandle<()> {
        let inner = self.inner.clone();
        tokio::spawn(async move {
            while let Some(wire) = subscription.recv().await {
                let (frame, body) = match Frame::from_wire(&wire) {
                    Ok(pair) => pair,
                    Err(e) => {
                        warn!(error = %e, "dropping malformed inbound call");
                        continue;
                    }
                };
                let inner = inner.clone();
                let method = method.clone();
                let host = host.clone();
                inner.inflight.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(async move {
                    inner.subscriptions.dispatch(&method, &host, port, frame, body).await;
                    inner.inflight.fetch_sub(1, Ordering::SeqCst);
                });
            }
        })
    }

    fn spawn_ticker(&self, ticker: &Ticker) -> JoinHandle<()> {
        let callback = ticker.callback.clone();
        let interval = ticker.interval;
        let name = ticker.name.clone();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(interval);
            tick.tick().await; // first tick fires immediately; wait for the real interval
            loop {
                tick.tick().await;
                trace!(ticker = %name, "ticker fired");
                callback().await;
            }
        })
    }

    // -- publication ------------------------------------------------------

    /// Mints a call id, envelopes `request`, and publishes it, returning a
    /// queue the caller drains for replies.
    pub async fn publish(&self, request: Request) -> Result<ResponseQueue, Error> {
        if *self.inner.lifecycle.read().unwrap() != Lifecycle::Started {
            return Err(Error::new("connector is not running", error_args![500i32]));
        }
        let default_budget = self
            .inner
            .config
            .as_duration("TimeBudget")
            .unwrap_or(DEFAULT_TIME_BUDGET);
        let engine = PublicationEngine::new(
            self.inner.bus.clone(),
            self.inner.hostname.clone(),
            self.inner.id.clone(),
            self.inner.id_source.clone(),
            default_budget,
        );
        engine.publish(request).await
    }
}

/// Splits a `:port/path` subscription spec into its port and path parts.
/// `:0/...` and `:*/...` both mean "any port"; the leading colon is
/// mandatory so a bare path can never be mistaken for one missing a port.
fn split_port_and_path(spec: &str) -> Result<(String, String), Error> {
    let rest = spec.strip_prefix(':').ok_or_else(|| {
        Error::new(
            format!("subscription path must start with :port, got {spec}"),
            error_args![500i32],
        )
    })?;
    let (port, path) = rest.split_once('/').unwrap_or((rest, ""));
    Ok((port.to_owned(), format!("/{path}")))
}
