// ── Session abstraction ──
//
// Full lifecycle management for one solver connection: transport
// construction, event-stream startup, schema/state caching, and the
// per-rules proxy roots consumers navigate from.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::WatchStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use flowlink_api::datamodel::{DatamodelClient, DatamodelService};
use flowlink_api::events::{EventStreamHandle, ReconnectConfig, StreamOptions};
use flowlink_api::transport::{TlsMode, TransportConfig};
use flowlink_api::wire::SpecsResponse;
use url::Url;

use crate::cache::SchemaCache;
use crate::config::{SessionAuth, SessionConfig, TlsVerification};
use crate::error::CoreError;
use crate::events::EventDispatcher;
use crate::path::Path;
use crate::proxy::ObjectProxy;
use crate::variant;

// ── ConnectionState ──────────────────────────────────────────────────

/// Connection state observable by consumers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Failed,
}

// ── Session ──────────────────────────────────────────────────────────

/// The main entry point for consumers.
///
/// Cheaply cloneable via `Arc<SessionInner>`. Owns the unary service
/// client, the schema/state cache, the help memo, and — once
/// [`connect()`](Self::connect) runs — the event stream and its
/// dispatcher task.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    config: SessionConfig,
    service: Arc<dyn DatamodelService>,
    cache: SchemaCache,
    /// Help strings memoized per (rules, node class / command). Help is
    /// immutable per class for the life of the session.
    help: DashMap<(String, String), Arc<str>>,
    dispatcher: EventDispatcher,
    connection_state: watch::Sender<ConnectionState>,
    last_event_at: watch::Sender<Option<DateTime<Utc>>>,
    cancel: CancellationToken,
    stream: Mutex<Option<EventStreamHandle>>,
    task_handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Session {
    /// Create a session from configuration. Does NOT connect — call
    /// [`connect()`](Self::connect) to open the event stream and start
    /// background tasks. Unary calls work immediately.
    pub fn new(config: SessionConfig) -> Result<Self, CoreError> {
        let transport = build_transport(&config);
        let client = DatamodelClient::new(config.url.clone(), &transport)?;
        Ok(Self::assemble(config, Arc::new(client)))
    }

    /// Create a session over an arbitrary [`DatamodelService`]
    /// implementation (embedded in-process solvers, test doubles).
    ///
    /// No event stream is opened, so state reads are never cached; see
    /// [`state`](Self::state) for why. A service embedder that feeds
    /// [`deliver_event`](Self::deliver_event) itself can opt back in with
    /// [`with_service_config`](Self::with_service_config) and
    /// `events_enabled: true`.
    pub fn with_service(service: Arc<dyn DatamodelService>) -> Self {
        let config = SessionConfig {
            events_enabled: false,
            ..SessionConfig::default()
        };
        Self::assemble(config, service)
    }

    /// Create a session over an arbitrary service with explicit
    /// configuration. With `events_enabled` set, the caller promises an
    /// invalidation source: either [`connect`](Self::connect) opening the
    /// stream, or the caller driving [`deliver_event`](Self::deliver_event)
    /// for every server-side mutation.
    pub fn with_service_config(service: Arc<dyn DatamodelService>, config: SessionConfig) -> Self {
        Self::assemble(config, service)
    }

    fn assemble(config: SessionConfig, service: Arc<dyn DatamodelService>) -> Self {
        let (connection_state, _) = watch::channel(ConnectionState::Disconnected);
        let (last_event_at, _) = watch::channel(None);

        Self {
            inner: Arc::new(SessionInner {
                config,
                service,
                cache: SchemaCache::new(),
                help: DashMap::new(),
                dispatcher: EventDispatcher::new(),
                connection_state,
                last_event_at,
                cancel: CancellationToken::new(),
                stream: Mutex::new(None),
                task_handles: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Access the session configuration.
    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    /// The underlying unary service.
    pub fn service(&self) -> &Arc<dyn DatamodelService> {
        &self.inner.service
    }

    /// The schema/state cache.
    pub fn cache(&self) -> &SchemaCache {
        &self.inner.cache
    }

    /// The event dispatcher (callback registration).
    pub fn events(&self) -> &EventDispatcher {
        &self.inner.dispatcher
    }

    /// Apply one datamodel event as if it had arrived on the stream:
    /// cache invalidation, then callback dispatch. Embedders driving
    /// their own event source feed it through here.
    pub fn deliver_event(&self, event: &flowlink_api::DatamodelEvent) {
        self.inner.dispatcher.handle(self, event);
    }

    // ── Connection lifecycle ─────────────────────────────────────────

    /// Connect to the solver.
    ///
    /// Opens the datamodel event stream (if enabled) and spawns the
    /// dispatcher task that keeps the cache coherent and fans events out
    /// to registered callbacks.
    pub async fn connect(&self) -> Result<(), CoreError> {
        let _ = self
            .inner
            .connection_state
            .send(ConnectionState::Connecting);

        if self.inner.config.events_enabled {
            let ws_url = match event_stream_url(&self.inner.config.url) {
                Ok(url) => url,
                Err(e) => {
                    let _ = self.inner.connection_state.send(ConnectionState::Failed);
                    return Err(e);
                }
            };
            let options = StreamOptions {
                no_commands_diff_state: self.inner.config.no_commands_diff_state,
            };
            let token = match &self.inner.config.auth {
                SessionAuth::Token(token) => {
                    use secrecy::ExposeSecret;
                    Some(token.expose_secret().to_owned())
                }
                SessionAuth::None => None,
            };

            let mut handle = EventStreamHandle::connect(
                ws_url,
                options,
                ReconnectConfig::default(),
                self.inner.cancel.clone(),
                token,
            );

            let rx = handle.subscribe();
            let mut handles = self.inner.task_handles.lock().await;
            // The stream task joins in disconnect() alongside the
            // dispatcher, so teardown only returns once both have exited.
            if let Some(task) = handle.take_task() {
                handles.push(task);
            }
            let session = self.clone();
            let cancel = self.inner.cancel.clone();
            handles.push(self.inner.dispatcher.start(session, rx, cancel));
            drop(handles);
            *self.inner.stream.lock().await = Some(handle);
        }

        let _ = self.inner.connection_state.send(ConnectionState::Connected);
        info!(url = %self.inner.config.url, "session connected");
        Ok(())
    }

    /// Disconnect from the solver.
    ///
    /// Cancels background tasks, tears down the event stream, clears the
    /// caches, and resets the state to
    /// [`Disconnected`](ConnectionState::Disconnected).
    pub async fn disconnect(&self) {
        self.inner.cancel.cancel();

        if let Some(stream) = self.inner.stream.lock().await.take() {
            stream.shutdown();
        }

        let mut handles = self.inner.task_handles.lock().await;
        for handle in handles.drain(..) {
            let _ = handle.await;
        }

        self.inner.cache.clear();
        self.inner.help.clear();
        let _ = self
            .inner
            .connection_state
            .send(ConnectionState::Disconnected);
        debug!("session disconnected");
    }

    // ── State observation ────────────────────────────────────────────

    /// Subscribe to connection state changes.
    pub fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.connection_state.subscribe()
    }

    /// Connection state changes as a `Stream`, for select-loop consumers.
    pub fn connection_state_stream(&self) -> WatchStream<ConnectionState> {
        WatchStream::new(self.connection_state())
    }

    /// When the most recent datamodel event arrived, if any.
    pub fn last_event_at(&self) -> Option<DateTime<Utc>> {
        *self.inner.last_event_at.borrow()
    }

    pub(crate) fn note_event(&self) {
        let _ = self.inner.last_event_at.send(Some(Utc::now()));
    }

    // ── Datamodel navigation ─────────────────────────────────────────

    /// The root proxy of a rules namespace. Purely local; the first
    /// remote call happens on first navigation.
    pub fn root(&self, rules: impl Into<String>) -> ObjectProxy {
        let rules: Arc<str> = rules.into().into();
        ObjectProxy::new(self.clone(), rules, Path::root())
    }

    /// Initialize a rules namespace on the solver.
    ///
    /// Required once per namespace on some deployments before specs are
    /// queryable; a fresh namespace invalidates everything cached.
    pub async fn initialize(&self, rules: &str) -> Result<(), CoreError> {
        self.inner.service.initialize_datamodel(rules).await?;
        self.inner.cache.invalidate_rules(rules);
        Ok(())
    }

    // ── Cached schema/state access (used by the proxies) ─────────────

    /// Specs for a node, served from cache when possible.
    ///
    /// Unlike state, specs stay cached even without an event stream: the
    /// schema only changes on structural mutations, and this session's own
    /// mutations invalidate locally.
    pub(crate) async fn specs(
        &self,
        rules: &str,
        path: &Path,
    ) -> Result<Arc<SpecsResponse>, CoreError> {
        let wire = path.to_wire();
        if let Some(hit) = self.inner.cache.specs(rules, &wire) {
            return Ok(hit);
        }

        let specs = Arc::new(self.inner.service.get_specs(rules, &wire).await?);
        self.inner.cache.store_specs(rules, &wire, Arc::clone(&specs));
        Ok(specs)
    }

    /// Decoded state for a node, served from cache when possible.
    ///
    /// State caching is only coherent when events drive invalidation: the
    /// solver mutates state out of band (iterations, commands), and with no
    /// stream every cached entry would be a permanently stale snapshot. A
    /// session without events therefore reads state straight through.
    pub(crate) async fn state(&self, rules: &str, path: &Path) -> Result<Value, CoreError> {
        let wire = path.to_wire();
        let caching = self.inner.config.events_enabled;

        if caching {
            if let Some(hit) = self.inner.cache.state(rules, &wire) {
                return Ok(hit);
            }
        }

        let raw = self.inner.service.get_state(rules, &wire).await?;
        let state = variant::decode(&raw, true);
        if caching {
            self.inner.cache.store_state(rules, &wire, state.clone());
        }
        Ok(state)
    }

    /// Memoized per-class help. Racing fetches at worst duplicate one
    /// RPC; the result is identical either way.
    pub(crate) async fn node_help(
        &self,
        rules: &str,
        class: &str,
        path: &Path,
    ) -> Result<Arc<str>, CoreError> {
        let key = (rules.to_owned(), class.to_owned());
        if let Some(hit) = self.inner.help.get(&key) {
            return Ok(Arc::clone(&hit));
        }

        let specs = self.specs(rules, path).await?;
        let help: Arc<str> = specs.common_help().unwrap_or_default().into();
        self.inner.help.insert(key, Arc::clone(&help));
        Ok(help)
    }

    /// Memoized command help, keyed separately from node help.
    pub(crate) async fn command_help(
        &self,
        rules: &str,
        path: &Path,
        command: &str,
    ) -> Result<Arc<str>, CoreError> {
        let class = path.last().map_or("", |seg| seg.component.as_str());
        let key = (rules.to_owned(), format!("{class}/{command}"));
        if let Some(hit) = self.inner.help.get(&key) {
            return Ok(Arc::clone(&hit));
        }

        let specs = self.specs(rules, path).await?;
        let help: Arc<str> = specs
            .struct_specs()
            .and_then(|st| st.commands.iter().find(|c| c.name == command))
            .and_then(|c| c.help.as_deref())
            .unwrap_or_default()
            .into();
        self.inner.help.insert(key, Arc::clone(&help));
        Ok(help)
    }
}

// ── Helpers ──────────────────────────────────────────────────────────

/// Build a [`TransportConfig`] from the session configuration.
fn build_transport(config: &SessionConfig) -> TransportConfig {
    let transport = TransportConfig {
        tls: tls_to_transport(&config.tls),
        timeout: config.timeout,
        session_token: None,
    };
    match &config.auth {
        SessionAuth::Token(token) => transport.with_session_token(token.clone()),
        SessionAuth::None => transport,
    }
}

fn tls_to_transport(tls: &TlsVerification) -> TlsMode {
    match tls {
        TlsVerification::SystemDefaults => TlsMode::System,
        TlsVerification::CustomCa(path) => TlsMode::CustomCa(path.clone()),
        TlsVerification::DangerAcceptInvalid => TlsMode::DangerAcceptInvalid,
    }
}

/// Derive the event WebSocket URL from the unary base URL.
fn event_stream_url(base: &Url) -> Result<Url, CoreError> {
    let mut url = base.clone();
    let scheme = match url.scheme() {
        "https" => "wss",
        "http" => "ws",
        other => {
            return Err(CoreError::Config {
                message: format!("unsupported URL scheme '{other}'"),
            });
        }
    };
    url.set_scheme(scheme).map_err(|()| CoreError::Config {
        message: "solver URL cannot carry a WebSocket scheme".into(),
    })?;
    url.set_path("/datamodel/v1/events");
    Ok(url)
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn event_stream_url_upgrades_scheme() {
        let https = Url::parse("https://solver-host:63084").unwrap();
        assert_eq!(
            event_stream_url(&https).unwrap().as_str(),
            "wss://solver-host:63084/datamodel/v1/events"
        );

        let http = Url::parse("http://127.0.0.1:8080/ignored").unwrap();
        assert_eq!(
            event_stream_url(&http).unwrap().as_str(),
            "ws://127.0.0.1:8080/datamodel/v1/events"
        );
    }

    #[test]
    fn event_stream_url_rejects_unknown_scheme() {
        let ftp = Url::parse("ftp://host").unwrap();
        assert!(matches!(
            event_stream_url(&ftp),
            Err(CoreError::Config { .. })
        ));
    }

    #[test]
    fn new_session_starts_disconnected() {
        let session = Session::new(SessionConfig::default()).unwrap();
        assert_eq!(
            *session.connection_state().borrow(),
            ConnectionState::Disconnected
        );
        assert!(session.last_event_at().is_none());
    }
}
