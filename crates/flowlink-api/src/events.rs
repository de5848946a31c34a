//! Server-streaming datamodel events with auto-reconnect.
//!
//! Connects to the solver's event WebSocket and streams parsed
//! [`DatamodelEvent`]s through a [`tokio::sync::broadcast`] channel.
//! Reconnection uses exponential backoff + jitter.
//!
//! # Example
//!
//! ```rust,ignore
//! use flowlink_api::events::{EventStreamHandle, ReconnectConfig, StreamOptions};
//! use tokio_util::sync::CancellationToken;
//! use url::Url;
//!
//! let cancel = CancellationToken::new();
//! let ws_url = Url::parse("wss://solver-host:63084/datamodel/v1/events")?;
//!
//! let handle = EventStreamHandle::connect(
//!     ws_url, StreamOptions::default(), ReconnectConfig::default(), cancel.clone(), None,
//! );
//! let mut rx = handle.subscribe();
//!
//! while let Ok(event) = rx.recv().await {
//!     println!("{} {:?}", event.tag, event.kind);
//! }
//!
//! handle.shutdown();
//! ```

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio_tungstenite::tungstenite::{self, ClientRequestBuilder};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::error::Error;
use crate::wire::Variant;

// ── Broadcast channel capacity ───────────────────────────────────────

const EVENT_CHANNEL_CAPACITY: usize = 1024;

// ── DatamodelEvent ───────────────────────────────────────────────────

/// One change notification from the solver's datamodel stream.
///
/// Events arrive out of band with in-flight unary calls; within one stream
/// they preserve the order the server emitted them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatamodelEvent {
    /// Rules namespace the event belongs to (`"workflow"`, `"meshing"`, ...).
    pub rules: String,

    /// Wire path the event is tagged with (`"/Setup/Inlet:cold"`).
    pub tag: String,

    /// What happened at the tagged path.
    #[serde(flatten)]
    pub kind: EventKind,
}

/// Event discriminant plus kind-specific payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum EventKind {
    /// A named-object child was created under the tagged path.
    #[serde(rename_all = "camelCase")]
    Created { child_type: String, child_name: String },

    /// The tagged node's state changed.
    Modified,

    /// The tagged node was deleted.
    Deleted,

    /// The tagged node was indirectly affected (e.g. by solver iterations).
    Affected,

    /// An attribute of the tagged node changed.
    AttributeChanged,

    /// An attribute of a command on the tagged node changed.
    CommandAttributeChanged,

    /// A command finished executing at the tagged path.
    #[serde(rename_all = "camelCase")]
    CommandExecuted {
        command: String,
        #[serde(default)]
        args: Variant,
    },
}

// ── StreamOptions ────────────────────────────────────────────────────

/// Subscription filters applied when opening the stream.
#[derive(Debug, Clone, Default)]
pub struct StreamOptions {
    /// Suppress command-executed and command-attribute events; the solver
    /// then sends diff-state notifications only.
    pub no_commands_diff_state: bool,
}

impl StreamOptions {
    /// Apply the filters to the WebSocket URL as query parameters.
    fn apply(&self, url: &Url) -> Url {
        let mut url = url.clone();
        if self.no_commands_diff_state {
            url.query_pairs_mut()
                .append_pair("noCommandsDiffState", "true");
        }
        url
    }
}

// ── ReconnectConfig ──────────────────────────────────────────────────

/// Exponential backoff configuration for stream reconnection.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay before the first reconnection attempt. Default: 1s.
    pub initial_delay: Duration,

    /// Upper bound on backoff delay. Default: 30s.
    pub max_delay: Duration,

    /// Maximum reconnection attempts before giving up.
    /// `None` means retry forever.
    pub max_retries: Option<u32>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            max_retries: None,
        }
    }
}

// ── EventStreamHandle ────────────────────────────────────────────────

/// Handle to a running datamodel event stream.
///
/// Drop all receivers and call [`shutdown`](Self::shutdown) to tear down
/// the background task.
pub struct EventStreamHandle {
    event_rx: broadcast::Receiver<Arc<DatamodelEvent>>,
    cancel: CancellationToken,
    task: Option<tokio::task::JoinHandle<()>>,
}

impl EventStreamHandle {
    /// Open the event stream and spawn the reconnection loop.
    ///
    /// Returns once the background task is spawned; the first connection
    /// attempt happens asynchronously. Subscribe to start consuming.
    pub fn connect(
        ws_url: Url,
        options: StreamOptions,
        reconnect: ReconnectConfig,
        cancel: CancellationToken,
        session_token: Option<String>,
    ) -> Self {
        let (event_tx, event_rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let url = options.apply(&ws_url);

        let task_cancel = cancel.clone();
        let task = tokio::spawn(async move {
            stream_loop(url, event_tx, reconnect, task_cancel, session_token).await;
        });

        Self {
            event_rx,
            cancel,
            task: Some(task),
        }
    }

    /// Get a new broadcast receiver for the event stream.
    ///
    /// Multiple consumers can subscribe concurrently. A consumer that falls
    /// behind receives [`broadcast::error::RecvError::Lagged`].
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<DatamodelEvent>> {
        self.event_rx.resubscribe()
    }

    /// Signal the background task to shut down gracefully.
    ///
    /// Cancellation alone does not wait for the task; take the handle via
    /// [`take_task`](Self::take_task) and await it for join semantics.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Take the background task's join handle. `None` after the first call.
    pub fn take_task(&mut self) -> Option<tokio::task::JoinHandle<()>> {
        self.task.take()
    }
}

// ── Background reconnection loop ─────────────────────────────────────

/// Main loop: connect → read → on error, backoff → reconnect.
async fn stream_loop(
    ws_url: Url,
    event_tx: broadcast::Sender<Arc<DatamodelEvent>>,
    reconnect: ReconnectConfig,
    cancel: CancellationToken,
    session_token: Option<String>,
) {
    let mut attempt: u32 = 0;

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            result = connect_and_read(&ws_url, &event_tx, &cancel, session_token.as_deref()) => {
                match result {
                    // Clean disconnect (server close frame or stream ended).
                    // Reset attempt counter and reconnect immediately.
                    Ok(()) => {
                        tracing::info!("event stream disconnected cleanly, reconnecting");
                        attempt = 0;
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, attempt, "event stream error");

                        if let Some(max) = reconnect.max_retries {
                            if attempt >= max {
                                tracing::error!(
                                    max_retries = max,
                                    "event stream reconnection limit reached, giving up"
                                );
                                break;
                            }
                        }

                        let delay = calculate_backoff(attempt, &reconnect);
                        tracing::info!(
                            delay_ms = delay.as_millis() as u64,
                            attempt,
                            "waiting before reconnect"
                        );

                        tokio::select! {
                            biased;
                            _ = cancel.cancelled() => break,
                            _ = tokio::time::sleep(delay) => {}
                        }

                        attempt += 1;
                    }
                }
            }
        }
    }

    tracing::debug!("event stream loop exiting");
}

// ── Single connection lifecycle ──────────────────────────────────────

/// Establish one WebSocket connection, read messages until it drops.
///
/// If `session_token` is provided it is injected as an `X-Session-Token`
/// header on the upgrade request.
async fn connect_and_read(
    url: &Url,
    event_tx: &broadcast::Sender<Arc<DatamodelEvent>>,
    cancel: &CancellationToken,
    session_token: Option<&str>,
) -> Result<(), Error> {
    tracing::info!(url = %url, "connecting to event stream");

    let uri: tungstenite::http::Uri = url
        .as_str()
        .parse()
        .map_err(|e: tungstenite::http::uri::InvalidUri| Error::StreamConnect(e.to_string()))?;

    let mut request = ClientRequestBuilder::new(uri);
    if let Some(token) = session_token {
        request = request.with_header("X-Session-Token", token);
    }

    let (ws_stream, _response) = tokio_tungstenite::connect_async(request)
        .await
        .map_err(|e| Error::StreamConnect(e.to_string()))?;

    tracing::info!("event stream connected");

    let (_write, mut read) = ws_stream.split();

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(()),
            frame = read.next() => {
                match frame {
                    Some(Ok(tungstenite::Message::Text(text))) => {
                        parse_and_broadcast(&text, event_tx);
                    }
                    Some(Ok(tungstenite::Message::Ping(_))) => {
                        // tungstenite replies with pongs automatically
                        tracing::trace!("event stream ping");
                    }
                    Some(Ok(tungstenite::Message::Close(frame))) => {
                        if let Some(ref cf) = frame {
                            tracing::info!(
                                code = %cf.code,
                                reason = %cf.reason,
                                "event stream close frame received"
                            );
                        } else {
                            tracing::info!("event stream close frame received (no payload)");
                        }
                        return Ok(());
                    }
                    Some(Err(e)) => {
                        return Err(Error::StreamConnect(e.to_string()));
                    }
                    None => {
                        // Stream ended without a close frame
                        tracing::info!("event stream ended");
                        return Ok(());
                    }
                    _ => {
                        // Binary, Pong, Frame -- ignore
                    }
                }
            }
        }
    }
}

// ── Message parsing ──────────────────────────────────────────────────

/// One WebSocket frame from the solver: a batch of tagged events.
#[derive(Debug, Deserialize)]
struct EventEnvelope {
    #[serde(default)]
    events: Vec<serde_json::Value>,
}

/// Parse a text frame and broadcast every event it carries.
///
/// Frames that fail to parse are logged and skipped — one malformed event
/// must not tear down the stream.
fn parse_and_broadcast(text: &str, event_tx: &broadcast::Sender<Arc<DatamodelEvent>>) {
    let envelope: EventEnvelope = match serde_json::from_str(text) {
        Ok(e) => e,
        Err(e) => {
            tracing::debug!(error = %e, "failed to parse event envelope");
            return;
        }
    };

    for raw in envelope.events {
        match serde_json::from_value::<DatamodelEvent>(raw) {
            Ok(event) => {
                // Send errors just mean no active subscribers right now
                let _ = event_tx.send(Arc::new(event));
            }
            Err(e) => {
                tracing::debug!(error = %e, "skipping undecodable event");
            }
        }
    }
}

// ── Backoff calculation ──────────────────────────────────────────────

/// Exponential backoff with jitter.
///
/// `delay = min(initial * 2^attempt, max) + jitter`
///
/// Jitter is +-25% to spread out reconnection storms from multiple clients.
fn calculate_backoff(attempt: u32, config: &ReconnectConfig) -> Duration {
    let base = config.initial_delay.as_secs_f64() * 2.0_f64.powi(attempt as i32);
    let capped = base.min(config.max_delay.as_secs_f64());

    // Deterministic "jitter" seeded from the attempt number.
    // Not cryptographically random, but good enough for backoff spread.
    let jitter_factor = 1.0 + 0.25 * ((attempt as f64 * 7.3).sin());
    let with_jitter = (capped * jitter_factor).max(0.0);

    Duration::from_secs_f64(with_jitter)
}

// ── Tests ────────────────────────────────────────────────────────────
