// ── Event dispatch ──
//
// Consumes the wire-layer broadcast stream and turns raw tagged events
// into domain callbacks. Cache invalidation always runs before callback
// dispatch so a callback that immediately re-reads state never sees the
// pre-event snapshot.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use serde_json::Value;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use flowlink_api::events::{DatamodelEvent, EventKind};

use crate::path::Path;
use crate::proxy::ObjectProxy;
use crate::session::Session;
use crate::variant;

// ── Callback types ───────────────────────────────────────────────────

/// Handle returned by [`EventDispatcher::register`], used to unregister.
pub type CallbackId = u64;

/// A registered event callback. Runs on the dispatcher task; keep it
/// short and hand anything slow to its own task.
pub type EventCallback = dyn Fn(DispatchPayload) + Send + Sync;

/// What a callback receives, already lifted into proxy terms.
#[derive(Clone)]
pub enum DispatchPayload {
    /// A child was created under the tagged node; carries the
    /// materialized child proxy.
    Created {
        child: ObjectProxy,
        child_type: String,
        child_name: String,
    },
    /// The tagged node changed in some non-structural way.
    Touched { owner: ObjectProxy, kind: EventKind },
    /// A command finished at the tagged node.
    CommandExecuted {
        owner: ObjectProxy,
        command: String,
        args: Value,
    },
}

// ── Dispatcher lifecycle ─────────────────────────────────────────────

/// Dispatcher lifecycle, observable by consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatcherState {
    Idle,
    Streaming,
    Stopped,
}

// ── EventDispatcher ──────────────────────────────────────────────────

type Registry = HashMap<(String, String), Vec<(CallbackId, Arc<EventCallback>)>>;

/// Routes datamodel events to callbacks registered per (rules, tag).
///
/// Registration is safe concurrently with dispatch; within one (rules,
/// tag) bucket, callbacks fire in registration order.
pub struct EventDispatcher {
    registry: Mutex<Registry>,
    next_id: AtomicU64,
    state: watch::Sender<DispatcherState>,
}

impl EventDispatcher {
    pub(crate) fn new() -> Self {
        let (state, _) = watch::channel(DispatcherState::Idle);
        Self {
            registry: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            state,
        }
    }

    /// Register a callback for events tagged (rules, wire path).
    pub fn register(
        &self,
        rules: impl Into<String>,
        tag: impl Into<String>,
        callback: impl Fn(DispatchPayload) + Send + Sync + 'static,
    ) -> CallbackId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.lock_registry()
            .entry((rules.into(), tag.into()))
            .or_default()
            .push((id, Arc::new(callback)));
        id
    }

    /// Remove a previously registered callback. Returns whether the id
    /// was still registered.
    pub fn unregister(&self, id: CallbackId) -> bool {
        let mut registry = self.lock_registry();
        let mut removed = false;
        registry.retain(|_, callbacks| {
            let before = callbacks.len();
            callbacks.retain(|(cb_id, _)| *cb_id != id);
            removed |= callbacks.len() != before;
            !callbacks.is_empty()
        });
        removed
    }

    /// Observe the dispatcher lifecycle.
    pub fn state(&self) -> watch::Receiver<DispatcherState> {
        self.state.subscribe()
    }

    /// Spawn the dispatch task over a wire-layer event receiver.
    ///
    /// The dispatcher stays `Idle` until the first event actually arrives;
    /// only then does it report `Streaming`.
    pub(crate) fn start(
        &self,
        session: Session,
        rx: broadcast::Receiver<Arc<DatamodelEvent>>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let state = self.state.clone();
        tokio::spawn(async move {
            dispatch_loop(session, rx, cancel, &state).await;
            let _ = state.send(DispatcherState::Stopped);
        })
    }

    /// Apply one event: cache invalidation first, then callbacks.
    pub(crate) fn handle(&self, session: &Session, event: &DatamodelEvent) {
        session.note_event();

        // State-changing events invalidate the tagged path and its
        // descendants before any callback can observe stale reads.
        // Idempotent, so replays and reorderings are harmless.
        match event.kind {
            EventKind::Created { .. }
            | EventKind::Modified
            | EventKind::Deleted
            | EventKind::Affected => {
                session.cache().invalidate(&event.rules, &event.tag);
            }
            EventKind::AttributeChanged
            | EventKind::CommandAttributeChanged
            | EventKind::CommandExecuted { .. } => {}
        }

        // Clone the bucket out so callbacks never run under the lock.
        let callbacks: Vec<Arc<EventCallback>> = {
            let registry = self.lock_registry();
            registry
                .get(&(event.rules.clone(), event.tag.clone()))
                .map(|bucket| bucket.iter().map(|(_, cb)| Arc::clone(cb)).collect())
                .unwrap_or_default()
        };

        if callbacks.is_empty() {
            return;
        }

        let payload = payload_for(session, event);
        debug!(rules = %event.rules, tag = %event.tag, callbacks = callbacks.len(), "dispatching event");
        for callback in callbacks {
            callback(payload.clone());
        }
    }

    fn lock_registry(&self) -> std::sync::MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// ── Dispatch task ────────────────────────────────────────────────────

async fn dispatch_loop(
    session: Session,
    mut rx: broadcast::Receiver<Arc<DatamodelEvent>>,
    cancel: CancellationToken,
    state: &watch::Sender<DispatcherState>,
) {
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            received = rx.recv() => match received {
                Ok(event) => {
                    if *state.borrow() == DispatcherState::Idle {
                        let _ = state.send(DispatcherState::Streaming);
                    }
                    session.events().handle(&session, &event);
                }
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    // Missed events mean missed invalidations; drop the
                    // whole cache rather than serve stale reads.
                    warn!(missed, "event dispatcher lagged, clearing cache");
                    session.cache().clear();
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }
    debug!("event dispatch loop exiting");
}

// ── Payload construction ─────────────────────────────────────────────

fn payload_for(session: &Session, event: &DatamodelEvent) -> DispatchPayload {
    let rules: Arc<str> = event.rules.as_str().into();
    let owner_path = Path::from_wire(&event.tag);

    match &event.kind {
        EventKind::Created {
            child_type,
            child_name,
        } => {
            let child_path = owner_path.instance(child_type.as_str(), child_name.as_str());
            DispatchPayload::Created {
                child: ObjectProxy::new(session.clone(), rules, child_path),
                child_type: child_type.clone(),
                child_name: child_name.clone(),
            }
        }
        EventKind::CommandExecuted { command, args } => DispatchPayload::CommandExecuted {
            owner: ObjectProxy::new(session.clone(), rules, owner_path),
            command: command.clone(),
            args: variant::decode(args, true),
        },
        kind => DispatchPayload::Touched {
            owner: ObjectProxy::new(session.clone(), rules, owner_path),
            kind: kind.clone(),
        },
    }
}

// ── Tests ────────────────────────────────────────────────────────────
