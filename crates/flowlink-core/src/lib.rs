// flowlink-core: Dynamic datamodel proxy layer between flowlink-api and consumers.

pub mod cache;
pub mod config;
pub mod error;
pub mod events;
pub mod path;
pub mod proxy;
pub mod session;
pub mod variant;
pub mod workflow;

// ── Primary re-exports ──────────────────────────────────────────────
pub use cache::SchemaCache;
pub use config::{SessionAuth, SessionConfig, TlsVerification};
pub use error::CoreError;
pub use events::{CallbackId, DispatchPayload, DispatcherState, EventDispatcher};
pub use path::{Path, PathSegment};
pub use proxy::{ChildKind, CommandProxy, NamedContainerProxy, NodeAttribute, ObjectProxy};
pub use session::{ConnectionState, Session};
pub use workflow::{Task, Workflow};

// Wire-layer types consumers commonly touch.
pub use flowlink_api::{DatamodelEvent, DatamodelService, EventKind, Variant};
