// flowlink-api: Async Rust client for the solver's StateEngine datamodel service.

pub mod datamodel;
pub mod error;
pub mod events;
pub mod transport;
pub mod wire;

pub use datamodel::{DatamodelClient, DatamodelService};
pub use error::Error;
pub use events::{DatamodelEvent, EventKind, EventStreamHandle, ReconnectConfig, StreamOptions};
pub use wire::{CommandSpec, SpecsResponse, StructSpecs, Variant};
