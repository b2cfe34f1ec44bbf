//! # pushbus-core
//!
//! Shared vocabulary for the pushbus topic broadcaster.
//!
//! - **Topics**: validation, path extraction, header parsing, `*` wildcard matching
//! - **Envelope**: the `{"topic", "body"}` wire format and inbound publish resolution
//! - **Events**: `EventDefinition` / `EventMessage` passed between the bus and broadcasters
//! - **IDs**: branded `ConnectionId` / `SessionId` newtypes
//! - **Logging**: `tracing` subscriber setup and log capture for tests

#![deny(unsafe_code)]

pub mod envelope;
pub mod errors;
pub mod events;
pub mod ids;
pub mod logging;
pub mod topic;

pub use envelope::{EventEnvelope, InboundPublish};
pub use errors::{CoreError, Result};
pub use events::{EventDefinition, EventMessage};
pub use ids::{ConnectionId, SessionId};
pub use topic::TopicPattern;
