//! # pushbus-server
//!
//! Topic broadcaster registry and the Axum push server in front of it.
//!
//! - `broadcast`: connections, per-topic broadcasters, the registry, whitelist,
//!   subscription binding and event fan-out
//! - `websocket`: frame normalization into uniform inbound requests, and the
//!   per-socket session loop
//! - `http`: long-poll, streaming and WebSocket subscribe plus publish handlers
//! - `context`: the explicitly constructed [`PushContext`] shared by handlers
//! - Health, Prometheus metrics, graceful shutdown

#![deny(unsafe_code)]

pub mod broadcast;
pub mod config;
pub mod context;
pub mod errors;
pub mod health;
pub mod http;
pub mod metrics;
pub mod request;
pub mod server;
pub mod shutdown;
pub mod websocket;

pub use config::{NormalizerConfig, ServerConfig};
pub use context::{DispatchOutcome, PushContext};
pub use errors::{PushError, Result};
pub use server::PushServer;
