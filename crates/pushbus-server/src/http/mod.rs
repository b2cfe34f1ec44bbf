//! HTTP handlers.

pub mod push;

pub use push::{publish, subscribe};
