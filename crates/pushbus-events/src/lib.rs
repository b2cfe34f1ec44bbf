//! # pushbus-events
//!
//! The application event bus that originates "topic + payload" events.
//!
//! - [`EventBus`]: namespace + topic keyed listener table; listeners are
//!   plain closures, topics may be `*` patterns
//! - [`load_definitions`]: read the event definitions that decide which
//!   topics clients may subscribe to

#![deny(unsafe_code)]

pub mod bus;
pub mod definitions;
pub mod errors;

pub use bus::{EventBus, Listener, ListenerId};
pub use definitions::load_definitions;
pub use errors::{EventsError, Result};
