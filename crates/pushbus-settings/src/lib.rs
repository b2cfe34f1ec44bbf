//! # pushbus-settings
//!
//! Configuration for the pushbus gateway, loaded in three layers (lowest
//! priority first):
//! 1. **Compiled defaults**: [`PushbusSettings::default()`]
//! 2. **Settings file**: `~/.pushbus/settings.json`, deep-merged over defaults
//! 3. **Environment**: `PUSHBUS_*` overrides
//!
//! The loaded value is handed to the server explicitly; there is no global
//! settings instance.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::*;
