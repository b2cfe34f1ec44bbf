//! Loading event definitions from disk.

use std::path::Path;

use pushbus_core::EventDefinition;
use tracing::debug;

use crate::errors::{EventsError, Result};

/// Read a JSON array of [`EventDefinition`]s from `path`.
pub fn load_definitions(path: &Path) -> Result<Vec<EventDefinition>> {
    let content = std::fs::read_to_string(path).map_err(|source| EventsError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let definitions: Vec<EventDefinition> = serde_json::from_str(&content)?;
    debug!(?path, count = definitions.len(), "event definitions loaded");
    Ok(definitions)
}
