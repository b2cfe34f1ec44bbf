//! # pushbus-gateway
//!
//! Push gateway binary: loads settings and event definitions, then runs the
//! long-poll / streaming / WebSocket push server until Ctrl-C or SIGTERM.

#![deny(unsafe_code)]

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use pushbus_core::EventDefinition;
use pushbus_core::logging::{LogFormat, init_subscriber};
use pushbus_events::{EventsError, load_definitions};
use pushbus_server::shutdown::shutdown_signal;
use pushbus_server::{PushServer, ServerConfig};
use pushbus_settings::{EventSettings, LogLevel, PushbusSettings};

/// Topic push gateway.
#[derive(Parser, Debug)]
#[command(name = "pushbus-gateway", about = "Topic push gateway")]
struct Cli {
    /// Settings file (default `~/.pushbus/settings.json`).
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind (overrides settings; 0 for auto-assign).
    #[arg(long)]
    port: Option<u16>,

    /// Event definitions file (overrides settings).
    #[arg(long)]
    events: Option<PathBuf>,

    /// Log level: trace, debug, info, warn, error.
    #[arg(long)]
    log_level: Option<String>,

    /// Emit JSON log lines.
    #[arg(long)]
    json_logs: bool,
}

impl Cli {
    /// Apply command-line overrides, which beat both file and environment.
    fn apply(&self, settings: &mut PushbusSettings) -> Result<()> {
        if let Some(host) = &self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(events) = &self.events {
            settings.events.definitions_file = Some(events.to_string_lossy().into_owned());
        }
        if let Some(level) = &self.log_level {
            settings.logging.level = LogLevel::parse(level)
                .with_context(|| format!("invalid log level: {level}"))?;
        }
        if self.json_logs {
            settings.logging.json = true;
        }
        Ok(())
    }
}

/// Inline definitions first, then those from the definitions file.
fn collect_definitions(events: &EventSettings) -> std::result::Result<Vec<EventDefinition>, EventsError> {
    let mut definitions = events.definitions.clone();
    if let Some(file) = &events.definitions_file {
        definitions.extend(load_definitions(Path::new(file))?);
    }
    Ok(definitions)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    let settings_path = args
        .settings
        .clone()
        .unwrap_or_else(pushbus_settings::settings_path);
    let mut settings = pushbus_settings::load_settings_from_path(&settings_path)
        .with_context(|| format!("Failed to load settings from {}", settings_path.display()))?;
    args.apply(&mut settings)?;

    let format: LogFormat = settings.logging.format();
    init_subscriber(settings.logging.level.as_filter_str(), format);

    let metrics = match pushbus_server::metrics::install_recorder() {
        Ok(handle) => Some(handle),
        Err(e) => {
            tracing::warn!(error = %e, "metrics recorder unavailable, /metrics disabled");
            None
        }
    };

    let definitions = collect_definitions(&settings.events);
    let config = ServerConfig::from_settings(&settings);
    let server = PushServer::new(config, definitions, metrics);
    let (addr, handle) = server
        .listen()
        .await
        .context("Failed to bind push server")?;
    tracing::info!(%addr, "pushbus gateway ready");

    shutdown_signal().await;
    server
        .shutdown()
        .graceful_shutdown(vec![handle], Some(Duration::from_secs(10)))
        .await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_defaults_leave_settings_alone() {
        let cli = Cli::parse_from(["pushbus-gateway"]);
        let mut settings = PushbusSettings::default();
        cli.apply(&mut settings).unwrap();
        assert_eq!(settings.server.host, "127.0.0.1");
        assert_eq!(settings.server.port, 8765);
        assert!(!settings.logging.json);
    }

    #[test]
    fn cli_overrides_settings() {
        let cli = Cli::parse_from([
            "pushbus-gateway",
            "--host",
            "0.0.0.0",
            "--port",
            "9000",
            "--events",
            "/etc/pushbus/events.json",
            "--log-level",
            "DEBUG",
            "--json-logs",
        ]);
        let mut settings = PushbusSettings::default();
        cli.apply(&mut settings).unwrap();
        assert_eq!(settings.server.host, "0.0.0.0");
        assert_eq!(settings.server.port, 9000);
        assert_eq!(
            settings.events.definitions_file.as_deref(),
            Some("/etc/pushbus/events.json")
        );
        assert_eq!(settings.logging.level, LogLevel::Debug);
        assert_eq!(settings.logging.format(), LogFormat::Json);
    }

    #[test]
    fn cli_rejects_unknown_log_level() {
        let cli = Cli::parse_from(["pushbus-gateway", "--log-level", "loud"]);
        assert!(cli.apply(&mut PushbusSettings::default()).is_err());
    }

    #[test]
    fn definitions_merge_inline_and_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.json");
        std::fs::write(
            &path,
            r#"[{"namespace": "browser", "topic": "chat.*", "browser": true}]"#,
        )
        .unwrap();

        let events = EventSettings {
            definitions_file: Some(path.to_string_lossy().into_owned()),
            definitions: vec![EventDefinition::new("browser", "news").with_browser(true)],
        };
        let defs = collect_definitions(&events).unwrap();
        let topics: Vec<_> = defs.iter().map(|d| d.topic.as_str()).collect();
        assert_eq!(topics, vec!["news", "chat.*"]);
    }

    #[test]
    fn missing_definitions_file_is_an_error() {
        let events = EventSettings {
            definitions_file: Some("/nonexistent/events.json".into()),
            definitions: Vec::new(),
        };
        assert!(matches!(
            collect_definitions(&events),
            Err(EventsError::Io { .. })
        ));
    }

    #[test]
    fn no_file_means_inline_only() {
        let defs = collect_definitions(&EventSettings::default()).unwrap();
        assert!(defs.is_empty());
    }
}
