//! Sumo Logger - ships lines from standard input to an HTTP collector
//!
//! Every line read from stdin becomes one log call: lines holding JSON are
//! logged as structured values, anything else as a text message. Entries are
//! batched by the logger and delivered on its flush schedule.
//!
//! ## Features
//!
//! - Immediate or interval-based batch delivery
//! - Session, origin and timestamp enrichment of every entry
//! - Optional capture of panics as log entries
//! - Final flush on EOF or SIGINT
//!
//! ## Configuration
//!
//! Configuration is loaded from environment variables (see `Config`):
//!
//! - `SUMO_LOGGER_ENDPOINT`: Collector URL (required)
//! - `SUMO_LOGGER_INTERVAL_MS`: Milliseconds between flushes, 0 flushes per line (default: 0)
//! - `SUMO_LOGGER_SESSION_FILE`: File persisting the session token across runs
//! - `RUST_LOG`: Logging level filter (default: info)

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use sumo_logger::config::Config;
use sumo_logger::entry::{LogMessage, Origin};
use sumo_logger::logger::{FlushOutcome, SumoLogger};
use sumo_logger::session::FileSessionStore;

/// Upper bound on the final flush at shutdown
const SHUTDOWN_FLUSH_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() {
    // Initialize tracing subscriber with environment filter
    init_tracing();

    info!("Starting Sumo Logger...");

    // Load configuration from environment
    let config = match Config::from_env() {
        Ok(config) => {
            info!(
                interval_ms = config.interval.as_millis() as u64,
                max_retries = config.transport.max_retries,
                send_errors = config.send_errors,
                "Configuration loaded"
            );
            config
        }
        Err(e) => {
            error!(error = %e, "Failed to load configuration");
            std::process::exit(1);
        }
    };

    let logger = match build_logger(&config) {
        Ok(logger) => logger,
        Err(e) => {
            error!(error = %e, "Failed to create logger");
            std::process::exit(1);
        }
    };

    if let Err(e) = logger.config(config.logger_options()) {
        error!(error = %e, "Set SUMO_LOGGER_ENDPOINT to the collector URL");
        std::process::exit(1);
    }

    info!(session = ?logger.session(), "Reading log lines from stdin. Press Ctrl+C to stop.");

    tokio::select! {
        lines = read_stdin(&logger) => {
            info!(lines = lines, "Reached end of input");
        }
        signal = tokio::signal::ctrl_c() => {
            match signal {
                Ok(()) => info!("Shutdown signal received, stopping..."),
                Err(e) => error!(error = %e, "Failed to listen for shutdown signal"),
            }
        }
    }

    // Deliver whatever is still queued (with timeout)
    info!("Initiating graceful shutdown...");
    match tokio::time::timeout(SHUTDOWN_FLUSH_TIMEOUT, logger.flush_logs()).await {
        Ok(FlushOutcome::Delivered(n)) => info!(entries = n, "Final batch delivered"),
        Ok(FlushOutcome::Empty) => debug!("Nothing left to deliver"),
        Ok(FlushOutcome::NotConfigured) => warn!("Logger lost its configuration before shutdown"),
        Ok(FlushOutcome::Failed(e)) => {
            warn!(error = %e, remaining = logger.current_logs().len(), "Final batch not delivered")
        }
        Err(_) => warn!("Final flush timed out after {:?}", SHUTDOWN_FLUSH_TIMEOUT),
    }

    match serde_json::to_string(&logger.queue_stats()) {
        Ok(stats) => info!(stats = %stats, "Sumo Logger stopped"),
        Err(_) => info!("Sumo Logger stopped"),
    }

    // A blocked stdin read would otherwise keep the runtime from shutting down
    std::process::exit(0);
}

/// Initialize the tracing subscriber with environment-based filtering.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();
}

fn build_logger(config: &Config) -> Result<SumoLogger, sumo_logger::DeliveryError> {
    let mut builder = SumoLogger::builder().transport_config(config.transport.clone());

    if let Some(path) = &config.session_file {
        builder = builder.session_store(Arc::new(FileSessionStore::new(path.clone())));
    }
    if let Some(origin) = &config.origin {
        builder = builder.origin(Origin::new(origin));
    }
    if let Some(max) = config.max_queue_entries {
        builder = builder.max_queue_entries(max);
    }

    builder.build()
}

/// Log every stdin line until EOF. Returns the number of lines logged.
async fn read_stdin(logger: &SumoLogger) -> u64 {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut logged: u64 = 0;

    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let Some(message) = parse_line(&line) else {
                    continue;
                };
                if logger.log(message).is_ok() {
                    logged += 1;
                }
            }
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, "Failed to read from stdin, stopping");
                break;
            }
        }
    }

    logged
}

/// Turn one input line into a log message. Blank lines are skipped.
fn parse_line(line: &str) -> Option<LogMessage> {
    let line = line.trim_end_matches('\r');
    if line.trim().is_empty() {
        return None;
    }

    match serde_json::from_str::<Value>(line) {
        Ok(value @ (Value::Object(_) | Value::Array(_))) => Some(value.into()),
        _ => Some(line.into()),
    }
}
