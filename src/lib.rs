//! Sumo Logger Library
//!
//! This library provides a client-side log shipper that batches enriched
//! log entries and delivers them to an HTTP collector:
//!
//! - **logger**: The engine: configuration, `log`, flushing and reset
//! - **entry**: Input validation and entry enrichment (session, origin, timestamp)
//! - **queue**: Ordered in-memory queue with snapshot acknowledgement
//! - **scheduler**: Immediate or periodic flush scheduling
//! - **transport**: HTTP delivery with routing headers and optional retries
//! - **session**: Session token generation and persistence
//! - **hooks**: Uncaught error capture
//! - **diagnostics**: Sink for misuse warnings
//! - **config**: Logger options and environment-based configuration
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use sumo_logger::{LoggerOptions, SumoLogger};
//!
//! #[tokio::main]
//! async fn main() {
//!     let logger = SumoLogger::builder().build().expect("Failed to build logger");
//!
//!     logger
//!         .config(
//!             LoggerOptions::new("https://collectors.example.com/receiver/v1/http/TOKEN")
//!                 .interval(Duration::from_secs(10))
//!                 .source_name("checkout")
//!                 .on_error(|| eprintln!("delivery failed, will retry")),
//!         )
//!         .expect("Endpoint is set");
//!
//!     logger.log("page loaded").ok();
//!     logger.flush_logs().await;
//! }
//! ```

// Module declarations
pub mod config;
pub mod diagnostics;
pub mod entry;
pub mod hooks;
pub mod logger;
pub mod queue;
pub mod scheduler;
pub mod session;
pub mod transport;

#[cfg(test)]
mod testing;

// Re-export commonly used types at crate root for convenience
pub use config::{Callback, Config, ConfigError, LoggerOptions, TransportConfig};
pub use diagnostics::{CollectingDiagnostics, DiagnosticSink, TracingDiagnostics};
pub use entry::{LogItem, LogMessage, LogOptions, Origin, ValidationError};
pub use hooks::{ErrorHookRegistry, ErrorHooks, PanicHookRegistry, UncaughtError};
pub use logger::{FlushOutcome, LogError, SumoLogger, SumoLoggerBuilder};
pub use queue::QueueStats;
pub use scheduler::FlushMode;
pub use session::{FileSessionStore, MemorySessionStore, SessionStore};
pub use transport::{DeliveryError, DeliveryRequest, HttpTransport, RoutingHeaders, Transport};
