//! The batching-and-delivery engine.
//!
//! A [`SumoLogger`] is configured once, accepts `log` calls, and delivers
//! the queued entries in batches. Delivery failures never drop entries:
//! they stay queued and go out with the next flush.
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
//!                 .interval(Duration::from_secs(5))
//!                 .source_category("prod/web"),
//!         )
//!         .ok();
//!
//!     logger.log("user signed in").ok();
//!     logger.log(serde_json::json!({"event": "checkout", "items": 3})).ok();
//!
//!     logger.flush_logs().await;
//! }
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use tokio::runtime::Handle;
use tracing::{debug, info, warn};

use crate::config::{Callback, ConfigError, LoggerOptions, TransportConfig};
use crate::diagnostics::{DiagnosticSink, TracingDiagnostics};
use crate::entry::{Enricher, LogMessage, LogOptions, Origin, ValidationError};
use crate::hooks::{UncaughtError, UncaughtErrorHandler};
use crate::queue::{LogQueue, QueueStats};
use crate::scheduler::{FlushMode, FlushScheduler};
use crate::session::{MemorySessionStore, SessionIdentity, SessionStore};
use crate::transport::{DeliveryError, DeliveryRequest, HttpTransport, RoutingHeaders, Transport};

const MISSING_ENDPOINT: &str = "Sumo Logic Logger requires you to set an endpoint.";
const NOT_CONFIGURED: &str =
    "Sumo Logic Logger requires you to set an endpoint before pushing logs.";
const MISSING_VALUE: &str = "Sumo Logic Logger requires that you pass a value to log.";
const EMPTY_OBJECT: &str =
    "Sumo Logic Logger requires that you pass a non-empty JSON object to log.";
const INTERVAL_TOO_LONG: &str = "Sumo Logic Logger requires an interval of at most one hour.";

/// Why a log call was not accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogError {
    /// `config` has not succeeded since creation or the last reset
    NotConfigured,

    /// The input was rejected
    Invalid(ValidationError),
}

impl std::fmt::Display for LogError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogError::NotConfigured => write!(f, "Logger is not configured with an endpoint"),
            LogError::Invalid(e) => write!(f, "Invalid log input: {}", e),
        }
    }
}

impl std::error::Error for LogError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            LogError::Invalid(e) => Some(e),
            LogError::NotConfigured => None,
        }
    }
}

/// Result of a flush.
#[derive(Debug)]
pub enum FlushOutcome {
    /// Nothing was queued; no request was sent
    Empty,

    /// The logger has no endpoint; no request was sent
    NotConfigured,

    /// The batch was acknowledged and this many entries were removed
    Delivered(usize),

    /// The batch was not delivered; the queue is unchanged
    Failed(DeliveryError),
}

impl FlushOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, FlushOutcome::Delivered(_))
    }
}

/// The settings of a successful `config` call.
struct ActiveConfig {
    endpoint: String,
    headers: RoutingHeaders,
    success_cb: Option<Callback>,
    error_cb: Option<Callback>,
}

struct State {
    active: Option<ActiveConfig>,
    session: SessionIdentity,
    scheduler: FlushScheduler,
}

struct Inner {
    queue: LogQueue,
    state: Mutex<State>,
    /// Serializes flushes so a batch is never in flight twice.
    flush_lock: tokio::sync::Mutex<()>,
    transport: Arc<dyn Transport>,
    diagnostics: Arc<dyn DiagnosticSink>,
    enricher: Enricher,
    error_hook_registered: AtomicBool,
    preload: Mutex<Vec<LogMessage>>,
}

impl Inner {
    fn state(&self) -> MutexGuard<'_, State> {
        // A poisoned lock only means a panic elsewhere; the state is still usable.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn log(&self, message: LogMessage, options: &LogOptions) -> Result<(usize, bool), LogError> {
        let mut state = self.state();

        if state.active.is_none() {
            drop(state);
            self.diagnostics.emit(NOT_CONFIGURED);
            return Err(LogError::NotConfigured);
        }

        let State {
            session, scheduler, ..
        } = &mut *state;

        match self.enricher.enrich(&message, options, session) {
            Ok(entries) => {
                let count = entries.len();
                // Appending under the state lock keeps reset() atomic with respect to log().
                self.queue.append(entries);
                Ok((count, scheduler.flushes_on_log()))
            }
            Err(e) => {
                drop(state);
                self.diagnostics.emit(match e {
                    ValidationError::EmptyObject => EMPTY_OBJECT,
                    _ => MISSING_VALUE,
                });
                Err(LogError::Invalid(e))
            }
        }
    }

    async fn flush(&self) -> FlushOutcome {
        let _flushing = self.flush_lock.lock().await;

        let (snapshot, request, success_cb, error_cb) = {
            let state = self.state();
            let Some(active) = state.active.as_ref() else {
                return FlushOutcome::NotConfigured;
            };

            let snapshot = self.queue.snapshot();
            if snapshot.is_empty() {
                return FlushOutcome::Empty;
            }

            let request = DeliveryRequest {
                endpoint: active.endpoint.clone(),
                body: snapshot.body(),
                headers: active.headers.clone(),
                entry_count: snapshot.len(),
            };
            (
                snapshot,
                request,
                active.success_cb.clone(),
                active.error_cb.clone(),
            )
        };

        match self.transport.send(&request).await {
            Ok(()) => {
                let removed = self.queue.acknowledge(&snapshot);
                info!(entries = removed, "Delivered log batch");
                // The queue is already cleared when the callback runs.
                if let Some(callback) = success_cb {
                    callback();
                }
                FlushOutcome::Delivered(removed)
            }
            Err(e) => {
                warn!(
                    error = %e,
                    entries = snapshot.len(),
                    "Failed to deliver log batch, entries kept for the next flush"
                );
                if let Some(callback) = error_cb {
                    callback();
                }
                FlushOutcome::Failed(e)
            }
        }
    }
}

/// Client-side log shipper.
///
/// Cloning yields another handle to the same logger; separate
/// `SumoLogger::builder()` calls create independent loggers with their own
/// queue, session and timer.
#[derive(Clone)]
pub struct SumoLogger {
    inner: Arc<Inner>,
}

impl SumoLogger {
    pub fn builder() -> SumoLoggerBuilder {
        SumoLoggerBuilder::default()
    }

    /// Apply `options`. Replaces any previous configuration, cancelling the
    /// previous flush timer.
    ///
    /// A missing endpoint or an interval above one hour is reported on the
    /// diagnostic sink and leaves the logger unconfigured: `log` becomes a
    /// no-op until a valid `config`.
    pub fn config(&self, options: LoggerOptions) -> Result<(), ConfigError> {
        let endpoint = match options.validated_endpoint() {
            Ok(endpoint) => endpoint.to_string(),
            Err(e) => return Err(self.disable(MISSING_ENDPOINT, e)),
        };
        let interval = match options.validated_interval() {
            Ok(interval) => interval,
            Err(e) => return Err(self.disable(INTERVAL_TOO_LONG, e)),
        };

        let mode = FlushMode::from_interval(interval);
        let armed = {
            let mut state = self.inner.state();
            state.session.ensure(options.session_key.as_deref());
            state.active = Some(ActiveConfig {
                endpoint: endpoint.clone(),
                headers: RoutingHeaders {
                    source_name: options.source_name.clone(),
                    source_category: options.source_category.clone(),
                    host_name: options.host_name.clone(),
                },
                success_cb: options.success_cb.clone(),
                error_cb: options.error_cb.clone(),
            });

            let weak = Arc::downgrade(&self.inner);
            state.scheduler.arm(mode, move || {
                let weak = weak.clone();
                async move {
                    if let Some(inner) = weak.upgrade() {
                        inner.flush().await;
                    }
                }
            })
        };

        if let Err(e) = armed {
            self.inner.diagnostics.emit(&format!(
                "Periodic flushing needs a Tokio runtime ({}); entries stay queued until flush_logs is called.",
                e
            ));
        }

        if let Some(registry) = &options.send_errors {
            if !self.inner.error_hook_registered.swap(true, Ordering::SeqCst) {
                registry.register(self.uncaught_error_handler());
                debug!("Registered uncaught error handler");
            }
        }

        info!(
            endpoint = %endpoint,
            interval_ms = interval.as_millis() as u64,
            "Logger configured"
        );

        let preloaded = {
            let mut preload = self.inner.preload.lock().unwrap_or_else(|p| p.into_inner());
            std::mem::take(&mut *preload)
        };
        for message in preloaded {
            let _ = self.log(message);
        }

        Ok(())
    }

    /// Drop the active configuration and timer after a rejected `config`.
    fn disable(&self, diagnostic: &str, error: ConfigError) -> ConfigError {
        {
            let mut state = self.inner.state();
            state.active = None;
            state.scheduler.cancel();
        }
        self.inner.diagnostics.emit(diagnostic);
        error
    }

    /// Log `message` with the default options.
    pub fn log(&self, message: impl Into<LogMessage>) -> Result<usize, LogError> {
        self.log_with(message, LogOptions::default())
    }

    /// Validate, enrich and enqueue `message`. Returns the number of entries
    /// queued. In immediate mode a flush is started in the background.
    ///
    /// Rejections are reported on the diagnostic sink; nothing is queued
    /// for a rejected call.
    pub fn log_with(
        &self,
        message: impl Into<LogMessage>,
        options: LogOptions,
    ) -> Result<usize, LogError> {
        let (count, flush_now) = self.inner.log(message.into(), &options)?;
        debug!(entries = count, queued = self.inner.queue.len(), "Queued log entries");

        if flush_now {
            self.spawn_flush();
        }
        Ok(count)
    }

    /// Send everything queued as one batch. A no-op on an empty queue.
    pub async fn flush_logs(&self) -> FlushOutcome {
        self.inner.flush().await
    }

    /// Discard the queue without sending it.
    pub fn empty_log_queue(&self) {
        self.inner.queue.clear();
    }

    /// Return to the pristine, unconfigured state: queue emptied, timer
    /// cancelled, in-memory session forgotten. A request already in flight
    /// is not aborted. The persisted session is kept.
    pub fn reset(&self) {
        let mut state = self.inner.state();
        state.active = None;
        state.session.clear();
        state.scheduler.cancel();
        self.inner.queue.clear();
        debug!("Logger reset");
    }

    /// The serialized entries waiting to be sent, oldest first.
    pub fn current_logs(&self) -> Vec<String> {
        self.inner.queue.entries()
    }

    /// Adopt `session` (persisting it), or make sure some session exists.
    pub fn set_session(&self, session: Option<&str>) -> String {
        self.inner.state().session.ensure(session).to_string()
    }

    /// The current in-memory session, if any.
    pub fn session(&self) -> Option<String> {
        self.inner.state().session.current().map(str::to_string)
    }

    /// Kept for API compatibility; delivery does not call it.
    pub fn log_sent(&self) {}

    pub fn is_configured(&self) -> bool {
        self.inner.state().active.is_some()
    }

    pub fn flush_mode(&self) -> FlushMode {
        self.inner.state().scheduler.mode()
    }

    pub fn queue_stats(&self) -> QueueStats {
        self.inner.queue.stats()
    }

    fn spawn_flush(&self) {
        match Handle::try_current() {
            Ok(handle) => {
                let inner = Arc::clone(&self.inner);
                handle.spawn(async move {
                    inner.flush().await;
                });
            }
            Err(_) => {
                debug!("No Tokio runtime, entries stay queued until the next flush");
            }
        }
    }

    fn uncaught_error_handler(&self) -> UncaughtErrorHandler {
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        Arc::new(move |error: &UncaughtError| {
            if let Some(inner) = weak.upgrade() {
                let logger = SumoLogger { inner };
                let _ = logger.log(error.to_fields());
            }
        })
    }
}

impl std::fmt::Debug for SumoLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SumoLogger")
            .field("configured", &self.is_configured())
            .field("queued", &self.inner.queue.len())
            .finish()
    }
}

/// Builds a [`SumoLogger`] from its collaborators.
#[derive(Default)]
pub struct SumoLoggerBuilder {
    transport: Option<Arc<dyn Transport>>,
    transport_config: TransportConfig,
    session_store: Option<Arc<dyn SessionStore>>,
    diagnostics: Option<Arc<dyn DiagnosticSink>>,
    origin: Option<Origin>,
    max_queue_entries: Option<usize>,
    preload: Vec<LogMessage>,
}

impl SumoLoggerBuilder {
    /// Use a custom transport instead of the HTTP one.
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Settings for the default HTTP transport.
    pub fn transport_config(mut self, config: TransportConfig) -> Self {
        self.transport_config = config;
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.transport_config.request_timeout = timeout;
        self
    }

    pub fn session_store(mut self, store: Arc<dyn SessionStore>) -> Self {
        self.session_store = Some(store);
        self
    }

    pub fn diagnostics(mut self, sink: Arc<dyn DiagnosticSink>) -> Self {
        self.diagnostics = Some(sink);
        self
    }

    /// Location stamped on every entry. Defaults to the executable path.
    pub fn origin(mut self, origin: Origin) -> Self {
        self.origin = Some(origin);
        self
    }

    /// Cap the queue, dropping the oldest entries when full.
    pub fn max_queue_entries(mut self, max_entries: usize) -> Self {
        self.max_queue_entries = Some(max_entries);
        self
    }

    /// Messages captured before the logger existed; they are logged once
    /// the first `config` succeeds.
    pub fn preload<I, M>(mut self, messages: I) -> Self
    where
        I: IntoIterator<Item = M>,
        M: Into<LogMessage>,
    {
        self.preload.extend(messages.into_iter().map(Into::into));
        self
    }

    /// # Errors
    ///
    /// Returns `DeliveryError::Build` if the default HTTP client cannot be built.
    pub fn build(self) -> Result<SumoLogger, DeliveryError> {
        let transport: Arc<dyn Transport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(HttpTransport::new(&self.transport_config)?),
        };
        let store = self
            .session_store
            .unwrap_or_else(|| Arc::new(MemorySessionStore::new()));
        let queue = match self.max_queue_entries {
            Some(max) => LogQueue::bounded(max),
            None => LogQueue::new(),
        };

        Ok(SumoLogger {
            inner: Arc::new(Inner {
                queue,
                state: Mutex::new(State {
                    active: None,
                    session: SessionIdentity::new(store),
                    scheduler: FlushScheduler::new(),
                }),
                flush_lock: tokio::sync::Mutex::new(()),
                transport,
                diagnostics: self
                    .diagnostics
                    .unwrap_or_else(|| Arc::new(TracingDiagnostics)),
                enricher: Enricher::new(self.origin.unwrap_or_default()),
                error_hook_registered: AtomicBool::new(false),
                preload: Mutex::new(self.preload),
            }),
        })
    }
}
