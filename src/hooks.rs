//! Uncaught-error capture.
//!
//! Capture is an explicit registration: the logger hands an
//! [`UncaughtErrorHandler`] to an [`ErrorHookRegistry`] chosen by the host.
//! Every registry chains to whatever handler was installed before, so
//! existing error reporting keeps working.

use std::any::Any;
use std::sync::{Arc, Mutex};

use serde_json::{Map, Value};

/// Value of the `error` field on captured entries.
pub const UNCAUGHT_ERROR_KIND: &str = "BrowserJsException";

/// An error that escaped the host's own handling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UncaughtError {
    pub message: String,
    pub url: String,
    pub line: Option<u32>,
    pub column: Option<u32>,
}

impl UncaughtError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            url: String::new(),
            line: None,
            column: None,
        }
    }

    pub fn at(mut self, url: impl Into<String>, line: u32, column: u32) -> Self {
        self.url = url.into();
        self.line = Some(line);
        self.column = Some(column);
        self
    }

    /// `message: <m>, url: <u>, line_num: <l>, col_num: <c>`
    pub fn describe(&self) -> String {
        format!(
            "message: {}, url: {}, line_num: {}, col_num: {}",
            self.message,
            self.url,
            display_or_undefined(self.line),
            display_or_undefined(self.column)
        )
    }

    /// Fields of the log entry reporting this error.
    pub fn to_fields(&self) -> Map<String, Value> {
        let mut fields = Map::new();
        fields.insert("error".to_string(), Value::String(UNCAUGHT_ERROR_KIND.to_string()));
        fields.insert("exception".to_string(), Value::String(self.describe()));
        fields
    }
}

fn display_or_undefined(value: Option<u32>) -> String {
    value.map_or_else(|| "undefined".to_string(), |v| v.to_string())
}

/// Receives uncaught errors.
pub type UncaughtErrorHandler = Arc<dyn Fn(&UncaughtError) + Send + Sync>;

/// Somewhere uncaught errors can be observed.
pub trait ErrorHookRegistry: Send + Sync {
    /// Install `handler` in front of the currently installed one. The
    /// previous handler must still run after `handler`.
    fn register(&self, handler: UncaughtErrorHandler);
}

/// An in-process handler chain the host reports errors into.
#[derive(Clone, Default)]
pub struct ErrorHooks {
    current: Arc<Mutex<Option<UncaughtErrorHandler>>>,
}

impl ErrorHooks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run the handler chain for `error`. Does nothing when empty.
    pub fn report(&self, error: &UncaughtError) {
        let handler = self.current.lock().ok().and_then(|h| h.clone());
        if let Some(handler) = handler {
            handler(error);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.current.lock().map(|h| h.is_none()).unwrap_or(true)
    }
}

impl ErrorHookRegistry for ErrorHooks {
    fn register(&self, handler: UncaughtErrorHandler) {
        let Ok(mut current) = self.current.lock() else {
            return;
        };

        let chained: UncaughtErrorHandler = match current.take() {
            Some(previous) => Arc::new(move |error: &UncaughtError| {
                handler(error);
                previous(error);
            }),
            None => handler,
        };
        *current = Some(chained);
    }
}

impl std::fmt::Debug for ErrorHooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ErrorHooks")
            .field("installed", &!self.is_empty())
            .finish()
    }
}

/// Captures panics by chaining onto the process panic hook.
#[derive(Debug, Clone, Copy, Default)]
pub struct PanicHookRegistry;

impl ErrorHookRegistry for PanicHookRegistry {
    fn register(&self, handler: UncaughtErrorHandler) {
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            let mut error = UncaughtError::new(panic_message(info.payload()));
            if let Some(location) = info.location() {
                error = error.at(location.file(), location.line(), location.column());
            }
            handler(&error);
            previous(info);
        }));
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "Box<dyn Any>".to_string()
    }
}
