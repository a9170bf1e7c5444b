//! Session identity and its persistence boundary.
//!
//! A session token groups the logs of one continuous usage period. The
//! in-memory copy lives on the logger instance and is cleared by `reset`;
//! the persisted copy lives in a [`SessionStore`] and survives resets.

use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tracing::{debug, warn};
use uuid::Uuid;

/// Key under which the session token is persisted.
pub const SESSION_KEY: &str = "sumologic.logger.session";

/// Key-value persistence scoped to the host context.
pub trait SessionStore: Send + Sync {
    /// Read the value stored under `key`, if any.
    fn get(&self, key: &str) -> Option<String>;

    /// Store `value` under `key`, replacing any previous value.
    fn set(&self, key: &str, value: &str);
}

/// Process-local store. Values survive logger resets but not restarts.
#[derive(Debug, Clone, Default)]
pub struct MemorySessionStore {
    values: Arc<Mutex<HashMap<String, String>>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for MemorySessionStore {
    fn get(&self, key: &str) -> Option<String> {
        self.values.lock().ok()?.get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) {
        if let Ok(mut values) = self.values.lock() {
            values.insert(key.to_string(), value.to_string());
        }
    }
}

/// File-backed store using one `key=value` pair per line.
///
/// I/O failures are logged and treated as an absent value; they never reach
/// the caller.
#[derive(Debug, Clone)]
pub struct FileSessionStore {
    path: PathBuf,
}

impl FileSessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_pairs(&self) -> Vec<(String, String)> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => return Vec::new(),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Failed to read session store");
                return Vec::new();
            }
        };

        contents
            .lines()
            .filter_map(|line| {
                let (key, value) = line.split_once('=')?;
                Some((key.trim().to_string(), value.trim().to_string()))
            })
            .collect()
    }
}

impl SessionStore for FileSessionStore {
    fn get(&self, key: &str) -> Option<String> {
        self.read_pairs()
            .into_iter()
            .find(|(k, v)| k == key && !v.is_empty())
            .map(|(_, v)| v)
    }

    fn set(&self, key: &str, value: &str) {
        let mut pairs = self.read_pairs();
        match pairs.iter_mut().find(|(k, _)| k == key) {
            Some(pair) => pair.1 = value.to_string(),
            None => pairs.push((key.to_string(), value.to_string())),
        }

        let mut contents = String::new();
        for (k, v) in &pairs {
            contents.push_str(k);
            contents.push('=');
            contents.push_str(v);
            contents.push('\n');
        }

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                if let Err(e) = fs::create_dir_all(parent) {
                    warn!(path = %parent.display(), error = %e, "Failed to create session store directory");
                    return;
                }
            }
        }

        if let Err(e) = fs::write(&self.path, contents) {
            warn!(path = %self.path.display(), error = %e, "Failed to write session store");
        }
    }
}

/// Generate a fresh random session token in UUID v4 form.
pub fn generate_session_token() -> String {
    Uuid::new_v4().to_string()
}

/// The logger's current session token, backed by a [`SessionStore`].
pub struct SessionIdentity {
    current: Option<String>,
    store: Arc<dyn SessionStore>,
}

impl SessionIdentity {
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        Self {
            current: None,
            store,
        }
    }

    /// Make sure a session token exists and return it.
    ///
    /// Priority: an explicit non-empty value (adopted and persisted), then
    /// the in-memory token, then the persisted token, then a freshly
    /// generated one (persisted).
    pub fn ensure(&mut self, explicit: Option<&str>) -> &str {
        if let Some(value) = explicit.filter(|v| !v.is_empty()) {
            debug!(session = value, "Adopting explicit session");
            self.store.set(SESSION_KEY, value);
            self.current = Some(value.to_string());
        } else if self.current.is_none() {
            let token = match self.store.get(SESSION_KEY).filter(|v| !v.is_empty()) {
                Some(persisted) => persisted,
                None => {
                    let token = generate_session_token();
                    debug!(session = %token, "Generated new session");
                    self.store.set(SESSION_KEY, &token);
                    token
                }
            };
            self.current = Some(token);
        }

        self.current.get_or_insert_with(generate_session_token)
    }

    /// The in-memory token, if one has been established.
    pub fn current(&self) -> Option<&str> {
        self.current.as_deref()
    }

    /// Forget the in-memory token. The persisted value is kept.
    pub fn clear(&mut self) {
        self.current = None;
    }
}

impl std::fmt::Debug for SessionIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionIdentity")
            .field("current", &self.current)
            .finish_non_exhaustive()
    }
}
