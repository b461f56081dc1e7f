//! Run-scoped key/value state shared by every step of a workflow.

use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;

/// Type-safe state key wrapper.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StateKey(String);

impl StateKey {
    /// Creates a new StateKey.
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Returns the key as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for StateKey {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for StateKey {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl AsRef<str> for StateKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::borrow::Borrow<str> for StateKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Errors raised by state lookups.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StateError {
    /// No value is stored under the key.
    #[error("State key not found: {0}")]
    Missing(StateKey),

    /// The stored value is not a JSON string and cannot be substituted as text.
    #[error("State key '{key}' holds a non-text value ({kind})")]
    NotText {
        /// The key that was requested.
        key: StateKey,
        /// JSON kind of the stored value.
        kind: &'static str,
    },
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn lookup<'a>(data: &'a HashMap<StateKey, Value>, key: &str) -> Result<&'a Value, StateError> {
    data.get(key)
        .ok_or_else(|| StateError::Missing(StateKey::new(key)))
}

fn lookup_text<'a>(data: &'a HashMap<StateKey, Value>, key: &str) -> Result<&'a str, StateError> {
    let value = lookup(data, key)?;
    value.as_str().ok_or_else(|| StateError::NotText {
        key: StateKey::new(key),
        kind: value_kind(value),
    })
}

/// Mutable state threaded through one workflow run.
///
/// Values are JSON so a step may store plain text or a small record.
/// Writing an existing key replaces the previous value, which is how a
/// step inside a loop revises its own earlier output.
///
/// # Examples
///
/// ```
/// use tsuzuri_core::SharedState;
/// use serde_json::json;
///
/// let mut state = SharedState::new();
/// state.set("topic", "Rust ownership");
/// state.set("meta", json!({ "words": 300 }));
///
/// assert_eq!(state.get_text("topic").ok(), Some("Rust ownership"));
/// assert!(state.get_text("meta").is_err());
/// assert!(state.get("missing").is_err());
/// ```
pub struct SharedState {
    data: HashMap<StateKey, Value>,
    started_at: Instant,
}

impl fmt::Debug for SharedState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedState")
            .field("keys", &self.data.keys().collect::<Vec<_>>())
            .field("started_at", &self.started_at)
            .finish()
    }
}

impl Default for SharedState {
    fn default() -> Self {
        Self::new()
    }
}

impl SharedState {
    /// Creates a new empty state.
    pub fn new() -> Self {
        Self {
            data: HashMap::new(),
            started_at: Instant::now(),
        }
    }

    /// Builder-style insert, handy for seeding the initial state of a run.
    pub fn with(mut self, key: impl Into<StateKey>, value: impl Into<Value>) -> Self {
        self.set(key, value);
        self
    }

    /// Stores a value, replacing any previous value for the key.
    pub fn set(&mut self, key: impl Into<StateKey>, value: impl Into<Value>) {
        self.data.insert(key.into(), value.into());
    }

    /// Returns the value stored under `key`.
    pub fn get(&self, key: &str) -> Result<&Value, StateError> {
        lookup(&self.data, key)
    }

    /// Returns the value stored under `key` as text.
    ///
    /// Fails with [`StateError::NotText`] rather than rendering a record
    /// into a prompt.
    pub fn get_text(&self, key: &str) -> Result<&str, StateError> {
        lookup_text(&self.data, key)
    }

    /// Removes a value by key and returns it.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.data.remove(key)
    }

    /// Returns `true` if the state contains a value for the given key.
    pub fn contains_key(&self, key: &str) -> bool {
        self.data.contains_key(key)
    }

    /// Returns an iterator over all keys in the state.
    pub fn keys(&self) -> impl Iterator<Item = &StateKey> {
        self.data.keys()
    }

    /// Returns the number of entries in the state.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns `true` if the state contains no entries.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Returns an immutable copy of the current entries.
    ///
    /// Later writes to the state are not visible through the snapshot.
    pub fn snapshot(&self) -> StateSnapshot {
        StateSnapshot {
            data: Arc::new(self.data.clone()),
        }
    }

    /// Returns the time elapsed since the state was created.
    pub fn elapsed(&self) -> std::time::Duration {
        self.started_at.elapsed()
    }
}

impl<K: Into<StateKey>, V: Into<Value>> FromIterator<(K, V)> for SharedState {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut state = Self::new();
        for (key, value) in iter {
            state.set(key, value);
        }
        state
    }
}

/// Read-only view of a [`SharedState`] taken at a point in time.
#[derive(Debug, Clone)]
pub struct StateSnapshot {
    data: Arc<HashMap<StateKey, Value>>,
}

impl StateSnapshot {
    /// Returns the value stored under `key`.
    pub fn get(&self, key: &str) -> Result<&Value, StateError> {
        lookup(&self.data, key)
    }

    /// Returns the value stored under `key` as text.
    pub fn get_text(&self, key: &str) -> Result<&str, StateError> {
        lookup_text(&self.data, key)
    }

    /// Returns `true` if the snapshot contains the key.
    pub fn contains_key(&self, key: &str) -> bool {
        self.data.contains_key(key)
    }

    /// Returns the number of entries in the snapshot.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns `true` if the snapshot holds no entries.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}
