//! Host-owned session storage scoped to one authentication attempt.

use std::collections::HashMap;

/// Per-attempt key/value storage provided by the host.
///
/// Values are opaque strings. The gate never touches ambient storage; the
/// host passes the attempt's session explicitly on every call.
pub trait SessionState: Send {
    fn put(&mut self, key: &str, value: String);

    fn get(&self, key: &str) -> Option<String>;

    fn remove(&mut self, key: &str);
}

/// In-memory session, one per authentication attempt.
#[derive(Debug, Clone, Default)]
pub struct MemorySession {
    values: HashMap<String, String>,
}

impl MemorySession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl SessionState for MemorySession {
    fn put(&mut self, key: &str, value: String) {
        self.values.insert(key.to_string(), value);
    }

    fn get(&self, key: &str) -> Option<String> {
        self.values.get(key).cloned()
    }

    fn remove(&mut self, key: &str) {
        self.values.remove(key);
    }
}
