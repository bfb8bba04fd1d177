use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Client-local key/value capability.
///
/// Browser builds sit this on top of local/session storage; the seam is
/// injected so non-browser targets and tests can swap in an in-memory map.
/// Values are plain strings; callers serialize structured data themselves.
pub trait KeyValueStore: Send + Sync + 'static {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str);
    fn remove(&self, key: &str);
}

impl<S: KeyValueStore> KeyValueStore for Arc<S> {
    fn get(&self, key: &str) -> Option<String> {
        self.as_ref().get(key)
    }

    fn set(&self, key: &str, value: &str) {
        self.as_ref().set(key, value)
    }

    fn remove(&self, key: &str) {
        self.as_ref().remove(key)
    }
}

/// In-memory store backed by a mutex-guarded map.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.lock().ok()?.get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(key.to_string(), value.to_string());
        }
    }

    fn remove(&self, key: &str) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.remove(key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_store_overwrites_single_slot() {
        let store = MemoryStore::new();
        store.set("pending_referral", "first");
        store.set("pending_referral", "second");
        assert_eq!(store.get("pending_referral").as_deref(), Some("second"));
    }

    #[test]
    fn test_memory_store_remove() {
        let store = MemoryStore::new();
        store.set("k", "v");
        store.remove("k");
        assert!(store.get("k").is_none());
    }
}
