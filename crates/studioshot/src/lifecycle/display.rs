//! Ephemeral display handles.
//!
//! A handle lets a host render a blob (the equivalent of an object URL).
//! Handles are never persisted. Each one is acquired once and released
//! once: on job deletion, on replacement by a newer result and on shutdown.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DisplayHandle {
    id: u64,
    key: String,
}

impl DisplayHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Blob key the handle renders.
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn uri(&self) -> String {
        format!("blob:studioshot/{}/{}", self.id, self.key)
    }
}

/// Registry of live handles.
#[derive(Debug, Default)]
pub struct DisplayHandles {
    next_id: AtomicU64,
    live: Mutex<HashMap<u64, String>>,
}

impl DisplayHandles {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<u64, String>> {
        match self.live.lock() {
            Ok(g) => g,
            Err(poisoned) => {
                log::warn!("Display handle lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    pub fn acquire(&self, key: &str) -> DisplayHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        self.lock().insert(id, key.to_string());
        DisplayHandle {
            id,
            key: key.to_string(),
        }
    }

    /// Returns false when the handle was already released.
    pub fn release(&self, handle: &DisplayHandle) -> bool {
        let released = self.lock().remove(&handle.id).is_some();
        if !released {
            log::warn!(
                "Display handle {} for '{}' released twice",
                handle.id,
                handle.key
            );
        }
        released
    }

    pub fn is_live(&self, handle: &DisplayHandle) -> bool {
        self.lock().contains_key(&handle.id)
    }

    pub fn outstanding(&self) -> usize {
        self.lock().len()
    }

    /// Releases everything still live and returns how many there were.
    pub fn release_all(&self) -> usize {
        let mut live = self.lock();
        let count = live.len();
        live.clear();
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_release_pairing() {
        let handles = DisplayHandles::new();
        let a = handles.acquire("job-1");
        let b = handles.acquire("job-1_processed");

        assert_ne!(a.id(), b.id());
        assert_eq!(handles.outstanding(), 2);
        assert!(handles.is_live(&a));

        assert!(handles.release(&a));
        assert!(!handles.is_live(&a));
        assert!(!handles.release(&a));
        assert_eq!(handles.outstanding(), 1);
    }

    #[test]
    fn test_release_all() {
        let handles = DisplayHandles::new();
        let a = handles.acquire("a");
        handles.acquire("b");

        assert_eq!(handles.release_all(), 2);
        assert_eq!(handles.outstanding(), 0);
        assert!(!handles.release(&a));
    }

    #[test]
    fn test_uri_names_key() {
        let handles = DisplayHandles::new();
        let handle = handles.acquire("job-1");
        assert_eq!(handle.key(), "job-1");
        assert!(handle.uri().starts_with("blob:studioshot/"));
        assert!(handle.uri().ends_with("/job-1"));
    }
}
