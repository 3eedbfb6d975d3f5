//! Ephemeral access-token cache
//!
//! Entries are derived state: losing one only costs a token exchange. The
//! manager talks to the [`TokenCache`] trait so a shared cache can replace
//! the in-process [`MemoryCache`].

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Key -> access token store with per-entry TTL.
pub trait TokenCache: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;

    /// Store `token` under `key` for `ttl`. A zero TTL is not an error.
    fn put(&self, key: &str, token: &str, ttl: Duration);
}

#[derive(Debug)]
struct Entry {
    token: String,
    /// `None` for a zero-TTL entry: served to the next read only.
    expires_at: Option<Instant>,
}

/// In-process cache backed by a `HashMap`.
///
/// Expired entries are dropped lazily on read. A zero-TTL entry is handed to
/// the read that immediately follows the write and then removed, so it never
/// outlives a single lookup.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl TokenCache for MemoryCache {
    fn get(&self, key: &str) -> Option<String> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let expires_at = entries.get(key)?.expires_at;
        match expires_at {
            Some(at) if Instant::now() < at => entries.get(key).map(|e| e.token.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => entries.remove(key).map(|e| e.token),
        }
    }

    fn put(&self, key: &str, token: &str, ttl: Duration) {
        let expires_at = (!ttl.is_zero()).then(|| Instant::now() + ttl);
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                key.to_string(),
                Entry {
                    token: token.to_string(),
                    expires_at,
                },
            );
    }
}
