//! In-memory rendezvous store.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)]

use relay_core::{RendezvousStore, StoreError};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug)]
struct Entry {
    value: Vec<u8>,
    expires_at: Instant,
}

/// `HashMap`-backed [`RendezvousStore`] with per-key expiry.
///
/// Expiry uses the tokio clock, so with paused time an entry written with a
/// 10s TTL is visible at 9.999s and gone at 10s. Each operation takes one lock,
/// which makes every single-key `put` and `get` atomic.
///
/// # Example
///
/// ```
/// use relay_core::RendezvousStore;
/// use relay_testing::InMemoryRendezvousStore;
/// use std::time::Duration;
///
/// # #[tokio::main(flavor = "current_thread", start_paused = true)]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let store = InMemoryRendezvousStore::new();
/// store.put("response:c-1", b"{\"is_valid\":true}", Duration::from_secs(10)).await?;
///
/// tokio::time::advance(Duration::from_secs(10)).await;
/// assert_eq!(store.get("response:c-1").await?, None);
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug, Default)]
pub struct InMemoryRendezvousStore {
    entries: Arc<Mutex<HashMap<String, Entry>>>,
    failing: Arc<AtomicBool>,
    puts: Arc<AtomicUsize>,
    gets: Arc<AtomicUsize>,
}

impl InMemoryRendezvousStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every operation fail with [`StoreError::Connection`] until reset.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Number of live (unexpired) entries.
    #[must_use]
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .lock()
            .unwrap()
            .values()
            .filter(|entry| entry.expires_at > now)
            .count()
    }

    /// Check if no live entries exist
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Check if a live entry exists under `key`.
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        let now = Instant::now();
        self.entries
            .lock()
            .unwrap()
            .get(key)
            .is_some_and(|entry| entry.expires_at > now)
    }

    /// Number of `put` calls, including failed ones.
    #[must_use]
    pub fn put_count(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }

    /// Number of `get` calls, including failed ones.
    #[must_use]
    pub fn get_count(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.failing.load(Ordering::SeqCst) {
            Err(StoreError::Connection("injected store failure".to_string()))
        } else {
            Ok(())
        }
    }
}

impl RendezvousStore for InMemoryRendezvousStore {
    fn put(
        &self,
        key: &str,
        value: &[u8],
        ttl: Duration,
    ) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + '_>> {
        let key = key.to_string();
        let value = value.to_vec();

        Box::pin(async move {
            self.puts.fetch_add(1, Ordering::SeqCst);
            self.check_available()?;

            let expires_at = Instant::now() + ttl;
            self.entries
                .lock()
                .unwrap()
                .insert(key, Entry { value, expires_at });
            Ok(())
        })
    }

    fn get(
        &self,
        key: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Vec<u8>>, StoreError>> + Send + '_>> {
        let key = key.to_string();

        Box::pin(async move {
            self.gets.fetch_add(1, Ordering::SeqCst);
            self.check_available()?;

            let now = Instant::now();
            let mut entries = self.entries.lock().unwrap();
            match entries.get(&key) {
                Some(entry) if entry.expires_at > now => Ok(Some(entry.value.clone())),
                Some(_) => {
                    entries.remove(&key);
                    Ok(None)
                }
                None => Ok(None),
            }
        })
    }
}
