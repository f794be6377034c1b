use std::{
    collections::HashMap,
    future::Future,
    hash::Hash,
    ops::Deref,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
    time::{Duration, Instant},
};

use tokio::sync::{Mutex as AsyncMutex, OnceCell};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A keyed cache of lazily-constructed values with a fixed time-to-live.
///
/// Concurrent acquirers of the same missing key observe exactly one run of the
/// constructor; the others suspend until it completes and share its outcome.
/// Entries are checked for expiry only at acquire time, so a value that is
/// still held through a [`CacheHandle`] stays valid past its TTL until the
/// handle is dropped.
pub struct ExpiringCache<K, V> {
    /// How long a constructed value stays usable.
    ttl: Duration,

    /// Live entries. Guarded by a plain mutex that is never held across an
    /// `.await`, so constructors for one key do not stall other keys.
    entries: Mutex<HashMap<K, Arc<CacheEntry<V>>>>,
}

/// Shared state for one cached value.
struct CacheEntry<V> {
    /// The value slot, written at most once per entry.
    value: OnceCell<V>,

    /// Construction lock; racing acquirers of the same key queue here.
    init: AsyncMutex<()>,

    /// Set when the entry is invalidated or its construction failed.
    dead: AtomicBool,

    /// Absolute expiry, set when construction succeeds.
    expires_at: Mutex<Option<Instant>>,
}

/// A borrowed reference to a cached value.
///
/// The handle pins the entry against destruction: an entry that expires or is
/// invalidated while handles are outstanding is detached from the cache and
/// destroyed once the last handle drops. Dropping the handle is the normal
/// release; [`CacheHandle::invalidate`] additionally marks the entry dead so
/// the next acquire reconstructs it.
pub struct CacheHandle<'a, K, V>
where
    K: Eq + Hash + Clone,
{
    cache: &'a ExpiringCache<K, V>,
    key: K,
    entry: Arc<CacheEntry<V>>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl<K, V> ExpiringCache<K, V>
where
    K: Eq + Hash + Clone,
{
    /// Creates an empty cache whose values live for `ttl` after construction.
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Returns a handle to the value for `key`, constructing it with `ctor`
    /// if it is absent, expired, or invalidated.
    ///
    /// `ctor` returning `None` is the failure sentinel: nothing is inserted,
    /// racing acquirers that waited on the construction also observe `None`,
    /// and the next acquire runs a fresh constructor. `ctor` may block on
    /// I/O; only acquirers of the same key wait on it.
    pub async fn acquire<F, Fut>(&self, key: K, ctor: F) -> Option<CacheHandle<'_, K, V>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Option<V>>,
    {
        let mut ctor = Some(ctor);
        loop {
            let entry = {
                let mut entries = self.entries.lock().unwrap();
                match entries.get(&key) {
                    Some(entry) if !entry.is_dead() && !entry.is_expired() => Arc::clone(entry),
                    _ => {
                        let entry = Arc::new(CacheEntry::new());
                        entries.insert(key.clone(), Arc::clone(&entry));
                        entry
                    }
                }
            };

            // Fast path: already constructed.
            if entry.value.get().is_some() {
                if entry.is_dead() {
                    continue;
                }
                return Some(CacheHandle {
                    cache: self,
                    key,
                    entry,
                });
            }

            let _init = entry.init.lock().await;

            if entry.value.get().is_some() {
                // Built while we waited on the construction lock.
                if entry.is_dead() {
                    continue;
                }
                drop(_init);
                return Some(CacheHandle {
                    cache: self,
                    key,
                    entry,
                });
            }

            if entry.is_dead() {
                // The constructing task failed; racers observe the failure.
                return None;
            }

            // We hold the construction lock on a fresh entry.
            let Some(ctor) = ctor.take() else {
                return None;
            };
            match ctor().await {
                Some(value) => {
                    let _ = entry.value.set(value);
                    *entry.expires_at.lock().unwrap() = Some(Instant::now() + self.ttl);
                    drop(_init);
                    return Some(CacheHandle {
                        cache: self,
                        key,
                        entry,
                    });
                }
                None => {
                    entry.mark_dead();
                    drop(_init);
                    self.detach(&key, &entry);
                    return None;
                }
            }
        }
    }

    /// Removes `entry` from the map unless a newer entry took its place.
    fn detach(&self, key: &K, entry: &Arc<CacheEntry<V>>) {
        let mut entries = self.entries.lock().unwrap();
        if let Some(current) = entries.get(key) {
            if Arc::ptr_eq(current, entry) {
                entries.remove(key);
            }
        }
    }
}

impl<V> CacheEntry<V> {
    fn new() -> Self {
        Self {
            value: OnceCell::new(),
            init: AsyncMutex::new(()),
            dead: AtomicBool::new(false),
            expires_at: Mutex::new(None),
        }
    }

    fn is_dead(&self) -> bool {
        self.dead.load(Ordering::Acquire)
    }

    fn mark_dead(&self) {
        self.dead.store(true, Ordering::Release);
    }

    fn is_expired(&self) -> bool {
        self.expires_at
            .lock()
            .unwrap()
            .map_or(false, |at| at <= Instant::now())
    }
}

impl<K, V> CacheHandle<'_, K, V>
where
    K: Eq + Hash + Clone,
{
    /// Releases the handle and marks the entry dead, so the next acquire of
    /// this key reconstructs the value. Handles already held elsewhere stay
    /// valid until they are dropped.
    pub fn invalidate(self) {
        self.entry.mark_dead();
        self.cache.detach(&self.key, &self.entry);
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl<K, V> Deref for CacheHandle<'_, K, V>
where
    K: Eq + Hash + Clone,
{
    type Target = V;

    fn deref(&self) -> &Self::Target {
        self.entry
            .value
            .get()
            .expect("handle exists only for constructed entries")
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
