//! The authoritative in-memory map from key to `{value, expiration}`,
//! protected by a single reader-writer lock.
//!
//! `Store` is deliberately ignorant of persistence and replication: it only
//! knows how to keep the map correct under concurrency. [`crate::engine::Engine`]
//! is the layer that, after a `Store` call returns, mirrors the change to
//! persistence and broadcasts it to peers outside the lock.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::RwLock;

use crate::clock::Clock;

/// `expiration == 0` means "never expires", matching the wire format.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CacheEntry {
    pub value: Bytes,
    pub expiration: u32,
}

impl CacheEntry {
    fn is_expired(&self, now: u64) -> bool {
        self.expiration != 0 && (self.expiration as u64) < now
    }
}

/// The outcome of a `get`, distinguishing a plain miss from an expired
/// entry the caller must now mirror a deletion for.
#[derive(Debug, PartialEq, Eq)]
pub enum GetOutcome {
    Hit(Bytes),
    Miss,
    /// The entry existed but had expired; it was removed from the map
    /// under the writer lock. The caller (the engine) must still mirror
    /// this as a delete to persistence and peers.
    Reaped,
}

/// The outcome of a `lock_acquire`, distinguishing a genuinely new
/// acquisition (which the engine must mirror to persistence and
/// broadcast) from an idempotent re-acquire by the same owner (which
/// mutated nothing and must not be mirrored or broadcast).
#[derive(Debug, PartialEq, Eq)]
pub enum LockAcquireOutcome {
    AcquiredNew,
    AlreadyOwnedBySameOwner,
    Denied,
}

impl LockAcquireOutcome {
    pub fn acquired(&self) -> bool {
        !matches!(self, LockAcquireOutcome::Denied)
    }
}

pub struct Store {
    map: RwLock<HashMap<String, CacheEntry>>,
    clock: Arc<dyn Clock>,
}

impl Store {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { map: RwLock::new(HashMap::new()), clock }
    }

    /// Seeds the map at boot from a persistence scan. Not for use after
    /// startup — bypasses persistence/broadcast entirely by design.
    pub async fn seed(&self, entries: impl IntoIterator<Item = (String, CacheEntry)>) {
        let mut guard = self.map.write().await;
        for (key, entry) in entries {
            guard.insert(key, entry);
        }
    }

    /// Unconditional replace.
    pub async fn set(&self, key: String, value: Bytes, expiration: u32) {
        let mut guard = self.map.write().await;
        guard.insert(key, CacheEntry { value, expiration });
    }

    /// Reader-locked lookup with lazy expiration. Never blocks other
    /// readers except on the rare path where the entry must be reaped,
    /// which briefly takes the writer lock.
    pub async fn get(&self, key: &str) -> GetOutcome {
        {
            let guard = self.map.read().await;
            match guard.get(key) {
                None => return GetOutcome::Miss,
                Some(entry) if !entry.is_expired(self.clock.unix_now_secs()) => {
                    return GetOutcome::Hit(entry.value.clone());
                }
                Some(_) => {} // expired; fall through to reap under the writer lock
            }
        }
        let mut guard = self.map.write().await;
        match guard.get(key) {
            Some(entry) if entry.is_expired(self.clock.unix_now_secs()) => {
                guard.remove(key);
                GetOutcome::Reaped
            }
            Some(entry) => GetOutcome::Hit(entry.value.clone()),
            None => GetOutcome::Miss,
        }
    }

    /// Unconditional remove. Idempotent — returns whether a key was
    /// actually present, purely informational.
    pub async fn delete(&self, key: &str) -> bool {
        self.map.write().await.remove(key).is_some()
    }

    pub async fn flush(&self) {
        self.map.write().await.clear();
    }

    /// Atomic check-and-set: succeeds if the key is absent or expired.
    pub async fn add(&self, key: String, value: Bytes, expiration: u32) -> bool {
        let mut guard = self.map.write().await;
        let now = self.clock.unix_now_secs();
        if let Some(existing) = guard.get(&key) {
            if !existing.is_expired(now) {
                return false;
            }
        }
        guard.insert(key, CacheEntry { value, expiration });
        true
    }

    /// Idempotent re-acquire by the same owner; exclusive otherwise.
    pub async fn lock_acquire(&self, lock_key: String, owner: Bytes, expiration: u32) -> LockAcquireOutcome {
        let mut guard = self.map.write().await;
        let now = self.clock.unix_now_secs();
        if let Some(existing) = guard.get(&lock_key) {
            if !existing.is_expired(now) {
                return if existing.value == owner {
                    LockAcquireOutcome::AlreadyOwnedBySameOwner
                } else {
                    LockAcquireOutcome::Denied
                };
            }
        }
        guard.insert(lock_key, CacheEntry { value: owner, expiration });
        LockAcquireOutcome::AcquiredNew
    }

    /// Releases iff the given owner currently holds the lock.
    pub async fn lock_release(&self, lock_key: &str, owner: &[u8]) -> bool {
        let mut guard = self.map.write().await;
        match guard.get(lock_key) {
            Some(entry) if entry.value.as_ref() == owner => {
                guard.remove(lock_key);
                true
            }
            _ => false,
        }
    }

    /// A snapshot of every non-expired entry, for the bootstrap dump.
    /// Reader-locked: does not reap expired entries, only skips them.
    pub async fn snapshot_non_expired(&self) -> Vec<(String, CacheEntry)> {
        let guard = self.map.read().await;
        let now = self.clock.unix_now_secs();
        guard.iter().filter(|(_, e)| !e.is_expired(now)).map(|(k, v)| (k.clone(), v.clone())).collect()
    }

    /// Raw entry count, including not-yet-reaped expired entries — under
    /// lazy expiration they are still "in the map" until a read reaps them.
    pub async fn len(&self) -> usize {
        self.map.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::test_support::MockClock;

    fn store(now: u64) -> (Store, Arc<MockClock>) {
        let clock = Arc::new(MockClock::new(now));
        (Store::new(clock.clone()), clock)
    }

    #[tokio::test]
    async fn set_then_get_round_trips() {
        let (store, _clock) = store(100);
        store.set("k".into(), Bytes::from_static(b"v"), 0).await;
        assert_eq!(store.get("k").await, GetOutcome::Hit(Bytes::from_static(b"v")));
    }

    #[tokio::test]
    async fn get_reaps_expired_entry() {
        let (store, clock) = store(100);
        store.set("k".into(), Bytes::from_static(b"v"), 150).await;
        clock.set(200);
        assert_eq!(store.get("k").await, GetOutcome::Reaped);
        assert_eq!(store.get("k").await, GetOutcome::Miss);
        assert_eq!(store.len().await, 0);
    }

    #[tokio::test]
    async fn zero_expiration_never_expires() {
        let (store, clock) = store(100);
        store.set("k".into(), Bytes::from_static(b"v"), 0).await;
        clock.set(u64::MAX - 1);
        assert_eq!(store.get("k").await, GetOutcome::Hit(Bytes::from_static(b"v")));
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let (store, _clock) = store(100);
        store.set("k".into(), Bytes::from_static(b"v"), 0).await;
        assert!(store.delete("k").await);
        assert!(!store.delete("k").await);
    }

    #[tokio::test]
    async fn flush_clears_everything() {
        let (store, _clock) = store(100);
        store.set("a".into(), Bytes::from_static(b"1"), 0).await;
        store.set("b".into(), Bytes::from_static(b"2"), 0).await;
        store.flush().await;
        assert_eq!(store.len().await, 0);
    }

    #[tokio::test]
    async fn add_fails_against_live_key_succeeds_on_absent() {
        let (store, _clock) = store(100);
        assert!(store.add("k".into(), Bytes::from_static(b"1"), 0).await);
        assert!(!store.add("k".into(), Bytes::from_static(b"2"), 0).await);
        assert_eq!(store.get("k").await, GetOutcome::Hit(Bytes::from_static(b"1")));
    }

    #[tokio::test]
    async fn add_succeeds_over_an_expired_key_and_overwrites() {
        let (store, clock) = store(100);
        store.set("k".into(), Bytes::from_static(b"old"), 150).await;
        clock.set(200);
        assert!(store.add("k".into(), Bytes::from_static(b"new"), 0).await);
        assert_eq!(store.get("k").await, GetOutcome::Hit(Bytes::from_static(b"new")));
    }

    #[tokio::test]
    async fn lock_acquire_is_exclusive_between_distinct_owners() {
        let (store, _clock) = store(100);
        assert_eq!(
            store.lock_acquire("lock:job".into(), Bytes::from_static(b"w1"), 0).await,
            LockAcquireOutcome::AcquiredNew
        );
        assert_eq!(
            store.lock_acquire("lock:job".into(), Bytes::from_static(b"w2"), 0).await,
            LockAcquireOutcome::Denied
        );
    }

    #[tokio::test]
    async fn lock_acquire_is_idempotent_for_the_same_owner() {
        let (store, _clock) = store(100);
        assert_eq!(
            store.lock_acquire("lock:job".into(), Bytes::from_static(b"w1"), 0).await,
            LockAcquireOutcome::AcquiredNew
        );
        assert_eq!(
            store.lock_acquire("lock:job".into(), Bytes::from_static(b"w1"), 0).await,
            LockAcquireOutcome::AlreadyOwnedBySameOwner
        );
    }

    #[tokio::test]
    async fn lock_release_requires_matching_owner() {
        let (store, _clock) = store(100);
        store.lock_acquire("lock:job".into(), Bytes::from_static(b"w1"), 0).await;
        assert!(!store.lock_release("lock:job", b"w2").await);
        assert!(store.lock_release("lock:job", b"w1").await);
    }

    #[tokio::test]
    async fn snapshot_skips_expired_entries() {
        let (store, clock) = store(100);
        store.set("live".into(), Bytes::from_static(b"v"), 0).await;
        store.set("dead".into(), Bytes::from_static(b"v"), 150).await;
        clock.set(200);
        let snapshot = store.snapshot_non_expired().await;
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].0, "live");
    }
}
