//! Ties the store, persistence mirror, and peer manager together behind
//! the public operations the API surface calls. This is the only type
//! constructed at startup and passed by value into the API and peer
//! layers — there is no process-wide singleton (see `DESIGN.md`).

use std::sync::Arc;

use bytes::Bytes;
use hypercacheio_common::{lock_key, ProtocolError};

use crate::clock::Clock;
use crate::codec::Frame;
use crate::peer::PeerManager;
use crate::persistence::{Persistence, PersistedEntry};
use crate::store::{CacheEntry, GetOutcome, LockAcquireOutcome, Store};

pub struct Engine {
    store: Arc<Store>,
    persistence: Arc<dyn Persistence>,
    peers: Arc<PeerManager>,
}

impl Engine {
    /// Boot order for this piece of the system: load persistence into the
    /// store, then construct the peer manager around the now-warm store.
    /// Starting the replication listener and dialing peers is the
    /// lifecycle layer's job, not the engine's.
    pub async fn boot(clock: Arc<dyn Clock>, persistence: Arc<dyn Persistence>) -> Arc<Self> {
        let store = Arc::new(Store::new(clock));
        let rows: Vec<PersistedEntry> = persistence.scan().await;
        store
            .seed(rows.into_iter().map(|row| {
                let expiration = row.expiration.unwrap_or(0);
                (row.key, CacheEntry { value: Bytes::from(row.value), expiration })
            }))
            .await;
        let peers = PeerManager::new(Arc::clone(&store), Arc::clone(&persistence));
        Arc::new(Self { store, persistence, peers })
    }

    pub fn peers(&self) -> &Arc<PeerManager> {
        &self.peers
    }

    /// Unconditional replace; mirrors to persistence then broadcasts.
    pub async fn set(&self, key: String, value: Bytes, expiration: u32) -> Result<(), ProtocolError> {
        Frame::check_wire_limits(&key, value.len())?;
        self.store.set(key.clone(), value.clone(), expiration).await;
        self.persistence.upsert(&key, &value, Some(expiration)).await;
        self.peers.broadcast(Frame::Set { key, value, expiration }).await;
        Ok(())
    }

    /// Reader-locked lookup. A lazily-reaped expired entry is mirrored as
    /// a delete (it is "observed" locally, so this counts as a local
    /// mutation and is broadcast) even though the caller only asked to read.
    pub async fn get(&self, key: &str) -> Option<Bytes> {
        match self.store.get(key).await {
            GetOutcome::Hit(value) => Some(value),
            GetOutcome::Miss => None,
            GetOutcome::Reaped => {
                self.persistence.delete(key).await;
                self.peers.broadcast(Frame::Del { key: key.to_string() }).await;
                None
            }
        }
    }

    /// Unconditional remove, idempotent.
    pub async fn delete(&self, key: &str) {
        self.store.delete(key).await;
        self.persistence.delete(key).await;
        self.peers.broadcast(Frame::Del { key: key.to_string() }).await;
    }

    pub async fn flush(&self) {
        self.store.flush().await;
        self.persistence.delete_all().await;
        self.peers.broadcast(Frame::Flush).await;
    }

    /// Atomic check-and-set. A successful add is, on the wire, just a
    /// `Set` — an expired entry it silently overwrote is implicitly
    /// corrected on peers by that same frame.
    pub async fn add(&self, key: String, value: Bytes, expiration: u32) -> Result<bool, ProtocolError> {
        Frame::check_wire_limits(&key, value.len())?;
        let added = self.store.add(key.clone(), value.clone(), expiration).await;
        if added {
            self.persistence.upsert(&key, &value, Some(expiration)).await;
            self.peers.broadcast(Frame::Set { key, value, expiration }).await;
        }
        Ok(added)
    }

    /// Acquires the named lock for `owner`. An idempotent re-acquire by
    /// the same owner mutates nothing, so it is neither persisted nor
    /// broadcast.
    pub async fn lock_acquire(&self, name: &str, owner: Bytes, expiration: u32) -> Result<bool, ProtocolError> {
        let key = lock_key(name);
        Frame::check_wire_limits(&key, owner.len())?;
        let outcome = self.store.lock_acquire(key.clone(), owner.clone(), expiration).await;
        if outcome == LockAcquireOutcome::AcquiredNew {
            self.persistence.upsert(&key, &owner, Some(expiration)).await;
            self.peers.broadcast(Frame::Set { key, value: owner, expiration }).await;
        }
        Ok(outcome.acquired())
    }

    /// Releases the named lock iff `owner` currently holds it.
    pub async fn lock_release(&self, name: &str, owner: &[u8]) -> bool {
        let key = lock_key(name);
        let released = self.store.lock_release(&key, owner).await;
        if released {
            self.persistence.delete(&key).await;
            self.peers.broadcast(Frame::Del { key }).await;
        }
        released
    }

    /// Raw entry count for the `/ping` diagnostic.
    pub async fn item_count(&self) -> usize {
        self.store.len().await
    }
}
