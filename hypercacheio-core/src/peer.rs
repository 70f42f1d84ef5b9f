//! The peer manager: one outbound connection per configured peer (dial,
//! reconnect with backoff) plus a single inbound accept loop. Mutations
//! flow in two directions that never loop back on themselves:
//!
//! - local mutation -> applied to the store -> [`PeerManager::broadcast`]
//!   writes a frame to every registered outbound socket.
//! - received frame (inbound or outbound connection) -> applied to the
//!   store and persistence directly, never rebroadcast.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};

use crate::codec::{read_frame, write_frame, Frame};
use crate::persistence::Persistence;
use crate::store::Store;

const DIAL_TIMEOUT: Duration = Duration::from_secs(5);
const RECONNECT_BACKOFF: Duration = Duration::from_secs(5);

/// The per-outbound-peer lifecycle: `Dialing` until connected, `Syncing`
/// from the moment we send `SYNC_REQ` until we see `SYNC_END`, `Steady`
/// for ordinary traffic, `Closed` on any read error (after which the loop
/// returns to `Dialing`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PeerState {
    Dialing,
    Syncing,
    Steady,
    Closed,
}

type PeerWriter = Arc<AsyncMutex<OwnedWriteHalf>>;

pub struct PeerManager {
    store: Arc<Store>,
    persistence: Arc<dyn Persistence>,
    outbound: AsyncMutex<HashMap<String, PeerWriter>>,
}

impl PeerManager {
    pub fn new(store: Arc<Store>, persistence: Arc<dyn Persistence>) -> Arc<Self> {
        Arc::new(Self { store, persistence, outbound: AsyncMutex::new(HashMap::new()) })
    }

    /// Snapshot of currently registered outbound peer addresses, for the
    /// `/ping` diagnostic endpoint.
    pub async fn peer_addresses(&self) -> Vec<String> {
        self.outbound.lock().await.keys().cloned().collect()
    }

    /// Writes `frame` to every registered outbound peer. Snapshotting the
    /// writer handles and releasing the registry lock before writing
    /// avoids holding it for the full fan-out.
    pub async fn broadcast(&self, frame: Frame) {
        let writers: Vec<(String, PeerWriter)> = {
            let guard = self.outbound.lock().await;
            guard.iter().map(|(addr, w)| (addr.clone(), Arc::clone(w))).collect()
        };
        for (addr, writer) in writers {
            let mut guard = writer.lock().await;
            if let Err(e) = write_frame(&mut *guard, &frame).await {
                warn!(peer = %addr, error = %e, "broadcast write failed; connection will be dropped on its next read error");
            }
        }
    }

    /// Spawns the dial-reconnect loop for one configured peer address.
    /// Runs until the process exits.
    pub fn spawn_outbound(self: &Arc<Self>, address: String) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            this.outbound_loop(address).await;
        });
    }

    async fn outbound_loop(self: Arc<Self>, address: String) {
        loop {
            debug!(peer = %address, state = ?PeerState::Dialing, "dialing peer");
            let stream = match tokio::time::timeout(DIAL_TIMEOUT, TcpStream::connect(&address)).await {
                Ok(Ok(stream)) => stream,
                Ok(Err(e)) => {
                    warn!(peer = %address, error = %e, "dial failed");
                    tokio::time::sleep(RECONNECT_BACKOFF).await;
                    continue;
                }
                Err(_) => {
                    warn!(peer = %address, "dial timed out after {:?}", DIAL_TIMEOUT);
                    tokio::time::sleep(RECONNECT_BACKOFF).await;
                    continue;
                }
            };

            let (read_half, write_half) = stream.into_split();
            let writer = Arc::new(AsyncMutex::new(write_half));
            self.outbound.lock().await.insert(address.clone(), Arc::clone(&writer));

            {
                let mut guard = writer.lock().await;
                if let Err(e) = write_frame(&mut *guard, &Frame::SyncReq).await {
                    warn!(peer = %address, error = %e, "failed to send SYNC_REQ");
                }
            }
            debug!(peer = %address, state = ?PeerState::Syncing, "bootstrap requested");

            let mut state = PeerState::Syncing;
            let mut reader = BufReader::new(read_half);
            loop {
                match read_frame(&mut reader).await {
                    Ok(Some(Frame::SyncEnd)) => {
                        state = PeerState::Steady;
                        debug!(peer = %address, state = ?state, "bootstrap complete");
                    }
                    Ok(Some(frame)) => {
                        self.apply_received(frame, None).await;
                    }
                    Ok(None) => {
                        info!(peer = %address, "peer closed connection");
                        break;
                    }
                    Err(e) => {
                        warn!(peer = %address, error = %e, "read error; dropping connection");
                        break;
                    }
                }
            }

            self.outbound.lock().await.remove(&address);
            debug!(peer = %address, state = ?PeerState::Closed, "connection closed; will redial");
            let _ = state; // state machine tracked for observability only
            tokio::time::sleep(RECONNECT_BACKOFF).await;
        }
    }

    /// Spawns the single inbound accept loop on the replication port.
    pub fn spawn_inbound(self: &Arc<Self>, listener: TcpListener) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, peer_addr)) => {
                        let this = Arc::clone(&this);
                        tokio::spawn(async move {
                            this.inbound_connection(stream, peer_addr.to_string()).await;
                        });
                    }
                    Err(e) => {
                        warn!(error = %e, "accept failed on replication listener");
                    }
                }
            }
        });
    }

    async fn inbound_connection(self: Arc<Self>, stream: TcpStream, peer_addr: String) {
        let (read_half, write_half) = stream.into_split();
        let writer = Arc::new(AsyncMutex::new(write_half));
        let mut reader = BufReader::new(read_half);
        loop {
            match read_frame(&mut reader).await {
                Ok(Some(frame)) => self.apply_received(frame, Some(&writer)).await,
                Ok(None) => {
                    debug!(peer = %peer_addr, "inbound peer closed connection");
                    break;
                }
                Err(e) => {
                    warn!(peer = %peer_addr, error = %e, "read error on inbound connection");
                    break;
                }
            }
        }
    }

    /// Applies one received frame with `origin = peer`: mutate the store
    /// and persistence, never broadcast. `SYNC_REQ` triggers a bootstrap
    /// dump back over `writer` when present (only inbound connections are
    /// ever asked for one); `SYNC_END` is logged only.
    async fn apply_received(&self, frame: Frame, writer: Option<&PeerWriter>) {
        match frame {
            Frame::Set { key, value, expiration } | Frame::SyncItem { key, value, expiration } => {
                self.store.set(key.clone(), value.clone(), expiration).await;
                self.persistence.upsert(&key, &value, Some(expiration)).await;
            }
            Frame::Del { key } => {
                self.store.delete(&key).await;
                self.persistence.delete(&key).await;
            }
            Frame::Flush => {
                self.store.flush().await;
                self.persistence.delete_all().await;
            }
            Frame::SyncEnd => {
                debug!("received unsolicited SYNC_END");
            }
            Frame::SyncReq => {
                if let Some(writer) = writer {
                    self.send_bootstrap_dump(writer).await;
                } else {
                    warn!("received SYNC_REQ on an outbound connection; ignoring");
                }
            }
        }
    }

    /// Emits every non-expired entry as `SYNC_ITEM`, then `SYNC_END`.
    async fn send_bootstrap_dump(&self, writer: &PeerWriter) {
        let snapshot = self.store.snapshot_non_expired().await;
        let mut guard = writer.lock().await;
        for (key, entry) in snapshot {
            let frame = Frame::SyncItem { key, value: entry.value, expiration: entry.expiration };
            if let Err(e) = write_frame(&mut *guard, &frame).await {
                warn!(error = %e, "bootstrap dump write failed");
                return;
            }
        }
        if let Err(e) = write_frame(&mut *guard, &Frame::SyncEnd).await {
            warn!(error = %e, "failed to terminate bootstrap dump");
        }
        let _ = guard.flush().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::test_support::MockClock;
    use crate::persistence::SqlitePersistence;
    use bytes::Bytes;

    fn manager() -> Arc<PeerManager> {
        let store = Arc::new(Store::new(Arc::new(MockClock::new(1000))));
        let persistence: Arc<dyn Persistence> = Arc::new(SqlitePersistence::open_in_memory().unwrap());
        PeerManager::new(store, persistence)
    }

    #[tokio::test]
    async fn applying_a_received_set_updates_the_store_without_a_writer() {
        let mgr = manager();
        mgr.apply_received(Frame::Set { key: "k".into(), value: Bytes::from_static(b"v"), expiration: 0 }, None).await;
        assert_eq!(mgr.store.len().await, 1);
    }

    #[tokio::test]
    async fn sync_req_without_writer_is_ignored_not_panicking() {
        let mgr = manager();
        mgr.apply_received(Frame::SyncReq, None).await;
    }

    #[tokio::test]
    async fn broadcast_with_no_peers_is_a_harmless_no_op() {
        let mgr = manager();
        mgr.broadcast(Frame::Flush).await;
    }

    #[tokio::test]
    async fn peer_addresses_starts_empty() {
        let mgr = manager();
        assert!(mgr.peer_addresses().await.is_empty());
    }
}
