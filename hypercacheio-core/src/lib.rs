//! The replicated cache engine: an in-memory key/value store with TTL and
//! atomic compare-style operations, mirrored to an embedded SQLite table
//! and eagerly replicated to every connected peer over a small binary
//! framed protocol.
//!
//! This crate has no HTTP surface of its own — `hypercacheio-server`
//! wraps an [`Engine`] with the authenticated REST API.

pub mod clock;
pub mod codec;
pub mod engine;
pub mod peer;
pub mod persistence;
pub mod store;

pub use clock::{Clock, SystemClock};
pub use codec::{read_frame, write_frame, Frame};
pub use engine::Engine;
pub use peer::PeerManager;
pub use persistence::{Persistence, PersistedEntry, SqlitePersistence};
pub use store::{CacheEntry, GetOutcome, LockAcquireOutcome, Store};
