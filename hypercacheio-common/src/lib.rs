use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Keys longer than this are rejected at the API boundary with 413.
pub const MAX_KEY_SIZE: usize = 1024;

/// Values larger than this are rejected at the API boundary with 413.
pub const MAX_VALUE_SIZE: usize = 4 * 1024 * 1024;

/// Prefix under which lock entries share the cache's key space.
pub const LOCK_KEY_PREFIX: &str = "lock:";

/// Body shape returned for every 4xx/5xx JSON error response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Errors surfaced by the engine and its collaborators.
///
/// Configuration and bind errors are fatal at startup; the rest are logged
/// and handled per-request without aborting the process.
#[derive(Debug, Error)]
pub enum HypercacheError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("failed to bind listener: {0}")]
    Bind(#[source] std::io::Error),

    #[error("persistence error: {0}")]
    Persistence(String),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("value codec error: {0}")]
    Codec(String),
}

/// Errors from decoding a replication frame off the wire.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("connection closed mid-frame")]
    ShortRead,

    #[error("unknown opcode byte: {0:#04x}")]
    UnknownOpcode(u8),

    #[error("key length {0} exceeds the 16-bit wire limit")]
    KeyTooLarge(usize),

    #[error("value length {0} exceeds the 32-bit wire limit")]
    ValueTooLarge(usize),

    #[error("I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for ProtocolError {
    fn from(err: std::io::Error) -> Self {
        // A read/write error on the underlying socket is indistinguishable
        // from a short read at this layer; either way the connection must
        // be discarded, never resynchronized.
        if err.kind() == std::io::ErrorKind::UnexpectedEof {
            ProtocolError::ShortRead
        } else {
            ProtocolError::Io(err.to_string())
        }
    }
}

/// Errors the client-facing library surfaces.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("network error: {0}")]
    Network(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("HTTP {0}: {1}")]
    Http(u16, String),
}

pub type Result<T> = std::result::Result<T, HypercacheError>;

/// Translates an arbitrary client-supplied JSON value into the opaque byte
/// string the cache engine stores, and back.
///
/// The engine never inspects stored values; it only ever copies, compares
/// (for lock ownership), and returns bytes. This trait is the seam where
/// that opacity is injected, so the wire encoding clients use can evolve
/// independently of the cache engine.
pub trait ValueCodec: Send + Sync {
    fn encode(&self, value: &serde_json::Value) -> std::result::Result<Vec<u8>, String>;
    fn decode(&self, bytes: &[u8]) -> std::result::Result<serde_json::Value, String>;
}

/// Default codec: values travel as JSON on the wire and are stored as the
/// raw JSON encoding of whatever the client sent.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonValueCodec;

impl ValueCodec for JsonValueCodec {
    fn encode(&self, value: &serde_json::Value) -> std::result::Result<Vec<u8>, String> {
        serde_json::to_vec(value).map_err(|e| e.to_string())
    }

    fn decode(&self, bytes: &[u8]) -> std::result::Result<serde_json::Value, String> {
        serde_json::from_slice(bytes).map_err(|e| e.to_string())
    }
}

/// Builds the namespaced key under which a named lock's entry is stored.
pub fn lock_key(name: &str) -> String {
    format!("{LOCK_KEY_PREFIX}{name}")
}
