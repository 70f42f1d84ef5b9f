//! The replication wire format: six opcodes, big-endian, no outer framing.
//!
//! ```text
//! SET       0x01  keyLen:u16 valLen:u32 expiration:u32 key value
//! DEL       0x02  keyLen:u16 key
//! SYNC_REQ  0x03  —
//! SYNC_ITEM 0x04  (same shape as SET)
//! SYNC_END  0x05  —
//! FLUSH     0x06  —
//! ```
//!
//! Decoding fails closed: a short read or an impossible length yields a
//! [`ProtocolError`] and the caller must close the connection rather than
//! attempt to resynchronize.

use bytes::Bytes;
use hypercacheio_common::ProtocolError;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

const OP_SET: u8 = 0x01;
const OP_DEL: u8 = 0x02;
const OP_SYNC_REQ: u8 = 0x03;
const OP_SYNC_ITEM: u8 = 0x04;
const OP_SYNC_END: u8 = 0x05;
const OP_FLUSH: u8 = 0x06;

/// Maximum key length representable by the 16-bit `keyLen` field.
pub const MAX_WIRE_KEY_LEN: usize = u16::MAX as usize;

/// Maximum value length representable by the 32-bit `valLen` field.
pub const MAX_WIRE_VALUE_LEN: usize = u32::MAX as usize;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Set { key: String, value: Bytes, expiration: u32 },
    Del { key: String },
    SyncReq,
    SyncItem { key: String, value: Bytes, expiration: u32 },
    SyncEnd,
    Flush,
}

impl Frame {
    /// Validates the key/value sizes this frame would carry on the wire.
    /// The store calls this before broadcast so oversize entries are
    /// rejected before any peer ever sees a partial write attempt.
    pub fn check_wire_limits(key: &str, value_len: usize) -> Result<(), ProtocolError> {
        if key.len() > MAX_WIRE_KEY_LEN {
            return Err(ProtocolError::KeyTooLarge(key.len()));
        }
        if value_len > MAX_WIRE_VALUE_LEN {
            return Err(ProtocolError::ValueTooLarge(value_len));
        }
        Ok(())
    }
}

/// Writes one frame, contiguous header/key/value, to `w`.
///
/// Any write failure partway through must be treated by the caller as a
/// dead connection — frames are never resynchronizable mid-stream.
pub async fn write_frame<W: AsyncWrite + Unpin>(w: &mut W, frame: &Frame) -> Result<(), ProtocolError> {
    match frame {
        Frame::Set { key, value, expiration } => write_set_like(w, OP_SET, key, value, *expiration).await,
        Frame::SyncItem { key, value, expiration } => write_set_like(w, OP_SYNC_ITEM, key, value, *expiration).await,
        Frame::Del { key } => {
            Frame::check_wire_limits(key, 0)?;
            w.write_u8(OP_DEL).await?;
            w.write_u16(key.len() as u16).await?;
            w.write_all(key.as_bytes()).await?;
            Ok(())
        }
        Frame::SyncReq => Ok(w.write_u8(OP_SYNC_REQ).await?),
        Frame::SyncEnd => Ok(w.write_u8(OP_SYNC_END).await?),
        Frame::Flush => Ok(w.write_u8(OP_FLUSH).await?),
    }
}

async fn write_set_like<W: AsyncWrite + Unpin>(
    w: &mut W,
    opcode: u8,
    key: &str,
    value: &Bytes,
    expiration: u32,
) -> Result<(), ProtocolError> {
    Frame::check_wire_limits(key, value.len())?;
    w.write_u8(opcode).await?;
    w.write_u16(key.len() as u16).await?;
    w.write_u32(value.len() as u32).await?;
    w.write_u32(expiration).await?;
    w.write_all(key.as_bytes()).await?;
    w.write_all(value).await?;
    Ok(())
}

/// Reads one frame from `r`. `Ok(None)` means the peer closed the
/// connection cleanly before sending an opcode byte (a normal EOF, not a
/// protocol violation); any other failure is a [`ProtocolError`].
pub async fn read_frame<R: AsyncRead + Unpin>(r: &mut R) -> Result<Option<Frame>, ProtocolError> {
    let opcode = match r.read_u8().await {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    let frame = match opcode {
        OP_SET => read_set_like(r, false).await?,
        OP_SYNC_ITEM => read_set_like(r, true).await?,
        OP_DEL => {
            let key_len = r.read_u16().await? as usize;
            let mut key_buf = vec![0u8; key_len];
            r.read_exact(&mut key_buf).await?;
            Frame::Del { key: String::from_utf8_lossy(&key_buf).into_owned() }
        }
        OP_SYNC_REQ => Frame::SyncReq,
        OP_SYNC_END => Frame::SyncEnd,
        OP_FLUSH => Frame::Flush,
        other => return Err(ProtocolError::UnknownOpcode(other)),
    };
    Ok(Some(frame))
}

async fn read_set_like<R: AsyncRead + Unpin>(r: &mut R, is_sync_item: bool) -> Result<Frame, ProtocolError> {
    let key_len = r.read_u16().await? as usize;
    let value_len = r.read_u32().await? as usize;
    let expiration = r.read_u32().await?;

    let mut key_buf = vec![0u8; key_len];
    r.read_exact(&mut key_buf).await?;
    let mut value_buf = vec![0u8; value_len];
    r.read_exact(&mut value_buf).await?;

    let key = String::from_utf8_lossy(&key_buf).into_owned();
    let value = Bytes::from(value_buf);
    if is_sync_item {
        Ok(Frame::SyncItem { key, value, expiration })
    } else {
        Ok(Frame::Set { key, value, expiration })
    }
}
