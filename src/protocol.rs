//! ADB transport wire framing.
//!
//! A pure codec over the 24-byte ADB message header plus payload. No
//! connection state lives here; see [`crate::device_proxy`] for the
//! multiplexer that rides on top of it.

use crate::error::{AdbProxyError, ProtocolErrorKind, Result};
use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Header is six little-endian u32 fields; see `command`.
pub const HEADER_LEN: usize = 24;

/// Fixed protocol version advertised in our `CNXN` reply.
pub const PROTOCOL_VERSION: u32 = 0x0100_0000;

/// Fixed max-payload advertised in our `CNXN` reply, and the cap enforced
/// on decode to bound allocation for a malicious or corrupt length prefix.
pub const MAX_PAYLOAD: u32 = 262_144;

/// Recognized command tags, ASCII interpreted little-endian as u32.
pub mod command {
    pub const CNXN: [u8; 4] = *b"CNXN";
    pub const OPEN: [u8; 4] = *b"OPEN";
    pub const OKAY: [u8; 4] = *b"OKAY";
    pub const WRTE: [u8; 4] = *b"WRTE";
    pub const CLSE: [u8; 4] = *b"CLSE";
}

fn tag_as_u32(tag: [u8; 4]) -> u32 {
    u32::from_le_bytes(tag)
}

/// One ADB transport-layer message.
#[derive(Debug, Clone)]
pub struct Message {
    pub command: [u8; 4],
    pub arg0: u32,
    pub arg1: u32,
    pub payload: Bytes,
    /// CRC-32 of `payload` as carried on the wire. Computed fresh on
    /// construction for outbound messages; taken verbatim from the peer
    /// on decode and not enforced unless the caller opts in (see
    /// [`Message::verify_crc`]).
    pub payload_crc32: u32,
}

impl Message {
    pub fn new(command: [u8; 4], arg0: u32, arg1: u32, payload: impl Into<Bytes>) -> Self {
        let payload = payload.into();
        let payload_crc32 = crc32fast::hash(&payload);
        Self {
            command,
            arg0,
            arg1,
            payload,
            payload_crc32,
        }
    }

    pub fn command_str(&self) -> &str {
        std::str::from_utf8(&self.command).unwrap_or("????")
    }

    /// Recomputes the payload's CRC-32 and compares it against the value
    /// carried on the wire. The reference implementation never calls this
    /// on decode; it is exposed so callers can opt into enforcement.
    pub fn verify_crc(&self) -> bool {
        crc32fast::hash(&self.payload) == self.payload_crc32
    }
}

/// Encodes `msg` as `header || payload`. Performs no length validation.
pub fn encode(msg: &Message) -> BytesMut {
    let mut buf = BytesMut::with_capacity(HEADER_LEN + msg.payload.len());
    buf.put_slice(&msg.command);
    buf.put_u32_le(msg.arg0);
    buf.put_u32_le(msg.arg1);
    buf.put_u32_le(msg.payload.len() as u32);
    buf.put_u32_le(crc32fast::hash(&msg.payload));
    buf.put_u32_le(tag_as_u32(msg.command) ^ 0xFFFF_FFFF);
    buf.put_slice(&msg.payload);
    buf
}

/// Encodes and writes `msg` to `writer` in one call.
pub async fn write_message<W>(writer: &mut W, msg: &Message) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let buf = encode(msg);
    writer.write_all(&buf).await?;
    Ok(())
}

/// Reads exactly one message from `reader`: 24-byte header, then
/// `payload_len` bytes of payload.
pub async fn decode<R>(reader: &mut R) -> Result<Message>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; HEADER_LEN];
    reader.read_exact(&mut header).await?;

    let mut command = [0u8; 4];
    command.copy_from_slice(&header[0..4]);
    let arg0 = u32::from_le_bytes(header[4..8].try_into().unwrap());
    let arg1 = u32::from_le_bytes(header[8..12].try_into().unwrap());
    let payload_len = u32::from_le_bytes(header[12..16].try_into().unwrap());
    let payload_crc32 = u32::from_le_bytes(header[16..20].try_into().unwrap());
    let magic = u32::from_le_bytes(header[20..24].try_into().unwrap());

    if tag_as_u32(command) ^ 0xFFFF_FFFF != magic {
        return Err(AdbProxyError::Protocol {
            kind: ProtocolErrorKind::Framing,
        });
    }

    if payload_len > MAX_PAYLOAD {
        return Err(AdbProxyError::Protocol {
            kind: ProtocolErrorKind::Framing,
        });
    }

    let mut payload = vec![0u8; payload_len as usize];
    reader.read_exact(&mut payload).await?;

    Ok(Message {
        command,
        arg0,
        arg1,
        payload: Bytes::from(payload),
        payload_crc32,
    })
}
