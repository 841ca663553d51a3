//! WebSocket frame encode/decode
//!
//! Frames are ephemeral: built per write call and decoded per read call,
//! never retained. Encoding always sets FIN (fragmented emission is not
//! supported); decoding understands fragmentation enough to hand partial
//! payloads to the read loop for accumulation.

use std::io;

use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::WsError;

/// Inbound payload cap, checked before the payload buffer is allocated
///
/// The header can declare any 64-bit length; the allocation must not happen
/// until the claim is bounded.
pub const MAX_INBOUND_PAYLOAD: u64 = 16 * 1024 * 1024;

/// Frame opcode (RFC 6455 section 5.2)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    Continuation,
    Text,
    Binary,
    Close,
    Ping,
    Pong,
    /// Any opcode the RFC reserves
    Reserved(u8),
}

impl Opcode {
    pub fn from_u8(value: u8) -> Self {
        match value & 0x0F {
            0x0 => Opcode::Continuation,
            0x1 => Opcode::Text,
            0x2 => Opcode::Binary,
            0x8 => Opcode::Close,
            0x9 => Opcode::Ping,
            0xA => Opcode::Pong,
            other => Opcode::Reserved(other),
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            Opcode::Continuation => 0x0,
            Opcode::Text => 0x1,
            Opcode::Binary => 0x2,
            Opcode::Close => 0x8,
            Opcode::Ping => 0x9,
            Opcode::Pong => 0xA,
            Opcode::Reserved(value) => value & 0x0F,
        }
    }
}

/// One decoded frame
#[derive(Debug, Clone)]
pub struct Frame {
    pub fin: bool,
    pub opcode: Opcode,
    pub payload: Bytes,
}

/// Generate a non-zero 32-bit masking key
pub fn generate_mask() -> u32 {
    loop {
        let key: u32 = rand::random();
        if key != 0 {
            return key;
        }
    }
}

/// Encode a complete frame (FIN always set)
///
/// Masking XORs a copy of the payload with the repeating 4-byte key; the
/// caller's buffer is never touched.
pub fn encode_frame(opcode: Opcode, mask: Option<u32>, payload: &[u8]) -> BytesMut {
    let mut frame = BytesMut::with_capacity(payload.len() + 14);
    frame.put_u8(0x80 | (opcode.as_u8() & 0x0F));

    let mask_bit: u8 = if mask.is_some() { 0x80 } else { 0 };
    let length = payload.len();
    if length < 126 {
        frame.put_u8(mask_bit | length as u8);
    } else if length < 0x10000 {
        frame.put_u8(mask_bit | 0x7E);
        frame.put_u16(length as u16);
    } else {
        frame.put_u8(mask_bit | 0x7F);
        frame.put_u64(length as u64);
    }

    match mask {
        Some(key) => {
            let mask_bytes = key.to_be_bytes();
            frame.put_slice(&mask_bytes);
            for (i, byte) in payload.iter().enumerate() {
                frame.put_u8(byte ^ mask_bytes[i % 4]);
            }
        }
        None => frame.put_slice(payload),
    }
    frame
}

/// Encode and write one frame, then flush
pub async fn write_frame<W: AsyncWrite + Unpin>(
    writer: &mut W,
    opcode: Opcode,
    mask: Option<u32>,
    payload: &[u8],
) -> io::Result<()> {
    let frame = encode_frame(opcode, mask, payload);
    writer.write_all(&frame).await?;
    writer.flush().await
}

/// Read one frame, expanding extended lengths and unmasking in place
///
/// End of stream at any point is fatal ([`WsError::UnexpectedEof`]).
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Frame, WsError> {
    let first = reader.read_u8().await?;
    let fin = first & 0x80 != 0;
    let opcode = Opcode::from_u8(first & 0x0F);

    let second = reader.read_u8().await?;
    let masked = second & 0x80 != 0;
    let mut length = (second & 0x7F) as u64;
    if length == 0x7E {
        length = reader.read_u16().await? as u64;
    } else if length == 0x7F {
        length = reader.read_u64().await?;
    }
    if length > MAX_INBOUND_PAYLOAD {
        return Err(WsError::FrameTooLarge(length));
    }

    let mask = if masked {
        let mut key = [0u8; 4];
        reader.read_exact(&mut key).await?;
        Some(key)
    } else {
        None
    };

    let mut payload = vec![0u8; length as usize];
    reader.read_exact(&mut payload).await?;
    if let Some(key) = mask {
        for (i, byte) in payload.iter_mut().enumerate() {
            *byte ^= key[i % 4];
        }
    }

    Ok(Frame {
        fin,
        opcode,
        payload: payload.into(),
    })
}
