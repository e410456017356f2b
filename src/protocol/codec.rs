//! Length-delimited framing for host messages.
//!
//! ```text
//! ┌────────────────────┐
//! │ length: i32 (LE)   │  <- body length, header excluded
//! │ type: [u8; 16]     │  <- message GUID, .NET byte order
//! │ body: BSON         │
//! └────────────────────┘
//! ```

use super::{Message, ProtocolError};
use crate::constants::{FRAME_HEADER_SIZE, MAX_MESSAGE_BYTES};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::trace;
use uuid::Uuid;

/// One decoded inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Received {
    Message(Message),
    /// A message type this client does not handle.
    Unknown(Uuid),
}

/// Serializes a message into a complete frame.
pub fn encode(message: &Message) -> Result<Vec<u8>, ProtocolError> {
    let body = message.encode_body()?;
    if body.len() > MAX_MESSAGE_BYTES {
        return Err(ProtocolError::TooLarge(body.len()));
    }
    let mut frame = Vec::with_capacity(FRAME_HEADER_SIZE + body.len());
    frame.extend_from_slice(&(body.len() as i32).to_le_bytes());
    frame.extend_from_slice(&message.type_id().to_bytes_le());
    frame.extend_from_slice(&body);
    Ok(frame)
}

pub async fn write_message<W>(writer: &mut W, message: &Message) -> Result<(), ProtocolError>
where
    W: AsyncWrite + Unpin,
{
    let frame = encode(message)?;
    trace!(len = frame.len(), type_id = %message.type_id(), "writing message");
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

/// Reads one frame.
///
/// Returns `Ok(None)` if the stream ends cleanly before a header starts.
pub async fn read_message<R>(reader: &mut R) -> Result<Option<Received>, ProtocolError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; FRAME_HEADER_SIZE];
    let n = reader.read(&mut header).await?;
    if n == 0 {
        return Ok(None);
    }
    if n < FRAME_HEADER_SIZE {
        reader.read_exact(&mut header[n..]).await?;
    }

    let len = i32::from_le_bytes([header[0], header[1], header[2], header[3]]);
    if len < 0 {
        return Err(ProtocolError::InvalidLength(len));
    }
    let len = len as usize;
    if len > MAX_MESSAGE_BYTES {
        return Err(ProtocolError::TooLarge(len));
    }
    let mut guid = [0u8; 16];
    guid.copy_from_slice(&header[4..]);
    let type_id = Uuid::from_bytes_le(guid);

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    trace!(len, type_id = %type_id, "read message");

    Ok(Some(match Message::decode(type_id, &body)? {
        Some(message) => Received::Message(message),
        None => Received::Unknown(type_id),
    }))
}
