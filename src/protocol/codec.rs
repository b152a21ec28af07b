//! Binary framing for control-plane messages
//!
//! Frame layout (all integers big-endian):
//!
//! ```text
//! byte 0       : instruction tag (0..=7)
//! bytes 1..9   : body length, u64
//! bytes 9..9+N : body
//! ```

use crate::error::{CodecError, Result};
use crate::types::{InstructionKind, Message};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Size of the tag plus length prefix
pub const HEADER_LEN: usize = 9;

/// Largest body a stream reader accepts before dropping the connection
pub const MAX_BODY_LEN: u64 = 1024 * 1024;

/// Build the 9-byte frame header
pub fn build_header(instruction: InstructionKind, body_len: u64) -> [u8; HEADER_LEN] {
    let mut header = [0u8; HEADER_LEN];
    header[0] = instruction.tag();
    header[1..HEADER_LEN].copy_from_slice(&body_len.to_be_bytes());
    header
}

/// Parse a frame header into its instruction and declared body length
pub fn parse_header(header: &[u8; HEADER_LEN]) -> std::result::Result<(InstructionKind, u64), CodecError> {
    let instruction = InstructionKind::try_from(header[0])?;
    let mut len = [0u8; 8];
    len.copy_from_slice(&header[1..HEADER_LEN]);
    Ok((instruction, u64::from_be_bytes(len)))
}

/// Encode a message into a single contiguous frame
pub fn encode(msg: &Message) -> Vec<u8> {
    let mut buf = Vec::with_capacity(HEADER_LEN + msg.body.len());
    buf.extend_from_slice(&build_header(msg.instruction, msg.body.len() as u64));
    buf.extend_from_slice(&msg.body);
    buf
}

/// Decode one frame from the start of `buf`
///
/// Bytes after the declared body are ignored.
pub fn decode(buf: &[u8]) -> std::result::Result<Message, CodecError> {
    let Some(header) = buf.first_chunk::<HEADER_LEN>() else {
        return Err(CodecError::Truncated {
            expected: HEADER_LEN,
            available: buf.len(),
        });
    };
    let (instruction, body_len) = parse_header(header)?;

    let available = buf.len() - HEADER_LEN;
    let body_len = usize::try_from(body_len).map_err(|_| CodecError::Truncated {
        expected: usize::MAX,
        available: buf.len(),
    })?;
    if body_len > available {
        return Err(CodecError::Truncated {
            expected: HEADER_LEN.saturating_add(body_len),
            available: buf.len(),
        });
    }

    Ok(Message {
        instruction,
        body: buf[HEADER_LEN..HEADER_LEN + body_len].to_vec(),
    })
}

/// Read one message from a byte stream
///
/// Returns `Ok(None)` when the stream ends cleanly before a new header.
pub async fn read_message<R>(reader: &mut R) -> Result<Option<Message>>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; HEADER_LEN];
    match reader.read_exact(&mut header).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let (instruction, body_len) = parse_header(&header)?;
    if body_len > MAX_BODY_LEN {
        return Err(CodecError::FrameTooLarge {
            len: body_len,
            max: MAX_BODY_LEN,
        }
        .into());
    }

    // bounded by MAX_BODY_LEN above
    let mut body = vec![0u8; body_len as usize];
    reader.read_exact(&mut body).await?;
    Ok(Some(Message { instruction, body }))
}

/// Write one message to a byte stream and flush it
pub async fn write_message<W>(writer: &mut W, msg: &Message) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(&encode(msg)).await?;
    writer.flush().await?;
    Ok(())
}
