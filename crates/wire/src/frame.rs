// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Length-prefixed binary framing: a 32-bit command/status code in network
//! byte order, a 32-bit payload length in network byte order, then that
//! many bytes of ASCII payload.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{FramingError, WireError, MAX_PAYLOAD_LEN};

/// One frame as it travels over a FIFO, in either direction.
///
/// `code` is a command when the daemon is the reader and a status when the
/// daemon is the writer; the wire format does not distinguish the two.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub code: u32,
    pub payload: String,
}

impl Frame {
    pub fn new(code: u32, payload: impl Into<String>) -> Self {
        Self { code, payload: payload.into() }
    }

    /// Read one frame from `reader`, blocking until it is complete.
    ///
    /// An EOF before any header bytes arrive is reported as an I/O
    /// `UnexpectedEof`; an EOF mid-frame (header read, payload short) is
    /// reported as [`WireError::Truncated`] so callers can tell a clean
    /// disconnect apart from a peer that died mid-write.
    pub async fn read<R>(reader: &mut R) -> Result<Self, FramingError>
    where
        R: AsyncRead + Unpin,
    {
        let code = match reader.read_u32().await {
            Ok(v) => v,
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Err(e.into()),
            Err(e) => return Err(e.into()),
        };
        let len = reader.read_u32().await.map_err(|_| WireError::Truncated)?;
        if len > MAX_PAYLOAD_LEN {
            return Err(WireError::PayloadTooLarge(len).into());
        }
        let mut buf = vec![0u8; len as usize];
        reader.read_exact(&mut buf).await.map_err(|_| WireError::Truncated)?;
        let payload = String::from_utf8(buf).map_err(|_| WireError::InvalidPayload)?;
        Ok(Frame { code, payload })
    }

    /// Write one frame to `writer` and flush it.
    pub async fn write<W>(&self, writer: &mut W) -> Result<(), FramingError>
    where
        W: AsyncWrite + Unpin,
    {
        let bytes = self.payload.as_bytes();
        if bytes.len() > MAX_PAYLOAD_LEN as usize {
            return Err(WireError::PayloadTooLarge(bytes.len() as u32).into());
        }
        writer.write_u32(self.code).await?;
        writer.write_u32(bytes.len() as u32).await?;
        writer.write_all(bytes).await?;
        writer.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
#[path = "frame_tests.rs"]
mod tests;
