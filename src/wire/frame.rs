//! # Length-Prefixed Framing
//!
//! A frame is a 4-byte big-endian unsigned length followed by exactly that
//! many payload bytes. Both the header and the payload are read with
//! read-exact loops; short reads on a stream boundary are I/O errors, never
//! silent truncation.
//!
//! `limit` is the per-protocol bound: frames of `limit` bytes or more are
//! rejected before any allocation.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{Error, Result};

/// Write one frame.
pub async fn write_frame<W>(io: &mut W, payload: &[u8], limit: usize) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    if payload.len() >= limit {
        return Err(Error::FrameTooLarge {
            size: payload.len(),
            max: limit,
        });
    }
    io.write_all(&(payload.len() as u32).to_be_bytes()).await?;
    io.write_all(payload).await?;
    io.flush().await?;
    Ok(())
}

/// Read one frame, rejecting oversized length headers before allocating.
pub async fn read_frame<R>(io: &mut R, limit: usize) -> Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; 4];
    io.read_exact(&mut header).await?;

    let length = u32::from_be_bytes(header) as usize;
    if length >= limit {
        return Err(Error::FrameTooLarge {
            size: length,
            max: limit,
        });
    }

    let mut payload = vec![0u8; length];
    io.read_exact(&mut payload).await?;
    Ok(payload)
}
