//! Demultiplexing of the combined exec output stream.
//!
//! The runtime delivers stdout and stderr over one stream of framed
//! chunks: an 8-byte header (stream id, three zero bytes, payload length
//! as big-endian u32) followed by the payload. Splitting that back into
//! per-stream chunks is a pure transformation over the byte stream.

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::errors::{LivepushError, LivepushResult};

/// Stream id carried in the frame header for stderr.
const STDERR_STREAM: u8 = 2;

/// One demultiplexed output chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputChunk {
    pub data: Vec<u8>,
    pub is_stderr: bool,
}

/// Frame reader over a combined exec stream.
pub struct Demuxer<R> {
    reader: R,
}

impl<R: AsyncRead + Unpin> Demuxer<R> {
    pub fn new(reader: R) -> Self {
        Self { reader }
    }

    /// Read the next chunk, or `None` on clean end-of-stream.
    ///
    /// A stream that ends inside a frame is a runtime error.
    pub async fn next_chunk(&mut self) -> LivepushResult<Option<OutputChunk>> {
        let mut header = [0u8; 8];
        let got = read_full(&mut self.reader, &mut header).await?;
        if got == 0 {
            return Ok(None);
        }
        if got < header.len() {
            return Err(LivepushError::Runtime(
                "truncated exec stream frame header".to_string(),
            ));
        }

        let len = u32::from_be_bytes([header[4], header[5], header[6], header[7]]) as usize;
        let mut data = vec![0u8; len];
        let got = read_full(&mut self.reader, &mut data).await?;
        if got < len {
            return Err(LivepushError::Runtime(
                "truncated exec stream frame payload".to_string(),
            ));
        }

        Ok(Some(OutputChunk {
            data,
            is_stderr: header[0] == STDERR_STREAM,
        }))
    }
}

async fn read_full<R: AsyncRead + Unpin>(
    reader: &mut R,
    buf: &mut [u8],
) -> LivepushResult<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

/// Frame a payload the way the runtime does (test + fake support).
pub fn mux_frame(data: &[u8], is_stderr: bool) -> Vec<u8> {
    let mut frame = Vec::with_capacity(8 + data.len());
    frame.push(if is_stderr { STDERR_STREAM } else { 1 });
    frame.extend_from_slice(&[0, 0, 0]);
    frame.extend_from_slice(&(data.len() as u32).to_be_bytes());
    frame.extend_from_slice(data);
    frame
}
