//! Newline-delimited framing.
//!
//! A TCP read may return half a record or several records at once, so the
//! reader cannot assume one read equals one message. [`LineCodec`] restores
//! record boundaries: each frame is the bytes up to (and not including) a
//! line feed. Frames longer than the limit are a protocol violation and kill
//! the connection.

use crate::message::CodecError;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

/// Default maximum frame length (64 KiB).
pub const DEFAULT_MAX_FRAME_LEN: usize = 64 * 1024;

/// Splits a byte stream into LF-terminated frames.
#[derive(Debug)]
pub struct LineCodec {
    max_frame_len: usize,
    /// Offset already scanned for a delimiter, so partial reads are not
    /// rescanned from the start.
    next_index: usize,
}

impl LineCodec {
    /// Creates a codec with [`DEFAULT_MAX_FRAME_LEN`].
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_frame_len(DEFAULT_MAX_FRAME_LEN)
    }

    /// Creates a codec with a custom frame length limit.
    #[must_use]
    pub fn with_max_frame_len(max_frame_len: usize) -> Self {
        Self {
            max_frame_len,
            next_index: 0,
        }
    }
}

impl Default for LineCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for LineCodec {
    type Item = Bytes;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>, CodecError> {
        if let Some(offset) = src[self.next_index..].iter().position(|b| *b == b'\n') {
            let end = self.next_index + offset;
            let mut line = src.split_to(end + 1);
            line.truncate(end);
            if line.ends_with(b"\r") {
                line.truncate(line.len() - 1);
            }
            self.next_index = 0;
            return Ok(Some(line.freeze()));
        }
        if src.len() > self.max_frame_len {
            src.advance(src.len());
            self.next_index = 0;
            return Err(CodecError::FrameTooLong {
                limit: self.max_frame_len,
            });
        }
        self.next_index = src.len();
        Ok(None)
    }
}

impl<'a> Encoder<&'a str> for LineCodec {
    type Error = CodecError;

    fn encode(&mut self, item: &str, dst: &mut BytesMut) -> Result<(), CodecError> {
        if item.len() >= self.max_frame_len {
            return Err(CodecError::FrameTooLong {
                limit: self.max_frame_len,
            });
        }
        dst.reserve(item.len() + 1);
        dst.put(item.as_bytes());
        dst.put_u8(b'\n');
        Ok(())
    }
}
