// src/core/protocol/line_codec.rs

//! Implements newline framing for the command protocol and the corresponding
//! `Encoder` and `Decoder` for network communication.

use super::reply::Reply;
use crate::core::CmmdError;
use bytes::{Buf, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

/// The line terminator used in both directions.
const LF: u8 = b'\n';

/// Fallback limit for a single command line when none is configured.
pub const DEFAULT_MAX_LINE_LENGTH: usize = 4096;

/// A `tokio_util::codec` implementation that splits the inbound byte stream into
/// lines and encodes outbound `Reply` values.
///
/// Decoded lines have surrounding whitespace (including a trailing `\r`) removed
/// and invalid UTF-8 replaced with U+FFFD, so a misbehaving client can never
/// fault the decoder with encoding garbage.
#[derive(Debug, Clone)]
pub struct LineCodec {
    max_line_length: usize,
    /// How far into the buffer we have already searched for a terminator.
    next_index: usize,
}

impl LineCodec {
    pub fn new(max_line_length: usize) -> Self {
        Self {
            max_line_length,
            next_index: 0,
        }
    }

    pub fn max_line_length(&self) -> usize {
        self.max_line_length
    }
}

impl Default for LineCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_LINE_LENGTH)
    }
}

impl Decoder for LineCodec {
    type Item = String;
    type Error = CmmdError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let search_from = self.next_index.min(src.len());
        match src[search_from..].iter().position(|b| *b == LF) {
            Some(offset) => {
                let pos = search_from + offset;
                self.next_index = 0;
                if pos > self.max_line_length {
                    return Err(CmmdError::LineTooLong);
                }
                let line = String::from_utf8_lossy(&src[..pos]).trim().to_string();
                src.advance(pos + 1);
                Ok(Some(line))
            }
            None => {
                if src.len() > self.max_line_length {
                    return Err(CmmdError::LineTooLong);
                }
                self.next_index = src.len();
                Ok(None)
            }
        }
    }

    /// A trailing fragment without a terminator is dropped when the peer closes.
    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.decode(src)? {
            Some(line) => Ok(Some(line)),
            None => {
                src.clear();
                self.next_index = 0;
                Ok(None)
            }
        }
    }
}

impl Encoder<Reply> for LineCodec {
    type Error = CmmdError;

    fn encode(&mut self, item: Reply, dst: &mut BytesMut) -> Result<(), Self::Error> {
        item.write_to(dst);
        Ok(())
    }
}
