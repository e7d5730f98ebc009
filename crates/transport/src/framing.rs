//! Length-prefixed identity-routed frame codec.
//!
//! A routed message is three length-prefixed parts on the wire:
//!
//! ```text
//! +---------+----------+---------+-------+---------+---------+
//! | len(id) | identity | len = 0 | empty | len(pl) | payload |
//! +---------+----------+---------+-------+---------+---------+
//! ```
//!
//! Length prefixes are 4-byte big-endian. The middle part is a mandatory
//! empty delimiter separating the routing envelope from the payload.
//! Lengths are validated before any allocation.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::TransportError;

/// Default cap on a single part's length.
pub const MAX_PART_SIZE: usize = 1024 * 1024;

const HEADER_LEN: usize = 4;

/// One routed message: the peer identity and the payload bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutedFrame {
    /// Peer identity this message is addressed to (coordinator → seller)
    /// or originates from (seller → coordinator).
    pub identity: Bytes,

    /// Serialized envelope bytes.
    pub payload: Bytes,
}

impl RoutedFrame {
    /// Creates a frame from an identity string and payload bytes.
    pub fn new(identity: impl AsRef<str>, payload: impl Into<Bytes>) -> Self {
        Self {
            identity: Bytes::copy_from_slice(identity.as_ref().as_bytes()),
            payload: payload.into(),
        }
    }

    /// Returns the identity as UTF-8, if valid.
    pub fn identity_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.identity).ok()
    }
}

/// Codec turning a byte stream into [`RoutedFrame`]s and back.
#[derive(Debug, Clone)]
pub struct RoutedCodec {
    max_part_size: usize,
}

impl RoutedCodec {
    /// Creates a codec with the default part-size limit.
    pub fn new() -> Self {
        Self {
            max_part_size: MAX_PART_SIZE,
        }
    }

    /// Creates a codec with a custom part-size limit.
    pub fn with_max_part_size(max_part_size: usize) -> Self {
        Self { max_part_size }
    }
}

impl Default for RoutedCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for RoutedCodec {
    type Item = RoutedFrame;
    type Error = TransportError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<RoutedFrame>, TransportError> {
        // Walk the three parts without consuming, validating lengths
        // before allocation.
        let mut offset = 0;
        let mut lengths = [0usize; 3];
        for part in &mut lengths {
            if src.len() < offset + HEADER_LEN {
                return Ok(None);
            }
            let length = u32::from_be_bytes([
                src[offset],
                src[offset + 1],
                src[offset + 2],
                src[offset + 3],
            ]) as usize;
            if length > self.max_part_size {
                return Err(TransportError::FrameTooLarge {
                    length,
                    limit: self.max_part_size,
                });
            }
            if src.len() < offset + HEADER_LEN + length {
                src.reserve(offset + HEADER_LEN + length - src.len());
                return Ok(None);
            }
            *part = length;
            offset += HEADER_LEN + length;
        }

        if lengths[1] != 0 {
            return Err(TransportError::Malformed(format!(
                "expected empty delimiter, got {} bytes",
                lengths[1]
            )));
        }

        src.advance(HEADER_LEN);
        let identity = src.split_to(lengths[0]).freeze();
        src.advance(HEADER_LEN); // empty delimiter
        src.advance(HEADER_LEN);
        let payload = src.split_to(lengths[2]).freeze();

        Ok(Some(RoutedFrame { identity, payload }))
    }
}

impl Encoder<RoutedFrame> for RoutedCodec {
    type Error = TransportError;

    fn encode(&mut self, frame: RoutedFrame, dst: &mut BytesMut) -> Result<(), TransportError> {
        for part in [&frame.identity, &frame.payload] {
            if part.len() > self.max_part_size {
                return Err(TransportError::FrameTooLarge {
                    length: part.len(),
                    limit: self.max_part_size,
                });
            }
        }

        dst.reserve(3 * HEADER_LEN + frame.identity.len() + frame.payload.len());
        dst.put_u32(frame.identity.len() as u32);
        dst.put_slice(&frame.identity);
        dst.put_u32(0);
        dst.put_u32(frame.payload.len() as u32);
        dst.put_slice(&frame.payload);
        Ok(())
    }
}
