//! Stream framing for commands.
//!
//! The decoder only splits the byte stream into length-delimited frames; it
//! does not interpret opcodes or properties. Keeping the two apart lets a
//! session drop a frame with an unknown opcode or a malformed property and keep
//! reading, since the frame boundary is already known.

use bytes::{Buf, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::core::command::{Command, FRAME_HEADER_LEN, OPCODE_LEN};
use crate::error::{ProtocolError, Result};

/// Default upper bound on a frame body (64 KiB)
pub const DEFAULT_MAX_FRAME_SIZE: usize = 64 * 1024;

/// One length-delimited frame, not yet parsed into a [`Command`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    body: Bytes,
}

impl Frame {
    /// Raw opcode, if the body is long enough to carry one
    pub fn raw_opcode(&self) -> Option<u16> {
        (self.body.len() >= OPCODE_LEN).then(|| u16::from_be_bytes([self.body[0], self.body[1]]))
    }

    /// Bytes this frame occupied on the wire
    pub fn wire_len(&self) -> usize {
        FRAME_HEADER_LEN + self.body.len()
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Parse opcode and properties
    pub fn parse(&self) -> Result<Command> {
        Command::from_body(&self.body)
    }
}

/// Length-prefixed framing codec
#[derive(Debug, Clone, Copy)]
pub struct CommandCodec {
    max_frame_size: usize,
}

impl CommandCodec {
    pub fn new(max_frame_size: usize) -> Self {
        Self { max_frame_size }
    }

    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }
}

impl Default for CommandCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_SIZE)
    }
}

impl Decoder for CommandCodec {
    type Item = Frame;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>> {
        if src.len() < FRAME_HEADER_LEN {
            src.reserve(FRAME_HEADER_LEN - src.len());
            return Ok(None);
        }

        let declared = u32::from_be_bytes([src[0], src[1], src[2], src[3]]) as usize;
        if declared > self.max_frame_size {
            return Err(ProtocolError::OversizedFrame(declared));
        }

        let total = FRAME_HEADER_LEN + declared;
        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }

        src.advance(FRAME_HEADER_LEN);
        let body = src.split_to(declared).freeze();
        Ok(Some(Frame { body }))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Frame>> {
        if let Some(frame) = self.decode(src)? {
            return Ok(Some(frame));
        }
        if src.is_empty() {
            return Ok(None);
        }

        // peer hung up mid-frame
        let declared = if src.len() >= FRAME_HEADER_LEN {
            u32::from_be_bytes([src[0], src[1], src[2], src[3]]) as usize
        } else {
            FRAME_HEADER_LEN
        };
        let available = src.len().saturating_sub(FRAME_HEADER_LEN);
        src.clear();
        Err(ProtocolError::TruncatedFrame {
            declared,
            available,
        })
    }
}

impl Encoder<Command> for CommandCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: Command, dst: &mut BytesMut) -> Result<()> {
        let body_len = item.body_len();
        if body_len > self.max_frame_size {
            return Err(ProtocolError::OversizedFrame(body_len));
        }
        item.encode_into(dst)
    }
}
