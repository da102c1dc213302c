// src/protocol/codec.rs

use crate::error::NsqError;
use crate::options::DEFAULT_MAX_FRAME_SIZE;
use bytes::{Buf, Bytes, BytesMut};
use tokio_util::codec::Decoder;

// --- Frame Types ---
pub const FRAME_TYPE_RESPONSE: i32 = 0;
pub const FRAME_TYPE_ERROR: i32 = 1;
pub const FRAME_TYPE_MESSAGE: i32 = 2;

/// Response body nsqd uses for heartbeats.
pub const HEARTBEAT_BODY: &[u8] = b"_heartbeat_";
/// Response body for a successful command.
pub const OK_BODY: &[u8] = b"OK";

const SIZE_LEN: usize = 4;
const FRAME_TYPE_LEN: usize = 4;

/// One decoded unit of nsqd traffic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
  Response(Bytes),
  Error(Bytes),
  /// Consumer traffic; never expected on a publisher connection.
  Message(Bytes),
}

impl Frame {
  pub fn is_heartbeat(&self) -> bool {
    matches!(self, Frame::Response(data) if data.as_ref() == HEARTBEAT_BODY)
  }

  pub fn data(&self) -> &Bytes {
    match self {
      Frame::Response(data) | Frame::Error(data) | Frame::Message(data) => data,
    }
  }
}

/// Decoder for `<size:i32><frame_type:i32><data>` frames, where `size`
/// counts the frame type plus data.
#[derive(Debug)]
pub struct FrameCodec {
  max_frame_size: usize,
}

impl Default for FrameCodec {
  fn default() -> Self {
    Self::new(DEFAULT_MAX_FRAME_SIZE)
  }
}

impl FrameCodec {
  pub fn new(max_frame_size: usize) -> Self {
    Self { max_frame_size }
  }
}

impl Decoder for FrameCodec {
  type Item = Frame;
  type Error = NsqError;

  fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
    if src.len() < SIZE_LEN {
      return Ok(None);
    }

    let size = i32::from_be_bytes([src[0], src[1], src[2], src[3]]);
    if size < FRAME_TYPE_LEN as i32 {
      return Err(NsqError::ProtocolViolation(format!("frame size {} is too small", size)));
    }
    let size = size as usize;
    if size > self.max_frame_size {
      return Err(NsqError::ProtocolViolation(format!(
        "frame size {} exceeds maximum {}",
        size, self.max_frame_size
      )));
    }

    if src.len() < SIZE_LEN + size {
      src.reserve(SIZE_LEN + size - src.len());
      return Ok(None);
    }

    src.advance(SIZE_LEN);
    let frame_type = src.get_i32();
    let data = src.split_to(size - FRAME_TYPE_LEN).freeze();
    tracing::trace!(frame_type, len = data.len(), "Decoded nsqd frame");

    match frame_type {
      FRAME_TYPE_RESPONSE => Ok(Some(Frame::Response(data))),
      FRAME_TYPE_ERROR => Ok(Some(Frame::Error(data))),
      FRAME_TYPE_MESSAGE => Ok(Some(Frame::Message(data))),
      other => Err(NsqError::ProtocolViolation(format!("unknown frame type {}", other))),
    }
  }
}

#[cfg(test)]
pub(crate) fn encode_frame(frame_type: i32, data: &[u8]) -> Vec<u8> {
  let mut out = Vec::with_capacity(SIZE_LEN + FRAME_TYPE_LEN + data.len());
  out.extend_from_slice(&((data.len() + FRAME_TYPE_LEN) as i32).to_be_bytes());
  out.extend_from_slice(&frame_type.to_be_bytes());
  out.extend_from_slice(data);
  out
}
