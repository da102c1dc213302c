// src/protocol/command.rs

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::NsqError;

/// Protocol version magic, written once right after the TCP connect.
pub const MAGIC_V2: &[u8] = b"  V2";

// --- Command Names ---
pub const CMD_IDENTIFY: &str = "IDENTIFY";
pub const CMD_PUB: &str = "PUB";
pub const CMD_MPUB: &str = "MPUB";
pub const CMD_NOP: &str = "NOP";

/// Largest body a size prefix can describe.
pub const MAX_BODY_SIZE: usize = u32::MAX as usize;

const MAX_TOPIC_NAME_LEN: usize = 64;
const EPHEMERAL_SUFFIX: &str = "#ephemeral";

/// Commands a publisher sends to nsqd.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
  /// Connection negotiation; the body is a JSON object.
  Identify(Bytes),
  Pub { topic: String, body: Bytes },
  Mpub { topic: String, bodies: Vec<Bytes> },
  /// Reply to a heartbeat.
  Nop,
}

impl Command {
  pub fn name(&self) -> &'static str {
    match self {
      Command::Identify(_) => CMD_IDENTIFY,
      Command::Pub { .. } => CMD_PUB,
      Command::Mpub { .. } => CMD_MPUB,
      Command::Nop => CMD_NOP,
    }
  }

  pub fn topic(&self) -> Option<&str> {
    match self {
      Command::Pub { topic, .. } | Command::Mpub { topic, .. } => Some(topic),
      Command::Identify(_) | Command::Nop => None,
    }
  }

  /// Value of the body size prefix: the message for PUB, the count plus every
  /// size-prefixed message for MPUB.
  pub fn body_size(&self) -> usize {
    match self {
      Command::Identify(body) | Command::Pub { body, .. } => body.len(),
      Command::Mpub { bodies, .. } => 4 + bodies.iter().map(|b| 4 + b.len()).sum::<usize>(),
      Command::Nop => 0,
    }
  }

  /// Fails with `InvalidArgument` when the body is larger than `limit` or
  /// than a size prefix can hold.
  pub fn check_body_size(&self, limit: usize) -> Result<(), NsqError> {
    let size = self.body_size();
    let limit = limit.min(MAX_BODY_SIZE);
    if size > limit {
      return Err(NsqError::InvalidArgument(format!(
        "{} body of {} bytes exceeds the {} byte limit",
        self.name(),
        size,
        limit
      )));
    }
    Ok(())
  }

  /// Appends the wire form of this command to `dst`.
  ///
  /// Sizes are 4-byte big-endian. MPUB carries the total body size, the
  /// message count, then each message prefixed with its own size. The body
  /// must pass `check_body_size` first.
  pub fn encode(&self, dst: &mut BytesMut) {
    debug_assert!(self.body_size() <= MAX_BODY_SIZE, "oversized {} body", self.name());
    match self {
      Command::Identify(body) => {
        dst.reserve(CMD_IDENTIFY.len() + 1 + 4 + body.len());
        dst.put_slice(CMD_IDENTIFY.as_bytes());
        dst.put_u8(b'\n');
        dst.put_u32(body.len() as u32);
        dst.put_slice(body);
      }
      Command::Pub { topic, body } => {
        dst.reserve(CMD_PUB.len() + 1 + topic.len() + 1 + 4 + body.len());
        dst.put_slice(CMD_PUB.as_bytes());
        dst.put_u8(b' ');
        dst.put_slice(topic.as_bytes());
        dst.put_u8(b'\n');
        dst.put_u32(body.len() as u32);
        dst.put_slice(body);
      }
      Command::Mpub { topic, bodies } => {
        let payload_size = self.body_size();
        dst.reserve(CMD_MPUB.len() + 1 + topic.len() + 1 + 4 + payload_size);
        dst.put_slice(CMD_MPUB.as_bytes());
        dst.put_u8(b' ');
        dst.put_slice(topic.as_bytes());
        dst.put_u8(b'\n');
        dst.put_u32(payload_size as u32);
        dst.put_u32(bodies.len() as u32);
        for body in bodies {
          dst.put_u32(body.len() as u32);
          dst.put_slice(body);
        }
      }
      Command::Nop => {
        dst.put_slice(CMD_NOP.as_bytes());
        dst.put_u8(b'\n');
      }
    }
  }

  pub fn to_bytes(&self) -> Bytes {
    let mut buf = BytesMut::new();
    self.encode(&mut buf);
    buf.freeze()
  }
}

/// Checks a topic name against nsqd's rules: 1 to 64 characters of
/// `[.a-zA-Z0-9_-]`, optionally ending in `#ephemeral`.
pub fn validate_topic_name(topic: &str) -> Result<(), NsqError> {
  let base = topic.strip_suffix(EPHEMERAL_SUFFIX).unwrap_or(topic);
  let valid = !topic.is_empty()
    && topic.len() <= MAX_TOPIC_NAME_LEN
    && !base.is_empty()
    && base
      .bytes()
      .all(|c| c.is_ascii_alphanumeric() || matches!(c, b'.' | b'_' | b'-'));
  if valid {
    Ok(())
  } else {
    Err(NsqError::InvalidTopic(topic.to_string()))
  }
}
