// src/error.rs

use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
#[non_exhaustive] // Allows adding more variants later without breaking change
pub enum NsqError {
  // --- I/O Errors ---
  #[error("I/O error: {0}")]
  Io(#[from] io::Error),

  // --- Pool / Dispatch Errors ---
  #[error("No connections available")]
  NoConnections,
  #[error("Connection closed")]
  ConnectionClosed,
  #[error("Failed to send {command} to {endpoint}: {reason}")]
  SendFailed {
    command: &'static str,
    endpoint: String,
    reason: String,
  },

  // --- Connection Errors ---
  #[error("Connection refused by nsqd: {0}")]
  ConnectionRefused(String),
  #[error("Operation timed out")]
  Timeout,

  // --- Argument Errors ---
  #[error("Invalid endpoint format: {0}")]
  InvalidEndpoint(String),
  #[error("Invalid topic name: {0}")]
  InvalidTopic(String),
  #[error("Invalid argument provided: {0}")]
  InvalidArgument(String),

  // --- Protocol Errors ---
  /// An error frame returned by nsqd, e.g. `E_BAD_TOPIC PUB topic name "a b" is not valid`.
  #[error("nsqd error {code}: {message}")]
  Daemon { code: String, message: String },
  #[error("NSQ protocol violation: {0}")]
  ProtocolViolation(String),

  // --- State Errors ---
  #[error("Operation is invalid for the current connection state: {0}")]
  InvalidState(&'static str),
  #[error("Writer stopped")]
  Stopped,

  // --- Internal Errors ---
  #[error("Internal library error: {0}")]
  Internal(String),
}

impl NsqError {
  /// Maps connect-time `std::io::Error` kinds onto endpoint-aware variants.
  pub fn from_io_endpoint(e: io::Error, endpoint: &str) -> Self {
    match e.kind() {
      io::ErrorKind::ConnectionRefused => NsqError::ConnectionRefused(endpoint.to_string()),
      io::ErrorKind::TimedOut => NsqError::Timeout,
      io::ErrorKind::ConnectionReset | io::ErrorKind::BrokenPipe | io::ErrorKind::UnexpectedEof => {
        NsqError::ConnectionClosed
      }
      _ => NsqError::Io(e),
    }
  }

  /// Builds a `Daemon` error from the body of an error frame.
  ///
  /// nsqd formats error bodies as `<CODE> <description>`; a body without a
  /// space is treated as a bare code.
  pub fn from_error_frame(data: &[u8]) -> Self {
    let text = String::from_utf8_lossy(data);
    let text = text.trim();
    match text.split_once(' ') {
      Some((code, message)) => NsqError::Daemon {
        code: code.to_string(),
        message: message.to_string(),
      },
      None => NsqError::Daemon {
        code: text.to_string(),
        message: String::new(),
      },
    }
  }

  /// True for the error delivered to callbacks still queued when their connection closed.
  pub fn is_connection_closed(&self) -> bool {
    matches!(self, NsqError::ConnectionClosed)
  }

  /// True for the synchronous "pool is empty" failure.
  pub fn is_no_connections(&self) -> bool {
    matches!(self, NsqError::NoConnections)
  }
}
