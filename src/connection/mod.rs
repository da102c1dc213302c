// src/connection/mod.rs

//! The connection capability the pool drives, and its TCP implementation.

pub(crate) mod engine;
pub mod tcp;

use crate::endpoint::Endpoint;
use crate::error::NsqError;
use crate::protocol::{IdentifyData, IdentifyResponse};
use crate::runtime::{EventLoop, Task};

use bytes::Bytes;
use std::fmt;
use std::sync::Arc;

pub use tcp::{TcpConnection, TcpConnector};

/// Unique id of one connection attempt. Two attempts to the same endpoint
/// share an identity (the endpoint) but never a handle.
pub type ConnectionHandle = usize;

/// Lifecycle notifications a connection delivers to the pool.
///
/// Over its lifetime a connection emits `Identify`/`IdentifyResponse` while
/// negotiating, at most one `Ready`, then any number of `Response`, `Error`
/// and `Heartbeat`, and finally exactly one `Close`.
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
  /// IDENTIFY was sent with this body.
  Identify(IdentifyData),
  /// nsqd answered IDENTIFY with negotiated features.
  IdentifyResponse(IdentifyResponse),
  Ready,
  /// A non-heartbeat response frame.
  Response(Bytes),
  /// An error frame.
  Error(Bytes),
  Heartbeat,
  Close,
}

impl ConnectionEvent {
  pub fn variant_name(&self) -> &'static str {
    match self {
      ConnectionEvent::Identify(_) => "Identify",
      ConnectionEvent::IdentifyResponse(_) => "IdentifyResponse",
      ConnectionEvent::Ready => "Ready",
      ConnectionEvent::Response(_) => "Response",
      ConnectionEvent::Error(_) => "Error",
      ConnectionEvent::Heartbeat => "Heartbeat",
      ConnectionEvent::Close => "Close",
    }
  }
}

/// Where a connection posts its events: the pool's event loop, tagged with
/// the connection's handle.
#[derive(Clone)]
pub struct EventSink {
  handle: ConnectionHandle,
  event_loop: Arc<dyn EventLoop>,
}

impl EventSink {
  pub fn new(handle: ConnectionHandle, event_loop: Arc<dyn EventLoop>) -> Self {
    Self { handle, event_loop }
  }

  pub fn handle(&self) -> ConnectionHandle {
    self.handle
  }

  pub fn emit(&self, event: ConnectionEvent) {
    tracing::trace!(handle = self.handle, event = event.variant_name(), "Connection event");
    self.event_loop.call_soon(Task::ConnectionEvent {
      handle: self.handle,
      event,
    });
  }
}

impl fmt::Debug for EventSink {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("EventSink").field("handle", &self.handle).finish_non_exhaustive()
  }
}

/// One session to one nsqd.
///
/// `connect` starts the attempt and returns immediately; outcomes arrive as
/// events. `send` either queues bytes for transmission or fails at once.
/// `close` requests shutdown; the terminal `Close` event follows.
pub trait Connection: Send + fmt::Debug {
  fn handle(&self) -> ConnectionHandle;
  fn endpoint(&self) -> &Endpoint;
  fn connect(&mut self);
  fn send(&mut self, data: Bytes) -> Result<(), NsqError>;
  fn close(&mut self);
}

/// Creates connections for the pool.
pub trait Connector: Send + fmt::Debug {
  fn create(&mut self, handle: ConnectionHandle, endpoint: &Endpoint, events: EventSink) -> Box<dyn Connection>;
}
