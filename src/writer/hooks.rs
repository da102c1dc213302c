// src/writer/hooks.rs

use crate::endpoint::Endpoint;

/// Observer hooks the writer calls from its event loop. Implementations
/// must not block.
pub trait WriterHooks: Send + Sync {
  /// nsqd sent a heartbeat; the connection already answered it.
  fn on_heartbeat(&self, endpoint: &Endpoint) {
    tracing::info!(endpoint = %endpoint, "received heartbeat");
  }

  /// A connection joined the pool.
  fn on_connection_ready(&self, _endpoint: &Endpoint) {}

  /// A connection closed and its pending callbacks were failed.
  fn on_connection_closed(&self, _endpoint: &Endpoint) {}
}

/// The default hooks: heartbeats are logged, nothing else.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingHooks;

impl WriterHooks for LoggingHooks {}
