// src/writer/callback_queue.rs

use crate::endpoint::Endpoint;
use crate::error::NsqError;

use bytes::Bytes;
use std::any::Any;
use std::collections::VecDeque;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};

/// Outcome of one publish: nsqd's response body, or why it failed.
pub type PublishResult = Result<Bytes, NsqError>;

/// Completion callback for a publish, called with the connection and the outcome.
///
/// The connection is identified by its `Endpoint`, which stays the same across
/// reconnects. Callers get the endpoint, not a `ConnectionHandle`, and no
/// access to the connection itself. It is `None` when the command was never
/// dispatched (`NoConnections`, `Stopped`, validation failures).
pub type PublishCallback = Box<dyn FnOnce(Option<&Endpoint>, PublishResult) + Send>;

/// A callback waiting for the response to a command already sent.
pub(crate) struct PendingCallback {
  pub(crate) command: &'static str,
  pub(crate) callback: PublishCallback,
}

impl fmt::Debug for PendingCallback {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("PendingCallback")
      .field("command", &self.command)
      .finish_non_exhaustive()
  }
}

/// Callbacks for in-flight commands on one connection, oldest first.
///
/// nsqd answers commands on a connection in the order they were sent, so
/// the front entry always belongs to the next response or error frame.
/// Unbounded: if nsqd stops answering without closing, this grows.
#[derive(Debug, Default)]
pub(crate) struct CallbackQueue {
  pending: VecDeque<PendingCallback>,
}

impl CallbackQueue {
  pub(crate) fn new() -> Self {
    Self::default()
  }

  pub(crate) fn push(&mut self, command: &'static str, callback: PublishCallback) {
    self.pending.push_back(PendingCallback { command, callback });
  }

  pub(crate) fn pop_oldest(&mut self) -> Option<PendingCallback> {
    self.pending.pop_front()
  }

  /// Empties the queue, yielding entries in send order.
  pub(crate) fn drain(&mut self) -> impl Iterator<Item = PendingCallback> + '_ {
    self.pending.drain(..)
  }

  pub(crate) fn len(&self) -> usize {
    self.pending.len()
  }

  pub(crate) fn is_empty(&self) -> bool {
    self.pending.is_empty()
  }
}

/// Runs a caller callback, containing any panic it raises.
pub(crate) fn invoke_callback(
  callback: PublishCallback,
  command: &'static str,
  endpoint: Option<&Endpoint>,
  result: PublishResult,
) {
  if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(move || callback(endpoint, result))) {
    match endpoint {
      Some(ep) => tracing::error!(
        endpoint = %ep,
        command,
        panic = panic_message(payload.as_ref()),
        "Uncaught panic in publish callback"
      ),
      None => tracing::error!(command, panic = panic_message(payload.as_ref()), "Uncaught panic in publish callback"),
    }
  }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
  if let Some(s) = payload.downcast_ref::<&'static str>() {
    s
  } else if let Some(s) = payload.downcast_ref::<String>() {
    s.as_str()
  } else {
    "<non-string panic payload>"
  }
}
