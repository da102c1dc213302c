// src/runtime/event_loop.rs

use crate::connection::{ConnectionEvent, ConnectionHandle};
use crate::endpoint::Endpoint;
use crate::error::NsqError;
use crate::writer::PublishRequest;

use std::fmt;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;

/// Units of work delivered to the writer, one at a time, by its event loop.
pub enum Task {
  /// Open a connection to the endpoint unless a ready one already exists.
  Connect(Endpoint),
  Publish(PublishRequest),
  ConnectionEvent {
    handle: ConnectionHandle,
    event: ConnectionEvent,
  },
  /// Close ready connections that have gone silent, then re-arm.
  CheckStale,
  QueryReady {
    reply_tx: oneshot::Sender<Vec<Endpoint>>,
  },
  /// Graceful shutdown of the writer.
  Stop,
}

impl Task {
  pub fn variant_name(&self) -> &'static str {
    match self {
      Task::Connect(_) => "Connect",
      Task::Publish(_) => "Publish",
      Task::ConnectionEvent { .. } => "ConnectionEvent",
      Task::CheckStale => "CheckStale",
      Task::QueryReady { .. } => "QueryReady",
      Task::Stop => "Stop",
    }
  }

  /// Disposes of a task the loop can no longer deliver. Publish callbacks
  /// are still resolved, with `Stopped`.
  pub(crate) fn abandon(self) {
    match self {
      Task::Publish(request) => {
        tracing::debug!(command = request.command_name(), "Writer stopped, rejecting publish");
        request.reject(NsqError::Stopped);
      }
      other => {
        tracing::trace!(task = other.variant_name(), "Dropping task after writer stopped");
      }
    }
  }
}

impl fmt::Debug for Task {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Task::Connect(endpoint) => f.debug_tuple("Connect").field(endpoint).finish(),
      Task::Publish(request) => f.debug_tuple("Publish").field(request).finish(),
      Task::ConnectionEvent { handle, event } => f
        .debug_struct("ConnectionEvent")
        .field("handle", handle)
        .field("event", event)
        .finish(),
      Task::CheckStale => f.write_str("CheckStale"),
      Task::QueryReady { .. } => f.write_str("QueryReady"),
      Task::Stop => f.write_str("Stop"),
    }
  }
}

/// Scheduling context injected into the writer and its connections.
///
/// Tasks handed to a loop are delivered in order to a single consumer, so
/// the writer's state is never touched from two places at once.
pub trait EventLoop: Send + Sync {
  /// Queues `task` behind everything already scheduled.
  fn call_soon(&self, task: Task);
  /// Queues `task` once `delay` has passed.
  fn call_later(&self, delay: Duration, task: Task);
  fn now(&self) -> Instant;
  /// Stops delivering tasks. Anything scheduled afterwards is abandoned.
  fn stop(&self);
}
