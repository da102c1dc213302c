// src/writer/mod.rs

//! The connection pool: publish dispatch, per-connection callback ordering,
//! readiness races, close handling and reconnection.

pub mod callback_queue;
pub mod hooks;
pub mod selector;

pub use callback_queue::{PublishCallback, PublishResult};
pub use hooks::{LoggingHooks, WriterHooks};
pub use selector::{RandomSelection, RoundRobinSelection, SelectionStrategy};

use crate::connection::{Connection, ConnectionEvent, ConnectionHandle, Connector, EventSink};
use crate::endpoint::{parse_endpoints, Endpoint};
use crate::error::NsqError;
use crate::options::WriterOptions;
use crate::protocol::{validate_topic_name, Command};
use crate::runtime::{EventLoop, Task};
use callback_queue::{invoke_callback, CallbackQueue};

use bytes::Bytes;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

/// A publish waiting to be dispatched: the command and who to tell.
pub struct PublishRequest {
  command: Command,
  callback: PublishCallback,
}

impl PublishRequest {
  /// `PUB`. Without a callback, failures are logged.
  pub fn publish(topic: impl Into<String>, body: impl Into<Bytes>, callback: Option<PublishCallback>) -> Self {
    let command = Command::Pub {
      topic: topic.into(),
      body: body.into(),
    };
    let callback = match callback {
      Some(cb) => cb,
      None => default_callback(command.name(), command.topic().unwrap_or_default()),
    };
    Self { command, callback }
  }

  /// `MPUB`. `bodies` must not be empty.
  pub fn multi_publish<I, B>(topic: impl Into<String>, bodies: I, callback: Option<PublishCallback>) -> Self
  where
    I: IntoIterator<Item = B>,
    B: Into<Bytes>,
  {
    let command = Command::Mpub {
      topic: topic.into(),
      bodies: bodies.into_iter().map(Into::into).collect(),
    };
    let callback = match callback {
      Some(cb) => cb,
      None => default_callback(command.name(), command.topic().unwrap_or_default()),
    };
    Self { command, callback }
  }

  pub fn command(&self) -> &Command {
    &self.command
  }

  pub fn command_name(&self) -> &'static str {
    self.command.name()
  }

  /// Resolves the callback without dispatching.
  pub(crate) fn reject(self, error: NsqError) {
    invoke_callback(self.callback, self.command.name(), None, Err(error));
  }

  fn validate(&self, max_body_size: usize) -> Result<(), NsqError> {
    if let Some(topic) = self.command.topic() {
      validate_topic_name(topic)?;
    }
    if let Command::Mpub { bodies, .. } = &self.command {
      if bodies.is_empty() {
        return Err(NsqError::InvalidArgument("MPUB requires at least one message".into()));
      }
    }
    self.command.check_body_size(max_body_size)
  }
}

impl fmt::Debug for PublishRequest {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("PublishRequest")
      .field("command", &self.command.name())
      .field("topic", &self.command.topic())
      .finish_non_exhaustive()
  }
}

/// The callback installed when the caller passes none: log failures.
fn default_callback(command: &'static str, topic: &str) -> PublishCallback {
  let topic = topic.to_string();
  Box::new(move |endpoint, result| {
    if let Err(e) = result {
      match endpoint {
        Some(ep) => tracing::error!(endpoint = %ep, command, topic = %topic, error = %e, "publish failed"),
        None => tracing::error!(command, topic = %topic, error = %e, "publish failed"),
      }
    }
  })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnState {
  Connecting,
  Ready,
  /// The pool asked it to close; waiting for its `Close` event.
  Closing,
}

#[derive(Debug)]
struct TrackedConnection {
  conn: Box<dyn Connection>,
  state: ConnState,
  callbacks: CallbackQueue,
  last_recv: Instant,
}

impl TrackedConnection {
  fn request_close(&mut self) {
    if self.state != ConnState::Closing {
      self.state = ConnState::Closing;
      self.conn.close();
    }
  }
}

/// Pool of nsqd connections for publishing.
///
/// Every method runs on the writer's event loop; events from connections and
/// timers come back as [`Task`]s through [`Writer::run_task`]. Only ready
/// connections are pool members, at most one per endpoint.
pub struct Writer {
  endpoints: Vec<Endpoint>,
  options: WriterOptions,
  event_loop: Arc<dyn EventLoop>,
  connector: Box<dyn Connector>,
  selector: Box<dyn SelectionStrategy>,
  hooks: Arc<dyn WriterHooks>,
  /// Every attempt not yet closed, by handle.
  connections: HashMap<ConnectionHandle, TrackedConnection>,
  /// Pool members.
  ready: BTreeMap<Endpoint, ConnectionHandle>,
  next_handle: ConnectionHandle,
  started: bool,
  closing: bool,
}

impl Writer {
  /// Parses and de-duplicates `addresses` (`host:port`). Nothing connects
  /// until [`Writer::start`].
  pub fn new<I, S>(
    addresses: I,
    options: WriterOptions,
    event_loop: Arc<dyn EventLoop>,
    connector: Box<dyn Connector>,
  ) -> Result<Self, NsqError>
  where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
  {
    options.validate()?;
    let endpoints = parse_endpoints(addresses)?;
    Ok(Self {
      endpoints,
      options,
      event_loop,
      connector,
      selector: Box::new(RandomSelection::new()),
      hooks: Arc::new(LoggingHooks),
      connections: HashMap::new(),
      ready: BTreeMap::new(),
      next_handle: 1,
      started: false,
      closing: false,
    })
  }

  pub fn with_selector(mut self, selector: Box<dyn SelectionStrategy>) -> Self {
    self.selector = selector;
    self
  }

  pub fn with_hooks(mut self, hooks: Arc<dyn WriterHooks>) -> Self {
    self.hooks = hooks;
    self
  }

  /// Schedules a connection attempt per endpoint and the first stale check.
  pub fn start(&mut self) {
    if self.started {
      return;
    }
    self.started = true;
    for endpoint in &self.endpoints {
      self.event_loop.call_soon(Task::Connect(endpoint.clone()));
    }
    self
      .event_loop
      .call_later(self.options.stale_check_interval, Task::CheckStale);
  }

  pub fn run_task(&mut self, task: Task) {
    match task {
      Task::Connect(endpoint) => self.connect_to(endpoint),
      Task::Publish(request) => self.dispatch(request),
      Task::ConnectionEvent { handle, event } => self.handle_event(handle, event),
      Task::CheckStale => self.check_stale(),
      Task::QueryReady { reply_tx } => {
        let _ = reply_tx.send(self.ready_endpoints());
      }
      Task::Stop => self.close(),
    }
  }

  pub fn publish(&mut self, topic: impl Into<String>, body: impl Into<Bytes>, callback: Option<PublishCallback>) {
    self.dispatch(PublishRequest::publish(topic, body, callback));
  }

  pub fn multi_publish<I, B>(&mut self, topic: impl Into<String>, bodies: I, callback: Option<PublishCallback>)
  where
    I: IntoIterator<Item = B>,
    B: Into<Bytes>,
  {
    self.dispatch(PublishRequest::multi_publish(topic, bodies, callback));
  }

  /// Sends `request` on one ready connection, or resolves its callback right
  /// away when it cannot be sent.
  pub fn dispatch(&mut self, request: PublishRequest) {
    if self.closing {
      request.reject(NsqError::Stopped);
      return;
    }
    if let Err(e) = request.validate(self.options.max_body_size) {
      request.reject(e);
      return;
    }

    let connections = &self.connections;
    let candidates: Vec<(&Endpoint, ConnectionHandle)> = self
      .ready
      .iter()
      .filter(|(_, handle)| {
        connections
          .get(handle)
          .map_or(false, |tracked| tracked.state == ConnState::Ready)
      })
      .map(|(endpoint, handle)| (endpoint, *handle))
      .collect();
    if candidates.is_empty() {
      request.reject(NsqError::NoConnections);
      return;
    }
    let endpoints: Vec<&Endpoint> = candidates.iter().map(|(endpoint, _)| *endpoint).collect();
    let idx = self.selector.select(&endpoints) % candidates.len();
    let handle = candidates[idx].1;

    let Some(tracked) = self.connections.get_mut(&handle) else {
      request.reject(NsqError::Internal(format!("selected connection {} is not tracked", handle)));
      return;
    };
    let PublishRequest { command, callback } = request;
    let name = command.name();
    tracked.callbacks.push(name, callback);
    if let Err(e) = tracked.conn.send(command.to_bytes()) {
      let err = NsqError::SendFailed {
        command: name,
        endpoint: tracked.conn.endpoint().to_string(),
        reason: e.to_string(),
      };
      tracing::error!(handle, error = %err, "send failed, closing connection");
      // The queued callback is resolved by the close path.
      tracked.request_close();
    } else {
      tracing::trace!(handle, endpoint = %tracked.conn.endpoint(), command = name, "Dispatched");
    }
  }

  /// Opens a connection to `endpoint` unless a ready one exists.
  pub fn connect_to(&mut self, endpoint: Endpoint) {
    if self.closing {
      tracing::debug!(endpoint = %endpoint, "Writer closing, not connecting");
      return;
    }
    if self.ready.contains_key(&endpoint) {
      tracing::debug!(endpoint = %endpoint, "Already connected");
      return;
    }
    let handle = self.next_handle;
    self.next_handle += 1;
    let now = self.event_loop.now();
    let events = EventSink::new(handle, self.event_loop.clone());
    let conn = self.connector.create(handle, &endpoint, events);
    tracing::info!(handle, endpoint = %endpoint, "connecting to nsqd");
    let tracked = self.connections.entry(handle).or_insert(TrackedConnection {
      conn,
      state: ConnState::Connecting,
      callbacks: CallbackQueue::new(),
      last_recv: now,
    });
    tracked.conn.connect();
  }

  fn handle_event(&mut self, handle: ConnectionHandle, event: ConnectionEvent) {
    let now = self.event_loop.now();
    let Some(tracked) = self.connections.get_mut(&handle) else {
      tracing::debug!(handle, event = event.variant_name(), "Event for an untracked connection, ignoring");
      return;
    };
    match event {
      ConnectionEvent::Identify(data) => {
        tracing::debug!(handle, endpoint = %tracked.conn.endpoint(), heartbeat_ms = data.heartbeat_interval, "IDENTIFY sent");
      }
      ConnectionEvent::IdentifyResponse(response) => {
        tracing::debug!(handle, endpoint = %tracked.conn.endpoint(), ?response, "IDENTIFY negotiated");
      }
      ConnectionEvent::Ready => self.on_ready(handle),
      ConnectionEvent::Response(data) => {
        tracked.last_recv = now;
        self.resolve_oldest(handle, Ok(data));
      }
      ConnectionEvent::Error(data) => {
        tracked.last_recv = now;
        self.resolve_oldest(handle, Err(NsqError::from_error_frame(&data)));
      }
      ConnectionEvent::Heartbeat => {
        tracked.last_recv = now;
        self.hooks.on_heartbeat(tracked.conn.endpoint());
      }
      ConnectionEvent::Close => self.on_close(handle),
    }
  }

  fn on_ready(&mut self, handle: ConnectionHandle) {
    let now = self.event_loop.now();
    let closing = self.closing;
    let Some(tracked) = self.connections.get_mut(&handle) else {
      return;
    };
    if tracked.state != ConnState::Connecting {
      tracing::debug!(handle, state = ?tracked.state, "Ready ignored");
      return;
    }
    let endpoint = tracked.conn.endpoint().clone();
    if closing {
      tracked.request_close();
      return;
    }
    if self.ready.contains_key(&endpoint) {
      tracing::warn!(handle, endpoint = %endpoint, "connected but another matching connection already exists");
      tracked.request_close();
      return;
    }
    tracked.state = ConnState::Ready;
    tracked.last_recv = now;
    self.ready.insert(endpoint.clone(), handle);
    tracing::info!(handle, endpoint = %endpoint, "connection ready");
    self.hooks.on_connection_ready(&endpoint);
  }

  fn resolve_oldest(&mut self, handle: ConnectionHandle, result: PublishResult) {
    let Some(tracked) = self.connections.get_mut(&handle) else {
      return;
    };
    match tracked.callbacks.pop_oldest() {
      Some(pending) => invoke_callback(pending.callback, pending.command, Some(tracked.conn.endpoint()), result),
      // Nothing in flight; nsqd only answers commands, so this is noise.
      None => tracing::debug!(handle, endpoint = %tracked.conn.endpoint(), ok = result.is_ok(), "Frame with no pending callback, ignoring"),
    }
  }

  fn on_close(&mut self, handle: ConnectionHandle) {
    let Some(mut tracked) = self.connections.remove(&handle) else {
      return;
    };
    let endpoint = tracked.conn.endpoint().clone();
    if self.ready.get(&endpoint) == Some(&handle) {
      self.ready.remove(&endpoint);
    }

    let pending = tracked.callbacks.len();
    for entry in tracked.callbacks.drain() {
      invoke_callback(entry.callback, entry.command, Some(&endpoint), Err(NsqError::ConnectionClosed));
    }
    tracing::warn!(handle, endpoint = %endpoint, failed_callbacks = pending, "connection closed");
    self.hooks.on_connection_closed(&endpoint);

    if self.closing {
      if self.connections.is_empty() {
        tracing::info!("all connections closed, stopping writer");
        self.event_loop.stop();
      }
      return;
    }
    tracing::info!(endpoint = %endpoint, delay = ?self.options.reconnect_interval, "attempting to reconnect");
    self
      .event_loop
      .call_later(self.options.reconnect_interval, Task::Connect(endpoint));
  }

  /// Closes ready connections nsqd has not talked on for too long.
  fn check_stale(&mut self) {
    if self.closing {
      return;
    }
    let now = self.event_loop.now();
    let threshold = self.options.stale_threshold();
    for (handle, tracked) in self.connections.iter_mut() {
      if tracked.state != ConnState::Ready {
        continue;
      }
      let silent = now.saturating_duration_since(tracked.last_recv);
      if silent > threshold {
        tracing::warn!(handle = *handle, endpoint = %tracked.conn.endpoint(), ?silent, "connection is stale, closing");
        tracked.request_close();
      }
    }
    self
      .event_loop
      .call_later(self.options.stale_check_interval, Task::CheckStale);
  }

  /// Starts a graceful shutdown: no more connects or publishes, every
  /// connection is closed, and the event loop stops after the last `Close`.
  pub fn close(&mut self) {
    if self.closing {
      return;
    }
    self.closing = true;
    tracing::info!(connections = self.connections.len(), "closing writer");
    if self.connections.is_empty() {
      self.event_loop.stop();
      return;
    }
    for tracked in self.connections.values_mut() {
      tracked.request_close();
    }
  }

  /// Endpoints of pool members currently eligible for dispatch, in order.
  pub fn ready_endpoints(&self) -> Vec<Endpoint> {
    self
      .ready
      .iter()
      .filter(|(_, handle)| {
        self
          .connections
          .get(handle)
          .map_or(false, |tracked| tracked.state == ConnState::Ready)
      })
      .map(|(endpoint, _)| endpoint.clone())
      .collect()
  }

  /// Callbacks waiting on the pool member for `endpoint`.
  pub fn pending_callbacks(&self, endpoint: &Endpoint) -> usize {
    self
      .ready
      .get(endpoint)
      .and_then(|handle| self.connections.get(handle))
      .map_or(0, |tracked| tracked.callbacks.len())
  }

  /// Handle of the pool member for `endpoint`, if any.
  pub fn member_handle(&self, endpoint: &Endpoint) -> Option<ConnectionHandle> {
    self.ready.get(endpoint).copied()
  }

  /// Attempts in any state, pool members included.
  pub fn connection_count(&self) -> usize {
    self.connections.len()
  }

  pub fn endpoints(&self) -> &[Endpoint] {
    &self.endpoints
  }

  pub fn is_closing(&self) -> bool {
    self.closing
  }
}

impl fmt::Debug for Writer {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Writer")
      .field("endpoints", &self.endpoints)
      .field("ready", &self.ready)
      .field("connections", &self.connections.len())
      .field("closing", &self.closing)
      .finish_non_exhaustive()
  }
}
