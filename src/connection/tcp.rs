// src/connection/tcp.rs

use crate::connection::engine::ConnectionEngine;
use crate::connection::{Connection, ConnectionEvent, ConnectionHandle, Connector, EventSink};
use crate::endpoint::Endpoint;
use crate::error::NsqError;
use crate::options::ConnectionOptions;

use async_channel::{Receiver as AsyncReceiver, Sender as AsyncSender};
use bytes::Bytes;
use socket2::{SockRef, TcpKeepalive};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// Creates [`TcpConnection`]s sharing one set of options.
#[derive(Debug, Clone)]
pub struct TcpConnector {
  options: Arc<ConnectionOptions>,
  runtime: Handle,
}

impl TcpConnector {
  pub fn new(options: ConnectionOptions, runtime: Handle) -> Self {
    Self {
      options: Arc::new(options),
      runtime,
    }
  }
}

impl Connector for TcpConnector {
  fn create(&mut self, handle: ConnectionHandle, endpoint: &Endpoint, events: EventSink) -> Box<dyn Connection> {
    Box::new(TcpConnection::new(
      handle,
      endpoint.clone(),
      self.options.clone(),
      events,
      self.runtime.clone(),
    ))
  }
}

/// A connection to nsqd over TCP. The socket lives in a spawned I/O task;
/// this handle only queues outbound bytes and requests shutdown.
#[derive(Debug)]
pub struct TcpConnection {
  handle: ConnectionHandle,
  endpoint: Endpoint,
  options: Arc<ConnectionOptions>,
  events: EventSink,
  runtime: Handle,
  outbound: Option<AsyncSender<Bytes>>,
  shutdown: Option<oneshot::Sender<()>>,
  task: Option<JoinHandle<()>>,
  closed: bool,
}

impl TcpConnection {
  pub fn new(
    handle: ConnectionHandle,
    endpoint: Endpoint,
    options: Arc<ConnectionOptions>,
    events: EventSink,
    runtime: Handle,
  ) -> Self {
    Self {
      handle,
      endpoint,
      options,
      events,
      runtime,
      outbound: None,
      shutdown: None,
      task: None,
      closed: false,
    }
  }
}

impl Connection for TcpConnection {
  fn handle(&self) -> ConnectionHandle {
    self.handle
  }

  fn endpoint(&self) -> &Endpoint {
    &self.endpoint
  }

  fn connect(&mut self) {
    if self.task.is_some() || self.closed {
      tracing::debug!(handle = self.handle, endpoint = %self.endpoint, "Ignoring connect on a started connection");
      return;
    }
    let (tx, rx) = async_channel::unbounded();
    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    self.outbound = Some(tx);
    self.shutdown = Some(shutdown_tx);
    self.task = Some(self.runtime.spawn(run_connection(
      self.endpoint.clone(),
      self.options.clone(),
      self.events.clone(),
      rx,
      shutdown_rx,
    )));
  }

  fn send(&mut self, data: Bytes) -> Result<(), NsqError> {
    match &self.outbound {
      Some(tx) => tx.try_send(data).map_err(|_| NsqError::ConnectionClosed),
      None => Err(NsqError::InvalidState("connection was never started")),
    }
  }

  fn close(&mut self) {
    if self.closed {
      return;
    }
    self.closed = true;
    self.outbound = None;
    match self.shutdown.take() {
      // The I/O task emits Close when it winds down.
      Some(tx) => {
        let _ = tx.send(());
      }
      None => self.events.emit(ConnectionEvent::Close),
    }
  }
}

/// Connects, negotiates and serves one connection, then emits `Close`
/// exactly once, also when the connect itself failed.
async fn run_connection(
  endpoint: Endpoint,
  options: Arc<ConnectionOptions>,
  events: EventSink,
  outbound: AsyncReceiver<Bytes>,
  mut shutdown: oneshot::Receiver<()>,
) {
  let handle = events.handle();
  tracing::debug!(handle, endpoint = %endpoint, "TCP connection task started");

  let result: Result<(), NsqError> = async {
    let stream = tokio::select! {
      biased;
      _ = &mut shutdown => {
        tracing::debug!(handle, endpoint = %endpoint, "Close requested before connect completed");
        return Ok(());
      }
      stream = connect_stream(&endpoint, &options) => stream?,
    };
    ConnectionEngine::new(endpoint.clone(), options.clone(), events.clone(), stream)
      .run(outbound, shutdown)
      .await
  }
  .await;

  match result {
    Ok(()) => tracing::debug!(handle, endpoint = %endpoint, "TCP connection finished"),
    Err(e) => tracing::warn!(handle, endpoint = %endpoint, error = %e, "TCP connection failed"),
  }
  events.emit(ConnectionEvent::Close);
}

async fn connect_stream(endpoint: &Endpoint, options: &ConnectionOptions) -> Result<TcpStream, NsqError> {
  let target = endpoint.to_string();
  let stream = tokio::time::timeout(
    options.connect_timeout,
    TcpStream::connect((endpoint.host(), endpoint.port())),
  )
  .await
  .map_err(|_| NsqError::Timeout)?
  .map_err(|e| NsqError::from_io_endpoint(e, &target))?;
  apply_tcp_socket_options(&stream, options)?;
  tracing::debug!(endpoint = %endpoint, peer = ?stream.peer_addr().ok(), "TCP connected");
  Ok(stream)
}

fn apply_tcp_socket_options(stream: &TcpStream, options: &ConnectionOptions) -> Result<(), NsqError> {
  let socket_ref = SockRef::from(stream);
  socket_ref.set_nodelay(options.tcp_nodelay)?;
  tracing::trace!(nodelay = options.tcp_nodelay, "Applied TCP_NODELAY");

  if let Some(time) = options.tcp_keepalive {
    let keepalive = TcpKeepalive::new().with_time(time);
    socket_ref.set_tcp_keepalive(&keepalive)?;
    tracing::trace!(?time, "Applied TCP keepalive");
  }
  Ok(())
}
