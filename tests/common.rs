// tests/common.rs
#![allow(dead_code)] // Each test binary uses a different subset

use nsq_writer::{Connection, ConnectionEvent, ConnectionHandle, Connector, Endpoint, EventSink, NsqError};
use nsq_writer::{EventLoop, ManualEventLoop, PublishCallback, SelectionStrategy, Task};
use nsq_writer::{Writer, WriterHooks, WriterOptions};

use bytes::Bytes;
use parking_lot::Mutex;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use std::collections::VecDeque;
use std::sync::{Arc, Once};

// Use std::sync::Once for one-time initialization
static TRACING_INIT: Once = Once::new();

pub fn setup_tracing() {
  TRACING_INIT.call_once(|| {
    // Can be overridden by RUST_LOG env variable
    let default_filter = "nsq_writer=debug,info";
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let subscriber = FmtSubscriber::builder()
      .with_env_filter(env_filter)
      .with_target(true)
      .with_line_number(true)
      .with_test_writer()
      .finish();

    let _ = tracing::subscriber::set_global_default(subscriber);
  });
}

// --- Scripted connections for driving a Writer without sockets ---

/// What the fake connections did, shared with the test.
#[derive(Debug, Default)]
pub struct Wire {
  /// Attempts created, in order.
  pub created: Vec<(ConnectionHandle, Endpoint)>,
  pub sent: Vec<(ConnectionHandle, Bytes)>,
  pub closed: Vec<ConnectionHandle>,
  /// Endpoints whose next sends fail.
  pub failing_sends: Vec<Endpoint>,
}

impl Wire {
  pub fn sent_on(&self, handle: ConnectionHandle) -> usize {
    self.sent.iter().filter(|(h, _)| *h == handle).count()
  }

  pub fn handles_for(&self, endpoint: &Endpoint) -> Vec<ConnectionHandle> {
    self
      .created
      .iter()
      .filter(|(_, ep)| ep == endpoint)
      .map(|(h, _)| *h)
      .collect()
  }
}

#[derive(Debug)]
struct ScriptedConnection {
  handle: ConnectionHandle,
  endpoint: Endpoint,
  events: EventSink,
  wire: Arc<Mutex<Wire>>,
  closed: bool,
}

impl Connection for ScriptedConnection {
  fn handle(&self) -> ConnectionHandle {
    self.handle
  }

  fn endpoint(&self) -> &Endpoint {
    &self.endpoint
  }

  fn connect(&mut self) {}

  fn send(&mut self, data: Bytes) -> Result<(), NsqError> {
    let mut wire = self.wire.lock();
    if self.closed || wire.failing_sends.contains(&self.endpoint) {
      return Err(NsqError::ConnectionClosed);
    }
    wire.sent.push((self.handle, data));
    Ok(())
  }

  fn close(&mut self) {
    if self.closed {
      return;
    }
    self.closed = true;
    self.wire.lock().closed.push(self.handle);
    self.events.emit(ConnectionEvent::Close);
  }
}

#[derive(Debug, Default)]
pub struct ScriptedConnector {
  wire: Arc<Mutex<Wire>>,
}

impl ScriptedConnector {
  pub fn new(wire: Arc<Mutex<Wire>>) -> Self {
    Self { wire }
  }
}

impl Connector for ScriptedConnector {
  fn create(&mut self, handle: ConnectionHandle, endpoint: &Endpoint, events: EventSink) -> Box<dyn Connection> {
    let mut wire = self.wire.lock();
    wire.created.push((handle, endpoint.clone()));
    Box::new(ScriptedConnection {
      handle,
      endpoint: endpoint.clone(),
      events,
      wire: self.wire.clone(),
      closed: false,
    })
  }
}

/// A writer over scripted connections plus the loop that drives it.
pub struct Harness {
  pub lp: Arc<ManualEventLoop>,
  pub wire: Arc<Mutex<Wire>>,
  pub writer: Writer,
}

impl Harness {
  pub fn new(addresses: &[&str]) -> Self {
    Self::with_options(addresses, WriterOptions::default())
  }

  pub fn with_options(addresses: &[&str], options: WriterOptions) -> Self {
    Self::build(addresses, options, None, None)
  }

  pub fn build(
    addresses: &[&str],
    options: WriterOptions,
    selector: Option<Box<dyn SelectionStrategy>>,
    hooks: Option<Arc<dyn WriterHooks>>,
  ) -> Self {
    setup_tracing();
    let lp = ManualEventLoop::new();
    let wire = Arc::new(Mutex::new(Wire::default()));
    let mut writer = Writer::new(
      addresses.iter().copied(),
      options,
      lp.clone(),
      Box::new(ScriptedConnector::new(wire.clone())),
    )
    .expect("valid writer configuration");
    if let Some(selector) = selector {
      writer = writer.with_selector(selector);
    }
    if let Some(hooks) = hooks {
      writer = writer.with_hooks(hooks);
    }
    writer.start();
    lp.run_until_idle(&mut writer);
    Self { lp, wire, writer }
  }

  /// Delivers `event` from connection `handle` and runs the loop dry.
  pub fn emit(&mut self, handle: ConnectionHandle, event: ConnectionEvent) {
    self.lp.call_soon(Task::ConnectionEvent { handle, event });
    self.run();
  }

  pub fn run(&mut self) -> usize {
    self.lp.run_until_idle(&mut self.writer)
  }

  /// Marks every attempt created so far ready.
  pub fn ready_all(&mut self) {
    let handles: Vec<ConnectionHandle> = self.wire.lock().created.iter().map(|(h, _)| *h).collect();
    for handle in handles {
      self.emit(handle, ConnectionEvent::Ready);
    }
  }

  pub fn respond(&mut self, handle: ConnectionHandle, body: &'static [u8]) {
    self.emit(handle, ConnectionEvent::Response(Bytes::from_static(body)));
  }
}

/// Collects `(tag, endpoint, outcome)` for every callback invocation.
#[derive(Debug, Default, Clone)]
pub struct Outcomes {
  inner: Arc<Mutex<Vec<(String, Option<Endpoint>, Result<Bytes, String>)>>>,
}

impl Outcomes {
  pub fn callback(&self, tag: impl Into<String>) -> PublishCallback {
    let inner = self.inner.clone();
    let tag = tag.into();
    Box::new(move |endpoint, result| {
      inner
        .lock()
        .push((tag, endpoint.cloned(), result.map_err(|e| format!("{:?}", e))));
    })
  }

  pub fn len(&self) -> usize {
    self.inner.lock().len()
  }

  pub fn tags(&self) -> Vec<String> {
    self.inner.lock().iter().map(|(tag, _, _)| tag.clone()).collect()
  }

  pub fn all(&self) -> Vec<(String, Option<Endpoint>, Result<Bytes, String>)> {
    self.inner.lock().clone()
  }

  pub fn errors(&self) -> Vec<String> {
    self
      .inner
      .lock()
      .iter()
      .filter_map(|(_, _, r)| r.as_ref().err().cloned())
      .collect()
  }
}

/// Drains pending sends in FIFO order.
pub fn take_sent(wire: &Arc<Mutex<Wire>>) -> VecDeque<(ConnectionHandle, Bytes)> {
  wire.lock().sent.drain(..).collect()
}
