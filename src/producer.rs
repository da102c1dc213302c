// src/producer.rs

use crate::connection::TcpConnector;
use crate::endpoint::Endpoint;
use crate::error::NsqError;
use crate::options::{ConnectionOptions, WriterOptions};
use crate::runtime::tokio_loop::run_writer;
use crate::runtime::{EventLoop, Task, TokioEventLoop};
use crate::writer::{PublishCallback, PublishRequest, SelectionStrategy, Writer, WriterHooks};

use bytes::Bytes;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

const READY_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Handle to a [`Writer`] running on its own tokio task over TCP.
///
/// Cloning is cheap; all clones talk to the same writer. Call
/// [`Producer::close`] to shut it down, dropping the handles does not.
#[derive(Clone)]
pub struct Producer {
  event_loop: TokioEventLoop,
  task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl fmt::Debug for Producer {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Producer")
      .field("stopped", &self.event_loop.is_stopped())
      .finish_non_exhaustive()
  }
}

impl Producer {
  /// Starts a producer with default options. Must be called inside a tokio runtime.
  pub fn connect<I, S>(addresses: I) -> Result<Self, NsqError>
  where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
  {
    Self::builder(addresses).build()
  }

  pub fn builder<I, S>(addresses: I) -> ProducerBuilder
  where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
  {
    ProducerBuilder {
      addresses: addresses.into_iter().map(|s| s.as_ref().to_string()).collect(),
      options: WriterOptions::default(),
      selector: None,
      hooks: None,
    }
  }

  /// Queues a `PUB`. Never fails here; the outcome goes to `callback`, or
  /// is logged on error when there is none.
  pub fn publish(&self, topic: impl Into<String>, body: impl Into<Bytes>, callback: Option<PublishCallback>) {
    self
      .event_loop
      .call_soon(Task::Publish(PublishRequest::publish(topic, body, callback)));
  }

  /// Queues an `MPUB`. An empty batch fails with `InvalidArgument`.
  pub fn multi_publish<I, B>(&self, topic: impl Into<String>, bodies: I, callback: Option<PublishCallback>)
  where
    I: IntoIterator<Item = B>,
    B: Into<Bytes>,
  {
    self
      .event_loop
      .call_soon(Task::Publish(PublishRequest::multi_publish(topic, bodies, callback)));
  }

  /// Publishes and waits for nsqd's answer.
  pub async fn publish_wait(&self, topic: impl Into<String>, body: impl Into<Bytes>) -> Result<Bytes, NsqError> {
    let (callback, rx) = reply_callback();
    self.publish(topic, body, Some(callback));
    rx.await.map_err(|_| NsqError::Stopped)?
  }

  pub async fn multi_publish_wait<I, B>(&self, topic: impl Into<String>, bodies: I) -> Result<Bytes, NsqError>
  where
    I: IntoIterator<Item = B>,
    B: Into<Bytes>,
  {
    let (callback, rx) = reply_callback();
    self.multi_publish(topic, bodies, Some(callback));
    rx.await.map_err(|_| NsqError::Stopped)?
  }

  /// Endpoints with a ready connection right now.
  pub async fn ready_endpoints(&self) -> Result<Vec<Endpoint>, NsqError> {
    let (reply_tx, reply_rx) = oneshot::channel();
    self.event_loop.call_soon(Task::QueryReady { reply_tx });
    reply_rx.await.map_err(|_| NsqError::Stopped)
  }

  /// Waits until at least one connection is ready, or fails with `Timeout`.
  pub async fn wait_ready(&self, timeout: Duration) -> Result<Vec<Endpoint>, NsqError> {
    tokio::time::timeout(timeout, async {
      loop {
        let ready = self.ready_endpoints().await?;
        if !ready.is_empty() {
          break Ok::<_, NsqError>(ready);
        }
        tokio::time::sleep(READY_POLL_INTERVAL).await;
      }
    })
    .await
    .map_err(|_| NsqError::Timeout)?
  }

  /// Closes every connection, failing pending callbacks with
  /// `ConnectionClosed`, and waits for the writer task to finish.
  pub async fn close(&self) -> Result<(), NsqError> {
    self.event_loop.call_soon(Task::Stop);
    let task = self.task.lock().take();
    if let Some(task) = task {
      task
        .await
        .map_err(|e| NsqError::Internal(format!("writer task failed: {}", e)))?;
    }
    Ok(())
  }
}

fn reply_callback() -> (PublishCallback, oneshot::Receiver<Result<Bytes, NsqError>>) {
  let (tx, rx) = oneshot::channel();
  let callback: PublishCallback = Box::new(move |_, result| {
    let _ = tx.send(result);
  });
  (callback, rx)
}

pub struct ProducerBuilder {
  addresses: Vec<String>,
  options: WriterOptions,
  selector: Option<Box<dyn SelectionStrategy>>,
  hooks: Option<Arc<dyn WriterHooks>>,
}

impl ProducerBuilder {
  pub fn options(mut self, options: WriterOptions) -> Self {
    self.options = options;
    self
  }

  pub fn connection_options(mut self, options: ConnectionOptions) -> Self {
    self.options.connection = options;
    self
  }

  pub fn reconnect_interval(mut self, interval: Duration) -> Self {
    self.options.reconnect_interval = interval;
    self
  }

  pub fn selector(mut self, selector: impl SelectionStrategy + 'static) -> Self {
    self.selector = Some(Box::new(selector));
    self
  }

  pub fn hooks(mut self, hooks: Arc<dyn WriterHooks>) -> Self {
    self.hooks = Some(hooks);
    self
  }

  /// Spawns the writer task. Must be called inside a tokio runtime.
  pub fn build(self) -> Result<Producer, NsqError> {
    let (event_loop, mailbox) = TokioEventLoop::new()?;
    let connector = TcpConnector::new(self.options.connection.clone(), event_loop.runtime().clone());
    let mut writer = Writer::new(
      &self.addresses,
      self.options,
      Arc::new(event_loop.clone()),
      Box::new(connector),
    )?;
    if let Some(selector) = self.selector {
      writer = writer.with_selector(selector);
    }
    if let Some(hooks) = self.hooks {
      writer = writer.with_hooks(hooks);
    }
    tracing::debug!(endpoints = ?writer.endpoints(), "Spawning writer task");
    let task = event_loop.runtime().spawn(run_writer(writer, mailbox));
    Ok(Producer {
      event_loop,
      task: Arc::new(Mutex::new(Some(task))),
    })
  }
}

impl fmt::Debug for ProducerBuilder {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ProducerBuilder")
      .field("addresses", &self.addresses)
      .field("options", &self.options)
      .finish_non_exhaustive()
  }
}
