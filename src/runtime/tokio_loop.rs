// src/runtime/tokio_loop.rs

use crate::error::NsqError;
use crate::runtime::event_loop::{EventLoop, Task};
use crate::runtime::mailbox::{mailbox, MailboxReceiver, MailboxSender};
use crate::writer::Writer;

use std::time::{Duration, Instant};
use tokio::runtime::Handle;

/// Event loop backed by a tokio mailbox. Timers are spawned sleeps that post
/// into the same mailbox, so every task reaches the writer through one queue.
#[derive(Debug, Clone)]
pub struct TokioEventLoop {
  mailbox: MailboxSender,
  runtime: Handle,
}

impl TokioEventLoop {
  /// Must be called from within a tokio runtime.
  pub fn new() -> Result<(Self, MailboxReceiver), NsqError> {
    let runtime = Handle::try_current()
      .map_err(|_| NsqError::Internal("TokioEventLoop must be created inside a Tokio runtime".into()))?;
    let (tx, rx) = mailbox();
    Ok((Self { mailbox: tx, runtime }, rx))
  }

  pub fn is_stopped(&self) -> bool {
    self.mailbox.is_closed()
  }

  pub(crate) fn runtime(&self) -> &Handle {
    &self.runtime
  }
}

impl EventLoop for TokioEventLoop {
  fn call_soon(&self, task: Task) {
    if let Err(e) = self.mailbox.try_send(task) {
      e.into_inner().abandon();
    }
  }

  fn call_later(&self, delay: Duration, task: Task) {
    let tx = self.mailbox.clone();
    self.runtime.spawn(async move {
      tokio::time::sleep(delay).await;
      if let Err(e) = tx.send(task).await {
        e.into_inner().abandon();
      }
    });
  }

  fn now(&self) -> Instant {
    Instant::now()
  }

  fn stop(&self) {
    if self.mailbox.close() {
      tracing::debug!("Writer event loop stopped");
    }
  }
}

/// Runs `writer` until its event loop is stopped. Every task is handled on
/// this one task, in mailbox order.
pub(crate) async fn run_writer(mut writer: Writer, mailbox: MailboxReceiver) {
  tracing::info!("starting writer...");
  writer.start();
  while let Ok(task) = mailbox.recv().await {
    writer.run_task(task);
  }
  tracing::info!("writer stopped");
}
