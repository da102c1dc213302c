// src/runtime/mailbox.rs

//! Type aliases for the writer's task channel based on `async-channel`.

use crate::runtime::event_loop::Task;

/// The sending end of the writer's mailbox. Cloneable.
pub type MailboxSender = async_channel::Sender<Task>;

/// The receiving end of the writer's mailbox.
pub type MailboxReceiver = async_channel::Receiver<Task>;

/// Creates a new mailbox channel pair.
///
/// Unbounded: `publish` and connection events must never wait on the writer.
pub fn mailbox() -> (MailboxSender, MailboxReceiver) {
  async_channel::unbounded()
}
