// src/runtime/mod.rs

//! Event-loop context for the writer: the task type, the scheduling trait,
//! and its tokio-backed and manual implementations.

pub mod event_loop;
pub mod mailbox;
pub mod manual;
pub mod tokio_loop;

pub use event_loop::{EventLoop, Task};
pub use mailbox::{mailbox, MailboxReceiver, MailboxSender};
pub use manual::{ManualEventLoop, ScheduledTimer};
pub use tokio_loop::TokioEventLoop;
