//! nsq-writer - An asynchronous NSQ publisher built on Tokio.
//!
//! A [`Writer`] keeps one connection per nsqd endpoint, spreads publishes
//! across them, resolves every publish callback exactly once and in send
//! order per connection, and reconnects after a fixed delay when a
//! connection closes. [`Producer`] runs a writer over TCP on its own task.

pub mod connection;
pub mod endpoint;
pub mod error;
pub mod options;
pub mod producer;
pub mod protocol;
pub mod runtime;
pub mod writer;

// Re-export core types for user convenience
pub use connection::{Connection, ConnectionEvent, ConnectionHandle, Connector, EventSink};
pub use endpoint::Endpoint;
pub use error::NsqError;
pub use options::{ConnectionOptions, WriterOptions};
pub use producer::{Producer, ProducerBuilder};
pub use protocol::Command;
pub use runtime::{EventLoop, ManualEventLoop, Task, TokioEventLoop};
pub use writer::{
  LoggingHooks, PublishCallback, PublishRequest, PublishResult, RandomSelection, RoundRobinSelection,
  SelectionStrategy, Writer, WriterHooks,
};

// --- Top-Level Functions ---

const VERSION_MAJOR: i32 = 0;
const VERSION_MINOR: i32 = 1;
const VERSION_PATCH: i32 = 0;

/// Returns the library version as a tuple (major, minor, patch).
pub fn version() -> (i32, i32, i32) {
  (VERSION_MAJOR, VERSION_MINOR, VERSION_PATCH)
}
