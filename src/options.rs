// src/options.rs

use std::time::Duration;

use crate::NsqError;

/// Delay before re-connecting to an endpoint whose connection closed.
pub const DEFAULT_RECONNECT_INTERVAL: Duration = Duration::from_secs(15);
/// How often ready connections are checked for silence.
pub const DEFAULT_STALE_CHECK_INTERVAL: Duration = Duration::from_secs(60);
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(1);
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
pub const DEFAULT_OUTPUT_BUFFER_SIZE: i64 = 16 * 1024;
pub const DEFAULT_OUTPUT_BUFFER_TIMEOUT: Duration = Duration::from_millis(250);
pub const DEFAULT_MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;
/// Largest PUB/MPUB body the writer will send: whatever a 4-byte size prefix holds.
pub const DEFAULT_MAX_BODY_SIZE: usize = u32::MAX as usize;

/// Options for the connection pool.
#[derive(Debug, Clone)]
pub struct WriterOptions {
  /// Fixed delay between a connection closing and the next attempt to the same endpoint.
  pub reconnect_interval: Duration,
  /// Period of the stale-connection check.
  pub stale_check_interval: Duration,
  /// Publishes whose body size prefix would exceed this fail with
  /// `InvalidArgument` instead of being sent. Set it to nsqd's
  /// `--max-body-size` to fail before the daemon does.
  pub max_body_size: usize,
  /// Options handed to every connection the pool creates.
  pub connection: ConnectionOptions,
}

impl Default for WriterOptions {
  fn default() -> Self {
    Self {
      reconnect_interval: DEFAULT_RECONNECT_INTERVAL,
      stale_check_interval: DEFAULT_STALE_CHECK_INTERVAL,
      max_body_size: DEFAULT_MAX_BODY_SIZE,
      connection: ConnectionOptions::default(),
    }
  }
}

impl WriterOptions {
  /// A ready connection silent for longer than this is considered stale.
  pub fn stale_threshold(&self) -> Duration {
    self.connection.heartbeat_interval * 2
  }

  pub fn validate(&self) -> Result<(), NsqError> {
    if self.stale_check_interval.is_zero() {
      return Err(NsqError::InvalidArgument("stale_check_interval must be > 0".into()));
    }
    if self.max_body_size == 0 || self.max_body_size > DEFAULT_MAX_BODY_SIZE {
      return Err(NsqError::InvalidArgument(format!(
        "max_body_size must be in 1..={}",
        DEFAULT_MAX_BODY_SIZE
      )));
    }
    self.connection.validate()
  }
}

/// Per-connection options, most of which are sent to nsqd in IDENTIFY.
#[derive(Debug, Clone)]
pub struct ConnectionOptions {
  pub connect_timeout: Duration,
  /// Heartbeat interval negotiated with nsqd. Must be at least one second.
  pub heartbeat_interval: Duration,
  pub client_id: String,
  pub hostname: String,
  pub user_agent: String,
  /// Size of nsqd's write buffer for this connection, in bytes.
  pub output_buffer_size: i64,
  /// How long nsqd may buffer writes before flushing. Zero disables buffering.
  pub output_buffer_timeout: Duration,
  /// Percentage of messages nsqd should sample (0 means all). Must be < 100.
  pub sample_rate: u8,
  /// Largest frame accepted from nsqd.
  pub max_frame_size: usize,
  pub tcp_nodelay: bool,
  pub tcp_keepalive: Option<Duration>,
}

impl Default for ConnectionOptions {
  fn default() -> Self {
    let hostname = std::env::var("HOSTNAME")
      .ok()
      .filter(|h| !h.is_empty())
      .unwrap_or_else(|| "localhost".to_string());
    let client_id = hostname.split('.').next().unwrap_or(&hostname).to_string();
    Self {
      connect_timeout: DEFAULT_CONNECT_TIMEOUT,
      heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
      client_id,
      hostname,
      user_agent: format!("nsq-writer/{}", env!("CARGO_PKG_VERSION")),
      output_buffer_size: DEFAULT_OUTPUT_BUFFER_SIZE,
      output_buffer_timeout: DEFAULT_OUTPUT_BUFFER_TIMEOUT,
      sample_rate: 0,
      max_frame_size: DEFAULT_MAX_FRAME_SIZE,
      tcp_nodelay: true,
      tcp_keepalive: None,
    }
  }
}

impl ConnectionOptions {
  pub fn validate(&self) -> Result<(), NsqError> {
    if self.heartbeat_interval < Duration::from_secs(1) {
      return Err(NsqError::InvalidArgument("heartbeat_interval must be >= 1s".into()));
    }
    if self.sample_rate >= 100 {
      return Err(NsqError::InvalidArgument(format!(
        "sample_rate must be in 0..100, got {}",
        self.sample_rate
      )));
    }
    if self.output_buffer_size < 0 {
      return Err(NsqError::InvalidArgument("output_buffer_size must be >= 0".into()));
    }
    if self.connect_timeout.is_zero() {
      return Err(NsqError::InvalidArgument("connect_timeout must be > 0".into()));
    }
    if self.max_frame_size < 8 {
      return Err(NsqError::InvalidArgument("max_frame_size is too small".into()));
    }
    Ok(())
  }
}
