// src/protocol/identify.rs

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::NsqError;
use crate::options::ConnectionOptions;

/// Body of the IDENTIFY command.
///
/// TLS, compression and auth are not negotiated by this client, so they are
/// always advertised as disabled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IdentifyData {
  pub client_id: String,
  pub hostname: String,
  /// Milliseconds.
  pub heartbeat_interval: i64,
  pub feature_negotiation: bool,
  pub tls_v1: bool,
  pub snappy: bool,
  pub deflate: bool,
  pub output_buffer_size: i64,
  /// Milliseconds.
  pub output_buffer_timeout: i64,
  pub sample_rate: u8,
  pub user_agent: String,
}

impl IdentifyData {
  pub fn from_options(options: &ConnectionOptions) -> Self {
    Self {
      client_id: options.client_id.clone(),
      hostname: options.hostname.clone(),
      heartbeat_interval: options.heartbeat_interval.as_millis() as i64,
      feature_negotiation: true,
      tls_v1: false,
      snappy: false,
      deflate: false,
      output_buffer_size: options.output_buffer_size,
      output_buffer_timeout: options.output_buffer_timeout.as_millis() as i64,
      sample_rate: options.sample_rate,
      user_agent: options.user_agent.clone(),
    }
  }

  pub fn to_json(&self) -> Result<Bytes, NsqError> {
    serde_json::to_vec(self)
      .map(Bytes::from)
      .map_err(|e| NsqError::Internal(format!("failed to serialize IDENTIFY body: {}", e)))
  }
}

/// Negotiated settings nsqd returns when `feature_negotiation` is requested.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct IdentifyResponse {
  pub version: Option<String>,
  pub max_rdy_count: Option<i64>,
  pub max_msg_timeout: Option<i64>,
  pub msg_timeout: Option<i64>,
  pub tls_v1: bool,
  pub deflate: bool,
  pub snappy: bool,
  pub sample_rate: Option<i64>,
  pub auth_required: bool,
  pub output_buffer_size: Option<i64>,
  pub output_buffer_timeout: Option<i64>,
}

impl IdentifyResponse {
  pub fn parse(data: &[u8]) -> Result<Self, NsqError> {
    serde_json::from_slice(data).map_err(|e| {
      NsqError::ProtocolViolation(format!(
        "failed to parse IDENTIFY response JSON from nsqd ({}): {:?}",
        e,
        String::from_utf8_lossy(data)
      ))
    })
  }
}
