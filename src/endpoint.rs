// src/endpoint.rs

use crate::error::NsqError;
use std::fmt;
use std::str::FromStr;

/// Address of one nsqd instance. Used as the identity of a pool connection,
/// so two attempts to the same `(host, port)` are the same connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Endpoint {
  host: String,
  port: u16,
}

impl Endpoint {
  pub fn new(host: impl Into<String>, port: u16) -> Self {
    Self {
      host: host.into(),
      port,
    }
  }

  /// Parses `host:port`. IPv6 hosts must be bracketed (`[::1]:4150`).
  pub fn parse(endpoint_str: &str) -> Result<Self, NsqError> {
    let invalid_endpoint_err = || NsqError::InvalidEndpoint(endpoint_str.to_string());

    let trimmed = endpoint_str.trim();
    let (host_part, port_part) = trimmed.rsplit_once(':').ok_or_else(invalid_endpoint_err)?;

    let host = if let Some(inner) = host_part.strip_prefix('[') {
      inner.strip_suffix(']').ok_or_else(invalid_endpoint_err)?
    } else if host_part.contains(':') {
      // Unbracketed IPv6 is ambiguous with the port separator.
      return Err(invalid_endpoint_err());
    } else {
      host_part
    };
    if host.is_empty() || host.contains(char::is_whitespace) {
      return Err(invalid_endpoint_err());
    }

    let port = port_part.parse::<u16>().map_err(|_| {
      tracing::debug!("Failed to parse nsqd port: {}", port_part);
      invalid_endpoint_err()
    })?;
    if port == 0 {
      return Err(invalid_endpoint_err());
    }

    Ok(Self::new(host, port))
  }

  pub fn host(&self) -> &str {
    &self.host
  }

  pub fn port(&self) -> u16 {
    self.port
  }
}

impl fmt::Display for Endpoint {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    if self.host.contains(':') {
      write!(f, "[{}]:{}", self.host, self.port)
    } else {
      write!(f, "{}:{}", self.host, self.port)
    }
  }
}

impl FromStr for Endpoint {
  type Err = NsqError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    Endpoint::parse(s)
  }
}

/// Parses the configured nsqd addresses once, keeping first-seen order and
/// dropping duplicates. An empty list is rejected.
pub fn parse_endpoints<I, S>(addresses: I) -> Result<Vec<Endpoint>, NsqError>
where
  I: IntoIterator<Item = S>,
  S: AsRef<str>,
{
  let mut endpoints: Vec<Endpoint> = Vec::new();
  for address in addresses {
    let endpoint = Endpoint::parse(address.as_ref())?;
    if !endpoints.contains(&endpoint) {
      endpoints.push(endpoint);
    }
  }
  if endpoints.is_empty() {
    return Err(NsqError::InvalidArgument(
      "at least one nsqd TCP address is required".into(),
    ));
  }
  Ok(endpoints)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_parse_host_port() {
    let ep = Endpoint::parse("127.0.0.1:4150").unwrap();
    assert_eq!(ep.host(), "127.0.0.1");
    assert_eq!(ep.port(), 4150);
    assert_eq!(ep.to_string(), "127.0.0.1:4150");

    let ep: Endpoint = "nsqd-1.internal:4150".parse().unwrap();
    assert_eq!(ep.host(), "nsqd-1.internal");
  }

  #[test]
  fn test_parse_ipv6() {
    let ep = Endpoint::parse("[::1]:4150").unwrap();
    assert_eq!(ep.host(), "::1");
    assert_eq!(ep.to_string(), "[::1]:4150");
    assert!(Endpoint::parse("::1:4150").is_err());
  }

  #[test]
  fn test_parse_invalid() {
    for bad in ["", "localhost", ":4150", "host:", "host:abc", "host:0", "host:70000", "[::1:4150", "a b:1"] {
      assert!(
        matches!(Endpoint::parse(bad), Err(NsqError::InvalidEndpoint(_))),
        "expected {:?} to be rejected",
        bad
      );
    }
  }

  #[test]
  fn test_parse_endpoints_dedupes_in_order() {
    let eps = parse_endpoints(["b:4150", "a:4150", "b:4150"]).unwrap();
    assert_eq!(eps, vec![Endpoint::new("b", 4150), Endpoint::new("a", 4150)]);

    let empty: [&str; 0] = [];
    assert!(matches!(parse_endpoints(empty), Err(NsqError::InvalidArgument(_))));
  }
}
