// src/writer/selector.rs

use crate::endpoint::Endpoint;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Picks which ready connection receives the next publish.
///
/// `candidates` is never empty and is ordered by endpoint. The returned
/// index must be in range; the writer wraps anything larger.
pub trait SelectionStrategy: Send {
  fn select(&mut self, candidates: &[&Endpoint]) -> usize;
}

impl<F> SelectionStrategy for F
where
  F: FnMut(&[&Endpoint]) -> usize + Send,
{
  fn select(&mut self, candidates: &[&Endpoint]) -> usize {
    self(candidates)
  }
}

/// Uniformly random choice. The default.
#[derive(Debug)]
pub struct RandomSelection {
  rng: StdRng,
}

impl RandomSelection {
  pub fn new() -> Self {
    Self {
      rng: StdRng::from_os_rng(),
    }
  }

  /// Reproducible sequence, for tests and simulations.
  pub fn with_seed(seed: u64) -> Self {
    Self {
      rng: StdRng::seed_from_u64(seed),
    }
  }
}

impl Default for RandomSelection {
  fn default() -> Self {
    Self::new()
  }
}

impl SelectionStrategy for RandomSelection {
  fn select(&mut self, candidates: &[&Endpoint]) -> usize {
    if candidates.len() <= 1 {
      return 0;
    }
    self.rng.random_range(0..candidates.len())
  }
}

/// Cycles through the candidates in order.
#[derive(Debug, Default)]
pub struct RoundRobinSelection {
  next: usize,
}

impl RoundRobinSelection {
  pub fn new() -> Self {
    Self::default()
  }
}

impl SelectionStrategy for RoundRobinSelection {
  fn select(&mut self, candidates: &[&Endpoint]) -> usize {
    if candidates.is_empty() {
      return 0;
    }
    let idx = self.next % candidates.len();
    self.next = self.next.wrapping_add(1);
    idx
  }
}
