// src/runtime/manual.rs

//! A deterministic event loop with a virtual clock.
//!
//! Nothing runs on its own: the owner pulls ready tasks and advances time
//! explicitly. Useful for driving a [`Writer`] step by step in tests and
//! simulations.

use crate::endpoint::Endpoint;
use crate::runtime::event_loop::{EventLoop, Task};
use crate::writer::Writer;

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug)]
struct Timer {
  due: Instant,
  seq: u64,
  task: Task,
}

#[derive(Debug)]
struct ManualState {
  now: Instant,
  ready: VecDeque<Task>,
  timers: Vec<Timer>,
  next_seq: u64,
  stopped: bool,
}

/// Summary of a scheduled (not yet due) task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledTimer {
  pub remaining: Duration,
  pub task: &'static str,
  /// Target of a scheduled `Connect`.
  pub endpoint: Option<Endpoint>,
}

#[derive(Debug)]
pub struct ManualEventLoop {
  state: Mutex<ManualState>,
}

impl ManualEventLoop {
  pub fn new() -> Arc<Self> {
    Arc::new(Self {
      state: Mutex::new(ManualState {
        now: Instant::now(),
        ready: VecDeque::new(),
        timers: Vec::new(),
        next_seq: 0,
        stopped: false,
      }),
    })
  }

  /// Takes the oldest ready task, if any.
  pub fn pop_ready(&self) -> Option<Task> {
    self.state.lock().ready.pop_front()
  }

  pub fn ready_len(&self) -> usize {
    self.state.lock().ready.len()
  }

  /// Moves the clock forward and makes every timer due by then ready, in
  /// due-time order (scheduling order for ties).
  pub fn advance(&self, by: Duration) {
    let mut state = self.state.lock();
    state.now += by;
    let now = state.now;
    let (mut due, pending): (Vec<Timer>, Vec<Timer>) = state.timers.drain(..).partition(|t| t.due <= now);
    state.timers = pending;
    due.sort_by_key(|t| (t.due, t.seq));
    if state.stopped {
      drop(state);
      for timer in due {
        timer.task.abandon();
      }
      return;
    }
    state.ready.extend(due.into_iter().map(|t| t.task));
  }

  pub fn pending_timers(&self) -> Vec<ScheduledTimer> {
    let state = self.state.lock();
    let mut timers: Vec<&Timer> = state.timers.iter().collect();
    timers.sort_by_key(|t| (t.due, t.seq));
    timers
      .into_iter()
      .map(|t| ScheduledTimer {
        remaining: t.due.saturating_duration_since(state.now),
        task: t.task.variant_name(),
        endpoint: match &t.task {
          Task::Connect(endpoint) => Some(endpoint.clone()),
          _ => None,
        },
      })
      .collect()
  }

  pub fn is_stopped(&self) -> bool {
    self.state.lock().stopped
  }

  /// Feeds ready tasks to `writer` until none are left, including tasks the
  /// writer schedules while handling them. Returns how many ran.
  pub fn run_until_idle(&self, writer: &mut Writer) -> usize {
    let mut count = 0;
    while let Some(task) = self.pop_ready() {
      writer.run_task(task);
      count += 1;
    }
    count
  }

  /// Advances the clock, then runs everything that became ready.
  pub fn advance_and_run(&self, by: Duration, writer: &mut Writer) -> usize {
    self.advance(by);
    self.run_until_idle(writer)
  }
}

impl EventLoop for ManualEventLoop {
  fn call_soon(&self, task: Task) {
    let mut state = self.state.lock();
    if state.stopped {
      drop(state);
      task.abandon();
      return;
    }
    state.ready.push_back(task);
  }

  fn call_later(&self, delay: Duration, task: Task) {
    let mut state = self.state.lock();
    if state.stopped {
      drop(state);
      task.abandon();
      return;
    }
    let due = state.now + delay;
    let seq = state.next_seq;
    state.next_seq += 1;
    state.timers.push(Timer { due, seq, task });
  }

  fn now(&self) -> Instant {
    self.state.lock().now
  }

  fn stop(&self) {
    self.state.lock().stopped = true;
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn connect(port: u16) -> Task {
    Task::Connect(Endpoint::new("nsqd", port))
  }

  #[test]
  fn test_call_soon_is_fifo() {
    let lp = ManualEventLoop::new();
    lp.call_soon(connect(1));
    lp.call_soon(Task::CheckStale);
    lp.call_soon(connect(2));

    assert!(matches!(lp.pop_ready(), Some(Task::Connect(ep)) if ep.port() == 1));
    assert!(matches!(lp.pop_ready(), Some(Task::CheckStale)));
    assert!(matches!(lp.pop_ready(), Some(Task::Connect(ep)) if ep.port() == 2));
    assert!(lp.pop_ready().is_none());
  }

  #[test]
  fn test_timers_fire_in_due_order() {
    let lp = ManualEventLoop::new();
    let start = lp.now();
    lp.call_later(Duration::from_secs(10), connect(10));
    lp.call_later(Duration::from_secs(5), connect(5));
    lp.call_later(Duration::from_secs(5), connect(6));

    let timers = lp.pending_timers();
    assert_eq!(timers.len(), 3);
    assert_eq!(timers[0].remaining, Duration::from_secs(5));
    assert_eq!(timers[0].endpoint, Some(Endpoint::new("nsqd", 5)));

    lp.advance(Duration::from_secs(4));
    assert_eq!(lp.ready_len(), 0);

    lp.advance(Duration::from_secs(1));
    assert_eq!(lp.now() - start, Duration::from_secs(5));
    assert!(matches!(lp.pop_ready(), Some(Task::Connect(ep)) if ep.port() == 5));
    assert!(matches!(lp.pop_ready(), Some(Task::Connect(ep)) if ep.port() == 6));
    assert!(lp.pop_ready().is_none());

    lp.advance(Duration::from_secs(60));
    assert!(matches!(lp.pop_ready(), Some(Task::Connect(ep)) if ep.port() == 10));
    assert!(lp.pending_timers().is_empty());
  }

  #[test]
  fn test_stopped_loop_drops_new_tasks() {
    let lp = ManualEventLoop::new();
    lp.stop();
    lp.call_soon(Task::CheckStale);
    lp.call_later(Duration::from_secs(1), Task::CheckStale);
    assert!(lp.is_stopped());
    assert_eq!(lp.ready_len(), 0);
    assert!(lp.pending_timers().is_empty());
  }
}
