// tests/writer_pool.rs

use nsq_writer::{
  ConnectionEvent, Endpoint, EventLoop, NsqError, RoundRobinSelection, Task, Writer, WriterHooks, WriterOptions,
};

use bytes::Bytes;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

mod common;
use common::{take_sent, Harness, Outcomes, ScriptedConnector};

const A: &str = "nsqd-a:4150";
const B: &str = "nsqd-b:4150";

fn ep(s: &str) -> Endpoint {
  Endpoint::parse(s).unwrap()
}

#[test]
fn test_publish_without_connections_fails_synchronously() {
  let mut h = Harness::new(&[A]);
  let outcomes = Outcomes::default();

  // Connecting, but not ready: no pool members yet.
  h.writer.publish("events", &b"hello"[..], Some(outcomes.callback("p")));

  assert_eq!(outcomes.len(), 1);
  assert_eq!(outcomes.errors(), vec!["NoConnections".to_string()]);
  assert_eq!(outcomes.all()[0].1, None);
  assert!(h.wire.lock().sent.is_empty());
  assert_eq!(h.writer.pending_callbacks(&ep(A)), 0);
  assert_eq!(h.lp.ready_len(), 0);
}

#[test]
fn test_callbacks_resolve_in_send_order() {
  let mut h = Harness::new(&[A]);
  h.ready_all();
  let outcomes = Outcomes::default();

  for i in 0..5 {
    h.writer
      .publish("events", Bytes::from(format!("m{}", i)), Some(outcomes.callback(i.to_string())));
  }
  assert_eq!(outcomes.len(), 0);
  assert_eq!(h.writer.pending_callbacks(&ep(A)), 5);

  let sent = take_sent(&h.wire);
  let bodies: Vec<&[u8]> = sent.iter().map(|(_, b)| &b[b.len() - 2..]).collect();
  assert_eq!(bodies, vec![&b"m0"[..], b"m1", b"m2", b"m3", b"m4"]);

  h.respond(1, b"OK");
  h.respond(1, b"OK");
  h.emit(1, ConnectionEvent::Error(Bytes::from_static(b"E_PUB_FAILED PUB failed")));
  h.respond(1, b"OK");
  h.respond(1, b"OK");

  assert_eq!(outcomes.tags(), vec!["0", "1", "2", "3", "4"]);
  let all = outcomes.all();
  assert!(all[0].2.is_ok());
  assert!(all[2].2.as_ref().unwrap_err().starts_with("Daemon"));
  assert!(all.iter().all(|(_, endpoint, _)| endpoint.as_ref() == Some(&ep(A))));
  assert_eq!(h.writer.pending_callbacks(&ep(A)), 0);
}

#[test]
fn test_close_fails_queued_callbacks_and_reconnects_once() {
  let mut h = Harness::new(&[A]);
  h.ready_all();
  let outcomes = Outcomes::default();
  for i in 0..3 {
    h.writer.publish("events", &b"x"[..], Some(outcomes.callback(i.to_string())));
  }

  h.emit(1, ConnectionEvent::Close);
  // A second Close for the same attempt is ignored.
  h.emit(1, ConnectionEvent::Close);

  assert_eq!(outcomes.tags(), vec!["0", "1", "2"]);
  assert!(outcomes.errors().iter().all(|e| e == "ConnectionClosed"));
  assert!(h.writer.ready_endpoints().is_empty());
  assert_eq!(h.writer.connection_count(), 0);

  let reconnects: Vec<_> = h
    .lp
    .pending_timers()
    .into_iter()
    .filter(|t| t.task == "Connect")
    .collect();
  assert_eq!(reconnects.len(), 1);
  assert_eq!(reconnects[0].remaining, Duration::from_secs(15));
  assert_eq!(reconnects[0].endpoint, Some(ep(A)));

  h.lp.advance(Duration::from_secs(14));
  h.run();
  assert_eq!(h.wire.lock().created.len(), 1);

  h.lp.advance(Duration::from_secs(1));
  h.run();
  assert_eq!(h.wire.lock().handles_for(&ep(A)), vec![1, 2]);

  // Retries keep going, one per close.
  h.emit(2, ConnectionEvent::Close);
  h.lp.advance(Duration::from_secs(15));
  h.run();
  assert_eq!(h.wire.lock().handles_for(&ep(A)), vec![1, 2, 3]);
  h.emit(3, ConnectionEvent::Ready);
  assert_eq!(h.writer.ready_endpoints(), vec![ep(A)]);
}

#[test]
fn test_callbacks_identify_connection_by_endpoint_across_reconnects() {
  let mut h = Harness::new(&[A]);
  h.ready_all();
  let outcomes = Outcomes::default();

  h.writer.publish("events", &b"x"[..], Some(outcomes.callback("first")));
  h.respond(1, b"OK");
  h.emit(1, ConnectionEvent::Close);
  h.lp.advance(Duration::from_secs(15));
  h.run();
  h.emit(2, ConnectionEvent::Ready);
  assert_eq!(h.writer.member_handle(&ep(A)), Some(2));

  h.writer.publish("events", &b"y"[..], Some(outcomes.callback("second")));
  h.respond(2, b"OK");

  let all = outcomes.all();
  assert_eq!(outcomes.tags(), vec!["first", "second"]);
  assert!(all.iter().all(|(_, endpoint, result)| endpoint.as_ref() == Some(&ep(A)) && result.is_ok()));
}

#[test]
fn test_duplicate_ready_keeps_first_connection() {
  let mut h = Harness::new(&[A]);
  // A second attempt before the first is ready.
  h.writer.connect_to(ep(A));
  assert_eq!(h.wire.lock().handles_for(&ep(A)), vec![1, 2]);

  h.emit(1, ConnectionEvent::Ready);
  h.emit(2, ConnectionEvent::Ready);

  assert_eq!(h.wire.lock().closed, vec![2]);
  assert_eq!(h.writer.member_handle(&ep(A)), Some(1));
  assert_eq!(h.writer.ready_endpoints(), vec![ep(A)]);

  let outcomes = Outcomes::default();
  for i in 0..4 {
    h.writer.publish("events", &b"x"[..], Some(outcomes.callback(i.to_string())));
  }
  assert!(h.wire.lock().sent.iter().all(|(handle, _)| *handle == 1));

  // The loser's reconnect finds the endpoint connected and does nothing.
  h.lp.advance(Duration::from_secs(15));
  h.run();
  assert_eq!(h.wire.lock().created.len(), 2);
  assert_eq!(h.writer.member_handle(&ep(A)), Some(1));
}

#[test]
fn test_hundred_publishes_across_two_endpoints() {
  let mut h = Harness::new(&[A, B]);
  h.ready_all();
  assert_eq!(h.writer.ready_endpoints(), vec![ep(A), ep(B)]);
  let outcomes = Outcomes::default();

  for i in 0..100 {
    h.writer.publish("topic", &b"hello"[..], Some(outcomes.callback(i.to_string())));
  }
  let (on_a, on_b) = {
    let wire = h.wire.lock();
    (wire.sent_on(1), wire.sent_on(2))
  };
  assert_eq!(on_a + on_b, 100);
  assert!(on_a > 0 && on_b > 0, "a={} b={}", on_a, on_b);

  for _ in 0..on_a {
    h.respond(1, b"OK");
  }
  for _ in 0..on_b {
    h.respond(2, b"OK");
  }

  let all = outcomes.all();
  assert_eq!(all.len(), 100);
  let mut tags: Vec<usize> = all.iter().map(|(tag, _, _)| tag.parse().unwrap()).collect();
  tags.sort_unstable();
  assert_eq!(tags, (0..100).collect::<Vec<_>>());
  let from_a = all.iter().filter(|(_, e, _)| e.as_ref() == Some(&ep(A))).count();
  let from_b = all.iter().filter(|(_, e, _)| e.as_ref() == Some(&ep(B))).count();
  assert_eq!((from_a, from_b), (on_a, on_b));
  assert!(all.iter().all(|(_, _, r)| r.is_ok()));
}

#[test]
fn test_close_before_response_yields_connection_closed() {
  let mut h = Harness::new(&[A]);
  h.ready_all();
  let outcomes = Outcomes::default();
  h.writer.publish("topic", &b"hello"[..], Some(outcomes.callback("p")));

  h.emit(1, ConnectionEvent::Close);
  // A late frame from the closed attempt reaches nobody.
  h.respond(1, b"OK");

  assert_eq!(outcomes.errors(), vec!["ConnectionClosed".to_string()]);
  assert_eq!(outcomes.len(), 1);
}

#[test]
fn test_send_failure_closes_only_that_connection() {
  let mut h = Harness::build(
    &[A, B],
    WriterOptions::default(),
    Some(Box::new(RoundRobinSelection::new())),
    None,
  );
  h.ready_all();
  h.wire.lock().failing_sends.push(ep(A));
  let outcomes = Outcomes::default();

  h.writer.publish("topic", &b"1"[..], Some(outcomes.callback("a")));
  // Resolved through the close path, not by the publish call.
  assert_eq!(outcomes.len(), 0);
  assert_eq!(h.wire.lock().closed, vec![1]);

  // A is closing and no longer selectable.
  h.writer.publish("topic", &b"2"[..], Some(outcomes.callback("b")));
  assert_eq!(h.wire.lock().sent_on(2), 1);

  h.run();
  assert_eq!(outcomes.tags(), vec!["a"]);
  assert_eq!(outcomes.errors(), vec!["ConnectionClosed".to_string()]);
  assert_eq!(h.writer.pending_callbacks(&ep(B)), 1);
  assert_eq!(h.writer.ready_endpoints(), vec![ep(B)]);

  h.respond(2, b"OK");
  assert_eq!(outcomes.tags(), vec!["a", "b"]);
}

#[test]
fn test_panicking_callback_does_not_stop_draining() {
  let mut h = Harness::new(&[A]);
  h.ready_all();
  let outcomes = Outcomes::default();
  h.writer
    .publish("topic", &b"x"[..], Some(Box::new(|_, _| panic!("callback exploded"))));
  h.writer.publish("topic", &b"y"[..], Some(outcomes.callback("second")));
  h.writer.publish("topic", &b"z"[..], Some(outcomes.callback("third")));

  h.emit(1, ConnectionEvent::Close);

  assert_eq!(outcomes.tags(), vec!["second", "third"]);
  assert_eq!(h.lp.pending_timers().iter().filter(|t| t.task == "Connect").count(), 1);
}

#[test]
fn test_frame_with_empty_queue_is_ignored() {
  let mut h = Harness::new(&[A]);
  h.ready_all();
  h.respond(1, b"OK");
  h.emit(1, ConnectionEvent::Error(Bytes::from_static(b"E_INVALID stray")));
  assert_eq!(h.writer.ready_endpoints(), vec![ep(A)]);

  let outcomes = Outcomes::default();
  h.writer.publish("topic", &b"x"[..], Some(outcomes.callback("p")));
  h.respond(1, b"OK");
  assert_eq!(outcomes.len(), 1);
  assert!(outcomes.errors().is_empty());
}

#[test]
fn test_invalid_topic_and_empty_batch_fail_fast() {
  let mut h = Harness::new(&[A]);
  h.ready_all();
  let outcomes = Outcomes::default();

  h.writer.publish("not a topic", &b"x"[..], Some(outcomes.callback("bad")));
  h.writer
    .multi_publish("topic", Vec::<Bytes>::new(), Some(outcomes.callback("empty")));
  assert_eq!(outcomes.len(), 2);
  let errors = outcomes.errors();
  assert!(errors[0].starts_with("InvalidTopic"));
  assert!(errors[1].starts_with("InvalidArgument"));
  assert!(h.wire.lock().sent.is_empty());

  h.writer.multi_publish(
    "topic#ephemeral",
    vec![&b"a"[..], &b"bc"[..]],
    Some(outcomes.callback("mpub")),
  );
  let sent = take_sent(&h.wire);
  assert_eq!(
    sent[0].1.as_ref(),
    b"MPUB topic#ephemeral\n\x00\x00\x00\x0f\x00\x00\x00\x02\x00\x00\x00\x01a\x00\x00\x00\x02bc"
  );
}

#[test]
fn test_oversized_body_fails_fast() {
  let options = WriterOptions {
    max_body_size: 8,
    ..WriterOptions::default()
  };
  let mut h = Harness::with_options(&[A], options);
  h.ready_all();
  let outcomes = Outcomes::default();

  h.writer.publish("topic", &b"123456789"[..], Some(outcomes.callback("pub")));
  // 4 (count) + 4 + 1 + 4 + 1 = 14
  h.writer
    .multi_publish("topic", vec![&b"a"[..], &b"b"[..]], Some(outcomes.callback("mpub")));
  assert_eq!(outcomes.tags(), vec!["pub", "mpub"]);
  for (_, endpoint, result) in outcomes.all() {
    assert_eq!(endpoint, None);
    assert!(result.unwrap_err().starts_with("InvalidArgument"));
  }
  assert!(h.wire.lock().sent.is_empty());

  // Exactly at the limit still goes out.
  h.writer.publish("topic", &b"12345678"[..], Some(outcomes.callback("fits")));
  assert_eq!(take_sent(&h.wire).len(), 1);
  h.respond(1, b"OK");
  assert_eq!(outcomes.len(), 3);
  assert_eq!(outcomes.errors().len(), 2);
}

#[test]
fn test_stale_connection_is_closed() {
  let mut h = Harness::new(&[A, B]);
  h.ready_all();

  // Default heartbeat is 30s, so silence beyond 60s is stale.
  h.lp.advance(Duration::from_secs(60));
  h.run();
  assert!(h.wire.lock().closed.is_empty());

  h.lp.advance(Duration::from_secs(30));
  h.emit(2, ConnectionEvent::Heartbeat);

  h.lp.advance(Duration::from_secs(30));
  h.run();
  assert_eq!(h.wire.lock().closed, vec![1]);
  assert_eq!(h.writer.ready_endpoints(), vec![ep(B)]);
  assert_eq!(
    h.lp
      .pending_timers()
      .iter()
      .filter(|t| t.task == "CheckStale")
      .count(),
    1
  );
}

#[derive(Debug, Default)]
struct CountingHooks {
  heartbeats: AtomicUsize,
  ready: AtomicUsize,
  closed: AtomicUsize,
}

impl WriterHooks for CountingHooks {
  fn on_heartbeat(&self, _endpoint: &Endpoint) {
    self.heartbeats.fetch_add(1, Ordering::SeqCst);
  }

  fn on_connection_ready(&self, _endpoint: &Endpoint) {
    self.ready.fetch_add(1, Ordering::SeqCst);
  }

  fn on_connection_closed(&self, _endpoint: &Endpoint) {
    self.closed.fetch_add(1, Ordering::SeqCst);
  }
}

#[test]
fn test_hooks_observe_lifecycle() {
  let hooks = Arc::new(CountingHooks::default());
  let mut h = Harness::build(&[A], WriterOptions::default(), None, Some(hooks.clone()));
  h.ready_all();
  h.emit(1, ConnectionEvent::Heartbeat);
  h.emit(1, ConnectionEvent::Heartbeat);
  h.emit(1, ConnectionEvent::Close);

  assert_eq!(hooks.ready.load(Ordering::SeqCst), 1);
  assert_eq!(hooks.heartbeats.load(Ordering::SeqCst), 2);
  assert_eq!(hooks.closed.load(Ordering::SeqCst), 1);
}

#[test]
fn test_stop_closes_everything_then_stops_loop() {
  let mut h = Harness::new(&[A, B]);
  h.emit(1, ConnectionEvent::Ready);
  // B is still connecting.
  let outcomes = Outcomes::default();
  h.writer.publish("topic", &b"x"[..], Some(outcomes.callback("queued")));

  h.lp.call_soon(Task::Stop);
  h.run();

  assert!(h.lp.is_stopped());
  assert!(h.writer.is_closing());
  assert_eq!(h.writer.connection_count(), 0);
  let mut closed = h.wire.lock().closed.clone();
  closed.sort_unstable();
  assert_eq!(closed, vec![1, 2]);
  assert_eq!(outcomes.errors(), vec!["ConnectionClosed".to_string()]);

  h.writer.publish("topic", &b"y"[..], Some(outcomes.callback("late")));
  assert_eq!(outcomes.errors().last().map(String::as_str), Some("Stopped"));

  // Nothing reconnects after shutdown.
  h.lp.advance(Duration::from_secs(60));
  h.run();
  assert_eq!(h.wire.lock().created.len(), 2);
}

#[test]
fn test_writer_rejects_bad_configuration() {
  let lp = nsq_writer::ManualEventLoop::new();
  let wire = Default::default();

  let err = Writer::new(
    ["nsqd-a"],
    WriterOptions::default(),
    lp.clone(),
    Box::new(ScriptedConnector::new(wire)),
  )
  .unwrap_err();
  assert!(matches!(err, NsqError::InvalidEndpoint(_)));

  let err = Writer::new(
    Vec::<String>::new(),
    WriterOptions::default(),
    lp.clone(),
    Box::new(ScriptedConnector::default()),
  )
  .unwrap_err();
  assert!(matches!(err, NsqError::InvalidArgument(_)));

  // Duplicates collapse to one endpoint.
  let writer = Writer::new(
    [A, B, A],
    WriterOptions::default(),
    lp,
    Box::new(ScriptedConnector::default()),
  )
  .unwrap();
  assert_eq!(writer.endpoints(), &[ep(A), ep(B)]);
}
