use crate::cli::PubArgs;

use std::time::Duration;

use anyhow::{Context as AnyhowContext, Result};
use bytes::Bytes;
use nsq_writer::{Producer, PublishCallback, WriterOptions};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc::{unbounded_channel, UnboundedSender};

/// (messages covered, outcome) for one PUB or MPUB.
type Outcome = (usize, Result<(), String>);

pub async fn run(args: PubArgs) -> Result<()> {
  let options = WriterOptions {
    reconnect_interval: Duration::from_secs(args.reconnect_interval),
    ..WriterOptions::default()
  };
  let producer = Producer::builder(&args.nsqd_tcp_addresses)
    .options(options)
    .build()
    .context("Failed to start producer")?;

  let ready = producer
    .wait_ready(Duration::from_secs(args.ready_timeout))
    .await
    .with_context(|| format!("No nsqd became ready within {}s", args.ready_timeout))?;
  tracing::info!(endpoints = ?ready, "connected");

  let batch_size = args.batch_size as usize;
  let (tx, mut rx) = unbounded_channel::<Outcome>();
  let mut lines = BufReader::new(tokio::io::stdin()).lines();
  let mut batch: Vec<Bytes> = Vec::with_capacity(batch_size);
  let mut read = 0usize;

  while let Some(line) = lines.next_line().await.context("Failed to read stdin")? {
    batch.push(Bytes::from(line));
    read += 1;
    if batch.len() >= batch_size {
      send_batch(&producer, &args.topic, std::mem::take(&mut batch), &tx);
    }
  }
  if !batch.is_empty() {
    send_batch(&producer, &args.topic, batch, &tx);
  }
  // Outcomes stop once every callback has run and dropped its sender.
  drop(tx);

  let (mut published, mut failed) = (0usize, 0usize);
  while let Some((count, result)) = rx.recv().await {
    match result {
      Ok(()) => published += count,
      Err(e) => {
        failed += count;
        tracing::error!(messages = count, error = %e, "publish failed");
      }
    }
  }

  producer.close().await.context("Failed to close producer")?;
  println!("read {} lines, published {}, failed {}", read, published, failed);
  if failed > 0 {
    anyhow::bail!("{} messages were not published", failed);
  }
  Ok(())
}

fn send_batch(producer: &Producer, topic: &str, mut batch: Vec<Bytes>, tx: &UnboundedSender<Outcome>) {
  let count = batch.len();
  let tx = tx.clone();
  let callback: PublishCallback = Box::new(move |_, result| {
    let _ = tx.send((count, result.map(|_| ()).map_err(|e| e.to_string())));
  });
  if count == 1 {
    producer.publish(topic, batch.swap_remove(0), Some(callback));
  } else {
    producer.multi_publish(topic, batch, Some(callback));
  }
}
