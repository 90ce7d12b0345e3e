// tests/channel_async_tests.rs
mod common; // Reference the common module

use common::*;
use loopback::{BufferedDuplex, LoopbackError};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn async_read_suspends_until_data_arrives() {
  setup_tracing();
  let channel = BufferedDuplex::new();
  let producer = channel.clone();

  let writer = tokio::spawn(async move {
    tokio::time::sleep(Duration::from_millis(50)).await;
    producer.write(b"late data").unwrap();
    producer.close();
  });

  let token = CancellationToken::new();
  let mut buf = [0u8; 16];
  let n = channel.read_async(&mut buf, &token).await.unwrap();
  assert_eq!(&buf[..n], b"late data");
  assert_eq!(channel.read_async(&mut buf, &token).await.unwrap(), 0);
  writer.await.unwrap();
}

#[tokio::test]
async fn async_round_trip_with_async_writes() {
  setup_tracing();
  let channel = BufferedDuplex::new();
  let producer = channel.clone();
  let token = CancellationToken::new();

  let writer_token = token.clone();
  let writer = tokio::spawn(async move {
    for part in [&b"alpha"[..], b"-", b"omega"] {
      producer.write_async(part, &writer_token).await.unwrap();
    }
    producer.close();
  });

  let mut received = Vec::new();
  let mut buf = [0u8; 4];
  loop {
    let n = channel.read_async(&mut buf, &token).await.unwrap();
    if n == 0 {
      break;
    }
    received.extend_from_slice(&buf[..n]);
  }
  writer.await.unwrap();
  assert_eq!(received, b"alpha-omega");
}

#[tokio::test]
async fn cancellation_during_read_aborts_the_whole_channel() {
  setup_tracing();
  let channel = BufferedDuplex::new();
  let token = CancellationToken::new();

  let canceller = token.clone();
  tokio::spawn(async move {
    tokio::time::sleep(Duration::from_millis(50)).await;
    canceller.cancel();
  });

  let mut buf = [0u8; 4];
  let err = channel.read_async(&mut buf, &token).await.unwrap_err();
  assert!(err.is_aborted(), "got {:?}", err);

  // Cancellation is channel-wide, not call-scoped: a fresh read with a
  // fresh token still observes the abort, and writes fail too.
  let fresh = CancellationToken::new();
  assert!(channel.read_async(&mut buf, &fresh).await.unwrap_err().is_aborted());
  assert!(channel.write(b"post-abort").unwrap_err().is_aborted());
  assert!(channel.is_aborted());
}

#[tokio::test]
async fn pre_canceled_read_aborts_immediately() {
  setup_tracing();
  let channel = BufferedDuplex::new();
  channel.write(b"pending").unwrap();

  let token = CancellationToken::new();
  token.cancel();

  let mut buf = [0u8; 8];
  let err = channel.read_async(&mut buf, &token).await.unwrap_err();
  assert!(err.is_aborted());
  assert!(channel.is_aborted());
}

#[tokio::test]
async fn pre_canceled_write_reports_canceled_without_mutating_state() {
  setup_tracing();
  let channel = BufferedDuplex::with_first_write(|| {
    panic!("first-write hook must not fire for a pre-canceled write");
  });

  let token = CancellationToken::new();
  token.cancel();

  let err = channel.write_async(b"never lands", &token).await.unwrap_err();
  assert!(err.is_aborted());

  // State untouched: nothing buffered, hook unfired, channel still usable.
  assert_eq!(channel.buffered(), 0);
  assert!(!channel.first_write_done());
  assert!(!channel.is_aborted());
  assert!(!channel.is_closed());
}

#[tokio::test]
async fn async_reader_blocked_at_abort_wakes_and_fails() {
  setup_tracing();
  let channel = BufferedDuplex::new();
  let consumer = channel.clone();

  let reader = tokio::spawn(async move {
    let token = CancellationToken::new();
    let mut buf = [0u8; 4];
    consumer.read_async(&mut buf, &token).await
  });

  tokio::time::sleep(Duration::from_millis(50)).await;
  channel.abort_with("peer went away");

  match reader.await.unwrap().unwrap_err() {
    LoopbackError::Aborted { reason } => assert_eq!(reason, "peer went away"),
    other => panic!("Expected Aborted, got {:?}", other),
  }
}

#[tokio::test]
async fn async_reader_blocked_at_close_observes_eof() {
  setup_tracing();
  let channel = BufferedDuplex::new();
  let consumer = channel.clone();

  let reader = tokio::spawn(async move {
    let token = CancellationToken::new();
    let mut buf = [0u8; 4];
    consumer.read_async(&mut buf, &token).await
  });

  tokio::time::sleep(Duration::from_millis(50)).await;
  channel.close();

  assert_eq!(reader.await.unwrap().unwrap(), 0);
}

#[tokio::test]
async fn sync_reader_and_async_writer_interoperate() {
  setup_tracing();
  let channel = BufferedDuplex::new();
  let producer = channel.clone();
  let token = CancellationToken::new();

  // Blocking consumer on a dedicated thread, the way a socket client would
  // sit opposite an async application.
  let reader = std::thread::spawn(move || read_to_end(&channel));

  for chunk in [&b"inter"[..], b"op"] {
    producer.write_async(chunk, &token).await.unwrap();
  }
  producer.close();

  let received = tokio::task::spawn_blocking(move || reader.join().unwrap())
    .await
    .unwrap();
  assert_eq!(received, b"interop");
}
