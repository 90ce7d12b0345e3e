// tests/common/mod.rs
#![allow(dead_code)] // Allow unused code in this common test module

use loopback::{AppFn, BufferedDuplex, Environment};
use std::sync::{
  atomic::{AtomicUsize, Ordering},
  Arc,
};
use tracing::Level;

// --- Helper for Tracing Setup (call once per test run if needed) ---
use once_cell::sync::Lazy;
static TRACING_INIT: Lazy<()> = Lazy::new(|| {
  tracing_subscriber::fmt()
    .with_max_level(Level::DEBUG)
    .with_test_writer() // Important for tests to capture output
    .try_init()
    .ok(); // Allow multiple initializations in tests (ok if fails)
});

pub fn setup_tracing() {
  Lazy::force(&TRACING_INIT);
}

// --- Shared counters for lifecycle assertions ---
pub static TEARDOWN_COUNTER: Lazy<Arc<AtomicUsize>> = Lazy::new(|| Arc::new(AtomicUsize::new(0)));

pub fn reset_counters() {
  TEARDOWN_COUNTER.store(0, Ordering::SeqCst);
}

// --- Channel helpers ---

/// Reads the channel to graceful end-of-stream with a small buffer,
/// returning everything received.
pub fn read_to_end(channel: &BufferedDuplex) -> Vec<u8> {
  let mut out = Vec::new();
  let mut buf = [0u8; 8];
  loop {
    let n = channel.read(&mut buf).expect("read failed before EOF");
    if n == 0 {
      return out;
    }
    out.extend_from_slice(&buf[..n]);
  }
}

// --- Environment / middleware helpers ---

/// A terminal handler that stamps `status` and returns immediately.
pub fn status_handler(status: i64) -> impl Fn(Environment) -> futures_compat::Ready + Send + Sync {
  move |env: Environment| {
    env.set_response_status(status);
    futures_compat::ready_ok()
  }
}

/// Appends `tag` to the "test.trace" environment value, recording middleware
/// execution order.
pub fn append_trace(env: &Environment, tag: &str) {
  let mut trace = env
    .get("test.trace")
    .and_then(|v| v.as_str().map(str::to_string))
    .unwrap_or_default();
  trace.push_str(tag);
  env.insert("test.trace", loopback::EnvValue::Str(trace));
}

/// A middleware that appends `tag` before delegating downstream.
pub fn tracing_middleware(tag: &'static str) -> impl FnOnce(AppFn) -> AppFn + Send + 'static {
  move |next: AppFn| {
    Arc::new(move |env: Environment| -> loopback::AppFuture {
      let next = next.clone();
      Box::pin(async move {
        append_trace(&env, tag);
        next(env).await
      })
    }) as AppFn
  }
}

/// Tiny shim so `status_handler` can return a concrete, nameable future.
pub mod futures_compat {
  pub type Ready = std::future::Ready<Result<(), anyhow::Error>>;

  pub fn ready_ok() -> Ready {
    std::future::ready(Ok(()))
  }
}
