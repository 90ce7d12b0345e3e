// loopback/src/channel.rs

//! The `BufferedDuplex` channel: an in-memory byte stream standing in for a
//! network socket within one request/response exchange.
//!
//! A pipeline writes response bytes into the channel while a client reads
//! them concurrently. The channel reproduces transport semantics that
//! streaming consumers assume: partial reads, blocking (or suspending) on an
//! empty buffer, a one-shot first-write hook, terminal abort, and graceful
//! end-of-stream that drains buffered data before reporting EOF.
//!
//! At most one writer and at most one reader progress at a time (enforced by
//! two distinct gates); a writer and a reader may run in true parallel.

use crate::error::{LoopbackError, LoopbackResult};
use bytes::{Buf, Bytes};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{event, Level};

/// Shared cause recorded when cancellation tears the channel down. One static
/// value feeds every pre-canceled fast path instead of rebuilding the reason
/// per call.
pub(crate) const CANCELED_REASON: &str = "operation canceled by caller";

const DEFAULT_ABORT_REASON: &str = "channel aborted";

/// One-shot hook fired on the first acquisition of the write path, before any
/// bytes move. Callers use it to defer their "response started" commitment
/// until data actually flows.
pub type FirstWriteHook = Box<dyn FnOnce() + Send>;

struct WriteSide {
  hook: Option<FirstWriteHook>,
  hook_fired: bool,
}

struct State {
  /// Chunks awaiting consumption, in write order.
  queue: VecDeque<Bytes>,
  /// The chunk currently being partially consumed; its cursor advances as
  /// the reader copies out of it.
  current: Option<Bytes>,
  /// Graceful close: no further writes, reads drain then report EOF.
  closed: bool,
  /// Terminal abort with its cause. Beats `closed` and buffered data.
  aborted: Option<String>,
}

struct Inner {
  state: Mutex<State>,
  /// Wakes a blocked synchronous reader.
  readable: Condvar,
  /// Wakes a suspended asynchronous reader.
  notify: Notify,
  /// Serializes writers; also owns the first-write hook.
  write_gate: Mutex<WriteSide>,
  /// Serializes readers through the copy pass.
  read_gate: Mutex<()>,
}

/// A synchronized, buffered, in-memory duplex byte channel.
///
/// Clones share the same channel; conventionally one clone lives on the
/// producer side (the pipeline's response path) and one on the consumer side
/// for the duration of a single exchange. The channel never aliases a
/// caller's buffer: written bytes are copied into immutable chunks.
pub struct BufferedDuplex {
  inner: Arc<Inner>,
}

impl BufferedDuplex {
  pub fn new() -> Self {
    Self::build(None)
  }

  /// A channel whose `hook` fires exactly once, on the first acquisition of
  /// the write path, even for a zero-length write.
  pub fn with_first_write(hook: impl FnOnce() + Send + 'static) -> Self {
    Self::build(Some(Box::new(hook)))
  }

  fn build(hook: Option<FirstWriteHook>) -> Self {
    BufferedDuplex {
      inner: Arc::new(Inner {
        state: Mutex::new(State {
          queue: VecDeque::new(),
          current: None,
          closed: false,
          aborted: None,
        }),
        readable: Condvar::new(),
        notify: Notify::new(),
        write_gate: Mutex::new(WriteSide { hook, hook_fired: false }),
        read_gate: Mutex::new(()),
      }),
    }
  }

  // --- Write path ---

  /// Writes `buf` into the channel.
  ///
  /// Blocks only while another writer holds the write gate. Bytes are copied
  /// into a fresh immutable chunk (the caller may reuse its buffer freely)
  /// and delivered to the reader in the exact order writes were serialized.
  /// A zero-length write still fires the first-write hook but enqueues
  /// nothing.
  ///
  /// Fails with `Aborted` after [`abort`](Self::abort) and with `Disposed`
  /// after [`close`](Self::close).
  pub fn write(&self, buf: &[u8]) -> LoopbackResult<()> {
    let mut side = self.inner.write_gate.lock();
    if !side.hook_fired {
      side.hook_fired = true;
      if let Some(hook) = side.hook.take() {
        hook();
      }
    }

    {
      let mut st = self.inner.state.lock();
      if let Some(reason) = &st.aborted {
        return Err(LoopbackError::Aborted { reason: reason.clone() });
      }
      if st.closed {
        return Err(LoopbackError::channel_disposed());
      }
      if !buf.is_empty() {
        st.queue.push_back(Bytes::copy_from_slice(buf));
      }
    }
    drop(side);

    // The state lock is released before signaling, and both primitives
    // resume the reader on its own thread/task. A reader's continuation
    // therefore never runs inline inside the writer's critical section.
    self.wake_readers();
    Ok(())
  }

  /// Asynchronous variant of [`write`](Self::write).
  ///
  /// Identical behavior, except that a token already canceled at call time
  /// reports the canceled outcome immediately, without mutating channel
  /// state. Writes never suspend (the queue is unbounded).
  pub async fn write_async(&self, buf: &[u8], token: &CancellationToken) -> LoopbackResult<()> {
    if token.is_cancelled() {
      return Err(LoopbackError::canceled());
    }
    self.write(buf)
  }

  // --- Read path ---

  /// Reads up to `buf.len()` bytes, blocking the calling thread while the
  /// channel is open and empty.
  ///
  /// Returns as many bytes as are currently buffered without blocking
  /// further once at least one byte has been copied; a read only blocks when
  /// it would otherwise return zero. Returns `Ok(0)` at graceful
  /// end-of-stream (all buffered data drained after `close`) or when `buf`
  /// is empty. Fails with the stored abort cause once aborted, without
  /// draining buffered data first.
  pub fn read(&self, buf: &mut [u8]) -> LoopbackResult<usize> {
    if buf.is_empty() {
      return Ok(0);
    }
    let _gate = self.inner.read_gate.lock();
    let mut st = self.inner.state.lock();
    loop {
      if let Some(reason) = &st.aborted {
        return Err(LoopbackError::Aborted { reason: reason.clone() });
      }
      let copied = Self::drain_into(&mut st, buf);
      if copied > 0 {
        return Ok(copied);
      }
      if st.closed {
        return Ok(0);
      }
      // Releases the state lock while parked; reacquired on wakeup.
      self.inner.readable.wait(&mut st);
    }
  }

  /// Cancellation-aware asynchronous variant of [`read`](Self::read).
  ///
  /// Suspends (rather than blocking a thread) while the channel is open and
  /// empty. Cancellation does not merely unblock this call: it aborts the
  /// whole channel, terminally, for all current and future operations. A
  /// token already canceled at entry aborts as well.
  pub async fn read_async(&self, buf: &mut [u8], token: &CancellationToken) -> LoopbackResult<usize> {
    if buf.is_empty() {
      return Ok(0);
    }
    if token.is_cancelled() {
      self.abort_with(CANCELED_REASON);
      return Err(LoopbackError::canceled());
    }
    loop {
      // Register interest before inspecting state so a write landing
      // between the check and the await is not missed.
      let notified = self.inner.notify.notified();
      tokio::pin!(notified);
      notified.as_mut().enable();

      {
        let _gate = self.inner.read_gate.lock();
        let mut st = self.inner.state.lock();
        if let Some(reason) = &st.aborted {
          return Err(LoopbackError::Aborted { reason: reason.clone() });
        }
        let copied = Self::drain_into(&mut st, buf);
        if copied > 0 {
          return Ok(copied);
        }
        if st.closed {
          return Ok(0);
        }
        // Guards drop here; never held across the await below.
      }

      tokio::select! {
        _ = notified.as_mut() => {}
        _ = token.cancelled() => {
          self.abort_with(CANCELED_REASON);
          return Err(LoopbackError::canceled());
        }
      }
    }
  }

  /// Copies buffered bytes into `buf`, advancing the partial-chunk cursor
  /// and popping finished chunks, until `buf` is full or the buffer is
  /// empty. Never blocks.
  fn drain_into(st: &mut State, buf: &mut [u8]) -> usize {
    let mut copied = 0;
    while copied < buf.len() {
      if st.current.as_ref().map_or(true, |c| c.is_empty()) {
        match st.queue.pop_front() {
          Some(next) => st.current = Some(next),
          None => break,
        }
      }
      let Some(chunk) = st.current.as_mut() else { break };
      let n = chunk.len().min(buf.len() - copied);
      buf[copied..copied + n].copy_from_slice(&chunk[..n]);
      chunk.advance(n);
      copied += n;
    }
    copied
  }

  // --- Lifecycle ---

  /// Gracefully closes the channel: no further writes are accepted, buffered
  /// data remains readable, and a blocked reader wakes to observe
  /// end-of-stream once the buffer drains. Idempotent.
  pub fn close(&self) {
    {
      let mut st = self.inner.state.lock();
      if st.closed {
        return;
      }
      st.closed = true;
    }
    event!(Level::DEBUG, "Channel closed gracefully.");
    self.wake_readers();
  }

  /// Aborts the channel with a default cause. See [`abort_with`](Self::abort_with).
  pub fn abort(&self) {
    self.abort_with(DEFAULT_ABORT_REASON);
  }

  /// Terminally aborts the channel, recording `reason` as the cause.
  ///
  /// Idempotent; the first cause wins. All current and future reads fail
  /// with the cause, even while data remains buffered, and a reader blocked
  /// at the moment of abort wakes and fails. Subsequent writes fail too.
  /// A channel closed gracefully and later aborted reports the abort.
  pub fn abort_with(&self, reason: impl Into<String>) {
    {
      let mut st = self.inner.state.lock();
      if st.aborted.is_some() {
        return;
      }
      let reason = reason.into();
      event!(Level::DEBUG, cause = %reason, "Channel aborted.");
      st.aborted = Some(reason);
      st.closed = true;
    }
    self.wake_readers();
  }

  fn wake_readers(&self) {
    self.inner.readable.notify_all();
    self.inner.notify.notify_waiters();
  }

  // --- Introspection ---

  /// Bytes currently buffered and unread.
  pub fn buffered(&self) -> usize {
    let st = self.inner.state.lock();
    let partial = st.current.as_ref().map_or(0, |c| c.len());
    partial + st.queue.iter().map(Bytes::len).sum::<usize>()
  }

  pub fn is_closed(&self) -> bool {
    self.inner.state.lock().closed
  }

  pub fn is_aborted(&self) -> bool {
    self.inner.state.lock().aborted.is_some()
  }

  /// Whether the first-write hook has fired (or would no longer fire).
  pub fn first_write_done(&self) -> bool {
    self.inner.write_gate.lock().hook_fired
  }
}

impl Clone for BufferedDuplex {
  fn clone(&self) -> Self {
    BufferedDuplex {
      inner: Arc::clone(&self.inner),
    }
  }
}

impl Default for BufferedDuplex {
  fn default() -> Self {
    Self::new()
  }
}

impl std::fmt::Debug for BufferedDuplex {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("BufferedDuplex")
      .field("buffered", &self.buffered())
      .field("closed", &self.is_closed())
      .field("aborted", &self.is_aborted())
      .finish()
  }
}

fn to_io_error(err: LoopbackError) -> std::io::Error {
  let kind = match &err {
    LoopbackError::Aborted { .. } => std::io::ErrorKind::ConnectionAborted,
    LoopbackError::Disposed { .. } => std::io::ErrorKind::NotConnected,
    _ => std::io::ErrorKind::Other,
  };
  std::io::Error::new(kind, err)
}

// Socket-shaped adapters so code written against std streaming I/O can
// consume the channel unchanged. Graceful EOF surfaces as the conventional
// `Ok(0)`.
impl std::io::Read for BufferedDuplex {
  fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
    BufferedDuplex::read(self, buf).map_err(to_io_error)
  }
}

impl std::io::Write for BufferedDuplex {
  fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
    BufferedDuplex::write(self, buf).map_err(to_io_error)?;
    Ok(buf.len())
  }

  fn flush(&mut self) -> std::io::Result<()> {
    Ok(())
  }
}
