// loopback/src/host.rs

//! The `PipelineHost`: owns the lifecycle of one running pipeline instance
//! and invokes it per request, stamping baseline response metadata before
//! each invocation.

use crate::engine::{AppBuilder, AppFn, DirectEngine, PipelineEngine, Teardown};
use crate::env::Environment;
use crate::error::{LoopbackError, LoopbackResult};
use chrono::Utc;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{event, instrument, Level};

/// The fixed identifier stamped into the `Server` response header.
pub const SERVER_IDENTIFIER: &str = "loopback/0.1";

/// Hosts one started pipeline instance.
///
/// Created from a configuration callback, a host stays in the running state
/// serving arbitrarily many invocations until disposed. Disposal releases the
/// pipeline's teardown handle exactly once and rejects further invocations;
/// the disposed flag is the host's only shared mutable cell and needs nothing
/// stronger than atomic visibility.
pub struct PipelineHost {
  entry: AppFn,
  teardown: Mutex<Option<Teardown>>,
  disposed: AtomicBool,
}

impl PipelineHost {
  /// Creates a host using the in-process [`DirectEngine`].
  ///
  /// `configure` wires the pipeline's middleware chain; a callback that
  /// registers nothing fails with `InvalidArgument`. Startup happens
  /// synchronously inside this call, and a startup failure propagates
  /// unchanged (no retry).
  pub fn create(configure: impl FnOnce(&mut AppBuilder)) -> LoopbackResult<Self> {
    Self::create_with_engine(&DirectEngine, configure)
  }

  /// Creates a host whose startup is delegated to an external engine.
  pub fn create_with_engine(
    engine: &dyn PipelineEngine,
    configure: impl FnOnce(&mut AppBuilder),
  ) -> LoopbackResult<Self> {
    let mut builder = AppBuilder::new();
    configure(&mut builder);
    if builder.is_empty() {
      event!(Level::ERROR, "Configuration callback registered nothing.");
      return Err(LoopbackError::InvalidArgument {
        message: "pipeline configuration registered no middleware or terminal handler".to_string(),
      });
    }

    let started = engine.start(builder)?;
    event!(Level::DEBUG, "Pipeline started; host is running.");
    Ok(PipelineHost {
      entry: started.entry,
      teardown: Mutex::new(Some(started.teardown)),
      disposed: AtomicBool::new(false),
    })
  }

  /// Invokes the pipeline with one request environment, returning when the
  /// pipeline completes.
  ///
  /// Before delegating, stamps baseline response metadata onto the
  /// environment's response headers, in order, unconditionally: appends
  /// `Server`, sets `Date` (RFC1123), appends two cache-disabling
  /// `Cache-Control` directives, sets `Pragma: no-cache`. The environment is
  /// then forwarded unchanged; a failure raised by the pipeline's own entry
  /// point surfaces as `Pipeline { source }` with the original error intact.
  /// Translating such failures into a response status is an external
  /// middleware's job, not the host's.
  ///
  /// Fails with `Disposed` once the host has been disposed.
  #[instrument(name = "PipelineHost::invoke", skip_all, err(Display))]
  pub async fn invoke(&self, env: &Environment) -> LoopbackResult<()> {
    if self.disposed.load(Ordering::SeqCst) {
      return Err(LoopbackError::host_disposed());
    }

    self.stamp_baseline_headers(env);
    event!(Level::TRACE, "Forwarding environment to pipeline entry point.");
    (self.entry)(env.clone())
      .await
      .map_err(|source| LoopbackError::Pipeline { source })
  }

  fn stamp_baseline_headers(&self, env: &Environment) {
    let date = Utc::now().format("%a, %d %b %Y %H:%M:%S GMT").to_string();
    env.with_response_headers(|headers| {
      headers.append("Server", SERVER_IDENTIFIER);
      headers.set("Date", date);
      headers.append("Cache-Control", "no-cache");
      headers.append("Cache-Control", "no-store");
      headers.set("Pragma", "no-cache");
    });
  }

  /// Disposes the host: marks it disposed, then releases the pipeline's
  /// teardown handle. Idempotent; `invoke` fails afterwards.
  pub fn dispose(&self) {
    if self.disposed.swap(true, Ordering::SeqCst) {
      return;
    }
    if let Some(teardown) = self.teardown.lock().take() {
      teardown();
    }
    event!(Level::DEBUG, "Pipeline host disposed.");
  }

  pub fn is_disposed(&self) -> bool {
    self.disposed.load(Ordering::SeqCst)
  }
}

impl Drop for PipelineHost {
  fn drop(&mut self) {
    self.dispose();
  }
}
