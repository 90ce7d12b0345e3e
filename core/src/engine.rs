// loopback/src/engine.rs

//! The startup seam between the host and an external pipeline engine.
//!
//! The core never executes middleware itself: it hands an [`AppBuilder`] to
//! the caller's configuration callback, asks a [`PipelineEngine`] to start
//! the configured pipeline, and captures the entry point and teardown handle
//! the engine returns. [`DirectEngine`] is the minimal engine shipped with
//! the crate: it composes the registered middleware in order around a
//! terminal handler.

use crate::env::Environment;
use crate::error::{LoopbackError, LoopbackResult};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tracing::{event, Level};

/// The future produced by one pipeline invocation.
pub type AppFuture = Pin<Box<dyn Future<Output = Result<(), anyhow::Error>> + Send>>;

/// A started pipeline's entry point: processes one environment and completes
/// asynchronously. Failures are the handler's own errors, forwarded to the
/// host's caller unchanged.
pub type AppFn = Arc<dyn Fn(Environment) -> AppFuture + Send + Sync>;

/// A middleware component: wraps the downstream entry point and returns the
/// wrapped one.
pub type Middleware = Box<dyn FnOnce(AppFn) -> AppFn + Send>;

/// Handle releasing whatever the engine allocated at startup. Invoked exactly
/// once, on host disposal.
pub type Teardown = Box<dyn FnOnce() + Send>;

/// Collects a pipeline's middleware chain during the configuration callback.
///
/// Opaque to the host beyond being handed to the callback once; engines
/// consume it to produce a running pipeline.
pub struct AppBuilder {
  middleware: Vec<Middleware>,
  terminal: Option<AppFn>,
}

impl AppBuilder {
  pub(crate) fn new() -> Self {
    AppBuilder {
      middleware: Vec::new(),
      terminal: None,
    }
  }

  /// Registers a middleware component. Components wrap the chain in
  /// registration order: the first registered runs outermost.
  pub fn wrap(&mut self, mw: impl FnOnce(AppFn) -> AppFn + Send + 'static) -> &mut Self {
    self.middleware.push(Box::new(mw));
    self
  }

  /// Sets the terminal handler at the end of the chain.
  pub fn run<F, Fut>(&mut self, handler: F) -> &mut Self
  where
    F: Fn(Environment) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), anyhow::Error>> + Send + 'static,
  {
    self.terminal = Some(Arc::new(move |env: Environment| -> AppFuture { Box::pin(handler(env)) }));
    self
  }

  /// True when the configuration callback registered nothing at all.
  pub fn is_empty(&self) -> bool {
    self.middleware.is_empty() && self.terminal.is_none()
  }

  pub(crate) fn middleware_count(&self) -> usize {
    self.middleware.len()
  }

  /// Folds the registered components into a single entry point.
  ///
  /// An entirely empty configuration is an `InvalidArgument` error; a chain
  /// without an explicit terminal falls back to one that stamps status 404
  /// when no middleware set a status.
  pub(crate) fn build(self) -> LoopbackResult<AppFn> {
    if self.is_empty() {
      return Err(LoopbackError::InvalidArgument {
        message: "pipeline configuration registered no middleware or terminal handler".to_string(),
      });
    }
    let mut app = self.terminal.unwrap_or_else(default_terminal);
    for mw in self.middleware.into_iter().rev() {
      app = mw(app);
    }
    Ok(app)
  }
}

fn default_terminal() -> AppFn {
  Arc::new(|env: Environment| -> AppFuture {
    Box::pin(async move {
      if env.response_status().is_none() {
        env.set_response_status(404);
      }
      Ok(())
    })
  })
}

/// A running pipeline instance as reported by an engine.
pub struct StartedPipeline {
  pub entry: AppFn,
  pub teardown: Teardown,
}

/// External collaborator that turns a configured [`AppBuilder`] into a
/// running pipeline. Startup is synchronous; a startup failure propagates to
/// the host's creator unchanged and is never retried.
pub trait PipelineEngine: Send + Sync {
  fn start(&self, builder: AppBuilder) -> LoopbackResult<StartedPipeline>;
}

/// In-process engine composing the registered middleware directly, with a
/// no-op teardown. Suitable for tests and embedders that need no external
/// runtime.
pub struct DirectEngine;

impl PipelineEngine for DirectEngine {
  fn start(&self, builder: AppBuilder) -> LoopbackResult<StartedPipeline> {
    let count = builder.middleware_count();
    let entry = builder.build()?;
    event!(Level::DEBUG, middleware = count, "DirectEngine composed pipeline.");
    Ok(StartedPipeline {
      entry,
      teardown: Box::new(|| {
        event!(Level::TRACE, "DirectEngine pipeline torn down.");
      }),
    })
  }
}
