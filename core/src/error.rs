// loopback/src/error.rs
use anyhow::Error as AnyhowError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LoopbackError {
  #[error("Invalid argument: {message}")]
  InvalidArgument { message: String },

  #[error("{resource} has been disposed")]
  Disposed { resource: &'static str },

  #[error("Channel aborted: {reason}")]
  Aborted { reason: String },

  #[error("Pipeline entry point failed. Source: {source}")]
  Pipeline {
    #[source]
    source: AnyhowError,
  },

  #[error("Internal loopback error: {0}")]
  Internal(String),
}

impl LoopbackError {
  /// A disposed-host error. Stable across calls so callers can match on it.
  pub(crate) fn host_disposed() -> Self {
    LoopbackError::Disposed { resource: "PipelineHost" }
  }

  /// A disposed-channel error (graceful close observed by a writer).
  pub(crate) fn channel_disposed() -> Self {
    LoopbackError::Disposed { resource: "BufferedDuplex" }
  }

  /// The shared "already canceled" outcome for async channel operations.
  /// Built from one static reason so the pre-canceled fast path does not
  /// re-derive its cause per call.
  pub(crate) fn canceled() -> Self {
    LoopbackError::Aborted {
      reason: crate::channel::CANCELED_REASON.to_string(),
    }
  }

  /// True when this error is any flavor of abort/cancellation.
  pub fn is_aborted(&self) -> bool {
    matches!(self, LoopbackError::Aborted { .. })
  }

  /// True when this error reports a disposed host or channel.
  pub fn is_disposed(&self) -> bool {
    matches!(self, LoopbackError::Disposed { .. })
  }
}

// This is the key conversion loopback provides for external errors: anything
// raised by a pipeline's own entry point surfaces as a Pipeline failure with
// the original error preserved as the source, never swallowed.
impl From<AnyhowError> for LoopbackError {
  fn from(err: AnyhowError) -> Self {
    LoopbackError::Pipeline { source: err }
  }
}

pub type LoopbackResult<T, E = LoopbackError> = std::result::Result<T, E>;
