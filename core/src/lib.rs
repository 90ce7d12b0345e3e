// src/lib.rs

//! Loopback: an in-process host and buffered duplex channel for exercising
//! async middleware pipelines without binding a network socket.
//!
//! Two pieces, consumed together:
//!  - [`PipelineHost`]: starts a configured pipeline once and invokes it per
//!    request, stamping baseline response metadata on each environment.
//!  - [`BufferedDuplex`]: the synchronized in-memory byte channel the
//!    pipeline writes its response into while a client reads concurrently —
//!    partial reads, blocking/suspending on an empty buffer, a one-shot
//!    first-write hook, terminal abort, graceful end-of-stream.
//!
//! The channel behaves like a socket to code that assumes streaming I/O
//! while running fully in-process; one channel serves exactly one
//! request/response exchange.

pub mod channel;
pub mod engine;
pub mod env;
pub mod error;
pub mod host;

// --- Re-exports for the Public API ---

pub use crate::channel::{BufferedDuplex, FirstWriteHook};
pub use crate::engine::{AppBuilder, AppFn, AppFuture, DirectEngine, PipelineEngine, StartedPipeline, Teardown};
pub use crate::env::{keys, EnvValue, Environment, HeaderMap};
pub use crate::error::{LoopbackError, LoopbackResult};
pub use crate::host::{PipelineHost, SERVER_IDENTIFIER};
