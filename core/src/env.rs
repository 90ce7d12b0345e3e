// loopback/src/env.rs

//! The request/response `Environment`: a shared, interior-mutable mapping of
//! protocol-level string keys to values, mutated in place as it flows through
//! a pipeline. The core reads and writes a conventional subset (response
//! status, response headers) and treats everything else opaquely.

use crate::channel::BufferedDuplex;
use bytes::Bytes;
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::collections::HashMap;
use std::sync::Arc;

/// Well-known environment keys. Callers are free to add their own keys; only
/// the `response_*` subset is touched by the host itself.
pub mod keys {
  pub const REQUEST_METHOD: &str = "loopback.request_method";
  pub const REQUEST_PATH: &str = "loopback.request_path";
  pub const REQUEST_HEADERS: &str = "loopback.request_headers";
  pub const REQUEST_BODY: &str = "loopback.request_body";

  pub const RESPONSE_STATUS: &str = "loopback.response_status";
  pub const RESPONSE_HEADERS: &str = "loopback.response_headers";
  pub const RESPONSE_BODY: &str = "loopback.response_body";
}

/// A value stored in the environment.
#[derive(Debug, Clone)]
pub enum EnvValue {
  Str(String),
  Int(i64),
  Bool(bool),
  /// Immutable byte payload (e.g. a fully-buffered request body).
  Bytes(Bytes),
  /// A header collection (request or response side).
  Headers(HeaderMap),
  /// A duplex channel handle, conventionally the response body stream.
  Stream(BufferedDuplex),
}

impl EnvValue {
  pub fn as_str(&self) -> Option<&str> {
    match self {
      EnvValue::Str(s) => Some(s),
      _ => None,
    }
  }

  pub fn as_int(&self) -> Option<i64> {
    match self {
      EnvValue::Int(i) => Some(*i),
      _ => None,
    }
  }

  pub fn as_stream(&self) -> Option<&BufferedDuplex> {
    match self {
      EnvValue::Stream(c) => Some(c),
      _ => None,
    }
  }
}

/// A case-insensitive, multi-valued header collection, mirroring the
/// `name -> [values]` dictionary convention of HTTP pipelines. Insertion
/// order of distinct names is preserved.
#[derive(Debug, Clone, Default)]
pub struct HeaderMap {
  entries: Vec<(String, Vec<String>)>,
}

impl HeaderMap {
  pub fn new() -> Self {
    Self::default()
  }

  fn position(&self, name: &str) -> Option<usize> {
    self.entries.iter().position(|(n, _)| n.eq_ignore_ascii_case(name))
  }

  /// Replaces all values for `name` with a single value.
  pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
    let name = name.into();
    let value = value.into();
    match self.position(&name) {
      Some(idx) => self.entries[idx].1 = vec![value],
      None => self.entries.push((name, vec![value])),
    }
  }

  /// Appends a value for `name`, preserving any existing ones.
  pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
    let name = name.into();
    let value = value.into();
    match self.position(&name) {
      Some(idx) => self.entries[idx].1.push(value),
      None => self.entries.push((name, vec![value])),
    }
  }

  /// First value for `name`, if any.
  pub fn get(&self, name: &str) -> Option<&str> {
    self
      .position(name)
      .and_then(|idx| self.entries[idx].1.first())
      .map(String::as_str)
  }

  /// All values for `name` (empty slice when absent).
  pub fn get_all(&self, name: &str) -> &[String] {
    match self.position(name) {
      Some(idx) => &self.entries[idx].1,
      None => &[],
    }
  }

  pub fn contains(&self, name: &str) -> bool {
    self.position(name).is_some()
  }

  pub fn remove(&mut self, name: &str) -> Option<Vec<String>> {
    self.position(name).map(|idx| self.entries.remove(idx).1)
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
    self.entries.iter().map(|(n, v)| (n.as_str(), v.as_slice()))
  }
}

/// The shared environment for one request/response exchange.
///
/// Clones share the same underlying map, so a host, a pipeline handler, and
/// test code all observe each other's mutations. Guards obtained from this
/// type are blocking and MUST NOT be held across `.await` suspension points.
#[derive(Debug, Default)]
pub struct Environment(Arc<RwLock<HashMap<String, EnvValue>>>);

impl Environment {
  pub fn new() -> Self {
    Environment(Arc::new(RwLock::new(HashMap::new())))
  }

  /// Acquires a read lock over the raw map.
  /// The returned guard MUST be dropped before any `.await` point.
  pub fn read(&self) -> RwLockReadGuard<'_, HashMap<String, EnvValue>> {
    self.0.read()
  }

  /// Acquires a write lock over the raw map.
  /// The returned guard MUST be dropped before any `.await` point.
  pub fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, EnvValue>> {
    self.0.write()
  }

  pub fn insert(&self, key: impl Into<String>, value: EnvValue) {
    self.0.write().insert(key.into(), value);
  }

  /// Cloned value for `key`, if present.
  pub fn get(&self, key: &str) -> Option<EnvValue> {
    self.0.read().get(key).cloned()
  }

  pub fn contains_key(&self, key: &str) -> bool {
    self.0.read().contains_key(key)
  }

  // --- Conventional response subset ---

  pub fn response_status(&self) -> Option<i64> {
    self.get(keys::RESPONSE_STATUS).and_then(|v| v.as_int())
  }

  pub fn set_response_status(&self, status: i64) {
    self.insert(keys::RESPONSE_STATUS, EnvValue::Int(status));
  }

  /// Cloned snapshot of the response headers (empty map when unset).
  pub fn response_headers(&self) -> HeaderMap {
    match self.get(keys::RESPONSE_HEADERS) {
      Some(EnvValue::Headers(h)) => h,
      _ => HeaderMap::new(),
    }
  }

  /// Mutates the response header collection in place, creating it on demand.
  pub fn with_response_headers<R>(&self, f: impl FnOnce(&mut HeaderMap) -> R) -> R {
    let mut guard = self.0.write();
    let entry = guard
      .entry(keys::RESPONSE_HEADERS.to_string())
      .or_insert_with(|| EnvValue::Headers(HeaderMap::new()));
    match entry {
      EnvValue::Headers(h) => f(h),
      other => {
        // A non-header value under the headers key is a caller bug; replace
        // it with a fresh collection rather than panicking mid-pipeline.
        *other = EnvValue::Headers(HeaderMap::new());
        match other {
          EnvValue::Headers(h) => f(h),
          _ => unreachable!(),
        }
      }
    }
  }

  /// The response body stream, if one has been attached.
  pub fn response_body(&self) -> Option<BufferedDuplex> {
    match self.get(keys::RESPONSE_BODY) {
      Some(EnvValue::Stream(c)) => Some(c),
      _ => None,
    }
  }

  pub fn set_response_body(&self, channel: BufferedDuplex) {
    self.insert(keys::RESPONSE_BODY, EnvValue::Stream(channel));
  }
}

impl Clone for Environment {
  fn clone(&self) -> Self {
    Environment(Arc::clone(&self.0))
  }
}
