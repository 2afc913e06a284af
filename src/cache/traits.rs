//! Core traits and types for the cache store.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use color_eyre::Result;

use crate::response::Response;

/// Handle to an opened namespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Namespace {
  name: String,
}

impl Namespace {
  pub(crate) fn new(name: &str) -> Self {
    Self {
      name: name.to_string(),
    }
  }

  pub fn name(&self) -> &str {
    &self.name
  }
}

/// A stored response. Entries are replaced wholesale, never edited in place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedEntry {
  /// Canonical request identity
  pub key: String,
  pub response: Response,
  pub cached_at: DateTime<Utc>,
}

/// Named, versioned stores of captured responses.
///
/// There is no size bound or LRU: namespaces are only ever removed whole.
pub trait CacheStore: Send + Sync {
  /// Open a namespace, creating it if it does not exist.
  fn open(&self, name: &str) -> Result<Namespace>;

  /// Look up a request key in one namespace.
  fn match_entry(&self, namespace: &Namespace, key: &str) -> Result<Option<CachedEntry>>;

  /// Store a response, replacing any previous entry. Non-2xx responses are refused.
  fn put(&self, namespace: &Namespace, key: &str, response: &Response) -> Result<()>;

  /// Store several responses atomically: either all are written or none.
  fn put_all(&self, namespace: &Namespace, entries: &[(String, Response)]) -> Result<()>;

  /// Delete a namespace and every entry in it. Returns whether it existed.
  fn delete(&self, name: &str) -> Result<bool>;

  /// Names of every namespace in the store.
  fn namespaces(&self) -> Result<BTreeSet<String>>;

  /// Request keys stored in a namespace, sorted.
  fn keys(&self, namespace: &Namespace) -> Result<Vec<String>>;
}
