//! Test doubles shared by the unit tests.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};

use crate::cache::{CacheStore, CachedEntry, Namespace, SqliteStore};
use crate::config::CacheConfig;
use crate::network::{Fetcher, NetworkError};
use crate::request::Request;
use crate::response::Response;

/// Fetcher answering from a per-URL script and counting calls.
/// Unscripted URLs fail with a connection error.
#[derive(Default)]
pub struct ScriptedFetcher {
  routes: Mutex<HashMap<String, Result<Response, NetworkError>>>,
  calls: Mutex<HashMap<String, usize>>,
  total: AtomicUsize,
}

impl ScriptedFetcher {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn respond(&self, url: &str, response: Response) {
    self
      .routes
      .lock()
      .unwrap()
      .insert(url.to_string(), Ok(response));
  }

  pub fn fail(&self, url: &str) {
    self.routes.lock().unwrap().insert(
      url.to_string(),
      Err(NetworkError::Connect {
        url: url.to_string(),
        reason: "connection refused".to_string(),
      }),
    );
  }

  pub fn calls(&self, url: &str) -> usize {
    self.calls.lock().unwrap().get(url).copied().unwrap_or(0)
  }

  pub fn total_calls(&self) -> usize {
    self.total.load(Ordering::SeqCst)
  }
}

#[async_trait]
impl Fetcher for ScriptedFetcher {
  async fn fetch(&self, request: &Request) -> Result<Response, NetworkError> {
    let key = request.cache_key();
    self.total.fetch_add(1, Ordering::SeqCst);
    *self.calls.lock().unwrap().entry(key.clone()).or_default() += 1;

    self
      .routes
      .lock()
      .unwrap()
      .get(&key)
      .cloned()
      .unwrap_or_else(|| {
        Err(NetworkError::Connect {
          url: key,
          reason: "no route".to_string(),
        })
      })
  }
}

pub const ORIGIN: &str = "https://hymnal.example/";

/// Script every manifest asset of `cache` with a 200 response.
pub fn serve_manifest(fetcher: &ScriptedFetcher, cache: &CacheConfig) {
  let origin = url::Url::parse(ORIGIN).unwrap();
  for path in cache.static_assets.iter().chain(cache.data_assets.iter()) {
    let req = Request::resolve(&origin, path).unwrap();
    fetcher.respond(
      &req.cache_key(),
      Response::new(200, format!("{}@{}", path, cache.version)),
    );
  }
}

/// Store whose every operation fails, as a corrupted or over-quota store would.
pub struct FailingStore;

impl CacheStore for FailingStore {
  fn open(&self, _name: &str) -> Result<Namespace> {
    Err(eyre!("store unavailable"))
  }

  fn match_entry(&self, _namespace: &Namespace, _key: &str) -> Result<Option<CachedEntry>> {
    Err(eyre!("store corrupted"))
  }

  fn put(&self, _namespace: &Namespace, _key: &str, _response: &Response) -> Result<()> {
    Err(eyre!("quota exceeded"))
  }

  fn put_all(&self, _namespace: &Namespace, _entries: &[(String, Response)]) -> Result<()> {
    Err(eyre!("quota exceeded"))
  }

  fn delete(&self, _name: &str) -> Result<bool> {
    Err(eyre!("store unavailable"))
  }

  fn namespaces(&self) -> Result<BTreeSet<String>> {
    Err(eyre!("store unavailable"))
  }

  fn keys(&self, _namespace: &Namespace) -> Result<Vec<String>> {
    Err(eyre!("store unavailable"))
  }
}

/// SQLite store whose bulk writes fail for namespaces containing `fail_marker`.
pub struct BulkWriteFails {
  pub inner: SqliteStore,
  pub fail_marker: &'static str,
}

impl CacheStore for BulkWriteFails {
  fn open(&self, name: &str) -> Result<Namespace> {
    self.inner.open(name)
  }

  fn match_entry(&self, namespace: &Namespace, key: &str) -> Result<Option<CachedEntry>> {
    self.inner.match_entry(namespace, key)
  }

  fn put(&self, namespace: &Namespace, key: &str, response: &Response) -> Result<()> {
    self.inner.put(namespace, key, response)
  }

  fn put_all(&self, namespace: &Namespace, entries: &[(String, Response)]) -> Result<()> {
    if namespace.name().contains(self.fail_marker) {
      return Err(eyre!("disk full writing {}", namespace.name()));
    }
    self.inner.put_all(namespace, entries)
  }

  fn delete(&self, name: &str) -> Result<bool> {
    self.inner.delete(name)
  }

  fn namespaces(&self) -> Result<BTreeSet<String>> {
    self.inner.namespaces()
  }

  fn keys(&self, namespace: &Namespace) -> Result<Vec<String>> {
    self.inner.keys(namespace)
  }
}
