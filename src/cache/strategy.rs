//! Request classification.

use crate::config::CacheConfig;
use crate::request::Request;

/// How a request is served.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
  /// Hymnal documents: cache, then network, then a synthetic offline response
  DataFirst,
  /// Shell assets: cache, then network; failures propagate
  StaticFirst,
  /// Everything else: network, then whatever the cache holds
  NetworkFirst,
}

/// Which of a version's namespaces a strategy writes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
  Static,
  Data,
}

impl Strategy {
  pub fn role(self) -> Role {
    match self {
      Strategy::DataFirst => Role::Data,
      Strategy::StaticFirst | Strategy::NetworkFirst => Role::Static,
    }
  }
}

/// Classifies requests against one version's manifests.
#[derive(Debug, Clone)]
pub struct StrategySelector {
  data_markers: Vec<String>,
  static_suffixes: Vec<String>,
}

impl StrategySelector {
  pub fn new(cache: &CacheConfig) -> Self {
    // Data documents are recognised by marker or by their manifest file name
    let data_markers = cache
      .data_markers
      .iter()
      .cloned()
      .chain(cache.data_assets.iter().map(|p| manifest_suffix(p)))
      .filter(|m| !m.is_empty() && m != "/")
      .collect();

    let static_suffixes = cache.static_assets.iter().map(|p| manifest_suffix(p)).collect();

    Self {
      data_markers,
      static_suffixes,
    }
  }

  /// First matching rule wins. Callers must drop non-fetchable schemes beforehand.
  pub fn classify(&self, request: &Request) -> Strategy {
    let path = request.path();

    if self.data_markers.iter().any(|m| path.contains(m.as_str())) {
      return Strategy::DataFirst;
    }

    if self.static_suffixes.iter().any(|s| path.ends_with(s.as_str()))
      || request.destination().is_static()
    {
      return Strategy::StaticFirst;
    }

    Strategy::NetworkFirst
  }
}

/// `./icons/a.svg` -> `/icons/a.svg`, `./` -> `/`
fn manifest_suffix(path: &str) -> String {
  match path.strip_prefix("./") {
    Some(rest) => format!("/{}", rest),
    None if path.starts_with('/') => path.to_string(),
    None => format!("/{}", path),
  }
}
