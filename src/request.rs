//! Request descriptors for intercepted fetches.

use std::fmt;
use std::str::FromStr;

use url::Url;

use crate::network::NetworkError;

/// What the requester intends to do with the resource.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Destination {
  Style,
  Script,
  Document,
  Image,
  /// Plain fetches (e.g. `fetch()` of a JSON document) carry no destination
  #[default]
  Other,
}

impl Destination {
  /// Destinations that are always served cache-first.
  pub fn is_static(self) -> bool {
    matches!(
      self,
      Destination::Style | Destination::Script | Destination::Document | Destination::Image
    )
  }
}

impl FromStr for Destination {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_lowercase().as_str() {
      "style" => Ok(Destination::Style),
      "script" => Ok(Destination::Script),
      "document" => Ok(Destination::Document),
      "image" => Ok(Destination::Image),
      "" | "other" => Ok(Destination::Other),
      other => Err(format!("unknown destination '{}'", other)),
    }
  }
}

/// A GET request as seen by the cache layer.
///
/// The cache never rewrites the URL; the canonical key is the URL minus its fragment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
  url: Url,
  destination: Destination,
}

impl Request {
  pub fn new(url: Url, destination: Destination) -> Self {
    Self { url, destination }
  }

  /// Parse an absolute URL into a request with no destination.
  pub fn get(url: &str) -> Result<Self, NetworkError> {
    let url = Url::parse(url).map_err(|e| NetworkError::InvalidUrl {
      url: url.to_string(),
      reason: e.to_string(),
    })?;
    Ok(Self::new(url, Destination::Other))
  }

  /// Resolve a manifest-style path (`./index.html`, `/app.js`) against an origin.
  pub fn resolve(origin: &Url, path: &str) -> Result<Self, NetworkError> {
    let url = origin.join(path).map_err(|e| NetworkError::InvalidUrl {
      url: path.to_string(),
      reason: e.to_string(),
    })?;
    Ok(Self::new(url, Destination::Other))
  }

  pub fn with_destination(mut self, destination: Destination) -> Self {
    self.destination = destination;
    self
  }

  pub fn url(&self) -> &Url {
    &self.url
  }

  pub fn scheme(&self) -> &str {
    self.url.scheme()
  }

  pub fn path(&self) -> &str {
    self.url.path()
  }

  pub fn destination(&self) -> Destination {
    self.destination
  }

  /// Only http(s) requests are handled by the cache layer; anything else
  /// (extension schemes, data: URLs) keeps the default behaviour.
  pub fn is_fetchable(&self) -> bool {
    matches!(self.url.scheme(), "http" | "https")
  }

  /// Canonical identity: scheme, host, port, path and query.
  pub fn cache_key(&self) -> String {
    let mut url = self.url.clone();
    url.set_fragment(None);
    url.into()
  }
}

impl fmt::Display for Request {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "GET {}", self.url)
  }
}
