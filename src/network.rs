//! Network access seam.

use async_trait::async_trait;
use thiserror::Error;

use crate::request::Request;
use crate::response::Response;

/// Failure to obtain any response from the network.
///
/// A resolved response with a 4xx/5xx status is not a `NetworkError`.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum NetworkError {
  #[error("connection failed for {url}: {reason}")]
  Connect { url: String, reason: String },
  #[error("invalid URL '{url}': {reason}")]
  InvalidUrl { url: String, reason: String },
  #[error("failed to read body of {url}: {reason}")]
  Body { url: String, reason: String },
}

/// Anything that can perform a GET on behalf of the cache layer.
#[async_trait]
pub trait Fetcher: Send + Sync {
  async fn fetch(&self, request: &Request) -> Result<Response, NetworkError>;
}

/// `reqwest`-backed fetcher. No timeout is imposed; a hung request stays pending.
#[derive(Clone, Default)]
pub struct HttpFetcher {
  client: reqwest::Client,
}

impl HttpFetcher {
  pub fn new() -> Self {
    Self::default()
  }
}

#[async_trait]
impl Fetcher for HttpFetcher {
  async fn fetch(&self, request: &Request) -> Result<Response, NetworkError> {
    let url = request.url().as_str().to_string();

    let response = self
      .client
      .get(request.url().clone())
      .send()
      .await
      .map_err(|e| NetworkError::Connect {
        url: url.clone(),
        reason: e.to_string(),
      })?;

    let status = response.status();
    let headers = response
      .headers()
      .iter()
      .filter_map(|(name, value)| {
        value
          .to_str()
          .ok()
          .map(|v| (name.as_str().to_string(), v.to_string()))
      })
      .collect();

    let body = response
      .bytes()
      .await
      .map_err(|e| NetworkError::Body {
        url,
        reason: e.to_string(),
      })?
      .to_vec();

    Ok(Response {
      status: status.as_u16(),
      status_text: status.canonical_reason().unwrap_or_default().to_string(),
      headers,
      body,
    })
  }
}
