//! Captured responses and the synthetic offline response.

use serde::{Deserialize, Serialize};

/// Error code carried by the synthetic offline response.
pub const OFFLINE_ERROR: &str = "Offline";

const OFFLINE_MESSAGE: &str =
  "Hymnal data is not available offline. Please check your internet connection.";

/// A fully buffered HTTP response.
///
/// The body is owned bytes, so handing one copy to the caller and another to
/// the cache store is an explicit `clone()`; neither consumer can drain the other.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
  pub status: u16,
  pub status_text: String,
  pub headers: Vec<(String, String)>,
  pub body: Vec<u8>,
}

impl Response {
  pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
    Self {
      status,
      status_text: String::new(),
      headers: Vec::new(),
      body: body.into(),
    }
  }

  pub fn with_header(mut self, name: &str, value: &str) -> Self {
    self.headers.push((name.to_string(), value.to_string()));
    self
  }

  pub fn with_status_text(mut self, text: &str) -> Self {
    self.status_text = text.to_string();
    self
  }

  /// 2xx
  pub fn is_success(&self) -> bool {
    (200..300).contains(&self.status)
  }

  pub fn header(&self, name: &str) -> Option<&str> {
    self
      .headers
      .iter()
      .find(|(n, _)| n.eq_ignore_ascii_case(name))
      .map(|(_, v)| v.as_str())
  }

  /// Stand-in returned for a data document when neither cache nor network can serve it.
  pub fn offline() -> Self {
    let body = serde_json::json!({
      "error": OFFLINE_ERROR,
      "message": OFFLINE_MESSAGE,
    });

    Response::new(503, body.to_string())
      .with_status_text("Service Unavailable")
      .with_header("Content-Type", "application/json")
  }

  /// Recognise a synthetic offline response so the page can show a tailored notice.
  pub fn offline_notice(&self) -> Option<OfflineNotice> {
    if self.status != 503 {
      return None;
    }
    serde_json::from_slice(&self.body).ok()
  }
}

/// Body of the synthetic offline response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfflineNotice {
  pub error: String,
  pub message: String,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_offline_response_shape() {
    let response = Response::offline();
    assert_eq!(response.status, 503);
    assert_eq!(response.header("content-type"), Some("application/json"));

    let body: serde_json::Value = serde_json::from_slice(&response.body).unwrap();
    assert_eq!(body["error"], "Offline");
    assert!(body["message"].as_str().unwrap().contains("offline"));
  }

  #[test]
  fn test_offline_notice_roundtrip() {
    let notice = Response::offline().offline_notice().unwrap();
    assert_eq!(notice.error, OFFLINE_ERROR);
  }

  #[test]
  fn test_plain_503_is_not_offline_notice() {
    let response = Response::new(503, "upstream down");
    assert!(response.offline_notice().is_none());
    assert!(Response::new(200, r#"{"error":"x","message":"y"}"#)
      .offline_notice()
      .is_none());
  }

  #[test]
  fn test_success_range() {
    assert!(Response::new(200, "").is_success());
    assert!(Response::new(204, "").is_success());
    assert!(!Response::new(304, "").is_success());
    assert!(!Response::new(500, "").is_success());
  }
}
