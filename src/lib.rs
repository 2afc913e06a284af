//! Offline cache engine for the AMEC hymnal viewer.
//!
//! Requests from the viewer pass through a [`cache::FetchOrchestrator`], which
//! picks a strategy per request and answers from the cache store, the network,
//! or a synthetic offline response. [`lifecycle::Registration`] installs and
//! activates versioned caches and retires superseded ones.

pub mod cache;
pub mod config;
pub mod lifecycle;
pub mod network;
pub mod request;
pub mod response;

#[cfg(test)]
mod testing;

pub use config::Config;
pub use request::{Destination, Request};
pub use response::{OfflineNotice, Response};
