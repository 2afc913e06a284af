//! Offline cache engine.
//!
//! - Stores captured responses in named, versioned namespaces
//! - Classifies each request into a data-first, static-first or network-first strategy
//! - Serves from cache or network, synthesizing an offline response for hymnal data
//! - Writes to the cache in the background, never delaying the response

mod orchestrator;
mod storage;
mod strategy;
mod traits;

pub use orchestrator::{FetchError, FetchOrchestrator, Intercept, Served, Source};
pub use storage::SqliteStore;
pub use strategy::{Role, Strategy, StrategySelector};
pub use traits::{CacheStore, CachedEntry, Namespace};
