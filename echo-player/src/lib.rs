//! echo-player
//!
//! Per-guild audio playback engine for group voice chat, backed by a
//! size-bounded, hash-addressed file cache.
//!
//! **Modules:**
//! - [`cache`]: content cache with atomic commit and LRU eviction
//! - [`transcode`]: external transcoder pipeline
//! - [`playback`]: queue state machine and playback engine
//! - [`voice`]: voice session adapter contract
//! - [`enqueue`]: query → queue service
//! - [`manager`]: guild → player registry

pub mod cache;
pub mod config;
pub mod enqueue;
pub mod error;
pub mod kv_cache;
pub mod manager;
pub mod playback;
pub mod provider;
pub mod segments;
pub mod settings;
pub mod transcode;
pub mod voice;

pub use error::{Error, Result};
