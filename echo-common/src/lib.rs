//! # Echo Common Library
//!
//! Shared code for the echo voice playback services including:
//! - Error types
//! - Configuration loading and data folder resolution
//! - Database initialization (cache index, key/value cache, guild settings)
//! - Versioned cache key derivation
//! - Timestamp utilities

pub mod config;
pub mod db;
pub mod error;
pub mod keys;
pub mod time;

pub use error::{Error, Result};
