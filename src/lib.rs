//! Tracklist - presence tracking on Redis bitmaps
//!
//! This library records which entities were active under a metric name and
//! answers set questions about them:
//! - One SETBIT per calendar bucket (month, ISO week, day, hour), applied atomically
//! - Bitmap handles for counting, membership tests and deletion
//! - AND/OR/XOR/NOT composition whose results are themselves bitmaps
//! - Cohort retention reports built from bucket intersections
//! - A bounded, lazily dialing Redis connection pool injected into every handle

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod bitmap;
pub mod bitop;
pub mod error;
pub mod keys;
pub mod retention;
pub mod tracker;
pub mod types;

/// Configuration management with TOML support
pub mod config;

/// HTTP routes for recording presence and reading retention
pub mod http;

/// Redis connection pooling and connection-string handling
pub mod redis;

// Re-export main types
pub use bitmap::Bitmap;
pub use config::ApplicationConfig;
pub use error::{Error, Result};
pub use keys::{BucketKeys, Keyspace};
pub use crate::redis::{RedisConfig, RedisPool};
pub use retention::{RetentionQuery, RetentionReport};
pub use tracker::Tracker;
pub use types::{BitOperator, EntityId, Granularity};
