//! Redis client plumbing for the bitmap store
//!
//! ```text
//! Redis Schema:
//! <ns>:<name>:<year>-<month>               → bitmap, month bucket
//! <ns>:<name>:W<isoYear>-<isoWeek>         → bitmap, ISO week bucket
//! <ns>:<name>:<year>-<month>-<day>         → bitmap, day bucket
//! <ns>:<name>:<year>-<month>-<day>-<hour>  → bitmap, hour bucket
//! <ns>_bitop_<OP>_<key>-<key>-...          → bitmap, BITOP result
//! ```
//!
//! Bit offsets are entity ids. Buckets are written with SETBIT inside
//! MULTI/EXEC; composites are written by a single BITOP.

pub mod connection;
pub mod util;

pub use connection::{PoolMetricsSnapshot, PooledConnection, RedisConfig, RedisPool};
pub use util::ConnectionTarget;
