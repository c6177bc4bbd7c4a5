//! Bucket and composite key derivation
//!
//! Every bitmap lives under a namespace (default `tracklist`):
//!
//! ```text
//! <ns>:<name>:<year>-<month>                    month bucket
//! <ns>:<name>:W<isoYear>-<isoWeek>              ISO week bucket
//! <ns>:<name>:<year>-<month>-<day>              day bucket
//! <ns>:<name>:<year>-<month>-<day>-<hour>       hour bucket
//! <ns>_bitop_<OP>_<key1>-<key2>-...             composite result
//! ```
//!
//! Calendar fields are written without zero padding. The bucket suffix never
//! contains `:`, so the last `:` separates a metric name from its suffix even
//! when the name itself contains `:`. Metric names may not contain `-` (the
//! composite operand separator) or parentheses (which wrap nested composite
//! operands), which keeps every derived key unambiguous.

use crate::error::{Error, Result};
use crate::types::{BitOperator, CalendarCoordinates, Granularity};
use chrono::{DateTime, Utc};

/// Namespace used when none is configured
pub const DEFAULT_NAMESPACE: &str = "tracklist";

/// Metric reported by `GET /retention` when the request names none
pub const DEFAULT_METRIC: &str = "active";

/// Longest metric name accepted
pub const MAX_METRIC_NAME_LEN: usize = 256;

const COMPOSITE_MARKER: &str = "_bitop_";
const FORBIDDEN_NAME_CHARS: &[char] = &['-', '*', '?', '[', ']', '\\', '(', ')'];

/// The four bucket keys a single record call touches
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketKeys {
    /// Month bucket key
    pub month: String,
    /// ISO week bucket key
    pub week: String,
    /// Day bucket key
    pub day: String,
    /// Hour bucket key
    pub hour: String,
}

impl BucketKeys {
    /// Keys in month, week, day, hour order
    pub fn as_array(&self) -> [&str; 4] {
        [&self.month, &self.week, &self.day, &self.hour]
    }

    /// Key for one granularity
    pub fn get(&self, granularity: Granularity) -> &str {
        match granularity {
            Granularity::Month => &self.month,
            Granularity::Week => &self.week,
            Granularity::Day => &self.day,
            Granularity::Hour => &self.hour,
        }
    }
}

/// Derives every key the tracker reads or writes
///
/// Pure and deterministic: the same inputs always give the same key, and two
/// distinct (name, granularity, coordinate) triples never share one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Keyspace {
    namespace: String,
    composite_prefix: String,
}

impl Default for Keyspace {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE.to_string(),
            composite_prefix: format!("{}{}", DEFAULT_NAMESPACE, COMPOSITE_MARKER),
        }
    }
}

impl Keyspace {
    /// Create a keyspace under `namespace`
    ///
    /// The namespace must be non-empty and may only contain characters that
    /// cannot be confused with key delimiters or glob patterns.
    pub fn new(namespace: impl Into<String>) -> Result<Self> {
        let namespace = namespace.into();
        validate_namespace(&namespace)?;
        let composite_prefix = format!("{}{}", namespace, COMPOSITE_MARKER);
        Ok(Self {
            namespace,
            composite_prefix,
        })
    }

    /// The namespace all keys live under
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Month bucket key from explicit calendar fields
    pub fn month(&self, name: &str, year: i32, month: u32) -> Result<String> {
        validate_metric_name(name)?;
        check_range("month", month, 1, 12)?;
        Ok(format!("{}:{}:{}-{}", self.namespace, name, year, month))
    }

    /// ISO week bucket key from an ISO week-year and week number
    pub fn week(&self, name: &str, iso_year: i32, iso_week: u32) -> Result<String> {
        validate_metric_name(name)?;
        check_range("week", iso_week, 1, 53)?;
        Ok(format!("{}:{}:W{}-{}", self.namespace, name, iso_year, iso_week))
    }

    /// Day bucket key from explicit calendar fields
    pub fn day(&self, name: &str, year: i32, month: u32, day: u32) -> Result<String> {
        validate_metric_name(name)?;
        check_range("month", month, 1, 12)?;
        check_range("day", day, 1, 31)?;
        Ok(format!("{}:{}:{}-{}-{}", self.namespace, name, year, month, day))
    }

    /// Hour bucket key from explicit calendar fields
    pub fn hour(&self, name: &str, year: i32, month: u32, day: u32, hour: u32) -> Result<String> {
        validate_metric_name(name)?;
        check_range("month", month, 1, 12)?;
        check_range("day", day, 1, 31)?;
        check_range("hour", hour, 0, 23)?;
        Ok(format!(
            "{}:{}:{}-{}-{}-{}",
            self.namespace, name, year, month, day, hour
        ))
    }

    /// All four bucket keys for `name` at `at`
    pub fn derive(&self, name: &str, at: DateTime<Utc>) -> Result<BucketKeys> {
        let c = CalendarCoordinates::from(at);
        Ok(BucketKeys {
            month: self.month(name, c.year, c.month)?,
            week: self.week(name, c.iso_year, c.iso_week)?,
            day: self.day(name, c.year, c.month, c.day)?,
            hour: self.hour(name, c.year, c.month, c.day, c.hour)?,
        })
    }

    /// Bucket key of one granularity for `name` at `at`
    pub fn bucket(&self, name: &str, granularity: Granularity, at: DateTime<Utc>) -> Result<String> {
        let c = CalendarCoordinates::from(at);
        match granularity {
            Granularity::Month => self.month(name, c.year, c.month),
            Granularity::Week => self.week(name, c.iso_year, c.iso_week),
            Granularity::Day => self.day(name, c.year, c.month, c.day),
            Granularity::Hour => self.hour(name, c.year, c.month, c.day, c.hour),
        }
    }

    /// Key of the composite bitmap for `operator` over `operands`
    ///
    /// Operands of commutative operators are sorted first, so the same operand
    /// set always maps to the same key regardless of the order given. Duplicates
    /// are kept because `XOR(A, A)` and `XOR(A)` differ. Operands that are
    /// composites themselves are wrapped in parentheses.
    pub fn composite<S: AsRef<str>>(&self, operator: BitOperator, operands: &[S]) -> String {
        let mut parts: Vec<String> = operands
            .iter()
            .map(|key| {
                let key = key.as_ref();
                if self.is_composite(key) {
                    format!("({})", key)
                } else {
                    key.to_string()
                }
            })
            .collect();

        if operator.is_commutative() {
            parts.sort_unstable();
        }

        format!(
            "{}{}_{}",
            self.composite_prefix,
            operator.as_str(),
            parts.join("-")
        )
    }

    /// Whether `key` names a composite bitmap of this keyspace
    pub fn is_composite(&self, key: &str) -> bool {
        key.starts_with(&self.composite_prefix)
    }

    /// KEYS pattern matching every bucket of this keyspace
    pub fn bucket_pattern(&self) -> String {
        format!("{}:*", self.namespace)
    }

    /// KEYS pattern matching every composite of this keyspace
    pub fn composite_pattern(&self) -> String {
        format!("{}*", self.composite_prefix)
    }
}

/// Check that a metric name can be embedded in a key without ambiguity
pub fn validate_metric_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::InvalidArgument(
            "metric name cannot be empty".to_string(),
        ));
    }
    if name.len() > MAX_METRIC_NAME_LEN {
        return Err(Error::InvalidArgument(format!(
            "metric name exceeds {} bytes",
            MAX_METRIC_NAME_LEN
        )));
    }
    if let Some(c) = name
        .chars()
        .find(|c| c.is_whitespace() || c.is_control() || FORBIDDEN_NAME_CHARS.contains(c))
    {
        return Err(Error::InvalidArgument(format!(
            "metric name '{}' contains forbidden character {:?}",
            name.escape_debug(),
            c
        )));
    }
    Ok(())
}

fn validate_namespace(namespace: &str) -> Result<()> {
    if namespace.is_empty() {
        return Err(Error::InvalidArgument(
            "namespace cannot be empty".to_string(),
        ));
    }
    if let Some(c) = namespace.chars().find(|c| {
        c.is_whitespace()
            || c.is_control()
            || *c == ':'
            || *c == '_'
            || FORBIDDEN_NAME_CHARS.contains(c)
    }) {
        return Err(Error::InvalidArgument(format!(
            "namespace '{}' contains forbidden character {:?}",
            namespace.escape_debug(),
            c
        )));
    }
    Ok(())
}

fn check_range(field: &str, value: u32, min: u32, max: u32) -> Result<()> {
    if value < min || value > max {
        return Err(Error::InvalidArgument(format!(
            "{} {} is out of range [{}, {}]",
            field, value, min, max
        )));
    }
    Ok(())
}
