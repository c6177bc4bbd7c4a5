//! Boolean composition of bitmaps
//!
//! [`compose`] runs one BITOP over the operands and returns a handle to the
//! destination key. The result is an ordinary [`Bitmap`], so it can be counted,
//! tested, deleted or used as an operand of a further composition:
//!
//! ```rust,no_run
//! use tracklist::bitop::{and, or};
//! # async fn example(a: tracklist::Bitmap, b: tracklist::Bitmap, c: tracklist::Bitmap)
//! #     -> tracklist::Result<()> {
//! let both = and(&[a.clone(), b.clone()]).await?;
//! let either = or(&[both, c]).await?;
//! println!("{} entities", either.count().await?);
//! # Ok(())
//! # }
//! ```
//!
//! Every call recomputes the destination, even if an identical composite is
//! already stored, so a composite always reflects its operands at call time.
//! Concurrent calls deriving the same key race on the overwrite and the last
//! writer wins.

use crate::bitmap::{command_error, Bitmap};
use crate::error::{Error, Result};
use crate::types::BitOperator;
use tracing::debug;

/// Combine `operands` with `operator` into a new stored bitmap
///
/// The destination key is derived from the operator and the operand keys,
/// sorted for commutative operators. The BITOP command itself receives the
/// operands in the order given.
///
/// # Errors
///
/// - `InvalidArgument` if `operands` is empty, if NOT gets anything other than
///   exactly one operand, or if the operands belong to different pools or
///   namespaces
/// - `ConnectionError` if no connection can be acquired
/// - `StoreCommandError` if the store rejects the BITOP
pub async fn compose(operator: BitOperator, operands: &[Bitmap]) -> Result<Bitmap> {
    let first = operands.first().ok_or_else(|| {
        Error::InvalidArgument(format!("{} needs at least one operand", operator))
    })?;

    if operator == BitOperator::Not && operands.len() != 1 {
        return Err(Error::InvalidArgument(format!(
            "NOT takes exactly one operand, got {}",
            operands.len()
        )));
    }

    if let Some(stranger) = operands.iter().find(|b| !b.shares_store_with(first)) {
        return Err(Error::InvalidArgument(format!(
            "{} does not share a store with {}",
            stranger, first
        )));
    }

    let keyspace = first.keyspace();
    let keys: Vec<&str> = operands.iter().map(Bitmap::key).collect();
    let destination = keyspace.composite(operator, &keys);

    let mut cmd = redis::cmd("BITOP");
    cmd.arg(operator.as_str()).arg(&destination).arg(&keys);

    let mut conn = first.pool().get().await?;
    let size: i64 = conn
        .query(&cmd)
        .await
        .map_err(|e| command_error("BITOP", &destination, e))?;

    debug!(
        operator = %operator,
        operands = keys.len(),
        key = %destination,
        size,
        "composite bitmap written"
    );

    Ok(Bitmap::new(destination, keyspace.clone(), first.pool().clone()))
}

/// Intersection of `operands`
pub async fn and(operands: &[Bitmap]) -> Result<Bitmap> {
    compose(BitOperator::And, operands).await
}

/// Union of `operands`
pub async fn or(operands: &[Bitmap]) -> Result<Bitmap> {
    compose(BitOperator::Or, operands).await
}

/// Symmetric difference of `operands`
pub async fn xor(operands: &[Bitmap]) -> Result<Bitmap> {
    compose(BitOperator::Xor, operands).await
}

/// Complement of a single operand
///
/// The complement covers every bit up to the operand's last byte, so ids
/// beyond the highest set bit's byte stay unset.
pub async fn not(operand: &Bitmap) -> Result<Bitmap> {
    compose(BitOperator::Not, std::slice::from_ref(operand)).await
}
