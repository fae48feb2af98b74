//! Resource Guard.
//!
//! Unbounded multi-season fetches for high-volume players can exhaust
//! process memory during grouping and matching; checking the raw row count
//! before those steps is cheaper than checking during them.

use crate::engine::MatchupError;

/// Hard ceiling on raw pitch-feed rows per request.
pub const MAX_PITCH_ROWS: usize = 300_000;

/// Fail fast on oversized datasets. Exactly the ceiling is accepted;
/// anything above it is rejected before grouping or matching begins.
pub fn check_dataset_size(rows: usize) -> Result<(), MatchupError> {
    if rows > MAX_PITCH_ROWS {
        return Err(MatchupError::DatasetTooLarge {
            rows,
            max_rows: MAX_PITCH_ROWS,
        });
    }
    Ok(())
}
