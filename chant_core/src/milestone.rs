//! Lifetime-total milestones.
//!
//! Fixed ascending thresholds on the all-time chant count. A milestone
//! fires when the post-increment total equals a threshold exactly;
//! checking with `>=` would refire on every subsequent increment.
//! Increments are applied one at a time, so a crossing is never skipped
//! past.

/// Ascending milestone thresholds.
pub const MILESTONES: [u64; 5] = [100, 1_000, 2_000, 5_000, 10_000];

/// The threshold crossed by reaching `total`, if any.
///
/// Exact-equality detection: `Some` only when `total` sits precisely on
/// a threshold, which on an increment-by-one boundary fires once per
/// crossing.
pub fn crossed(total: u64) -> Option<u64> {
    MILESTONES.iter().copied().find(|&m| m == total)
}

/// Unlocked/locked status of every milestone at a given lifetime total.
///
/// Used for progress display; `>=` is correct here because a badge stays
/// unlocked forever once earned.
pub fn progress(total: u64) -> Vec<(u64, bool)> {
    MILESTONES.iter().map(|&m| (m, total >= m)).collect()
}
