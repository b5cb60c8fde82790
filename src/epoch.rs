//! # Epoch aligner
//!
//! Nearest-epoch lookup between tables of possibly different length. Two rows are considered
//! simultaneous when their epochs differ by at most a tolerance, [`EPOCH_TOLERANCE`] by default.
//!
//! All functions are linear scans: tables hold at most a few hundred rows per baseline, and the
//! scan keeps the *first* index reaching the minimum difference, which makes results independent
//! of any sort order.
//!
//! ## See also
//! ------------
//! * [`crate::closure::reconcile_closures`] – Stitches triangle rows to baseline rows.
//! * [`crate::merge::merge`] – Detects rows present in one table and absent from a sibling.
//!
//! [`EPOCH_TOLERANCE`]: crate::constants::EPOCH_TOLERANCE
use crate::constants::MJD;

/// Index of the epoch closest to `epoch`, if within `tolerance`.
///
/// Arguments
/// -----------------
/// * `epoch`: The epoch to look up (MJD).
/// * `epochs`: Epoch vector of the table searched.
/// * `tolerance`: Maximum accepted absolute difference (days).
///
/// Return
/// ----------
/// * `Some(i)` with the first index of minimal `|epochs[i] - epoch|` when that minimum is
///   `<= tolerance`, `None` otherwise (including for an empty table).
pub fn nearest(epoch: MJD, epochs: &[MJD], tolerance: MJD) -> Option<usize> {
    nearest_matching(epoch, epochs, tolerance, |_| true)
}

/// Same as [`nearest`], restricted to the indices accepted by `accept`.
pub fn nearest_matching<F>(epoch: MJD, epochs: &[MJD], tolerance: MJD, accept: F) -> Option<usize>
where
    F: Fn(usize) -> bool,
{
    let mut best: Option<(usize, f64)> = None;
    for (i, &e) in epochs.iter().enumerate() {
        if !accept(i) {
            continue;
        }
        let d = (e - epoch).abs();
        if !d.is_finite() {
            continue;
        }
        match best {
            Some((_, bd)) if d >= bd => {}
            _ => best = Some((i, d)),
        }
    }
    best.filter(|&(_, d)| d <= tolerance).map(|(i, _)| i)
}

/// Like [`nearest`], but an index accepted by `preferred` wins over any other index within
/// tolerance, whatever their distances.
pub fn nearest_preferred<F>(
    epoch: MJD,
    epochs: &[MJD],
    tolerance: MJD,
    preferred: F,
) -> Option<usize>
where
    F: Fn(usize) -> bool,
{
    nearest_matching(epoch, epochs, tolerance, preferred)
        .or_else(|| nearest(epoch, epochs, tolerance))
}

/// Indices of `epochs` that have no counterpart in `reference` within `tolerance`.
pub fn unmatched(epochs: &[MJD], reference: &[MJD], tolerance: MJD) -> Vec<usize> {
    epochs
        .iter()
        .enumerate()
        .filter(|(_, &e)| nearest(e, reference, tolerance).is_none())
        .map(|(i, _)| i)
        .collect()
}
