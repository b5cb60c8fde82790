//! # Spectral rebinning
//!
//! Kernel-weighted regridding of row-by-channel matrices onto a new wavelength grid.
//!
//! ## Overview
//!
//! For every row and every channel `x0` of the new grid, the binned value is the weighted mean
//!
//! ```text
//! k(X)   = exp(-(X - x0)² / (0.6·Δ)²)        Δ = median spacing of the new grid
//! y(x0)  = Σ k·Y/E / Σ k/E                   E = errors, or 1 when none are supplied
//! ```
//!
//! taken over the **unflagged** samples of the old grid only. The binned flag of a channel is
//! set when more than half of the kernel mass falls on flagged samples, i.e. when the flag mask
//! binned as a `0/1` signal exceeds [`FLAG_MASS_THRESHOLD`].
//!
//! A row with no usable sample yields `NaN` for every channel; this is not an error, the table's
//! flag refresh turns it into a flag.
//!
//! Error columns are not propagated in closed form: callers bin them as a second signal with the
//! same kernel and the same flag mask. The resulting errors are slightly optimistic, and this is
//! the expected behavior.
//!
//! ## Identity grid
//!
//! When the new grid equals the old grid (within [`GRID_IDENTITY_EPS`], relative), [`rebin`]
//! returns the input values and flags unchanged.
//!
//! ## Median pre-smoothing
//!
//! With `median_width = Some(w)`, each row is first median-filtered over its unflagged channels
//! with an odd kernel of size `2·(w/2)+1` and zero padding at the edges. Error columns binned in
//! that mode should be divided by `sqrt(kernel)` by the caller (see [`median_kernel_size`]).
use itertools::Itertools;
use nalgebra::DMatrix;

use crate::constants::{Micron, FLAG_MASS_THRESHOLD, GRID_IDENTITY_EPS, KERNEL_WIDTH_FACTOR};
use crate::oifits_errors::OifitsError;

/// Median of a slice, `NaN` for an empty slice. Even lengths average the two middle values.
pub(crate) fn median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    let sorted: Vec<f64> = values.iter().copied().sorted_by(|a, b| a.total_cmp(b)).collect();
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        0.5 * (sorted[mid - 1] + sorted[mid])
    } else {
        sorted[mid]
    }
}

/// Median spacing of a grid; `NaN` when the grid has fewer than two points.
fn median_spacing(grid: &[Micron]) -> f64 {
    let diffs: Vec<f64> = grid.iter().tuple_windows().map(|(a, b)| b - a).collect();
    median(&diffs).abs()
}

/// Kernel spacing for a new grid. A single-channel grid borrows the spacing of the old grid.
fn kernel_spacing(new_grid: &[Micron], old_grid: &[Micron]) -> f64 {
    if new_grid.len() >= 2 {
        median_spacing(new_grid)
    } else {
        median_spacing(old_grid)
    }
}

/// Bin one signal `values(old_grid)` onto `new_grid`.
///
/// Arguments
/// -----------------
/// * `new_grid`: Channel centres of the output.
/// * `old_grid`: Abscissae of `values` (any order, may be irregular).
/// * `values`: Samples to bin, same length as `old_grid`.
/// * `errors`: Optional per-sample errors; weights are `k/E`.
///
/// Return
/// ----------
/// * One value per channel of `new_grid`. Channels with no kernel mass are `NaN`.
pub fn bin_vector(
    new_grid: &[Micron],
    old_grid: &[Micron],
    values: &[f64],
    errors: Option<&[f64]>,
) -> Vec<f64> {
    let dx = KERNEL_WIDTH_FACTOR * kernel_spacing(new_grid, old_grid);
    new_grid
        .iter()
        .map(|&x0| {
            let mut num = 0.0;
            let mut den = 0.0;
            for (i, (&x, &y)) in old_grid.iter().zip(values).enumerate() {
                let k = (-((x - x0) / dx).powi(2)).exp();
                let e = errors.map_or(1.0, |e| e[i]);
                num += k * y / e;
                den += k / e;
            }
            num / den
        })
        .collect()
}

/// Odd kernel size used for a median filter of half-width `width`.
pub fn median_kernel_size(width: usize) -> usize {
    2 * (width / 2) + 1
}

/// Sliding median with an odd `kernel`, zero-padded at both ends.
pub fn median_filter_1d(values: &[f64], kernel: usize) -> Vec<f64> {
    let half = (kernel / 2) as isize;
    let n = values.len() as isize;
    (0..n)
        .map(|i| {
            let window: Vec<f64> = (i - half..=i + half)
                .map(|j| if j < 0 || j >= n { 0.0 } else { values[j as usize] })
                .collect();
            median(&window)
        })
        .collect()
}

/// Linear interpolation of `(xs, ys)` at `x`, clamped to the end values outside the range.
pub fn interpolate(x: f64, xs: &[f64], ys: &[f64]) -> f64 {
    let points: Vec<(f64, f64)> = xs
        .iter()
        .copied()
        .zip(ys.iter().copied())
        .sorted_by(|a, b| a.0.total_cmp(&b.0))
        .collect();
    let (Some(first), Some(last)) = (points.first(), points.last()) else {
        return f64::NAN;
    };
    if x <= first.0 {
        return first.1;
    }
    if x >= last.0 {
        return last.1;
    }
    for ((x0, y0), (x1, y1)) in points.iter().tuple_windows() {
        if x <= *x1 {
            if x1 == x0 {
                return *y1;
            }
            return y0 + (y1 - y0) * (x - x0) / (x1 - x0);
        }
    }
    last.1
}

/// `n` evenly spaced points from `start` to `end`, both included.
pub fn linspace(start: f64, end: f64, n: usize) -> Vec<f64> {
    match n {
        0 => Vec::new(),
        1 => vec![start],
        _ => {
            let step = (end - start) / (n - 1) as f64;
            (0..n).map(|i| start + step * i as f64).collect()
        }
    }
}

/// Uniform grid of `len/binning` points spanning the range of `grid`.
pub fn uniform_grid(grid: &[Micron], binning: usize) -> Vec<Micron> {
    let lo = grid.iter().copied().fold(f64::INFINITY, f64::min);
    let hi = grid.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    linspace(lo, hi, grid.len() / binning.max(1))
}

/// True when both grids have the same channels within [`GRID_IDENTITY_EPS`] (relative).
pub fn same_grid(a: &[Micron], b: &[Micron]) -> bool {
    a.len() == b.len()
        && a
            .iter()
            .zip(b)
            .all(|(x, y)| (x - y).abs() <= GRID_IDENTITY_EPS * x.abs().max(y.abs()))
}

/// Rebin every row of a row-by-channel matrix onto a new wavelength grid.
///
/// Arguments
/// -----------------
/// * `new_grid`: Output channel centres.
/// * `old_grid`: Channel centres of `values`, one per column.
/// * `values`: `(rows, old_grid.len())` matrix to rebin.
/// * `flags`: Flag mask with the shape of `values`; flagged samples do not contribute.
/// * `errors`: Optional error matrix with the shape of `values`, used as `1/E` weights.
/// * `median_width`: Optional median pre-smoothing half-width.
///
/// Return
/// ----------
/// * `(binned_values, binned_flags)`, both `(rows, new_grid.len())`.
/// * `Err(OifitsError::Format)` if a matrix does not match `old_grid`.
///
/// See also
/// ------------
/// * [`bin_vector`] – The per-row kernel average.
pub fn rebin(
    new_grid: &[Micron],
    old_grid: &[Micron],
    values: &DMatrix<f64>,
    flags: &DMatrix<bool>,
    errors: Option<&DMatrix<f64>>,
    median_width: Option<usize>,
) -> Result<(DMatrix<f64>, DMatrix<bool>), OifitsError> {
    let shape = (values.nrows(), old_grid.len());
    let mismatched = values.shape() != shape
        || flags.shape() != shape
        || errors.is_some_and(|e| e.shape() != shape);
    if mismatched {
        return Err(OifitsError::Format(format!(
            "cannot rebin a {:?} matrix defined on {} channels",
            values.shape(),
            old_grid.len()
        )));
    }

    if same_grid(new_grid, old_grid) {
        return Ok((values.clone(), flags.clone()));
    }

    let n_rows = values.nrows();
    let mut out = DMatrix::<f64>::from_element(n_rows, new_grid.len(), f64::NAN);
    let mut out_flags = DMatrix::<bool>::from_element(n_rows, new_grid.len(), false);

    for i in 0..n_rows {
        let row_flags: Vec<f64> = (0..old_grid.len())
            .map(|j| if flags[(i, j)] { 1.0 } else { 0.0 })
            .collect();
        let flag_mass = bin_vector(new_grid, old_grid, &row_flags, None);

        let valid: Vec<usize> = (0..old_grid.len()).filter(|&j| !flags[(i, j)]).collect();
        let x: Vec<f64> = valid.iter().map(|&j| old_grid[j]).collect();
        let mut y: Vec<f64> = valid.iter().map(|&j| values[(i, j)]).collect();
        if let Some(w) = median_width {
            y = median_filter_1d(&y, median_kernel_size(w));
        }
        let e: Option<Vec<f64>> = errors.map(|e| valid.iter().map(|&j| e[(i, j)]).collect());

        let binned = if valid.is_empty() {
            vec![f64::NAN; new_grid.len()]
        } else {
            bin_vector(new_grid, &x, &y, e.as_deref())
        };

        for (j, (v, m)) in binned.into_iter().zip(flag_mass).enumerate() {
            out[(i, j)] = v;
            out_flags[(i, j)] = m > FLAG_MASS_THRESHOLD;
        }
    }
    Ok((out, out_flags))
}
