//! # Observable tables
//!
//! One table per station (flux), baseline (visibilities) or triangle (closure quantities).
//! Each category has its own fixed-field struct:
//!
//! | Category | Struct | Observables |
//! |---|---|---|
//! | [`Category::Flux`] | [`FluxTable`] | `FLUX` |
//! | [`Category::Vis`] | [`VisTable`] | `\|V\|`, `PHI` |
//! | [`Category::Vis2`] | [`Vis2Table`] | `V2` |
//! | [`Category::T3`] | [`T3Table`] | `T3AMP`, `T3PHI` |
//!
//! ## Shape invariant
//!
//! Every row-by-channel matrix of a table has shape `(n_rows, n_channels)` and every per-row
//! vector has length `n_rows`. [`ObservableTable::check_shape`] verifies it.
//!
//! ## Flags
//!
//! The flag mask is the OR of the raw instrument flag and a non-finite check on every observable
//! and its error. [`ObservableTable::refresh_flags`] only ever sets flags.
//!
//! ## Shared behavior
//!
//! The [`ObservableTable`] trait exposes the observables generically, so rebinning, median
//! filtering, flag refresh and error filtering are written once. [`BaselineTable`] adds what the
//! closure reconciler and the merger need from visibility tables: coordinates, fabricated-row
//! tracking and placeholder construction.
pub mod flux;
pub mod matrix;
pub mod t3;
pub mod vis;
pub mod vis2;

use std::fmt;

use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

use crate::constants::{Meter, Micron, MJD};
use crate::error_filter::Observable;
use crate::oifits_errors::OifitsError;
use crate::rebin::{median_filter_1d, median_kernel_size, rebin};
use crate::station::{Baseline, Orientation};

pub use flux::FluxTable;
pub use t3::T3Table;
pub use vis::VisTable;
pub use vis2::Vis2Table;

/// Observable categories, one per OIFITS data extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Category {
    Flux,
    Vis,
    Vis2,
    T3,
}

impl Category {
    pub fn extname(self) -> &'static str {
        match self {
            Category::Flux => "OI_FLUX",
            Category::Vis => "OI_VIS",
            Category::Vis2 => "OI_VIS2",
            Category::T3 => "OI_T3",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extname())
    }
}

/// Read access to one observable and its error matrix.
pub struct ObservableRef<'a> {
    pub observable: Observable,
    pub values: &'a DMatrix<f64>,
    pub errors: &'a DMatrix<f64>,
}

/// Write access to one observable and its error matrix.
pub struct ObservableMut<'a> {
    pub observable: Observable,
    pub values: &'a mut DMatrix<f64>,
    pub errors: &'a mut DMatrix<f64>,
}

/// Behavior shared by every observable table.
pub trait ObservableTable: Clone + fmt::Debug {
    const CATEGORY: Category;

    /// Values are averaged with `1/E` weights when rebinned. Flux is not, so that the telluric
    /// correction stays valid.
    const WEIGHTED_REBIN: bool = true;

    /// The observables are divided by the telluric transmission before median filtering.
    const TELLURIC_SCALED: bool = false;

    fn mjd(&self) -> &[MJD];

    fn n_rows(&self) -> usize {
        self.mjd().len()
    }

    fn flag(&self) -> &DMatrix<bool>;

    /// Source table name of every row; differs from the table name only after a collapse.
    fn row_sources(&self) -> &[String];

    fn observables(&self) -> Vec<ObservableRef<'_>>;

    /// Observables plus the flag mask, borrowed together.
    fn observables_mut(&mut self) -> (Vec<ObservableMut<'_>>, &mut DMatrix<bool>);

    /// Per-channel matrices that are neither observables nor derived from coordinates, and are
    /// rebinned as plain signals (the uncorrected flux).
    fn auxiliary_channels_mut(&mut self) -> Vec<&mut DMatrix<f64>> {
        Vec::new()
    }

    /// Mean of the finite flux samples, the scale of the `NFLUX` error-filter rules. `None` for
    /// tables without flux, or without a finite sample.
    fn mean_flux(&self) -> Option<f64> {
        None
    }

    /// Append the rows of `other` (same channel count) after the rows of `self`.
    fn append(&mut self, other: &Self);

    /// New table made of `rows`, in that order.
    fn select_rows(&self, rows: &[usize]) -> Self;

    /// Recompute the per-channel quantities derived from coordinates on grid `wl`.
    fn update_derived(&mut self, wl: &[Micron]);

    /// `(field, length)` of every per-row vector.
    fn row_vector_lengths(&self) -> Vec<(&'static str, usize)>;

    /// `(field, shape)` of every row-by-channel matrix.
    fn matrix_shapes(&self) -> Vec<(&'static str, (usize, usize))>;

    /// Verify the shape invariant against a grid of `n_channels` channels.
    fn check_shape(&self, n_channels: usize) -> Result<(), OifitsError> {
        let n_rows = self.n_rows();
        if let Some((field, len)) = self
            .row_vector_lengths()
            .into_iter()
            .find(|&(_, len)| len != n_rows)
        {
            return Err(OifitsError::Format(format!(
                "{}: '{field}' has {len} rows, expected {n_rows}",
                Self::CATEGORY
            )));
        }
        if let Some((field, shape)) = self
            .matrix_shapes()
            .into_iter()
            .find(|&(_, shape)| shape != (n_rows, n_channels))
        {
            return Err(OifitsError::Format(format!(
                "{}: '{field}' has shape {shape:?}, expected {:?}",
                Self::CATEGORY,
                (n_rows, n_channels)
            )));
        }
        Ok(())
    }

    /// OR the non-finite check of every observable and error into the flag mask.
    fn refresh_flags(&mut self) {
        let (observables, flag) = self.observables_mut();
        for obs in observables {
            for (f, (v, e)) in flag
                .iter_mut()
                .zip(obs.values.iter().zip(obs.errors.iter()))
            {
                *f |= !v.is_finite() || !e.is_finite();
            }
        }
    }

    /// Rebin every observable, error and auxiliary matrix from `old_grid` to `new_grid`.
    ///
    /// Values and errors are binned with the same kernel and the same (pre-binning) flag mask;
    /// errors are not propagated in closed form. The new flag mask comes from the kernel mass
    /// of the old one.
    fn rebin(&mut self, new_grid: &[Micron], old_grid: &[Micron]) -> Result<(), OifitsError> {
        let old_flags = self.flag().clone();
        let weighted = Self::WEIGHTED_REBIN;
        let mut new_flags = None;
        {
            let (observables, _) = self.observables_mut();
            for obs in observables {
                let weights = weighted.then(|| obs.errors.clone());
                let (values, flags) = rebin(
                    new_grid,
                    old_grid,
                    obs.values,
                    &old_flags,
                    weights.as_ref(),
                    None,
                )?;
                let (errors, _) = rebin(
                    new_grid,
                    old_grid,
                    obs.errors,
                    &old_flags,
                    weights.as_ref(),
                    None,
                )?;
                *obs.values = values;
                *obs.errors = errors;
                new_flags.get_or_insert(flags);
            }
        }
        for aux in self.auxiliary_channels_mut() {
            let (values, _) = rebin(new_grid, old_grid, aux, &old_flags, None, None)?;
            *aux = values;
        }
        let (_, flag) = self.observables_mut();
        *flag = match new_flags {
            Some(flags) => flags,
            None => DMatrix::from_element(flag.nrows(), new_grid.len(), true),
        };
        Ok(())
    }

    /// Median-filter every row over its unflagged channels.
    ///
    /// Arguments
    /// -----------------
    /// * `width`: Filter half-width; the kernel is `2·(width/2)+1` channels.
    /// * `telluric`: Transmission per channel. Tables with [`ObservableTable::TELLURIC_SCALED`]
    ///   are divided by it before filtering and multiplied back afterwards.
    ///
    /// Errors of the filtered channels are divided by `sqrt(kernel)`.
    fn median_filter(&mut self, width: usize, telluric: &[f64]) {
        let kernel = median_kernel_size(width);
        let shrink = (kernel as f64).sqrt();
        let scaled = Self::TELLURIC_SCALED;
        let (observables, flag) = self.observables_mut();
        let flag: &DMatrix<bool> = flag;
        for obs in observables {
            for i in 0..flag.nrows() {
                let valid: Vec<usize> = (0..flag.ncols()).filter(|&j| !flag[(i, j)]).collect();
                let scale = |j: usize| if scaled { telluric[j] } else { 1.0 };
                let row: Vec<f64> = valid.iter().map(|&j| obs.values[(i, j)] / scale(j)).collect();
                let filtered = median_filter_1d(&row, kernel);
                for (&j, y) in valid.iter().zip(filtered) {
                    obs.values[(i, j)] = y * scale(j);
                    obs.errors[(i, j)] /= shrink;
                }
            }
        }
    }
}

/// Additional behavior of baseline tables (`OI_VIS`, `OI_VIS2`).
pub trait BaselineTable: ObservableTable {
    /// Station pair, `None` for a collapsed table.
    fn baseline(&self) -> Option<&Baseline>;

    fn set_baseline(&mut self, baseline: Option<Baseline>);

    fn u(&self) -> &[Meter];

    fn v(&self) -> &[Meter];

    /// `true` for rows synthesized to keep closure or VIS/VIS2 alignment.
    fn fabricated(&self) -> &[bool];

    /// Fully flagged rows with every observable set to `value` and every error to `error`.
    ///
    /// Arguments
    /// -----------------
    /// * `name`: Table name recorded as the row source.
    /// * `mjd`, `u`, `v`: Per-row epoch and coordinates (metres).
    /// * `wl`: Wavelength grid, for the derived quantities.
    fn filled(
        name: &str,
        mjd: &[MJD],
        u: &[Meter],
        v: &[Meter],
        wl: &[Micron],
        value: f64,
        error: f64,
    ) -> Self;

    /// Zero-signal placeholder rows (values 0, errors 1, all flagged).
    fn placeholder(name: &str, mjd: &[MJD], u: &[Meter], v: &[Meter], wl: &[Micron]) -> Self {
        Self::filled(name, mjd, u, v, wl, 0.0, 1.0)
    }

    /// Append one zero-signal placeholder row and return its index.
    fn push_placeholder(&mut self, name: &str, mjd: MJD, u: Meter, v: Meter, wl: &[Micron]) -> usize {
        let index = self.n_rows();
        self.append(&Self::placeholder(name, &[mjd], &[u], &[v], wl));
        index
    }
}

/// One leg of a closure triangle: the baseline table it reads and its orientation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Leg {
    pub baseline: String,
    pub orientation: Orientation,
}

impl Leg {
    pub fn new(baseline: impl Into<String>, orientation: Orientation) -> Self {
        Leg {
            baseline: baseline.into(),
            orientation,
        }
    }

    pub fn sign(&self) -> f64 {
        self.orientation.sign()
    }
}

/// Closure formula of a triangle table.
///
/// `rows[k][i]` is the row of the `k`-th leg's baseline table (in `category`) matching row `i`
/// of the triangle table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriangleFormula {
    pub legs: [Leg; 3],
    pub category: Category,
    pub rows: [Vec<usize>; 3],
}

/// Closure formula of a collapsed triangle table: every row carries its own legs, all rows
/// index the single collapsed baseline table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollapsedFormula {
    pub legs: Vec<[Leg; 3]>,
    pub category: Category,
    pub rows: [Vec<usize>; 3],
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Formula {
    Triangle(TriangleFormula),
    Collapsed(CollapsedFormula),
}

impl Formula {
    pub fn category(&self) -> Category {
        match self {
            Formula::Triangle(f) => f.category,
            Formula::Collapsed(f) => f.category,
        }
    }

    pub fn rows(&self) -> &[Vec<usize>; 3] {
        match self {
            Formula::Triangle(f) => &f.rows,
            Formula::Collapsed(f) => &f.rows,
        }
    }

    /// Legs of triangle row `row`.
    pub fn legs_of_row(&self, row: usize) -> Option<&[Leg; 3]> {
        match self {
            Formula::Triangle(f) => Some(&f.legs),
            Formula::Collapsed(f) => f.legs.get(row),
        }
    }

    /// Restrict the formula to triangle rows `rows`, in that order.
    pub(crate) fn select_rows(&self, rows: &[usize]) -> Formula {
        // cleared indices stay cleared
        let pick_one = |v: &Vec<usize>| {
            if v.is_empty() {
                Vec::new()
            } else {
                matrix::take(v, rows)
            }
        };
        let pick = |r: &[Vec<usize>; 3]| [pick_one(&r[0]), pick_one(&r[1]), pick_one(&r[2])];
        match self {
            Formula::Triangle(f) => Formula::Triangle(TriangleFormula {
                legs: f.legs.clone(),
                category: f.category,
                rows: pick(&f.rows),
            }),
            Formula::Collapsed(f) => Formula::Collapsed(CollapsedFormula {
                legs: matrix::take(&f.legs, rows),
                category: f.category,
                rows: pick(&f.rows),
            }),
        }
    }
}
