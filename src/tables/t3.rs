//! Closure table of one triangle (`OI_T3`): closure amplitude and closure phase (degrees).
//!
//! Besides the observables, a triangle table carries the geometry of its three legs
//! (`B1`, `B2`, `B3` in metres, the third leg being `-(u1+u2), -(v1+v2)`) and its
//! [`Formula`], which links each row to the baseline tables of the dataset.
use nalgebra::DMatrix;

use super::matrix::{per_channel, take, take_rows, vstack};
use super::{
    Category, CollapsedFormula, Formula, ObservableMut, ObservableRef, ObservableTable,
    TriangleFormula,
};
use crate::constants::{Meter, Micron, MJD};
use crate::error_filter::Observable;
use crate::station::Triangle;

#[derive(Debug, Clone, PartialEq)]
pub struct T3Table {
    /// Station triple; `None` for the collapsed `"all"` table.
    pub triangle: Option<Triangle>,
    pub mjd: Vec<MJD>,
    pub u1: Vec<Meter>,
    pub v1: Vec<Meter>,
    pub u2: Vec<Meter>,
    pub v2: Vec<Meter>,
    pub b1: Vec<Meter>,
    pub b2: Vec<Meter>,
    pub b3: Vec<Meter>,
    pub t3amp: DMatrix<f64>,
    pub et3amp: DMatrix<f64>,
    pub t3phi: DMatrix<f64>,
    pub et3phi: DMatrix<f64>,
    pub flag: DMatrix<bool>,
    pub bmax_wl: DMatrix<f64>,
    pub bavg_wl: DMatrix<f64>,
    /// Set by the closure reconciler.
    pub formula: Option<Formula>,
    pub row_sources: Vec<String>,
}

impl T3Table {
    #[allow(clippy::too_many_arguments)]
    pub fn from_raw(
        triangle: Triangle,
        mjd: Vec<MJD>,
        (u1, v1): (Vec<Meter>, Vec<Meter>),
        (u2, v2): (Vec<Meter>, Vec<Meter>),
        t3amp: DMatrix<f64>,
        et3amp: DMatrix<f64>,
        t3phi: DMatrix<f64>,
        et3phi: DMatrix<f64>,
        flag: DMatrix<bool>,
    ) -> Self {
        let (n, m) = t3amp.shape();
        T3Table {
            row_sources: vec![triangle.name(); n],
            triangle: Some(triangle),
            mjd,
            u1,
            v1,
            u2,
            v2,
            b1: vec![0.0; n],
            b2: vec![0.0; n],
            b3: vec![0.0; n],
            t3amp,
            et3amp,
            t3phi,
            et3phi,
            flag,
            bmax_wl: DMatrix::zeros(n, m),
            bavg_wl: DMatrix::zeros(n, m),
            formula: None,
        }
    }

    /// Coordinates `(u, v)` of leg `k` (0, 1 or 2) at row `row`, as recorded by the triangle.
    pub fn leg_coordinates(&self, k: usize, row: usize) -> (Meter, Meter) {
        match k {
            0 => (self.u1[row], self.v1[row]),
            1 => (self.u2[row], self.v2[row]),
            _ => (
                -(self.u1[row] + self.u2[row]),
                -(self.v1[row] + self.v2[row]),
            ),
        }
    }

    /// Formula with row indices dropped; the closure reconciler rebuilds them.
    fn formula_without_rows(formula: Option<Formula>) -> Option<Formula> {
        formula.map(|f| match f {
            Formula::Triangle(t) => Formula::Triangle(TriangleFormula {
                rows: Default::default(),
                ..t
            }),
            Formula::Collapsed(c) => Formula::Collapsed(CollapsedFormula {
                rows: Default::default(),
                ..c
            }),
        })
    }
}

impl ObservableTable for T3Table {
    const CATEGORY: Category = Category::T3;

    fn mjd(&self) -> &[MJD] {
        &self.mjd
    }

    fn flag(&self) -> &DMatrix<bool> {
        &self.flag
    }

    fn row_sources(&self) -> &[String] {
        &self.row_sources
    }

    fn observables(&self) -> Vec<ObservableRef<'_>> {
        vec![
            ObservableRef {
                observable: Observable::T3Amp,
                values: &self.t3amp,
                errors: &self.et3amp,
            },
            ObservableRef {
                observable: Observable::T3Phi,
                values: &self.t3phi,
                errors: &self.et3phi,
            },
        ]
    }

    fn observables_mut(&mut self) -> (Vec<ObservableMut<'_>>, &mut DMatrix<bool>) {
        (
            vec![
                ObservableMut {
                    observable: Observable::T3Amp,
                    values: &mut self.t3amp,
                    errors: &mut self.et3amp,
                },
                ObservableMut {
                    observable: Observable::T3Phi,
                    values: &mut self.t3phi,
                    errors: &mut self.et3phi,
                },
            ],
            &mut self.flag,
        )
    }

    /// Appending invalidates the row indices of the formula: they are cleared, and collapsed
    /// formulas gain the legs of `other`.
    fn append(&mut self, other: &Self) {
        let formula = match (self.formula.take(), &other.formula) {
            (Some(Formula::Collapsed(mut mine)), Some(Formula::Collapsed(theirs))) => {
                mine.legs.extend_from_slice(&theirs.legs);
                Some(Formula::Collapsed(mine))
            }
            (Some(f), _) => Some(f),
            (None, f) => f.clone(),
        };
        self.formula = Self::formula_without_rows(formula);

        self.mjd.extend_from_slice(&other.mjd);
        self.u1.extend_from_slice(&other.u1);
        self.v1.extend_from_slice(&other.v1);
        self.u2.extend_from_slice(&other.u2);
        self.v2.extend_from_slice(&other.v2);
        self.b1.extend_from_slice(&other.b1);
        self.b2.extend_from_slice(&other.b2);
        self.b3.extend_from_slice(&other.b3);
        self.row_sources.extend_from_slice(&other.row_sources);
        self.t3amp = vstack(&self.t3amp, &other.t3amp);
        self.et3amp = vstack(&self.et3amp, &other.et3amp);
        self.t3phi = vstack(&self.t3phi, &other.t3phi);
        self.et3phi = vstack(&self.et3phi, &other.et3phi);
        self.flag = vstack(&self.flag, &other.flag);
        self.bmax_wl = vstack(&self.bmax_wl, &other.bmax_wl);
        self.bavg_wl = vstack(&self.bavg_wl, &other.bavg_wl);
    }

    fn select_rows(&self, rows: &[usize]) -> Self {
        T3Table {
            triangle: self.triangle.clone(),
            mjd: take(&self.mjd, rows),
            u1: take(&self.u1, rows),
            v1: take(&self.v1, rows),
            u2: take(&self.u2, rows),
            v2: take(&self.v2, rows),
            b1: take(&self.b1, rows),
            b2: take(&self.b2, rows),
            b3: take(&self.b3, rows),
            t3amp: take_rows(&self.t3amp, rows),
            et3amp: take_rows(&self.et3amp, rows),
            t3phi: take_rows(&self.t3phi, rows),
            et3phi: take_rows(&self.et3phi, rows),
            flag: take_rows(&self.flag, rows),
            bmax_wl: take_rows(&self.bmax_wl, rows),
            bavg_wl: take_rows(&self.bavg_wl, rows),
            formula: self.formula.as_ref().map(|f| f.select_rows(rows)),
            row_sources: take(&self.row_sources, rows),
        }
    }

    fn update_derived(&mut self, wl: &[Micron]) {
        let n = self.mjd.len();
        self.b1 = (0..n).map(|i| self.u1[i].hypot(self.v1[i])).collect();
        self.b2 = (0..n).map(|i| self.u2[i].hypot(self.v2[i])).collect();
        self.b3 = (0..n)
            .map(|i| (self.u1[i] + self.u2[i]).hypot(self.v1[i] + self.v2[i]))
            .collect();
        let bmax: Vec<f64> = (0..n)
            .map(|i| self.b1[i].max(self.b2[i]).max(self.b3[i]))
            .collect();
        let bavg: Vec<f64> = (0..n)
            .map(|i| (self.b1[i] + self.b2[i] + self.b3[i]) / 3.0)
            .collect();
        self.bmax_wl = per_channel(&bmax, wl);
        self.bavg_wl = per_channel(&bavg, wl);
    }

    fn row_vector_lengths(&self) -> Vec<(&'static str, usize)> {
        let mut lengths = vec![
            ("MJD", self.mjd.len()),
            ("u1", self.u1.len()),
            ("v1", self.v1.len()),
            ("u2", self.u2.len()),
            ("v2", self.v2.len()),
            ("B1", self.b1.len()),
            ("B2", self.b2.len()),
            ("B3", self.b3.len()),
            ("NAME", self.row_sources.len()),
        ];
        if let Some(Formula::Collapsed(f)) = &self.formula {
            lengths.push(("formula legs", f.legs.len()));
        }
        lengths
    }

    fn matrix_shapes(&self) -> Vec<(&'static str, (usize, usize))> {
        vec![
            ("T3AMP", self.t3amp.shape()),
            ("ET3AMP", self.et3amp.shape()),
            ("T3PHI", self.t3phi.shape()),
            ("ET3PHI", self.et3phi.shape()),
            ("FLAG", self.flag.shape()),
            ("Bmax/wl", self.bmax_wl.shape()),
            ("Bavg/wl", self.bavg_wl.shape()),
        ]
    }
}
