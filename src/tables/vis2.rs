//! Squared-visibility table of one baseline (`OI_VIS2`).
use nalgebra::DMatrix;

use super::matrix::{take, take_rows, vstack, Projection};
use super::{BaselineTable, Category, ObservableMut, ObservableRef, ObservableTable};
use crate::constants::{Meter, Micron, MJD};
use crate::error_filter::Observable;
use crate::station::Baseline;

#[derive(Debug, Clone, PartialEq)]
pub struct Vis2Table {
    /// Station pair; `None` for the collapsed `"all"` table.
    pub baseline: Option<Baseline>,
    pub mjd: Vec<MJD>,
    pub u: Vec<Meter>,
    pub v: Vec<Meter>,
    pub v2: DMatrix<f64>,
    pub ev2: DMatrix<f64>,
    pub flag: DMatrix<bool>,
    pub u_wl: DMatrix<f64>,
    pub v_wl: DMatrix<f64>,
    pub b_wl: DMatrix<f64>,
    pub pa: DMatrix<f64>,
    pub fabricated: Vec<bool>,
    pub row_sources: Vec<String>,
}

impl Vis2Table {
    /// Table from raw columns; derived quantities are zero until
    /// [`ObservableTable::update_derived`] runs.
    pub fn from_raw(
        baseline: Baseline,
        mjd: Vec<MJD>,
        u: Vec<Meter>,
        v: Vec<Meter>,
        v2: DMatrix<f64>,
        ev2: DMatrix<f64>,
        flag: DMatrix<bool>,
    ) -> Self {
        let n = mjd.len();
        let projection = Projection::empty(n, v2.ncols());
        Vis2Table {
            row_sources: vec![baseline.name(); n],
            baseline: Some(baseline),
            mjd,
            u,
            v,
            v2,
            ev2,
            flag,
            u_wl: projection.u_wl,
            v_wl: projection.v_wl,
            b_wl: projection.b_wl,
            pa: projection.pa,
            fabricated: vec![false; n],
        }
    }
}

impl ObservableTable for Vis2Table {
    const CATEGORY: Category = Category::Vis2;

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
        vec![ObservableRef {
            observable: Observable::V2,
            values: &self.v2,
            errors: &self.ev2,
        }]
    }

    fn observables_mut(&mut self) -> (Vec<ObservableMut<'_>>, &mut DMatrix<bool>) {
        (
            vec![ObservableMut {
                observable: Observable::V2,
                values: &mut self.v2,
                errors: &mut self.ev2,
            }],
            &mut self.flag,
        )
    }

    fn append(&mut self, other: &Self) {
        self.mjd.extend_from_slice(&other.mjd);
        self.u.extend_from_slice(&other.u);
        self.v.extend_from_slice(&other.v);
        self.fabricated.extend_from_slice(&other.fabricated);
        self.row_sources.extend_from_slice(&other.row_sources);
        self.v2 = vstack(&self.v2, &other.v2);
        self.ev2 = vstack(&self.ev2, &other.ev2);
        self.flag = vstack(&self.flag, &other.flag);
        self.u_wl = vstack(&self.u_wl, &other.u_wl);
        self.v_wl = vstack(&self.v_wl, &other.v_wl);
        self.b_wl = vstack(&self.b_wl, &other.b_wl);
        self.pa = vstack(&self.pa, &other.pa);
    }

    fn select_rows(&self, rows: &[usize]) -> Self {
        Vis2Table {
            baseline: self.baseline.clone(),
            mjd: take(&self.mjd, rows),
            u: take(&self.u, rows),
            v: take(&self.v, rows),
            v2: take_rows(&self.v2, rows),
            ev2: take_rows(&self.ev2, rows),
            flag: take_rows(&self.flag, rows),
            u_wl: take_rows(&self.u_wl, rows),
            v_wl: take_rows(&self.v_wl, rows),
            b_wl: take_rows(&self.b_wl, rows),
            pa: take_rows(&self.pa, rows),
            fabricated: take(&self.fabricated, rows),
            row_sources: take(&self.row_sources, rows),
        }
    }

    fn update_derived(&mut self, wl: &[Micron]) {
        let p = Projection::new(&self.u, &self.v, wl);
        self.u_wl = p.u_wl;
        self.v_wl = p.v_wl;
        self.b_wl = p.b_wl;
        self.pa = p.pa;
    }

    fn row_vector_lengths(&self) -> Vec<(&'static str, usize)> {
        vec![
            ("MJD", self.mjd.len()),
            ("u", self.u.len()),
            ("v", self.v.len()),
            ("fabricated", self.fabricated.len()),
            ("NAME", self.row_sources.len()),
        ]
    }

    fn matrix_shapes(&self) -> Vec<(&'static str, (usize, usize))> {
        vec![
            ("V2", self.v2.shape()),
            ("EV2", self.ev2.shape()),
            ("FLAG", self.flag.shape()),
            ("u/wl", self.u_wl.shape()),
            ("v/wl", self.v_wl.shape()),
            ("B/wl", self.b_wl.shape()),
            ("PA", self.pa.shape()),
        ]
    }
}

impl BaselineTable for Vis2Table {
    fn baseline(&self) -> Option<&Baseline> {
        self.baseline.as_ref()
    }

    fn set_baseline(&mut self, baseline: Option<Baseline>) {
        self.baseline = baseline;
    }

    fn u(&self) -> &[Meter] {
        &self.u
    }

    fn v(&self) -> &[Meter] {
        &self.v
    }

    fn fabricated(&self) -> &[bool] {
        &self.fabricated
    }

    fn filled(
        name: &str,
        mjd: &[MJD],
        u: &[Meter],
        v: &[Meter],
        wl: &[Micron],
        value: f64,
        error: f64,
    ) -> Self {
        let (n, m) = (mjd.len(), wl.len());
        let p = Projection::new(u, v, wl);
        Vis2Table {
            baseline: None,
            mjd: mjd.to_vec(),
            u: u.to_vec(),
            v: v.to_vec(),
            v2: DMatrix::from_element(n, m, value),
            ev2: DMatrix::from_element(n, m, error),
            flag: DMatrix::from_element(n, m, true),
            u_wl: p.u_wl,
            v_wl: p.v_wl,
            b_wl: p.b_wl,
            pa: p.pa,
            fabricated: vec![true; n],
            row_sources: vec![name.to_string(); n],
        }
    }
}
