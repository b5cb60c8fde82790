//! Complex-visibility table of one baseline (`OI_VIS`): amplitude and phase (degrees).
use nalgebra::DMatrix;

use super::matrix::{take, take_rows, vstack, Projection};
use super::{BaselineTable, Category, ObservableMut, ObservableRef, ObservableTable};
use crate::constants::{Meter, Micron, MJD};
use crate::error_filter::Observable;
use crate::station::Baseline;

#[derive(Debug, Clone, PartialEq)]
pub struct VisTable {
    /// Station pair; `None` for the collapsed `"all"` table.
    pub baseline: Option<Baseline>,
    pub mjd: Vec<MJD>,
    pub u: Vec<Meter>,
    pub v: Vec<Meter>,
    pub amp: DMatrix<f64>,
    pub eamp: DMatrix<f64>,
    pub phi: DMatrix<f64>,
    pub ephi: DMatrix<f64>,
    pub flag: DMatrix<bool>,
    pub u_wl: DMatrix<f64>,
    pub v_wl: DMatrix<f64>,
    pub b_wl: DMatrix<f64>,
    pub pa: DMatrix<f64>,
    pub fabricated: Vec<bool>,
    pub row_sources: Vec<String>,
}

impl VisTable {
    /// Table from raw columns; derived quantities are zero until
    /// [`ObservableTable::update_derived`] runs.
    pub fn from_raw(
        baseline: Baseline,
        mjd: Vec<MJD>,
        u: Vec<Meter>,
        v: Vec<Meter>,
        amp: DMatrix<f64>,
        eamp: DMatrix<f64>,
        phi: DMatrix<f64>,
        ephi: DMatrix<f64>,
        flag: DMatrix<bool>,
    ) -> Self {
        let n = mjd.len();
        let projection = Projection::empty(n, amp.ncols());
        VisTable {
            row_sources: vec![baseline.name(); n],
            baseline: Some(baseline),
            mjd,
            u,
            v,
            amp,
            eamp,
            phi,
            ephi,
            flag,
            u_wl: projection.u_wl,
            v_wl: projection.v_wl,
            b_wl: projection.b_wl,
            pa: projection.pa,
            fabricated: vec![false; n],
        }
    }
}

impl ObservableTable for VisTable {
    const CATEGORY: Category = Category::Vis;

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
                observable: Observable::VisAmp,
                values: &self.amp,
                errors: &self.eamp,
            },
            ObservableRef {
                observable: Observable::VisPhi,
                values: &self.phi,
                errors: &self.ephi,
            },
        ]
    }

    fn observables_mut(&mut self) -> (Vec<ObservableMut<'_>>, &mut DMatrix<bool>) {
        (
            vec![
                ObservableMut {
                    observable: Observable::VisAmp,
                    values: &mut self.amp,
                    errors: &mut self.eamp,
                },
                ObservableMut {
                    observable: Observable::VisPhi,
                    values: &mut self.phi,
                    errors: &mut self.ephi,
                },
            ],
            &mut self.flag,
        )
    }

    fn append(&mut self, other: &Self) {
        self.mjd.extend_from_slice(&other.mjd);
        self.u.extend_from_slice(&other.u);
        self.v.extend_from_slice(&other.v);
        self.fabricated.extend_from_slice(&other.fabricated);
        self.row_sources.extend_from_slice(&other.row_sources);
        self.amp = vstack(&self.amp, &other.amp);
        self.eamp = vstack(&self.eamp, &other.eamp);
        self.phi = vstack(&self.phi, &other.phi);
        self.ephi = vstack(&self.ephi, &other.ephi);
        self.flag = vstack(&self.flag, &other.flag);
        self.u_wl = vstack(&self.u_wl, &other.u_wl);
        self.v_wl = vstack(&self.v_wl, &other.v_wl);
        self.b_wl = vstack(&self.b_wl, &other.b_wl);
        self.pa = vstack(&self.pa, &other.pa);
    }

    fn select_rows(&self, rows: &[usize]) -> Self {
        VisTable {
            baseline: self.baseline.clone(),
            mjd: take(&self.mjd, rows),
            u: take(&self.u, rows),
            v: take(&self.v, rows),
            amp: take_rows(&self.amp, rows),
            eamp: take_rows(&self.eamp, rows),
            phi: take_rows(&self.phi, rows),
            ephi: take_rows(&self.ephi, rows),
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
            ("|V|", self.amp.shape()),
            ("E|V|", self.eamp.shape()),
            ("PHI", self.phi.shape()),
            ("EPHI", self.ephi.shape()),
            ("FLAG", self.flag.shape()),
            ("u/wl", self.u_wl.shape()),
            ("v/wl", self.v_wl.shape()),
            ("B/wl", self.b_wl.shape()),
            ("PA", self.pa.shape()),
        ]
    }
}

impl BaselineTable for VisTable {
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
        VisTable {
            baseline: None,
            mjd: mjd.to_vec(),
            u: u.to_vec(),
            v: v.to_vec(),
            amp: DMatrix::from_element(n, m, value),
            eamp: DMatrix::from_element(n, m, error),
            phi: DMatrix::from_element(n, m, value),
            ephi: DMatrix::from_element(n, m, error),
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

#[cfg(test)]
mod test_vis {
    use super::*;
    use crate::station::StationId;

    fn table() -> VisTable {
        let mut t = VisTable::from_raw(
            Baseline::new(StationId::new("K0"), StationId::new("G2")),
            vec![60000.1, 60000.2],
            vec![30.0, 0.0],
            vec![40.0, 10.0],
            DMatrix::from_element(2, 3, 0.8),
            DMatrix::from_element(2, 3, 0.02),
            DMatrix::from_element(2, 3, 5.0),
            DMatrix::from_element(2, 3, 1.0),
            DMatrix::from_element(2, 3, false),
        );
        t.update_derived(&[2.0, 2.1, 2.2]);
        t
    }

    #[test]
    fn test_derived_quantities() {
        let t = table();
        assert_eq!(t.b_wl[(0, 0)], 25.0);
        assert_eq!(t.u_wl[(0, 0)], 15.0);
        assert_eq!(t.row_sources, vec!["K0G2", "K0G2"]);
        assert!(t.check_shape(3).is_ok());
    }

    #[test]
    fn test_select_and_append() {
        let mut t = table();
        let last = t.select_rows(&[1]);
        assert_eq!(last.mjd, vec![60000.2]);
        t.append(&last);
        assert_eq!(t.n_rows(), 3);
        assert_eq!(t.phi.nrows(), 3);
        assert!(t.check_shape(3).is_ok());
    }

    #[test]
    fn test_unit_fill() {
        let t = VisTable::filled("K0G2", &[1.0], &[3.0], &[4.0], &[2.0], 1.0, 1.0);
        assert_eq!(t.amp[(0, 0)], 1.0);
        assert_eq!(t.phi[(0, 0)], 1.0);
        assert!(t.flag[(0, 0)]);
        assert_eq!(t.fabricated, vec![true]);
        assert_eq!(t.baseline(), None);
    }
}
