//! Flux table of one station (`OI_FLUX`).
use nalgebra::DMatrix;

use super::matrix::{take, take_rows, vstack};
use super::{Category, ObservableMut, ObservableRef, ObservableTable};
use crate::constants::{Micron, MJD};
use crate::error_filter::Observable;
use crate::station::StationId;

#[derive(Debug, Clone, PartialEq)]
pub struct FluxTable {
    /// Station; `None` for the collapsed `"all"` table.
    pub station: Option<StationId>,
    pub mjd: Vec<MJD>,
    /// Telluric-corrected flux.
    pub flux: DMatrix<f64>,
    pub eflux: DMatrix<f64>,
    pub flag: DMatrix<bool>,
    /// Flux before telluric correction.
    pub raw_flux: DMatrix<f64>,
    pub row_sources: Vec<String>,
}

impl FluxTable {
    pub fn from_raw(
        station: StationId,
        mjd: Vec<MJD>,
        flux: DMatrix<f64>,
        eflux: DMatrix<f64>,
        flag: DMatrix<bool>,
    ) -> Self {
        FluxTable {
            row_sources: vec![station.to_string(); mjd.len()],
            station: Some(station),
            mjd,
            raw_flux: flux.clone(),
            flux,
            eflux,
            flag,
        }
    }

    /// Keep the current flux as raw flux, then divide the flux by `telluric` channel-wise.
    pub fn apply_telluric(&mut self, telluric: &[f64]) {
        self.raw_flux = self.flux.clone();
        let (rows, cols) = self.flux.shape();
        for j in 0..cols {
            for i in 0..rows {
                self.flux[(i, j)] /= telluric[j];
            }
        }
    }
}

impl ObservableTable for FluxTable {
    const CATEGORY: Category = Category::Flux;
    const WEIGHTED_REBIN: bool = false;
    const TELLURIC_SCALED: bool = true;

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
            observable: Observable::Flux,
            values: &self.flux,
            errors: &self.eflux,
        }]
    }

    fn observables_mut(&mut self) -> (Vec<ObservableMut<'_>>, &mut DMatrix<bool>) {
        (
            vec![ObservableMut {
                observable: Observable::Flux,
                values: &mut self.flux,
                errors: &mut self.eflux,
            }],
            &mut self.flag,
        )
    }

    fn auxiliary_channels_mut(&mut self) -> Vec<&mut DMatrix<f64>> {
        vec![&mut self.raw_flux]
    }

    fn mean_flux(&self) -> Option<f64> {
        let (sum, n) = self
            .flux
            .iter()
            .filter(|x| x.is_finite())
            .fold((0.0, 0usize), |(s, n), x| (s + x, n + 1));
        (n > 0).then(|| sum / n as f64)
    }

    fn append(&mut self, other: &Self) {
        self.mjd.extend_from_slice(&other.mjd);
        self.row_sources.extend_from_slice(&other.row_sources);
        self.flux = vstack(&self.flux, &other.flux);
        self.eflux = vstack(&self.eflux, &other.eflux);
        self.flag = vstack(&self.flag, &other.flag);
        self.raw_flux = vstack(&self.raw_flux, &other.raw_flux);
    }

    fn select_rows(&self, rows: &[usize]) -> Self {
        FluxTable {
            station: self.station.clone(),
            mjd: take(&self.mjd, rows),
            flux: take_rows(&self.flux, rows),
            eflux: take_rows(&self.eflux, rows),
            flag: take_rows(&self.flag, rows),
            raw_flux: take_rows(&self.raw_flux, rows),
            row_sources: take(&self.row_sources, rows),
        }
    }

    fn update_derived(&mut self, _wl: &[Micron]) {}

    fn row_vector_lengths(&self) -> Vec<(&'static str, usize)> {
        vec![("MJD", self.mjd.len()), ("NAME", self.row_sources.len())]
    }

    fn matrix_shapes(&self) -> Vec<(&'static str, (usize, usize))> {
        vec![
            ("FLUX", self.flux.shape()),
            ("EFLUX", self.eflux.shape()),
            ("FLAG", self.flag.shape()),
            ("RFLUX", self.raw_flux.shape()),
        ]
    }
}

#[cfg(test)]
mod test_flux {
    use super::*;
    use approx::assert_relative_eq;

    fn table() -> FluxTable {
        FluxTable::from_raw(
            StationId::new("U1"),
            vec![1.0, 2.0],
            DMatrix::from_row_slice(2, 2, &[10.0, 20.0, 30.0, 40.0]),
            DMatrix::from_element(2, 2, 1.0),
            DMatrix::from_element(2, 2, false),
        )
    }

    #[test]
    fn test_telluric_keeps_raw_flux() {
        let mut t = table();
        t.apply_telluric(&[0.5, 1.0]);
        assert_eq!(t.flux[(0, 0)], 20.0);
        assert_eq!(t.flux[(1, 1)], 40.0);
        assert_eq!(t.raw_flux[(0, 0)], 10.0);
        assert!(t.check_shape(2).is_ok());
    }

    #[test]
    fn test_mean_flux_ignores_non_finite() {
        let mut t = table();
        t.flux[(1, 1)] = f64::NAN;
        assert_relative_eq!(t.mean_flux().unwrap(), 20.0);

        t.flux.fill(f64::INFINITY);
        assert_eq!(t.mean_flux(), None);
    }

    #[test]
    fn test_unweighted_rebin_carries_raw_flux() {
        let mut t = table();
        t.rebin(&[1.5], &[1.0, 2.0]).unwrap();
        assert_eq!(t.flux.shape(), (2, 1));
        assert_eq!(t.raw_flux.shape(), (2, 1));
        assert_relative_eq!(t.flux[(0, 0)], 15.0, epsilon = 1e-12);
        assert!(t.check_shape(1).is_ok());
    }

    #[test]
    fn test_median_filter_divides_by_telluric() {
        let mut t = FluxTable::from_raw(
            StationId::new("U1"),
            vec![1.0],
            DMatrix::from_row_slice(1, 3, &[2.0, 4.0, 6.0]),
            DMatrix::from_element(1, 3, 3.0),
            DMatrix::from_element(1, 3, false),
        );
        t.median_filter(3, &[2.0, 2.0, 2.0]);
        // corrected signal [1, 2, 3] -> median [1, 2, 2] -> rescaled
        assert_eq!(t.flux, DMatrix::from_row_slice(1, 3, &[2.0, 4.0, 4.0]));
        assert_relative_eq!(t.eflux[(0, 1)], 3.0 / 3f64.sqrt());
    }
}
