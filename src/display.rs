//! Summary display of a [`Dataset`].
//!
//! The compact form is the one-line summary logged after each load:
//!
//! ```text
//! a.fits | PIONIER "HD1" | MJD: 2 [60000.1 .. 60000.2] | A0-G1-J2 | WL: 3 [1.600 .. 1.800] um (R~30) | OI_VIS2: 3, OI_T3: 1 | TELLURICS: false
//! ```
//!
//! The alternate form (`{:#}`) lists the same information one item per line, plus the tables
//! and the warnings raised while building the dataset.
use std::fmt;

use itertools::Itertools;

use crate::dataset::Dataset;
use crate::tables::ObservableTable;

impl Dataset {
    /// Mean spectral resolution `wl/dwl` over the channels where it is finite.
    pub fn resolution(&self) -> f64 {
        let (sum, n) = self
            .wavelengths
            .iter()
            .zip(&self.bandwidths)
            .map(|(w, b)| w / b)
            .filter(|r| r.is_finite())
            .fold((0.0, 0usize), |(s, n), r| (s + r, n + 1));
        if n == 0 {
            f64::NAN
        } else {
            sum / n as f64
        }
    }

    fn has_tellurics(&self) -> bool {
        self.telluric.iter().any(|&t| t < 1.0)
    }

    fn epoch_range(&self) -> (usize, f64, f64) {
        let epochs = self.epochs();
        (
            epochs.len(),
            epochs.first().copied().unwrap_or(f64::NAN),
            epochs.last().copied().unwrap_or(f64::NAN),
        )
    }

    fn wavelength_range(&self) -> (f64, f64) {
        (
            self.wavelengths.first().copied().unwrap_or(f64::NAN),
            self.wavelengths.last().copied().unwrap_or(f64::NAN),
        )
    }
}

impl fmt::Display for Dataset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (n_epochs, mjd_min, mjd_max) = self.epoch_range();
        let (wl_min, wl_max) = self.wavelength_range();
        let counts = self
            .table_counts()
            .iter()
            .map(|(category, n)| format!("{category}: {n}"))
            .join(", ");

        if f.alternate() {
            writeln!(f, "Dataset")?;
            writeln!(f, "-------")?;
            writeln!(f, "  files       : {}", self.file_label())?;
            writeln!(f, "  instrument  : {}", self.instrument)?;
            writeln!(f, "  target      : {}", self.target)?;
            if !self.pipeline.is_empty() {
                writeln!(f, "  pipeline    : {}", self.pipeline)?;
            }

            writeln!(f, "\n[Epochs]")?;
            writeln!(f, "  {n_epochs} epoch(s) in [{mjd_min} .. {mjd_max}]")?;

            writeln!(f, "\n[Spectral setup]")?;
            writeln!(
                f,
                "  {} channel(s) in [{wl_min:.4} .. {wl_max:.4}] um, R~{:.0}",
                self.n_channels(),
                self.resolution()
            )?;
            if let Some(b) = self.binning {
                writeln!(f, "  binned by x{b}")?;
            }
            writeln!(f, "  tellurics applied: {}", self.has_tellurics())?;

            writeln!(f, "\n[Tables]")?;
            for (name, t) in &self.flux {
                writeln!(f, "  {:<8} {name:<10} {} row(s)", "OI_FLUX", t.n_rows())?;
            }
            for (name, t) in &self.vis {
                writeln!(f, "  {:<8} {name:<10} {} row(s)", "OI_VIS", t.n_rows())?;
            }
            for (name, t) in &self.vis2 {
                writeln!(f, "  {:<8} {name:<10} {} row(s)", "OI_VIS2", t.n_rows())?;
            }
            for (name, t) in &self.t3 {
                writeln!(f, "  {:<8} {name:<10} {} row(s)", "OI_T3", t.n_rows())?;
            }

            if !self.warnings.is_empty() {
                writeln!(f, "\n[Warnings]")?;
                for w in &self.warnings {
                    writeln!(f, "  {w}")?;
                }
            }
            Ok(())
        } else {
            write!(
                f,
                "{} | {} \"{}\" | MJD: {n_epochs} [{mjd_min} .. {mjd_max}] | {} | WL: {} [{wl_min:.3} .. {wl_max:.3}] um (R~{:.0}) ",
                self.file_label(),
                self.instrument,
                self.target,
                self.telescopes.join("-"),
                self.n_channels(),
                self.resolution(),
            )?;
            if let Some(b) = self.binning {
                write!(f, "(binned by x{b}) ")?;
            }
            write!(f, "| {counts} | TELLURICS: {}", self.has_tellurics())
        }
    }
}
