//! # Normalized dataset
//!
//! A [`Dataset`] holds the data of one file (or of several merged files) for one instrument
//! setup: the wavelength grid, the telluric transmission, and one table per station, baseline
//! or triangle in each observable category.
//!
//! ## Layout
//!
//! ```text
//! Dataset
//! ├── wavelengths, bandwidths, telluric      one value per channel (µm)
//! ├── flux : name → FluxTable                "U1", "A0", ...
//! ├── vis  : name → VisTable                 "U1U2", ...
//! ├── vis2 : name → Vis2Table                "U1U2", ...
//! ├── t3   : name → T3Table                  "U1U2U3", ... (each with its closure formula)
//! └── configurations : MJD → {names}         which tables hold data at each epoch
//! ```
//!
//! The *reference category* of a dataset is `OI_VIS` when it holds any visibility table, and
//! `OI_VIS2` otherwise. Closure formulas index the baseline tables of that category, and the
//! baseline name list comes from it.
//!
//! After [`collapse`](crate::collapse::collapse), every map holds a single `"all"` table and the
//! name lists are `["all"]`.
//!
//! ## Lifecycle
//!
//! Datasets are produced by [`load_file`](crate::ingest::load_file), optionally transformed in
//! place, then consumed by [`merge`](crate::merge::merge), which deep-copies them.
use std::collections::{BTreeMap, BTreeSet};

use camino::Utf8PathBuf;
use itertools::Itertools;
use ordered_float::OrderedFloat;

use crate::constants::{ConfigurationsPerEpoch, Micron, ALL, MJD};
use crate::environment::LabEnvironment;
use crate::error_filter::{apply_error_filter, ErrorFilterConfig};
use crate::oifits_errors::{OifitsError, OifitsWarning};
use crate::reader::Header;
use crate::tables::{BaselineTable, ObservableTable};

pub use crate::tables::{Category, FluxTable, T3Table, Vis2Table, VisTable};

/// Run `$body` for every table of `$dataset`, whatever its category.
macro_rules! for_each_table {
    ($dataset:expr, |$name:pat_param, $table:ident| $body:block) => {{
        for ($name, $table) in $dataset.flux.iter_mut() $body
        for ($name, $table) in $dataset.vis.iter_mut() $body
        for ($name, $table) in $dataset.vis2.iter_mut() $body
        for ($name, $table) in $dataset.t3.iter_mut() $body
    }};
}
pub(crate) use for_each_table;

/// Instrument and exact wavelength grid: datasets with equal signatures can be merged.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SetupSignature {
    pub instrument: String,
    grid_bits: Vec<u64>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dataset {
    /// Source files, in merge order.
    pub files: Vec<Utf8PathBuf>,
    pub instrument: String,
    pub target: String,
    /// `ESO PRO REC1 PIPE ID`, empty when absent.
    pub pipeline: String,
    /// Channel centres (µm).
    pub wavelengths: Vec<Micron>,
    /// Channel widths (µm).
    pub bandwidths: Vec<Micron>,
    /// Binning factor applied at load time.
    pub binning: Option<usize>,
    /// Telluric transmission per channel, ones when unknown.
    pub telluric: Vec<f64>,
    pub flux: BTreeMap<String, FluxTable>,
    pub vis: BTreeMap<String, VisTable>,
    pub vis2: BTreeMap<String, Vis2Table>,
    pub t3: BTreeMap<String, T3Table>,
    pub configurations: ConfigurationsPerEpoch,
    pub telescopes: Vec<String>,
    pub baselines: Vec<String>,
    pub triangles: Vec<String>,
    /// Primary header, kept on request.
    pub header: Option<Header>,
    pub environment: Option<LabEnvironment>,
    /// Error and flag rules applied at merge time.
    pub error_filter: Option<ErrorFilterConfig>,
    pub warnings: Vec<OifitsWarning>,
}

impl Dataset {
    /// Empty dataset on a wavelength grid, with unit tellurics.
    pub fn new(
        instrument: impl Into<String>,
        target: impl Into<String>,
        wavelengths: Vec<Micron>,
        bandwidths: Vec<Micron>,
    ) -> Self {
        Dataset {
            instrument: instrument.into(),
            target: target.into(),
            telluric: vec![1.0; wavelengths.len()],
            wavelengths,
            bandwidths,
            ..Default::default()
        }
    }

    pub fn n_channels(&self) -> usize {
        self.wavelengths.len()
    }

    /// Source files joined with `;`.
    pub fn file_label(&self) -> String {
        self.files.iter().map(|f| f.as_str()).join(";")
    }

    pub fn setup_signature(&self) -> SetupSignature {
        SetupSignature {
            instrument: self.instrument.clone(),
            grid_bits: self.wavelengths.iter().map(|w| w.to_bits()).collect(),
        }
    }

    /// Baseline category indexed by the closure formulas.
    pub fn reference_category(&self) -> Category {
        if self.vis.is_empty() {
            Category::Vis2
        } else {
            Category::Vis
        }
    }

    /// Number of tables per non-empty category.
    pub fn table_counts(&self) -> BTreeMap<Category, usize> {
        [
            (Category::Flux, self.flux.len()),
            (Category::Vis, self.vis.len()),
            (Category::Vis2, self.vis2.len()),
            (Category::T3, self.t3.len()),
        ]
        .into_iter()
        .filter(|&(_, n)| n > 0)
        .collect()
    }

    /// Sorted distinct epochs over every table.
    pub fn epochs(&self) -> Vec<MJD> {
        let mut all = BTreeSet::new();
        let mut push = |mjd: &[MJD]| all.extend(mjd.iter().copied().map(OrderedFloat));
        self.flux.values().for_each(|t| push(&t.mjd));
        self.vis.values().for_each(|t| push(&t.mjd));
        self.vis2.values().for_each(|t| push(&t.mjd));
        self.t3.values().for_each(|t| push(&t.mjd));
        all.into_iter().map(|e| e.0).collect()
    }

    /// `true` once [`collapse`](crate::collapse::collapse) has run.
    pub fn is_collapsed(&self) -> bool {
        self.baselines.len() == 1 && self.baselines[0] == ALL
    }

    /// Rebuild the telescope, baseline and triangle name lists from the tables.
    ///
    /// Telescopes come from the flux tables when there are any, from the stations of the
    /// reference baseline tables otherwise.
    pub fn refresh_names(&mut self) {
        if self.is_collapsed() {
            return;
        }
        let baselines: Vec<(&String, Option<&crate::station::Baseline>)> =
            match self.reference_category() {
                Category::Vis => self.vis.iter().map(|(k, t)| (k, t.baseline())).collect(),
                _ => self.vis2.iter().map(|(k, t)| (k, t.baseline())).collect(),
            };
        self.telescopes = if self.flux.is_empty() {
            baselines
                .iter()
                .filter_map(|(_, b)| *b)
                .flat_map(|b| b.stations())
                .map(|s| s.to_string())
                .sorted()
                .dedup()
                .collect()
        } else {
            self.flux.keys().cloned().collect()
        };
        self.baselines = baselines.iter().map(|(k, _)| (*k).clone()).collect();
        self.triangles = self.t3.keys().cloned().collect();
    }

    /// Rebuild the epoch → table names index from the tables.
    pub fn index_configurations(&mut self) {
        let mut index = ConfigurationsPerEpoch::new();
        let mut add = |name: &String, mjd: &[MJD]| {
            for &e in mjd {
                index.entry(OrderedFloat(e)).or_default().insert(name.clone());
            }
        };
        self.flux.iter().for_each(|(k, t)| add(k, &t.mjd));
        self.vis.iter().for_each(|(k, t)| add(k, &t.mjd));
        self.vis2.iter().for_each(|(k, t)| add(k, &t.mjd));
        self.t3.iter().for_each(|(k, t)| add(k, &t.mjd));
        self.configurations = index;
    }

    /// Verify the shape invariant of every table, and the length of the per-channel vectors.
    ///
    /// Return
    /// ----------
    /// * `Err(OifitsError::Format)` naming the first offending table or vector.
    pub fn check_shapes(&self) -> Result<(), OifitsError> {
        let n = self.n_channels();
        for (what, len) in [
            ("bandwidths", self.bandwidths.len()),
            ("telluric", self.telluric.len()),
        ] {
            if len != n {
                return Err(OifitsError::Format(format!(
                    "{what} has {len} channels, expected {n}"
                )));
            }
        }
        let named = |name: &String, e: OifitsError| match e {
            OifitsError::Format(msg) => OifitsError::Format(format!("{name}: {msg}")),
            other => other,
        };
        for (name, t) in &self.flux {
            t.check_shape(n).map_err(|e| named(name, e))?;
        }
        for (name, t) in &self.vis {
            t.check_shape(n).map_err(|e| named(name, e))?;
        }
        for (name, t) in &self.vis2 {
            t.check_shape(n).map_err(|e| named(name, e))?;
        }
        for (name, t) in &self.t3 {
            t.check_shape(n).map_err(|e| named(name, e))?;
            if let Some(formula) = &t.formula {
                if formula.rows().iter().any(|r| r.len() != t.n_rows()) {
                    return Err(OifitsError::Format(format!(
                        "{name}: closure formula does not cover {} rows",
                        t.n_rows()
                    )));
                }
            }
        }
        Ok(())
    }

    /// Recompute the derived per-channel quantities of every table on the current grid.
    pub fn update_derived(&mut self) {
        let wl = self.wavelengths.clone();
        for_each_table!(self, |_, t| {
            t.update_derived(&wl);
        });
    }

    /// OR the non-finite checks into every flag mask.
    pub fn refresh_flags(&mut self) {
        for_each_table!(self, |_, t| {
            t.refresh_flags();
        });
    }

    /// Divide every flux table by the telluric transmission, keeping the raw flux.
    pub fn apply_telluric(&mut self) {
        for t in self.flux.values_mut() {
            t.apply_telluric(&self.telluric);
        }
    }

    /// Median-filter every table (see [`ObservableTable::median_filter`]).
    pub fn median_filter(&mut self, width: usize) {
        let telluric = self.telluric.clone();
        for_each_table!(self, |_, t| {
            t.median_filter(width, &telluric);
        });
    }

    /// Apply `config` to every table, in place.
    pub fn apply_error_filter(&mut self, config: &ErrorFilterConfig) {
        for_each_table!(self, |_, t| {
            apply_error_filter(t, config);
        });
    }

    /// Rebuild every closure formula against the reference baseline tables, fabricating
    /// missing baselines and epochs there.
    pub fn reconcile_closures(&mut self) {
        if self.t3.is_empty() {
            return;
        }
        let wl = self.wavelengths.clone();
        let formulas = match self.reference_category() {
            Category::Vis => {
                crate::closure::reconcile_closures(&self.t3, &mut self.vis, &wl, &mut self.warnings)
            }
            _ => crate::closure::reconcile_closures(
                &self.t3,
                &mut self.vis2,
                &wl,
                &mut self.warnings,
            ),
        };
        for (name, formula) in formulas {
            if let Some(t) = self.t3.get_mut(&name) {
                t.formula = Some(crate::tables::Formula::Triangle(formula));
            }
        }
    }
}
