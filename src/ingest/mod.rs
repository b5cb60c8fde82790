//! # Ingestion
//!
//! Turns the raw extensions of an OIFITS file into one normalized [`Dataset`] per instrument.
//!
//! ## Overview
//!
//! [`load_file`] runs the following steps for one file:
//!
//! 1. read every extension through the [`OiFileReader`] collaborator,
//! 2. resolve the target (`OI_TARGET`) and the instrument(s) (`OI_WAVELENGTH`). A target name
//!    listed with several `TARGET_ID`s selects the rows of all of them,
//! 3. build the wavelength grid (µm), and a uniform binned grid when binning is requested,
//! 4. group the rows of every `OI_FLUX`, `OI_VIS`, `OI_VIS2` and `OI_T3` extension by station,
//!    baseline or triangle, accumulating rows of the same name across extensions, and refresh
//!    the flags and derived quantities after each accumulation,
//! 5. rebin every table onto the binned grid,
//! 6. reconcile the closure triangles against the baseline tables,
//! 7. apply the telluric correction to the flux tables,
//! 8. median-filter every table when requested,
//! 9. index the epochs.
//!
//! Without an instrument in the [`LoadOptions`], a file with several instruments yields one
//! dataset per instrument.
//!
//! ## Failures
//!
//! | Condition | Outcome |
//! |---|---|
//! | unknown or ambiguous target/instrument | `OifitsError::Configuration` |
//! | missing `OI_TARGET`, `OI_WAVELENGTH`, column or array | `OifitsError::Format` |
//! | extension without rows for the target | `OifitsWarning::DataAbsent`, extension skipped |
//!
//! [`load_files`] isolates the failures of each file: a batch of `N` files with `k` failures
//! returns the datasets of the `N - k` others and the `k` errors.
pub mod options;

use std::collections::BTreeMap;

use camino::{Utf8Path, Utf8PathBuf};
use itertools::Itertools;
use log::{debug, info, warn};
use smallvec::SmallVec;

use crate::constants::{FastHashMap, Micron, METER_TO_MICRON, MJD};
use crate::dataset::{for_each_table, Dataset};
use crate::environment::LabEnvironment;
use crate::oifits_errors::{OifitsError, OifitsWarning};
use crate::reader::{Extension, ExtensionKind, OiFileReader, RecordTable};
use crate::rebin::{bin_vector, interpolate, uniform_grid};
use crate::station::{Baseline, StationId, Triangle};
use crate::tables::matrix::take;
use crate::tables::{FluxTable, ObservableTable, T3Table, Vis2Table, VisTable};

pub use options::{LoadOptions, LoadOptionsBuilder};

/// Primary-header key of the ESO pipeline identifier.
const PIPELINE_KEY: &str = "ESO PRO REC1 PIPE ID";

/// Stations of one record: 1 for flux, 2 for a baseline, 3 for a triangle.
type Stations = SmallVec<[StationId; 3]>;

/// `STA_INDEX → station` of one `OI_ARRAY`.
type StationMap = FastHashMap<i64, StationId>;

/// Result of a multi-file load.
#[derive(Debug, Default)]
pub struct BatchLoad {
    pub datasets: Vec<Dataset>,
    /// Files that could not be loaded, with the reason.
    pub failures: Vec<(Utf8PathBuf, OifitsError)>,
}

impl BatchLoad {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Load every file of `paths`, isolating failures per file.
///
/// Arguments
/// -----------------
/// * `reader`: The file-reading collaborator.
/// * `paths`: Files to load, in order.
/// * `options`: Load options shared by every file.
///
/// Return
/// ----------
/// * A [`BatchLoad`] with the datasets of the files that loaded, in order, and one failure per
///   file that did not.
///
/// See also
/// ------------
/// * [`load_file`] – Single-file load.
pub fn load_files<R, P>(reader: &R, paths: &[P], options: &LoadOptions) -> BatchLoad
where
    R: OiFileReader + ?Sized,
    P: AsRef<Utf8Path>,
{
    let mut batch = BatchLoad::default();
    for path in paths {
        let path = path.as_ref();
        match load_file(reader, path, options) {
            Ok(datasets) => batch.datasets.extend(datasets),
            Err(e) => {
                warn!("skipping {path}: {e}");
                batch.failures.push((path.to_path_buf(), e));
            }
        }
    }
    batch
}

/// Load one file.
///
/// Arguments
/// -----------------
/// * `reader`: The file-reading collaborator.
/// * `path`: File to load.
/// * `options`: Instrument/target selection and processing options.
///
/// Return
/// ----------
/// * One dataset per loaded instrument: a single one when `options.instrument` is set or the
///   file holds a single instrument.
/// * `Err(OifitsError::Configuration)` when the target or instrument cannot be resolved.
/// * `Err(OifitsError::Format)` when a required extension, column or array is missing.
///
/// See also
/// ------------
/// * [`load_files`] – Batch load with per-file failure isolation.
pub fn load_file<R>(
    reader: &R,
    path: &Utf8Path,
    options: &LoadOptions,
) -> Result<Vec<Dataset>, OifitsError>
where
    R: OiFileReader + ?Sized,
{
    let extensions = reader.read_extensions(path)?;
    let targets = read_targets(&extensions)?;
    let (target, aliases) = resolve_target(&targets, options.target.as_deref())?;

    let instruments = read_instruments(&extensions);
    let selected: Vec<&str> = match options.instrument.as_deref() {
        Some(name) if instruments.iter().any(|i| i == name) => vec![name],
        Some(name) => {
            return Err(OifitsError::Configuration(format!(
                "unknown instrument \"{name}\", should be in [{}]",
                quoted(&instruments)
            )))
        }
        None if instruments.is_empty() => {
            return Err(OifitsError::Format(format!(
                "{path}: no OI_WAVELENGTH extension"
            )))
        }
        None => {
            if instruments.len() > 1 {
                info!(
                    "{path}: instrument not specified, loading [{}]",
                    quoted(&instruments)
                );
            }
            instruments.iter().map(String::as_str).collect()
        }
    };

    let arrays = read_arrays(&extensions)?;
    selected
        .into_iter()
        .map(|instrument| {
            let ingestor = Ingestor {
                path,
                extensions: &extensions,
                instrument,
                target,
                aliases,
                arrays: &arrays,
            };
            ingestor.run(&options.for_instrument(instrument))
        })
        .collect()
}

fn quoted(names: &[String]) -> String {
    names.iter().map(|n| format!("\"{n}\"")).join(", ")
}

/// `TARGET → [TARGET_ID, ...]`; a name listed several times gathers all its ids.
fn read_targets(extensions: &[Extension]) -> Result<BTreeMap<String, Vec<i64>>, OifitsError> {
    let ext = extensions
        .iter()
        .find(|e| e.kind() == ExtensionKind::Target)
        .ok_or_else(|| OifitsError::Format("no OI_TARGET extension".into()))?;
    let names = ext.table.strings("TARGET")?;
    let ids = ext.table.integers("TARGET_ID")?;
    let mut targets: BTreeMap<String, Vec<i64>> = BTreeMap::new();
    for (name, id) in names.into_iter().zip(ids) {
        targets.entry(name).or_default().push(id);
    }
    Ok(targets)
}

fn resolve_target<'a>(
    targets: &'a BTreeMap<String, Vec<i64>>,
    requested: Option<&str>,
) -> Result<(&'a str, &'a [i64]), OifitsError> {
    let known = || quoted(&targets.keys().cloned().collect::<Vec<_>>());
    match requested {
        Some(name) => targets
            .get_key_value(name)
            .map(|(k, ids)| (k.as_str(), ids.as_slice()))
            .ok_or_else(|| {
                OifitsError::Configuration(format!(
                    "unknown target \"{name}\", should be in [{}]",
                    known()
                ))
            }),
        None if targets.len() == 1 => targets
            .iter()
            .next()
            .map(|(k, ids)| (k.as_str(), ids.as_slice()))
            .ok_or_else(|| OifitsError::Configuration("no target".into())),
        None => Err(OifitsError::Configuration(format!(
            "target not specified, should be in [{}]",
            known()
        ))),
    }
}

/// Instrument names of the wavelength tables, in file order.
fn read_instruments(extensions: &[Extension]) -> Vec<String> {
    extensions
        .iter()
        .filter(|e| e.kind() == ExtensionKind::Wavelength)
        .filter_map(|e| e.insname().map(str::to_string))
        .unique()
        .collect()
}

fn read_arrays(extensions: &[Extension]) -> Result<FastHashMap<String, StationMap>, OifitsError> {
    let mut arrays = FastHashMap::default();
    for ext in extensions.iter().filter(|e| e.kind() == ExtensionKind::Array) {
        let indices = ext.table.integers("STA_INDEX")?;
        let names = ext.table.strings("STA_NAME")?;
        let map: StationMap = indices
            .into_iter()
            .zip(names.into_iter().map(StationId::new))
            .collect();
        arrays.insert(ext.arrname().unwrap_or_default().to_string(), map);
    }
    Ok(arrays)
}

/// Prefix format errors with the extension they come from.
fn in_extension(label: &str) -> impl Fn(OifitsError) -> OifitsError + '_ {
    move |e| match e {
        OifitsError::Format(msg) => OifitsError::Format(format!("{label}: {msg}")),
        other => other,
    }
}

/// Rows of `rows` grouped by station tuple, groups and rows in order of first appearance.
fn group_rows(stations: &[Stations], rows: &[usize]) -> Vec<(Stations, Vec<usize>)> {
    let mut index: FastHashMap<&[StationId], usize> = FastHashMap::default();
    let mut groups: Vec<(Stations, Vec<usize>)> = Vec::new();
    for &r in rows {
        let slot = *index.entry(stations[r].as_slice()).or_insert_with(|| {
            groups.push((stations[r].clone(), Vec::new()));
            groups.len() - 1
        });
        groups[slot].1.push(r);
    }
    groups
}

fn name_of(stations: &[StationId]) -> String {
    stations.iter().map(StationId::as_str).collect()
}

/// Per-row scalar column restricted to `rows`.
fn scalars_at(table: &RecordTable, name: &str, rows: &[usize]) -> Result<Vec<f64>, OifitsError> {
    Ok(take(&table.scalars(name)?, rows))
}

/// Append `table` to the table `name` of `map` (or insert it), then refresh its flags and
/// derived quantities on the raw grid.
fn accumulate<T: ObservableTable>(
    map: &mut BTreeMap<String, T>,
    name: String,
    table: T,
    raw_grid: &[Micron],
) -> Result<(), OifitsError> {
    table.check_shape(raw_grid.len())?;
    let entry = match map.entry(name) {
        std::collections::btree_map::Entry::Occupied(e) => {
            let t = e.into_mut();
            t.append(&table);
            t
        }
        std::collections::btree_map::Entry::Vacant(e) => e.insert(table),
    };
    entry.update_derived(raw_grid);
    entry.refresh_flags();
    Ok(())
}

/// Ingestion of one instrument of one file.
struct Ingestor<'a> {
    path: &'a Utf8Path,
    extensions: &'a [Extension],
    instrument: &'a str,
    target: &'a str,
    aliases: &'a [i64],
    arrays: &'a FastHashMap<String, StationMap>,
}

impl Ingestor<'_> {
    fn run(&self, options: &LoadOptions) -> Result<Dataset, OifitsError> {
        let (raw_grid, raw_band) = self.wavelength_table()?;
        let (grid, band) = match options.binning {
            Some(b) => {
                let grid = uniform_grid(&raw_grid, b);
                let band = grid
                    .iter()
                    .map(|&w| b as f64 * interpolate(w, &raw_grid, &raw_band))
                    .collect();
                (grid, band)
            }
            None => (raw_grid.clone(), raw_band),
        };

        let mut ds = Dataset::new(self.instrument, self.target, grid, band);
        ds.files.push(self.path.to_path_buf());
        ds.binning = options.binning;

        let primary = self
            .extensions
            .first()
            .filter(|e| e.kind() == ExtensionKind::Primary)
            .map(|e| &e.header);
        ds.pipeline = primary
            .and_then(|h| h.get_str(PIPELINE_KEY))
            .unwrap_or_default()
            .to_string();
        if options.include_header {
            ds.header = primary.cloned();
        }
        ds.environment = primary.and_then(|h| LabEnvironment::from_header(h, &ds.wavelengths));

        let mut file_telluric = None;
        for (hdu, ext) in self.extensions.iter().enumerate() {
            let kind = ext.kind();
            if kind == ExtensionKind::Tellurics {
                file_telluric = Some(ext.table.scalars("TELL_TRANS")?);
                continue;
            }
            let is_data = matches!(
                kind,
                ExtensionKind::Flux | ExtensionKind::Vis | ExtensionKind::Vis2 | ExtensionKind::T3
            );
            if !is_data || ext.insname() != Some(self.instrument) {
                continue;
            }
            let label = format!("{} [HDU #{hdu}]", kind.extname());
            let rows = self.target_rows(ext).map_err(in_extension(&label))?;
            if rows.is_empty() {
                ds.warnings.push(
                    OifitsWarning::DataAbsent {
                        extension: kind.extname().to_string(),
                        hdu,
                        target: self.target.to_string(),
                    }
                    .logged(),
                );
                continue;
            }
            self.read_extension(&mut ds, ext, &kind, &rows, &raw_grid)
                .map_err(in_extension(&label))?;
            debug!("{label}: {} row(s) for \"{}\"", rows.len(), self.target);
        }

        if options.binning.is_some() {
            let grid = ds.wavelengths.clone();
            for_each_table!(ds, |_, t| {
                t.rebin(&grid, &raw_grid)?;
            });
            ds.update_derived();
            ds.refresh_flags();
        }

        ds.reconcile_closures();

        ds.telluric = self.telluric(options, file_telluric, &raw_grid, &ds.wavelengths)?;
        ds.apply_telluric();

        if let Some(width) = options.median_filter {
            ds.median_filter(width);
        }

        ds.index_configurations();
        ds.refresh_names();
        ds.error_filter = options.error_filter.clone();
        ds.check_shapes()?;

        info!("{ds}");
        Ok(ds)
    }

    /// `(EFF_WAVE, EFF_BAND)` of the instrument, in µm.
    fn wavelength_table(&self) -> Result<(Vec<Micron>, Vec<Micron>), OifitsError> {
        let ext = self
            .extensions
            .iter()
            .find(|e| e.kind() == ExtensionKind::Wavelength && e.insname() == Some(self.instrument))
            .ok_or_else(|| {
                OifitsError::Format(format!(
                    "no wavelength table for instrument \"{}\"",
                    self.instrument
                ))
            })?;
        let to_micron = |v: Vec<f64>| v.into_iter().map(|x| x * METER_TO_MICRON).collect();
        Ok((
            to_micron(ext.table.scalars("EFF_WAVE")?),
            to_micron(ext.table.scalars("EFF_BAND")?),
        ))
    }

    /// Rows whose `TARGET_ID` is one of the target aliases.
    fn target_rows(&self, ext: &Extension) -> Result<Vec<usize>, OifitsError> {
        Ok(ext
            .table
            .integers("TARGET_ID")?
            .iter()
            .positions(|id| self.aliases.contains(id))
            .collect())
    }

    /// Station tuple of every row of `ext`.
    fn stations(&self, ext: &Extension, expected: usize) -> Result<Vec<Stations>, OifitsError> {
        let array = match ext.arrname() {
            Some(name) => self.arrays.get(name),
            None if self.arrays.len() == 1 => self.arrays.values().next(),
            None => None,
        }
        .ok_or_else(|| {
            OifitsError::Format(format!(
                "unknown array \"{}\"",
                ext.arrname().unwrap_or_default()
            ))
        })?;
        ext.table
            .station_indices("STA_INDEX", expected)?
            .iter()
            .map(|indices| {
                indices
                    .iter()
                    .map(|i| {
                        array.get(i).cloned().ok_or_else(|| {
                            OifitsError::Format(format!("station index {i} not in array"))
                        })
                    })
                    .collect::<Result<Stations, OifitsError>>()
            })
            .collect()
    }

    fn read_extension(
        &self,
        ds: &mut Dataset,
        ext: &Extension,
        kind: &ExtensionKind,
        rows: &[usize],
        raw_grid: &[Micron],
    ) -> Result<(), OifitsError> {
        let t = &ext.table;
        let expected = match kind {
            ExtensionKind::Flux => 1,
            ExtensionKind::Vis | ExtensionKind::Vis2 => 2,
            _ => 3,
        };
        let stations = self.stations(ext, expected)?;
        let mjd_all = t.scalars("MJD")?;

        for (group, rows) in group_rows(&stations, rows) {
            let name = name_of(&group);
            let mjd: Vec<MJD> = take(&mjd_all, &rows);
            let flag = t.bool_matrix("FLAG", &rows)?;
            match kind {
                ExtensionKind::Flux => {
                    // GRAVITY names the flux column FLUX instead of FLUXDATA
                    let column = if t.has_column("FLUXDATA") { "FLUXDATA" } else { "FLUX" };
                    let table = FluxTable::from_raw(
                        group[0].clone(),
                        mjd,
                        t.float_matrix(column, &rows)?,
                        t.float_matrix("FLUXERR", &rows)?,
                        flag,
                    );
                    accumulate(&mut ds.flux, name, table, raw_grid)?;
                }
                ExtensionKind::Vis2 => {
                    let table = Vis2Table::from_raw(
                        Baseline::new(group[0].clone(), group[1].clone()),
                        mjd,
                        scalars_at(t, "UCOORD", &rows)?,
                        scalars_at(t, "VCOORD", &rows)?,
                        t.float_matrix("VIS2DATA", &rows)?,
                        t.float_matrix("VIS2ERR", &rows)?,
                        flag,
                    );
                    accumulate(&mut ds.vis2, name, table, raw_grid)?;
                }
                ExtensionKind::Vis => {
                    let table = VisTable::from_raw(
                        Baseline::new(group[0].clone(), group[1].clone()),
                        mjd,
                        scalars_at(t, "UCOORD", &rows)?,
                        scalars_at(t, "VCOORD", &rows)?,
                        t.float_matrix("VISAMP", &rows)?,
                        t.float_matrix("VISAMPERR", &rows)?,
                        t.float_matrix("VISPHI", &rows)?,
                        t.float_matrix("VISPHIERR", &rows)?,
                        flag,
                    );
                    accumulate(&mut ds.vis, name, table, raw_grid)?;
                }
                _ => {
                    let table = T3Table::from_raw(
                        Triangle::new(group[0].clone(), group[1].clone(), group[2].clone()),
                        mjd,
                        (
                            scalars_at(t, "U1COORD", &rows)?,
                            scalars_at(t, "V1COORD", &rows)?,
                        ),
                        (
                            scalars_at(t, "U2COORD", &rows)?,
                            scalars_at(t, "V2COORD", &rows)?,
                        ),
                        t.float_matrix("T3AMP", &rows)?,
                        t.float_matrix("T3AMPERR", &rows)?,
                        t.float_matrix("T3PHI", &rows)?,
                        t.float_matrix("T3PHIERR", &rows)?,
                        flag,
                    );
                    accumulate(&mut ds.t3, name, table, raw_grid)?;
                }
            }
        }
        Ok(())
    }

    /// Telluric transmission on `grid`.
    ///
    /// An override wins over the `TELLURICS` extension. Either is used as is when it has the
    /// length of `grid`, and binned with the kernel when it has the length of the raw grid.
    /// A `TELLURICS` extension of any other length is ignored, an override is an error.
    fn telluric(
        &self,
        options: &LoadOptions,
        from_file: Option<Vec<f64>>,
        raw_grid: &[Micron],
        grid: &[Micron],
    ) -> Result<Vec<f64>, OifitsError> {
        let fit = |t: &[f64]| -> Option<Vec<f64>> {
            if t.len() == grid.len() {
                Some(t.to_vec())
            } else if t.len() == raw_grid.len() {
                Some(bin_vector(grid, raw_grid, t, None))
            } else {
                None
            }
        };
        if let Some(t) = &options.telluric {
            return fit(t).ok_or_else(|| {
                OifitsError::InvalidLoadParameter(format!(
                    "telluric override has {} channels, expected {} (or {} unbinned)",
                    t.len(),
                    grid.len(),
                    raw_grid.len()
                ))
            });
        }
        Ok(match from_file.as_deref().and_then(fit) {
            Some(t) => t,
            None => {
                if let Some(t) = &from_file {
                    debug!("ignoring TELLURICS with {} channels", t.len());
                }
                vec![1.0; grid.len()]
            }
        })
    }
}

#[cfg(test)]
mod test_ingest {
    use super::*;
    use crate::reader::{Column, Header};

    #[test]
    fn test_group_rows_keeps_first_appearance_order() {
        let s = |a: &str, b: &str| -> Stations {
            SmallVec::from_vec(vec![StationId::new(a), StationId::new(b)])
        };
        let stations = vec![s("B", "C"), s("A", "B"), s("B", "C"), s("A", "B")];
        let groups = group_rows(&stations, &[0, 1, 2, 3]);
        assert_eq!(groups.len(), 2);
        assert_eq!(name_of(&groups[0].0), "BC");
        assert_eq!(groups[0].1, vec![0, 2]);
        assert_eq!(groups[1].1, vec![1, 3]);
    }

    #[test]
    fn test_target_aliases() {
        let target = Extension::new(
            Header::new().with("EXTNAME", "OI_TARGET"),
            RecordTable::new(3)
                .with_column(
                    "TARGET",
                    Column::Str(vec!["HD1".into(), "HD2".into(), "HD1 ".into()]),
                )
                .with_column("TARGET_ID", Column::Int(vec![1, 2, 3])),
        );
        let targets = read_targets(&[target]).unwrap();
        assert_eq!(targets["HD1"], vec![1, 3]);
        assert_eq!(
            resolve_target(&targets, Some("HD1")).unwrap(),
            ("HD1", &[1i64, 3][..])
        );
        assert!(matches!(
            resolve_target(&targets, None),
            Err(OifitsError::Configuration(_))
        ));
        assert_eq!(
            resolve_target(&targets, Some("HD3")),
            Err(OifitsError::Configuration(
                "unknown target \"HD3\", should be in [\"HD1\", \"HD2\"]".into()
            ))
        );
    }

    #[test]
    fn test_missing_target_table() {
        assert_eq!(
            read_targets(&[Extension::primary(Header::new())]),
            Err(OifitsError::Format("no OI_TARGET extension".into()))
        );
    }
}
