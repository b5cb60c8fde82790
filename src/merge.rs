//! # Merger
//!
//! Unions datasets that share a spectral setup into one dataset per setup.
//!
//! ## Overview
//!
//! Datasets are grouped by [`SetupSignature`] (instrument + exact wavelength grid), groups in
//! order of first appearance. For each group:
//!
//! 1. every member is deep-copied and its own error filter (if any) is applied to it, once,
//! 2. the copies are appended into the first one: files are concatenated, epoch indices are
//!    unioned, absent tables are inserted, present tables gain the incoming rows,
//! 3. fabricated baseline rows are pruned wherever a real row now exists at the same epoch,
//! 4. `OI_VIS` and `OI_VIS2` are made one-to-one (unit-valued, fully flagged rows fill the gaps),
//! 5. closure formulas are rebuilt against the merged baseline tables,
//! 6. only the differential rules (`DPHI`, `NFLUX`) of the error filters are carried over.
//!
//! The input datasets are never modified.
//!
//! ## See also
//! ------------
//! * [`crate::closure::reconcile_closures`] – Closure formulas of the merged tables.
//! * [`ErrorFilterConfig::merge_differential`] – Error-filter context of the merged dataset.
//! * [`crate::collapse::collapse`] – Optional post-merge flattening.
use std::collections::BTreeMap;

use log::{debug, info};

use crate::collapse::{collapse as collapse_dataset, link_collapsed_closures};
use crate::constants::{FastHashMap, Micron, EPOCH_TOLERANCE};
use crate::dataset::{Dataset, SetupSignature};
use crate::epoch::{nearest_matching, unmatched};
use crate::error_filter::ErrorFilterConfig;
use crate::tables::matrix::take;
use crate::tables::{BaselineTable, ObservableTable};

/// Merge datasets sharing a setup.
///
/// Arguments
/// -----------------
/// * `datasets`: Datasets to merge, in order. They are deep-copied, never modified.
/// * `collapse`: Run [`crate::collapse::collapse`] on every merged dataset.
///
/// Return
/// ----------
/// * One dataset per distinct setup, in order of first appearance.
///
/// Every member is filtered with its own error filter, whatever it brings to the group: rows of
/// existing tables, new baselines or triangles, and whole categories the first member lacks.
/// Members with different filters therefore keep their own error treatment in the merged tables.
pub fn merge(datasets: &[Dataset], collapse: bool) -> Vec<Dataset> {
    let mut index: FastHashMap<SetupSignature, usize> = FastHashMap::default();
    let mut groups: Vec<Vec<&Dataset>> = Vec::new();
    for dataset in datasets {
        let slot = *index.entry(dataset.setup_signature()).or_insert_with(|| {
            groups.push(Vec::new());
            groups.len() - 1
        });
        groups[slot].push(dataset);
    }

    let merged: Vec<Dataset> = groups.iter().map(|group| merge_group(group)).collect();

    info!(
        "{} dataset(s) merged into {} setup(s)",
        datasets.len(),
        merged.len()
    );
    for (i, m) in merged.iter().enumerate() {
        info!(
            " [{i}] {} {} wavelengths: {:.3}..{:.3} um [{}] {}",
            m.instrument,
            m.n_channels(),
            m.wavelengths.first().copied().unwrap_or(f64::NAN),
            m.wavelengths.last().copied().unwrap_or(f64::NAN),
            m.baselines.join(", "),
            m.file_label()
        );
    }

    if collapse {
        merged.into_iter().map(collapse_dataset).collect()
    } else {
        merged
    }
}

/// Deep copy of `dataset` with its own error filter applied.
fn filtered(dataset: &Dataset) -> Dataset {
    let mut copy = dataset.clone();
    if let Some(config) = &dataset.error_filter {
        copy.apply_error_filter(config);
    }
    copy
}

fn merge_group(group: &[&Dataset]) -> Dataset {
    // collapsed and per-baseline tables cannot share a dataset
    let any_collapsed = group.iter().any(|d| d.is_collapsed());
    let prepare = |d: &Dataset| {
        let copy = filtered(d);
        if any_collapsed {
            collapse_dataset(copy)
        } else {
            copy
        }
    };

    let mut members = group.iter().map(|d| prepare(d));
    let Some(mut merged) = members.next() else {
        return Dataset::default();
    };
    for incoming in members {
        debug!("merging {} into {}", incoming.file_label(), merged.file_label());
        merged.files.extend(incoming.files);
        for (epoch, names) in incoming.configurations {
            merged
                .configurations
                .entry(epoch)
                .or_default()
                .extend(names);
        }
        append_tables(&mut merged.flux, incoming.flux);
        append_tables(&mut merged.vis, incoming.vis);
        append_tables(&mut merged.vis2, incoming.vis2);
        append_tables(&mut merged.t3, incoming.t3);
        merged.warnings.extend(incoming.warnings);
    }

    let wl = merged.wavelengths.clone();
    prune_fabricated(&mut merged.vis);
    prune_fabricated(&mut merged.vis2);

    if merged.is_collapsed() {
        link_collapsed_closures(&mut merged);
    } else {
        if !merged.vis.is_empty() && !merged.vis2.is_empty() {
            fill_counterparts(&merged.vis, &mut merged.vis2, &wl);
            fill_counterparts(&merged.vis2, &mut merged.vis, &wl);
        }
        merged.reconcile_closures();
        merged.refresh_names();
    }

    merged.error_filter = ErrorFilterConfig::merge_differential(
        group.iter().filter_map(|d| d.error_filter.as_ref()),
        &mut merged.warnings,
    );
    merged
}

/// Insert the tables of `incoming` absent from `target`, append the rows of the others.
fn append_tables<T: ObservableTable>(target: &mut BTreeMap<String, T>, incoming: BTreeMap<String, T>) {
    for (name, table) in incoming {
        match target.get_mut(&name) {
            Some(existing) => existing.append(&table),
            None => {
                target.insert(name, table);
            }
        }
    }
}

/// Rows kept by the fabricated-row pruning of `table`.
///
/// A fabricated row is dropped when a real row, or an earlier fabricated row, of the same source
/// lies within [`EPOCH_TOLERANCE`]. Real rows are always kept.
fn kept_rows<B: BaselineTable>(table: &B) -> Vec<usize> {
    let fabricated = table.fabricated();
    let sources = table.row_sources();
    let mjd = table.mjd();
    (0..table.n_rows())
        .filter(|&i| {
            !fabricated[i]
                || nearest_matching(mjd[i], mjd, EPOCH_TOLERANCE, |j| {
                    (!fabricated[j] || j < i) && sources[j] == sources[i]
                })
                .is_none()
        })
        .collect()
}

fn prune_fabricated<B: BaselineTable>(tables: &mut BTreeMap<String, B>) {
    for (name, table) in tables.iter_mut() {
        let keep = kept_rows(table);
        if keep.len() < table.n_rows() {
            debug!(
                "{} {name}: pruning {} fabricated row(s)",
                B::CATEGORY,
                table.n_rows() - keep.len()
            );
            *table = table.select_rows(&keep);
        }
    }
}

/// Give `to` a table for every name of `from`, and a row for every epoch of `from` it lacks.
///
/// Missing tables and rows take the epochs and coordinates of `from`, unit values and errors,
/// and are fully flagged.
fn fill_counterparts<A: BaselineTable, B: BaselineTable>(
    from: &BTreeMap<String, A>,
    to: &mut BTreeMap<String, B>,
    wl: &[Micron],
) {
    for (name, source) in from {
        match to.get_mut(name) {
            None => {
                debug!("{name} missing from {}: adding unit rows", B::CATEGORY);
                let mut table =
                    B::filled(name, source.mjd(), source.u(), source.v(), wl, 1.0, 1.0);
                table.set_baseline(source.baseline().cloned());
                to.insert(name.clone(), table);
            }
            Some(target) => {
                let missing = unmatched(source.mjd(), target.mjd(), EPOCH_TOLERANCE);
                if missing.is_empty() {
                    continue;
                }
                debug!(
                    "{name} in {}: adding {} unit row(s)",
                    B::CATEGORY,
                    missing.len()
                );
                target.append(&B::filled(
                    name,
                    &take(source.mjd(), &missing),
                    &take(source.u(), &missing),
                    &take(source.v(), &missing),
                    wl,
                    1.0,
                    1.0,
                ));
            }
        }
    }
}

#[cfg(test)]
mod test_merge {
    use super::*;
    use crate::station::{Baseline, StationId};
    use crate::tables::{Vis2Table, VisTable};
    use approx::assert_relative_eq;
    use nalgebra::DMatrix;

    const WL: [f64; 3] = [2.0, 2.1, 2.2];

    fn vis2(name: &str, mjd: &[f64], value: f64) -> Vis2Table {
        let (a, b) = name.split_at(1);
        let n = mjd.len();
        let mut t = Vis2Table::from_raw(
            Baseline::new(StationId::new(a), StationId::new(b)),
            mjd.to_vec(),
            vec![10.0; n],
            vec![5.0; n],
            DMatrix::from_element(n, 3, value),
            DMatrix::from_element(n, 3, 0.01),
            DMatrix::from_element(n, 3, false),
        );
        t.update_derived(&WL);
        t
    }

    fn dataset(file: &str, tables: Vec<(&str, Vis2Table)>) -> Dataset {
        let mut ds = Dataset::new("PIONIER", "HD1", WL.to_vec(), vec![0.05; 3]);
        ds.files.push(file.into());
        for (name, t) in tables {
            ds.vis2.insert(name.to_string(), t);
        }
        ds.index_configurations();
        ds.refresh_names();
        ds
    }

    #[test]
    fn test_groups_by_setup() {
        let a = dataset("a.fits", vec![("AB", vis2("AB", &[1.0], 0.5))]);
        let b = dataset("b.fits", vec![("AB", vis2("AB", &[2.0], 0.6))]);
        let mut c = dataset("c.fits", vec![("AB", vis2("AB", &[3.0], 0.7))]);
        c.wavelengths[0] = 1.9;

        let merged = merge(&[a.clone(), c, b], false);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].file_label(), "a.fits;b.fits");
        assert_eq!(merged[0].vis2["AB"].mjd, vec![1.0, 2.0]);
        assert_eq!(merged[0].configurations.len(), 2);
        assert_eq!(merged[1].file_label(), "c.fits");

        // inputs are untouched
        assert_eq!(a.vis2["AB"].n_rows(), 1);
    }

    #[test]
    fn test_fabricated_rows_pruned() {
        let mut fake = Vis2Table::placeholder("BC", &[1.0], &[1.0], &[1.0], &WL);
        fake.set_baseline(Some(Baseline::new(StationId::new("B"), StationId::new("C"))));
        let a = dataset("a.fits", vec![("BC", fake)]);
        let b = dataset("b.fits", vec![("BC", vis2("BC", &[1.0 + 1e-6], 0.8))]);

        let merged = merge(&[a, b], false);
        let bc = &merged[0].vis2["BC"];
        assert_eq!(bc.n_rows(), 1);
        assert!(!bc.fabricated[0]);
        assert_eq!(bc.v2[(0, 0)], 0.8);
    }

    #[test]
    fn test_kept_rows_collapses_repeated_placeholders() {
        let mut t = Vis2Table::placeholder("BC", &[1.0, 1.0, 2.0], &[0.0; 3], &[0.0; 3], &WL);
        t.set_baseline(Some(Baseline::new(StationId::new("B"), StationId::new("C"))));
        assert_eq!(kept_rows(&t), vec![0, 2]);
    }

    #[test]
    fn test_vis_vis2_one_to_one() {
        let mut a = dataset("a.fits", vec![("AB", vis2("AB", &[1.0, 2.0], 0.5))]);
        let vis = VisTable::from_raw(
            Baseline::new(StationId::new("A"), StationId::new("B")),
            vec![1.0],
            vec![10.0],
            vec![5.0],
            DMatrix::from_element(1, 3, 0.7),
            DMatrix::from_element(1, 3, 0.01),
            DMatrix::from_element(1, 3, 10.0),
            DMatrix::from_element(1, 3, 1.0),
            DMatrix::from_element(1, 3, false),
        );
        a.vis.insert("AB".into(), vis);
        let c = dataset("c.fits", vec![("CD", vis2("CD", &[1.0], 0.9))]);

        let merged = merge(&[a, c], false);
        let m = &merged[0];
        assert_eq!(m.vis.keys().collect::<Vec<_>>(), vec!["AB", "CD"]);
        let ab = &m.vis["AB"];
        assert_eq!(ab.mjd, vec![1.0, 2.0]);
        assert_eq!(ab.amp[(1, 0)], 1.0);
        assert!(ab.flag.row(1).iter().all(|&f| f));
        assert!(!ab.flag[(0, 0)]);
        let cd = &m.vis["CD"];
        assert!(cd.flag.iter().all(|&f| f));
        assert_eq!(cd.baseline.as_ref().map(Baseline::name), Some("CD".to_string()));
        assert_eq!(m.baselines, vec!["AB", "CD"]);
    }

    #[test]
    fn test_each_member_keeps_its_own_filter() {
        let mut a = dataset("a.fits", vec![("AB", vis2("AB", &[1.0], 0.5))]);
        a.error_filter = Some(ErrorFilterConfig::builder().mult_error("V2", 2.0).build().unwrap());
        let mut b = dataset(
            "b.fits",
            vec![("AB", vis2("AB", &[2.0], 0.5)), ("CD", vis2("CD", &[2.0], 0.5))],
        );
        let vis = VisTable::from_raw(
            Baseline::new(StationId::new("C"), StationId::new("D")),
            vec![2.0],
            vec![10.0],
            vec![5.0],
            DMatrix::from_element(1, 3, 0.7),
            DMatrix::from_element(1, 3, 0.01),
            DMatrix::from_element(1, 3, 10.0),
            DMatrix::from_element(1, 3, 1.0),
            DMatrix::from_element(1, 3, false),
        );
        b.vis.insert("CD".into(), vis);
        b.error_filter = Some(
            ErrorFilterConfig::builder()
                .mult_error("V2", 3.0)
                .mult_error("|V|", 3.0)
                .build()
                .unwrap(),
        );

        let m = &merge(&[a, b], false)[0];
        let ab = &m.vis2["AB"].ev2;
        assert_relative_eq!(ab[(0, 0)], 0.02);
        assert_relative_eq!(ab[(1, 0)], 0.03);
        // new baseline and new category follow the member they come from
        assert_relative_eq!(m.vis2["CD"].ev2[(0, 0)], 0.03);
        assert_relative_eq!(m.vis["CD"].eamp[(0, 0)], 0.03);
        assert!(m.error_filter.is_none());
    }

    #[test]
    fn test_error_filter_applied_once_and_made_differential() {
        let mut a = dataset("a.fits", vec![("AB", vis2("AB", &[1.0], 0.5))]);
        a.error_filter = Some(
            ErrorFilterConfig::builder()
                .mult_error("V2", 2.0)
                .min_error("DPHI", 0.5)
                .build()
                .unwrap(),
        );
        let b = dataset("b.fits", vec![("AB", vis2("AB", &[2.0], 0.5))]);

        let merged = merge(&[a, b], false);
        let ev2 = &merged[0].vis2["AB"].ev2;
        assert_eq!(ev2[(0, 0)], 0.02);
        assert_eq!(ev2[(1, 0)], 0.01);
        let kept = merged[0].error_filter.as_ref().unwrap();
        assert!(kept.mult_error.is_empty());
        assert_eq!(kept.min_error.get("DPHI"), Some(&0.5));

        // merging again does not re-inflate
        let again = merge(&merged, false);
        assert_eq!(again[0].vis2["AB"].ev2[(0, 0)], 0.02);
    }
}
