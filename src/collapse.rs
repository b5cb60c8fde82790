//! # Collapser
//!
//! Flattens every category of a dataset into a single `"all"` table.
//!
//! ## Overview
//!
//! * **Flux**: per epoch, the unflagged channels of every station are averaged with
//!   inverse-variance weights `1/E²`; the error is `1/sqrt(Σw)`. A channel without weight is
//!   flagged and left at zero. The source name of a row is the concatenation of the station
//!   names averaged into it.
//! * **OI_VIS, OI_VIS2, OI_T3**: tables are concatenated in name order; each row keeps the name
//!   of its source table in `row_sources`.
//! * **Closures**: each row keeps the legs of its source triangle, and every leg is linked to the
//!   nearest-epoch row of the collapsed baseline table whose source is that leg's baseline.
//!
//! The name lists become `["all"]`. Collapsing a collapsed dataset returns it unchanged.
use std::collections::BTreeMap;

use log::debug;
use nalgebra::DMatrix;
use ordered_float::OrderedFloat;

use crate::constants::{ALL, MJD};
use crate::dataset::Dataset;
use crate::epoch::nearest_preferred;
use crate::tables::{
    BaselineTable, Category, CollapsedFormula, FluxTable, Formula, Leg, ObservableTable, T3Table,
};

/// Collapse `dataset` into one `"all"` table per category.
///
/// Arguments
/// -----------------
/// * `dataset`: Dataset to collapse; its closure formulas are rebuilt first if needed.
///
/// Return
/// ----------
/// * The collapsed dataset, or `dataset` itself when it is already collapsed.
pub fn collapse(mut dataset: Dataset) -> Dataset {
    if dataset.is_collapsed() {
        return dataset;
    }
    dataset.reconcile_closures();

    if !dataset.flux.is_empty() {
        let all = average_flux(&dataset.flux, dataset.n_channels());
        dataset.flux = BTreeMap::from([(ALL.to_string(), all)]);
    }
    dataset.vis = concatenate(std::mem::take(&mut dataset.vis), |t| t.set_baseline(None));
    dataset.vis2 = concatenate(std::mem::take(&mut dataset.vis2), |t| t.set_baseline(None));

    let mut legs: Vec<[Leg; 3]> = Vec::new();
    let mut triangles = BTreeMap::new();
    for (name, table) in std::mem::take(&mut dataset.t3) {
        let Some(row_legs) = table.formula.as_ref().and_then(|f| f.legs_of_row(0)).cloned()
        else {
            debug!("{name}: no closure formula, left out of the collapsed table");
            continue;
        };
        legs.extend(std::iter::repeat(row_legs).take(table.n_rows()));
        triangles.insert(name, table);
    }
    dataset.t3 = concatenate(triangles, |t| {
        t.triangle = None;
        t.formula = None;
    });
    if let Some(t3) = dataset.t3.get_mut(ALL) {
        t3.formula = Some(Formula::Collapsed(CollapsedFormula {
            legs,
            category: Category::T3,
            rows: Default::default(),
        }));
    }

    dataset.telescopes = vec![ALL.to_string()];
    dataset.baselines = vec![ALL.to_string()];
    dataset.triangles = vec![ALL.to_string()];
    link_collapsed_closures(&mut dataset);
    dataset
}

/// Concatenate `tables` into a single `"all"` table, `detach` clearing per-name identity.
fn concatenate<T: ObservableTable>(
    tables: BTreeMap<String, T>,
    detach: impl Fn(&mut T),
) -> BTreeMap<String, T> {
    let mut all: Option<T> = None;
    for (_, mut table) in tables {
        detach(&mut table);
        match &mut all {
            Some(a) => a.append(&table),
            None => all = Some(table),
        }
    }
    all.map(|t| (ALL.to_string(), t)).into_iter().collect()
}

/// Per-epoch inverse-variance average of the flux tables.
fn average_flux(tables: &BTreeMap<String, FluxTable>, n_channels: usize) -> FluxTable {
    struct Epoch {
        flux: Vec<f64>,
        raw: Vec<f64>,
        weight: Vec<f64>,
        names: String,
    }

    let mut epochs: BTreeMap<OrderedFloat<MJD>, Epoch> = BTreeMap::new();
    for (name, t) in tables {
        for (i, &mjd) in t.mjd.iter().enumerate() {
            let acc = epochs.entry(OrderedFloat(mjd)).or_insert_with(|| Epoch {
                flux: vec![0.0; n_channels],
                raw: vec![0.0; n_channels],
                weight: vec![0.0; n_channels],
                names: String::new(),
            });
            acc.names.push_str(name);
            for j in 0..n_channels {
                if t.flag[(i, j)] {
                    continue;
                }
                let e = t.eflux[(i, j)];
                let w = 1.0 / (e * e);
                if !w.is_finite() {
                    continue;
                }
                acc.flux[j] += w * t.flux[(i, j)];
                acc.raw[j] += w * t.raw_flux[(i, j)];
                acc.weight[j] += w;
            }
        }
    }

    let n = epochs.len();
    let mut flux = DMatrix::zeros(n, n_channels);
    let mut raw_flux = DMatrix::zeros(n, n_channels);
    let mut eflux = DMatrix::zeros(n, n_channels);
    let mut flag = DMatrix::from_element(n, n_channels, true);
    for (i, e) in epochs.values().enumerate() {
        for (j, &w) in e.weight.iter().enumerate() {
            if w > 0.0 {
                flux[(i, j)] = e.flux[j] / w;
                raw_flux[(i, j)] = e.raw[j] / w;
                eflux[(i, j)] = 1.0 / w.sqrt();
                flag[(i, j)] = false;
            }
        }
    }
    FluxTable {
        station: None,
        row_sources: epochs.values().map(|e| e.names.clone()).collect(),
        mjd: epochs.into_keys().map(|e| e.0).collect(),
        flux,
        eflux,
        flag,
        raw_flux,
    }
}

/// Rows of the collapsed baseline table (`mjd`, `sources`) linked to each leg of `t3`.
fn link_rows(
    t3: &T3Table,
    legs: &[[Leg; 3]],
    mjd: &[MJD],
    sources: &[String],
) -> Option<[Vec<usize>; 3]> {
    let mut rows: [Vec<usize>; 3] = Default::default();
    for (i, &epoch) in t3.mjd.iter().enumerate() {
        for (k, leg) in legs.get(i)?.iter().enumerate() {
            let row =
                nearest_preferred(epoch, mjd, f64::INFINITY, |j| sources[j] == leg.baseline)?;
            rows[k].push(row);
        }
    }
    Some(rows)
}

/// Rebuild the row indices of the collapsed closure formula against the collapsed baseline
/// table of the reference category.
pub(crate) fn link_collapsed_closures(dataset: &mut Dataset) {
    let category = dataset.reference_category();
    let reference: Option<(&[MJD], &[String])> = match category {
        Category::Vis => dataset.vis.get(ALL).map(|t| (t.mjd(), t.row_sources())),
        _ => dataset.vis2.get(ALL).map(|t| (t.mjd(), t.row_sources())),
    };
    let Some(t3) = dataset.t3.get_mut(ALL) else {
        return;
    };
    let legs = match &t3.formula {
        Some(Formula::Collapsed(f)) => f.legs.clone(),
        _ => return,
    };
    let rows = reference.and_then(|(mjd, sources)| link_rows(t3, &legs, mjd, sources));
    t3.formula = match rows {
        Some(rows) => Some(Formula::Collapsed(CollapsedFormula {
            legs,
            category,
            rows,
        })),
        None => {
            debug!("collapsed closures cannot be linked to {category}");
            None
        }
    };
}

#[cfg(test)]
mod test_collapse {
    use super::*;
    use crate::station::{Baseline, StationId, Triangle};
    use crate::tables::Vis2Table;
    use approx::assert_relative_eq;

    const WL: [f64; 2] = [2.0, 2.2];

    fn st(s: &str) -> StationId {
        StationId::new(s)
    }

    fn flux(station: &str, mjd: &[f64], value: f64, error: f64) -> FluxTable {
        let n = mjd.len();
        FluxTable::from_raw(
            st(station),
            mjd.to_vec(),
            DMatrix::from_element(n, 2, value),
            DMatrix::from_element(n, 2, error),
            DMatrix::from_element(n, 2, false),
        )
    }

    fn vis2(a: &str, b: &str, mjd: &[f64]) -> Vis2Table {
        let n = mjd.len();
        let mut t = Vis2Table::from_raw(
            Baseline::new(st(a), st(b)),
            mjd.to_vec(),
            vec![10.0; n],
            vec![0.0; n],
            DMatrix::from_element(n, 2, 0.5),
            DMatrix::from_element(n, 2, 0.01),
            DMatrix::from_element(n, 2, false),
        );
        t.update_derived(&WL);
        t
    }

    fn t3(mjd: &[f64]) -> T3Table {
        let n = mjd.len();
        T3Table::from_raw(
            Triangle::new(st("A"), st("B"), st("C")),
            mjd.to_vec(),
            (vec![10.0; n], vec![0.0; n]),
            (vec![0.0; n], vec![10.0; n]),
            DMatrix::from_element(n, 2, 1.0),
            DMatrix::from_element(n, 2, 0.1),
            DMatrix::from_element(n, 2, 5.0),
            DMatrix::from_element(n, 2, 1.0),
            DMatrix::from_element(n, 2, false),
        )
    }

    fn dataset() -> Dataset {
        let mut ds = Dataset::new("PIONIER", "HD1", WL.to_vec(), vec![0.1; 2]);
        ds.flux.insert("A".into(), flux("A", &[1.0], 10.0, 1.0));
        ds.flux.insert("B".into(), flux("B", &[1.0, 2.0], 20.0, 2.0));
        ds.vis2.insert("AB".into(), vis2("A", "B", &[1.0, 2.0]));
        ds.vis2.insert("BC".into(), vis2("B", "C", &[1.0, 2.0]));
        ds.vis2.insert("CA".into(), vis2("C", "A", &[1.0, 2.0]));
        ds.t3.insert("ABC".into(), t3(&[1.0, 2.0]));
        ds.refresh_names();
        ds
    }

    #[test]
    fn test_flux_average() {
        let c = collapse(dataset());
        let all = &c.flux[ALL];
        assert_eq!(all.mjd, vec![1.0, 2.0]);
        assert_eq!(all.row_sources, vec!["AB", "B"]);
        // weights 1 and 1/4
        assert_relative_eq!(all.flux[(0, 0)], (10.0 + 20.0 / 4.0) / 1.25);
        assert_relative_eq!(all.eflux[(0, 1)], 1.0 / 1.25_f64.sqrt());
        assert_relative_eq!(all.flux[(1, 0)], 20.0);
        assert!(all.check_shape(2).is_ok());
    }

    #[test]
    fn test_flagged_channel_without_weight() {
        let mut ds = dataset();
        ds.flux.get_mut("A").unwrap().flag[(0, 1)] = true;
        ds.flux.get_mut("B").unwrap().flag[(0, 1)] = true;
        let all = &collapse(ds).flux[ALL];
        assert!(all.flag[(0, 1)]);
        assert_eq!(all.flux[(0, 1)], 0.0);
        assert!(!all.flag[(0, 0)]);
    }

    #[test]
    fn test_tables_concatenated_and_closures_linked() {
        let c = collapse(dataset());
        assert_eq!(c.baselines, vec![ALL]);
        assert_eq!(c.telescopes, vec![ALL]);
        assert_eq!(c.triangles, vec![ALL]);

        let v2 = &c.vis2[ALL];
        assert_eq!(v2.n_rows(), 6);
        assert!(v2.baseline.is_none());
        assert_eq!(v2.row_sources, vec!["AB", "AB", "BC", "BC", "CA", "CA"]);

        let t = &c.t3[ALL];
        assert!(t.triangle.is_none());
        let Some(Formula::Collapsed(f)) = &t.formula else {
            panic!("collapsed formula expected");
        };
        assert_eq!(f.category, Category::Vis2);
        assert_eq!(f.legs.len(), 2);
        assert_eq!(f.rows, [vec![0, 1], vec![2, 3], vec![4, 5]]);
        assert!(c.check_shapes().is_ok());
    }

    #[test]
    fn test_collapse_is_idempotent() {
        let once = collapse(dataset());
        let twice = collapse(once.clone());
        assert_eq!(once, twice);
    }
}
