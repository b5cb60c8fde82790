//! # Closure reconciler
//!
//! Links every closure triangle to the three baseline tables its observables are built from.
//!
//! ## Overview
//!
//! For a triangle `(s1, s2, s3)` the legs are `(s1,s2)`, `(s2,s3)` and `(s3,s1)`. Each leg is
//! resolved against the baseline tables of one category:
//!
//! 1. the forward name exists: sign `+1`,
//! 2. the reversed name exists: sign `-1`,
//! 3. the leg is already in the [`MissingBaselineLedger`] (in either orientation),
//! 4. otherwise the forward name is recorded in the ledger, with sign `+1`.
//!
//! Once every triangle is scanned, each ledger entry becomes a zero-signal, fully flagged
//! baseline table whose epochs are those of the referencing triangles and whose coordinates
//! are the triangle leg coordinates multiplied by the leg sign.
//!
//! Then every triangle row is aligned to a row of each leg table with the epoch aligner
//! (real rows win over fabricated ones at the same epoch). A triangle epoch with no match gets
//! a placeholder row appended to the baseline table. The result is a
//! [`TriangleFormula`] per triangle whose three row vectors have the triangle's row count.
//!
//! Stations are structured identities, so names of unequal width resolve correctly.
use std::collections::BTreeMap;

use log::debug;

use crate::constants::{Meter, Micron, EPOCH_TOLERANCE, MJD};
use crate::epoch::{nearest, nearest_preferred};
use crate::oifits_errors::OifitsWarning;
use crate::station::{Baseline, Orientation};
use crate::tables::{BaselineTable, Leg, ObservableTable, T3Table, TriangleFormula};

/// Rows gathered for a baseline that no table provides.
#[derive(Debug, Clone, PartialEq)]
struct MissingBaseline {
    baseline: Baseline,
    mjd: Vec<MJD>,
    u: Vec<Meter>,
    v: Vec<Meter>,
}

/// Baselines to fabricate, threaded through one reconciliation pass so that triangles sharing
/// an absent baseline fabricate it once.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MissingBaselineLedger {
    entries: BTreeMap<String, MissingBaseline>,
}

impl MissingBaselineLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Recorded baseline names, sorted.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Orientation of `leg` relative to a recorded baseline, if any.
    pub fn resolve(&self, leg: &Baseline) -> Option<(String, Orientation)> {
        resolve_among(leg, |name| self.entries.contains_key(name))
    }

    /// Record epochs and coordinates for `baseline`, skipping epochs already recorded.
    ///
    /// Arguments
    /// -----------------
    /// * `baseline`: The baseline to fabricate, in the orientation of its table.
    /// * `mjd`, `u`, `v`: Epochs and coordinates (metres, already sign corrected).
    pub fn record(&mut self, baseline: &Baseline, mjd: &[MJD], u: &[Meter], v: &[Meter]) {
        let entry = self
            .entries
            .entry(baseline.name())
            .or_insert_with(|| MissingBaseline {
                baseline: baseline.clone(),
                mjd: Vec::new(),
                u: Vec::new(),
                v: Vec::new(),
            });
        for i in 0..mjd.len() {
            if nearest(mjd[i], &entry.mjd, EPOCH_TOLERANCE).is_none() {
                entry.mjd.push(mjd[i]);
                entry.u.push(u[i]);
                entry.v.push(v[i]);
            }
        }
    }

    /// Placeholder tables for every recorded baseline, on grid `wl`.
    pub fn fabricate<B: BaselineTable>(self, wl: &[Micron]) -> Vec<(String, B)> {
        self.entries
            .into_iter()
            .map(|(name, m)| {
                let mut table = B::placeholder(&name, &m.mjd, &m.u, &m.v, wl);
                table.set_baseline(Some(m.baseline));
                (name, table)
            })
            .collect()
    }
}

/// Resolve `leg` against the names accepted by `exists`: forward first, then reversed.
fn resolve_among(leg: &Baseline, exists: impl Fn(&str) -> bool) -> Option<(String, Orientation)> {
    let forward = leg.name();
    if exists(&forward) {
        return Some((forward, Orientation::Forward));
    }
    let reverse = leg.reversed().name();
    exists(&reverse).then_some((reverse, Orientation::Reverse))
}

/// Build the closure formula of every triangle table against `baselines`.
///
/// Absent baselines are fabricated into `baselines`, and triangle epochs missing from a leg
/// table get placeholder rows appended to it. Collapsed triangle tables (no station triple) are
/// left alone.
///
/// Arguments
/// -----------------
/// * `t3`: Triangle tables, by name.
/// * `baselines`: Baseline tables of one category (VIS or VIS2), by name; grown in place.
/// * `wl`: Wavelength grid, for the derived quantities of fabricated rows.
/// * `warnings`: Receives the missing-baseline and missing-epoch warnings.
///
/// Return
/// ----------
/// * The formula of every triangle, by triangle name, indexing rows of `baselines`.
///
/// See also
/// ------------
/// * [`crate::epoch::nearest_preferred`] – Row matching.
/// * [`BaselineTable::push_placeholder`] – Row fabrication.
pub fn reconcile_closures<B: BaselineTable>(
    t3: &BTreeMap<String, T3Table>,
    baselines: &mut BTreeMap<String, B>,
    wl: &[Micron],
    warnings: &mut Vec<OifitsWarning>,
) -> BTreeMap<String, TriangleFormula> {
    let mut ledger = MissingBaselineLedger::new();
    let mut legs_per_triangle: Vec<(&String, &T3Table, [Leg; 3])> = Vec::new();

    for (name, table) in t3 {
        let Some(triangle) = &table.triangle else {
            continue;
        };
        let legs = triangle.legs();
        let mut resolved = Vec::with_capacity(3);
        for (k, leg) in legs.iter().enumerate() {
            let found = match resolve_among(leg, |n| baselines.contains_key(n)) {
                Some(resolved) => Some((resolved, false)),
                None => ledger.resolve(leg).map(|resolved| (resolved, true)),
            };
            let (leg_name, orientation) = match found {
                Some(((leg_name, orientation), from_ledger)) => {
                    if from_ledger {
                        record_leg(&mut ledger, leg, orientation, table, k);
                    }
                    (leg_name, orientation)
                }
                None => {
                    warnings.push(
                        OifitsWarning::MissingBaseline {
                            triangle: name.clone(),
                            baseline: leg.name(),
                        }
                        .logged(),
                    );
                    record_leg(&mut ledger, leg, Orientation::Forward, table, k);
                    (leg.name(), Orientation::Forward)
                }
            };
            resolved.push(Leg::new(leg_name, orientation));
        }
        let Ok(legs) = <[Leg; 3]>::try_from(resolved) else {
            continue;
        };
        legs_per_triangle.push((name, table, legs));
    }

    if !ledger.is_empty() {
        debug!(
            "fabricating {} baseline(s) in {}: {}",
            ledger.len(),
            B::CATEGORY,
            ledger.names().collect::<Vec<_>>().join(", ")
        );
    }
    baselines.extend(ledger.fabricate::<B>(wl));

    let mut formulas = BTreeMap::new();
    for (name, table, legs) in legs_per_triangle {
        let mut rows: [Vec<usize>; 3] = Default::default();
        for (k, leg) in legs.iter().enumerate() {
            let Some(target) = baselines.get_mut(&leg.baseline) else {
                continue;
            };
            let mut missing = Vec::new();
            let mut fabricated = target.fabricated().to_vec();
            for (i, &epoch) in table.mjd.iter().enumerate() {
                let row = nearest_preferred(epoch, target.mjd(), EPOCH_TOLERANCE, |j| {
                    !fabricated[j]
                });
                let row = match row {
                    Some(row) => row,
                    None => {
                        let (u, v) = table.leg_coordinates(k, i);
                        missing.push(epoch);
                        fabricated.push(true);
                        target.push_placeholder(
                            &leg.baseline,
                            epoch,
                            u * leg.sign(),
                            v * leg.sign(),
                            wl,
                        )
                    }
                };
                rows[k].push(row);
            }
            if !missing.is_empty() {
                warnings.push(
                    OifitsWarning::MissingEpochs {
                        triangle: name.clone(),
                        baseline: leg.baseline.clone(),
                        epochs: missing,
                    }
                    .logged(),
                );
            }
        }
        formulas.insert(
            name.clone(),
            TriangleFormula {
                legs,
                category: B::CATEGORY,
                rows,
            },
        );
    }
    formulas
}

/// Record the epochs of `table` for leg `k` in the ledger, coordinates multiplied by the sign.
fn record_leg(
    ledger: &mut MissingBaselineLedger,
    leg: &Baseline,
    orientation: Orientation,
    table: &T3Table,
    k: usize,
) {
    let sign = orientation.sign();
    let (u, v): (Vec<Meter>, Vec<Meter>) = (0..table.n_rows())
        .map(|i| {
            let (u, v) = table.leg_coordinates(k, i);
            (u * sign, v * sign)
        })
        .unzip();
    let oriented = match orientation {
        Orientation::Forward => leg.clone(),
        Orientation::Reverse => leg.reversed(),
    };
    ledger.record(&oriented, &table.mjd, &u, &v);
}
