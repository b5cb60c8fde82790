//! # Error filtering
//!
//! Declarative rewriting of error columns and flag masks, attached to a
//! [`Dataset`](crate::dataset::Dataset) and applied by the merger.
//!
//! ## Rules
//!
//! An [`ErrorFilterConfig`] holds five rule families, each a map `observable key → number`:
//!
//! | Family | Effect on each sample |
//! |---|---|
//! | `mult error` | `err ← err · factor` |
//! | `min error` | `err ← max(floor, err)` |
//! | `min relative error` | `err ← max(fraction · \|value\|, err)` |
//! | `max error` | `flag ← flag ∨ (err ≥ ceiling)` |
//! | `max relative error` | `flag ← flag ∨ (err ≥ fraction · \|value\|)` |
//!
//! Error rules run in the order of the table (multiplier, then floors), so a floor dominates a
//! multiplier. Flag rules run afterwards, on the rewritten errors, and only ever set flags.
//!
//! ## Keys
//!
//! Observable keys are `V2`, `|V|`, `PHI`, `T3AMP`, `T3PHI` and `FLUX`, plus two differential
//! aliases:
//!
//! * `NFLUX` (normalized flux): applies to `FLUX`, with floors and ceilings scaled by the mean
//!   flux of the table being filtered (recomputed for every table). A `NFLUX` multiplier is used
//!   as is, and an explicit `FLUX` rule of the same family takes precedence.
//! * `DPHI` (differential phase): a `max error` on `DPHI` also flags `PHI`.
//!
//! ## Application
//!
//! Applying a configuration is not idempotent for the `mult`/`min` families: errors would be
//! inflated again. It must be applied once per raw table; the merger takes care of it and keeps
//! only the differential floor/ceiling keys afterwards (see [`ErrorFilterConfig::merge_differential`]).
//!
//! ## Example
//!
//! ```rust
//! use oidata::error_filter::ErrorFilterConfig;
//!
//! let filter = ErrorFilterConfig::builder()
//!     .min_relative_error("V2", 0.01)
//!     .max_error("T3PHI", 30.0)
//!     .build()
//!     .unwrap();
//! assert!(!filter.is_empty());
//! ```
use std::cmp::Ordering::{Equal, Greater};
use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::oifits_errors::{OifitsError, OifitsWarning};
use crate::tables::ObservableTable;

/// Normalized-flux alias key.
pub const NFLUX: &str = "NFLUX";
/// Differential-phase alias key.
pub const DPHI: &str = "DPHI";

/// Observables carried by the tables, with their rule keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Observable {
    Flux,
    VisAmp,
    VisPhi,
    V2,
    T3Amp,
    T3Phi,
}

impl Observable {
    pub const ALL: [Observable; 6] = [
        Observable::Flux,
        Observable::VisAmp,
        Observable::VisPhi,
        Observable::V2,
        Observable::T3Amp,
        Observable::T3Phi,
    ];

    /// Rule key of the observable.
    pub fn key(self) -> &'static str {
        match self {
            Observable::Flux => "FLUX",
            Observable::VisAmp => "|V|",
            Observable::VisPhi => "PHI",
            Observable::V2 => "V2",
            Observable::T3Amp => "T3AMP",
            Observable::T3Phi => "T3PHI",
        }
    }

    /// Differential alias that also addresses this observable, if any.
    fn alias(self) -> Option<&'static str> {
        match self {
            Observable::Flux => Some(NFLUX),
            Observable::VisPhi => Some(DPHI),
            _ => None,
        }
    }
}

impl fmt::Display for Observable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// True for keys the filter understands.
pub fn is_known_key(key: &str) -> bool {
    key == NFLUX || key == DPHI || Observable::ALL.iter().any(|o| o.key() == key)
}

/// Per-observable error and flag rules.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ErrorFilterConfig {
    #[serde(rename = "mult error")]
    pub mult_error: BTreeMap<String, f64>,
    #[serde(rename = "min error")]
    pub min_error: BTreeMap<String, f64>,
    #[serde(rename = "min relative error")]
    pub min_relative_error: BTreeMap<String, f64>,
    #[serde(rename = "max error")]
    pub max_error: BTreeMap<String, f64>,
    #[serde(rename = "max relative error")]
    pub max_relative_error: BTreeMap<String, f64>,
}

/// Effective rules for one observable of one table.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
struct Rules {
    mult: Option<f64>,
    floor: Option<f64>,
    relative_floor: Option<f64>,
    ceilings: [Option<f64>; 2],
    relative_ceiling: Option<f64>,
}

impl ErrorFilterConfig {
    pub fn builder() -> ErrorFilterConfigBuilder {
        ErrorFilterConfigBuilder::new()
    }

    pub fn is_empty(&self) -> bool {
        self.families().iter().all(|(_, m)| m.is_empty())
    }

    fn families(&self) -> [(&'static str, &BTreeMap<String, f64>); 5] {
        [
            ("mult error", &self.mult_error),
            ("min error", &self.min_error),
            ("min relative error", &self.min_relative_error),
            ("max error", &self.max_error),
            ("max relative error", &self.max_relative_error),
        ]
    }

    /// Check keys and values, e.g. after deserialization.
    ///
    /// Return
    /// ----------
    /// * `Err(OifitsError::InvalidErrorFilter)` for an unknown key, or a negative or non-finite
    ///   value.
    pub fn validate(&self) -> Result<(), OifitsError> {
        for (family, rules) in self.families() {
            for (key, &value) in rules {
                if !is_known_key(key) {
                    return Err(OifitsError::InvalidErrorFilter(format!(
                        "unknown observable \"{key}\" in \"{family}\""
                    )));
                }
                if !value.is_finite()
                    || !matches!(value.partial_cmp(&0.0), Some(Greater) | Some(Equal))
                {
                    return Err(OifitsError::InvalidErrorFilter(format!(
                        "\"{family}\" for \"{key}\" must be finite and >= 0, got {value}"
                    )));
                }
            }
        }
        Ok(())
    }

    /// Resolve the rules applying to `observable` in a table whose mean flux is `mean_flux`.
    /// `NFLUX` rules do not apply without a mean flux.
    fn rules_for(&self, observable: Observable, mean_flux: Option<f64>) -> Rules {
        let key = observable.key();
        let alias = observable.alias();
        let scaled = |map: &BTreeMap<String, f64>| match (map.get(key), alias) {
            (Some(&x), _) => Some(x),
            (None, Some(NFLUX)) => map.get(NFLUX).zip(mean_flux).map(|(x, m)| x * m),
            _ => None,
        };
        let nflux_only = |map: &BTreeMap<String, f64>| match alias {
            Some(NFLUX) => map.get(key).or_else(|| map.get(NFLUX)).copied(),
            _ => map.get(key).copied(),
        };
        let dphi_ceiling = match alias {
            Some(DPHI) => self.max_error.get(DPHI).copied(),
            _ => None,
        };
        let max_error = match alias {
            Some(DPHI) => self.max_error.get(key).copied(),
            _ => scaled(&self.max_error),
        };
        Rules {
            mult: nflux_only(&self.mult_error),
            floor: scaled(&self.min_error),
            relative_floor: self.min_relative_error.get(key).copied(),
            ceilings: [max_error, dphi_ceiling],
            relative_ceiling: self.max_relative_error.get(key).copied(),
        }
    }

    /// Differential-key context of a merged dataset.
    ///
    /// Keeps the `NFLUX`/`DPHI` entries of the floor and ceiling families of every configuration
    /// in `configs`; multiplier rules are dropped since they were already applied. On a
    /// disagreement the first value wins and a [`OifitsWarning::MergeConflict`] is recorded.
    ///
    /// Arguments
    /// -----------------
    /// * `configs`: Configurations of the merged datasets, in merge order.
    /// * `warnings`: Receives the merge conflicts.
    ///
    /// Return
    /// ----------
    /// * The merged configuration, `None` if it holds no rule.
    pub fn merge_differential<'a>(
        configs: impl IntoIterator<Item = &'a ErrorFilterConfig>,
        warnings: &mut Vec<OifitsWarning>,
    ) -> Option<ErrorFilterConfig> {
        let mut merged = ErrorFilterConfig::default();
        for config in configs {
            let pairs = [
                ("min error", &config.min_error, &mut merged.min_error),
                (
                    "min relative error",
                    &config.min_relative_error,
                    &mut merged.min_relative_error,
                ),
                ("max error", &config.max_error, &mut merged.max_error),
                (
                    "max relative error",
                    &config.max_relative_error,
                    &mut merged.max_relative_error,
                ),
            ];
            for (rule, source, target) in pairs {
                for key in [DPHI, NFLUX] {
                    let Some(&value) = source.get(key) else {
                        continue;
                    };
                    match target.get(key) {
                        Some(&kept) if kept != value => warnings.push(
                            OifitsWarning::MergeConflict {
                                rule: rule.to_string(),
                                key: key.to_string(),
                                kept,
                                ignored: value,
                            }
                            .logged(),
                        ),
                        Some(_) => {}
                        None => {
                            target.insert(key.to_string(), value);
                        }
                    }
                }
            }
        }
        (!merged.is_empty()).then_some(merged)
    }
}

/// `max(floor, err)` keeping `NaN` errors as they are.
fn raise(err: f64, floor: f64) -> f64 {
    if err.is_nan() || floor.is_nan() {
        err
    } else {
        err.max(floor)
    }
}

/// Apply `config` to every observable of `table`, in place.
///
/// Arguments
/// -----------------
/// * `table`: Table to filter; its errors are rewritten and flags may be set.
/// * `config`: Rules to apply.
///
/// See also
/// ------------
/// * [`ErrorFilterConfig`] – Rule semantics.
pub fn apply_error_filter<T: ObservableTable>(table: &mut T, config: &ErrorFilterConfig) {
    if config.is_empty() {
        return;
    }
    let mean_flux = table.mean_flux();
    let (observables, flag) = table.observables_mut();
    for obs in observables {
        let rules = config.rules_for(obs.observable, mean_flux);

        for (e, v) in obs.errors.iter_mut().zip(obs.values.iter()) {
            if let Some(m) = rules.mult {
                *e *= m;
            }
            if let Some(floor) = rules.floor {
                *e = raise(*e, floor);
            }
            if let Some(frac) = rules.relative_floor {
                *e = raise(*e, frac * v.abs());
            }
        }

        for (f, (e, v)) in flag
            .iter_mut()
            .zip(obs.errors.iter().zip(obs.values.iter()))
        {
            for ceiling in rules.ceilings.iter().flatten() {
                *f |= *e >= *ceiling;
            }
            if let Some(frac) = rules.relative_ceiling {
                *f |= *e >= frac * v.abs();
            }
        }
    }
}

/// Builder for [`ErrorFilterConfig`], with validation.
#[derive(Debug, Clone, Default)]
pub struct ErrorFilterConfigBuilder {
    config: ErrorFilterConfig,
}

impl ErrorFilterConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mult_error(mut self, key: &str, factor: f64) -> Self {
        self.config.mult_error.insert(key.to_string(), factor);
        self
    }

    pub fn min_error(mut self, key: &str, floor: f64) -> Self {
        self.config.min_error.insert(key.to_string(), floor);
        self
    }

    pub fn min_relative_error(mut self, key: &str, fraction: f64) -> Self {
        self.config.min_relative_error.insert(key.to_string(), fraction);
        self
    }

    pub fn max_error(mut self, key: &str, ceiling: f64) -> Self {
        self.config.max_error.insert(key.to_string(), ceiling);
        self
    }

    pub fn max_relative_error(mut self, key: &str, fraction: f64) -> Self {
        self.config.max_relative_error.insert(key.to_string(), fraction);
        self
    }

    /// Finalize the builder.
    ///
    /// Return
    /// ----------
    /// * `Err(OifitsError::InvalidErrorFilter)` for an unknown observable key or a negative or
    ///   non-finite value (see [`ErrorFilterConfig::validate`]).
    pub fn build(self) -> Result<ErrorFilterConfig, OifitsError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

impl fmt::Display for ErrorFilterConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if f.alternate() {
            const RULE_COL: usize = 32;
            writeln!(f, "Error filter")?;
            writeln!(f, "------------")?;

            macro_rules! line {
                ($family:expr, $key:expr, $val:expr) => {{
                    let s = format!("{}[{}]", $family, $key);
                    let pad = if s.len() < RULE_COL {
                        " ".repeat(RULE_COL - s.len())
                    } else {
                        " ".to_string()
                    };
                    writeln!(f, "  {}{}= {}", s, pad, $val)
                }};
            }

            for (family, rules) in self.families() {
                for (key, value) in rules {
                    line!(family, key, value)?;
                }
            }
            Ok(())
        } else {
            let parts: Vec<String> = self
                .families()
                .iter()
                .flat_map(|(family, rules)| {
                    rules
                        .iter()
                        .map(move |(key, value)| format!("{family}[{key}]={value}"))
                })
                .collect();
            write!(f, "ErrorFilterConfig({})", parts.join(", "))
        }
    }
}
