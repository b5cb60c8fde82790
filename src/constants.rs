//! # Constants and type definitions for oidata
//!
//! This module centralizes the **unit conversions**, **numerical tolerances**, and **common type
//! aliases** used throughout the crate.
//!
//! ## Overview
//!
//! - Unit conversions (metres ↔ microns)
//! - Tolerances used when matching epochs across tables
//! - Rebinning kernel constants
//! - Core type aliases and container types shared by every table
//!
//! These definitions are used by the ingestion, closure, merge and collapse modules.

use std::collections::{BTreeMap, BTreeSet};

use ahash::RandomState;
use ordered_float::OrderedFloat;
use std::collections::HashMap;

// -------------------------------------------------------------------------------------------------
// Unit conversions
// -------------------------------------------------------------------------------------------------

/// Metres → microns. OIFITS stores `EFF_WAVE`/`EFF_BAND` in metres.
pub const METER_TO_MICRON: f64 = 1e6;

/// Degrees Celsius → Kelvin offset
pub const CELSIUS_TO_KELVIN: f64 = 273.15;

// -------------------------------------------------------------------------------------------------
// Tolerances and kernel constants
// -------------------------------------------------------------------------------------------------

/// Maximum epoch difference (days) for two rows to be considered simultaneous (~8.6 s).
pub const EPOCH_TOLERANCE: MJD = 1e-4;

/// Width of the Gaussian rebinning kernel, as a fraction of the new grid median spacing.
pub const KERNEL_WIDTH_FACTOR: f64 = 0.6;

/// A binned channel is flagged when more than this fraction of its kernel mass is flagged.
pub const FLAG_MASS_THRESHOLD: f64 = 0.5;

/// Relative tolerance used to decide that two wavelength grids are the same grid.
pub const GRID_IDENTITY_EPS: f64 = 1e-12;

/// Name of the aggregate pseudo-station/baseline/triangle produced by the collapser.
pub const ALL: &str = "all";

// -------------------------------------------------------------------------------------------------
// Type aliases
// -------------------------------------------------------------------------------------------------

/// Wavelength in microns
pub type Micron = f64;
/// Distance in metres
pub type Meter = f64;
/// Angle in degrees
pub type Degree = f64;
/// Modified Julian Date (days)
pub type MJD = f64;

/// Hash map using `ahash` for scratch lookups where ordering does not matter.
pub type FastHashMap<K, V> = HashMap<K, V, RandomState>;

/// Epoch → names of the stations/baselines/triangles observed at that epoch.
pub type ConfigurationsPerEpoch = BTreeMap<OrderedFloat<MJD>, BTreeSet<String>>;
