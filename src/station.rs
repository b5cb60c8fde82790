//! # Station, baseline and triangle identities
//!
//! Raw OIFITS records reference telescopes through opaque `STA_INDEX` integers resolved against
//! an `OI_ARRAY` extension. Once resolved, identities are structured values:
//!
//! - [`StationId`]: one telescope/station name (`"A0"`, `"UT1"`, ...),
//! - [`Baseline`]: an ordered pair of stations, as recorded in the file,
//! - [`Triangle`]: an ordered triple of stations, as recorded in the file.
//!
//! ## Names
//!
//! Table keys are the concatenation of the ordered station names (`"A0B1"`, `"A0B1C2"`).
//! Legs of a triangle are derived from the structured [`Triangle`], never by splitting its name,
//! so stations of unequal name width are supported.
//!
//! ## Orientation
//!
//! A baseline recorded as `(B, A)` measures the same pair as `(A, B)` with opposite spatial
//! frequency. [`Orientation`] records which way a closure leg maps onto a stored baseline and
//! [`Orientation::sign`] is the `±1` factor applied to its coordinates and phases.
use std::fmt;

use serde::{Deserialize, Serialize};

/// Name of a telescope station.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StationId(String);

impl StationId {
    pub fn new(name: impl Into<String>) -> Self {
        StationId(name.into().trim().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for StationId {
    fn from(value: &str) -> Self {
        StationId::new(value)
    }
}

/// Orientation of a closure leg relative to the stored baseline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Orientation {
    Forward,
    Reverse,
}

impl Orientation {
    /// `+1.0` for [`Orientation::Forward`], `-1.0` for [`Orientation::Reverse`].
    pub fn sign(self) -> f64 {
        match self {
            Orientation::Forward => 1.0,
            Orientation::Reverse => -1.0,
        }
    }
}

/// Ordered pair of stations.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Baseline {
    pub first: StationId,
    pub second: StationId,
}

impl Baseline {
    pub fn new(first: StationId, second: StationId) -> Self {
        Baseline { first, second }
    }

    /// Table key: concatenation of the two station names.
    pub fn name(&self) -> String {
        format!("{}{}", self.first, self.second)
    }

    pub fn reversed(&self) -> Baseline {
        Baseline {
            first: self.second.clone(),
            second: self.first.clone(),
        }
    }

    pub fn stations(&self) -> [&StationId; 2] {
        [&self.first, &self.second]
    }
}

impl fmt::Display for Baseline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.first, self.second)
    }
}

/// Ordered triple of stations.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Triangle {
    pub stations: [StationId; 3],
}

impl Triangle {
    pub fn new(a: StationId, b: StationId, c: StationId) -> Self {
        Triangle {
            stations: [a, b, c],
        }
    }

    pub fn name(&self) -> String {
        self.stations.iter().map(StationId::as_str).collect()
    }

    /// The three legs in closure order: `(1,2)`, `(2,3)`, `(3,1)`.
    pub fn legs(&self) -> [Baseline; 3] {
        let [a, b, c] = &self.stations;
        [
            Baseline::new(a.clone(), b.clone()),
            Baseline::new(b.clone(), c.clone()),
            Baseline::new(c.clone(), a.clone()),
        ]
    }
}

impl fmt::Display for Triangle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

#[cfg(test)]
mod test_station {
    use super::*;

    fn st(s: &str) -> StationId {
        StationId::new(s)
    }

    #[test]
    fn test_baseline_reversed() {
        let ab = Baseline::new(st("A0"), st("B12"));
        let ba = ab.reversed();
        assert_eq!(ab.name(), "A0B12");
        assert_eq!(ba.name(), "B12A0");
        assert_eq!(ba.reversed(), ab);
        assert_eq!(Orientation::Reverse.sign(), -1.0);
    }

    #[test]
    fn test_triangle_legs_unequal_width() {
        let t = Triangle::new(st("UT1"), st("A0"), st("J10"));
        assert_eq!(t.name(), "UT1A0J10");
        let legs: Vec<String> = t.legs().iter().map(Baseline::name).collect();
        assert_eq!(legs, vec!["UT1A0", "A0J10", "J10UT1"]);
    }

    #[test]
    fn test_station_trimmed() {
        assert_eq!(StationId::new(" U4 ").as_str(), "U4");
    }
}
