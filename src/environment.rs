//! # Laboratory environment
//!
//! Optional delay-line and ambient metadata read from the primary header, and the refractive
//! index of air in the delay-line tunnels.
//!
//! ## Overview
//!
//! [`LabEnvironment::from_header`] returns `None` unless every key it needs is present: the
//! environment is an optional product of ingestion, never a source of failure.
//!
//! | Key | Use |
//! |---|---|
//! | `ESO ISS CONF STATION{i}` | station of beam `i` (1 to 4) |
//! | `ESO DEL DLT{i} OPL START` / `END` | delay-line position (m) |
//! | `ESO ISS CONF A{i}L` | fixed optical path of beam `i` (m) |
//! | `ESO ISS TEMP TUN{1..4}` | tunnel temperatures (°C) |
//! | `ESO ISS AMBI PRES` | pressure (mbar) |
//! | `ESO ISS AMBI RHUM` | relative humidity (%) |
//!
//! ## References
//!
//! * R. J. Mathar, *Refractive index of humid air in the infrared: model fits*,
//!   J. Opt. A 9 (2007) 470, table 1. Valid from 1.3 to 2.5 µm.
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::constants::{Meter, Micron, CELSIUS_TO_KELVIN};
use crate::reader::Header;
use crate::station::StationId;

/// Number of beams described in the header.
const N_BEAMS: usize = 4;

/// Reference temperature of the JHK fit (K).
const T_REF: f64 = CELSIUS_TO_KELVIN + 17.5;
/// Reference relative humidity of the JHK fit (%).
const H_REF: f64 = 10.0;
/// Reference pressure of the JHK fit (Pa).
const P_REF: f64 = 75e3;
/// Reference wavenumber of the JHK fit (cm⁻¹).
const NU_REF: f64 = 1e4 / 2.25;

/// `c_ref, c_T, c_TT, c_H, c_HH` per power of `(ν - ν_ref)`.
const TABLE_1A: [[f64; 5]; 6] = [
    [0.200192e-3, 0.588625e-1, -3.01513, -0.103945e-7, 0.573256e-12],
    [0.113474e-9, -0.385766e-7, 0.406167e-3, 0.136858e-11, 0.186367e-16],
    [-0.424595e-14, 0.888019e-10, -0.514544e-6, -0.171039e-14, -0.228150e-19],
    [0.100957e-16, -0.567650e-13, 0.343161e-9, 0.112908e-17, 0.150947e-22],
    [-0.293315e-20, 0.166615e-16, -0.101189e-12, -0.329925e-21, -0.441214e-26],
    [0.307228e-24, -0.174845e-20, 0.106749e-16, 0.344747e-25, 0.461209e-30],
];

/// `c_p, c_pp, c_TH, c_Tp, c_Hp` per power of `(ν - ν_ref)`.
const TABLE_1B: [[f64; 5]; 6] = [
    [0.267085e-8, 0.609186e-17, 0.497859e-4, 0.779176e-6, -0.206567e-15],
    [0.135941e-14, 0.519024e-23, -0.661752e-8, 0.396499e-12, 0.106141e-20],
    [0.135295e-18, -0.419477e-27, 0.832034e-11, 0.395114e-16, -0.149982e-23],
    [0.818218e-23, 0.434120e-30, -0.551793e-14, 0.233587e-20, 0.984046e-27],
    [-0.222957e-26, -0.122445e-33, 0.161899e-17, -0.636441e-24, -0.288266e-30],
    [0.249964e-30, 0.134816e-37, -0.169901e-21, 0.716868e-28, 0.299105e-34],
];

/// Refractive index of humid air at wavelength `wl`.
///
/// Arguments
/// -----------------
/// * `wl`: Wavelength (µm), 1.3 to 2.5.
/// * `temperature`: Temperature (K).
/// * `pressure`: Pressure (mbar).
/// * `humidity`: Relative humidity (%).
///
/// Return
/// ----------
/// * `n(wl)`, close to `1.00027` in standard laboratory conditions.
pub fn refractive_index_jhk(wl: Micron, temperature: f64, pressure: f64, humidity: f64) -> f64 {
    let nu = 1e4 / wl;
    let p = pressure * 100.0;
    let dt = 1.0 / temperature - 1.0 / T_REF;
    let dh = humidity - H_REF;
    let dp = p - P_REF;

    let n: f64 = TABLE_1A
        .iter()
        .zip(TABLE_1B.iter())
        .enumerate()
        .map(|(i, (a, b))| {
            let [c_ref, c_t, c_tt, c_h, c_hh] = *a;
            let [c_p, c_pp, c_th, c_tp, c_hp] = *b;
            let c = c_ref
                + c_t * dt
                + c_tt * dt * dt
                + c_h * dh
                + c_hh * dh * dh
                + c_p * dp
                + c_pp * dp * dp
                + c_th * dt * dh
                + c_tp * dt * dp
                + c_hp * dh * dp;
            c * (nu - NU_REF).powi(i as i32)
        })
        .sum();
    n + 1.0
}

/// Delay-line and ambient conditions of an observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabEnvironment {
    /// Optical path length per station (m).
    pub opl: BTreeMap<StationId, Meter>,
    /// Mean tunnel temperature (K).
    pub temperature_k: f64,
    pub pressure_mbar: f64,
    /// Relative humidity (%).
    pub humidity: f64,
    /// Refractive index of air per channel.
    pub n_lab: Vec<f64>,
}

impl LabEnvironment {
    /// Read the environment from a primary header, `None` if any key is missing.
    ///
    /// Arguments
    /// -----------------
    /// * `header`: Primary header of the file.
    /// * `wavelengths`: Channel grid (µm) on which `n_lab` is evaluated.
    pub fn from_header(header: &Header, wavelengths: &[Micron]) -> Option<LabEnvironment> {
        let mut opl = BTreeMap::new();
        for i in 1..=N_BEAMS {
            let station = header.get_str(&format!("ESO ISS CONF STATION{i}"))?;
            let start = header.get_f64(&format!("ESO DEL DLT{i} OPL START"))?;
            let end = header.get_f64(&format!("ESO DEL DLT{i} OPL END"))?;
            let fixed = header.get_f64(&format!("ESO ISS CONF A{i}L"))?;
            opl.insert(StationId::new(station), 0.5 * (start + end) + fixed);
        }

        let tunnels = (1..=N_BEAMS)
            .map(|i| header.get_f64(&format!("ESO ISS TEMP TUN{i}")))
            .collect::<Option<Vec<f64>>>()?;
        let temperature_k = tunnels.iter().sum::<f64>() / N_BEAMS as f64 + CELSIUS_TO_KELVIN;
        let pressure_mbar = header.get_f64("ESO ISS AMBI PRES")?;
        let humidity = header.get_f64("ESO ISS AMBI RHUM")?;

        let n_lab = wavelengths
            .iter()
            .map(|&wl| refractive_index_jhk(wl, temperature_k, pressure_mbar, humidity))
            .collect();

        Some(LabEnvironment {
            opl,
            temperature_k,
            pressure_mbar,
            humidity,
            n_lab,
        })
    }
}
