//! Radio propagation: power unit conversions and path-loss models.
//!
//! Powers are stored internally as linear picowatts; dBm appears only at
//! the interfaces. The path-loss models cover free space, a log-distance
//! indoor model (stochastic and deterministic variants) and the TGax
//! simulation scenarios (residential, enterprise, indoor BSS, outdoor BSS).

use rand::rngs::StdRng;
use rand_distr::{Distribution, Normal};

/// Speed of light [m/s].
const SPEED_OF_LIGHT: f64 = 3.0e8;

/// Log-distance exponent of the indoor models.
const INDOOR_PATH_LOSS_EXPONENT: f64 = 4.4;

/// Shadowing standard deviation of the stochastic indoor model [dB].
const INDOOR_SHADOWING_SIGMA: f64 = 5.0;

/// Average distance between walls assumed by the TGax residential and
/// enterprise scenarios [m].
const WALL_EVERY_M: f64 = 10.0;

/// Path-loss model selected in the system input file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathLossModel {
    FreeSpace,
    /// Log-distance with log-normal shadowing.
    Indoor,
    /// Log-distance without the stochastic term.
    IndoorDeterministic,
    /// TGax scenario 1.
    TgaxResidential,
    /// TGax scenario 2.
    TgaxEnterprise,
    /// TGax scenario 3.
    TgaxIndoorBss,
    /// TGax scenario 4.
    TgaxOutdoorBss,
}

impl PathLossModel {
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(PathLossModel::FreeSpace),
            2 => Some(PathLossModel::Indoor),
            3 => Some(PathLossModel::IndoorDeterministic),
            4 => Some(PathLossModel::TgaxResidential),
            5 => Some(PathLossModel::TgaxEnterprise),
            6 => Some(PathLossModel::TgaxIndoorBss),
            7 => Some(PathLossModel::TgaxOutdoorBss),
            _ => None,
        }
    }
}

// ---------- unit conversions ----------

pub fn pw_to_dbm(pw: f64) -> f64 {
    10.0 * pw.log10() - 90.0
}

pub fn dbm_to_pw(dbm: f64) -> f64 {
    10f64.powf((dbm + 90.0) / 10.0)
}

pub fn mw_to_dbm(mw: f64) -> f64 {
    10.0 * mw.log10()
}

pub fn dbm_to_mw(dbm: f64) -> f64 {
    10f64.powf(dbm / 10.0)
}

pub fn w_to_dbw(w: f64) -> f64 {
    10.0 * w.log10()
}

pub fn dbw_to_w(dbw: f64) -> f64 {
    10f64.powf(dbw / 10.0)
}

pub fn linear_to_db(linear: f64) -> f64 {
    10.0 * linear.log10()
}

pub fn db_to_linear(db: f64) -> f64 {
    10f64.powf(db / 10.0)
}

// ---------- path loss ----------

/// Free-space path loss at distance `d` [m] and frequency `f` [Hz].
fn free_space_loss(d: f64, f: f64) -> f64 {
    20.0 * d.log10() + 20.0 * f.log10() + 20.0 * (4.0 * std::f64::consts::PI / SPEED_OF_LIGHT).log10()
}

/// TGax dual-slope term shared by the indoor scenarios: free-space up to the
/// breakpoint, 35 dB/decade beyond it.
fn tgax_dual_slope(d: f64, f: f64, breakpoint: f64) -> f64 {
    let base = 40.05 + 20.0 * (f / 2.4e9).log10() + 20.0 * (d.min(breakpoint) / 1.0).log10();
    if d > breakpoint {
        base + 35.0 * (d / breakpoint).log10()
    } else {
        base
    }
}

/// Path loss in dB for the given model. The stochastic indoor model draws
/// its shadowing term from `rng`; every other model is deterministic.
pub fn path_loss_db(model: PathLossModel, distance: f64, freq_hz: f64, rng: &mut StdRng) -> f64 {
    // Clamp below one meter so the log-distance terms stay finite for
    // co-located nodes.
    let d = distance.max(1.0);
    match model {
        PathLossModel::FreeSpace => free_space_loss(d, freq_hz),
        PathLossModel::Indoor => {
            let normal = Normal::new(0.0, INDOOR_SHADOWING_SIGMA).expect("invalid shadowing sigma");
            let shadowing: f64 = normal.sample(rng);
            free_space_loss(1.0, freq_hz) + 10.0 * INDOOR_PATH_LOSS_EXPONENT * d.log10() + shadowing
        }
        PathLossModel::IndoorDeterministic => {
            free_space_loss(1.0, freq_hz) + 10.0 * INDOOR_PATH_LOSS_EXPONENT * d.log10()
        }
        PathLossModel::TgaxResidential => {
            let walls = (d / WALL_EVERY_M).floor();
            tgax_dual_slope(d, freq_hz, 5.0) + 5.0 * walls
        }
        PathLossModel::TgaxEnterprise => {
            let walls = (d / WALL_EVERY_M).floor();
            tgax_dual_slope(d, freq_hz, 10.0) + 7.0 * walls
        }
        PathLossModel::TgaxIndoorBss => tgax_dual_slope(d, freq_hz, 10.0),
        PathLossModel::TgaxOutdoorBss => {
            36.7 * d.log10() + 22.7 + 26.0 * (freq_hz / 1.0e9).log10()
        }
    }
}

/// Received power in pW at `distance` meters from a transmitter radiating
/// `tx_power_dbm` per 20 MHz channel with the given antenna gains.
pub fn received_power_pw(
    model: PathLossModel,
    distance: f64,
    tx_power_dbm: f64,
    tx_gain_db: f64,
    rx_gain_db: f64,
    freq_hz: f64,
    rng: &mut StdRng,
) -> f64 {
    let loss = path_loss_db(model, distance, freq_hz, rng);
    dbm_to_pw(tx_power_dbm + tx_gain_db + rx_gain_db - loss)
}
