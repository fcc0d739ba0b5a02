//! CSMA/CA backoff: value generation, slot alignment and contention-window
//! adaptation.

use rand::Rng;
use rand::rngs::StdRng;
use rand_distr::{Distribution, Exp};

use crate::scheduler::{SAME_TIME_TOLERANCE, Time};
use crate::simulation::frames::SLOT_TIME;
use crate::simulation::types::{BackoffKind, PdfKind};

/// Draw a new backoff duration for the given contention window.
///
/// Deterministic/slotted draws a uniform slot count in [0, CW−1];
/// the exponential selector draws from an exponential with mean
/// (CW−1)/2 slots, rounded to a whole slot when slotted.
pub fn compute_backoff(pdf: PdfKind, cw: u32, kind: BackoffKind, rng: &mut StdRng) -> Time {
    let expected_slots = (cw.saturating_sub(1)) as f64 / 2.0;
    match (pdf, kind) {
        (PdfKind::Deterministic, BackoffKind::Slotted) => {
            let num_slots = rng.gen_range(0..cw);
            num_slots as f64 * SLOT_TIME
        }
        (PdfKind::Deterministic, BackoffKind::Continuous) => expected_slots * SLOT_TIME,
        (PdfKind::Exponential, BackoffKind::Slotted) => {
            if expected_slots == 0.0 {
                return 0.0;
            }
            let exp = Exp::new(1.0 / expected_slots).expect("invalid backoff rate");
            let slots: f64 = exp.sample(rng);
            slots.round() * SLOT_TIME
        }
        (PdfKind::Exponential, BackoffKind::Continuous) => {
            if expected_slots == 0.0 {
                return 0.0;
            }
            let exp = Exp::new(1.0 / (expected_slots * SLOT_TIME)).expect("invalid backoff rate");
            exp.sample(rng)
        }
    }
}

/// Align a frozen backoff remainder to the next slot boundary on resume.
/// Remainders within the same-time tolerance of a boundary snap to it;
/// anything else rounds up to the next whole slot. Continuous timers are
/// returned untouched.
pub fn align_remaining(kind: BackoffKind, remaining: Time) -> Time {
    match kind {
        BackoffKind::Slotted => {
            let closest = (remaining / SLOT_TIME).round();
            if (remaining - closest * SLOT_TIME).abs() < SAME_TIME_TOLERANCE {
                closest * SLOT_TIME
            } else {
                (remaining / SLOT_TIME).ceil() * SLOT_TIME
            }
        }
        BackoffKind::Continuous => remaining,
    }
}

/// Binary-exponential contention window: CW = CWmin · 2^stage with
/// stage ∈ [0, stage_max]. With adaptation disabled the stage is frozen
/// at 0.
#[derive(Debug, Clone)]
pub struct ContentionWindow {
    cw_min: u32,
    stage_max: u32,
    stage: u32,
    adaptation: bool,
}

impl ContentionWindow {
    pub fn new(cw_min: u32, stage_max: u32, adaptation: bool) -> Self {
        Self {
            cw_min: cw_min.max(1),
            stage_max,
            stage: 0,
            adaptation,
        }
    }

    pub fn current(&self) -> u32 {
        self.cw_min << self.stage
    }

    pub fn stage(&self) -> u32 {
        self.stage
    }

    /// Escalate after a transmission failure (capped at stage_max).
    pub fn increase(&mut self) {
        if self.adaptation && self.stage < self.stage_max {
            self.stage += 1;
        }
    }

    /// Reset after a successful exchange.
    pub fn reset(&mut self) {
        if self.adaptation {
            self.stage = 0;
        }
    }
}
