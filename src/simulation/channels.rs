//! Per-node channel occupancy accounting and channel-bonding selection.
//!
//! Every node keeps a vector with the linear power (pW) it currently senses
//! on each basic channel, fed by TX-start/TX-end notifications. Each active
//! transmission's per-channel contribution is remembered under its
//! (source, packet id) key, so the TX-end subtraction restores the baseline
//! exactly and mid-reception interference can exclude the frame being
//! decoded.

use rand::Rng;
use rand::rngs::StdRng;
use std::collections::HashMap;

use crate::scheduler::Time;
use crate::simulation::frames::{self, DIFS, Modulation};
use crate::simulation::types::{AdjacentChannelModel, DcbPolicy, NodeId};

/// Attenuation applied per channel of separation when a transmission leaks
/// outside its own range [dB].
const ADJACENT_LEAK_DB_PER_CHANNEL: f64 = 20.0;

/// Residual tolerated on a channel after an add/subtract pair [pW].
const POWER_DRIFT_TOLERANCE: f64 = 1e-18;

/// Channel power state sensed by one node.
pub struct ChannelPower {
    power: Vec<f64>,
    /// Moment each channel last dropped below (or started at) the PD level.
    t_free: Vec<Time>,
    /// Whether the channel was above PD at the previous timestamp update.
    busy: Vec<bool>,
    /// Per-channel contribution of every in-flight transmission.
    contributions: HashMap<(NodeId, u64), Vec<f64>>,
}

impl ChannelPower {
    pub fn new(num_channels: usize) -> Self {
        Self {
            power: vec![0.0; num_channels],
            t_free: vec![0.0; num_channels],
            busy: vec![false; num_channels],
            contributions: HashMap::new(),
        }
    }

    pub fn num_channels(&self) -> usize {
        self.power.len()
    }

    /// Sensed power on channel `c` in pW.
    pub fn power_on(&self, c: usize) -> f64 {
        self.power[c]
    }

    /// Register a transmission's contribution on TX-start.
    pub fn add_transmission(
        &mut self,
        source: NodeId,
        packet_id: u64,
        left: usize,
        right: usize,
        rx_power_pw: f64,
        adjacent_model: AdjacentChannelModel,
    ) {
        let mut per_channel = vec![0.0; self.power.len()];
        for (c, slot) in per_channel.iter_mut().enumerate() {
            *slot = channel_contribution_pw(c, left, right, rx_power_pw, adjacent_model);
        }
        for (c, add) in per_channel.iter().enumerate() {
            self.power[c] += add;
        }
        let prior = self.contributions.insert((source, packet_id), per_channel);
        debug_assert!(prior.is_none(), "duplicate TX-start for ({source}, {packet_id})");
    }

    /// Remove a transmission's contribution on TX-end. Unknown keys are a
    /// no-op (the matching start predates this node's statistics reset).
    pub fn remove_transmission(&mut self, source: NodeId, packet_id: u64) {
        let Some(per_channel) = self.contributions.remove(&(source, packet_id)) else {
            return;
        };
        for (c, sub) in per_channel.iter().enumerate() {
            self.power[c] -= sub;
            if self.power[c] < 0.0 {
                assert!(
                    self.power[c] > -POWER_DRIFT_TOLERANCE,
                    "negative channel power on {c}: {}",
                    self.power[c]
                );
                self.power[c] = 0.0;
            }
        }
    }

    /// Refresh the channel-free timestamps against the node's PD. Busy
    /// channels keep their timestamp pinned at `now`; a channel dropping
    /// below PD records `now` as the instant it became free and keeps it
    /// until the next busy period.
    pub fn update_free_timestamps(&mut self, pd_pw: f64, now: Time) {
        for (c, &p) in self.power.iter().enumerate() {
            let busy = p > pd_pw;
            if busy || self.busy[c] {
                self.t_free[c] = now;
            }
            self.busy[c] = busy;
        }
    }

    /// Whether channel `c` is currently below PD and has been for `DIFS`.
    pub fn free_for_difs(&self, c: usize, pd_pw: f64, now: Time) -> bool {
        self.idle_for(c, pd_pw, now, DIFS)
    }

    /// Whether channel `c` is below PD and has been idle for `ifs` seconds
    /// (DIFS normally, PIFS for PIFS-enabled nodes).
    pub fn idle_for(&self, c: usize, pd_pw: f64, now: Time, ifs: Time) -> bool {
        self.power[c] <= pd_pw
            && now - self.t_free[c] >= ifs - crate::scheduler::SAME_TIME_TOLERANCE
    }

    /// Instant channel `c` last became free (undefined while busy: pinned
    /// to the latest power update).
    pub fn free_since(&self, c: usize) -> Time {
        self.t_free[c]
    }

    /// Strongest interference over [left..right] excluding the contribution
    /// of the frame of interest, in pW.
    pub fn max_interference_pw(
        &self,
        left: usize,
        right: usize,
        of_interest: (NodeId, u64),
    ) -> f64 {
        let excluded = self.contributions.get(&of_interest);
        let mut max = 0.0f64;
        for c in left..=right {
            let own = excluded.map(|v| v[c]).unwrap_or(0.0);
            max = max.max((self.power[c] - own).max(0.0));
        }
        max
    }
}

/// Contribution of a transmission spanning [left..right] on channel `c`,
/// including adjacent-channel leakage.
fn channel_contribution_pw(
    c: usize,
    left: usize,
    right: usize,
    rx_power_pw: f64,
    adjacent_model: AdjacentChannelModel,
) -> f64 {
    if c >= left && c <= right {
        return rx_power_pw;
    }
    let leak = |distance: usize| {
        rx_power_pw * 10f64.powf(-(ADJACENT_LEAK_DB_PER_CHANNEL * distance as f64) / 10.0)
    };
    match adjacent_model {
        AdjacentChannelModel::None => 0.0,
        AdjacentChannelModel::Boundary => {
            let distance = if c < left { left - c } else { c - right };
            leak(distance)
        }
        AdjacentChannelModel::Extreme => {
            let mut sum = 0.0;
            for used in left..=right {
                let distance = used.abs_diff(c);
                sum += leak(distance);
            }
            sum
        }
    }
}

/// Signal-to-interference-plus-noise ratio (linear) of a frame received at
/// `p_rx_pw`.
pub fn sinr(p_rx_pw: f64, noise_pw: f64, interference_pw: f64) -> f64 {
    p_rx_pw / (noise_pw + interference_pw)
}

/// A candidate transmission range of permitted width containing the primary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxRange {
    pub left: usize,
    pub right: usize,
}

impl TxRange {
    pub fn width(&self) -> usize {
        self.right - self.left + 1
    }
}

/// Choose the transmission range when backoff expires, per the node's
/// bonding policy. `free` is indexed by absolute channel and already folds
/// in the PD and free-for-DIFS conditions; `max_width` caps the width (the
/// configuration's max bandwidth). Returns None when no admissible subset
/// exists, which sends the node back to a fresh backoff.
pub fn select_tx_range(
    policy: DcbPolicy,
    primary: usize,
    min_ch: usize,
    max_ch: usize,
    max_width: usize,
    free: &[bool],
    mcs_per_width: Option<&[Modulation; 4]>,
    rng: &mut StdRng,
) -> Option<TxRange> {
    if !free[primary] {
        return None;
    }
    let aligned = candidate_ranges(primary, min_ch, max_ch, max_width, free, true);
    match policy {
        DcbPolicy::OnlyPrimary => Some(TxRange {
            left: primary,
            right: primary,
        }),
        DcbPolicy::Scb => {
            let width = max_ch - min_ch + 1;
            let all_free = (min_ch..=max_ch).all(|c| free[c]);
            if all_free && width.is_power_of_two() && width <= 8 && width <= max_width {
                Some(TxRange {
                    left: min_ch,
                    right: max_ch,
                })
            } else {
                None
            }
        }
        DcbPolicy::ScbLog2 => {
            // The widest log2-aligned range inside the allowed band must be
            // entirely free, or the attempt fails.
            let target = aligned.iter().max_by_key(|r| r.width()).copied();
            let widest_possible = widest_aligned_width(primary, min_ch, max_ch, max_width);
            match target {
                Some(r) if r.width() == widest_possible => Some(r),
                _ => None,
            }
        }
        DcbPolicy::AlwaysMax => candidate_ranges(primary, min_ch, max_ch, max_width, free, false)
            .into_iter()
            .max_by_key(|r| r.width()),
        DcbPolicy::AlwaysMaxLog2 => aligned.into_iter().max_by_key(|r| r.width()),
        DcbPolicy::AlwaysMaxLog2McsOpt => {
            let mcs = mcs_per_width?;
            aligned.into_iter().max_by(|a, b| {
                let rate = |r: &TxRange| {
                    let ix = r.width().trailing_zeros() as usize;
                    frames::data_rate_bps(mcs[ix], r.width())
                };
                rate(a).total_cmp(&rate(b)).then(a.width().cmp(&b.width()))
            })
        }
        DcbPolicy::ProbUniformLog2 => {
            if aligned.is_empty() {
                None
            } else {
                Some(aligned[rng.gen_range(0..aligned.len())])
            }
        }
    }
}

/// Enumerate the free ranges of permitted width containing the primary.
/// With `log2_aligned`, only ranges whose left boundary is a multiple of
/// their width qualify; otherwise any placement does (the widest is still
/// capped at 8 channels).
fn candidate_ranges(
    primary: usize,
    min_ch: usize,
    max_ch: usize,
    max_width: usize,
    free: &[bool],
    log2_aligned: bool,
) -> Vec<TxRange> {
    let mut out = Vec::new();
    for width in [1usize, 2, 4, 8] {
        if width > max_width {
            break;
        }
        if log2_aligned {
            let left = (primary / width) * width;
            let right = left + width - 1;
            if left >= min_ch && right <= max_ch && (left..=right).all(|c| free[c]) {
                out.push(TxRange { left, right });
            }
        } else {
            for left in primary.saturating_sub(width - 1)..=primary {
                let right = left + width - 1;
                if left >= min_ch && right <= max_ch && (left..=right).all(|c| free[c]) {
                    out.push(TxRange { left, right });
                    break;
                }
            }
        }
    }
    out
}

/// Width of the widest log2-aligned range that fits in the allowed band
/// around the primary, regardless of occupancy.
fn widest_aligned_width(primary: usize, min_ch: usize, max_ch: usize, max_width: usize) -> usize {
    let mut widest = 1;
    for width in [2usize, 4, 8] {
        if width > max_width {
            break;
        }
        let left = (primary / width) * width;
        let right = left + width - 1;
        if left >= min_ch && right <= max_ch {
            widest = width;
        }
    }
    widest
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn rng() -> StdRng {
        StdRng::seed_from_u64(42)
    }

    #[test]
    fn power_returns_to_baseline_after_tx_pair() {
        let mut cp = ChannelPower::new(8);
        cp.add_transmission(3, 77, 0, 3, 5.5e3, AdjacentChannelModel::Boundary);
        cp.add_transmission(4, 12, 2, 2, 1.0, AdjacentChannelModel::None);
        let with_both: Vec<f64> = (0..8).map(|c| cp.power_on(c)).collect();
        assert!(with_both[2] > 5.5e3);
        cp.remove_transmission(3, 77);
        cp.remove_transmission(4, 12);
        for c in 0..8 {
            assert!(
                cp.power_on(c).abs() <= POWER_DRIFT_TOLERANCE,
                "residual on {c}: {}",
                cp.power_on(c)
            );
        }
    }

    #[test]
    fn adjacent_channel_models() {
        let p = 1000.0;
        // No leakage outside the range.
        assert_eq!(
            channel_contribution_pw(5, 0, 3, p, AdjacentChannelModel::None),
            0.0
        );
        // Boundary: one channel away leaks 20 dB down.
        let one_off = channel_contribution_pw(4, 0, 3, p, AdjacentChannelModel::Boundary);
        assert!((one_off - p * 1e-2).abs() < 1e-9);
        // Extreme: every used channel contributes.
        let extreme = channel_contribution_pw(4, 0, 3, p, AdjacentChannelModel::Extreme);
        let expected = p * (1e-2 + 1e-4 + 1e-6 + 1e-8);
        assert!((extreme - expected).abs() < 1e-9);
        assert!(extreme > one_off);
    }

    #[test]
    fn interference_excludes_frame_of_interest() {
        let mut cp = ChannelPower::new(8);
        cp.add_transmission(0, 1, 0, 0, 100.0, AdjacentChannelModel::None);
        cp.add_transmission(1, 2, 0, 1, 7.0, AdjacentChannelModel::None);
        let interference = cp.max_interference_pw(0, 0, (0, 1));
        assert!((interference - 7.0).abs() < 1e-12);
        // An unknown frame of interest excludes nothing.
        assert!((cp.max_interference_pw(0, 0, (9, 9)) - 107.0).abs() < 1e-12);
    }

    #[test]
    fn free_timestamps_gate_difs() {
        let mut cp = ChannelPower::new(2);
        let pd = 10.0;
        cp.add_transmission(0, 1, 0, 0, 100.0, AdjacentChannelModel::None);
        cp.update_free_timestamps(pd, 1.0);
        assert!(!cp.free_for_difs(0, pd, 1.0));
        cp.remove_transmission(0, 1);
        cp.update_free_timestamps(pd, 1.0);
        // Freed at t=1.0: not yet idle for DIFS...
        assert!(!cp.free_for_difs(0, pd, 1.0 + DIFS / 2.0));
        // ...but admissible once DIFS has elapsed.
        assert!(cp.free_for_difs(0, pd, 1.0 + DIFS));
        // Channel 1 was never busy.
        assert!(cp.free_for_difs(1, pd, DIFS));
    }

    #[test]
    fn bonding_only_primary_and_busy_primary() {
        let mut r = rng();
        let free = vec![true; 8];
        let range = select_tx_range(DcbPolicy::OnlyPrimary, 3, 0, 7, 8, &free, None, &mut r);
        assert_eq!(range, Some(TxRange { left: 3, right: 3 }));
        let mut busy = free.clone();
        busy[3] = false;
        for policy in [
            DcbPolicy::OnlyPrimary,
            DcbPolicy::Scb,
            DcbPolicy::AlwaysMax,
            DcbPolicy::AlwaysMaxLog2,
            DcbPolicy::ProbUniformLog2,
        ] {
            assert_eq!(
                select_tx_range(policy, 3, 0, 7, 8, &busy, None, &mut r),
                None,
                "{policy:?}"
            );
        }
    }

    #[test]
    fn bonding_scb_is_all_or_nothing() {
        let mut r = rng();
        let free = vec![true; 8];
        assert_eq!(
            select_tx_range(DcbPolicy::Scb, 2, 0, 3, 8, &free, None, &mut r),
            Some(TxRange { left: 0, right: 3 })
        );
        let mut partial = free.clone();
        partial[1] = false;
        assert_eq!(
            select_tx_range(DcbPolicy::Scb, 2, 0, 3, 8, &partial, None, &mut r),
            None
        );
    }

    #[test]
    fn bonding_always_max_log2_respects_alignment() {
        let mut r = rng();
        // Channels 0..=7 free except 1: primary 2 can align to [2..3] and
        // [0..3] is blocked, so the widest aligned range is width 2.
        let mut free = vec![true; 8];
        free[1] = false;
        let range =
            select_tx_range(DcbPolicy::AlwaysMaxLog2, 2, 0, 7, 8, &free, None, &mut r).unwrap();
        assert_eq!(range, TxRange { left: 2, right: 3 });
        // Everything free: the full 8 channels.
        let all = vec![true; 8];
        let range = select_tx_range(DcbPolicy::AlwaysMaxLog2, 2, 0, 7, 8, &all, None, &mut r).unwrap();
        assert_eq!(range, TxRange { left: 0, right: 7 });
        // Max bandwidth caps the width.
        let range = select_tx_range(DcbPolicy::AlwaysMaxLog2, 2, 0, 7, 2, &all, None, &mut r).unwrap();
        assert_eq!(range.width(), 2);
    }

    #[test]
    fn bonding_mcs_opt_prefers_throughput_over_width() {
        let mut r = rng();
        let free = vec![true; 8];
        // Wide range forbidden by MCS, narrow allowed: the narrow one wins.
        let mcs = [
            Modulation::Qam256FiveSixths,
            Modulation::QpskHalf,
            Modulation::Forbidden,
            Modulation::Forbidden,
        ];
        let range = select_tx_range(
            DcbPolicy::AlwaysMaxLog2McsOpt,
            0,
            0,
            7,
            8,
            &free,
            Some(&mcs),
            &mut r,
        )
        .unwrap();
        assert_eq!(range.width(), 1);
    }

    #[test]
    fn bonding_uniform_log2_picks_permitted_widths_only() {
        let mut r = rng();
        let mut free = vec![true; 8];
        free[4] = false; // blocks [0..7]
        for _ in 0..50 {
            let range =
                select_tx_range(DcbPolicy::ProbUniformLog2, 1, 0, 7, 8, &free, None, &mut r)
                    .unwrap();
            assert!(matches!(range.width(), 1 | 2 | 4));
            assert!(range.left <= 1 && 1 <= range.right);
            assert_eq!(range.left % range.width(), 0);
        }
    }
}
