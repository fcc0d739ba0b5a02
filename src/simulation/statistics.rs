//! Per-node statistics aggregation.
//!
//! Counters accumulate over an observation window that can be reset once
//! mid-run (warm-up discard) and are folded into a `Performance` snapshot
//! for agents and the final report.

use std::collections::HashMap;

use crate::scheduler::Time;
use crate::simulation::types::{LossReason, NUM_LOSS_REASONS, NodeId, Performance};

#[derive(Debug)]
pub struct NodeStatistics {
    pub window_start: Time,
    pub data_packets_sent: u64,
    pub data_packets_acked: u64,
    pub data_packets_lost: u64,
    pub rts_sent: u64,
    pub rts_lost: u64,
    pub cts_sent: u64,
    pub cts_lost: u64,
    pub packets_generated: u64,
    pub packets_dropped: u64,
    /// Backoff interruptions (pause requests while contending).
    pub backoff_interruptions: u64,
    pub loss_reasons: [u64; NUM_LOSS_REASONS],
    pub bits_acked: u64,
    pub bits_lost: u64,
    pub delay_sum: f64,
    pub delay_min: f64,
    pub delay_max: f64,
    pub num_delay_samples: u64,
    /// Successful airtime per basic channel.
    pub tx_time_per_channel: Vec<f64>,
    pub lost_time_per_channel: Vec<f64>,
    /// Successful airtime per width {1, 2, 4, 8}.
    pub tx_time_per_width: [f64; 4],
    pub lost_time_per_width: [f64; 4],
    /// Strongest RSSI overheard from each WLAN, dBm.
    pub max_rssi_per_wlan: Vec<f64>,
    /// Bits acknowledged per destination STA.
    pub bits_acked_per_destination: HashMap<NodeId, u64>,
    // Primary-channel occupancy integration.
    busy_time: f64,
    busy_since: Option<Time>,
}

impl NodeStatistics {
    pub fn new(num_channels: usize, num_wlans: usize) -> Self {
        Self {
            window_start: 0.0,
            data_packets_sent: 0,
            data_packets_acked: 0,
            data_packets_lost: 0,
            rts_sent: 0,
            rts_lost: 0,
            cts_sent: 0,
            cts_lost: 0,
            packets_generated: 0,
            packets_dropped: 0,
            backoff_interruptions: 0,
            loss_reasons: [0; NUM_LOSS_REASONS],
            bits_acked: 0,
            bits_lost: 0,
            delay_sum: 0.0,
            delay_min: f64::INFINITY,
            delay_max: 0.0,
            num_delay_samples: 0,
            tx_time_per_channel: vec![0.0; num_channels],
            lost_time_per_channel: vec![0.0; num_channels],
            tx_time_per_width: [0.0; 4],
            lost_time_per_width: [0.0; 4],
            max_rssi_per_wlan: vec![f64::NEG_INFINITY; num_wlans],
            bits_acked_per_destination: HashMap::new(),
            busy_time: 0.0,
            busy_since: None,
        }
    }

    /// Discard everything accumulated so far (warm-up reset).
    pub fn clear(&mut self, now: Time) {
        let busy = self.busy_since.map(|_| now);
        *self = NodeStatistics::new(self.tx_time_per_channel.len(), self.max_rssi_per_wlan.len());
        self.window_start = now;
        self.busy_since = busy;
    }

    pub fn record_loss_reason(&mut self, reason: LossReason) {
        self.loss_reasons[reason as usize] += 1;
    }

    pub fn record_delay(&mut self, delay: f64) {
        self.delay_sum += delay;
        self.delay_min = self.delay_min.min(delay);
        self.delay_max = self.delay_max.max(delay);
        self.num_delay_samples += 1;
    }

    /// Integrate primary-channel occupancy across busy/free transitions.
    pub fn track_primary_busy(&mut self, busy: bool, now: Time) {
        match (self.busy_since, busy) {
            (None, true) => self.busy_since = Some(now),
            (Some(since), false) => {
                self.busy_time += now - since;
                self.busy_since = None;
            }
            _ => {}
        }
    }

    pub fn record_airtime(&mut self, left: usize, right: usize, duration: f64, successful: bool) {
        let width_ix = (right - left + 1).trailing_zeros() as usize;
        if successful {
            for c in left..=right {
                self.tx_time_per_channel[c] += duration;
            }
            self.tx_time_per_width[width_ix] += duration;
        } else {
            for c in left..=right {
                self.lost_time_per_channel[c] += duration;
            }
            self.lost_time_per_width[width_ix] += duration;
        }
    }

    pub fn observe_rssi(&mut self, wlan: usize, rssi_dbm: f64) {
        if rssi_dbm > self.max_rssi_per_wlan[wlan] {
            self.max_rssi_per_wlan[wlan] = rssi_dbm;
        }
    }

    /// Fold the window into a `Performance` snapshot at time `now`.
    /// `max_bound_throughput_bps` is supplied by the node from its current
    /// MCS/width/aggregation working point; `sta_ids` orders the per-STA
    /// throughput list.
    pub fn build_performance(
        &self,
        now: Time,
        max_bound_throughput_bps: f64,
        sta_ids: &[NodeId],
    ) -> Performance {
        let window = (now - self.window_start).max(f64::MIN_POSITIVE);
        let busy = self.busy_time
            + self
                .busy_since
                .map(|since| now - since)
                .unwrap_or(0.0);
        Performance {
            throughput_bps: self.bits_acked as f64 / window,
            throughput_loss_bps: self.bits_lost as f64 / window,
            max_bound_throughput_bps,
            data_packets_sent: self.data_packets_sent,
            data_packets_acked: self.data_packets_acked,
            data_packets_lost: self.data_packets_lost,
            rts_sent: self.rts_sent,
            rts_lost: self.rts_lost,
            cts_sent: self.cts_sent,
            cts_lost: self.cts_lost,
            packets_generated: self.packets_generated,
            packets_dropped: self.packets_dropped,
            delay_sum: self.delay_sum,
            delay_min: if self.num_delay_samples == 0 {
                0.0
            } else {
                self.delay_min
            },
            delay_max: self.delay_max,
            num_delay_samples: self.num_delay_samples,
            rssi_per_wlan_dbm: self.max_rssi_per_wlan.clone(),
            channel_occupancy: (busy / window).clamp(0.0, 1.0),
            tx_time_per_channel: self.tx_time_per_channel.clone(),
            lost_time_per_channel: self.lost_time_per_channel.clone(),
            tx_time_per_width: self.tx_time_per_width,
            lost_time_per_width: self.lost_time_per_width,
            throughput_per_sta_bps: sta_ids
                .iter()
                .map(|id| {
                    self.bits_acked_per_destination
                        .get(id)
                        .map(|&bits| bits as f64 / window)
                        .unwrap_or(0.0)
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn occupancy_integrates_busy_intervals() {
        let mut stats = NodeStatistics::new(8, 1);
        stats.track_primary_busy(true, 1.0);
        stats.track_primary_busy(true, 1.5); // redundant, ignored
        stats.track_primary_busy(false, 2.0);
        stats.track_primary_busy(true, 9.0);
        let perf = stats.build_performance(10.0, 0.0, &[]);
        // Busy 1.0s (1..2) + 1.0s open interval (9..10) over a 10s window.
        assert!((perf.channel_occupancy - 0.2).abs() < 1e-9);
    }

    #[test]
    fn delay_extrema_and_average() {
        let mut stats = NodeStatistics::new(1, 1);
        for d in [0.5, 0.1, 0.9] {
            stats.record_delay(d);
        }
        let perf = stats.build_performance(1.0, 0.0, &[]);
        assert_eq!(perf.delay_min, 0.1);
        assert_eq!(perf.delay_max, 0.9);
        assert!((perf.average_delay() - 0.5).abs() < 1e-12);
    }

    #[test]
    fn clear_resets_the_window() {
        let mut stats = NodeStatistics::new(2, 1);
        stats.bits_acked = 1_000_000;
        stats.record_loss_reason(LossReason::Interference);
        stats.record_airtime(0, 1, 0.5, true);
        stats.clear(5.0);
        assert_eq!(stats.bits_acked, 0);
        assert_eq!(stats.loss_reasons[LossReason::Interference as usize], 0);
        assert_eq!(stats.tx_time_per_width[1], 0.0);
        assert_eq!(stats.window_start, 5.0);
        let perf = stats.build_performance(10.0, 0.0, &[]);
        assert_eq!(perf.throughput_bps, 0.0);
    }

    #[test]
    fn per_sta_throughput_follows_the_sta_order() {
        let mut stats = NodeStatistics::new(1, 1);
        stats.window_start = 0.0;
        stats.bits_acked_per_destination.insert(4, 1_000);
        stats.bits_acked_per_destination.insert(7, 3_000);
        let perf = stats.build_performance(10.0, 0.0, &[7, 4, 9]);
        assert_eq!(perf.throughput_per_sta_bps, vec![300.0, 100.0, 0.0]);
    }

    #[test]
    fn airtime_split_by_outcome() {
        let mut stats = NodeStatistics::new(8, 1);
        stats.record_airtime(0, 3, 2e-3, true);
        stats.record_airtime(0, 0, 1e-3, false);
        assert_eq!(stats.tx_time_per_width[2], 2e-3);
        assert_eq!(stats.lost_time_per_width[0], 1e-3);
        assert_eq!(stats.tx_time_per_channel[2], 2e-3);
        assert_eq!(stats.lost_time_per_channel[0], 1e-3);
        assert_eq!(stats.lost_time_per_channel[1], 0.0);
    }
}
