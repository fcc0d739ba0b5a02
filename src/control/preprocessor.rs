//! Agent pre-processor: maps Configuration to an action index over the
//! cartesian action space and Performance to a scalar reward.

use crate::simulation::types::{Configuration, Performance};

/// RSSI range mapped onto [0, 1] for the min-RSSI reward [dBm].
const RSSI_REWARD_FLOOR_DBM: f64 = -94.0;
const RSSI_REWARD_CEIL_DBM: f64 = -40.0;

/// Reward extracted from a performance report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RewardType {
    PacketSuccessRatio,
    NormalizedThroughput,
    MinRssi,
    ReciprocalMaxDelay,
    ReciprocalAverageDelay,
    ChannelOccupancy,
}

impl RewardType {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "packet-success-ratio" => Some(RewardType::PacketSuccessRatio),
            "normalized-throughput" => Some(RewardType::NormalizedThroughput),
            "min-rssi" => Some(RewardType::MinRssi),
            "reciprocal-max-delay" => Some(RewardType::ReciprocalMaxDelay),
            "reciprocal-average-delay" => Some(RewardType::ReciprocalAverageDelay),
            "channel-occupancy" => Some(RewardType::ChannelOccupancy),
            _ => None,
        }
    }

    pub const NAMES: [&'static str; 6] = [
        "packet-success-ratio",
        "normalized-throughput",
        "min-rssi",
        "reciprocal-max-delay",
        "reciprocal-average-delay",
        "channel-occupancy",
    ];
}

/// The tunable dimensions an agent explores. Arms index the cartesian
/// product channels × pd × tx-power × max-bandwidth, channel fastest.
#[derive(Debug, Clone)]
pub struct ActionSpace {
    pub channels: Vec<usize>,
    pub pd_dbm: Vec<f64>,
    pub tx_power_dbm: Vec<f64>,
    pub max_bandwidth: Vec<usize>,
}

impl ActionSpace {
    pub fn num_arms(&self) -> usize {
        self.channels.len() * self.pd_dbm.len() * self.tx_power_dbm.len() * self.max_bandwidth.len()
    }
}

pub struct PreProcessor {
    space: ActionSpace,
    reward_type: RewardType,
}

impl PreProcessor {
    pub fn new(space: ActionSpace, reward_type: RewardType) -> Self {
        Self { space, reward_type }
    }

    pub fn num_arms(&self) -> usize {
        self.space.num_arms()
    }

    /// Primary channels the agent may explore (controller channel planning).
    pub fn channels(&self) -> &[usize] {
        &self.space.channels
    }

    /// Arm index of a configuration; None when the configuration lies
    /// outside the action space (e.g. the operator's initial settings).
    pub fn arm_of(&self, config: &Configuration) -> Option<usize> {
        let ch = self
            .space
            .channels
            .iter()
            .position(|&c| c == config.primary_channel)?;
        let pd = self
            .space
            .pd_dbm
            .iter()
            .position(|&p| (p - config.pd_dbm).abs() < 1e-9)?;
        let pw = self
            .space
            .tx_power_dbm
            .iter()
            .position(|&p| (p - config.tx_power_dbm).abs() < 1e-9)?;
        let bw = self
            .space
            .max_bandwidth
            .iter()
            .position(|&b| b == config.max_bandwidth)?;
        Some(
            ((bw * self.space.tx_power_dbm.len() + pw) * self.space.pd_dbm.len() + pd)
                * self.space.channels.len()
                + ch,
        )
    }

    /// Configuration realizing the given arm, carrying over the fields the
    /// action space does not touch.
    pub fn config_for(&self, arm: usize, base: &Configuration) -> Configuration {
        let ch = arm % self.space.channels.len();
        let rest = arm / self.space.channels.len();
        let pd = rest % self.space.pd_dbm.len();
        let rest = rest / self.space.pd_dbm.len();
        let pw = rest % self.space.tx_power_dbm.len();
        let bw = rest / self.space.tx_power_dbm.len();
        Configuration {
            primary_channel: self.space.channels[ch],
            pd_dbm: self.space.pd_dbm[pd],
            tx_power_dbm: self.space.tx_power_dbm[pw],
            max_bandwidth: self.space.max_bandwidth[bw],
            ..base.clone()
        }
    }

    /// Scalar reward in [0, 1] for the configured reward type.
    pub fn reward(&self, perf: &Performance) -> f64 {
        match self.reward_type {
            RewardType::PacketSuccessRatio => {
                if perf.data_packets_sent == 0 {
                    0.0
                } else {
                    perf.data_packets_acked as f64 / perf.data_packets_sent as f64
                }
            }
            RewardType::NormalizedThroughput => {
                if perf.max_bound_throughput_bps <= 0.0 {
                    0.0
                } else {
                    (perf.throughput_bps / perf.max_bound_throughput_bps).clamp(0.0, 1.0)
                }
            }
            RewardType::MinRssi => {
                let min = perf
                    .rssi_per_wlan_dbm
                    .iter()
                    .copied()
                    .filter(|r| r.is_finite())
                    .fold(f64::INFINITY, f64::min);
                if !min.is_finite() {
                    return 0.0;
                }
                ((min - RSSI_REWARD_FLOOR_DBM) / (RSSI_REWARD_CEIL_DBM - RSSI_REWARD_FLOOR_DBM))
                    .clamp(0.0, 1.0)
            }
            RewardType::ReciprocalMaxDelay => 1.0 / (1.0 + perf.delay_max),
            RewardType::ReciprocalAverageDelay => 1.0 / (1.0 + perf.average_delay()),
            RewardType::ChannelOccupancy => perf.channel_occupancy.clamp(0.0, 1.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn space() -> ActionSpace {
        ActionSpace {
            channels: vec![0, 2, 4],
            pd_dbm: vec![-82.0, -72.0],
            tx_power_dbm: vec![10.0, 20.0],
            max_bandwidth: vec![1, 2],
        }
    }

    fn base_config() -> Configuration {
        Configuration {
            timestamp: 0.0,
            primary_channel: 0,
            pd_dbm: -82.0,
            tx_power_dbm: 20.0,
            max_bandwidth: 1,
            spatial_reuse_enabled: false,
            bss_color: -1,
            srg: -1,
            non_srg_obss_pd_dbm: -82.0,
            srg_obss_pd_dbm: -82.0,
        }
    }

    #[test]
    fn arm_round_trip_covers_the_whole_space() {
        let pp = PreProcessor::new(space(), RewardType::NormalizedThroughput);
        assert_eq!(pp.num_arms(), 24);
        let base = base_config();
        for arm in 0..pp.num_arms() {
            let config = pp.config_for(arm, &base);
            assert_eq!(pp.arm_of(&config), Some(arm));
        }
    }

    #[test]
    fn foreign_configuration_has_no_arm() {
        let pp = PreProcessor::new(space(), RewardType::NormalizedThroughput);
        let mut config = base_config();
        config.primary_channel = 7;
        assert_eq!(pp.arm_of(&config), None);
    }

    #[test]
    fn rewards_stay_normalized() {
        let mut perf = Performance {
            throughput_bps: 40e6,
            max_bound_throughput_bps: 80e6,
            data_packets_sent: 100,
            data_packets_acked: 90,
            delay_max: 3.0,
            rssi_per_wlan_dbm: vec![-67.0, -80.0],
            channel_occupancy: 0.4,
            ..Default::default()
        };
        perf.delay_sum = 1.0;
        perf.num_delay_samples = 4;

        let r = |ty| PreProcessor::new(space(), ty).reward(&perf);
        assert!((r(RewardType::PacketSuccessRatio) - 0.9).abs() < 1e-12);
        assert!((r(RewardType::NormalizedThroughput) - 0.5).abs() < 1e-12);
        // min RSSI −80 dBm → (−80 + 94) / 54.
        assert!((r(RewardType::MinRssi) - 14.0 / 54.0).abs() < 1e-12);
        assert!((r(RewardType::ReciprocalMaxDelay) - 0.25).abs() < 1e-12);
        assert!((r(RewardType::ReciprocalAverageDelay) - 0.8).abs() < 1e-12);
        assert!((r(RewardType::ChannelOccupancy) - 0.4).abs() < 1e-12);
        for ty in [
            RewardType::PacketSuccessRatio,
            RewardType::NormalizedThroughput,
            RewardType::MinRssi,
            RewardType::ReciprocalMaxDelay,
            RewardType::ReciprocalAverageDelay,
            RewardType::ChannelOccupancy,
        ] {
            let v = r(ty);
            assert!((0.0..=1.0).contains(&v), "{ty:?} -> {v}");
        }
    }
}
