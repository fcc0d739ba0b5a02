//! Central controller: polls every agent, and once all reports are in runs
//! one network-wide optimization method over the RSSI graph.

use crate::control::agent::Agent;
use crate::scheduler::Time;
use crate::simulation::propagation::dbm_to_mw;
use crate::simulation::types::{Configuration, Performance};

/// RSSI above which two BSSs are considered part of the same contention
/// cluster [dBm].
const CLUSTER_RSSI_DBM: f64 = -82.0;

/// Fraction of plays above which an action counts as a neighbor's
/// "most-popular" persistent choice.
const BAN_DOMINANCE: f64 = 1.0 / 3.0;

/// Starting point and adaptation step of the per-victim reward threshold
/// under which banning triggers.
const BAN_THRESHOLD_INITIAL: f64 = 0.2;
const BAN_THRESHOLD_STEP: f64 = 0.05;
const BAN_THRESHOLD_MAX: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerMode {
    /// Collect volunteered reports only; never acts.
    Passive,
    /// Poll all agents each period and act when every report is in.
    Active,
}

impl ControllerMode {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "passive" => Some(ControllerMode::Passive),
            "active" => Some(ControllerMode::Active),
            _ => None,
        }
    }

    pub const NAMES: [&'static str; 2] = ["passive", "active"];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerMethod {
    GraphColoring,
    ActionBanning,
    RewardForwarding,
}

impl ControllerMethod {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "graph-coloring" => Some(ControllerMethod::GraphColoring),
            "action-banning" => Some(ControllerMethod::ActionBanning),
            "reward-forwarding" => Some(ControllerMethod::RewardForwarding),
            _ => None,
        }
    }

    pub const NAMES: [&'static str; 3] =
        ["graph-coloring", "action-banning", "reward-forwarding"];
}

/// What the controller wants done after a decision round.
#[derive(Debug, Clone)]
pub enum ControllerAction {
    Reconfigure { agent: usize, config: Configuration },
    Ban { agent: usize, arm: usize },
    ForwardReward { agent: usize, reward: f64 },
}

pub struct CentralController {
    pub mode: ControllerMode,
    pub method: ControllerMethod,
    period: Time,
    reports: Vec<Option<(Configuration, Performance)>>,
    ban_threshold: Vec<f64>,
}

impl CentralController {
    pub fn new(mode: ControllerMode, method: ControllerMethod, period: Time, num_agents: usize) -> Self {
        Self {
            mode,
            method,
            period,
            reports: vec![None; num_agents],
            ban_threshold: vec![BAN_THRESHOLD_INITIAL; num_agents],
        }
    }

    pub fn period(&self) -> Time {
        self.period
    }

    pub fn receive_report(&mut self, agent: usize, config: Configuration, perf: Performance) {
        self.reports[agent] = Some((config, perf));
    }

    pub fn all_reports_in(&self) -> bool {
        self.reports.iter().all(Option::is_some)
    }

    /// Run the configured method over the collected reports. Consumes the
    /// round: the report counter restarts afterwards.
    pub fn decide(&mut self, agents: &[Agent]) -> Vec<ControllerAction> {
        if !self.all_reports_in() {
            return Vec::new();
        }
        let actions = match self.method {
            ControllerMethod::GraphColoring => self.color_channels(agents),
            ControllerMethod::ActionBanning => self.ban_starving_actions(agents),
            ControllerMethod::RewardForwarding => self.forward_cluster_rewards(agents),
        };
        for slot in &mut self.reports {
            *slot = None;
        }
        actions
    }

    /// Symmetric edge weight between two agents: the stronger direction of
    /// the mutual RSSI, in linear mW (summable).
    fn edge_weight_mw(&self, a: usize, b: usize, agents: &[Agent]) -> f64 {
        let rssi = |from: usize, seen_by: usize| -> f64 {
            self.reports[seen_by]
                .as_ref()
                .map(|(_, perf)| {
                    perf.rssi_per_wlan_dbm
                        .get(agents[from].wlan_id)
                        .copied()
                        .unwrap_or(f64::NEG_INFINITY)
                })
                .unwrap_or(f64::NEG_INFINITY)
        };
        let max_dbm = rssi(a, b).max(rssi(b, a));
        if max_dbm.is_finite() {
            dbm_to_mw(max_dbm)
        } else {
            0.0
        }
    }

    /// Greedy colouring of the RSSI graph: strongest-coupled BSSs first,
    /// each assigned the candidate channel minimizing the summed weight to
    /// the same-channel neighbors already placed.
    fn color_channels(&self, agents: &[Agent]) -> Vec<ControllerAction> {
        let n = agents.len();
        let mut degree: Vec<(usize, f64)> = (0..n)
            .map(|i| {
                let total: f64 = (0..n)
                    .filter(|&j| j != i)
                    .map(|j| self.edge_weight_mw(i, j, agents))
                    .sum();
                (i, total)
            })
            .collect();
        degree.sort_by(|a, b| b.1.total_cmp(&a.1));

        let mut assigned: Vec<Option<usize>> = vec![None; n];
        let mut actions = Vec::new();
        for &(i, _) in &degree {
            let candidates = agents[i].candidate_channels();
            if candidates.is_empty() {
                continue;
            }
            let best = candidates
                .iter()
                .copied()
                .min_by(|&ca, &cb| {
                    let cost = |ch: usize| -> f64 {
                        (0..n)
                            .filter(|&j| assigned[j] == Some(ch))
                            .map(|j| self.edge_weight_mw(i, j, agents))
                            .sum()
                    };
                    cost(ca).total_cmp(&cost(cb))
                })
                .expect("non-empty candidates");
            assigned[i] = Some(best);
            let (config, _) = self.reports[i].as_ref().expect("report present");
            if config.primary_channel != best {
                let mut next = config.clone();
                next.primary_channel = best;
                actions.push(ControllerAction::Reconfigure {
                    agent: i,
                    config: next,
                });
            }
        }
        actions
    }

    /// Ban the dominant action of every cluster neighbor of a starving
    /// agent. The per-victim trigger threshold adapts: it rises while the
    /// victim keeps starving and falls back once it recovers.
    fn ban_starving_actions(&mut self, agents: &[Agent]) -> Vec<ControllerAction> {
        let n = agents.len();
        let mut actions = Vec::new();
        for victim in 0..n {
            let starving = agents[victim].last_reward < self.ban_threshold[victim];
            if !starving {
                self.ban_threshold[victim] =
                    (self.ban_threshold[victim] - BAN_THRESHOLD_STEP).max(BAN_THRESHOLD_INITIAL);
                continue;
            }
            self.ban_threshold[victim] =
                (self.ban_threshold[victim] + BAN_THRESHOLD_STEP).min(BAN_THRESHOLD_MAX);
            for neighbor in 0..n {
                if neighbor == victim {
                    continue;
                }
                let coupled = self.edge_weight_mw(victim, neighbor, agents)
                    >= dbm_to_mw(CLUSTER_RSSI_DBM);
                if !coupled {
                    continue;
                }
                let total = agents[neighbor].total_selections();
                if total == 0 {
                    continue;
                }
                if let Some((arm, count)) = agents[neighbor].most_selected() {
                    if count as f64 / total as f64 > BAN_DOMINANCE {
                        actions.push(ControllerAction::Ban {
                            agent: neighbor,
                            arm,
                        });
                    }
                }
            }
        }
        actions
    }

    /// Forward each agent the average reward of its contention cluster.
    fn forward_cluster_rewards(&self, agents: &[Agent]) -> Vec<ControllerAction> {
        let n = agents.len();
        (0..n)
            .map(|i| {
                let cluster: Vec<usize> = (0..n)
                    .filter(|&j| {
                        j == i
                            || self.edge_weight_mw(i, j, agents) >= dbm_to_mw(CLUSTER_RSSI_DBM)
                    })
                    .collect();
                let reward = cluster.iter().map(|&j| agents[j].last_reward).sum::<f64>()
                    / cluster.len() as f64;
                ControllerAction::ForwardReward { agent: i, reward }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::bandits::{Learner, Strategy};
    use crate::control::preprocessor::{ActionSpace, PreProcessor, RewardType};

    fn make_agent(wlan_id: usize, channels: Vec<usize>) -> Agent {
        let num_arms = channels.len();
        let space = ActionSpace {
            channels,
            pd_dbm: vec![-82.0],
            tx_power_dbm: vec![20.0],
            max_bandwidth: vec![1],
        };
        Agent::new(
            wlan_id,
            wlan_id,
            1.0,
            PreProcessor::new(space, RewardType::NormalizedThroughput),
            Learner::new(Strategy::EpsilonGreedy, num_arms, 1.0),
        )
    }

    fn config_on(channel: usize) -> Configuration {
        Configuration {
            timestamp: 0.0,
            primary_channel: channel,
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

    fn perf_with_rssi(rssi: Vec<f64>) -> Performance {
        Performance {
            rssi_per_wlan_dbm: rssi,
            ..Default::default()
        }
    }

    #[test]
    fn coloring_separates_strongly_coupled_bsses() {
        let agents = vec![make_agent(0, vec![0, 4]), make_agent(1, vec![0, 4])];
        let mut controller = CentralController::new(
            ControllerMode::Active,
            ControllerMethod::GraphColoring,
            5.0,
            2,
        );
        // Both on channel 0, hearing each other at −60 dBm.
        controller.receive_report(0, config_on(0), perf_with_rssi(vec![f64::NEG_INFINITY, -60.0]));
        controller.receive_report(1, config_on(0), perf_with_rssi(vec![-60.0, f64::NEG_INFINITY]));
        let actions = controller.decide(&agents);
        // One of the two gets moved off channel 0.
        let moves: Vec<_> = actions
            .iter()
            .filter_map(|a| match a {
                ControllerAction::Reconfigure { agent, config } => Some((*agent, config.primary_channel)),
                _ => None,
            })
            .collect();
        assert_eq!(moves.len(), 1);
        assert_eq!(moves[0].1, 4);
        // Round consumed.
        assert!(!controller.all_reports_in());
    }

    #[test]
    fn banning_targets_dominant_neighbors_of_starving_agents() {
        let mut dominant = make_agent(0, vec![0, 4]);
        // Make arm 1 the dominant play of the neighbor.
        for _ in 0..10 {
            dominant.receive_shared_reward(0.0);
        }
        let mut victim = make_agent(1, vec![0, 4]);
        victim.last_reward = 0.0;
        dominant.last_reward = 0.9;
        // Seed popularity by hand through iterate-free updates.
        let mut rng = <rand::rngs::StdRng as rand::SeedableRng>::seed_from_u64(3);
        let mut config = config_on(0);
        for _ in 0..9 {
            if let Some(next) = dominant.iterate(config.clone(), Performance::default(), &mut rng) {
                config = next;
            }
        }
        let agents = vec![dominant, victim];
        let mut controller = CentralController::new(
            ControllerMode::Active,
            ControllerMethod::ActionBanning,
            5.0,
            2,
        );
        controller.receive_report(0, config_on(0), perf_with_rssi(vec![f64::NEG_INFINITY, -50.0]));
        controller.receive_report(1, config_on(0), perf_with_rssi(vec![-50.0, f64::NEG_INFINITY]));
        let actions = controller.decide(&agents);
        let bans: Vec<_> = actions
            .iter()
            .filter(|a| matches!(a, ControllerAction::Ban { agent: 0, .. }))
            .collect();
        assert!(!bans.is_empty(), "expected a ban on the dominant neighbor");
    }

    #[test]
    fn passive_controller_without_full_reports_does_nothing() {
        let agents = vec![make_agent(0, vec![0]), make_agent(1, vec![0])];
        let mut controller = CentralController::new(
            ControllerMode::Passive,
            ControllerMethod::RewardForwarding,
            5.0,
            2,
        );
        controller.receive_report(0, config_on(0), Performance::default());
        assert!(controller.decide(&agents).is_empty());
    }

    #[test]
    fn reward_forwarding_averages_over_the_cluster() {
        let mut a = make_agent(0, vec![0]);
        let mut b = make_agent(1, vec![0]);
        a.last_reward = 0.8;
        b.last_reward = 0.2;
        let agents = vec![a, b];
        let mut controller = CentralController::new(
            ControllerMode::Active,
            ControllerMethod::RewardForwarding,
            5.0,
            2,
        );
        controller.receive_report(0, config_on(0), perf_with_rssi(vec![f64::NEG_INFINITY, -40.0]));
        controller.receive_report(1, config_on(0), perf_with_rssi(vec![-40.0, f64::NEG_INFINITY]));
        let actions = controller.decide(&agents);
        for action in actions {
            match action {
                ControllerAction::ForwardReward { reward, .. } => {
                    assert!((reward - 0.5).abs() < 1e-12);
                }
                other => panic!("unexpected action {other:?}"),
            }
        }
    }
}
