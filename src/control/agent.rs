//! Per-BSS learning agent: request a report, compute a reward, update the
//! learner, pick the next action and write the configuration back.

use rand::rngs::StdRng;
use std::collections::HashSet;

use crate::control::bandits::Learner;
use crate::control::preprocessor::PreProcessor;
use crate::scheduler::Time;
use crate::simulation::types::{Configuration, NodeId, Performance};

pub struct Agent {
    pub wlan_id: usize,
    pub ap_id: NodeId,
    period: Time,
    pre: PreProcessor,
    learner: Learner,
    last_arm: Option<usize>,
    banned: HashSet<usize>,
    pub last_report: Option<(Configuration, Performance)>,
    pub last_reward: f64,
    pub iterations: u64,
}

impl Agent {
    pub fn new(
        wlan_id: usize,
        ap_id: NodeId,
        period: Time,
        pre: PreProcessor,
        learner: Learner,
    ) -> Self {
        Self {
            wlan_id,
            ap_id,
            period,
            pre,
            learner,
            last_arm: None,
            banned: HashSet::new(),
            last_report: None,
            last_reward: 0.0,
            iterations: 0,
        }
    }

    pub fn period(&self) -> Time {
        self.period
    }

    /// One request→reward→update→select cycle. Returns the configuration
    /// to write back, or None when every action is banned.
    pub fn iterate(
        &mut self,
        config: Configuration,
        perf: Performance,
        rng: &mut StdRng,
    ) -> Option<Configuration> {
        self.iterations += 1;
        let reward = self.pre.reward(&perf);
        self.last_reward = reward;
        // The operator's initial configuration may sit outside the action
        // space; reward feedback then starts with the first selected arm.
        let arm = self.pre.arm_of(&config).or(self.last_arm);
        if let Some(arm) = arm {
            self.learner.update(arm, reward);
        }
        self.last_report = Some((config.clone(), perf));
        let available: Vec<usize> = (0..self.pre.num_arms())
            .filter(|a| !self.banned.contains(a))
            .collect();
        if available.is_empty() {
            log::warn!("agent for wlan {} has no available actions left", self.wlan_id);
            return None;
        }
        let next = self.learner.select(&available, arm.unwrap_or(available[0]), rng);
        self.last_arm = Some(next);
        Some(self.pre.config_for(next, &config))
    }

    /// Centralized sub-reward forwarded by the controller.
    pub fn receive_shared_reward(&mut self, reward: f64) {
        if let Some(arm) = self.last_arm {
            self.learner.update(arm, reward);
        }
    }

    pub fn ban(&mut self, arm: usize) {
        if arm < self.pre.num_arms() {
            self.banned.insert(arm);
        }
    }

    pub fn unban(&mut self, arm: usize) {
        self.banned.remove(&arm);
    }

    pub fn candidate_channels(&self) -> &[usize] {
        self.pre.channels()
    }

    pub fn most_selected(&self) -> Option<(usize, u64)> {
        self.learner.most_selected()
    }

    pub fn total_selections(&self) -> u64 {
        self.learner.total_selections()
    }
}
