//! Multi-armed bandit learners behind a single update/select interface.

use rand::Rng;
use rand::rngs::StdRng;
use rand_distr::{Distribution, Normal};

/// Action-selection strategy of an agent's learner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    EpsilonGreedy,
    ThompsonSampling,
}

impl Strategy {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "epsilon-greedy" => Some(Strategy::EpsilonGreedy),
            "thompson-sampling" => Some(Strategy::ThompsonSampling),
            _ => None,
        }
    }

    pub const NAMES: [&'static str; 2] = ["epsilon-greedy", "thompson-sampling"];
}

/// Per-arm running statistics shared by both strategies.
#[derive(Debug, Clone)]
struct ArmEstimates {
    mean_reward: Vec<f64>,
    times_selected: Vec<u64>,
}

impl ArmEstimates {
    fn new(num_arms: usize) -> Self {
        Self {
            mean_reward: vec![0.0; num_arms],
            times_selected: vec![0; num_arms],
        }
    }

    fn update(&mut self, arm: usize, reward: f64) {
        let n = self.times_selected[arm] + 1;
        self.times_selected[arm] = n;
        // Incremental mean.
        self.mean_reward[arm] += (reward - self.mean_reward[arm]) / n as f64;
    }
}

pub struct Learner {
    strategy: Strategy,
    estimates: ArmEstimates,
    /// ε₀ of the ε-greedy decay ε = ε₀/√k.
    initial_epsilon: f64,
    iteration: u64,
}

impl Learner {
    pub fn new(strategy: Strategy, num_arms: usize, initial_epsilon: f64) -> Self {
        Self {
            strategy,
            estimates: ArmEstimates::new(num_arms),
            initial_epsilon,
            iteration: 0,
        }
    }

    pub fn num_arms(&self) -> usize {
        self.estimates.mean_reward.len()
    }

    /// Feed back the reward observed for an arm.
    pub fn update(&mut self, arm: usize, reward: f64) {
        self.estimates.update(arm, reward);
    }

    /// Pick the next arm among `available`. `last_arm` breaks exploit ties
    /// in favor of staying put.
    pub fn select(&mut self, available: &[usize], last_arm: usize, rng: &mut StdRng) -> usize {
        debug_assert!(!available.is_empty());
        self.iteration += 1;
        match self.strategy {
            Strategy::EpsilonGreedy => {
                let epsilon = self.initial_epsilon / (self.iteration as f64).sqrt();
                if rng.gen_range(0.0..1.0) < epsilon {
                    available[rng.gen_range(0..available.len())]
                } else {
                    self.exploit(available, last_arm)
                }
            }
            Strategy::ThompsonSampling => {
                let mut best = available[0];
                let mut best_theta = f64::NEG_INFINITY;
                for &arm in available {
                    let std = 1.0 / (1.0 + self.estimates.times_selected[arm] as f64);
                    let normal =
                        Normal::new(self.estimates.mean_reward[arm], std).expect("invalid posterior");
                    let theta: f64 = normal.sample(rng);
                    if theta > best_theta {
                        best_theta = theta;
                        best = arm;
                    }
                }
                best
            }
        }
    }

    fn exploit(&self, available: &[usize], last_arm: usize) -> usize {
        let mut best = available[0];
        let mut best_reward = f64::NEG_INFINITY;
        for &arm in available {
            let reward = self.estimates.mean_reward[arm];
            if reward > best_reward || (reward == best_reward && arm == last_arm) {
                best_reward = reward;
                best = arm;
            }
        }
        best
    }

    /// Most exploited arm so far (controller-side popularity accounting).
    pub fn most_selected(&self) -> Option<(usize, u64)> {
        self.estimates
            .times_selected
            .iter()
            .copied()
            .enumerate()
            .max_by_key(|&(_, n)| n)
            .filter(|&(_, n)| n > 0)
    }

    pub fn times_selected(&self, arm: usize) -> u64 {
        self.estimates.times_selected[arm]
    }

    pub fn total_selections(&self) -> u64 {
        self.estimates.times_selected.iter().sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    /// Reward oracle: arm 2 is clearly the best of four.
    fn oracle(arm: usize) -> f64 {
        match arm {
            0 => 0.1,
            1 => 0.3,
            2 => 0.9,
            _ => 0.2,
        }
    }

    #[test]
    fn egreedy_converges_to_the_best_arm() {
        let mut rng = StdRng::seed_from_u64(1234);
        let mut learner = Learner::new(Strategy::EpsilonGreedy, 4, 1.0);
        let available: Vec<usize> = (0..4).collect();
        let mut arm = 0;
        let mut late_picks_of_best = 0;
        for k in 0..200 {
            learner.update(arm, oracle(arm));
            arm = learner.select(&available, arm, &mut rng);
            if k >= 50 && arm == 2 {
                late_picks_of_best += 1;
            }
        }
        // With ε = 1/√k the greedy arm dominates after the burn-in.
        assert!(late_picks_of_best > 120, "picked best {late_picks_of_best}/150");
        assert_eq!(learner.most_selected().unwrap().0, 2);
    }

    #[test]
    fn thompson_converges_to_the_best_arm() {
        let mut rng = StdRng::seed_from_u64(99);
        let mut learner = Learner::new(Strategy::ThompsonSampling, 4, 0.0);
        let available: Vec<usize> = (0..4).collect();
        let mut arm = 0;
        for _ in 0..300 {
            learner.update(arm, oracle(arm));
            arm = learner.select(&available, arm, &mut rng);
        }
        assert_eq!(learner.most_selected().unwrap().0, 2);
    }

    #[test]
    fn banned_arms_are_never_selected() {
        let mut rng = StdRng::seed_from_u64(5);
        let mut learner = Learner::new(Strategy::EpsilonGreedy, 4, 1.0);
        // Arm 2 is best but unavailable.
        for arm in 0..4 {
            learner.update(arm, oracle(arm));
        }
        let available = vec![0, 1, 3];
        for _ in 0..100 {
            let pick = learner.select(&available, 0, &mut rng);
            assert_ne!(pick, 2);
        }
    }

    #[test]
    fn running_mean_is_exact() {
        let mut learner = Learner::new(Strategy::EpsilonGreedy, 2, 0.0);
        for r in [0.0, 0.5, 1.0, 0.5] {
            learner.update(0, r);
        }
        assert!((learner.estimates.mean_reward[0] - 0.5).abs() < 1e-12);
        assert_eq!(learner.times_selected(0), 4);
        assert_eq!(learner.total_selections(), 4);
    }
}
