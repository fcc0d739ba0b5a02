//! Decision-layer configuration loading (TOML).

use anyhow::{Context, bail};
use serde::Deserialize;
use std::path::Path;

use crate::control::bandits::Strategy;
use crate::control::controller::{ControllerMethod, ControllerMode};
use crate::control::preprocessor::RewardType;

/// Root of the agents/controller TOML file.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct ControlConfig {
    #[serde(default)]
    pub controller: Option<ControllerSection>,
    #[serde(default)]
    pub agents: Vec<AgentSection>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct ControllerSection {
    /// "passive" or "active".
    pub mode: String,
    /// "graph-coloring", "action-banning" or "reward-forwarding".
    pub method: String,
    /// Polling period in seconds.
    pub period: f64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct AgentSection {
    /// WLAN code the agent is bound to.
    pub wlan: String,
    /// Seconds between report requests.
    pub period: f64,
    /// Reward type name (see `RewardType::NAMES`).
    pub reward: String,
    /// Learner name (see `Strategy::NAMES`).
    pub strategy: String,
    /// ε₀ of the ε-greedy decay; ignored by Thompson sampling.
    #[serde(default = "default_epsilon")]
    pub initial_epsilon: f64,
    /// Candidate primary channels.
    pub channels: Vec<usize>,
    /// Candidate PD thresholds [dBm].
    pub pd_dbm: Vec<f64>,
    /// Candidate transmit powers [dBm].
    pub tx_power_dbm: Vec<f64>,
    /// Candidate maximum widths [basic channels].
    pub max_bandwidth: Vec<usize>,
}

fn default_epsilon() -> f64 {
    1.0
}

impl ControlConfig {
    /// Load and validate a TOML control configuration. Unknown enum names
    /// are fatal and the diagnostic lists the permissible values.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read control config {}", path.display()))?;
        let config: ControlConfig = toml::from_str(&content)
            .with_context(|| format!("failed to parse control config {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.agents.is_empty() {
            bail!("control config declares no agents");
        }
        for agent in &self.agents {
            if RewardType::from_name(&agent.reward).is_none() {
                bail!(
                    "unknown reward type '{}' for agent '{}'; permissible values: {}",
                    agent.reward,
                    agent.wlan,
                    RewardType::NAMES.join(", ")
                );
            }
            if Strategy::from_name(&agent.strategy).is_none() {
                bail!(
                    "unknown learning strategy '{}' for agent '{}'; permissible values: {}",
                    agent.strategy,
                    agent.wlan,
                    Strategy::NAMES.join(", ")
                );
            }
            if agent.period <= 0.0 {
                bail!("agent '{}' has a non-positive period", agent.wlan);
            }
            if agent.channels.is_empty()
                || agent.pd_dbm.is_empty()
                || agent.tx_power_dbm.is_empty()
                || agent.max_bandwidth.is_empty()
            {
                bail!("agent '{}' has an empty action dimension", agent.wlan);
            }
        }
        if let Some(controller) = &self.controller {
            if ControllerMode::from_name(&controller.mode).is_none() {
                bail!(
                    "unknown controller mode '{}'; permissible values: {}",
                    controller.mode,
                    ControllerMode::NAMES.join(", ")
                );
            }
            if ControllerMethod::from_name(&controller.method).is_none() {
                bail!(
                    "unknown controller method '{}'; permissible values: {}",
                    controller.method,
                    ControllerMethod::NAMES.join(", ")
                );
            }
            if controller.period <= 0.0 {
                bail!("controller period must be positive");
            }
        }
        Ok(())
    }
}
