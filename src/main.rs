//! # axsim: IEEE 802.11ax network simulator
//!
//! Discrete-event simulation of co-located BSSs contending for shared
//! radio channels with CSMA/CA, RTS/CTS, A-MPDU aggregation, dynamic
//! channel bonding, OBSS-PD spatial reuse, and an optional multi-armed
//! bandit decision layer per BSS plus a central controller.
//!
//! ## Architecture
//!
//! A priority-queue scheduler dispatches timed events in strict time
//! order to the owning component (node, agent, controller). Nodes are
//! full 802.11ax MAC/PHY state machines exchanging TX-start/TX-end
//! notifications over a fan-out bus; failed decodes travel back as
//! logical NACKs carrying a loss reason. Everything runs on one logical
//! thread; there is no shared mutable state between components.
//!
//! ## Invocation
//!
//! Full form (plus an optional trailing agents TOML path):
//!
//! ```text
//! axsim <system.csv> <nodes.csv> <report.json> <sim-code> \
//!       <write-system-logs> <write-node-logs> <print-system-logs> \
//!       <print-node-logs> <simulation-time> <seed> [agents.toml]
//! ```
//!
//! Short form: `axsim <system.csv> <nodes.csv> <simulation-time> <seed>`.

use anyhow::{Context, bail};
use env_logger::Builder;
use log::LevelFilter;
use std::path::PathBuf;

mod control;
mod output;
mod scenario;
mod scheduler;
mod simulation;

use crate::control::agent::Agent;
use crate::control::bandits::{Learner, Strategy};
use crate::control::config::ControlConfig;
use crate::control::controller::{CentralController, ControllerMethod, ControllerMode};
use crate::control::preprocessor::{ActionSpace, PreProcessor, RewardType};
use crate::output::{NodeReport, SimulationLogs, SimulationReport};
use crate::simulation::network::Simulator;

const USAGE: &str = "usage: axsim <system.csv> <nodes.csv> <report.json> <sim-code> \
<write-system-logs> <write-node-logs> <print-system-logs> <print-node-logs> \
<simulation-time> <seed> [agents.toml]\n   or: axsim <system.csv> <nodes.csv> <simulation-time> <seed>";

#[derive(Debug)]
struct CliArgs {
    system_file: PathBuf,
    nodes_file: PathBuf,
    script_output: PathBuf,
    simulation_code: String,
    write_system_logs: bool,
    write_node_logs: bool,
    print_system_logs: bool,
    print_node_logs: bool,
    simulation_time: f64,
    random_seed: u64,
    agents_file: Option<PathBuf>,
}

fn parse_flag(raw: &str, name: &str) -> anyhow::Result<bool> {
    match raw {
        "0" => Ok(false),
        "1" => Ok(true),
        other => bail!("{name} must be 0 or 1, got '{other}'"),
    }
}

fn parse_args(args: &[String]) -> anyhow::Result<CliArgs> {
    match args.len() {
        // Short form: logging switches take their defaults.
        4 => Ok(CliArgs {
            system_file: PathBuf::from(&args[0]),
            nodes_file: PathBuf::from(&args[1]),
            script_output: PathBuf::from("./output/script_output.json"),
            simulation_code: "DEFAULT_SIM".into(),
            write_system_logs: false,
            write_node_logs: false,
            print_system_logs: true,
            print_node_logs: true,
            simulation_time: args[2].parse().context("bad simulation-time")?,
            random_seed: args[3].parse().context("bad random-seed")?,
            agents_file: None,
        }),
        10 | 11 => Ok(CliArgs {
            system_file: PathBuf::from(&args[0]),
            nodes_file: PathBuf::from(&args[1]),
            script_output: PathBuf::from(&args[2]),
            simulation_code: args[3].clone(),
            write_system_logs: parse_flag(&args[4], "write-system-logs")?,
            write_node_logs: parse_flag(&args[5], "write-node-logs")?,
            print_system_logs: parse_flag(&args[6], "print-system-logs")?,
            print_node_logs: parse_flag(&args[7], "print-node-logs")?,
            simulation_time: args[8].parse().context("bad simulation-time")?,
            random_seed: args[9].parse().context("bad random-seed")?,
            agents_file: args.get(10).map(PathBuf::from),
        }),
        _ => bail!("{USAGE}"),
    }
}

/// Instantiate the decision layer from its TOML description.
fn build_decision_layer(
    config: &ControlConfig,
    wlans: &[simulation::types::Wlan],
) -> anyhow::Result<(Vec<Agent>, Option<CentralController>)> {
    let mut agents = Vec::with_capacity(config.agents.len());
    for section in &config.agents {
        let wlan = wlans
            .iter()
            .find(|w| w.code == section.wlan)
            .with_context(|| {
                format!(
                    "agent refers to unknown wlan '{}'; known: {}",
                    section.wlan,
                    wlans.iter().map(|w| w.code.as_str()).collect::<Vec<_>>().join(", ")
                )
            })?;
        let space = ActionSpace {
            channels: section.channels.clone(),
            pd_dbm: section.pd_dbm.clone(),
            tx_power_dbm: section.tx_power_dbm.clone(),
            max_bandwidth: section.max_bandwidth.clone(),
        };
        let reward = RewardType::from_name(&section.reward).expect("validated reward name");
        let strategy = Strategy::from_name(&section.strategy).expect("validated strategy name");
        let pre = PreProcessor::new(space, reward);
        let learner = Learner::new(strategy, pre.num_arms(), section.initial_epsilon);
        agents.push(Agent::new(
            wlan.wlan_id,
            wlan.ap_id,
            section.period,
            pre,
            learner,
        ));
    }
    let controller = config
        .controller
        .as_ref()
        .map(|section| {
            let mode = ControllerMode::from_name(&section.mode).expect("validated mode name");
            let method =
                ControllerMethod::from_name(&section.method).expect("validated method name");
            CentralController::new(mode, method, section.period, agents.len())
        });
    Ok((agents, controller))
}

fn run(args: CliArgs) -> anyhow::Result<()> {
    let system = scenario::system::load(&args.system_file)?;
    let (params, wlans) = scenario::nodes::load(&args.nodes_file, &system)?;
    let node_codes: Vec<String> = params.iter().map(|p| p.code.clone()).collect();
    let logs = SimulationLogs::create(
        &node_codes,
        args.write_system_logs,
        args.write_node_logs,
        args.print_system_logs,
        args.print_node_logs,
    )?;

    log::info!(
        "simulation {}: {} nodes, {} wlans, {} s, seed {}",
        args.simulation_code,
        params.len(),
        wlans.len(),
        args.simulation_time,
        args.random_seed
    );

    let mut sim = Simulator::new(system, params, wlans, args.random_seed, logs);
    if let Some(agents_path) = &args.agents_file {
        let control_config = ControlConfig::load(agents_path)?;
        let (agents, controller) = build_decision_layer(&control_config, &sim.wlans)?;
        log::info!(
            "decision layer: {} agents, controller: {}",
            agents.len(),
            controller.is_some()
        );
        sim.attach_decision_layer(agents, controller);
    }

    let summary = sim.run(args.simulation_time, None);

    let nodes = sim
        .nodes
        .iter()
        .map(|node| {
            let (_, performance) = node.report(args.simulation_time);
            NodeReport {
                code: node.code.clone(),
                kind: node.kind,
                wlan: sim.wlans[node.wlan_id].code.clone(),
                performance,
                loss_reasons: node.stats.loss_reasons.to_vec(),
            }
        })
        .collect();
    let report = SimulationReport {
        simulation_code: args.simulation_code.clone(),
        generated_at: chrono::Local::now().to_rfc3339(),
        simulation_time: args.simulation_time,
        random_seed: args.random_seed,
        events_processed: summary.events_processed,
        wall_seconds: summary.wall_seconds,
        events_per_second: summary.events_per_second,
        nodes,
    };
    report.write(&args.script_output)?;
    log::info!("report written to {}", args.script_output.display());
    Ok(())
}

fn main() {
    Builder::new()
        .filter_level(LevelFilter::Info)
        .filter(Some("axsim"), LevelFilter::Debug)
        .parse_default_env()
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let parsed = match parse_args(&args) {
        Ok(parsed) => parsed,
        Err(err) => {
            eprintln!("{err}");
            std::process::exit(2);
        }
    };
    if let Err(err) = run(parsed) {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}
