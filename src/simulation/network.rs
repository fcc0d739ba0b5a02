//! Simulation core: owns the scheduler, the node population and the
//! decision layer, and routes every cross-node effect.
//!
//! Control flow each step: pop the earliest event, advance the clock,
//! dispatch to the owning component, then drain the outcome queue:
//! TX-start/TX-end notifications fan out to every other node, logical
//! NACKs go to the implicated transmitters, MCS request/response pairs
//! resolve synchronously, configuration changes propagate to the BSS
//! members and invalidate peer MCS caches.

use rand::SeedableRng;
use rand::rngs::StdRng;
use std::collections::VecDeque;

use crate::control::agent::Agent;
use crate::control::controller::{CentralController, ControllerAction, ControllerMode};
use crate::output::SimulationLogs;
use crate::scheduler::{Event, EventHandle, Scheduler, Time};
use crate::simulation::frames::Modulation;
use crate::simulation::node::{Node, NodeParams};
use crate::simulation::types::{LogicalNack, NodeId, NodeKind, Notification, SystemParams, Wlan};

/// Component owning a scheduled event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Owner {
    Node(NodeId),
    Agent(usize),
    Controller,
    System,
}

/// Payload variants dispatched by the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventPayload {
    BackoffExpiry,
    BackoffResume,
    TxEnd,
    SifsElapsed,
    Timeout,
    NavExpiry,
    PacketArrival,
    AgentTick,
    ControllerTick,
    ClearStats,
    ProgressMark(u8),
}

/// Cross-component effect buffered during a dispatch and routed afterwards.
#[derive(Debug)]
pub enum Outcome {
    TxStarted(Notification),
    TxFinished(Notification),
    Nack(LogicalNack),
    McsRequest { from: NodeId, to: NodeId },
    McsResponse { from: NodeId, to: NodeId, table: [Modulation; 4] },
    ConfigChanged { node: NodeId },
}

/// Dispatch context handed to component handlers.
pub struct Ctx<'a> {
    pub scheduler: &'a mut Scheduler<Owner, EventPayload>,
    pub rng: &'a mut StdRng,
    pub outcomes: &'a mut VecDeque<Outcome>,
}

impl Ctx<'_> {
    pub fn now(&self) -> Time {
        self.scheduler.now()
    }

    /// Schedule a node-owned event. Scheduling in the past is an
    /// implementation bug and aborts.
    pub fn schedule(&mut self, node: NodeId, payload: EventPayload, time: Time) -> EventHandle {
        self.scheduler
            .schedule(Owner::Node(node), payload, time)
            .expect("event scheduled in the past")
    }
}

/// Figures reported by `run` and folded into the final report.
#[derive(Debug, Clone, Copy)]
pub struct RunSummary {
    pub events_processed: u64,
    pub wall_seconds: f64,
    pub events_per_second: f64,
}

pub struct Simulator {
    pub system: SystemParams,
    pub scheduler: Scheduler<Owner, EventPayload>,
    pub nodes: Vec<Node>,
    pub wlans: Vec<Wlan>,
    pub agents: Vec<Agent>,
    pub controller: Option<CentralController>,
    pub logs: SimulationLogs,
    rng: StdRng,
}

impl Simulator {
    pub fn new(
        system: SystemParams,
        params: Vec<NodeParams>,
        wlans: Vec<Wlan>,
        seed: u64,
        logs: SimulationLogs,
    ) -> Self {
        let backend = system.queue_backend;
        let num_wlans = wlans.len();
        let nodes = params
            .into_iter()
            .map(|p| {
                let peers = match p.kind {
                    NodeKind::Ap => wlans[p.wlan_id].sta_ids.clone(),
                    NodeKind::Sta => vec![wlans[p.wlan_id].ap_id],
                };
                Node::new(p, &system, peers, num_wlans)
            })
            .collect();
        Self {
            system,
            scheduler: Scheduler::new(backend),
            nodes,
            wlans,
            agents: Vec::new(),
            controller: None,
            logs,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Attach the optional decision layer before `run`.
    pub fn attach_decision_layer(&mut self, agents: Vec<Agent>, controller: Option<CentralController>) {
        self.agents = agents;
        self.controller = controller;
    }

    /// Drive the simulation to `stop_time`. With `clear_stats_time` set and
    /// inside the run, every component's statistics are reset exactly once.
    pub fn run(&mut self, stop_time: Time, clear_stats_time: Option<Time>) -> RunSummary {
        let wall_start = std::time::Instant::now();
        let mut outcomes = VecDeque::new();

        for i in 0..self.nodes.len() {
            let node = &mut self.nodes[i];
            let mut ctx = Ctx {
                scheduler: &mut self.scheduler,
                rng: &mut self.rng,
                outcomes: &mut outcomes,
            };
            node.start(&mut ctx);
        }
        self.route_outcomes(&mut outcomes);

        for i in 0..self.agents.len() {
            let at = self.agents[i].period();
            self.scheduler
                .schedule(Owner::Agent(i), EventPayload::AgentTick, at)
                .expect("agent tick in the past");
        }
        if let Some(controller) = &self.controller {
            if controller.mode == ControllerMode::Active {
                self.scheduler
                    .schedule(Owner::Controller, EventPayload::ControllerTick, controller.period())
                    .expect("controller tick in the past");
            }
        }
        if let Some(t) = clear_stats_time {
            if t < stop_time {
                self.scheduler
                    .schedule(Owner::System, EventPayload::ClearStats, t)
                    .expect("stats reset in the past");
            }
        }
        for pct in (5..=100u8).step_by(5) {
            self.scheduler
                .schedule(
                    Owner::System,
                    EventPayload::ProgressMark(pct),
                    stop_time * pct as f64 / 100.0,
                )
                .expect("progress mark in the past");
        }

        while let Some(next) = self.scheduler.peek_time() {
            if next > stop_time {
                break;
            }
            let event = self.scheduler.pop().expect("peeked event vanished");
            self.dispatch(event, &mut outcomes);
            self.route_outcomes(&mut outcomes);
        }

        let wall_seconds = wall_start.elapsed().as_secs_f64();
        let events_processed = self.scheduler.events_processed();
        let events_per_second = events_processed as f64 / wall_seconds.max(f64::MIN_POSITIVE);
        log::info!(
            "simulation finished: {events_processed} events in {wall_seconds:.3} s ({events_per_second:.0} events/s)"
        );
        self.logs.system.log(
            stop_time,
            "SUM",
            1,
            &format!(
                "events={events_processed} wall={wall_seconds:.3}s rate={events_per_second:.0}/s"
            ),
        );
        self.logs.flush();
        RunSummary {
            events_processed,
            wall_seconds,
            events_per_second,
        }
    }

    fn dispatch(&mut self, event: Event<Owner, EventPayload>, outcomes: &mut VecDeque<Outcome>) {
        match event.owner {
            Owner::Node(i) => {
                let node = &mut self.nodes[i];
                let mut ctx = Ctx {
                    scheduler: &mut self.scheduler,
                    rng: &mut self.rng,
                    outcomes: &mut *outcomes,
                };
                node.handle_event(event.payload, &mut ctx);
            }
            Owner::Agent(i) => self.agent_tick(i, outcomes),
            Owner::Controller => self.controller_tick(outcomes),
            Owner::System => match event.payload {
                EventPayload::ClearStats => {
                    let now = self.scheduler.now();
                    for node in &mut self.nodes {
                        node.clear_stats(now);
                    }
                    self.logs.system.log(now, "CLR", 1, "statistics cleared");
                }
                EventPayload::ProgressMark(pct) => {
                    log::info!("simulation progress: {pct}%");
                }
                other => panic!("system received a foreign event: {other:?}"),
            },
        }
    }

    /// One agent cycle: read the AP's report, learn, write back the next
    /// configuration, rearm the timer.
    fn agent_tick(&mut self, i: usize, outcomes: &mut VecDeque<Outcome>) {
        let now = self.scheduler.now();
        let ap = self.agents[i].ap_id;
        let (config, perf) = self.nodes[ap].report(now);
        if let Some(controller) = &mut self.controller {
            if controller.mode == ControllerMode::Passive {
                controller.receive_report(i, config.clone(), perf.clone());
            }
        }
        let next = self.agents[i].iterate(config, perf, &mut self.rng);
        self.logs.controller.log(
            now,
            "AGT",
            2,
            &format!(
                "agent {} reward={:.4} arm={:?}",
                i,
                self.agents[i].last_reward,
                self.agents[i].most_selected()
            ),
        );
        if let Some(config) = next {
            let node = &mut self.nodes[ap];
            let mut ctx = Ctx {
                scheduler: &mut self.scheduler,
                rng: &mut self.rng,
                outcomes: &mut *outcomes,
            };
            node.submit_configuration(config, &mut ctx);
        }
        let period = self.agents[i].period();
        self.scheduler
            .schedule(Owner::Agent(i), EventPayload::AgentTick, now + period)
            .expect("agent tick in the past");
    }

    /// Active-mode poll: gather a report from every agent's AP, then let
    /// the controller act once the round is complete.
    fn controller_tick(&mut self, outcomes: &mut VecDeque<Outcome>) {
        let now = self.scheduler.now();
        let Some(mut controller) = self.controller.take() else {
            return;
        };
        for (i, agent) in self.agents.iter().enumerate() {
            let (config, perf) = self.nodes[agent.ap_id].report(now);
            controller.receive_report(i, config, perf);
        }
        let actions = controller.decide(&self.agents);
        for action in actions {
            match action {
                ControllerAction::Reconfigure { agent, config } => {
                    let ap = self.agents[agent].ap_id;
                    self.logs.controller.log(
                        now,
                        "CTL",
                        2,
                        &format!("reassign agent {agent} to channel {}", config.primary_channel),
                    );
                    let node = &mut self.nodes[ap];
                    let mut ctx = Ctx {
                        scheduler: &mut self.scheduler,
                        rng: &mut self.rng,
                        outcomes: &mut *outcomes,
                    };
                    node.submit_configuration(config, &mut ctx);
                }
                ControllerAction::Ban { agent, arm } => {
                    self.logs
                        .controller
                        .log(now, "CTL", 2, &format!("ban arm {arm} of agent {agent}"));
                    self.agents[agent].ban(arm);
                }
                ControllerAction::ForwardReward { agent, reward } => {
                    self.agents[agent].receive_shared_reward(reward);
                }
            }
        }
        let period = controller.period();
        self.scheduler
            .schedule(Owner::Controller, EventPayload::ControllerTick, now + period)
            .expect("controller tick in the past");
        self.controller = Some(controller);
    }

    /// Drain and route the buffered cross-component effects. Routing can
    /// produce further outcomes (NACKs, MCS responses); the queue drains
    /// until empty.
    fn route_outcomes(&mut self, outcomes: &mut VecDeque<Outcome>) {
        let now = self.scheduler.now();
        while let Some(outcome) = outcomes.pop_front() {
            match outcome {
                Outcome::TxStarted(notif) => {
                    self.logs.nodes[notif.source_id].log(
                        now,
                        "TXS",
                        2,
                        &format!(
                            "{:?} -> {} ch[{}..{}] {} bits",
                            notif.kind,
                            notif.destination_id,
                            notif.left_channel,
                            notif.right_channel,
                            notif.packet_length
                        ),
                    );
                    for j in 0..self.nodes.len() {
                        if j == notif.source_id {
                            continue;
                        }
                        let node = &mut self.nodes[j];
                        let mut ctx = Ctx {
                            scheduler: &mut self.scheduler,
                            rng: &mut self.rng,
                            outcomes: &mut *outcomes,
                        };
                        node.on_tx_start(&notif, &mut ctx);
                    }
                }
                Outcome::TxFinished(notif) => {
                    self.logs.nodes[notif.source_id].log(
                        now,
                        "TXE",
                        3,
                        &format!("{:?} id={}", notif.kind, notif.packet_id),
                    );
                    for j in 0..self.nodes.len() {
                        if j == notif.source_id {
                            continue;
                        }
                        let node = &mut self.nodes[j];
                        let mut ctx = Ctx {
                            scheduler: &mut self.scheduler,
                            rng: &mut self.rng,
                            outcomes: &mut *outcomes,
                        };
                        node.on_tx_end(&notif, &mut ctx);
                    }
                }
                Outcome::Nack(nack) => {
                    self.logs.nodes[nack.source_id].log(
                        now,
                        "NCK",
                        2,
                        &format!("{:?} id={} reason={:?}", nack.kind, nack.packet_id, nack.reason),
                    );
                    for id in [nack.node_id_a, nack.node_id_b].into_iter().flatten() {
                        if id != nack.source_id {
                            self.nodes[id].on_nack(&nack);
                        }
                    }
                }
                Outcome::McsRequest { from, to } => {
                    let (position, tx_power_dbm) = {
                        let requester = &self.nodes[from];
                        (requester.position, requester.tx_power_dbm())
                    };
                    let node = &mut self.nodes[to];
                    let mut ctx = Ctx {
                        scheduler: &mut self.scheduler,
                        rng: &mut self.rng,
                        outcomes: &mut *outcomes,
                    };
                    node.handle_mcs_request(from, position, tx_power_dbm, &mut ctx);
                }
                Outcome::McsResponse { from, to, table } => {
                    let node = &mut self.nodes[to];
                    let mut ctx = Ctx {
                        scheduler: &mut self.scheduler,
                        rng: &mut self.rng,
                        outcomes: &mut *outcomes,
                    };
                    node.on_mcs_response(from, table, &mut ctx);
                }
                Outcome::ConfigChanged { node } => {
                    for j in 0..self.nodes.len() {
                        if j != node {
                            self.nodes[j].invalidate_mcs(node);
                        }
                    }
                    if self.nodes[node].kind == NodeKind::Ap {
                        let (config, _) = self.nodes[node].report(now);
                        let sta_ids = self.wlans[self.nodes[node].wlan_id].sta_ids.clone();
                        self.logs.nodes[node].log(
                            now,
                            "CFG",
                            2,
                            &format!(
                                "applied primary={} pd={} dBm txp={} dBm bw={}",
                                config.primary_channel,
                                config.pd_dbm,
                                config.tx_power_dbm,
                                config.max_bandwidth
                            ),
                        );
                        for sta in sta_ids {
                            self.nodes[sta].adopt_wlan_configuration(&config);
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::QueueBackend;
    use crate::simulation::propagation::PathLossModel;
    use crate::simulation::types::{
        AdjacentChannelModel, BackoffKind, DcbPolicy, LossReason, PdfKind, Position, TrafficModel,
    };

    fn system(rts_cts: bool) -> SystemParams {
        SystemParams {
            num_channels: 8,
            basic_channel_bandwidth_mhz: 20.0,
            pdf_backoff: PdfKind::Deterministic,
            pdf_tx_time: PdfKind::Deterministic,
            backoff_kind: BackoffKind::Slotted,
            noise_level_dbm: -95.0,
            adjacent_model: AdjacentChannelModel::None,
            path_loss_model: PathLossModel::FreeSpace,
            capture_effect_default_db: 10.0,
            constant_per_default: 0.0,
            packet_length_default_bits: 12000,
            num_packets_agg_default: 1,
            rts_cts_enabled: rts_cts,
            queue_backend: QueueBackend::Calendar,
        }
    }

    fn node(
        id: usize,
        code: &str,
        kind: NodeKind,
        wlan_id: usize,
        x: f64,
        primary: usize,
        min_ch: usize,
        max_ch: usize,
        traffic: TrafficModel,
    ) -> NodeParams {
        NodeParams {
            id,
            code: code.into(),
            kind,
            wlan_id,
            position: Position { x, y: 0.0, z: 0.0 },
            central_freq_hz: 5.0e9,
            primary,
            min_ch,
            max_ch,
            tx_power_dbm: 20.0,
            tx_power_min_dbm: 1.0,
            tx_power_max_dbm: 20.0,
            pd_dbm: -82.0,
            pd_min_dbm: -82.0,
            pd_max_dbm: -62.0,
            tx_gain_db: 0.0,
            rx_gain_db: 0.0,
            dcb_policy: DcbPolicy::OnlyPrimary,
            traffic_model: traffic,
            packet_length_bits: 12000,
            max_ampdu: 4,
            capture_effect_db: 10.0,
            constant_per: 0.0,
            pifs_enabled: false,
            cw_adaptation: true,
            cw_min: 16,
            cw_stage_max: 5,
            bss_color: -1,
            srg: -1,
            non_srg_obss_pd_dbm: -82.0,
            srg_obss_pd_dbm: -82.0,
        }
    }

    fn single_bss(rts_cts: bool) -> Simulator {
        let params = vec![
            node(0, "AP_A", NodeKind::Ap, 0, 0.0, 0, 0, 0, TrafficModel::FullBuffer),
            node(1, "STA_A1", NodeKind::Sta, 0, 5.0, 0, 0, 0, TrafficModel::Poisson { load: 0.0 }),
        ];
        let wlans = vec![Wlan {
            wlan_id: 0,
            code: "A".into(),
            ap_id: 0,
            sta_ids: vec![1],
        }];
        Simulator::new(system(rts_cts), params, wlans, 1, SimulationLogs::disabled(2))
    }

    #[test]
    fn empty_simulation_processes_only_bookkeeping() {
        let sim_system = system(true);
        let mut sim = Simulator::new(sim_system, Vec::new(), Vec::new(), 0, SimulationLogs::disabled(0));
        let summary = sim.run(1.0, None);
        // Only the 20 progress markers fire.
        assert_eq!(summary.events_processed, 20);
    }

    #[test]
    fn single_bss_delivers_traffic_with_rts_cts() {
        let mut sim = single_bss(true);
        let summary = sim.run(0.5, None);
        assert!(summary.events_processed > 50);
        let ap = &sim.nodes[0].stats;
        assert!(ap.data_packets_acked > 0, "no data acked");
        assert_eq!(ap.data_packets_lost, 0);
        assert_eq!(ap.rts_lost, 0);
        assert!(ap.rts_sent >= ap.data_packets_acked / 4);
        // A lone BSS never sees interference.
        assert_eq!(ap.loss_reasons[LossReason::Interference as usize], 0);
        // Delay samples exist and are sane.
        assert!(ap.num_delay_samples > 0);
        assert!(ap.delay_min > 0.0 && ap.delay_min <= ap.delay_max);
    }

    #[test]
    fn single_bss_delivers_traffic_without_rts_cts() {
        let mut sim = single_bss(false);
        sim.run(0.5, None);
        let ap = &sim.nodes[0].stats;
        assert!(ap.data_packets_acked > 0);
        assert_eq!(ap.rts_sent, 0, "no RTS expected in data-only mode");
        assert_eq!(ap.data_packets_lost, 0);
    }

    #[test]
    fn orthogonal_channels_do_not_interfere() {
        // Two BSSs on disjoint primaries, close enough to hear each other.
        let params = vec![
            node(0, "AP_A", NodeKind::Ap, 0, 0.0, 0, 0, 0, TrafficModel::FullBuffer),
            node(1, "STA_A1", NodeKind::Sta, 0, 2.0, 0, 0, 0, TrafficModel::Poisson { load: 0.0 }),
            node(2, "AP_B", NodeKind::Ap, 1, 10.0, 2, 2, 2, TrafficModel::FullBuffer),
            node(3, "STA_B1", NodeKind::Sta, 1, 12.0, 2, 2, 2, TrafficModel::Poisson { load: 0.0 }),
        ];
        let wlans = vec![
            Wlan {
                wlan_id: 0,
                code: "A".into(),
                ap_id: 0,
                sta_ids: vec![1],
            },
            Wlan {
                wlan_id: 1,
                code: "B".into(),
                ap_id: 2,
                sta_ids: vec![3],
            },
        ];
        let mut sim = Simulator::new(system(true), params, wlans, 7, SimulationLogs::disabled(4));
        sim.run(0.5, None);
        for ap in [0, 2] {
            let stats = &sim.nodes[ap].stats;
            assert!(stats.data_packets_acked > 0, "AP {ap} starved");
            assert_eq!(
                stats.loss_reasons[LossReason::Interference as usize], 0,
                "AP {ap} saw interference on an orthogonal channel"
            );
            assert_eq!(stats.data_packets_lost, 0, "AP {ap} lost data");
        }
    }

    #[test]
    fn same_channel_bsses_share_the_medium() {
        // Both BSSs on channel 0, 10 m apart: carrier sensing must arbitrate.
        let params = vec![
            node(0, "AP_A", NodeKind::Ap, 0, 0.0, 0, 0, 0, TrafficModel::FullBuffer),
            node(1, "STA_A1", NodeKind::Sta, 0, 1.0, 0, 0, 0, TrafficModel::Poisson { load: 0.0 }),
            node(2, "AP_B", NodeKind::Ap, 1, 10.0, 0, 0, 0, TrafficModel::FullBuffer),
            node(3, "STA_B1", NodeKind::Sta, 1, 11.0, 0, 0, 0, TrafficModel::Poisson { load: 0.0 }),
        ];
        let wlans = vec![
            Wlan {
                wlan_id: 0,
                code: "A".into(),
                ap_id: 0,
                sta_ids: vec![1],
            },
            Wlan {
                wlan_id: 1,
                code: "B".into(),
                ap_id: 2,
                sta_ids: vec![3],
            },
        ];
        let mut sim = Simulator::new(system(true), params, wlans, 11, SimulationLogs::disabled(4));
        sim.run(1.0, None);
        let a = &sim.nodes[0].stats;
        let b = &sim.nodes[2].stats;
        assert!(a.data_packets_acked > 0 && b.data_packets_acked > 0);
        // Within carrier-sense range there are no decodable-overlap losses.
        assert_eq!(a.loss_reasons[LossReason::PureCollision as usize], 0);
        assert_eq!(b.loss_reasons[LossReason::PureCollision as usize], 0);
        // Roughly fair split of the medium.
        let (lo, hi) = if a.bits_acked < b.bits_acked {
            (a.bits_acked as f64, b.bits_acked as f64)
        } else {
            (b.bits_acked as f64, a.bits_acked as f64)
        };
        assert!(lo / hi > 0.5, "unfair split: {lo} vs {hi}");
    }

    fn sr_scenario(colors: [i64; 2], obss_pd: f64) -> Simulator {
        // Two BSSs 100 m apart on the same channel: the inter-AP RSSI
        // (≈ −66 dBm) sits between the normal PD and the OBSS-PD ceiling.
        let mut params = vec![
            node(0, "AP_A", NodeKind::Ap, 0, 0.0, 0, 0, 0, TrafficModel::FullBuffer),
            node(1, "STA_A1", NodeKind::Sta, 0, 1.0, 0, 0, 0, TrafficModel::Poisson { load: 0.0 }),
            node(2, "AP_B", NodeKind::Ap, 1, 100.0, 0, 0, 0, TrafficModel::FullBuffer),
            node(3, "STA_B1", NodeKind::Sta, 1, 101.0, 0, 0, 0, TrafficModel::Poisson { load: 0.0 }),
        ];
        for p in &mut params {
            p.bss_color = colors[p.wlan_id];
            p.non_srg_obss_pd_dbm = obss_pd;
            p.srg_obss_pd_dbm = obss_pd;
        }
        let wlans = vec![
            Wlan {
                wlan_id: 0,
                code: "A".into(),
                ap_id: 0,
                sta_ids: vec![1],
            },
            Wlan {
                wlan_id: 1,
                code: "B".into(),
                ap_id: 2,
                sta_ids: vec![3],
            },
        ];
        Simulator::new(system(true), params, wlans, 23, SimulationLogs::disabled(4))
    }

    #[test]
    fn spatial_reuse_enables_concurrent_inter_bss_transmissions() {
        // With distinct colors and OBSS-PD at the ceiling, each BSS ignores
        // the other's frames and keeps transmitting.
        let mut sim = sr_scenario([1, 2], -62.0);
        sim.run(0.5, None);
        assert_eq!(sim.nodes[0].bss_color(), 1);
        let ignored: u64 = sim
            .nodes
            .iter()
            .map(|n| n.stats.loss_reasons[LossReason::IgnoredBySpatialReuse as usize])
            .sum();
        assert!(ignored > 0, "no frame was ignored by spatial reuse");
        let with_sr = sim.nodes[0].stats.bits_acked + sim.nodes[2].stats.bits_acked;
        assert!(sim.nodes[0].stats.data_packets_acked > 0);
        assert!(sim.nodes[2].stats.data_packets_acked > 0);

        // Same geometry without spatial reuse: the BSSs defer to each other.
        let mut baseline = sr_scenario([-1, -1], -82.0);
        baseline.run(0.5, None);
        let ignored_baseline: u64 = baseline
            .nodes
            .iter()
            .map(|n| n.stats.loss_reasons[LossReason::IgnoredBySpatialReuse as usize])
            .sum();
        assert_eq!(ignored_baseline, 0);
        let without_sr =
            baseline.nodes[0].stats.bits_acked + baseline.nodes[2].stats.bits_acked;
        assert!(
            with_sr > without_sr,
            "spatial reuse should raise aggregate delivery ({with_sr} vs {without_sr})"
        );
    }

    #[test]
    fn channel_bonding_uses_wide_transmissions_when_free() {
        let mut params = vec![
            node(0, "AP_A", NodeKind::Ap, 0, 0.0, 0, 0, 7, TrafficModel::FullBuffer),
            node(1, "STA_A1", NodeKind::Sta, 0, 5.0, 0, 0, 7, TrafficModel::Poisson { load: 0.0 }),
        ];
        for p in &mut params {
            p.dcb_policy = DcbPolicy::AlwaysMaxLog2;
        }
        let wlans = vec![Wlan {
            wlan_id: 0,
            code: "A".into(),
            ap_id: 0,
            sta_ids: vec![1],
        }];
        let mut sim = Simulator::new(system(true), params, wlans, 3, SimulationLogs::disabled(2));
        sim.run(0.2, None);
        let ap = &sim.nodes[0].stats;
        assert!(ap.data_packets_acked > 0);
        // An idle 8-channel band always bonds to the full width.
        assert!(ap.tx_time_per_width[3] > 0.0, "no 8-channel transmissions");
        assert_eq!(ap.tx_time_per_width[0], 0.0);
        assert!(ap.tx_time_per_channel[7] > 0.0);
    }

    #[test]
    fn clear_stats_discards_the_warmup() {
        let mut sim = single_bss(true);
        sim.run(0.4, Some(0.2));
        let ap = &sim.nodes[0].stats;
        assert_eq!(ap.window_start, 0.2);
        assert!(ap.data_packets_acked > 0);
    }

    #[test]
    fn channel_power_returns_to_baseline_at_quiescence() {
        let mut sim = single_bss(true);
        sim.run(0.5, None);
        // Whatever was in flight at the stop time has not ended, but the
        // STA's view of channels it never heard traffic on must be silent.
        for c in 1..8 {
            assert!(
                sim.nodes[1].channel_power.power_on(c) < 1e-12,
                "residual power on channel {c}"
            );
        }
    }
}
