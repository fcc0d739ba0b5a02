//! Per-node 802.11ax MAC/PHY state machine.
//!
//! A node reacts to its own timer events (backoff, SIFS turnaround, frame
//! end, response timeouts, NAV expiry, traffic arrivals) and to TX-start /
//! TX-end notifications overheard from every other node. All cross-node
//! effects leave through buffered `Outcome`s; the network core routes them.

use rand::Rng;
use std::collections::HashMap;

use crate::scheduler::{EventHandle, SAME_TIME_TOLERANCE, Time};
use crate::simulation::backoff::{self, ContentionWindow};
use crate::simulation::channels::{self, ChannelPower, TxRange};
use crate::simulation::frames::{self, DIFS, Modulation, PIFS, SIFS};
use crate::simulation::network::{Ctx, EventPayload, Outcome};
use crate::simulation::propagation::{self, dbm_to_pw, pw_to_dbm};
use crate::simulation::statistics::NodeStatistics;
use crate::simulation::traffic::{self, PacketBuffer};
use crate::simulation::types::{
    Configuration, LogicalNack, LossReason, MacState, NodeId, NodeKind, Notification, PacketKind,
    Performance, Position, SrFrameClass, SystemParams, TrafficModel,
};

/// Slack added to response timeouts so a reply starting exactly at SIFS is
/// seen before the timeout fires [s].
const TIMEOUT_EXTRA: Time = 1e-12;

/// OBSS-PD clamp range and spatial-reuse power rule constants [dBm].
const OBSS_PD_MIN_DBM: f64 = -82.0;
const OBSS_PD_MAX_DBM: f64 = -62.0;
const TX_PWR_REF_DBM: f64 = 21.0;
const MAX_TX_PWR_SR_DBM: f64 = 20.0;

/// Static description of a node, produced by the scenario loader.
#[derive(Debug, Clone)]
pub struct NodeParams {
    pub id: NodeId,
    pub code: String,
    pub kind: NodeKind,
    pub wlan_id: usize,
    pub position: Position,
    pub central_freq_hz: f64,
    pub primary: usize,
    pub min_ch: usize,
    pub max_ch: usize,
    pub tx_power_dbm: f64,
    pub tx_power_min_dbm: f64,
    pub tx_power_max_dbm: f64,
    pub pd_dbm: f64,
    pub pd_min_dbm: f64,
    pub pd_max_dbm: f64,
    pub tx_gain_db: f64,
    pub rx_gain_db: f64,
    pub dcb_policy: crate::simulation::types::DcbPolicy,
    pub traffic_model: TrafficModel,
    pub packet_length_bits: u32,
    pub max_ampdu: u32,
    pub capture_effect_db: f64,
    /// Constant packet error probability; negative selects the MCS-specific
    /// Eb/N0 error model.
    pub constant_per: f64,
    pub pifs_enabled: bool,
    pub cw_adaptation: bool,
    pub cw_min: u32,
    pub cw_stage_max: u32,
    pub bss_color: i64,
    pub srg: i64,
    pub non_srg_obss_pd_dbm: f64,
    pub srg_obss_pd_dbm: f64,
}

/// Cached MCS negotiation result for one destination.
#[derive(Debug, Clone)]
struct McsEntry {
    per_width: [Modulation; 4],
    dirty: bool,
}

/// The data exchange currently being attempted (survives retries).
#[derive(Debug, Clone)]
struct Exchange {
    destination: NodeId,
    left: usize,
    right: usize,
    mcs: Modulation,
    bits_per_symbol: f64,
    num_aggregated: u32,
    data_duration: Time,
    ack_duration: Time,
    tx_power_per_channel_dbm: f64,
    packet_id: u64,
}

/// What to transmit when the pending SIFS elapses.
#[derive(Debug, Clone)]
enum Reply {
    Cts {
        destination: NodeId,
        packet_id: u64,
        range: TxRange,
        data_duration: Time,
        ack_duration: Time,
    },
    Data,
    Ack {
        destination: NodeId,
        packet_id: u64,
        range: TxRange,
    },
}

/// Bookkeeping for the frame currently being decoded.
#[derive(Debug, Clone)]
struct IncomingFrame {
    source: NodeId,
    packet_id: u64,
    kind: PacketKind,
    p_rx_pw: f64,
    left: usize,
    right: usize,
}

/// An OBSS-PD transmit opportunity opened by ignoring an inter-BSS frame.
#[derive(Debug, Clone, Copy)]
struct SrOpportunity {
    until: Time,
    tx_power_limit_dbm: f64,
    obss_pd_pw: f64,
}

pub struct Node {
    // Identity and capabilities.
    pub id: NodeId,
    pub code: String,
    pub kind: NodeKind,
    pub wlan_id: usize,
    pub position: Position,
    /// Downlink destinations for an AP, the AP itself for a STA.
    peers: Vec<NodeId>,
    next_peer: usize,
    central_freq_hz: f64,
    tx_power_min_dbm: f64,
    tx_power_max_dbm: f64,
    pd_min_dbm: f64,
    pd_max_dbm: f64,
    tx_gain_db: f64,
    rx_gain_db: f64,

    // Agent-tunable configuration.
    primary: usize,
    min_ch: usize,
    max_ch: usize,
    tx_power_dbm: f64,
    pd_dbm: f64,
    pd_pw: f64,
    max_bandwidth: usize,
    spatial_reuse_enabled: bool,
    bss_color: i64,
    srg: i64,
    non_srg_obss_pd_dbm: f64,
    srg_obss_pd_dbm: f64,
    pending_config: Option<Configuration>,

    // Fixed behavior.
    dcb_policy: crate::simulation::types::DcbPolicy,
    traffic_model: TrafficModel,
    packet_length_bits: u32,
    max_ampdu: u32,
    capture_effect_db: f64,
    constant_per: f64,
    pifs_enabled: bool,

    // System-wide knobs.
    pdf_backoff: crate::simulation::types::PdfKind,
    backoff_kind: crate::simulation::types::BackoffKind,
    adjacent_model: crate::simulation::types::AdjacentChannelModel,
    path_loss_model: propagation::PathLossModel,
    basic_channel_bandwidth_hz: f64,
    noise_pw: f64,
    rts_cts_enabled: bool,

    // Runtime state.
    state: MacState,
    cw: ContentionWindow,
    pub channel_power: ChannelPower,
    buffer: PacketBuffer,
    pub stats: NodeStatistics,
    remaining_backoff: Time,
    backoff_deadline: Time,
    backoff_handle: Option<EventHandle>,
    resume_handle: Option<EventHandle>,
    /// A backoff value exists (armed or frozen).
    contending: bool,
    packet_id_counter: u64,
    current_tx: Option<Exchange>,
    retries: u32,
    timeout_handle: Option<EventHandle>,
    pending_reply: Option<Reply>,
    nav_handle: Option<EventHandle>,
    nav_until: Time,
    incoming: Option<IncomingFrame>,
    /// The notification of our own in-flight frame, re-broadcast on TX end.
    in_flight: Option<Notification>,
    tx_started_at: Time,
    mcs_cache: HashMap<NodeId, McsEntry>,
    /// Destination whose MCS response will resume a transmission attempt.
    tx_pending_mcs: Option<NodeId>,
    sr_txop: Option<SrOpportunity>,
    /// Last used (width, mcs, aggregation) for the max-bound throughput.
    last_tx_shape: Option<(usize, Modulation, u32)>,
    unreachable_warned: bool,
}

impl Node {
    pub fn new(params: NodeParams, system: &SystemParams, peers: Vec<NodeId>, num_wlans: usize) -> Self {
        let spatial_reuse_enabled = params.bss_color >= 0;
        Self {
            id: params.id,
            code: params.code,
            kind: params.kind,
            wlan_id: params.wlan_id,
            position: params.position,
            peers,
            next_peer: 0,
            central_freq_hz: params.central_freq_hz,
            tx_power_min_dbm: params.tx_power_min_dbm,
            tx_power_max_dbm: params.tx_power_max_dbm,
            pd_min_dbm: params.pd_min_dbm,
            pd_max_dbm: params.pd_max_dbm,
            tx_gain_db: params.tx_gain_db,
            rx_gain_db: params.rx_gain_db,
            primary: params.primary,
            min_ch: params.min_ch,
            max_ch: params.max_ch,
            tx_power_dbm: params.tx_power_dbm,
            pd_dbm: params.pd_dbm,
            pd_pw: dbm_to_pw(params.pd_dbm),
            max_bandwidth: params.max_ch - params.min_ch + 1,
            spatial_reuse_enabled,
            bss_color: params.bss_color,
            srg: params.srg,
            non_srg_obss_pd_dbm: params.non_srg_obss_pd_dbm.clamp(OBSS_PD_MIN_DBM, OBSS_PD_MAX_DBM),
            srg_obss_pd_dbm: params.srg_obss_pd_dbm.clamp(OBSS_PD_MIN_DBM, OBSS_PD_MAX_DBM),
            pending_config: None,
            dcb_policy: params.dcb_policy,
            traffic_model: params.traffic_model,
            packet_length_bits: params.packet_length_bits,
            max_ampdu: params.max_ampdu.max(1),
            capture_effect_db: params.capture_effect_db,
            constant_per: params.constant_per,
            pifs_enabled: params.pifs_enabled,
            pdf_backoff: system.pdf_backoff,
            backoff_kind: system.backoff_kind,
            adjacent_model: system.adjacent_model,
            path_loss_model: system.path_loss_model,
            basic_channel_bandwidth_hz: system.basic_channel_bandwidth_mhz * 1e6,
            noise_pw: dbm_to_pw(system.noise_level_dbm),
            rts_cts_enabled: system.rts_cts_enabled,
            state: MacState::Sensing,
            cw: ContentionWindow::new(params.cw_min, params.cw_stage_max, params.cw_adaptation),
            channel_power: ChannelPower::new(system.num_channels),
            buffer: PacketBuffer::new(),
            stats: NodeStatistics::new(system.num_channels, num_wlans),
            remaining_backoff: 0.0,
            backoff_deadline: 0.0,
            backoff_handle: None,
            resume_handle: None,
            contending: false,
            packet_id_counter: 0,
            current_tx: None,
            retries: 0,
            timeout_handle: None,
            pending_reply: None,
            nav_handle: None,
            nav_until: 0.0,
            incoming: None,
            in_flight: None,
            tx_started_at: 0.0,
            mcs_cache: HashMap::new(),
            tx_pending_mcs: None,
            sr_txop: None,
            last_tx_shape: None,
            unreachable_warned: false,
        }
    }

    pub fn state(&self) -> MacState {
        self.state
    }

    pub fn primary_channel(&self) -> usize {
        self.primary
    }

    pub fn bss_color(&self) -> i64 {
        self.bss_color
    }

    pub fn tx_power_dbm(&self) -> f64 {
        self.tx_power_dbm
    }

    /// Seed traffic and contention at simulation start.
    pub fn start(&mut self, ctx: &mut Ctx) {
        match self.traffic_model {
            TrafficModel::FullBuffer => {
                traffic::refill(&mut self.buffer, ctx.now());
                self.stats.packets_generated += self.buffer.len() as u64;
            }
            _ => {
                if let Some(gap) = traffic::next_arrival_gap(self.traffic_model, ctx.rng) {
                    ctx.schedule(self.id, EventPayload::PacketArrival, ctx.now() + gap);
                }
            }
        }
        self.ensure_contention(ctx);
    }

    // ---------- timer events ----------

    pub fn handle_event(&mut self, payload: EventPayload, ctx: &mut Ctx) {
        match payload {
            EventPayload::BackoffExpiry => self.on_backoff_expiry(ctx),
            EventPayload::BackoffResume => self.on_backoff_resume(ctx),
            EventPayload::TxEnd => self.on_own_tx_end(ctx),
            EventPayload::SifsElapsed => self.on_sifs_elapsed(ctx),
            EventPayload::Timeout => self.on_timeout(ctx),
            EventPayload::NavExpiry => self.on_nav_expiry(ctx),
            EventPayload::PacketArrival => self.on_packet_arrival(ctx),
            other => panic!("node {} received a foreign event: {other:?}", self.id),
        }
    }

    fn on_packet_arrival(&mut self, ctx: &mut Ctx) {
        self.stats.packets_generated += 1;
        let accepted = self.buffer.push(traffic::BufferedPacket {
            generated_at: ctx.now(),
        });
        if !accepted {
            self.stats.packets_dropped += 1;
        }
        if let Some(gap) = traffic::next_arrival_gap(self.traffic_model, ctx.rng) {
            ctx.schedule(self.id, EventPayload::PacketArrival, ctx.now() + gap);
        }
        if accepted {
            self.ensure_contention(ctx);
        }
    }

    fn on_backoff_expiry(&mut self, ctx: &mut Ctx) {
        debug_assert_eq!(self.state, MacState::Sensing);
        self.backoff_handle = None;
        self.contending = false;
        self.remaining_backoff = 0.0;
        if self.apply_pending_config(ctx) {
            // Channels changed under us; contend again from scratch.
            self.ensure_contention(ctx);
            return;
        }
        if self.buffer.is_empty() {
            return;
        }
        self.attempt_transmission(ctx);
    }

    fn on_backoff_resume(&mut self, ctx: &mut Ctx) {
        self.resume_handle = None;
        if self.state != MacState::Sensing || !self.contending || self.backoff_handle.is_some() {
            return;
        }
        if self.buffer.is_empty() {
            return;
        }
        self.try_resume(ctx);
    }

    fn on_sifs_elapsed(&mut self, ctx: &mut Ctx) {
        let Some(reply) = self.pending_reply.take() else {
            return;
        };
        match reply {
            Reply::Cts {
                destination,
                packet_id,
                range,
                data_duration,
                ack_duration,
            } => {
                self.state = MacState::TxCts;
                self.stats.cts_sent += 1;
                let notif = self.build_notification(
                    destination,
                    PacketKind::Cts,
                    range,
                    frames::CTS_BITS,
                    1,
                    frames::cts_duration(),
                    frames::nav_from_cts(data_duration, ack_duration),
                    data_duration,
                    ack_duration,
                    self.current_tx_power_dbm(ctx.now(), range.width()),
                    frames::LEGACY_BITS_PER_SYMBOL,
                    packet_id,
                );
                self.begin_transmission(notif, ctx);
            }
            Reply::Data => self.send_data(ctx),
            Reply::Ack {
                destination,
                packet_id,
                range,
            } => {
                self.state = MacState::TxAck;
                let notif = self.build_notification(
                    destination,
                    PacketKind::Ack,
                    range,
                    frames::BLOCK_ACK_BITS,
                    1,
                    frames::block_ack_duration(),
                    0.0,
                    0.0,
                    0.0,
                    self.current_tx_power_dbm(ctx.now(), range.width()),
                    frames::LEGACY_BITS_PER_SYMBOL,
                    packet_id,
                );
                self.begin_transmission(notif, ctx);
            }
        }
    }

    fn on_own_tx_end(&mut self, ctx: &mut Ctx) {
        let notif = self
            .in_flight
            .take()
            .expect("TX end without an in-flight frame");
        ctx.outcomes.push_back(Outcome::TxFinished(notif));
        let now = ctx.now();
        match self.state {
            MacState::TxRts => {
                self.state = MacState::WaitCts;
                self.arm_timeout(ctx, now + SIFS + TIMEOUT_EXTRA);
            }
            MacState::TxCts => {
                self.state = MacState::WaitData;
                self.arm_timeout(ctx, now + SIFS + TIMEOUT_EXTRA);
            }
            MacState::TxData => {
                self.state = MacState::WaitAck;
                self.arm_timeout(ctx, now + SIFS + TIMEOUT_EXTRA);
            }
            MacState::TxAck => {
                // Responder side of a completed exchange.
                self.state = MacState::Sensing;
                self.ensure_contention(ctx);
            }
            other => panic!("TX end in non-transmitting state {other:?}"),
        }
    }

    fn on_timeout(&mut self, ctx: &mut Ctx) {
        self.timeout_handle = None;
        match self.state {
            MacState::WaitCts => {
                self.stats.rts_lost += 1;
                if let Some(tx) = &self.current_tx {
                    self.stats
                        .record_airtime(tx.left, tx.right, frames::rts_duration(), false);
                }
                self.handle_exchange_failure(ctx);
            }
            MacState::WaitData => {
                // We answered with a CTS that was never followed by data.
                self.stats.cts_lost += 1;
                self.state = MacState::Sensing;
                self.ensure_contention(ctx);
            }
            MacState::WaitAck => {
                let (lost_packets, lost_bits, left, right, duration) = match &self.current_tx {
                    Some(tx) => (
                        tx.num_aggregated as u64,
                        tx.num_aggregated as u64 * self.packet_length_bits as u64,
                        tx.left,
                        tx.right,
                        tx.data_duration,
                    ),
                    None => (0, 0, 0, 0, 0.0),
                };
                self.stats.data_packets_lost += lost_packets;
                self.stats.bits_lost += lost_bits;
                if duration > 0.0 {
                    self.stats.record_airtime(left, right, duration, false);
                }
                self.handle_exchange_failure(ctx);
            }
            // A reply arrived right before the timeout fired; stale timer.
            _ => {}
        }
    }

    fn on_nav_expiry(&mut self, ctx: &mut Ctx) {
        self.nav_handle = None;
        if self.state != MacState::Nav {
            return;
        }
        self.state = MacState::Sensing;
        self.ensure_contention(ctx);
    }

    // ---------- contention ----------

    /// Inter-frame space gating backoff resumption.
    fn resume_ifs(&self) -> Time {
        if self.pifs_enabled { PIFS } else { DIFS }
    }

    fn effective_pd_pw(&self, now: Time) -> f64 {
        match self.sr_txop {
            Some(op) if now < op.until => op.obss_pd_pw.max(self.pd_pw),
            _ => self.pd_pw,
        }
    }

    /// Make sure a backoff is pending whenever there is traffic to serve.
    fn ensure_contention(&mut self, ctx: &mut Ctx) {
        if self.state != MacState::Sensing || self.buffer.is_empty() {
            return;
        }
        if !self.contending {
            self.remaining_backoff = backoff::compute_backoff(
                self.pdf_backoff,
                self.cw.current(),
                self.backoff_kind,
                ctx.rng,
            );
            self.contending = true;
        }
        self.try_resume(ctx);
    }

    /// Arm the frozen backoff if the primary has been idle long enough,
    /// otherwise book a resume check for the earliest instant it could be.
    fn try_resume(&mut self, ctx: &mut Ctx) {
        if self.backoff_handle.is_some() {
            return;
        }
        let now = ctx.now();
        let pd = self.effective_pd_pw(now);
        let ifs = self.resume_ifs();
        if self.channel_power.power_on(self.primary) > pd {
            // Busy: a future TX-end will call back in here.
            return;
        }
        if self.channel_power.idle_for(self.primary, pd, now, ifs) {
            self.remaining_backoff = backoff::align_remaining(self.backoff_kind, self.remaining_backoff);
            self.backoff_deadline = now + self.remaining_backoff;
            self.backoff_handle =
                Some(ctx.schedule(self.id, EventPayload::BackoffExpiry, self.backoff_deadline));
        } else if self.resume_handle.is_none() {
            let at = self.channel_power.free_since(self.primary) + ifs;
            self.resume_handle =
                Some(ctx.schedule(self.id, EventPayload::BackoffResume, at.max(now)));
        }
    }

    /// Freeze a running backoff. Pausing while already paused only counts
    /// the interruption.
    fn pause_backoff(&mut self, ctx: &mut Ctx) {
        self.stats.backoff_interruptions += 1;
        if let Some(handle) = self.backoff_handle.take() {
            ctx.scheduler.cancel(handle);
            self.remaining_backoff = (self.backoff_deadline - ctx.now()).max(0.0);
        }
    }

    // ---------- transmission ----------

    fn attempt_transmission(&mut self, ctx: &mut Ctx) {
        let now = ctx.now();
        let pd = self.effective_pd_pw(now);
        let free: Vec<bool> = (0..self.channel_power.num_channels())
            .map(|c| {
                c >= self.min_ch
                    && c <= self.max_ch
                    && self.channel_power.idle_for(c, pd, now, DIFS)
            })
            .collect();
        let destination = match &self.current_tx {
            Some(tx) => tx.destination,
            None => {
                if self.peers.is_empty() {
                    return;
                }
                let dest = self.peers[self.next_peer % self.peers.len()];
                self.next_peer = (self.next_peer + 1) % self.peers.len();
                dest
            }
        };
        let mcs_table = match self.mcs_cache.get(&destination) {
            Some(entry) if !entry.dirty => entry.per_width,
            _ => {
                // Stale or missing: negotiate first, then resume this attempt.
                self.tx_pending_mcs = Some(destination);
                ctx.outcomes.push_back(Outcome::McsRequest {
                    from: self.id,
                    to: destination,
                });
                return;
            }
        };
        let Some(range) = channels::select_tx_range(
            self.dcb_policy,
            self.primary,
            self.min_ch,
            self.max_ch,
            self.max_bandwidth,
            &free,
            Some(&mcs_table),
            ctx.rng,
        ) else {
            self.redraw_backoff(ctx);
            return;
        };
        // Fall back to narrower log2 ranges while the MCS forbids the width.
        let mut range = range;
        while range.width() > 1 && mcs_table[range.width().trailing_zeros() as usize] == Modulation::Forbidden
        {
            let width = range.width() / 2;
            let left = (self.primary / width) * width;
            if left < self.min_ch || left + width - 1 > self.max_ch {
                range = TxRange {
                    left: self.primary,
                    right: self.primary,
                };
                break;
            }
            range = TxRange {
                left,
                right: left + width - 1,
            };
        }
        let mcs = mcs_table[range.width().trailing_zeros() as usize];
        if mcs == Modulation::Forbidden {
            if !self.unreachable_warned {
                self.unreachable_warned = true;
                log::warn!(
                    "node {} cannot reach node {} at any MCS; rescheduling contention",
                    self.code,
                    destination
                );
            }
            self.redraw_backoff(ctx);
            return;
        }
        let bits_per_symbol = frames::bits_per_symbol(mcs, range.width());
        let buffered = self.buffer.len() as u32;
        let num_aggregated = frames::clamp_aggregation(
            self.max_ampdu.min(buffered.max(1)),
            self.packet_length_bits,
            bits_per_symbol,
        );
        let data_duration =
            frames::data_duration(num_aggregated, self.packet_length_bits, bits_per_symbol);
        let ack_duration = frames::block_ack_duration();
        let tx_power_per_channel_dbm = self.current_tx_power_dbm(now, range.width());
        let packet_id = match &self.current_tx {
            Some(tx) => tx.packet_id,
            None => {
                self.packet_id_counter += 1;
                self.packet_id_counter
            }
        };
        self.current_tx = Some(Exchange {
            destination,
            left: range.left,
            right: range.right,
            mcs,
            bits_per_symbol,
            num_aggregated,
            data_duration,
            ack_duration,
            tx_power_per_channel_dbm,
            packet_id,
        });
        self.last_tx_shape = Some((range.width(), mcs, num_aggregated));
        if self.rts_cts_enabled {
            self.state = MacState::TxRts;
            self.stats.rts_sent += 1;
            let notif = self.build_notification(
                destination,
                PacketKind::Rts,
                range,
                frames::RTS_BITS,
                1,
                frames::rts_duration(),
                frames::nav_from_rts(data_duration, ack_duration),
                data_duration,
                ack_duration,
                tx_power_per_channel_dbm,
                frames::LEGACY_BITS_PER_SYMBOL,
                packet_id,
            );
            self.begin_transmission(notif, ctx);
        } else {
            self.send_data(ctx);
        }
    }

    /// No admissible channel subset: draw a fresh backoff and keep sensing.
    fn redraw_backoff(&mut self, ctx: &mut Ctx) {
        self.contending = false;
        self.ensure_contention(ctx);
    }

    fn send_data(&mut self, ctx: &mut Ctx) {
        let tx = self
            .current_tx
            .clone()
            .expect("sending data without an exchange");
        self.state = MacState::TxData;
        self.stats.data_packets_sent += tx.num_aggregated as u64;
        let notif = self.build_notification(
            tx.destination,
            PacketKind::Data,
            TxRange {
                left: tx.left,
                right: tx.right,
            },
            tx.num_aggregated * self.packet_length_bits,
            tx.num_aggregated,
            tx.data_duration,
            SIFS + tx.ack_duration,
            tx.data_duration,
            tx.ack_duration,
            tx.tx_power_per_channel_dbm,
            tx.bits_per_symbol,
            tx.packet_id,
        );
        self.begin_transmission(notif, ctx);
    }

    #[allow(clippy::too_many_arguments)]
    fn build_notification(
        &self,
        destination: NodeId,
        kind: PacketKind,
        range: TxRange,
        packet_length: u32,
        num_aggregated: u32,
        tx_duration: Time,
        nav_duration: Time,
        data_duration: Time,
        ack_duration: Time,
        tx_power_dbm: f64,
        bits_per_symbol: f64,
        packet_id: u64,
    ) -> Notification {
        let mcs_table = self
            .mcs_cache
            .get(&destination)
            .map(|e| e.per_width)
            .unwrap_or([Modulation::Forbidden; 4]);
        Notification {
            source_id: self.id,
            destination_id: destination,
            kind,
            left_channel: range.left,
            right_channel: range.right,
            packet_length,
            num_aggregated,
            tx_duration,
            tx_power_dbm,
            source_position: self.position,
            packet_id,
            bits_per_symbol,
            mcs_table,
            nav_duration,
            data_duration,
            ack_duration,
            bss_color: self.bss_color,
            srg: self.srg,
            source_wlan: self.wlan_id,
        }
    }

    fn begin_transmission(&mut self, notif: Notification, ctx: &mut Ctx) {
        self.tx_started_at = ctx.now();
        ctx.schedule(self.id, EventPayload::TxEnd, ctx.now() + notif.tx_duration);
        self.in_flight = Some(notif.clone());
        ctx.outcomes.push_back(Outcome::TxStarted(notif));
    }

    /// Per-channel TX power under constant PSD, honoring an active
    /// spatial-reuse power limit.
    fn current_tx_power_dbm(&self, now: Time, width: usize) -> f64 {
        let mut total = self.tx_power_dbm;
        if let Some(op) = self.sr_txop {
            if now < op.until {
                total = total.min(op.tx_power_limit_dbm);
            }
        }
        total - 3.0 * (width as f64).log2()
    }

    fn arm_timeout(&mut self, ctx: &mut Ctx, at: Time) {
        debug_assert!(self.timeout_handle.is_none());
        self.timeout_handle = Some(ctx.schedule(self.id, EventPayload::Timeout, at));
    }

    /// A response never came: escalate CW, retry or drop, and contend again.
    fn handle_exchange_failure(&mut self, ctx: &mut Ctx) {
        self.cw.increase();
        self.retries += 1;
        if self.retries > crate::simulation::types::MAX_RETRIES {
            if let Some(tx) = self.current_tx.take() {
                let dropped = self.buffer.pop_batch(tx.num_aggregated as usize);
                self.stats.packets_dropped += dropped.len() as u64;
                if matches!(self.traffic_model, TrafficModel::FullBuffer) {
                    traffic::refill(&mut self.buffer, ctx.now());
                    self.stats.packets_generated += dropped.len() as u64;
                }
            }
            self.retries = 0;
            self.cw.reset();
        }
        self.state = MacState::Sensing;
        self.contending = false;
        self.ensure_contention(ctx);
    }

    // ---------- notifications from other nodes ----------

    pub fn on_tx_start(&mut self, notif: &Notification, ctx: &mut Ctx) {
        debug_assert_ne!(notif.source_id, self.id);
        let now = ctx.now();
        if let Some(op) = self.sr_txop {
            if now >= op.until {
                self.sr_txop = None;
            }
        }
        let distance = self.position.distance(&notif.source_position);
        let p_rx_pw = propagation::received_power_pw(
            self.path_loss_model,
            distance,
            notif.tx_power_dbm,
            self.tx_gain_db,
            self.rx_gain_db,
            self.central_freq_hz,
            ctx.rng,
        );
        let p_rx_dbm = pw_to_dbm(p_rx_pw);
        self.channel_power.add_transmission(
            notif.source_id,
            notif.packet_id,
            notif.left_channel,
            notif.right_channel,
            p_rx_pw,
            self.adjacent_model,
        );
        self.stats.observe_rssi(notif.source_wlan, p_rx_dbm);

        // OBSS-PD spatial reuse: inter-BSS frames under the dedicated
        // threshold are ignored and open a reduced-power TX opportunity.
        let class = self.classify_frame(notif);
        let mut ignored_by_sr = false;
        if class != SrFrameClass::IntraBss {
            let obss_pd_dbm = match class {
                SrFrameClass::Srg => self.srg_obss_pd_dbm,
                _ => self.non_srg_obss_pd_dbm,
            };
            if p_rx_dbm < obss_pd_dbm {
                ignored_by_sr = true;
                self.sr_txop = Some(SrOpportunity {
                    until: now + notif.tx_duration + notif.nav_duration,
                    tx_power_limit_dbm: (TX_PWR_REF_DBM - (obss_pd_dbm - OBSS_PD_MIN_DBM))
                        .min(MAX_TX_PWR_SR_DBM),
                    obss_pd_pw: dbm_to_pw(obss_pd_dbm),
                });
                self.emit_nack(
                    ctx,
                    notif,
                    LossReason::IgnoredBySpatialReuse,
                    Some(notif.source_id),
                    None,
                );
            }
        }

        let pd = self.effective_pd_pw(now);
        self.channel_power.update_free_timestamps(pd, now);
        self.stats
            .track_primary_busy(self.channel_power.power_on(self.primary) > pd, now);

        // A new overlapping signal may break the capture of the frame
        // currently being decoded.
        if self.state.is_receiving() {
            if let Some(inc) = self.incoming.clone() {
                if inc.source != notif.source_id {
                    let interference = self.channel_power.max_interference_pw(
                        inc.left,
                        inc.right,
                        (inc.source, inc.packet_id),
                    );
                    let sinr = channels::sinr(inc.p_rx_pw, self.noise_pw, interference);
                    if propagation::linear_to_db(sinr) < self.capture_effect_db {
                        self.emit_nack_for(
                            ctx,
                            &inc,
                            LossReason::CaptureEffectBroken,
                            Some(inc.source),
                            Some(notif.source_id),
                        );
                        self.incoming = None;
                        self.state = MacState::Sensing;
                        self.ensure_contention(ctx);
                    }
                }
            }
        }

        // Energy on the primary freezes a running backoff no matter whom
        // the frame addresses.
        if self.state == MacState::Sensing
            && self.backoff_handle.is_some()
            && self.channel_power.power_on(self.primary) > pd
        {
            self.pause_backoff(ctx);
        }

        if notif.destination_id == self.id && !ignored_by_sr {
            self.admit_reception(notif, p_rx_pw, ctx);
        } else {
            self.handle_overheard(notif, p_rx_pw, ignored_by_sr, ctx);
        }
    }

    fn classify_frame(&self, notif: &Notification) -> SrFrameClass {
        if !self.spatial_reuse_enabled || notif.bss_color < 0 || notif.bss_color == self.bss_color
        {
            SrFrameClass::IntraBss
        } else if self.srg >= 0 && notif.srg == self.srg {
            SrFrameClass::Srg
        } else {
            SrFrameClass::NonSrg
        }
    }

    /// Ordered decode admission tests; the first failure fixes the reason.
    fn admit_reception(&mut self, notif: &Notification, p_rx_pw: f64, ctx: &mut Ctx) {
        let interference = self.channel_power.max_interference_pw(
            notif.left_channel,
            notif.right_channel,
            (notif.source_id, notif.packet_id),
        );
        let sinr = channels::sinr(p_rx_pw, self.noise_pw, interference);
        let reason = if self.state.is_transmitting() {
            Some(LossReason::DestinationWasTx)
        } else if p_rx_pw < self.pd_pw {
            if self.state.is_receiving() {
                Some(LossReason::LowSignalWhileRx)
            } else {
                Some(LossReason::LowSignal)
            }
        } else if propagation::linear_to_db(sinr) < self.capture_effect_db {
            Some(LossReason::Interference)
        } else if self.state.is_receiving() {
            // Two decodable frames addressed here overlap in time.
            Some(LossReason::PureCollision)
        } else if !notif.covers(self.primary) {
            Some(LossReason::OutsideChannelRange)
        } else if self.state == MacState::Nav {
            Some(LossReason::LostInNav)
        } else if notif.kind == PacketKind::Data && self.packet_error(sinr, notif, ctx) {
            Some(LossReason::SinrProbability)
        } else {
            None
        };
        if let Some(reason) = reason {
            self.emit_nack(ctx, notif, reason, Some(notif.source_id), None);
            return;
        }
        let rx_state = match notif.kind {
            PacketKind::Rts => MacState::RxRts,
            PacketKind::Cts => MacState::RxCts,
            PacketKind::Data => MacState::RxData,
            PacketKind::Ack => MacState::RxAck,
            // MCS negotiation never reaches the radio admission path.
            PacketKind::McsRequest | PacketKind::McsResponse => return,
        };
        // The awaited reply arrived: disarm its timeout.
        let expected = matches!(
            (self.state, notif.kind),
            (MacState::WaitCts, PacketKind::Cts)
                | (MacState::WaitData, PacketKind::Data)
                | (MacState::WaitAck, PacketKind::Ack)
        );
        if expected {
            if let Some(handle) = self.timeout_handle.take() {
                ctx.scheduler.cancel(handle);
            }
        } else if matches!(
            self.state,
            MacState::WaitCts | MacState::WaitData | MacState::WaitAck
        ) {
            // Unexpected kind while waiting: let the timeout handle it.
            return;
        }
        // Decoding suspends contention; the frozen remainder survives.
        if self.backoff_handle.is_some() {
            self.pause_backoff(ctx);
        }
        self.state = rx_state;
        self.incoming = Some(IncomingFrame {
            source: notif.source_id,
            packet_id: notif.packet_id,
            kind: notif.kind,
            p_rx_pw,
            left: notif.left_channel,
            right: notif.right_channel,
        });
    }

    /// Packet error draw: the constant PER when configured non-negative,
    /// the MCS-specific Eb/N0 model otherwise.
    fn packet_error(&self, sinr: f64, notif: &Notification, ctx: &mut Ctx) -> bool {
        let per = if self.constant_per >= 0.0 {
            self.constant_per
        } else {
            frames::per_from_sinr(
                sinr,
                self.mcs_for_width(notif),
                notif.width(),
                self.basic_channel_bandwidth_hz,
                self.packet_length_bits,
            )
        };
        per > 0.0 && ctx.rng.gen_range(0.0..1.0) < per
    }

    fn mcs_for_width(&self, notif: &Notification) -> Modulation {
        notif.mcs_table[notif.width().trailing_zeros() as usize]
    }

    fn handle_overheard(
        &mut self,
        notif: &Notification,
        p_rx_pw: f64,
        ignored_by_sr: bool,
        ctx: &mut Ctx,
    ) {
        let now = ctx.now();
        // Simultaneous slotted backoff expiry shows up as an RTS landing at
        // the very instant our own RTS left.
        if self.state == MacState::TxRts
            && notif.kind == PacketKind::Rts
            && (now - self.tx_started_at).abs() < SAME_TIME_TOLERANCE
        {
            self.emit_nack(
                ctx,
                notif,
                LossReason::SlottedBackoffCollision,
                Some(self.id),
                Some(notif.source_id),
            );
        }
        if ignored_by_sr {
            return;
        }
        // Virtual carrier sense: a decodable RTS/CTS addressed elsewhere,
        // overlapping this node's primary.
        if p_rx_pw >= self.pd_pw
            && notif.covers(self.primary)
            && matches!(notif.kind, PacketKind::Rts | PacketKind::Cts)
        {
            let nav_until = now + notif.nav_duration;
            match self.state {
                MacState::Sensing => {
                    if self.backoff_handle.is_some() {
                        self.pause_backoff(ctx);
                    }
                    self.state = MacState::Nav;
                    self.nav_until = nav_until;
                    self.nav_handle = Some(ctx.schedule(self.id, EventPayload::NavExpiry, nav_until));
                }
                MacState::Nav if nav_until > self.nav_until => {
                    if let Some(handle) = self.nav_handle.take() {
                        ctx.scheduler.cancel(handle);
                    }
                    self.nav_until = nav_until;
                    self.nav_handle = Some(ctx.schedule(self.id, EventPayload::NavExpiry, nav_until));
                }
                _ => {}
            }
        }
    }

    pub fn on_tx_end(&mut self, notif: &Notification, ctx: &mut Ctx) {
        debug_assert_ne!(notif.source_id, self.id);
        let now = ctx.now();
        self.channel_power
            .remove_transmission(notif.source_id, notif.packet_id);
        let pd = self.effective_pd_pw(now);
        self.channel_power.update_free_timestamps(pd, now);
        self.stats
            .track_primary_busy(self.channel_power.power_on(self.primary) > pd, now);

        let is_my_frame = self
            .incoming
            .as_ref()
            .is_some_and(|inc| inc.source == notif.source_id && inc.packet_id == notif.packet_id);
        if !is_my_frame {
            // Somebody else's frame ended; maybe the primary just went idle.
            if self.state == MacState::Sensing && self.contending {
                self.try_resume(ctx);
            }
            return;
        }
        let inc = self.incoming.take().expect("checked above");
        match self.state {
            MacState::RxRts => {
                self.pending_reply = Some(Reply::Cts {
                    destination: inc.source,
                    packet_id: inc.packet_id,
                    range: TxRange {
                        left: inc.left,
                        right: inc.right,
                    },
                    data_duration: notif.data_duration,
                    ack_duration: notif.ack_duration,
                });
                ctx.schedule(self.id, EventPayload::SifsElapsed, now + SIFS);
            }
            MacState::RxCts => {
                self.pending_reply = Some(Reply::Data);
                ctx.schedule(self.id, EventPayload::SifsElapsed, now + SIFS);
            }
            MacState::RxData => {
                self.pending_reply = Some(Reply::Ack {
                    destination: inc.source,
                    packet_id: inc.packet_id,
                    range: TxRange {
                        left: inc.left,
                        right: inc.right,
                    },
                });
                ctx.schedule(self.id, EventPayload::SifsElapsed, now + SIFS);
            }
            MacState::RxAck => self.complete_exchange(ctx),
            other => panic!("reception completed in state {other:?}"),
        }
    }

    /// Block-ACK received: the whole A-MPDU is delivered.
    fn complete_exchange(&mut self, ctx: &mut Ctx) {
        let now = ctx.now();
        let tx = self
            .current_tx
            .take()
            .expect("ACK completion without an exchange");
        let batch = self.buffer.pop_batch(tx.num_aggregated as usize);
        for packet in &batch {
            self.stats.record_delay(now - packet.generated_at);
        }
        let bits = tx.num_aggregated as u64 * self.packet_length_bits as u64;
        self.stats.data_packets_acked += tx.num_aggregated as u64;
        self.stats.bits_acked += bits;
        *self
            .stats
            .bits_acked_per_destination
            .entry(tx.destination)
            .or_insert(0) += bits;
        self.stats
            .record_airtime(tx.left, tx.right, tx.data_duration, true);
        self.last_tx_shape = Some((tx.right - tx.left + 1, tx.mcs, tx.num_aggregated));
        self.cw.reset();
        self.retries = 0;
        if matches!(self.traffic_model, TrafficModel::FullBuffer) {
            let before = self.buffer.len();
            traffic::refill(&mut self.buffer, now);
            self.stats.packets_generated += (self.buffer.len() - before) as u64;
        }
        self.state = MacState::Sensing;
        self.ensure_contention(ctx);
    }

    // ---------- logical NACKs ----------

    fn emit_nack(
        &mut self,
        ctx: &mut Ctx,
        notif: &Notification,
        reason: LossReason,
        node_a: Option<NodeId>,
        node_b: Option<NodeId>,
    ) {
        self.stats.record_loss_reason(reason);
        ctx.outcomes.push_back(Outcome::Nack(LogicalNack {
            source_id: self.id,
            packet_id: notif.packet_id,
            kind: notif.kind,
            reason,
            node_id_a: node_a,
            node_id_b: node_b,
        }));
    }

    fn emit_nack_for(
        &mut self,
        ctx: &mut Ctx,
        inc: &IncomingFrame,
        reason: LossReason,
        node_a: Option<NodeId>,
        node_b: Option<NodeId>,
    ) {
        self.stats.record_loss_reason(reason);
        ctx.outcomes.push_back(Outcome::Nack(LogicalNack {
            source_id: self.id,
            packet_id: inc.packet_id,
            kind: inc.kind,
            reason,
            node_id_a: node_a,
            node_id_b: node_b,
        }));
    }

    /// A NACK implicating this node: account the loss reason. Retry state
    /// and CW escalation ride on the response timeout of the exchange.
    pub fn on_nack(&mut self, nack: &LogicalNack) {
        if nack.source_id == self.id {
            return;
        }
        self.stats.record_loss_reason(nack.reason);
    }

    // ---------- MCS negotiation ----------

    /// Answer an MCS request from `from` with the per-width ladder the
    /// received power sustains.
    pub fn handle_mcs_request(
        &mut self,
        from: NodeId,
        requester_position: Position,
        requester_tx_power_dbm: f64,
        ctx: &mut Ctx,
    ) {
        let distance = self.position.distance(&requester_position);
        let p_rx_pw = propagation::received_power_pw(
            self.path_loss_model,
            distance,
            requester_tx_power_dbm,
            self.tx_gain_db,
            self.rx_gain_db,
            self.central_freq_hz,
            ctx.rng,
        );
        let table = frames::select_mcs_per_width(pw_to_dbm(p_rx_pw));
        ctx.outcomes.push_back(Outcome::McsResponse {
            from: self.id,
            to: from,
            table,
        });
    }

    pub fn on_mcs_response(&mut self, from: NodeId, table: [Modulation; 4], ctx: &mut Ctx) {
        self.mcs_cache.insert(
            from,
            McsEntry {
                per_width: table,
                dirty: false,
            },
        );
        if self.tx_pending_mcs.take() == Some(from) {
            self.attempt_transmission(ctx);
        }
    }

    /// A peer's configuration changed: its cached MCS ladder is stale.
    pub fn invalidate_mcs(&mut self, destination: NodeId) {
        if let Some(entry) = self.mcs_cache.get_mut(&destination) {
            entry.dirty = true;
        }
    }

    // ---------- decision layer ----------

    /// Current (Configuration, Performance) pair for the agent loop.
    pub fn report(&self, now: Time) -> (Configuration, Performance) {
        let max_bound = match self.last_tx_shape {
            Some((width, mcs, num_agg)) => {
                let bits = num_agg as f64 * self.packet_length_bits as f64;
                let cycle = DIFS
                    + frames::rts_duration()
                    + frames::cts_duration()
                    + frames::data_duration(
                        num_agg,
                        self.packet_length_bits,
                        frames::bits_per_symbol(mcs, width),
                    )
                    + frames::block_ack_duration()
                    + 3.0 * SIFS;
                bits / cycle
            }
            None => 0.0,
        };
        let config = Configuration {
            timestamp: now,
            primary_channel: self.primary,
            pd_dbm: self.pd_dbm,
            tx_power_dbm: self.tx_power_dbm,
            max_bandwidth: self.max_bandwidth,
            spatial_reuse_enabled: self.spatial_reuse_enabled,
            bss_color: self.bss_color,
            srg: self.srg,
            non_srg_obss_pd_dbm: self.non_srg_obss_pd_dbm,
            srg_obss_pd_dbm: self.srg_obss_pd_dbm,
        };
        let stas: &[NodeId] = if self.kind == NodeKind::Ap {
            &self.peers
        } else {
            &[]
        };
        let perf = self.stats.build_performance(now, max_bound, stas);
        (config, perf)
    }

    /// Stage a configuration written back by the agent; it takes effect at
    /// the next quiescent instant.
    pub fn submit_configuration(&mut self, config: Configuration, ctx: &mut Ctx) {
        self.pending_config = Some(config);
        if self.state == MacState::Sensing && self.in_flight.is_none() {
            if let Some(handle) = self.backoff_handle.take() {
                ctx.scheduler.cancel(handle);
            }
            self.contending = false;
            if self.apply_pending_config(ctx) {
                self.ensure_contention(ctx);
            }
        }
    }

    /// Adopt the WLAN-wide pieces of the AP's new configuration (STAs).
    pub fn adopt_wlan_configuration(&mut self, config: &Configuration) {
        self.primary = config.primary_channel;
        self.pd_dbm = config.pd_dbm.clamp(self.pd_min_dbm, self.pd_max_dbm);
        self.pd_pw = dbm_to_pw(self.pd_dbm);
        self.max_bandwidth = config.max_bandwidth;
        self.spatial_reuse_enabled = config.spatial_reuse_enabled;
        self.bss_color = config.bss_color;
        self.srg = config.srg;
        self.non_srg_obss_pd_dbm = config.non_srg_obss_pd_dbm.clamp(OBSS_PD_MIN_DBM, OBSS_PD_MAX_DBM);
        self.srg_obss_pd_dbm = config.srg_obss_pd_dbm.clamp(OBSS_PD_MIN_DBM, OBSS_PD_MAX_DBM);
    }

    /// Apply a staged configuration; true when something was applied.
    fn apply_pending_config(&mut self, ctx: &mut Ctx) -> bool {
        let Some(config) = self.pending_config.take() else {
            return false;
        };
        self.primary = config
            .primary_channel
            .clamp(self.min_ch, self.max_ch);
        self.pd_dbm = config.pd_dbm.clamp(self.pd_min_dbm, self.pd_max_dbm);
        self.pd_pw = dbm_to_pw(self.pd_dbm);
        self.tx_power_dbm = config
            .tx_power_dbm
            .clamp(self.tx_power_min_dbm, self.tx_power_max_dbm);
        self.max_bandwidth = config.max_bandwidth.clamp(1, self.max_ch - self.min_ch + 1);
        self.spatial_reuse_enabled = config.spatial_reuse_enabled;
        self.bss_color = config.bss_color;
        self.srg = config.srg;
        self.non_srg_obss_pd_dbm = config.non_srg_obss_pd_dbm.clamp(OBSS_PD_MIN_DBM, OBSS_PD_MAX_DBM);
        self.srg_obss_pd_dbm = config.srg_obss_pd_dbm.clamp(OBSS_PD_MIN_DBM, OBSS_PD_MAX_DBM);
        ctx.outcomes.push_back(Outcome::ConfigChanged { node: self.id });
        true
    }

    pub fn clear_stats(&mut self, now: Time) {
        self.stats.clear(now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::{QueueBackend, Scheduler};
    use crate::simulation::network::Owner;
    use crate::simulation::types::{AdjacentChannelModel, BackoffKind, DcbPolicy, PdfKind};
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use std::collections::VecDeque;

    fn system() -> SystemParams {
        SystemParams {
            num_channels: 8,
            basic_channel_bandwidth_mhz: 20.0,
            pdf_backoff: PdfKind::Deterministic,
            pdf_tx_time: PdfKind::Deterministic,
            backoff_kind: BackoffKind::Slotted,
            noise_level_dbm: -95.0,
            adjacent_model: AdjacentChannelModel::None,
            path_loss_model: propagation::PathLossModel::FreeSpace,
            capture_effect_default_db: 10.0,
            constant_per_default: 0.0,
            packet_length_default_bits: 12000,
            num_packets_agg_default: 1,
            rts_cts_enabled: true,
            queue_backend: QueueBackend::BinaryHeap,
        }
    }

    fn receiver() -> Node {
        let params = NodeParams {
            id: 2,
            code: "STA_RX".into(),
            kind: NodeKind::Sta,
            wlan_id: 0,
            position: Position { x: 0.0, y: 0.0, z: 0.0 },
            central_freq_hz: 5.0e9,
            primary: 0,
            min_ch: 0,
            max_ch: 0,
            tx_power_dbm: 20.0,
            tx_power_min_dbm: 1.0,
            tx_power_max_dbm: 20.0,
            pd_dbm: -82.0,
            pd_min_dbm: -82.0,
            pd_max_dbm: -62.0,
            tx_gain_db: 0.0,
            rx_gain_db: 0.0,
            dcb_policy: DcbPolicy::OnlyPrimary,
            traffic_model: TrafficModel::Poisson { load: 0.0 },
            packet_length_bits: 12000,
            max_ampdu: 1,
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
        };
        Node::new(params, &system(), vec![0], 1)
    }

    /// A data frame landing at the receiver at roughly `p_rx_dbm` (10 m of
    /// free-space loss at 5 GHz is 66.4 dB).
    fn data_frame(source: NodeId, packet_id: u64, p_rx_dbm: f64) -> Notification {
        Notification {
            source_id: source,
            destination_id: 2,
            kind: PacketKind::Data,
            left_channel: 0,
            right_channel: 0,
            packet_length: 12000,
            num_aggregated: 1,
            tx_duration: 1e-3,
            tx_power_dbm: p_rx_dbm + 66.42,
            source_position: Position { x: 10.0, y: 0.0, z: 0.0 },
            packet_id,
            bits_per_symbol: 117.0,
            mcs_table: [Modulation::BpskHalf; 4],
            nav_duration: 0.0,
            data_duration: 1e-3,
            ack_duration: 100e-6,
            bss_color: -1,
            srg: -1,
            source_wlan: 0,
        }
    }

    #[test]
    fn stronger_first_frame_survives_a_weak_overlap() {
        let mut node = receiver();
        let mut scheduler: Scheduler<Owner, EventPayload> = Scheduler::new(QueueBackend::BinaryHeap);
        let mut rng = StdRng::seed_from_u64(1);
        let mut outcomes = VecDeque::new();
        let mut ctx = Ctx {
            scheduler: &mut scheduler,
            rng: &mut rng,
            outcomes: &mut outcomes,
        };
        node.on_tx_start(&data_frame(0, 100, -50.0), &mut ctx);
        assert_eq!(node.state(), MacState::RxData);
        // A 25 dB weaker frame arrives mid-reception: its own SINR is far
        // under the capture threshold.
        node.on_tx_start(&data_frame(1, 101, -75.0), &mut ctx);
        assert_eq!(node.state(), MacState::RxData);
        let interference = outcomes.iter().any(|o| {
            matches!(
                o,
                Outcome::Nack(nack)
                    if nack.packet_id == 101 && nack.reason == LossReason::Interference
            )
        });
        assert!(interference, "weak overlapping frame must be lost to interference");
        assert_eq!(node.stats.loss_reasons[LossReason::CaptureEffectBroken as usize], 0);
    }

    #[test]
    fn stronger_second_frame_breaks_the_capture() {
        let mut node = receiver();
        let mut scheduler: Scheduler<Owner, EventPayload> = Scheduler::new(QueueBackend::BinaryHeap);
        let mut rng = StdRng::seed_from_u64(2);
        let mut outcomes = VecDeque::new();
        let mut ctx = Ctx {
            scheduler: &mut scheduler,
            rng: &mut rng,
            outcomes: &mut outcomes,
        };
        node.on_tx_start(&data_frame(0, 100, -75.0), &mut ctx);
        assert_eq!(node.state(), MacState::RxData);
        // Reversed powers flip the outcome: the late strong frame destroys
        // the ongoing weak reception and is decoded itself.
        node.on_tx_start(&data_frame(1, 101, -50.0), &mut ctx);
        assert_eq!(node.state(), MacState::RxData);
        let broken = outcomes.iter().any(|o| {
            matches!(
                o,
                Outcome::Nack(nack)
                    if nack.packet_id == 100 && nack.reason == LossReason::CaptureEffectBroken
            )
        });
        assert!(broken, "weak ongoing reception must be broken");
        assert_eq!(node.primary_channel(), 0);
    }

    #[test]
    fn spatial_reuse_power_rule_caps_the_txop() {
        let mut node = receiver();
        // Enable spatial reuse with the most permissive OBSS-PD.
        node.spatial_reuse_enabled = true;
        node.bss_color = 1;
        node.non_srg_obss_pd_dbm = -62.0;
        let mut scheduler: Scheduler<Owner, EventPayload> = Scheduler::new(QueueBackend::BinaryHeap);
        let mut rng = StdRng::seed_from_u64(3);
        let mut outcomes = VecDeque::new();
        let mut ctx = Ctx {
            scheduler: &mut scheduler,
            rng: &mut rng,
            outcomes: &mut outcomes,
        };
        // Inter-BSS frame (color 2) below the OBSS-PD threshold.
        let mut frame = data_frame(0, 100, -70.0);
        frame.destination_id = 9;
        frame.bss_color = 2;
        node.on_tx_start(&frame, &mut ctx);
        assert_eq!(node.state(), MacState::Sensing, "ignored frame must not block");
        let ignored = outcomes.iter().any(|o| {
            matches!(
                o,
                Outcome::Nack(nack) if nack.reason == LossReason::IgnoredBySpatialReuse
            )
        });
        assert!(ignored);
        // TX_PWR_REF − (OBSS-PD − OBSS-PD-min) = 21 − 20 = 1 dBm, capped by
        // the SR maximum; constant PSD subtracts nothing at width 1.
        assert!((node.current_tx_power_dbm(0.0, 1) - 1.0).abs() < 1e-9);
        assert_eq!(node.bss_color(), 1);
    }
}
