//! Type definitions shared across the simulation.
//!
//! Contains the data model used by the node state machine and the network
//! core: node roles and MAC states, packet kinds, loss reasons, channel
//! bonding policies, notifications exchanged on the fan-out bus, logical
//! NACKs, and the configuration/performance reports consumed by the
//! decision layer.

use serde::Serialize;

use crate::scheduler::Time;

/// Node identifier (index into the simulation's node table).
pub type NodeId = usize;

/// Capacity of the per-node packet buffer.
pub const PACKET_BUFFER_SIZE: usize = 100;

/// Maximum number of retransmission attempts for a data exchange before the
/// head-of-line packet is dropped.
pub const MAX_RETRIES: u32 = 7;

/// 3-D position in meters. Nodes never relocate after startup.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Position {
    /// Euclidean distance to another position.
    pub fn distance(&self, other: &Position) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        let dz = self.z - other.z;
        (dx * dx + dy * dy + dz * dz).sqrt()
    }
}

/// Node role within its BSS.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum NodeKind {
    Ap,
    Sta,
}

impl NodeKind {
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(NodeKind::Ap),
            1 => Some(NodeKind::Sta),
            _ => None,
        }
    }
}

/// MAC state of a node. Exactly one is active at any instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MacState {
    /// Decrementing/awaiting backoff while sensing the channel.
    Sensing,
    TxData,
    RxData,
    WaitAck,
    TxAck,
    RxAck,
    TxRts,
    TxCts,
    RxRts,
    RxCts,
    WaitCts,
    WaitData,
    /// Virtual carrier-sense blackout.
    Nav,
    Sleep,
}

impl MacState {
    /// True while this node is the source of an in-flight transmission.
    pub fn is_transmitting(&self) -> bool {
        matches!(
            self,
            MacState::TxData | MacState::TxAck | MacState::TxRts | MacState::TxCts
        )
    }

    /// True while this node is decoding an in-flight reception.
    pub fn is_receiving(&self) -> bool {
        matches!(
            self,
            MacState::RxData | MacState::RxAck | MacState::RxRts | MacState::RxCts
        )
    }
}

/// Frame kinds carried by notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketKind {
    Data,
    Ack,
    Rts,
    Cts,
    McsRequest,
    McsResponse,
}

/// Why a would-be receiver could not decode a frame. The numeric code is
/// stable and indexes the loss-reason histogram in the statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LossReason {
    /// Destination was already transmitting when the frame arrived.
    DestinationWasTx = 0,
    /// Received power below the packet-detect threshold.
    LowSignal = 1,
    /// SINR under the capture-effect threshold while power was detectable.
    Interference = 2,
    /// Two decodable frames addressed to the same destination overlapped.
    PureCollision = 3,
    /// Destination was receiving another frame and the new one was too weak.
    LowSignalWhileRx = 4,
    /// Lost to the SINR-based packet error probability.
    SinrProbability = 5,
    /// Frame arrived while the receiver sat in NAV.
    LostInNav = 6,
    /// Simultaneous backoff expiry at the same slot boundary.
    SlottedBackoffCollision = 7,
    /// Sender's channel range does not cover the receiver's primary.
    OutsideChannelRange = 8,
    /// A later transmission broke an ongoing capture.
    CaptureEffectBroken = 9,
    /// Inter-BSS frame below the OBSS-PD threshold, ignored by spatial reuse.
    IgnoredBySpatialReuse = 10,
}

/// Number of distinct loss reasons (histogram length).
pub const NUM_LOSS_REASONS: usize = 11;

/// Channel bonding policy applied when backoff expires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DcbPolicy {
    /// Transmit on the primary channel only.
    OnlyPrimary,
    /// Static bonding: the whole allowed range or nothing.
    Scb,
    /// Static bonding restricted to log2-aligned ranges.
    ScbLog2,
    /// Transmit on every free channel contiguous to the primary.
    AlwaysMax,
    /// Widest free log2-aligned range containing the primary.
    AlwaysMaxLog2,
    /// Widest log2-aligned range weighted by the achievable MCS throughput.
    AlwaysMaxLog2McsOpt,
    /// Uniformly random choice among the free log2-aligned ranges.
    ProbUniformLog2,
}

impl DcbPolicy {
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(DcbPolicy::OnlyPrimary),
            1 => Some(DcbPolicy::Scb),
            2 => Some(DcbPolicy::ScbLog2),
            3 => Some(DcbPolicy::AlwaysMax),
            4 => Some(DcbPolicy::AlwaysMaxLog2),
            5 => Some(DcbPolicy::AlwaysMaxLog2McsOpt),
            6 => Some(DcbPolicy::ProbUniformLog2),
            _ => None,
        }
    }
}

/// Source traffic model.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TrafficModel {
    /// The buffer is always full; a successful delivery refills it.
    FullBuffer,
    /// Poisson arrivals at `load` packets per second.
    Poisson { load: f64 },
    /// Fixed-interval arrivals at `load` packets per second.
    Deterministic { load: f64 },
}

impl TrafficModel {
    pub fn from_code(code: i64, load: f64) -> Option<Self> {
        match code {
            0 | 99 => Some(TrafficModel::FullBuffer),
            1 => Some(TrafficModel::Poisson { load }),
            2 => Some(TrafficModel::Deterministic { load }),
            _ => None,
        }
    }
}

/// Backoff distribution selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PdfKind {
    Deterministic,
    Exponential,
}

impl PdfKind {
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(PdfKind::Deterministic),
            1 => Some(PdfKind::Exponential),
            _ => None,
        }
    }
}

/// Whether backoff timers are aligned to slot boundaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffKind {
    Slotted,
    Continuous,
}

impl BackoffKind {
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(BackoffKind::Slotted),
            1 => Some(BackoffKind::Continuous),
            _ => None,
        }
    }
}

/// Adjacent-channel interference model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdjacentChannelModel {
    None,
    /// Only the two boundary channels of a transmission leak outward.
    Boundary,
    /// Every channel used by a transmission leaks outward.
    Extreme,
}

impl AdjacentChannelModel {
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(AdjacentChannelModel::None),
            1 => Some(AdjacentChannelModel::Boundary),
            2 => Some(AdjacentChannelModel::Extreme),
            _ => None,
        }
    }
}

/// Classification of an incoming frame for the spatial-reuse operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SrFrameClass {
    /// Same BSS color (or SR disabled): legacy sensing applies.
    IntraBss,
    /// Different color, different spatial-reuse group.
    NonSrg,
    /// Different color, same spatial-reuse group.
    Srg,
}

/// Global parameters read from the system input file.
#[derive(Debug, Clone)]
pub struct SystemParams {
    pub num_channels: usize,
    pub basic_channel_bandwidth_mhz: f64,
    pub pdf_backoff: PdfKind,
    /// Parsed for compatibility with the input contract; the 802.11ax
    /// symbol accounting keeps frame durations deterministic.
    pub pdf_tx_time: PdfKind,
    pub backoff_kind: BackoffKind,
    pub noise_level_dbm: f64,
    pub adjacent_model: AdjacentChannelModel,
    pub path_loss_model: crate::simulation::propagation::PathLossModel,
    pub capture_effect_default_db: f64,
    pub constant_per_default: f64,
    pub packet_length_default_bits: u32,
    pub num_packets_agg_default: u32,
    /// Run mode: RTS/CTS handshake before every data exchange.
    pub rts_cts_enabled: bool,
    pub queue_backend: crate::scheduler::QueueBackend,
}

/// One BSS: an AP plus its ordered list of STAs.
#[derive(Debug, Clone)]
pub struct Wlan {
    pub wlan_id: usize,
    pub code: String,
    pub ap_id: NodeId,
    pub sta_ids: Vec<NodeId>,
}

impl Wlan {
    pub fn num_stas(&self) -> usize {
        self.sta_ids.len()
    }
}

/// Per-transmission data broadcast to every node on TX-start and TX-end.
/// For a paired start/end the source, packet id and channel range are
/// identical.
#[derive(Debug, Clone)]
pub struct Notification {
    pub source_id: NodeId,
    pub destination_id: NodeId,
    pub kind: PacketKind,
    /// Leftmost basic channel of the transmission.
    pub left_channel: usize,
    /// Rightmost basic channel of the transmission.
    pub right_channel: usize,
    /// Frame length in bits (whole A-MPDU for data frames).
    pub packet_length: u32,
    /// Number of MPDUs aggregated in a data frame (1 otherwise).
    pub num_aggregated: u32,
    /// On-air duration in seconds.
    pub tx_duration: Time,
    /// Transmission power per 20 MHz channel, in dBm.
    pub tx_power_dbm: f64,
    pub source_position: Position,
    pub packet_id: u64,
    /// Data rate of the payload portion, bits per OFDM symbol.
    pub bits_per_symbol: f64,
    /// MCS usable by the destination per channel width {1, 2, 4, 8}.
    pub mcs_table: [crate::simulation::frames::Modulation; 4],
    /// Remaining NAV duration advertised by this frame.
    pub nav_duration: Time,
    /// Duration of the DATA frame of the announced exchange (lets the
    /// responder derive its own NAV figures).
    pub data_duration: Time,
    /// Duration of the Block-ACK closing the announced exchange.
    pub ack_duration: Time,
    /// BSS color of the transmitter (spatial reuse).
    pub bss_color: i64,
    /// Spatial-reuse group of the transmitter.
    pub srg: i64,
    /// WLAN of the transmitter (per-BSS RSSI bookkeeping).
    pub source_wlan: usize,
}

impl Notification {
    /// Number of basic channels spanned by the transmission.
    pub fn width(&self) -> usize {
        self.right_channel - self.left_channel + 1
    }

    /// Whether the transmission overlaps channel `c`.
    pub fn covers(&self, c: usize) -> bool {
        self.left_channel <= c && c <= self.right_channel
    }
}

/// Non-physical signal telling a sender why its frame was not decoded.
/// Up to two implicated node ids support hidden-node accounting.
#[derive(Debug, Clone)]
pub struct LogicalNack {
    /// Node emitting the NACK.
    pub source_id: NodeId,
    pub packet_id: u64,
    pub kind: PacketKind,
    pub reason: LossReason,
    pub node_id_a: Option<NodeId>,
    pub node_id_b: Option<NodeId>,
}

/// Snapshot of an AP's tunable configuration, read and written by agents.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Configuration {
    pub timestamp: Time,
    pub primary_channel: usize,
    /// Packet-detect threshold in dBm.
    pub pd_dbm: f64,
    /// Transmission power in dBm.
    pub tx_power_dbm: f64,
    /// Maximum transmission width in basic channels.
    pub max_bandwidth: usize,
    pub spatial_reuse_enabled: bool,
    pub bss_color: i64,
    pub srg: i64,
    pub non_srg_obss_pd_dbm: f64,
    pub srg_obss_pd_dbm: f64,
}

/// Performance figures reported by an AP for the last observation window.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Performance {
    /// Bits acknowledged per second of observation.
    pub throughput_bps: f64,
    /// Bits lost per second of observation.
    pub throughput_loss_bps: f64,
    /// Upper bound achievable at the MCS currently selected, bps.
    pub max_bound_throughput_bps: f64,
    pub data_packets_sent: u64,
    pub data_packets_acked: u64,
    pub data_packets_lost: u64,
    pub rts_sent: u64,
    pub rts_lost: u64,
    pub cts_sent: u64,
    pub cts_lost: u64,
    pub packets_generated: u64,
    pub packets_dropped: u64,
    /// Sum of head-of-line delays of acknowledged packets, seconds.
    pub delay_sum: f64,
    pub delay_min: f64,
    pub delay_max: f64,
    pub num_delay_samples: u64,
    /// RSSI observed from each peer BSS, dBm (index = wlan id).
    pub rssi_per_wlan_dbm: Vec<f64>,
    /// Fraction of the window with the primary channel above PD.
    pub channel_occupancy: f64,
    /// Successful airtime per basic channel, seconds.
    pub tx_time_per_channel: Vec<f64>,
    /// Lost airtime per basic channel, seconds.
    pub lost_time_per_channel: Vec<f64>,
    /// Successful airtime per width {1, 2, 4, 8}, seconds.
    pub tx_time_per_width: [f64; 4],
    /// Lost airtime per width {1, 2, 4, 8}, seconds.
    pub lost_time_per_width: [f64; 4],
    /// Throughput per STA of the BSS, bps.
    pub throughput_per_sta_bps: Vec<f64>,
}

impl Performance {
    pub fn average_delay(&self) -> f64 {
        if self.num_delay_samples == 0 {
            0.0
        } else {
            self.delay_sum / self.num_delay_samples as f64
        }
    }
}
