//! IEEE 802.11ax frame timing and modulation/coding schemes.
//!
//! Every duration follows the HE single-user symbol accounting: a frame is
//! a 20 µs legacy preamble plus `ceil(bits / bits-per-symbol)` OFDM symbols,
//! with data frames additionally carrying the HE SU preamble and using the
//! 3.2 µs guard-interval symbol. Control frames ride the legacy 4 µs symbol
//! at 24 bits per symbol.

use crate::scheduler::Time;

/// Slot time [s].
pub const SLOT_TIME: Time = 9e-6;
/// Short inter-frame space [s].
pub const SIFS: Time = 16e-6;
/// DCF inter-frame space [s].
pub const DIFS: Time = SIFS + 2.0 * SLOT_TIME;
/// PCF inter-frame space [s].
pub const PIFS: Time = SIFS + SLOT_TIME;

/// Legacy OFDM symbol duration [s].
pub const OFDM_SYMBOL_LEGACY: Time = 4e-6;
/// HE OFDM symbol duration with 3.2 µs guard interval [s].
pub const OFDM_SYMBOL_GI32: Time = 16e-6;
/// Legacy PHY preamble duration [s].
pub const PHY_LEGACY_DURATION: Time = 20e-6;
/// HE single-user preamble duration [s].
pub const PHY_HE_SU_DURATION: Time = 100e-6;
/// Maximum PPDU duration, limiting the A-MPDU operation [s].
pub const MAX_PPDU_DURATION: Time = 5484e-6;

/// Service field length [bits].
pub const SERVICE_FIELD_BITS: u32 = 16;
/// Tail length [bits].
pub const TAIL_BITS: u32 = 18;
/// MPDU delimiter length [bits].
pub const MPDU_DELIMITER_BITS: u32 = 32;
/// MAC header length including FCS [bits].
pub const MAC_HEADER_BITS: u32 = 320;
/// RTS frame length [bits].
pub const RTS_BITS: u32 = 160;
/// CTS frame length [bits].
pub const CTS_BITS: u32 = 112;
/// Block-ACK frame length [bits].
pub const BLOCK_ACK_BITS: u32 = 432;
/// Legacy OFDM bits per symbol (6 Mbps base rate).
pub const LEGACY_BITS_PER_SYMBOL: f64 = 24.0;

/// Modulation and coding schemes of 802.11ax single-user operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Modulation {
    /// The link cannot sustain any MCS at this width.
    Forbidden,
    BpskHalf,
    QpskHalf,
    QpskThreeQuarters,
    Qam16Half,
    Qam16ThreeQuarters,
    Qam64TwoThirds,
    Qam64ThreeQuarters,
    Qam64FiveSixths,
    Qam256ThreeQuarters,
    Qam256FiveSixths,
    Qam1024ThreeQuarters,
    Qam1024FiveSixths,
}

impl Modulation {
    /// Bits carried per modulation symbol (the modulation order).
    pub fn bits_per_subcarrier(&self) -> u32 {
        match self {
            Modulation::Forbidden => 0,
            Modulation::BpskHalf => 1,
            Modulation::QpskHalf | Modulation::QpskThreeQuarters => 2,
            Modulation::Qam16Half | Modulation::Qam16ThreeQuarters => 4,
            Modulation::Qam64TwoThirds
            | Modulation::Qam64ThreeQuarters
            | Modulation::Qam64FiveSixths => 6,
            Modulation::Qam256ThreeQuarters | Modulation::Qam256FiveSixths => 8,
            Modulation::Qam1024ThreeQuarters | Modulation::Qam1024FiveSixths => 10,
        }
    }

    pub fn coding_rate(&self) -> f64 {
        match self {
            Modulation::Forbidden => 0.0,
            Modulation::BpskHalf | Modulation::QpskHalf | Modulation::Qam16Half => 0.5,
            Modulation::QpskThreeQuarters
            | Modulation::Qam16ThreeQuarters
            | Modulation::Qam64ThreeQuarters
            | Modulation::Qam256ThreeQuarters
            | Modulation::Qam1024ThreeQuarters => 0.75,
            Modulation::Qam64TwoThirds => 2.0 / 3.0,
            Modulation::Qam64FiveSixths
            | Modulation::Qam256FiveSixths
            | Modulation::Qam1024FiveSixths => 5.0 / 6.0,
        }
    }

    /// Constellation size M (for the Eb/N0-based error model).
    pub fn constellation_size(&self) -> u32 {
        1 << self.bits_per_subcarrier()
    }
}

/// Number of data subcarriers of a HE PPDU spanning `width` basic channels.
pub fn data_subcarriers(width: usize) -> u32 {
    match width {
        1 => 234,
        2 => 468,
        4 => 980,
        8 => 1960,
        _ => panic!("unsupported channel width: {width}"),
    }
}

/// Bits per HE OFDM symbol at the given modulation and width (one spatial
/// stream).
pub fn bits_per_symbol(modulation: Modulation, width: usize) -> f64 {
    data_subcarriers(width) as f64 * modulation.bits_per_subcarrier() as f64
        * modulation.coding_rate()
}

/// Payload data rate in bits per second at the given modulation and width.
pub fn data_rate_bps(modulation: Modulation, width: usize) -> f64 {
    bits_per_symbol(modulation, width) / OFDM_SYMBOL_GI32
}

/// Duration of a legacy-rate control frame of `frame_bits` bits.
fn control_frame_duration(frame_bits: u32) -> Time {
    PHY_LEGACY_DURATION
        + ((SERVICE_FIELD_BITS + frame_bits + TAIL_BITS) as f64 / LEGACY_BITS_PER_SYMBOL).ceil()
            * OFDM_SYMBOL_LEGACY
}

pub fn rts_duration() -> Time {
    control_frame_duration(RTS_BITS)
}

pub fn cts_duration() -> Time {
    control_frame_duration(CTS_BITS)
}

pub fn block_ack_duration() -> Time {
    control_frame_duration(BLOCK_ACK_BITS)
}

/// Duration of an A-MPDU of `num_aggregated` MPDUs of `frame_bits` payload
/// bits each, at `bits_per_sym` bits per HE symbol.
pub fn data_duration(num_aggregated: u32, frame_bits: u32, bits_per_sym: f64) -> Time {
    let payload = SERVICE_FIELD_BITS
        + num_aggregated * (MPDU_DELIMITER_BITS + MAC_HEADER_BITS + frame_bits)
        + TAIL_BITS;
    PHY_LEGACY_DURATION
        + PHY_HE_SU_DURATION
        + (payload as f64 / bits_per_sym).ceil() * OFDM_SYMBOL_GI32
}

/// Largest A-MPDU size not exceeding the PPDU duration cap, at most
/// `max_aggregated`.
pub fn clamp_aggregation(max_aggregated: u32, frame_bits: u32, bits_per_sym: f64) -> u32 {
    let mut n = max_aggregated.max(1);
    while n > 1 && data_duration(n, frame_bits, bits_per_sym) > MAX_PPDU_DURATION {
        n -= 1;
    }
    n
}

/// NAV advertised by an RTS: the remainder of the whole handshake.
pub fn nav_from_rts(data_duration: Time, ack_duration: Time) -> Time {
    3.0 * SIFS + rts_duration() + cts_duration() + data_duration + ack_duration
}

/// NAV advertised by a CTS.
pub fn nav_from_cts(data_duration: Time, ack_duration: Time) -> Time {
    2.0 * SIFS + cts_duration() + data_duration + ack_duration
}

/// RSSI step between consecutive MCS admission thresholds [dB].
const MCS_STEP_DB: f64 = 3.0;

/// Sensitivity thresholds (dBm, at 20 MHz) admitting each MCS from BPSK 1/2
/// upward. Doubling the width shifts every threshold up by 3 dB.
const MCS_THRESHOLDS_DBM: [f64; 12] = [
    -82.0, -79.0, -77.0, -74.0, -70.0, -66.0, -65.0, -64.0, -59.0, -57.0, -54.0, -52.0,
];

const MCS_LADDER: [Modulation; 12] = [
    Modulation::BpskHalf,
    Modulation::QpskHalf,
    Modulation::QpskThreeQuarters,
    Modulation::Qam16Half,
    Modulation::Qam16ThreeQuarters,
    Modulation::Qam64TwoThirds,
    Modulation::Qam64ThreeQuarters,
    Modulation::Qam64FiveSixths,
    Modulation::Qam256ThreeQuarters,
    Modulation::Qam256FiveSixths,
    Modulation::Qam1024ThreeQuarters,
    Modulation::Qam1024FiveSixths,
];

/// Best sustainable MCS per channel width {1, 2, 4, 8} given the power
/// received from the requesting transmitter.
pub fn select_mcs_per_width(power_rx_dbm: f64) -> [Modulation; 4] {
    let mut response = [Modulation::Forbidden; 4];
    for (ix, slot) in response.iter_mut().enumerate() {
        let offset = ix as f64 * MCS_STEP_DB;
        for (level, threshold) in MCS_THRESHOLDS_DBM.iter().enumerate() {
            if power_rx_dbm >= threshold + offset {
                *slot = MCS_LADDER[level];
            }
        }
    }
    response
}

/// Complementary error function (Abramowitz & Stegun 7.1.26, |ε| < 1.5e-7).
fn erfc(x: f64) -> f64 {
    let sign = if x < 0.0 { -1.0 } else { 1.0 };
    let x = x.abs();
    let t = 1.0 / (1.0 + 0.3275911 * x);
    let poly = t
        * (0.254829592
            + t * (-0.284496736 + t * (1.421413741 + t * (-1.453152027 + t * 1.061405429))));
    let erf = 1.0 - poly * (-x * x).exp();
    if sign < 0.0 { 1.0 + erf } else { 1.0 - erf }
}

/// Packet error probability of an MPDU of `frame_bits` bits decoded at the
/// given linear SINR, from the Eb/N0 bit-error model of the modulation.
pub fn per_from_sinr(
    sinr_linear: f64,
    modulation: Modulation,
    width: usize,
    basic_channel_bandwidth_hz: f64,
    frame_bits: u32,
) -> f64 {
    if modulation == Modulation::Forbidden {
        return 1.0;
    }
    let m = modulation.constellation_size() as f64;
    let bit_rate = data_rate_bps(modulation, width);
    let bandwidth = width as f64 * basic_channel_bandwidth_hz;
    let es_n0 = sinr_linear * (bit_rate / bandwidth);
    let eb_n0 = es_n0 * m.log2();
    let ber = match modulation {
        Modulation::BpskHalf | Modulation::QpskHalf | Modulation::QpskThreeQuarters => {
            erfc((2.0 * eb_n0).sqrt())
        }
        _ => 4.0 / m.log2() * erfc((3.0 * eb_n0 * m.log2() / (m - 1.0)).sqrt()),
    };
    let ber = ber.clamp(0.0, 1.0);
    1.0 - (1.0 - ber).powi(frame_bits as i32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interframe_spaces() {
        assert!((DIFS - 34e-6).abs() < 1e-12);
        assert!((PIFS - 25e-6).abs() < 1e-12);
    }

    #[test]
    fn control_frame_durations() {
        // RTS: 20 µs + ceil(194/24) = 9 symbols · 4 µs = 56 µs.
        assert!((rts_duration() - 56e-6).abs() < 1e-12);
        // CTS: 20 µs + ceil(146/24) = 7 symbols · 4 µs = 48 µs.
        assert!((cts_duration() - 48e-6).abs() < 1e-12);
        // BACK: 20 µs + ceil(466/24) = 20 symbols · 4 µs = 100 µs.
        assert!((block_ack_duration() - 100e-6).abs() < 1e-12);
    }

    #[test]
    fn data_duration_includes_he_preamble() {
        let bps = bits_per_symbol(Modulation::BpskHalf, 1); // 117 bits/symbol
        let d = data_duration(1, 12000, bps);
        // 20 + 100 µs preambles + ceil(12386/117) = 106 symbols · 16 µs.
        assert!((d - (120e-6 + 106.0 * 16e-6)).abs() < 1e-12, "d = {d}");
    }

    #[test]
    fn aggregation_respects_ppdu_cap() {
        let bps = bits_per_symbol(Modulation::BpskHalf, 1);
        let n = clamp_aggregation(64, 12000, bps);
        assert!(n >= 1);
        assert!(data_duration(n, 12000, bps) <= MAX_PPDU_DURATION);
        if n < 64 {
            assert!(data_duration(n + 1, 12000, bps) > MAX_PPDU_DURATION);
        }
        // High MCS fits far more aggregation.
        let fast = bits_per_symbol(Modulation::Qam1024FiveSixths, 8);
        assert_eq!(clamp_aggregation(64, 12000, fast), 64);
    }

    #[test]
    fn mcs_selection_follows_3db_ladder() {
        // Below every threshold: forbidden at any width.
        assert_eq!(select_mcs_per_width(-83.0), [Modulation::Forbidden; 4]);
        // Just above the 20 MHz floor: BPSK 1/2 only at width 1.
        let at_floor = select_mcs_per_width(-81.5);
        assert_eq!(at_floor[0], Modulation::BpskHalf);
        assert_eq!(at_floor[1], Modulation::Forbidden);
        // Strong signal saturates all widths.
        assert_eq!(select_mcs_per_width(-20.0), [Modulation::Qam1024FiveSixths; 4]);
        // 3 dB step: -79 dBm gives QPSK 1/2 at width 1 and BPSK 1/2 at width 2.
        let stepped = select_mcs_per_width(-79.0);
        assert_eq!(stepped[0], Modulation::QpskHalf);
        assert_eq!(stepped[1], Modulation::BpskHalf);
        assert_eq!(stepped[2], Modulation::Forbidden);
    }

    #[test]
    fn per_model_tracks_sinr() {
        // Strong SINR: essentially error free even for a long MPDU.
        let strong = per_from_sinr(1e4, Modulation::BpskHalf, 1, 20e6, 12000);
        assert!(strong < 1e-6, "strong = {strong}");
        // Weak SINR: the MPDU is essentially always lost.
        let weak = per_from_sinr(0.1, Modulation::Qam256FiveSixths, 1, 20e6, 12000);
        assert!(weak > 0.999, "weak = {weak}");
        // A forbidden MCS never decodes.
        assert_eq!(per_from_sinr(1e6, Modulation::Forbidden, 1, 20e6, 100), 1.0);
        // Monotone in SINR for a fixed working point.
        let lo = per_from_sinr(2.0, Modulation::Qam16Half, 1, 20e6, 1200);
        let hi = per_from_sinr(20.0, Modulation::Qam16Half, 1, 20e6, 1200);
        assert!(hi <= lo);
    }

    #[test]
    fn data_rates_scale_with_width_and_mcs() {
        let narrow = data_rate_bps(Modulation::BpskHalf, 1);
        assert!((narrow - 234.0 * 0.5 / 16e-6).abs() < 1e-6);
        assert!(data_rate_bps(Modulation::BpskHalf, 8) > 8.0 * narrow * 0.9);
        assert!(data_rate_bps(Modulation::Qam1024FiveSixths, 1) > narrow * 15.0);
    }
}
