//! System input file: one data row of global simulation parameters.

use anyhow::{Context, bail};
use std::path::Path;

use crate::scheduler::QueueBackend;
use crate::simulation::frames::SIFS;
use crate::simulation::propagation::PathLossModel;
use crate::simulation::types::{AdjacentChannelModel, BackoffKind, PdfKind, SystemParams};

use super::{data_rows, fields, parse_field};

/// Column order of the system CSV (after the header row):
/// num_channels, basic_channel_bandwidth [MHz], pdf_backoff, pdf_tx_time,
/// backoff_type, packet_length [bits], num_packets_aggregated,
/// adjacent_channel_model, capture_effect [dB], noise_level [dBm],
/// sifs [s], path_loss_model, rts_cts_enabled, queue_backend.
pub fn load(path: &Path) -> anyhow::Result<SystemParams> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read system file {}", path.display()))?;
    parse(&content).with_context(|| format!("invalid system file {}", path.display()))
}

pub fn parse(content: &str) -> anyhow::Result<SystemParams> {
    let rows = data_rows(content);
    let row = match rows.as_slice() {
        [row] => fields(row),
        [] => bail!("system file has no data row"),
        _ => bail!("system file must have exactly one data row"),
    };
    let num_channels: usize = parse_field(&row, 0, "num_channels")?;
    let basic_channel_bandwidth_mhz: f64 = parse_field(&row, 1, "basic_channel_bandwidth")?;
    let pdf_backoff_code: i64 = parse_field(&row, 2, "pdf_backoff")?;
    let pdf_tx_code: i64 = parse_field(&row, 3, "pdf_tx_time")?;
    let backoff_type_code: i64 = parse_field(&row, 4, "backoff_type")?;
    let packet_length_default_bits: u32 = parse_field(&row, 5, "packet_length")?;
    let num_packets_agg_default: u32 = parse_field(&row, 6, "num_packets_aggregated")?;
    let adjacent_code: i64 = parse_field(&row, 7, "adjacent_channel_model")?;
    let capture_effect_default_db: f64 = parse_field(&row, 8, "capture_effect")?;
    let noise_level_dbm: f64 = parse_field(&row, 9, "noise_level")?;
    let sifs_s: f64 = parse_field(&row, 10, "sifs")?;
    let path_loss_code: i64 = parse_field(&row, 11, "path_loss_model")?;
    let rts_cts_flag: i64 = parse_field(&row, 12, "rts_cts_enabled")?;
    let backend_code: i64 = parse_field(&row, 13, "queue_backend")?;

    if num_channels == 0 || num_channels > 64 {
        bail!("num_channels {num_channels} out of range [1, 64]");
    }
    if basic_channel_bandwidth_mhz <= 0.0 {
        bail!("basic channel bandwidth must be positive");
    }
    // Declared MAC constants are authoritative; a deviating SIFS in the
    // input is a configuration error, not a knob.
    if (sifs_s - SIFS).abs() > 1e-9 {
        bail!("sifs {sifs_s} deviates from the 802.11ax value {SIFS}");
    }
    let pdf_backoff = PdfKind::from_code(pdf_backoff_code)
        .ok_or_else(|| anyhow::anyhow!("unknown pdf_backoff code {pdf_backoff_code}"))?;
    let pdf_tx_time = PdfKind::from_code(pdf_tx_code)
        .ok_or_else(|| anyhow::anyhow!("unknown pdf_tx_time code {pdf_tx_code}"))?;
    let backoff_kind = BackoffKind::from_code(backoff_type_code)
        .ok_or_else(|| anyhow::anyhow!("unknown backoff_type code {backoff_type_code}"))?;
    let adjacent_model = AdjacentChannelModel::from_code(adjacent_code)
        .ok_or_else(|| anyhow::anyhow!("unknown adjacent_channel_model code {adjacent_code}"))?;
    let path_loss_model = PathLossModel::from_code(path_loss_code)
        .ok_or_else(|| anyhow::anyhow!("unknown path_loss_model code {path_loss_code}"))?;
    let queue_backend = match backend_code {
        0 => QueueBackend::Calendar,
        1 => QueueBackend::BinaryHeap,
        other => bail!("unknown queue_backend code {other}"),
    };
    Ok(SystemParams {
        num_channels,
        basic_channel_bandwidth_mhz,
        pdf_backoff,
        pdf_tx_time,
        backoff_kind,
        noise_level_dbm,
        adjacent_model,
        path_loss_model,
        capture_effect_default_db,
        constant_per_default: 0.0,
        packet_length_default_bits,
        num_packets_agg_default,
        rts_cts_enabled: rts_cts_flag != 0,
        queue_backend,
    })
}
