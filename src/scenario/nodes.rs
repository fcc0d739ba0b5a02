//! Nodes input file: one row per AP/STA, grouped into WLANs by wlan code.

use anyhow::{Context, anyhow, bail};
use std::collections::{HashMap, HashSet};
use std::path::Path;

use crate::simulation::node::NodeParams;
use crate::simulation::types::{
    DcbPolicy, NodeKind, Position, SystemParams, TrafficModel, Wlan,
};

use super::{data_rows, fields, parse_field};

/// Capability bounds of 802.11ax nodes [dBm].
const TX_POWER_MIN_DBM: f64 = 1.0;
const TX_POWER_MAX_DBM: f64 = 20.0;
const SENSITIVITY_MIN_DBM: f64 = -82.0;
const SENSITIVITY_MAX_DBM: f64 = -62.0;

/// Column order of the nodes CSV (after the header row):
/// node_code, node_type, wlan_code, x, y, z, central_freq [GHz],
/// channel_bonding_model, primary_channel, min_channel_allowed,
/// max_channel_allowed, tx_power_default [dBm], pd_default [dBm],
/// traffic_model, traffic_load [pkt/s], packet_length [bits],
/// num_packets_aggregated, capture_effect_model, capture_effect_thr [dB],
/// constant_per, pifs_activated, cw_adaptation, cw_min, cw_stage_max,
/// bss_color, srg, non_srg_obss_pd [dBm], srg_obss_pd [dBm].
pub fn load(path: &Path, system: &SystemParams) -> anyhow::Result<(Vec<NodeParams>, Vec<Wlan>)> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read nodes file {}", path.display()))?;
    parse(&content, system).with_context(|| format!("invalid nodes file {}", path.display()))
}

pub fn parse(content: &str, system: &SystemParams) -> anyhow::Result<(Vec<NodeParams>, Vec<Wlan>)> {
    let rows = data_rows(content);
    if rows.is_empty() {
        bail!("nodes file has no data rows");
    }
    let mut params = Vec::with_capacity(rows.len());
    let mut wlan_codes = Vec::new();
    for (id, line) in rows.iter().enumerate() {
        let row = fields(line);
        let code: String = parse_field(&row, 0, "node_code")?;
        let kind = NodeKind::from_code(parse_field(&row, 1, "node_type")?)
            .ok_or_else(|| anyhow!("node {code}: unknown node_type"))?;
        let wlan_code: String = parse_field(&row, 2, "wlan_code")?;
        let position = Position {
            x: parse_field(&row, 3, "x")?,
            y: parse_field(&row, 4, "y")?,
            z: parse_field(&row, 5, "z")?,
        };
        let central_freq_ghz: f64 = parse_field(&row, 6, "central_freq")?;
        let dcb_policy = DcbPolicy::from_code(parse_field(&row, 7, "channel_bonding_model")?)
            .ok_or_else(|| anyhow!("node {code}: unknown channel_bonding_model"))?;
        let primary: usize = parse_field(&row, 8, "primary_channel")?;
        let min_ch: usize = parse_field(&row, 9, "min_channel_allowed")?;
        let max_ch: usize = parse_field(&row, 10, "max_channel_allowed")?;
        let tx_power_dbm: f64 = parse_field(&row, 11, "tx_power_default")?;
        let pd_dbm: f64 = parse_field(&row, 12, "pd_default")?;
        let traffic_code: i64 = parse_field(&row, 13, "traffic_model")?;
        let traffic_load: f64 = parse_field(&row, 14, "traffic_load")?;
        let packet_length_bits: u32 = parse_field(&row, 15, "packet_length")?;
        let max_ampdu: u32 = parse_field(&row, 16, "num_packets_aggregated")?;
        let _capture_effect_model: i64 = parse_field(&row, 17, "capture_effect_model")?;
        let capture_effect_db: f64 = parse_field(&row, 18, "capture_effect_thr")?;
        let constant_per: f64 = parse_field(&row, 19, "constant_per")?;
        let pifs_flag: i64 = parse_field(&row, 20, "pifs_activated")?;
        let cw_adaptation_flag: i64 = parse_field(&row, 21, "cw_adaptation")?;
        let cw_min: u32 = parse_field(&row, 22, "cw_min")?;
        let cw_stage_max: u32 = parse_field(&row, 23, "cw_stage_max")?;
        let bss_color: i64 = parse_field(&row, 24, "bss_color")?;
        let srg: i64 = parse_field(&row, 25, "srg")?;
        let non_srg_obss_pd_dbm: f64 = parse_field(&row, 26, "non_srg_obss_pd")?;
        let srg_obss_pd_dbm: f64 = parse_field(&row, 27, "srg_obss_pd")?;

        let traffic_model = TrafficModel::from_code(traffic_code, traffic_load)
            .ok_or_else(|| anyhow!("node {code}: unknown traffic_model"))?;

        if max_ch >= system.num_channels {
            bail!("node {code}: max channel {max_ch} outside the {} system channels", system.num_channels);
        }
        if min_ch > max_ch || primary < min_ch || primary > max_ch {
            bail!("node {code}: primary {primary} not inside [{min_ch}..{max_ch}]");
        }
        if pd_dbm < SENSITIVITY_MIN_DBM || pd_dbm > SENSITIVITY_MAX_DBM {
            bail!(
                "node {code}: PD {pd_dbm} dBm outside [{SENSITIVITY_MIN_DBM}, {SENSITIVITY_MAX_DBM}]"
            );
        }
        if tx_power_dbm < TX_POWER_MIN_DBM || tx_power_dbm > TX_POWER_MAX_DBM {
            bail!(
                "node {code}: TX power {tx_power_dbm} dBm outside [{TX_POWER_MIN_DBM}, {TX_POWER_MAX_DBM}]"
            );
        }
        if !(0.0..=1.0).contains(&constant_per) && constant_per >= 0.0 {
            bail!("node {code}: constant PER {constant_per} outside [0, 1]");
        }

        params.push(NodeParams {
            id,
            code,
            kind,
            wlan_id: usize::MAX, // resolved below
            position,
            central_freq_hz: central_freq_ghz * 1e9,
            primary,
            min_ch,
            max_ch,
            tx_power_dbm,
            tx_power_min_dbm: TX_POWER_MIN_DBM,
            tx_power_max_dbm: TX_POWER_MAX_DBM,
            pd_dbm,
            pd_min_dbm: SENSITIVITY_MIN_DBM,
            pd_max_dbm: SENSITIVITY_MAX_DBM,
            tx_gain_db: 0.0,
            rx_gain_db: 0.0,
            dcb_policy,
            traffic_model,
            packet_length_bits: if packet_length_bits == 0 {
                system.packet_length_default_bits
            } else {
                packet_length_bits
            },
            max_ampdu: if max_ampdu == 0 {
                system.num_packets_agg_default
            } else {
                max_ampdu
            },
            capture_effect_db,
            constant_per,
            pifs_enabled: pifs_flag != 0,
            cw_adaptation: cw_adaptation_flag != 0,
            cw_min,
            cw_stage_max,
            bss_color,
            srg,
            non_srg_obss_pd_dbm,
            srg_obss_pd_dbm,
        });
        wlan_codes.push(wlan_code);
    }

    validate(&params, &wlan_codes)?;

    // Group into WLANs: the AP defines the BSS, STAs join by wlan code.
    let mut wlans: Vec<Wlan> = Vec::new();
    let mut by_code: HashMap<String, usize> = HashMap::new();
    for (i, p) in params.iter().enumerate() {
        if p.kind == NodeKind::Ap {
            if by_code.contains_key(&wlan_codes[i]) {
                bail!("wlan {}: more than one AP", wlan_codes[i]);
            }
            by_code.insert(wlan_codes[i].clone(), wlans.len());
            wlans.push(Wlan {
                wlan_id: wlans.len(),
                code: wlan_codes[i].clone(),
                ap_id: p.id,
                sta_ids: Vec::new(),
            });
        }
    }
    for (i, p) in params.iter_mut().enumerate() {
        let wlan_id = *by_code
            .get(&wlan_codes[i])
            .ok_or_else(|| anyhow!("node {}: wlan {} has no AP", p.code, wlan_codes[i]))?;
        p.wlan_id = wlan_id;
        if p.kind == NodeKind::Sta {
            wlans[wlan_id].sta_ids.push(p.id);
        }
    }
    Ok((params, wlans))
}

fn validate(params: &[NodeParams], _wlan_codes: &[String]) -> anyhow::Result<()> {
    let mut codes = HashSet::new();
    for p in params {
        if !codes.insert(p.code.as_str()) {
            bail!("duplicate node code {}", p.code);
        }
    }
    for (i, a) in params.iter().enumerate() {
        for b in &params[i + 1..] {
            if a.position.distance(&b.position) == 0.0 {
                bail!("nodes {} and {} are co-located at the same position", a.code, b.code);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scenario::system;

    fn test_system() -> SystemParams {
        let header = "num_channels,basic_channel_bandwidth,pdf_backoff,pdf_tx_time,backoff_type,packet_length,num_packets_aggregated,adjacent_channel_model,capture_effect,noise_level,sifs,path_loss_model,rts_cts_enabled,queue_backend";
        system::parse(&format!("{header}\n8,20,0,0,0,12000,64,0,10,-95,0.000016,0,1,0\n")).unwrap()
    }

    const HEADER: &str = "node_code,node_type,wlan_code,x,y,z,central_freq,channel_bonding_model,primary_channel,min_channel_allowed,max_channel_allowed,tx_power_default,pd_default,traffic_model,traffic_load,packet_length,num_packets_aggregated,capture_effect_model,capture_effect_thr,constant_per,pifs_activated,cw_adaptation,cw_min,cw_stage_max,bss_color,srg,non_srg_obss_pd,srg_obss_pd";

    fn row(code: &str, kind: u8, wlan: &str, x: f64, primary: usize) -> String {
        format!(
            "{code},{kind},{wlan},{x},0,0,5,0,{primary},0,7,20,-82,0,0,12000,4,0,10,0,0,1,16,5,-1,-1,-82,-82"
        )
    }

    #[test]
    fn parses_two_bss_scenario() {
        let content = format!(
            "{HEADER}\n{}\n{}\n{}\n{}\n",
            row("AP_A", 0, "A", 0.0, 0),
            row("STA_A1", 1, "A", 2.0, 0),
            row("AP_B", 0, "B", 20.0, 2),
            row("STA_B1", 1, "B", 22.0, 2),
        );
        let (params, wlans) = parse(&content, &test_system()).unwrap();
        assert_eq!(params.len(), 4);
        assert_eq!(wlans.len(), 2);
        assert_eq!(wlans[0].ap_id, 0);
        assert_eq!(wlans[0].sta_ids, vec![1]);
        assert_eq!(wlans[1].code, "B");
        assert_eq!(params[3].wlan_id, 1);
        assert_eq!(params[0].central_freq_hz, 5e9);
        assert_eq!(params[0].traffic_model, TrafficModel::FullBuffer);
    }

    #[test]
    fn rejects_duplicate_codes() {
        let content = format!(
            "{HEADER}\n{}\n{}\n",
            row("AP_A", 0, "A", 0.0, 0),
            row("AP_A", 0, "B", 5.0, 0),
        );
        let err = parse(&content, &test_system()).unwrap_err().to_string();
        assert!(err.contains("duplicate node code"));
    }

    #[test]
    fn rejects_co_located_nodes() {
        let content = format!(
            "{HEADER}\n{}\n{}\n",
            row("AP_A", 0, "A", 1.0, 0),
            row("STA_A1", 1, "A", 1.0, 0),
        );
        let err = parse(&content, &test_system()).unwrap_err().to_string();
        assert!(err.contains("co-located"));
    }

    #[test]
    fn rejects_sta_without_ap() {
        let content = format!("{HEADER}\n{}\n", row("STA_A1", 1, "A", 1.0, 0));
        let err = parse(&content, &test_system()).unwrap_err().to_string();
        assert!(err.contains("has no AP"));
    }

    #[test]
    fn rejects_two_aps_in_one_wlan() {
        let content = format!(
            "{HEADER}\n{}\n{}\n",
            row("AP_A", 0, "A", 0.0, 0),
            row("AP_A2", 0, "A", 5.0, 0),
        );
        let err = parse(&content, &test_system()).unwrap_err().to_string();
        assert!(err.contains("more than one AP"));
    }

    #[test]
    fn rejects_out_of_range_channels_and_thresholds() {
        // Primary outside [min..max].
        let bad = format!(
            "AP_A,0,A,0,0,0,5,0,9,0,7,20,-82,0,0,12000,4,0,10,0,0,1,16,5,-1,-1,-82,-82"
        );
        let content = format!("{HEADER}\n{bad}\n");
        assert!(parse(&content, &test_system()).is_err());
        // PD beyond the sensitivity caps.
        let bad = format!(
            "AP_A,0,A,0,0,0,5,0,0,0,7,20,-90,0,0,12000,4,0,10,0,0,1,16,5,-1,-1,-82,-82"
        );
        let content = format!("{HEADER}\n{bad}\n");
        let err = parse(&content, &test_system()).unwrap_err().to_string();
        assert!(err.contains("PD"));
    }
}
