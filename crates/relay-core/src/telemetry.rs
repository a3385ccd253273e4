//! Telemetry decoder — turns raw device readings into display-ready status
//! fields.
//!
//! Pure functions over [`RawStatus`] and the current calibration constants;
//! the reconciliation engine gathers the raw values, this module never does
//! I/O. A snapshot is produced whole on every fetch — there is no partial
//! update path.

use serde::Serialize;

use crate::calibration::CalibrationConstants;

/// Gain margin subtracted from the reported figure while the power
/// accumulator flags oscillation — the device clamps by this much.
pub const OSC_CLAMP_DB: f64 = 12.0;

/// Bias applied to the isolation cross terms to normalize them to a common
/// reference level.
const ISOLATION_BIAS_DB: f64 = 10.0;

// ── Raw inputs ──────────────────────────────────────────────────────

/// Raw remote-call results for one configuration/telemetry snapshot.
#[derive(Debug, Clone)]
pub struct RawStatus {
    /// Current digital gain register (dB).
    pub gain: f64,
    /// Power accumulator oscillation flag.
    pub oscillating: bool,
    /// ADC/DAC power meter readings, fixed 24-slot layout:
    /// DAC inst 0–3, ADC inst 4–7, DAC max 12–15, ADC max 16–19,
    /// with the tx/rx/echo channel pairs overlaid on 12–23.
    pub powers: [f64; 24],
    /// Full-channel powers, 4 channel-pair combinations.
    pub fullchan_pwrs: [f64; 4],
    /// Delta-channel (post-cancellation) powers, same combinations.
    pub delchan_pwrs: [f64; 4],
    /// Center frequency in MHz.
    pub center_freq: f64,
    /// Device TDD register pair (forced, direction).
    pub tdd_flags: (i64, i64),
    pub lowgain_on: bool,
    pub canx_on: bool,
    pub agc_on: bool,
    /// Either power amplifier enabled.
    pub pa_enabled: bool,
    /// Device uptime in seconds (from the last liveness check).
    pub uptime_secs: f64,
}

// ── Decoded snapshot ────────────────────────────────────────────────

/// Display-ready configuration/telemetry view. All fields formatted strings.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RepeaterStatus {
    pub gain: String,
    pub center_freq: String,
    pub tdd_mode: String,
    pub lowgain_mode: String,
    pub agc_on: String,
    pub canx_on: String,
    pub dltxpwr: String,
    pub dlrxpwr: String,
    pub dlechopwr: String,
    pub ultxpwr: String,
    pub ulrxpwr: String,
    pub ulechopwr: String,
    pub preisol: String,
    pub postisol: String,
    pub dacpwr: String,
    pub dacpwr_max: String,
    pub adcpwr: String,
    pub adcpwr_max: String,
    pub uptime: String,
}

/// Human-readable labels for [`RepeaterStatus`] fields, in display order.
pub const STATUS_LABELS: &[(&str, &str)] = &[
    ("gain", "Gain (dB)"),
    ("center_freq", "Center Frequency (MHz)"),
    ("tdd_mode", "TDD Mode"),
    ("lowgain_mode", "LowGain Mode"),
    ("agc_on", "Gain Control Mode"),
    ("canx_on", "Canx Mode"),
    ("dltxpwr", "DL Tx Power (dBm)"),
    ("dlrxpwr", "DL Rx Power (dBm)"),
    ("dlechopwr", "DL Echo Power (dBm)"),
    ("ultxpwr", "UL Tx Power (dBm)"),
    ("ulrxpwr", "UL Rx Power (dBm)"),
    ("ulechopwr", "UL Echo Power (dBm)"),
    ("preisol", "Est. Pre-Canx Isolation (dB)"),
    ("postisol", "Est. Post-Canx Isolation (dB)"),
    ("dacpwr", "DAC Inst Power (dBFS)"),
    ("dacpwr_max", "DAC Max Power (dBFS)"),
    ("adcpwr", "ADC Inst Power (dBFS)"),
    ("adcpwr_max", "ADC Max Power (dBFS)"),
    ("uptime", "Up Time"),
];

/// Display-ready sync-module view.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncStatus {
    pub status: String,
    pub arfcn: String,
    pub cellid: String,
    pub lindex: String,
    pub scs: String,
    pub ssrssi: String,
    pub lastdetected: String,
}

/// Human-readable labels for [`SyncStatus`] fields.
pub const SYNC_LABELS: &[(&str, &str)] = &[
    ("status", "TDD Sync"),
    ("cellid", "Donor Cell ID"),
    ("lindex", "L-index"),
    ("scs", "SCS (kHz)"),
    ("arfcn", "ARFCN"),
    ("ssrssi", "SS-RSSI   (dBm)"),
    ("lastdetected", "Last Seen (ms)"),
];

// ── Decoding ────────────────────────────────────────────────────────

/// Decode one configuration/telemetry snapshot.
pub fn decode_status(raw: &RawStatus, cal: &CalibrationConstants) -> RepeaterStatus {
    let donor_rx = cal.donor_rx_dbm_to_dbfs;
    let donor_tx = cal.donor_tx_dbfs_to_dbm;
    let server_rx = cal.server_rx_dbm_to_dbfs;
    let server_tx = cal.server_tx_dbfs_to_dbm;
    let p = &raw.powers;

    let gain = if !raw.pa_enabled {
        "OFF".to_string()
    } else if raw.oscillating {
        format!("{:.1} OSC!", cal.analog_gain + raw.gain - OSC_CLAMP_DB)
    } else {
        format!("{:.1}", cal.analog_gain + raw.gain)
    };

    let tdd_mode = if raw.tdd_flags.0 == 0 {
        "Auto"
    } else if raw.tdd_flags.1 == 0 {
        "DL Only"
    } else {
        "UL Only"
    };

    let dl_tx = [p[12] + server_tx[0], p[13] + server_tx[1]];
    let ul_tx = [p[14] + donor_tx[0], p[15] + donor_tx[1]];
    let dl_echo = [p[16] - donor_rx[0], p[17] - donor_rx[1]];
    let ul_echo = [p[18] - server_rx[0], p[19] - server_rx[1]];
    let dl_rx = [p[20] - donor_rx[0], p[21] - donor_rx[1]];
    let ul_rx = [p[22] - server_rx[0], p[23] - server_rx[1]];

    // Cross terms for each server-tx/donor-rx channel pairing.
    let isol_offset = [
        -server_tx[0] - donor_rx[0] + ISOLATION_BIAS_DB,
        -server_tx[0] - donor_rx[1] + ISOLATION_BIAS_DB,
        -server_tx[1] - donor_rx[0] + ISOLATION_BIAS_DB,
        -server_tx[1] - donor_rx[1] + ISOLATION_BIAS_DB,
    ];
    let mut pre_isol = [0.0; 4];
    let mut post_isol = [0.0; 4];
    for i in 0..4 {
        pre_isol[i] = raw.fullchan_pwrs[i] + isol_offset[i];
        post_isol[i] = raw.delchan_pwrs[i] + isol_offset[i];
    }

    RepeaterStatus {
        gain,
        center_freq: format!("{:.3}", raw.center_freq),
        tdd_mode: tdd_mode.to_string(),
        lowgain_mode: on_off(raw.lowgain_on).to_string(),
        agc_on: if !raw.pa_enabled {
            "-".to_string()
        } else if raw.agc_on {
            "Auto".to_string()
        } else {
            "Manual".to_string()
        },
        canx_on: if !raw.pa_enabled {
            "-".to_string()
        } else {
            on_off(raw.canx_on).to_string()
        },
        dltxpwr: pair(&dl_tx),
        dlrxpwr: pair(&dl_rx),
        dlechopwr: pair(&dl_echo),
        ultxpwr: pair(&ul_tx),
        ulrxpwr: pair(&ul_rx),
        ulechopwr: pair(&ul_echo),
        preisol: isolation(&pre_isol),
        postisol: isolation(&post_isol),
        dacpwr: dl_ul_quad(&p[0..4]),
        dacpwr_max: dl_ul_quad(&p[12..16]),
        adcpwr: dl_ul_quad(&p[4..8]),
        adcpwr_max: dl_ul_quad(&p[16..20]),
        uptime: format_uptime(raw.uptime_secs),
    }
}

/// Decode the sync-status vector `[state, arfcn, cell id, l-index, ss-rssi,
/// last-seen ms]` from the device. The raw signal level is in dBFS; the
/// donor receive offset converts it back to dBm at the antenna.
pub fn decode_sync_status(stat: &[f64; 6], donor_rx_offset: f64) -> SyncStatus {
    let state = match stat[0] as i64 {
        2 => "OK",
        1 => "SEARCHING",
        _ => "IDLE",
    };
    SyncStatus {
        status: state.to_string(),
        arfcn: format!("{}", stat[1] as i64),
        cellid: format!("{}", stat[2] as i64),
        lindex: format!("{}", stat[3] as i64),
        scs: "30".to_string(),
        ssrssi: format!("{:.1}", stat[4] - donor_rx_offset),
        lastdetected: format!("{:.1}", stat[5]),
    }
}

/// Format an uptime in seconds as `days/hours/minutes/seconds`. The seconds
/// component is truncated, not rounded.
pub fn format_uptime(secs: f64) -> String {
    let total = if secs > 0.0 { secs as u64 } else { 0 };
    let days = total / 86_400;
    let hours = (total % 86_400) / 3_600;
    let minutes = (total % 3_600) / 60;
    let seconds = total % 60;
    if days == 1 {
        format!("1 day {hours} hour {minutes} min {seconds} sec")
    } else if days > 1 {
        format!("{days} days {hours} hour {minutes} min {seconds} sec")
    } else {
        format!("{hours} hour {minutes} min {seconds} sec")
    }
}

fn on_off(v: bool) -> &'static str {
    if v {
        "ON"
    } else {
        "OFF"
    }
}

fn pair(v: &[f64; 2]) -> String {
    format!("{:.1} / {:.1}", v[0], v[1])
}

fn isolation(v: &[f64; 4]) -> String {
    let max = v.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    format!(
        "{max:.1}  ({:.1} / {:.1} / {:.1} / {:.1})",
        v[0], v[1], v[2], v[3]
    )
}

fn dl_ul_quad(v: &[f64]) -> String {
    format!(
        "DL {:.1} / {:.1}   UL {:.1} / {:.1}",
        v[0], v[1], v[2], v[3]
    )
}
