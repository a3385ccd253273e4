//! Typed repeater configuration and the validated change-set.
//!
//! The configuration is an explicit struct with typed fields rather than a
//! free-form key/value map. Partial updates arrive as a [`ConfigPatch`]
//! (all-optional mirror, raw enum values as the UI submits them); diffing a
//! patch against the current configuration yields an ordered, fully
//! validated [`Change`] list, so a bad value is rejected before any remote
//! call is issued.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Channel filter bandwidths (MHz) in bank-select order.
pub const BANDWIDTHS: [u32; 14] = [5, 10, 15, 20, 25, 30, 40, 50, 60, 70, 80, 90, 100, 200];

/// Sentinel the UI submits for "bypass the channel filter".
pub const BYPASS_SENTINEL: u32 = 999;

// ── Errors ──────────────────────────────────────────────────────────

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid TDD mode {0}: expected 1 (hw sync), 2 (DL only) or 3 (UL only)")]
    InvalidTddMode(i64),
    #[error("invalid low-gain mode {0}: expected 1 (off) or 2 (on)")]
    InvalidLowGainMode(i64),
    #[error("unknown channel bandwidth {0} MHz")]
    UnknownBandwidth(u32),
}

// ── Enumerations ────────────────────────────────────────────────────

/// TDD timing source. Raw values 1–3 as submitted by the UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TddMode {
    /// Hardware sync from the timing module.
    HwSync,
    /// Force downlink-only timing.
    DlOnly,
    /// Force uplink-only timing.
    UlOnly,
}

impl TddMode {
    pub fn from_raw(v: i64) -> Result<Self, ConfigError> {
        match v {
            1 => Ok(TddMode::HwSync),
            2 => Ok(TddMode::DlOnly),
            3 => Ok(TddMode::UlOnly),
            other => Err(ConfigError::InvalidTddMode(other)),
        }
    }

    pub fn raw(self) -> i64 {
        match self {
            TddMode::HwSync => 1,
            TddMode::DlOnly => 2,
            TddMode::UlOnly => 3,
        }
    }

    /// The two boolean flags the device register takes.
    pub fn device_flags(self) -> (i64, i64) {
        match self {
            TddMode::HwSync => (0, 1),
            TddMode::DlOnly => (1, 0),
            TddMode::UlOnly => (1, 1),
        }
    }

    /// Reconstruct from the device register pair.
    pub fn from_device_flags(forced: i64, direction: i64) -> Self {
        if forced == 0 {
            TddMode::HwSync
        } else if direction == 0 {
            TddMode::DlOnly
        } else {
            TddMode::UlOnly
        }
    }
}

/// Tuner low-gain mode. Raw values 1 (off) / 2 (on).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LowGainMode {
    Off,
    On,
}

impl LowGainMode {
    pub fn from_raw(v: i64) -> Result<Self, ConfigError> {
        match v {
            1 => Ok(LowGainMode::Off),
            2 => Ok(LowGainMode::On),
            other => Err(ConfigError::InvalidLowGainMode(other)),
        }
    }

    pub fn raw(self) -> i64 {
        match self {
            LowGainMode::Off => 1,
            LowGainMode::On => 2,
        }
    }

    pub fn device_flag(self) -> i64 {
        match self {
            LowGainMode::Off => 0,
            LowGainMode::On => 1,
        }
    }
}

/// Channel filter selection: a concrete bandwidth from [`BANDWIDTHS`] or the
/// filter bypassed entirely. Exactly one of the two is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelFilter {
    Bypass,
    /// Bandwidth in MHz — always a member of [`BANDWIDTHS`].
    Bandwidth(u32),
}

impl ChannelFilter {
    /// Validate a raw UI value (bandwidth in MHz, or the bypass sentinel).
    pub fn from_raw(v: u32) -> Result<Self, ConfigError> {
        if v == BYPASS_SENTINEL {
            return Ok(ChannelFilter::Bypass);
        }
        if BANDWIDTHS.contains(&v) {
            Ok(ChannelFilter::Bandwidth(v))
        } else {
            Err(ConfigError::UnknownBandwidth(v))
        }
    }

    /// Bank-select index for a concrete bandwidth; `None` for bypass.
    pub fn bank_index(self) -> Option<usize> {
        match self {
            ChannelFilter::Bypass => None,
            ChannelFilter::Bandwidth(bw) => BANDWIDTHS.iter().position(|&b| b == bw),
        }
    }

    /// Raw UI value.
    pub fn raw(self) -> u32 {
        match self {
            ChannelFilter::Bypass => BYPASS_SENTINEL,
            ChannelFilter::Bandwidth(bw) => bw,
        }
    }

    /// The 14-entry selector vector: at most one `true`, none when bypassed.
    pub fn selector_flags(self) -> [bool; 14] {
        let mut flags = [false; 14];
        if let Some(idx) = self.bank_index() {
            flags[idx] = true;
        }
        flags
    }
}

// ── Frame schedule ──────────────────────────────────────────────────

/// TDD frame schedule: slot lengths, special-subframe symbol split, and an
/// optional blanking pattern (empty string = none).
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FrameSchedule {
    pub slot1_dl: i64,
    pub slot1_ul: i64,
    pub slot2_dl: i64,
    pub slot2_ul: i64,
    pub ssf_symbols_dl: i64,
    pub ssf_symbols_gp: i64,
    pub ssf_symbols_ul: i64,
    #[serde(default)]
    pub blanking: String,
}

// ── Configuration ───────────────────────────────────────────────────

/// The live repeater configuration, exclusively owned by the reconciliation
/// engine for the process lifetime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Configuration {
    /// Center frequency in MHz.
    pub center_freq: f64,
    /// Target end-to-end gain in dB (analog + digital).
    pub target_gain: i64,
    /// Repeater enable (power amplifiers on).
    pub rpt_on: bool,
    /// Echo cancellation enable.
    pub canx_on: bool,
    /// Gain control: `true` = auto, `false` = manual.
    pub agc_on: bool,
    /// Downlink receive attenuation steps, channels 1–2 (quarter-dB raw).
    pub dl_rx_atten: [i64; 2],
    /// Uplink receive attenuation steps, channels 1–2.
    pub ul_rx_atten: [i64; 2],
    pub tdd_mode: TddMode,
    pub lowgain_mode: LowGainMode,
    pub filter: ChannelFilter,
    /// Cell search lock; 0 = free search.
    pub arfcn: u32,
    #[serde(default)]
    pub schedule: FrameSchedule,
}

impl Default for Configuration {
    fn default() -> Self {
        Configuration {
            center_freq: 0.0,
            target_gain: 0,
            rpt_on: false,
            canx_on: false,
            agc_on: false,
            dl_rx_atten: [0, 0],
            ul_rx_atten: [0, 0],
            tdd_mode: TddMode::HwSync,
            lowgain_mode: LowGainMode::Off,
            filter: ChannelFilter::Bypass,
            arfcn: 0,
            schedule: FrameSchedule::default(),
        }
    }
}

impl Configuration {
    /// Express the full configuration as a patch — used to re-apply a
    /// persisted configuration through the normal reconciliation path.
    pub fn as_patch(&self) -> ConfigPatch {
        ConfigPatch {
            center_freq: Some(self.center_freq),
            target_gain: Some(self.target_gain),
            rpt_on: Some(self.rpt_on as i64),
            canx_on: Some(self.canx_on as i64),
            agc_on: Some(self.agc_on as i64),
            dl_rx_1: Some(self.dl_rx_atten[0]),
            dl_rx_2: Some(self.dl_rx_atten[1]),
            ul_rx_1: Some(self.ul_rx_atten[0]),
            ul_rx_2: Some(self.ul_rx_atten[1]),
            tdd_mode: Some(self.tdd_mode.raw()),
            lowgain_mode: Some(self.lowgain_mode.raw()),
            rfbw: Some(self.filter.raw()),
            arfcn: Some(self.arfcn),
            slot1_dl: Some(self.schedule.slot1_dl),
            slot1_ul: Some(self.schedule.slot1_ul),
            slot2_dl: Some(self.schedule.slot2_dl),
            slot2_ul: Some(self.schedule.slot2_ul),
            ssf_symbols_dl: Some(self.schedule.ssf_symbols_dl),
            ssf_symbols_gp: Some(self.schedule.ssf_symbols_gp),
            ssf_symbols_ul: Some(self.schedule.ssf_symbols_ul),
            tdd_blanking: Some(self.schedule.blanking.clone()),
        }
    }
}

// ── Patch and change-set ────────────────────────────────────────────

/// A partial configuration update, field names and raw values as the UI
/// submits them. Absent fields are left unchanged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigPatch {
    pub center_freq: Option<f64>,
    pub target_gain: Option<i64>,
    /// 0 / 1.
    pub rpt_on: Option<i64>,
    pub canx_on: Option<i64>,
    pub agc_on: Option<i64>,
    pub dl_rx_1: Option<i64>,
    pub dl_rx_2: Option<i64>,
    pub ul_rx_1: Option<i64>,
    pub ul_rx_2: Option<i64>,
    /// Raw 1–3.
    pub tdd_mode: Option<i64>,
    /// Raw 1–2.
    pub lowgain_mode: Option<i64>,
    /// Bandwidth in MHz, or 999 for bypass.
    pub rfbw: Option<u32>,
    pub arfcn: Option<u32>,
    pub slot1_dl: Option<i64>,
    pub slot1_ul: Option<i64>,
    pub slot2_dl: Option<i64>,
    pub slot2_ul: Option<i64>,
    pub ssf_symbols_dl: Option<i64>,
    pub ssf_symbols_gp: Option<i64>,
    pub ssf_symbols_ul: Option<i64>,
    pub tdd_blanking: Option<String>,
}

/// One validated configuration change, in engine application order.
///
/// The variants are emitted by [`ConfigPatch::diff`] in exactly the order
/// the engine must apply them; an invalid raw value fails validation before
/// the first change is produced.
#[derive(Debug, Clone, PartialEq)]
pub enum Change {
    DownlinkAtten { rx1: i64, rx2: i64 },
    UplinkAtten { rx1: i64, rx2: i64 },
    TddMode(TddMode),
    LowGainMode(LowGainMode),
    Filter(ChannelFilter),
    /// Bulk re-application of the search lock and frame schedule.
    FrameSchedule { arfcn: u32, schedule: FrameSchedule },
    /// New center frequency in MHz — triggers the guarded retune sequence.
    CenterFreq(f64),
    Mode { canx_on: bool, agc_on: bool },
    RepeaterOn(bool),
    /// Always last; skipped entirely when the same patch turns the
    /// repeater off.
    TargetGain(i64),
}

impl ConfigPatch {
    /// Validate this patch against the current configuration and produce the
    /// ordered change-set.
    ///
    /// Every raw value is checked here, before any remote call: a patch
    /// containing one invalid value changes nothing, even if other fields in
    /// it were valid.
    pub fn diff(&self, current: &Configuration) -> Result<Vec<Change>, ConfigError> {
        let mut changes = Vec::new();

        // Attenuation: either channel differing re-programs the pair.
        let dl = [
            self.dl_rx_1.unwrap_or(current.dl_rx_atten[0]),
            self.dl_rx_2.unwrap_or(current.dl_rx_atten[1]),
        ];
        if dl != current.dl_rx_atten {
            changes.push(Change::DownlinkAtten { rx1: dl[0], rx2: dl[1] });
        }
        let ul = [
            self.ul_rx_1.unwrap_or(current.ul_rx_atten[0]),
            self.ul_rx_2.unwrap_or(current.ul_rx_atten[1]),
        ];
        if ul != current.ul_rx_atten {
            changes.push(Change::UplinkAtten { rx1: ul[0], rx2: ul[1] });
        }

        if let Some(raw) = self.tdd_mode {
            let mode = TddMode::from_raw(raw)?;
            if mode != current.tdd_mode {
                changes.push(Change::TddMode(mode));
            }
        }

        if let Some(raw) = self.lowgain_mode {
            let mode = LowGainMode::from_raw(raw)?;
            if mode != current.lowgain_mode {
                changes.push(Change::LowGainMode(mode));
            }
        }

        if let Some(raw) = self.rfbw {
            let filter = ChannelFilter::from_raw(raw)?;
            if filter != current.filter {
                changes.push(Change::Filter(filter));
            }
        }

        // Any schedule-related field changing triggers a bulk re-apply of
        // the whole group; absent fields fall back to current values.
        let arfcn = self.arfcn.unwrap_or(current.arfcn);
        let schedule = FrameSchedule {
            slot1_dl: self.slot1_dl.unwrap_or(current.schedule.slot1_dl),
            slot1_ul: self.slot1_ul.unwrap_or(current.schedule.slot1_ul),
            slot2_dl: self.slot2_dl.unwrap_or(current.schedule.slot2_dl),
            slot2_ul: self.slot2_ul.unwrap_or(current.schedule.slot2_ul),
            ssf_symbols_dl: self.ssf_symbols_dl.unwrap_or(current.schedule.ssf_symbols_dl),
            ssf_symbols_gp: self.ssf_symbols_gp.unwrap_or(current.schedule.ssf_symbols_gp),
            ssf_symbols_ul: self.ssf_symbols_ul.unwrap_or(current.schedule.ssf_symbols_ul),
            blanking: self
                .tdd_blanking
                .clone()
                .unwrap_or_else(|| current.schedule.blanking.clone()),
        };
        if arfcn != current.arfcn || schedule != current.schedule {
            changes.push(Change::FrameSchedule { arfcn, schedule });
        }

        if let Some(freq) = self.center_freq {
            if freq != current.center_freq {
                changes.push(Change::CenterFreq(freq));
            }
        }

        // Cancellation and gain-control flags are pushed together.
        let canx = self.canx_on.map(|v| v != 0).unwrap_or(current.canx_on);
        let agc = self.agc_on.map(|v| v != 0).unwrap_or(current.agc_on);
        if canx != current.canx_on || agc != current.agc_on {
            changes.push(Change::Mode { canx_on: canx, agc_on: agc });
        }

        if let Some(raw) = self.rpt_on {
            let on = raw != 0;
            if on != current.rpt_on {
                changes.push(Change::RepeaterOn(on));
            }
        }

        if let Some(gain) = self.target_gain {
            if gain != current.target_gain {
                changes.push(Change::TargetGain(gain));
            }
        }

        Ok(changes)
    }
}
