//! Configuration reconciliation engine.
//!
//! Owns the live [`Configuration`] and [`CalibrationConstants`] and applies
//! changes to the remote device in a safe order:
//!
//! - attenuation, timing and filter changes first, each as an independent
//!   register write
//! - center-frequency retunes wrapped in a gain-safe sequence (PA off,
//!   minimum gain) so the unit never transmits at an uncontrolled gain
//! - calibration always recomputed after the structural changes, because
//!   several of them move attenuation
//! - target gain last, against the fresh analog gain
//!
//! `apply` is not transactional: a transport failure aborts the remaining
//! changes but already-issued writes stay in effect. Invalid values, by
//! contrast, are rejected during validation before the first write, so a bad
//! patch changes nothing.

use std::time::Duration;

use thiserror::Error;

use crate::calibration::{self, CalibrationConstants, CalibrationError};
use crate::config::{
    Change, ChannelFilter, ConfigError, ConfigPatch, Configuration, FrameSchedule, LowGainMode,
    TddMode, BANDWIDTHS,
};
use crate::rpc::{RpcChannel, RpcError, Value};
use crate::store::{ConfigStore, StoreError};
use crate::telemetry::{self, RawStatus, RepeaterStatus, SyncStatus};

/// Digital gain floor forced while the repeater is switched off.
pub const MIN_DIG_GAIN: f64 = -10.0;

/// Safe gain forced for the duration of a retune.
const RETUNE_SAFE_GAIN: f64 = -30.0;

/// Sentinel written to the two attenuator hold slots so only the real
/// channels are touched.
const ATTEN_HOLD: i64 = 100;

/// Cell search dwell and priority arguments.
const SEARCH_DWELL: i64 = 6;
const SEARCH_PRIORITY: i64 = 1;

/// Frame-schedule changes only restart the search above this frequency.
const SEARCH_RESTART_MIN_FREQ_HZ: f64 = 3e9;

// ── Errors ──────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error(transparent)]
    Transport(#[from] RpcError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Calibration(#[from] CalibrationError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

// ── Engine ──────────────────────────────────────────────────────────

/// The reconciliation engine. Exclusive owner of the live configuration and
/// calibration constants for the process lifetime.
pub struct Engine<C: RpcChannel> {
    chan: C,
    store: ConfigStore,
    config: Configuration,
    cal: CalibrationConstants,
    /// Mode flags held while the repeater is off, restored on re-enable.
    prev_mode: Option<(i64, i64)>,
    /// Last uptime reading, for reboot detection.
    prev_uptime: f64,
    settle: Duration,
}

impl<C: RpcChannel> Engine<C> {
    /// Connect to the device and run the full start sequence: device-config
    /// read, calibration compute, best-effort re-apply of any persisted
    /// configuration, then a fixed settle interval.
    pub fn new(chan: C, store: ConfigStore, settle: Duration) -> Result<Self, ReconcileError> {
        let mut engine = Engine {
            chan,
            store,
            config: Configuration::default(),
            cal: CalibrationConstants::default(),
            prev_mode: None,
            prev_uptime: 0.0,
            settle,
        };
        engine.startup()?;
        Ok(engine)
    }

    pub fn config(&self) -> &Configuration {
        &self.config
    }

    pub fn calibration(&self) -> &CalibrationConstants {
        &self.cal
    }

    pub fn channel_mut(&mut self) -> &mut C {
        &mut self.chan
    }

    // ── Start / recovery ────────────────────────────────────────────

    /// Full start sequence. Also re-run when a reboot is detected.
    pub fn startup(&mut self) -> Result<(), ReconcileError> {
        self.call("vendor", &[Value::Int(1)])?;
        self.refresh_calibration()?;
        self.sync_from_device()?;

        match self.store.load() {
            Ok(Some(saved)) => {
                tracing::info!(
                    path = %self.store.path().display(),
                    "found saved configuration, applying"
                );
                if let Err(e) = self.apply(&saved.as_patch()) {
                    tracing::warn!(error = %e, "saved configuration could not be fully applied");
                }
                std::thread::sleep(self.settle);
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(error = %e, "ignoring unreadable saved configuration");
            }
        }
        Ok(())
    }

    /// Reboot heuristic: the uptime counter going backwards means the device
    /// reset underneath us. Re-runs the full start sequence once per
    /// detection. Returns whether a reboot was detected.
    pub fn check_alive(&mut self) -> Result<bool, ReconcileError> {
        let uptime = self.call_f64("secs_alive", &[])?;
        let rebooted = uptime < self.prev_uptime;
        if rebooted {
            tracing::warn!(
                previous = self.prev_uptime,
                current = uptime,
                "device uptime went backwards, assuming reboot and re-initializing"
            );
            self.startup()?;
        }
        self.prev_uptime = uptime;
        Ok(rebooted)
    }

    /// Read the entire configuration back from the device.
    pub fn sync_from_device(&mut self) -> Result<(), ReconcileError> {
        let center_freq = self.call_f64("center_freq", &[])? / 1e6;

        let mode = self.call_pair("mode")?;
        let target_gain = if mode.1 == 0 {
            // manual gain
            (self.call_f64("gain", &[])? + self.cal.analog_gain) as i64
        } else {
            // auto gain: the gain slot of the parameter vector
            let params = self.call_floats("repeater_params", &[], 1)?;
            (params[0] + self.cal.analog_gain) as i64
        };

        let pa = self.call_pair("pa_enable")?;
        let rpt_on = pa.0 > 0 || pa.1 > 0;
        // While off, the live mode registers are forced to zero; report the
        // held flags instead so the UI shows what re-enabling restores.
        let (canx, agc) = match (rpt_on, self.prev_mode) {
            (false, Some(held)) => held,
            _ => mode,
        };

        let dl = self.call_floats("dl_atten", &[], 4)?;
        let ul = self.call_floats("ul_atten", &[], 4)?;

        let tdd = self.call_pair("tdd_mode")?;
        let lowgain = self.call_f64("tuner_lowgain_mode", &[])? as i64;

        let bypass = self.call_f64("bypass_chan_fir", &[])? as i64;
        let bank = self.call_f64("chan_fir_bank_sel", &[])? as i64;
        let filter = if bypass == 1 {
            ChannelFilter::Bypass
        } else {
            let idx = (bank.max(0) as usize).min(BANDWIDTHS.len() - 1);
            ChannelFilter::Bandwidth(BANDWIDTHS[idx])
        };

        // (ssb arfcn, start, stop, step): a positive step means free search.
        let search = self.call_floats("tdd_sync_search_freq", &[], 4)?;
        let arfcn = if search[3] > 0.0 { 0 } else { search[0] as u32 };

        let schedule = self.read_schedule()?;

        self.config = Configuration {
            center_freq,
            target_gain,
            rpt_on,
            canx_on: canx != 0,
            agc_on: agc != 0,
            dl_rx_atten: [dl[2] as i64, dl[3] as i64],
            ul_rx_atten: [ul[2] as i64, ul[3] as i64],
            tdd_mode: TddMode::from_device_flags(tdd.0, tdd.1),
            lowgain_mode: if lowgain == 0 {
                LowGainMode::Off
            } else {
                LowGainMode::On
            },
            filter,
            arfcn,
            schedule,
        };
        Ok(())
    }

    fn read_schedule(&mut self) -> Result<FrameSchedule, ReconcileError> {
        let reply = self.call("tdd_frame_schedule", &[])?;
        let items = reply.as_list().ok_or_else(|| bad_reply("tdd_frame_schedule"))?;
        if items.len() < 7 {
            return Err(bad_reply("tdd_frame_schedule").into());
        }
        let mut slots = [0i64; 7];
        for (i, slot) in slots.iter_mut().enumerate() {
            *slot = items[i]
                .as_i64()
                .ok_or_else(|| bad_reply("tdd_frame_schedule"))?;
        }
        let blanking = items
            .get(7)
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string();
        Ok(FrameSchedule {
            slot1_dl: slots[0],
            slot1_ul: slots[1],
            slot2_dl: slots[2],
            slot2_ul: slots[3],
            ssf_symbols_dl: slots[4],
            ssf_symbols_gp: slots[5],
            ssf_symbols_ul: slots[6],
            blanking,
        })
    }

    // ── Apply ───────────────────────────────────────────────────────

    /// Apply a partial configuration update.
    ///
    /// The patch is validated in full before the first remote call; a bad
    /// value therefore changes nothing. A transport failure mid-sequence
    /// aborts the remaining changes without rolling back the completed ones —
    /// callers should re-fetch status rather than trust the request echo.
    pub fn apply(&mut self, patch: &ConfigPatch) -> Result<(), ReconcileError> {
        let changes = patch.diff(&self.config)?;
        let turning_off = changes
            .iter()
            .any(|c| matches!(c, Change::RepeaterOn(false)));

        let mut target_gain = None;
        for change in &changes {
            match change {
                Change::TargetGain(gain) => target_gain = Some(*gain),
                other => self.apply_change(other)?,
            }
        }

        // Several of the changes above move attenuation; the constants must
        // be fresh before any gain math.
        self.refresh_calibration()?;

        match target_gain {
            Some(_) if turning_off => {
                tracing::debug!("target gain change ignored while turning the repeater off");
            }
            Some(gain) => self.apply_target_gain(gain)?,
            None => {}
        }

        self.store.save(&self.config)?;
        Ok(())
    }

    fn apply_change(&mut self, change: &Change) -> Result<(), ReconcileError> {
        match change {
            Change::DownlinkAtten { rx1, rx2 } => {
                tracing::info!(from = ?self.config.dl_rx_atten, to = ?[*rx1, *rx2], "downlink attenuation");
                self.call(
                    "dl_atten",
                    &[
                        ATTEN_HOLD.into(),
                        ATTEN_HOLD.into(),
                        (*rx1).into(),
                        (*rx2).into(),
                    ],
                )?;
                self.config.dl_rx_atten = [*rx1, *rx2];
            }

            Change::UplinkAtten { rx1, rx2 } => {
                tracing::info!(from = ?self.config.ul_rx_atten, to = ?[*rx1, *rx2], "uplink attenuation");
                self.call(
                    "ul_atten",
                    &[
                        ATTEN_HOLD.into(),
                        ATTEN_HOLD.into(),
                        (*rx1).into(),
                        (*rx2).into(),
                    ],
                )?;
                self.config.ul_rx_atten = [*rx1, *rx2];
            }

            Change::TddMode(mode) => {
                tracing::info!(from = ?self.config.tdd_mode, to = ?mode, "tdd mode");
                let (forced, direction) = mode.device_flags();
                self.call("tdd_mode", &[forced.into(), direction.into()])?;
                self.config.tdd_mode = *mode;
            }

            Change::LowGainMode(mode) => {
                tracing::info!(from = ?self.config.lowgain_mode, to = ?mode, "low-gain mode");
                self.call("tuner_lowgain_mode", &[mode.device_flag().into()])?;
                self.config.lowgain_mode = *mode;
            }

            Change::Filter(filter) => {
                tracing::info!(from = ?self.config.filter, to = ?filter, "channel filter");
                match filter {
                    ChannelFilter::Bypass => {
                        self.call("bypass_chan_fir", &[1i64.into()])?;
                    }
                    ChannelFilter::Bandwidth(_) => {
                        self.call("bypass_chan_fir", &[0i64.into()])?;
                        if let Some(idx) = filter.bank_index() {
                            self.call("chan_fir_bank_sel", &[(idx as i64).into()])?;
                        }
                    }
                }
                self.config.filter = *filter;
                self.call("tdd_sync_stop", &[])?;
                self.restart_search_best_effort();
            }

            Change::FrameSchedule { arfcn, schedule } => {
                tracing::info!(arfcn = *arfcn, schedule = ?schedule, "frame schedule");
                self.config.arfcn = *arfcn;
                self.config.schedule = schedule.clone();
                let s = &self.config.schedule;
                let mut args: Vec<Value> = vec![
                    s.slot1_dl.into(),
                    s.slot1_ul.into(),
                    s.slot2_dl.into(),
                    s.slot2_ul.into(),
                    s.ssf_symbols_dl.into(),
                    s.ssf_symbols_gp.into(),
                    s.ssf_symbols_ul.into(),
                ];
                if !s.blanking.is_empty() {
                    args.push(s.blanking.as_str().into());
                }
                self.call("tdd_frame_schedule", &args)?;
                self.call("tdd_sync_stop", &[])?;
                if self.call_f64("center_freq", &[])? > SEARCH_RESTART_MIN_FREQ_HZ {
                    self.restart_search_best_effort();
                }
            }

            Change::CenterFreq(mhz) => {
                tracing::info!(from = self.config.center_freq, to = *mhz, "retuning center frequency");
                // Gain-safe retune: never transmit at an uncontrolled gain
                // while the tuner settles.
                let prev_pa = self.call_pair("pa_enable")?;
                let prev_mode = self.call_pair("mode")?;
                self.call("gain", &[RETUNE_SAFE_GAIN.into()])?;
                self.call("pa_enable", &[0i64.into(), 0i64.into()])?;
                self.call("mode", &[0i64.into(), 0i64.into()])?;
                self.call("tuner_reset", &[])?;
                self.call("center_freq", &[(mhz * 1e6).into()])?;
                self.call("mode", &[prev_mode.0.into(), prev_mode.1.into()])?;
                self.call("pa_enable", &[prev_pa.0.into(), prev_pa.1.into()])?;
                self.config.center_freq = *mhz;
                self.call("tdd_sync_stop", &[])?;
                self.restart_search_best_effort();
            }

            Change::Mode { canx_on, agc_on } => {
                tracing::info!(canx_on = *canx_on, agc_on = *agc_on, "mode");
                self.config.canx_on = *canx_on;
                self.config.agc_on = *agc_on;
                self.call(
                    "mode",
                    &[(*canx_on as i64).into(), (*agc_on as i64).into()],
                )?;
                self.call("tuner_reset", &[])?;
            }

            Change::RepeaterOn(false) => {
                tracing::info!("repeater off");
                let held = self.call_pair("mode")?;
                self.prev_mode = Some(held);
                self.call("mode", &[0i64.into(), 0i64.into()])?;
                self.call("gain", &[MIN_DIG_GAIN.into()])?;
                self.call("pa_enable", &[0i64.into(), 0i64.into()])?;
                self.config.rpt_on = false;
            }

            Change::RepeaterOn(true) => {
                tracing::info!("repeater on");
                if let Some((canx, agc)) = self.prev_mode.take() {
                    self.config.canx_on = canx != 0;
                    self.config.agc_on = agc != 0;
                }
                self.call("pa_enable", &[1i64.into(), 1i64.into()])?;
                self.call(
                    "mode",
                    &[
                        (self.config.canx_on as i64).into(),
                        (self.config.agc_on as i64).into(),
                    ],
                )?;
                self.config.rpt_on = true;
            }

            Change::TargetGain(_) => unreachable!("handled by apply"),
        }
        Ok(())
    }

    fn apply_target_gain(&mut self, gain: i64) -> Result<(), ReconcileError> {
        tracing::info!(from = self.config.target_gain, to = gain, "target gain");
        self.config.target_gain = gain;
        let digital = gain as f64 - self.cal.analog_gain;
        let mode = self.call_pair("mode")?;
        if mode.1 == 0 {
            // manual gain: program the digital gain directly
            self.call("gain", &[digital.into()])?;
            self.call("dac_fr_accum_reset", &[])?;
        } else {
            // auto gain: rewrite the gain slot and re-push the whole vector
            let mut params = self.call_floats("repeater_params", &[], 1)?;
            params[0] = digital;
            let args: Vec<Value> = params.into_iter().map(Value::from).collect();
            self.call("repeater_params", &args)?;
        }
        Ok(())
    }

    /// Recompute calibration constants from the live calibration table and
    /// attenuation registers, refreshing the attenuation fields as a side
    /// effect.
    fn refresh_calibration(&mut self) -> Result<(), ReconcileError> {
        let boxcal = self.call_floats("get_boxcal_data", &[], 0)?;
        let dl = self.call_floats("dl_atten", &[], 4)?;
        let ul = self.call_floats("ul_atten", &[], 4)?;
        self.cal = calibration::compute(&boxcal, &dl, &ul)?;
        self.config.dl_rx_atten = [dl[2] as i64, dl[3] as i64];
        self.config.ul_rx_atten = [ul[2] as i64, ul[3] as i64];
        tracing::debug!(analog_gain = self.cal.analog_gain, "calibration recomputed");
        Ok(())
    }

    // ── Cell search ─────────────────────────────────────────────────

    fn restart_search(&mut self) -> Result<(), RpcError> {
        if self.config.arfcn != 0 {
            self.call(
                "tdd_sync_start_search_arfcn",
                &[
                    SEARCH_DWELL.into(),
                    SEARCH_PRIORITY.into(),
                    self.config.arfcn.into(),
                ],
            )?;
            return Ok(());
        }
        match self.config.filter {
            ChannelFilter::Bypass => {
                self.call(
                    "tdd_sync_start_search",
                    &[SEARCH_DWELL.into(), SEARCH_PRIORITY.into()],
                )?;
            }
            ChannelFilter::Bandwidth(bw) => {
                let center = self.config.center_freq * 1e6;
                let half = bw as f64 * 1e6 / 2.0;
                self.call(
                    "tdd_sync_start_search",
                    &[
                        SEARCH_DWELL.into(),
                        SEARCH_PRIORITY.into(),
                        (center - half).into(),
                        (center + half).into(),
                    ],
                )?;
            }
        }
        Ok(())
    }

    /// Search restarts are best-effort by design: a failure leaves the
    /// search stopped, nothing else.
    fn restart_search_best_effort(&mut self) {
        if let Err(e) = self.restart_search() {
            tracing::warn!(error = %e, "cell search restart failed, continuing");
        }
    }

    // ── Status fetch ────────────────────────────────────────────────

    /// Produce a fresh configuration/telemetry snapshot and sync-status
    /// view. Never partially updated — an error means no snapshot.
    pub fn fetch_status(&mut self) -> Result<(RepeaterStatus, SyncStatus), ReconcileError> {
        self.call("dac_fr_accum_reset", &[])?;
        let delchan = self.call_floats("get_delchan_pwrs", &[], 4)?;
        let fullchan = self.call_floats("get_fullchan_pwrs", &[], 4)?;
        let gain = self.call_f64("gain", &[])?;
        let accum = self.call_floats("accum_status", &[], 2)?;
        let powers = self.call_floats("read_powers", &[], 24)?;
        let center_freq = self.call_f64("center_freq", &[])? / 1e6;
        let tdd_flags = self.call_pair("tdd_mode")?;
        let lowgain = self.call_f64("tuner_lowgain_mode", &[])? as i64;
        let mode = self.call_pair("mode")?;
        self.refresh_calibration()?;
        let pa = self.call_pair("pa_enable")?;

        let raw = RawStatus {
            gain,
            oscillating: accum[1] != 0.0,
            powers: to_array(&powers, "read_powers")?,
            fullchan_pwrs: to_array(&fullchan, "get_fullchan_pwrs")?,
            delchan_pwrs: to_array(&delchan, "get_delchan_pwrs")?,
            center_freq,
            tdd_flags,
            lowgain_on: lowgain != 0,
            canx_on: mode.0 != 0,
            agc_on: mode.1 != 0,
            pa_enabled: pa.0 > 0 || pa.1 > 0,
            uptime_secs: self.prev_uptime,
        };
        let status = telemetry::decode_status(&raw, &self.cal);

        let stat = self.call_floats("tdd_sync_status", &[], 6)?;
        let sync = telemetry::decode_sync_status(
            &to_array(&stat, "tdd_sync_status")?,
            self.cal.donor_rx_dbm_to_dbfs[0],
        );
        Ok((status, sync))
    }

    // ── Call helpers ────────────────────────────────────────────────

    fn call(&mut self, method: &str, args: &[Value]) -> Result<Value, RpcError> {
        self.chan.call(method, args)
    }

    fn call_f64(&mut self, method: &str, args: &[Value]) -> Result<f64, RpcError> {
        self.chan
            .call(method, args)?
            .as_f64()
            .ok_or_else(|| bad_reply(method))
    }

    fn call_floats(
        &mut self,
        method: &str,
        args: &[Value],
        min_len: usize,
    ) -> Result<Vec<f64>, RpcError> {
        let values = self
            .chan
            .call(method, args)?
            .floats()
            .ok_or_else(|| bad_reply(method))?;
        if values.len() < min_len {
            return Err(bad_reply(method));
        }
        Ok(values)
    }

    fn call_pair(&mut self, method: &str) -> Result<(i64, i64), RpcError> {
        let values = self.call_floats(method, &[], 2)?;
        Ok((values[0] as i64, values[1] as i64))
    }
}

fn bad_reply(method: &str) -> RpcError {
    RpcError::BadReply {
        method: method.to_string(),
        expected: "numeric vector of the documented shape",
    }
}

fn to_array<const N: usize>(values: &[f64], method: &str) -> Result<[f64; N], RpcError> {
    values
        .get(..N)
        .and_then(|s| <[f64; N]>::try_from(s).ok())
        .ok_or_else(|| bad_reply(method))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::Value;
    use crate::sim::SimulatedRepeater;

    fn engine() -> Engine<SimulatedRepeater> {
        engine_with(SimulatedRepeater::new())
    }

    fn engine_with(dev: SimulatedRepeater) -> Engine<SimulatedRepeater> {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::new(dir.path().join("repeater.cfg"));
        // tempdir is removed when the guard drops; keep the blob alive for
        // the duration of the test by leaking the guard.
        std::mem::forget(dir);
        Engine::new(dev, store, Duration::ZERO).unwrap()
    }

    #[test]
    fn startup_reads_device_configuration() {
        let eng = engine();
        let cfg = eng.config();
        assert_eq!(cfg.center_freq, 3510.0);
        assert!(cfg.rpt_on);
        assert!(cfg.canx_on);
        assert!(!cfg.agc_on);
        assert_eq!(cfg.tdd_mode, TddMode::HwSync);
        assert_eq!(cfg.lowgain_mode, LowGainMode::Off);
        assert_eq!(cfg.filter, ChannelFilter::Bandwidth(100));
        assert_eq!(cfg.arfcn, 0); // positive search step means free search
        assert_eq!(cfg.dl_rx_atten, [8, 8]);
        assert_eq!(cfg.schedule.slot1_dl, 7);
        // boxcal: donor_rx = -20 - 8/4 + 0 = -22, server_tx = 10
        assert_eq!(eng.calibration().analog_gain, -12.0);
        // manual gain 20 + analog -12
        assert_eq!(cfg.target_gain, 8);
    }

    #[test]
    fn attenuation_write_uses_hold_sentinels() {
        let mut eng = engine();
        eng.channel_mut().clear_log();
        let patch = ConfigPatch {
            dl_rx_1: Some(4),
            dl_rx_2: Some(6),
            ..Default::default()
        };
        eng.apply(&patch).unwrap();

        let (method, args) = eng.channel_mut().call_log[0].clone();
        assert_eq!(method, "dl_atten");
        assert_eq!(
            args,
            vec![
                Value::Int(100),
                Value::Int(100),
                Value::Int(4),
                Value::Int(6)
            ]
        );
        assert_eq!(eng.config().dl_rx_atten, [4, 6]);
        // calibration recomputed against the new attenuation:
        // ch0 = -20 - 1 + 0 + 10 = -11, ch1 = -20 - 1.5 + 0 + 10 = -11.5
        assert_eq!(eng.calibration().analog_gain, -11.0);
    }

    #[test]
    fn invalid_tdd_mode_changes_nothing_even_with_valid_keys() {
        let mut eng = engine();
        let before = eng.config().clone();
        eng.channel_mut().clear_log();

        let patch = ConfigPatch {
            dl_rx_1: Some(2), // valid change in the same request
            tdd_mode: Some(4),
            ..Default::default()
        };
        let err = eng.apply(&patch).unwrap_err();
        assert!(matches!(
            err,
            ReconcileError::Config(ConfigError::InvalidTddMode(4))
        ));
        // rejected during validation: no call issued, no key changed
        assert!(eng.channel_mut().call_log.is_empty());
        assert_eq!(eng.config(), &before);
    }

    #[test]
    fn invalid_lowgain_mode_is_rejected() {
        let mut eng = engine();
        let patch = ConfigPatch {
            lowgain_mode: Some(3),
            ..Default::default()
        };
        assert!(matches!(
            eng.apply(&patch).unwrap_err(),
            ReconcileError::Config(ConfigError::InvalidLowGainMode(3))
        ));
    }

    #[test]
    fn retune_holds_pa_and_mode_across_frequency_change() {
        let mut eng = engine();
        eng.channel_mut().clear_log();
        let patch = ConfigPatch {
            center_freq: Some(3600.0),
            ..Default::default()
        };
        eng.apply(&patch).unwrap();

        let methods = eng.channel_mut().called_methods();
        assert_eq!(
            &methods[..11],
            &[
                "pa_enable", // read + hold
                "mode",      // read + hold
                "gain",      // safe minimum
                "pa_enable", // off
                "mode",      // off
                "tuner_reset",
                "center_freq",
                "mode",      // restore
                "pa_enable", // restore
                "tdd_sync_stop",
                "tdd_sync_start_search",
            ]
        );
        // safe gain forced before the PA drops
        let (_, gain_args) = &eng.channel_mut().call_log[2];
        assert_eq!(gain_args, &vec![Value::Float(-30.0)]);
        // frequency programmed in Hz
        let (_, freq_args) = &eng.channel_mut().call_log[6];
        assert_eq!(freq_args, &vec![Value::Float(3.6e9)]);
        // search window centered on the new frequency ± half bandwidth
        let (_, search_args) = &eng.channel_mut().call_log[10];
        assert_eq!(
            search_args,
            &vec![
                Value::Int(6),
                Value::Int(1),
                Value::Float(3.6e9 - 50e6),
                Value::Float(3.6e9 + 50e6)
            ]
        );
        assert_eq!(eng.config().center_freq, 3600.0);
        // mode and PA restored to their held values
        assert_eq!(eng.channel_mut().pa_enable, [1, 1]);
        assert_eq!(eng.channel_mut().mode, [1, 0]);
    }

    #[test]
    fn repeater_off_holds_mode_and_skips_target_gain() {
        let mut eng = engine();
        let target_before = eng.config().target_gain;
        eng.channel_mut().clear_log();

        let patch = ConfigPatch {
            rpt_on: Some(0),
            target_gain: Some(99),
            ..Default::default()
        };
        eng.apply(&patch).unwrap();

        assert!(!eng.config().rpt_on);
        // the off path takes precedence: the target gain is not programmed
        assert_eq!(eng.config().target_gain, target_before);
        assert_eq!(eng.channel_mut().pa_enable, [0, 0]);
        assert_eq!(eng.channel_mut().mode, [0, 0]);
        // the only gain write is the forced floor
        let gain_writes: Vec<_> = eng
            .channel_mut()
            .call_log
            .iter()
            .filter(|(m, a)| m == "gain" && !a.is_empty())
            .collect();
        assert_eq!(gain_writes.len(), 1);
        assert_eq!(gain_writes[0].1, vec![Value::Float(MIN_DIG_GAIN)]);

        // re-enable restores the held cancellation/auto-gain flags
        let patch = ConfigPatch {
            rpt_on: Some(1),
            ..Default::default()
        };
        eng.apply(&patch).unwrap();
        assert!(eng.config().rpt_on);
        assert!(eng.config().canx_on);
        assert_eq!(eng.channel_mut().mode, [1, 0]);
        assert_eq!(eng.channel_mut().pa_enable, [1, 1]);
    }

    #[test]
    fn bandwidth_change_programs_bank_and_restarts_search() {
        let mut eng = engine();
        eng.channel_mut().clear_log();
        let patch = ConfigPatch {
            rfbw: Some(40),
            ..Default::default()
        };
        eng.apply(&patch).unwrap();

        let methods = eng.channel_mut().called_methods();
        assert_eq!(
            &methods[..4],
            &["bypass_chan_fir", "chan_fir_bank_sel", "tdd_sync_stop", "tdd_sync_start_search"]
        );
        assert_eq!(eng.channel_mut().bank_sel, 6);
        assert_eq!(eng.channel_mut().filter_bypass, 0);
        assert_eq!(eng.config().filter, ChannelFilter::Bandwidth(40));
    }

    #[test]
    fn bypass_clears_filter_and_searches_unbounded() {
        let mut eng = engine();
        eng.channel_mut().clear_log();
        let patch = ConfigPatch {
            rfbw: Some(999),
            ..Default::default()
        };
        eng.apply(&patch).unwrap();

        assert_eq!(eng.channel_mut().filter_bypass, 1);
        assert_eq!(eng.config().filter, ChannelFilter::Bypass);
        assert!(eng.config().filter.selector_flags().iter().all(|&f| !f));
        let (method, args) = eng
            .channel_mut()
            .call_log
            .iter()
            .find(|(m, _)| m == "tdd_sync_start_search")
            .cloned()
            .unwrap();
        assert_eq!(method, "tdd_sync_start_search");
        assert_eq!(args, vec![Value::Int(6), Value::Int(1)]); // no window
    }

    #[test]
    fn unknown_bandwidth_is_rejected() {
        let mut eng = engine();
        let patch = ConfigPatch {
            rfbw: Some(45),
            ..Default::default()
        };
        assert!(matches!(
            eng.apply(&patch).unwrap_err(),
            ReconcileError::Config(ConfigError::UnknownBandwidth(45))
        ));
    }

    #[test]
    fn schedule_change_pushes_all_fields_in_one_call() {
        let mut eng = engine();
        eng.channel_mut().clear_log();
        let patch = ConfigPatch {
            slot1_dl: Some(8),
            ..Default::default()
        };
        eng.apply(&patch).unwrap();

        let (_, args) = eng
            .channel_mut()
            .call_log
            .iter()
            .find(|(m, _)| m == "tdd_frame_schedule")
            .cloned()
            .unwrap();
        // seven arguments without a blanking pattern
        assert_eq!(args.len(), 7);
        assert_eq!(args[0], Value::Int(8));
        // other fields carried over unchanged
        assert_eq!(args[1], Value::Int(2));
        // 3.51 GHz > 3 GHz, so the search restarts
        assert!(eng
            .channel_mut()
            .called_methods()
            .contains(&"tdd_sync_start_search"));
    }

    #[test]
    fn blanking_pattern_adds_eighth_argument() {
        let mut eng = engine();
        eng.channel_mut().clear_log();
        let patch = ConfigPatch {
            tdd_blanking: Some("0F0F".into()),
            ..Default::default()
        };
        eng.apply(&patch).unwrap();

        let (_, args) = eng
            .channel_mut()
            .call_log
            .iter()
            .find(|(m, _)| m == "tdd_frame_schedule")
            .cloned()
            .unwrap();
        assert_eq!(args.len(), 8);
        assert_eq!(args[7], Value::Text("0F0F".into()));
    }

    #[test]
    fn schedule_search_restart_gated_below_3ghz() {
        let mut dev = SimulatedRepeater::new();
        dev.center_freq_hz = 2.5e9;
        let mut eng = engine_with(dev);
        eng.channel_mut().clear_log();
        let patch = ConfigPatch {
            slot2_ul: Some(3),
            ..Default::default()
        };
        eng.apply(&patch).unwrap();
        assert!(!eng
            .channel_mut()
            .called_methods()
            .contains(&"tdd_sync_start_search"));
    }

    #[test]
    fn failed_search_restart_is_swallowed() {
        let mut eng = engine();
        eng.channel_mut()
            .fail_methods
            .insert("tdd_sync_start_search".into());
        let patch = ConfigPatch {
            rfbw: Some(20),
            ..Default::default()
        };
        eng.apply(&patch).unwrap();
        assert_eq!(eng.config().filter, ChannelFilter::Bandwidth(20));
    }

    #[test]
    fn transport_failure_leaves_partial_state() {
        let mut eng = engine();
        eng.channel_mut().fail_methods.insert("tdd_mode".into());
        eng.channel_mut().clear_log();

        let patch = ConfigPatch {
            dl_rx_1: Some(3),
            tdd_mode: Some(2),
            ..Default::default()
        };
        let err = eng.apply(&patch).unwrap_err();
        assert!(matches!(err, ReconcileError::Transport(_)));
        // the attenuation write before the failure stays in effect
        assert_eq!(eng.config().dl_rx_atten, [3, 8]);
        assert_eq!(eng.channel_mut().dl_atten[2], 3.0);
        // the failed key is untouched
        assert_eq!(eng.config().tdd_mode, TddMode::HwSync);
    }

    #[test]
    fn target_gain_manual_programs_digital_gain() {
        let mut eng = engine();
        eng.channel_mut().clear_log();
        let patch = ConfigPatch {
            target_gain: Some(20),
            ..Default::default()
        };
        eng.apply(&patch).unwrap();

        // digital = target - analog = 20 - (-12) = 32, then accumulator reset
        assert_eq!(eng.channel_mut().gain, 32.0);
        let methods = eng.channel_mut().called_methods();
        let gain_at = methods.iter().position(|&m| m == "gain").unwrap();
        assert_eq!(methods[gain_at + 1], "dac_fr_accum_reset");
        assert_eq!(eng.config().target_gain, 20);
    }

    #[test]
    fn target_gain_auto_rewrites_parameter_vector() {
        let mut eng = engine();
        let patch = ConfigPatch {
            agc_on: Some(1),
            ..Default::default()
        };
        eng.apply(&patch).unwrap();

        eng.channel_mut().clear_log();
        let patch = ConfigPatch {
            target_gain: Some(25),
            ..Default::default()
        };
        eng.apply(&patch).unwrap();

        // gain slot overwritten, remaining parameters re-pushed unchanged
        assert_eq!(eng.channel_mut().repeater_params, vec![37.0, 0.0, 0.0, 0.0]);
        assert!(!eng.channel_mut().called_methods().contains(&"gain"));
    }

    #[test]
    fn apply_persists_configuration() {
        let mut eng = engine();
        let patch = ConfigPatch {
            ul_rx_1: Some(12),
            ..Default::default()
        };
        eng.apply(&patch).unwrap();
        let saved = eng.store.load().unwrap().unwrap();
        assert_eq!(&saved, eng.config());
    }

    #[test]
    fn reboot_detected_exactly_once_on_uptime_drop() {
        let mut dev = SimulatedRepeater::new();
        dev.uptime_step = 0.0;
        let mut eng = engine_with(dev);

        for (uptime, expect) in [(100.0, false), (150.0, false), (40.0, true)] {
            eng.channel_mut().uptime = uptime;
            assert_eq!(eng.check_alive().unwrap(), expect, "uptime {uptime}");
        }
        // monotonically increasing readings never trigger
        for uptime in [100.0, 150.0, 200.0] {
            eng.channel_mut().uptime = uptime;
            assert!(!eng.check_alive().unwrap());
        }
    }

    #[test]
    fn reboot_reinitializes_from_device() {
        let mut dev = SimulatedRepeater::new();
        dev.uptime_step = 0.0;
        dev.uptime = 500.0;
        let mut eng = engine_with(dev);
        eng.check_alive().unwrap();
        // empty apply persists the current configuration
        eng.apply(&ConfigPatch::default()).unwrap();

        // device resets: registers revert, uptime drops
        eng.channel_mut().center_freq_hz = 3.4e9;
        eng.channel_mut().uptime = 3.0;
        eng.channel_mut().clear_log();
        assert!(eng.check_alive().unwrap());
        assert!(eng.channel_mut().called_methods().contains(&"vendor"));
        // note: the persisted blob re-applies the old frequency on reboot
        assert_eq!(eng.config().center_freq, 3510.0);
    }

    #[test]
    fn fetch_status_produces_full_snapshot() {
        let mut eng = engine();
        eng.channel_mut().uptime = 90_061.9;
        eng.check_alive().unwrap();

        let (status, sync) = eng.fetch_status().unwrap();
        // analog -12 + digital 20
        assert_eq!(status.gain, "8.0");
        assert_eq!(status.center_freq, "3510.000");
        assert_eq!(status.tdd_mode, "Auto");
        assert_eq!(status.canx_on, "ON");
        assert_eq!(status.uptime, "1 day 1 hour 1 min 1 sec");

        assert_eq!(sync.status, "OK");
        assert_eq!(sync.cellid, "482");
        assert_eq!(sync.arfcn, "648672");
        // -55 dBFS corrected by the donor receive offset (-22)
        assert_eq!(sync.ssrssi, "-33.0");
    }

    #[test]
    fn fetch_status_oscillation_flag() {
        let mut eng = engine();
        eng.channel_mut().oscillating = true;
        let (status, _) = eng.fetch_status().unwrap();
        // clamped by 12 dB: -12 + 20 - 12
        assert_eq!(status.gain, "-4.0 OSC!");
    }

    #[test]
    fn persisted_configuration_reapplied_on_startup() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::new(dir.path().join("repeater.cfg"));

        // start from what the device reports, then tweak one field
        let eng = Engine::new(SimulatedRepeater::new(), store.clone(), Duration::ZERO).unwrap();
        let mut saved = eng.config().clone();
        saved.dl_rx_atten = [2, 2];
        store.save(&saved).unwrap();

        let mut eng = Engine::new(SimulatedRepeater::new(), store, Duration::ZERO).unwrap();
        assert_eq!(eng.config().dl_rx_atten, [2, 2]);
        assert_eq!(eng.channel_mut().dl_atten, [100.0, 100.0, 2.0, 2.0]);
    }
}
