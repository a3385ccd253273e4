//! Calibration model — derives gain/power offset constants from the factory
//! calibration table and the current attenuator settings.
//!
//! Pure computation, no I/O. The constants must be recomputed after every
//! attenuation change and after device reinitialization; a stale
//! `analog_gain` makes every gain figure the daemon reports wrong.

use thiserror::Error;

/// Minimum number of entries a usable calibration table carries.
pub const MIN_TABLE_LEN: usize = 10;

/// Attenuator registers are quarter-dB steps in raw form.
const ATTEN_DB_PER_STEP: f64 = 0.25;

#[derive(Debug, Error)]
pub enum CalibrationError {
    /// The factory table is truncated or missing. Reconfiguration must not
    /// proceed on top of this.
    #[error("calibration table invalid: {entries} entries, need at least {MIN_TABLE_LEN}")]
    TableTooShort { entries: usize },
}

/// Per-channel dB⇄dBFS offsets plus the combined analog gain.
///
/// Derived, never persisted. The zero default exists only so the engine can
/// be constructed before its first device read.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct CalibrationConstants {
    /// Donor receive path: dBm at the antenna → dBFS at the ADC.
    pub donor_rx_dbm_to_dbfs: [f64; 2],
    /// Donor transmit path: dBFS at the DAC → dBm at the antenna.
    pub donor_tx_dbfs_to_dbm: [f64; 2],
    /// Server receive path: dBm → dBFS.
    pub server_rx_dbm_to_dbfs: [f64; 2],
    /// Server transmit path: dBFS → dBm.
    pub server_tx_dbfs_to_dbm: [f64; 2],
    /// RF front-end gain not under digital control: the max combined
    /// donor-receive + server-transmit offset across channels.
    pub analog_gain: f64,
}

/// Compute calibration constants from the factory table and the current
/// downlink/uplink attenuation registers.
///
/// Only attenuation indices 2–3 are meaningful; indices 0–1 are hold slots
/// the daemon never programs.
pub fn compute(
    table: &[f64],
    dl_atten: &[f64],
    ul_atten: &[f64],
) -> Result<CalibrationConstants, CalibrationError> {
    if table.len() < MIN_TABLE_LEN {
        return Err(CalibrationError::TableTooShort {
            entries: table.len(),
        });
    }

    let mut donor_rx = [0.0; 2];
    let mut server_rx = [0.0; 2];
    for ch in 0..2 {
        let dl = dl_atten.get(2 + ch).copied().unwrap_or(0.0);
        let ul = ul_atten.get(2 + ch).copied().unwrap_or(0.0);
        donor_rx[ch] = table[8] - dl * ATTEN_DB_PER_STEP + table[ch];
        server_rx[ch] = table[9] - ul * ATTEN_DB_PER_STEP + table[4 + ch];
    }
    let donor_tx = [table[2], table[3]];
    let server_tx = [table[6], table[7]];

    let analog_gain = (donor_rx[0] + server_tx[0]).max(donor_rx[1] + server_tx[1]);

    Ok(CalibrationConstants {
        donor_rx_dbm_to_dbfs: donor_rx,
        donor_tx_dbfs_to_dbm: donor_tx,
        server_rx_dbm_to_dbfs: server_rx,
        server_tx_dbfs_to_dbm: server_tx,
        analog_gain,
    })
}
