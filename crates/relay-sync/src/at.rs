//! AT command surface of the sync module.
//!
//! Every exchange is one command line out, a handful of response lines
//! back. Responses echo the command on the first line; the second line
//! carries the payload or the `OK` acknowledgement.

use std::time::Duration;

use thiserror::Error;

/// Serial link parameters: 115200 baud, 8N1, no flow control.
pub const BAUD_RATE: u32 = 115_200;

/// Per-read timeout; line collection stops at the first quiet gap.
pub const READ_TIMEOUT: Duration = Duration::from_millis(100);

/// NR band the module is configured for unless told otherwise.
pub const DEFAULT_BAND: u32 = 77;

/// Liveness probe.
pub const PROBE: &str = "AT\r\n";

/// Status query; answered with the binary status frame.
pub const STATUS_QUERY: &str = "AT*L1DEBUG=0400\r\n";

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("sync port I/O: {0}")]
    Io(#[from] std::io::Error),
    #[error("sync module gave no response to `{command}`")]
    NoResponse { command: String },
}

/// Serial exchange with the sync module: write one command, collect the
/// response lines until the port goes quiet.
pub trait SyncChannel {
    fn exchange(&mut self, command: &str) -> Result<Vec<Vec<u8>>, SyncError>;
}

/// Band setup. The leading arguments select the fixed RF path profile.
pub fn band_setup(band: u32) -> String {
    format!("AT*BAND=16,10,15,0,0,{band}\r\n")
}

/// Lock the cell search to one ARFCN.
pub fn cell_lock(arfcn: u32) -> String {
    format!("AT*CELLLOCK=1,3,{arfcn}\r\n")
}

/// Vendor debug command carrying an encoded frame schedule.
pub fn schedule_debug(sync_config: &str) -> String {
    format!("AT*L1DEBUG=0300{sync_config}\r\n")
}

/// Encode a frame schedule as the 14-character nibble string the debug
/// command expects, in module order: slot1 UL/DL, slot2 UL/DL, then the
/// special-subframe UL/GP/DL symbol counts. Each value occupies the low
/// nibble of a two-character field.
pub fn encode_schedule(
    slot1_ul: u8,
    slot1_dl: u8,
    slot2_ul: u8,
    slot2_dl: u8,
    ssf_ul: u8,
    ssf_gp: u8,
    ssf_dl: u8,
) -> String {
    [slot1_ul, slot1_dl, slot2_ul, slot2_dl, ssf_ul, ssf_gp, ssf_dl]
        .iter()
        .map(|v| format!("0{:X}", v & 0x0F))
        .collect()
}

/// Whether a response acknowledged the command: at least an echo line plus
/// a second line containing `OK`.
pub fn response_ok(lines: &[Vec<u8>]) -> bool {
    lines.len() >= 2 && lines[1].windows(2).any(|w| w == b"OK")
}

/// Configure the module: band, cell lock, frame schedule. Returns whether
/// all three commands were acknowledged.
pub fn configure(
    chan: &mut dyn SyncChannel,
    band: u32,
    arfcn: u32,
    sync_config: &str,
) -> Result<bool, SyncError> {
    let band_ok = response_ok(&chan.exchange(&band_setup(band))?);
    let lock_ok = response_ok(&chan.exchange(&cell_lock(arfcn))?);
    let sched_ok = response_ok(&chan.exchange(&schedule_debug(sync_config))?);
    Ok(band_ok && lock_ok && sched_ok)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Channel fake that acknowledges everything and records the commands.
    struct AckChannel {
        sent: Vec<String>,
    }

    impl SyncChannel for AckChannel {
        fn exchange(&mut self, command: &str) -> Result<Vec<Vec<u8>>, SyncError> {
            self.sent.push(command.to_string());
            Ok(vec![command.as_bytes().to_vec(), b"OK\r\n".to_vec()])
        }
    }

    #[test]
    fn command_builders() {
        assert_eq!(band_setup(77), "AT*BAND=16,10,15,0,0,77\r\n");
        assert_eq!(cell_lock(648_672), "AT*CELLLOCK=1,3,648672\r\n");
        assert_eq!(
            schedule_debug("03000203000404"),
            "AT*L1DEBUG=030003000203000404\r\n"
        );
    }

    #[test]
    fn schedule_encoding_is_one_nibble_per_field() {
        // slot1 ul/dl, slot2 ul/dl, ssf ul/gp/dl
        assert_eq!(encode_schedule(3, 0, 0, 2, 3, 0, 0), "03000002030000");
        assert_eq!(encode_schedule(2, 7, 2, 7, 4, 4, 6), "02070207040406");
        // values above one nibble are masked, never widen the field
        assert_eq!(encode_schedule(0x1F, 0, 0, 0, 0, 0, 0).len(), 14);
    }

    #[test]
    fn response_ok_needs_echo_and_ack() {
        assert!(response_ok(&[b"AT\r\n".to_vec(), b"OK\r\n".to_vec()]));
        assert!(!response_ok(&[b"AT\r\n".to_vec()]));
        assert!(!response_ok(&[
            b"AT\r\n".to_vec(),
            b"+CME ERROR\r\n".to_vec()
        ]));
        assert!(!response_ok(&[]));
    }

    #[test]
    fn configure_issues_all_three_commands() {
        let mut chan = AckChannel { sent: Vec::new() };
        let ok = configure(&mut chan, DEFAULT_BAND, 648_672, "02070207040406").unwrap();
        assert!(ok);
        assert_eq!(
            chan.sent,
            vec![
                "AT*BAND=16,10,15,0,0,77\r\n",
                "AT*CELLLOCK=1,3,648672\r\n",
                "AT*L1DEBUG=030002070207040406\r\n",
            ]
        );
    }
}
