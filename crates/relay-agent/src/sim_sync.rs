//! Simulated sync module for `--simulate` runs.

use relay_sync::at::{self, SyncChannel, SyncError};

/// In-memory sync module: acknowledges configuration commands, answers the
/// status query with a fixed locked-cell frame.
pub struct SimulatedSyncModule {
    /// Commands received, newest last.
    pub received: Vec<String>,
}

impl SimulatedSyncModule {
    pub fn new() -> Self {
        SimulatedSyncModule {
            received: Vec::new(),
        }
    }

    /// Status payload for a locked n77 cell: 2/7 slot split, RSSI -55 dBm,
    /// SS-RSRP -55 dBm, SNR 8 dB, cell id 482 (halves swapped on the wire),
    /// 30 kHz SCS, L-index 4.
    fn status_payload() -> Vec<u8> {
        let mut payload = Vec::new();
        payload.extend_from_slice(b"02070207040406376508E201");
        payload.push(1); // raw subcarrier-spacing selector
        payload.extend_from_slice(b"044D\r\n");
        payload
    }
}

impl Default for SimulatedSyncModule {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncChannel for SimulatedSyncModule {
    fn exchange(&mut self, command: &str) -> Result<Vec<Vec<u8>>, SyncError> {
        self.received.push(command.to_string());
        let echo = command.as_bytes().to_vec();
        if command == at::STATUS_QUERY {
            Ok(vec![echo, Self::status_payload()])
        } else {
            Ok(vec![echo, b"OK\r\n".to_vec()])
        }
    }
}
