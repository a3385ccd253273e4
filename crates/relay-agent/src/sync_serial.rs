//! Serial transport to the TDD sync module.

use std::io::{self, Read, Write};

use serialport::{ClearBuffer, DataBits, FlowControl, Parity, SerialPort, StopBits};

use relay_sync::at::{SyncChannel, SyncError, BAUD_RATE, READ_TIMEOUT};

/// Sync-module serial port: 115200 baud, 8N1, no flow control. One
/// command/response exchange at a time; response collection stops at the
/// first 100 ms quiet gap.
pub struct SerialSyncPort {
    port: Box<dyn SerialPort>,
}

impl SerialSyncPort {
    pub fn open(path: &str) -> Result<Self, SyncError> {
        let port = serialport::new(path, BAUD_RATE)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(READ_TIMEOUT)
            .open()
            .map_err(io::Error::from)?;
        Ok(SerialSyncPort { port })
    }
}

impl SyncChannel for SerialSyncPort {
    fn exchange(&mut self, command: &str) -> Result<Vec<Vec<u8>>, SyncError> {
        // stale bytes from a previous exchange would shift the line layout
        self.port
            .clear(ClearBuffer::All)
            .map_err(io::Error::from)?;
        self.port.write_all(command.as_bytes())?;

        let mut raw = Vec::new();
        let mut buf = [0u8; 256];
        loop {
            match self.port.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => raw.extend_from_slice(&buf[..n]),
                Err(e) if e.kind() == io::ErrorKind::TimedOut => break,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(split_lines(&raw))
    }
}

/// Split a raw byte stream into lines, keeping the terminators (the AT
/// decoder works on whole response lines).
fn split_lines(raw: &[u8]) -> Vec<Vec<u8>> {
    let mut lines = Vec::new();
    let mut start = 0;
    for (i, &b) in raw.iter().enumerate() {
        if b == b'\n' {
            lines.push(raw[start..=i].to_vec());
            start = i + 1;
        }
    }
    if start < raw.len() {
        lines.push(raw[start..].to_vec());
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_keeps_terminators() {
        let lines = split_lines(b"AT\r\nOK\r\n");
        assert_eq!(lines, vec![b"AT\r\n".to_vec(), b"OK\r\n".to_vec()]);
    }

    #[test]
    fn split_keeps_unterminated_tail() {
        let lines = split_lines(b"AT\r\npartial");
        assert_eq!(lines, vec![b"AT\r\n".to_vec(), b"partial".to_vec()]);
    }

    #[test]
    fn split_empty_stream() {
        assert!(split_lines(b"").is_empty());
    }
}
