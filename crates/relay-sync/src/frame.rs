//! Status frame decoder.
//!
//! The status query is answered with a fixed-layout ASCII-hex payload on
//! the second response line. Most fields are two-character hex numbers;
//! the subcarrier-spacing byte at offset 24 is raw. The module emits the
//! four cell-id characters with the 16-bit halves swapped, so the decoder
//! reorders them before parsing.

use thiserror::Error;

/// Shortest payload the fixed layout can be read from.
pub const MIN_PAYLOAD_LEN: usize = 29;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("status response too short: {lines} line(s), need the payload on line 2")]
    TooShort { lines: usize },
    #[error("status payload truncated at {len} bytes, need {MIN_PAYLOAD_LEN}")]
    Truncated { len: usize },
    #[error("malformed hex field at payload offset {offset}")]
    Malformed { offset: usize },
}

/// One decoded sync-module status frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TddStatusFrame {
    pub ul_slot1: u8,
    pub dl_slot1: u8,
    pub ul_slot2: u8,
    pub dl_slot2: u8,
    /// Special-subframe symbol counts.
    pub ul_symbols: u8,
    pub gp_symbols: u8,
    pub dl_symbols: u8,
    /// Received signal strength; the module reports the magnitude.
    pub rssi_dbm: i16,
    /// SS-RSRP, offset-156 encoded on the wire.
    pub ss_rsrp_dbm: i16,
    pub snr_db: i16,
    pub cell_id: u16,
    /// Raw subcarrier-spacing selector byte.
    pub sc_spacing: u8,
    pub l_index: u8,
    /// NR band number.
    pub band: u8,
}

impl TddStatusFrame {
    /// Decode a status-query response; the payload is the second line.
    pub fn decode(lines: &[Vec<u8>]) -> Result<Self, FrameError> {
        if lines.len() < 2 {
            return Err(FrameError::TooShort { lines: lines.len() });
        }
        Self::decode_payload(&lines[1])
    }

    /// Decode the raw payload line.
    pub fn decode_payload(payload: &[u8]) -> Result<Self, FrameError> {
        if payload.len() < MIN_PAYLOAD_LEN {
            return Err(FrameError::Truncated { len: payload.len() });
        }
        let mut buf = [0u8; MIN_PAYLOAD_LEN];
        buf.copy_from_slice(&payload[..MIN_PAYLOAD_LEN]);
        // cell id arrives with its 16-bit halves swapped
        buf[20] = payload[22];
        buf[21] = payload[23];
        buf[22] = payload[20];
        buf[23] = payload[21];

        let cell_hi = hex_byte(&buf, 20)?;
        let cell_lo = hex_byte(&buf, 22)?;

        Ok(TddStatusFrame {
            ul_slot1: hex_byte(&buf, 0)?,
            dl_slot1: hex_byte(&buf, 2)?,
            ul_slot2: hex_byte(&buf, 4)?,
            dl_slot2: hex_byte(&buf, 6)?,
            ul_symbols: hex_byte(&buf, 8)?,
            gp_symbols: hex_byte(&buf, 10)?,
            dl_symbols: hex_byte(&buf, 12)?,
            rssi_dbm: -(hex_byte(&buf, 14)? as i16),
            ss_rsrp_dbm: hex_byte(&buf, 16)? as i16 - 156,
            snr_db: sign_extend7(hex_byte(&buf, 18)?),
            cell_id: (cell_hi as u16) << 8 | cell_lo as u16,
            sc_spacing: buf[24],
            l_index: hex_byte(&buf, 25)?,
            band: hex_byte(&buf, 27)?,
        })
    }

    /// Display band label, e.g. `n77`.
    pub fn band_label(&self) -> String {
        format!("n{}", self.band)
    }

    /// Subcarrier spacing in kHz.
    pub fn scs_khz(&self) -> u32 {
        if self.sc_spacing == 0 {
            15
        } else {
            30
        }
    }
}

/// Two ASCII-hex characters at `offset`.
fn hex_byte(payload: &[u8], offset: usize) -> Result<u8, FrameError> {
    let field = &payload[offset..offset + 2];
    let text = std::str::from_utf8(field).map_err(|_| FrameError::Malformed { offset })?;
    u8::from_str_radix(text, 16).map_err(|_| FrameError::Malformed { offset })
}

/// 8-bit two's-complement reinterpretation of the SNR field.
fn sign_extend7(value: u8) -> i16 {
    let v = value as i16;
    -(v & 0x80) | (v & 0x7f)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    // offsets: slots/symbols 0..14, rssi 14, rsrp 16, snr 18,
    // cell id 20..24 (halves swapped), raw scs byte 24, l-index 25, band 27
    fn payload() -> Vec<u8> {
        // keep the layout readable: splice the raw scs byte in at 24
        let mut p = Vec::new();
        p.extend_from_slice(b"020702070404063765851234"); // 0..24
        p.push(1); // raw scs selector
        p.extend_from_slice(b"044D"); // l-index, band
        p
    }

    #[test]
    fn decodes_the_full_layout() {
        let frame = TddStatusFrame::decode_payload(&payload()).unwrap();
        assert_eq!(frame.ul_slot1, 2);
        assert_eq!(frame.dl_slot1, 7);
        assert_eq!(frame.ul_slot2, 2);
        assert_eq!(frame.dl_slot2, 7);
        assert_eq!(frame.ul_symbols, 4);
        assert_eq!(frame.gp_symbols, 4);
        assert_eq!(frame.dl_symbols, 6);
        assert_eq!(frame.rssi_dbm, -55); // 0x37
        assert_eq!(frame.ss_rsrp_dbm, -55); // 0x65 - 156
        assert_eq!(frame.snr_db, -123); // 0x85
        assert_eq!(frame.l_index, 4);
        assert_eq!(frame.band, 77); // 0x4D
        assert_eq!(frame.band_label(), "n77");
        assert_eq!(frame.scs_khz(), 30);
    }

    #[test]
    fn cell_id_halves_are_swapped_on_the_wire() {
        // wire text "1234" means 0x3412 once reordered
        let frame = TddStatusFrame::decode_payload(&payload()).unwrap();
        assert_eq!(frame.cell_id, 0x3412);
    }

    #[test]
    fn scs_zero_byte_means_15khz() {
        let mut p = payload();
        p[24] = 0;
        let frame = TddStatusFrame::decode_payload(&p).unwrap();
        assert_eq!(frame.scs_khz(), 15);
    }

    #[test]
    fn snr_sign_extension() {
        for (raw, expected) in [
            (0x00u8, 0i16),
            (0x7F, 127),
            (0x80, -128),
            (0x85, -123),
            (0xFF, -1),
        ] {
            let mut p = payload();
            p[18..20].copy_from_slice(format!("{raw:02X}").as_bytes());
            let frame = TddStatusFrame::decode_payload(&p).unwrap();
            assert_eq!(frame.snr_db, expected, "raw 0x{raw:02X}");
        }
    }

    #[test]
    fn missing_payload_line() {
        assert_eq!(
            TddStatusFrame::decode(&[b"AT*L1DEBUG=0400\r\n".to_vec()]),
            Err(FrameError::TooShort { lines: 1 })
        );
        assert_eq!(
            TddStatusFrame::decode(&[]),
            Err(FrameError::TooShort { lines: 0 })
        );
    }

    #[test]
    fn truncated_payload() {
        let p = payload();
        assert_eq!(
            TddStatusFrame::decode_payload(&p[..20]),
            Err(FrameError::Truncated { len: 20 })
        );
    }

    #[test]
    fn non_hex_field_reports_its_offset() {
        let mut p = payload();
        p[14..16].copy_from_slice(b"ZZ");
        assert_eq!(
            TddStatusFrame::decode_payload(&p),
            Err(FrameError::Malformed { offset: 14 })
        );
    }

    proptest! {
        #[test]
        fn snr_matches_twos_complement(raw in any::<u8>()) {
            let mut p = payload();
            p[18..20].copy_from_slice(format!("{raw:02X}").as_bytes());
            let frame = TddStatusFrame::decode_payload(&p).unwrap();
            prop_assert_eq!(frame.snr_db, (raw as i8) as i16);
        }

        #[test]
        fn slot_fields_round_trip(ul1 in 0u8..=255, dl1 in 0u8..=255) {
            let mut p = payload();
            p[0..2].copy_from_slice(format!("{ul1:02X}").as_bytes());
            p[2..4].copy_from_slice(format!("{dl1:02X}").as_bytes());
            let frame = TddStatusFrame::decode_payload(&p).unwrap();
            prop_assert_eq!(frame.ul_slot1, ul1);
            prop_assert_eq!(frame.dl_slot1, dl1);
        }
    }
}
