//! TDD sync-module protocol.
//!
//! The sync module hangs off a serial port and speaks a small AT command
//! set: band/cell-lock setup, a vendor debug command carrying the frame
//! schedule, and a status query answered with a fixed-layout ASCII-hex
//! frame. This crate builds the commands and decodes the status frame; the
//! serial transport itself is behind [`at::SyncChannel`].

pub mod at;
pub mod frame;
