//! Core logic for the repeater control daemon.
//!
//! This crate contains:
//! - **Configuration model** — typed repeater configuration and the validated
//!   change-set produced by diffing a partial update against it
//! - **Calibration model** — pure computation of gain/power offset constants
//!   from the factory calibration table and attenuator settings
//! - **Telemetry decoder** — pure conversion of raw device readings into
//!   display-ready status fields
//! - **Reconciliation engine** — applies configuration changes to the remote
//!   device in a safe order and keeps calibration current
//! - **Persistence** — durable save/load of the configuration blob
//! - **RPC channel** — the injected transport seam to the remote device
//!
//! All device interaction goes through the [`rpc::RpcChannel`] trait; nothing
//! in this crate touches hardware directly.

pub mod calibration;
pub mod config;
pub mod reconcile;
pub mod rpc;
pub mod sim;
pub mod store;
pub mod telemetry;
