//! Repeater control daemon.
//!
//! - Owns the reconciliation engine for one repeater device
//! - Re-applies the persisted configuration on start and after a detected
//!   device reboot
//! - Polls configuration/telemetry status and the TDD sync module on a
//!   fixed interval
//! - In `--simulate` mode, runs against in-memory device models for local
//!   development
//!
//! The device RPC transport is supplied by the surrounding runtime; this
//! binary links only the simulated register file, so the engine side
//! requires `--simulate`. The sync-module serial port is real whenever
//! `--sync-port` is given.

mod sim_sync;
mod sync_serial;

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use relay_core::reconcile::Engine;
use relay_core::rpc::RpcChannel;
use relay_core::sim::SimulatedRepeater;
use relay_core::store::ConfigStore;
use relay_sync::at::{self, SyncChannel};
use relay_sync::frame::TddStatusFrame;

/// Repeater control daemon.
#[derive(Parser, Debug)]
#[command(name = "relay-agent", about = "RF repeater control daemon")]
struct Cli {
    /// Sync-module serial port; in-memory sync module when omitted under
    /// --simulate.
    #[arg(long)]
    sync_port: Option<String>,

    /// Persisted configuration path.
    #[arg(long, default_value = "repeater-config.json")]
    config_path: PathBuf,

    /// Status poll interval in seconds.
    #[arg(long, default_value_t = 5)]
    poll_interval: u64,

    /// Settle time after re-applying a saved configuration, in seconds.
    #[arg(long, default_value_t = 3)]
    settle_secs: u64,

    /// Run against the simulated repeater device.
    #[arg(long, default_value_t = false)]
    simulate: bool,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    tracing::info!(
        simulate = cli.simulate,
        config_path = %cli.config_path.display(),
        "relay-agent starting"
    );

    if !cli.simulate {
        anyhow::bail!(
            "no device RPC transport is linked into this binary; \
             run with --simulate (optionally with a real --sync-port)"
        );
    }

    let store = ConfigStore::new(&cli.config_path);
    let engine = Engine::new(
        SimulatedRepeater::new(),
        store,
        Duration::from_secs(cli.settle_secs),
    )?;

    let mut sync: Box<dyn SyncChannel> = match &cli.sync_port {
        Some(port) => {
            tracing::info!(port = %port, "opening sync-module serial port");
            Box::new(sync_serial::SerialSyncPort::open(port)?)
        }
        None => Box::new(sim_sync::SimulatedSyncModule::new()),
    };

    init_sync_module(engine.config(), sync.as_mut());
    run(engine, sync, Duration::from_secs(cli.poll_interval))
}

/// Probe the sync module and push the current band/lock/schedule to it.
/// Best-effort: the module keeps running on its previous settings if any
/// command fails.
fn init_sync_module(config: &relay_core::config::Configuration, sync: &mut dyn SyncChannel) {
    match sync.exchange(at::PROBE) {
        Ok(lines) if at::response_ok(&lines) => {}
        Ok(_) => tracing::warn!("sync module probe not acknowledged"),
        Err(e) => {
            tracing::warn!(error = %e, "sync module probe failed");
            return;
        }
    }

    let s = &config.schedule;
    let sync_config = at::encode_schedule(
        s.slot1_ul as u8,
        s.slot1_dl as u8,
        s.slot2_ul as u8,
        s.slot2_dl as u8,
        s.ssf_symbols_ul as u8,
        s.ssf_symbols_gp as u8,
        s.ssf_symbols_dl as u8,
    );
    match at::configure(sync, at::DEFAULT_BAND, config.arfcn, &sync_config) {
        Ok(true) => tracing::info!(arfcn = config.arfcn, "sync module configured"),
        Ok(false) => tracing::warn!("sync module rejected configuration"),
        Err(e) => tracing::warn!(error = %e, "sync module configuration failed"),
    }
}

/// Single-threaded poll loop. One cycle failing is logged and the loop
/// carries on; the reboot path inside `check_alive` handles recovery.
fn run<C: RpcChannel>(
    mut engine: Engine<C>,
    mut sync: Box<dyn SyncChannel>,
    poll: Duration,
) -> anyhow::Result<()> {
    loop {
        if let Err(e) = poll_once(&mut engine, sync.as_mut()) {
            tracing::warn!(error = %e, "poll cycle failed");
        }
        std::thread::sleep(poll);
    }
}

fn poll_once<C: RpcChannel>(
    engine: &mut Engine<C>,
    sync: &mut dyn SyncChannel,
) -> anyhow::Result<()> {
    if engine.check_alive()? {
        tracing::warn!("device re-initialized after reboot");
    }

    let (status, sync_status) = engine.fetch_status()?;
    tracing::info!(
        gain = %status.gain,
        dl_rx = %status.dlrxpwr,
        ul_rx = %status.ulrxpwr,
        sync = %sync_status.status,
        cellid = %sync_status.cellid,
        "repeater status"
    );

    match sync.exchange(at::STATUS_QUERY) {
        Ok(lines) => match TddStatusFrame::decode(&lines) {
            Ok(frame) => tracing::info!(
                band = %frame.band_label(),
                cell_id = frame.cell_id,
                snr_db = frame.snr_db,
                rssi_dbm = frame.rssi_dbm,
                scs_khz = frame.scs_khz(),
                "sync module frame"
            ),
            Err(e) => tracing::warn!(error = %e, "undecodable sync frame"),
        },
        Err(e) => tracing::warn!(error = %e, "sync module exchange failed"),
    }
    Ok(())
}
