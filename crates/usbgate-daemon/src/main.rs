use anyhow::{Context, Result};
use log::{error, info, warn};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::{
    select,
    signal::{
        self,
        unix::{signal as unix_signal, SignalKind},
    },
};
use usbgate_core::{config::DEFAULT_CONFIG_PATH, logging, spawn_worker, Gate, GateConfig};
use usbgate_udev::{forward_udev_events, UdevPlatform};

mod status;

#[tokio::main(flavor = "multi_thread")]
async fn main() {
    if let Err(err) = run().await {
        error!("daemon exit: {err:?}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    logging::init("info");
    let config_path =
        std::env::var("USBGATE_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    let config = GateConfig::load_or_default(&config_path)
        .with_context(|| format!("load config {config_path}"))?;

    info!("usbgate daemon booting (config: {config_path})");

    let status_addr: SocketAddr = config
        .daemon
        .status_addr
        .parse()
        .context("parse daemon.status_addr")?;

    let gate = Arc::new(Gate::from_config(&config, UdevPlatform::from_config(&config)));
    announce_present_devices(&gate);

    let (tx, worker) = spawn_worker(gate.clone()).context("spawn event worker")?;
    let mut status_handle = tokio::spawn(status::serve(gate.clone(), status_addr));
    let mut hangup = unix_signal(SignalKind::hangup()).context("install SIGHUP handler")?;
    let mut terminate = unix_signal(SignalKind::terminate()).context("install SIGTERM handler")?;

    let outcome = {
        let source = forward_udev_events(tx);
        tokio::pin!(source);

        loop {
            select! {
                res = &mut source => break res.context("udev event source"),
                res = &mut status_handle => break match res {
                    Ok(inner) => inner.context("status endpoint"),
                    Err(join) => Err(join).context("status endpoint task"),
                },
                _ = hangup.recv() => {
                    info!("received SIGHUP; reloading registry");
                    gate.reload_registry();
                }
                _ = terminate.recv() => {
                    info!("received SIGTERM");
                    break Ok(());
                }
                _ = signal::ctrl_c() => {
                    info!("received shutdown signal");
                    break Ok(());
                }
            }
        }
    };

    // The event sender went away with the source, so the worker drains and exits.
    status_handle.abort();
    let processed = tokio::task::spawn_blocking(move || worker.join())
        .await
        .context("join event worker")?;
    info!("usbgate daemon stopped ({processed} events handled)");

    outcome
}

/// Devices already plugged in are not trusted until they are re-attached; say so.
fn announce_present_devices(gate: &Gate<UdevPlatform>) {
    match gate.list_connected_candidates() {
        Ok(candidates) if candidates.is_empty() => {}
        Ok(candidates) => {
            for candidate in candidates {
                info!(
                    "device {} already attached at startup; re-insert it to authenticate",
                    candidate.id
                );
            }
        }
        Err(err) => warn!("startup device scan failed: {err}"),
    }
}
