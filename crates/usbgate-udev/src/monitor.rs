//! udev netlink event source registered with the tokio reactor.

use crate::device::{action_of, event_from_device};
use log::{debug, info};
use tokio::io::unix::AsyncFd;
use tokio::io::Interest;
use udev::MonitorBuilder;
use usbgate_core::error::GateResult;
use usbgate_core::EventSender;

/// Forward block-device uevents to the worker until it goes away.
///
/// The task sleeps on the monitor socket's readiness, so nothing runs
/// between events. Returns `Ok` once the worker side of the channel is gone.
/// The udev handles are not `Send`; drive this future on the task that
/// created it (e.g. inside `select!` in `main`).
pub async fn forward_udev_events(tx: EventSender) -> GateResult<()> {
    let socket = MonitorBuilder::new()?.match_subsystem("block")?.listen()?;
    let mut socket = AsyncFd::with_interest(socket, Interest::READABLE)?;
    info!("listening for udev block events");

    loop {
        let mut guard = socket.readable_mut().await?;
        while let Some(event) = guard.get_inner_mut().next() {
            let device = event.device();
            let record = event_from_device(&device, action_of(&device));
            debug!("uevent {} {}", record.action, record.describe());
            if tx.send(record).is_err() {
                info!("event worker gone; udev monitor stopping");
                return Ok(());
            }
        }
        guard.clear_ready();
    }
}
