//! Dedicated thread that drains device events into the gate.
//!
//! Event sources push into an [`EventSender`]; the worker blocks on the
//! channel between events. Dropping every sender is the shutdown signal: the
//! worker finishes whatever is queued, then exits.

use crate::event::DeviceEvent;
use crate::gate::Gate;
use crate::platform::DevicePlatform;
use log::{debug, error, info};
use std::io;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

pub type EventSender = Sender<DeviceEvent>;

/// Handle to a running worker thread.
pub struct Worker {
    handle: JoinHandle<u64>,
}

impl Worker {
    /// Wait for the worker to drain its queue. Returns how many events it handled.
    pub fn join(self) -> u64 {
        match self.handle.join() {
            Ok(processed) => processed,
            Err(_) => {
                error!("event worker panicked");
                0
            }
        }
    }
}

/// Create the event channel and start the worker consuming it.
pub fn spawn_worker<P>(gate: Arc<Gate<P>>) -> io::Result<(EventSender, Worker)>
where
    P: DevicePlatform + 'static,
{
    let (tx, rx) = mpsc::channel();
    let handle = thread::Builder::new()
        .name("usbgate-worker".into())
        .spawn(move || run(gate, rx))?;
    Ok((tx, Worker { handle }))
}

fn run<P: DevicePlatform>(gate: Arc<Gate<P>>, rx: Receiver<DeviceEvent>) -> u64 {
    info!("event worker started");
    let mut processed = 0;
    for event in rx {
        let decision = gate.handle_event(&event);
        debug!(
            "{} {} -> {decision:?}",
            event.action,
            event.describe()
        );
        processed += 1;
    }
    info!("event worker stopped after {processed} events");
    processed
}
