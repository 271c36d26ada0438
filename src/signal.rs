//! Termination signal handling.
//!
//! SIGINT, SIGTERM and SIGHUP are turned into a single event on a channel
//! that the controller selects on alongside rotation events.

use crate::Result;
use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};
use log::debug;

/// Installs the process-wide handler. Can only be called once per process.
pub fn termination_channel() -> Result<Receiver<()>> {
    let (tx, rx) = bounded(1);
    ctrlc::set_handler(move || notify(&tx))?;
    Ok(rx)
}

fn notify(tx: &Sender<()>) {
    match tx.try_send(()) {
        Ok(()) => debug!("Termination signal received"),
        Err(TrySendError::Full(())) => debug!("Termination already pending"),
        Err(TrySendError::Disconnected(())) => {}
    }
}
