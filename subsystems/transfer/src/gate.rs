//! # Full-Duplex Start Gate
//!
//! Paired channels share one gate per `start()`. The receive worker opens
//! it once its first submission is issued; the send worker holds its first
//! submission back until then, so the peripheral never transmits into a
//! receiver that is not yet accepting.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crossbeam::channel::{bounded, Receiver, RecvTimeoutError, Sender};
use iqdma_core::{Error, Result};

/// Interval at which a blocked waiter re-checks its abort flag
const GATE_POLL: Duration = Duration::from_millis(5);

/// Create a single-shot gate
pub fn duplex_gate() -> (GateOpener, GateWaiter) {
    let (tx, rx) = bounded(1);
    (GateOpener { tx }, GateWaiter { rx })
}

/// Receive side of the gate
#[derive(Debug)]
pub struct GateOpener {
    tx: Sender<()>,
}

impl GateOpener {
    /// Release the waiting peer
    pub fn open(self) {
        // A peer that never launched has dropped its end
        let _ = self.tx.send(());
    }
}

/// Send side of the gate
#[derive(Debug)]
pub struct GateWaiter {
    rx: Receiver<()>,
}

impl GateWaiter {
    /// Block until the gate opens
    ///
    /// Fails with `PeerLost` when the opener was dropped unopened, and with
    /// `Interrupted` once `abort` is raised.
    pub fn wait(self, abort: &AtomicBool) -> Result<()> {
        loop {
            match self.rx.recv_timeout(GATE_POLL) {
                Ok(()) => return Ok(()),
                Err(RecvTimeoutError::Disconnected) => return Err(Error::PeerLost),
                Err(RecvTimeoutError::Timeout) => {
                    if abort.load(Ordering::SeqCst) {
                        return Err(Error::Interrupted);
                    }
                },
            }
        }
    }
}

/// Part a worker plays in its pair's start ordering
#[derive(Debug)]
pub enum GateRole {
    /// Open the gate after the first issue (receive)
    Open(GateOpener),
    /// Wait on the gate before the first issue (send)
    Wait(GateWaiter),
}
