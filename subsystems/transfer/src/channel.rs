//! # Channel
//!
//! One channel per discovered endpoint. A channel owns at most one bound
//! transfer and at most one worker thread at a time.
//!
//! ```text
//!            bind              launch
//!   ┌──────┐ ────▶ ┌───────┐ ───────▶ ┌─────────┐
//!   │ Idle │       │ Bound │          │ Running │
//!   └──────┘ ◀──── └───────┘ ◀─────── └─────────┘
//!       ▲   unbind            done        │
//!       │                                 │ timeout / error / halt
//!       │          unbind           ┌─────────┐
//!       └───────────────────────────│ Faulted │
//!                                   └─────────┘
//! ```
//!
//! State, cyclic flag, abort flag, statistics and the last fault live in
//! [`ChannelShared`] so the worker can update them without the channel
//! lock. The transfer and the worker handle sit behind the lock and are
//! only swapped while no worker runs.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use iqdma_core::{ChannelState, Direction, Error, Result, StatsCounters, TransferStats};
use spin::Mutex;

use crate::descriptor::TransferDescriptor;
use crate::directory::ChannelDescriptor;
use crate::gate::GateRole;
use crate::session::SessionShared;
use crate::worker::Worker;

// =============================================================================
// SHARED STATE
// =============================================================================

/// Channel state visible to its worker
#[derive(Debug)]
pub(crate) struct ChannelShared {
    state: AtomicU8,
    pub(crate) cyclic: AtomicBool,
    pub(crate) abort: AtomicBool,
    pub(crate) stats: StatsCounters,
    fault: Mutex<Option<Error>>,
}

impl ChannelShared {
    pub(crate) fn new() -> Self {
        Self {
            state: AtomicU8::new(ChannelState::Idle as u8),
            cyclic: AtomicBool::new(false),
            abort: AtomicBool::new(false),
            stats: StatsCounters::new(),
            fault: Mutex::new(None),
        }
    }

    pub(crate) fn state(&self) -> ChannelState {
        ChannelState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub(crate) fn set_state(&self, state: ChannelState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    pub(crate) fn set_fault(&self, fault: Option<Error>) {
        *self.fault.lock() = fault;
    }

    pub(crate) fn fault(&self) -> Option<Error> {
        *self.fault.lock()
    }
}

#[derive(Debug, Default)]
struct ChannelInner {
    transfer: Option<Arc<TransferDescriptor>>,
    worker: Option<JoinHandle<()>>,
}

// =============================================================================
// CHANNEL
// =============================================================================

/// One DMA channel slot
#[derive(Debug)]
pub struct Channel {
    slot: usize,
    descriptor: Arc<ChannelDescriptor>,
    shared: Arc<ChannelShared>,
    inner: Mutex<ChannelInner>,
}

impl Channel {
    pub(crate) fn new(slot: usize, descriptor: Arc<ChannelDescriptor>) -> Self {
        Self {
            slot,
            descriptor,
            shared: Arc::new(ChannelShared::new()),
            inner: Mutex::new(ChannelInner::default()),
        }
    }

    /// Slot index
    pub fn slot(&self) -> usize {
        self.slot
    }

    /// Endpoint capabilities
    pub fn descriptor(&self) -> &Arc<ChannelDescriptor> {
        &self.descriptor
    }

    /// Lifecycle state
    pub fn state(&self) -> ChannelState {
        self.shared.state()
    }

    /// Statistics snapshot
    pub fn stats(&self) -> TransferStats {
        self.shared.stats.snapshot()
    }

    /// Error the last worker exited with
    pub fn fault(&self) -> Option<Error> {
        self.shared.fault()
    }

    /// Direction of the bound transfer
    pub fn direction(&self) -> Option<Direction> {
        self.inner.lock().transfer.as_ref().map(|td| td.direction())
    }

    /// Install a freshly bound transfer
    ///
    /// On failure the descriptor is handed back to the caller's drop.
    pub(crate) fn attach(&self, transfer: TransferDescriptor) -> Result<()> {
        let mut inner = self.inner.lock();
        if self.state() != ChannelState::Idle || inner.transfer.is_some() {
            return Err(Error::Busy);
        }
        if let Some(worker) = inner.worker.take() {
            let _ = worker.join();
        }
        inner.transfer = Some(Arc::new(transfer));
        self.shared.stats.reset();
        self.shared.set_fault(None);
        self.shared.abort.store(false, Ordering::SeqCst);
        self.shared.cyclic.store(false, Ordering::SeqCst);
        self.shared.set_state(ChannelState::Bound);
        Ok(())
    }

    /// Take the bound transfer out, leaving the channel idle
    ///
    /// The previous worker has fully exited when this returns, so the
    /// returned descriptor is the last reference.
    pub(crate) fn detach(&self) -> Result<Arc<TransferDescriptor>> {
        let (transfer, worker) = {
            let mut inner = self.inner.lock();
            match self.state() {
                ChannelState::Running => return Err(Error::Busy),
                ChannelState::Idle => return Err(Error::NotBound),
                _ => {},
            }
            let transfer = inner.transfer.take().ok_or(Error::NotBound)?;
            self.shared.set_state(ChannelState::Idle);
            self.shared.set_fault(None);
            (transfer, inner.worker.take())
        };
        if let Some(worker) = worker {
            let _ = worker.join();
        }
        Ok(transfer)
    }

    /// Spawn a worker for the bound transfer
    pub(crate) fn launch(
        &self,
        session: &Arc<SessionShared>,
        cyclic: bool,
        gate: Option<GateRole>,
    ) -> Result<()> {
        let mut inner = self.inner.lock();
        match self.state() {
            ChannelState::Bound => {},
            ChannelState::Idle => return Err(Error::NotBound),
            ChannelState::Running | ChannelState::Faulted => return Err(Error::Busy),
        }
        let transfer = inner.transfer.clone().ok_or(Error::NotBound)?;
        if let Some(previous) = inner.worker.take() {
            let _ = previous.join();
        }

        let direction = transfer.direction();
        self.shared
            .cyclic
            .store(cyclic && direction.is_send(), Ordering::SeqCst);
        self.shared.abort.store(false, Ordering::SeqCst);
        self.shared.set_fault(None);
        self.shared.set_state(ChannelState::Running);
        session.enter(self.slot);

        let worker = Worker::new(
            self.slot,
            transfer,
            self.shared.clone(),
            session.clone(),
            gate,
        );
        match worker.spawn(format!("iqdma-{}-{}", direction.as_str(), self.slot)) {
            Ok(handle) => {
                inner.worker = Some(handle);
                log::debug!(
                    "Channel {}: launched {}{}",
                    self.slot,
                    direction,
                    if self.shared.cyclic.load(Ordering::SeqCst) { " cyclic" } else { "" }
                );
                Ok(())
            },
            Err(e) => {
                log::error!("Channel {}: worker spawn failed: {}", self.slot, e);
                self.shared.cyclic.store(false, Ordering::SeqCst);
                self.shared.set_state(ChannelState::Bound);
                session.exit(self.slot);
                Err(Error::SpawnFailed)
            },
        }
    }

    /// Let the worker finish its current repetition and exit
    pub(crate) fn stop(&self) {
        self.shared.cyclic.store(false, Ordering::SeqCst);
    }

    /// Abort the worker and wait for it to exit
    pub(crate) fn halt(&self, session: &SessionShared) {
        let worker = {
            let mut inner = self.inner.lock();
            if self.state() == ChannelState::Running {
                self.shared.abort.store(true, Ordering::SeqCst);
                self.shared.cyclic.store(false, Ordering::SeqCst);
                if let Some(handle) = inner.transfer.as_ref().and_then(|td| td.handle()) {
                    session.dma.terminate(handle);
                }
                log::debug!("Channel {}: halt requested", self.slot);
            }
            inner.worker.take()
        };
        if let Some(worker) = worker {
            if worker.join().is_err() {
                log::error!("Channel {}: worker panicked", self.slot);
            }
        }
    }
}

static_assertions::assert_impl_all!(Channel: Send, Sync);
