//! # Worker Execution Loop
//!
//! One thread per running channel. Each iteration carves a burst-sized
//! window out of the segment chain, submits it, issues it and waits for
//! the completion with the session timeout:
//!
//! ```text
//!   ┌──────────────────────────────────────────────────────────────┐
//!   │  window ─▶ submit ─▶ [gate wait] ─▶ issue ─▶ [gate open,     │
//!   │                                              enable hook]    │
//!   │     ▲                                            │           │
//!   │     │            remaining > 0 / cyclic          ▼           │
//!   │     └──────────────────────────────────────── wait ──▶ exit  │
//!   └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Bracketed steps run on the first iteration only. Whatever way the loop
//! ends, [`ExitGuard`] publishes the final state and releases the session's
//! busy count exactly once.

use std::io;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use iqdma_core::{ChannelState, Error, Result, WORD_BYTES};
use iqdma_hal::{completion, CompletionStatus, DmaSubsystem};

use crate::channel::ChannelShared;
use crate::descriptor::TransferDescriptor;
use crate::gate::GateRole;
use crate::session::SessionShared;

// =============================================================================
// EXIT GUARD
// =============================================================================

/// Publishes a worker's exit, including on unwind
struct ExitGuard {
    slot: usize,
    channel: Arc<ChannelShared>,
    session: Arc<SessionShared>,
    outcome: Option<Result<()>>,
}

impl Drop for ExitGuard {
    fn drop(&mut self) {
        match self.outcome.take() {
            Some(Ok(())) => {
                self.channel.set_state(ChannelState::Bound);
                log::debug!("Worker {}: done", self.slot);
            },
            Some(Err(e)) => {
                self.channel.set_fault(Some(e));
                self.channel.set_state(ChannelState::Faulted);
                log::warn!("Worker {}: faulted: {}", self.slot, e);
            },
            None => {
                self.channel.set_fault(Some(Error::Interrupted));
                self.channel.set_state(ChannelState::Faulted);
                log::error!("Worker {}: unwound without an outcome", self.slot);
            },
        }
        self.session.exit(self.slot);
    }
}

// =============================================================================
// WORKER
// =============================================================================

/// Everything a worker thread needs
pub(crate) struct Worker {
    slot: usize,
    transfer: Arc<TransferDescriptor>,
    channel: Arc<ChannelShared>,
    session: Arc<SessionShared>,
    gate: Option<GateRole>,
}

impl Worker {
    pub(crate) fn new(
        slot: usize,
        transfer: Arc<TransferDescriptor>,
        channel: Arc<ChannelShared>,
        session: Arc<SessionShared>,
        gate: Option<GateRole>,
    ) -> Self {
        Self {
            slot,
            transfer,
            channel,
            session,
            gate,
        }
    }

    /// Start the thread
    pub(crate) fn spawn(self, name: String) -> io::Result<JoinHandle<()>> {
        thread::Builder::new().name(name).spawn(move || self.run())
    }

    fn run(mut self) {
        let mut guard = ExitGuard {
            slot: self.slot,
            channel: self.channel.clone(),
            session: self.session.clone(),
            outcome: None,
        };
        guard.outcome = Some(self.transfer_loop());
    }

    fn transfer_loop(&mut self) -> Result<()> {
        let td = self.transfer.clone();
        let dma: &dyn DmaSubsystem = self.session.dma.as_ref();
        let handle = td.handle().ok_or(Error::NotBound)?;
        let direction = td.direction();
        let chain = td.chain();
        let burst = td.burst_bytes();
        let stats = &self.channel.stats;

        let mut cursor = chain.cursor();
        let mut cookie = 0u64;
        let mut first = true;
        td.set_remaining(td.words());

        loop {
            if self.channel.abort.load(Ordering::SeqCst) {
                return Err(Error::Interrupted);
            }

            let words = td.remaining_words();
            let window = chain.take(&mut cursor, burst.min(words * WORD_BYTES));
            let bytes: usize = window.iter().map(|s| s.len).sum();
            if bytes == 0 {
                log::error!("Worker {}: chain exhausted with {} words left", self.slot, words);
                return Err(Error::ChainExhausted { words });
            }

            cookie += 1;
            let (signal, token) = completion(cookie);
            stats.record_submission();
            if let Err(e) = dma.submit(handle, &window, signal) {
                stats.record_error();
                log::warn!("Worker {}: submission {} rejected: {}", self.slot, cookie, e);
                return Err(Error::Submit);
            }

            if first {
                match self.gate.take() {
                    Some(GateRole::Wait(waiter)) => {
                        if let Err(e) = waiter.wait(&self.channel.abort) {
                            dma.terminate(handle);
                            return Err(e);
                        }
                    },
                    other => self.gate = other,
                }
            }

            let issued = Instant::now();
            dma.issue_pending(handle);
            log::trace!(
                "Worker {}: issued #{} ({} bytes at {})",
                self.slot,
                cookie,
                bytes,
                cursor.position() - bytes
            );

            if first {
                if let Some(GateRole::Open(opener)) = self.gate.take() {
                    opener.open();
                }
                self.session.hooks.fire(direction, self.slot);
                first = false;
            }

            if self.channel.abort.load(Ordering::SeqCst) {
                dma.terminate(handle);
                return Err(Error::Interrupted);
            }

            match dma.wait(&token, self.session.timeout()) {
                CompletionStatus::Complete { bytes: done } => {
                    // only whole words count as moved
                    let done = done.min(bytes) / WORD_BYTES * WORD_BYTES;
                    stats.record_completion(done, issued.elapsed());
                    if done < bytes {
                        let back = cursor.position() - (bytes - done);
                        chain.seek(&mut cursor, back);
                    }

                    let left = td.remaining_words().saturating_sub(done / WORD_BYTES);
                    if left > 0 {
                        td.set_remaining(left);
                    } else if self.channel.cyclic.load(Ordering::SeqCst) {
                        td.set_remaining(td.chunk_words());
                        chain.seek(&mut cursor, 0);
                    } else if self.channel.abort.load(Ordering::SeqCst) {
                        // halt clears cyclic after raising abort
                        return Err(Error::Interrupted);
                    } else {
                        td.set_remaining(0);
                        return Ok(());
                    }
                },
                CompletionStatus::Error(code) => {
                    stats.record_error();
                    return Err(Error::HardwareStatus(code));
                },
                CompletionStatus::TimedOut => {
                    stats.record_timeout();
                    dma.terminate(handle);
                    return Err(Error::Timeout);
                },
                CompletionStatus::Aborted => return Err(Error::Interrupted),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use iqdma_core::{BusAddr, Direction, DirectionCaps};
    use iqdma_hal::soft::{Fault, SoftDma, SoftPinner};
    use iqdma_hal::{EndpointId, PeripheralHooks};

    use super::*;
    use crate::binder::PinLedger;

    fn run_worker(dma: Arc<SoftDma>, chain_bytes: usize, words: usize) -> Arc<ChannelShared> {
        let mut td = TransferDescriptor::new(
            Direction::Send,
            words,
            dma.clone(),
            Arc::new(SoftPinner::new()),
            Arc::new(PinLedger::new(16)),
        );
        td.handle = Some(dma.request(EndpointId(0), Direction::Send).expect("claim"));
        td.burst_bytes = 16 * 1024;
        td.chain.push(BusAddr::new(0x8000), chain_bytes);

        let session = Arc::new(SessionShared::new(
            dma,
            PeripheralHooks::new(),
            Duration::from_millis(200),
        ));
        let channel = Arc::new(ChannelShared::new());
        channel.set_state(ChannelState::Running);
        session.enter(0);

        Worker::new(0, Arc::new(td), channel.clone(), session, None)
            .spawn("iqdma-test".into())
            .expect("spawn")
            .join()
            .expect("join");
        channel
    }

    fn device() -> Arc<SoftDma> {
        Arc::new(SoftDma::new().with_endpoint(SoftDma::endpoint(0, 0, DirectionCaps::SEND)))
    }

    #[test]
    fn test_short_chain_faults() {
        let channel = run_worker(device(), 2048, 1024);
        assert_eq!(channel.state(), ChannelState::Faulted);
        assert_eq!(channel.fault(), Some(Error::ChainExhausted { words: 512 }));
        let stats = channel.stats.snapshot();
        assert_eq!(stats.completions, 1);
        assert_eq!(stats.bytes, 2048);
    }

    #[test]
    fn test_partial_word_completion_rounds_down() {
        let dma = device();
        dma.inject(EndpointId(0), 1, Fault::Short(1027));
        let channel = run_worker(dma.clone(), 4096, 1024);

        assert_eq!(channel.state(), ChannelState::Bound);
        assert_eq!(channel.fault(), None);
        let stats = channel.stats.snapshot();
        assert_eq!(stats.bytes, 4096);
        assert_eq!(stats.submissions, 2);

        // Resubmission starts at the first word not moved
        let journal = dma.journal();
        assert_eq!(journal.len(), 2);
        assert_eq!(journal[1].bytes, 4096 - 1024);
    }
}
