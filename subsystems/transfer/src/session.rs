//! # Session Coordinator
//!
//! The open handle onto the transfer engine. A session scans the DMA
//! subsystem once, owns one [`Channel`] per usable endpoint and arbitrates
//! bind, start, stop, wait and halt across them.
//!
//! ## Synchronization
//!
//! - **busy**: number of workers executing; the only thing `wait` examines
//! - **active**: bitmask of running slots
//! - **wait condition**: a mutex/condvar pair notified on every worker exit
//!   and on interruption
//! - **timeout**: milliseconds, re-read by workers before every hardware wait

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use iqdma_core::{
    ChannelMask, ChannelState, Direction, EngineConfig, Error, Result, TransferStats, UserAddr,
};
use iqdma_hal::{DmaSubsystem, PagePinner, PeripheralHooks};

use crate::binder::{BindRequest, BufferBinder};
use crate::channel::Channel;
use crate::directory::{ChannelDescriptor, Directory};
use crate::gate::{duplex_gate, GateRole};

// =============================================================================
// SHARED STATE
// =============================================================================

/// Session state shared with workers
pub(crate) struct SessionShared {
    pub(crate) dma: Arc<dyn DmaSubsystem>,
    pub(crate) hooks: PeripheralHooks,
    busy: AtomicUsize,
    active: AtomicU32,
    wait_lock: Mutex<()>,
    wait_cond: Condvar,
    timeout_ms: AtomicU64,
    interrupted: AtomicBool,
}

impl SessionShared {
    pub(crate) fn new(
        dma: Arc<dyn DmaSubsystem>,
        hooks: PeripheralHooks,
        timeout: Duration,
    ) -> Self {
        Self {
            dma,
            hooks,
            busy: AtomicUsize::new(0),
            active: AtomicU32::new(0),
            wait_lock: Mutex::new(()),
            wait_cond: Condvar::new(),
            timeout_ms: AtomicU64::new(duration_ms(timeout)),
            interrupted: AtomicBool::new(false),
        }
    }

    /// Current hardware wait timeout
    pub(crate) fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms.load(Ordering::Relaxed))
    }

    /// Account for a launched worker
    pub(crate) fn enter(&self, slot: usize) {
        self.active
            .fetch_or(ChannelMask::slot(slot).bits(), Ordering::SeqCst);
        self.busy.fetch_add(1, Ordering::SeqCst);
    }

    /// Account for an exited worker and wake waiters
    pub(crate) fn exit(&self, slot: usize) {
        self.active
            .fetch_and(!ChannelMask::slot(slot).bits(), Ordering::SeqCst);
        let _lock = self.wait_lock.lock().unwrap_or_else(|e| e.into_inner());
        self.busy.fetch_sub(1, Ordering::SeqCst);
        self.wait_cond.notify_all();
    }

    fn interrupt(&self) {
        let _lock = self.wait_lock.lock().unwrap_or_else(|e| e.into_inner());
        self.interrupted.store(true, Ordering::SeqCst);
        self.wait_cond.notify_all();
    }

    /// Block until no worker runs, or until interrupted
    fn wait_idle(&self) -> Result<()> {
        let mut lock = self.wait_lock.lock().unwrap_or_else(|e| e.into_inner());
        loop {
            if self.interrupted.swap(false, Ordering::SeqCst) {
                return Err(Error::Interrupted);
            }
            if self.busy.load(Ordering::SeqCst) == 0 {
                return Ok(());
            }
            lock = self
                .wait_cond
                .wait(lock)
                .unwrap_or_else(|e| e.into_inner());
        }
    }
}

impl core::fmt::Debug for SessionShared {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SessionShared")
            .field("busy", &self.busy)
            .field("active", &self.active)
            .field("timeout_ms", &self.timeout_ms)
            .field("interrupted", &self.interrupted)
            .finish_non_exhaustive()
    }
}

/// Wakes a blocked [`Session::wait`] from another thread
#[derive(Debug, Clone)]
pub struct Interrupter {
    shared: Arc<SessionShared>,
}

impl Interrupter {
    /// Interrupt the current (or next) wait
    pub fn interrupt(&self) {
        log::debug!("Session: wait interrupted");
        self.shared.interrupt();
    }
}

// =============================================================================
// SESSION
// =============================================================================

/// Transfer engine session
#[derive(Debug)]
pub struct Session {
    shared: Arc<SessionShared>,
    directory: Directory,
    channels: Vec<Channel>,
    binder: BufferBinder,
    closed: bool,
}

impl Session {
    /// Scan the DMA subsystem and set up one channel per usable endpoint
    pub fn open(
        dma: Arc<dyn DmaSubsystem>,
        pinner: Arc<dyn PagePinner>,
        hooks: PeripheralHooks,
        config: EngineConfig,
    ) -> Result<Self> {
        config.validate()?;
        let directory = Directory::scan(dma.as_ref())?;
        let timeout = config.default_timeout(directory.has_transform_engine());

        let channels = directory
            .iter()
            .enumerate()
            .map(|(slot, desc)| Channel::new(slot, desc.clone()))
            .collect();
        let binder = BufferBinder::new(dma.clone(), pinner, config);
        let shared = Arc::new(SessionShared::new(dma, hooks, timeout));

        log::info!(
            "Session: opened with {} channels, timeout {} ms",
            directory.len(),
            duration_ms(timeout)
        );
        Ok(Self {
            shared,
            directory,
            channels,
            binder,
            closed: false,
        })
    }

    /// Halt every worker and unbind every channel
    pub fn close(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if core::mem::replace(&mut self.closed, true) {
            return;
        }
        self.halt(ChannelMask::ALL);
        for channel in &self.channels {
            if channel.state() != ChannelState::Idle {
                let _ = self.unbind(channel.slot());
            }
        }
        log::info!("Session: closed");
    }

    /// Channel in `slot`
    pub fn channel(&self, slot: usize) -> Result<&Channel> {
        self.channels.get(slot).ok_or(Error::NoSuchChannel(slot))
    }

    fn selected(&self, mask: ChannelMask) -> impl Iterator<Item = &Channel> {
        mask.slots().filter_map(move |slot| self.channels.get(slot))
    }

    // =========================================================================
    // Discovery
    // =========================================================================

    /// Discovered channels, in slot order
    pub fn enumerate_channels(&self) -> Vec<Arc<ChannelDescriptor>> {
        self.directory.iter().cloned().collect()
    }

    /// Channel directory
    pub fn directory(&self) -> &Directory {
        &self.directory
    }

    // =========================================================================
    // Binding
    // =========================================================================

    /// Pin and map `words` sample words at `addr` for `slot`
    ///
    /// `chunk_words` sets the cyclic repetition length (0 = whole buffer).
    pub fn bind(
        &self,
        slot: usize,
        direction: Direction,
        addr: UserAddr,
        words: usize,
        chunk_words: usize,
    ) -> Result<()> {
        let channel = self.channel(slot)?;
        if channel.state() != ChannelState::Idle {
            return Err(Error::Busy);
        }
        let request = BindRequest::new(direction, addr, words).with_chunk(chunk_words);
        let transfer = self.binder.bind(channel.descriptor(), &request)?;
        channel.attach(transfer)?;
        log::debug!("Session: slot {} bound {} x{}", slot, direction, words);
        Ok(())
    }

    /// Release the transfer bound to `slot`
    pub fn unbind(&self, slot: usize) -> Result<()> {
        let transfer = self.channel(slot)?.detach()?;
        match Arc::try_unwrap(transfer) {
            Ok(transfer) => self.binder.unbind(transfer),
            Err(shared) => {
                log::warn!("Session: slot {} transfer still referenced", slot);
                drop(shared);
            },
        }
        Ok(())
    }

    // =========================================================================
    // Execution
    // =========================================================================

    /// Launch workers for the selected bound channels
    ///
    /// Returns the number of selections that could not be launched.
    pub fn start(&self, mask: ChannelMask, cyclic: bool) -> usize {
        self.launch(mask, cyclic).0
    }

    fn launch(&self, mask: ChannelMask, cyclic: bool) -> (usize, Option<Error>) {
        let mut gates = self.pair_gates(mask);
        let mut failures = 0;
        let mut first_error = None;

        for channel in self.selected(mask) {
            if channel.state() == ChannelState::Idle {
                continue;
            }
            let gate = gates[channel.slot()].take();
            if let Err(e) = channel.launch(&self.shared, cyclic, gate) {
                log::warn!("Session: slot {} not started: {}", channel.slot(), e);
                failures += 1;
                first_error.get_or_insert(e);
            }
        }
        (failures, first_error)
    }

    /// Gates for every selected receive/send pair that is ready to run
    fn pair_gates(&self, mask: ChannelMask) -> Vec<Option<GateRole>> {
        let mut gates: Vec<Option<GateRole>> = self.channels.iter().map(|_| None).collect();
        for rx in self.selected(mask) {
            let Some(peer) = self.directory.peer_of(rx.slot()) else {
                continue;
            };
            let Some(tx) = self.channels.get(peer) else {
                continue;
            };
            let ready = |c: &Channel, dir: Direction| {
                c.state() == ChannelState::Bound && c.direction() == Some(dir)
            };
            if mask.has_slot(peer) && ready(rx, Direction::Receive) && ready(tx, Direction::Send)
            {
                let (opener, waiter) = duplex_gate();
                gates[rx.slot()] = Some(GateRole::Open(opener));
                gates[tx.slot()] = Some(GateRole::Wait(waiter));
                log::debug!("Session: slot {} gated on slot {}", tx.slot(), rx.slot());
            }
        }
        gates
    }

    /// One-shot run of the selected channels, blocking until they finish
    pub fn trigger(&self, mask: ChannelMask) -> Result<()> {
        let (failures, first_error) = self.launch(mask, false);
        if failures > 0 {
            self.halt(mask);
            return Err(first_error.unwrap_or(Error::Busy));
        }
        self.wait(mask)
    }

    /// Clear the cyclic flag; workers finish their current repetition
    pub fn stop(&self, mask: ChannelMask) {
        for channel in self.selected(mask) {
            channel.stop();
        }
    }

    /// Block until no worker runs
    ///
    /// Interruption halts every worker and fails with `Interrupted`.
    /// Otherwise the first fault recorded on a selected channel is returned.
    pub fn wait(&self, mask: ChannelMask) -> Result<()> {
        if let Err(e) = self.shared.wait_idle() {
            self.halt(ChannelMask::ALL);
            return Err(e);
        }
        match self.selected(mask).find_map(Channel::fault) {
            Some(fault) => Err(fault),
            None => Ok(()),
        }
    }

    /// Forcibly stop the selected workers and wait for them to exit
    pub fn halt(&self, mask: ChannelMask) {
        for channel in self.selected(mask) {
            channel.halt(&self.shared);
        }
    }

    /// Handle for interrupting [`Session::wait`] from another thread
    pub fn interrupter(&self) -> Interrupter {
        Interrupter {
            shared: self.shared.clone(),
        }
    }

    // =========================================================================
    // Introspection
    // =========================================================================

    /// Statistics of `slot`
    pub fn stats(&self, slot: usize) -> Result<TransferStats> {
        Ok(self.channel(slot)?.stats())
    }

    /// Lifecycle state of `slot`
    pub fn state(&self, slot: usize) -> Result<ChannelState> {
        Ok(self.channel(slot)?.state())
    }

    /// Set the hardware wait timeout (at least one millisecond)
    pub fn set_timeout(&self, timeout: Duration) {
        self.shared
            .timeout_ms
            .store(duration_ms(timeout).max(1), Ordering::Relaxed);
    }

    /// Hardware wait timeout
    pub fn timeout(&self) -> Duration {
        self.shared.timeout()
    }

    /// Pages currently pinned by this session
    pub fn locked_pages(&self) -> usize {
        self.binder.ledger().locked()
    }

    /// Slots with a running worker
    pub fn active_mask(&self) -> ChannelMask {
        ChannelMask::from(self.shared.active.load(Ordering::SeqCst))
    }

    /// Number of running workers
    pub fn busy(&self) -> usize {
        self.shared.busy.load(Ordering::SeqCst)
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

static_assertions::assert_impl_all!(Session: Send, Sync);
static_assertions::assert_impl_all!(Interrupter: Send, Sync);

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::thread;

    use iqdma_core::{DirectionCaps, SizeError};
    use iqdma_hal::soft::{Fault, SoftDma, SoftPinner};
    use iqdma_hal::EndpointId;

    use super::*;

    const TX: usize = 0;
    const RX: usize = 1;
    const BASE: UserAddr = UserAddr::new(0x7f00_0000_0000);

    fn pair_dma() -> SoftDma {
        SoftDma::new()
            .with_endpoint(SoftDma::endpoint(0, 0, DirectionCaps::SEND))
            .with_endpoint(SoftDma::endpoint(1, 0, DirectionCaps::RECEIVE))
    }

    /// Same endpoints on separate controllers, so never paired
    fn independent_dma() -> SoftDma {
        SoftDma::new()
            .with_endpoint(SoftDma::endpoint(0, 0, DirectionCaps::SEND))
            .with_endpoint(SoftDma::endpoint(1, 1, DirectionCaps::RECEIVE))
    }

    fn open(dma: &Arc<SoftDma>, pinner: &Arc<SoftPinner>) -> Session {
        Session::open(
            dma.clone(),
            pinner.clone(),
            PeripheralHooks::new(),
            EngineConfig::default(),
        )
        .expect("open")
    }

    #[test]
    fn test_open_and_enumerate() {
        let dma = Arc::new(pair_dma());
        let session = open(&dma, &Arc::new(SoftPinner::new()));
        let channels = session.enumerate_channels();
        assert_eq!(channels.len(), 2);
        assert!(channels[TX].supports(Direction::Send));
        assert!(channels[RX].supports(Direction::Receive));
        assert_eq!(session.timeout(), Duration::from_millis(1000));
        assert_eq!(session.state(TX), Ok(ChannelState::Idle));
        assert_eq!(session.state(7), Err(Error::NoSuchChannel(7)));
        session.set_timeout(Duration::ZERO);
        assert_eq!(session.timeout(), Duration::from_millis(1));
        session.close();
    }

    #[test]
    fn test_bind_unbind_restores_ledger() {
        let dma = Arc::new(pair_dma());
        let pinner = Arc::new(SoftPinner::new());
        let session = open(&dma, &pinner);

        let before = session.locked_pages();
        session.bind(RX, Direction::Receive, BASE, 8192, 0).expect("bind");
        assert_eq!(session.locked_pages(), before + 8);
        assert_eq!(session.state(RX), Ok(ChannelState::Bound));
        session.unbind(RX).expect("unbind");
        assert_eq!(session.locked_pages(), before);
        assert_eq!(session.state(RX), Ok(ChannelState::Idle));
        assert_eq!(pinner.pinned(), 0);
        assert_eq!(dma.open_handles(), 0);
        assert_eq!(session.unbind(RX), Err(Error::NotBound));
    }

    #[test]
    fn test_granularity_violation_pins_nothing() {
        let dma = Arc::new(pair_dma());
        let pinner = Arc::new(SoftPinner::new());
        let session = open(&dma, &pinner);
        assert!(matches!(
            session.bind(TX, Direction::Send, BASE, 4100, 0),
            Err(Error::Size(SizeError::Granularity { .. }))
        ));
        assert_eq!(pinner.calls(), 0);
        assert_eq!(session.locked_pages(), 0);
        assert_eq!(session.state(TX), Ok(ChannelState::Idle));
    }

    #[test]
    fn test_rebind_is_busy() {
        let dma = Arc::new(pair_dma());
        let pinner = Arc::new(SoftPinner::new());
        let session = open(&dma, &pinner);
        session.bind(TX, Direction::Send, BASE, 4096, 0).expect("bind");
        let calls = pinner.calls();
        assert_eq!(
            session.bind(TX, Direction::Send, BASE, 4096, 0),
            Err(Error::Busy)
        );
        assert_eq!(pinner.calls(), calls);
    }

    #[test]
    fn test_pin_shortfall_leaves_channel_idle() {
        let dma = Arc::new(pair_dma());
        let pinner = Arc::new(SoftPinner::new().with_limit(3));
        let session = open(&dma, &pinner);
        assert_eq!(
            session.bind(TX, Direction::Send, BASE, 4096, 0),
            Err(Error::Pin {
                requested: 4,
                pinned: 3
            })
        );
        assert_eq!(session.state(TX), Ok(ChannelState::Idle));
        assert_eq!(session.locked_pages(), 0);
        assert_eq!(pinner.pinned(), 0);
        assert_eq!(dma.open_handles(), 0);
    }

    #[test]
    fn test_trigger_one_shot() {
        let dma = Arc::new(pair_dma());
        let session = open(&dma, &Arc::new(SoftPinner::new()));
        // 64 KiB = four 16 KiB bursts
        session.bind(TX, Direction::Send, BASE, 16384, 0).expect("bind");
        session.trigger(ChannelMask::slot(TX)).expect("trigger");

        let stats = session.stats(TX).expect("stats");
        assert_eq!(stats.submissions, 4);
        assert_eq!(stats.completions, 4);
        assert_eq!(stats.bytes, 65536);
        assert_eq!(stats.errors, 0);
        assert_eq!(session.state(TX), Ok(ChannelState::Bound));
        assert_eq!(session.busy(), 0);
        assert!(session.active_mask().is_empty());

        // Bound again, so it can be re-triggered
        session.trigger(ChannelMask::slot(TX)).expect("retrigger");
        assert_eq!(session.stats(TX).map(|s| s.completions), Ok(8));
    }

    #[test]
    fn test_enable_hooks_fire_once() {
        let dma = Arc::new(pair_dma());
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        let hooks = PeripheralHooks::new().with_send(move |slot| {
            assert_eq!(slot, TX);
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let session = Session::open(
            dma.clone(),
            Arc::new(SoftPinner::new()),
            hooks,
            EngineConfig::default(),
        )
        .expect("open");
        session.bind(TX, Direction::Send, BASE, 16384, 0).expect("bind");
        session.trigger(ChannelMask::slot(TX)).expect("trigger");
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_cyclic_stop_wait() {
        let dma = Arc::new(independent_dma().with_latency(Duration::from_micros(200)));
        let session = open(&dma, &Arc::new(SoftPinner::new()));
        session.bind(TX, Direction::Send, BASE, 4096, 0).expect("bind tx");
        session.bind(RX, Direction::Receive, BASE.offset(1 << 20), 4096, 0).expect("bind rx");

        let mask = ChannelMask::from(0b11);
        assert_eq!(session.start(mask, true), 0);
        thread::sleep(Duration::from_millis(20));
        session.stop(mask);
        session.wait(mask).expect("wait");

        for slot in [TX, RX] {
            let state = session.state(slot).expect("state");
            assert_ne!(state, ChannelState::Running);
            let stats = session.stats(slot).expect("stats");
            assert!(stats.completions >= 1);
            assert_eq!(stats.errors, 0);
        }
        assert_eq!(session.busy(), 0);
    }

    #[test]
    fn test_timeout_faults_until_rebind() {
        let dma = Arc::new(pair_dma());
        let session = open(&dma, &Arc::new(SoftPinner::new()));
        session.set_timeout(Duration::from_millis(50));
        dma.inject(EndpointId(0), 3, Fault::Timeout);

        session.bind(TX, Direction::Send, BASE, 16384, 0).expect("bind");
        assert_eq!(session.start(ChannelMask::slot(TX), true), 0);
        assert_eq!(session.wait(ChannelMask::slot(TX)), Err(Error::Timeout));
        assert_eq!(session.state(TX), Ok(ChannelState::Faulted));
        assert_eq!(session.busy(), 0);
        let stats = session.stats(TX).expect("stats");
        assert_eq!(stats.timeouts, 1);
        assert_eq!(stats.completions, 2);

        // Faulted stays faulted
        assert_eq!(session.start(ChannelMask::slot(TX), false), 1);
        assert_eq!(session.state(TX), Ok(ChannelState::Faulted));

        session.unbind(TX).expect("unbind");
        session.bind(TX, Direction::Send, BASE, 16384, 0).expect("rebind");
        assert_eq!(session.state(TX), Ok(ChannelState::Bound));
        assert_eq!(session.stats(TX), Ok(TransferStats::default()));
    }

    #[test]
    fn test_hardware_error_and_rejection() {
        let dma = Arc::new(pair_dma());
        let session = open(&dma, &Arc::new(SoftPinner::new()));
        dma.inject(EndpointId(0), 2, Fault::Error(0x7));
        dma.inject(EndpointId(1), 1, Fault::Reject);

        session.bind(TX, Direction::Send, BASE, 16384, 0).expect("bind tx");
        assert_eq!(
            session.trigger(ChannelMask::slot(TX)),
            Err(Error::HardwareStatus(0x7))
        );
        assert_eq!(session.stats(TX).map(|s| s.errors), Ok(1));

        session.bind(RX, Direction::Receive, BASE.offset(1 << 20), 4096, 0).expect("bind rx");
        assert_eq!(session.trigger(ChannelMask::slot(RX)), Err(Error::Submit));
        assert_eq!(session.state(RX), Ok(ChannelState::Faulted));
    }

    #[test]
    fn test_halt_keeps_busy_consistent() {
        let dma = Arc::new(pair_dma().with_latency(Duration::from_micros(200)));
        let pinner = Arc::new(SoftPinner::new());
        let session = open(&dma, &pinner);
        session.bind(TX, Direction::Send, BASE, 4096, 0).expect("bind");

        assert_eq!(session.start(ChannelMask::slot(TX), true), 0);
        thread::sleep(Duration::from_millis(10));
        session.halt(ChannelMask::ALL);
        assert_eq!(session.busy(), 0);
        assert_eq!(session.state(TX), Ok(ChannelState::Faulted));
        assert_eq!(session.wait(ChannelMask::slot(TX)), Err(Error::Interrupted));

        session.halt(ChannelMask::ALL);
        assert_eq!(session.busy(), 0);
        assert!(session.active_mask().is_empty());

        session.unbind(TX).expect("unbind");
        assert_eq!(session.locked_pages(), 0);
        assert_eq!(pinner.pinned(), 0);
    }

    #[test]
    fn test_halt_racing_natural_exit() {
        let dma = Arc::new(independent_dma().with_latency(Duration::from_micros(100)));
        let pinner = Arc::new(SoftPinner::new());
        let session = open(&dma, &pinner);

        for round in 0..50u64 {
            session.bind(TX, Direction::Send, BASE, 4096, 0).expect("bind");
            assert_eq!(session.start(ChannelMask::slot(TX), false), 0);
            thread::sleep(Duration::from_micros(round % 4 * 50));
            session.halt(ChannelMask::slot(TX));

            assert_eq!(session.busy(), 0);
            assert!(session.active_mask().is_empty());
            let state = session.state(TX).expect("state");
            assert!(matches!(state, ChannelState::Bound | ChannelState::Faulted));
            session.unbind(TX).expect("unbind");
        }
        assert_eq!(session.locked_pages(), 0);
        assert_eq!(pinner.pinned(), 0);
        assert_eq!(dma.open_handles(), 0);
    }

    #[test]
    fn test_halt_releases_stalled_worker() {
        let dma = Arc::new(pair_dma());
        let session = open(&dma, &Arc::new(SoftPinner::new()));
        session.set_timeout(Duration::from_secs(30));
        dma.inject(EndpointId(0), 1, Fault::Timeout);
        session.bind(TX, Direction::Send, BASE, 4096, 0).expect("bind");

        assert_eq!(session.start(ChannelMask::slot(TX), false), 0);
        thread::sleep(Duration::from_millis(10));
        session.halt(ChannelMask::slot(TX));
        assert_eq!(session.busy(), 0);
        assert_eq!(session.state(TX), Ok(ChannelState::Faulted));
        assert_eq!(session.stats(TX).map(|s| s.timeouts), Ok(0));
    }

    #[test]
    fn test_duplex_receive_issues_first() {
        let dma = Arc::new(pair_dma());
        let session = open(&dma, &Arc::new(SoftPinner::new()));
        session.bind(TX, Direction::Send, BASE, 8192, 0).expect("bind tx");
        session.bind(RX, Direction::Receive, BASE.offset(1 << 20), 8192, 0).expect("bind rx");

        session.trigger(ChannelMask::from(0b11)).expect("trigger");
        let rx = dma.first_issue(EndpointId(1)).expect("rx issued");
        let tx = dma.first_issue(EndpointId(0)).expect("tx issued");
        assert!(rx.seq < tx.seq);
        assert_eq!(rx.direction, Direction::Receive);
    }

    #[test]
    fn test_duplex_repeated_runs() {
        let dma = Arc::new(pair_dma());
        let session = open(&dma, &Arc::new(SoftPinner::new()));
        session.bind(TX, Direction::Send, BASE, 8192, 0).expect("bind tx");
        session.bind(RX, Direction::Receive, BASE.offset(1 << 20), 8192, 0).expect("bind rx");

        let mut seen = 0;
        for _ in 0..50 {
            session.trigger(ChannelMask::from(0b11)).expect("trigger");
            let journal = dma.journal();
            let run = &journal[seen..];
            let rx = run.iter().find(|r| r.endpoint == EndpointId(1)).expect("rx issued");
            let tx = run.iter().find(|r| r.endpoint == EndpointId(0)).expect("tx issued");
            assert!(rx.seq < tx.seq);
            seen = journal.len();
        }
        assert_eq!(session.stats(TX).map(|s| s.bytes), Ok(50 * 32768));
        assert_eq!(session.stats(RX).map(|s| s.bytes), Ok(50 * 32768));
    }

    #[test]
    fn test_short_completion_resubmits_tail() {
        let dma = Arc::new(independent_dma());
        let session = open(&dma, &Arc::new(SoftPinner::new()));
        dma.inject(EndpointId(0), 1, Fault::Short(4099));
        session.bind(TX, Direction::Send, BASE, 4096, 0).expect("bind");

        session.trigger(ChannelMask::slot(TX)).expect("trigger");
        let stats = session.stats(TX).expect("stats");
        assert_eq!(stats.bytes, 16384);
        assert_eq!(stats.submissions, 2);
        assert_eq!(session.state(TX), Ok(ChannelState::Bound));
        let journal = dma.journal();
        assert_eq!(journal.len(), 2);
        assert_eq!(journal[1].bytes, 16384 - 4096);
    }

    #[test]
    fn test_duplex_peer_lost() {
        let dma = Arc::new(pair_dma());
        let session = open(&dma, &Arc::new(SoftPinner::new()));
        dma.inject(EndpointId(1), 1, Fault::Reject);
        session.bind(TX, Direction::Send, BASE, 4096, 0).expect("bind tx");
        session.bind(RX, Direction::Receive, BASE.offset(1 << 20), 4096, 0).expect("bind rx");

        assert_eq!(session.start(ChannelMask::from(0b11), false), 0);
        assert_eq!(session.wait(ChannelMask::slot(TX)), Err(Error::PeerLost));
        assert_eq!(session.wait(ChannelMask::slot(RX)), Err(Error::Submit));
        assert!(dma.first_issue(EndpointId(0)).is_none());
    }

    #[test]
    fn test_interrupt_halts_everything() {
        let dma = Arc::new(pair_dma().with_latency(Duration::from_micros(200)));
        let session = open(&dma, &Arc::new(SoftPinner::new()));
        session.bind(TX, Direction::Send, BASE, 4096, 0).expect("bind");
        assert_eq!(session.start(ChannelMask::slot(TX), true), 0);

        let interrupter = session.interrupter();
        let t = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            interrupter.interrupt();
        });
        assert_eq!(session.wait(ChannelMask::slot(TX)), Err(Error::Interrupted));
        t.join().expect("join");

        assert_eq!(session.busy(), 0);
        assert_eq!(session.state(TX), Ok(ChannelState::Faulted));
    }

    #[test]
    fn test_idle_selections_are_skipped() {
        let dma = Arc::new(pair_dma());
        let session = open(&dma, &Arc::new(SoftPinner::new()));
        assert_eq!(session.start(ChannelMask::ALL, false), 0);
        assert_eq!(session.busy(), 0);
        assert_eq!(session.trigger(ChannelMask::ALL), Ok(()));
    }

    #[test]
    fn test_close_releases_everything() {
        let dma = Arc::new(pair_dma().with_latency(Duration::from_micros(200)));
        let pinner = Arc::new(SoftPinner::new());
        let session = open(&dma, &pinner);
        session.bind(TX, Direction::Send, BASE, 4096, 0).expect("bind");
        assert_eq!(session.start(ChannelMask::slot(TX), true), 0);
        session.close();
        assert_eq!(pinner.pinned(), 0);
        assert_eq!(dma.open_handles(), 0);
        assert_eq!(dma.mapped_chains(), 0);
    }
}
