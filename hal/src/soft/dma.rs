//! Soft DMA engine

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use iqdma_core::{BusAddr, Direction, DirectionCaps, Error, Result};
use spin::Mutex;

use crate::dma::{
    ChannelHandle, CompletionSignal, CompletionStatus, DmaSubsystem, Endpoint, EndpointCaps,
    EndpointId, Segment,
};

// =============================================================================
// FAULT SCRIPT
// =============================================================================

/// Failure injected into one submission
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Never complete (the waiter times out)
    Timeout,
    /// Complete with a hardware error status
    Error(u32),
    /// Refuse the submission outright
    Reject,
    /// Complete, but report only this many bytes moved
    Short(usize),
}

/// One issued submission, in global issue order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IssueRecord {
    /// Global sequence number (starts at 1)
    pub seq: u64,
    /// Endpoint it was issued on
    pub endpoint: EndpointId,
    /// Direction of the handle
    pub direction: Direction,
    /// Bytes covered
    pub bytes: usize,
}

// =============================================================================
// HANDLE STATE
// =============================================================================

#[derive(Debug)]
struct Queued {
    signal: CompletionSignal,
    bytes: usize,
    fault: Option<Fault>,
}

#[derive(Debug)]
struct HandleState {
    endpoint: EndpointId,
    direction: Direction,
    submissions: u64,
    queued: Vec<Queued>,
    stalled: Vec<CompletionSignal>,
}

// =============================================================================
// SOFT DMA
// =============================================================================

/// Software DMA framework
#[derive(Debug)]
pub struct SoftDma {
    endpoints: Vec<Endpoint>,
    latency: Duration,
    bus_offset: u64,
    faults: Mutex<BTreeMap<(EndpointId, u64), Fault>>,
    handles: Mutex<BTreeMap<ChannelHandle, HandleState>>,
    claimed: Mutex<BTreeSet<EndpointId>>,
    journal: Mutex<Vec<IssueRecord>>,
    next_handle: AtomicU32,
    seq: AtomicU64,
    mapped_chains: AtomicUsize,
    fail_next_map: AtomicBool,
}

impl SoftDma {
    /// Device with no endpoints
    pub fn new() -> Self {
        Self {
            endpoints: Vec::new(),
            latency: Duration::ZERO,
            bus_offset: 0x8000_0000_0000,
            faults: Mutex::new(BTreeMap::new()),
            handles: Mutex::new(BTreeMap::new()),
            claimed: Mutex::new(BTreeSet::new()),
            journal: Mutex::new(Vec::new()),
            next_handle: AtomicU32::new(1),
            seq: AtomicU64::new(0),
            mapped_chains: AtomicUsize::new(0),
            fail_next_map: AtomicBool::new(false),
        }
    }

    /// A usable streaming endpoint with soft defaults
    ///
    /// 32-byte granularity, 16 KiB bursts, 64 MiB transfer limit.
    pub fn endpoint(id: u32, controller: u32, directions: DirectionCaps) -> Endpoint {
        let mut caps = EndpointCaps::PRIVATE | EndpointCaps::SLAVE | EndpointCaps::SCATTER_GATHER;
        if directions.contains(DirectionCaps::SEND) {
            caps |= EndpointCaps::SEND;
        }
        if directions.contains(DirectionCaps::RECEIVE) {
            caps |= EndpointCaps::RECEIVE;
        }
        Endpoint {
            id: EndpointId(id),
            controller,
            caps,
            alignment: 32,
            max_transfer: 64 << 20,
            max_burst: 16 << 10,
            device_name: format!("soft-dma.{}", id),
            driver_name: String::from("iqdma-soft"),
        }
    }

    /// Add an endpoint
    pub fn with_endpoint(mut self, endpoint: Endpoint) -> Self {
        self.endpoints.push(endpoint);
        self
    }

    /// Delay every completion by `latency`
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Script `fault` for the `nth` submission (1-based) on `endpoint`
    pub fn inject(&self, endpoint: EndpointId, nth: u64, fault: Fault) {
        self.faults.lock().insert((endpoint, nth), fault);
    }

    /// Make the next `map_chain` call fail
    pub fn fail_next_map(&self) {
        self.fail_next_map.store(true, Ordering::SeqCst);
    }

    /// Every issued submission so far
    pub fn journal(&self) -> Vec<IssueRecord> {
        self.journal.lock().clone()
    }

    /// First issued submission on `endpoint`
    pub fn first_issue(&self, endpoint: EndpointId) -> Option<IssueRecord> {
        self.journal
            .lock()
            .iter()
            .find(|r| r.endpoint == endpoint)
            .copied()
    }

    /// Handles currently claimed
    pub fn open_handles(&self) -> usize {
        self.handles.lock().len()
    }

    /// Chains currently mapped
    pub fn mapped_chains(&self) -> usize {
        self.mapped_chains.load(Ordering::SeqCst)
    }

    fn deliver(&self, signal: CompletionSignal, status: CompletionStatus) {
        if self.latency.is_zero() {
            signal.complete(status);
            return;
        }
        let latency = self.latency;
        let spawned = thread::Builder::new()
            .name(String::from("iqdma-soft-irq"))
            .spawn(move || {
                thread::sleep(latency);
                signal.complete(status);
            });
        if let Err(e) = spawned {
            // The signal went down with the closure; the waiter reads Aborted
            log::error!("SoftDma: completion thread spawn failed: {}", e);
        }
    }
}

impl Default for SoftDma {
    fn default() -> Self {
        Self::new()
    }
}

impl DmaSubsystem for SoftDma {
    fn enumerate(&self) -> Vec<Endpoint> {
        self.endpoints.clone()
    }

    fn request(&self, endpoint: EndpointId, direction: Direction) -> Result<ChannelHandle> {
        let ep = self
            .endpoints
            .iter()
            .find(|e| e.id == endpoint)
            .ok_or(Error::Config)?;
        if !ep.caps.directions().supports(direction) {
            return Err(Error::Unsupported);
        }
        if !self.claimed.lock().insert(endpoint) {
            return Err(Error::Busy);
        }

        let handle = ChannelHandle(self.next_handle.fetch_add(1, Ordering::SeqCst));
        self.handles.lock().insert(
            handle,
            HandleState {
                endpoint,
                direction,
                submissions: 0,
                queued: Vec::new(),
                stalled: Vec::new(),
            },
        );
        log::trace!("SoftDma: {} claimed as handle {}", endpoint, handle.0);
        Ok(handle)
    }

    fn map_chain(
        &self,
        _handle: ChannelHandle,
        segments: &mut [Segment],
        _direction: Direction,
    ) -> Result<()> {
        if self.fail_next_map.swap(false, Ordering::SeqCst) {
            return Err(Error::MapFailed);
        }
        for seg in segments.iter_mut() {
            seg.addr = BusAddr::new(seg.addr.raw() | self.bus_offset);
        }
        self.mapped_chains.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn unmap_chain(&self, _handle: ChannelHandle, _segments: &[Segment], _direction: Direction) {
        self.mapped_chains.fetch_sub(1, Ordering::SeqCst);
    }

    fn submit(
        &self,
        handle: ChannelHandle,
        segments: &[Segment],
        signal: CompletionSignal,
    ) -> Result<()> {
        let mut handles = self.handles.lock();
        let state = handles.get_mut(&handle).ok_or(Error::Submit)?;
        state.submissions += 1;

        let fault = self.faults.lock().remove(&(state.endpoint, state.submissions));
        if fault == Some(Fault::Reject) {
            return Err(Error::Submit);
        }

        let bytes = segments.iter().map(|s| s.len).sum();
        state.queued.push(Queued {
            signal,
            bytes,
            fault,
        });
        Ok(())
    }

    fn issue_pending(&self, handle: ChannelHandle) {
        let (queued, endpoint, direction) = {
            let mut handles = self.handles.lock();
            let Some(state) = handles.get_mut(&handle) else {
                return;
            };
            (
                core::mem::take(&mut state.queued),
                state.endpoint,
                state.direction,
            )
        };

        for q in queued {
            let seq = self.seq.fetch_add(1, Ordering::SeqCst) + 1;
            self.journal.lock().push(IssueRecord {
                seq,
                endpoint,
                direction,
                bytes: q.bytes,
            });

            match q.fault {
                Some(Fault::Timeout) => {
                    if let Some(state) = self.handles.lock().get_mut(&handle) {
                        state.stalled.push(q.signal);
                    }
                },
                Some(Fault::Error(code)) => self.deliver(q.signal, CompletionStatus::Error(code)),
                Some(Fault::Short(done)) => self.deliver(
                    q.signal,
                    CompletionStatus::Complete {
                        bytes: done.min(q.bytes),
                    },
                ),
                _ => self.deliver(q.signal, CompletionStatus::Complete { bytes: q.bytes }),
            }
        }
    }

    fn terminate(&self, handle: ChannelHandle) {
        let pending = {
            let mut handles = self.handles.lock();
            let Some(state) = handles.get_mut(&handle) else {
                return;
            };
            let mut pending = core::mem::take(&mut state.stalled);
            pending.extend(state.queued.drain(..).map(|q| q.signal));
            pending
        };
        for signal in pending {
            signal.complete(CompletionStatus::Aborted);
        }
    }

    fn release(&self, handle: ChannelHandle) {
        self.terminate(handle);
        if let Some(state) = self.handles.lock().remove(&handle) {
            self.claimed.lock().remove(&state.endpoint);
            log::trace!("SoftDma: handle {} released", handle.0);
        }
    }
}
