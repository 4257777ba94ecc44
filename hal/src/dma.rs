//! # DMA Subsystem Interface
//!
//! Endpoints, channel handles, hardware segments and the completion
//! signal that ties a submission to the worker waiting on it.

use std::fmt;
use std::time::Duration;

use crossbeam::channel::{bounded, Receiver, RecvTimeoutError, Sender};
use iqdma_core::{BusAddr, Direction, DirectionCaps, Result};

// =============================================================================
// ENDPOINT
// =============================================================================

/// Hardware identity tag of a DMA endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EndpointId(pub u32);

impl fmt::Display for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ep{}", self.0)
    }
}

bitflags::bitflags! {
    /// Capability flags reported by the DMA subsystem
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct EndpointCaps: u32 {
        /// Endpoint may be claimed exclusively
        const PRIVATE = 1 << 0;
        /// Endpoint supports slave (peripheral-paced) transfers
        const SLAVE = 1 << 1;
        /// Memory to device
        const SEND = 1 << 2;
        /// Device to memory
        const RECEIVE = 1 << 3;
        /// Endpoint belongs to a high-throughput transform engine (FFT etc.)
        const TRANSFORM_ENGINE = 1 << 4;
        /// Endpoint can chain scatter-gather segments
        const SCATTER_GATHER = 1 << 5;
    }
}

impl EndpointCaps {
    /// Check if the engine may use this endpoint
    #[inline]
    pub const fn is_usable(self) -> bool {
        self.contains(Self::PRIVATE.union(Self::SLAVE))
    }

    /// Directions served
    pub fn directions(self) -> DirectionCaps {
        let mut caps = DirectionCaps::empty();
        if self.contains(Self::SEND) {
            caps |= DirectionCaps::SEND;
        }
        if self.contains(Self::RECEIVE) {
            caps |= DirectionCaps::RECEIVE;
        }
        caps
    }
}

/// A transfer endpoint as reported by the DMA subsystem
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    /// Identity tag used to request a channel handle
    pub id: EndpointId,
    /// Controller the endpoint lives on (full-duplex peers share one)
    pub controller: u32,
    /// Capability flags
    pub caps: EndpointCaps,
    /// Byte granularity every transfer must respect
    pub alignment: usize,
    /// Largest transfer the endpoint accepts, in bytes
    pub max_transfer: usize,
    /// Largest single submission, in bytes
    pub max_burst: usize,
    /// Device name
    pub device_name: String,
    /// Driver name
    pub driver_name: String,
}

// =============================================================================
// CHANNEL HANDLE
// =============================================================================

/// Exclusive claim on a hardware channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ChannelHandle(pub u32);

// =============================================================================
// SEGMENT
// =============================================================================

/// One physically addressed piece of a transfer, as the hardware sees it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment {
    /// Device-visible start address
    pub addr: BusAddr,
    /// Length in bytes
    pub len: usize,
    /// Chain terminator
    pub last: bool,
}

// =============================================================================
// COMPLETION
// =============================================================================

/// Outcome of one submission
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionStatus {
    /// Transfer finished; `bytes` were moved
    Complete {
        /// Bytes moved
        bytes: usize,
    },
    /// Hardware reported a failure status
    Error(u32),
    /// Submission was terminated before completing
    Aborted,
    /// No completion within the wait timeout (produced by the waiter only)
    TimedOut,
}

/// Device side of a completion, handed to [`DmaSubsystem::submit`]
#[derive(Debug)]
pub struct CompletionSignal {
    cookie: u64,
    tx: Sender<CompletionStatus>,
}

impl CompletionSignal {
    /// Submission cookie
    pub fn cookie(&self) -> u64 {
        self.cookie
    }

    /// Deliver the outcome; a second delivery is impossible by construction
    pub fn complete(self, status: CompletionStatus) {
        // The waiter may have given up already
        let _ = self.tx.send(status);
    }
}

/// Waiter side of a completion
#[derive(Debug)]
pub struct CompletionToken {
    cookie: u64,
    rx: Receiver<CompletionStatus>,
}

impl CompletionToken {
    /// Submission cookie
    pub fn cookie(&self) -> u64 {
        self.cookie
    }

    /// Block for the outcome
    ///
    /// A signal dropped without completing reads as [`CompletionStatus::Aborted`].
    pub fn wait(&self, timeout: Duration) -> CompletionStatus {
        match self.rx.recv_timeout(timeout) {
            Ok(status) => status,
            Err(RecvTimeoutError::Timeout) => CompletionStatus::TimedOut,
            Err(RecvTimeoutError::Disconnected) => CompletionStatus::Aborted,
        }
    }
}

/// Create a single-use completion pair
pub fn completion(cookie: u64) -> (CompletionSignal, CompletionToken) {
    let (tx, rx) = bounded(1);
    (CompletionSignal { cookie, tx }, CompletionToken { cookie, rx })
}

// =============================================================================
// DMA SUBSYSTEM TRAIT
// =============================================================================

/// The platform DMA engine framework
///
/// Implementations must be shareable across worker threads; every method
/// may be called concurrently for different handles.
pub trait DmaSubsystem: Send + Sync {
    /// List every endpoint the platform exposes
    fn enumerate(&self) -> Vec<Endpoint>;

    /// Claim a channel on `endpoint` for `direction`
    fn request(&self, endpoint: EndpointId, direction: Direction) -> Result<ChannelHandle>;

    /// Assign device-visible addresses to a segment chain
    ///
    /// On entry each segment carries the frame address of its page; on
    /// success it carries the bus address the device must use.
    fn map_chain(
        &self,
        handle: ChannelHandle,
        segments: &mut [Segment],
        direction: Direction,
    ) -> Result<()>;

    /// Undo [`map_chain`](Self::map_chain)
    fn unmap_chain(&self, handle: ChannelHandle, segments: &[Segment], direction: Direction);

    /// Queue one descriptor covering `segments`; `signal` fires on completion
    fn submit(
        &self,
        handle: ChannelHandle,
        segments: &[Segment],
        signal: CompletionSignal,
    ) -> Result<()>;

    /// Start everything queued on `handle`
    fn issue_pending(&self, handle: ChannelHandle);

    /// Block on a submission's completion
    fn wait(&self, token: &CompletionToken, timeout: Duration) -> CompletionStatus {
        token.wait(timeout)
    }

    /// Abort everything in flight on `handle`
    fn terminate(&self, handle: ChannelHandle);

    /// Give the channel back
    fn release(&self, handle: ChannelHandle);
}

static_assertions::assert_impl_all!(CompletionSignal: Send);
static_assertions::assert_impl_all!(CompletionToken: Send);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_completion_delivered() {
        let (signal, token) = completion(7);
        assert_eq!(token.cookie(), 7);
        signal.complete(CompletionStatus::Complete { bytes: 64 });
        assert_eq!(
            token.wait(Duration::from_millis(10)),
            CompletionStatus::Complete { bytes: 64 }
        );
    }

    #[test]
    fn test_completion_timeout() {
        let (_signal, token) = completion(1);
        assert_eq!(
            token.wait(Duration::from_millis(5)),
            CompletionStatus::TimedOut
        );
    }

    #[test]
    fn test_dropped_signal_reads_aborted() {
        let (signal, token) = completion(1);
        drop(signal);
        assert_eq!(token.wait(Duration::from_millis(5)), CompletionStatus::Aborted);
    }

    #[test]
    fn test_endpoint_caps() {
        let caps = EndpointCaps::PRIVATE | EndpointCaps::SLAVE | EndpointCaps::RECEIVE;
        assert!(caps.is_usable());
        assert_eq!(caps.directions(), DirectionCaps::RECEIVE);
        assert!(!EndpointCaps::SLAVE.is_usable());
    }
}
