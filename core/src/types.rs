//! # IQDMA Core Types
//!
//! Strongly typed addresses, transfer directions and channel masks.

use core::fmt;

// =============================================================================
// CONSTANTS
// =============================================================================

/// Bytes per sample word (one interleaved 16-bit I/Q pair)
pub const WORD_BYTES: usize = 4;

/// Maximum number of channels a session can address through a mask
pub const MAX_CHANNELS: usize = 32;

// =============================================================================
// USER ADDRESS
// =============================================================================

/// Address of a caller-owned buffer in the process address space
///
/// This is never dereferenced by the engine; it is only handed to the
/// page-pinning facility.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(transparent)]
pub struct UserAddr(u64);

impl UserAddr {
    /// Create a new user address
    #[inline]
    pub const fn new(addr: u64) -> Self {
        Self(addr)
    }

    /// Get the raw u64 value
    #[inline]
    pub const fn raw(self) -> u64 {
        self.0
    }

    /// Check alignment (`alignment` must be a power of two)
    #[inline]
    pub const fn is_aligned(self, alignment: usize) -> bool {
        self.0 & (alignment as u64 - 1) == 0
    }

    /// Offset by bytes
    #[inline]
    pub const fn offset(self, bytes: usize) -> Self {
        Self(self.0.wrapping_add(bytes as u64))
    }
}

impl fmt::Debug for UserAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UserAddr(0x{:016x})", self.0)
    }
}

impl fmt::Display for UserAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:016x}", self.0)
    }
}

// =============================================================================
// BUS ADDRESS
// =============================================================================

/// Device-visible address of a pinned page (after IOMMU/DMA mapping)
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(transparent)]
pub struct BusAddr(u64);

impl BusAddr {
    /// Create a new bus address
    #[inline]
    pub const fn new(addr: u64) -> Self {
        Self(addr)
    }

    /// Get the raw u64 value
    #[inline]
    pub const fn raw(self) -> u64 {
        self.0
    }

    /// Offset by bytes
    #[inline]
    pub const fn offset(self, bytes: usize) -> Self {
        Self(self.0.wrapping_add(bytes as u64))
    }
}

impl fmt::Debug for BusAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BusAddr(0x{:016x})", self.0)
    }
}

// =============================================================================
// DIRECTION
// =============================================================================

/// Transfer direction, seen from the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Memory to device (TX samples)
    Send,
    /// Device to memory (RX samples)
    Receive,
}

impl Direction {
    /// Check if this is the send direction
    #[inline]
    pub const fn is_send(self) -> bool {
        matches!(self, Direction::Send)
    }

    /// The opposite direction
    #[inline]
    pub const fn opposite(self) -> Self {
        match self {
            Direction::Send => Direction::Receive,
            Direction::Receive => Direction::Send,
        }
    }

    /// Capability bit matching this direction
    #[inline]
    pub const fn caps(self) -> DirectionCaps {
        match self {
            Direction::Send => DirectionCaps::SEND,
            Direction::Receive => DirectionCaps::RECEIVE,
        }
    }

    /// Short lowercase name (used in thread names and logs)
    pub const fn as_str(self) -> &'static str {
        match self {
            Direction::Send => "tx",
            Direction::Receive => "rx",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

bitflags::bitflags! {
    /// Directions an endpoint can serve
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct DirectionCaps: u8 {
        /// Memory to device
        const SEND = 1 << 0;
        /// Device to memory
        const RECEIVE = 1 << 1;
        /// Both directions
        const BOTH = Self::SEND.bits() | Self::RECEIVE.bits();
    }
}

impl DirectionCaps {
    /// Check if `direction` is supported
    #[inline]
    pub const fn supports(self, direction: Direction) -> bool {
        self.contains(direction.caps())
    }

    /// The single direction served, if exactly one
    pub fn single(self) -> Option<Direction> {
        if self == Self::SEND {
            Some(Direction::Send)
        } else if self == Self::RECEIVE {
            Some(Direction::Receive)
        } else {
            None
        }
    }
}

// =============================================================================
// CHANNEL MASK
// =============================================================================

bitflags::bitflags! {
    /// Bitmask selecting channels by slot index
    ///
    /// Bit `n` selects slot `n`; only [`MAX_CHANNELS`] slots are addressable.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ChannelMask: u32 {
        /// Every addressable slot
        const ALL = !0;
    }
}

impl ChannelMask {
    /// Mask selecting a single slot (empty when out of range)
    #[inline]
    pub const fn slot(slot: usize) -> Self {
        if slot < MAX_CHANNELS {
            Self::from_bits_retain(1 << slot)
        } else {
            Self::empty()
        }
    }

    /// Check if `slot` is selected
    #[inline]
    pub const fn has_slot(self, slot: usize) -> bool {
        slot < MAX_CHANNELS && self.bits() & (1 << slot) != 0
    }

    /// Iterate the selected slot indices, lowest first
    pub fn slots(self) -> impl Iterator<Item = usize> {
        let bits = self.bits();
        (0..MAX_CHANNELS).filter(move |s| bits & (1 << s) != 0)
    }
}

impl From<u32> for ChannelMask {
    fn from(bits: u32) -> Self {
        Self::from_bits_retain(bits)
    }
}

// =============================================================================
// CHANNEL STATE
// =============================================================================

/// Channel lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ChannelState {
    /// No transfer bound
    Idle    = 0,
    /// Transfer bound, no worker running
    Bound   = 1,
    /// Worker active
    Running = 2,
    /// Worker exited on timeout, hardware error or halt; rebind to recover
    Faulted = 3,
}

impl ChannelState {
    /// Decode from the atomic representation
    pub const fn from_u8(raw: u8) -> Self {
        match raw {
            1 => Self::Bound,
            2 => Self::Running,
            3 => Self::Faulted,
            _ => Self::Idle,
        }
    }

    /// Check if a worker can be launched from this state
    #[inline]
    pub const fn can_start(self) -> bool {
        matches!(self, Self::Bound)
    }
}

// =============================================================================
// STATIC ASSERTIONS
// =============================================================================

static_assertions::assert_impl_all!(UserAddr: Send, Sync, Copy);
static_assertions::assert_impl_all!(BusAddr: Send, Sync, Copy);
static_assertions::assert_impl_all!(ChannelMask: Send, Sync, Copy);
static_assertions::assert_eq_size!(ChannelState, u8);
