//! # IQDMA Error Handling
//!
//! One error type for the whole transfer engine.
//!
//! Errors fall in two families:
//! - setup errors (alignment, size, pinning, configuration) are returned
//!   synchronously, before any worker is launched
//! - runtime errors (submission, timeout, hardware status) terminate the
//!   affected worker only and are surfaced through `wait` and the stats

use core::fmt;

// =============================================================================
// RESULT TYPE
// =============================================================================

/// IQDMA Result type alias
pub type Result<T> = core::result::Result<T, Error>;

// =============================================================================
// ERROR ENUM
// =============================================================================

/// IQDMA unified error type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    // =========================================================================
    // Setup Errors
    // =========================================================================
    /// Buffer address is not aligned to the platform page size
    Alignment {
        /// Offending user address
        addr: u64,
        /// Required alignment in bytes
        required: usize,
    },
    /// Buffer size violates a granularity or limit
    Size(SizeError),
    /// Page pinning came up short
    Pin {
        /// Pages asked for
        requested: usize,
        /// Pages actually pinned before the shortfall
        pinned: usize,
    },
    /// No usable endpoint found at scan time, or invalid engine configuration
    Config,
    /// Slot index does not name a discovered channel
    NoSuchChannel(usize),
    /// Endpoint cannot move data in the requested direction
    Unsupported,
    /// DMA address mapping of the segment chain failed
    MapFailed,

    // =========================================================================
    // Caller Misuse
    // =========================================================================
    /// Channel already has a transfer bound or a worker running
    Busy,
    /// Channel has no transfer bound
    NotBound,

    // =========================================================================
    // Runtime Errors
    // =========================================================================
    /// Hardware rejected the descriptor
    Submit,
    /// Completion did not arrive within the session timeout
    Timeout,
    /// Completion reported a failure status
    HardwareStatus(u32),
    /// Worker was halted, or a blocking wait was interrupted
    Interrupted,
    /// Full-duplex peer exited before opening the start gate
    PeerLost,
    /// Segment chain ran out while words remained
    ChainExhausted {
        /// Words still owed
        words: usize,
    },
    /// Worker thread could not be spawned
    SpawnFailed,
}

/// Size violation details
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeError {
    /// Zero-length buffer
    Empty,
    /// Byte length is not a multiple of the endpoint granularity
    Granularity {
        /// Requested length in bytes
        bytes: usize,
        /// Endpoint granularity in bytes
        granularity: usize,
    },
    /// Byte length exceeds the endpoint's maximum transfer
    TooLarge {
        /// Requested length in bytes
        bytes: usize,
        /// Endpoint limit in bytes
        max: usize,
    },
    /// Pinning would exceed the locked-memory allowance
    LockedLimit {
        /// Pages the bind needs
        requested: usize,
        /// Pages still available
        available: usize,
    },
    /// Chunk length is larger than the buffer or off-granularity
    Chunk {
        /// Requested chunk in words
        words: usize,
    },
}

impl Error {
    /// Check if this error was raised before any worker ran
    pub const fn is_setup(&self) -> bool {
        matches!(
            self,
            Self::Alignment { .. }
                | Self::Size(_)
                | Self::Pin { .. }
                | Self::Config
                | Self::MapFailed
                | Self::Unsupported
        )
    }

    /// Check if this error was produced by a running worker
    pub const fn is_runtime(&self) -> bool {
        matches!(
            self,
            Self::Submit
                | Self::Timeout
                | Self::HardwareStatus(_)
                | Self::PeerLost
                | Self::ChainExhausted { .. }
        )
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            // Setup
            Self::Alignment { addr, required } => {
                write!(f, "address {:#x} not aligned to {} bytes", addr, required)
            },
            Self::Size(e) => write!(f, "size error: {}", e),
            Self::Pin { requested, pinned } => {
                write!(f, "pinned {} of {} pages", pinned, requested)
            },
            Self::Config => write!(f, "configuration error"),
            Self::NoSuchChannel(slot) => write!(f, "no channel in slot {}", slot),
            Self::Unsupported => write!(f, "direction not supported by endpoint"),
            Self::MapFailed => write!(f, "DMA address mapping failed"),

            // Misuse
            Self::Busy => write!(f, "channel busy"),
            Self::NotBound => write!(f, "no transfer bound"),

            // Runtime
            Self::Submit => write!(f, "hardware rejected descriptor"),
            Self::Timeout => write!(f, "transfer timed out"),
            Self::HardwareStatus(code) => write!(f, "hardware status error {:#x}", code),
            Self::Interrupted => write!(f, "operation interrupted"),
            Self::PeerLost => write!(f, "full-duplex peer exited before start"),
            Self::ChainExhausted { words } => {
                write!(f, "segment chain exhausted with {} words left", words)
            },
            Self::SpawnFailed => write!(f, "worker thread spawn failed"),
        }
    }
}

impl fmt::Display for SizeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "empty buffer"),
            Self::Granularity { bytes, granularity } => {
                write!(f, "{} bytes is not a multiple of {}", bytes, granularity)
            },
            Self::TooLarge { bytes, max } => write!(f, "{} bytes exceeds limit of {}", bytes, max),
            Self::LockedLimit {
                requested,
                available,
            } => write!(
                f,
                "{} pages requested, {} left in locked-memory allowance",
                requested, available
            ),
            Self::Chunk { words } => write!(f, "invalid chunk of {} words", words),
        }
    }
}

// =============================================================================
// ERROR CONVERSION
// =============================================================================

impl From<SizeError> for Error {
    fn from(e: SizeError) -> Self {
        Error::Size(e)
    }
}

#[cfg(test)]
mod tests {
    extern crate std;

    use std::string::ToString;

    use super::*;

    #[test]
    fn test_error_families() {
        assert!(Error::Config.is_setup());
        assert!(Error::Size(SizeError::Empty).is_setup());
        assert!(!Error::Timeout.is_setup());
        assert!(Error::Timeout.is_runtime());
        assert!(Error::HardwareStatus(3).is_runtime());
        assert!(Error::ChainExhausted { words: 8 }.is_runtime());
        assert!(!Error::Busy.is_runtime());
        assert!(!Error::Busy.is_setup());
    }

    #[test]
    fn test_size_conversion() {
        let e: Error = SizeError::TooLarge { bytes: 10, max: 4 }.into();
        assert_eq!(e, Error::Size(SizeError::TooLarge { bytes: 10, max: 4 }));
    }

    #[test]
    fn test_display() {
        let e = Error::Alignment {
            addr: 0x1001,
            required: 4096,
        };
        assert_eq!(e.to_string(), "address 0x1001 not aligned to 4096 bytes");
        assert_eq!(
            Error::Pin {
                requested: 8,
                pinned: 3
            }
            .to_string(),
            "pinned 3 of 8 pages"
        );
    }
}
