//! # IQDMA Core
//!
//! Foundational types shared by every layer of the transfer engine.
//!
//! This crate carries no behaviour of its own: it defines the vocabulary
//! (directions, channel masks, addresses), the unified error type, the
//! engine configuration and the per-channel transfer statistics.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        iqdma-core                           │
//! │  ┌─────────────┐  ┌─────────────┐  ┌──────────┐  ┌───────┐  │
//! │  │   Types     │  │   Error     │  │  Config  │  │ Stats │  │
//! │  │ (Direction, │  │  Handling   │  │          │  │       │  │
//! │  │ ChannelMask)│  │             │  │          │  │       │  │
//! │  └─────────────┘  └─────────────┘  └──────────┘  └───────┘  │
//! └─────────────────────────────────────────────────────────────┘
//! ```

#![no_std]
#![warn(missing_docs)]
#![warn(clippy::all)]

// =============================================================================
// MODULE EXPORTS
// =============================================================================

pub mod config;
pub mod error;
pub mod stats;
pub mod types;

// Re-exports for convenience
pub use config::{ChunkFloor, EngineConfig};
pub use error::{Error, Result, SizeError};
pub use stats::{StatsCounters, TransferStats};
pub use types::*;
