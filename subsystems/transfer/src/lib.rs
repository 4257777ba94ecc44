//! # IQDMA Transfer Engine
//!
//! Moves sample buffers between caller memory and a DMA-capable peripheral
//! without copying. Buffers are pinned once at bind time, described to the
//! hardware as a scatter-gather chain, and streamed by one worker thread
//! per channel.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────────┐
//! │                             Session                                │
//! │   bind / unbind        start / trigger / stop / wait / halt        │
//! │        │                               │                           │
//! │        ▼                               ▼                           │
//! │  ┌──────────────┐   ┌────────────┐   ┌──────────┐   ┌──────────┐   │
//! │  │ BufferBinder │──▶│ Transfer   │──▶│ Channel  │──▶│  Worker  │   │
//! │  │  + PinLedger │   │ Descriptor │   │ (slot n) │   │ (thread) │   │
//! │  └──────────────┘   └────────────┘   └──────────┘   └──────────┘   │
//! │        ▲                                                 │         │
//! │  ┌─────┴─────┐                                  ┌────────┴──────┐  │
//! │  │ Directory │                                  │  DuplexGate   │  │
//! │  └───────────┘                                  └───────────────┘  │
//! └────────────────────────────────────────────────────────────────────┘
//!            │                                   │
//!            ▼                                   ▼
//!     PagePinner (iqdma-hal)             DmaSubsystem (iqdma-hal)
//! ```
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//!
//! use iqdma_core::{ChannelMask, Direction, DirectionCaps, EngineConfig, UserAddr};
//! use iqdma_hal::soft::{SoftDma, SoftPinner};
//! use iqdma_hal::PeripheralHooks;
//! use iqdma_transfer::Session;
//!
//! let dma = Arc::new(SoftDma::new().with_endpoint(SoftDma::endpoint(0, 0, DirectionCaps::SEND)));
//! let session = Session::open(
//!     dma,
//!     Arc::new(SoftPinner::new()),
//!     PeripheralHooks::new(),
//!     EngineConfig::default(),
//! )?;
//!
//! session.bind(0, Direction::Send, UserAddr::new(0x10_0000), 4096, 0)?;
//! session.trigger(ChannelMask::slot(0))?;
//! assert_eq!(session.stats(0)?.bytes, 16384);
//! session.close();
//! # Ok::<(), iqdma_core::Error>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod binder;
pub mod chain;
pub mod channel;
pub mod descriptor;
pub mod directory;
pub mod gate;
pub mod session;
mod worker;

// Re-exports
pub use binder::{BindRequest, BufferBinder, PinLedger};
pub use chain::{ChainCursor, SegmentChain, SegmentIndex};
pub use channel::Channel;
pub use descriptor::TransferDescriptor;
pub use directory::{ChannelDescriptor, Directory};
pub use gate::{duplex_gate, GateOpener, GateRole, GateWaiter};
pub use session::{Interrupter, Session};

#[cfg(feature = "soft")]
pub use iqdma_hal::soft;
