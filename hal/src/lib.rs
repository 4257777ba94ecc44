//! # IQDMA Hardware Abstraction Layer
//!
//! The narrow interfaces the transfer engine consumes from its collaborators.
//!
//! ## Components
//!
//! - **DMA subsystem** ([`DmaSubsystem`]): endpoint enumeration, channel
//!   handles, address mapping, submission and completion
//! - **Page pinning** ([`PagePinner`]): lock caller memory in place and
//!   report the frames backing it
//! - **Peripheral hooks** ([`PeripheralHooks`]): direction-keyed enable
//!   callbacks fired once per channel on its first submission
//! - **Soft device** (`soft`, default feature): a software reference device
//!   with scripted fault injection, for tests and hardware-less hosts
//!
//! Register layouts and peripheral wire encodings stay behind these traits;
//! the engine never touches memory-mapped I/O itself.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod dma;
pub mod hooks;
pub mod pin;

#[cfg(feature = "soft")]
pub mod soft;

// Re-exports
pub use dma::{
    completion, ChannelHandle, CompletionSignal, CompletionStatus, CompletionToken, DmaSubsystem,
    Endpoint, EndpointCaps, EndpointId, Segment,
};
pub use hooks::{EnableHook, PeripheralHooks};
pub use pin::{PageFrame, PagePinner, PinnedPage};
