//! # Soft Device
//!
//! A software stand-in for the platform DMA framework and page pinner.
//!
//! Nothing is copied: completions are produced from bookkeeping alone. The
//! device can be scripted to stall (time out), report an error status or
//! reject the n-th submission of an endpoint, to come up short when pinning,
//! and to fail address mapping. Every issued submission is journaled with a
//! global sequence number so ordering between channels can be checked.

mod dma;
mod pin;

pub use dma::{Fault, IssueRecord, SoftDma};
pub use pin::SoftPinner;
