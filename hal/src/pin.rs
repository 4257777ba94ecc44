//! # Page Pinning Interface

use std::fmt;

use iqdma_core::UserAddr;

/// Frame address backing a pinned page
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PageFrame(pub u64);

impl fmt::Debug for PageFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PageFrame(0x{:016x})", self.0)
    }
}

/// A page held in place for the lifetime of a transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PinnedPage {
    /// Page-aligned user address
    pub user: UserAddr,
    /// Frame backing it
    pub frame: PageFrame,
}

/// The platform's page-pinning facility
pub trait PagePinner: Send + Sync {
    /// Platform page size in bytes (a power of two)
    fn page_size(&self) -> usize;

    /// Pin up to `count` pages starting at the page-aligned `addr`
    ///
    /// Returns the pages pinned, in order. A shorter result than `count`
    /// means the facility stopped early; the caller owns (and must unpin)
    /// whatever was returned.
    fn pin(&self, addr: UserAddr, count: usize, writable: bool) -> Vec<PinnedPage>;

    /// Release one pinned page
    fn unpin(&self, page: PinnedPage);

    /// Record that the device wrote to `page`
    fn mark_dirty(&self, page: &PinnedPage);
}
