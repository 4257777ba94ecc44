//! # Transfer Descriptor
//!
//! One pinned buffer, bound to one hardware channel handle. The descriptor
//! owns the pinned pages, the segment chain and the handle; releasing it
//! undoes the bind in reverse order. Release is idempotent and copes with a
//! descriptor abandoned halfway through a bind, so every failure path in the
//! binder simply drops what it built.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use iqdma_core::Direction;
use iqdma_hal::{ChannelHandle, DmaSubsystem, PagePinner, PinnedPage};

use crate::binder::PinLedger;
use crate::chain::SegmentChain;

/// A bound, pinned transfer buffer
pub struct TransferDescriptor {
    pub(crate) direction: Direction,
    pub(crate) handle: Option<ChannelHandle>,
    pub(crate) words: usize,
    pub(crate) chunk_words: usize,
    pub(crate) burst_bytes: usize,
    pub(crate) chain: SegmentChain,
    pub(crate) pages: Vec<PinnedPage>,
    pub(crate) mapped: bool,
    pub(crate) charged_pages: usize,
    remaining: AtomicUsize,
    dma: Arc<dyn DmaSubsystem>,
    pinner: Arc<dyn PagePinner>,
    ledger: Arc<PinLedger>,
}

impl TransferDescriptor {
    /// Empty descriptor; the binder fills it in step by step
    pub(crate) fn new(
        direction: Direction,
        words: usize,
        dma: Arc<dyn DmaSubsystem>,
        pinner: Arc<dyn PagePinner>,
        ledger: Arc<PinLedger>,
    ) -> Self {
        Self {
            direction,
            handle: None,
            words,
            chunk_words: words,
            burst_bytes: 0,
            chain: SegmentChain::new(),
            pages: Vec::new(),
            mapped: false,
            charged_pages: 0,
            remaining: AtomicUsize::new(words),
            dma,
            pinner,
            ledger,
        }
    }

    /// Transfer direction
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Hardware channel handle (absent once released)
    pub fn handle(&self) -> Option<ChannelHandle> {
        self.handle
    }

    /// Total words in the buffer
    pub fn words(&self) -> usize {
        self.words
    }

    /// Words per cyclic repetition
    pub fn chunk_words(&self) -> usize {
        self.chunk_words
    }

    /// Largest single submission in bytes
    pub fn burst_bytes(&self) -> usize {
        self.burst_bytes
    }

    /// Segment chain
    pub fn chain(&self) -> &SegmentChain {
        &self.chain
    }

    /// Pages held
    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// Words left in the current repetition
    pub fn remaining_words(&self) -> usize {
        self.remaining.load(Ordering::Relaxed)
    }

    pub(crate) fn set_remaining(&self, words: usize) {
        self.remaining.store(words, Ordering::Relaxed);
    }

    /// Undo the bind: unmap, dirty (receive), unpin, free chain, release
    /// the handle, refund the ledger
    pub(crate) fn release(&mut self) {
        let was_mapped = self.mapped;
        if self.mapped {
            if let Some(handle) = self.handle {
                self.dma
                    .unmap_chain(handle, &self.chain.to_vec(), self.direction);
            }
            self.mapped = false;
        }

        let dirty = was_mapped && self.direction == Direction::Receive;
        for page in self.pages.drain(..) {
            if dirty {
                self.pinner.mark_dirty(&page);
            }
            self.pinner.unpin(page);
        }
        self.chain.clear();

        if let Some(handle) = self.handle.take() {
            self.dma.release(handle);
        }
        if self.charged_pages != 0 {
            self.ledger.refund(self.charged_pages);
            self.charged_pages = 0;
        }
    }
}

impl Drop for TransferDescriptor {
    fn drop(&mut self) {
        self.release();
    }
}

impl core::fmt::Debug for TransferDescriptor {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TransferDescriptor")
            .field("direction", &self.direction)
            .field("handle", &self.handle)
            .field("words", &self.words)
            .field("chunk_words", &self.chunk_words)
            .field("segments", &self.chain.len())
            .field("pages", &self.pages.len())
            .field("mapped", &self.mapped)
            .finish()
    }
}

static_assertions::assert_impl_all!(TransferDescriptor: Send, Sync);

#[cfg(test)]
mod tests {
    use iqdma_core::{DirectionCaps, UserAddr};
    use iqdma_hal::soft::{SoftDma, SoftPinner};
    use iqdma_hal::EndpointId;

    use super::*;

    #[test]
    fn test_release_partial_descriptor() {
        let dma = Arc::new(SoftDma::new().with_endpoint(SoftDma::endpoint(
            0,
            0,
            DirectionCaps::RECEIVE,
        )));
        let pinner = Arc::new(SoftPinner::new());
        let ledger = Arc::new(PinLedger::new(16));

        let mut td = TransferDescriptor::new(
            Direction::Receive,
            2048,
            dma.clone(),
            pinner.clone(),
            ledger.clone(),
        );
        ledger.charge(2).expect("charge");
        td.charged_pages = 2;
        td.handle = Some(
            dma.request(EndpointId(0), Direction::Receive)
                .expect("claim"),
        );
        td.pages = pinner.pin(UserAddr::new(0x4000), 1, true);

        td.release();
        assert_eq!(pinner.pinned(), 0);
        assert_eq!(pinner.dirtied(), 0);
        assert_eq!(ledger.locked(), 0);
        assert_eq!(dma.open_handles(), 0);

        // Second release and drop are no-ops
        td.release();
        drop(td);
        assert_eq!(ledger.locked(), 0);
    }
}
