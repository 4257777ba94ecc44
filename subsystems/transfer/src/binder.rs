//! # Buffer Binder
//!
//! Turns a caller buffer into a [`TransferDescriptor`]: validate, claim the
//! hardware channel, pin the pages, build the scatter-gather chain and map
//! it for the device.
//!
//! ## Bind Sequence
//!
//! ```text
//! validate ──▶ charge ledger ──▶ request handle ──▶ pin (batched) ──▶ map
//!    │              │                  │                  │            │
//!    └── no side effects ──┘           └──── any failure drops the ────┘
//!                                            partial descriptor
//! ```
//!
//! Validation failures happen before anything is pinned. Once pinning
//! starts, every step records what it acquired on the descriptor, so a
//! failure anywhere unwinds through the descriptor's release path.

use std::sync::Arc;

use iqdma_core::{
    BusAddr, Direction, EngineConfig, Error, Result, SizeError, UserAddr, WORD_BYTES,
};
use iqdma_hal::{DmaSubsystem, PagePinner};
use spin::Mutex;

use crate::chain::SegmentChain;
use crate::descriptor::TransferDescriptor;
use crate::directory::ChannelDescriptor;

// =============================================================================
// PINNED-MEMORY LEDGER
// =============================================================================

#[derive(Debug)]
struct LedgerState {
    locked: usize,
    limit: usize,
    peak: usize,
}

/// Session-wide count of pinned pages against a limit
#[derive(Debug)]
pub struct PinLedger {
    state: Mutex<LedgerState>,
}

impl PinLedger {
    /// Create a ledger allowing `limit` pages
    pub fn new(limit: usize) -> Self {
        Self {
            state: Mutex::new(LedgerState {
                locked: 0,
                limit,
                peak: 0,
            }),
        }
    }

    /// Reserve `pages`, or fail without reserving anything
    pub fn charge(&self, pages: usize) -> Result<()> {
        let mut state = self.state.lock();
        let available = state.limit.saturating_sub(state.locked);
        if pages > available {
            return Err(Error::Size(SizeError::LockedLimit {
                requested: pages,
                available,
            }));
        }
        state.locked += pages;
        state.peak = state.peak.max(state.locked);
        Ok(())
    }

    /// Return `pages` to the allowance
    pub fn refund(&self, pages: usize) {
        let mut state = self.state.lock();
        state.locked = state.locked.saturating_sub(pages);
    }

    /// Pages currently charged
    pub fn locked(&self) -> usize {
        self.state.lock().locked
    }

    /// Page limit
    pub fn limit(&self) -> usize {
        self.state.lock().limit
    }

    /// Highest charge seen
    pub fn peak(&self) -> usize {
        self.state.lock().peak
    }
}

// =============================================================================
// BIND REQUEST
// =============================================================================

/// Parameters of one bind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BindRequest {
    /// Transfer direction
    pub direction: Direction,
    /// Page-aligned user buffer
    pub addr: UserAddr,
    /// Buffer length in sample words
    pub words: usize,
    /// Words per cyclic repetition (0 = whole buffer)
    pub chunk_words: usize,
}

impl BindRequest {
    /// Whole-buffer request
    pub fn new(direction: Direction, addr: UserAddr, words: usize) -> Self {
        Self {
            direction,
            addr,
            words,
            chunk_words: 0,
        }
    }

    /// Set the cyclic chunk
    pub fn with_chunk(mut self, chunk_words: usize) -> Self {
        self.chunk_words = chunk_words;
        self
    }
}

// =============================================================================
// BINDER
// =============================================================================

/// Builds and tears down transfer descriptors
pub struct BufferBinder {
    dma: Arc<dyn DmaSubsystem>,
    pinner: Arc<dyn PagePinner>,
    ledger: Arc<PinLedger>,
    config: EngineConfig,
}

impl BufferBinder {
    /// Create a binder with its own ledger sized from `config`
    pub fn new(
        dma: Arc<dyn DmaSubsystem>,
        pinner: Arc<dyn PagePinner>,
        config: EngineConfig,
    ) -> Self {
        Self {
            dma,
            pinner,
            ledger: Arc::new(PinLedger::new(config.locked_page_limit)),
            config,
        }
    }

    /// Pinned-memory ledger
    pub fn ledger(&self) -> &Arc<PinLedger> {
        &self.ledger
    }

    /// Submission size for `desc`: the endpoint burst, optionally capped
    /// by config, kept on the endpoint granularity
    pub fn burst_bytes(&self, desc: &ChannelDescriptor) -> usize {
        let burst = self
            .config
            .max_burst_bytes
            .map_or(desc.max_burst, |b| b.min(desc.max_burst));
        let aligned = burst - burst % desc.alignment;
        aligned.max(desc.alignment)
    }

    /// Pin and map a caller buffer for `desc`
    pub fn bind(&self, desc: &ChannelDescriptor, req: &BindRequest) -> Result<TransferDescriptor> {
        if !desc.supports(req.direction) {
            return Err(Error::Unsupported);
        }

        let page_size = self.pinner.page_size();
        if !req.addr.is_aligned(page_size) {
            return Err(Error::Alignment {
                addr: req.addr.raw(),
                required: page_size,
            });
        }

        let bytes = Self::check_size(desc, req.words)?;
        let burst_bytes = self.burst_bytes(desc);
        let chunk_words = self.resolve_chunk(desc, req, burst_bytes / WORD_BYTES)?;
        let pages = bytes.div_ceil(page_size);

        self.ledger.charge(pages)?;
        let mut td = TransferDescriptor::new(
            req.direction,
            req.words,
            self.dma.clone(),
            self.pinner.clone(),
            self.ledger.clone(),
        );
        td.charged_pages = pages;
        td.chunk_words = chunk_words;
        td.burst_bytes = burst_bytes;

        let handle = self.dma.request(desc.endpoint, req.direction)?;
        td.handle = Some(handle);

        self.pin_pages(&mut td, req, bytes, pages)?;

        let mut segments = td.chain.to_vec();
        self.dma.map_chain(handle, &mut segments, req.direction)?;
        td.chain.assign_addresses(&segments);
        td.mapped = true;
        td.set_remaining(req.words);

        log::debug!(
            "Binder: {} {} words at {:#x} -> {} segments, chunk {} burst {}",
            req.direction,
            req.words,
            req.addr.raw(),
            td.chain.len(),
            chunk_words,
            burst_bytes
        );
        Ok(td)
    }

    /// Release a descriptor
    pub fn unbind(&self, td: TransferDescriptor) {
        log::debug!(
            "Binder: release {} {} words ({} pages)",
            td.direction(),
            td.words(),
            td.page_count()
        );
        drop(td);
    }

    /// Byte length of `words`, checked against the endpoint
    fn check_size(desc: &ChannelDescriptor, words: usize) -> Result<usize> {
        if words == 0 {
            return Err(SizeError::Empty.into());
        }
        let bytes = words.checked_mul(WORD_BYTES).ok_or(SizeError::TooLarge {
            bytes: usize::MAX,
            max: desc.max_transfer,
        })?;
        if bytes % desc.alignment != 0 {
            return Err(SizeError::Granularity {
                bytes,
                granularity: desc.alignment,
            }
            .into());
        }
        if bytes > desc.max_transfer {
            return Err(SizeError::TooLarge {
                bytes,
                max: desc.max_transfer,
            }
            .into());
        }
        Ok(bytes)
    }

    fn resolve_chunk(
        &self,
        desc: &ChannelDescriptor,
        req: &BindRequest,
        burst_words: usize,
    ) -> Result<usize> {
        if req.chunk_words == 0 {
            return Ok(req.words);
        }
        if req.chunk_words > req.words || req.chunk_words % desc.granularity_words() != 0 {
            return Err(SizeError::Chunk {
                words: req.chunk_words,
            }
            .into());
        }
        Ok(self
            .config
            .chunk_floor
            .apply(req.chunk_words, burst_words, req.words))
    }

    /// Pin `pages` in batches, one chain segment per page
    fn pin_pages(
        &self,
        td: &mut TransferDescriptor,
        req: &BindRequest,
        bytes: usize,
        pages: usize,
    ) -> Result<()> {
        let page_size = self.pinner.page_size();
        let writable = req.direction == Direction::Receive;
        let batch = self.config.pin_batch_pages;
        td.pages.reserve_exact(pages);
        td.chain = SegmentChain::with_capacity(pages);

        while td.pages.len() < pages {
            let done = td.pages.len();
            let want = (pages - done).min(batch);
            let got = self
                .pinner
                .pin(req.addr.offset(done * page_size), want, writable);
            let short = got.len() < want;

            for (i, page) in got.into_iter().enumerate() {
                let start = (done + i) * page_size;
                let len = page_size.min(bytes - start);
                td.chain.push(BusAddr::new(page.frame.0), len);
                td.pages.push(page);
            }

            if short {
                log::warn!(
                    "Binder: pinned {} of {} pages at {:#x}",
                    td.pages.len(),
                    pages,
                    req.addr.raw()
                );
                return Err(Error::Pin {
                    requested: pages,
                    pinned: td.pages.len(),
                });
            }
        }
        Ok(())
    }
}

impl core::fmt::Debug for BufferBinder {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("BufferBinder")
            .field("ledger", &self.ledger)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
