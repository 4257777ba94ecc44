//! Soft page pinner

use std::sync::atomic::{AtomicUsize, Ordering};

use iqdma_core::UserAddr;

use crate::pin::{PageFrame, PagePinner, PinnedPage};

/// Software page pinner
///
/// Frames are synthesized from the user address. An optional page limit
/// makes `pin` come up short once that many pages are held, the way a
/// locked-memory rlimit would.
#[derive(Debug)]
pub struct SoftPinner {
    page_size: usize,
    limit: Option<usize>,
    pinned: AtomicUsize,
    dirty: AtomicUsize,
    calls: AtomicUsize,
    largest_batch: AtomicUsize,
}

impl SoftPinner {
    /// 4 KiB pages, no limit
    pub fn new() -> Self {
        Self {
            page_size: 4096,
            limit: None,
            pinned: AtomicUsize::new(0),
            dirty: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
            largest_batch: AtomicUsize::new(0),
        }
    }

    /// Use another page size (power of two)
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    /// Come up short once `pages` are held
    pub fn with_limit(mut self, pages: usize) -> Self {
        self.limit = Some(pages);
        self
    }

    /// Pages currently pinned
    pub fn pinned(&self) -> usize {
        self.pinned.load(Ordering::SeqCst)
    }

    /// Pages marked dirty so far
    pub fn dirtied(&self) -> usize {
        self.dirty.load(Ordering::SeqCst)
    }

    /// Number of `pin` calls so far
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Largest page count asked for in one call
    pub fn largest_batch(&self) -> usize {
        self.largest_batch.load(Ordering::SeqCst)
    }
}

impl Default for SoftPinner {
    fn default() -> Self {
        Self::new()
    }
}

impl PagePinner for SoftPinner {
    fn page_size(&self) -> usize {
        self.page_size
    }

    fn pin(&self, addr: UserAddr, count: usize, _writable: bool) -> Vec<PinnedPage> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.largest_batch.fetch_max(count, Ordering::SeqCst);

        let mut granted = count;
        let limit = self.limit;
        let _ = self
            .pinned
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |held| {
                granted = match limit {
                    Some(limit) => count.min(limit.saturating_sub(held)),
                    None => count,
                };
                Some(held + granted)
            });

        (0..granted)
            .map(|i| {
                let user = addr.offset(i * self.page_size);
                PinnedPage {
                    user,
                    frame: PageFrame(user.raw()),
                }
            })
            .collect()
    }

    fn unpin(&self, _page: PinnedPage) {
        self.pinned.fetch_sub(1, Ordering::SeqCst);
    }

    fn mark_dirty(&self, _page: &PinnedPage) {
        self.dirty.fetch_add(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pin_and_unpin() {
        let pinner = SoftPinner::new();
        let pages = pinner.pin(UserAddr::new(0x10000), 3, false);
        assert_eq!(pages.len(), 3);
        assert_eq!(pages[2].user.raw(), 0x12000);
        assert_eq!(pinner.pinned(), 3);
        for page in pages {
            pinner.unpin(page);
        }
        assert_eq!(pinner.pinned(), 0);
    }

    #[test]
    fn test_limit_comes_up_short() {
        let pinner = SoftPinner::new().with_limit(4);
        assert_eq!(pinner.pin(UserAddr::new(0), 3, true).len(), 3);
        assert_eq!(pinner.pin(UserAddr::new(0x3000), 3, true).len(), 1);
        assert_eq!(pinner.pinned(), 4);
        assert_eq!(pinner.largest_batch(), 3);
        assert_eq!(pinner.calls(), 2);
    }
}
