//! # Scatter-Gather Chain
//!
//! The hardware view of a pinned buffer: one segment per page, chained in
//! order, the final one marked as terminator.
//!
//! Segments live in an arena of fixed-size blocks and are linked by index,
//! not by pointer. A block is the allocation unit; larger buffers simply
//! chain more blocks.
//!
//! ```text
//!   block 0                         block 1
//!  ┌──────┬──────┬─────┬──────┐    ┌──────┬──────┐
//!  │ seg0 │ seg1 │ ... │ s127 │───▶│ s128 │ s129 │ (last)
//!  └──────┴──────┴─────┴──────┘    └──────┴──────┘
//! ```

use iqdma_core::BusAddr;
use iqdma_hal::Segment;

/// Segments per arena block
pub const SEGMENTS_PER_BLOCK: usize = 128;

// =============================================================================
// SEGMENT INDEX
// =============================================================================

/// Arena position of a segment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentIndex(u32);

impl SegmentIndex {
    #[inline]
    fn block(self) -> usize {
        self.0 as usize / SEGMENTS_PER_BLOCK
    }

    #[inline]
    fn slot(self) -> usize {
        self.0 as usize % SEGMENTS_PER_BLOCK
    }
}

#[derive(Debug, Clone, Copy)]
struct Node {
    segment: Segment,
    next: Option<SegmentIndex>,
}

// =============================================================================
// CHAIN
// =============================================================================

/// Index-linked segment chain
#[derive(Debug, Default)]
pub struct SegmentChain {
    blocks: Vec<Vec<Node>>,
    head: Option<SegmentIndex>,
    tail: Option<SegmentIndex>,
    len: usize,
    bytes: usize,
}

impl SegmentChain {
    /// Empty chain
    pub fn new() -> Self {
        Self::default()
    }

    /// Empty chain with blocks reserved for `segments`
    pub fn with_capacity(segments: usize) -> Self {
        let mut chain = Self::new();
        chain.blocks.reserve(segments.div_ceil(SEGMENTS_PER_BLOCK));
        chain
    }

    /// Append a segment; it becomes the terminator
    pub fn push(&mut self, addr: BusAddr, len: usize) -> SegmentIndex {
        let index = SegmentIndex(self.len as u32);
        if index.slot() == 0 {
            self.blocks.push(Vec::with_capacity(SEGMENTS_PER_BLOCK));
        }
        self.blocks[index.block()].push(Node {
            segment: Segment {
                addr,
                len,
                last: true,
            },
            next: None,
        });

        if let Some(tail) = self.tail {
            let node = self.node_mut(tail);
            node.next = Some(index);
            node.segment.last = false;
        } else {
            self.head = Some(index);
        }
        self.tail = Some(index);
        self.len += 1;
        self.bytes += len;
        index
    }

    fn node(&self, index: SegmentIndex) -> &Node {
        &self.blocks[index.block()][index.slot()]
    }

    fn node_mut(&mut self, index: SegmentIndex) -> &mut Node {
        &mut self.blocks[index.block()][index.slot()]
    }

    /// Segment at `index`
    pub fn get(&self, index: SegmentIndex) -> Option<&Segment> {
        self.blocks
            .get(index.block())
            .and_then(|b| b.get(index.slot()))
            .map(|n| &n.segment)
    }

    /// Number of segments
    pub fn len(&self) -> usize {
        self.len
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Bytes covered
    pub fn total_bytes(&self) -> usize {
        self.bytes
    }

    /// Arena blocks in use
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// Walk the chain from head to terminator
    pub fn iter(&self) -> impl Iterator<Item = &Segment> + '_ {
        let mut next = self.head;
        core::iter::from_fn(move || {
            let index = next?;
            let node = self.node(index);
            next = node.next;
            Some(&node.segment)
        })
    }

    /// Copy the chain out in order
    pub fn to_vec(&self) -> Vec<Segment> {
        self.iter().copied().collect()
    }

    /// Take device addresses back from a mapped copy
    pub fn assign_addresses(&mut self, mapped: &[Segment]) {
        let mut next = self.head;
        for seg in mapped {
            let Some(index) = next else { break };
            let node = self.node_mut(index);
            node.segment.addr = seg.addr;
            next = node.next;
        }
    }

    /// Drop every segment
    pub fn clear(&mut self) {
        self.blocks.clear();
        self.head = None;
        self.tail = None;
        self.len = 0;
        self.bytes = 0;
    }

    /// Cursor at the start of the chain
    pub fn cursor(&self) -> ChainCursor {
        ChainCursor {
            index: self.head,
            offset: 0,
            position: 0,
        }
    }

    /// Carve the next window of at most `max_bytes` out of the chain
    ///
    /// The window's first segment starts at the cursor, its last segment is
    /// cut to size and marked as terminator. The cursor advances past the
    /// window. An exhausted cursor yields an empty window.
    pub fn take(&self, cursor: &mut ChainCursor, max_bytes: usize) -> Vec<Segment> {
        let mut window = Vec::new();
        let mut budget = max_bytes;

        while budget > 0 {
            let Some(index) = cursor.index else { break };
            let node = self.node(index);
            let avail = node.segment.len - cursor.offset;
            let len = avail.min(budget);

            window.push(Segment {
                addr: node.segment.addr.offset(cursor.offset),
                len,
                last: false,
            });
            budget -= len;
            cursor.position += len;

            if len == avail {
                cursor.index = node.next;
                cursor.offset = 0;
            } else {
                cursor.offset += len;
            }
        }

        if let Some(last) = window.last_mut() {
            last.last = true;
        }
        window
    }

    /// Move `cursor` to absolute byte `position` (clamped to the chain end)
    pub fn seek(&self, cursor: &mut ChainCursor, position: usize) {
        *cursor = self.cursor();
        let mut skip = position.min(self.bytes);
        while skip > 0 {
            let Some(index) = cursor.index else { break };
            let node = self.node(index);
            if skip >= node.segment.len {
                skip -= node.segment.len;
                cursor.position += node.segment.len;
                cursor.index = node.next;
            } else {
                cursor.offset = skip;
                cursor.position += skip;
                skip = 0;
            }
        }
    }
}

// =============================================================================
// CURSOR
// =============================================================================

/// Read position inside a [`SegmentChain`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainCursor {
    index: Option<SegmentIndex>,
    offset: usize,
    position: usize,
}

impl ChainCursor {
    /// Bytes consumed from the start of the chain
    pub fn position(&self) -> usize {
        self.position
    }

    /// Check if the chain end was reached
    pub fn is_exhausted(&self) -> bool {
        self.index.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain(pages: usize, last_len: usize) -> SegmentChain {
        let mut chain = SegmentChain::with_capacity(pages);
        for i in 0..pages {
            let len = if i + 1 == pages { last_len } else { 4096 };
            chain.push(BusAddr::new(0x10_0000 + (i as u64) * 0x1_0000), len);
        }
        chain
    }

    #[test]
    fn test_terminator_moves_with_push() {
        let chain = chain(3, 100);
        let segs = chain.to_vec();
        assert_eq!(segs.len(), 3);
        assert!(!segs[0].last);
        assert!(!segs[1].last);
        assert!(segs[2].last);
        assert_eq!(segs[2].len, 100);
        assert_eq!(chain.total_bytes(), 8192 + 100);
    }

    #[test]
    fn test_blocks_chain_past_capacity() {
        let chain = chain(SEGMENTS_PER_BLOCK + 2, 4096);
        assert_eq!(chain.block_count(), 2);
        assert_eq!(chain.iter().count(), SEGMENTS_PER_BLOCK + 2);
        assert_eq!(chain.iter().filter(|s| s.last).count(), 1);
        assert_eq!(
            chain.get(SegmentIndex(SEGMENTS_PER_BLOCK as u32)).map(|s| s.len),
            Some(4096)
        );
    }

    #[test]
    fn test_take_windows_across_segments() {
        let chain = chain(3, 2048);
        let mut cursor = chain.cursor();

        let w = chain.take(&mut cursor, 6000);
        assert_eq!(w.len(), 2);
        assert_eq!(w[0].len, 4096);
        assert_eq!(w[1].len, 6000 - 4096);
        assert_eq!(w[1].addr.raw(), 0x11_0000);
        assert!(w[1].last && !w[0].last);
        assert_eq!(cursor.position(), 6000);

        let w = chain.take(&mut cursor, 6000);
        assert_eq!(w.iter().map(|s| s.len).sum::<usize>(), 8192 + 2048 - 6000);
        assert_eq!(w[0].addr.raw(), 0x11_0000 + (6000 - 4096) as u64);
        assert!(cursor.is_exhausted());

        assert!(chain.take(&mut cursor, 6000).is_empty());
    }

    #[test]
    fn test_seek() {
        let chain = chain(3, 4096);
        let mut cursor = chain.cursor();
        chain.seek(&mut cursor, 4096 + 10);
        assert_eq!(cursor.position(), 4106);
        let w = chain.take(&mut cursor, 16);
        assert_eq!(w[0].addr.raw(), 0x11_0000 + 10);

        chain.seek(&mut cursor, 0);
        assert_eq!(cursor, chain.cursor());
    }

    #[test]
    fn test_assign_addresses() {
        let mut chain = chain(2, 4096);
        let mut mapped = chain.to_vec();
        for seg in &mut mapped {
            seg.addr = BusAddr::new(seg.addr.raw() + 0x1000_0000);
        }
        chain.assign_addresses(&mapped);
        assert_eq!(chain.to_vec(), mapped);

        chain.clear();
        assert!(chain.is_empty());
        assert_eq!(chain.total_bytes(), 0);
    }
}
