//! Boot-time heap allocator
//!
//! A single contiguous arena handed over by the stage-0 layout, carved by a
//! first-fit allocator. Blocks are tracked in a fixed-capacity descriptor
//! table indexed by position rather than by intrusive in-arena headers, so a
//! corrupted buffer cannot take the allocator state with it. `free` coalesces
//! forward only; a free block is never merged into its predecessor.
//!
//! Single execution context, so no locking. Long-lived buffers (the FAT, the
//! kernel image, the boot info block) are allocated and then abandoned: once
//! control transfers, the whole address space belongs to the kernel.

use arrayvec::ArrayVec;

/// Maximum number of blocks the arena can be split into
pub const MAX_HEAP_BLOCKS: usize = 128;

/// A block is split only when the remainder could still hold a block header
/// plus a minimum payload, the threshold carried over from the intrusive
/// free-list layout.
const SPLIT_RESERVE: usize = 12;

#[derive(Debug, Clone, Copy)]
struct Block {
    offset: usize,
    size: usize,
    reserved: bool,
}

/// Buffer handed out by the boot heap
///
/// Holds a raw view into the arena. Buffers for long-lived results are never
/// freed (see module docs); `BootHeap::free` takes the handle back for the
/// few short-lived cases.
#[derive(Debug)]
pub struct HeapBuf {
    ptr: *mut u8,
    len: usize,
}

impl HeapBuf {
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Arena address of the buffer, as a 32-bit physical address
    pub fn addr(&self) -> u32 {
        self.ptr as usize as u32
    }

    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: the block stays reserved for the lifetime of the handle.
        unsafe { core::slice::from_raw_parts(self.ptr, self.len) }
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: handles reference disjoint reserved blocks.
        unsafe { core::slice::from_raw_parts_mut(self.ptr, self.len) }
    }
}

/// Single-arena first-fit allocator
pub struct BootHeap {
    base: *mut u8,
    size: usize,
    blocks: ArrayVec<Block, MAX_HEAP_BLOCKS>,
}

impl BootHeap {
    /// Take ownership of the arena `[base, base + size)`
    ///
    /// # Safety
    /// The region must be valid, writable, and exclusively owned by this
    /// heap for its whole lifetime.
    pub unsafe fn new(base: *mut u8, size: usize) -> Self {
        let mut blocks = ArrayVec::new();
        blocks.push(Block {
            offset: 0,
            size,
            reserved: false,
        });
        Self { base, size, blocks }
    }

    /// Total arena size in bytes
    pub fn arena_size(&self) -> usize {
        self.size
    }

    /// Bytes currently reserved
    pub fn reserved_bytes(&self) -> usize {
        self.blocks
            .iter()
            .filter(|b| b.reserved)
            .map(|b| b.size)
            .sum()
    }

    /// First-fit allocation
    ///
    /// Walks the block table from the lowest address, skipping reserved and
    /// undersized blocks. A fitting block is split when the remainder is
    /// worth keeping, or granted whole when it is not (or when the
    /// descriptor table is full). Returns `None` when the chain is
    /// exhausted.
    pub fn allocate(&mut self, size: usize) -> Option<HeapBuf> {
        for i in 0..self.blocks.len() {
            let block = self.blocks[i];
            if block.reserved || block.size < size {
                continue;
            }

            let remainder = block.size - size;
            if remainder > SPLIT_RESERVE && !self.blocks.is_full() {
                self.blocks[i].size = size;
                self.blocks.insert(
                    i + 1,
                    Block {
                        offset: block.offset + size,
                        size: remainder,
                        reserved: false,
                    },
                );
            }
            self.blocks[i].reserved = true;

            // SAFETY: offset + size stays inside the arena by construction.
            let ptr = unsafe { self.base.add(block.offset) };
            return Some(HeapBuf { ptr, len: size });
        }
        None
    }

    /// Release a buffer and coalesce forward
    ///
    /// Clears the reserved flag, then repeatedly absorbs the immediately
    /// following block while it is free. Never merges backward even if the
    /// preceding block is free; the loop is bounded by the number of blocks
    /// in the table.
    pub fn free(&mut self, buf: HeapBuf) {
        let offset = buf.ptr as usize - self.base as usize;
        let Some(i) = self
            .blocks
            .iter()
            .position(|b| b.offset == offset && b.reserved)
        else {
            log::warn!("free of unknown heap block at offset {offset:#x}");
            return;
        };

        self.blocks[i].reserved = false;
        while i + 1 < self.blocks.len() && !self.blocks[i + 1].reserved {
            self.blocks[i].size += self.blocks[i + 1].size;
            self.blocks.remove(i + 1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn arena(size: usize) -> BootHeap {
        let buf = Box::leak(vec![0u8; size].into_boxed_slice());
        // SAFETY: leaked, so exclusively ours forever.
        unsafe { BootHeap::new(buf.as_mut_ptr(), buf.len()) }
    }

    fn addr_of(buf: &HeapBuf) -> usize {
        buf.as_slice().as_ptr() as usize
    }

    #[test]
    fn test_allocation_grants_writable_buffer() {
        let mut heap = arena(4096);
        let mut buf = heap.allocate(64).unwrap();
        buf.as_mut_slice().fill(0xAB);
        assert_eq!(buf.as_slice()[63], 0xAB);
        assert_eq!(buf.len(), 64);
    }

    #[test]
    fn test_exhaustion_returns_none() {
        let mut heap = arena(256);
        assert!(heap.allocate(512).is_none());
        let _a = heap.allocate(200).unwrap();
        assert!(heap.allocate(200).is_none());
    }

    #[test]
    fn test_first_fit_reuses_freed_block() {
        let mut heap = arena(4096);

        let a = heap.allocate(100).unwrap();
        let b = heap.allocate(200).unwrap();
        let a_addr = addr_of(&a);
        assert!(addr_of(&b) >= a_addr + 100, "B must sit beyond A's block");

        heap.free(a);
        let c = heap.allocate(50).unwrap();
        assert_eq!(addr_of(&c), a_addr, "first fit must reuse A's block");
    }

    #[test]
    fn test_forward_coalescing_merges_following_free_blocks() {
        let mut heap = arena(4096);
        let a = heap.allocate(100).unwrap();
        let b = heap.allocate(100).unwrap();
        let a_addr = addr_of(&a);

        // Free B first so that freeing A can absorb it and the tail.
        heap.free(b);
        heap.free(a);

        let big = heap.allocate(4000).unwrap();
        assert_eq!(addr_of(&big), a_addr);
    }

    #[test]
    fn test_no_backward_coalescing() {
        let mut heap = arena(4096);
        let a = heap.allocate(100).unwrap();
        let b = heap.allocate(100).unwrap();
        let b_addr = addr_of(&b);
        let _c = heap.allocate(100).unwrap();

        // A is freed before B: freeing B must not merge into A's block, so
        // a request larger than B's block cannot land at B's address.
        heap.free(a);
        heap.free(b);

        let d = heap.allocate(150).unwrap();
        assert_ne!(addr_of(&d), b_addr);
    }

    #[test]
    fn test_tight_remainder_is_granted_whole() {
        let mut heap = arena(4096);
        let a = heap.allocate(100).unwrap();
        let a_addr = addr_of(&a);
        let _guard = heap.allocate(3000).unwrap();

        heap.free(a);
        // Remainder of 8 is below the split threshold: the whole 100-byte
        // block is granted, so the following allocation cannot come from it.
        let b = heap.allocate(92).unwrap();
        assert_eq!(addr_of(&b), a_addr);
        let c = heap.allocate(8).unwrap();
        assert!(addr_of(&c) >= a_addr + 100);
    }

    proptest! {
        #[test]
        fn prop_live_allocations_never_overlap(sizes in prop::collection::vec(1usize..512, 1..24)) {
            let mut heap = arena(16 * 1024);
            let mut live: Vec<(usize, usize)> = Vec::new();

            for size in sizes {
                if let Some(buf) = heap.allocate(size) {
                    live.push((addr_of(&buf), buf.len()));
                }
            }

            for (i, &(a_start, a_len)) in live.iter().enumerate() {
                for &(b_start, b_len) in live.iter().skip(i + 1) {
                    let disjoint = a_start + a_len <= b_start || b_start + b_len <= a_start;
                    prop_assert!(disjoint, "blocks overlap");
                }
            }
        }
    }
}
