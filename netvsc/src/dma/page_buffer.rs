//! Page buffer descriptor builder.
//!
//! A frame goes out as: RNDIS header, then linear data, then fragments.
//! Each block is cut at page boundaries:
//!
//! ```text
//!   block @ offset 0xF00, len 0x1200
//!   ┌──────────┬────────────────────┬──────┐
//!   │  0x100   │       0x1000       │ 0x100│
//!   └──────────┴────────────────────┴──────┘
//!    page N      page N+1             page N+2
//! ```
//!
//! The dry-run count and the fill walk the same block list, so a caller can
//! size (and reject) before allocating anything.

use alloc::vec::Vec;

use super::page::{PhysAddr, PAGE_SIZE, page_offset, pages_spanned, pfn_of};

/// One contiguous guest-physical region of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Block {
    /// Guest physical start address.
    pub addr: PhysAddr,
    /// Length in bytes.
    pub len: u32,
}

impl Block {
    pub const fn new(addr: PhysAddr, len: u32) -> Self {
        Self { addr, len }
    }
}

/// Page-bounded slice of guest memory, as the host expects it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageBuffer {
    /// Page frame number.
    pub pfn: u64,
    /// Offset within the page.
    pub offset: u32,
    /// Length in bytes; `offset + len <= PAGE_SIZE`.
    pub len: u32,
}

impl PageBuffer {
    /// Guest physical address of the first byte.
    pub fn addr(&self) -> PhysAddr {
        (self.pfn << super::page::PAGE_SHIFT) + self.offset as u64
    }
}

/// Number of page buffers one block needs.
#[inline]
pub fn page_count(block: &Block) -> usize {
    pages_spanned(block.addr, block.len as usize)
}

/// Dry run: page buffers needed for all blocks, in order.
pub fn count_page_buffers<'a, I>(blocks: I) -> usize
where
    I: IntoIterator<Item = &'a Block>,
{
    blocks.into_iter().map(page_count).sum()
}

/// Append the page buffers for `blocks` to `out`.
///
/// Returns the number of entries appended. Callers reserve capacity from
/// `count_page_buffers` first; this never needs to grow `out` then.
pub fn fill_page_buffers<'a, I>(blocks: I, out: &mut Vec<PageBuffer>) -> usize
where
    I: IntoIterator<Item = &'a Block>,
{
    let start = out.len();
    for block in blocks {
        fill_block(block, out);
    }
    out.len() - start
}

fn fill_block(block: &Block, out: &mut Vec<PageBuffer>) {
    let mut addr = block.addr;
    let mut remaining = block.len as usize;

    while remaining > 0 {
        let offset = page_offset(addr);
        let bytes = core::cmp::min(PAGE_SIZE - offset, remaining);

        debug_assert!(out.len() < out.capacity(), "page buffer array was not pre-sized");
        out.push(PageBuffer {
            pfn: pfn_of(addr),
            offset: offset as u32,
            len: bytes as u32,
        });

        addr += bytes as u64;
        remaining -= bytes;
    }
}
