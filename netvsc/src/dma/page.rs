//! Page arithmetic.
//!
//! Hyper-V always describes guest memory in 4 KiB pages, independent of the
//! guest kernel page size.

/// Guest physical address.
pub type PhysAddr = u64;

/// Hyper-V page shift.
pub const PAGE_SHIFT: u32 = 12;

/// Hyper-V page size (4KB).
pub const PAGE_SIZE: usize = 1 << PAGE_SHIFT;

const PAGE_MASK: u64 = !(PAGE_SIZE as u64 - 1);

/// Page frame number containing `addr`.
#[inline]
pub const fn pfn_of(addr: PhysAddr) -> u64 {
    addr >> PAGE_SHIFT
}

/// Byte offset of `addr` within its page.
#[inline]
pub const fn page_offset(addr: PhysAddr) -> usize {
    (addr & !PAGE_MASK) as usize
}

/// Number of pages touched by `len` bytes starting at `addr`.
#[inline]
pub const fn pages_spanned(addr: PhysAddr, len: usize) -> usize {
    if len == 0 {
        return 0;
    }
    (page_offset(addr) + len + PAGE_SIZE - 1) / PAGE_SIZE
}
