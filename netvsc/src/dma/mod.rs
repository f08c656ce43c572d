//! Guest-physical page handling.
//!
//! The host consumes every outbound frame as a list of page buffers
//! (`{pfn, offset, len}`), none of which may cross a page boundary.
//!
//! # Reference
//! Hyper-V VMBus GPA direct packets (`hv_page_buffer`)

pub mod page;
pub mod page_buffer;

pub use page::{PhysAddr, PAGE_SHIFT, PAGE_SIZE, page_offset, pfn_of, pages_spanned};
pub use page_buffer::{Block, PageBuffer, count_page_buffers, fill_page_buffers, page_count};
