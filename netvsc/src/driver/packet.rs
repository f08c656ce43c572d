//! Outbound frame and in-flight packet descriptor.
//!
//! # Ownership
//!
//! ```text
//!  caller ──TxFrame──▶ transmit ──TxPacket──▶ Channel::submit
//!                                                  │
//!           send_complete ◀──────TxPacket──────────┘
//! ```
//!
//! A `TxPacket` is a plain owned value. Whoever holds it last drops it, and
//! dropping is the release: header buffer, page buffer array and (if still
//! attached) the frame go away together, and the device's in-flight count
//! is decremented.

use alloc::alloc::{alloc_zeroed, Layout};
use alloc::boxed::Box;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicUsize, Ordering};

use crate::dma::{Block, PageBuffer, PhysAddr};
use crate::types::rndis::{TxHeader, RNDIS_TX_HEADER_MAX};
use crate::types::VlanTci;

// ═══════════════════════════════════════════════════════════════════════════
// TxFrame
// ═══════════════════════════════════════════════════════════════════════════

/// An outbound Ethernet frame: linear head plus optional fragments.
///
/// Fragments are already guest-physical regions (pinned by the owner of the
/// frame); the linear area is translated through the channel at transmit.
pub struct TxFrame {
    linear: Vec<u8>,
    frags: Vec<Block>,
    vlan: Option<VlanTci>,
    queue_mapping: Option<u16>,
}

impl TxFrame {
    pub fn new(linear: Vec<u8>) -> Self {
        Self {
            linear,
            frags: Vec::new(),
            vlan: None,
            queue_mapping: None,
        }
    }

    pub fn with_fragment(mut self, addr: PhysAddr, len: u32) -> Self {
        self.frags.push(Block::new(addr, len));
        self
    }

    pub fn with_vlan(mut self, tci: VlanTci) -> Self {
        self.vlan = Some(tci);
        self
    }

    /// Record a queue chosen earlier by the stack.
    pub fn with_queue_mapping(mut self, queue: u16) -> Self {
        self.queue_mapping = Some(queue);
        self
    }

    pub fn linear(&self) -> &[u8] {
        &self.linear
    }

    pub fn fragments(&self) -> &[Block] {
        &self.frags
    }

    pub fn vlan(&self) -> Option<VlanTci> {
        self.vlan
    }

    pub fn queue_mapping(&self) -> Option<u16> {
        self.queue_mapping
    }

    /// Total frame length.
    pub fn len(&self) -> usize {
        self.linear.len() + self.frags.iter().map(|f| f.len as usize).sum::<usize>()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// TxPacket
// ═══════════════════════════════════════════════════════════════════════════

/// RNDIS header storage. 64-byte aligned and sized, so it never straddles
/// a page.
#[repr(C, align(64))]
pub(crate) struct HeaderBuf([u8; 64]);

const _: () = assert!(RNDIS_TX_HEADER_MAX <= core::mem::size_of::<HeaderBuf>());

impl HeaderBuf {
    fn try_new() -> Option<Box<Self>> {
        let layout = Layout::new::<HeaderBuf>();
        // SAFETY: layout has non-zero size; all-zero bytes are a valid HeaderBuf.
        unsafe {
            let ptr = alloc_zeroed(layout) as *mut HeaderBuf;
            if ptr.is_null() {
                return None;
            }
            Some(Box::from_raw(ptr))
        }
    }
}

/// Decrements the owning device's in-flight count when dropped.
struct InFlight(Arc<AtomicUsize>);

impl InFlight {
    fn new(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::AcqRel);
        Self(counter.clone())
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

/// One in-flight send.
pub struct TxPacket {
    header: Box<HeaderBuf>,
    header_len: usize,
    page_buffers: Vec<PageBuffer>,
    frame: Option<TxFrame>,
    send_buf_index: Option<u32>,
    queue: u16,
    total_data_len: u32,
    _in_flight: InFlight,
}

impl TxPacket {
    /// Allocate a descriptor with room for `page_buffers` entries.
    ///
    /// Never aborts on allocation failure.
    pub(crate) fn try_allocate(page_buffers: usize, in_flight: &Arc<AtomicUsize>) -> Option<Self> {
        let header = HeaderBuf::try_new()?;
        let mut pb = Vec::new();
        pb.try_reserve_exact(page_buffers).ok()?;
        Some(Self {
            header,
            header_len: 0,
            page_buffers: pb,
            frame: None,
            send_buf_index: None,
            queue: 0,
            total_data_len: 0,
            _in_flight: InFlight::new(in_flight),
        })
    }

    /// Encode the RNDIS header; returns its virtual address and length.
    pub(crate) fn write_header(&mut self, header: &TxHeader) -> (usize, usize) {
        self.header_len = header.encode(&mut self.header.0);
        self.total_data_len = header.data_len;
        (self.header.0.as_ptr() as usize, self.header_len)
    }

    pub(crate) fn page_buffers_mut(&mut self) -> &mut Vec<PageBuffer> {
        &mut self.page_buffers
    }

    pub(crate) fn attach_frame(&mut self, frame: TxFrame, queue: u16) {
        self.frame = Some(frame);
        self.queue = queue;
    }

    /// Encoded RNDIS packet message header.
    pub fn rndis_header(&self) -> &[u8] {
        &self.header.0[..self.header_len]
    }

    /// Page buffers: header first, then frame data.
    pub fn page_buffers(&self) -> &[PageBuffer] {
        &self.page_buffers
    }

    pub fn queue(&self) -> u16 {
        self.queue
    }

    /// Frame length (RNDIS header excluded).
    pub fn total_data_len(&self) -> u32 {
        self.total_data_len
    }

    pub fn frame(&self) -> Option<&TxFrame> {
        self.frame.as_ref()
    }

    /// Detach the frame (send-buffer copy path).
    pub fn take_frame(&mut self) -> Option<TxFrame> {
        self.frame.take()
    }

    /// Record the send-buffer slot the frame was copied into.
    pub fn set_send_buffer_index(&mut self, index: u32) {
        self.send_buf_index = Some(index);
    }

    pub fn send_buffer_index(&self) -> Option<u32> {
        self.send_buf_index
    }
}
