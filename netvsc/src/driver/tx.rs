//! Transmit path.
//!
//! # Per-packet states
//!
//! ```text
//!   Building ──submit ok──▶ Submitted ──send_complete──▶ Completed
//!      │
//!      └──busy / too large / no memory / channel error──▶ Dropped
//! ```
//!
//! Budget is checked on the dry-run count before anything is allocated.

use core::iter;
use core::sync::atomic::Ordering;

use log::{error, trace, warn};

use crate::config::RNDIS_HEADER_SLOTS;
use crate::dma::{count_page_buffers, fill_page_buffers, Block};
use crate::error::{DropReason, TxError};
use crate::types::rndis::TxHeader;

use super::device::NetvscDevice;
use super::packet::{TxFrame, TxPacket};
use super::stats::{add, bump};
use super::traits::{Channel, NetStack, SubmitError};

/// Status reported when a busy channel had already consumed the frame.
const EAGAIN: i32 = -11;

impl<C: Channel, S: NetStack> NetvscDevice<C, S> {
    /// Queue for `frame`: 0 with a single queue or no IPv4 hash, else the
    /// send table entry for its flow hash.
    pub fn select_queue(&self, frame: &TxFrame) -> u16 {
        if self.queue_table.active_queues() <= 1 {
            return 0;
        }
        self.queue_table.select(self.hasher.hash_frame(frame.linear()))
    }

    fn pick_queue(&self, frame: &TxFrame) -> u16 {
        match frame.queue_mapping() {
            Some(q) if q < self.queue_table.active_queues() => q,
            _ => self.select_queue(frame),
        }
    }

    /// Transmit a frame.
    pub fn transmit(&self, frame: TxFrame) -> Result<(), TxError> {
        if self.removing.load(Ordering::Acquire) {
            bump(&self.stats.tx_dropped);
            return Err(TxError::Dropped(DropReason::DeviceUnavailable));
        }

        let queue = self.pick_queue(&frame);
        let txq = match self.tx_queues.get(queue) {
            Some(q) => q,
            None => return Err(TxError::Busy(frame)),
        };
        let _entered = match txq.enter() {
            Some(guard) => guard,
            None => return Err(TxError::Busy(frame)),
        };

        let linear = Block::new(
            self.channel.virt_to_phys(frame.linear().as_ptr() as usize),
            frame.linear().len() as u32,
        );
        let needed =
            count_page_buffers(iter::once(&linear).chain(frame.fragments())) + RNDIS_HEADER_SLOTS;
        if needed > self.config.max_page_buffers {
            warn!(
                "netvsc: packet too big: {} bytes needs {} page buffers (max {})",
                frame.len(),
                needed,
                self.config.max_page_buffers
            );
            bump(&self.stats.tx_dropped);
            return Err(TxError::FrameTooLarge(frame));
        }

        let mut packet = match TxPacket::try_allocate(needed, &self.in_flight) {
            Some(p) => p,
            None => {
                error!("netvsc: unable to allocate tx packet");
                bump(&self.stats.tx_dropped);
                return Err(TxError::Dropped(DropReason::OutOfMemory));
            }
        };

        let (hdr_vaddr, hdr_len) = packet.write_header(&TxHeader {
            data_len: frame.len() as u32,
            vlan: frame.vlan(),
        });
        let header = Block::new(self.channel.virt_to_phys(hdr_vaddr), hdr_len as u32);
        fill_page_buffers(
            iter::once(&header).chain(iter::once(&linear)).chain(frame.fragments()),
            packet.page_buffers_mut(),
        );
        packet.attach_frame(frame, queue);

        trace!(
            "netvsc: tx {} bytes, {} page buffers, queue {}",
            packet.total_data_len(),
            packet.page_buffers().len(),
            queue
        );

        match self.channel.submit(packet) {
            Ok(()) => Ok(()),
            Err(SubmitError::Busy(mut packet)) => {
                bump(&self.stats.tx_busy);
                match packet.take_frame() {
                    Some(frame) => Err(TxError::Busy(frame)),
                    None => {
                        bump(&self.stats.tx_dropped);
                        Err(TxError::Dropped(DropReason::TransportFailure(EAGAIN)))
                    }
                }
            }
            Err(SubmitError::Failed { packet, status }) => {
                error!("netvsc: send failed on queue {}: status {}", packet.queue(), status);
                drop(packet);
                bump(&self.stats.tx_dropped);
                Err(TxError::Dropped(DropReason::TransportFailure(status)))
            }
        }
    }

    /// Completion for an accepted packet. Called once per accepted submit,
    /// from any context.
    pub fn send_complete(&self, packet: TxPacket) {
        bump(&self.stats.tx_packets);
        add(&self.stats.tx_bytes, packet.total_data_len() as u64);
        // Frame (unless the channel copied and released it), header and
        // page buffers are released here.
        drop(packet);
    }

    /// Packets handed to the channel and not yet completed or released.
    pub fn outstanding_packets(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }
}
