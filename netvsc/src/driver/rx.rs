//! Receive path.
//!
//! The host's receive buffer is only borrowed for the duration of the call,
//! so every frame is copied into a fresh allocation before going up.

use alloc::vec::Vec;
use core::sync::atomic::Ordering;

use log::{debug, trace};
use smoltcp::wire::EthernetProtocol;

use crate::error::RxError;
use crate::types::ethernet::{classify, ETH_HLEN};
use crate::types::rndis::parse_packet;
use crate::types::{ChecksumInfo, PacketType, VlanTci};

use super::device::NetvscDevice;
use super::stats::{add, bump};
use super::traits::{Channel, NetStack};

/// Host-supplied metadata for one received frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RxMeta {
    pub checksum: Option<ChecksumInfo>,
    pub vlan: Option<VlanTci>,
}

/// Checksum state handed to the stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RxChecksum {
    /// Stack must verify.
    None,
    /// Host verified the IP header checksum.
    Unnecessary,
}

/// A received frame, owned by the stack once delivered.
#[derive(Debug)]
pub struct RxFrame {
    pub data: Vec<u8>,
    pub protocol: EthernetProtocol,
    pub packet_type: PacketType,
    pub checksum: RxChecksum,
    pub vlan: Option<VlanTci>,
    /// Queue the frame arrived on.
    pub queue: u16,
}

impl<C: Channel, S: NetStack> NetvscDevice<C, S> {
    /// Deliver one received Ethernet frame upward.
    ///
    /// Never blocks. On error the caller reports failure to the host.
    pub fn receive(&self, queue: u16, data: &[u8], meta: RxMeta) -> Result<(), RxError> {
        if !self.registered.load(Ordering::Acquire)
            || self.removing.load(Ordering::Acquire)
            || self.mtu_changing.load(Ordering::Acquire)
        {
            bump(&self.stats.rx_dropped);
            return Err(RxError::DeviceUnavailable);
        }

        if data.len() < ETH_HLEN {
            bump(&self.stats.rx_dropped);
            return Err(RxError::Malformed);
        }

        let mut buf = Vec::new();
        if buf.try_reserve_exact(data.len()).is_err() {
            bump(&self.stats.rx_dropped);
            return Err(RxError::OutOfMemory);
        }
        buf.extend_from_slice(data);

        let (protocol, packet_type) = match classify(&buf, &self.mac()) {
            Some(c) => c,
            None => {
                bump(&self.stats.rx_dropped);
                return Err(RxError::Malformed);
            }
        };

        let checksum = match meta.checksum {
            Some(info) if info.ip_checksum_succeeded() => RxChecksum::Unnecessary,
            _ => RxChecksum::None,
        };

        bump(&self.stats.rx_packets);
        add(&self.stats.rx_bytes, buf.len() as u64);

        trace!("netvsc: rx {} bytes on queue {}", buf.len(), queue);
        self.stack.deliver(RxFrame {
            data: buf,
            protocol,
            packet_type,
            checksum,
            vlan: meta.vlan,
            queue,
        });
        Ok(())
    }

    /// Decode an RNDIS packet message and deliver its frame.
    pub fn receive_rndis(&self, queue: u16, message: &[u8]) -> Result<(), RxError> {
        match parse_packet(message) {
            Ok(pkt) => self.receive(
                queue,
                pkt.data,
                RxMeta {
                    checksum: pkt.checksum,
                    vlan: pkt.vlan,
                },
            ),
            Err(e) => {
                debug!("netvsc: bad RNDIS packet on queue {}: {:?}", queue, e);
                bump(&self.stats.rx_dropped);
                Err(RxError::Malformed)
            }
        }
    }
}
