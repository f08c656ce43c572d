//! Ethernet frame helpers.
//!
//! # Reference
//! IEEE 802.3, IEEE 802.1Q

use smoltcp::wire::{EthernetAddress, EthernetFrame, EthernetProtocol};

pub const ETH_ALEN: usize = 6;
pub const ETH_HLEN: usize = 14;
pub const ETH_DATA_LEN: u32 = 1500;
/// Smallest MTU an IPv4 host must support.
pub const ETH_MIN_MTU: u32 = 68;

/// MAC address type.
pub type MacAddress = [u8; ETH_ALEN];

pub const VLAN_PRIO_MASK: u16 = 0xe000;
pub const VLAN_PRIO_SHIFT: u16 = 13;
pub const VLAN_CFI_MASK: u16 = 0x1000;
pub const VLAN_VID_MASK: u16 = 0x0fff;

/// 802.1Q tag control information.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VlanTci(pub u16);

impl VlanTci {
    pub fn new(vid: u16, priority: u8) -> Self {
        VlanTci((vid & VLAN_VID_MASK) | (((priority as u16) << VLAN_PRIO_SHIFT) & VLAN_PRIO_MASK))
    }

    pub fn vid(&self) -> u16 {
        self.0 & VLAN_VID_MASK
    }

    pub fn priority(&self) -> u8 {
        ((self.0 & VLAN_PRIO_MASK) >> VLAN_PRIO_SHIFT) as u8
    }

    pub fn cfi(&self) -> bool {
        self.0 & VLAN_CFI_MASK != 0
    }
}

/// Whether `mac` may be assigned to an interface (unicast, non-zero).
pub fn is_valid_unicast(mac: &MacAddress) -> bool {
    let addr = EthernetAddress(*mac);
    addr.is_unicast() && *mac != [0u8; ETH_ALEN]
}

/// Pack a MAC into the low 48 bits of a u64 (for lock-free storage).
pub(crate) fn mac_to_u64(mac: &MacAddress) -> u64 {
    let mut raw = [0u8; 8];
    raw[..ETH_ALEN].copy_from_slice(mac);
    u64::from_le_bytes(raw)
}

pub(crate) fn mac_from_u64(raw: u64) -> MacAddress {
    let bytes = raw.to_le_bytes();
    let mut mac = [0u8; ETH_ALEN];
    mac.copy_from_slice(&bytes[..ETH_ALEN]);
    mac
}

/// How a received frame was addressed relative to this interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketType {
    /// Addressed to our MAC.
    Host,
    Broadcast,
    Multicast,
    /// Unicast to someone else (promiscuous mode).
    OtherHost,
}

/// Classify an Ethernet frame: EtherType plus addressing.
///
/// Returns `None` if the buffer cannot hold an Ethernet header.
pub fn classify(frame: &[u8], own_mac: &MacAddress) -> Option<(EthernetProtocol, PacketType)> {
    let eth = EthernetFrame::new_checked(frame).ok()?;
    let dst = eth.dst_addr();

    let pkt_type = if dst.is_broadcast() {
        PacketType::Broadcast
    } else if dst.is_multicast() {
        PacketType::Multicast
    } else if dst.0 == *own_mac {
        PacketType::Host
    } else {
        PacketType::OtherHost
    };

    Some((eth.ethertype(), pkt_type))
}
