//! RNDIS packet message codec.
//!
//! Every data frame crosses the channel wrapped in an RNDIS packet message:
//!
//! ```text
//!  0        8                        44          44+ppi_len
//!  ┌────────┬────────────────────────┬───────────┬──────────────┐
//!  │ msg hdr│     rndis_packet       │ per-packet│  frame data  │
//!  │type,len│ data_off, data_len, .. │   info    │ (page bufs)  │
//!  └────────┴────────────────────────┴───────────┴──────────────┘
//! ```
//!
//! All offsets inside `rndis_packet` are relative to its own start (byte 8).
//! All fields are little-endian u32.
//!
//! # Reference
//! [MS-RNDIS] §2.2.14, NDIS per-packet info (`NDIS_PER_PACKET_INFO`)

use super::ethernet::VlanTci;

pub const RNDIS_MSG_PACKET: u32 = 0x0000_0001;
pub const RNDIS_MSG_INDICATE_STATUS: u32 = 0x0000_0007;

/// Message type + message length.
pub const RNDIS_MSG_HEADER_SIZE: usize = 8;
/// Nine u32 fields.
pub const RNDIS_PACKET_SIZE: usize = 36;
/// `RNDIS_MESSAGE_SIZE(struct rndis_packet)`.
pub const RNDIS_PACKET_HEADER_SIZE: usize = RNDIS_MSG_HEADER_SIZE + RNDIS_PACKET_SIZE;

/// size, type, ppi_offset.
pub const PPI_HEADER_SIZE: usize = 12;
pub const NDIS_VLAN_PPI_SIZE: usize = PPI_HEADER_SIZE + 4;
pub const NDIS_CSUM_PPI_SIZE: usize = PPI_HEADER_SIZE + 4;

/// Largest header the TX path emits (packet header + VLAN PPI).
pub const RNDIS_TX_HEADER_MAX: usize = RNDIS_PACKET_HEADER_SIZE + NDIS_VLAN_PPI_SIZE;

// Per-packet info types.
pub const TCPIP_CHKSUM_PKTINFO: u32 = 0;
pub const IEEE_8021Q_INFO: u32 = 6;

// Indicate-status codes that matter to the link state machine.
pub const RNDIS_STATUS_MEDIA_CONNECT: u32 = 0x4001_000B;
pub const RNDIS_STATUS_MEDIA_DISCONNECT: u32 = 0x4001_000C;
pub const RNDIS_STATUS_NETWORK_CHANGE: u32 = 0x4001_0018;

// Packet filter bits (OID_GEN_CURRENT_PACKET_FILTER).
pub const NDIS_PACKET_TYPE_DIRECTED: u32 = 0x0000_0001;
pub const NDIS_PACKET_TYPE_MULTICAST: u32 = 0x0000_0002;
pub const NDIS_PACKET_TYPE_ALL_MULTICAST: u32 = 0x0000_0004;
pub const NDIS_PACKET_TYPE_BROADCAST: u32 = 0x0000_0008;
pub const NDIS_PACKET_TYPE_PROMISCUOUS: u32 = 0x0000_0020;

/// Receive packet filter programmed into the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketFilter(pub u32);

impl PacketFilter {
    pub const PROMISCUOUS: PacketFilter = PacketFilter(NDIS_PACKET_TYPE_PROMISCUOUS);
    pub const NORMAL: PacketFilter = PacketFilter(
        NDIS_PACKET_TYPE_BROADCAST | NDIS_PACKET_TYPE_ALL_MULTICAST | NDIS_PACKET_TYPE_DIRECTED,
    );

    pub fn for_mode(promiscuous: bool) -> Self {
        if promiscuous {
            Self::PROMISCUOUS
        } else {
            Self::NORMAL
        }
    }
}

/// Decode failure for inbound RNDIS messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RndisError {
    /// Buffer shorter than the fixed header.
    Truncated,
    /// Not an `RNDIS_MSG_PACKET`.
    UnexpectedType(u32),
    /// Offsets/lengths point outside the message.
    BadLayout,
}

#[inline]
fn put_u32(buf: &mut [u8], at: usize, value: u32) {
    buf[at..at + 4].copy_from_slice(&value.to_le_bytes());
}

#[inline]
fn get_u32(buf: &[u8], at: usize) -> Option<u32> {
    let bytes = buf.get(at..at + 4)?;
    Some(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

// ═══════════════════════════════════════════════════════════════════════════
// 802.1Q per-packet info
// ═══════════════════════════════════════════════════════════════════════════

/// `ndis_pkt_8021q_info`: pri:3, cfi:1, vlanid:12, reserved:16 (LSB first).
pub fn vlan_info_from_tci(tci: VlanTci) -> u32 {
    (tci.priority() as u32) | ((tci.vid() as u32) << 4)
}

pub fn vlan_info_to_tci(value: u32) -> VlanTci {
    let pri = (value & 0x7) as u16;
    let cfi = ((value >> 3) & 0x1) as u16;
    let vid = ((value >> 4) & 0xfff) as u16;
    VlanTci(vid | (cfi << 12) | (pri << 13))
}

// ═══════════════════════════════════════════════════════════════════════════
// Checksum per-packet info
// ═══════════════════════════════════════════════════════════════════════════

/// Receive half of `ndis_tcp_ip_checksum_info`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChecksumInfo(pub u32);

impl ChecksumInfo {
    const TCP_FAILED: u32 = 1 << 0;
    const UDP_FAILED: u32 = 1 << 1;
    const IP_FAILED: u32 = 1 << 2;
    const TCP_SUCCEEDED: u32 = 1 << 3;
    const UDP_SUCCEEDED: u32 = 1 << 4;
    const IP_SUCCEEDED: u32 = 1 << 5;

    pub fn ip_checksum_succeeded(&self) -> bool {
        self.0 & Self::IP_SUCCEEDED != 0
    }

    pub fn ip_checksum_failed(&self) -> bool {
        self.0 & Self::IP_FAILED != 0
    }

    pub fn tcp_checksum_succeeded(&self) -> bool {
        self.0 & Self::TCP_SUCCEEDED != 0
    }

    pub fn tcp_checksum_failed(&self) -> bool {
        self.0 & Self::TCP_FAILED != 0
    }

    pub fn udp_checksum_succeeded(&self) -> bool {
        self.0 & Self::UDP_SUCCEEDED != 0
    }

    pub fn udp_checksum_failed(&self) -> bool {
        self.0 & Self::UDP_FAILED != 0
    }

    /// Host says the IP header checksum verified.
    pub fn ip_ok() -> Self {
        ChecksumInfo(Self::IP_SUCCEEDED)
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// TX: packet message header
// ═══════════════════════════════════════════════════════════════════════════

/// Header written in front of an outbound frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxHeader {
    /// Frame length (linear + fragments).
    pub data_len: u32,
    /// Tag to pass through as an 802.1Q PPI.
    pub vlan: Option<VlanTci>,
}

impl TxHeader {
    /// Bytes this header occupies.
    pub fn size(&self) -> usize {
        RNDIS_PACKET_HEADER_SIZE + self.ppi_len()
    }

    fn ppi_len(&self) -> usize {
        if self.vlan.is_some() {
            NDIS_VLAN_PPI_SIZE
        } else {
            0
        }
    }

    /// Serialize into `out`; returns the header size.
    ///
    /// # Panics
    /// Panics if `out` is shorter than `self.size()`.
    pub fn encode(&self, out: &mut [u8]) -> usize {
        let size = self.size();
        let ppi_len = self.ppi_len();
        let out = &mut out[..size];
        out.fill(0);

        put_u32(out, 0, RNDIS_MSG_PACKET);
        put_u32(out, 4, size as u32 + self.data_len);

        let pkt = RNDIS_MSG_HEADER_SIZE;
        put_u32(out, pkt, (RNDIS_PACKET_SIZE + ppi_len) as u32); // data_offset
        put_u32(out, pkt + 4, self.data_len);
        // oob_data_offset, oob_data_len, num_oob_data_elements stay zero.
        put_u32(out, pkt + 20, RNDIS_PACKET_SIZE as u32); // per_pkt_info_offset
        put_u32(out, pkt + 24, ppi_len as u32);

        if let Some(tci) = self.vlan {
            let ppi = RNDIS_PACKET_HEADER_SIZE;
            put_u32(out, ppi, NDIS_VLAN_PPI_SIZE as u32);
            put_u32(out, ppi + 4, IEEE_8021Q_INFO);
            put_u32(out, ppi + 8, PPI_HEADER_SIZE as u32);
            put_u32(out, ppi + PPI_HEADER_SIZE, vlan_info_from_tci(tci));
        }

        size
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// RX: packet message decode
// ═══════════════════════════════════════════════════════════════════════════

/// Decoded inbound packet message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RxPacket<'a> {
    /// Ethernet frame.
    pub data: &'a [u8],
    pub checksum: Option<ChecksumInfo>,
    pub vlan: Option<VlanTci>,
}

/// Decode an `RNDIS_MSG_PACKET` and its per-packet info.
pub fn parse_packet(msg: &[u8]) -> Result<RxPacket<'_>, RndisError> {
    if msg.len() < RNDIS_PACKET_HEADER_SIZE {
        return Err(RndisError::Truncated);
    }
    let get = |at| get_u32(msg, at).ok_or(RndisError::Truncated);

    let msg_type = get(0)?;
    if msg_type != RNDIS_MSG_PACKET {
        return Err(RndisError::UnexpectedType(msg_type));
    }
    let msg_len = get(4)? as usize;
    if msg_len < RNDIS_PACKET_HEADER_SIZE || msg_len > msg.len() {
        return Err(RndisError::BadLayout);
    }
    let msg = &msg[..msg_len];

    let pkt = RNDIS_MSG_HEADER_SIZE;
    let data_offset = get(pkt)? as usize;
    let data_len = get(pkt + 4)? as usize;
    let ppi_offset = get(pkt + 20)? as usize;
    let ppi_len = get(pkt + 24)? as usize;

    let data_start = pkt.checked_add(data_offset).ok_or(RndisError::BadLayout)?;
    let data_end = data_start.checked_add(data_len).ok_or(RndisError::BadLayout)?;
    let data = msg.get(data_start..data_end).ok_or(RndisError::BadLayout)?;

    let mut checksum = None;
    let mut vlan = None;

    if ppi_len > 0 {
        let ppi_start = pkt.checked_add(ppi_offset).ok_or(RndisError::BadLayout)?;
        let ppi_end = ppi_start.checked_add(ppi_len).ok_or(RndisError::BadLayout)?;
        let mut ppis = msg.get(ppi_start..ppi_end).ok_or(RndisError::BadLayout)?;

        while !ppis.is_empty() {
            let size = get_u32(ppis, 0).ok_or(RndisError::BadLayout)? as usize;
            let kind = get_u32(ppis, 4).ok_or(RndisError::BadLayout)?;
            let value_at = get_u32(ppis, 8).ok_or(RndisError::BadLayout)? as usize;
            if size < PPI_HEADER_SIZE || size > ppis.len() {
                return Err(RndisError::BadLayout);
            }

            match kind {
                TCPIP_CHKSUM_PKTINFO => {
                    let v = get_u32(&ppis[..size], value_at).ok_or(RndisError::BadLayout)?;
                    checksum = Some(ChecksumInfo(v));
                }
                IEEE_8021Q_INFO => {
                    let v = get_u32(&ppis[..size], value_at).ok_or(RndisError::BadLayout)?;
                    vlan = Some(vlan_info_to_tci(v));
                }
                _ => {}
            }

            ppis = &ppis[size..];
        }
    }

    Ok(RxPacket { data, checksum, vlan })
}
