//! Toeplitz flow hash for transmit queue steering.
//!
//! Same hash the host's vRSS uses, so a flow's TX queue lines up with the
//! queue its RX lands on.
//!
//! # Reference
//! Microsoft "RSS Hashing Functions" and "Verifying the RSS Hash Calculation"

use smoltcp::wire::{EthernetFrame, EthernetProtocol, IpProtocol, Ipv4Packet};

/// RSS key length in bytes.
pub const HASH_KEYLEN: usize = 40;

pub type HashKey = [u8; HASH_KEYLEN];

/// Default Microsoft RSS key.
pub const DEFAULT_HASH_KEY: HashKey = [
    0x6d, 0x5a, 0x56, 0xda, 0x25, 0x5b, 0x0e, 0xc2, 0x41, 0x67, 0x25, 0x3d, 0x43, 0xa3, 0x8f,
    0xb0, 0xd0, 0xca, 0x2b, 0xcb, 0xae, 0x7b, 0x30, 0xb4, 0x77, 0xcb, 0x2d, 0xa3, 0x80, 0x30,
    0xf2, 0x0c, 0x6a, 0x42, 0xb7, 0x3b, 0xbe, 0xac, 0x01, 0xfa,
];

/// Toeplitz hash of `data` (network byte order) under `key`.
///
/// Result is in host byte order. `key` must be at least 4 bytes.
pub fn toeplitz_hash(key: &[u8], data: &[u8]) -> u32 {
    debug_assert!(key.len() >= 4);

    // Bits 63..32: current 32-bit key window. Bits 31..24: next key byte.
    let mut window = (u32::from_be_bytes([key[0], key[1], key[2], key[3]]) as u64) << 32;
    let mut next = 4 % key.len();
    let mut result = 0u32;

    for &byte in data {
        window |= (key[next] as u64) << 24;
        next = (next + 1) % key.len();

        let mut bits = byte;
        for _ in 0..8 {
            if bits & 0x80 != 0 {
                result ^= (window >> 32) as u32;
            }
            bits <<= 1;
            window <<= 1;
        }
    }

    result
}

/// IPv4 flow tuple in wire order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlowKey {
    pub src: [u8; 4],
    pub dst: [u8; 4],
    /// TCP source and destination port.
    pub ports: Option<(u16, u16)>,
}

impl FlowKey {
    /// Hash input: saddr, daddr[, sport, dport]. Returns buffer and used length.
    pub fn to_bytes(&self) -> ([u8; 12], usize) {
        let mut buf = [0u8; 12];
        buf[0..4].copy_from_slice(&self.src);
        buf[4..8].copy_from_slice(&self.dst);
        match self.ports {
            Some((sport, dport)) => {
                buf[8..10].copy_from_slice(&sport.to_be_bytes());
                buf[10..12].copy_from_slice(&dport.to_be_bytes());
                (buf, 12)
            }
            None => (buf, 8),
        }
    }
}

/// Extract the flow tuple from the linear head of an Ethernet frame.
///
/// Only IPv4 is hashed. Ports are taken from TCP only, and only when the
/// TCP header starts inside `linear`.
pub fn flow_key(linear: &[u8]) -> Option<FlowKey> {
    let eth = EthernetFrame::new_checked(linear).ok()?;
    if eth.ethertype() != EthernetProtocol::Ipv4 {
        return None;
    }

    // The payload may continue in fragments, so total_len cannot be checked
    // against this slice.
    let ip_bytes = eth.payload();
    if ip_bytes.len() < 20 {
        return None;
    }
    let ip = Ipv4Packet::new_unchecked(ip_bytes);
    if ip.version() != 4 {
        return None;
    }
    let header_len = ip.header_len() as usize;
    if header_len < 20 {
        return None;
    }

    let ports = if ip.next_header() == IpProtocol::Tcp {
        ip_bytes.get(header_len..header_len + 4).map(|p| {
            (u16::from_be_bytes([p[0], p[1]]), u16::from_be_bytes([p[2], p[3]]))
        })
    } else {
        None
    };

    Some(FlowKey {
        src: ip.src_addr().0,
        dst: ip.dst_addr().0,
        ports,
    })
}

/// Flow hasher bound to one RSS key.
#[derive(Clone)]
pub struct FlowHasher {
    key: HashKey,
}

impl FlowHasher {
    pub const fn new(key: HashKey) -> Self {
        Self { key }
    }

    pub fn key(&self) -> &HashKey {
        &self.key
    }

    pub fn hash_key(&self, flow: &FlowKey) -> u32 {
        let (buf, len) = flow.to_bytes();
        toeplitz_hash(&self.key, &buf[..len])
    }

    /// Hash of an outbound frame, `None` if it is not IPv4.
    pub fn hash_frame(&self, linear: &[u8]) -> Option<u32> {
        flow_key(linear).map(|flow| self.hash_key(&flow))
    }
}

impl Default for FlowHasher {
    fn default() -> Self {
        Self::new(DEFAULT_HASH_KEY)
    }
}
