//! Wire-level data types.
//!
//! # Reference
//! [MS-RNDIS], IEEE 802.1Q

pub mod ethernet;
pub mod rndis;

// Re-exports
pub use ethernet::{MacAddress, PacketType, VlanTci, ETH_ALEN, ETH_HLEN, ETH_DATA_LEN, ETH_MIN_MTU};
pub use rndis::{ChecksumInfo, PacketFilter, RndisError, RxPacket, TxHeader, RNDIS_TX_HEADER_MAX};
