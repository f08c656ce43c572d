//! NetVSC driver: device lifecycle, TX/RX paths and collaborator traits.
//!
//! # Reference
//! Hyper-V Network Virtual Service Client, [MS-RNDIS]

pub mod device;
pub mod packet;
pub mod rx;
pub mod stats;
pub mod traits;
pub mod tx;

// Re-exports
pub use device::{mtu_range, NetvscDevice, NETVSC_MTU, NVSP_PROTOCOL_VERSION_2};
pub use packet::{TxFrame, TxPacket};
pub use rx::{RxChecksum, RxFrame, RxMeta};
pub use stats::StatsSnapshot;
pub use traits::{Channel, ChannelInfo, NetDeviceOps, NetStack, SubmitError};
