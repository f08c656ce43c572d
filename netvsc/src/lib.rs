//! Hyper-V synthetic NIC (NetVSC) guest driver core.
//!
//! Sits between a guest network stack (`NetStack`) and the VMBus channel
//! (`Channel`): wraps outbound frames in RNDIS packet messages described by
//! page buffers, steers them across vRSS queues with the Toeplitz hash,
//! copies inbound frames up, and tracks host link state.
//!
//! ```text
//!  NetStack ──TxFrame──▶ NetvscDevice::transmit ──TxPacket──▶ Channel::submit
//!  NetStack ◀──RxFrame── NetvscDevice::receive  ◀── host receive buffer
//!  NetStack ◀─ carrier ─ LinkState ◀─ RNDIS status ◀─ host
//! ```

#![no_std]

extern crate alloc;

#[cfg(test)]
extern crate std;

pub mod config;
pub mod dma;
pub mod driver;
pub mod error;
pub mod hash;
pub mod link;
pub mod queue;
pub mod types;
pub mod work;

pub use config::{ChannelParams, DeviceConfig, ReannouncePolicy, ReannounceTrigger};
pub use driver::{
    Channel, ChannelInfo, NetDeviceOps, NetStack, NetvscDevice, RxChecksum, RxFrame, RxMeta,
    StatsSnapshot, SubmitError, TxFrame, TxPacket,
};
pub use error::{ChannelError, DropReason, NetvscError, Result, RxError, TxError};
pub use hash::FlowHasher;
pub use link::LinkEvent;
pub use types::{MacAddress, PacketFilter, VlanTci};
