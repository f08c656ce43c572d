//! Driver trait definitions.
//!
//! `Channel` is the transport below the driver, `NetStack` the network
//! stack above it. `NetDeviceOps` is what the driver exposes upward.

use crate::config::ChannelParams;
use crate::dma::PhysAddr;
use crate::error::{ChannelError, Result, TxError};
use crate::queue::SendTable;
use crate::types::{MacAddress, PacketFilter};

use super::packet::{TxFrame, TxPacket};
use super::rx::RxFrame;

/// What the host reported when the channel came up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelInfo {
    /// Permanent MAC address.
    pub mac: MacAddress,
    /// Queues (primary + sub-channels) the host opened.
    pub queues: u16,
    /// Host-provided send indirection table, if any.
    pub send_table: Option<SendTable>,
    /// Negotiated NVSP protocol version.
    pub protocol_version: u32,
    /// Media state at connect time.
    pub link_up: bool,
}

/// Submit refusal. The packet comes back to the driver either way.
pub enum SubmitError {
    /// Ring full. Retryable.
    Busy(TxPacket),
    /// Permanent failure with transport status.
    Failed { packet: TxPacket, status: i32 },
}

/// Hypervisor transport collaborator.
///
/// All methods may be called concurrently. `submit` is called from several
/// TX queues at once; each accepted packet must be handed back exactly once
/// through `NetvscDevice::send_complete`.
pub trait Channel: Send + Sync {
    /// Open the channel and negotiate. Blocks until the host answers.
    fn connect(&self, params: &ChannelParams) -> core::result::Result<ChannelInfo, ChannelError>;

    /// Tear the channel down. Outstanding packets are completed first.
    fn disconnect(&self);

    /// Start receive (program the default packet filter).
    fn start(&self) -> core::result::Result<(), ChannelError>;

    /// Stop receive.
    fn stop(&self);

    /// Hand a built packet to the host.
    ///
    /// The channel may copy the frame into its send buffer; it then records
    /// the slot with `TxPacket::set_send_buffer_index` and may release the
    /// frame with `TxPacket::take_frame`.
    fn submit(&self, packet: TxPacket) -> core::result::Result<(), SubmitError>;

    fn set_packet_filter(&self, filter: PacketFilter) -> core::result::Result<(), ChannelError>;

    fn set_mac_address(&self, mac: &MacAddress) -> core::result::Result<(), ChannelError>;

    /// Guest physical address of a driver-owned buffer.
    fn virt_to_phys(&self, vaddr: usize) -> PhysAddr {
        vaddr as PhysAddr
    }
}

/// Upper network stack collaborator.
pub trait NetStack: Send + Sync {
    /// Hand a received frame up.
    fn deliver(&self, frame: RxFrame);

    /// Carrier went up or down.
    fn carrier_changed(&self, up: bool);

    /// Announce our addresses to peers (gratuitous ARP and friends).
    fn notify_peers(&self);

    /// The host signalled a network change; refresh addressing.
    fn refresh_network(&self);
}

/// Operations a NIC exposes to the network stack.
pub trait NetDeviceOps {
    fn open(&self) -> Result<()>;

    fn close(&self) -> Result<()>;

    /// Transmit a frame.
    ///
    /// # Returns
    /// - `Ok(())`: accepted; released later on completion
    /// - `Err(TxError::Busy(frame))`: try again later
    ///
    /// # Contract
    /// - MUST NOT block on control operations
    fn start_xmit(&self, frame: TxFrame) -> core::result::Result<(), TxError>;

    fn select_queue(&self, frame: &TxFrame) -> u16;

    fn change_mtu(&self, mtu: u32) -> Result<()>;

    fn set_mac_address(&self, mac: MacAddress) -> Result<()>;

    fn set_rx_mode(&self, promiscuous: bool);

    /// Current carrier.
    fn link_up(&self) -> bool;
}
