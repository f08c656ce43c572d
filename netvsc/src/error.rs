//! NetVSC error types.
//!
//! Per-packet failures stay local to the packet (`TxError`, `RxError`).
//! `NetvscError` is what control-path operations surface.

use core::fmt;

use crate::driver::packet::TxFrame;

pub type Result<T> = core::result::Result<T, NetvscError>;

/// Failure reported by the channel collaborator for control requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelError {
    /// Host did not answer in time.
    Timeout,
    /// Host or ring is out of resources.
    NoResources,
    /// Host rejected the request with an NVSP/RNDIS status code.
    Rejected(u32),
    /// Channel is not connected.
    NotConnected,
}

impl fmt::Display for ChannelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => write!(f, "Channel request timed out"),
            Self::NoResources => write!(f, "Channel out of resources"),
            Self::Rejected(status) => write!(f, "Host rejected request (status {:#x})", status),
            Self::NotConnected => write!(f, "Channel not connected"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetvscError {
    /// Transient shortage (allocation, ring space). Retryable.
    ResourceExhaustion,
    /// Frame needs more page buffers than the transport allows.
    FrameTooLarge,
    /// Transport rejected a send with the given status.
    TransportFailure(i32),
    /// Device is being removed or is no longer registered.
    DeviceUnavailable,
    /// MTU outside the range the negotiated protocol allows.
    InvalidMtu { mtu: u32, min: u32, max: u32 },
    /// Not a usable unicast MAC address.
    InvalidAddress,
    /// Control request to the channel failed.
    Channel(ChannelError),
    /// Configuration rejected at attach.
    InvalidConfig(&'static str),
}

impl From<ChannelError> for NetvscError {
    fn from(e: ChannelError) -> Self {
        NetvscError::Channel(e)
    }
}

impl fmt::Display for NetvscError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ResourceExhaustion => write!(f, "Resources temporarily exhausted"),
            Self::FrameTooLarge => write!(f, "Frame exceeds page buffer limit"),
            Self::TransportFailure(status) => write!(f, "Transport send failed ({})", status),
            Self::DeviceUnavailable => write!(f, "Device unavailable"),
            Self::InvalidMtu { mtu, min, max } => {
                write!(f, "Invalid MTU {} (allowed {}..={})", mtu, min, max)
            }
            Self::InvalidAddress => write!(f, "Invalid MAC address"),
            Self::Channel(e) => write!(f, "Channel error: {}", e),
            Self::InvalidConfig(what) => write!(f, "Invalid configuration: {}", what),
        }
    }
}

/// Why the pipeline released a frame on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// Packet descriptor allocation failed.
    OutOfMemory,
    /// Channel refused the send with a non-retryable status.
    TransportFailure(i32),
    /// Device is going away.
    DeviceUnavailable,
}

impl From<DropReason> for NetvscError {
    fn from(reason: DropReason) -> Self {
        match reason {
            DropReason::OutOfMemory => NetvscError::ResourceExhaustion,
            DropReason::TransportFailure(status) => NetvscError::TransportFailure(status),
            DropReason::DeviceUnavailable => NetvscError::DeviceUnavailable,
        }
    }
}

/// TX outcome for a frame that was not accepted.
///
/// Variants carrying a `TxFrame` hand ownership back to the caller.
pub enum TxError {
    /// Queue stopped or ring full. Retry later; nothing was lost.
    Busy(TxFrame),
    /// Needs more page buffers than the transport allows. Counted as dropped.
    FrameTooLarge(TxFrame),
    /// Frame was released by the pipeline and counted as dropped.
    Dropped(DropReason),
}

impl TxError {
    /// Whether the caller may simply retry the same frame.
    pub fn is_busy(&self) -> bool {
        matches!(self, TxError::Busy(_))
    }

    /// Recover the frame if ownership came back.
    pub fn into_frame(self) -> Option<TxFrame> {
        match self {
            TxError::Busy(frame) | TxError::FrameTooLarge(frame) => Some(frame),
            TxError::Dropped(_) => None,
        }
    }
}

impl fmt::Debug for TxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TxError::Busy(frame) => write!(f, "Busy({} bytes)", frame.len()),
            TxError::FrameTooLarge(frame) => write!(f, "FrameTooLarge({} bytes)", frame.len()),
            TxError::Dropped(reason) => write!(f, "Dropped({:?})", reason),
        }
    }
}

impl From<&TxError> for NetvscError {
    fn from(e: &TxError) -> Self {
        match e {
            TxError::Busy(_) => NetvscError::ResourceExhaustion,
            TxError::FrameTooLarge(_) => NetvscError::FrameTooLarge,
            TxError::Dropped(reason) => (*reason).into(),
        }
    }
}

/// RX rejection. The caller reports failure status back to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RxError {
    /// Device unregistered, removing, or mid-reconfiguration.
    DeviceUnavailable,
    /// Could not allocate the upward frame.
    OutOfMemory,
    /// Buffer too short or RNDIS message inconsistent.
    Malformed,
}

impl fmt::Display for RxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DeviceUnavailable => write!(f, "Device unavailable"),
            Self::OutOfMemory => write!(f, "Out of memory"),
            Self::Malformed => write!(f, "Malformed receive buffer"),
        }
    }
}
