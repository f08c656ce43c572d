//! Device configuration.
//!
//! Passed once at attach. Timing values are in milliseconds and converted to
//! executor ticks with `tick_hz`.

use log::info;

use crate::error::{NetvscError, Result};
use crate::hash::{HashKey, DEFAULT_HASH_KEY};
use crate::types::ethernet::{ETH_DATA_LEN, ETH_MIN_MTU};

/// Default ring buffer size in pages.
pub const DEFAULT_RING_SIZE: u32 = 128;
/// Smallest ring the host accepts.
pub const RING_SIZE_MIN: u32 = 64;

/// Largest page buffer list a single VMBus packet may carry.
pub const MAX_PAGE_BUFFER_COUNT: usize = 19;
/// Slots kept for the RNDIS header.
pub const RNDIS_HEADER_SLOTS: usize = 2;

/// Upper bound on vRSS channels.
pub const VRSS_CHANNEL_MAX: u16 = 64;

pub const DEFAULT_TICK_HZ: u64 = 1000;
pub const DEFAULT_REANNOUNCE_DELAY_MS: u64 = 20;
pub const DEFAULT_LINK_RETRY_DELAY_MS: u64 = 10;

/// When a link-up is announced a second time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReannounceTrigger {
    /// Single immediate announcement.
    Never,
    /// Deferred re-announcement only after a network change.
    OnNetworkChange,
    /// Deferred re-announcement on every connect.
    Always,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReannouncePolicy {
    pub deferred_delay_ms: u64,
    pub trigger: ReannounceTrigger,
}

impl ReannouncePolicy {
    pub const fn never() -> Self {
        Self { deferred_delay_ms: 0, trigger: ReannounceTrigger::Never }
    }

    /// Whether a connect should also schedule the deferred announcement.
    pub fn wants_deferred(&self, change_pending: bool) -> bool {
        match self.trigger {
            ReannounceTrigger::Never => false,
            ReannounceTrigger::OnNetworkChange => change_pending,
            ReannounceTrigger::Always => true,
        }
    }
}

impl Default for ReannouncePolicy {
    fn default() -> Self {
        Self {
            deferred_delay_ms: DEFAULT_REANNOUNCE_DELAY_MS,
            trigger: ReannounceTrigger::OnNetworkChange,
        }
    }
}

/// NetVSC device configuration.
#[derive(Debug, Clone)]
pub struct DeviceConfig {
    /// VMBus ring size in pages.
    pub ring_size: u32,
    /// Transport page buffer limit per packet (header slots included).
    pub max_page_buffers: usize,
    /// Queues requested from the host.
    pub max_queues: u16,
    /// RSS key used for TX queue steering.
    pub hash_key: HashKey,
    /// Executor ticks per second.
    pub tick_hz: u64,
    pub initial_mtu: u32,
    pub reannounce: ReannouncePolicy,
    /// Delay before deferred link work retries a contended lock.
    pub link_retry_delay_ms: u64,
}

impl DeviceConfig {
    pub fn new() -> Self {
        Self {
            ring_size: DEFAULT_RING_SIZE,
            max_page_buffers: MAX_PAGE_BUFFER_COUNT,
            max_queues: 1,
            hash_key: DEFAULT_HASH_KEY,
            tick_hz: DEFAULT_TICK_HZ,
            initial_mtu: ETH_DATA_LEN,
            reannounce: ReannouncePolicy::default(),
            link_retry_delay_ms: DEFAULT_LINK_RETRY_DELAY_MS,
        }
    }

    pub fn with_ring_size(mut self, pages: u32) -> Self {
        self.ring_size = pages;
        self
    }

    pub fn with_max_page_buffers(mut self, count: usize) -> Self {
        self.max_page_buffers = count;
        self
    }

    pub fn with_max_queues(mut self, queues: u16) -> Self {
        self.max_queues = queues;
        self
    }

    pub fn with_hash_key(mut self, key: HashKey) -> Self {
        self.hash_key = key;
        self
    }

    pub fn with_tick_hz(mut self, hz: u64) -> Self {
        self.tick_hz = hz;
        self
    }

    pub fn with_initial_mtu(mut self, mtu: u32) -> Self {
        self.initial_mtu = mtu;
        self
    }

    pub fn with_reannounce(mut self, policy: ReannouncePolicy) -> Self {
        self.reannounce = policy;
        self
    }

    pub fn with_link_retry_delay_ms(mut self, ms: u64) -> Self {
        self.link_retry_delay_ms = ms;
        self
    }

    /// Check and normalize. A too-small ring is raised to the minimum.
    pub fn validated(mut self) -> Result<Self> {
        if self.ring_size < RING_SIZE_MIN {
            self.ring_size = RING_SIZE_MIN;
            info!("netvsc: increased ring_size to {} (min allowed)", RING_SIZE_MIN);
        }
        if self.max_page_buffers <= RNDIS_HEADER_SLOTS {
            return Err(NetvscError::InvalidConfig("max_page_buffers leaves no room for data"));
        }
        if self.max_queues == 0 || self.max_queues > VRSS_CHANNEL_MAX {
            return Err(NetvscError::InvalidConfig("max_queues out of range"));
        }
        if self.tick_hz == 0 {
            return Err(NetvscError::InvalidConfig("tick_hz must be non-zero"));
        }
        if self.initial_mtu < ETH_MIN_MTU {
            return Err(NetvscError::InvalidConfig("initial_mtu below minimum"));
        }
        Ok(self)
    }

    /// Milliseconds → executor ticks, rounded up.
    pub fn ms_to_ticks(&self, ms: u64) -> u64 {
        ms.saturating_mul(self.tick_hz).saturating_add(999) / 1000
    }
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Parameters for bringing up the channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelParams {
    pub ring_size: u32,
    pub mtu: u32,
    pub max_queues: u16,
}
