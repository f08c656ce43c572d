//! NetVSC device lifecycle.
//!
//! # Locking
//!
//! - `control`: reconfiguration lock. Taken by attach/open/close/MTU
//!   change/MAC change/remove and (with `try_lock`) by deferred work.
//!   Never taken on the TX or RX path.
//! - Per-queue TX locks (`queue::TxQueue`): held by a submitter while it
//!   builds and submits one packet. Reconfiguration stops a queue, then
//!   takes its lock once to drain.
//! - Everything the data path reads is atomic.
//!
//! Upward `NetStack` callbacks are never made with `control` held.

use alloc::sync::Arc;
use core::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};

use log::{debug, error, info, warn};
use spin::Mutex;

use crate::config::{ChannelParams, DeviceConfig};
use crate::error::{NetvscError, Result, TxError};
use crate::hash::FlowHasher;
use crate::link::{LinkEvent, LinkState};
use crate::queue::{default_send_table, QueueTable, TxQueues};
use crate::types::ethernet::{is_valid_unicast, mac_from_u64, mac_to_u64, ETH_DATA_LEN, ETH_MIN_MTU};
use crate::types::{MacAddress, PacketFilter};
use crate::work::DelayedWork;

use super::packet::TxFrame;
use super::stats::{DeviceStats, StatsSnapshot};
use super::traits::{Channel, ChannelInfo, NetDeviceOps, NetStack};

/// First NVSP version that allows jumbo frames.
pub const NVSP_PROTOCOL_VERSION_2: u32 = 0x30002;
/// MTU limit from NVSP version 2 on.
pub const NETVSC_MTU: u32 = 65536;

/// MTU bounds for a negotiated protocol version.
pub fn mtu_range(protocol_version: u32) -> (u32, u32) {
    if protocol_version >= NVSP_PROTOCOL_VERSION_2 {
        (ETH_MIN_MTU, NETVSC_MTU)
    } else {
        (ETH_MIN_MTU, ETH_DATA_LEN)
    }
}

/// State only touched under the reconfiguration lock.
struct ControlState {
    opened: bool,
    connected: bool,
    protocol_version: u32,
}

/// One synthetic NIC instance.
pub struct NetvscDevice<C: Channel, S: NetStack> {
    pub(crate) config: DeviceConfig,
    pub(crate) channel: C,
    pub(crate) stack: S,
    pub(crate) hasher: FlowHasher,
    pub(crate) queue_table: QueueTable,
    pub(crate) tx_queues: TxQueues,
    pub(crate) stats: DeviceStats,
    pub(crate) in_flight: Arc<AtomicUsize>,

    mac: AtomicU64,
    mtu: AtomicU32,
    pub(crate) registered: AtomicBool,
    pub(crate) removing: AtomicBool,
    pub(crate) mtu_changing: AtomicBool,
    promiscuous: AtomicBool,

    link: LinkState,
    rx_mode_work: DelayedWork,
    retry_ticks: u64,

    control: Mutex<ControlState>,
}

impl<C: Channel, S: NetStack> NetvscDevice<C, S> {
    /// Bring up a device on `channel` and register it with `stack`.
    ///
    /// On failure nothing stays registered and the channel is disconnected.
    pub fn attach(config: DeviceConfig, channel: C, stack: S) -> Result<Self> {
        let config = config.validated()?;
        let deferred_ticks = config.ms_to_ticks(config.reannounce.deferred_delay_ms);
        let retry_ticks = config.ms_to_ticks(config.link_retry_delay_ms).max(1);

        let dev = Self {
            hasher: FlowHasher::new(config.hash_key),
            queue_table: QueueTable::new(),
            tx_queues: TxQueues::new(config.max_queues as usize),
            stats: DeviceStats::default(),
            in_flight: Arc::new(AtomicUsize::new(0)),
            mac: AtomicU64::new(0),
            mtu: AtomicU32::new(config.initial_mtu),
            registered: AtomicBool::new(false),
            removing: AtomicBool::new(false),
            mtu_changing: AtomicBool::new(false),
            promiscuous: AtomicBool::new(false),
            link: LinkState::new(config.reannounce, deferred_ticks),
            rx_mode_work: DelayedWork::new(),
            retry_ticks,
            control: Mutex::new(ControlState {
                opened: false,
                connected: false,
                protocol_version: 0,
            }),
            config,
            channel,
            stack,
        };

        {
            let mut ctl = dev.control.lock();
            let info = dev.connect_locked(&mut ctl, dev.config.initial_mtu).map_err(|e| {
                error!("netvsc: unable to add device: {}", e);
                e
            })?;

            let (min, max) = mtu_range(info.protocol_version);
            let mtu = dev.config.initial_mtu;
            if mtu > max {
                dev.channel.disconnect();
                ctl.connected = false;
                return Err(NetvscError::InvalidMtu { mtu, min, max });
            }
            dev.mac.store(mac_to_u64(&info.mac), Ordering::Release);
        }

        dev.registered.store(true, Ordering::Release);
        dev.link.schedule_announce(0);

        info!(
            "netvsc: attached, mac {:02x?}, {} queue(s), mtu {}",
            dev.mac(),
            dev.queue_table.active_queues(),
            dev.mtu()
        );
        Ok(dev)
    }

    /// Connect the channel and program queues. Caller holds `control`.
    fn connect_locked(&self, ctl: &mut ControlState, mtu: u32) -> Result<ChannelInfo> {
        let params = ChannelParams {
            ring_size: self.config.ring_size,
            mtu,
            max_queues: self.config.max_queues,
        };
        // The new MTU sticks even if the host refuses; a later open retries it.
        self.mtu.store(mtu, Ordering::Release);
        let info = self.channel.connect(&params)?;
        ctl.connected = true;
        ctl.protocol_version = info.protocol_version;

        let active = info.queues.clamp(1, self.tx_queues.len() as u16);
        let table = info.send_table.unwrap_or_else(|| default_send_table(active));
        self.queue_table.program(&table, active);
        self.link.set_media(info.link_up);

        debug!(
            "netvsc: channel up, nvsp {:#x}, {} queue(s)",
            info.protocol_version, active
        );
        Ok(info)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Accessors
    // ═══════════════════════════════════════════════════════════════════════

    pub fn mac(&self) -> MacAddress {
        mac_from_u64(self.mac.load(Ordering::Acquire))
    }

    pub fn mtu(&self) -> u32 {
        self.mtu.load(Ordering::Acquire)
    }

    pub fn is_registered(&self) -> bool {
        self.registered.load(Ordering::Acquire)
    }

    pub fn is_removing(&self) -> bool {
        self.removing.load(Ordering::Acquire)
    }

    pub fn is_open(&self) -> bool {
        self.control.lock().opened
    }

    pub fn is_connected(&self) -> bool {
        self.control.lock().connected
    }

    pub fn carrier(&self) -> bool {
        self.link.carrier()
    }

    pub fn link(&self) -> &LinkState {
        &self.link
    }

    pub fn active_queues(&self) -> u16 {
        self.queue_table.active_queues()
    }

    pub fn queues_stopped(&self) -> bool {
        self.tx_queues.all_stopped()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn channel(&self) -> &C {
        &self.channel
    }

    pub fn stack(&self) -> &S {
        &self.stack
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Open / close
    // ═══════════════════════════════════════════════════════════════════════

    /// Start traffic.
    pub fn open(&self) -> Result<()> {
        if self.is_removing() {
            return Err(NetvscError::DeviceUnavailable);
        }
        {
            let mut ctl = self.control.lock();
            // A remove that started meanwhile owns the teardown.
            if self.is_removing() {
                return Err(NetvscError::DeviceUnavailable);
            }
            if !ctl.connected {
                info!("netvsc: reconnecting channel on open");
                let mtu = self.mtu();
                self.connect_locked(&mut ctl, mtu)?;
            }
            if self.is_removing() {
                return Err(NetvscError::DeviceUnavailable);
            }
            self.channel.start().map_err(|e| {
                error!("netvsc: unable to open device: {}", e);
                NetvscError::from(e)
            })?;
            ctl.opened = true;
            if self.is_removing() {
                return Err(NetvscError::DeviceUnavailable);
            }
            self.tx_queues.wake(self.queue_table.active_queues());
        }

        if !self.is_removing() {
            let up = self.link.is_up();
            self.link.set_carrier(up, &self.stack);
        }
        Ok(())
    }

    /// Stop traffic and pending control work.
    pub fn close(&self) -> Result<()> {
        let mut ctl = self.control.lock();
        self.tx_queues.stop_all();
        self.link.cancel_sync();
        self.rx_mode_work.cancel_sync();
        if ctl.opened {
            self.channel.stop();
            ctl.opened = false;
        }
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Reconfiguration
    // ═══════════════════════════════════════════════════════════════════════

    /// Change the MTU by rebuilding the channel.
    ///
    /// Failure during the rebuild leaves the device closed and disconnected.
    pub fn change_mtu(&self, mtu: u32) -> Result<()> {
        if self.is_removing() {
            return Err(NetvscError::DeviceUnavailable);
        }

        let mut ctl = self.control.lock();
        if self.is_removing() {
            return Err(NetvscError::DeviceUnavailable);
        }
        let (min, max) = mtu_range(ctl.protocol_version);
        if mtu < min || mtu > max {
            return Err(NetvscError::InvalidMtu { mtu, min, max });
        }

        self.mtu_changing.store(true, Ordering::Release);
        self.rx_mode_work.cancel_sync();
        self.tx_queues.stop_all();

        let was_open = ctl.opened;
        if was_open {
            self.channel.stop();
        }
        if ctl.connected {
            self.channel.disconnect();
            ctl.connected = false;
        }

        let rebuilt = self.connect_locked(&mut ctl, mtu).and_then(|_| {
            if was_open {
                self.channel.start()?;
            }
            Ok(())
        });

        let result = match rebuilt {
            Ok(()) if self.is_removing() => Err(NetvscError::DeviceUnavailable),
            Ok(()) => {
                if was_open {
                    self.tx_queues.wake(self.queue_table.active_queues());
                }
                if self.promiscuous.load(Ordering::Acquire) {
                    self.rx_mode_work.schedule(0, 0);
                }
                info!("netvsc: mtu changed to {}", mtu);
                Ok(())
            }
            Err(e) => {
                error!("netvsc: mtu change to {} failed: {}", mtu, e);
                if ctl.connected {
                    self.channel.disconnect();
                    ctl.connected = false;
                }
                ctl.opened = false;
                Err(e)
            }
        };

        self.mtu_changing.store(false, Ordering::Release);
        drop(ctl);

        if result.is_err() && !self.is_removing() {
            self.link.set_carrier(false, &self.stack);
        }
        result
    }

    /// Set the MAC, restoring the old one if the host refuses.
    pub fn set_mac_address(&self, mac: MacAddress) -> Result<()> {
        if !is_valid_unicast(&mac) {
            return Err(NetvscError::InvalidAddress);
        }
        if self.is_removing() {
            return Err(NetvscError::DeviceUnavailable);
        }

        let _ctl = self.control.lock();
        let saved = self.mac.swap(mac_to_u64(&mac), Ordering::AcqRel);
        if let Err(e) = self.channel.set_mac_address(&mac) {
            warn!("netvsc: host refused mac change: {}", e);
            self.mac.store(saved, Ordering::Release);
            return Err(e.into());
        }
        Ok(())
    }

    /// Request promiscuous or normal filtering; applied by deferred work.
    pub fn set_rx_mode(&self, promiscuous: bool) {
        self.promiscuous.store(promiscuous, Ordering::Release);
        self.rx_mode_work.schedule(0, 0);
    }

    /// Program the packet filter. `false` if the control lock was busy.
    fn apply_rx_mode(&self) -> bool {
        let ctl = match self.control.try_lock() {
            Some(ctl) => ctl,
            None => return false,
        };
        if ctl.connected {
            let filter = PacketFilter::for_mode(self.promiscuous.load(Ordering::Acquire));
            if let Err(e) = self.channel.set_packet_filter(filter) {
                error!("netvsc: unable to set packet filter {:#x}: {}", filter.0, e);
            }
        }
        true
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Removal
    // ═══════════════════════════════════════════════════════════════════════

    /// Tear the device down. A second call reports `DeviceUnavailable`.
    pub fn remove(&self) -> Result<()> {
        if self.removing.swap(true, Ordering::AcqRel) {
            return Err(NetvscError::DeviceUnavailable);
        }

        self.link.disable();
        self.rx_mode_work.disable();
        self.tx_queues.stop_all();

        let mut ctl = self.control.lock();
        // An open or MTU change that held the lock may have woken them.
        self.tx_queues.stop_all();
        if ctl.opened {
            self.channel.stop();
            ctl.opened = false;
        }
        self.registered.store(false, Ordering::Release);
        if ctl.connected {
            self.channel.disconnect();
            ctl.connected = false;
        }
        drop(ctl);

        let outstanding = self.outstanding_packets();
        if outstanding != 0 {
            warn!("netvsc: removed with {} packet(s) outstanding", outstanding);
        }
        info!("netvsc: device removed");
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Host notifications and deferred work
    // ═══════════════════════════════════════════════════════════════════════

    pub fn on_link_event(&self, event: LinkEvent, now: u64) {
        let deliverable = self.is_registered() && !self.is_removing();
        self.link.handle_event(event, now, deliverable, &self.stack);
    }

    /// Feed an RNDIS indicate-status code. Unknown codes are ignored.
    pub fn on_rndis_status(&self, status: u32, now: u64) {
        match LinkEvent::from_rndis_status(status) {
            Some(event) => self.on_link_event(event, now),
            None => debug!("netvsc: ignoring status {:#x}", status),
        }
    }

    /// Run every deferred task that is due. Returns how many ran.
    pub fn run_deferred(&self, now: u64) -> usize {
        let mut ran = self.link.run_due(now, &self.control, self.retry_ticks, &self.stack);
        let retry = self.retry_ticks;
        if self.rx_mode_work.run_if_due(now, |ctx| {
            if !self.apply_rx_mode() {
                ctx.reschedule(retry);
            }
        }) {
            ran += 1;
        }
        ran
    }

    /// When the executor should call `run_deferred` next.
    pub fn next_deferred_deadline(&self) -> Option<u64> {
        match (self.link.next_deadline(), self.rx_mode_work.due_at()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }
}

impl<C: Channel, S: NetStack> NetDeviceOps for NetvscDevice<C, S> {
    fn open(&self) -> Result<()> {
        NetvscDevice::open(self)
    }

    fn close(&self) -> Result<()> {
        NetvscDevice::close(self)
    }

    fn start_xmit(&self, frame: TxFrame) -> core::result::Result<(), TxError> {
        self.transmit(frame)
    }

    fn select_queue(&self, frame: &TxFrame) -> u16 {
        NetvscDevice::select_queue(self, frame)
    }

    fn change_mtu(&self, mtu: u32) -> Result<()> {
        NetvscDevice::change_mtu(self, mtu)
    }

    fn set_mac_address(&self, mac: MacAddress) -> Result<()> {
        NetvscDevice::set_mac_address(self, mac)
    }

    fn set_rx_mode(&self, promiscuous: bool) {
        NetvscDevice::set_rx_mode(self, promiscuous)
    }

    fn link_up(&self) -> bool {
        self.carrier()
    }
}
