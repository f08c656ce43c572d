//! Recording collaborators for integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use netvsc::dma::PAGE_SIZE;
use netvsc::queue::SendTable;
use netvsc::{
    Channel, ChannelError, ChannelInfo, ChannelParams, DeviceConfig, MacAddress, NetStack,
    NetvscDevice, PacketFilter, RxFrame, SubmitError, TxFrame, TxPacket,
};

pub const HOST_MAC: MacAddress = [0x00, 0x15, 0x5d, 0x10, 0x20, 0x30];
pub const PEER_MAC: MacAddress = [0x00, 0x15, 0x5d, 0xaa, 0xbb, 0xcc];

/// Protocol version that allows jumbo frames.
pub const NVSP_V2: u32 = 0x30002;
pub const NVSP_V1: u32 = 0x2;

// ═══════════════════════════════════════════════════════════════════════════
// Channel
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitMode {
    Accept,
    /// Copy into a "send buffer": set the index and release the frame.
    CopyToSendBuffer,
}

pub struct ChannelState {
    pub info: ChannelInfo,
    pub connected: bool,
    pub started: bool,
    pub connects: Vec<ChannelParams>,
    pub disconnects: usize,
    pub starts: usize,
    pub stops: usize,
    pub filters: Vec<PacketFilter>,
    pub macs: Vec<MacAddress>,
    pub fail_connect: Option<ChannelError>,
    pub fail_start: Option<ChannelError>,
    pub reject_mac: bool,
    pub busy_next: usize,
    pub fail_next: Option<i32>,
    pub mode: SubmitMode,
}

type ConnectHook = Box<dyn Fn() + Send + Sync>;

pub struct MockChannel {
    pub state: Mutex<ChannelState>,
    /// Accepted packets awaiting completion.
    pub submitted: Mutex<Vec<TxPacket>>,
    pub submit_calls: AtomicUsize,
    on_connect: Mutex<Option<ConnectHook>>,
}

pub fn channel_info(queues: u16, protocol_version: u32) -> ChannelInfo {
    ChannelInfo {
        mac: HOST_MAC,
        queues,
        send_table: None,
        protocol_version,
        link_up: true,
    }
}

impl MockChannel {
    pub fn new(info: ChannelInfo) -> Self {
        Self {
            state: Mutex::new(ChannelState {
                info,
                connected: false,
                started: false,
                connects: Vec::new(),
                disconnects: 0,
                starts: 0,
                stops: 0,
                filters: Vec::new(),
                macs: Vec::new(),
                fail_connect: None,
                fail_start: None,
                reject_mac: false,
                busy_next: 0,
                fail_next: None,
                mode: SubmitMode::Accept,
            }),
            submitted: Mutex::new(Vec::new()),
            submit_calls: AtomicUsize::new(0),
            on_connect: Mutex::new(None),
        }
    }

    pub fn state(&self) -> std::sync::MutexGuard<'_, ChannelState> {
        self.state.lock().unwrap()
    }

    pub fn take_submitted(&self) -> Vec<TxPacket> {
        std::mem::take(&mut *self.submitted.lock().unwrap())
    }

    pub fn set_on_connect(&self, hook: ConnectHook) {
        *self.on_connect.lock().unwrap() = Some(hook);
    }
}

impl Channel for MockChannel {
    fn connect(&self, params: &ChannelParams) -> Result<ChannelInfo, ChannelError> {
        if let Some(hook) = self.on_connect.lock().unwrap().as_ref() {
            hook();
        }
        let mut st = self.state();
        st.connects.push(*params);
        if let Some(e) = st.fail_connect {
            return Err(e);
        }
        st.connected = true;
        Ok(st.info)
    }

    fn disconnect(&self) {
        let mut st = self.state();
        st.connected = false;
        st.disconnects += 1;
    }

    fn start(&self) -> Result<(), ChannelError> {
        let mut st = self.state();
        if let Some(e) = st.fail_start {
            return Err(e);
        }
        if !st.connected {
            return Err(ChannelError::NotConnected);
        }
        st.started = true;
        st.starts += 1;
        Ok(())
    }

    fn stop(&self) {
        let mut st = self.state();
        st.started = false;
        st.stops += 1;
    }

    fn submit(&self, mut packet: TxPacket) -> Result<(), SubmitError> {
        self.submit_calls.fetch_add(1, Ordering::SeqCst);
        {
            let mut st = self.state();
            // The copy happens before ring space is checked.
            if st.mode == SubmitMode::CopyToSendBuffer {
                packet.set_send_buffer_index(0);
                drop(packet.take_frame());
            }
            if st.busy_next > 0 {
                st.busy_next -= 1;
                return Err(SubmitError::Busy(packet));
            }
            if let Some(status) = st.fail_next.take() {
                return Err(SubmitError::Failed { packet, status });
            }
        }
        self.submitted.lock().unwrap().push(packet);
        Ok(())
    }

    fn set_packet_filter(&self, filter: PacketFilter) -> Result<(), ChannelError> {
        self.state().filters.push(filter);
        Ok(())
    }

    fn set_mac_address(&self, mac: &MacAddress) -> Result<(), ChannelError> {
        let mut st = self.state();
        if st.reject_mac {
            return Err(ChannelError::Rejected(0xc000_0001));
        }
        st.macs.push(*mac);
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Stack
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackEvent {
    Carrier(bool),
    NotifyPeers,
    Refresh,
}

#[derive(Default)]
pub struct RecordingStack {
    pub events: Mutex<Vec<StackEvent>>,
    pub frames: Mutex<Vec<RxFrame>>,
    /// Sleep inside `notify_peers` (ms) to widen race windows.
    pub notify_delay_ms: AtomicUsize,
    pub notify_started: AtomicUsize,
}

impl RecordingStack {
    pub fn take_events(&self) -> Vec<StackEvent> {
        std::mem::take(&mut *self.events.lock().unwrap())
    }

    pub fn take_frames(&self) -> Vec<RxFrame> {
        std::mem::take(&mut *self.frames.lock().unwrap())
    }
}

impl NetStack for RecordingStack {
    fn deliver(&self, frame: RxFrame) {
        self.frames.lock().unwrap().push(frame);
    }

    fn carrier_changed(&self, up: bool) {
        self.events.lock().unwrap().push(StackEvent::Carrier(up));
    }

    fn notify_peers(&self) {
        self.notify_started.fetch_add(1, Ordering::SeqCst);
        let delay = self.notify_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            std::thread::sleep(std::time::Duration::from_millis(delay as u64));
        }
        self.events.lock().unwrap().push(StackEvent::NotifyPeers);
    }

    fn refresh_network(&self) {
        self.events.lock().unwrap().push(StackEvent::Refresh);
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Helpers
// ═══════════════════════════════════════════════════════════════════════════

pub type TestDevice = NetvscDevice<MockChannel, RecordingStack>;

pub fn attach(config: DeviceConfig, info: ChannelInfo) -> TestDevice {
    NetvscDevice::attach(config, MockChannel::new(info), RecordingStack::default())
        .expect("attach")
}

/// Attached, opened, initial announcement run, events cleared.
pub fn open_device(queues: u16) -> Arc<TestDevice> {
    let dev = attach(DeviceConfig::new().with_max_queues(queues), channel_info(queues, NVSP_V2));
    dev.open().expect("open");
    dev.run_deferred(0);
    dev.stack().take_events();
    Arc::new(dev)
}

pub fn with_send_table(mut info: ChannelInfo, table: SendTable) -> ChannelInfo {
    info.send_table = Some(table);
    info
}

/// Ethernet frame with a zeroed payload.
pub fn eth_frame(dst: MacAddress, ethertype: u16, payload: usize) -> Vec<u8> {
    let mut f = Vec::with_capacity(14 + payload);
    f.extend_from_slice(&dst);
    f.extend_from_slice(&PEER_MAC);
    f.extend_from_slice(&ethertype.to_be_bytes());
    f.resize(14 + payload, 0);
    f
}

/// Ethernet + IPv4 (IHL 5) + TCP ports.
pub fn tcp_frame(src: [u8; 4], dst: [u8; 4], sport: u16, dport: u16) -> Vec<u8> {
    let mut f = eth_frame(HOST_MAC, 0x0800, 0);
    let mut ip = [0u8; 20];
    ip[0] = 0x45;
    ip[2..4].copy_from_slice(&40u16.to_be_bytes());
    ip[8] = 64;
    ip[9] = 6;
    ip[12..16].copy_from_slice(&src);
    ip[16..20].copy_from_slice(&dst);
    f.extend_from_slice(&ip);
    f.extend_from_slice(&sport.to_be_bytes());
    f.extend_from_slice(&dport.to_be_bytes());
    f.resize(f.len() + 16, 0);
    f
}

pub fn small_frame() -> TxFrame {
    TxFrame::new(eth_frame(PEER_MAC, 0x0800, 46))
}

/// Frame whose fragments need `pages` page buffers.
pub fn fragmented_frame(pages: usize) -> TxFrame {
    let mut frame = TxFrame::new(eth_frame(PEER_MAC, 0x0800, 0));
    for i in 0..pages {
        frame = frame.with_fragment(0x10_0000 + (i * PAGE_SIZE) as u64 * 2, PAGE_SIZE as u32);
    }
    frame
}

/// Complete everything the channel has accepted so far.
pub fn complete_all(dev: &TestDevice) -> usize {
    let packets = dev.channel().take_submitted();
    let n = packets.len();
    for p in packets {
        dev.send_complete(p);
    }
    n
}

pub fn le32(buf: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
}
