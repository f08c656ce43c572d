//! Attach, open/close, MTU change, MAC change, rx mode and removal.

mod common;

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use common::*;
use netvsc::config::RING_SIZE_MIN;
use netvsc::{ChannelError, DeviceConfig, NetDeviceOps, NetvscDevice, NetvscError, PacketFilter, RxMeta, RxError};

#[test]
fn test_attach_connects_and_announces() {
    let dev = attach(DeviceConfig::new().with_ring_size(16).with_max_queues(8), channel_info(4, NVSP_V2));

    let params = dev.channel().state().connects[0];
    assert_eq!(params.ring_size, RING_SIZE_MIN);
    assert_eq!(params.mtu, 1500);
    assert_eq!(params.max_queues, 8);

    assert!(dev.is_registered());
    assert_eq!(dev.mac(), HOST_MAC);
    assert_eq!(dev.active_queues(), 4);
    assert_eq!(dev.next_deferred_deadline(), Some(0));

    assert_eq!(dev.run_deferred(0), 1);
    assert_eq!(
        dev.stack().take_events(),
        [StackEvent::Carrier(true), StackEvent::NotifyPeers]
    );
    assert!(dev.link_up());
}

#[test]
fn test_attach_failure_leaves_nothing_registered() {
    let channel = MockChannel::new(channel_info(1, NVSP_V2));
    channel.state().fail_connect = Some(ChannelError::Timeout);
    let result = NetvscDevice::attach(DeviceConfig::new(), channel, RecordingStack::default());
    assert!(matches!(result, Err(NetvscError::Channel(ChannelError::Timeout))));
}

#[test]
fn test_attach_rejects_bad_config() {
    let channel = MockChannel::new(channel_info(1, NVSP_V2));
    let result = NetvscDevice::attach(DeviceConfig::new().with_max_queues(0), channel, RecordingStack::default());
    assert!(matches!(result, Err(NetvscError::InvalidConfig(_))));
}

#[test]
fn test_open_close() {
    let dev = attach(DeviceConfig::new().with_max_queues(2), channel_info(2, NVSP_V2));
    assert!(dev.queues_stopped());

    dev.open().unwrap();
    assert!(dev.is_open());
    assert!(!dev.queues_stopped());
    assert_eq!(dev.channel().state().starts, 1);
    assert!(dev.carrier());

    dev.on_link_event(netvsc::LinkEvent::NetworkChange, 5);
    dev.close().unwrap();
    assert!(!dev.is_open());
    assert!(dev.queues_stopped());
    assert_eq!(dev.channel().state().stops, 1);
    // Pending link work was cancelled.
    assert_eq!(dev.next_deferred_deadline(), None);
}

#[test]
fn test_change_mtu_limits_follow_protocol() {
    let v1 = attach(DeviceConfig::new(), channel_info(1, NVSP_V1));
    assert_eq!(
        v1.change_mtu(9000),
        Err(NetvscError::InvalidMtu { mtu: 9000, min: 68, max: 1500 })
    );
    assert_eq!(
        v1.change_mtu(67),
        Err(NetvscError::InvalidMtu { mtu: 67, min: 68, max: 1500 })
    );
    assert_eq!(v1.channel().state().connects.len(), 1);

    let v2 = open_device(1);
    assert!(v2.change_mtu(65537).is_err());
    v2.change_mtu(65536).unwrap();
}

#[test]
fn test_change_mtu_rebuilds_channel() {
    let dev = open_device(2);
    dev.change_mtu(9000).unwrap();

    {
        let st = dev.channel().state();
        assert_eq!(st.connects.len(), 2);
        assert_eq!(st.connects[1].mtu, 9000);
        assert_eq!(st.disconnects, 1);
        assert_eq!(st.starts, 2);
        assert!(st.started);
    }
    assert_eq!(dev.mtu(), 9000);
    assert!(dev.is_open());
    assert!(!dev.queues_stopped());
    dev.transmit(small_frame()).unwrap();
    complete_all(&dev);
}

#[test]
fn test_change_mtu_on_removed_device() {
    let dev = open_device(1);
    dev.remove().unwrap();
    assert_eq!(dev.change_mtu(9000), Err(NetvscError::DeviceUnavailable));
}

#[test]
fn test_submissions_during_mtu_change_are_busy() {
    let dev = open_device(1);
    let seen: Arc<Mutex<Vec<(bool, Result<(), RxError>)>>> = Arc::default();

    {
        let weak = Arc::downgrade(&dev);
        let seen = seen.clone();
        dev.channel().set_on_connect(Box::new(move || {
            if let Some(dev) = weak.upgrade() {
                let busy = dev.transmit(small_frame()).map_err(|e| e.is_busy()) == Err(true);
                let rx = dev.receive(0, &eth_frame(HOST_MAC, 0x0800, 46), RxMeta::default());
                seen.lock().unwrap().push((busy, rx));
            }
        }));
    }

    dev.change_mtu(4000).unwrap();
    assert_eq!(*seen.lock().unwrap(), [(true, Err(RxError::DeviceUnavailable))]);
    assert_eq!(dev.stats().rx_dropped, 1);
    dev.transmit(small_frame()).unwrap();
    complete_all(&dev);
}

#[test]
fn test_change_mtu_concurrent_with_transmit() {
    let dev = open_device(4);
    let stop = Arc::new(AtomicBool::new(false));
    let accepted = Arc::new(AtomicUsize::new(0));

    let producers: Vec<_> = (0..3)
        .map(|p| {
            let (dev, stop, accepted) = (dev.clone(), stop.clone(), accepted.clone());
            thread::spawn(move || {
                let mut i = 0u16;
                while !stop.load(Ordering::SeqCst) {
                    let frame = netvsc::TxFrame::new(tcp_frame([10, 0, 0, p], [10, 0, 0, 9], i, 443));
                    match dev.transmit(frame) {
                        Ok(()) => {
                            accepted.fetch_add(1, Ordering::SeqCst);
                        }
                        Err(e) => assert!(e.is_busy(), "unexpected {:?}", e),
                    }
                    i = i.wrapping_add(1);
                    if i % 32 == 0 {
                        complete_all(&dev);
                    }
                }
            })
        })
        .collect();

    for mtu in [9000, 1500, 4000, 65536, 1500] {
        dev.change_mtu(mtu).unwrap();
        assert!(!dev.queues_stopped());
        thread::yield_now();
    }

    stop.store(true, Ordering::SeqCst);
    for p in producers {
        p.join().unwrap();
    }
    complete_all(&dev);

    assert_eq!(dev.outstanding_packets(), 0);
    assert_eq!(dev.stats().tx_packets, accepted.load(Ordering::SeqCst) as u64);
    assert_eq!(dev.stats().tx_dropped, 0);
    assert_eq!(dev.mtu(), 1500);
}

#[test]
fn test_change_mtu_failure_leaves_device_closed() {
    let dev = open_device(1);
    dev.channel().state().fail_connect = Some(ChannelError::NoResources);

    assert_eq!(
        dev.change_mtu(9000),
        Err(NetvscError::Channel(ChannelError::NoResources))
    );
    assert!(!dev.is_open());
    assert!(!dev.is_connected());
    assert!(dev.queues_stopped());
    assert!(!dev.carrier());
    assert_eq!(dev.stack().take_events(), [StackEvent::Carrier(false)]);
    assert!(dev.transmit(small_frame()).unwrap_err().is_busy());

    // A later open reconnects.
    dev.channel().state().fail_connect = None;
    dev.open().unwrap();
    assert!(dev.is_connected());
    assert_eq!(dev.channel().state().connects.last().unwrap().mtu, 9000);
    assert!(dev.carrier());
}

#[test]
fn test_set_mac_address() {
    let dev = open_device(1);
    assert_eq!(dev.set_mac_address([0x01, 0, 0, 0, 0, 1]), Err(NetvscError::InvalidAddress));
    assert_eq!(dev.set_mac_address([0; 6]), Err(NetvscError::InvalidAddress));

    let new_mac = [0x00, 0x15, 0x5d, 0x77, 0x77, 0x77];
    dev.set_mac_address(new_mac).unwrap();
    assert_eq!(dev.mac(), new_mac);
    assert_eq!(dev.channel().state().macs, [new_mac]);

    dev.channel().state().reject_mac = true;
    let refused = [0x00, 0x15, 0x5d, 0x88, 0x88, 0x88];
    assert!(matches!(
        dev.set_mac_address(refused),
        Err(NetvscError::Channel(ChannelError::Rejected(_)))
    ));
    assert_eq!(dev.mac(), new_mac);
}

#[test]
fn test_rx_mode_is_deferred() {
    let dev = open_device(1);
    dev.set_rx_mode(true);
    assert!(dev.channel().state().filters.is_empty());
    assert_eq!(dev.run_deferred(0), 1);
    dev.set_rx_mode(false);
    dev.run_deferred(1);
    assert_eq!(
        dev.channel().state().filters,
        [PacketFilter::PROMISCUOUS, PacketFilter::NORMAL]
    );
}

#[test]
fn test_remove_tears_down() {
    let dev = open_device(1);
    dev.on_link_event(netvsc::LinkEvent::NetworkChange, 10);
    assert!(dev.next_deferred_deadline().is_some());

    dev.remove().unwrap();
    assert!(!dev.is_registered());
    assert!(dev.is_removing());
    assert!(!dev.is_connected());
    {
        let st = dev.channel().state();
        assert_eq!(st.stops, 1);
        assert_eq!(st.disconnects, 1);
    }

    assert_eq!(dev.next_deferred_deadline(), None);
    assert_eq!(dev.run_deferred(1000), 0);
    assert!(dev.stack().take_events().is_empty());

    assert_eq!(dev.remove(), Err(NetvscError::DeviceUnavailable));
    assert_eq!(dev.open(), Err(NetvscError::DeviceUnavailable));
    assert_eq!(
        dev.receive(0, &eth_frame(HOST_MAC, 0x0800, 46), RxMeta::default()),
        Err(RxError::DeviceUnavailable)
    );
}

/// On the next channel connect, start `remove()` on another thread and
/// wait until it has flagged the device, while the caller still holds the
/// reconfiguration lock.
fn remove_during_next_connect(dev: &Arc<TestDevice>) -> Arc<Mutex<Option<JoinHandle<()>>>> {
    let remover: Arc<Mutex<Option<JoinHandle<()>>>> = Arc::default();
    let armed = AtomicBool::new(true);
    let weak = Arc::downgrade(dev);
    let slot = remover.clone();
    dev.channel().set_on_connect(Box::new(move || {
        if !armed.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(dev) = weak.upgrade() {
            let handle = {
                let dev = dev.clone();
                thread::spawn(move || dev.remove().unwrap())
            };
            while !dev.is_removing() {
                thread::yield_now();
            }
            *slot.lock().unwrap() = Some(handle);
        }
    }));
    remover
}

#[test]
fn test_open_racing_remove_does_not_restart() {
    let dev = open_device(1);
    dev.channel().state().fail_connect = Some(ChannelError::NoResources);
    assert!(dev.change_mtu(9000).is_err());
    dev.channel().state().fail_connect = None;
    dev.stack().take_events();

    let remover = remove_during_next_connect(&dev);
    assert_eq!(dev.open(), Err(NetvscError::DeviceUnavailable));
    remover.lock().unwrap().take().unwrap().join().unwrap();

    assert!(dev.is_removing());
    assert!(!dev.is_registered());
    assert!(!dev.is_connected());
    assert!(dev.queues_stopped());
    assert!(!dev.carrier());
    assert!(dev.stack().take_events().is_empty());
    let st = dev.channel().state();
    assert!(!st.started);
    assert!(!st.connected);
}

#[test]
fn test_change_mtu_racing_remove_leaves_queues_stopped() {
    let dev = open_device(2);
    let remover = remove_during_next_connect(&dev);

    assert_eq!(dev.change_mtu(9000), Err(NetvscError::DeviceUnavailable));
    remover.lock().unwrap().take().unwrap().join().unwrap();

    assert!(dev.queues_stopped());
    assert!(!dev.is_open());
    assert!(!dev.is_connected());
    assert!(matches!(
        dev.transmit(small_frame()),
        Err(netvsc::TxError::Dropped(netvsc::DropReason::DeviceUnavailable))
    ));
    assert!(dev.stack().take_events().is_empty());
    let st = dev.channel().state();
    assert!(!st.started);
    assert!(!st.connected);
}
