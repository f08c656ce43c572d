//! Transmit queues and the vRSS send table.
//!
//! The send table maps 16 hash buckets onto queue indices. It is read
//! lock-free on every transmit and only rewritten while all queues are
//! stopped, so a reader never sees a half-programmed table.

use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, AtomicU16, Ordering};

use spin::{Mutex, MutexGuard};

/// Number of hash buckets in the host's send indirection table.
pub const VRSS_SEND_TAB_SIZE: usize = 16;

pub type SendTable = [u16; VRSS_SEND_TAB_SIZE];

/// Bucket `i` → queue `i % num_queues`.
pub fn default_send_table(num_queues: u16) -> SendTable {
    let n = num_queues.max(1);
    let mut table = [0u16; VRSS_SEND_TAB_SIZE];
    for (i, slot) in table.iter_mut().enumerate() {
        *slot = i as u16 % n;
    }
    table
}

pub struct QueueTable {
    buckets: [AtomicU16; VRSS_SEND_TAB_SIZE],
    active: AtomicU16,
}

impl QueueTable {
    pub fn new() -> Self {
        Self {
            buckets: core::array::from_fn(|_| AtomicU16::new(0)),
            active: AtomicU16::new(1),
        }
    }

    /// Reprogram table and active count. Queues must be stopped.
    pub fn program(&self, table: &SendTable, active: u16) {
        for (slot, &q) in self.buckets.iter().zip(table.iter()) {
            slot.store(q, Ordering::Relaxed);
        }
        self.active.store(active.max(1), Ordering::Release);
    }

    pub fn active_queues(&self) -> u16 {
        self.active.load(Ordering::Acquire)
    }

    pub fn bucket(&self, index: usize) -> u16 {
        self.buckets[index % VRSS_SEND_TAB_SIZE].load(Ordering::Relaxed)
    }

    /// Queue for a flow hash: `table[hash % 16] % active`.
    pub fn select(&self, hash: Option<u32>) -> u16 {
        let active = self.active_queues();
        if active <= 1 {
            return 0;
        }
        match hash {
            Some(h) => self.bucket(h as usize % VRSS_SEND_TAB_SIZE) % active,
            None => 0,
        }
    }
}

impl Default for QueueTable {
    fn default() -> Self {
        Self::new()
    }
}

/// One transmit queue: stop flag plus the lock submitters hold while
/// building and handing a packet to the channel.
pub struct TxQueue {
    stopped: AtomicBool,
    lock: Mutex<()>,
}

impl TxQueue {
    pub fn new() -> Self {
        Self {
            stopped: AtomicBool::new(true),
            lock: Mutex::new(()),
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    pub fn wake(&self) {
        self.stopped.store(false, Ordering::Release);
    }

    /// Mark stopped, then wait for the current submitter (if any) to leave.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
        drop(self.lock.lock());
    }

    /// Enter the queue. `None` if it is stopped.
    pub fn enter(&self) -> Option<MutexGuard<'_, ()>> {
        let guard = self.lock.lock();
        if self.is_stopped() {
            return None;
        }
        Some(guard)
    }
}

impl Default for TxQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// Fixed set of TX queues sized at attach.
pub struct TxQueues {
    queues: Vec<TxQueue>,
}

impl TxQueues {
    pub fn new(count: usize) -> Self {
        let mut queues = Vec::with_capacity(count);
        queues.resize_with(count.max(1), TxQueue::new);
        Self { queues }
    }

    pub fn len(&self) -> usize {
        self.queues.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queues.is_empty()
    }

    pub fn get(&self, index: u16) -> Option<&TxQueue> {
        self.queues.get(index as usize)
    }

    pub fn stop_all(&self) {
        for q in &self.queues {
            q.stop();
        }
    }

    /// Wake the first `active` queues; the rest stay stopped.
    pub fn wake(&self, active: u16) {
        for (i, q) in self.queues.iter().enumerate() {
            if i < active as usize {
                q.wake();
            }
        }
    }

    pub fn all_stopped(&self) -> bool {
        self.queues.iter().all(TxQueue::is_stopped)
    }
}
