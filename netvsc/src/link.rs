//! Link state machine.
//!
//! # State
//!
//! ```text
//!              Connect                 NetworkChange
//!   ┌──────┐ ─────────▶ ┌──────┐      (sets change_pending;
//!   │ Down │            │  Up  │       re-announces when Up)
//!   └──────┘ ◀───────── └──────┘
//!             Disconnect
//! ```
//!
//! Host events only flip flags and schedule work. The announcement itself
//! runs later from the executor and reads the state as it is at fire time,
//! so a Disconnect that lands before a pending announcement wins.
//! Disconnect also lowers carrier at once and queues one more run, which
//! settles carrier against an announcement already past its check.
//!
//! Two work slots: `announce` (immediate) and `reannounce` (deferred, some
//! hosts need a second gratuitous ARP after live migration).

use core::sync::atomic::{AtomicBool, Ordering};

use log::{debug, trace};
use spin::Mutex;

use crate::config::ReannouncePolicy;
use crate::driver::traits::NetStack;
use crate::types::rndis::{
    RNDIS_STATUS_MEDIA_CONNECT, RNDIS_STATUS_MEDIA_DISCONNECT, RNDIS_STATUS_NETWORK_CHANGE,
};
use crate::work::{DelayedWork, WorkContext};

/// Host link notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkEvent {
    Connect,
    Disconnect,
    NetworkChange,
}

impl LinkEvent {
    /// Decode an RNDIS indicate-status code. Unknown codes map to `None`.
    pub fn from_rndis_status(status: u32) -> Option<Self> {
        match status {
            RNDIS_STATUS_MEDIA_CONNECT => Some(LinkEvent::Connect),
            RNDIS_STATUS_MEDIA_DISCONNECT => Some(LinkEvent::Disconnect),
            RNDIS_STATUS_NETWORK_CHANGE => Some(LinkEvent::NetworkChange),
            _ => None,
        }
    }
}

/// What a fired announcement decided under the lock.
enum Announce {
    CarrierOff { changed: bool },
    CarrierOn { changed: bool, refresh: bool },
}

pub struct LinkState {
    down: AtomicBool,
    change_pending: AtomicBool,
    carrier: AtomicBool,
    announce: DelayedWork,
    reannounce: DelayedWork,
    policy: ReannouncePolicy,
    /// Deferred delay in executor ticks.
    deferred_ticks: u64,
}

impl LinkState {
    pub fn new(policy: ReannouncePolicy, deferred_ticks: u64) -> Self {
        Self {
            down: AtomicBool::new(true),
            change_pending: AtomicBool::new(false),
            carrier: AtomicBool::new(false),
            announce: DelayedWork::new(),
            reannounce: DelayedWork::new(),
            policy,
            deferred_ticks,
        }
    }

    pub fn is_up(&self) -> bool {
        !self.down.load(Ordering::Acquire)
    }

    pub fn change_pending(&self) -> bool {
        self.change_pending.load(Ordering::Acquire)
    }

    /// Carrier as last reported upward.
    pub fn carrier(&self) -> bool {
        self.carrier.load(Ordering::Acquire)
    }

    /// Record media state from a (re)connect without announcing.
    pub fn set_media(&self, up: bool) {
        self.down.store(!up, Ordering::Release);
    }

    /// Set the carrier, telling the stack only on a transition.
    pub fn set_carrier<S: NetStack>(&self, up: bool, stack: &S) {
        if self.carrier.swap(up, Ordering::AcqRel) != up {
            stack.carrier_changed(up);
        }
    }

    /// Queue the immediate announcement (attach, open).
    pub fn schedule_announce(&self, now: u64) {
        self.announce.schedule(now, 0);
    }

    /// Apply a host event. With `deliverable == false` (device not
    /// registered, or being removed) only the state is updated.
    pub fn handle_event<S: NetStack>(&self, event: LinkEvent, now: u64, deliverable: bool, stack: &S) {
        debug!("netvsc: link event {:?}", event);

        match event {
            LinkEvent::Connect => self.down.store(false, Ordering::Release),
            LinkEvent::Disconnect => self.down.store(true, Ordering::Release),
            LinkEvent::NetworkChange => self.change_pending.store(true, Ordering::Release),
        }

        if !deliverable {
            return;
        }

        if event == LinkEvent::Disconnect {
            self.set_carrier(false, stack);
            // A body that already saw the link up may raise carrier after
            // this; the follow-up run lowers it again.
            self.announce.schedule(now, 0);
            return;
        }

        if self.is_up() {
            self.announce.schedule(now, 0);
            if self.policy.wants_deferred(self.change_pending()) {
                self.reannounce.schedule(now, self.deferred_ticks);
            }
        }
    }

    /// Run whichever announcements are due.
    ///
    /// The body takes `lock` with `try_lock`; if a reconfiguration holds it,
    /// the work re-arms itself `retry_ticks` later instead of waiting.
    pub fn run_due<T, S: NetStack>(&self, now: u64, lock: &Mutex<T>, retry_ticks: u64, stack: &S) -> usize {
        let mut ran = 0;
        for work in [&self.announce, &self.reannounce] {
            if work.run_if_due(now, |ctx| self.fire(ctx, lock, retry_ticks, stack)) {
                ran += 1;
            }
        }
        ran
    }

    fn fire<T, S: NetStack>(&self, ctx: &WorkContext<'_>, lock: &Mutex<T>, retry_ticks: u64, stack: &S) {
        let decision = {
            let _guard = match lock.try_lock() {
                Some(guard) => guard,
                None => {
                    trace!("netvsc: link work contended, retry in {} ticks", retry_ticks);
                    ctx.reschedule(retry_ticks);
                    return;
                }
            };
            if ctx.is_cancelled() {
                return;
            }

            if self.down.load(Ordering::Acquire) {
                let changed = self.carrier.swap(false, Ordering::AcqRel);
                Announce::CarrierOff { changed }
            } else {
                let changed = !self.carrier.swap(true, Ordering::AcqRel);
                let refresh = self.change_pending.swap(false, Ordering::AcqRel);
                Announce::CarrierOn { changed, refresh }
            }
        };

        match decision {
            Announce::CarrierOff { changed } => {
                if changed {
                    stack.carrier_changed(false);
                }
            }
            Announce::CarrierOn { changed, refresh } => {
                if changed {
                    stack.carrier_changed(true);
                }
                if ctx.is_cancelled() {
                    return;
                }
                trace!("netvsc: notify peers (refresh={})", refresh);
                stack.notify_peers();
                if refresh {
                    stack.refresh_network();
                }
            }
        }
    }

    /// Earliest pending announcement.
    pub fn next_deadline(&self) -> Option<u64> {
        match (self.announce.due_at(), self.reannounce.due_at()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    pub fn has_pending(&self) -> bool {
        self.announce.is_pending() || self.reannounce.is_pending()
    }

    /// Drop pending announcements, waiting out a running one.
    pub fn cancel_sync(&self) {
        self.announce.cancel_sync();
        self.reannounce.cancel_sync();
    }

    /// Cancel and refuse new announcements (device removal).
    pub fn disable(&self) {
        self.announce.disable();
        self.reannounce.disable();
    }
}
