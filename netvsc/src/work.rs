//! Cancellable deferred work.
//!
//! A `DelayedWork` is a single schedulable task slot driven by an external
//! executor that calls `run_if_due(now, ..)`. Semantics:
//!
//! - `schedule` on an already pending work is a no-op (first due time wins).
//! - A running body may re-arm itself through its `WorkContext`.
//! - `cancel_sync` clears any pending instance and spins until a running
//!   body has returned. Bodies claimed before the cancel see
//!   `is_cancelled()` and cannot re-arm.
//! - `disable` makes every later `schedule` fail until `enable`.
//!
//! The slot's lock is never held while the body runs.

use core::hint::spin_loop;

use spin::Mutex;

struct Slot {
    pending: bool,
    running: bool,
    disabled: bool,
    due: u64,
    generation: u64,
}

pub struct DelayedWork {
    slot: Mutex<Slot>,
}

/// Handle given to a running body.
pub struct WorkContext<'a> {
    work: &'a DelayedWork,
    generation: u64,
    now: u64,
}

impl WorkContext<'_> {
    /// Time the body was started at.
    pub fn now(&self) -> u64 {
        self.now
    }

    /// The work was cancelled (or disabled) after this run was claimed.
    pub fn is_cancelled(&self) -> bool {
        self.work.slot.lock().generation != self.generation
    }

    /// Re-arm `delay` ticks from now. Fails once cancelled.
    pub fn reschedule(&self, delay: u64) -> bool {
        let mut slot = self.work.slot.lock();
        if slot.generation != self.generation || slot.disabled || slot.pending {
            return false;
        }
        slot.pending = true;
        slot.due = self.now.saturating_add(delay);
        true
    }
}

impl DelayedWork {
    pub const fn new() -> Self {
        Self {
            slot: Mutex::new(Slot {
                pending: false,
                running: false,
                disabled: false,
                due: 0,
                generation: 0,
            }),
        }
    }

    /// Arm the work to run at `now + delay`.
    ///
    /// Returns `false` if it was already pending or is disabled.
    pub fn schedule(&self, now: u64, delay: u64) -> bool {
        let mut slot = self.slot.lock();
        if slot.disabled || slot.pending {
            return false;
        }
        slot.pending = true;
        slot.due = now.saturating_add(delay);
        true
    }

    pub fn is_pending(&self) -> bool {
        self.slot.lock().pending
    }

    pub fn is_running(&self) -> bool {
        self.slot.lock().running
    }

    /// Due time of the pending instance.
    pub fn due_at(&self) -> Option<u64> {
        let slot = self.slot.lock();
        if slot.pending {
            Some(slot.due)
        } else {
            None
        }
    }

    /// Run the body if pending and due. Returns whether it ran.
    pub fn run_if_due<F>(&self, now: u64, body: F) -> bool
    where
        F: FnOnce(&WorkContext<'_>),
    {
        let generation = {
            let mut slot = self.slot.lock();
            if !slot.pending || slot.running || slot.disabled || slot.due > now {
                return false;
            }
            slot.pending = false;
            slot.running = true;
            slot.generation
        };

        let ctx = WorkContext { work: self, generation, now };
        body(&ctx);

        self.slot.lock().running = false;
        true
    }

    /// Drop any pending instance and wait for a running one to finish.
    ///
    /// Returns whether a pending instance was removed. Must not be called
    /// from the work's own body.
    pub fn cancel_sync(&self) -> bool {
        let was_pending = {
            let mut slot = self.slot.lock();
            slot.generation = slot.generation.wrapping_add(1);
            core::mem::replace(&mut slot.pending, false)
        };

        loop {
            {
                let mut slot = self.slot.lock();
                slot.pending = false;
                if !slot.running {
                    break;
                }
            }
            spin_loop();
        }

        was_pending
    }

    /// Cancel and refuse further scheduling.
    pub fn disable(&self) {
        self.slot.lock().disabled = true;
        self.cancel_sync();
    }

    pub fn enable(&self) {
        self.slot.lock().disabled = false;
    }

    pub fn is_disabled(&self) -> bool {
        self.slot.lock().disabled
    }
}

impl Default for DelayedWork {
    fn default() -> Self {
        Self::new()
    }
}
