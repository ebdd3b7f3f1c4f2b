//! Kernel timer wheel (§4.3)
//!
//! A fixed-capacity array of timer entries swept once per tick, grounded
//! on `examples/original_source/src/timers.c`: no priority queue, no
//! dynamic allocation, just a linear scan comparing `expires_at` against
//! the tick counter for *equality* (not `<=`), so a timer that's missed
//! a tick (shouldn't happen at `SCHED_HZ`) simply never fires rather
//! than firing late against a moving target. The 32-bit tick counter is
//! expected to wrap; entries compare with wrapping arithmetic so a
//! wraparound mid-lifetime doesn't strand a timer.

use core::sync::atomic::{AtomicU32, Ordering};

use spin::Mutex;

use crate::kern::config::{SCHED_HZ, TIMERS_MAX};
use crate::kern::error::{KernError, KernResult};
use crate::kern::signal::Event;
use crate::kern::thread::ThreadId;

/// Whether a timer re-arms itself after firing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    /// Fires once, then the slot is freed.
    Oneshot,
    /// Fires repeatedly every `reset_interval` ticks.
    Periodic,
}

#[derive(Debug, Clone, Copy)]
struct TimerEntry {
    enabled: bool,
    kind: TimerKind,
    owner: ThreadId,
    reset_interval: u32,
    expires_at: u32,
}

impl TimerEntry {
    const fn vacant() -> Self {
        Self {
            enabled: false,
            kind: TimerKind::Oneshot,
            owner: ThreadId::IDLE,
            reset_interval: 0,
            expires_at: 0,
        }
    }
}

/// Convert a millisecond duration to a tick count, rounding up so a
/// caller asking for "at least N ms" never gets fewer ticks than that.
pub const fn ms_to_ticks(ms: u32) -> u32 {
    // ceil(ms * HZ / 1000)
    ((ms as u64 * SCHED_HZ as u64 + 999) / 1000) as u32
}

struct TimerWheel {
    entries: [TimerEntry; TIMERS_MAX],
}

impl TimerWheel {
    const fn new() -> Self {
        Self {
            entries: [TimerEntry::vacant(); TIMERS_MAX],
        }
    }

    fn add(&mut self, owner: ThreadId, kind: TimerKind, ms: u32, now: u32) -> KernResult<usize> {
        let slot = self
            .entries
            .iter()
            .position(|e| !e.enabled)
            .ok_or(KernError::OutOfMemory)?;

        // A zero-tick interval would compare equal to `now` on the very
        // next sweep before the caller has had a chance to observe
        // anything; round up to at least one tick.
        let interval = ms_to_ticks(ms).max(1);

        self.entries[slot] = TimerEntry {
            enabled: true,
            kind,
            owner,
            reset_interval: interval,
            expires_at: now.wrapping_add(interval),
        };
        Ok(slot)
    }

    fn release(&mut self, slot: usize) {
        if let Some(e) = self.entries.get_mut(slot) {
            e.enabled = false;
        }
    }
}

static WHEEL: spin::Once<Mutex<TimerWheel>> = spin::Once::new();
static NOW: AtomicU32 = AtomicU32::new(0);

fn wheel() -> &'static Mutex<TimerWheel> {
    WHEEL.call_once(|| Mutex::new(TimerWheel::new()))
}

pub fn init() {
    WHEEL.call_once(|| Mutex::new(TimerWheel::new()));
    NOW.store(0, Ordering::Relaxed);
}

/// Current wheel tick, for diagnostics and tests.
pub fn now() -> u32 {
    NOW.load(Ordering::Relaxed)
}

/// Arm a timer for `owner`, firing `ms` milliseconds from now (rounded
/// up to the nearest tick). Returns the slot index, used later to
/// `release` the timer if it's satisfied some other way first (e.g. a
/// matching signal arriving before the timeout).
pub fn add(owner: ThreadId, kind: TimerKind, ms: u32) -> KernResult<usize> {
    let now = NOW.load(Ordering::Relaxed);
    wheel().lock().add(owner, kind, ms, now)
}

/// Disarm a timer slot. A no-op if already disarmed or out of range;
/// the only caller-visible invariant is that the slot will not fire
/// again, so double-release is harmless.
pub fn release(slot: usize) {
    wheel().lock().release(slot);
}

/// Advance the wheel by one tick, waking any thread whose timer just
/// expired. Called from the tick interrupt handler (§4.2).
pub fn tick() {
    let now = NOW.fetch_add(1, Ordering::Relaxed).wrapping_add(1);

    // Collect expirations before touching the thread table: releasing
    // the wheel lock first avoids a lock-order cycle with the thread
    // table, which signal::wait also takes while holding the wheel
    // indirectly via `add`.
    let mut fired: heapless::Vec<(usize, ThreadId, TimerKind, u32), TIMERS_MAX> = heapless::Vec::new();
    {
        let mut w = wheel().lock();
        for (slot, entry) in w.entries.iter_mut().enumerate() {
            if entry.enabled && entry.expires_at == now {
                let _ = fired.push((slot, entry.owner, entry.kind, entry.reset_interval));
                match entry.kind {
                    TimerKind::Oneshot => entry.enabled = false,
                    TimerKind::Periodic => entry.expires_at = now.wrapping_add(entry.reset_interval),
                }
            }
        }
    }

    for (slot, owner, _kind, _interval) in fired {
        wake_on_timeout(slot, owner, now);
    }
}

fn wake_on_timeout(slot: usize, owner: ThreadId, _now: u32) {
    let table = crate::kern::thread::thread_table().lock();
    let Ok(thread) = table.get(owner) else {
        return;
    };

    // Only fire if this slot is still the thread's armed wait timer;
    // a signal may have already claimed and released it this same tick.
    let armed = thread.wait_timer_id.load(core::sync::atomic::Ordering::Acquire);
    if armed != slot as i32 {
        return;
    }
    thread.wait_timer_id.store(-1, core::sync::atomic::Ordering::Release);
    *thread.last_event.lock() = Some(Event::Timeout);

    let default_pri = thread.default_priority();
    drop(table);
    let _ = crate::kern::sched::set_exec(owner, default_pri);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ms_to_ticks_rounds_up() {
        // At 100 Hz, 1 tick == 10ms.
        assert_eq!(ms_to_ticks(1), 1);
        assert_eq!(ms_to_ticks(10), 1);
        assert_eq!(ms_to_ticks(11), 2);
        assert_eq!(ms_to_ticks(0), 0);
    }

    #[test]
    fn add_and_release_frees_the_slot() {
        let mut w = TimerWheel::new();
        let slot = w.add(ThreadId(1), TimerKind::Oneshot, 10, 0).unwrap();
        assert!(w.entries[slot].enabled);
        w.release(slot);
        assert!(!w.entries[slot].enabled);
    }

    #[test]
    fn out_of_memory_when_all_slots_armed() {
        let mut w = TimerWheel::new();
        for _ in 0..TIMERS_MAX {
            w.add(ThreadId(1), TimerKind::Oneshot, 10, 0).unwrap();
        }
        assert_eq!(
            w.add(ThreadId(1), TimerKind::Oneshot, 10, 0),
            Err(KernError::OutOfMemory)
        );
    }

    #[test]
    fn periodic_timer_rearms_after_firing() {
        let mut w = TimerWheel::new();
        let slot = w.add(ThreadId(1), TimerKind::Periodic, 10, 0).unwrap();
        let first_deadline = w.entries[slot].expires_at;
        // Simulate the rearm logic directly (mirrors `tick`'s inline match).
        w.entries[slot].expires_at = first_deadline.wrapping_add(w.entries[slot].reset_interval);
        assert_eq!(w.entries[slot].expires_at, first_deadline * 2);
        assert!(w.entries[slot].enabled);
    }
}
