//! Signal and event delivery (§4.4)
//!
//! Every thread carries three bitsets — `blocked`, `wait_mask`, `pending`
//! — plus a one-slot event record read on wakeup. `default_action`
//! below is grounded on `examples/original_source/kern/ksignal.c`'s
//! `default_sigproptbl`, which this module reproduces verbatim in
//! meaning (same signal numbering, same action bits) rather than
//! inventing a taxonomy from scratch.

use crate::kern::config::MAX_THREADS;
use crate::kern::error::{KernError, KernResult};
use crate::kern::sched;
use crate::kern::thread::{ThreadFlags, ThreadId};
use crate::kern::timer;

/// Sentinel wait timeout meaning "never time out".
pub const FOREVER: u32 = u32::MAX;

/// The event a thread observes on resuming from a wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    /// The armed timer fired before any matching signal arrived.
    Timeout,
    /// Woken by a signal; payload is `pending & wait_mask` at wake time.
    Signal(u32),
    /// Woken by an inter-thread message (payload is an opaque pointer).
    Message(usize),
}

// ============================================================================
// Process-level default signal actions
// ============================================================================

/// Default signal-action bits, matching `SA_*` in the original source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SigAction(pub u8);

impl SigAction {
    pub const KILL: Self = Self(0x01);
    pub const CORE: Self = Self(0x02);
    pub const IGNORE: Self = Self(0x04);
    pub const STOP: Self = Self(0x08);
    pub const CONT: Self = Self(0x10);
    pub const TTYSTOP: Self = Self(0x20);

    const fn combine(a: Self, b: Self) -> Self {
        Self(a.0 | b.0)
    }
}

/// Default action table, indexed by signal number (0 = SIGHUP). Mirrors
/// `default_sigproptbl` in the original kernel's `ksignal.c`.
pub const DEFAULT_SIGPROPTBL: [SigAction; 25] = [
    SigAction::KILL,                                    // SIGHUP
    SigAction::KILL,                                    // SIGINT
    SigAction::combine(SigAction::KILL, SigAction::CORE), // SIGQUIT
    SigAction::combine(SigAction::KILL, SigAction::CORE), // SIGILL
    SigAction::combine(SigAction::KILL, SigAction::CORE), // SIGTRAP
    SigAction::combine(SigAction::KILL, SigAction::CORE), // SIGABRT
    SigAction::IGNORE,                                  // SIGCHLD
    SigAction::combine(SigAction::KILL, SigAction::CORE), // SIGFPE
    SigAction::KILL,                                    // SIGKILL
    SigAction::combine(SigAction::KILL, SigAction::CORE), // SIGBUS
    SigAction::combine(SigAction::KILL, SigAction::CORE), // SIGSEGV
    SigAction::combine(SigAction::IGNORE, SigAction::CONT), // SIGCONT
    SigAction::KILL,                                    // SIGPIPE
    SigAction::KILL,                                    // SIGALRM
    SigAction::KILL,                                    // SIGTERM
    SigAction::STOP,                                    // SIGSTOP
    SigAction::combine(SigAction::STOP, SigAction::TTYSTOP), // SIGTSTP
    SigAction::combine(SigAction::STOP, SigAction::TTYSTOP), // SIGTTIN
    SigAction::combine(SigAction::STOP, SigAction::TTYSTOP), // SIGTTOU
    SigAction::KILL,                                    // SIGUSR1
    SigAction::KILL,                                    // SIGUSR2
    SigAction::combine(SigAction::KILL, SigAction::CORE), // SIGSYS
    SigAction::IGNORE,                                  // SIGURG
    SigAction::IGNORE,                                  // SIGINFO
    SigAction::KILL,                                    // SIGPWR
];

/// Look up the default action for a signal number. Numbers outside the
/// table default to `KILL`, matching the source's fallback for unknown
/// (platform-specific) signals.
pub fn default_action(signum: usize) -> SigAction {
    DEFAULT_SIGPROPTBL.get(signum).copied().unwrap_or(SigAction::KILL)
}

// ============================================================================
// Thread-level wait/signal
// ============================================================================

/// Raise `signum` against `target`. If the target is asleep in a wait
/// whose mask intersects the new pending set (and it hasn't masked
/// signals off entirely via `NO_SIG`), wake it immediately with a
/// `Signal` event (§4.4, ordering guarantee (i)).
pub fn signal(target: ThreadId, signum: u32) -> KernResult<()> {
    let table = crate::kern::thread::thread_table().lock();
    let thread = table.get(target)?;

    let bit = 1u32 << (signum & 31);
    thread.pending.fetch_or(bit, core::sync::atomic::Ordering::AcqRel);

    let flags = thread.flags();
    if flags.contains(ThreadFlags::NO_SIG) {
        return Ok(());
    }
    if flags.contains(ThreadFlags::EXEC) {
        // Already runnable; the signal just joins `pending` for the
        // next wait() call to observe.
        return Ok(());
    }

    let wait_mask = thread.wait_mask.load(core::sync::atomic::Ordering::Acquire);
    let pending = thread.pending.load(core::sync::atomic::Ordering::Acquire);
    let blocked = thread.blocked.load(core::sync::atomic::Ordering::Acquire);
    let matched = wait_mask & pending & !blocked;
    if matched == 0 {
        return Ok(());
    }

    // Release any armed wait timer; the signal got here first.
    let timer_id = thread.wait_timer_id.swap(-1, core::sync::atomic::Ordering::AcqRel);
    if timer_id >= 0 {
        timer::release(timer_id as usize);
    }

    thread.pending.fetch_and(!matched, core::sync::atomic::Ordering::AcqRel);
    *thread.last_event.lock() = Some(Event::Signal(matched));

    let default_pri = thread.default_priority();
    drop(table);
    sched::set_exec(target, default_pri)
}

/// Block the current thread until a signal in `mask` arrives or
/// `timeout_ms` milliseconds elapse (`FOREVER` to wait indefinitely).
/// Returns the event the thread should observe on resumption.
///
/// This models the kernel-side bookkeeping a `wait` syscall performs;
/// it does not itself block execution (there is no host thread to
/// suspend in this simulation) — callers drive time forward with
/// `timer::tick()` or wake the thread with `signal()` and then read
/// back `last_event`.
pub fn wait(current: ThreadId, mask: u32, timeout_ms: u32) -> KernResult<()> {
    let table = crate::kern::thread::thread_table().lock();
    let thread = table.get(current)?;

    thread.wait_mask.store(mask, core::sync::atomic::Ordering::Release);

    let timer_id = if timeout_ms != FOREVER {
        Some(timer::add(current, timer::TimerKind::Oneshot, timeout_ms)?)
    } else {
        None
    };
    thread.wait_timer_id.store(
        timer_id.map(|t| t as i32).unwrap_or(-1),
        core::sync::atomic::Ordering::Release,
    );

    drop(table);
    sched::sleep_current(current)
}

/// Read and clear the event slot a thread woke up with.
pub fn take_event(id: ThreadId) -> KernResult<Event> {
    let table = crate::kern::thread::thread_table().lock();
    let thread = table.get(id)?;
    thread.last_event.lock().take().ok_or(KernError::Again)
}

/// Clear a signal number from `target`'s pending set without acting on
/// it (the `clear` syscall minor, §4.6).
pub fn clear_pending(target: ThreadId, signum: u32) -> KernResult<()> {
    let table = crate::kern::thread::thread_table().lock();
    let thread = table.get(target)?;
    let bit = 1u32 << (signum & 31);
    thread.pending.fetch_and(!bit, core::sync::atomic::Ordering::AcqRel);
    Ok(())
}

/// Replace `target`'s blocked-signal mask, returning the previous one
/// (the `sigmask` syscall minor).
pub fn set_sigmask(target: ThreadId, mask: u32) -> KernResult<u32> {
    let table = crate::kern::thread::thread_table().lock();
    let thread = table.get(target)?;
    Ok(thread.blocked.swap(mask, core::sync::atomic::Ordering::AcqRel))
}

pub fn sigmask(target: ThreadId) -> KernResult<u32> {
    let table = crate::kern::thread::thread_table().lock();
    Ok(table.get(target)?.blocked.load(core::sync::atomic::Ordering::Acquire))
}

// ============================================================================
// Per-thread signal action / alternate stack overrides (`action`, `altstack`)
// ============================================================================

static ACTIONS: spin::Mutex<[[SigAction; 25]; MAX_THREADS]> =
    spin::Mutex::new([DEFAULT_SIGPROPTBL; MAX_THREADS]);

/// Install a per-thread override of a signal's default action (the
/// `action` syscall minor). Delivery of the override to a user handler
/// is outside this kernel's scope; this records the bits a future
/// handler dispatch would consult.
pub fn set_action(target: ThreadId, signum: usize, action: SigAction) -> KernResult<()> {
    if signum >= 25 {
        return Err(KernError::Invalid);
    }
    if target.0 >= MAX_THREADS {
        return Err(KernError::NoSuchThread);
    }
    ACTIONS.lock()[target.0][signum] = action;
    Ok(())
}

/// The effective action for `signum` on `target`: its override if one
/// was installed, otherwise the process-wide default.
pub fn action_for(target: ThreadId, signum: usize) -> SigAction {
    if target.0 >= MAX_THREADS || signum >= 25 {
        return default_action(signum);
    }
    ACTIONS.lock()[target.0][signum]
}

static ALTSTACKS: spin::Mutex<[(usize, usize); MAX_THREADS]> = spin::Mutex::new([(0, 0); MAX_THREADS]);

/// Record an alternate signal stack (base, size) for `target` (the
/// `altstack` syscall minor). Like `set_action`, this is bookkeeping
/// only: this kernel does not yet deliver signals into a user handler.
pub fn set_altstack(target: ThreadId, base: usize, size: usize) -> KernResult<()> {
    if target.0 >= MAX_THREADS {
        return Err(KernError::NoSuchThread);
    }
    ALTSTACKS.lock()[target.0] = (base, size);
    Ok(())
}

pub fn altstack(target: ThreadId) -> KernResult<(usize, usize)> {
    if target.0 >= MAX_THREADS {
        return Err(KernError::NoSuchThread);
    }
    Ok(ALTSTACKS.lock()[target.0])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_action_matches_known_signals() {
        // SIGKILL (index 8) has no core dump.
        assert_eq!(default_action(8), SigAction::KILL);
        // SIGSEGV (index 10) dumps core.
        assert_eq!(
            default_action(10),
            SigAction::combine(SigAction::KILL, SigAction::CORE)
        );
        // SIGCONT (index 11) is ignore+continue.
        assert_eq!(
            default_action(11),
            SigAction::combine(SigAction::IGNORE, SigAction::CONT)
        );
    }

    #[test]
    fn unknown_signal_defaults_to_kill() {
        assert_eq!(default_action(999), SigAction::KILL);
    }

    #[test]
    fn sigmask_round_trips_and_blocked_signals_dont_wake_a_waiter() {
        crate::kern::sched::init();
        let id = {
            let mut table = crate::kern::thread::thread_table().lock();
            let id = table
                .create(0, crate::kern::priority::Priority::Normal, 0, 0, None)
                .unwrap();
            crate::kern::sched::set_exec(id, crate::kern::priority::Priority::Normal).unwrap();
            id
        };

        let old = set_sigmask(id, 1 << 3).unwrap();
        assert_eq!(old, 0);
        assert_eq!(sigmask(id).unwrap(), 1 << 3);

        wait(id, 1 << 3, FOREVER).unwrap();
        // SIGUSR-style signal 3 is blocked; it must not resume the waiter.
        signal(id, 3).unwrap();
        assert_eq!(take_event(id), Err(KernError::Again));
    }

    #[test]
    fn action_override_is_recorded_and_read_back() {
        let id = ThreadId(5);
        assert_eq!(action_for(id, 8), SigAction::KILL);
        set_action(id, 8, SigAction::IGNORE).unwrap();
        assert_eq!(action_for(id, 8), SigAction::IGNORE);
    }

    #[test]
    fn altstack_round_trips() {
        let id = ThreadId(6);
        assert_eq!(altstack(id).unwrap(), (0, 0));
        set_altstack(id, 0x2000, 256).unwrap();
        assert_eq!(altstack(id).unwrap(), (0x2000, 256));
    }
}
