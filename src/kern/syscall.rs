//! Syscall dispatch (§4.6)
//!
//! Each syscall number packs a group into the high bits and a minor
//! into the low [`MINOR_BITS`] bits, mirroring the teacher's
//! `syscall_sw` trap table but routed through a 2-level `(group,
//! minor)` match instead of one flat trap-number array — the group
//! boundary here tracks the four kernel-core subsystems (§4.2-§4.5)
//! rather than a single numbering authority.
//!
//! `dispatch` decodes the number, copies a group-specific argument
//! struct in from user memory via `kern::copyio`, calls the already-
//! tested kernel-core function that does the actual work, and copies
//! a result back out. A fault during either copy surfaces as
//! `BadAddress`; an unrecognised group or minor surfaces as
//! `NoSuchCall`. Either way the error is written to the caller's
//! `errno` slot and the syscall returns `-1`, matching the ABI in §6.

use core::sync::atomic::Ordering;

use crate::kern::copyio::{copyin_value, copyout_value};
use crate::kern::error::{KernError, KernResult};
use crate::kern::lock;
use crate::kern::priority::Priority;
use crate::kern::sched;
use crate::kern::signal::{self, Event, SigAction};
use crate::kern::thread::{thread_table, ThreadFlags, ThreadId};

/// Bits reserved for the minor number within a syscall number.
pub const MINOR_BITS: u32 = 8;

/// Build a syscall number from its group and minor (what a user-space
/// wrapper does before issuing the supervisor call).
pub const fn syscall_number(group: u32, minor: u32) -> u32 {
    (group << MINOR_BITS) | minor
}

fn decode(number: u32) -> (u32, u32) {
    (number >> MINOR_BITS, number & ((1 << MINOR_BITS) - 1))
}

/// Syscall group numbers (§4.6).
pub mod group {
    pub const SCHED: u32 = 0;
    pub const THREAD: u32 = 1;
    pub const SIGNAL: u32 = 2;
    pub const MUTEX_SEM: u32 = 3;
}

pub mod sched_minor {
    pub const GET_LOADAVG: u32 = 0;
    pub const GET_EVENT: u32 = 1;
}

pub mod thread_minor {
    pub const CREATE: u32 = 0;
    pub const DIE: u32 = 1;
    pub const DETACH: u32 = 2;
    pub const JOIN: u32 = 3;
    pub const SLEEP_MS: u32 = 4;
    pub const SET_PRIORITY: u32 = 5;
    pub const GET_PRIORITY: u32 = 6;
}

pub mod signal_minor {
    pub const SET: u32 = 0;
    pub const CLEAR: u32 = 1;
    pub const WAIT: u32 = 2;
    pub const ACTION: u32 = 3;
    pub const ALTSTACK: u32 = 4;
    pub const SIGMASK: u32 = 5;
}

pub mod mutex_sem_minor {
    pub const TEST_AND_SET: u32 = 0;
    pub const WAIT: u32 = 1;
    pub const RELEASE: u32 = 2;
}

// ============================================================================
// Argument / result structs copied across the user/kernel boundary
// ============================================================================

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct ThreadCreateArgs {
    pub entry: usize,
    pub arg: usize,
    pub stack_base: usize,
    pub stack_size: usize,
    pub priority: u8,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct ThreadIdArg {
    pub target: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct SetPriorityArgs {
    pub target: u32,
    pub priority: u8,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct SignalTargetArgs {
    pub target: u32,
    pub signum: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct SignalWaitArgs {
    pub mask: u32,
    pub timeout_ms: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct SignalActionArgs {
    pub signum: u32,
    pub action_bits: u8,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct AltstackArgs {
    pub base: usize,
    pub size: usize,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct MutexSemArgs {
    pub handle: u32,
    pub timeout_ms: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventResult {
    pub tag: u32,
    pub payload: u32,
}

fn encode_event(event: Event) -> EventResult {
    match event {
        Event::Timeout => EventResult { tag: 0, payload: 0 },
        Event::Signal(bits) => EventResult { tag: 1, payload: bits },
        Event::Message(ptr) => EventResult { tag: 2, payload: ptr as u32 },
    }
}

/// Reject `Priority::Error`, the off-heap sentinel: user space may
/// only ask for one of the seven schedulable bands.
fn decode_priority(raw: u8) -> KernResult<Priority> {
    let pri = Priority::ALL.get(raw as usize).copied().ok_or(KernError::Invalid)?;
    if pri == Priority::Error {
        return Err(KernError::Invalid);
    }
    Ok(pri)
}

// ============================================================================
// Dispatch
// ============================================================================

/// Decode and run a syscall on behalf of `current`. `user_arg` points
/// at the group's argument struct in user memory (null where a minor
/// takes none); `user_result` is where a return value, if any, is
/// copied back. Returns `0` on success, `-1` on error after recording
/// the failure in `current`'s `errno` slot (§6's ABI).
pub fn dispatch(current: ThreadId, number: u32, user_arg: *const u8, user_result: *mut u8) -> i32 {
    let (group, minor) = decode(number);
    let result = match group {
        group::SCHED => dispatch_sched(current, minor, user_result),
        group::THREAD => dispatch_thread(current, minor, user_arg, user_result),
        group::SIGNAL => dispatch_signal(current, minor, user_arg, user_result),
        group::MUTEX_SEM => dispatch_mutex_sem(current, minor, user_arg),
        _ => Err(KernError::NoSuchCall),
    };

    match result {
        Ok(()) => 0,
        Err(err) => {
            let table = thread_table().lock();
            if let Ok(thread) = table.get(current) {
                thread.errno.store(err.code(), Ordering::Release);
            }
            -1
        }
    }
}

fn dispatch_sched(current: ThreadId, minor: u32, user_result: *mut u8) -> KernResult<()> {
    match minor {
        sched_minor::GET_LOADAVG => {
            let avg = sched::load_average();
            copyout_value(&avg, user_result as *mut [i64; 3])
        }
        sched_minor::GET_EVENT => {
            let event = signal::take_event(current)?;
            copyout_value(&encode_event(event), user_result as *mut EventResult)
        }
        _ => Err(KernError::NoSuchCall),
    }
}

fn dispatch_thread(current: ThreadId, minor: u32, user_arg: *const u8, user_result: *mut u8) -> KernResult<()> {
    match minor {
        thread_minor::CREATE => {
            let args: ThreadCreateArgs = copyin_value(user_arg as *const ThreadCreateArgs)?;
            let priority = decode_priority(args.priority)?;
            let new_id = {
                let mut table = thread_table().lock();
                table.create(0, priority, args.stack_base, args.stack_size, Some(current))?
            };
            sched::set_exec(new_id, priority)?;
            copyout_value(&(new_id.0 as u32), user_result as *mut u32)
        }
        thread_minor::DIE => sched::terminate(current),
        thread_minor::DETACH => {
            let args: ThreadIdArg = copyin_value(user_arg as *const ThreadIdArg)?;
            sched::detach(ThreadId(args.target as usize))
        }
        thread_minor::JOIN => {
            let args: ThreadIdArg = copyin_value(user_arg as *const ThreadIdArg)?;
            let retval = join(ThreadId(args.target as usize))?;
            copyout_value(&retval, user_result as *mut i32)
        }
        thread_minor::SLEEP_MS => {
            let ms: u32 = copyin_value(user_arg as *const u32)?;
            // An empty wait mask means only the timer can ever wake this
            // thread, i.e. a plain delay rather than an event wait.
            signal::wait(current, 0, ms)
        }
        thread_minor::SET_PRIORITY => {
            let args: SetPriorityArgs = copyin_value(user_arg as *const SetPriorityArgs)?;
            let priority = decode_priority(args.priority)?;
            sched::set_exec(ThreadId(args.target as usize), priority)
        }
        thread_minor::GET_PRIORITY => {
            let args: ThreadIdArg = copyin_value(user_arg as *const ThreadIdArg)?;
            let rank = {
                let table = thread_table().lock();
                table.get(ThreadId(args.target as usize))?.dynamic_priority().rank()
            };
            copyout_value(&rank, user_result as *mut u8)
        }
        _ => Err(KernError::NoSuchCall),
    }
}

/// `join` syscall core: a target still running or already reaped is
/// `Again` (ask the caller to retry — there is no blocking join in
/// this cooperative model, only a pollable one); a zombie's retval is
/// read and its slot released.
fn join(target: ThreadId) -> KernResult<i32> {
    let mut table = thread_table().lock();
    let thread = table.get(target)?;
    if !thread.flags().contains(ThreadFlags::ZOMBIE) {
        return Err(KernError::Again);
    }
    let retval = thread.retval.load(Ordering::Acquire);
    table.release(target)?;
    Ok(retval)
}

fn dispatch_signal(current: ThreadId, minor: u32, user_arg: *const u8, user_result: *mut u8) -> KernResult<()> {
    match minor {
        signal_minor::SET => {
            let args: SignalTargetArgs = copyin_value(user_arg as *const SignalTargetArgs)?;
            signal::signal(ThreadId(args.target as usize), args.signum)
        }
        signal_minor::CLEAR => {
            let args: SignalTargetArgs = copyin_value(user_arg as *const SignalTargetArgs)?;
            signal::clear_pending(ThreadId(args.target as usize), args.signum)
        }
        signal_minor::WAIT => {
            let args: SignalWaitArgs = copyin_value(user_arg as *const SignalWaitArgs)?;
            signal::wait(current, args.mask, args.timeout_ms)?;
            let event = signal::take_event(current)?;
            copyout_value(&encode_event(event), user_result as *mut EventResult)
        }
        signal_minor::ACTION => {
            let args: SignalActionArgs = copyin_value(user_arg as *const SignalActionArgs)?;
            signal::set_action(current, args.signum as usize, SigAction(args.action_bits))
        }
        signal_minor::ALTSTACK => {
            let args: AltstackArgs = copyin_value(user_arg as *const AltstackArgs)?;
            signal::set_altstack(current, args.base, args.size)
        }
        signal_minor::SIGMASK => {
            let mask: u32 = copyin_value(user_arg as *const u32)?;
            let old = signal::set_sigmask(current, mask)?;
            copyout_value(&old, user_result as *mut u32)
        }
        _ => Err(KernError::NoSuchCall),
    }
}

fn dispatch_mutex_sem(current: ThreadId, minor: u32, user_arg: *const u8) -> KernResult<()> {
    match minor {
        mutex_sem_minor::TEST_AND_SET => {
            let args: MutexSemArgs = copyin_value(user_arg as *const MutexSemArgs)?;
            lock::mutex_test_and_set(args.handle as usize, current, args.timeout_ms)
        }
        mutex_sem_minor::WAIT => {
            let args: MutexSemArgs = copyin_value(user_arg as *const MutexSemArgs)?;
            lock::sem_wait(args.handle as usize, current, args.timeout_ms)
        }
        mutex_sem_minor::RELEASE => {
            let args: MutexSemArgs = copyin_value(user_arg as *const MutexSemArgs)?;
            // One minor serves both primitives: the low bit of the
            // handle selects mutex (0) vs semaphore (1), since neither
            // table overlaps the other's numbering otherwise.
            if args.handle & 0x8000_0000 != 0 {
                lock::sem_release((args.handle & 0x7FFF_FFFF) as usize)
            } else {
                lock::mutex_release(args.handle as usize, current)
            }
        }
        _ => Err(KernError::NoSuchCall),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn syscall_number_packs_and_unpacks() {
        let n = syscall_number(group::THREAD, thread_minor::SLEEP_MS);
        assert_eq!(decode(n), (group::THREAD, thread_minor::SLEEP_MS));
    }

    #[test]
    fn unknown_group_is_no_such_call() {
        sched::init();
        let bogus = syscall_number(0xFF, 0);
        let a = {
            let mut table = thread_table().lock();
            let id = table.create(0, Priority::Normal, 0, 0, None).unwrap();
            sched::set_exec(id, Priority::Normal).unwrap();
            id
        };
        assert_eq!(dispatch(a, bogus, core::ptr::null(), core::ptr::null_mut()), -1);
        let table = thread_table().lock();
        assert_eq!(table.get(a).unwrap().errno.load(Ordering::Acquire), KernError::NoSuchCall.code());
    }

    #[test]
    fn unknown_minor_within_known_group_is_no_such_call() {
        sched::init();
        let a = {
            let mut table = thread_table().lock();
            let id = table.create(0, Priority::Normal, 0, 0, None).unwrap();
            sched::set_exec(id, Priority::Normal).unwrap();
            id
        };
        let bogus = syscall_number(group::SCHED, 0xFF);
        assert_eq!(dispatch(a, bogus, core::ptr::null(), core::ptr::null_mut()), -1);
    }

    #[test]
    fn get_loadavg_copies_three_values_out() {
        sched::init();
        let a = {
            let mut table = thread_table().lock();
            let id = table.create(0, Priority::Normal, 0, 0, None).unwrap();
            sched::set_exec(id, Priority::Normal).unwrap();
            id
        };
        sched::sample_load();
        let mut out = [0i64; 3];
        let n = syscall_number(group::SCHED, sched_minor::GET_LOADAVG);
        let rc = dispatch(a, n, core::ptr::null(), &mut out as *mut [i64; 3] as *mut u8);
        assert_eq!(rc, 0);
    }

    #[test]
    fn thread_create_die_and_join_round_trip() {
        sched::init();
        let parent = {
            let mut table = thread_table().lock();
            let id = table.create(0, Priority::Normal, 0, 0, None).unwrap();
            sched::set_exec(id, Priority::Normal).unwrap();
            id
        };

        let args = ThreadCreateArgs {
            entry: 0,
            arg: 0,
            stack_base: 0,
            stack_size: 0,
            priority: Priority::Normal.rank(),
        };
        let mut new_id: u32 = 0;
        let create_n = syscall_number(group::THREAD, thread_minor::CREATE);
        let rc = dispatch(
            parent,
            create_n,
            &args as *const ThreadCreateArgs as *const u8,
            &mut new_id as *mut u32 as *mut u8,
        );
        assert_eq!(rc, 0);
        let child = ThreadId(new_id as usize);

        let die_n = syscall_number(group::THREAD, thread_minor::DIE);
        assert_eq!(dispatch(child, die_n, core::ptr::null(), core::ptr::null_mut()), 0);

        let join_args = ThreadIdArg { target: child.0 as u32 };
        let mut retval: i32 = -7;
        let join_n = syscall_number(group::THREAD, thread_minor::JOIN);
        let rc = dispatch(
            parent,
            join_n,
            &join_args as *const ThreadIdArg as *const u8,
            &mut retval as *mut i32 as *mut u8,
        );
        assert_eq!(rc, 0);
        assert_eq!(retval, 0);
    }

    #[test]
    fn sigmask_syscall_round_trips_through_dispatch() {
        sched::init();
        let a = {
            let mut table = thread_table().lock();
            let id = table.create(0, Priority::Normal, 0, 0, None).unwrap();
            sched::set_exec(id, Priority::Normal).unwrap();
            id
        };

        let mask: u32 = 0b1010;
        let mut old: u32 = 0xFFFF_FFFF;
        let n = syscall_number(group::SIGNAL, signal_minor::SIGMASK);
        let rc = dispatch(a, n, &mask as *const u32 as *const u8, &mut old as *mut u32 as *mut u8);
        assert_eq!(rc, 0);
        assert_eq!(old, 0);
        assert_eq!(signal::sigmask(a).unwrap(), mask);
    }

    #[test]
    fn mutex_release_without_owner_reports_resource_busy_via_errno() {
        sched::init();
        let a = {
            let mut table = thread_table().lock();
            let id = table.create(0, Priority::Normal, 0, 0, None).unwrap();
            sched::set_exec(id, Priority::Normal).unwrap();
            id
        };

        let args = MutexSemArgs { handle: 0, timeout_ms: 0 };
        let n = syscall_number(group::MUTEX_SEM, mutex_sem_minor::RELEASE);
        let rc = dispatch(a, n, &args as *const MutexSemArgs as *const u8, core::ptr::null_mut());
        assert_eq!(rc, -1);
        let table = thread_table().lock();
        assert_eq!(
            table.get(a).unwrap().errno.load(Ordering::Acquire),
            KernError::ResourceBusy.code()
        );
    }
}
