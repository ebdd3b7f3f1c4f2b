//! Hardware abstraction layer (§6)
//!
//! The boundary between the portable kernel core (`kern::*`) and a
//! concrete board: context save/restore, the tick source, the one
//! primitive atomic op the lock layer needs when it can't rely on a
//! CAS instruction, and the initial register frame a newly created
//! thread starts in. Two implementations exist: [`arm::ArmHal`] for
//! the real Cortex-M/ARM11 targets (§1), and [`host::HostHal`], a
//! software stand-in used so `kern::*` can be exercised with
//! `cargo test` off-target (SPEC_FULL §2.1) without touching real
//! privileged instructions — the same `#[cfg(test)]`-stub idiom the
//! old per-architecture modules here used to use.

#[cfg(target_arch = "arm")]
pub mod arm;

pub mod host;

use crate::kern::thread::RegisterFrame;

/// Interrupt mask state as returned by `interrupt_state_save`, opaque
/// to everything but the HAL that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InterruptState(pub u32);

/// The hardware contract the kernel core is written against (§6).
/// Implementations live at `arch::arm` (real targets) and `arch::host`
/// (off-target tests).
pub trait Hal {
    /// One-time hardware bring-up: vector table, clocks, whatever the
    /// board needs before the tick source can be armed.
    fn init();

    /// Save the currently executing thread's register frame — called
    /// from the trap/interrupt entry path before the kernel core runs.
    fn save_context() -> RegisterFrame;

    /// Restore a register frame and return to it. Does not return;
    /// the next instruction executed is whatever `frame` specifies.
    fn load_context(frame: &RegisterFrame) -> !;

    /// Disable interrupt delivery, returning the previous mask so it
    /// can be restored later. Must nest correctly with `interrupt_state_restore`.
    fn interrupt_state_save() -> InterruptState;

    /// Restore a previously saved interrupt mask.
    fn interrupt_state_restore(state: InterruptState);

    /// Arm the periodic tick source at `hz`, the unit of scheduler
    /// time (§1, §4.2).
    fn tick_source_init(hz: u32);

    /// Architecturally-defined test-and-set on a word shared with user
    /// space, returning the value observed before the set (§4.5). The
    /// `word` pointer is assumed already validated by `kern::copyio`.
    fn test_and_set(word: *mut u32) -> u32;

    /// Build the initial register frame for a newly created thread: a
    /// stack laid out so that, on first dispatch, control lands at
    /// `entry(arg)`, and if `entry` ever returns, control instead lands
    /// at `thread_exit_trampoline` (which tears the thread down rather
    /// than running off the end of its stack).
    fn init_stack_frame(
        stack_base: usize,
        stack_size: usize,
        entry: usize,
        arg: usize,
        thread_exit_trampoline: usize,
    ) -> RegisterFrame;

    /// Ask for a context switch at the next safe point (typically: set
    /// a pending-reschedule bit the next tick or trap checks).
    fn request_context_switch();
}

/// The HAL implementation selected for this build.
#[cfg(target_arch = "arm")]
pub type ActiveHal = arm::ArmHal;

#[cfg(not(target_arch = "arm"))]
pub type ActiveHal = host::HostHal;
