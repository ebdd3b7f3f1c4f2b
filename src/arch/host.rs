//! Host HAL backend (SPEC_FULL §2.1)
//!
//! A software stand-in for [`super::Hal`] used so `kern::*` can be
//! exercised with `cargo test` off-target: no privileged instructions,
//! no real interrupt controller, no real stack frames to build. The
//! tick source and context switch requests are driven explicitly by
//! tests calling `kern::timer::tick()` / `kern::sched::context_switch()`
//! rather than by a real timer IRQ, so this implementation's job is
//! just to satisfy the trait without touching hardware that isn't there.

use core::sync::atomic::{AtomicU32, Ordering};

use super::{Hal, InterruptState};
use crate::kern::thread::RegisterFrame;

static FAKE_INTERRUPT_MASK: AtomicU32 = AtomicU32::new(0);

pub struct HostHal;

impl Hal for HostHal {
    fn init() {}

    fn save_context() -> RegisterFrame {
        RegisterFrame::new()
    }

    fn load_context(_frame: &RegisterFrame) -> ! {
        // There is no real privilege transfer to simulate on host;
        // callers that reach this in a test have misused the HAL.
        panic!("HostHal::load_context is not meant to be called");
    }

    fn interrupt_state_save() -> InterruptState {
        InterruptState(FAKE_INTERRUPT_MASK.swap(1, Ordering::AcqRel))
    }

    fn interrupt_state_restore(state: InterruptState) {
        FAKE_INTERRUPT_MASK.store(state.0, Ordering::Release);
    }

    fn tick_source_init(_hz: u32) {}

    fn test_and_set(word: *mut u32) -> u32 {
        // No real atomic instruction to reach for off-target; a plain
        // volatile read-then-write is enough to exercise callers that
        // don't rely on the op being a true hardware primitive.
        unsafe {
            let prior = core::ptr::read_volatile(word);
            core::ptr::write_volatile(word, 1);
            prior
        }
    }

    fn init_stack_frame(
        _stack_base: usize,
        _stack_size: usize,
        entry: usize,
        arg: usize,
        thread_exit_trampoline: usize,
    ) -> RegisterFrame {
        let mut frame = RegisterFrame::new();
        // No real calling convention to honour here; stash `entry`/
        // `arg`/the exit trampoline where a test can observe them.
        frame.regs[0] = entry;
        frame.regs[1] = arg;
        frame.regs[2] = thread_exit_trampoline;
        frame
    }

    fn request_context_switch() {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interrupt_state_save_restore_round_trips() {
        let state = HostHal::interrupt_state_save();
        HostHal::interrupt_state_restore(state);
        assert_eq!(FAKE_INTERRUPT_MASK.load(Ordering::Acquire), state.0);
    }

    #[test]
    fn test_and_set_returns_prior_value_and_sets_the_word() {
        let mut word: u32 = 0;
        let prior = HostHal::test_and_set(&mut word as *mut u32);
        assert_eq!(prior, 0);
        assert_eq!(word, 1);
    }

    #[test]
    fn init_stack_frame_records_entry_arg_and_trampoline() {
        let frame = HostHal::init_stack_frame(0x1000, 256, 0xAAAA, 0xBBBB, 0xCCCC);
        assert_eq!(frame.regs[0], 0xAAAA);
        assert_eq!(frame.regs[1], 0xBBBB);
        assert_eq!(frame.regs[2], 0xCCCC);
    }
}
