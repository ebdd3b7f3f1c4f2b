//! Build-time configuration block
//!
//! Mirrors the teacher's habit of plain `pub const` blocks for tunables
//! (see `kern::priority`) rather than a runtime config-file parser: on
//! a kernel, the board profile is decided at build time, not read from
//! disk.

use crate::kern::priority::Priority;

/// Identifies the board/MCU this image was built for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum McuModel {
    /// ARMv7E-M microcontroller profile (e.g. STM32F4-class parts).
    CortexM,
    /// ARMv6 single-board computer profile (e.g. BCM2835 / first-gen Raspberry Pi).
    Arm11,
    /// Host architecture, used for `cargo test` off-target.
    Host,
}

/// Accepted load-average sampling periods, in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LavgPeriod {
    /// 5-second sampling period.
    Secs5 = 5,
    /// 11-second sampling period.
    Secs11 = 11,
}

impl LavgPeriod {
    pub const fn as_secs(self) -> u32 {
        self as u32
    }
}

/// The active board profile. Swap this constant (or gate it behind a
/// Cargo feature) to retarget the image.
pub const MCU_MODEL: McuModel = McuModel::CortexM;

/// Fixed capacity of the thread table, including the reserved idle slot.
pub const MAX_THREADS: usize = 32;

/// Scheduler tick frequency in Hz. Also the timer wheel's tick rate.
pub const SCHED_HZ: u32 = 100;

/// Load-average sampling period.
pub const LAVG_PERIOD: LavgPeriod = LavgPeriod::Secs5;

/// Fixed capacity of the timer wheel.
pub const TIMERS_MAX: usize = 16;

/// Whether the device-node registry is compiled in.
pub const DEV_SUBSYS_ENABLED: bool = true;

/// Stack size, in bytes, reserved for the initial `app_main` thread.
pub const APP_MAIN_STACK_SIZE: usize = 4096;

/// Default priority of the initial `app_main` thread.
pub const APP_MAIN_PRIORITY: Priority = Priority::Normal;

/// Fixed capacity of the kernel-side mutex/semaphore object tables
/// backing the MUTEX/SEM syscall group (§4.5, §4.6).
pub const MUTEX_SEM_MAX: usize = 16;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn max_threads_leaves_room_for_idle_and_at_least_one_user_thread() {
        assert!(MAX_THREADS >= 2);
    }

    #[test]
    fn lavg_period_round_trips() {
        assert_eq!(LavgPeriod::Secs5.as_secs(), 5);
        assert_eq!(LavgPeriod::Secs11.as_secs(), 11);
    }
}
