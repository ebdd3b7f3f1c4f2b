//! Zeke — a small preemptive real-time kernel for ARM microcontrollers
//! and single-board computers (Cortex-M, ARM11).
//!
//! The educative core is the scheduler, timer wheel, signal/event
//! delivery, and syscall dispatch surface in [`kern`]; [`arch`] is the
//! hardware boundary those pieces are written against.

#![no_std]
#![cfg_attr(not(test), no_main)]
#![allow(dead_code)]

// Kernel-appropriate clippy configuration
#![allow(clippy::new_without_default)]
#![allow(clippy::identity_op)]
#![allow(clippy::unnecessary_cast)]
#![allow(clippy::manual_div_ceil)]

extern crate alloc;

pub mod arch;
pub mod console;
pub mod device;
pub mod kern;
pub mod libc;
pub mod memory;
pub mod panic;

/// Kernel version, taken from the crate version at build time.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
/// Kernel name.
pub const NAME: &str = "Zeke";

#[cfg(test)]
mod tests {
    use super::*;
    use core::sync::atomic::{AtomicBool, Ordering};

    fn init_test() {
        static INIT: AtomicBool = AtomicBool::new(false);
        if !INIT.swap(true, Ordering::SeqCst) {
            memory::init();
        }
    }

    #[test]
    fn test_version() {
        init_test();
        assert_eq!(NAME, "Zeke");
        assert!(!VERSION.is_empty());
    }
}
