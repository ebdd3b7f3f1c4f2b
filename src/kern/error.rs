//! Kernel error taxonomy
//!
//! A single flat error enum shared by every fallible kernel-core entry
//! point. Mirrors the teacher's habit of small, hand-rolled `Copy` error
//! enums per subsystem (`CopyError`, `ElfError`, `DeviceResult`) rather
//! than pulling in an error-derive crate that no_std can't use anyway.

use core::fmt;

/// Kernel result type used throughout `kern::*`.
pub type KernResult<T> = Result<T, KernError>;

/// Kernel error taxonomy (kind, not message).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernError {
    /// Transient condition, retry may succeed.
    Again,
    /// A user-supplied pointer faulted during copyin/copyout.
    BadAddress,
    /// Syscall minor not registered in the group's handler table.
    NoSuchCall,
    /// Thread id out of range or not `IN_USE`.
    NoSuchThread,
    /// Caller lacks the privilege for this operation.
    NotPermitted,
    /// A fixed-capacity pool (thread table, timer wheel, id queue) is full.
    OutOfMemory,
    /// A wait was resolved by timer expiry rather than its intended event.
    Timeout,
    /// A wait was cut short (signal delivery racing a different wake path).
    Interrupted,
    /// A lock is held and cannot be acquired within the caller's constraints.
    ResourceBusy,
    /// Malformed argument (bad flags, priority out of range, zero-length slice).
    Invalid,
}

impl KernError {
    /// Stable small-integer code, written into a thread's `errno` slot
    /// and returned (negated) from the syscall dispatcher on failure.
    pub const fn code(self) -> i32 {
        match self {
            KernError::Again => 1,
            KernError::BadAddress => 2,
            KernError::NoSuchCall => 3,
            KernError::NoSuchThread => 4,
            KernError::NotPermitted => 5,
            KernError::OutOfMemory => 6,
            KernError::Timeout => 7,
            KernError::Interrupted => 8,
            KernError::ResourceBusy => 9,
            KernError::Invalid => 10,
        }
    }
}

impl fmt::Display for KernError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            KernError::Again => "resource temporarily unavailable",
            KernError::BadAddress => "bad user address",
            KernError::NoSuchCall => "no such syscall minor",
            KernError::NoSuchThread => "no such thread",
            KernError::NotPermitted => "operation not permitted",
            KernError::OutOfMemory => "pool exhausted",
            KernError::Timeout => "wait timed out",
            KernError::Interrupted => "wait interrupted",
            KernError::ResourceBusy => "resource busy",
            KernError::Invalid => "invalid argument",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_is_nonempty_for_every_variant() {
        let variants = [
            KernError::Again,
            KernError::BadAddress,
            KernError::NoSuchCall,
            KernError::NoSuchThread,
            KernError::NotPermitted,
            KernError::OutOfMemory,
            KernError::Timeout,
            KernError::Interrupted,
            KernError::ResourceBusy,
            KernError::Invalid,
        ];
        for v in variants {
            assert!(!alloc::format!("{}", v).is_empty());
        }
    }
}
