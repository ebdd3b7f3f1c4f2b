//! Device-node registry (§"Non-goals": "any filesystem beyond the
//! device-node registry used by syscalls")
//!
//! Grounded on the teacher's `device::{dev_hdr, conf}` major/minor
//! `DevOps` table, trimmed of the Mach IPC plumbing (`MachDevice`,
//! `IoRequest`, reply ports) those modules built it on top of: here a
//! device is addressed purely by `(major, minor)` and the kernel talks
//! to it through the fixed five-operation [`DeviceOps`] vtable the
//! syscall layer needs and nothing else. Peripheral register pokes
//! themselves are out of scope — a driver module implements
//! [`DeviceOps`] and calls [`register`]; this module only keeps the
//! table.

use spin::Mutex;

use crate::kern::error::{KernError, KernResult};

/// A device node address, the way major/minor numbers work on the
/// original source this was distilled from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct DeviceId {
    pub major: u16,
    pub minor: u16,
}

impl DeviceId {
    pub const fn new(major: u16, minor: u16) -> Self {
        Self { major, minor }
    }
}

/// The operations a device driver exposes to the syscall layer (§9).
pub trait DeviceOps: Sync {
    fn open(&self) -> KernResult<()>;
    fn close(&self) -> KernResult<()>;
    fn read(&self, offset: u64, buf: &mut [u8]) -> KernResult<usize>;
    fn write(&self, offset: u64, buf: &[u8]) -> KernResult<usize>;
    fn seek(&self, offset: i64) -> KernResult<u64>;
    fn ioctl(&self, request: u32, arg: usize) -> KernResult<usize>;
}

const MAX_DEVICES: usize = 16;

struct Slot {
    id: DeviceId,
    ops: &'static dyn DeviceOps,
}

struct Registry {
    slots: heapless::Vec<Slot, MAX_DEVICES>,
}

impl Registry {
    const fn new() -> Self {
        Self {
            slots: heapless::Vec::new(),
        }
    }
}

static REGISTRY: Mutex<Registry> = Mutex::new(Registry::new());

/// Register a driver under a `(major, minor)` address. Called once at
/// boot per device node; re-registering the same id replaces it.
pub fn register(id: DeviceId, ops: &'static dyn DeviceOps) -> KernResult<()> {
    let mut registry = REGISTRY.lock();
    if let Some(slot) = registry.slots.iter_mut().find(|s| s.id == id) {
        slot.ops = ops;
        return Ok(());
    }
    registry
        .slots
        .push(Slot { id, ops })
        .map_err(|_| KernError::OutOfMemory)
}

fn with_device<R>(id: DeviceId, f: impl FnOnce(&dyn DeviceOps) -> KernResult<R>) -> KernResult<R> {
    let registry = REGISTRY.lock();
    let slot = registry
        .slots
        .iter()
        .find(|s| s.id == id)
        .ok_or(KernError::Invalid)?;
    f(slot.ops)
}

pub fn open(id: DeviceId) -> KernResult<()> {
    with_device(id, |ops| ops.open())
}

pub fn close(id: DeviceId) -> KernResult<()> {
    with_device(id, |ops| ops.close())
}

pub fn read(id: DeviceId, offset: u64, buf: &mut [u8]) -> KernResult<usize> {
    with_device(id, |ops| ops.read(offset, buf))
}

pub fn write(id: DeviceId, offset: u64, buf: &[u8]) -> KernResult<usize> {
    with_device(id, |ops| ops.write(offset, buf))
}

pub fn seek(id: DeviceId, offset: i64) -> KernResult<u64> {
    with_device(id, |ops| ops.seek(offset))
}

pub fn ioctl(id: DeviceId, request: u32, arg: usize) -> KernResult<usize> {
    with_device(id, |ops| ops.ioctl(request, arg))
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::sync::atomic::{AtomicUsize, Ordering};

    struct MockDevice {
        writes: AtomicUsize,
    }

    impl DeviceOps for MockDevice {
        fn open(&self) -> KernResult<()> {
            Ok(())
        }
        fn close(&self) -> KernResult<()> {
            Ok(())
        }
        fn read(&self, _offset: u64, buf: &mut [u8]) -> KernResult<usize> {
            buf.fill(0xAA);
            Ok(buf.len())
        }
        fn write(&self, _offset: u64, buf: &[u8]) -> KernResult<usize> {
            self.writes.fetch_add(1, Ordering::Relaxed);
            Ok(buf.len())
        }
        fn seek(&self, offset: i64) -> KernResult<u64> {
            Ok(offset.max(0) as u64)
        }
        fn ioctl(&self, _request: u32, _arg: usize) -> KernResult<usize> {
            Ok(0)
        }
    }

    static MOCK: MockDevice = MockDevice {
        writes: AtomicUsize::new(0),
    };

    #[test]
    fn register_then_read_and_write_round_trip() {
        let id = DeviceId::new(200, 0);
        register(id, &MOCK).unwrap();

        let mut buf = [0u8; 4];
        assert_eq!(read(id, 0, &mut buf).unwrap(), 4);
        assert_eq!(buf, [0xAA; 4]);

        assert_eq!(write(id, 0, &buf).unwrap(), 4);
        assert_eq!(MOCK.writes.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn unregistered_device_is_not_found() {
        let id = DeviceId::new(250, 5);
        let mut buf = [0u8; 1];
        assert_eq!(read(id, 0, &mut buf), Err(KernError::Invalid));
    }
}
