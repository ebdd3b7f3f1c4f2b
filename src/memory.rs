//! Heap and stack memory (ambient stack — `extern crate alloc` support)
//!
//! A bump allocator backs the global allocator so `alloc::{Vec, Box,
//! String}` are available to the rest of the kernel. There is no page
//! table here (out of scope, §"Non-goals": "virtual memory page-table
//! algorithms"); thread stacks are just regions carved out of the same
//! heap by [`alloc_stack`].

use core::alloc::{GlobalAlloc, Layout};
use core::ptr::null_mut;
use spin::Mutex;

/// Simple bump allocator for kernel bootstrap.
pub struct BumpAllocator {
    heap_start: usize,
    heap_end: usize,
    next: usize,
}

impl BumpAllocator {
    pub const fn new() -> Self {
        BumpAllocator {
            heap_start: 0,
            heap_end: 0,
            next: 0,
        }
    }

    pub unsafe fn init(&mut self, heap_start: usize, heap_size: usize) {
        self.heap_start = heap_start;
        self.heap_end = heap_start + heap_size;
        self.next = heap_start;
    }

    pub fn allocate(&mut self, layout: Layout) -> *mut u8 {
        let alloc_start = align_up(self.next, layout.align());
        let alloc_end = alloc_start + layout.size();

        if alloc_end > self.heap_end {
            return null_mut();
        }

        self.next = alloc_end;
        alloc_start as *mut u8
    }
}

fn align_up(addr: usize, align: usize) -> usize {
    (addr + align - 1) & !(align - 1)
}

pub struct GlobalAllocator {
    allocator: Mutex<BumpAllocator>,
}

impl GlobalAllocator {
    pub const fn new() -> Self {
        GlobalAllocator {
            allocator: Mutex::new(BumpAllocator::new()),
        }
    }

    pub unsafe fn init(&self, heap_start: usize, heap_size: usize) {
        self.allocator.lock().init(heap_start, heap_size);
    }
}

unsafe impl GlobalAlloc for GlobalAllocator {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        self.allocator.lock().allocate(layout)
    }

    unsafe fn dealloc(&self, _ptr: *mut u8, _layout: Layout) {
        // Bump allocator never reclaims; thread stacks and kernel
        // objects alike live for the machine's uptime.
    }
}

#[cfg(not(test))]
#[global_allocator]
static ALLOCATOR: GlobalAllocator = GlobalAllocator::new();

#[cfg(test)]
static ALLOCATOR: GlobalAllocator = GlobalAllocator::new();

/// Initialize the kernel heap.
pub fn init() {
    unsafe {
        #[cfg(not(test))]
        {
            let heap_start = 0x0020_0000;
            let heap_size = 0x0010_0000;
            ALLOCATOR.init(heap_start, heap_size);
        }

        #[cfg(test)]
        {
            static mut HEAP: [u8; 65536] = [0; 65536];
            let heap_start = core::ptr::addr_of!(HEAP) as usize;
            let heap_size = HEAP.len();
            ALLOCATOR.init(heap_start, heap_size);
        }
    }
}

/// Carve out a stack region for a new thread, returning `(base, size)`
/// as expected by `kern::thread::ThreadTable::create` and
/// `arch::Hal::init_stack_frame`.
pub fn alloc_stack(size: usize) -> (usize, usize) {
    let layout = Layout::from_size_align(size, 8).expect("stack size/alignment");
    let ptr = unsafe { ALLOCATOR.alloc(layout) };
    if ptr.is_null() {
        panic!("out of memory allocating stack");
    }
    (ptr as usize, size)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn align_up_rounds_to_the_next_multiple() {
        assert_eq!(align_up(0, 4), 0);
        assert_eq!(align_up(1, 4), 4);
        assert_eq!(align_up(4, 4), 4);
        assert_eq!(align_up(5, 4), 8);
    }

    #[test]
    fn bump_allocator_hands_out_sequential_aligned_regions() {
        let mut allocator = BumpAllocator::new();
        unsafe {
            allocator.init(0x1000, 0x1000);
        }

        let layout = Layout::from_size_align(16, 8).unwrap();
        let ptr = allocator.allocate(layout);
        assert!(!ptr.is_null());
        assert_eq!(ptr as usize, 0x1000);
    }
}
