//! Kernel binary entry point

#![no_std]
#![no_main]

extern crate alloc;
extern crate zeke;

use core::panic::PanicInfo;

use zeke::arch::{ActiveHal, Hal};
use zeke::kern::thread::PrivilegeStage;
use zeke::kern::{config, sched, thread_table};
use zeke::{console, memory};

/// Reset vector. The board's boot stub (outside this crate, §1) drops
/// the CPU into supervisor mode with a valid stack and jumps here.
#[cfg(target_arch = "arm")]
#[no_mangle]
pub extern "C" fn _start() -> ! {
    kernel_main()
}

fn kernel_main() -> ! {
    console::init();
    zeke::println!("\n=== Zeke ===");

    ActiveHal::init();
    memory::init();
    zeke::kern::init();

    spawn_app_main();

    ActiveHal::tick_source_init(config::SCHED_HZ);

    let first = sched::context_switch();
    let frame = {
        let table = thread_table().lock();
        table
            .get(first)
            .expect("scheduler handed back a live thread")
            .frame(PrivilegeStage::Supervisor)
    };
    ActiveHal::load_context(&frame)
}

fn spawn_app_main() {
    let (stack_base, stack_size) = memory::alloc_stack(config::APP_MAIN_STACK_SIZE);
    let frame = ActiveHal::init_stack_frame(
        stack_base,
        stack_size,
        app_main as usize,
        0,
        thread_exit_trampoline as usize,
    );

    let id = {
        let mut table = thread_table().lock();
        table
            .create(0, config::APP_MAIN_PRIORITY, stack_base, stack_size, None)
            .expect("thread table has room for app_main")
    };

    {
        let table = thread_table().lock();
        table
            .get(id)
            .expect("just created")
            .set_frame(PrivilegeStage::Supervisor, frame);
    }

    sched::set_exec(id, config::APP_MAIN_PRIORITY).expect("app_main is schedulable");
}

/// The first user-level thread, handed off to once the scheduler is live.
extern "C" fn app_main(_arg: usize) -> ! {
    zeke::println!("app_main running");
    loop {
        core::hint::spin_loop();
    }
}

/// Where a thread's register frame points if its entry function ever
/// returns, instead of falling off the end of its stack.
extern "C" fn thread_exit_trampoline() -> ! {
    let current = sched::current();
    let _ = sched::terminate(current);
    loop {
        core::hint::spin_loop();
    }
}

#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    zeke::panic::kernel_panic(info)
}
