use forkos_abi::memlayout::{UXSTACK_BASE, UXSTACK_TOP};
use forkos_abi::trap::{FEC_PR, FEC_U, FEC_WR, T_PGFLT};
use forkos_abi::trapframe::UTRAPFRAME_SIZE;
use forkos_abi::{UTrapframe, VirtAddr};
use forkos_core::TrapExit;
use forkos_mm::PageFlags;

use crate::log_capture::klog_contains;
use crate::machine::{Sim, UPCALL_ENTRY};

const RECORD: u64 = UTRAPFRAME_SIZE as u64;
const FAULT_VA: VirtAddr = VirtAddr(0x0070_1234);

fn sim_with_handler() -> Sim {
    let mut sim = Sim::new();
    let env = sim.boot_env();
    sim.kernel.map_test_page(env, UXSTACK_BASE, PageFlags::USER_RW);
    sim.kernel.env_mut(env).upcall = Some(UPCALL_ENTRY);
    sim
}

fn record_at(sim: &Sim, va: u64) -> UTrapframe {
    let env = sim.current();
    let bytes = sim
        .kernel
        .read_user(env, VirtAddr(va), UTRAPFRAME_SIZE)
        .unwrap();
    UTrapframe::from_bytes(&bytes).unwrap()
}

#[test]
fn fault_is_reflected_to_the_top_of_the_exception_stack() {
    let mut sim = sim_with_handler();
    let env = sim.current();
    let before = sim.kernel.env(env).frame;
    let err = FEC_WR | FEC_U;

    assert_eq!(sim.page_fault(FAULT_VA, err), TrapExit::Resume(env));

    let frame = sim.kernel.env(env).frame;
    let record = UXSTACK_TOP.as_u64() - RECORD;
    assert_eq!(frame.rsp, record);
    assert_eq!(frame.rip, UPCALL_ENTRY.as_u64());

    let utf = record_at(&sim, record);
    assert_eq!(utf.fault_va, FAULT_VA.as_u64());
    assert_eq!(utf.err, err);
    assert_eq!(utf.rip, before.rip);
    assert_eq!(utf.rsp, before.rsp);
    assert_eq!(utf.rflags, before.rflags);
    assert_eq!(utf.regs, before.regs);
}

#[test]
fn nested_fault_keeps_a_zeroed_scratch_word() {
    let mut sim = sim_with_handler();
    let env = sim.current();
    let rsp = UXSTACK_TOP.as_u64() - RECORD - 0x30;
    sim.kernel.poke(env, UXSTACK_BASE, &[0xFF; 0x1000]);
    sim.kernel.env_mut(env).frame.rsp = rsp;

    assert_eq!(sim.page_fault(FAULT_VA, FEC_PR | FEC_WR | FEC_U), TrapExit::Resume(env));

    let scratch = rsp - 8;
    let record = scratch - RECORD;
    assert_eq!(sim.kernel.read_word(env, VirtAddr(scratch)), Some(0));
    assert_eq!(sim.kernel.env(env).frame.rsp, record);
    assert_eq!(record_at(&sim, record).rsp, rsp);
    // The outer record is untouched.
    assert_eq!(
        sim.kernel.read_word(env, VirtAddr(UXSTACK_TOP.as_u64() - 8)),
        Some(u64::from_le_bytes([0xFF; 8]))
    );
}

#[test]
fn missing_handler_destroys_the_environment() {
    let mut sim = Sim::new();
    let env = sim.boot_env();
    sim.kernel.map_test_page(env, UXSTACK_BASE, PageFlags::USER_RW);

    assert_eq!(sim.page_fault(FAULT_VA, FEC_U), TrapExit::Schedule);
    assert!(!sim.kernel.is_live(env));
    assert!(klog_contains("user fault va 0x701234"));
    assert!(klog_contains("no page fault handler registered"));
    assert!(klog_contains("cr2  0x0000000000701234"));
}

#[test]
fn unmapped_exception_stack_destroys_the_environment() {
    let mut sim = Sim::new();
    let env = sim.boot_env();
    sim.kernel.env_mut(env).upcall = Some(UPCALL_ENTRY);

    assert_eq!(sim.page_fault(FAULT_VA, FEC_U), TrapExit::Schedule);
    assert!(!sim.kernel.is_live(env));
    assert!(klog_contains("exception stack not writable"));
}

#[test]
fn read_only_exception_stack_destroys_the_environment() {
    let mut sim = Sim::new();
    let env = sim.boot_env();
    sim.kernel.map_test_page(env, UXSTACK_BASE, PageFlags::USER_RO);
    sim.kernel.env_mut(env).upcall = Some(UPCALL_ENTRY);

    assert_eq!(sim.page_fault(FAULT_VA, FEC_U), TrapExit::Schedule);
    assert!(!sim.kernel.is_live(env));
}

#[test]
fn exception_stack_overflow_destroys_the_environment() {
    let mut sim = sim_with_handler();
    let env = sim.current();
    sim.kernel.env_mut(env).frame.rsp = UXSTACK_BASE.as_u64() + 0x40;

    assert_eq!(sim.page_fault(FAULT_VA, FEC_U), TrapExit::Schedule);
    assert!(!sim.kernel.is_live(env));
    assert!(klog_contains("exception stack overflow"));
}

#[test]
fn handler_running_off_into_the_guard_page_is_fatal() {
    let mut sim = sim_with_handler();
    let env = sim.current();
    sim.kernel.env_mut(env).frame.rsp = UXSTACK_BASE.as_u64() - 8;

    assert_eq!(sim.page_fault(FAULT_VA, FEC_WR | FEC_U), TrapExit::Schedule);
    assert!(!sim.kernel.is_live(env));
    assert!(klog_contains("exception stack overflow"));
}

#[test]
fn fault_that_leaves_no_room_for_a_nested_record_is_fatal() {
    let mut sim = sim_with_handler();
    let env = sim.current();
    // Exactly one record and its scratch word still fit.
    sim.kernel.env_mut(env).frame.rsp = UXSTACK_BASE.as_u64() + RECORD + 8;
    assert_eq!(sim.page_fault(FAULT_VA, FEC_U), TrapExit::Resume(env));
    assert_eq!(sim.kernel.env(env).frame.rsp, UXSTACK_BASE.as_u64());

    // The handler itself faults with no space left.
    assert_eq!(sim.page_fault(FAULT_VA, FEC_U), TrapExit::Schedule);
    assert!(!sim.kernel.is_live(env));
}

#[test]
#[should_panic(expected = "kernel page fault at va 0xdead000")]
fn kernel_mode_page_fault_panics() {
    let mut sim = Sim::new();
    sim.kernel.cr2 = 0xDEAD000;
    sim.deliver(&mut Sim::kernel_frame(T_PGFLT));
}
