//! x86_64 glue between the dispatcher and the hardware.

use core::fmt::Write;
use core::mem::size_of;

use forkos_abi::trap::{GD_KD, GD_KT};
use forkos_lib::klog::{KlogLevel, klog_register_backend};
use forkos_lib::klog_debug;
use spin::{Mutex, Once};
use uart_16550::SerialPort;
use x86_64::instructions::segmentation::{CS, DS, ES, SS, Segment};
use x86_64::instructions::tables::{DescriptorTablePointer, lidt, load_tss};
use x86_64::instructions::{hlt, interrupts};
use x86_64::registers::control::Cr2;
use x86_64::structures::gdt::{Descriptor, GlobalDescriptorTable, SegmentSelector};
use x86_64::structures::tss::TaskStateSegment;

use crate::cpu::{CpuContext, MAX_CPUS, TrapStack};
use crate::idt::Idt;

const COM1_PORT: u16 = 0x3F8;

static COM1: Mutex<Option<SerialPort>> = Mutex::new(None);

fn serial_backend(level: KlogLevel, args: core::fmt::Arguments<'_>) {
    let mut guard = COM1.lock();
    if let Some(port) = guard.as_mut() {
        let _ = writeln!(port, "[{}] {}", level.tag(), args);
    }
}

/// Initialise COM1 and route klog output to it.
pub fn register_serial_log_backend() {
    // SAFETY: COM1 is the standard first serial port and nothing else in
    // the kernel drives it.
    let mut port = unsafe { SerialPort::new(COM1_PORT) };
    port.init();
    *COM1.lock() = Some(port);
    klog_register_backend(serial_backend);
}

/// Null, kernel code, kernel data, user code, user data, then one
/// two-slot TSS descriptor per CPU.
const GDT_SLOTS: usize = 5 + 2 * MAX_CPUS;

static TSS: Once<[TaskStateSegment; MAX_CPUS]> = Once::new();
static GDT: Once<GlobalDescriptorTable<GDT_SLOTS>> = Once::new();

fn build_tss() -> [TaskStateSegment; MAX_CPUS] {
    core::array::from_fn(|id| {
        let mut tss = TaskStateSegment::new();
        if let Some(stack) = TrapStack::for_cpu(id) {
            tss.privilege_stack_table[0] = x86_64::VirtAddr::new(stack.rsp0.as_u64());
        }
        // No I/O bitmap: every port access from user mode faults.
        tss.iomap_base = size_of::<TaskStateSegment>() as u16;
        tss
    })
}

fn build_gdt(tss: &'static [TaskStateSegment; MAX_CPUS]) -> GlobalDescriptorTable<GDT_SLOTS> {
    let mut gdt = GlobalDescriptorTable::empty();
    gdt.append(Descriptor::kernel_code_segment());
    gdt.append(Descriptor::kernel_data_segment());
    gdt.append(Descriptor::user_code_segment());
    gdt.append(Descriptor::user_data_segment());
    for (id, segment) in tss.iter().enumerate() {
        let selector = gdt.append(Descriptor::tss_segment(segment));
        debug_assert_eq!(
            Some(selector.0),
            TrapStack::for_cpu(id).map(|stack| stack.tss_selector)
        );
    }
    gdt
}

/// Per-CPU half of trap setup: load the shared GDT, this CPU's task
/// register and the IDT. Traps from user mode then arrive on the CPU's own
/// kernel stack.
///
/// # Panics
///
/// Panics if the CPU id has no kernel stack slot.
pub fn trap_init_percpu(cpu: &CpuContext, idt: &'static Idt) {
    let Some(stack) = cpu.trap_stack() else {
        panic!("cpu {} has no trap stack (max {} cpus)", cpu.id(), MAX_CPUS);
    };
    let tss = TSS.call_once(build_tss);
    let gdt = GDT.call_once(|| build_gdt(tss));

    gdt.load();
    // SAFETY: the GDT is 'static and lays out GD_KT/GD_KD as kernel code
    // and data; each CPU loads only its own TSS selector, so no TSS is
    // marked busy twice.
    unsafe {
        CS::set_reg(SegmentSelector(GD_KT));
        SS::set_reg(SegmentSelector(GD_KD));
        DS::set_reg(SegmentSelector(GD_KD));
        ES::set_reg(SegmentSelector(GD_KD));
        load_tss(SegmentSelector(stack.tss_selector));
    }
    load_idt(idt);
    klog_debug!(
        "cpu {}: rsp0 {:#x} tss {:#x}",
        cpu.id(),
        stack.rsp0.as_u64(),
        stack.tss_selector
    );
}

/// Load `idt` into this CPU's IDTR.
pub fn load_idt(idt: &'static Idt) {
    let pointer = DescriptorTablePointer {
        limit: Idt::limit(),
        base: x86_64::VirtAddr::new(idt.base()),
    };
    // SAFETY: the table is 'static and every present gate points at an
    // entry stub.
    unsafe { lidt(&pointer) };
}

#[inline]
pub fn read_fault_address() -> u64 {
    Cr2::read_raw()
}

#[inline]
pub fn interrupts_enabled() -> bool {
    interrupts::are_enabled()
}

/// Park this CPU for good. Used once another CPU has panicked.
pub fn halt_forever() -> ! {
    interrupts::disable();
    loop {
        hlt();
    }
}
