//! Trap-frame diagnostics.

use forkos_abi::Trapframe;
use forkos_abi::trap::{
    FEC_PR, FEC_U, FEC_WR, IRQ_LINES, IRQ_OFFSET, T_PGFLT, T_SYSCALL,
};

const EXCEPTION_NAMES: [&str; 20] = [
    "Divide error",
    "Debug",
    "Non-Maskable Interrupt",
    "Breakpoint",
    "Overflow",
    "BOUND Range Exceeded",
    "Invalid Opcode",
    "Device Not Available",
    "Double Fault",
    "Coprocessor Segment Overrun",
    "Invalid TSS",
    "Segment Not Present",
    "Stack Fault",
    "General Protection",
    "Page Fault",
    "(unknown trap)",
    "x87 FPU Floating-Point Error",
    "Alignment Check",
    "Machine-Check",
    "SIMD Floating-Point Exception",
];

/// Human readable name of a trap vector.
pub fn trapname(vector: u64) -> &'static str {
    if let Some(name) = EXCEPTION_NAMES.get(vector as usize) {
        return name;
    }
    if vector == T_SYSCALL as u64 {
        return "System call";
    }
    let irq_base = IRQ_OFFSET as u64;
    if (irq_base..irq_base + IRQ_LINES as u64).contains(&vector) {
        return "Hardware Interrupt";
    }
    "(unknown trap)"
}

/// Decoded page-fault error code: (mode, access, cause).
fn describe_fault_code(err: u64) -> (&'static str, &'static str, &'static str) {
    (
        if err & FEC_U != 0 { "user" } else { "kernel" },
        if err & FEC_WR != 0 { "write" } else { "read" },
        if err & FEC_PR != 0 {
            "protection"
        } else {
            "not-present"
        },
    )
}

/// Log the full contents of a saved context.
///
/// `fault_va` is the faulting address for page faults (CR2); it is printed
/// only when the frame actually records a page fault.
pub fn dump_trapframe(tf: &Trapframe, fault_va: Option<u64>) {
    let r = &tf.regs;
    crate::klog_info!("TRAP frame from {}", if tf.from_user() { "user" } else { "kernel" });
    crate::klog_info!("  r15 0x{:016x}  r14 0x{:016x}  r13 0x{:016x}", r.r15, r.r14, r.r13);
    crate::klog_info!("  r12 0x{:016x}  r11 0x{:016x}  r10 0x{:016x}", r.r12, r.r11, r.r10);
    crate::klog_info!("  r9  0x{:016x}  r8  0x{:016x}  rbp 0x{:016x}", r.r9, r.r8, r.rbp);
    crate::klog_info!("  rdi 0x{:016x}  rsi 0x{:016x}  rdx 0x{:016x}", r.rdi, r.rsi, r.rdx);
    crate::klog_info!("  rcx 0x{:016x}  rbx 0x{:016x}  rax 0x{:016x}", r.rcx, r.rbx, r.rax);
    crate::klog_info!("  es  0x----{:04x}  ds  0x----{:04x}", tf.es, tf.ds);
    crate::klog_info!("  trap 0x{:08x} {}", tf.trapno, trapname(tf.trapno));

    if tf.trapno == T_PGFLT as u64 {
        if let Some(va) = fault_va {
            crate::klog_info!("  cr2  0x{:016x}", va);
        }
        let (mode, access, cause) = describe_fault_code(tf.err);
        crate::klog_info!("  err  0x{:08x} [{}, {}, {}]", tf.err, mode, access, cause);
    } else {
        crate::klog_info!("  err  0x{:08x}", tf.err);
    }

    crate::klog_info!("  rip  0x{:016x}", tf.rip);
    crate::klog_info!("  cs   0x----{:04x}", tf.cs);
    crate::klog_info!("  flag 0x{:08x}", tf.rflags);
    if tf.from_user() {
        crate::klog_info!("  rsp  0x{:016x}", tf.rsp);
        crate::klog_info!("  ss   0x----{:04x}", tf.ss);
    }
}
