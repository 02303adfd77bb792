//! Interrupt descriptor table.
//!
//! Every vector the kernel handles gets an interrupt gate in the kernel code
//! segment, so the CPU clears IF on entry. Breakpoint and system call are the
//! only gates user code may raise with `int`.

use core::fmt;

use forkos_abi::trap::{
    GD_KT, IRQ_LINES, IRQ_OFFSET, T_ALIGN, T_BOUND, T_BRKPT, T_DBLFLT, T_DEBUG, T_DEVICE,
    T_DIVIDE, T_FPERR, T_GPFLT, T_ILLOP, T_MCHK, T_NMI, T_OFLOW, T_PGFLT, T_SEGNP, T_SIMDERR,
    T_STACK, T_SYSCALL, T_TSS,
};
use forkos_lib::klog_debug;
use spin::Once;

pub const IDT_ENTRIES: usize = 256;
pub const IDT_GATE_INTERRUPT: u8 = 0x0E;

const GATE_PRESENT: u8 = 0x80;

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct IdtEntry {
    pub offset_low: u16,
    pub selector: u16,
    pub ist: u8,
    pub type_attr: u8,
    pub offset_mid: u16,
    pub offset_high: u32,
    pub zero: u32,
}

impl IdtEntry {
    pub const fn missing() -> Self {
        Self {
            offset_low: 0,
            selector: 0,
            ist: 0,
            type_attr: 0,
            offset_mid: 0,
            offset_high: 0,
            zero: 0,
        }
    }

    pub const fn new(handler: u64, selector: u16, typ: u8, dpl: u8) -> Self {
        Self {
            offset_low: (handler & 0xFFFF) as u16,
            selector,
            ist: 0,
            type_attr: typ | GATE_PRESENT | ((dpl & 0x3) << 5),
            offset_mid: ((handler >> 16) & 0xFFFF) as u16,
            offset_high: (handler >> 32) as u32,
            zero: 0,
        }
    }

    #[inline]
    pub const fn is_present(&self) -> bool {
        self.type_attr & GATE_PRESENT != 0
    }

    #[inline]
    pub const fn gate_type(&self) -> u8 {
        self.type_attr & 0x0F
    }

    #[inline]
    pub const fn dpl(&self) -> u8 {
        (self.type_attr >> 5) & 0x3
    }

    #[inline]
    pub const fn handler(&self) -> u64 {
        (self.offset_low as u64) | ((self.offset_mid as u64) << 16) | ((self.offset_high as u64) << 32)
    }
}

/// One installed vector and the privilege level allowed to raise it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GateSpec {
    pub vector: u8,
    pub dpl: u8,
}

const fn kernel_gate(vector: u8) -> GateSpec {
    GateSpec { vector, dpl: 0 }
}

const fn user_gate(vector: u8) -> GateSpec {
    GateSpec { vector, dpl: 3 }
}

const fn irq_gates() -> [GateSpec; IRQ_LINES as usize] {
    let mut gates = [kernel_gate(0); IRQ_LINES as usize];
    let mut i = 0;
    while i < IRQ_LINES as usize {
        gates[i] = kernel_gate(IRQ_OFFSET + i as u8);
        i += 1;
    }
    gates
}

const EXCEPTION_GATES: [GateSpec; 18] = [
    kernel_gate(T_DIVIDE),
    kernel_gate(T_DEBUG),
    kernel_gate(T_NMI),
    user_gate(T_BRKPT),
    kernel_gate(T_OFLOW),
    kernel_gate(T_BOUND),
    kernel_gate(T_ILLOP),
    kernel_gate(T_DEVICE),
    kernel_gate(T_DBLFLT),
    kernel_gate(T_TSS),
    kernel_gate(T_SEGNP),
    kernel_gate(T_STACK),
    kernel_gate(T_GPFLT),
    kernel_gate(T_PGFLT),
    kernel_gate(T_FPERR),
    kernel_gate(T_ALIGN),
    kernel_gate(T_MCHK),
    kernel_gate(T_SIMDERR),
];

const IRQ_GATES: [GateSpec; IRQ_LINES as usize] = irq_gates();

const SYSCALL_GATE: GateSpec = user_gate(T_SYSCALL);

/// Every vector the kernel installs.
pub fn vector_table() -> impl Iterator<Item = GateSpec> {
    EXCEPTION_GATES
        .into_iter()
        .chain(IRQ_GATES)
        .chain(core::iter::once(SYSCALL_GATE))
}

/// Source of low-level entry stub addresses, one per installed vector.
pub trait EntryStubs {
    fn entry_for(&self, vector: u8) -> Option<u64>;
}

impl<F> EntryStubs for F
where
    F: Fn(u8) -> Option<u64>,
{
    fn entry_for(&self, vector: u8) -> Option<u64> {
        self(vector)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IdtError {
    MissingStub { vector: u8 },
    NullHandler { vector: u8 },
}

impl fmt::Display for IdtError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingStub { vector } => write!(f, "no entry stub for vector {}", vector),
            Self::NullHandler { vector } => write!(f, "null entry stub for vector {}", vector),
        }
    }
}

#[repr(C, align(16))]
pub struct Idt {
    entries: [IdtEntry; IDT_ENTRIES],
}

impl Idt {
    pub fn build<S>(stubs: &S) -> Result<Self, IdtError>
    where
        S: EntryStubs + ?Sized,
    {
        let mut entries = [IdtEntry::missing(); IDT_ENTRIES];
        for gate in vector_table() {
            let handler = stubs
                .entry_for(gate.vector)
                .ok_or(IdtError::MissingStub { vector: gate.vector })?;
            if handler == 0 {
                return Err(IdtError::NullHandler { vector: gate.vector });
            }
            entries[gate.vector as usize] =
                IdtEntry::new(handler, GD_KT, IDT_GATE_INTERRUPT, gate.dpl);
        }
        Ok(Self { entries })
    }

    #[inline]
    pub fn entry(&self, vector: u8) -> &IdtEntry {
        &self.entries[vector as usize]
    }

    /// Value for the IDTR limit field.
    pub const fn limit() -> u16 {
        (core::mem::size_of::<IdtEntry>() * IDT_ENTRIES - 1) as u16
    }

    pub fn base(&self) -> u64 {
        self.entries.as_ptr() as u64
    }
}

static IDT: Once<Idt> = Once::new();

/// Build the shared table once. Later calls return the first table and
/// ignore `stubs`.
pub fn idt_init<S>(stubs: &S) -> Result<&'static Idt, IdtError>
where
    S: EntryStubs + ?Sized,
{
    let idt = IDT.try_call_once(|| Idt::build(stubs))?;
    klog_debug!("IDT: base=0x{:x} limit=0x{:x}", idt.base(), Idt::limit());
    Ok(idt)
}
