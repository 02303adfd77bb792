//! Trap and interrupt vector numbers, segment selectors, and flag bits.

// =============================================================================
// CPU Exception Vectors
// =============================================================================

pub const T_DIVIDE: u8 = 0;
pub const T_DEBUG: u8 = 1;
pub const T_NMI: u8 = 2;
pub const T_BRKPT: u8 = 3;
pub const T_OFLOW: u8 = 4;
pub const T_BOUND: u8 = 5;
pub const T_ILLOP: u8 = 6;
pub const T_DEVICE: u8 = 7;
pub const T_DBLFLT: u8 = 8;
pub const T_TSS: u8 = 10;
pub const T_SEGNP: u8 = 11;
pub const T_STACK: u8 = 12;
pub const T_GPFLT: u8 = 13;
pub const T_PGFLT: u8 = 14;
pub const T_FPERR: u8 = 16;
pub const T_ALIGN: u8 = 17;
pub const T_MCHK: u8 = 18;
pub const T_SIMDERR: u8 = 19;

/// System call vector. Invocable from user mode.
pub const T_SYSCALL: u8 = 48;

// =============================================================================
// Hardware IRQs
// =============================================================================

/// First vector used by the remapped legacy PIC lines.
pub const IRQ_OFFSET: u8 = 32;
pub const IRQ_LINES: u8 = 16;

pub const IRQ_TIMER: u8 = 0;
pub const IRQ_KBD: u8 = 1;
pub const IRQ_SERIAL: u8 = 4;
pub const IRQ_SPURIOUS: u8 = 7;

/// Returns the vector a legacy IRQ line is delivered on.
#[inline]
pub const fn irq_vector(irq: u8) -> u8 {
    IRQ_OFFSET + irq
}

// =============================================================================
// Segment selectors
// =============================================================================

pub const GD_KT: u16 = 0x08;
pub const GD_KD: u16 = 0x10;
pub const GD_UT: u16 = 0x18;
pub const GD_UD: u16 = 0x20;
pub const GD_TSS0: u16 = 0x28;

/// Requested privilege level mask of a selector.
pub const SEL_RPL_MASK: u64 = 0x3;
pub const RPL_USER: u64 = 0x3;

// =============================================================================
// RFLAGS
// =============================================================================

/// Interrupt enable flag.
pub const FL_IF: u64 = 1 << 9;

// =============================================================================
// Page fault error code bits
// =============================================================================

/// Fault was a protection violation (page present).
pub const FEC_PR: u64 = 0x1;
/// Fault was caused by a write.
pub const FEC_WR: u64 = 0x2;
/// Fault occurred in user mode.
pub const FEC_U: u64 = 0x4;
