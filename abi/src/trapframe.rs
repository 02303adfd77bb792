//! Saved CPU context and the user fault-context record.
//!
//! # Layout contracts
//!
//! [`Trapframe`] is filled in by the low-level entry stubs and must match
//! their push order. [`UTrapframe`] is written onto the user exception stack
//! by the kernel page-fault bridge and read back by the user fault handler and
//! the upcall trampoline; both sides go through [`UTrapframe::to_bytes`] and
//! [`UTrapframe::from_bytes`] so the byte layout has exactly one definition.

use core::mem::size_of;

use crate::addr::VirtAddr;
use crate::trap::{RPL_USER, SEL_RPL_MASK};

/// General purpose registers in entry-stub push order.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PushRegs {
    pub r15: u64,
    pub r14: u64,
    pub r13: u64,
    pub r12: u64,
    pub r11: u64,
    pub r10: u64,
    pub r9: u64,
    pub r8: u64,
    pub rbp: u64,
    pub rdi: u64,
    pub rsi: u64,
    pub rdx: u64,
    pub rcx: u64,
    pub rbx: u64,
    pub rax: u64,
}

pub const PUSH_REGS_SLOTS: usize = 15;

impl PushRegs {
    fn to_slots(self) -> [u64; PUSH_REGS_SLOTS] {
        [
            self.r15, self.r14, self.r13, self.r12, self.r11, self.r10, self.r9, self.r8,
            self.rbp, self.rdi, self.rsi, self.rdx, self.rcx, self.rbx, self.rax,
        ]
    }

    fn from_slots(s: &[u64; PUSH_REGS_SLOTS]) -> Self {
        Self {
            r15: s[0],
            r14: s[1],
            r13: s[2],
            r12: s[3],
            r11: s[4],
            r10: s[5],
            r9: s[6],
            r8: s[7],
            rbp: s[8],
            rdi: s[9],
            rsi: s[10],
            rdx: s[11],
            rcx: s[12],
            rbx: s[13],
            rax: s[14],
        }
    }
}

/// Full CPU state at the moment of a trap.
///
/// `rsp` and `ss` are only meaningful when the trap came from user mode; the
/// CPU pushes them unconditionally on x86_64 but the kernel stack pointer of a
/// kernel-mode trap is never resumed from here.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Trapframe {
    pub regs: PushRegs,
    pub es: u64,
    pub ds: u64,
    pub trapno: u64,
    pub err: u64,
    pub rip: u64,
    pub cs: u64,
    pub rflags: u64,
    pub rsp: u64,
    pub ss: u64,
}

const _: () = assert!(size_of::<Trapframe>() == 24 * 8);

impl Trapframe {
    /// True if the trap was taken while executing at user privilege.
    #[inline]
    pub const fn from_user(&self) -> bool {
        (self.cs & SEL_RPL_MASK) == RPL_USER
    }

    #[inline]
    pub const fn vector(&self) -> u8 {
        (self.trapno & 0xFF) as u8
    }
}

/// Fault-context record pushed onto the user exception stack.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct UTrapframe {
    pub fault_va: u64,
    pub err: u64,
    pub regs: PushRegs,
    pub rip: u64,
    pub rflags: u64,
    pub rsp: u64,
}

const UTRAPFRAME_SLOTS: usize = 2 + PUSH_REGS_SLOTS + 3;

/// Encoded size of a [`UTrapframe`] in bytes.
pub const UTRAPFRAME_SIZE: usize = UTRAPFRAME_SLOTS * 8;

/// Required alignment of a [`UTrapframe`] on the exception stack.
pub const UTRAPFRAME_ALIGN: u64 = 8;

const _: () = assert!(size_of::<UTrapframe>() == UTRAPFRAME_SIZE);

impl UTrapframe {
    /// Snapshot the interrupted user context of `tf` for delivery to the
    /// process's own fault handler.
    pub fn capture(tf: &Trapframe, fault_va: VirtAddr) -> Self {
        Self {
            fault_va: fault_va.as_u64(),
            err: tf.err,
            regs: tf.regs,
            rip: tf.rip,
            rflags: tf.rflags,
            rsp: tf.rsp,
        }
    }

    #[inline]
    pub const fn fault_va(&self) -> VirtAddr {
        VirtAddr(self.fault_va)
    }

    pub fn to_bytes(&self) -> [u8; UTRAPFRAME_SIZE] {
        let mut slots = [0u64; UTRAPFRAME_SLOTS];
        slots[0] = self.fault_va;
        slots[1] = self.err;
        slots[2..2 + PUSH_REGS_SLOTS].copy_from_slice(&self.regs.to_slots());
        slots[UTRAPFRAME_SLOTS - 3] = self.rip;
        slots[UTRAPFRAME_SLOTS - 2] = self.rflags;
        slots[UTRAPFRAME_SLOTS - 1] = self.rsp;

        let mut out = [0u8; UTRAPFRAME_SIZE];
        for (chunk, slot) in out.chunks_exact_mut(8).zip(slots.iter()) {
            chunk.copy_from_slice(&slot.to_le_bytes());
        }
        out
    }

    /// Decode a record. Returns `None` if `bytes` is shorter than
    /// [`UTRAPFRAME_SIZE`].
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let bytes = bytes.get(..UTRAPFRAME_SIZE)?;
        let mut slots = [0u64; UTRAPFRAME_SLOTS];
        for (slot, chunk) in slots.iter_mut().zip(bytes.chunks_exact(8)) {
            let mut word = [0u8; 8];
            word.copy_from_slice(chunk);
            *slot = u64::from_le_bytes(word);
        }

        let mut regs = [0u64; PUSH_REGS_SLOTS];
        regs.copy_from_slice(&slots[2..2 + PUSH_REGS_SLOTS]);
        Some(Self {
            fault_va: slots[0],
            err: slots[1],
            regs: PushRegs::from_slots(&regs),
            rip: slots[UTRAPFRAME_SLOTS - 3],
            rflags: slots[UTRAPFRAME_SLOTS - 2],
            rsp: slots[UTRAPFRAME_SLOTS - 1],
        })
    }
}
