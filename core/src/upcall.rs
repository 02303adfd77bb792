//! Page-fault upcall bridge.
//!
//! A user-mode page fault is reflected back to the faulting environment: the
//! interrupted context is written as a [`UTrapframe`] onto the environment's
//! exception stack and the environment is resumed at its registered handler
//! with the stack pointer at that record.
//!
//! ```text
//!  UXSTACK_TOP ->  +----------------+
//!                  |  UTrapframe    |   first fault
//!                  +----------------+ <- handler rsp
//!                  |  handler data  |
//!                  +----------------+ <- rsp at recursive fault
//!                  |  scratch word  |   value 0, marks a nested record
//!                  +----------------+
//!                  |  UTrapframe    |   nested fault
//!                  +----------------+ <- nested handler rsp
//! ```

use core::fmt;

use forkos_abi::memlayout::{UXSTACK_BASE, UXSTACK_TOP, in_exception_guard, in_exception_stack};
use forkos_abi::trapframe::{UTRAPFRAME_ALIGN, UTRAPFRAME_SIZE};
use forkos_abi::{EnvId, Trapframe, UTrapframe, VirtAddr};
use forkos_lib::{align_down_u64, is_aligned_u64};
use forkos_lib::kdiag::dump_trapframe;
use forkos_lib::klog_error;
use forkos_mm::{MmError, PageFlags, PageWalk, user_mem_check};

use crate::cpu::CpuContext;
use crate::services::Kernel;
use crate::trap::destroy_current_env;

/// Size of the scratch word left between a handler's frame and a nested
/// record.
pub const SCRATCH_WORD: u64 = 8;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UpcallError {
    /// The environment never registered a fault handler.
    NoHandler,
    /// A nested record would not fit on the exception-stack page.
    ExceptionStackOverflow { rsp: u64 },
    /// The exception stack is not mapped writable for the environment.
    StackNotWritable(MmError),
    /// Writing the record into the environment failed.
    CopyFailed(MmError),
}

impl fmt::Display for UpcallError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoHandler => write!(f, "no page fault handler registered"),
            Self::ExceptionStackOverflow { rsp } => {
                write!(f, "exception stack overflow at rsp {:#x}", rsp)
            }
            Self::StackNotWritable(e) => write!(f, "exception stack not writable: {}", e),
            Self::CopyFailed(e) => write!(f, "fault record copy failed: {}", e),
        }
    }
}

/// Where the next fault record goes on the exception stack.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FaultRecordSlot {
    /// Lowest address of the record; the handler's stack pointer.
    pub record: VirtAddr,
    /// Scratch word above a nested record. `None` for a first-level fault.
    pub scratch: Option<VirtAddr>,
}

impl FaultRecordSlot {
    #[inline]
    pub fn is_recursive(&self) -> bool {
        self.scratch.is_some()
    }

    /// Bytes of user memory the slot occupies.
    pub fn span(&self) -> u64 {
        UTRAPFRAME_SIZE as u64 + if self.is_recursive() { SCRATCH_WORD } else { 0 }
    }
}

/// Choose the record location for a fault taken with stack pointer `rsp`.
///
/// A fault taken while already on the exception stack nests below the live
/// frame with one scratch word in between; any other fault starts at the
/// top of the exception stack. A stack pointer in the guard page below the
/// exception stack means the handler ran off its page.
pub fn place_fault_record(rsp: u64) -> Result<FaultRecordSlot, UpcallError> {
    let record_size = UTRAPFRAME_SIZE as u64;
    if in_exception_guard(rsp) {
        return Err(UpcallError::ExceptionStackOverflow { rsp });
    }
    if !in_exception_stack(rsp) {
        return Ok(FaultRecordSlot {
            record: VirtAddr(UXSTACK_TOP.as_u64() - record_size),
            scratch: None,
        });
    }

    let scratch = align_down_u64(rsp, UTRAPFRAME_ALIGN) - SCRATCH_WORD;
    let record = scratch
        .checked_sub(record_size)
        .filter(|&r| r >= UXSTACK_BASE.as_u64())
        .ok_or(UpcallError::ExceptionStackOverflow { rsp })?;
    debug_assert!(is_aligned_u64(record, UTRAPFRAME_ALIGN));
    Ok(FaultRecordSlot {
        record: VirtAddr(record),
        scratch: Some(VirtAddr(scratch)),
    })
}

/// Handle a page fault for the current environment.
///
/// A fault in kernel mode is a kernel bug and panics. Any failure to deliver
/// a user fault terminates the environment.
pub fn page_fault_handler<K>(kernel: &mut K, cpu: &mut CpuContext, tf: &Trapframe)
where
    K: Kernel + ?Sized,
{
    let fault_va = kernel.fault_address();

    if !tf.from_user() {
        dump_trapframe(tf, Some(fault_va));
        panic!("kernel page fault at va {:#x} ip {:#x}", fault_va, tf.rip);
    }

    let Some(env) = cpu.curenv else {
        panic!("user page fault at va {:#x} with no current environment", fault_va);
    };

    if let Err(err) = deliver_upcall(kernel, env, tf, VirtAddr(fault_va)) {
        klog_error!(
            "[{}] user fault va {:#x} ip {:#x}: {}",
            env,
            fault_va,
            tf.rip,
            err
        );
        dump_trapframe(tf, Some(fault_va));
        destroy_current_env(kernel, cpu, env);
    }
}

fn deliver_upcall<K>(
    kernel: &mut K,
    env: EnvId,
    tf: &Trapframe,
    fault_va: VirtAddr,
) -> Result<(), UpcallError>
where
    K: Kernel + ?Sized,
{
    let entry = kernel.pgfault_upcall(env).ok_or(UpcallError::NoHandler)?;
    let slot = place_fault_record(tf.rsp)?;

    let lookup = |va: VirtAddr| -> PageWalk { kernel.lookup(env, va) };
    user_mem_check(
        &lookup,
        slot.record,
        slot.span(),
        PageFlags::USER | PageFlags::WRITABLE,
    )
    .map_err(UpcallError::StackNotWritable)?;

    if let Some(scratch) = slot.scratch {
        kernel
            .copy_to_user(env, scratch, &0u64.to_le_bytes())
            .map_err(UpcallError::CopyFailed)?;
    }
    let record = UTrapframe::capture(tf, fault_va);
    kernel
        .copy_to_user(env, slot.record, &record.to_bytes())
        .map_err(UpcallError::CopyFailed)?;

    let Some(saved) = kernel.env_frame_mut(env) else {
        panic!("[{}] current environment has no saved context", env);
    };
    saved.rsp = slot.record.as_u64();
    saved.rip = entry.as_u64();
    Ok(())
}
